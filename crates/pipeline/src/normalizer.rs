//! Transcript Normalizer (C1): cleans diarized segments, merges
//! same-speaker runs, and trims very long calls around the ranges that
//! matter. Cleaning always runs first; trimming is a separate step the
//! caller invokes once it has real evidence timestamps to trim around —
//! see `Normalizer::trim`.

use once_cell::sync::Lazy;
use qa_core::{DiarizedSegment, Speaker};
use regex::Regex;
use serde::Serialize;

const FILLER_WORDS: &[&str] = &["um", "umm", "uh", "uhh", "uhm", "erm", "you know", "i mean", "like"];

static NOISE_MARKER: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\[(][^\])]*(noise|crosstalk|inaudible|music|silence)[^\])]*[\])]").unwrap());
static FILLER_PATTERN: Lazy<Regex> = Lazy::new(|| {
    let alternation = FILLER_WORDS.join("|");
    Regex::new(&format!(r"(?i)\b({alternation})\b")).unwrap()
});
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static SPACE_BEFORE_PUNCT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+([,.!?])").unwrap());

/// One segment's original text alongside what normalization produced,
/// kept so evidence referencing a cleaned segment can still be audited
/// against what the speaker actually said.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub original_text: String,
    pub cleaned_text: String,
    pub start_s: f64,
    pub end_s: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct NormalizationMetadata {
    pub compression_ratio: f64,
    pub segment_count: usize,
    pub speaker_change_count: usize,
    pub trimmed: bool,
}

#[derive(Debug, Clone)]
pub struct NormalizedTranscript {
    pub text: String,
    pub segments: Vec<DiarizedSegment>,
    pub audit: Vec<AuditEntry>,
    pub metadata: NormalizationMetadata,
}

fn clean_text(raw: &str) -> String {
    let collapsed_noise = NOISE_MARKER.replace_all(raw, "{noise}");
    let without_fillers = FILLER_PATTERN.replace_all(&collapsed_noise, "");
    let spaced = SPACE_BEFORE_PUNCT.replace_all(&without_fillers, "$1");
    WHITESPACE.replace_all(spaced.trim(), " ").to_string()
}

fn merge_consecutive(segments: Vec<DiarizedSegment>, gap_s: f64) -> Vec<DiarizedSegment> {
    let mut merged: Vec<DiarizedSegment> = Vec::with_capacity(segments.len());
    for segment in segments {
        if let Some(last) = merged.last_mut() {
            if last.speaker == segment.speaker && segment.start_s - last.end_s <= gap_s {
                last.text.push(' ');
                last.text.push_str(&segment.text);
                last.end_s = segment.end_s;
                last.confidence = last.confidence.min(segment.confidence);
                continue;
            }
        }
        merged.push(segment);
    }
    merged
}

fn speaker_change_count(segments: &[DiarizedSegment]) -> usize {
    segments.windows(2).filter(|w| w[0].speaker != w[1].speaker).count()
}

fn overlaps_any(segment: &DiarizedSegment, ranges: &[(f64, f64)]) -> bool {
    ranges.iter().any(|(start, end)| segment.start_s < *end && segment.end_s > *start)
}

fn reconstruct_text(segments: &[DiarizedSegment]) -> String {
    segments
        .iter()
        .map(|s| format!("{}: {}", role_label(s.speaker), s.text))
        .collect::<Vec<_>>()
        .join("\n")
}

pub(crate) fn role_label(speaker: Speaker) -> &'static str {
    match speaker {
        Speaker::Agent => "Agent",
        Speaker::Caller => "Caller",
        Speaker::Other => "Other",
    }
}

pub struct Normalizer {
    pub merge_gap_s: f64,
    pub max_call_duration_s: f64,
    pub keep_segments_s: f64,
}

impl Normalizer {
    pub fn new(merge_gap_s: f64, max_call_duration_s: f64, keep_segments_s: f64) -> Self {
        Self { merge_gap_s, max_call_duration_s, keep_segments_s }
    }

    /// Steps 1 and 2 only: clean filler/noise from each segment's text and
    /// merge consecutive same-speaker runs. Never trims — `metadata.trimmed`
    /// is always `false` here, since at this point nothing downstream has
    /// looked at the transcript yet and there's no real evidence to trim
    /// around. Call `trim` afterward, once detection/rule evidence exists,
    /// for calls that turn out to run long.
    pub fn normalize(&self, raw_segments: &[DiarizedSegment]) -> NormalizedTranscript {
        let original_char_count: usize = raw_segments.iter().map(|s| s.text.len()).sum();

        let mut audit = Vec::with_capacity(raw_segments.len());
        let cleaned: Vec<DiarizedSegment> = raw_segments
            .iter()
            .filter_map(|segment| {
                let cleaned_text = clean_text(&segment.text);
                if cleaned_text.is_empty() {
                    return None;
                }
                audit.push(AuditEntry {
                    original_text: segment.text.clone(),
                    cleaned_text: cleaned_text.clone(),
                    start_s: segment.start_s,
                    end_s: segment.end_s,
                });
                Some(DiarizedSegment {
                    speaker: segment.speaker,
                    text: cleaned_text,
                    start_s: segment.start_s,
                    end_s: segment.end_s,
                    confidence: segment.confidence,
                })
            })
            .collect();

        let final_segments = merge_consecutive(cleaned, self.merge_gap_s);
        let speaker_changes = speaker_change_count(&final_segments);
        let text = reconstruct_text(&final_segments);
        let compression_ratio = if original_char_count > 0 {
            text.len() as f64 / original_char_count as f64
        } else {
            1.0
        };

        NormalizedTranscript {
            text,
            metadata: NormalizationMetadata {
                compression_ratio,
                segment_count: final_segments.len(),
                speaker_change_count: speaker_changes,
                trimmed: false,
            },
            segments: final_segments,
            audit,
        }
    }

    /// Step 3: trims a call over `max_call_duration_s`, keeping the first
    /// and last `keep_segments_s` seconds plus a window around each
    /// `(event_start, event_end)` pair in `evidence_ranges` — real
    /// detection/rule-hit timestamps supplied by the caller, already
    /// buffered (mirrors `rule_event_buffer_s` around each event), not
    /// blueprint phrase text. A behavior matched purely semantically, with
    /// no literal `expected_phrases` to scan for, still produced a detected
    /// start time, so its evidence survives the trim the same way a
    /// phrase-matched one does. No-op (segments pass through unchanged,
    /// `trimmed` stays as it was) when the call isn't over the limit.
    pub fn trim(&self, normalized: &NormalizedTranscript, evidence_ranges: &[(f64, f64)]) -> NormalizedTranscript {
        let duration = normalized.segments.iter().map(|s| s.end_s).fold(0.0_f64, f64::max);
        if duration <= self.max_call_duration_s {
            return normalized.clone();
        }

        let mut ranges = vec![(0.0, self.keep_segments_s), ((duration - self.keep_segments_s).max(0.0), duration)];
        ranges.extend(evidence_ranges.iter().copied());

        let kept: Vec<DiarizedSegment> = normalized.segments.iter().filter(|s| overlaps_any(s, &ranges)).cloned().collect();
        let speaker_changes = speaker_change_count(&kept);
        let text = reconstruct_text(&kept);
        let original_char_count: usize = normalized.audit.iter().map(|a| a.original_text.len()).sum();
        let compression_ratio = if original_char_count > 0 {
            text.len() as f64 / original_char_count as f64
        } else {
            1.0
        };

        NormalizedTranscript {
            text,
            metadata: NormalizationMetadata {
                compression_ratio,
                segment_count: kept.len(),
                speaker_change_count: speaker_changes,
                trimmed: true,
            },
            segments: kept,
            audit: normalized.audit.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(speaker: Speaker, text: &str, start_s: f64, end_s: f64, confidence: f64) -> DiarizedSegment {
        DiarizedSegment { speaker, text: text.to_string(), start_s, end_s, confidence }
    }

    #[test]
    fn fillers_and_noise_markers_are_cleaned() {
        let normalizer = Normalizer::new(1.5, 1200.0, 30.0);
        let segments = vec![segment(Speaker::Agent, "um, [background noise] thank you   for calling", 0.0, 3.0, 0.9)];
        let result = normalizer.normalize(&segments);
        assert_eq!(result.segments[0].text, "{noise} thank you for calling");
    }

    #[test]
    fn emptied_segments_are_dropped_but_audited() {
        let normalizer = Normalizer::new(1.5, 1200.0, 30.0);
        let segments = vec![segment(Speaker::Agent, "um uh", 0.0, 1.0, 0.9)];
        let result = normalizer.normalize(&segments);
        assert!(result.segments.is_empty());
        assert_eq!(result.audit.len(), 1);
    }

    #[test]
    fn same_speaker_segments_within_gap_are_merged() {
        let normalizer = Normalizer::new(1.5, 1200.0, 30.0);
        let segments = vec![
            segment(Speaker::Agent, "hello there", 0.0, 1.0, 0.9),
            segment(Speaker::Agent, "how are you", 1.4, 2.5, 0.8),
        ];
        let result = normalizer.normalize(&segments);
        assert_eq!(result.segments.len(), 1);
        assert_eq!(result.segments[0].text, "hello there how are you");
        assert_eq!(result.segments[0].confidence, 0.8);
    }

    #[test]
    fn speaker_change_beyond_gap_is_not_merged() {
        let normalizer = Normalizer::new(1.5, 1200.0, 30.0);
        let segments = vec![
            segment(Speaker::Agent, "hello there", 0.0, 1.0, 0.9),
            segment(Speaker::Caller, "hi", 1.1, 2.0, 0.9),
        ];
        let result = normalizer.normalize(&segments);
        assert_eq!(result.segments.len(), 2);
        assert_eq!(result.metadata.speaker_change_count, 1);
    }

    #[test]
    fn normalize_alone_never_trims() {
        let normalizer = Normalizer::new(1.5, 100.0, 10.0);
        let mut segments = Vec::new();
        for i in 0..40 {
            let start = i as f64 * 5.0;
            segments.push(segment(Speaker::Agent, "filler content here", start, start + 4.0, 0.9));
        }
        let result = normalizer.normalize(&segments);
        assert!(!result.metadata.trimmed);
        assert_eq!(result.segments.len(), segments.len());
    }

    #[test]
    fn long_calls_are_trimmed_to_keep_ranges() {
        let normalizer = Normalizer::new(1.5, 100.0, 10.0);
        let mut segments = Vec::new();
        for i in 0..40 {
            let start = i as f64 * 5.0;
            segments.push(segment(Speaker::Agent, "filler content here", start, start + 4.0, 0.9));
        }
        let cleaned = normalizer.normalize(&segments);
        let result = normalizer.trim(&cleaned, &[]);
        assert!(result.metadata.trimmed);
        assert!(result.segments.len() < segments.len());
        assert!(result.segments.first().unwrap().start_s < 10.0);
    }

    #[test]
    fn trim_preserves_segments_around_real_evidence_timestamps() {
        // A semantic-mode behavior has no literal expected phrase to scan
        // for, so its only trace is the detected start/end it produced —
        // exactly what `evidence_ranges` carries here.
        let normalizer = Normalizer::new(1.5, 100.0, 10.0);
        let mut segments = Vec::new();
        for i in 0..40 {
            let start = i as f64 * 5.0;
            segments.push(segment(Speaker::Agent, "ordinary filler content", start, start + 4.0, 0.9));
        }
        segments[20].text = "so can you tell me what's on file for your address".to_string();
        let event_start = segments[20].start_s;
        let cleaned = normalizer.normalize(&segments);
        let result = normalizer.trim(&cleaned, &[(event_start - 30.0, segments[20].end_s + 30.0)]);
        assert!(result.segments.iter().any(|s| s.text.contains("what's on file")));
    }

    #[test]
    fn trim_is_a_noop_under_the_duration_limit() {
        let normalizer = Normalizer::new(1.5, 1200.0, 30.0);
        let segments = vec![segment(Speaker::Agent, "hello there", 0.0, 1.0, 0.9)];
        let cleaned = normalizer.normalize(&segments);
        let result = normalizer.trim(&cleaned, &[]);
        assert!(!result.metadata.trimmed);
        assert_eq!(result.segments.len(), 1);
    }
}
