//! PII Redactor (C2): regex-based masking with stable placeholder tokens,
//! applied before any transcript content reaches an LLM call unless the
//! compiled flow's metadata explicitly permits raw preservation.

use once_cell::sync::Lazy;
use qa_core::{DiarizedSegment, Transcript};
use regex::Regex;

struct Pattern {
    regex: Lazy<Regex>,
    placeholder: &'static str,
}

macro_rules! pattern {
    ($re:expr, $placeholder:expr) => {
        Pattern { regex: Lazy::new(|| Regex::new($re).unwrap()), placeholder: $placeholder }
    };
}

static EMAIL: Pattern = pattern!(r"(?i)[a-z0-9._%+\-]+@[a-z0-9.\-]+\.[a-z]{2,}", "{{EMAIL}}");
static CARD_NUMBER: Pattern = pattern!(r"\b(?:\d[ -]?){13,19}\b", "{{CARD_NUMBER}}");
static SSN: Pattern = pattern!(r"\b\d{3}-\d{2}-\d{4}\b", "{{SSN}}");
static PHONE: Pattern = pattern!(r"\b(?:\+?\d{1,3}[ -]?)?(?:\(\d{3}\)|\d{3})[ -]?\d{3}[ -]?\d{4}\b", "{{PHONE}}");
static ACCOUNT_NUMBER: Pattern =
    pattern!(r"(?i)\baccount\s*(?:number|no\.?|#)?\s*:?\s*(\d{6,17})\b", "{{ACCOUNT_NUMBER}}");
static ORDER_ID: Pattern = pattern!(r"(?i)\border\s*(?:id|number|no\.?|#)?\s*:?\s*([a-z0-9-]{5,20})\b", "{{ORDER_ID}}");
static ADDRESS: Pattern = pattern!(
    r"(?i)\b\d{1,5}\s+[a-z0-9.' ]{2,40}\b(street|st|avenue|ave|road|rd|lane|ln|boulevard|blvd|drive|dr)\b",
    "{{ADDRESS}}"
);
static NAME_INTRO: Pattern = pattern!(r"(?i)\bmy name is\s+([a-z]+(?:\s[a-z]+){0,2})", "{{NAME}}");
static HONORIFIC_NAME: Pattern = pattern!(r"\b(Mr|Mrs|Ms|Dr|Mx)\.?\s+[A-Z][a-zA-Z'-]+\b", "{{NAME}}");

/// Applied in a fixed order so later patterns never re-match a placeholder
/// already written by an earlier one — the order is what makes
/// `redact(redact(x)) == redact(x)` hold.
fn ordered_patterns() -> [&'static Pattern; 8] {
    [&EMAIL, &CARD_NUMBER, &SSN, &PHONE, &ACCOUNT_NUMBER, &ORDER_ID, &ADDRESS, &NAME_INTRO]
}

fn redact_text(text: &str) -> String {
    let mut out = text.to_string();
    for pattern in ordered_patterns() {
        out = pattern.regex.replace_all(&out, pattern.placeholder).into_owned();
    }
    out = HONORIFIC_NAME.regex.replace_all(&out, HONORIFIC_NAME.placeholder).into_owned();
    out
}

pub struct PiiRedactor;

impl PiiRedactor {
    /// Redacts a single string; idempotent — redacting already-redacted
    /// text returns it unchanged.
    pub fn redact_str(text: &str) -> String {
        redact_text(text)
    }

    /// Redacts a transcript's aggregate text and every segment's text,
    /// leaving timestamps, speaker, and confidence untouched.
    pub fn redact_transcript(transcript: &Transcript) -> Transcript {
        Transcript {
            recording_id: transcript.recording_id,
            transcript_text: redact_text(&transcript.transcript_text),
            diarized_segments: transcript.diarized_segments.iter().map(Self::redact_segment).collect(),
            sentiment_analysis: transcript.sentiment_analysis.clone(),
            confidence: transcript.confidence,
        }
    }

    pub fn redact_segment(segment: &DiarizedSegment) -> DiarizedSegment {
        DiarizedSegment {
            speaker: segment.speaker,
            text: redact_text(&segment.text),
            start_s: segment.start_s,
            end_s: segment.end_s,
            confidence: segment.confidence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qa_core::{RecordingId, Speaker};

    #[test]
    fn email_is_masked() {
        let redacted = PiiRedactor::redact_str("reach me at jane.doe@example.com please");
        assert_eq!(redacted, "reach me at {{EMAIL}} please");
    }

    #[test]
    fn card_number_is_masked() {
        let redacted = PiiRedactor::redact_str("my card is 4111 1111 1111 1111 thanks");
        assert!(redacted.contains("{{CARD_NUMBER}}"));
        assert!(!redacted.contains("4111"));
    }

    #[test]
    fn ssn_is_masked() {
        let redacted = PiiRedactor::redact_str("ssn 123-45-6789 on file");
        assert_eq!(redacted, "ssn {{SSN}} on file");
    }

    #[test]
    fn account_number_is_masked_with_context() {
        let redacted = PiiRedactor::redact_str("your account number 88213344 is active");
        assert!(redacted.contains("{{ACCOUNT_NUMBER}}"));
    }

    #[test]
    fn redaction_is_idempotent() {
        let once = PiiRedactor::redact_str("call me at 555-123-4567 or jane@example.com");
        let twice = PiiRedactor::redact_str(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn transcript_segments_keep_timestamps_and_speaker() {
        let transcript = Transcript {
            recording_id: RecordingId::new(),
            transcript_text: "Agent: my name is John Smith".into(),
            diarized_segments: vec![DiarizedSegment {
                speaker: Speaker::Agent,
                text: "my name is John Smith".into(),
                start_s: 1.0,
                end_s: 3.0,
                confidence: 0.9,
            }],
            sentiment_analysis: Vec::new(),
            confidence: 0.9,
        };
        let redacted = PiiRedactor::redact_transcript(&transcript);
        assert_eq!(redacted.diarized_segments[0].speaker, Speaker::Agent);
        assert_eq!(redacted.diarized_segments[0].start_s, 1.0);
        assert!(redacted.diarized_segments[0].text.contains("{{NAME}}"));
    }
}
