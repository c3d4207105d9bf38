//! Opaque 128-bit identifiers for every entity in the data model.
//!
//! Each id wraps a [`Uuid`] so that values belonging to different entities
//! can't be swapped at a call site by accident.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! id_type {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            pub fn as_uuid(&self) -> Uuid {
                self.0
            }

            /// First 8 hex characters, used in display names like "bp:{short} v{n}".
            pub fn short(&self) -> String {
                self.0.simple().to_string()[..8].to_string()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(BlueprintId);
id_type!(BlueprintVersionId);
id_type!(StageId);
id_type!(BehaviorId);
id_type!(CompiledFlowVersionId);
id_type!(CompiledStepId);
id_type!(CompiledRuleId);
id_type!(RubricCategoryId);
id_type!(RecordingId);
id_type!(EvaluationId);
id_type!(SandboxRunId);
