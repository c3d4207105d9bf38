//! Blueprint publish pipeline: validate, map to immutable artifacts, and
//! persist them atomically behind an idempotent compile operation.

pub mod audit;
pub mod compiler;
pub mod mapper;
pub mod validator;

pub use audit::{CompileAuditEntry, CompileOutcome};
pub use compiler::{BlueprintCompiler, CompileResult};
pub use mapper::{map_blueprint_to_artifacts, CompiledArtifacts};
pub use validator::{validate_blueprint, ValidationError, ValidationOutcome, ValidationWarning};
