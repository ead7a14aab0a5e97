//! Knowledge record schema for lineage.
//!
//! Extraction output is untrusted: it arrives as a lenient
//! [`CandidateRecord`] and only becomes a [`lineage_shared::KnowledgeRecord`]
//! after [`validate`] accepts it. Rejections carry every violation found so
//! the producer can be re-invoked with [`format_feedback`].

pub mod candidate;
pub mod feedback;
pub mod validator;

pub use candidate::{
    CandidateCitation, CandidateCoreAnalysis, CandidateKeyPoint, CandidateLogicChain,
    CandidateMeta, CandidateRecord,
};
pub use feedback::format_feedback;
pub use validator::{PLAUSIBLE_YEARS, ValidationError, validate, validate_as, validate_json};
