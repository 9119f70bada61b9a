//! False-alarm pattern learning for the leak-detection core.
//!
//! Incidents the operator closes as resolved-without-action or ignored leave
//! behind a [`signature::PatternSignature`]; new observations that resemble
//! a learned signature get their confidence discounted before they reach the
//! incident collaborator.

pub mod matcher;
pub mod signature;
pub mod store;

pub use matcher::PatternMatcher;
pub use signature::{PatternSignature, ProfileShape, Season};
pub use store::{FilePatternStore, LearnedPattern, MemoryPatternStore, PatternStore};
