//! Domain models for Healgate.
//!
//! Canonical definitions for the core entities:
//! - `PatchStrategy`: Immutable patch candidate with a unified diff
//! - `QualityReview`: Go / no-go verdict with risk tier and slop score
//! - `ContentDigest`: SHA-256 integrity tag for persisted artifacts

pub mod digest;
pub mod error;
pub mod patch;
pub mod review;

// Re-export main types and errors
pub use digest::ContentDigest;
pub use error::{HealgateError, Result};
pub use patch::{FailureKind, PatchStrategy};
pub use review::{QualityReview, RiskTier, Verdict};
