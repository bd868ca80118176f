//! Data models for polyide
//!
//! Contains core type definitions used throughout the engine.

pub mod compile;
pub mod diagnostic;
pub mod location;

// Re-export commonly used types
pub use compile::CompileResult;
pub use diagnostic::{Diagnostic, Severity};
pub use location::{LinePos, RemoteLocation, Span};

use serde::{Deserialize, Serialize};

/// Identifier embedded in an outgoing command so the eventual response can be
/// correlated back to the issuing request. Monotonically assigned, never
/// reused within an engine instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub u64);

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RequestId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(RequestId)
    }
}

impl From<u64> for RequestId {
    fn from(id: u64) -> Self {
        RequestId(id)
    }
}
