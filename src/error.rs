//! Error types.
//!
//! Every failure the merge engine can report is a variant of [`Error`]. None of them
//! are recovered locally: the merger aborts on the first one and the partially
//! written output is discarded.

use thiserror::Error;

use crate::config::CollisionPolicy;

/// Builds an [`Error::Malformed`] from a message or a format string.
macro_rules! malformed {
    ($msg:expr) => {
        $crate::error::Error::Malformed {
            message: $msg.to_string(),
        }
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::Error::Malformed {
            message: format!($fmt, $($arg)*),
        }
    };
}
pub(crate) use malformed;

#[derive(Error, Debug)]
pub enum Error {
    /// The same class is defined by both inputs and the policy forbids it.
    #[error("Multiple dex files define {type_name} (collision policy {policy})")]
    StructuralCollision {
        type_name: String,
        policy: CollisionPolicy,
    },

    /// An input image failed to parse.
    #[error("Malformed dex: {message}")]
    Malformed { message: String },

    /// A section outgrew the budget the capacity planner gave it.
    #[error("Section limit {limit} exceeded by {section} (requested {requested} more bytes)")]
    CapacityOverrun {
        section: &'static str,
        limit: u32,
        requested: usize,
    },

    /// A record was about to be written at a position that is not 4-byte aligned.
    #[error("Not four byte aligned: {section} at 0x{position:x}")]
    Misaligned { section: &'static str, position: u32 },

    /// Class depths stopped converging: the inheritance graph has a cycle.
    #[error("Inheritance cycle involving {type_name} ({unresolved} classes unresolved)")]
    InheritanceCycle { type_name: String, unresolved: usize },

    /// A merged index no longer fits the width its encoding allows.
    #[error("{kind} index {index} does not fit its encoding")]
    IndexOverflow { kind: &'static str, index: u32 },

    /// The input uses a construct that cannot be renumbered.
    #[error("Unsupported: {what}")]
    Unsupported { what: String },
}

pub type Result<T> = std::result::Result<T, Error>;
