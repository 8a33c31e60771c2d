//! Error types for identifier allocation and content expiry.
//!
//! Every remote backend failure is folded into one of the variants below so
//! that callers can decide on retries without knowing which client library
//! sits underneath. Contention on the refill lock is deliberately absent:
//! losing the lock race is an expected outcome and is reported through
//! [`crate::RefillOutcome::LockDenied`] instead.
//!
//! ## Error Cases
//! - `SourceUnavailable`: the durable sequence counter could not be reached.
//! - `PoolUnavailable`: the identifier pool or refill lock store could not be
//!   reached.
//! - `BrokerUnavailable`: publishing or consuming a deletion job failed.
//! - `StoreUnavailable`: the content store or content cache failed.
//! - `MalformedJob`: a deletion job payload cannot ever be processed.
//! - `DeleteFailed`: deleting an expired post failed; subject to redelivery.
//! - `IdentifierSpaceExhausted`: a sequence value no longer fits the fixed
//!   identifier width.
//! - `InvalidIdentifier`: a string is not a well-formed identifier.
//! - `InvalidPost`: a post body or TTL is outside the configured limits.

/// A result type defaulting to the crate [`Error`].
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Unified error type for the `pastid` crate.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// The durable sequence counter is unreachable.
    #[error("Sequence source unavailable: {context}")]
    SourceUnavailable { context: String },

    /// The shared pool/lock store is unreachable.
    #[error("Identifier pool unavailable: {context}")]
    PoolUnavailable { context: String },

    /// The message broker rejected a publish or the consumer failed.
    #[error("Broker unavailable: {context}")]
    BrokerUnavailable { context: String },

    /// The content store or cache is unreachable.
    #[error("Content store unavailable: {context}")]
    StoreUnavailable { context: String },

    /// A deletion job that can never succeed (bad JSON, missing identifier).
    #[error("Malformed deletion job: {reason}")]
    MalformedJob { reason: String },

    /// Deleting expired content failed.
    #[error("Delete of {identifier} failed: {context}")]
    DeleteFailed { identifier: String, context: String },

    /// The sequence value exceeds what the identifier encoding can represent.
    #[error("Sequence value {value} exceeds identifier space (max = {max})")]
    IdentifierSpaceExhausted { value: u64, max: u64 },

    /// A string failed identifier validation.
    #[error("Invalid identifier: {reason}")]
    InvalidIdentifier { reason: String },

    /// A post was refused before anything was stored.
    #[error("Invalid post: {reason}")]
    InvalidPost { reason: String },
}

impl Error {
    pub(crate) fn source_unavailable(err: impl core::fmt::Display) -> Self {
        Self::SourceUnavailable {
            context: err.to_string(),
        }
    }

    pub(crate) fn pool_unavailable(err: impl core::fmt::Display) -> Self {
        Self::PoolUnavailable {
            context: err.to_string(),
        }
    }

    pub(crate) fn broker_unavailable(err: impl core::fmt::Display) -> Self {
        Self::BrokerUnavailable {
            context: err.to_string(),
        }
    }

    pub(crate) fn store_unavailable(err: impl core::fmt::Display) -> Self {
        Self::StoreUnavailable {
            context: err.to_string(),
        }
    }

    /// Returns `true` for failures of a remote dependency that may succeed
    /// when attempted again.
    ///
    /// This is the default predicate used by [`crate::RetryPolicy`].
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::SourceUnavailable { .. }
                | Self::PoolUnavailable { .. }
                | Self::BrokerUnavailable { .. }
                | Self::StoreUnavailable { .. }
                | Self::DeleteFailed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_failures_are_transient() {
        assert!(Error::source_unavailable("down").is_transient());
        assert!(Error::pool_unavailable("down").is_transient());
        assert!(Error::broker_unavailable("down").is_transient());
        assert!(Error::store_unavailable("down").is_transient());
    }

    #[test]
    fn permanent_failures_are_not_transient() {
        assert!(
            !Error::MalformedJob {
                reason: "missing hash".into()
            }
            .is_transient()
        );
        assert!(!Error::IdentifierSpaceExhausted { value: 1, max: 0 }.is_transient());
        assert!(
            !Error::InvalidIdentifier {
                reason: "too short".into()
            }
            .is_transient()
        );
    }
}
