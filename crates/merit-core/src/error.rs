//! Engine error taxonomy.
//!
//! Every mutating operation either fully applies or returns one of these
//! errors with state untouched, so no error implies a partial result and no
//! cross-call rollback exists. Retries are the caller's responsibility; the
//! engine never retries internally.

use thiserror::Error;

use crate::identity::{AgentId, AgentRole};

/// Errors returned by engine operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum EngineError {
    /// The caller does not hold the role required for this operation.
    ///
    /// Always fatal to the call; surfaced verbatim to the caller.
    #[error("unauthorized: {caller} does not hold required role {required}")]
    Unauthorized {
        /// The caller identity that was rejected.
        caller: AgentId,
        /// The role the operation requires.
        required: AgentRole,
    },

    /// The subject already has an open, incomplete pending request.
    ///
    /// Expected and recoverable: the caller should wait for the open request
    /// to be closed by a score write rather than retry immediately.
    #[error("subject {subject} already has an open pending request")]
    AlreadyPending {
        /// The subject with the open request.
        subject: AgentId,
    },

    /// No pending request matches the given request ID.
    #[error("no pending request matches id {request_id}")]
    NoSuchRequest {
        /// The unmatched request ID.
        request_id: String,
    },

    /// A payment confirmation exceeded the cap recorded at request time.
    #[error("payment of {amount} exceeds recorded cap of {cap}")]
    CapExceeded {
        /// The amount the caller attempted to confirm.
        amount: u64,
        /// The cap recorded when the request was opened.
        cap: u64,
    },

    /// The submitted score is outside the valid range.
    #[error("invalid score {score}: maximum is {max}")]
    InvalidScore {
        /// The out-of-range score.
        score: u16,
        /// The inclusive maximum.
        max: u16,
    },

    /// The batch exceeds the fixed per-call entry cap.
    #[error("batch of {len} entries exceeds cap of {max}")]
    BatchTooLarge {
        /// Number of entries submitted.
        len: usize,
        /// The inclusive maximum batch size.
        max: usize,
    },

    /// The parallel batch arrays disagree in length.
    #[error(
        "batch length mismatch: {subjects} subjects, {scores} scores, {fingerprints} fingerprints"
    )]
    BatchLengthMismatch {
        /// Length of the subjects array.
        subjects: usize,
        /// Length of the scores array.
        scores: usize,
        /// Length of the fingerprints array.
        fingerprints: usize,
    },

    /// The same subject appears more than once in a batch.
    ///
    /// Rejected so that per-subject version arithmetic inside a single
    /// atomic batch stays unambiguous.
    #[error("subject {subject} appears more than once in batch")]
    DuplicateBatchSubject {
        /// The repeated subject.
        subject: AgentId,
    },

    /// A credential transfer was attempted.
    ///
    /// Structurally unfixable: credentials are soulbound and no transfer can
    /// ever succeed, regardless of caller.
    #[error("credential {token_id} is soulbound and cannot be transferred")]
    Soulbound {
        /// The token whose transfer was attempted.
        token_id: u64,
    },

    /// A one-time configuration point was already set.
    #[error("{what} is already configured and cannot be changed")]
    AlreadyConfigured {
        /// Which configuration point was violated.
        what: &'static str,
    },

    /// No credential exists with the given token ID.
    #[error("no credential minted with token id {token_id}")]
    UnknownToken {
        /// The unknown token ID.
        token_id: u64,
    },

    /// The credential metadata document could not be serialized.
    #[error("credential metadata for token {token_id} failed to render")]
    MetadataRender {
        /// The token whose metadata failed to render.
        token_id: u64,
    },
}
