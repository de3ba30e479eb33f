//! Score ledger: the authoritative, versioned store of reputation records.
//!
//! One record per subject, created lazily on first write and only ever
//! mutated in place afterwards. The record's version increments by exactly 1
//! on every successful write, never decreases, never skips. The score is
//! always the literal value submitted by the analyzer; the signed
//! adjustment is a recorded diagnostic and never feeds back into the score,
//! so there is no drift.
//!
//! Achievement high-water marks unlock at most once per subject, the first
//! time a write lands at or above the mark.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::identity::AgentId;

/// Inclusive maximum score.
pub const MAX_SCORE: u16 = 1000;

/// Inclusive maximum number of entries per batch update, bounding the
/// worst-case cost of a single call.
pub const MAX_BATCH: usize = 50;

/// Opaque content hash from the external reasoning engine. Recorded for
/// later verifiability of how a score was derived, never interpreted here.
pub type Fingerprint = [u8; 32];

/// Achievement marks, highest first. A label unlocks the first time a
/// subject's written score reaches the mark.
pub const ACHIEVEMENT_MARKS: &[(u16, &str)] = &[
    (1000, "Perfect Score"),
    (900, "Elite Reputation"),
    (800, "High Achiever"),
];

/// The versioned reputation record for one subject.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReputationRecord {
    /// Current score in `[0, MAX_SCORE]`.
    pub score: u16,
    /// Unix seconds of the last successful write.
    pub last_updated: u64,
    /// The analyzer that authored the last write.
    pub author: AgentId,
    /// Reasoning fingerprint supplied with the last write.
    pub fingerprint: Fingerprint,
    /// Write counter: 1 after the first write, +1 per write. A default
    /// (never-written) record reports version 0.
    pub version: u64,
    /// Running total of the diagnostic signed adjustments. Never used to
    /// derive the score.
    pub cumulative_adjustment: i64,
    /// Achievement labels unlocked so far.
    pub achievements: BTreeSet<String>,
}

/// Result of applying a single score write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateApplied {
    /// Version after the write (1 for a record's first write).
    pub version: u64,
    /// Score before the write, `None` for a first write.
    pub previous_score: Option<u16>,
    /// Achievement labels newly unlocked by this write, highest mark first.
    pub newly_unlocked: Vec<String>,
}

/// Owned map from subject to reputation record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreLedger {
    records: BTreeMap<AgentId, ReputationRecord>,
}

impl ScoreLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates a score without mutating anything.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidScore`] if `score > MAX_SCORE`.
    pub fn validate_score(score: u16) -> Result<(), EngineError> {
        if score > MAX_SCORE {
            return Err(EngineError::InvalidScore {
                score,
                max: MAX_SCORE,
            });
        }
        Ok(())
    }

    /// Applies one score write for `subject`.
    ///
    /// Creates the record on first write, otherwise bumps the version by
    /// exactly 1. The stored score is the literal `score` argument.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidScore`] if `score > MAX_SCORE`; the
    /// ledger is untouched in that case.
    pub fn apply(
        &mut self,
        subject: &AgentId,
        score: u16,
        fingerprint: Fingerprint,
        adjustment: i64,
        author: &AgentId,
        now: u64,
    ) -> Result<UpdateApplied, EngineError> {
        Self::validate_score(score)?;

        let record = self.records.entry(subject.clone()).or_default();
        let previous_score = (record.version > 0).then_some(record.score);

        record.score = score;
        record.last_updated = now;
        record.author = author.clone();
        record.fingerprint = fingerprint;
        record.version += 1;
        record.cumulative_adjustment += adjustment;

        let mut newly_unlocked = Vec::new();
        for &(mark, label) in ACHIEVEMENT_MARKS {
            if score >= mark && record.achievements.insert(label.to_string()) {
                newly_unlocked.push(label.to_string());
            }
        }

        tracing::debug!(
            subject = %subject,
            score,
            version = record.version,
            author = %author,
            "score write applied"
        );

        Ok(UpdateApplied {
            version: record.version,
            previous_score,
            newly_unlocked,
        })
    }

    /// Returns the record for `subject`, if one has ever been written.
    #[must_use]
    pub fn get(&self, subject: &AgentId) -> Option<&ReputationRecord> {
        self.records.get(subject)
    }

    /// Returns the record for `subject`, or the zero/default record if the
    /// subject is unknown. Never errors.
    #[must_use]
    pub fn get_or_default(&self, subject: &AgentId) -> ReputationRecord {
        self.records.get(subject).cloned().unwrap_or_default()
    }

    /// Number of subjects with at least one written record.
    #[must_use]
    pub fn subject_count(&self) -> usize {
        self.records.len()
    }
}
