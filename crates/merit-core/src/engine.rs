//! The top-level reputation ledger engine.
//!
//! Owns every registry (roles, pending requests, reputation records,
//! credentials) as plain maps behind engine methods, with no ambient global
//! state. All mutation goes through operations that enforce invariants
//! atomically: an operation either fully applies, returning its complete
//! event list, or returns an error with state untouched. Credential
//! regeneration happens synchronously inside every score write, so a score
//! without a matching credential is never observable.
//!
//! Timestamps and caller identity arrive through a per-call [`CallContext`];
//! the engine itself never consults a clock, which keeps it deterministic
//! and directly testable.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::audit::{AuditEmitter, AuditSink, JsonlSink};
use crate::credential::{build_metadata, render_metadata, Credential, CredentialBook};
use crate::error::EngineError;
use crate::events::EngineEvent;
use crate::identity::{AgentId, AgentRole, RegisterOutcome, RoleRegistry};
use crate::request::{PendingRequest, RequestTracker};
use crate::score::{Fingerprint, ReputationRecord, ScoreLedger, MAX_BATCH};

/// Schema identifier embedded in engine snapshots.
pub const SNAPSHOT_SCHEMA_ID: &str = "merit.engine.v1";

/// Caller identity and wall-clock time for one operation.
///
/// Supplied by the caller per call; the engine performs no clock reads of
/// its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallContext {
    /// The identity performing the call.
    pub caller: AgentId,
    /// Unix seconds at submission time.
    pub now: u64,
}

impl CallContext {
    /// Creates a context.
    #[must_use]
    pub fn new(caller: AgentId, now: u64) -> Self {
        Self { caller, now }
    }
}

/// Result of a successful single score write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreUpdate {
    /// The record after the write.
    pub record: ReputationRecord,
    /// The subject's credential token ID.
    pub token_id: u64,
    /// The pending request this write closed, if one was open.
    pub completed_request: Option<PendingRequest>,
    /// Every event the write produced, in emission order.
    pub events: Vec<EngineEvent>,
}

/// Result of a successful atomic batch update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchUpdate {
    /// Number of entries applied.
    pub count: usize,
    /// Every event the batch produced, in emission order.
    pub events: Vec<EngineEvent>,
}

/// Engine-wide counters for operators and dashboards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    /// Identities holding at least one role.
    pub agents: usize,
    /// Subjects with at least one written record.
    pub subjects_scored: usize,
    /// Credentials minted.
    pub credentials_minted: usize,
    /// Currently open pending requests.
    pub open_requests: usize,
}

/// Serializable snapshot of all durable engine state.
///
/// The audit sink is restored by destination (file-backed sinks record
/// their path; in-memory sinks are not durable).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    /// Schema identifier, always [`SNAPSHOT_SCHEMA_ID`].
    pub schema_id: String,
    /// Role bindings.
    pub registry: RoleRegistry,
    /// Open pending requests.
    pub tracker: RequestTracker,
    /// Reputation records.
    pub ledger: ScoreLedger,
    /// Minted credentials and the token counter.
    pub credentials: CredentialBook,
    /// One-time external token binding, if configured.
    pub token_binding: Option<String>,
    /// Audit log destination, if a restorable sink is configured.
    pub audit_destination: Option<String>,
}

/// The reputation ledger engine. See the crate docs for the full model.
#[derive(Debug)]
pub struct Engine {
    registry: RoleRegistry,
    tracker: RequestTracker,
    ledger: ScoreLedger,
    credentials: CredentialBook,
    audit: AuditEmitter,
    token_binding: Option<String>,
}

impl Engine {
    /// Creates an engine with `orchestrator` as the fixed bootstrap
    /// Orchestrator.
    #[must_use]
    pub fn new(orchestrator: AgentId) -> Self {
        Self {
            registry: RoleRegistry::bootstrap(orchestrator),
            tracker: RequestTracker::new(),
            ledger: ScoreLedger::new(),
            credentials: CredentialBook::new(),
            audit: AuditEmitter::new(),
            token_binding: None,
        }
    }

    // -----------------------------------------------------------------------
    // Identity & role registry
    // -----------------------------------------------------------------------

    /// Grants `role` to `identity`. Caller must hold Orchestrator.
    ///
    /// Idempotent when the role is already held (no event is emitted).
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Unauthorized`] if the caller is not an
    /// Orchestrator.
    pub fn register_agent(
        &mut self,
        ctx: &CallContext,
        identity: AgentId,
        role: AgentRole,
    ) -> Result<Vec<EngineEvent>, EngineError> {
        let outcome = self
            .registry
            .register(&ctx.caller, identity.clone(), role)?;

        let events = match outcome {
            RegisterOutcome::Granted { first_role: true } => vec![
                EngineEvent::AgentRegistered {
                    identity: identity.clone(),
                    role,
                },
                EngineEvent::RoleGranted { identity, role },
            ],
            RegisterOutcome::Granted { first_role: false } => {
                vec![EngineEvent::RoleGranted { identity, role }]
            }
            RegisterOutcome::AlreadyHeld => Vec::new(),
        };
        self.audit.emit_all(&events, ctx.now);
        Ok(events)
    }

    /// Revokes `role` from `identity`. Caller must hold Orchestrator.
    ///
    /// Open pending state is untouched: revocation is advisory for future
    /// calls only.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Unauthorized`] if the caller is not an
    /// Orchestrator.
    pub fn revoke_agent_role(
        &mut self,
        ctx: &CallContext,
        identity: &AgentId,
        role: AgentRole,
    ) -> Result<Vec<EngineEvent>, EngineError> {
        let removed = self.registry.revoke(&ctx.caller, identity, role)?;
        let events = if removed {
            vec![EngineEvent::RoleRevoked {
                identity: identity.clone(),
                role,
            }]
        } else {
            Vec::new()
        };
        self.audit.emit_all(&events, ctx.now);
        Ok(events)
    }

    /// Returns true if `identity` holds `role`. Read-only, never fails.
    #[must_use]
    pub fn has_role(&self, identity: &AgentId, role: AgentRole) -> bool {
        self.registry.has_role(identity, role)
    }

    // -----------------------------------------------------------------------
    // Request lifecycle
    // -----------------------------------------------------------------------

    /// Opens a self-service pending request for `subject`. No role required.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::AlreadyPending`] if the subject already has an
    /// open, incomplete request.
    pub fn request_score_update(
        &mut self,
        ctx: &CallContext,
        subject: AgentId,
    ) -> Result<Vec<EngineEvent>, EngineError> {
        let request = self
            .tracker
            .open(subject, ctx.caller.clone(), ctx.now, None)?;
        let events = vec![EngineEvent::RequestOpened {
            request_id: request.request_id.clone(),
            subject: request.subject.clone(),
            requester: request.requester.clone(),
            cap: None,
        }];
        self.audit.emit_all(&events, ctx.now);
        Ok(events)
    }

    /// Opens an unpaid pending request for `subject` with a payment cap.
    /// Phase 1 of the settlement protocol; caller must hold Marketplace.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Unauthorized`] without the Marketplace role,
    /// or [`EngineError::AlreadyPending`] under the single-slot rule.
    pub fn request_via_settlement(
        &mut self,
        ctx: &CallContext,
        subject: AgentId,
        cap: u64,
    ) -> Result<Vec<EngineEvent>, EngineError> {
        self.registry.require(&ctx.caller, AgentRole::Marketplace)?;

        let request = self
            .tracker
            .open(subject, ctx.caller.clone(), ctx.now, Some(cap))?;
        let events = vec![EngineEvent::RequestOpened {
            request_id: request.request_id.clone(),
            subject: request.subject.clone(),
            requester: request.requester.clone(),
            cap: Some(cap),
        }];
        self.audit.emit_all(&events, ctx.now);
        Ok(events)
    }

    /// Confirms payment against an open request. Phase 2 of the settlement
    /// protocol; caller must hold Marketplace or Settlement.
    ///
    /// Marks the request paid; the request stays open until a score write
    /// closes it. Payment is never a precondition for scoring: it is a
    /// settlement concern between the requester and the analyzer, not a
    /// ledger-level gate.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Unauthorized`] without either role,
    /// [`EngineError::NoSuchRequest`] for an unmatched ID, or
    /// [`EngineError::CapExceeded`] if `amount` exceeds the recorded cap.
    pub fn confirm_payment(
        &mut self,
        ctx: &CallContext,
        request_id: &str,
        invoice_id: String,
        amount: u64,
    ) -> Result<Vec<EngineEvent>, EngineError> {
        if !self.registry.has_role(&ctx.caller, AgentRole::Marketplace)
            && !self.registry.has_role(&ctx.caller, AgentRole::Settlement)
        {
            return Err(EngineError::Unauthorized {
                caller: ctx.caller.clone(),
                required: AgentRole::Settlement,
            });
        }

        let request = self
            .tracker
            .confirm_payment(request_id, invoice_id.clone(), amount, ctx.now)?;
        let events = vec![EngineEvent::PaymentConfirmed {
            request_id: request.request_id.clone(),
            invoice_id,
            amount,
        }];
        self.audit.emit_all(&events, ctx.now);
        Ok(events)
    }

    /// Returns the open pending request for `subject`, if any.
    #[must_use]
    pub fn pending_request(&self, subject: &AgentId) -> Option<&PendingRequest> {
        self.tracker.get(subject)
    }

    // -----------------------------------------------------------------------
    // Score ledger
    // -----------------------------------------------------------------------

    /// Writes one score. Caller must hold Analyzer.
    ///
    /// Closes the subject's open pending request if one exists (a write
    /// without one is an out-of-band update, permitted), regenerates the
    /// credential synchronously, and returns every event produced. The
    /// stored score is the literal value passed; `adjustment` is recorded
    /// as a diagnostic only.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Unauthorized`] without the Analyzer role, or
    /// [`EngineError::InvalidScore`] for a score above the maximum. On
    /// error, no state changes.
    pub fn update_score(
        &mut self,
        ctx: &CallContext,
        subject: AgentId,
        score: u16,
        fingerprint: Fingerprint,
        adjustment: i64,
    ) -> Result<ScoreUpdate, EngineError> {
        self.registry.require(&ctx.caller, AgentRole::Analyzer)?;

        let (events, completed_request, token_id) =
            self.apply_update(ctx, &subject, score, fingerprint, adjustment)?;
        self.audit.emit_all(&events, ctx.now);

        Ok(ScoreUpdate {
            record: self.ledger.get_or_default(&subject),
            token_id,
            completed_request,
            events,
        })
    }

    /// Applies a batch of score writes atomically. Caller must hold
    /// Analyzer.
    ///
    /// The three arrays are parallel: entry `i` is
    /// `(subjects[i], scores[i], fingerprints[i])` with adjustment 0.
    /// Every entry is validated before any is applied, so a failed batch
    /// changes no state and no observer ever sees a partially-applied
    /// batch.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Unauthorized`] without the Analyzer role,
    /// [`EngineError::BatchLengthMismatch`] if the arrays disagree,
    /// [`EngineError::BatchTooLarge`] above the entry cap,
    /// [`EngineError::InvalidScore`] if any entry is out of range, or
    /// [`EngineError::DuplicateBatchSubject`] if a subject repeats.
    pub fn batch_update_scores(
        &mut self,
        ctx: &CallContext,
        subjects: &[AgentId],
        scores: &[u16],
        fingerprints: &[Fingerprint],
    ) -> Result<BatchUpdate, EngineError> {
        self.registry.require(&ctx.caller, AgentRole::Analyzer)?;

        if subjects.len() != scores.len() || subjects.len() != fingerprints.len() {
            return Err(EngineError::BatchLengthMismatch {
                subjects: subjects.len(),
                scores: scores.len(),
                fingerprints: fingerprints.len(),
            });
        }
        if subjects.len() > MAX_BATCH {
            return Err(EngineError::BatchTooLarge {
                len: subjects.len(),
                max: MAX_BATCH,
            });
        }

        // Validate everything up front: all-or-nothing.
        let mut seen = BTreeSet::new();
        for (subject, &score) in subjects.iter().zip(scores) {
            ScoreLedger::validate_score(score)?;
            if !seen.insert(subject) {
                return Err(EngineError::DuplicateBatchSubject {
                    subject: subject.clone(),
                });
            }
        }

        let mut events = Vec::new();
        for ((subject, &score), &fingerprint) in
            subjects.iter().zip(scores).zip(fingerprints)
        {
            let (entry_events, _, _) =
                self.apply_update(ctx, subject, score, fingerprint, 0)?;
            events.extend(entry_events);
        }
        events.push(EngineEvent::BatchUpdated {
            count: subjects.len(),
            author: ctx.caller.clone(),
        });
        self.audit.emit_all(&events, ctx.now);

        Ok(BatchUpdate {
            count: subjects.len(),
            events,
        })
    }

    /// One score write plus its synchronous side effects: pending-request
    /// completion and credential regeneration. Events are returned, not yet
    /// audited, so batch entries can be relayed together.
    fn apply_update(
        &mut self,
        ctx: &CallContext,
        subject: &AgentId,
        score: u16,
        fingerprint: Fingerprint,
        adjustment: i64,
    ) -> Result<(Vec<EngineEvent>, Option<PendingRequest>, u64), EngineError> {
        let applied = self
            .ledger
            .apply(subject, score, fingerprint, adjustment, &ctx.caller, ctx.now)?;

        // Everything past validation is infallible, preserving atomicity.
        let completed_request = self.tracker.complete(subject);
        let regenerated = self.credentials.regenerate(subject, score, ctx.now);

        let mut events = vec![EngineEvent::ScoreUpdated {
            subject: subject.clone(),
            score,
            version: applied.version,
            author: ctx.caller.clone(),
        }];
        if regenerated.minted {
            events.push(EngineEvent::CredentialMinted {
                subject: subject.clone(),
                token_id: regenerated.token_id,
            });
        }
        if let Some((old, new)) = regenerated.tier_change {
            events.push(EngineEvent::TierChanged {
                subject: subject.clone(),
                token_id: regenerated.token_id,
                old,
                new,
            });
        }
        for label in applied.newly_unlocked {
            events.push(EngineEvent::AchievementUnlocked {
                subject: subject.clone(),
                label,
                score,
            });
        }

        Ok((events, completed_request, regenerated.token_id))
    }

    /// Returns the reputation record for `subject`, or the zero/default
    /// record (version 0) if the subject has never been scored.
    #[must_use]
    pub fn get_reputation(&self, subject: &AgentId) -> ReputationRecord {
        self.ledger.get_or_default(subject)
    }

    // -----------------------------------------------------------------------
    // Credentials
    // -----------------------------------------------------------------------

    /// Returns the token ID for `subject`, or [`crate::credential::NO_TOKEN`]
    /// if none minted.
    #[must_use]
    pub fn get_token_id(&self, subject: &AgentId) -> u64 {
        self.credentials.token_id_of(subject)
    }

    /// Returns the credential for `token_id`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnknownToken`] if no credential has that ID.
    pub fn get_credential(&self, token_id: u64) -> Result<&Credential, EngineError> {
        self.credentials
            .get(token_id)
            .ok_or(EngineError::UnknownToken { token_id })
    }

    /// Renders the deterministic metadata document for `token_id`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnknownToken`] if no credential has that ID,
    /// or [`EngineError::MetadataRender`] if the document cannot be
    /// serialized (unreachable for the fixed metadata shape).
    pub fn credential_metadata(&self, token_id: u64) -> Result<String, EngineError> {
        let credential = self.get_credential(token_id)?;
        let version = self
            .ledger
            .get(&credential.subject)
            .map_or(0, |record| record.version);
        let metadata = build_metadata(
            &credential.subject,
            credential.score,
            credential.tier,
            version,
        );
        render_metadata(&metadata).map_err(|_| EngineError::MetadataRender { token_id })
    }

    /// Attempts a credential transfer.
    ///
    /// # Errors
    ///
    /// Always fails with [`EngineError::Soulbound`]; there is no succeeding
    /// code path, regardless of caller.
    pub fn transfer_credential(
        &self,
        ctx: &CallContext,
        to: &AgentId,
        token_id: u64,
    ) -> Result<(), EngineError> {
        self.credentials.transfer(&ctx.caller, to, token_id)
    }

    // -----------------------------------------------------------------------
    // One-time configuration
    // -----------------------------------------------------------------------

    /// Configures the audit log destination. Caller must hold Orchestrator;
    /// set-once.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Unauthorized`] without the Orchestrator role,
    /// or [`EngineError::AlreadyConfigured`] if a destination is already
    /// set.
    pub fn set_audit_sink(
        &mut self,
        ctx: &CallContext,
        sink: Arc<dyn AuditSink>,
    ) -> Result<(), EngineError> {
        self.registry.require(&ctx.caller, AgentRole::Orchestrator)?;
        self.audit.configure(sink)
    }

    /// Records the external token service binding (e.g. a token ID on an
    /// external ledger). Caller must hold Orchestrator; set-once.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Unauthorized`] without the Orchestrator role,
    /// or [`EngineError::AlreadyConfigured`] if already bound.
    pub fn set_external_token_binding(
        &mut self,
        ctx: &CallContext,
        handle: String,
    ) -> Result<(), EngineError> {
        self.registry.require(&ctx.caller, AgentRole::Orchestrator)?;
        if self.token_binding.is_some() {
            return Err(EngineError::AlreadyConfigured {
                what: "external token binding",
            });
        }
        self.token_binding = Some(handle);
        Ok(())
    }

    /// The configured external token binding, if any.
    #[must_use]
    pub fn external_token_binding(&self) -> Option<&str> {
        self.token_binding.as_deref()
    }

    // -----------------------------------------------------------------------
    // Introspection & persistence
    // -----------------------------------------------------------------------

    /// Engine-wide counters.
    #[must_use]
    pub fn statistics(&self) -> EngineStats {
        EngineStats {
            agents: self.registry.agent_count(),
            subjects_scored: self.ledger.subject_count(),
            credentials_minted: self.credentials.minted_count(),
            open_requests: self.tracker.open_count(),
        }
    }

    /// Captures all durable state.
    #[must_use]
    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            schema_id: SNAPSHOT_SCHEMA_ID.to_string(),
            registry: self.registry.clone(),
            tracker: self.tracker.clone(),
            ledger: self.ledger.clone(),
            credentials: self.credentials.clone(),
            token_binding: self.token_binding.clone(),
            audit_destination: self.audit.destination().map(str::to_string),
        }
    }

    /// Restores an engine from a snapshot.
    ///
    /// A recorded audit destination is reattached as a [`JsonlSink`];
    /// otherwise the emitter starts unconfigured.
    #[must_use]
    pub fn restore(snapshot: EngineSnapshot) -> Self {
        let mut audit = AuditEmitter::new();
        if let Some(destination) = &snapshot.audit_destination {
            // A fresh emitter cannot already be configured.
            let _ = audit.configure(Arc::new(JsonlSink::new(destination)));
        }
        Self {
            registry: snapshot.registry,
            tracker: snapshot.tracker,
            ledger: snapshot.ledger,
            credentials: snapshot.credentials,
            audit,
            token_binding: snapshot.token_binding,
        }
    }
}
