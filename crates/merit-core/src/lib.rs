//! Reputation ledger engine.
//!
//! A small set of mutually-distrusting automated agents (an orchestrator,
//! analyzers, settlement and marketplace agents) cooperatively compute and
//! publish a bounded reputation score per subject identity. The engine is the
//! authoritative, versioned store for those scores: it gates every privileged
//! operation on a role registry, prevents duplicate pending analysis requests,
//! mints one non-transferable credential per subject whose tier is derived
//! from the current score, and hands a fingerprint of every state-changing
//! event to an external tamper-evident log.
//!
//! The engine never computes reputation itself. Analyzers submit the literal
//! score together with an opaque reasoning fingerprint; the engine records
//! both and enforces the invariants around them:
//!
//! - Record versions increment by exactly 1 per successful write, gaplessly.
//! - At most one live pending request per subject at any time.
//! - Credentials are soulbound: ownership is fixed at mint, every transfer
//!   attempt fails, and there is no code path that can succeed.
//! - A score write and the matching credential regeneration apply together;
//!   a stale credential is never observable.
//!
//! # Concurrency model
//!
//! The engine is a sequential state machine. Every mutating operation runs to
//! completion before the next is observed, and either fully applies (returning
//! its event list) or returns an error leaving state untouched. Callers that
//! need shared access wrap the [`engine::Engine`] in their own lock.
//!
//! # Example
//!
//! ```
//! use merit_core::engine::{CallContext, Engine};
//! use merit_core::identity::{AgentId, AgentRole};
//!
//! let orchestrator = AgentId::from("orchestrator-1");
//! let analyzer = AgentId::from("analyzer-1");
//! let subject = AgentId::from("wallet-0x42");
//!
//! let mut engine = Engine::new(orchestrator.clone());
//! let ctx = CallContext::new(orchestrator, 1_700_000_000);
//! engine
//!     .register_agent(&ctx, analyzer.clone(), AgentRole::Analyzer)
//!     .unwrap();
//!
//! let ctx = CallContext::new(subject.clone(), 1_700_000_001);
//! engine.request_score_update(&ctx, subject.clone()).unwrap();
//!
//! let ctx = CallContext::new(analyzer, 1_700_000_002);
//! let update = engine
//!     .update_score(&ctx, subject.clone(), 875, [0u8; 32], 50)
//!     .unwrap();
//! assert_eq!(update.record.version, 1);
//! assert_eq!(engine.get_reputation(&subject).score, 875);
//! ```

pub mod audit;
pub mod credential;
pub mod engine;
pub mod error;
pub mod events;
pub mod identity;
pub mod request;
pub mod score;
pub mod tier;

pub use audit::{AuditRecord, AuditSink, JsonlSink, MemorySink};
pub use engine::{CallContext, Engine, EngineSnapshot, EngineStats};
pub use error::EngineError;
pub use events::EngineEvent;
pub use identity::{AgentId, AgentRole};
pub use score::{Fingerprint, MAX_BATCH, MAX_SCORE, ReputationRecord};
pub use tier::Tier;
