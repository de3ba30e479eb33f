//! Events emitted by mutating engine operations.
//!
//! Event emission is an explicit output: every mutating call returns the
//! full list of events it produced, and the engine relays the same list to
//! the audit emitter. There is no hidden observer coupling, so an
//! operation's complete effect set is inspectable in tests.

use serde::{Deserialize, Serialize};

use crate::identity::{AgentId, AgentRole};
use crate::tier::Tier;

/// A state-changing event produced by one engine operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EngineEvent {
    /// An identity was granted its first role.
    AgentRegistered {
        /// The new identity.
        identity: AgentId,
        /// The role granted.
        role: AgentRole,
    },
    /// A role was granted to an already-known identity.
    RoleGranted {
        /// The identity.
        identity: AgentId,
        /// The role granted.
        role: AgentRole,
    },
    /// A role was revoked.
    RoleRevoked {
        /// The identity.
        identity: AgentId,
        /// The role revoked.
        role: AgentRole,
    },
    /// A pending analysis request was opened.
    RequestOpened {
        /// Opaque request handle.
        request_id: String,
        /// The subject to be analyzed.
        subject: AgentId,
        /// Who opened the request.
        requester: AgentId,
        /// Payment cap for settlement-phase requests.
        cap: Option<u64>,
    },
    /// A settlement payment was confirmed against an open request.
    PaymentConfirmed {
        /// The request paid for.
        request_id: String,
        /// Invoice identifier supplied by the settlement caller.
        invoice_id: String,
        /// Amount confirmed.
        amount: u64,
    },
    /// A score write landed.
    ScoreUpdated {
        /// The subject written.
        subject: AgentId,
        /// The new score.
        score: u16,
        /// Record version after the write.
        version: u64,
        /// The analyzer that authored the write.
        author: AgentId,
    },
    /// A batch of score writes landed atomically.
    BatchUpdated {
        /// Number of entries applied.
        count: usize,
        /// The analyzer that authored the batch.
        author: AgentId,
    },
    /// A credential was minted for a subject's first score write.
    CredentialMinted {
        /// The subject.
        subject: AgentId,
        /// The assigned token ID.
        token_id: u64,
    },
    /// A credential crossed a tier boundary.
    TierChanged {
        /// The subject.
        subject: AgentId,
        /// The subject's token ID.
        token_id: u64,
        /// Tier before the write.
        old: Tier,
        /// Tier after the write.
        new: Tier,
    },
    /// A score reached an achievement mark for the first time.
    AchievementUnlocked {
        /// The subject.
        subject: AgentId,
        /// The achievement label.
        label: String,
        /// The score that unlocked it.
        score: u16,
    },
}

impl EngineEvent {
    /// Stable event-kind name, used as the audit record kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::AgentRegistered { .. } => "agent.registered",
            Self::RoleGranted { .. } => "role.granted",
            Self::RoleRevoked { .. } => "role.revoked",
            Self::RequestOpened { .. } => "request.opened",
            Self::PaymentConfirmed { .. } => "payment.confirmed",
            Self::ScoreUpdated { .. } => "score.updated",
            Self::BatchUpdated { .. } => "batch.updated",
            Self::CredentialMinted { .. } => "credential.minted",
            Self::TierChanged { .. } => "tier.changed",
            Self::AchievementUnlocked { .. } => "achievement.unlocked",
        }
    }

    /// The subject the event concerns, if it concerns one.
    #[must_use]
    pub fn subject(&self) -> Option<&AgentId> {
        match self {
            Self::AgentRegistered { identity, .. }
            | Self::RoleGranted { identity, .. }
            | Self::RoleRevoked { identity, .. } => Some(identity),
            Self::RequestOpened { subject, .. }
            | Self::ScoreUpdated { subject, .. }
            | Self::CredentialMinted { subject, .. }
            | Self::TierChanged { subject, .. }
            | Self::AchievementUnlocked { subject, .. } => Some(subject),
            Self::PaymentConfirmed { .. } | Self::BatchUpdated { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_are_stable() {
        let event = EngineEvent::ScoreUpdated {
            subject: AgentId::from("s"),
            score: 875,
            version: 1,
            author: AgentId::from("a"),
        };
        assert_eq!(event.kind(), "score.updated");
        assert_eq!(event.subject(), Some(&AgentId::from("s")));
    }

    #[test]
    fn events_serialize_with_kind_tag() {
        let event = EngineEvent::TierChanged {
            subject: AgentId::from("s"),
            token_id: 1,
            old: Tier::Gold,
            new: Tier::Platinum,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""kind":"tier_changed""#));
        let back: EngineEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
