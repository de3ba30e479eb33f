//! Agent identities and the role registry.
//!
//! Identities are opaque strings (wallet addresses, agent DIDs). An identity
//! holds a *set* of capability roles rather than a single exclusive class;
//! authorization everywhere in the engine is the pure predicate
//! "required role is in the caller's role set".
//!
//! Exactly one Orchestrator is fixed at registry creation. Additional roles
//! (including further Orchestrators) are granted only by an existing
//! Orchestrator-role holder, and revocation is likewise Orchestrator-gated.
//! Revocation never touches other components' state: an open pending request
//! stays open even if its requester loses a role.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// An opaque agent or subject identity.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    /// Returns the identity as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for AgentId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Capability roles an identity can hold.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    /// Bootstrap authority; the only role permitted to grant or revoke roles.
    Orchestrator,
    /// Permitted to write scores. Represents an automated reasoning agent.
    Analyzer,
    /// Third-party settlement agent; may confirm payments.
    Settlement,
    /// Third-party caller that pays for analyses on a subject's behalf.
    Marketplace,
}

impl AgentRole {
    /// Returns the canonical lowercase name of the role.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Orchestrator => "orchestrator",
            Self::Analyzer => "analyzer",
            Self::Settlement => "settlement",
            Self::Marketplace => "marketplace",
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "orchestrator" => Ok(Self::Orchestrator),
            "analyzer" => Ok(Self::Analyzer),
            "settlement" => Ok(Self::Settlement),
            "marketplace" => Ok(Self::Marketplace),
            other => Err(format!("unknown agent role: {other}")),
        }
    }
}

/// Outcome of a role grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// The role was newly granted. `first_role` is true when this is the
    /// identity's first role binding (the identity itself is new).
    Granted {
        /// Whether the identity had no roles before this grant.
        first_role: bool,
    },
    /// The identity already held the role; no-op.
    AlreadyHeld,
}

/// Maps agent identities to the set of roles they hold.
///
/// Owned by the engine; all mutation goes through methods that enforce the
/// Orchestrator gate. No ambient global state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoleRegistry {
    roles: BTreeMap<AgentId, BTreeSet<AgentRole>>,
}

impl RoleRegistry {
    /// Creates a registry with `orchestrator` fixed as the implicit
    /// bootstrap Orchestrator.
    #[must_use]
    pub fn bootstrap(orchestrator: AgentId) -> Self {
        let mut roles = BTreeMap::new();
        roles.insert(orchestrator, BTreeSet::from([AgentRole::Orchestrator]));
        Self { roles }
    }

    /// Returns true if `identity` holds `role`. Read-only, never fails.
    #[must_use]
    pub fn has_role(&self, identity: &AgentId, role: AgentRole) -> bool {
        self.roles
            .get(identity)
            .is_some_and(|set| set.contains(&role))
    }

    /// Requires that `caller` holds `role`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Unauthorized`] if the caller lacks the role.
    pub fn require(&self, caller: &AgentId, role: AgentRole) -> Result<(), EngineError> {
        if self.has_role(caller, role) {
            Ok(())
        } else {
            Err(EngineError::Unauthorized {
                caller: caller.clone(),
                required: role,
            })
        }
    }

    /// Grants `role` to `identity`. Caller must hold Orchestrator.
    ///
    /// Idempotent: granting a role the identity already holds is a no-op and
    /// reports [`RegisterOutcome::AlreadyHeld`].
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Unauthorized`] if the caller is not an
    /// Orchestrator.
    pub fn register(
        &mut self,
        caller: &AgentId,
        identity: AgentId,
        role: AgentRole,
    ) -> Result<RegisterOutcome, EngineError> {
        self.require(caller, AgentRole::Orchestrator)?;

        let first_role = !self.roles.contains_key(&identity);
        let set = self.roles.entry(identity).or_default();
        if set.insert(role) {
            Ok(RegisterOutcome::Granted { first_role })
        } else {
            Ok(RegisterOutcome::AlreadyHeld)
        }
    }

    /// Revokes `role` from `identity`. Caller must hold Orchestrator.
    ///
    /// Returns true if the role was held and removed, false if the identity
    /// did not hold it (no-op). Revocation is advisory with respect to the
    /// rest of the engine: already-open pending state is unaffected.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Unauthorized`] if the caller is not an
    /// Orchestrator.
    pub fn revoke(
        &mut self,
        caller: &AgentId,
        identity: &AgentId,
        role: AgentRole,
    ) -> Result<bool, EngineError> {
        self.require(caller, AgentRole::Orchestrator)?;

        match self.roles.get_mut(identity) {
            Some(set) => {
                let removed = set.remove(&role);
                if set.is_empty() {
                    self.roles.remove(identity);
                }
                Ok(removed)
            }
            None => Ok(false),
        }
    }

    /// Returns the number of identities holding at least one role.
    #[must_use]
    pub fn agent_count(&self) -> usize {
        self.roles.len()
    }

    /// Returns the roles held by `identity`, empty if unknown.
    #[must_use]
    pub fn roles_of(&self, identity: &AgentId) -> BTreeSet<AgentRole> {
        self.roles.get(identity).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orchestrator() -> AgentId {
        AgentId::from("orch")
    }

    #[test]
    fn bootstrap_fixes_single_orchestrator() {
        let registry = RoleRegistry::bootstrap(orchestrator());
        assert!(registry.has_role(&orchestrator(), AgentRole::Orchestrator));
        assert_eq!(registry.agent_count(), 1);
    }

    #[test]
    fn register_requires_orchestrator() {
        let mut registry = RoleRegistry::bootstrap(orchestrator());
        let outsider = AgentId::from("outsider");

        let err = registry
            .register(&outsider, AgentId::from("a"), AgentRole::Analyzer)
            .unwrap_err();
        assert!(matches!(err, EngineError::Unauthorized { .. }));
        assert!(!registry.has_role(&AgentId::from("a"), AgentRole::Analyzer));
    }

    #[test]
    fn register_is_idempotent() {
        let mut registry = RoleRegistry::bootstrap(orchestrator());
        let analyzer = AgentId::from("a");

        let first = registry
            .register(&orchestrator(), analyzer.clone(), AgentRole::Analyzer)
            .unwrap();
        assert_eq!(first, RegisterOutcome::Granted { first_role: true });

        let second = registry
            .register(&orchestrator(), analyzer.clone(), AgentRole::Analyzer)
            .unwrap();
        assert_eq!(second, RegisterOutcome::AlreadyHeld);
        assert!(registry.has_role(&analyzer, AgentRole::Analyzer));
    }

    #[test]
    fn identity_can_hold_multiple_roles() {
        let mut registry = RoleRegistry::bootstrap(orchestrator());
        let agent = AgentId::from("hybrid");

        registry
            .register(&orchestrator(), agent.clone(), AgentRole::Marketplace)
            .unwrap();
        let outcome = registry
            .register(&orchestrator(), agent.clone(), AgentRole::Settlement)
            .unwrap();
        assert_eq!(outcome, RegisterOutcome::Granted { first_role: false });

        assert!(registry.has_role(&agent, AgentRole::Marketplace));
        assert!(registry.has_role(&agent, AgentRole::Settlement));
        assert_eq!(registry.roles_of(&agent).len(), 2);
    }

    #[test]
    fn orchestrators_can_add_orchestrators() {
        let mut registry = RoleRegistry::bootstrap(orchestrator());
        let second = AgentId::from("orch-2");

        registry
            .register(&orchestrator(), second.clone(), AgentRole::Orchestrator)
            .unwrap();
        // The new orchestrator can itself grant roles.
        registry
            .register(&second, AgentId::from("a"), AgentRole::Analyzer)
            .unwrap();
        assert!(registry.has_role(&AgentId::from("a"), AgentRole::Analyzer));
    }

    #[test]
    fn revoke_removes_role_and_is_orchestrator_gated() {
        let mut registry = RoleRegistry::bootstrap(orchestrator());
        let analyzer = AgentId::from("a");
        registry
            .register(&orchestrator(), analyzer.clone(), AgentRole::Analyzer)
            .unwrap();

        let err = registry
            .revoke(&analyzer, &analyzer, AgentRole::Analyzer)
            .unwrap_err();
        assert!(matches!(err, EngineError::Unauthorized { .. }));

        assert!(registry
            .revoke(&orchestrator(), &analyzer, AgentRole::Analyzer)
            .unwrap());
        assert!(!registry.has_role(&analyzer, AgentRole::Analyzer));

        // Revoking again is a no-op.
        assert!(!registry
            .revoke(&orchestrator(), &analyzer, AgentRole::Analyzer)
            .unwrap());
    }

    #[test]
    fn role_round_trips_through_str() {
        for role in [
            AgentRole::Orchestrator,
            AgentRole::Analyzer,
            AgentRole::Settlement,
            AgentRole::Marketplace,
        ] {
            assert_eq!(role.as_str().parse::<AgentRole>().unwrap(), role);
        }
        assert!("auditor".parse::<AgentRole>().is_err());
    }
}
