//! Credential issuer: one soulbound credential per subject.
//!
//! A credential is minted on a subject's first score write and never minted
//! twice: `ensure` is a get-or-create keyed by subject, with token IDs
//! assigned from a monotonically increasing counter (0 is the "none minted"
//! sentinel). Ownership is fixed forever at mint: every transfer attempt
//! fails with `Soulbound` and no code path can succeed.
//!
//! The credential carries a denormalized copy of the current score and tier
//! for fast reads; `regenerate` refreshes it synchronously as part of every
//! score write, so a stale credential is never observable. Crossing a tier
//! boundary is reported distinctly from an in-tier score change.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::identity::AgentId;
use crate::tier::Tier;

/// Token ID sentinel meaning "no credential minted".
pub const NO_TOKEN: u64 = 0;

/// A non-transferable credential reflecting a subject's current tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Counter-assigned token identifier, never 0.
    pub token_id: u64,
    /// Owning subject. Fixed forever at mint.
    pub subject: AgentId,
    /// Denormalized copy of the current score.
    pub score: u16,
    /// Tier derived from the current score.
    pub tier: Tier,
    /// Unix seconds of the mint.
    pub first_minted: u64,
    /// Unix seconds of the most recent regeneration.
    pub last_updated: u64,
    /// Number of regenerations since mint (1 after the mint itself).
    pub total_updates: u64,
}

/// Result of a credential regeneration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Regenerated {
    /// The subject's token ID.
    pub token_id: u64,
    /// True when this regeneration minted the credential.
    pub minted: bool,
    /// `(old, new)` when the tier band changed, `None` for an in-tier
    /// score change.
    pub tier_change: Option<(Tier, Tier)>,
}

/// Owned map of all minted credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialBook {
    by_token: BTreeMap<u64, Credential>,
    token_of: BTreeMap<AgentId, u64>,
    next_token_id: u64,
}

impl Default for CredentialBook {
    fn default() -> Self {
        Self {
            by_token: BTreeMap::new(),
            token_of: BTreeMap::new(),
            next_token_id: 1,
        }
    }
}

impl CredentialBook {
    /// Creates an empty book.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the token ID for `subject`, or [`NO_TOKEN`] if none minted.
    #[must_use]
    pub fn token_id_of(&self, subject: &AgentId) -> u64 {
        self.token_of.get(subject).copied().unwrap_or(NO_TOKEN)
    }

    /// Returns the credential for `token_id`, if minted.
    #[must_use]
    pub fn get(&self, token_id: u64) -> Option<&Credential> {
        self.by_token.get(&token_id)
    }

    /// Number of credentials minted.
    #[must_use]
    pub fn minted_count(&self) -> usize {
        self.by_token.len()
    }

    /// Get-or-create the credential for `subject`, returning its token ID.
    ///
    /// Idempotent: repeat calls return the same token ID and mint nothing.
    pub fn ensure(&mut self, subject: &AgentId, score: u16, now: u64) -> u64 {
        if let Some(&token_id) = self.token_of.get(subject) {
            return token_id;
        }

        let token_id = self.next_token_id;
        self.next_token_id += 1;

        let credential = Credential {
            token_id,
            subject: subject.clone(),
            score,
            tier: Tier::for_score(score),
            first_minted: now,
            last_updated: now,
            total_updates: 0,
        };
        self.by_token.insert(token_id, credential);
        self.token_of.insert(subject.clone(), token_id);
        tracing::debug!(subject = %subject, token_id, "credential minted");
        token_id
    }

    /// Refreshes the denormalized score/tier after a score write.
    ///
    /// Mints the credential if the subject has none. Reports a tier change
    /// distinctly from an in-tier update.
    pub fn regenerate(&mut self, subject: &AgentId, score: u16, now: u64) -> Regenerated {
        let minted = !self.token_of.contains_key(subject);
        let token_id = self.ensure(subject, score, now);

        // ensure() just inserted or confirmed the entry.
        let credential = self
            .by_token
            .get_mut(&token_id)
            .expect("credential exists for token id returned by ensure");

        let old_tier = credential.tier;
        let new_tier = Tier::for_score(score);

        credential.score = score;
        credential.tier = new_tier;
        credential.last_updated = now;
        credential.total_updates += 1;

        Regenerated {
            token_id,
            minted,
            tier_change: (!minted && old_tier != new_tier).then_some((old_tier, new_tier)),
        }
    }

    /// Attempts a credential transfer.
    ///
    /// # Errors
    ///
    /// Always fails with [`EngineError::Soulbound`], regardless of caller.
    /// This is a hard invariant of the credential, not a permission check.
    pub fn transfer(
        &self,
        _from: &AgentId,
        _to: &AgentId,
        token_id: u64,
    ) -> Result<(), EngineError> {
        Err(EngineError::Soulbound { token_id })
    }
}

/// Deterministic, renderable credential metadata.
///
/// Serialized with a fixed field order so identical inputs always produce
/// byte-identical output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialMetadata {
    /// Display name of the credential.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Inline SVG badge.
    pub image: String,
    /// Trait list for external indexers.
    pub attributes: Vec<MetadataAttribute>,
}

/// One trait entry in the metadata document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataAttribute {
    /// Trait name.
    pub trait_type: String,
    /// Trait value, stringified.
    pub value: String,
}

/// Builds the metadata document for a credential.
///
/// Pure function of `(subject, score, tier, version)`: same inputs always
/// yield the same bytes once serialized with [`render_metadata`].
#[must_use]
pub fn build_metadata(subject: &AgentId, score: u16, tier: Tier, version: u64) -> CredentialMetadata {
    CredentialMetadata {
        name: format!("Reputation Credential - {subject}"),
        description: format!(
            "Soulbound reputation credential. Score {score}/1000, {tier} tier, record version {version}."
        ),
        image: render_badge_svg(subject, score, tier),
        attributes: vec![
            MetadataAttribute {
                trait_type: "Score".to_string(),
                value: score.to_string(),
            },
            MetadataAttribute {
                trait_type: "Tier".to_string(),
                value: tier.as_str().to_string(),
            },
            MetadataAttribute {
                trait_type: "Version".to_string(),
                value: version.to_string(),
            },
        ],
    }
}

/// Serializes credential metadata to its canonical JSON form.
///
/// # Errors
///
/// Serialization of this fixed shape cannot realistically fail; the result
/// is still propagated rather than unwrapped.
pub fn render_metadata(metadata: &CredentialMetadata) -> Result<String, serde_json::Error> {
    serde_json::to_string(metadata)
}

/// Renders the badge as a self-contained SVG document.
fn render_badge_svg(subject: &AgentId, score: u16, tier: Tier) -> String {
    let color = tier.color();
    format!(
        concat!(
            r##"<svg xmlns="http://www.w3.org/2000/svg" width="350" height="350" viewBox="0 0 350 350">"##,
            r##"<rect width="350" height="350" rx="24" fill="#0f172a"/>"##,
            r##"<circle cx="175" cy="140" r="80" fill="none" stroke="{color}" stroke-width="10"/>"##,
            r##"<text x="175" y="150" font-family="monospace" font-size="44" fill="{color}" text-anchor="middle">{score}</text>"##,
            r##"<text x="175" y="250" font-family="monospace" font-size="28" fill="{color}" text-anchor="middle">{tier}</text>"##,
            r##"<text x="175" y="320" font-family="monospace" font-size="12" fill="#64748b" text-anchor="middle">{subject}</text>"##,
            r##"</svg>"##
        ),
        color = color,
        score = score,
        tier = tier.as_str(),
        subject = subject,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subject() -> AgentId {
        AgentId::from("wallet-1")
    }

    #[test]
    fn ensure_is_idempotent() {
        let mut book = CredentialBook::new();
        let first = book.ensure(&subject(), 500, 100);
        let second = book.ensure(&subject(), 999, 200);
        assert_eq!(first, second);
        assert_eq!(first, 1);
        assert_eq!(book.minted_count(), 1);

        // The repeat call changed nothing.
        let credential = book.get(first).unwrap();
        assert_eq!(credential.score, 500);
        assert_eq!(credential.first_minted, 100);
    }

    #[test]
    fn token_ids_increase_monotonically() {
        let mut book = CredentialBook::new();
        let a = book.ensure(&AgentId::from("a"), 100, 1);
        let b = book.ensure(&AgentId::from("b"), 100, 2);
        let c = book.ensure(&AgentId::from("c"), 100, 3);
        assert_eq!((a, b, c), (1, 2, 3));
    }

    #[test]
    fn unknown_subject_has_sentinel_token() {
        let book = CredentialBook::new();
        assert_eq!(book.token_id_of(&subject()), NO_TOKEN);
        assert!(book.get(NO_TOKEN).is_none());
    }

    #[test]
    fn regenerate_mints_then_tracks_updates() {
        let mut book = CredentialBook::new();

        let first = book.regenerate(&subject(), 750, 100);
        assert!(first.minted);
        assert_eq!(first.tier_change, None);

        let credential = book.get(first.token_id).unwrap();
        assert_eq!(credential.tier, Tier::Gold);
        assert_eq!(credential.total_updates, 1);
        assert_eq!(credential.first_minted, 100);
    }

    #[test]
    fn tier_change_reported_only_on_boundary_crossing() {
        let mut book = CredentialBook::new();
        book.regenerate(&subject(), 750, 100);

        // In-tier change: 750 -> 760 stays Gold.
        let same = book.regenerate(&subject(), 760, 101);
        assert_eq!(same.tier_change, None);

        // Boundary crossing: Gold -> Platinum.
        let crossed = book.regenerate(&subject(), 875, 102);
        assert_eq!(crossed.tier_change, Some((Tier::Gold, Tier::Platinum)));

        // Downward crossing reports too.
        let dropped = book.regenerate(&subject(), 500, 103);
        assert_eq!(dropped.tier_change, Some((Tier::Platinum, Tier::Bronze)));
    }

    #[test]
    fn transfer_always_fails_soulbound() {
        let mut book = CredentialBook::new();
        let token_id = book.ensure(&subject(), 875, 100);
        let before = book.get(token_id).unwrap().clone();

        // From the owner, to the owner, from anyone: always Soulbound.
        for (from, to) in [
            (subject(), AgentId::from("other")),
            (AgentId::from("other"), subject()),
            (subject(), subject()),
        ] {
            let err = book.transfer(&from, &to, token_id).unwrap_err();
            assert_eq!(err, EngineError::Soulbound { token_id });
        }

        // Ownership unchanged.
        assert_eq!(book.get(token_id).unwrap(), &before);
        assert_eq!(book.token_id_of(&subject()), token_id);
    }

    #[test]
    fn metadata_is_deterministic() {
        let a = build_metadata(&subject(), 950, Tier::Diamond, 3);
        let b = build_metadata(&subject(), 950, Tier::Diamond, 3);
        assert_eq!(
            render_metadata(&a).unwrap(),
            render_metadata(&b).unwrap()
        );
    }

    #[test]
    fn metadata_embeds_score_tier_and_badge() {
        let metadata = build_metadata(&subject(), 950, Tier::Diamond, 1);
        let json = render_metadata(&metadata).unwrap();
        let parsed: CredentialMetadata = serde_json::from_str(&json).unwrap();

        assert!(parsed.image.starts_with("<svg"));
        assert!(parsed.image.contains("Diamond"));
        let score = parsed
            .attributes
            .iter()
            .find(|a| a.trait_type == "Score")
            .unwrap();
        assert_eq!(score.value, "950");
        let tier = parsed
            .attributes
            .iter()
            .find(|a| a.trait_type == "Tier")
            .unwrap();
        assert_eq!(tier.value, "Diamond");
    }
}
