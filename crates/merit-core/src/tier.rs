//! Score tiers.
//!
//! A tier is derived from the numeric score by a pure function over fixed
//! thresholds; it is never stored as independent state. Crossing a band
//! boundary on update is a distinguishable event from an in-tier change
//! (see the credential issuer).

use std::fmt;

use serde::{Deserialize, Serialize};

/// Named score bands, lowest to highest.
///
/// The derived `Ord` follows declaration order, so tier comparison matches
/// score comparison.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Below 400.
    Developing,
    /// 400 and above.
    Bronze,
    /// 600 and above.
    Silver,
    /// 700 and above.
    Gold,
    /// 800 and above.
    Platinum,
    /// 900 and above.
    Diamond,
}

impl Tier {
    /// Derives the tier for a score. Pure and monotone non-decreasing.
    #[must_use]
    pub const fn for_score(score: u16) -> Self {
        match score {
            900.. => Self::Diamond,
            800.. => Self::Platinum,
            700.. => Self::Gold,
            600.. => Self::Silver,
            400.. => Self::Bronze,
            _ => Self::Developing,
        }
    }

    /// Returns the display name of the tier.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Developing => "Developing",
            Self::Bronze => "Bronze",
            Self::Silver => "Silver",
            Self::Gold => "Gold",
            Self::Platinum => "Platinum",
            Self::Diamond => "Diamond",
        }
    }

    /// Accent color used when rendering the credential badge.
    #[must_use]
    pub const fn color(self) -> &'static str {
        match self {
            Self::Developing => "#6b7280",
            Self::Bronze => "#fb923c",
            Self::Silver => "#d1d5db",
            Self::Gold => "#facc15",
            Self::Platinum => "#cbd5e1",
            Self::Diamond => "#22d3ee",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn band_boundaries() {
        assert_eq!(Tier::for_score(0), Tier::Developing);
        assert_eq!(Tier::for_score(399), Tier::Developing);
        assert_eq!(Tier::for_score(400), Tier::Bronze);
        assert_eq!(Tier::for_score(599), Tier::Bronze);
        assert_eq!(Tier::for_score(600), Tier::Silver);
        assert_eq!(Tier::for_score(699), Tier::Silver);
        assert_eq!(Tier::for_score(700), Tier::Gold);
        assert_eq!(Tier::for_score(799), Tier::Gold);
        assert_eq!(Tier::for_score(800), Tier::Platinum);
        assert_eq!(Tier::for_score(899), Tier::Platinum);
        assert_eq!(Tier::for_score(900), Tier::Diamond);
        assert_eq!(Tier::for_score(1000), Tier::Diamond);
    }

    proptest! {
        #[test]
        fn tier_is_monotone_in_score(a in 0u16..=1000, b in 0u16..=1000) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(Tier::for_score(lo) <= Tier::for_score(hi));
        }
    }
}
