//! Plan tiers and the static limits attached to each of them.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};

/// A named service level controlling request volume and item-count ceilings.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Deserialize,
    Serialize,
    PartialEq,
    Eq,
    Hash,
    AsRefStr,
    Display,
    EnumIter,
    EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PlanTier {
    #[default]
    Free,
    Pro,
    Team,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TierLimits {
    pub max_items_per_request: usize,
    /// `None` means unbounded.
    pub max_requests_per_day: Option<u32>,
}

impl PlanTier {
    pub const fn limits(self) -> TierLimits {
        match self {
            PlanTier::Free => TierLimits {
                max_items_per_request: 5,
                max_requests_per_day: Some(3),
            },
            PlanTier::Pro => TierLimits {
                max_items_per_request: 25,
                max_requests_per_day: None,
            },
            PlanTier::Team => TierLimits {
                max_items_per_request: 50,
                max_requests_per_day: None,
            },
        }
    }

    pub const fn max_items(self) -> usize {
        self.limits().max_items_per_request
    }

    pub fn is_free(self) -> bool {
        self == PlanTier::Free
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn test_tier_limits() {
        assert_eq!(PlanTier::Free.max_items(), 5);
        assert_eq!(PlanTier::Free.limits().max_requests_per_day, Some(3));
        assert_eq!(PlanTier::Pro.max_items(), 25);
        assert_eq!(PlanTier::Pro.limits().max_requests_per_day, None);
        assert_eq!(PlanTier::Team.max_items(), 50);
        assert_eq!(PlanTier::Team.limits().max_requests_per_day, None);
    }

    #[test]
    fn test_tier_names_round_trip_through_strum_and_serde() {
        for tier in PlanTier::iter() {
            let name = tier.to_string();
            assert_eq!(PlanTier::from_str(&name), Ok(tier));
            assert_eq!(
                serde_json::to_value(tier).unwrap_or_default(),
                serde_json::Value::String(name)
            );
        }
        assert!(PlanTier::from_str("enterprise").is_err());
        assert_eq!(PlanTier::default(), PlanTier::Free);
    }
}
