use tracing::{info, warn};

use crate::kv::LicenseStore;
use crate::tier::PlanTier;

/// Why a license key resolved to the free tier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum FallbackReason {
    NotFound,
    Inactive,
    Error,
}

/// Outcome of resolving a license key. Lookups never fail: every failure
/// shape collapses into [`Entitlement::Fallback`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Entitlement {
    Anonymous,
    Licensed(PlanTier),
    Fallback(FallbackReason),
}

impl Entitlement {
    pub fn tier(self) -> PlanTier {
        match self {
            Entitlement::Licensed(tier) => tier,
            Entitlement::Anonymous | Entitlement::Fallback(_) => PlanTier::Free,
        }
    }
}

/// `abcd...wxyz`, or `****` for keys of 8 characters or fewer.
pub fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        return "****".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}

pub async fn resolve_entitlement(store: &dyn LicenseStore, license_key: Option<&str>) -> Entitlement {
    let Some(key) = license_key.map(str::trim).filter(|k| !k.is_empty()) else {
        info!("[ENTITLEMENT] key=none tier=free source=default");
        return Entitlement::Anonymous;
    };
    let masked = mask_key(key);
    let source = store.source();

    match store.get_license(key).await {
        Ok(Some(record)) if record.is_active() => {
            info!("[ENTITLEMENT] key={masked} tier={} source={source}", record.plan);
            Entitlement::Licensed(record.plan)
        }
        Ok(Some(_)) => {
            info!("[ENTITLEMENT] key={masked} tier=free source={source} reason=inactive");
            Entitlement::Fallback(FallbackReason::Inactive)
        }
        Ok(None) => {
            info!("[ENTITLEMENT] key={masked} tier=free source={source} reason=not_found");
            Entitlement::Fallback(FallbackReason::NotFound)
        }
        Err(e) => {
            warn!("[ENTITLEMENT] key={masked} tier=free source={source} reason=error: {e}");
            Entitlement::Fallback(FallbackReason::Error)
        }
    }
}

pub async fn resolve_tier(store: &dyn LicenseStore, license_key: Option<&str>) -> PlanTier {
    resolve_entitlement(store, license_key).await.tier()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::{LicenseRecord, LicenseStatus, MemoryStore};
    use crate::testing::FailingStore;
    use tracing_test::traced_test;

    fn store_with(key: &str, plan: PlanTier, status: LicenseStatus) -> MemoryStore {
        let store = MemoryStore::default();
        store.put_license(
            key,
            LicenseRecord {
                customer_id: "cus_test".to_string(),
                plan,
                status,
            },
        );
        store
    }

    #[test]
    fn test_mask_key() {
        assert_eq!(mask_key("short"), "****");
        assert_eq!(mask_key("12345678"), "****");
        assert_eq!(mask_key("rb_live_abcdef123456"), "rb_l...3456");
    }

    #[tokio::test]
    #[traced_test]
    async fn test_no_key_is_free_without_lookup() {
        let store = FailingStore;
        assert_eq!(resolve_entitlement(&store, None).await, Entitlement::Anonymous);
        assert_eq!(resolve_entitlement(&store, Some("   ")).await, Entitlement::Anonymous);
        assert!(logs_contain("key=none tier=free"));
        assert!(!logs_contain("reason=error"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_active_license_resolves_its_plan() {
        let store = store_with("rb_team_0000111122", PlanTier::Team, LicenseStatus::Active);
        let first = resolve_tier(&store, Some("rb_team_0000111122")).await;
        let second = resolve_tier(&store, Some("rb_team_0000111122")).await;
        assert_eq!(first, PlanTier::Team);
        assert_eq!(first, second);
        assert!(logs_contain("key=rb_t...1122 tier=team source=memory"));
        assert!(!logs_contain("rb_team_0000111122"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_inactive_and_missing_fall_back_to_free() {
        let store = store_with("rb_pro_canceled01", PlanTier::Pro, LicenseStatus::Canceled);
        assert_eq!(
            resolve_entitlement(&store, Some("rb_pro_canceled01")).await,
            Entitlement::Fallback(FallbackReason::Inactive)
        );
        assert_eq!(
            resolve_entitlement(&store, Some("rb_unknown_key99")).await,
            Entitlement::Fallback(FallbackReason::NotFound)
        );
        assert!(logs_contain("reason=inactive"));
        assert!(logs_contain("reason=not_found"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_lookup_failure_falls_back_to_free() {
        let entitlement = resolve_entitlement(&FailingStore, Some("rb_live_abcdef123456")).await;
        assert_eq!(entitlement, Entitlement::Fallback(FallbackReason::Error));
        assert_eq!(entitlement.tier(), PlanTier::Free);
        assert!(logs_contain("reason=error"));
    }
}
