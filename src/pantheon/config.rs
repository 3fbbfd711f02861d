//! Layered configuration for the Pantheon core.
//!
//! A plain struct users can construct by hand, with no TOML/YAML parsing dependency. Resolved in
//! layers — defaults, then values persisted in the Dual-Store, then environment variables, then
//! explicit runtime overrides — each layer only replacing fields the next layer actually sets.

use std::path::PathBuf;
use std::time::Duration;

use crate::pantheon::dual_store::DualStore;
use crate::pantheon::rate_limiter::RateLimitConfig;

/// Environment variable prefix consulted by [`PantheonConfig::apply_env`].
const ENV_PREFIX: &str = "PANTHEON_";

/// Resolved configuration for one process.
#[derive(Debug, Clone)]
pub struct PantheonConfig {
    /// Directory backing the Dual-Store's fallback file.
    pub store_fallback_dir: PathBuf,
    /// Per-conversation record cap enforced by the Dual-Store.
    pub conversation_cap: usize,
    /// Default rate-limit tiers applied to providers with no explicit override.
    pub default_rate_limit: RateLimitConfig,
    /// Wall-clock budget for a single rate-limit acquire before `RateLimited`.
    pub rate_limit_wait: Duration,
    /// Initial Magic energy percentage at process start.
    pub magic_initial_energy: f64,
    /// Initial acorn reserve at process start.
    pub magic_initial_acorns: i64,
}

impl Default for PantheonConfig {
    /// A `pantheon_store` fallback directory, a 100-record conversation cap, 60/1000/10000
    /// rate-limit tiers, a 30s rate-limit wait, and full Magic energy/acorns.
    fn default() -> Self {
        PantheonConfig {
            store_fallback_dir: PathBuf::from("pantheon_store"),
            conversation_cap: crate::pantheon::dual_store::DEFAULT_CONVERSATION_CAP,
            default_rate_limit: RateLimitConfig::default(),
            rate_limit_wait: Duration::from_secs(30),
            magic_initial_energy: 100.0,
            magic_initial_acorns: 5,
        }
    }
}

impl PantheonConfig {
    /// Overlay values persisted under the `config:*` keys in `store` on top of the current
    /// config. Missing keys, or keys that fail to parse, leave the current value untouched.
    pub async fn apply_stored(mut self, store: &DualStore) -> Self {
        if let Ok(Some(raw)) = store.get("config:store_fallback_dir").await {
            self.store_fallback_dir = PathBuf::from(raw);
        }
        if let Ok(Some(raw)) = store.get("config:conversation_cap").await {
            if let Ok(value) = raw.parse() {
                self.conversation_cap = value;
            }
        }
        if let Ok(Some(raw)) = store.get("config:rate_limit_wait_secs").await {
            if let Ok(value) = raw.parse() {
                self.rate_limit_wait = Duration::from_secs(value);
            }
        }
        if let Ok(Some(raw)) = store.get("config:magic_initial_energy").await {
            if let Ok(value) = raw.parse() {
                self.magic_initial_energy = value;
            }
        }
        if let Ok(Some(raw)) = store.get("config:magic_initial_acorns").await {
            if let Ok(value) = raw.parse() {
                self.magic_initial_acorns = value;
            }
        }
        self
    }

    /// Overlay `PANTHEON_*` environment variables on top of the current config. Unset or
    /// unparseable variables leave the current value untouched.
    pub fn apply_env(mut self) -> Self {
        if let Ok(raw) = std::env::var(format!("{ENV_PREFIX}STORE_FALLBACK_DIR")) {
            self.store_fallback_dir = PathBuf::from(raw);
        }
        if let Ok(raw) = std::env::var(format!("{ENV_PREFIX}CONVERSATION_CAP")) {
            if let Ok(value) = raw.parse() {
                self.conversation_cap = value;
            }
        }
        if let Ok(raw) = std::env::var(format!("{ENV_PREFIX}RATE_LIMIT_WAIT_SECS")) {
            if let Ok(value) = raw.parse() {
                self.rate_limit_wait = Duration::from_secs(value);
            }
        }
        if let Ok(raw) = std::env::var(format!("{ENV_PREFIX}MAGIC_INITIAL_ENERGY")) {
            if let Ok(value) = raw.parse() {
                self.magic_initial_energy = value;
            }
        }
        if let Ok(raw) = std::env::var(format!("{ENV_PREFIX}MAGIC_INITIAL_ACORNS")) {
            if let Ok(value) = raw.parse() {
                self.magic_initial_acorns = value;
            }
        }
        self
    }

    /// Fallback file path used by the Dual-Store, derived from `store_fallback_dir`.
    pub fn store_fallback_path(&self) -> PathBuf {
        self.store_fallback_dir.join("conversations.jsonl")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = PantheonConfig::default();
        assert_eq!(config.conversation_cap, 100);
        assert_eq!(config.default_rate_limit.per_minute, 60);
        assert_eq!(config.rate_limit_wait, Duration::from_secs(30));
    }

    #[test]
    fn env_overrides_take_precedence_over_defaults() {
        std::env::set_var("PANTHEON_CONVERSATION_CAP", "42");
        let config = PantheonConfig::default().apply_env();
        std::env::remove_var("PANTHEON_CONVERSATION_CAP");
        assert_eq!(config.conversation_cap, 42);
    }

    #[tokio::test]
    async fn stored_values_overlay_defaults() {
        use crate::pantheon::dual_store::InMemoryPrimaryStore;
        use tempfile::tempdir;

        let dir = tempdir().unwrap();
        let path = dir.path().join("conversations.jsonl");
        let store = DualStore::open(Box::new(InMemoryPrimaryStore::new()), path, 100).unwrap();
        store.put("config:conversation_cap", "7").await.unwrap();

        let config = PantheonConfig::default().apply_stored(&store).await;
        assert_eq!(config.conversation_cap, 7);
    }
}
