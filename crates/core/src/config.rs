use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// All mnemo runtime parameters.
/// Defaults are compiled in; overrides come from `MNEMO_*` env vars or the
/// `mnemo_config` table. First boot against a database writes the defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MnemoCfg {
    // backend
    pub backend_url: String,
    pub request_timeout_secs: u64,
    /// Static translation locations tried when discovery fails, in order.
    pub static_locations: Vec<String>,

    // resolution
    pub default_language: String,

    // ingestion
    pub auto_ingest: bool,
    pub settle_delay_ms: u64,
    pub min_content_chars: usize,
    pub dedup_ceiling: usize,

    // injection
    pub inject_enabled: bool,
    pub retrieval_k: usize,
    pub min_relevance: f32,
    pub injection_budget_chars: usize,
    pub min_truncation_chars: usize,

    // availability
    pub health_retries: u32,
    pub health_backoff_ms: u64,
    pub health_recheck_secs: u64,
}

impl Default for MnemoCfg {
    fn default() -> Self {
        Self {
            backend_url: "http://127.0.0.1:5050".into(),
            request_timeout_secs: 10,
            static_locations: vec![
                "http://127.0.0.1:8000/scripts/extensions/third-party/mnemo/i18n".into(),
                "http://127.0.0.1:8000/mnemo/i18n".into(),
            ],
            default_language: "en".into(),
            auto_ingest: true,
            settle_delay_ms: 3000,
            min_content_chars: 20,
            dedup_ceiling: 1000,
            inject_enabled: true,
            retrieval_k: 5,
            min_relevance: 0.3,
            injection_budget_chars: 1500,
            min_truncation_chars: 100,
            health_retries: 3,
            health_backoff_ms: 2000,
            health_recheck_secs: 60,
        }
    }
}

impl MnemoCfg {
    /// Load config from `mnemo_config` table. If table is empty, seed with defaults.
    pub async fn load(pool: &PgPool) -> Result<Self, sqlx::Error> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT key, value FROM mnemo_config")
                .fetch_all(pool)
                .await?;

        if rows.is_empty() {
            let cfg = Self::default();
            cfg.seed(pool).await?;
            return Ok(cfg);
        }

        let map: HashMap<String, String> = rows.into_iter().collect();
        Ok(Self::from_map(&map))
    }

    /// Build from `MNEMO_<KEY>` environment variables over the defaults.
    pub fn from_env() -> Self {
        let map: HashMap<String, String> = Self::default()
            .to_entries()
            .into_iter()
            .filter_map(|(key, _, _)| {
                let var = format!("MNEMO_{}", key.to_ascii_uppercase());
                std::env::var(var).ok().map(|v| (key.to_owned(), v))
            })
            .collect();
        Self::from_map(&map)
    }

    /// Write all default values into `mnemo_config` table.
    async fn seed(&self, pool: &PgPool) -> Result<(), sqlx::Error> {
        let entries = self.to_entries();
        for (key, value, desc) in &entries {
            sqlx::query(
                "INSERT INTO mnemo_config (key, value, description) VALUES ($1, $2, $3) \
                 ON CONFLICT (key) DO NOTHING",
            )
            .bind(key)
            .bind(value)
            .bind(desc)
            .execute(pool)
            .await?;
        }
        Ok(())
    }

    pub fn from_map(m: &HashMap<String, String>) -> Self {
        let d = Self::default();
        Self {
            backend_url: m.get("backend_url").cloned().unwrap_or(d.backend_url),
            request_timeout_secs: get_or(m, "request_timeout_secs", d.request_timeout_secs),
            static_locations: m
                .get("static_locations")
                .map(|v| split_list(v.as_str()))
                .unwrap_or(d.static_locations),
            default_language: m.get("default_language").cloned().unwrap_or(d.default_language),
            auto_ingest: get_or(m, "auto_ingest", d.auto_ingest),
            settle_delay_ms: get_or(m, "settle_delay_ms", d.settle_delay_ms),
            min_content_chars: get_or(m, "min_content_chars", d.min_content_chars),
            dedup_ceiling: get_or(m, "dedup_ceiling", d.dedup_ceiling),
            inject_enabled: get_or(m, "inject_enabled", d.inject_enabled),
            retrieval_k: get_or(m, "retrieval_k", d.retrieval_k),
            min_relevance: get_or(m, "min_relevance", d.min_relevance),
            injection_budget_chars: get_or(m, "injection_budget_chars", d.injection_budget_chars),
            min_truncation_chars: get_or(m, "min_truncation_chars", d.min_truncation_chars),
            health_retries: get_or(m, "health_retries", d.health_retries),
            health_backoff_ms: get_or(m, "health_backoff_ms", d.health_backoff_ms),
            health_recheck_secs: get_or(m, "health_recheck_secs", d.health_recheck_secs),
        }
    }

    fn to_entries(&self) -> Vec<(&str, String, &str)> {
        vec![
            ("backend_url", self.backend_url.clone(), "Plugin backend base URL"),
            (
                "request_timeout_secs",
                self.request_timeout_secs.to_string(),
                "Per-request HTTP timeout seconds",
            ),
            (
                "static_locations",
                self.static_locations.join(","),
                "Comma-separated static translation locations",
            ),
            ("default_language", self.default_language.clone(), "Base language code"),
            ("auto_ingest", self.auto_ingest.to_string(), "Persist chat messages automatically"),
            (
                "settle_delay_ms",
                self.settle_delay_ms.to_string(),
                "Wait before persisting a new message ms",
            ),
            (
                "min_content_chars",
                self.min_content_chars.to_string(),
                "Shortest message worth persisting",
            ),
            (
                "dedup_ceiling",
                self.dedup_ceiling.to_string(),
                "Dedup record size before bulk eviction",
            ),
            (
                "inject_enabled",
                self.inject_enabled.to_string(),
                "Inject retrieved memory into requests",
            ),
            ("retrieval_k", self.retrieval_k.to_string(), "Candidates requested per retrieval"),
            ("min_relevance", self.min_relevance.to_string(), "Minimum retrieval score"),
            (
                "injection_budget_chars",
                self.injection_budget_chars.to_string(),
                "Max injected characters per request",
            ),
            (
                "min_truncation_chars",
                self.min_truncation_chars.to_string(),
                "Smallest headroom worth a truncated passage",
            ),
            ("health_retries", self.health_retries.to_string(), "Startup health check attempts"),
            (
                "health_backoff_ms",
                self.health_backoff_ms.to_string(),
                "Delay between health checks ms",
            ),
            (
                "health_recheck_secs",
                self.health_recheck_secs.to_string(),
                "Periodic health re-check seconds",
            ),
        ]
    }
}

fn get_or<T: std::str::FromStr>(map: &HashMap<String, String>, key: &str, default: T) -> T {
    map.get(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn split_list(v: &str) -> Vec<String> {
    v.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Live, user-adjustable config shared by every component.
/// Readers take the current value at use time; nothing snapshots it earlier.
#[derive(Debug, Clone)]
pub struct SharedCfg(Arc<RwLock<MnemoCfg>>);

impl SharedCfg {
    pub fn new(cfg: MnemoCfg) -> Self {
        Self(Arc::new(RwLock::new(cfg)))
    }

    pub fn read<R>(&self, f: impl FnOnce(&MnemoCfg) -> R) -> R {
        let guard = self.0.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    pub fn snapshot(&self) -> MnemoCfg {
        self.read(MnemoCfg::clone)
    }

    pub fn update(&self, f: impl FnOnce(&mut MnemoCfg)) {
        let mut guard = self.0.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard);
    }
}

impl Default for SharedCfg {
    fn default() -> Self {
        Self::new(MnemoCfg::default())
    }
}
