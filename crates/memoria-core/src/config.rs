//! Configuration (spec.md §6).
//!
//! Every key is wrapped in a [`ConfigValue`] carrying where it came from
//! (`default | file | env`) and whether an env override locks it against
//! further file-driven changes. This centralizes the scattered
//! `std::env::var(...).parse().unwrap_or(default)` call sites seen
//! elsewhere in this crate (e.g. `embeddings/local.rs`'s
//! `FASTEMBED_CACHE_PATH` handling) into one loader, because this spec asks
//! for a queryable source per key.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Where a configuration value's effective setting came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    Default,
    File,
    Env,
}

/// A single configuration value plus provenance. `locked` is set whenever
/// the active source is `Env` — live edits to `config.json` must not
/// silently override an operator's environment pin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
    pub locked: bool,
}

impl<T> ConfigValue<T> {
    fn default_value(value: T) -> Self {
        Self { value, source: ConfigSource::Default, locked: false }
    }
}

/// The full set of configuration keys from spec.md §6, each with its
/// documented default. Keys marked "live-apply" below may be changed via
/// `Engine::apply_config` without a restart; the rest require one — this
/// crate doesn't special-case that distinction mechanically (there is no
/// supervisor here to restart), it is left as documentation for the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub db_path: ConfigValue<PathBuf>,

    pub provider: ConfigValue<String>,
    pub model: ConfigValue<String>,
    pub api_key: ConfigValue<Option<String>>,

    /// Live-apply: master toggle for LLM use.
    pub compression_enabled: ConfigValue<bool>,
    /// Vector size; must match the embedding model. 0 means "no vectors".
    pub embedding_dimension: ConfigValue<u32>,

    /// Live-apply.
    pub batch_size: ConfigValue<u32>,
    /// Live-apply.
    pub batch_interval_ms: ConfigValue<u64>,

    pub min_output_length: ConfigValue<u32>,
    pub max_tokens_per_compression: ConfigValue<u32>,

    /// Live-apply.
    pub conflict_resolution_enabled: ConfigValue<bool>,
    pub conflict_similarity_band_low: ConfigValue<f32>,
    pub conflict_similarity_band_high: ConfigValue<f32>,

    pub entity_extraction_enabled: ConfigValue<bool>,
    /// Live-apply.
    pub reranking_enabled: ConfigValue<bool>,

    pub max_index_entries: ConfigValue<u32>,
    pub max_observations: ConfigValue<u32>,
    pub context_full_observation_count: ConfigValue<u32>,
    pub max_context_tokens: ConfigValue<u32>,

    pub sensitive_patterns: ConfigValue<Vec<String>>,

    pub retention_days: ConfigValue<u32>,
    pub max_database_size_mb: ConfigValue<u32>,

    /// Live-apply.
    pub rate_limiting_enabled: ConfigValue<bool>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: ConfigValue::default_value(PathBuf::from(".memory/memory.db")),
            provider: ConfigValue::default_value("none".to_string()),
            model: ConfigValue::default_value(String::new()),
            api_key: ConfigValue::default_value(None),
            compression_enabled: ConfigValue::default_value(false),
            embedding_dimension: ConfigValue::default_value(256),
            batch_size: ConfigValue::default_value(10),
            batch_interval_ms: ConfigValue::default_value(5_000),
            min_output_length: ConfigValue::default_value(20),
            max_tokens_per_compression: ConfigValue::default_value(4_000),
            conflict_resolution_enabled: ConfigValue::default_value(true),
            conflict_similarity_band_low: ConfigValue::default_value(0.70),
            conflict_similarity_band_high: ConfigValue::default_value(0.92),
            entity_extraction_enabled: ConfigValue::default_value(false),
            reranking_enabled: ConfigValue::default_value(false),
            max_index_entries: ConfigValue::default_value(200),
            max_observations: ConfigValue::default_value(20),
            context_full_observation_count: ConfigValue::default_value(5),
            max_context_tokens: ConfigValue::default_value(8_000),
            sensitive_patterns: ConfigValue::default_value(Vec::new()),
            retention_days: ConfigValue::default_value(90),
            max_database_size_mb: ConfigValue::default_value(512),
            rate_limiting_enabled: ConfigValue::default_value(true),
        }
    }
}

/// Reads an env var, applies it over `value` if present, parses with `f`,
/// and on failure logs a warning and keeps the prior value — the same
/// shape as the teacher's scattered `env::var(...).ok().and_then(|s|
/// s.parse().ok())` call sites, centralized into one helper.
fn apply_env<T: Clone>(slot: &mut ConfigValue<T>, key: &str, f: impl Fn(&str) -> Option<T>) {
    if let Ok(raw) = std::env::var(key) {
        match f(&raw) {
            Some(v) => {
                slot.value = v;
                slot.source = ConfigSource::Env;
                slot.locked = true;
            }
            None => {
                tracing::warn!(key, raw, "failed to parse env override, keeping prior value");
            }
        }
    }
}

impl Config {
    /// Layers file -> env on top of defaults, in that precedence, matching
    /// spec.md §6 ("every key has a source (default | file | env)").
    pub fn load(project_root: &Path) -> Self {
        let config_path = project_root.join(".memory").join("config.json");
        let mut cfg = if let Ok(raw) = std::fs::read_to_string(&config_path) {
            match serde_json::from_str::<Config>(&raw) {
                Ok(mut from_file) => {
                    from_file.mark_all_file_sourced();
                    from_file
                }
                Err(e) => {
                    tracing::warn!(error = %e, path = %config_path.display(), "failed to parse config.json, using defaults");
                    Config::default()
                }
            }
        } else {
            Config::default()
        };
        cfg.apply_env_overrides();
        cfg
    }

    fn mark_all_file_sourced(&mut self) {
        macro_rules! mark {
            ($($field:ident),*) => {
                $(self.$field.source = ConfigSource::File;)*
            };
        }
        mark!(
            db_path, provider, model, api_key, compression_enabled, embedding_dimension,
            batch_size, batch_interval_ms, min_output_length, max_tokens_per_compression,
            conflict_resolution_enabled, conflict_similarity_band_low, conflict_similarity_band_high,
            entity_extraction_enabled, reranking_enabled, max_index_entries, max_observations,
            context_full_observation_count, max_context_tokens, sensitive_patterns,
            retention_days, max_database_size_mb, rate_limiting_enabled
        );
    }

    fn apply_env_overrides(&mut self) {
        apply_env(&mut self.provider, "MEMORIA_PROVIDER", |s| Some(s.to_string()));
        apply_env(&mut self.model, "MEMORIA_MODEL", |s| Some(s.to_string()));
        apply_env(&mut self.api_key, "MEMORIA_API_KEY", |s| Some(Some(s.to_string())));
        apply_env(&mut self.compression_enabled, "MEMORIA_COMPRESSION_ENABLED", |s| s.parse().ok());
        apply_env(&mut self.embedding_dimension, "MEMORIA_EMBEDDING_DIMENSION", |s| s.parse().ok());
        apply_env(&mut self.batch_size, "MEMORIA_BATCH_SIZE", |s| s.parse().ok());
        apply_env(&mut self.batch_interval_ms, "MEMORIA_BATCH_INTERVAL_MS", |s| s.parse().ok());
        apply_env(&mut self.conflict_resolution_enabled, "MEMORIA_CONFLICT_RESOLUTION_ENABLED", |s| s.parse().ok());
        apply_env(&mut self.conflict_similarity_band_low, "MEMORIA_CONFLICT_BAND_LOW", |s| {
            s.parse::<f32>().ok().map(|v| v.clamp(0.0, 1.0))
        });
        apply_env(&mut self.conflict_similarity_band_high, "MEMORIA_CONFLICT_BAND_HIGH", |s| {
            s.parse::<f32>().ok().map(|v| v.clamp(0.0, 1.0))
        });
        apply_env(&mut self.entity_extraction_enabled, "MEMORIA_ENTITY_EXTRACTION_ENABLED", |s| s.parse().ok());
        apply_env(&mut self.reranking_enabled, "MEMORIA_RERANKING_ENABLED", |s| s.parse().ok());
        apply_env(&mut self.rate_limiting_enabled, "MEMORIA_RATE_LIMITING_ENABLED", |s| s.parse().ok());
        apply_env(&mut self.retention_days, "MEMORIA_RETENTION_DAYS", |s| s.parse().ok());
    }

    /// Snapshot this configuration to `<project_root>/.memory/config.json`,
    /// matching the persisted-state layout in spec.md §6.
    pub fn snapshot(&self, project_root: &Path) -> std::io::Result<()> {
        let dir = project_root.join(".memory");
        std::fs::create_dir_all(&dir)?;
        let path = dir.join("config.json");
        let json = serde_json::to_string_pretty(self).unwrap_or_default();
        std::fs::write(path, json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_bands() {
        let cfg = Config::default();
        assert_eq!(cfg.conflict_similarity_band_low.value, 0.70);
        assert_eq!(cfg.conflict_similarity_band_high.value, 0.92);
        assert_eq!(cfg.conflict_similarity_band_low.source, ConfigSource::Default);
    }

    #[test]
    fn env_override_locks_value() {
        // SAFETY: test-local env var, no concurrent access in this process.
        unsafe { std::env::set_var("MEMORIA_BATCH_SIZE", "42") };
        let mut cfg = Config::default();
        cfg.apply_env_overrides();
        assert_eq!(cfg.batch_size.value, 42);
        assert_eq!(cfg.batch_size.source, ConfigSource::Env);
        assert!(cfg.batch_size.locked);
        unsafe { std::env::remove_var("MEMORIA_BATCH_SIZE") };
    }

    #[test]
    fn bad_env_value_keeps_default() {
        unsafe { std::env::set_var("MEMORIA_BATCH_SIZE", "not-a-number") };
        let mut cfg = Config::default();
        cfg.apply_env_overrides();
        assert_eq!(cfg.batch_size.value, 10);
        assert_eq!(cfg.batch_size.source, ConfigSource::Default);
        unsafe { std::env::remove_var("MEMORIA_BATCH_SIZE") };
    }

    #[test]
    fn snapshot_round_trips() {
        let dir = tempfile::TempDir::new().unwrap();
        let cfg = Config::default();
        cfg.snapshot(dir.path()).unwrap();
        let loaded = Config::load(dir.path());
        assert_eq!(loaded.batch_size.value, cfg.batch_size.value);
        assert_eq!(loaded.batch_size.source, ConfigSource::File);
    }
}
