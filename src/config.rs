//! Backend selection for record stores.

use crate::error::{SResult, from_serde, invalid_input};
use crate::inmemory::InMemoryRecordStore;
use crate::store::RecordStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

pub const BACKEND_ENV: &str = "COURSEWARE_STATE_BACKEND";
pub const REDIS_URL_ENV: &str = "REDIS_URL";
pub const CHUNK_SIZE_ENV: &str = "COURSEWARE_STATE_CHUNK_SIZE";

/// Which record store serves user state.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum BackendConfig {
    #[default]
    Memory,
    Redis {
        url: String,
        #[serde(default)]
        query_chunk_size: Option<usize>,
    },
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StoreConfig {
    pub backend: BackendConfig,
}

impl StoreConfig {
    /// Reads the configuration from process environment variables.
    pub fn from_env() -> SResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from any variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> SResult<Self> {
        let backend = lookup(BACKEND_ENV).unwrap_or_else(|| "memory".to_owned());
        let backend = match backend.trim().to_ascii_lowercase().as_str() {
            "" | "memory" => BackendConfig::Memory,
            "redis" => {
                let url = lookup(REDIS_URL_ENV).ok_or_else(|| {
                    invalid_input(format!("{REDIS_URL_ENV} is required for the redis backend"))
                })?;
                let query_chunk_size = match lookup(CHUNK_SIZE_ENV) {
                    Some(raw) => Some(parse_chunk_size(&raw)?),
                    None => None,
                };
                BackendConfig::Redis {
                    url,
                    query_chunk_size,
                }
            }
            other => {
                return Err(invalid_input(format!(
                    "unknown {BACKEND_ENV} value `{other}`"
                )));
            }
        };
        Ok(Self { backend })
    }

    /// Parses a JSON document such as `{"backend": "redis", "url": "redis://..."}`.
    pub fn from_json(raw: &str) -> SResult<Self> {
        let backend = serde_json::from_str(raw).map_err(from_serde)?;
        Ok(Self { backend })
    }
}

fn parse_chunk_size(raw: &str) -> SResult<usize> {
    match raw.trim().parse::<usize>() {
        Ok(size) if size > 0 => Ok(size),
        _ => Err(invalid_input(format!(
            "{CHUNK_SIZE_ENV} must be a positive integer, got `{raw}`"
        ))),
    }
}

/// Opens the record store described by `config`.
pub fn open_record_store(config: &StoreConfig) -> SResult<Arc<dyn RecordStore>> {
    match &config.backend {
        BackendConfig::Memory => {
            info!(backend = "memory", "opening user state record store");
            Ok(Arc::new(InMemoryRecordStore::new()))
        }
        #[cfg(feature = "redis")]
        BackendConfig::Redis {
            url,
            query_chunk_size,
        } => {
            use crate::redis_store::{DEFAULT_QUERY_CHUNK_SIZE, RedisRecordStore};

            let chunk_size = query_chunk_size.unwrap_or(DEFAULT_QUERY_CHUNK_SIZE);
            info!(backend = "redis", chunk_size, "opening user state record store");
            let store = RedisRecordStore::from_url(url)?.with_query_chunk_size(chunk_size);
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "redis"))]
        BackendConfig::Redis { .. } => Err(invalid_input(
            "redis backend requested but the `redis` feature is not enabled",
        )),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used)]
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults_to_memory() {
        let config = StoreConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.backend, BackendConfig::Memory);
        assert!(open_record_store(&config).is_ok());
    }

    #[test]
    fn redis_requires_url() {
        let err = StoreConfig::from_lookup(lookup(&[(BACKEND_ENV, "redis")])).unwrap_err();
        assert!(matches!(err, crate::error::StateError::InvalidInput(_)));

        let config = StoreConfig::from_lookup(lookup(&[
            (BACKEND_ENV, "Redis"),
            (REDIS_URL_ENV, "redis://127.0.0.1:6379"),
            (CHUNK_SIZE_ENV, "64"),
        ]))
        .unwrap();
        assert_eq!(
            config.backend,
            BackendConfig::Redis {
                url: "redis://127.0.0.1:6379".to_owned(),
                query_chunk_size: Some(64),
            }
        );
    }

    #[test]
    fn rejects_bad_values() {
        assert!(StoreConfig::from_lookup(lookup(&[(BACKEND_ENV, "sqlite")])).is_err());
        assert!(
            StoreConfig::from_lookup(lookup(&[
                (BACKEND_ENV, "redis"),
                (REDIS_URL_ENV, "redis://localhost"),
                (CHUNK_SIZE_ENV, "0"),
            ]))
            .is_err()
        );
    }

    #[test]
    fn parses_json() {
        let config = StoreConfig::from_json(r#"{"backend": "memory"}"#).unwrap();
        assert_eq!(config.backend, BackendConfig::Memory);

        let config =
            StoreConfig::from_json(r#"{"backend": "redis", "url": "redis://cache:6379"}"#).unwrap();
        assert_eq!(
            config.backend,
            BackendConfig::Redis {
                url: "redis://cache:6379".to_owned(),
                query_chunk_size: None,
            }
        );
        assert!(StoreConfig::from_json(r#"{"backend": "etcd"}"#).is_err());
    }
}
