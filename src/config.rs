//! Process Configuration
//!
//! Environment-driven settings for the `cluster-router` binary.

use crate::domain::entities::DEFAULT_TTL;
use crate::domain::value_objects::{split_field, Meta, PeerId};
use crate::routing::config::{RouterConfig, DEFAULT_TICK_INTERVAL};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub peer_id: String,
    pub topic: String,
    pub ttl_ms: u64,
    pub tick_ms: u64,
    pub hostname: String,
    pub meta: Vec<String>,
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            peer_id: String::new(),
            topic: "casm".to_string(),
            ttl_ms: DEFAULT_TTL.as_millis() as u64,
            tick_ms: DEFAULT_TICK_INTERVAL.as_millis() as u64,
            hostname: String::new(),
            meta: Vec::new(),
            debug: false,
        }
    }
}

impl Config {
    pub fn peer(&self) -> PeerId {
        PeerId::new(self.peer_id.clone())
    }

    pub fn meta(&self) -> Meta {
        Meta::from(self.meta.clone())
    }

    /// Router settings derived from this config.
    pub fn router(&self) -> RouterConfig {
        RouterConfig::new()
            .ttl(Duration::from_millis(self.ttl_ms))
            .tick_interval(Duration::from_millis(self.tick_ms))
    }
}

pub fn load_config() -> anyhow::Result<Config> {
    load_from(|key| std::env::var(key).ok())
}

/// Build a [`Config`] from an arbitrary variable lookup.
pub fn load_from<F>(var: F) -> anyhow::Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = Config::default();

    let peer_id = var("CLUSTER_PEER_ID")
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let topic = var("CLUSTER_TOPIC").unwrap_or(defaults.topic);

    let ttl_ms = var("CLUSTER_TTL_MS")
        .and_then(|v| v.parse().ok())
        .unwrap_or(defaults.ttl_ms);

    let tick_ms = var("CLUSTER_TICK_MS")
        .and_then(|v| v.parse().ok())
        .unwrap_or(defaults.tick_ms);

    let hostname = var("CLUSTER_HOSTNAME")
        .or_else(|| var("HOSTNAME"))
        .unwrap_or_default();

    let meta: Vec<String> = var("CLUSTER_META")
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    if let Some(bad) = meta.iter().find(|f| split_field(f).is_none()) {
        anyhow::bail!("CLUSTER_META field {:?} is not key=value", bad);
    }

    let debug = var("CLUSTER_DEBUG")
        .map(|v| v == "1" || v.to_lowercase() == "true")
        .unwrap_or(false);

    let cfg = Config {
        peer_id,
        topic,
        ttl_ms,
        tick_ms,
        hostname,
        meta,
        debug,
    };
    cfg.router().validate()?;
    Ok(cfg)
}
