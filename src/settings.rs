use config::{Config, ConfigError, File};
use ethers::types::Address;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Transport-level knobs for a single RPC endpoint.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct TransportOptions {
    #[serde(default = "default_transport_timeout_ms")]
    pub timeout_ms: u64,
    /// Optional requests-per-second cap enforced before each call.
    #[serde(default)]
    pub qps_limit: Option<u32>,
}

fn default_transport_timeout_ms() -> u64 {
    10_000
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            timeout_ms: default_transport_timeout_ms(),
            qps_limit: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct EndpointConfig {
    pub url: String,
    #[serde(default)]
    pub track_size: Option<u64>,
    #[serde(default)]
    pub selection_weight: Option<f64>,
    #[serde(default)]
    pub transport: TransportOptions,
}

impl EndpointConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            track_size: None,
            selection_weight: None,
            transport: TransportOptions::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Rpc {
    /// Shorthand: plain urls, expanded into `endpoints` with default options.
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,
    #[serde(default = "default_selection_timeout_ms")]
    pub selection_timeout_ms: u64,
    #[serde(default = "default_polling_interval_ms")]
    pub polling_interval_ms: u64,
    #[serde(default = "default_track_size")]
    pub track_size: u64,
}

fn default_selection_timeout_ms() -> u64 {
    5_000
}
fn default_polling_interval_ms() -> u64 {
    30
}
pub fn default_track_size() -> u64 {
    1_000
}

impl Default for Rpc {
    fn default() -> Self {
        Self {
            urls: Vec::new(),
            endpoints: Vec::new(),
            selection_timeout_ms: default_selection_timeout_ms(),
            polling_interval_ms: default_polling_interval_ms(),
            track_size: default_track_size(),
        }
    }
}

impl Rpc {
    pub fn selection_timeout(&self) -> Duration {
        Duration::from_millis(self.selection_timeout_ms)
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Sources {
    #[serde(default)]
    pub urls: Vec<String>,
    /// Keep going with zero healthy sources instead of failing the round.
    #[serde(default)]
    pub tolerant: bool,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_hydration_interval_secs")]
    pub hydration_interval_secs: u64,
    /// Restrict snapshots to these orderbooks; empty means all.
    #[serde(default)]
    pub orderbooks: Vec<String>,
}

fn default_request_timeout_ms() -> u64 {
    15_000
}
pub fn default_page_size() -> usize {
    1_000
}
fn default_hydration_interval_secs() -> u64 {
    600
}

impl Default for Sources {
    fn default() -> Self {
        Self {
            urls: Vec::new(),
            tolerant: false,
            request_timeout_ms: default_request_timeout_ms(),
            page_size: default_page_size(),
            hydration_interval_secs: default_hydration_interval_secs(),
            orderbooks: Vec::new(),
        }
    }
}

impl Sources {
    pub fn hydration_interval(&self) -> Duration {
        Duration::from_secs(self.hydration_interval_secs.max(1))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Orders {
    #[serde(default = "default_owner_limit")]
    pub default_owner_limit: usize,
    /// owner address -> capacity limit
    #[serde(default)]
    pub owner_limits: HashMap<String, usize>,
    /// How often buffered order events are folded into the map.
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
}

pub fn default_owner_limit() -> usize {
    25
}

fn default_flush_interval_ms() -> u64 {
    1000
}

impl Orders {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms.max(1))
    }
}

impl Default for Orders {
    fn default() -> Self {
        Self {
            default_owner_limit: default_owner_limit(),
            owner_limits: HashMap::new(),
            flush_interval_ms: default_flush_interval_ms(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub rpc: Rpc,
    #[serde(default)]
    pub sources: Sources,
    #[serde(default)]
    pub orders: Orders,
    #[serde(default)]
    pub log: LogSettings,
}

impl Settings {
    /// Loads `Config.toml` from the working directory.
    pub fn new() -> Result<Self, ConfigError> {
        Self::from_path("Config.toml")
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::from(path.as_ref()))
            .build()?;

        let mut settings: Self = s.try_deserialize()?;

        // Environment variable overrides for endpoint and indexer lists
        if let Ok(raw_rpc) = env::var("ARB_RPC_URLS") {
            if let Some(list) = parse_string_list(&raw_rpc) {
                if !list.is_empty() {
                    settings.rpc.urls = list;
                    settings.rpc.endpoints.clear();
                }
            }
        }
        if let Ok(raw_sg) = env::var("ARB_SUBGRAPH_URLS") {
            if let Some(list) = parse_string_list(&raw_sg) {
                if !list.is_empty() {
                    settings.sources.urls = list;
                }
            }
        }

        ensure_rpc_endpoints(&mut settings);
        settings.validate()?;

        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rpc.endpoints.is_empty() {
            return Err(ConfigError::Message(
                "rpc: at least one endpoint must be configured".to_string(),
            ));
        }
        if self.rpc.track_size == 0 {
            return Err(ConfigError::Message("rpc.track_size must be non-zero".to_string()));
        }
        for owner in self.orders.owner_limits.keys() {
            if Address::from_str(owner.trim()).is_err() {
                return Err(ConfigError::Message(format!(
                    "orders.owner_limits: invalid owner address {}",
                    owner
                )));
            }
        }
        Ok(())
    }

    /// Per-owner capacity overrides keyed by parsed address.
    pub fn owner_limits(&self) -> HashMap<Address, usize> {
        self.orders
            .owner_limits
            .iter()
            .filter_map(|(owner, limit)| {
                Address::from_str(owner.trim()).ok().map(|addr| (addr, *limit))
            })
            .collect()
    }

    /// Orderbook filter for snapshot queries, invalid entries skipped.
    pub fn orderbook_filter(&self) -> Vec<Address> {
        self.sources
            .orderbooks
            .iter()
            .filter_map(|s| Address::from_str(s.trim()).ok())
            .collect()
    }
}

fn parse_string_list(input: &str) -> Option<Vec<String>> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Some(vec![]);
    }
    if trimmed.starts_with('[') {
        if let Ok(v) = serde_json::from_str::<Vec<String>>(trimmed) {
            return Some(v);
        }
        let without_brackets = trimmed.trim_start_matches('[').trim_end_matches(']');
        return Some(split_list(without_brackets));
    }
    Some(split_list(trimmed))
}

fn split_list(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(|s| s.trim().trim_matches('"').trim_matches('\'').to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn ensure_rpc_endpoints(settings: &mut Settings) {
    if settings.rpc.endpoints.is_empty() && !settings.rpc.urls.is_empty() {
        settings.rpc.endpoints = settings
            .rpc
            .urls
            .iter()
            .map(|url| EndpointConfig::new(url.clone()))
            .collect();
    }
    let track_size = settings.rpc.track_size;
    for endpoint in settings.rpc.endpoints.iter_mut() {
        if endpoint.track_size.is_none() {
            endpoint.track_size = Some(track_size);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_parse_string_list_variants() {
        assert_eq!(
            parse_string_list(r#"["https://a.io","https://b.io"]"#).unwrap(),
            vec!["https://a.io", "https://b.io"]
        );
        assert_eq!(
            parse_string_list("https://a.io, https://b.io").unwrap(),
            vec!["https://a.io", "https://b.io"]
        );
        assert_eq!(
            parse_string_list("[https://a.io,https://b.io]").unwrap(),
            vec!["https://a.io", "https://b.io"]
        );
        assert!(parse_string_list("  ").unwrap().is_empty());
    }

    #[test]
    fn test_urls_shorthand_expands_to_endpoints() {
        let file = write_config(
            r#"
[rpc]
urls = ["https://rpc-1.example", "https://rpc-2.example"]
track_size = 500

[sources]
urls = ["https://sg.example/orderbook"]
"#,
        );
        let settings = Settings::from_path(file.path()).unwrap();
        assert_eq!(settings.rpc.endpoints.len(), 2);
        assert_eq!(settings.rpc.endpoints[0].track_size, Some(500));
        assert_eq!(settings.rpc.endpoints[1].transport, TransportOptions::default());
        assert_eq!(settings.orders.default_owner_limit, 25);
        assert_eq!(settings.orders.flush_interval(), Duration::from_millis(1000));
        assert!(!settings.sources.tolerant);
    }

    #[test]
    fn test_explicit_endpoints_keep_their_options() {
        let file = write_config(
            r#"
[rpc]
polling_interval_ms = 10

[[rpc.endpoints]]
url = "https://rpc-1.example"
selection_weight = 2.5
track_size = 50

[rpc.endpoints.transport]
timeout_ms = 3000
qps_limit = 20

[orders.owner_limits]
"0x00000000000000000000000000000000000000aa" = 40
"#,
        );
        let settings = Settings::from_path(file.path()).unwrap();
        let endpoint = &settings.rpc.endpoints[0];
        assert_eq!(endpoint.selection_weight, Some(2.5));
        assert_eq!(endpoint.track_size, Some(50));
        assert_eq!(endpoint.transport.qps_limit, Some(20));
        assert_eq!(settings.rpc.polling_interval(), Duration::from_millis(10));

        let limits = settings.owner_limits();
        let owner = Address::from_low_u64_be(0xaa);
        assert_eq!(limits.get(&owner), Some(&40));
    }

    #[test]
    fn test_missing_endpoints_is_rejected() {
        let file = write_config(
            r#"
[sources]
urls = ["https://sg.example/orderbook"]
"#,
        );
        assert!(Settings::from_path(file.path()).is_err());
    }
}
