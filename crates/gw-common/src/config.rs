use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Default streaming behavior when a client's intent cannot be inferred from
/// the request itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamingMode {
    Real,
    Fake,
}

impl StreamingMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "real" => Some(StreamingMode::Real),
            "fake" => Some(StreamingMode::Fake),
            _ => None,
        }
    }
}

/// Final, fully-resolved configuration for a running gateway process.
///
/// There is no database merge layer: rotation state is never persisted, so
/// there's no reason to round-trip config through storage either.
/// Resolution order is simply CLI flag > environment variable > built-in
/// default, which `clap`'s `env = "..."` attributes already give us for
/// free.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    pub streaming_mode: StreamingMode,
    /// 0 disables the failure-threshold trigger.
    pub failure_threshold: u32,
    /// 0 disables the usage-threshold trigger.
    pub switch_on_uses: u32,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub immediate_switch_status_codes: HashSet<u16>,
    pub api_keys: Vec<String>,
    pub initial_auth_index: Option<u32>,
}

pub const DEFAULT_API_KEY: &str = "123456";

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8787,
            streaming_mode: StreamingMode::Real,
            failure_threshold: 3,
            switch_on_uses: 0,
            max_retries: 2,
            retry_delay_ms: 1000,
            immediate_switch_status_codes: [429u16, 503].into_iter().collect(),
            api_keys: vec![DEFAULT_API_KEY.to_string()],
            initial_auth_index: None,
        }
    }
}

pub fn parse_status_codes(csv: &str) -> HashSet<u16> {
    csv.split(',')
        .filter_map(|part| part.trim().parse::<u16>().ok())
        .filter(|code| (400..600).contains(code))
        .collect()
}

pub fn parse_csv(csv: &str) -> Vec<String> {
    csv.split(',')
        .map(|part| part.trim().to_string())
        .filter(|part| !part.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_filters_out_of_range() {
        let codes = parse_status_codes("429, 503, 200, 999, abc");
        assert_eq!(codes, [429u16, 503].into_iter().collect());
    }

    #[test]
    fn default_config_has_one_api_key() {
        let cfg = GatewayConfig::default();
        assert_eq!(cfg.api_keys, vec![DEFAULT_API_KEY.to_string()]);
    }
}
