//! Controller configuration loaded from environment variables.

use crate::error::ControllerError;
use packet_client::PacketClient;
use std::time::Duration;

const DEFAULT_CONCURRENCY: u16 = 10;
const DEFAULT_WORKLOAD_TIMEOUT_SECONDS: u64 = 10;

/// Runtime configuration for the Packet controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    pub api_url: String,
    pub api_token: String,
    /// Namespace to watch; `None` watches all namespaces
    pub namespace: Option<String>,
    pub cluster_concurrency: u16,
    pub machine_concurrency: u16,
    pub workload_cluster_timeout: Duration,
}

impl ControllerConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_token = non_empty("PACKET_API_KEY")
            .or_else(|| non_empty("METAL_AUTH_TOKEN"))
            .ok_or_else(|| {
                ControllerError::InvalidConfig("PACKET_API_KEY environment variable is required".to_string())
            })?;

        let api_url = non_empty("PACKET_API_URL").unwrap_or_else(|| PacketClient::DEFAULT_BASE_URL.to_string());
        let namespace = non_empty("WATCH_NAMESPACE");

        let cluster_concurrency = parse_or(&non_empty, "PACKETCLUSTER_CONCURRENCY", DEFAULT_CONCURRENCY)?;
        let machine_concurrency = parse_or(&non_empty, "PACKETMACHINE_CONCURRENCY", DEFAULT_CONCURRENCY)?;
        let timeout_seconds = parse_or(&non_empty, "WORKLOAD_CLUSTER_TIMEOUT_SECONDS", DEFAULT_WORKLOAD_TIMEOUT_SECONDS)?;

        if cluster_concurrency == 0 || machine_concurrency == 0 {
            return Err(ControllerError::InvalidConfig("concurrency must be at least 1".to_string()));
        }

        Ok(Self {
            api_url,
            api_token,
            namespace,
            cluster_concurrency,
            machine_concurrency,
            workload_cluster_timeout: Duration::from_secs(timeout_seconds),
        })
    }
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> Result<T, ControllerError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ControllerError::InvalidConfig(format!("{} must be a positive integer, got {:?}", key, raw))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<ControllerConfig, ControllerError> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        ControllerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_token_is_required() {
        assert!(matches!(load(&[]), Err(ControllerError::InvalidConfig(_))));
        assert!(matches!(load(&[("PACKET_API_KEY", "  ")]), Err(ControllerError::InvalidConfig(_))));
    }

    #[test]
    fn test_defaults_apply() {
        let config = load(&[("PACKET_API_KEY", "token")]).unwrap();
        assert_eq!(config.api_url, PacketClient::DEFAULT_BASE_URL);
        assert_eq!(config.namespace, None);
        assert_eq!(config.cluster_concurrency, 10);
        assert_eq!(config.machine_concurrency, 10);
        assert_eq!(config.workload_cluster_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_metal_auth_token_is_accepted() {
        let config = load(&[("METAL_AUTH_TOKEN", "metal"), ("WATCH_NAMESPACE", "capi")]).unwrap();
        assert_eq!(config.api_token, "metal");
        assert_eq!(config.namespace.as_deref(), Some("capi"));
    }

    #[test]
    fn test_rejects_bad_numbers() {
        let err = load(&[("PACKET_API_KEY", "t"), ("PACKETMACHINE_CONCURRENCY", "many")]).unwrap_err();
        assert!(err.to_string().contains("PACKETMACHINE_CONCURRENCY"));
        assert!(load(&[("PACKET_API_KEY", "t"), ("PACKETCLUSTER_CONCURRENCY", "0")]).is_err());
    }
}
