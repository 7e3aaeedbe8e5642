//! Connector configuration.
//!
//! The host hands settings over as a flat string map. They are parsed once,
//! when the mirror starts, into an immutable [`MirrorConfig`].

use crate::error::{MirrorError, Result};
use crate::types::DEFAULT_GROUP;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Raw settings as supplied by the host pipeline.
pub type Settings = HashMap<String, String>;

pub const NAMESPACE_KEY: &str = "namespace";
pub const SERVER_ADDRESS_KEY: &str = "serverAddress";
pub const GROUP_KEY: &str = "group";
pub const POLL_INTERVAL_KEY: &str = "pollIntervalSeconds";

/// Page size used when listing services.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// A configuration key the connector understands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConfigSpec {
    pub key: &'static str,
    pub default: &'static str,
    pub description: &'static str,
}

/// Keys accepted by the connector, with their defaults.
pub const CONFIG_SCHEMA: [ConfigSpec; 4] = [
    ConfigSpec {
        key: NAMESPACE_KEY,
        default: "public",
        description: "Registry namespace the session is opened in",
    },
    ConfigSpec {
        key: GROUP_KEY,
        default: DEFAULT_GROUP,
        description: "Group whose services are listed and watched",
    },
    ConfigSpec {
        key: SERVER_ADDRESS_KEY,
        default: "127.0.0.1:8848",
        description: "Comma-separated host:port list of registry servers",
    },
    ConfigSpec {
        key: POLL_INTERVAL_KEY,
        default: "30",
        description: "Seconds between full service listings",
    },
];

/// Parsed connector configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MirrorConfig {
    pub namespace: String,
    pub server_addr: String,
    pub group: String,
    /// Period of the reconciliation schedule.
    pub interval: Duration,
    /// Names requested per listing page.
    pub page_size: usize,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            namespace: "public".to_string(),
            server_addr: "127.0.0.1:8848".to_string(),
            group: DEFAULT_GROUP.to_string(),
            interval: Duration::from_secs(30),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl MirrorConfig {
    /// Parse and validate host settings. Missing keys take their defaults.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        for key in settings.keys() {
            if !CONFIG_SCHEMA.iter().any(|spec| spec.key == key) {
                tracing::debug!(key = %key, "Ignoring unknown setting");
            }
        }

        let namespace = lookup(settings, NAMESPACE_KEY).trim().to_string();

        let server_addr = lookup(settings, SERVER_ADDRESS_KEY).trim().to_string();
        validate_server_addr(&server_addr)?;

        let group = lookup(settings, GROUP_KEY).trim().to_string();
        if group.is_empty() {
            return Err(MirrorError::config(GROUP_KEY, "must not be empty"));
        }

        let interval = parse_interval(lookup(settings, POLL_INTERVAL_KEY))?;

        Ok(Self {
            namespace,
            server_addr,
            group,
            interval,
            page_size: DEFAULT_PAGE_SIZE,
        })
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }
}

fn lookup<'a>(settings: &'a Settings, key: &str) -> &'a str {
    match settings.get(key) {
        Some(value) => value.as_str(),
        None => CONFIG_SCHEMA
            .iter()
            .find(|spec| spec.key == key)
            .map(|spec| spec.default)
            .unwrap_or_default(),
    }
}

fn parse_interval(raw: &str) -> Result<Duration> {
    let secs: u64 = raw
        .trim()
        .parse()
        .map_err(|_| MirrorError::config(POLL_INTERVAL_KEY, format!("`{raw}` is not an integer")))?;
    if secs == 0 {
        return Err(MirrorError::config(POLL_INTERVAL_KEY, "must be positive"));
    }
    let interval = Duration::from_secs(secs);
    // Deadlines are computed as instants; an interval that cannot be added
    // to one would stall the schedule.
    if Instant::now().checked_add(interval).is_none() {
        return Err(MirrorError::config(POLL_INTERVAL_KEY, format!("{secs} seconds is out of range")));
    }
    Ok(interval)
}

/// Check a comma-separated `host:port` list.
pub fn validate_server_addr(addr: &str) -> Result<()> {
    if addr.trim().is_empty() {
        return Err(MirrorError::InvalidServerAddress("empty".to_string()));
    }
    for entry in addr.split(',') {
        let entry = entry.trim();
        let (host, port) = entry
            .rsplit_once(':')
            .ok_or_else(|| MirrorError::InvalidServerAddress(format!("`{entry}` has no port")))?;
        if host.is_empty() {
            return Err(MirrorError::InvalidServerAddress(format!("`{entry}` has no host")));
        }
        match port.parse::<u16>() {
            Ok(p) if p > 0 => {}
            _ => {
                return Err(MirrorError::InvalidServerAddress(format!(
                    "`{entry}` has an invalid port"
                )))
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(pairs: &[(&str, &str)]) -> Settings {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = MirrorConfig::from_settings(&Settings::new()).unwrap();
        assert_eq!(config, MirrorConfig::default());
    }

    #[test]
    fn test_overrides() {
        let config = MirrorConfig::from_settings(&settings(&[
            ("namespace", "prod"),
            ("serverAddress", "10.0.0.1:8848,10.0.0.2:8848"),
            ("group", "ORDERS"),
            ("pollIntervalSeconds", "5"),
        ]))
        .unwrap();

        assert_eq!(config.namespace, "prod");
        assert_eq!(config.group, "ORDERS");
        assert_eq!(config.interval, Duration::from_secs(5));
    }

    #[test]
    fn test_bad_interval() {
        for raw in ["abc", "0", "-3", "1.5", ""] {
            let result = MirrorConfig::from_settings(&settings(&[("pollIntervalSeconds", raw)]));
            assert!(
                matches!(result, Err(MirrorError::InvalidConfig { ref key, .. }) if key == POLL_INTERVAL_KEY),
                "interval {raw:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_interval_out_of_range() {
        let result = MirrorConfig::from_settings(&settings(&[(
            "pollIntervalSeconds",
            "18446744073709551615",
        )]));
        assert!(matches!(
            result,
            Err(MirrorError::InvalidConfig { ref key, .. }) if key == POLL_INTERVAL_KEY
        ));

        // A year is still fine.
        let config =
            MirrorConfig::from_settings(&settings(&[("pollIntervalSeconds", "31536000")])).unwrap();
        assert_eq!(config.interval, Duration::from_secs(31_536_000));
    }

    #[test]
    fn test_bad_server_address() {
        for raw in ["", "localhost", ":8848", "host:0", "host:99999", "a:1,b"] {
            assert!(
                matches!(validate_server_addr(raw), Err(MirrorError::InvalidServerAddress(_))),
                "address {raw:?} should be rejected"
            );
        }
        assert!(validate_server_addr("[::1]:8848").is_ok());
    }

    #[test]
    fn test_empty_group() {
        let result = MirrorConfig::from_settings(&settings(&[("group", "  ")]));
        assert!(matches!(result, Err(MirrorError::InvalidConfig { .. })));
    }
}
