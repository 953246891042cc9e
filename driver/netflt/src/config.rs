//! Filter configuration
//!
//! Parameters arrive as registry-style key/value pairs. Keys are matched
//! case-insensitively, unknown keys are ignored with a warning.

use std::time::Duration;

use log::warn;

use crate::error::{Error, Result};

/// One buffer pool size class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolClassConfig {
    /// Bytes of frame data each buffer of this class can hold
    pub buffer_size: usize,
    /// Maximum number of buffers of this class that can be handed out at once
    pub capacity: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterConfig {
    /// Let the host see traffic between VMs and the wire: loopback packets
    /// are passed instead of dropped, and nothing is dropped while the host
    /// itself asked for promiscuous mode
    pub pass_vm_traffic_to_host: bool,
    /// Minimum time between two attempts to reattach to a vanished interface
    pub rediscovery_cooldown: Duration,
    /// How long teardown waits for in-flight work before giving up
    pub idle_wait_timeout: Duration,
    /// Pad frames sent to the wire to an even length
    pub pad_to_even_length: bool,
    /// Size classes of the buffer pools, smallest first
    pub pool_classes: Vec<PoolClassConfig>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            pass_vm_traffic_to_host: false,
            rediscovery_cooldown: Duration::from_secs(5),
            idle_wait_timeout: Duration::from_secs(5),
            pad_to_even_length: true,
            pool_classes: vec![
                PoolClassConfig {
                    buffer_size: 2048,
                    capacity: 256,
                },
                PoolClassConfig {
                    buffer_size: 4096,
                    capacity: 256,
                },
                PoolClassConfig {
                    buffer_size: 16384,
                    capacity: 256,
                },
            ],
        }
    }
}

impl FilterConfig {
    /// Builds a configuration from registry-style parameters, starting from
    /// the defaults.
    ///
    /// ## Errors
    ///
    /// - [`Error::InvalidConfig`] if a known key has a malformed value
    pub fn from_params<'a>(params: impl IntoIterator<Item = (&'a str, &'a str)>) -> Result<Self> {
        let mut config = Self::default();

        for (key, value) in params {
            let value = value.trim();

            match key.to_ascii_lowercase().as_str() {
                "passvmtraffictohost" => {
                    config.pass_vm_traffic_to_host = parse_bool(key, value)?;
                }
                "rediscoverycooldownms" => {
                    config.rediscovery_cooldown = Duration::from_millis(parse_u64(key, value)?);
                }
                "idlewaittimeoutms" => {
                    config.idle_wait_timeout = Duration::from_millis(parse_u64(key, value)?);
                }
                "padtoevenlength" => {
                    config.pad_to_even_length = parse_bool(key, value)?;
                }
                "poolclasses" => {
                    config.pool_classes = parse_pool_classes(key, value)?;
                }
                _ => warn!("ignoring unknown parameter {key:?}"),
            }
        }

        Ok(config)
    }
}

fn invalid(key: &str, reason: &'static str) -> Error {
    Error::InvalidConfig {
        key: key.to_string(),
        reason,
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(key, "expected a boolean")),
    }
}

fn parse_u64(key: &str, value: &str) -> Result<u64> {
    value
        .parse()
        .map_err(|_| invalid(key, "expected an unsigned integer"))
}

/// Parses `size:count[,size:count...]`
fn parse_pool_classes(key: &str, value: &str) -> Result<Vec<PoolClassConfig>> {
    let mut classes = value
        .split(',')
        .map(str::trim)
        .filter(|class| !class.is_empty())
        .map(|class| {
            let (size, count) = class
                .split_once(':')
                .ok_or_else(|| invalid(key, "expected size:count pairs"))?;

            let buffer_size = size
                .trim()
                .parse::<usize>()
                .map_err(|_| invalid(key, "class size is not a number"))?;
            let capacity = count
                .trim()
                .parse::<usize>()
                .map_err(|_| invalid(key, "class count is not a number"))?;

            if buffer_size == 0 || capacity == 0 {
                return Err(invalid(key, "class size and count must be non-zero"));
            }

            Ok(PoolClassConfig {
                buffer_size,
                capacity,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    classes.sort_by_key(|class| class.buffer_size);
    classes.dedup_by_key(|class| class.buffer_size);

    Ok(classes)
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::{FilterConfig, PoolClassConfig};
    use crate::error::Error;

    #[test]
    fn defaults() {
        let config = FilterConfig::default();

        assert!(!config.pass_vm_traffic_to_host);
        assert_eq!(config.rediscovery_cooldown, Duration::from_secs(5));
        assert!(config.pad_to_even_length);
        assert_eq!(config.pool_classes.len(), 3);
    }

    #[test]
    fn parses_known_keys() {
        let config = FilterConfig::from_params([
            ("PassVmTrafficToHost", "1"),
            ("RediscoveryCooldownMs", " 250 "),
            ("padtoevenlength", "false"),
            ("PoolClasses", "4096:8, 2048:16"),
            ("SomethingElse", "whatever"),
        ])
        .unwrap();

        assert!(config.pass_vm_traffic_to_host);
        assert_eq!(config.rediscovery_cooldown, Duration::from_millis(250));
        assert!(!config.pad_to_even_length);
        assert_eq!(
            config.pool_classes,
            [
                PoolClassConfig {
                    buffer_size: 2048,
                    capacity: 16
                },
                PoolClassConfig {
                    buffer_size: 4096,
                    capacity: 8
                },
            ]
        );
    }

    #[test]
    fn rejects_malformed_values() {
        assert!(matches!(
            FilterConfig::from_params([("PassVmTrafficToHost", "maybe")]),
            Err(Error::InvalidConfig { .. })
        ));
        assert!(matches!(
            FilterConfig::from_params([("IdleWaitTimeoutMs", "-1")]),
            Err(Error::InvalidConfig { .. })
        ));
        assert!(matches!(
            FilterConfig::from_params([("PoolClasses", "2048")]),
            Err(Error::InvalidConfig { .. })
        ));
        assert!(matches!(
            FilterConfig::from_params([("PoolClasses", "0:4")]),
            Err(Error::InvalidConfig { .. })
        ));
    }

    #[test]
    fn empty_pool_classes_mean_unpooled() {
        let config = FilterConfig::from_params([("PoolClasses", "")]).unwrap();
        assert!(config.pool_classes.is_empty());
    }
}
