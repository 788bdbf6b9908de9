use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use slidepin_core::project::DEFAULT_SIMILARITY_THRESHOLD;

/// Default interval between background maintenance passes: one day.
const DEFAULT_MAINTENANCE_SECS: u64 = 86_400;

/// CLI configuration loaded from environment variables.
///
/// All fields have defaults suitable for working in a local checkout.
#[derive(Debug, Clone, PartialEq)]
pub struct CliConfig {
    /// Directory holding the JSON record files (default: `.slidepin`).
    pub store_dir: PathBuf,
    /// Document used when a command is not given `--document`.
    pub document_id: String,
    /// Minimum title similarity for project link candidates.
    pub similarity_threshold: f64,
    /// Interval of the `watch` maintenance loop.
    pub maintenance_interval: Duration,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            store_dir: PathBuf::from(".slidepin"),
            document_id: "local".into(),
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            maintenance_interval: Duration::from_secs(DEFAULT_MAINTENANCE_SECS),
        }
    }
}

impl CliConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                     | Default     |
    /// |-----------------------------|-------------|
    /// | `SLIDEPIN_STORE_DIR`        | `.slidepin` |
    /// | `SLIDEPIN_DOCUMENT_ID`      | `local`     |
    /// | `SLIDEPIN_SIMILARITY`       | `0.7`       |
    /// | `SLIDEPIN_MAINTENANCE_SECS` | `86400`     |
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let defaults = Self::default();

        let store_dir = lookup("SLIDEPIN_STORE_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.store_dir);

        let document_id = lookup("SLIDEPIN_DOCUMENT_ID")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or(defaults.document_id);

        let similarity_threshold = match lookup("SLIDEPIN_SIMILARITY") {
            Some(raw) => {
                let value: f64 = raw
                    .trim()
                    .parse()
                    .with_context(|| format!("SLIDEPIN_SIMILARITY must be a number, got {raw:?}"))?;
                anyhow::ensure!(
                    (0.0..=1.0).contains(&value),
                    "SLIDEPIN_SIMILARITY must be within 0..=1, got {value}"
                );
                value
            }
            None => defaults.similarity_threshold,
        };

        let maintenance_interval = match lookup("SLIDEPIN_MAINTENANCE_SECS") {
            Some(raw) => {
                let secs: u64 = raw.trim().parse().with_context(|| {
                    format!("SLIDEPIN_MAINTENANCE_SECS must be a whole number, got {raw:?}")
                })?;
                anyhow::ensure!(secs > 0, "SLIDEPIN_MAINTENANCE_SECS must be positive");
                Duration::from_secs(secs)
            }
            None => defaults.maintenance_interval,
        };

        Ok(Self {
            store_dir,
            document_id,
            similarity_threshold,
            maintenance_interval,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let config = CliConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, CliConfig::default());
        assert_eq!(config.maintenance_interval, Duration::from_secs(86_400));
    }

    #[test]
    fn overrides_are_applied() {
        let config = CliConfig::from_lookup(lookup(&[
            ("SLIDEPIN_STORE_DIR", "/tmp/pins"),
            ("SLIDEPIN_DOCUMENT_ID", "deck-9"),
            ("SLIDEPIN_SIMILARITY", "0.85"),
            ("SLIDEPIN_MAINTENANCE_SECS", "60"),
        ]))
        .unwrap();
        assert_eq!(config.store_dir, PathBuf::from("/tmp/pins"));
        assert_eq!(config.document_id, "deck-9");
        assert_eq!(config.similarity_threshold, 0.85);
        assert_eq!(config.maintenance_interval, Duration::from_secs(60));
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(CliConfig::from_lookup(lookup(&[("SLIDEPIN_SIMILARITY", "high")])).is_err());
        assert!(CliConfig::from_lookup(lookup(&[("SLIDEPIN_SIMILARITY", "1.5")])).is_err());
        assert!(CliConfig::from_lookup(lookup(&[("SLIDEPIN_MAINTENANCE_SECS", "0")])).is_err());
    }

    #[test]
    fn blank_document_id_falls_back() {
        let config = CliConfig::from_lookup(lookup(&[("SLIDEPIN_DOCUMENT_ID", "  ")])).unwrap();
        assert_eq!(config.document_id, "local");
    }
}
