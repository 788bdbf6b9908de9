use std::time::Duration;

/// Overlay timing and placement settings.
///
/// Defaults match the host canvas behaviour the overlay was tuned against;
/// override via [`OverlayConfig::from_env`] or struct update syntax.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayConfig {
    /// Active-slide poll period; the worst-case staleness of slide changes
    /// (default: 800 ms).
    pub poll_interval: Duration,
    /// Quiet period after the last resize before resyncing (default: 150 ms).
    pub resize_debounce: Duration,
    /// Quiet period after the last scroll before resyncing (default: 150 ms).
    pub scroll_debounce: Duration,
    /// Manual placements are clamped to `[margin, 1 - margin]` (default: 0.02).
    pub placement_margin: f64,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(800),
            resize_debounce: Duration::from_millis(150),
            scroll_debounce: Duration::from_millis(150),
            placement_margin: 0.02,
        }
    }
}

impl OverlayConfig {
    /// Load from environment variables, falling back to the defaults for
    /// anything unset or unparsable.
    ///
    /// | Env Var                      | Default |
    /// |------------------------------|---------|
    /// | `SLIDEPIN_POLL_MS`           | `800`   |
    /// | `SLIDEPIN_DEBOUNCE_MS`       | `150`   |
    /// | `SLIDEPIN_PLACEMENT_MARGIN`  | `0.02`  |
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let millis = |name: &str| {
            lookup(name)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
        };

        let poll_interval = millis("SLIDEPIN_POLL_MS").unwrap_or(defaults.poll_interval);
        let debounce = millis("SLIDEPIN_DEBOUNCE_MS");
        let placement_margin = lookup("SLIDEPIN_PLACEMENT_MARGIN")
            .and_then(|v| v.trim().parse::<f64>().ok())
            .filter(|m| (0.0..0.5).contains(m))
            .unwrap_or(defaults.placement_margin);

        Self {
            poll_interval,
            resize_debounce: debounce.unwrap_or(defaults.resize_debounce),
            scroll_debounce: debounce.unwrap_or(defaults.scroll_debounce),
            placement_margin,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = OverlayConfig::default();
        assert_eq!(config.poll_interval, Duration::from_millis(800));
        assert_eq!(config.resize_debounce, Duration::from_millis(150));
        assert_eq!(config.scroll_debounce, Duration::from_millis(150));
        assert_eq!(config.placement_margin, 0.02);
    }

    #[test]
    fn lookup_overrides_and_rejects_nonsense() {
        let vars = |key: &str| match key {
            "SLIDEPIN_POLL_MS" => Some("250".to_string()),
            "SLIDEPIN_DEBOUNCE_MS" => Some("0".to_string()),
            "SLIDEPIN_PLACEMENT_MARGIN" => Some("0.05".to_string()),
            _ => None,
        };
        let config = OverlayConfig::from_lookup(vars);
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.resize_debounce, Duration::from_millis(150));
        assert_eq!(config.placement_margin, 0.05);

        let config = OverlayConfig::from_lookup(|_| Some("lots".to_string()));
        assert_eq!(config, OverlayConfig::default());
    }
}
