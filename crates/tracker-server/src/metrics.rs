//! Metric names recorded through the `metrics` facade.
//!
//! No exporter is installed by the gateway; an embedding binary may install
//! any `metrics` recorder to collect these.

/// Channel connections accepted (counter, labels: channel).
pub const CHANNEL_CONNECTIONS_TOTAL: &str = "channel_connections_total";
/// Open channel connections (gauge).
pub const CHANNEL_CONNECTIONS_ACTIVE: &str = "channel_connections_active";
/// Outbound messages discarded because a live client's queue was full
/// (counter, labels: channel).
pub const CHANNEL_DROPS_TOTAL: &str = "channel_drops_total";
/// Connections closed with an application close code (counter, labels: code).
pub const CHANNEL_REJECTS_TOTAL: &str = "channel_rejects_total";
/// Idle stops of the supervised services (counter).
pub const IDLE_STOPS_TOTAL: &str = "idle_stops_total";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_names_are_snake_case() {
        for name in [
            CHANNEL_CONNECTIONS_TOTAL,
            CHANNEL_CONNECTIONS_ACTIVE,
            CHANNEL_DROPS_TOTAL,
            CHANNEL_REJECTS_TOTAL,
            IDLE_STOPS_TOTAL,
        ] {
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "metric name '{name}' must be snake_case"
            );
        }
    }
}
