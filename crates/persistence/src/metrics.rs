//! Database and pin store metrics.

use metrics::{counter, gauge, histogram};
use sqlx::PgPool;
use std::time::Instant;

use domain::models::ChangeKind;

pub fn record_query_duration(query_name: &str, duration_secs: f64) {
    histogram!(
        "database_query_duration_seconds",
        "query" => query_name.to_string()
    )
    .record(duration_secs);
}

/// Record database connection pool metrics.
pub fn record_pool_metrics(pool: &PgPool) {
    let size = pool.size() as usize;
    let idle = pool.num_idle();
    let active = size.saturating_sub(idle);

    gauge!("database_connections_active").set(active as f64);
    gauge!("database_connections_idle").set(idle as f64);
    gauge!("database_connections_total").set(size as f64);
}

/// Count a committed pin change by kind.
pub fn record_pin_change(kind: ChangeKind) {
    counter!("pin_changes_total", "kind" => kind.to_string()).increment(1);
}

pub fn record_subscription_opened() {
    counter!("pin_subscriptions_opened_total").increment(1);
}

/// Times a query and records it under `query_name`.
///
/// ```ignore
/// let timer = QueryTimer::new("find_pin");
/// let result = sqlx::query_as::<_, PinEntity>(...).fetch_optional(&pool).await;
/// timer.record();
/// result
/// ```
pub struct QueryTimer {
    query_name: &'static str,
    start: Instant,
}

impl QueryTimer {
    pub fn new(query_name: &'static str) -> Self {
        Self {
            query_name,
            start: Instant::now(),
        }
    }

    pub fn record(self) {
        record_query_duration(self.query_name, self.start.elapsed().as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_timer_keeps_name() {
        let timer = QueryTimer::new("list_pins");
        assert_eq!(timer.query_name, "list_pins");
        timer.record();
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_pin_change(ChangeKind::Removed);
        record_subscription_opened();
    }
}
