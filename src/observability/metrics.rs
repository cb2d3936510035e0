//! Metrics collection and exposition.
//!
//! # Metrics
//! - `http_connections_accepted_total` (counter): connections given a slot
//! - `http_connections_rejected_total` (counter): connections refused at capacity
//! - `http_connections_active` (gauge): connections currently being served
//! - `http_requests_total` (counter): responses written, by status
//! - `http_request_duration_seconds` (histogram): dispatch to last byte written
//! - `http_parse_errors_total` (counter): requests rejected as malformed
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op
//! - Status is the only label, keeping cardinality fixed

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

pub const CONNECTIONS_ACCEPTED: &str = "http_connections_accepted_total";
pub const CONNECTIONS_REJECTED: &str = "http_connections_rejected_total";
pub const CONNECTIONS_ACTIVE: &str = "http_connections_active";
pub const REQUESTS_TOTAL: &str = "http_requests_total";
pub const REQUEST_DURATION: &str = "http_request_duration_seconds";
pub const PARSE_ERRORS: &str = "http_parse_errors_total";

/// Install the Prometheus recorder and serve its scrape endpoint on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

/// Keeps one connection counted in `http_connections_active` until dropped.
///
/// Dropping covers every way a session ends, including a task aborted
/// at the end of the drain window.
#[must_use = "the connection stops being counted as active when dropped"]
#[derive(Debug)]
pub struct ActiveConnection {
    _private: (),
}

impl Drop for ActiveConnection {
    fn drop(&mut self) {
        gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
    }
}

pub fn record_connection_accepted() -> ActiveConnection {
    counter!(CONNECTIONS_ACCEPTED).increment(1);
    gauge!(CONNECTIONS_ACTIVE).increment(1.0);
    ActiveConnection { _private: () }
}

pub fn record_connection_rejected() {
    counter!(CONNECTIONS_REJECTED).increment(1);
}

pub fn record_request(status: u16, started: Instant) {
    counter!(REQUESTS_TOTAL, "status" => status.to_string()).increment(1);
    histogram!(REQUEST_DURATION).record(started.elapsed().as_secs_f64());
}

pub fn record_parse_error() {
    counter!(PARSE_ERRORS).increment(1);
}

/// In-memory recorder for asserting on the connection gauge and durations.
#[cfg(test)]
pub(crate) mod testing {
    use std::sync::{Arc, Mutex};

    use metrics::{
        Counter, Gauge, GaugeFn, Histogram, HistogramFn, Key, KeyName, Metadata, Recorder,
        SharedString, Unit,
    };

    use super::{CONNECTIONS_ACTIVE, REQUEST_DURATION};

    #[derive(Default)]
    struct Captured {
        active: Mutex<f64>,
        durations: Mutex<Vec<f64>>,
    }

    struct ActiveGauge(Arc<Captured>);

    impl GaugeFn for ActiveGauge {
        fn increment(&self, value: f64) {
            *self.0.active.lock().unwrap() += value;
        }

        fn decrement(&self, value: f64) {
            *self.0.active.lock().unwrap() -= value;
        }

        fn set(&self, value: f64) {
            *self.0.active.lock().unwrap() = value;
        }
    }

    struct Durations(Arc<Captured>);

    impl HistogramFn for Durations {
        fn record(&self, value: f64) {
            self.0.durations.lock().unwrap().push(value);
        }
    }

    #[derive(Default)]
    pub(crate) struct CapturingRecorder {
        captured: Arc<Captured>,
    }

    impl CapturingRecorder {
        pub(crate) fn active(&self) -> f64 {
            *self.captured.active.lock().unwrap()
        }

        pub(crate) fn durations(&self) -> Vec<f64> {
            self.captured.durations.lock().unwrap().clone()
        }
    }

    impl Recorder for CapturingRecorder {
        fn describe_counter(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
        fn describe_gauge(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
        fn describe_histogram(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}

        fn register_counter(&self, _: &Key, _: &Metadata<'_>) -> Counter {
            Counter::noop()
        }

        fn register_gauge(&self, key: &Key, _: &Metadata<'_>) -> Gauge {
            if key.name() == CONNECTIONS_ACTIVE {
                Gauge::from_arc(Arc::new(ActiveGauge(Arc::clone(&self.captured))))
            } else {
                Gauge::noop()
            }
        }

        fn register_histogram(&self, key: &Key, _: &Metadata<'_>) -> Histogram {
            if key.name() == REQUEST_DURATION {
                Histogram::from_arc(Arc::new(Durations(Arc::clone(&self.captured))))
            } else {
                Histogram::noop()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::CapturingRecorder;
    use super::*;
    use std::time::Duration;

    #[test]
    fn recording_without_recorder_is_noop() {
        let active = record_connection_accepted();
        record_request(200, Instant::now());
        record_parse_error();
        record_connection_rejected();
        drop(active);
    }

    #[test]
    fn active_gauge_follows_guard_lifetime() {
        let recorder = CapturingRecorder::default();
        ::metrics::with_local_recorder(&recorder, || {
            let first = record_connection_accepted();
            let second = record_connection_accepted();
            assert_eq!(recorder.active(), 2.0);

            drop(first);
            assert_eq!(recorder.active(), 1.0);
            drop(second);
        });
        assert_eq!(recorder.active(), 0.0);
    }

    #[test]
    fn duration_measured_from_given_start() {
        let recorder = CapturingRecorder::default();
        let started = Instant::now() - Duration::from_millis(250);
        ::metrics::with_local_recorder(&recorder, || record_request(408, started));

        let durations = recorder.durations();
        assert_eq!(durations.len(), 1);
        assert!(durations[0] >= 0.25, "{durations:?}");
    }
}
