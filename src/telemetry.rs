use std::sync::Arc;
use std::time::{Duration, Instant};

#[cfg(feature = "prometheus")]
use std::sync::atomic::{AtomicBool, Ordering};
#[cfg(feature = "prometheus")]
use std::sync::Mutex;
#[cfg(feature = "prometheus")]
use std::thread::JoinHandle;

/// Structured, in-process event hook for scan diagnostics.
///
/// This crate is a library; emitting logs directly (e.g. `println!`) is not acceptable for
/// production. Callers provide an implementation that forwards these events to `tracing`,
/// `log`, metrics, or custom sinks.
pub trait ScanEventListener: std::fmt::Debug + Send + Sync + 'static {
    fn on_event(&self, event: ScanEvent);
}

/// Structured events emitted while scanning and assembling spans.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent {
    /// A row started at or before the end of its series and was dropped.
    RowOutOfOrder {
        series: String,
        last_timestamp: u64,
        first_timestamp: u64,
    },
    /// The store delivered a row of the last row sequence again; the sequence was rebuilt from it.
    RowRedelivered { series: String, base_time: u64 },

    ScanCompleted {
        rows: u64,
        spans: usize,
        store_time: Duration,
    },
    ScanFailed { error: String },
}

#[derive(Debug)]
pub struct NoopEventListener;

impl ScanEventListener for NoopEventListener {
    #[inline]
    fn on_event(&self, _event: ScanEvent) {}
}

pub fn noop_event_listener() -> Arc<dyn ScanEventListener> {
    Arc::new(NoopEventListener)
}

/// Observability collaborator receiving the store latency of every scan.
pub trait LatencySink: std::fmt::Debug + Send + Sync + 'static {
    fn record_latency(&self, millis: u64);
}

/// Forwards scan latencies to the `metrics` facade.
#[derive(Debug, Default)]
pub struct MetricsLatencySink;

impl LatencySink for MetricsLatencySink {
    #[inline]
    fn record_latency(&self, millis: u64) {
        scan_metrics::record_scan_latency(Duration::from_millis(millis));
    }
}

pub fn metrics_latency_sink() -> Arc<dyn LatencySink> {
    Arc::new(MetricsLatencySink)
}

/// Accumulates the time a scan spends waiting on the store and records it when dropped,
/// so every exit path of a scan reports its latency.
pub(crate) struct StoreTimer<'a> {
    sink: &'a dyn LatencySink,
    waited: Duration,
    waiting_since: Option<Instant>,
}

impl<'a> StoreTimer<'a> {
    /// Starts timing; the scan is waiting on the store from now on.
    pub(crate) fn start(sink: &'a dyn LatencySink) -> Self {
        Self {
            sink,
            waited: Duration::ZERO,
            waiting_since: Some(Instant::now()),
        }
    }

    /// A batch came back from the store.
    pub(crate) fn batch_returned(&mut self) {
        if let Some(since) = self.waiting_since.take() {
            self.waited += since.elapsed();
        }
    }

    /// Local processing finished; waiting on the store resumes.
    pub(crate) fn resume(&mut self) {
        self.waiting_since = Some(Instant::now());
    }

    pub(crate) fn waited(&self) -> Duration {
        self.waited
    }
}

impl Drop for StoreTimer<'_> {
    fn drop(&mut self) {
        self.batch_returned();
        self.sink.record_latency(self.waited.as_millis() as u64);
    }
}

/// Metrics instrumentation and in-process scraping.
///
/// Emitting metrics is a no-op until a recorder is installed.
pub mod scan_metrics {
    use super::*;

    use ::metrics::{describe_counter, describe_histogram, Unit};

    #[cfg(feature = "prometheus")]
    use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

    // Counters are exposed as `<name>_total` by the Prometheus exporter.
    pub const SCAN_LATENCY_SECONDS: &str = "spanscan_scan_latency_seconds";
    pub const SCANNED_ROWS: &str = "spanscan_scanned_rows";
    pub const OUT_OF_ORDER_ROWS: &str = "spanscan_out_of_order_rows";
    pub const DOWNSAMPLE_DECISIONS: &str = "spanscan_downsample_decisions";

    /// Handle to the in-process Prometheus recorder/scrape renderer.
    ///
    /// This does **not** start an HTTP server. Call [`InProcessPrometheus::render`] to scrape.
    #[cfg(feature = "prometheus")]
    pub struct InProcessPrometheus {
        handle: PrometheusHandle,
        stop: Arc<AtomicBool>,
        upkeep_thread: Mutex<Option<JoinHandle<()>>>,
    }

    #[cfg(feature = "prometheus")]
    impl std::fmt::Debug for InProcessPrometheus {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("InProcessPrometheus")
                .field("stop", &self.stop)
                .field("upkeep_thread", &self.upkeep_thread)
                .finish_non_exhaustive()
        }
    }

    #[cfg(feature = "prometheus")]
    impl InProcessPrometheus {
        /// Installs a global Prometheus recorder (once per process) and starts an upkeep thread
        /// calling `run_upkeep()` every `upkeep_interval`.
        pub fn install(upkeep_interval: Duration) -> Result<Self, MetricsInitError> {
            describe_all();

            let handle = PrometheusBuilder::new()
                .install_recorder()
                .map_err(MetricsInitError::from_build_error)?;

            let stop = Arc::new(AtomicBool::new(false));
            let stop_clone = stop.clone();
            let handle_clone = handle.clone();
            let upkeep_thread = std::thread::Builder::new()
                .name("spanscan-metrics-upkeep".to_string())
                .spawn(move || {
                    while !stop_clone.load(Ordering::Relaxed) {
                        std::thread::sleep(upkeep_interval);
                        handle_clone.run_upkeep();
                    }
                })
                .map_err(|e| MetricsInitError::ThreadSpawn(e.to_string()))?;

            Ok(Self {
                handle,
                stop,
                upkeep_thread: Mutex::new(Some(upkeep_thread)),
            })
        }

        /// Renders the current metrics in the Prometheus text exposition format.
        pub fn render(&self) -> String {
            self.handle.render()
        }
    }

    #[cfg(feature = "prometheus")]
    impl Drop for InProcessPrometheus {
        fn drop(&mut self) {
            self.stop.store(true, Ordering::Relaxed);
            if let Ok(mut guard) = self.upkeep_thread.lock() {
                if let Some(t) = guard.take() {
                    let _ = t.join();
                }
            }
        }
    }

    #[cfg(feature = "prometheus")]
    #[derive(Debug, thiserror::Error)]
    pub enum MetricsInitError {
        #[error("metrics recorder already installed")]
        AlreadyInstalled,
        #[error("failed to install prometheus recorder: {0}")]
        Install(String),
        #[error("failed to spawn upkeep thread: {0}")]
        ThreadSpawn(String),
    }

    #[cfg(feature = "prometheus")]
    impl MetricsInitError {
        fn from_build_error(e: BuildError) -> Self {
            match e {
                BuildError::FailedToSetGlobalRecorder(_) => MetricsInitError::AlreadyInstalled,
                other => MetricsInitError::Install(other.to_string()),
            }
        }
    }

    #[inline]
    pub fn record_scan_latency(duration: Duration) {
        ::metrics::histogram!(SCAN_LATENCY_SECONDS).record(duration.as_secs_f64());
    }

    #[inline]
    pub fn record_scanned_rows(rows: u64) {
        if rows > 0 {
            ::metrics::counter!(SCANNED_ROWS).increment(rows);
        }
    }

    #[inline]
    pub fn record_out_of_order_row() {
        ::metrics::counter!(OUT_OF_ORDER_ROWS).increment(1);
    }

    /// Counts `cells` downsample filter decisions of one kind.
    #[inline]
    pub fn record_downsample_decisions(decision: &'static str, cells: u64) {
        if cells > 0 {
            ::metrics::counter!(DOWNSAMPLE_DECISIONS, "decision" => decision).increment(cells);
        }
    }

    pub fn describe_all() {
        describe_counter!(
            SCANNED_ROWS,
            Unit::Count,
            "Total number of rows returned by the store and assembled into spans."
        );
        describe_counter!(
            OUT_OF_ORDER_ROWS,
            Unit::Count,
            "Rows dropped because they arrived out of time order for their series."
        );
        describe_counter!(
            DOWNSAMPLE_DECISIONS,
            Unit::Count,
            "Cells evaluated by the downsample push-down filter, by decision."
        );
        describe_histogram!(
            SCAN_LATENCY_SECONDS,
            Unit::Seconds,
            "Time a scan spent waiting on the key-value store."
        );
    }
}
