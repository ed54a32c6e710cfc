//! Connection health tracking.
//!
//! A sampler task records, once per period, whether the connection was fully
//! healthy: terminal connected, broker connected, quotes streaming and the
//! server not reporting itself unhealthy. Ring buffers sized for one hour,
//! one day and one week turn the samples into uptime ratios.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;

use crate::core::domain::{AccountId, SymbolPrice};
use crate::core::state::TerminalState;
use crate::core::sync::SynchronizationListener;

/// Health monitor tunables.
#[derive(Debug, Clone)]
pub struct HealthMonitorConfig {
    /// How often a health sample is recorded.
    pub sample_period: Duration,
    /// How stale the newest quote may be while still counting as streaming.
    pub quote_freshness: Duration,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            sample_period: Duration::from_millis(1000),
            quote_freshness: Duration::from_secs(60),
        }
    }
}

/// Uptime ratios over the three rolling windows, each in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Uptime {
    #[serde(rename = "1h")]
    pub one_hour: f64,
    #[serde(rename = "1d")]
    pub one_day: f64,
    #[serde(rename = "1w")]
    pub one_week: f64,
}

struct Window {
    samples: VecDeque<bool>,
    capacity: usize,
}

impl Window {
    fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity.min(4096)),
            capacity,
        }
    }

    fn push(&mut self, healthy: bool) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(healthy);
    }

    /// Mean of the recorded samples; a window with no history yet reports
    /// full uptime rather than alarming on startup.
    fn ratio(&self) -> f64 {
        if self.samples.is_empty() {
            return 1.0;
        }
        let up = self.samples.iter().filter(|&&sample| sample).count();
        up as f64 / self.samples.len() as f64
    }
}

struct HealthInner {
    last_quote_at: Option<Instant>,
    server_health: Option<Value>,
    hour: Window,
    day: Window,
    week: Window,
}

/// Samples connection health and mirrors the server-reported health object.
pub struct HealthMonitor {
    state: Arc<TerminalState>,
    inner: Arc<RwLock<HealthInner>>,
    config: HealthMonitorConfig,
    stopped: Arc<AtomicBool>,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl HealthMonitor {
    #[must_use]
    pub fn new(state: Arc<TerminalState>, config: HealthMonitorConfig) -> Self {
        let per_window = |window: Duration| -> usize {
            let period_ms = config.sample_period.as_millis().max(1);
            ((window.as_millis() / period_ms).max(1)) as usize
        };
        Self {
            state,
            inner: Arc::new(RwLock::new(HealthInner {
                last_quote_at: None,
                server_health: None,
                hour: Window::new(per_window(Duration::from_secs(3600))),
                day: Window::new(per_window(Duration::from_secs(86_400))),
                week: Window::new(per_window(Duration::from_secs(604_800))),
            })),
            config,
            stopped: Arc::new(AtomicBool::new(false)),
            task: Mutex::new(None),
        }
    }

    /// Start the sampler task. Idempotent: a second call is a no-op.
    pub fn start(&self) {
        let mut task = self.task.lock();
        if task.is_some() {
            return;
        }
        let state = Arc::clone(&self.state);
        let inner = Arc::clone(&self.inner);
        let stopped = Arc::clone(&self.stopped);
        let config = self.config.clone();
        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(config.sample_period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if stopped.load(Ordering::SeqCst) {
                    return;
                }
                let mut guard = inner.write();
                let healthy = state.connected()
                    && state.connected_to_broker()
                    && quote_streaming(&guard, config.quote_freshness)
                    && server_healthy(&guard);
                guard.hour.push(healthy);
                guard.day.push(healthy);
                guard.week.push(healthy);
            }
        }));
    }

    /// Cancel the sampler; the monitor holds nothing open afterwards.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
    }

    /// Uptime ratios over the rolling 1 h / 1 d / 1 w windows.
    #[must_use]
    pub fn uptime(&self) -> Uptime {
        let inner = self.inner.read();
        Uptime {
            one_hour: inner.hour.ratio(),
            one_day: inner.day.ratio(),
            one_week: inner.week.ratio(),
        }
    }

    /// Latest server-reported health object, if any was received.
    #[must_use]
    pub fn server_health(&self) -> Option<Value> {
        self.inner.read().server_health.clone()
    }
}

fn quote_streaming(inner: &HealthInner, freshness: Duration) -> bool {
    match inner.last_quote_at {
        // No quotes observed at all: nothing is subscribed, which is not a
        // health failure.
        None => true,
        Some(at) => at.elapsed() <= freshness,
    }
}

/// The server health object is opaque; any boolean `false` inside it is
/// taken as an unhealthy report.
fn server_healthy(inner: &HealthInner) -> bool {
    match &inner.server_health {
        None => true,
        Some(Value::Object(fields)) => fields
            .values()
            .all(|value| !matches!(value, Value::Bool(false))),
        Some(_) => true,
    }
}

#[async_trait]
impl SynchronizationListener for HealthMonitor {
    async fn on_symbol_prices_updated(
        &self,
        _account_id: &AccountId,
        _prices: &[SymbolPrice],
        _equity: Option<Decimal>,
        _margin: Option<Decimal>,
        _free_margin: Option<Decimal>,
        _margin_level: Option<Decimal>,
    ) {
        self.inner.write().last_quote_at = Some(Instant::now());
    }

    async fn on_server_health_status(&self, _account_id: &AccountId, status: &Value) {
        self.inner.write().server_health = Some(status.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::DEFAULT_STATUS_TIMEOUT;
    use serde_json::json;

    fn monitor(sample_period: Duration) -> (Arc<TerminalState>, HealthMonitor) {
        let state = Arc::new(TerminalState::new(DEFAULT_STATUS_TIMEOUT));
        let config = HealthMonitorConfig {
            sample_period,
            quote_freshness: Duration::from_secs(60),
        };
        (Arc::clone(&state), HealthMonitor::new(state, config))
    }

    #[test]
    fn test_window_ratio() {
        let mut window = Window::new(4);
        assert_eq!(window.ratio(), 1.0);

        window.push(true);
        window.push(true);
        window.push(false);
        window.push(false);
        assert_eq!(window.ratio(), 0.5);

        // Oldest sample rolls out at capacity.
        window.push(true);
        assert_eq!(window.ratio(), 0.5);
    }

    #[test]
    fn test_server_health_judgement() {
        let (_state, monitor) = monitor(Duration::from_millis(10));
        assert!(server_healthy(&monitor.inner.read()));

        monitor.inner.write().server_health = Some(json!({"restApiHealthy": true}));
        assert!(server_healthy(&monitor.inner.read()));

        monitor.inner.write().server_health =
            Some(json!({"restApiHealthy": true, "streamingApiHealthy": false}));
        assert!(!server_healthy(&monitor.inner.read()));
    }

    #[tokio::test]
    async fn test_sampler_records_downtime_when_disconnected() {
        let (_state, monitor) = monitor(Duration::from_millis(10));
        monitor.start();
        tokio::time::sleep(Duration::from_millis(80)).await;
        monitor.stop();

        let uptime = monitor.uptime();
        assert_eq!(uptime.one_hour, 0.0);
        assert_eq!(uptime.one_week, 0.0);
    }

    #[tokio::test]
    async fn test_sampler_records_uptime_when_healthy() {
        let (state, monitor) = monitor(Duration::from_millis(10));
        let account = AccountId::from("acct");
        state.on_connected(&account).await;
        state
            .on_broker_connection_status_changed(&account, true)
            .await;

        monitor.start();
        tokio::time::sleep(Duration::from_millis(80)).await;
        monitor.stop();

        assert!(monitor.uptime().one_hour > 0.9);
    }

    #[tokio::test]
    async fn test_stop_halts_sampling() {
        let (_state, monitor) = monitor(Duration::from_millis(10));
        monitor.start();
        tokio::time::sleep(Duration::from_millis(50)).await;
        monitor.stop();
        let samples_at_stop = monitor.inner.read().hour.samples.len();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(monitor.inner.read().hour.samples.len(), samples_at_stop);
    }

    #[test]
    fn test_uptime_serializes_with_window_keys() {
        let uptime = Uptime {
            one_hour: 1.0,
            one_day: 0.5,
            one_week: 0.25,
        };
        let value = serde_json::to_value(uptime).unwrap();
        assert_eq!(value["1h"], 1.0);
        assert_eq!(value["1d"], 0.5);
        assert_eq!(value["1w"], 0.25);
    }
}
