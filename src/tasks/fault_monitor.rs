//! Fault monitor task: classifies the latest sample and broadcasts
//! classification edges to registered observers.
//!
//! Callbacks fire only on transitions, and only for non-none
//! classifications; a transition back to none updates the stored state
//! silently. Callbacks run synchronously on this task's thread under the
//! callback-list lock, so they must be non-blocking and must not touch any
//! state lock ranked below it (the alert mailboxes and the data-logger
//! file lock are the intended targets).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::buffer::RingBuffer;
use crate::crit;
use crate::health::{perf_monitor::PerfMonitor, watchdog::Watchdog};
use crate::tasks::{periodic_sleeper, spawn_task};
use crate::types::{FaultKind, FilteredSample};

pub const TASK_NAME: &str = "FaultMonitor";
pub const DEFAULT_PERIOD_MS: u64 = 20;
const PRIORITY: u8 = 90;

pub type FaultCallback = Box<dyn Fn(FaultKind, FilteredSample) + Send + Sync>;

/// Classification priority: critical temperature dominates, then the
/// discrete fault flags, then the temperature pre-warning.
pub fn classify(sample: &FilteredSample) -> FaultKind {
    if sample.temperature > 120 {
        FaultKind::TemperatureCritical
    } else if sample.fault_electrical {
        FaultKind::Electrical
    } else if sample.fault_hydraulic {
        FaultKind::Hydraulic
    } else if sample.temperature > 95 {
        FaultKind::TemperatureWarning
    } else {
        FaultKind::None
    }
}

struct MonitorShared {
    buffer: Arc<RingBuffer>,
    watchdog: Arc<Watchdog>,
    perf: Arc<PerfMonitor>,
    period: Duration,
    running: AtomicBool,
    current: Mutex<FaultKind>,
    callbacks: Mutex<Vec<FaultCallback>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

pub struct FaultMonitor {
    shared: Arc<MonitorShared>,
}

impl FaultMonitor {
    pub fn new(
        buffer: Arc<RingBuffer>,
        watchdog: Arc<Watchdog>,
        perf: Arc<PerfMonitor>,
        period_ms: u64,
    ) -> Self {
        Self {
            shared: Arc::new(MonitorShared {
                buffer,
                watchdog,
                perf,
                period: Duration::from_millis(period_ms),
                running: AtomicBool::new(false),
                current: Mutex::new(FaultKind::None),
                callbacks: Mutex::new(Vec::new()),
                handle: Mutex::new(None),
            }),
        }
    }

    /// Appends an observer. Registration is additive only; do it before
    /// `start`.
    pub fn register_fault_callback(&self, callback: FaultCallback) {
        self.shared.callbacks.lock().push(callback);
    }

    pub fn current_fault(&self) -> FaultKind {
        *self.shared.current.lock()
    }

    pub fn start(&self) {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let shared = self.shared.clone();
        let handle = spawn_task(TASK_NAME, "FM", Some(PRIORITY), move || shared.run());
        *self.shared.handle.lock() = Some(handle);
    }

    pub fn stop(&self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }

        if let Some(handle) = self.shared.handle.lock().take() {
            let _ = handle.join();
        }
        log::info!(target: "FM", "event=stop");
    }

    #[cfg(test)]
    fn tick(&self) {
        self.shared.observe(self.shared.buffer.peek_latest());
    }
}

impl MonitorShared {
    fn run(&self) {
        let sleeper = periodic_sleeper();
        let mut next_wake = Instant::now() + self.period;

        while self.running.load(Ordering::Acquire) {
            let start = Instant::now();

            self.observe(self.buffer.peek_latest());

            self.watchdog.heartbeat(TASK_NAME);
            self.perf.end_iteration(TASK_NAME, start);

            let now = Instant::now();
            if now < next_wake {
                sleeper.sleep(next_wake - now);
            }
            next_wake += self.period;
        }
    }

    fn observe(&self, sample: FilteredSample) {
        let kind = classify(&sample);

        let mut current = self.current.lock();
        if kind == *current {
            return;
        }
        *current = kind;

        if kind != FaultKind::None {
            self.notify(kind, sample);
        }
    }

    /// Caller holds the fault-state lock; the callback-list lock nests
    /// inside it, in rank order.
    fn notify(&self, kind: FaultKind, sample: FilteredSample) {
        match kind {
            FaultKind::TemperatureWarning => log::warn!(
                target: "FM",
                "event=fault,type={},temp={},pos_x={},pos_y={}",
                kind.code(), sample.temperature, sample.position_x, sample.position_y
            ),
            _ => crit!(
                target: "FM",
                "event=fault,type={},temp={},pos_x={},pos_y={}",
                kind.code(), sample.temperature, sample.position_x, sample.position_y
            ),
        }

        let callbacks = self.callbacks.lock();
        for callback in callbacks.iter() {
            callback(kind, sample);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn sample(temperature: i32, electrical: bool, hydraulic: bool) -> FilteredSample {
        FilteredSample {
            temperature,
            fault_electrical: electrical,
            fault_hydraulic: hydraulic,
            ..FilteredSample::default()
        }
    }

    fn monitor_over(buffer: Arc<RingBuffer>) -> FaultMonitor {
        FaultMonitor::new(
            buffer,
            Arc::new(Watchdog::new(100)),
            Arc::new(PerfMonitor::new()),
            DEFAULT_PERIOD_MS,
        )
    }

    #[test]
    fn temperature_thresholds_are_exclusive() {
        assert_eq!(classify(&sample(95, false, false)), FaultKind::None);
        assert_eq!(classify(&sample(96, false, false)), FaultKind::TemperatureWarning);
        assert_eq!(classify(&sample(120, false, false)), FaultKind::TemperatureWarning);
        assert_eq!(classify(&sample(121, false, false)), FaultKind::TemperatureCritical);
    }

    #[test]
    fn critical_temperature_outranks_flag_faults() {
        assert_eq!(classify(&sample(130, true, true)), FaultKind::TemperatureCritical);
        assert_eq!(classify(&sample(100, true, true)), FaultKind::Electrical);
        assert_eq!(classify(&sample(100, false, true)), FaultKind::Hydraulic);
        assert_eq!(classify(&sample(100, false, false)), FaultKind::TemperatureWarning);
    }

    #[test]
    fn callbacks_fire_only_on_non_none_edges() {
        let buffer = Arc::new(RingBuffer::new());
        let monitor = monitor_over(buffer.clone());

        let fired = Arc::new(AtomicUsize::new(0));
        {
            let fired = fired.clone();
            monitor.register_fault_callback(Box::new(move |_, _| {
                fired.fetch_add(1, Ordering::Relaxed);
            }));
        }

        // Healthy sample: no edge.
        buffer.write(sample(80, false, false));
        monitor.tick();
        assert_eq!(fired.load(Ordering::Relaxed), 0);

        // Rising edge.
        buffer.write(sample(121, false, false));
        monitor.tick();
        assert_eq!(fired.load(Ordering::Relaxed), 1);

        // Held condition: still one notification.
        monitor.tick();
        assert_eq!(fired.load(Ordering::Relaxed), 1);

        // Falling edge back to none is silent but stored.
        buffer.write(sample(80, false, false));
        monitor.tick();
        assert_eq!(fired.load(Ordering::Relaxed), 1);
        assert_eq!(monitor.current_fault(), FaultKind::None);

        // The same fault can then fire again.
        buffer.write(sample(121, false, false));
        monitor.tick();
        assert_eq!(fired.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn distinct_faults_chain_edges() {
        let buffer = Arc::new(RingBuffer::new());
        let monitor = monitor_over(buffer.clone());

        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = seen.clone();
            monitor.register_fault_callback(Box::new(move |kind, _| {
                seen.lock().push(kind);
            }));
        }

        buffer.write(sample(100, false, false));
        monitor.tick();
        buffer.write(sample(100, true, false));
        monitor.tick();
        buffer.write(sample(130, true, false));
        monitor.tick();

        assert_eq!(
            *seen.lock(),
            vec![
                FaultKind::TemperatureWarning,
                FaultKind::Electrical,
                FaultKind::TemperatureCritical,
            ]
        );
    }
}
