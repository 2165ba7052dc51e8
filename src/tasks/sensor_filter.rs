//! Sensor filter task: the ring buffer's single producer.
//!
//! Copies the current raw slot, runs a per-channel moving average of order
//! M, stamps the result and writes it to the buffer every period.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::buffer::RingBuffer;
use crate::health::{perf_monitor::PerfMonitor, watchdog::Watchdog};
use crate::logfmt;
use crate::tasks::{periodic_sleeper, spawn_task};
use crate::types::{FilteredSample, RawSample};

pub const TASK_NAME: &str = "SensorFilter";
pub const DEFAULT_PERIOD_MS: u64 = 20;
pub const DEFAULT_FILTER_ORDER: usize = 5;
const PRIORITY: u8 = 60;

struct FilterShared {
    buffer: Arc<RingBuffer>,
    watchdog: Arc<Watchdog>,
    perf: Arc<PerfMonitor>,
    period: Duration,
    filter_order: usize,
    running: AtomicBool,
    raw: Mutex<RawSample>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

pub struct SensorFilter {
    shared: Arc<FilterShared>,
}

impl SensorFilter {
    pub fn new(
        buffer: Arc<RingBuffer>,
        watchdog: Arc<Watchdog>,
        perf: Arc<PerfMonitor>,
        period_ms: u64,
        filter_order: usize,
    ) -> Self {
        Self {
            shared: Arc::new(FilterShared {
                buffer,
                watchdog,
                perf,
                period: Duration::from_millis(period_ms),
                filter_order,
                running: AtomicBool::new(false),
                raw: Mutex::new(RawSample::default()),
                handle: Mutex::new(None),
            }),
        }
    }

    /// Replaces the raw slot the next iteration will filter.
    pub fn set_raw(&self, raw: RawSample) {
        *self.shared.raw.lock() = raw;
    }

    pub fn start(&self) {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let shared = self.shared.clone();
        let handle = spawn_task(TASK_NAME, "SP", Some(PRIORITY), move || shared.run());
        *self.shared.handle.lock() = Some(handle);
    }

    pub fn stop(&self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }

        if let Some(handle) = self.shared.handle.lock().take() {
            let _ = handle.join();
        }
        log::info!(target: "SP", "event=stop");
    }
}

impl FilterShared {
    fn run(&self) {
        let sleeper = periodic_sleeper();
        let mut next_wake = Instant::now() + self.period;

        let mut position_x = VecDeque::with_capacity(self.filter_order);
        let mut position_y = VecDeque::with_capacity(self.filter_order);
        let mut angle = VecDeque::with_capacity(self.filter_order);
        let mut temperature = VecDeque::with_capacity(self.filter_order);
        let mut write_count: u64 = 0;

        while self.running.load(Ordering::Acquire) {
            let start = Instant::now();

            let raw = *self.raw.lock();

            let sample = FilteredSample {
                position_x: moving_average(&mut position_x, self.filter_order, raw.position_x),
                position_y: moving_average(&mut position_y, self.filter_order, raw.position_y),
                angle_x: moving_average(&mut angle, self.filter_order, raw.angle_x),
                temperature: moving_average(&mut temperature, self.filter_order, raw.temperature),
                fault_electrical: raw.fault_electrical,
                fault_hydraulic: raw.fault_hydraulic,
                timestamp_ms: logfmt::timestamp_ms(),
            };

            self.buffer.write(sample);

            write_count += 1;
            if write_count % 50 == 0 {
                log::debug!(
                    target: "SP",
                    "event=write,temp={},pos_x={},pos_y={}",
                    sample.temperature, sample.position_x, sample.position_y
                );
            }

            self.watchdog.heartbeat(TASK_NAME);
            self.perf.end_iteration(TASK_NAME, start);

            let now = Instant::now();
            if now < next_wake {
                sleeper.sleep(next_wake - now);
            }
            next_wake += self.period;
        }
    }
}

/// Mean of the last `order` values, fewer while the window fills. Integer
/// division truncates toward zero, matching the rest of the pipeline.
fn moving_average(history: &mut VecDeque<i32>, order: usize, value: i32) -> i32 {
    history.push_back(value);
    if history.len() > order {
        history.pop_front();
    }

    let sum: i64 = history.iter().map(|&v| v as i64).sum();
    (sum / history.len() as i64) as i32
}
