//! Heartbeat-based liveness detector.
//!
//! Tasks register with a per-task timeout and heartbeat once per iteration.
//! A monitor thread walks the table every check period; an entry that has
//! reported at least once and then stayed silent past its timeout fires the
//! pluggable fault handler. The last-heartbeat stamp is reset after firing
//! so a long outage produces one event per timeout window, not a storm.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use spin_sleep::{SpinSleeper, SpinStrategy};

use crate::crit;

/// Called with (task name, milliseconds since last heartbeat) on timeout.
pub type FaultHandler = Box<dyn Fn(&str, u64) + Send + Sync>;

struct TaskEntry {
    timeout: Duration,
    last_heartbeat: Instant,
    ever_reported: bool,
    consecutive_failures: u32,
}

pub struct Watchdog {
    check_period: Duration,
    running: AtomicBool,
    tasks: Mutex<HashMap<String, TaskEntry>>,
    handler: Mutex<FaultHandler>,
    fault_count: AtomicU32,
    heartbeat_count: AtomicU64,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl Watchdog {
    pub fn new(check_period_ms: u64) -> Self {
        Self {
            check_period: Duration::from_millis(check_period_ms),
            running: AtomicBool::new(false),
            tasks: Mutex::new(HashMap::new()),
            handler: Mutex::new(Box::new(default_fault_handler)),
            fault_count: AtomicU32::new(0),
            heartbeat_count: AtomicU64::new(0),
            monitor: Mutex::new(None),
        }
    }

    pub fn register_task(&self, name: &str, timeout_ms: u64) {
        let mut tasks = self.tasks.lock();
        tasks.insert(
            name.to_string(),
            TaskEntry {
                timeout: Duration::from_millis(timeout_ms),
                last_heartbeat: Instant::now(),
                ever_reported: false,
                consecutive_failures: 0,
            },
        );
        log::info!(target: "MA", "event=watchdog_register,task={},timeout_ms={}", name, timeout_ms);
    }

    pub fn heartbeat(&self, name: &str) {
        let mut tasks = self.tasks.lock();
        match tasks.get_mut(name) {
            Some(entry) => {
                entry.last_heartbeat = Instant::now();
                entry.ever_reported = true;
                entry.consecutive_failures = 0;

                let count = self.heartbeat_count.fetch_add(1, Ordering::Relaxed) + 1;
                if count % 100 == 0 {
                    log::debug!(target: "MA", "event=watchdog_heartbeat,task={},count={}", name, count);
                }
            }
            None => {
                log::warn!(target: "MA", "event=watchdog_heartbeat_unknown,task={}", name);
            }
        }
    }

    /// Replaces the default handler. The handler runs on the monitor thread
    /// while the task table is locked; it must not call back into the
    /// watchdog.
    pub fn set_fault_handler(&self, handler: FaultHandler) {
        *self.handler.lock() = handler;
    }

    pub fn fault_count(&self) -> u32 {
        self.fault_count.load(Ordering::Relaxed)
    }

    pub fn task_count(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn start(watchdog: &Arc<Watchdog>) {
        if watchdog.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let monitor = Arc::clone(watchdog);
        let handle = std::thread::Builder::new()
            .name("watchdog".into())
            .spawn(move || monitor.monitor_loop())
            .expect("spawn watchdog thread");

        *watchdog.monitor.lock() = Some(handle);
        log::info!(
            target: "MA",
            "event=watchdog_start,check_period_ms={}",
            watchdog.check_period.as_millis()
        );
    }

    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        if let Some(handle) = self.monitor.lock().take() {
            let _ = handle.join();
        }
        log::info!(target: "MA", "event=watchdog_stop,faults_detected={}", self.fault_count());
    }

    fn monitor_loop(&self) {
        let sleeper = SpinSleeper::new(100_000).with_spin_strategy(SpinStrategy::YieldThread);
        let mut next_check = Instant::now() + self.check_period;

        while self.running.load(Ordering::Acquire) {
            self.check_tasks();

            let now = Instant::now();
            if now < next_check {
                sleeper.sleep(next_check - now);
            }
            next_check += self.check_period;
        }
    }

    fn check_tasks(&self) {
        let mut tasks = self.tasks.lock();
        let handler = self.handler.lock();

        for (name, entry) in tasks.iter_mut() {
            // Bootstrap grace: a task that never reported cannot time out.
            if !entry.ever_reported {
                continue;
            }

            let now = Instant::now();
            let elapsed = now.duration_since(entry.last_heartbeat);
            if elapsed > entry.timeout {
                entry.consecutive_failures += 1;
                self.fault_count.fetch_add(1, Ordering::Relaxed);
                log::debug!(
                    target: "MA",
                    "event=watchdog_timeout,task={},consecutive={}",
                    name, entry.consecutive_failures
                );

                (*handler)(name, elapsed.as_millis() as u64);

                // One event per timeout window during a sustained outage.
                entry.last_heartbeat = now;
            }
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.stop();
    }
}

fn default_fault_handler(name: &str, elapsed_ms: u64) {
    crit!(target: "MA", "event=watchdog_fault,task={},elapsed_ms={}", name, elapsed_ms);
}
