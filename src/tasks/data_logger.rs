//! Data logger task: appends event rows to the truck's CSV log.
//!
//! Rows come from two paths: the periodic status row written by the task
//! itself, and synchronous `log_event` calls made by the coordinator and by
//! fault callbacks. Both serialize under the file lock. If the file cannot
//! be opened the task keeps running in a degraded no-op mode; a logging
//! failure must never take the vehicle down.

use std::fs::{File, OpenOptions};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

use crate::buffer::RingBuffer;
use crate::health::{perf_monitor::PerfMonitor, watchdog::Watchdog};
use crate::logfmt;
use crate::tasks::{periodic_sleeper, spawn_task};
use crate::types::TruckState;

pub const TASK_NAME: &str = "DataLogger";
pub const DEFAULT_PERIOD_MS: u64 = 500;

const HEADER: [&str; 6] = [
    "Timestamp",
    "TruckID",
    "State",
    "PositionX",
    "PositionY",
    "Description",
];

#[derive(Serialize)]
struct EventRow<'a> {
    timestamp: i64,
    truck_id: i32,
    state: &'a str,
    position_x: i32,
    position_y: i32,
    description: &'a str,
}

struct LoggerShared {
    buffer: Arc<RingBuffer>,
    watchdog: Arc<Watchdog>,
    perf: Arc<PerfMonitor>,
    period: Duration,
    truck_id: i32,
    path: PathBuf,
    running: AtomicBool,
    state: Mutex<TruckState>,
    sink: Mutex<Option<csv::Writer<File>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

pub struct DataLogger {
    shared: Arc<LoggerShared>,
}

impl DataLogger {
    pub fn new(
        buffer: Arc<RingBuffer>,
        watchdog: Arc<Watchdog>,
        perf: Arc<PerfMonitor>,
        truck_id: i32,
        period_ms: u64,
    ) -> Self {
        let path = PathBuf::from(format!("logs/truck_{}_log.csv", truck_id));
        log::info!(
            target: "DC",
            "event=init,truck_id={},period_ms={},file={}",
            truck_id, period_ms, path.display()
        );
        Self {
            shared: Arc::new(LoggerShared {
                buffer,
                watchdog,
                perf,
                period: Duration::from_millis(period_ms),
                truck_id,
                path,
                running: AtomicBool::new(false),
                state: Mutex::new(TruckState::default()),
                sink: Mutex::new(None),
                handle: Mutex::new(None),
            }),
        }
    }

    pub fn set_truck_state(&self, state: TruckState) {
        *self.shared.state.lock() = state;
    }

    /// Appends one event row. Safe to call from any thread; a no-op while
    /// degraded.
    pub fn log_event(&self, state: &str, position_x: i32, position_y: i32, description: &str) {
        self.shared.write_row(state, position_x, position_y, description);
    }

    pub fn start(&self) {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return;
        }

        self.shared.open_sink();

        let shared = self.shared.clone();
        let handle = spawn_task(TASK_NAME, "DC", None, move || shared.run());
        *self.shared.handle.lock() = Some(handle);
        log::info!(target: "DC", "event=start");
    }

    pub fn stop(&self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }

        if let Some(handle) = self.shared.handle.lock().take() {
            let _ = handle.join();
        }

        // Close the sink; the writer flushes on drop.
        self.shared.sink.lock().take();
        log::info!(target: "DC", "event=stop");
    }
}

impl LoggerShared {
    fn open_sink(&self) {
        let mut sink = self.sink.lock();
        if sink.is_some() {
            return;
        }

        match self.try_open() {
            Ok(writer) => {
                log::debug!(target: "DC", "event=file_open,file={}", self.path.display());
                *sink = Some(writer);
            }
            Err(err) => {
                log::error!(
                    target: "DC",
                    "event=file_err,file={},err={}",
                    self.path.display(), err
                );
            }
        }
    }

    fn try_open(&self) -> std::io::Result<csv::Writer<File>> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let empty = file.metadata()?.len() == 0;

        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        if empty {
            writer.write_record(HEADER)?;
            writer.flush()?;
        }
        Ok(writer)
    }

    fn write_row(&self, state: &str, position_x: i32, position_y: i32, description: &str) {
        let mut sink = self.sink.lock();
        let Some(writer) = sink.as_mut() else {
            return;
        };

        let row = EventRow {
            timestamp: logfmt::timestamp_ms(),
            truck_id: self.truck_id,
            state,
            position_x,
            position_y,
            description,
        };
        let _ = writer.serialize(row);
        let _ = writer.flush();
    }

    fn run(&self) {
        let sleeper = periodic_sleeper();
        let mut next_wake = Instant::now() + self.period;

        while self.running.load(Ordering::Acquire) {
            let start = Instant::now();

            let sample = self.buffer.peek_latest();
            let state = *self.state.lock();
            let state_str = if state.fault {
                "FAULT"
            } else if state.automatic {
                "AUTO"
            } else {
                "MANUAL"
            };

            self.write_row(
                state_str,
                sample.position_x,
                sample.position_y,
                "Periodic status update",
            );

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

#[cfg(test)]
mod tests {
    use super::*;

    fn shared_at(path: PathBuf) -> LoggerShared {
        LoggerShared {
            buffer: Arc::new(RingBuffer::new()),
            watchdog: Arc::new(Watchdog::new(100)),
            perf: Arc::new(PerfMonitor::new()),
            period: Duration::from_millis(100),
            truck_id: 7,
            path,
            running: AtomicBool::new(false),
            state: Mutex::new(TruckState::default()),
            sink: Mutex::new(None),
            handle: Mutex::new(None),
        }
    }

    fn scratch_path(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "haul_core_logger_{}_{}.csv",
            tag,
            std::process::id()
        ))
    }

    #[test]
    fn header_written_only_into_an_empty_file() {
        let path = scratch_path("header");
        let _ = std::fs::remove_file(&path);

        let first = shared_at(path.clone());
        first.open_sink();
        first.write_row("MANUAL", 1, 2, "first");
        first.sink.lock().take();

        // Append-reopen: the file is no longer empty, no second header.
        let second = shared_at(path.clone());
        second.open_sink();
        second.write_row("AUTO", 3, 4, "second");
        second.sink.lock().take();

        let contents = std::fs::read_to_string(&path).unwrap();
        let mut lines = contents.lines();
        assert_eq!(
            lines.next().unwrap(),
            "Timestamp,TruckID,State,PositionX,PositionY,Description"
        );
        let headers = contents
            .lines()
            .filter(|l| l.starts_with("Timestamp,"))
            .count();
        assert_eq!(headers, 1);
        assert!(contents.contains(",7,MANUAL,1,2,first"));
        assert!(contents.contains(",7,AUTO,3,4,second"));

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn degraded_logger_swallows_events() {
        // Sink never opened: rows must be silent no-ops.
        let shared = shared_at(scratch_path("degraded"));
        shared.write_row("OK", 0, 0, "dropped");
        assert!(shared.sink.lock().is_none());
    }

    #[test]
    fn fault_row_uses_fault_state_string() {
        let path = scratch_path("state");
        let _ = std::fs::remove_file(&path);

        let shared = shared_at(path.clone());
        shared.open_sink();
        *shared.state.lock() = TruckState {
            fault: true,
            automatic: true,
        };

        let state = *shared.state.lock();
        let state_str = if state.fault {
            "FAULT"
        } else if state.automatic {
            "AUTO"
        } else {
            "MANUAL"
        };
        shared.write_row(state_str, 10, 20, "Periodic status update");
        shared.sink.lock().take();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains(",7,FAULT,10,20,Periodic status update"));

        let _ = std::fs::remove_file(&path);
    }
}
