//! Local HMI snapshot task.
//!
//! Periodically consolidates the latest sample, truck state and actuator
//! command into a single structured status record. With `VISUAL_UI` set it
//! additionally renders a compact ANSI status block for an operator
//! terminal; that rendering is pure formatting on top of the record.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::sync::OnceLock;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::buffer::RingBuffer;
use crate::health::perf_monitor::PerfMonitor;
use crate::tasks::{periodic_sleeper, spawn_task};
use crate::types::{ActuatorCommand, FilteredSample, TruckState};

pub const TASK_NAME: &str = "LocalHmi";
pub const DEFAULT_PERIOD_MS: u64 = 1000;

#[derive(Clone, Copy, Default)]
struct HmiSnapshot {
    truck: TruckState,
    actuator: ActuatorCommand,
    latest: FilteredSample,
    buffered: usize,
}

struct HmiShared {
    buffer: Arc<RingBuffer>,
    perf: Arc<PerfMonitor>,
    period: Duration,
    running: AtomicBool,
    snapshot: Mutex<HmiSnapshot>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

pub struct LocalHmi {
    shared: Arc<HmiShared>,
}

impl LocalHmi {
    pub fn new(buffer: Arc<RingBuffer>, perf: Arc<PerfMonitor>, period_ms: u64) -> Self {
        log::info!(target: "LI", "event=init,period_ms={}", period_ms);
        Self {
            shared: Arc::new(HmiShared {
                buffer,
                perf,
                period: Duration::from_millis(period_ms),
                running: AtomicBool::new(false),
                snapshot: Mutex::new(HmiSnapshot::default()),
                handle: Mutex::new(None),
            }),
        }
    }

    pub fn set_truck_state(&self, state: TruckState) {
        self.shared.snapshot.lock().truck = state;
    }

    pub fn set_actuator_output(&self, output: ActuatorCommand) {
        self.shared.snapshot.lock().actuator = output;
    }

    pub fn start(&self) {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let shared = self.shared.clone();
        let handle = spawn_task(TASK_NAME, "LI", None, move || shared.run());
        *self.shared.handle.lock() = Some(handle);
        log::info!(target: "LI", "event=start");
    }

    pub fn stop(&self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }

        if let Some(handle) = self.shared.handle.lock().take() {
            let _ = handle.join();
        }
        log::info!(target: "LI", "event=stop");
    }
}

impl HmiShared {
    fn run(&self) {
        let sleeper = periodic_sleeper();
        let mut next_wake = Instant::now() + self.period;

        while self.running.load(Ordering::Acquire) {
            let start = Instant::now();

            let buffered = self.buffer.size();
            let sample = self.buffer.peek_latest();

            let snapshot = {
                let mut snap = self.snapshot.lock();
                snap.latest = sample;
                snap.buffered = buffered;
                *snap
            };

            emit_status(&snapshot);
            if visual_enabled() {
                render_visual(&snapshot);
            }

            self.perf.end_iteration(TASK_NAME, start);

            let now = Instant::now();
            if now < next_wake {
                sleeper.sleep(next_wake - now);
            }
            next_wake += self.period;
        }
    }
}

fn emit_status(snap: &HmiSnapshot) {
    log::info!(
        target: "LI",
        "status=snapshot,mode={},fault={},x={},y={},ang={},temp={},elec={},hydr={},acc={},str={},arr={},buf={}",
        if snap.truck.automatic { "AUTO" } else { "MAN" },
        snap.truck.fault as u8,
        snap.latest.position_x,
        snap.latest.position_y,
        snap.latest.angle_x,
        snap.latest.temperature,
        snap.latest.fault_electrical as u8,
        snap.latest.fault_hydraulic as u8,
        snap.actuator.velocity,
        snap.actuator.steering,
        snap.actuator.arrived as u8,
        snap.buffered
    );
}

fn visual_enabled() -> bool {
    static ENABLED: OnceLock<bool> = OnceLock::new();
    *ENABLED.get_or_init(|| {
        matches!(
            std::env::var("VISUAL_UI").as_deref(),
            Ok("1") | Ok("true") | Ok("TRUE")
        )
    })
}

fn render_visual(snap: &HmiSnapshot) {
    let mode = if snap.truck.fault {
        "\x1b[1;31mFAULT\x1b[0m"
    } else if snap.truck.automatic {
        "\x1b[1;32mAUTO\x1b[0m"
    } else {
        "\x1b[1;33mMANUAL\x1b[0m"
    };

    let temp = if snap.latest.temperature > 120 {
        format!("\x1b[1;31mTEMP:{}C[CRIT]\x1b[0m", snap.latest.temperature)
    } else if snap.latest.temperature > 95 {
        format!("\x1b[1;33mTEMP:{}C[WARN]\x1b[0m", snap.latest.temperature)
    } else {
        format!("TEMP:{}C", snap.latest.temperature)
    };

    println!("\x1b[2J\x1b[1;1H=== TRUCK [{}] ===", mode);
    println!(
        "POS:({},{}) HDG:{} {}{}{}",
        snap.latest.position_x,
        snap.latest.position_y,
        snap.latest.angle_x,
        temp,
        if snap.latest.fault_electrical { " [ELEC]" } else { "" },
        if snap.latest.fault_hydraulic { " [HYDR]" } else { "" },
    );
    println!(
        "ACC:{:>4}% STR:{:>4} {}",
        snap.actuator.velocity,
        snap.actuator.steering,
        if snap.actuator.arrived { "[ARRIVED]" } else { "" },
    );
}
