//! Navigation task: rotate-then-translate controller against the active
//! setpoint.
//!
//! Two-phase tracking: align the heading with the bearing to the target
//! first, then drive forward at a fixed cruise speed until inside the
//! arrival radius. Outside automatic mode (or under fault) the task holds
//! a bumpless-transfer posture: the setpoint continuously re-aligns with
//! the measured position so re-entering automatic never steps the output.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::buffer::RingBuffer;
use crate::health::{perf_monitor::PerfMonitor, watchdog::Watchdog};
use crate::tasks::{periodic_sleeper, spawn_task, FaultAlert};
use crate::types::{ActuatorCommand, FilteredSample, NavigationSetpoint, TruckState};

pub const TASK_NAME: &str = "Navigation";
pub const DEFAULT_PERIOD_MS: u64 = 10;
const PRIORITY: u8 = 70;

/// Distance at which the target counts as reached, in world units.
const ARRIVAL_RADIUS: f64 = 5.0;
/// Heading error below which rotation promotes to translation.
const ALIGN_THRESHOLD_DEG: i32 = 5;
/// Heading error above which translation demotes back to rotation.
const REALIGN_THRESHOLD_DEG: i32 = 10;
/// Fixed cruise velocity, percent.
const CRUISE_VELOCITY: i32 = 30;
/// Fixed steering effort while rotating, steering units.
const ROTATION_EFFORT: i32 = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NavPhase {
    Rotating,
    Moving,
    Arrived,
}

struct NavState {
    setpoint: NavigationSetpoint,
    truck: TruckState,
    output: ActuatorCommand,
    phase: NavPhase,
    arrival_logged: bool,
}

struct NavShared {
    buffer: Arc<RingBuffer>,
    watchdog: Arc<Watchdog>,
    perf: Arc<PerfMonitor>,
    period: Duration,
    running: AtomicBool,
    alert: FaultAlert,
    control: Mutex<NavState>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

pub struct Navigation {
    shared: Arc<NavShared>,
}

impl Navigation {
    pub fn new(
        buffer: Arc<RingBuffer>,
        watchdog: Arc<Watchdog>,
        perf: Arc<PerfMonitor>,
        period_ms: u64,
    ) -> Self {
        log::info!(target: "NC", "event=init,period_ms={}", period_ms);
        Self {
            shared: Arc::new(NavShared {
                buffer,
                watchdog,
                perf,
                period: Duration::from_millis(period_ms),
                running: AtomicBool::new(false),
                alert: FaultAlert::default(),
                control: Mutex::new(NavState {
                    setpoint: NavigationSetpoint::default(),
                    truck: TruckState::default(),
                    output: ActuatorCommand::default(),
                    phase: NavPhase::Rotating,
                    arrival_logged: false,
                }),
                handle: Mutex::new(None),
            }),
        }
    }

    /// Mailbox the fault monitor's callback raises hard fault edges on.
    pub fn alert(&self) -> FaultAlert {
        self.shared.alert.clone()
    }

    /// Replaces the tracked target. A changed x/y counts as a new target:
    /// the controller restarts in the rotating phase with the arrival flag
    /// cleared.
    pub fn set_setpoint(&self, setpoint: NavigationSetpoint) {
        let mut control = self.shared.control.lock();

        let new_target = setpoint.target_x != control.setpoint.target_x
            || setpoint.target_y != control.setpoint.target_y;
        control.setpoint = setpoint;

        if new_target {
            control.phase = NavPhase::Rotating;
            control.output.arrived = false;
            control.arrival_logged = false;
        }
    }

    pub fn set_truck_state(&self, state: TruckState) {
        self.shared.control.lock().truck = state;
    }

    pub fn get_output(&self) -> ActuatorCommand {
        self.shared.control.lock().output
    }

    pub fn start(&self) {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let shared = self.shared.clone();
        let handle = spawn_task(TASK_NAME, "NC", Some(PRIORITY), move || shared.run());
        *self.shared.handle.lock() = Some(handle);
    }

    pub fn stop(&self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }

        if let Some(handle) = self.shared.handle.lock().take() {
            let _ = handle.join();
        }
        log::info!(target: "NC", "event=stop");
    }

    #[cfg(test)]
    fn tick_with(&self, sample: FilteredSample) {
        let alerted = self.shared.alert.take().is_latching();
        step(&mut self.shared.control.lock(), sample, alerted);
    }

    #[cfg(test)]
    fn setpoint(&self) -> NavigationSetpoint {
        self.shared.control.lock().setpoint
    }
}

impl NavShared {
    fn run(&self) {
        let sleeper = periodic_sleeper();
        let mut next_wake = Instant::now() + self.period;

        while self.running.load(Ordering::Acquire) {
            let start = Instant::now();

            let sample = self.buffer.peek_latest();
            let alerted = self.alert.take().is_latching();
            step(&mut self.control.lock(), sample, alerted);

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

/// One controller iteration over the given sample.
fn step(state: &mut NavState, sample: FilteredSample, alerted: bool) {
    let enabled = state.truck.automatic && !state.truck.fault && !alerted;

    if !enabled {
        // Bumpless transfer: track the measurement so a later hand-back to
        // automatic starts from zero error.
        state.setpoint.target_x = sample.position_x;
        state.setpoint.target_y = sample.position_y;
        state.setpoint.target_heading = sample.angle_x;
        state.output = ActuatorCommand::default();
        state.phase = NavPhase::Rotating;
        state.arrival_logged = false;
        return;
    }

    if state.phase == NavPhase::Arrived {
        // Latched until a new target arrives.
        state.output = ActuatorCommand {
            velocity: 0,
            steering: 0,
            arrived: true,
        };
        return;
    }

    let dx = (state.setpoint.target_x - sample.position_x) as f64;
    let dy = (state.setpoint.target_y - sample.position_y) as f64;
    let distance = (dx * dx + dy * dy).sqrt();

    if distance <= ARRIVAL_RADIUS {
        state.phase = NavPhase::Arrived;
        state.output = ActuatorCommand {
            velocity: 0,
            steering: 0,
            arrived: true,
        };
        if !state.arrival_logged {
            log::info!(
                target: "NC",
                "event=arrived,dist={},x={},y={}",
                distance as i64, sample.position_x, sample.position_y
            );
            state.arrival_logged = true;
        }
        return;
    }

    let desired = normalize_360(bearing_deg(dx, dy));
    let error = heading_error(desired, sample.angle_x);

    match state.phase {
        NavPhase::Rotating => {
            state.output.velocity = 0;
            if error.abs() <= ALIGN_THRESHOLD_DEG {
                state.phase = NavPhase::Moving;
                state.output.steering = 0;
            } else {
                state.output.steering = rotation_effort(error);
            }
        }
        NavPhase::Moving => {
            if error.abs() > REALIGN_THRESHOLD_DEG {
                state.phase = NavPhase::Rotating;
                state.output.velocity = 0;
                state.output.steering = rotation_effort(error);
            } else {
                state.output.velocity = CRUISE_VELOCITY;
                state.output.steering = 0;
            }
        }
        NavPhase::Arrived => unreachable!("arrived handled before dispatch"),
    }
    state.output.arrived = false;
}

fn rotation_effort(error: i32) -> i32 {
    if error > 0 {
        ROTATION_EFFORT
    } else {
        -ROTATION_EFFORT
    }
}

fn bearing_deg(dx: f64, dy: f64) -> i32 {
    dy.atan2(dx).to_degrees() as i32
}

fn normalize_360(degrees: i32) -> i32 {
    ((degrees % 360) + 360) % 360
}

/// Signed heading error in (-180, 180]; never produces -180.
fn heading_error(desired: i32, current: i32) -> i32 {
    let mut error = (desired - current) % 360;
    if error > 180 {
        error -= 360;
    } else if error <= -180 {
        error += 360;
    }
    error
}
