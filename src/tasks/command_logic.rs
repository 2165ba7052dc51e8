//! Command logic task: the truck's mode/fault state machine and the final
//! actuator arbiter.
//!
//! States: (manual, ok), (auto, ok), (fault). Fault is dominant: it forces
//! a safe actuator posture (velocity 0, steering 0) and only clears after
//! the operator rearms while the fault condition is gone.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::buffer::RingBuffer;
use crate::crit;
use crate::health::{perf_monitor::PerfMonitor, watchdog::Watchdog};
use crate::tasks::{periodic_sleeper, spawn_task, FaultAlert};
use crate::types::{ActuatorCommand, FilteredSample, OperatorCommand, TruckState};

pub const TASK_NAME: &str = "CommandLogic";
pub const DEFAULT_PERIOD_MS: u64 = 10;
const PRIORITY: u8 = 80;

#[derive(Default)]
struct CommandState {
    truck: TruckState,
    actuator: ActuatorCommand,
    latest: FilteredSample,
    pending: OperatorCommand,
    navigation: ActuatorCommand,
    command_pending: bool,
    rearm_acked: bool,
}

struct CommandShared {
    buffer: Arc<RingBuffer>,
    watchdog: Arc<Watchdog>,
    perf: Arc<PerfMonitor>,
    period: Duration,
    running: AtomicBool,
    alert: FaultAlert,
    state: Mutex<CommandState>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

pub struct CommandLogic {
    shared: Arc<CommandShared>,
}

impl CommandLogic {
    pub fn new(
        buffer: Arc<RingBuffer>,
        watchdog: Arc<Watchdog>,
        perf: Arc<PerfMonitor>,
        period_ms: u64,
    ) -> Self {
        log::info!(target: "CL", "event=init,period_ms={}", period_ms);
        Self {
            shared: Arc::new(CommandShared {
                buffer,
                watchdog,
                perf,
                period: Duration::from_millis(period_ms),
                running: AtomicBool::new(false),
                alert: FaultAlert::default(),
                state: Mutex::new(CommandState::default()),
                handle: Mutex::new(None),
            }),
        }
    }

    /// Mailbox the fault monitor's callback raises hard fault edges on.
    pub fn alert(&self) -> FaultAlert {
        self.shared.alert.clone()
    }

    /// Queues an operator command; applied once on the next iteration.
    pub fn set_command(&self, command: OperatorCommand) {
        let mut state = self.shared.state.lock();
        state.pending = command;
        state.command_pending = true;
    }

    pub fn get_state(&self) -> TruckState {
        self.shared.state.lock().truck
    }

    pub fn get_actuator_output(&self) -> ActuatorCommand {
        self.shared.state.lock().actuator
    }

    pub fn latest_sample(&self) -> FilteredSample {
        self.shared.state.lock().latest
    }

    /// Freshest navigation output, adopted verbatim while in automatic mode.
    pub fn set_navigation_output(&self, output: ActuatorCommand) {
        self.shared.state.lock().navigation = output;
    }

    pub fn start(&self) {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let shared = self.shared.clone();
        let handle = spawn_task(TASK_NAME, "CL", Some(PRIORITY), move || shared.run());
        *self.shared.handle.lock() = Some(handle);
    }

    pub fn stop(&self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }

        if let Some(handle) = self.shared.handle.lock().take() {
            let _ = handle.join();
        }
        log::info!(target: "CL", "event=stop");
    }

    #[cfg(test)]
    fn tick_with(&self, sample: FilteredSample) {
        let alerted = self.shared.alert.take().is_latching();
        step(&mut self.shared.state.lock(), sample, alerted);
    }
}

impl CommandShared {
    fn run(&self) {
        let sleeper = periodic_sleeper();
        let mut next_wake = Instant::now() + self.period;

        while self.running.load(Ordering::Acquire) {
            let start = Instant::now();

            let sample = self.buffer.peek_latest();
            let alerted = self.alert.take().is_latching();
            step(&mut self.state.lock(), sample, alerted);

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

/// One state-machine iteration over the given sample. `alerted` carries a
/// latching fault edge broadcast out-of-band by the fault monitor.
fn step(state: &mut CommandState, sample: FilteredSample, alerted: bool) {
    state.latest = sample;

    let fault_condition = sample.temperature > 120
        || sample.fault_electrical
        || sample.fault_hydraulic
        || alerted;

    if state.command_pending {
        apply_command(state);
        state.command_pending = false;
    }

    if fault_condition {
        if !state.truck.fault {
            crit!(target: "CL", "event=fault_detect");
        }
        state.truck.fault = true;
        state.rearm_acked = false;
    } else if state.truck.fault && state.rearm_acked {
        log::info!(target: "CL", "event=fault_clear");
        state.truck.fault = false;
        state.rearm_acked = false;
    }

    compute_actuator(state);
}

fn apply_command(state: &mut CommandState) {
    if state.pending.auto_mode && !state.truck.automatic {
        if !state.truck.fault {
            state.truck.automatic = true;
            log::info!(target: "CL", "event=mode_change,mode=auto");
        } else {
            log::warn!(target: "CL", "event=mode_reject,reason=fault");
        }
    }

    if state.pending.manual_mode && state.truck.automatic {
        state.truck.automatic = false;
        // Manual deltas accumulate on the stored steering; dropping it here
        // keeps them from inheriting an automatic-mode bias.
        state.actuator.steering = 0;
        log::info!(target: "CL", "event=mode_change,mode=manual");
    }

    if state.pending.rearm && state.truck.fault {
        state.rearm_acked = true;
        log::info!(target: "CL", "event=rearm_ack");
    }
}

fn compute_actuator(state: &mut CommandState) {
    if state.truck.fault {
        state.actuator = ActuatorCommand {
            velocity: 0,
            steering: 0,
            arrived: state.navigation.arrived,
        };
    } else if state.truck.automatic {
        state.actuator = state.navigation;
    } else {
        state.actuator.velocity = state.pending.accelerate.clamp(-100, 100);
        let delta = state.pending.steer_left - state.pending.steer_right;
        state.actuator.steering = (state.actuator.steering + delta).clamp(-180, 180);
        state.actuator.arrived = state.navigation.arrived;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn logic() -> CommandLogic {
        CommandLogic::new(
            Arc::new(RingBuffer::new()),
            Arc::new(Watchdog::new(100)),
            Arc::new(PerfMonitor::new()),
            DEFAULT_PERIOD_MS,
        )
    }

    fn healthy() -> FilteredSample {
        FilteredSample {
            temperature: 80,
            ..FilteredSample::default()
        }
    }

    fn overheated() -> FilteredSample {
        FilteredSample {
            temperature: 121,
            ..FilteredSample::default()
        }
    }

    fn request(update: impl FnOnce(&mut OperatorCommand)) -> OperatorCommand {
        let mut command = OperatorCommand::default();
        update(&mut command);
        command
    }

    #[test]
    fn starts_manual_without_fault() {
        let logic = logic();
        let state = logic.get_state();
        assert!(!state.automatic);
        assert!(!state.fault);
    }

    #[test]
    fn auto_request_switches_mode_unless_faulted() {
        let logic1 = logic();
        logic1.set_command(request(|c| c.auto_mode = true));
        logic1.tick_with(healthy());
        assert!(logic1.get_state().automatic);

        // Faulted truck rejects the same request.
        let logic2 = logic();
        logic2.tick_with(overheated());
        logic2.set_command(request(|c| c.auto_mode = true));
        logic2.tick_with(overheated());
        assert!(!logic2.get_state().automatic);
        assert!(logic2.get_state().fault);
    }

    #[test]
    fn fault_forces_safe_actuator_posture() {
        let logic = logic();
        logic.set_command(request(|c| c.auto_mode = true));
        logic.tick_with(healthy());
        logic.set_navigation_output(ActuatorCommand {
            velocity: 30,
            steering: 10,
            arrived: false,
        });
        logic.tick_with(healthy());
        assert_eq!(logic.get_actuator_output().velocity, 30);

        logic.tick_with(overheated());
        let actuator = logic.get_actuator_output();
        assert_eq!(actuator.velocity, 0);
        assert_eq!(actuator.steering, 0);
    }

    #[test]
    fn rearm_clears_fault_only_after_condition_clears() {
        let logic = logic();
        logic.set_command(request(|c| c.auto_mode = true));
        logic.tick_with(healthy());
        logic.tick_with(overheated());
        assert!(logic.get_state().fault);

        // Rearm while still hot: fault holds.
        logic.set_command(request(|c| c.rearm = true));
        logic.tick_with(overheated());
        assert!(logic.get_state().fault);

        // Temperature recovers, rearm again: fault clears, mode survives.
        logic.set_command(request(|c| c.rearm = true));
        logic.tick_with(healthy());
        let state = logic.get_state();
        assert!(!state.fault);
        assert!(state.automatic);
    }

    #[test]
    fn rearm_ack_is_cancelled_by_a_new_fault_cycle() {
        let logic = logic();
        logic.tick_with(overheated());
        logic.set_command(request(|c| c.rearm = true));
        logic.tick_with(healthy());
        assert!(!logic.get_state().fault);

        // The earlier ack must not clear a fresh fault.
        logic.tick_with(overheated());
        assert!(logic.get_state().fault);
        logic.tick_with(healthy());
        assert!(logic.get_state().fault);
    }

    #[test]
    fn manual_mode_integrates_steering_deltas_with_clamps() {
        let logic = logic();
        logic.set_command(request(|c| {
            c.accelerate = 250;
            c.steer_left = 30;
        }));
        logic.tick_with(healthy());

        let actuator = logic.get_actuator_output();
        assert_eq!(actuator.velocity, 100);
        assert_eq!(actuator.steering, 30);

        // Deltas accumulate each cycle until the clamp.
        for _ in 0..10 {
            logic.tick_with(healthy());
        }
        assert_eq!(logic.get_actuator_output().steering, 180);
    }

    #[test]
    fn manual_steering_base_resets_on_mode_change() {
        let logic = logic();
        logic.set_command(request(|c| c.auto_mode = true));
        logic.tick_with(healthy());
        logic.set_navigation_output(ActuatorCommand {
            velocity: 30,
            steering: 40,
            arrived: false,
        });
        logic.tick_with(healthy());
        assert_eq!(logic.get_actuator_output().steering, 40);

        logic.set_command(request(|c| {
            c.manual_mode = true;
            c.steer_left = 5;
        }));
        logic.tick_with(healthy());
        // First manual delta applies on a zero base, not on the 40° the
        // navigation controller left behind.
        assert_eq!(logic.get_actuator_output().steering, 5);
    }

    #[test]
    fn hard_fault_alert_latches_even_on_a_stale_healthy_sample() {
        let logic = logic();
        logic.alert().raise(crate::types::FaultKind::Electrical);
        logic.tick_with(healthy());
        assert!(logic.get_state().fault);
    }

    #[test]
    fn automatic_mode_adopts_navigation_output_verbatim() {
        let logic = logic();
        logic.set_command(request(|c| c.auto_mode = true));
        logic.tick_with(healthy());

        let output = ActuatorCommand {
            velocity: 30,
            steering: -12,
            arrived: true,
        };
        logic.set_navigation_output(output);
        logic.tick_with(healthy());
        assert_eq!(logic.get_actuator_output(), output);
    }
}
