//! Coordinator: constructs the control core, pumps the boundary, and
//! orchestrates startup and shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::info;

use haul_core::bridge::MessageBridge;
use haul_core::buffer::RingBuffer;
use haul_core::health::perf_monitor::PerfMonitor;
use haul_core::health::watchdog::Watchdog;
use haul_core::logfmt;
use haul_core::planner::{bearing_deg, RoutePlanner};
use haul_core::tasks::command_logic::{self, CommandLogic};
use haul_core::tasks::data_logger::{self, DataLogger};
use haul_core::tasks::fault_monitor::{self, FaultMonitor};
use haul_core::tasks::local_hmi::{self, LocalHmi};
use haul_core::tasks::navigation::{self, Navigation};
use haul_core::tasks::sensor_filter::{self, SensorFilter};
use haul_core::types::NavigationSetpoint;

const INBOUND_DIR: &str = "bridge/from_mqtt";
const OUTBOUND_DIR: &str = "bridge/to_mqtt";

const MAIN_PERIOD_MS: u64 = 100;
/// Outbound change-detection is overridden by a full refresh every N polls.
const FORCED_REFRESH_EVERY: u64 = 4;

const WATCHDOG_CHECK_MS: u64 = 100;

fn parse_truck_id() -> i32 {
    match std::env::args().nth(1) {
        Some(raw) => match raw.parse::<i32>() {
            Ok(id) => id,
            Err(_) => {
                log::warn!(target: "MA", "event=bad_truck_id,value={},using=1", raw);
                1
            }
        },
        None => 1,
    }
}

fn main() {
    logfmt::init();

    let truck_id = parse_truck_id();
    info!(target: "MA", "event=startup,truck_id={}", truck_id);

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::set_handler(move || {
            running.store(false, Ordering::Relaxed);
        })
        .expect("install interrupt handler");
    }

    let buffer = Arc::new(RingBuffer::new());
    let watchdog = Arc::new(Watchdog::new(WATCHDOG_CHECK_MS));
    let perf = Arc::new(PerfMonitor::new());
    let planner = RoutePlanner::new();
    let bridge = MessageBridge::new(INBOUND_DIR, OUTBOUND_DIR, truck_id);

    let sensor = SensorFilter::new(
        buffer.clone(),
        watchdog.clone(),
        perf.clone(),
        sensor_filter::DEFAULT_PERIOD_MS,
        sensor_filter::DEFAULT_FILTER_ORDER,
    );
    let command = CommandLogic::new(
        buffer.clone(),
        watchdog.clone(),
        perf.clone(),
        command_logic::DEFAULT_PERIOD_MS,
    );
    let faults = FaultMonitor::new(
        buffer.clone(),
        watchdog.clone(),
        perf.clone(),
        fault_monitor::DEFAULT_PERIOD_MS,
    );
    let nav = Navigation::new(
        buffer.clone(),
        watchdog.clone(),
        perf.clone(),
        navigation::DEFAULT_PERIOD_MS,
    );
    let logger = Arc::new(DataLogger::new(
        buffer.clone(),
        watchdog.clone(),
        perf.clone(),
        truck_id,
        data_logger::DEFAULT_PERIOD_MS,
    ));
    let hmi = LocalHmi::new(buffer.clone(), perf.clone(), local_hmi::DEFAULT_PERIOD_MS);

    watchdog.register_task(sensor_filter::TASK_NAME, 10 * sensor_filter::DEFAULT_PERIOD_MS);
    watchdog.register_task(command_logic::TASK_NAME, 10 * command_logic::DEFAULT_PERIOD_MS);
    watchdog.register_task(fault_monitor::TASK_NAME, 10 * fault_monitor::DEFAULT_PERIOD_MS);
    watchdog.register_task(navigation::TASK_NAME, 10 * navigation::DEFAULT_PERIOD_MS);
    watchdog.register_task(data_logger::TASK_NAME, 5 * data_logger::DEFAULT_PERIOD_MS);

    perf.register_task(sensor_filter::TASK_NAME, sensor_filter::DEFAULT_PERIOD_MS);
    perf.register_task(command_logic::TASK_NAME, command_logic::DEFAULT_PERIOD_MS);
    perf.register_task(fault_monitor::TASK_NAME, fault_monitor::DEFAULT_PERIOD_MS);
    perf.register_task(navigation::TASK_NAME, navigation::DEFAULT_PERIOD_MS);
    perf.register_task(data_logger::TASK_NAME, data_logger::DEFAULT_PERIOD_MS);
    perf.register_task(local_hmi::TASK_NAME, local_hmi::DEFAULT_PERIOD_MS);

    // Fault edges fan out over lock-free mailboxes plus the event log; the
    // callback runs on the fault monitor's thread and must stay that cheap.
    {
        let command_alert = command.alert();
        let nav_alert = nav.alert();
        let event_log = logger.clone();
        faults.register_fault_callback(Box::new(move |kind, sample| {
            command_alert.raise(kind);
            nav_alert.raise(kind);
            event_log.log_event(
                "FAULT",
                sample.position_x,
                sample.position_y,
                &format!("Fault detected: {}", kind.code()),
            );
        }));
    }

    sensor.start();
    command.start();
    faults.start();
    nav.start();
    logger.start();
    Watchdog::start(&watchdog);
    hmi.start();

    info!(target: "MA", "event=run,period_ms={}", MAIN_PERIOD_MS);
    run_loop(
        &running, &bridge, &buffer, &planner, &sensor, &command, &nav, &logger, &hmi,
    );

    info!(target: "MA", "event=shutdown");
    print!("{}", perf.report_string());

    hmi.stop();
    watchdog.stop();
    logger.stop();
    nav.stop();
    faults.stop();
    command.stop();
    sensor.stop();

    info!(target: "MA", "event=exit");
}

#[allow(clippy::too_many_arguments)]
fn run_loop(
    running: &AtomicBool,
    bridge: &MessageBridge,
    buffer: &RingBuffer,
    planner: &RoutePlanner,
    sensor: &SensorFilter,
    command: &CommandLogic,
    nav: &Navigation,
    logger: &DataLogger,
    hmi: &LocalHmi,
) {
    let period = Duration::from_millis(MAIN_PERIOD_MS);
    let sleeper = spin_sleep::SpinSleeper::new(100_000)
        .with_spin_strategy(spin_sleep::SpinStrategy::YieldThread);
    let mut next_wake = Instant::now() + period;

    let mut iteration: u64 = 0;
    let mut last_actuator = None;
    let mut last_state = None;

    while running.load(Ordering::Relaxed) {
        // Boundary input.
        if let Some(raw) = bridge.poll_sensors() {
            sensor.set_raw(raw);
        }
        if let Some(operator) = bridge.poll_command() {
            info!(
                target: "MA",
                "event=command,auto={},manual={},rearm={}",
                operator.auto_mode as u8, operator.manual_mode as u8, operator.rearm as u8
            );
            let at = command.latest_sample();
            logger.log_event("OK", at.position_x, at.position_y, "Operator command received");
            command.set_command(operator);
        }
        if let Some((x, y, speed)) = bridge.poll_setpoint() {
            planner.set_target(x, y, speed);
            let at = command.latest_sample();
            logger.log_event(
                "OK",
                at.position_x,
                at.position_y,
                &format!("New waypoint ({}, {}) speed {}", x, y, speed),
            );
        }
        if let Some(obstacles) = bridge.poll_obstacles() {
            planner.update_obstacles(obstacles);
        }

        // Fan state between tasks: the obstacle-adjusted target into
        // navigation, truck state outward, navigation output into the
        // command arbiter, the arbiter's final command to the HMI.
        let latest = buffer.peek_latest();
        let adjusted = planner.compute_adjusted_setpoint(latest.position_x, latest.position_y);
        let heading = bearing_deg(
            latest.position_x,
            latest.position_y,
            adjusted.target_x,
            adjusted.target_y,
        );
        nav.set_setpoint(NavigationSetpoint {
            target_heading: heading,
            ..adjusted
        });

        let state = command.get_state();
        nav.set_truck_state(state);
        logger.set_truck_state(state);
        hmi.set_truck_state(state);

        command.set_navigation_output(nav.get_output());
        let actuator = command.get_actuator_output();
        hmi.set_actuator_output(actuator);

        // Boundary output: change-detection with a periodic forced refresh.
        iteration += 1;
        let refresh = iteration % FORCED_REFRESH_EVERY == 0;
        if refresh || last_actuator != Some(actuator) {
            bridge.emit_actuator(&actuator);
            last_actuator = Some(actuator);
        }
        if refresh || last_state != Some(state) {
            bridge.emit_state(&state);
            last_state = Some(state);
        }

        let now = Instant::now();
        if now < next_wake {
            sleeper.sleep(next_wake - now);
        }
        next_wake += period;
    }
}
