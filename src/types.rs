//! Shared data model passed between the control tasks.
//!
//! Every type here is a small plain-data snapshot: produced under one
//! component's lock, copied out, and consumed without holding anything.

use serde::Deserialize;

/// Unfiltered sample as delivered by the vehicle bus.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RawSample {
    pub position_x: i32,
    pub position_y: i32,
    /// Heading in integer degrees, 0 = east.
    pub angle_x: i32,
    /// Engine temperature in °C, nominal range -100..=200.
    pub temperature: i32,
    pub fault_electrical: bool,
    pub fault_hydraulic: bool,
}

impl Default for RawSample {
    fn default() -> Self {
        // Ambient engine temperature until the bus delivers a real sample.
        Self {
            position_x: 0,
            position_y: 0,
            angle_x: 0,
            temperature: 20,
            fault_electrical: false,
            fault_hydraulic: false,
        }
    }
}

/// Noise-filtered sample stored in the ring buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilteredSample {
    pub position_x: i32,
    pub position_y: i32,
    pub angle_x: i32,
    pub temperature: i32,
    pub fault_electrical: bool,
    pub fault_hydraulic: bool,
    /// Wall-clock milliseconds since the epoch, stamped by the filter task.
    pub timestamp_ms: i64,
}

/// Operator request applied once by the command logic task.
#[derive(Debug, Clone, Copy, Default)]
pub struct OperatorCommand {
    pub auto_mode: bool,
    pub manual_mode: bool,
    pub rearm: bool,
    /// Manual acceleration request, clamped to -100..=100 on use.
    pub accelerate: i32,
    pub steer_left: i32,
    pub steer_right: i32,
}

/// Final propulsion/steering command handed to the boundary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActuatorCommand {
    /// Percent, -100..=100. Spelled `acceleration` on the wire.
    pub velocity: i32,
    /// Degrees, -180..=180.
    pub steering: i32,
    pub arrived: bool,
}

/// Mode/fault state maintained by command logic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TruckState {
    pub fault: bool,
    pub automatic: bool,
}

/// Target the navigation controller tracks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NavigationSetpoint {
    pub target_x: i32,
    pub target_y: i32,
    /// Percent.
    pub target_speed: i32,
    /// Degrees.
    pub target_heading: i32,
}

/// Obstacle reported by the supervisory side, in world coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Obstacle {
    pub id: i32,
    pub x: i32,
    pub y: i32,
}

/// Fault classification broadcast by the fault monitor on edge changes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FaultKind {
    #[default]
    None,
    TemperatureWarning,
    TemperatureCritical,
    Electrical,
    Hydraulic,
}

impl FaultKind {
    /// Short code used in log lines and event rows.
    pub fn code(self) -> &'static str {
        match self {
            FaultKind::None => "NONE",
            FaultKind::TemperatureWarning => "TEMP_WRN",
            FaultKind::TemperatureCritical => "TEMP_CRT",
            FaultKind::Electrical => "ELEC",
            FaultKind::Hydraulic => "HYDR",
        }
    }

    /// True for classifications that also latch the command-logic fault
    /// state (everything but the temperature pre-warning).
    pub fn is_latching(self) -> bool {
        matches!(
            self,
            FaultKind::TemperatureCritical | FaultKind::Electrical | FaultKind::Hydraulic
        )
    }

    pub fn as_u8(self) -> u8 {
        match self {
            FaultKind::None => 0,
            FaultKind::TemperatureWarning => 1,
            FaultKind::TemperatureCritical => 2,
            FaultKind::Electrical => 3,
            FaultKind::Hydraulic => 4,
        }
    }

    pub fn from_u8(raw: u8) -> Self {
        match raw {
            1 => FaultKind::TemperatureWarning,
            2 => FaultKind::TemperatureCritical,
            3 => FaultKind::Electrical,
            4 => FaultKind::Hydraulic,
            _ => FaultKind::None,
        }
    }
}
