//! File-based boundary to the external message bridge.
//!
//! Inbound: the bridge drops JSON files into a directory; each carries an
//! envelope `{topic, payload, timestamp}` and a file name containing
//! `truck_<id>_<kind>`. For every kind the coordinator consumes only the
//! lexicographically-latest file, then removes every matching file.
//! Malformed files are removed without comment; directory errors are
//! ignored and retried on the next poll.
//!
//! Outbound: actuator commands and truck state are written as
//! `<unix_millis>_truck_<id>_<kind>.json` with the same envelope.

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::logfmt;
use crate::types::{ActuatorCommand, Obstacle, OperatorCommand, RawSample, TruckState};

#[derive(Deserialize)]
struct InEnvelope<T> {
    payload: T,
}

#[derive(Serialize)]
struct OutEnvelope<T> {
    topic: String,
    payload: T,
    timestamp: i64,
}

/// Actuator payload: the wire spells the velocity field `acceleration` for
/// compatibility with the supervisory side.
#[derive(Serialize)]
struct ActuatorPayload {
    acceleration: i32,
    steering: i32,
    arrived: bool,
}

#[derive(Serialize)]
struct StatePayload {
    automatic: bool,
    fault: bool,
}

/// Operator-command payload; all fields optional on the wire. A file
/// carrying none of them is discarded.
#[derive(Deserialize)]
struct CommandPayload {
    auto_mode: Option<bool>,
    manual_mode: Option<bool>,
    rearm: Option<bool>,
    accelerate: Option<i32>,
    steer_left: Option<i32>,
    steer_right: Option<i32>,
}

#[derive(Deserialize)]
struct SetpointPayload {
    target_x: i32,
    target_y: i32,
    target_speed: i32,
}

#[derive(Deserialize)]
struct ObstaclesPayload {
    obstacles: Vec<Obstacle>,
}

pub struct MessageBridge {
    inbound: PathBuf,
    outbound: PathBuf,
    truck_id: i32,
}

impl MessageBridge {
    pub fn new(inbound: impl Into<PathBuf>, outbound: impl Into<PathBuf>, truck_id: i32) -> Self {
        let bridge = Self {
            inbound: inbound.into(),
            outbound: outbound.into(),
            truck_id,
        };

        if let Err(err) = fs::create_dir_all(&bridge.outbound) {
            log::warn!(
                target: "MA",
                "event=bridge_dir_err,dir={},err={}",
                bridge.outbound.display(), err
            );
        }
        bridge
    }

    pub fn poll_sensors(&self) -> Option<RawSample> {
        self.poll_latest::<RawSample>("sensors")
    }

    pub fn poll_command(&self) -> Option<OperatorCommand> {
        let payload = self.poll_latest::<CommandPayload>("commands")?;

        let present = payload.auto_mode.is_some()
            || payload.manual_mode.is_some()
            || payload.rearm.is_some()
            || payload.accelerate.is_some()
            || payload.steer_left.is_some()
            || payload.steer_right.is_some();
        if !present {
            return None;
        }

        Some(OperatorCommand {
            auto_mode: payload.auto_mode.unwrap_or(false),
            manual_mode: payload.manual_mode.unwrap_or(false),
            rearm: payload.rearm.unwrap_or(false),
            accelerate: payload.accelerate.unwrap_or(0),
            steer_left: payload.steer_left.unwrap_or(0),
            steer_right: payload.steer_right.unwrap_or(0),
        })
    }

    /// Returns `(target_x, target_y, target_speed)`.
    pub fn poll_setpoint(&self) -> Option<(i32, i32, i32)> {
        let payload = self.poll_latest::<SetpointPayload>("setpoint")?;
        Some((payload.target_x, payload.target_y, payload.target_speed))
    }

    pub fn poll_obstacles(&self) -> Option<Vec<Obstacle>> {
        self.poll_latest::<ObstaclesPayload>("obstacles")
            .map(|p| p.obstacles)
    }

    pub fn emit_actuator(&self, command: &ActuatorCommand) {
        self.emit(
            "commands",
            ActuatorPayload {
                acceleration: command.velocity,
                steering: command.steering,
                arrived: command.arrived,
            },
        );
    }

    pub fn emit_state(&self, state: &TruckState) {
        self.emit(
            "state",
            StatePayload {
                automatic: state.automatic,
                fault: state.fault,
            },
        );
    }

    /// Parses the lexicographically-latest matching file, then removes all
    /// matching files. Any I/O or parse failure yields `None`.
    fn poll_latest<T: DeserializeOwned>(&self, kind: &str) -> Option<T> {
        let pattern = format!("truck_{}_{}", self.truck_id, kind);

        let mut matching: Vec<PathBuf> = match fs::read_dir(&self.inbound) {
            Ok(entries) => entries
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.path())
                .filter(|path| matches_kind(path, &pattern))
                .collect(),
            Err(_) => return None,
        };
        if matching.is_empty() {
            return None;
        }

        matching.sort();
        let latest = matching.last()?;

        let parsed = fs::read_to_string(latest)
            .ok()
            .and_then(|raw| serde_json::from_str::<InEnvelope<T>>(&raw).ok())
            .map(|envelope| envelope.payload);

        for path in &matching {
            let _ = fs::remove_file(path);
        }

        parsed
    }

    fn emit<T: Serialize>(&self, kind: &str, payload: T) {
        let timestamp = logfmt::timestamp_ms();
        let envelope = OutEnvelope {
            topic: format!("truck/{}/{}", self.truck_id, kind),
            payload,
            timestamp,
        };

        let name = format!("{}_truck_{}_{}.json", timestamp, self.truck_id, kind);
        let path = self.outbound.join(name);

        match serde_json::to_string(&envelope) {
            Ok(body) => {
                if let Err(err) = fs::write(&path, body) {
                    log::debug!(target: "MA", "event=emit_err,file={},err={}", path.display(), err);
                }
            }
            Err(err) => {
                log::debug!(target: "MA", "event=emit_err,kind={},err={}", kind, err);
            }
        }
    }
}

fn matches_kind(path: &Path, pattern: &str) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.contains(pattern) && name.ends_with(".json"))
        .unwrap_or(false)
}
