//! Route planner: waypoint holder plus single-obstacle contouring.
//!
//! Passive component; no thread of its own. The coordinator replaces the
//! target and the obstacle list from boundary input and asks for an
//! obstacle-adjusted setpoint each poll cycle.

use parking_lot::Mutex;

use crate::types::{NavigationSetpoint, Obstacle};

/// How far ahead along the path obstacles are considered, in world units.
const LOOK_AHEAD: f64 = 200.0;
/// Perpendicular clearance below which an obstacle blocks the path.
const AVOIDANCE_RADIUS: f64 = 80.0;
/// Extra clearance added to the detour point.
const AVOIDANCE_MARGIN: f64 = 20.0;

/// Bearing from one point to another in integer degrees, the natural
/// `atan2` range (-180..=180], truncated toward zero.
pub fn bearing_deg(from_x: i32, from_y: i32, to_x: i32, to_y: i32) -> i32 {
    let dx = (to_x - from_x) as f64;
    let dy = (to_y - from_y) as f64;
    dy.atan2(dx).to_degrees() as i32
}

struct PlannerState {
    setpoint: NavigationSetpoint,
    obstacles: Vec<Obstacle>,
}

pub struct RoutePlanner {
    state: Mutex<PlannerState>,
}

impl RoutePlanner {
    pub fn new() -> Self {
        log::info!(target: "RP", "event=init");
        Self {
            state: Mutex::new(PlannerState {
                setpoint: NavigationSetpoint::default(),
                obstacles: Vec::new(),
            }),
        }
    }

    /// Atomically replaces the target waypoint. The stored heading is left
    /// untouched; callers derive it per position via [`Self::heading_to_target`].
    pub fn set_target(&self, x: i32, y: i32, speed: i32) {
        let mut state = self.state.lock();
        state.setpoint.target_x = x;
        state.setpoint.target_y = y;
        state.setpoint.target_speed = speed;
        log::info!(target: "RP", "event=waypoint,x={},y={},speed={}", x, y, speed);
    }

    /// Atomically replaces the obstacle list.
    pub fn update_obstacles(&self, obstacles: Vec<Obstacle>) {
        let mut state = self.state.lock();
        log::debug!(target: "RP", "event=obstacles,count={}", obstacles.len());
        state.obstacles = obstacles;
    }

    pub fn get_setpoint(&self) -> NavigationSetpoint {
        self.state.lock().setpoint
    }

    /// Bearing from the given position to the stored target.
    pub fn heading_to_target(&self, current_x: i32, current_y: i32) -> i32 {
        let state = self.state.lock();
        bearing_deg(
            current_x,
            current_y,
            state.setpoint.target_x,
            state.setpoint.target_y,
        )
    }

    /// Stored setpoint, perturbed around the nearest obstacle that blocks
    /// the direct path from `(current_x, current_y)`.
    ///
    /// Side convention (world coordinates): the obstacle's side of the path
    /// is the sign of `dir × (obstacle − position)`; a non-negative cross
    /// product (obstacle on the left, or dead ahead) detours to the right,
    /// a negative one detours to the left. The projection window is
    /// `0 < proj ≤ min(distance, LOOK_AHEAD)`, upper bound inclusive.
    pub fn compute_adjusted_setpoint(&self, current_x: i32, current_y: i32) -> NavigationSetpoint {
        let state = self.state.lock();
        let setpoint = state.setpoint;

        let dx = (setpoint.target_x - current_x) as f64;
        let dy = (setpoint.target_y - current_y) as f64;
        let distance = (dx * dx + dy * dy).sqrt();
        if distance < 1.0 {
            return setpoint;
        }

        let unit_x = dx / distance;
        let unit_y = dy / distance;
        let window = distance.min(LOOK_AHEAD);

        let mut nearest: Option<(f64, Obstacle)> = None;
        for obstacle in &state.obstacles {
            let ox = (obstacle.x - current_x) as f64;
            let oy = (obstacle.y - current_y) as f64;

            let projection = ox * unit_x + oy * unit_y;
            let lateral = (unit_x * oy - unit_y * ox).abs();

            if projection > 0.0 && projection <= window && lateral < AVOIDANCE_RADIUS {
                let closer = nearest.map_or(true, |(best, _)| projection < best);
                if closer {
                    nearest = Some((projection, *obstacle));
                }
            }
        }

        let Some((_, threat)) = nearest else {
            return setpoint;
        };

        let cross = unit_x * (threat.y - current_y) as f64 - unit_y * (threat.x - current_x) as f64;
        let (offset_x, offset_y) = if cross >= 0.0 {
            (unit_y, -unit_x)
        } else {
            (-unit_y, unit_x)
        };

        let clearance = AVOIDANCE_RADIUS + AVOIDANCE_MARGIN;
        let adjusted = NavigationSetpoint {
            target_x: threat.x + (clearance * offset_x).round() as i32,
            target_y: threat.y + (clearance * offset_y).round() as i32,
            target_speed: setpoint.target_speed,
            target_heading: setpoint.target_heading,
        };

        log::debug!(
            target: "RP",
            "event=detour,obstacle={},x={},y={}",
            threat.id, adjusted.target_x, adjusted.target_y
        );
        adjusted
    }
}

impl Default for RoutePlanner {
    fn default() -> Self {
        Self::new()
    }
}
