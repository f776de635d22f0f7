//! Simulation configuration and shared physics constants.
//!
//! `SimConfig` is an ECS resource read by every system. It is set once when
//! the simulation is created; nothing mutates it afterwards.

use bevy_ecs::prelude::*;
use serde::{Deserialize, Serialize};

/// Minimum beam length is 10 centimeters.
pub const MIN_BEAM_LENGTH: f32 = 0.1;
/// Collision test range around triangles and the ground surface.
pub const DEFAULT_COLLISION_RANGE: f32 = 0.02;
/// Viscous air drag coefficient applied per node.
pub const DEFAULT_DRAG: f32 = 0.05;
/// Turbulent water drag coefficient applied per submerged node.
pub const DEFAULT_WATERDRAG: f32 = 10.0;
/// Fallback spring rate used when hard shock bounds engage.
pub const DEFAULT_SPRING: f32 = 9_000_000.0;
/// Fallback damping used when hard shock bounds engage.
pub const DEFAULT_DAMP: f32 = 12_000.0;
/// Support beams break once stretched past `rest_len * limit` unless the
/// definition supplies its own limit.
pub const SUPPORT_BEAM_LIMIT_DEFAULT: f32 = 4.0;
/// Highest command key number; keys are numbered `0..=MAX_COMMANDS`.
pub const MAX_COMMANDS: usize = 84;
/// Number of command key slots.
pub const NUM_COMMAND_SLOTS: usize = MAX_COMMANDS + 1;

/// Fixed configuration for a simulation instance.
#[derive(Resource, Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SimConfig {
    /// Logical sub-step rate in Hz. 2000 Hz keeps stiff beams stable.
    pub substep_rate: f32,
    /// Gravity along -Y, in m/s^2 (negative value).
    pub gravity: f32,
    /// Narrowphase collision range in meters.
    pub collision_range: f32,
    /// Seconds of stillness before an actor may fall asleep.
    pub sleep_grace: f32,
    /// Squared velocity below which an actor counts as motionless.
    pub sleep_velocity_sq: f32,
    /// Weight of the colliding node in the back-face heuristic.
    pub backface_weight: i32,
    /// Node velocity sanity cap, m/s. Beyond this the velocity is clamped.
    pub max_node_velocity: f32,
    /// Distance from the actor origin at which positions are re-centred.
    pub origin_shift_distance: f32,
    /// Seconds without an authoritative update before a networked actor is
    /// declared invalid.
    pub network_timeout: f32,
    /// Number of recent snapshots kept in the replay ring.
    pub replay_capacity: usize,
    /// Seconds between collision retests for a quiet chassis node.
    pub node_collision_interval: f32,
    /// Seconds between collision retests for a wheel node.
    pub wheel_collision_interval: f32,
}

impl SimConfig {
    /// Duration of one sub-step in seconds.
    #[inline]
    pub fn substep_dt(&self) -> f32 {
        1.0 / self.substep_rate
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            substep_rate: 2000.0,
            gravity: -9.807,
            collision_range: DEFAULT_COLLISION_RANGE,
            sleep_grace: 10.0,
            sleep_velocity_sq: 0.01,
            backface_weight: 3,
            max_node_velocity: 1000.0,
            origin_shift_distance: 500.0,
            network_timeout: 2.0,
            replay_capacity: 250,
            node_collision_interval: 0.005,
            wheel_collision_interval: 0.0025,
        }
    }
}
