//! Actor-level components: identity, lifecycle, bounds, controls and the
//! higher-level attachment mechanisms (hooks, ropes, ties, slidenodes).
//!
//! Each actor is one ECS entity; these components are pure data, all logic
//! lives in the systems and in the scheduler's serial phases.

use bevy_ecs::prelude::*;
use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::collision::aabb::Aabb;
use crate::rig::beam::BeamStore;
use crate::rig::commands::{CommandSet, InertiaFilter};
use crate::rig::node::{NodeIndex, NodeStore};
use crate::rig::wheel::Wheels;
use crate::driveline::Driveline;

/// Stable actor identifier, assigned by the scheduler at spawn.
#[derive(Component, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActorId(pub u32);

/// Actor lifecycle state.
#[derive(Component, Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ActorState {
    /// Fully simulated, directly controlled or coupled to such an actor.
    #[default]
    Activated,
    /// Simulated because something activated is nearby, but not lead.
    Desactivated,
    /// Idle; counting down towards sleep.
    MaySleep,
    /// Transient marker: sleeps after the current sub-step.
    GoSleep,
    /// Not simulated until woken.
    Sleeping,
    /// Driven by a remote peer; integration frozen locally.
    Networked,
    /// Remote peer went silent; frozen at the last known state.
    NetworkedInvalid,
    /// Queued for slot reuse.
    Recycle,
    /// Queued for removal at the frame boundary.
    Deleted,
}

impl ActorState {
    /// Does this actor take part in the physics sub-step?
    #[inline]
    pub fn is_simulated(&self) -> bool {
        matches!(
            self,
            ActorState::Activated
                | ActorState::Desactivated
                | ActorState::MaySleep
                | ActorState::GoSleep
        )
    }
}

/// Local coordinate reference of the actor. Node `rel_position`s are
/// relative to this; re-centred when the actor drifts too far.
#[derive(Component, Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Origin(pub Vec3);

/// Seconds of continuous stillness, driving the sleep transition.
#[derive(Component, Debug, Clone, Copy, Default)]
pub struct SleepTimer(pub f32);

/// Seconds since the last authoritative update for networked actors.
#[derive(Component, Debug, Clone, Copy, Default)]
pub struct NetTimer(pub f32);

/// Full, predicted and smart (per-cohort) bounding boxes.
#[derive(Component, Debug, Clone, Default)]
pub struct ActorBounds {
    pub full: Aabb,
    pub predicted: Aabb,
    pub smart: Vec<Aabb>,
    pub smart_predicted: Vec<Aabb>,
    /// Set when the anti-explosion guard tripped; handled by the scheduler.
    pub reset_requested: bool,
}

/// Scalar control inputs for one actor, written by the host per frame.
#[derive(Component, Debug, Clone, Default, Serialize, Deserialize)]
pub struct Controls {
    /// Steering command in [-1, 1].
    pub steer: f32,
    pub aileron: f32,
    pub rudder: f32,
    pub elevator: f32,
    /// Throttle in [0, 1].
    pub throttle: f32,
    /// Foot brake in [0, 1].
    pub brake: f32,
    pub parking_brake: bool,
    /// Manual clutch override in [0, 1], if the host drives it.
    pub clutch: Option<f32>,
    pub speed_limit: Option<f32>,
}

/// Hydro steering state shared by an actor's hydro beams.
#[derive(Component, Debug, Clone, Serialize, Deserialize)]
pub struct Hydros {
    /// Beam indices of the hydro beams, evaluated in order.
    pub beams: Vec<usize>,
    /// Diminish steering effect with speed.
    pub speed_coupling: bool,
    pub dir_state: f32,
    pub aileron_state: f32,
    pub rudder_state: f32,
    pub elevator_state: f32,
    /// Per-hydro inertia filters, indexed like `beams`.
    pub inertia: Vec<InertiaFilter>,
    /// Published steering wheel position.
    pub dir_wheel_display: f32,
}

impl Default for Hydros {
    fn default() -> Self {
        Self {
            beams: Vec::new(),
            speed_coupling: true,
            dir_state: 0.0,
            aileron_state: 0.0,
            rudder_state: 0.0,
            elevator_state: 0.0,
            inertia: Vec::new(),
            dir_wheel_display: 0.0,
        }
    }
}

/// A rotator: two four-node plates torqued around an axis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rotator {
    pub axis1: NodeIndex,
    pub axis2: NodeIndex,
    pub nodes1: [NodeIndex; 4],
    pub nodes2: [NodeIndex; 4],
    pub angle: f32,
    pub rate: f32,
    pub force: f32,
    pub tolerance: f32,
    pub engine_coupling: f32,
    pub needs_engine: bool,
}

#[derive(Component, Debug, Clone, Default, Serialize, Deserialize)]
pub struct Rotators {
    pub rotators: Vec<Rotator>,
    pub inertia: Vec<InertiaFilter>,
}

/// Remote endpoint of an attachment: a node of some actor.
pub type RemoteNode = (u32, NodeIndex);

/// Hook lifecycle. `Prelock` winches the hook beam shut until the lock
/// range or force limit decides the outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HookState {
    #[default]
    Unlocked,
    Prelock,
    Locked,
    Preunlock,
}

/// A locking mechanism coupling one of our nodes to a node of any actor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hook {
    pub node: NodeIndex,
    /// Hookgroup for trigger/key addressing; -1 = the default group.
    pub group: i32,
    /// Only nodes with a matching lockgroup can be captured; -1 = any.
    pub lockgroup: i32,
    /// Beam index of the hook's (normally disabled) coupling beam.
    pub beam: usize,
    pub state: HookState,
    pub locked_node: Option<RemoteNode>,
    /// Capture radius in meters.
    pub lock_range: f32,
    /// Winch-in speed in m per sub-step while prelocked.
    pub lock_speed: f32,
    /// Force limit; exceeding it aborts the prelock.
    pub max_force: f32,
    pub auto_lock: bool,
    pub self_lock: bool,
    pub no_disable: bool,
    /// Cooldown in simulation seconds before the hook can relock.
    pub timer: f32,
    pub timer_preset: f32,
}

/// A rope: a winchable beam whose far end can latch onto a ropable node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rope {
    pub beam: usize,
    pub group: i32,
    pub locked_to: Option<RemoteNode>,
}

/// A tie: a command-like beam that reels in until taut, then holds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tie {
    pub beam: usize,
    pub group: i32,
    pub tying: bool,
    pub max_stress: f32,
    pub locked_to: Option<RemoteNode>,
}

/// A slidenode: a node constrained to slide along a rail of node segments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlideNode {
    pub node: NodeIndex,
    /// Rail waypoints; consecutive pairs form the segments.
    pub rail: Vec<NodeIndex>,
    /// Current segment index.
    pub segment: usize,
    pub spring: f32,
    pub damping: f32,
    /// Constraint force beyond which the slidenode detaches; infinite when
    /// None.
    pub break_force: Option<f32>,
    pub attached: bool,
}

/// Per-actor attachment mechanisms.
#[derive(Component, Debug, Clone, Default, Serialize, Deserialize)]
pub struct Attachments {
    pub hooks: Vec<Hook>,
    pub ropes: Vec<Rope>,
    pub ties: Vec<Tie>,
    pub slidenodes: Vec<SlideNode>,
}

/// Collision triangle rate limiter state.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CollCabRate {
    pub rate: i32,
    pub distance: i32,
}

/// Collision cabinet: the actor's surface triangles.
#[derive(Component, Debug, Clone, Default, Serialize, Deserialize)]
pub struct Cabs {
    /// All cab triangles as node index triples.
    pub tris: Vec<[NodeIndex; 3]>,
    /// Indices into `tris` that take part in collision.
    pub coll_tris: Vec<usize>,
    /// Rate limiter per collision triangle, inter- and intra-actor.
    pub inter_rate: Vec<CollCabRate>,
    pub intra_rate: Vec<CollCabRate>,
    /// Ground model applied to contacts against this actor's surface.
    pub submesh_ground_model: Option<String>,
}

/// Beam-connected neighbours per node, for the back-face heuristic.
#[derive(Component, Debug, Clone, Default)]
pub struct NodeConnections(pub Vec<Vec<NodeIndex>>);

/// Spawn-time facts that never change afterwards.
#[derive(Component, Debug, Clone, Default)]
pub struct ActorStatics {
    pub name: String,
    /// World position the actor spawned at; reset target for the range
    /// guard.
    pub spawn_position: Vec3,
    /// Skip viscous air drag entirely (towed gliders, test rigs).
    pub disable_drag: bool,
    /// Index of the lowest node at spawn. Kept frozen on purpose: downstream
    /// consumers rely on the spawn-time value.
    pub lowest_node: NodeIndex,
    pub total_mass: f32,
    /// Mean collision triangle edge length, feeds the point-grid cell size.
    pub mean_coll_edge: f32,
}

/// Published odometer and assorted per-actor meters.
#[derive(Component, Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Meters {
    pub odometer: f32,
    pub water_contact: bool,
}

/// Everything a freshly spawned actor entity carries.
#[derive(Bundle)]
pub struct ActorBundle {
    pub id: ActorId,
    pub state: ActorState,
    pub origin: Origin,
    pub sleep: SleepTimer,
    pub net: NetTimer,
    pub bounds: ActorBounds,
    pub nodes: NodeStore,
    pub beams: BeamStore,
    pub wheels: Wheels,
    pub commands: CommandSet,
    pub controls: Controls,
    pub hydros: Hydros,
    pub rotators: Rotators,
    pub attachments: Attachments,
    pub cabs: Cabs,
    pub connections: NodeConnections,
    pub statics: ActorStatics,
    pub meters: Meters,
    pub driveline: Driveline,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulated_states() {
        assert!(ActorState::Activated.is_simulated());
        assert!(ActorState::MaySleep.is_simulated());
        assert!(!ActorState::Sleeping.is_simulated());
        assert!(!ActorState::Networked.is_simulated());
        assert!(!ActorState::Deleted.is_simulated());
    }
}
