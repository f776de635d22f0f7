//! Read-only simulation snapshots published to external collaborators.
//!
//! A snapshot is a distinct structure: no simulation memory is shared with
//! consumers. The physics side overwrites a shared buffer once per frame;
//! renderers and audio clone the most recent complete snapshot.

use bevy_ecs::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, RwLock};

use crate::driveline::Driveline;
use crate::ground::GroundModelRegistry;
use crate::rig::actor::{ActorId, ActorState, Controls, Meters, Origin};
use crate::rig::node::NodeStore;
use crate::rig::beam::BeamStore;
use crate::rig::wheel::Wheels;

/// Per-wheel published state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WheelSnapshot {
    /// Accumulated angular position in radians.
    pub rotation: f32,
    /// Peripheral speed in m/s.
    pub speed: f32,
    /// Slip magnitude of the last ground contact.
    pub slip: f32,
    /// Ground-model name of the last contact, for particle effects.
    pub contact_surface: Option<String>,
}

/// Engine published state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub rpm: f32,
    pub gear: i32,
    pub running: bool,
    pub throttle: f32,
}

/// Lamp/flare on-off flags derived from the actor's control state.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct LampFlags {
    pub brake: bool,
    pub reverse: bool,
}

/// Complete published state of one actor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorSnapshot {
    pub id: u32,
    pub state: ActorState,
    pub origin: [f32; 3],
    /// Absolute node positions.
    pub node_positions: Vec<[f32; 3]>,
    /// Signed stress per beam; broken beams report 0.
    pub beam_stress: Vec<f32>,
    pub beam_broken: Vec<bool>,
    pub wheels: Vec<WheelSnapshot>,
    pub engine: Option<EngineSnapshot>,
    pub lamps: LampFlags,
    pub odometer: f32,
}

/// Complete simulation state snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    /// Sub-step count at capture time.
    pub tick: u64,
    /// Elapsed simulation time in seconds.
    pub time: f64,
    pub actors: Vec<ActorSnapshot>,
}

impl Snapshot {
    /// Capture a snapshot from the ECS world. Actors are listed in id order.
    pub fn from_world(world: &mut World, tick: u64, time: f64) -> Self {
        // Ground-model names are resolved up front so the query borrow can
        // be exclusive.
        let surface_names: Vec<String> = world
            .get_resource::<GroundModelRegistry>()
            .map(|registry| {
                (0..registry.len() as u32)
                    .map(|id| registry.get(id).name.clone())
                    .collect()
            })
            .unwrap_or_default();

        let mut rows = Vec::new();
        {
            let mut query = world.query::<(
                &ActorId,
                &ActorState,
                &Origin,
                &NodeStore,
                &BeamStore,
                &Wheels,
                &Driveline,
                &Controls,
                &Meters,
            )>();
            for (id, state, origin, nodes, beams, wheels, driveline, controls, meters) in
                query.iter(world)
            {
                if matches!(state, ActorState::Deleted | ActorState::Recycle) {
                    continue;
                }
                let engine = driveline.engine.as_ref().map(|e| EngineSnapshot {
                    rpm: e.rpm,
                    gear: e.gear,
                    running: e.running,
                    throttle: e.throttle,
                });
                let lamps = LampFlags {
                    brake: controls.brake > 0.0,
                    reverse: driveline
                        .engine
                        .as_ref()
                        .map(|e| e.gear < 0)
                        .unwrap_or(false),
                };
                rows.push(ActorSnapshot {
                    id: id.0,
                    state: *state,
                    origin: origin.0.to_array(),
                    node_positions: nodes.iter().map(|n| n.abs_position.to_array()).collect(),
                    beam_stress: beams
                        .iter()
                        .map(|b| if b.broken { 0.0 } else { b.stress })
                        .collect(),
                    beam_broken: beams.iter().map(|b| b.broken).collect(),
                    wheels: wheels
                        .wheels
                        .iter()
                        .map(|w| WheelSnapshot {
                            rotation: w.rotation,
                            speed: w.speed,
                            slip: w.last_slip,
                            contact_surface: w
                                .last_contact_gm
                                .and_then(|id| surface_names.get(id as usize).cloned()),
                        })
                        .collect(),
                    engine,
                    lamps,
                    odometer: meters.odometer,
                });
            }
        }
        rows.sort_by_key(|r| r.id);
        Self {
            tick,
            time,
            actors: rows,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Double-buffer style snapshot channel: the producer overwrites, consumers
/// clone the latest complete snapshot. Contention is one short lock per
/// frame on either side.
#[derive(Clone, Default)]
pub struct SnapshotChannel {
    buffer: Arc<RwLock<Snapshot>>,
}

impl SnapshotChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, snapshot: Snapshot) {
        if let Ok(mut guard) = self.buffer.write() {
            *guard = snapshot;
        }
    }

    /// Most recent complete snapshot.
    pub fn latest(&self) -> Snapshot {
        self.buffer.read().map(|g| g.clone()).unwrap_or_default()
    }
}

/// RAM-only ring of recent snapshots backing the rewind feature.
#[derive(Debug, Default)]
pub struct ReplayRing {
    ring: VecDeque<Snapshot>,
    capacity: usize,
}

impl ReplayRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, snapshot: Snapshot) {
        if self.capacity == 0 {
            return;
        }
        if self.ring.len() == self.capacity {
            self.ring.pop_front();
        }
        self.ring.push_back(snapshot);
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Snapshot `steps_back` frames ago; 0 is the most recent.
    pub fn rewind(&self, steps_back: usize) -> Option<&Snapshot> {
        if steps_back >= self.ring.len() {
            return None;
        }
        self.ring.get(self.ring.len() - 1 - steps_back)
    }
}
