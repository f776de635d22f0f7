//! softrig - soft-body vehicle physics core.
//!
//! A deterministic, fixed-timestep mass-spring-damper solver for vehicles
//! built from point masses (nodes) and one-dimensional constraints (beams),
//! with a multi-phase collision pipeline. Uses `bevy_ecs` for orchestration:
//! one entity per actor, contiguous stores as components, plain loops in the
//! numeric kernels.
//!
//! The core is a tick-driven callable: [`Simulation::step`] advances one
//! frame (expanding into 0.5 ms sub-steps internally) and returns a
//! read-only [`Snapshot`]. Terrain queries, ground-surface properties and
//! event/snapshot sinks are injected; rendering, audio, parsing and
//! networking transport live outside.

pub mod collision;
pub mod config;
pub mod def;
pub mod driveline;
pub mod error;
pub mod events;
pub mod ground;
pub mod profiler;
pub mod rig;
pub mod scheduler;
pub mod snapshot;
pub mod spawn;
pub mod systems;
pub mod terrain;

pub use config::SimConfig;
pub use def::ActorDef;
pub use driveline::{Driveline, Engine};
pub use error::{ActorNotFound, GroundLookupMiss, SpawnError};
pub use events::SimEvent;
pub use ground::{GroundModel, GroundModelDef, GroundModelRegistry};
pub use rig::{ActorId, ActorState, BeamStore, NodeStore};
pub use scheduler::Simulation;
pub use snapshot::{Snapshot, SnapshotChannel};
pub use spawn::SpawnReport;
pub use terrain::{FlatTerrain, GridTerrain, Terrain};
