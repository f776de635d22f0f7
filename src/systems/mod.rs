//! Physics systems, grouped by phase.
//!
//! Per sub-step the scheduler runs: force seeding, engine, beams, wheels,
//! actuators (all per-actor, in the force schedule), then its own serial
//! phases (inter-actor beams, hooks, ropes, dynamic collisions), then ground
//! collision and integration.

pub mod actuators;
pub mod forces;
pub mod integrator;
pub mod shocks;
pub mod wheels;

use bevy_ecs::prelude::*;

/// Resource containing the sub-step duration for the current tick.
#[derive(Resource, Default)]
pub struct DeltaTime(pub f32);

/// Monotonic sub-step counter.
#[derive(Resource, Default)]
pub struct SimTick(pub u64);

impl SimTick {
    pub fn increment(&mut self) {
        self.0 += 1;
    }
}

/// Frame-boundary flag: true on the first sub-step after a rendered frame.
/// Once-per-frame work (wet-state aging, hook auto-scan, dashboard flags)
/// keys off this.
#[derive(Resource, Default)]
pub struct FrameFlags {
    pub do_update: bool,
    /// Sub-steps in the current frame, for per-frame time scaling.
    pub max_steps: u32,
}
