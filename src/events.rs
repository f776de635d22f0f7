//! Outbound simulation events.
//!
//! Events are best-effort notifications at sub-step granularity. They are
//! buffered in an ECS resource and drained by the host once per frame;
//! nothing in the core reads them back.

use bevy_ecs::prelude::*;
use serde::{Deserialize, Serialize};

/// A discrete event published to external collaborators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SimEvent {
    BeamBroken { actor: u32, beam: usize },
    BeamDeformed { actor: u32, beam: usize, stress: f32 },
    DetacherFired { actor: u32, group: i32 },
    NodeTouchedWater { actor: u32, node: usize },
    HookLocked { actor: u32, hook: usize },
    HookUnlocked { actor: u32, hook: usize },
    TriggerFired { actor: u32, beam: usize, key: usize, long_action: bool },
    EngineStarted { actor: u32 },
    EngineStalled { actor: u32 },
    GearShifted { actor: u32, gear: i32 },
    ActorReset { actor: u32 },
}

/// Buffered event queue, drained by the host each frame.
#[derive(Resource, Debug, Default)]
pub struct EventQueue {
    events: Vec<SimEvent>,
}

impl EventQueue {
    pub fn push(&mut self, event: SimEvent) {
        self.events.push(event);
    }

    /// Remove and return all buffered events.
    pub fn drain(&mut self) -> Vec<SimEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SimEvent> {
        self.events.iter()
    }
}
