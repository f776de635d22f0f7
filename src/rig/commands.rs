//! Command keys and the inertia filters that rate-limit step inputs.

use bevy_ecs::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::NUM_COMMAND_SLOTS;

/// Response curve of an inertia filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum InertiaCurve {
    #[default]
    Linear,
    /// Slow start, fast finish.
    Quadratic,
    /// Fast start, slow finish.
    InverseQuadratic,
}

impl InertiaCurve {
    fn sample(&self, t: f32) -> f32 {
        let t = t.clamp(0.0, 1.0);
        match self {
            InertiaCurve::Linear => t,
            InertiaCurve::Quadratic => t * t,
            InertiaCurve::InverseQuadratic => 1.0 - (1.0 - t) * (1.0 - t),
        }
    }
}

/// Rate limiter for one control channel: the output chases the input with
/// separate start (accelerating) and stop (decelerating) profiles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InertiaFilter {
    pub start_delay: f32,
    pub stop_delay: f32,
    pub start_curve: InertiaCurve,
    pub stop_curve: InertiaCurve,
    last_output: f32,
    time: f32,
}

impl InertiaFilter {
    pub fn new(start_delay: f32, stop_delay: f32) -> Self {
        Self {
            start_delay,
            stop_delay,
            start_curve: InertiaCurve::default(),
            stop_curve: InertiaCurve::default(),
            last_output: 0.0,
            time: 0.0,
        }
    }

    /// Passthrough filter (no delay configured).
    pub fn passthrough() -> Self {
        Self::new(0.0, 0.0)
    }

    pub fn reset(&mut self) {
        self.last_output = 0.0;
        self.time = 0.0;
    }

    /// Advance the filter by `dt` towards `input` and return the limited
    /// output.
    pub fn apply(&mut self, input: f32, dt: f32) -> f32 {
        if self.start_delay <= 0.0 && self.stop_delay <= 0.0 {
            self.last_output = input;
            return input;
        }

        let last = self.last_output;
        // Moving away from zero uses the start profile, back towards zero
        // the stop profile.
        let rel_diff = input.abs() - last.abs();
        let abs_diff = input - last;

        if abs_diff.abs() < 0.002 {
            self.time = 0.0;
        }
        self.time += dt;

        let start_step = self.start_curve.sample(self.start_delay * self.time) * 0.001;
        let stop_step = self.stop_curve.sample(self.stop_delay * self.time) * 0.001;

        let mut output = last;
        if abs_diff > 0.0 {
            output = if rel_diff > 0.0 {
                last + start_step
            } else {
                last + stop_step
            };
            if output > input {
                output = input;
            }
        } else if abs_diff < 0.0 {
            output = if rel_diff > 0.0 {
                last - start_step
            } else {
                last - stop_step
            };
            if output < input {
                output = input;
            }
        }
        self.last_output = output;
        output
    }
}

impl Default for InertiaFilter {
    fn default() -> Self {
        Self::passthrough()
    }
}

/// One command key: player/trigger activation plus the beams and rotators
/// it drives. Beam and rotator references are signed; the sign encodes the
/// drive direction (positive lengthens, negative shortens).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandKey {
    pub beams: Vec<i64>,
    pub rotators: Vec<i64>,
    pub description: String,
    /// Player input in [0, 1] for this frame.
    pub player_input: f32,
    /// Input injected by trigger beams; cleared every sub-step.
    pub trigger_input: f32,
    /// Resolved activation, `max(player_input, trigger_input)`.
    pub value: f32,
    /// 1 on the sub-step the key went down, -1 when released, 0 otherwise.
    pub value_state: i8,
    /// True while a command-key blocker trigger holds this key down.
    pub blocked: bool,
}

impl CommandKey {
    #[inline]
    pub fn is_pressed(&self) -> bool {
        self.value > 0.0
    }
}

/// Per-actor command keyboard (keys `0..=84`) plus the inertia bank.
#[derive(Component, Debug, Clone, Serialize, Deserialize)]
pub struct CommandSet {
    pub keys: Vec<CommandKey>,
    pub inertia: Vec<InertiaFilter>,
    pub has_commands: bool,
}

impl Default for CommandSet {
    fn default() -> Self {
        Self {
            keys: vec![CommandKey::default(); NUM_COMMAND_SLOTS],
            inertia: vec![InertiaFilter::passthrough(); NUM_COMMAND_SLOTS],
            has_commands: false,
        }
    }
}

impl CommandSet {
    /// Merge player and trigger inputs into the per-key activation values
    /// and update the edge states. Trigger inputs are consumed.
    pub fn refresh_values(&mut self) {
        for key in &mut self.keys {
            let old = key.value;
            key.value = key.player_input.max(key.trigger_input);
            key.trigger_input = 0.0;
            if key.value > 0.01 && old < 0.01 {
                key.value_state = 1;
            } else if key.value < 0.01 && old > 0.01 {
                key.value_state = -1;
            } else {
                key.value_state = 0;
            }
        }
    }

    pub fn set_player_input(&mut self, key: usize, value: f32) {
        if let Some(k) = self.keys.get_mut(key) {
            k.player_input = value.clamp(0.0, 1.0);
        }
    }
}
