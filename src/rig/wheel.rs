//! Wheels - structured node/beam clusters with drive and brake torque.

use bevy_ecs::prelude::*;
use serde::{Deserialize, Serialize};

use crate::ground::GroundModelId;
use crate::rig::node::NodeIndex;

/// Which brake circuits act on a wheel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BrakeCombo {
    /// Free-rolling, no braking at all.
    #[default]
    Free,
    /// Foot brake only, no handbrake.
    FootOnly,
    /// Foot brake.
    Foot,
    /// Foot brake plus handbrake.
    FootHand,
    /// Foot + hand, plus extra brake when steering left at low speed.
    FootHandSkidLeft,
    /// Foot + hand, plus extra brake when steering right at low speed.
    FootHandSkidRight,
}

impl BrakeCombo {
    #[inline]
    pub fn has_any(&self) -> bool {
        !matches!(self, BrakeCombo::Free)
    }

    #[inline]
    pub fn has_handbrake(&self) -> bool {
        !matches!(self, BrakeCombo::Free | BrakeCombo::FootOnly)
    }
}

/// Spawn topology variant. The force path is identical for all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WheelKind {
    #[default]
    Plain,
    Mesh,
    FlexBody,
    /// Double-ring wheel with a separate tyre lattice.
    Wheel2,
}

/// Propulsion mode of a wheel.
pub const WHEEL_NOT_PROPULSED: u8 = 0;
pub const WHEEL_PROPULSED: u8 = 1;
pub const WHEEL_PROPULSED_REVERSE: u8 = 2;

/// One wheel: rim/tyre nodes around an axis, plus the brake reaction arm.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wheel {
    /// Contact nodes, alternating between the two axis-side rings.
    pub nodes: Vec<NodeIndex>,
    pub axis0: NodeIndex,
    pub axis1: NodeIndex,
    /// Brake reaction torque is applied between these two.
    pub arm: NodeIndex,
    pub near_attach: NodeIndex,
    pub propulsed: u8,
    pub braking: BrakeCombo,
    pub kind: WheelKind,
    pub radius: f32,
    pub width: f32,
    pub detacher_group: i32,
    pub detached: bool,
    /// Peripheral speed in m/s, averaged over the contact nodes.
    pub speed: f32,
    pub last_speed: f32,
    /// Running speed average used by the anti-skid brake logic.
    pub avg_speed: f32,
    pub first_lock: bool,
    /// Torsion offset shared with the axle differential.
    pub delta_rotation: f32,
    /// Accumulated angular position in radians (published).
    pub rotation: f32,
    /// Slip magnitude of the most recent ground contact (published).
    pub last_slip: f32,
    /// Ground model of the most recent contact (published).
    pub last_contact_gm: Option<GroundModelId>,
}

impl Wheel {
    pub fn new(axis0: NodeIndex, axis1: NodeIndex, arm: NodeIndex, near_attach: NodeIndex) -> Self {
        Self {
            nodes: Vec::new(),
            axis0,
            axis1,
            arm,
            near_attach,
            propulsed: WHEEL_NOT_PROPULSED,
            braking: BrakeCombo::default(),
            kind: WheelKind::default(),
            radius: 0.5,
            width: 0.3,
            detacher_group: 0,
            detached: false,
            speed: 0.0,
            last_speed: 0.0,
            avg_speed: 0.0,
            first_lock: true,
            delta_rotation: 0.0,
            rotation: 0.0,
            last_slip: 0.0,
            last_contact_gm: None,
        }
    }
}

/// Per-actor wheel set.
#[derive(Component, Debug, Clone, Default, Serialize, Deserialize)]
pub struct Wheels {
    pub wheels: Vec<Wheel>,
    /// Count of propelled wheels, cached at spawn.
    pub propelled_count: usize,
    /// Count of braked wheels, cached at spawn.
    pub braked_count: usize,
    /// Propelled wheel indices in traversal order, paired front-to-back for
    /// the legacy inter-differential coupling.
    pub prop_pairs: Vec<usize>,
}

impl Wheels {
    pub fn push(&mut self, wheel: Wheel) -> usize {
        if wheel.propulsed > 0 {
            self.propelled_count += 1;
            self.prop_pairs.push(self.wheels.len());
        }
        if wheel.braking.has_any() {
            self.braked_count += 1;
        }
        self.wheels.push(wheel);
        self.wheels.len() - 1
    }

    pub fn len(&self) -> usize {
        self.wheels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wheels.is_empty()
    }

    /// Detach every wheel in a fired detacher group.
    pub fn fire_detacher_group(&mut self, group: i32) {
        for wheel in &mut self.wheels {
            if wheel.detacher_group == group {
                wheel.detached = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_counts_propelled_and_braked() {
        let mut wheels = Wheels::default();
        let mut w = Wheel::new(0, 1, 2, 3);
        w.propulsed = WHEEL_PROPULSED;
        w.braking = BrakeCombo::FootHand;
        wheels.push(w);
        wheels.push(Wheel::new(4, 5, 6, 7));
        assert_eq!(wheels.propelled_count, 1);
        assert_eq!(wheels.braked_count, 1);
        assert_eq!(wheels.prop_pairs, vec![0]);
    }

    #[test]
    fn test_brake_combo_flags() {
        assert!(!BrakeCombo::Free.has_any());
        assert!(BrakeCombo::FootOnly.has_any());
        assert!(!BrakeCombo::FootOnly.has_handbrake());
        assert!(BrakeCombo::FootHandSkidLeft.has_handbrake());
    }

    #[test]
    fn test_detacher_group() {
        let mut wheels = Wheels::default();
        let mut w = Wheel::new(0, 1, 2, 3);
        w.detacher_group = 4;
        wheels.push(w);
        wheels.fire_detacher_group(4);
        assert!(wheels.wheels[0].detached);
    }
}
