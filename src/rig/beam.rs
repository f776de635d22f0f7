//! Beams - one-dimensional constraints between nodes - and the beam store.

use bevy_ecs::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::MIN_BEAM_LENGTH;
use crate::rig::node::NodeIndex;

// Shock behaviour flags.
pub const SHOCK_FLAG_NORMAL: u32 = 1 << 0;
pub const SHOCK_FLAG_SOFTBUMP: u32 = 1 << 1;
pub const SHOCK_FLAG_ISTRIGGER: u32 = 1 << 2;
pub const SHOCK_FLAG_TRG_BLOCKER: u32 = 1 << 3;
pub const SHOCK_FLAG_TRG_BLOCKER_A: u32 = 1 << 4;
pub const SHOCK_FLAG_TRG_CMD_SWITCH: u32 = 1 << 5;
pub const SHOCK_FLAG_TRG_CMD_BLOCKER: u32 = 1 << 6;
pub const SHOCK_FLAG_TRG_CONTINUOUS: u32 = 1 << 7;
pub const SHOCK_FLAG_TRG_HOOK_LOCK: u32 = 1 << 8;
pub const SHOCK_FLAG_TRG_HOOK_UNLOCK: u32 = 1 << 9;
pub const SHOCK_FLAG_TRG_ENGINE: u32 = 1 << 10;

// Hydro control-channel flags.
pub const HYDRO_FLAG_SPEED: u32 = 1 << 0;
pub const HYDRO_FLAG_DIR: u32 = 1 << 1;
pub const HYDRO_FLAG_AILERON: u32 = 1 << 2;
pub const HYDRO_FLAG_RUDDER: u32 = 1 << 3;
pub const HYDRO_FLAG_ELEVATOR: u32 = 1 << 4;
pub const HYDRO_FLAG_REV_AILERON: u32 = 1 << 5;
pub const HYDRO_FLAG_REV_RUDDER: u32 = 1 << 6;
pub const HYDRO_FLAG_REV_ELEVATOR: u32 = 1 << 7;

/// What drives a beam. Structural beams deform plastically; driven beams
/// get their rest length managed by their owning mechanism instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BeamRole {
    #[default]
    Structural,
    Hydro,
    Command,
    Tie,
    Hook,
}

/// Length-bound behaviour of a beam.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BeamBound {
    #[default]
    None,
    /// Linear interpolation towards hard-stop spring/damp past the bounds.
    Shock1,
    /// Progressive spring/damp curves with separate compression and
    /// extension parameters; owns a `Shock` record.
    Shock2,
    /// One-sided: no spring force while slack.
    Rope,
    /// One-sided with a break limit: no force while compressed.
    Support,
}

/// A one-dimensional constraint between two distinct nodes.
///
/// Kept deliberately flat: the evaluator walks every beam every sub-step,
/// and the command/hydro fields are cold for plain structural beams.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Beam {
    pub p1: NodeIndex,
    pub p2: NodeIndex,
    /// When set, `p2` indexes into another actor's node store.
    pub p2_actor: Option<u32>,
    /// Spring rate.
    pub k: f32,
    /// Damping.
    pub d: f32,
    /// Current rest length.
    pub rest_len: f32,
    /// Reference length from spawn time; command/hydro ratios are relative
    /// to this.
    pub ref_len: f32,
    /// Hydro base length; the hydro factor scales this, not `rest_len`.
    pub hydro_len: f32,
    pub role: BeamRole,
    pub bound: BeamBound,
    /// Bound ratios relative to `rest_len` (shock) or absolute limits
    /// (support break length).
    pub short_bound: f32,
    pub long_bound: f32,
    pub precompression: f32,
    /// Index into the owning store's shock records for Shock1/Shock2 beams.
    pub shock: Option<usize>,
    /// Signed stress from the last evaluation.
    pub stress: f32,
    pub strength: f32,
    /// Running deformation thresholds per direction.
    pub max_pos_stress: f32,
    pub max_neg_stress: f32,
    /// `min(max_pos_stress, -max_neg_stress, strength)`, the fast deform
    /// gate.
    pub deform_threshold: f32,
    pub plastic_coef: f32,
    /// Beams sharing a non-zero detacher group break together.
    pub detacher_group: i32,
    pub broken: bool,
    /// Disabled beams contribute nothing; used for parked inter-actor beams.
    pub disabled: bool,
    pub invisible: bool,

    // Command drive.
    pub command_ratio_long: f32,
    pub command_ratio_short: f32,
    pub command_short: f32,
    pub command_long: f32,
    pub command_engine_coupling: f32,
    pub command_needs_engine: bool,
    pub is_force_restricted: bool,
    pub is_centering: bool,
    pub center_length: f32,
    /// 0 = hold mode, 1 = one-press, 2 = one-press with centering.
    pub one_press_mode: u8,
    pub auto_move_lock: bool,
    /// -1/0/1 plus the one-press phase encoding.
    pub auto_moving_mode: i8,
    pub pressed_center_mode: bool,

    // Hydro drive.
    pub hydro_flags: u32,
    pub hydro_ratio: f32,
}

impl Beam {
    /// A plain structural beam with defaults suitable for direct store
    /// insertion. Everything else is built on top of this.
    pub fn new(p1: NodeIndex, p2: NodeIndex, k: f32, d: f32, rest_len: f32) -> Self {
        let rest_len = rest_len.max(MIN_BEAM_LENGTH);
        Self {
            p1,
            p2,
            p2_actor: None,
            k,
            d,
            rest_len,
            ref_len: rest_len,
            hydro_len: rest_len,
            role: BeamRole::Structural,
            bound: BeamBound::None,
            short_bound: 0.0,
            long_bound: 0.0,
            precompression: 1.0,
            shock: None,
            stress: 0.0,
            strength: f32::MAX,
            max_pos_stress: f32::MAX,
            max_neg_stress: f32::MIN,
            deform_threshold: f32::MAX,
            plastic_coef: 0.0,
            detacher_group: 0,
            broken: false,
            disabled: false,
            invisible: false,
            command_ratio_long: 0.0,
            command_ratio_short: 0.0,
            command_short: 0.0,
            command_long: 0.0,
            command_engine_coupling: 1.0,
            command_needs_engine: false,
            is_force_restricted: false,
            is_centering: false,
            center_length: 0.0,
            one_press_mode: 0,
            auto_move_lock: false,
            auto_moving_mode: 0,
            pressed_center_mode: false,
            hydro_flags: 0,
            hydro_ratio: 0.0,
        }
    }

    /// Set the breaking strength and deformation threshold together.
    pub fn with_limits(mut self, strength: f32, deform: f32, plastic_coef: f32) -> Self {
        self.strength = strength;
        self.max_pos_stress = deform;
        self.max_neg_stress = -deform;
        self.deform_threshold = deform.min(strength);
        self.plastic_coef = plastic_coef;
        self
    }

    #[inline]
    pub fn is_inter_actor(&self) -> bool {
        self.p2_actor.is_some()
    }
}

/// Progressive shock parameters and trigger state for a Shock2 beam.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shock {
    pub beam_id: usize,
    pub flags: u32,
    pub spring_in: f32,
    pub damp_in: f32,
    pub spring_out: f32,
    pub damp_out: f32,
    /// Progression factors, multiplied by the squared bound ratio.
    pub sprog_in: f32,
    pub dprog_in: f32,
    pub sprog_out: f32,
    pub dprog_out: f32,
    /// Hard-stop spring/damp once a bound is crossed.
    pub sbd_spring: f32,
    pub sbd_damp: f32,
    /// Stretch at the previous sub-step, to detect direction changes.
    pub last_pos: f32,
    pub trigger_enabled: bool,
    /// Countdown preventing a switch trigger from re-firing inside the
    /// boundary.
    pub trigger_switch_state: f32,
    pub trigger_boundary_t: f32,
    pub trigger_cmd_short: usize,
    pub trigger_cmd_long: usize,
}

impl Shock {
    pub fn new(beam_id: usize, flags: u32) -> Self {
        Self {
            beam_id,
            flags,
            spring_in: 0.0,
            damp_in: 0.0,
            spring_out: 0.0,
            damp_out: 0.0,
            sprog_in: 0.0,
            dprog_in: 0.0,
            sprog_out: 0.0,
            dprog_out: 0.0,
            sbd_spring: 0.0,
            sbd_damp: 0.0,
            last_pos: 0.0,
            trigger_enabled: true,
            trigger_switch_state: 0.0,
            trigger_boundary_t: 0.0,
            trigger_cmd_short: 0,
            trigger_cmd_long: 0,
        }
    }
}

/// Dense, append-only array of beams plus the shock records they reference.
#[derive(Component, Debug, Clone, Default, Serialize, Deserialize)]
pub struct BeamStore {
    beams: Vec<Beam>,
    pub shocks: Vec<Shock>,
}

impl BeamStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, beam: Beam) -> usize {
        self.beams.push(beam);
        self.beams.len() - 1
    }

    /// Attach a shock record to a beam.
    pub fn add_shock(&mut self, shock: Shock) -> usize {
        let beam_id = shock.beam_id;
        self.shocks.push(shock);
        let shock_idx = self.shocks.len() - 1;
        self.beams[beam_id].shock = Some(shock_idx);
        shock_idx
    }

    pub fn set_broken(&mut self, index: usize) {
        self.beams[index].broken = true;
        self.beams[index].disabled = true;
    }

    pub fn len(&self) -> usize {
        self.beams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.beams.is_empty()
    }

    pub fn get(&self, index: usize) -> &Beam {
        &self.beams[index]
    }

    pub fn get_mut(&mut self, index: usize) -> &mut Beam {
        &mut self.beams[index]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Beam> {
        self.beams.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Beam> {
        self.beams.iter_mut()
    }

    /// Count of live (non-broken, non-disabled) beams touching a node.
    pub fn live_connections(&self, node: NodeIndex) -> usize {
        self.beams
            .iter()
            .filter(|b| !b.broken && !b.disabled && (b.p1 == node || b.p2 == node))
            .count()
    }

    /// Break every beam whose detacher group matches `|group|`, and report
    /// how many were affected.
    pub fn fire_detacher_group(&mut self, group: i32) -> usize {
        let mut affected = 0;
        for beam in &mut self.beams {
            if beam.detacher_group.abs() == group && !beam.broken {
                beam.broken = true;
                beam.disabled = true;
                affected += 1;
            }
        }
        affected
    }
}

impl std::ops::Index<usize> for BeamStore {
    type Output = Beam;

    fn index(&self, index: usize) -> &Beam {
        &self.beams[index]
    }
}

impl std::ops::IndexMut<usize> for BeamStore {
    fn index_mut(&mut self, index: usize) -> &mut Beam {
        &mut self.beams[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_break() {
        let mut store = BeamStore::new();
        let idx = store.add(Beam::new(0, 1, 9000.0, 12.0, 1.0));
        assert!(!store.get(idx).broken);
        store.set_broken(idx);
        assert!(store.get(idx).broken);
        assert!(store.get(idx).disabled);
    }

    #[test]
    fn test_rest_length_floor() {
        let beam = Beam::new(0, 1, 1.0, 1.0, 0.0001);
        assert_eq!(beam.rest_len, MIN_BEAM_LENGTH);
    }

    #[test]
    fn test_detacher_group_atomic() {
        let mut store = BeamStore::new();
        for i in 0..4 {
            let mut beam = Beam::new(i, i + 1, 100.0, 1.0, 1.0);
            beam.detacher_group = if i < 3 { 2 } else { 0 };
            store.add(beam);
        }
        let affected = store.fire_detacher_group(2);
        assert_eq!(affected, 3);
        assert!(store.get(0).broken && store.get(1).broken && store.get(2).broken);
        assert!(!store.get(3).broken);
    }

    #[test]
    fn test_live_connections() {
        let mut store = BeamStore::new();
        store.add(Beam::new(0, 1, 1.0, 1.0, 1.0));
        store.add(Beam::new(0, 2, 1.0, 1.0, 1.0));
        let third = store.add(Beam::new(0, 3, 1.0, 1.0, 1.0));
        assert_eq!(store.live_connections(0), 3);
        store.set_broken(third);
        assert_eq!(store.live_connections(0), 2);
    }

    #[test]
    fn test_shock_attachment() {
        let mut store = BeamStore::new();
        let beam = store.add(Beam::new(0, 1, 1.0, 1.0, 1.0));
        let shock = store.add_shock(Shock::new(beam, SHOCK_FLAG_NORMAL));
        assert_eq!(store.get(beam).shock, Some(shock));
        assert_eq!(store.shocks[shock].beam_id, beam);
    }
}
