//! Parsed actor definitions.
//!
//! The file parser is an external collaborator; this module is its output
//! contract. Everything here is spawn-time input only - the "defaults"
//! blocks in particular are parser context and never survive into runtime
//! components.

use serde::{Deserialize, Serialize};

use crate::driveline::DiffKind;
use crate::rig::wheel::{BrakeCombo, WheelKind};

/// Reference to a node, either by its declared id or by positional index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeRef {
    Id(i32),
    Index(usize),
}

/// Per-section tunable defaults, carried along while building entries.
/// Parser context only; consumed by the spawn pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Defaults {
    pub spring: f32,
    pub damp: f32,
    pub deform: f32,
    pub strength: f32,
    pub plastic_coef: f32,
    pub friction: f32,
    pub volume: f32,
    pub surface: f32,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            spring: 9_000_000.0,
            damp: 12_000.0,
            deform: 400_000.0,
            strength: 1_000_000.0,
            plastic_coef: 0.0,
            friction: 1.0,
            volume: 1.0,
            surface: 1.0,
        }
    }
}

/// Global mass budget of the actor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalsDef {
    /// Dry mass distributed over unloaded nodes, kg.
    pub dry_mass: f32,
    /// Cargo mass distributed over load-bearing nodes, kg.
    pub load_mass: f32,
    /// Floor for any single node's mass, kg.
    pub minimum_mass: f32,
}

impl Default for GlobalsDef {
    fn default() -> Self {
        Self {
            dry_mass: 10_000.0,
            load_mass: 0.0,
            minimum_mass: 50.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDef {
    pub id: i32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    #[serde(default)]
    pub fixed: bool,
    /// Explicit mass override; otherwise distributed from globals.
    #[serde(default)]
    pub mass: Option<f32>,
    #[serde(default)]
    pub load_bearing: bool,
    #[serde(default)]
    pub contacter: bool,
    #[serde(default)]
    pub no_ground_contact: bool,
    #[serde(default)]
    pub buoyancy: Option<f32>,
    #[serde(default = "neg_one")]
    pub lockgroup: i32,
    #[serde(default)]
    pub coll_cohort: Option<usize>,
}

fn neg_one() -> i32 {
    -1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeamDef {
    pub node1: NodeRef,
    pub node2: NodeRef,
    #[serde(default)]
    pub spring: Option<f32>,
    #[serde(default)]
    pub damp: Option<f32>,
    #[serde(default)]
    pub strength: Option<f32>,
    #[serde(default)]
    pub deform: Option<f32>,
    #[serde(default)]
    pub support: bool,
    /// Support break limit as a rest-length multiple.
    #[serde(default)]
    pub support_break_limit: Option<f32>,
    #[serde(default)]
    pub rope: bool,
    #[serde(default)]
    pub invisible: bool,
    #[serde(default)]
    pub detacher_group: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShockDef {
    pub node1: NodeRef,
    pub node2: NodeRef,
    pub spring_in: f32,
    pub damp_in: f32,
    #[serde(default)]
    pub spring_out: Option<f32>,
    #[serde(default)]
    pub damp_out: Option<f32>,
    #[serde(default)]
    pub progression_in: f32,
    #[serde(default)]
    pub progression_out: f32,
    /// Compression bound as a fraction of the rest length.
    pub short_bound: f32,
    /// Extension bound as a fraction of the rest length.
    pub long_bound: f32,
    #[serde(default = "one")]
    pub precompression: f32,
    #[serde(default)]
    pub soft_bump: bool,
    #[serde(default)]
    pub trigger: Option<TriggerDef>,
    #[serde(default)]
    pub detacher_group: i32,
}

fn one() -> f32 {
    1.0
}

/// Trigger behaviour riding on a shock beam.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerDef {
    pub short_action: usize,
    pub long_action: usize,
    #[serde(default)]
    pub boundary_timer: f32,
    #[serde(default)]
    pub blocker: bool,
    #[serde(default)]
    pub inverted_blocker: bool,
    #[serde(default)]
    pub cmd_blocker: bool,
    #[serde(default)]
    pub cmd_switch: bool,
    #[serde(default)]
    pub continuous: bool,
    #[serde(default)]
    pub hook_lock: bool,
    #[serde(default)]
    pub hook_unlock: bool,
    #[serde(default)]
    pub engine_trigger: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HydroDef {
    pub node1: NodeRef,
    pub node2: NodeRef,
    pub ratio: f32,
    /// Control-channel flags, `HYDRO_FLAG_*`.
    #[serde(default)]
    pub flags: u32,
    #[serde(default)]
    pub start_delay: f32,
    #[serde(default)]
    pub stop_delay: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandBeamDef {
    pub node1: NodeRef,
    pub node2: NodeRef,
    pub key: usize,
    /// Shortest length as a fraction of the rest length.
    pub short_len: f32,
    /// Longest length as a fraction of the rest length.
    pub long_len: f32,
    pub rate_short: f32,
    pub rate_long: f32,
    /// Negative: this key contracts the beam.
    #[serde(default)]
    pub contracting: bool,
    #[serde(default = "one")]
    pub engine_coupling: f32,
    #[serde(default)]
    pub needs_engine: bool,
    #[serde(default)]
    pub force_restricted: bool,
    #[serde(default)]
    pub auto_center: bool,
    #[serde(default)]
    pub center_length: f32,
    #[serde(default)]
    pub one_press_mode: u8,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub start_delay: f32,
    #[serde(default)]
    pub stop_delay: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WheelDef {
    pub axis1: NodeRef,
    pub axis2: NodeRef,
    /// Brake reaction arm node.
    pub arm: NodeRef,
    pub radius: f32,
    pub width: f32,
    pub rays: usize,
    pub mass: f32,
    pub spring: f32,
    pub damp: f32,
    #[serde(default)]
    pub kind: WheelKind,
    #[serde(default)]
    pub braking: BrakeCombo,
    /// 0 = free rolling, 1 = propelled, 2 = propelled in reverse.
    #[serde(default)]
    pub propulsion: u8,
    #[serde(default)]
    pub detacher_group: i32,
    /// Second ring radius for wheel2-style tyres.
    #[serde(default)]
    pub tyre_radius: Option<f32>,
    #[serde(default)]
    pub tyre_spring: Option<f32>,
    #[serde(default)]
    pub tyre_damp: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotatorDef {
    pub axis1: NodeRef,
    pub axis2: NodeRef,
    pub base_plate: [NodeRef; 4],
    pub rotating_plate: [NodeRef; 4],
    pub rate: f32,
    pub force: f32,
    #[serde(default = "rot_tolerance")]
    pub tolerance: f32,
    pub key_cw: usize,
    pub key_ccw: usize,
    #[serde(default = "one")]
    pub engine_coupling: f32,
    #[serde(default)]
    pub needs_engine: bool,
}

fn rot_tolerance() -> f32 {
    0.05
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookDef {
    pub node: NodeRef,
    #[serde(default = "neg_one")]
    pub group: i32,
    #[serde(default = "neg_one")]
    pub lockgroup: i32,
    #[serde(default = "hook_range")]
    pub lock_range: f32,
    #[serde(default = "hook_speed")]
    pub lock_speed: f32,
    #[serde(default = "hook_force")]
    pub max_force: f32,
    #[serde(default)]
    pub auto_lock: bool,
    #[serde(default)]
    pub self_lock: bool,
    #[serde(default)]
    pub no_disable: bool,
    #[serde(default = "hook_timer")]
    pub timer: f32,
}

fn hook_range() -> f32 {
    0.4
}
fn hook_speed() -> f32 {
    0.00025
}
fn hook_force() -> f32 {
    10_000_000.0
}
fn hook_timer() -> f32 {
    5.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RopeDef {
    pub root_node: NodeRef,
    pub end_node: NodeRef,
    #[serde(default)]
    pub group: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TieDef {
    pub root_node: NodeRef,
    pub max_reach: f32,
    pub rate: f32,
    pub short_len: f32,
    #[serde(default)]
    pub group: i32,
    #[serde(default = "tie_stress")]
    pub max_stress: f32,
}

fn tie_stress() -> f32 {
    100_000.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlideNodeDef {
    pub node: NodeRef,
    pub rail: Vec<NodeRef>,
    #[serde(default = "slide_spring")]
    pub spring: f32,
    #[serde(default = "slide_damp")]
    pub damping: f32,
    #[serde(default)]
    pub break_force: Option<f32>,
}

fn slide_spring() -> f32 {
    9_000_000.0
}
fn slide_damp() -> f32 {
    4_000.0
}

/// Collision cabinet triangle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CabTriangleDef {
    pub nodes: [NodeRef; 3],
    #[serde(default)]
    pub contact: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineDef {
    pub min_rpm: f32,
    pub max_rpm: f32,
    pub torque: f32,
    /// Differential ratio premultiplied onto every gear.
    pub diff_ratio: f32,
    /// Reverse, then forward gear ratios.
    pub gear_ratios: Vec<f32>,
    #[serde(default)]
    pub torque_curve: Vec<(f32, f32)>,
    #[serde(default)]
    pub clutch_force: Option<f32>,
    #[serde(default)]
    pub inertia: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AxleDef {
    pub wheel_1: usize,
    pub wheel_2: usize,
    #[serde(default)]
    pub diffs: Vec<DiffKind>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BrakesDef {
    pub force: f32,
    #[serde(default)]
    pub hand_force: Option<f32>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AlbDef {
    pub ratio: f32,
    pub min_speed: f32,
    pub pulse_hz: f32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TcDef {
    pub wheelslip: f32,
    pub fade: f32,
    pub pulse_hz: f32,
}

/// A complete parsed actor definition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActorDef {
    pub name: String,
    #[serde(default)]
    pub globals: GlobalsDef,
    #[serde(default)]
    pub defaults: Defaults,
    pub nodes: Vec<NodeDef>,
    #[serde(default)]
    pub beams: Vec<BeamDef>,
    #[serde(default)]
    pub shocks: Vec<ShockDef>,
    #[serde(default)]
    pub hydros: Vec<HydroDef>,
    #[serde(default)]
    pub commands: Vec<CommandBeamDef>,
    #[serde(default)]
    pub wheels: Vec<WheelDef>,
    #[serde(default)]
    pub rotators: Vec<RotatorDef>,
    #[serde(default)]
    pub hooks: Vec<HookDef>,
    #[serde(default)]
    pub ropes: Vec<RopeDef>,
    #[serde(default)]
    pub ties: Vec<TieDef>,
    #[serde(default)]
    pub slidenodes: Vec<SlideNodeDef>,
    #[serde(default)]
    pub cab_triangles: Vec<CabTriangleDef>,
    #[serde(default)]
    pub submesh_ground_model: Option<String>,
    #[serde(default)]
    pub disable_drag: bool,
    #[serde(default)]
    pub engine: Option<EngineDef>,
    #[serde(default)]
    pub axles: Vec<AxleDef>,
    #[serde(default)]
    pub brakes: Option<BrakesDef>,
    #[serde(default)]
    pub alb: Option<AlbDef>,
    #[serde(default)]
    pub tc: Option<TcDef>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_def_json_roundtrip() {
        let def = ActorDef {
            name: "testbox".to_string(),
            nodes: vec![NodeDef {
                id: 0,
                x: 0.0,
                y: 1.0,
                z: 0.0,
                fixed: false,
                mass: None,
                load_bearing: false,
                contacter: true,
                no_ground_contact: false,
                buoyancy: None,
                lockgroup: -1,
                coll_cohort: None,
            }],
            ..ActorDef::default()
        };
        let json = serde_json::to_string(&def).unwrap();
        let back: ActorDef = serde_json::from_str(&json).unwrap();
        assert_eq!(back.name, "testbox");
        assert_eq!(back.nodes.len(), 1);
        assert!(back.nodes[0].contacter);
    }

    #[test]
    fn test_defaults_omittable_in_json() {
        let json = r#"{
            "name": "minimal",
            "nodes": [
                {"id": 0, "x": 0.0, "y": 0.0, "z": 0.0}
            ]
        }"#;
        let def: ActorDef = serde_json::from_str(json).unwrap();
        assert_eq!(def.nodes[0].lockgroup, -1);
        assert!(def.beams.is_empty());
        assert!(def.engine.is_none());
    }
}
