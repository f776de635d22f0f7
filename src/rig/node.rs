//! Point masses and the per-actor node store.

use bevy_ecs::prelude::*;
use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::ground::GroundModelId;

/// Index into an actor's [`NodeStore`]. Stable for the actor's lifetime.
pub type NodeIndex = usize;

/// Water exposure state of a node, published for particle collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WetState {
    #[default]
    Dry,
    /// Recently left the water, still shedding drops.
    Dripping,
    Wet,
}

/// Hook coupling state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LockState {
    #[default]
    Unlocked,
    /// A hook has latched on and is winching towards full lock.
    Prelock,
    Locked,
}

/// A point mass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Position relative to the owning actor's origin.
    pub rel_position: Vec3,
    /// Absolute world position, `origin + rel_position`.
    pub abs_position: Vec3,
    pub velocity: Vec3,
    /// Force accumulator, cleared and reseeded every sub-step.
    pub forces: Vec3,
    /// Mass in kg; always > 0.
    pub mass: f32,
    /// `1 / mass`, or 0 for pinned nodes so integration is a no-op.
    pub inv_mass: f32,
    pub friction_coef: f32,
    /// Basic water buoyancy force in N (positive is up).
    pub buoyancy: f32,
    /// Fluid buoyancy volume coefficient.
    pub volume_coef: f32,
    /// Fluid drag surface coefficient.
    pub surface_coef: f32,
    pub wet_state: WetState,
    pub wet_time: f32,
    pub lock_state: LockState,
    /// `Some(i)` when this node belongs to wheel `i`.
    pub wheel_id: Option<usize>,
    /// True for tyre contact nodes (wheel rim/tread).
    pub tyre_node: bool,
    /// Lockgroup for selective hook coupling; -1 accepts any hook.
    pub lockgroup: i32,
    /// Node takes part in self/inter-actor collision as a point.
    pub contacter: bool,
    /// Node can be hit by other actors' triangles.
    pub contactable: bool,
    /// Smart collision AABB cohort, if the definition assigned one.
    pub coll_cohort: Option<usize>,
    /// Stable id from the definition file; -1 for generated nodes.
    pub id: i32,
    pub no_ground_contact: bool,
    /// Countdown driving the ground-collision retest rate.
    pub coll_test_timer: f32,
    /// True while the node had a contact during the last collision pass.
    pub contacted: bool,
    /// Slip speed of the most recent surface contact (published).
    pub last_collision_slip: f32,
    /// Ground model of the most recent surface contact (published).
    pub last_collision_gm: Option<GroundModelId>,
}

/// Optional attributes for `NodeStore::add`.
#[derive(Debug, Clone)]
pub struct NodeOptions {
    pub friction_coef: f32,
    pub buoyancy: f32,
    pub volume_coef: f32,
    pub surface_coef: f32,
    pub contacter: bool,
    pub contactable: bool,
    pub lockgroup: i32,
    pub coll_cohort: Option<usize>,
    pub id: i32,
    pub no_ground_contact: bool,
}

impl Default for NodeOptions {
    fn default() -> Self {
        Self {
            friction_coef: 1.0,
            buoyancy: 0.0,
            volume_coef: 1.0,
            surface_coef: 1.0,
            contacter: false,
            contactable: true,
            lockgroup: -1,
            coll_cohort: None,
            id: -1,
            no_ground_contact: false,
        }
    }
}

/// Dense, append-only array of nodes. Nodes are never reordered or removed
/// after spawn so beam indices stay valid for the actor's lifetime.
#[derive(Component, Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeStore {
    nodes: Vec<Node>,
}

impl NodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a node and return its index. `mass` is clamped to stay
    /// strictly positive.
    pub fn add(&mut self, rel_position: Vec3, mass: f32, options: NodeOptions) -> NodeIndex {
        let mass = mass.max(f32::MIN_POSITIVE);
        self.nodes.push(Node {
            rel_position,
            abs_position: rel_position,
            velocity: Vec3::ZERO,
            forces: Vec3::ZERO,
            mass,
            inv_mass: 1.0 / mass,
            friction_coef: options.friction_coef,
            buoyancy: options.buoyancy,
            volume_coef: options.volume_coef,
            surface_coef: options.surface_coef,
            wet_state: WetState::Dry,
            wet_time: 0.0,
            lock_state: LockState::Unlocked,
            wheel_id: None,
            tyre_node: false,
            lockgroup: options.lockgroup,
            contacter: options.contacter,
            contactable: options.contactable,
            coll_cohort: options.coll_cohort,
            id: options.id,
            no_ground_contact: options.no_ground_contact,
            coll_test_timer: 0.0,
            contacted: false,
            last_collision_slip: 0.0,
            last_collision_gm: None,
        });
        self.nodes.len() - 1
    }

    /// Pin a node: its inverse mass becomes zero and integration skips it.
    pub fn mark_fixed(&mut self, index: NodeIndex) {
        self.nodes[index].inv_mass = 0.0;
    }

    pub fn read(&self, index: NodeIndex) -> &Node {
        &self.nodes[index]
    }

    pub fn get_mut(&mut self, index: NodeIndex) -> &mut Node {
        &mut self.nodes[index]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Node> {
        self.nodes.iter_mut()
    }

    /// Resolve a definition-file node id to an index.
    pub fn index_of_id(&self, id: i32) -> Option<NodeIndex> {
        self.nodes.iter().position(|n| n.id == id)
    }

    /// Total mass of the actor.
    pub fn total_mass(&self) -> f32 {
        self.nodes.iter().map(|n| n.mass).sum()
    }
}

impl std::ops::Index<NodeIndex> for NodeStore {
    type Output = Node;

    fn index(&self, index: NodeIndex) -> &Node {
        &self.nodes[index]
    }
}

impl std::ops::IndexMut<NodeIndex> for NodeStore {
    fn index_mut(&mut self, index: NodeIndex) -> &mut Node {
        &mut self.nodes[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_read() {
        let mut store = NodeStore::new();
        let idx = store.add(Vec3::new(1.0, 2.0, 3.0), 10.0, NodeOptions::default());
        assert_eq!(idx, 0);
        let node = store.read(idx);
        assert_eq!(node.rel_position, Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(node.mass, 10.0);
        assert!((node.inv_mass - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_mark_fixed_zeroes_inv_mass() {
        let mut store = NodeStore::new();
        let idx = store.add(Vec3::ZERO, 5.0, NodeOptions::default());
        store.mark_fixed(idx);
        assert_eq!(store.read(idx).inv_mass, 0.0);
        assert_eq!(store.read(idx).mass, 5.0); // mass itself is untouched
    }

    #[test]
    fn test_mass_always_positive() {
        let mut store = NodeStore::new();
        let idx = store.add(Vec3::ZERO, 0.0, NodeOptions::default());
        assert!(store.read(idx).mass > 0.0);
    }

    #[test]
    fn test_index_of_id() {
        let mut store = NodeStore::new();
        store.add(
            Vec3::ZERO,
            1.0,
            NodeOptions {
                id: 42,
                ..NodeOptions::default()
            },
        );
        assert_eq!(store.index_of_id(42), Some(0));
        assert_eq!(store.index_of_id(7), None);
    }
}
