//! Ground collision and the fixed-step integrator.

use bevy_ecs::prelude::*;
use glam::Vec3;
use tracing::debug;

use crate::config::SimConfig;
use crate::ground::GroundModelRegistry;
use crate::rig::actor::{ActorBounds, ActorId, ActorState, Origin};
use crate::rig::node::{NodeStore, WetState};
use crate::rig::wheel::Wheels;
use crate::systems::{DeltaTime, FrameFlags};
use crate::terrain::TerrainResource;
use crate::collision::aabb::Aabb;

/// Test nodes against the terrain heightfield and resolve contacts.
///
/// Each node carries a retest countdown: quiet nodes are probed at the
/// configured interval, wheel nodes twice as often, contacted nodes every
/// sub-step. The accumulated countdown is also the effective timestep handed
/// to the contact response.
pub fn ground_collision_system(
    config: Res<SimConfig>,
    dt: Res<DeltaTime>,
    terrain: Option<Res<TerrainResource>>,
    registry: Res<GroundModelRegistry>,
    mut query: Query<(&ActorState, &mut NodeStore, &mut Wheels)>,
) {
    let Some(terrain) = terrain else {
        return;
    };
    for (state, mut nodes, mut wheels) in query.iter_mut() {
        if !state.is_simulated() {
            continue;
        }
        for i in 0..nodes.len() {
            let (test_due, test_dt) = {
                let node = nodes.get_mut(i);
                if node.no_ground_contact {
                    continue;
                }
                node.coll_test_timer += dt.0;
                let interval = if node.wheel_id.is_some() {
                    config.wheel_collision_interval
                } else {
                    config.node_collision_interval
                };
                (
                    node.contacted || node.coll_test_timer > interval,
                    node.coll_test_timer,
                )
            };
            if !test_due {
                continue;
            }

            let node = nodes.get_mut(i);
            node.contacted = false;
            let pos = node.abs_position;
            let height = terrain.0.height_at(pos.x, pos.z);
            if height > pos.y {
                let gm_name = terrain.0.ground_model_at(pos.x, pos.z).unwrap_or("default");
                let gm = registry.lookup_or_default(gm_name);
                let normal = terrain.0.normal_at(pos.x, pos.z);
                let info = crate::collision::primitive::ground_collision(
                    node,
                    normal,
                    height - pos.y,
                    test_dt,
                    gm,
                    config.gravity,
                );
                node.contacted = true;
                let gm_id = registry.id_of(gm_name).unwrap_or_else(|| registry.default_id());
                node.last_collision_gm = Some(gm_id);
                if let Some(wheel_id) = node.wheel_id {
                    if let Some(wheel) = wheels.wheels.get_mut(wheel_id) {
                        wheel.last_slip = info.slip;
                        wheel.last_contact_gm = Some(gm_id);
                    }
                }
            }
            nodes.get_mut(i).coll_test_timer = 0.0;
        }
    }
}

/// Semi-implicit Euler update of every node, followed by the per-actor
/// bookkeeping that must happen between sub-steps: wet-state aging, sanity
/// clamps, AABB refresh and origin re-centring.
pub fn integrate_system(
    config: Res<SimConfig>,
    dt: Res<DeltaTime>,
    frame: Res<FrameFlags>,
    mut query: Query<(
        &ActorId,
        &ActorState,
        &mut NodeStore,
        &mut Origin,
        &mut ActorBounds,
    )>,
) {
    for (actor_id, state, mut nodes, mut origin, mut bounds) in query.iter_mut() {
        if !state.is_simulated() {
            continue;
        }
        let dt = dt.0;

        for i in 0..nodes.len() {
            let node = nodes.get_mut(i);

            // Wetness ages once per frame, in frame time.
            if frame.do_update && node.wet_state == WetState::Dripping {
                node.wet_time += dt * frame.max_steps as f32;
                if node.wet_time > 5.0 {
                    node.wet_state = WetState::Dry;
                }
            }

            if node.inv_mass == 0.0 {
                // Pinned: position is wherever it was put.
                continue;
            }

            node.velocity += node.forces * node.inv_mass * dt;

            if !node.velocity.is_finite() {
                debug!(actor = actor_id.0, node = i, "non-finite velocity, clamped");
                node.velocity = Vec3::ZERO;
            } else if node.velocity.length_squared()
                > config.max_node_velocity * config.max_node_velocity
            {
                node.velocity = node.velocity.normalize() * config.max_node_velocity;
            }

            node.rel_position += node.velocity * dt;
            node.abs_position = origin.0 + node.rel_position;
        }

        refresh_bounds(&nodes, &mut bounds);

        // Anti-explosion guard: beyond this range float precision is gone
        // and the actor needs a reset, not more integration.
        let sum = bounds.full.min.x
            + bounds.full.min.y
            + bounds.full.min.z
            + bounds.full.max.x
            + bounds.full.max.y
            + bounds.full.max.z;
        if !(-1e9..=1e9).contains(&sum) || !sum.is_finite() {
            bounds.reset_requested = true;
            continue;
        }

        // Origin re-centring keeps relative coordinates small.
        if nodes.len() > 0 {
            let shift = nodes.read(0).rel_position;
            if shift.length() > config.origin_shift_distance {
                origin.0 += shift;
                for i in 0..nodes.len() {
                    nodes.get_mut(i).rel_position -= shift;
                }
            }
        }
    }
}

/// Rebuild the full, smart and predicted boxes from node positions.
pub fn refresh_bounds(nodes: &NodeStore, bounds: &mut ActorBounds) {
    let mut full = Aabb::EMPTY;
    for aabb in bounds.smart.iter_mut() {
        *aabb = Aabb::EMPTY;
    }
    for node in nodes.iter() {
        full.merge_point(node.abs_position);
        if let Some(cohort) = node.coll_cohort {
            if cohort >= bounds.smart.len() {
                bounds.smart.resize(cohort + 1, Aabb::EMPTY);
            }
            bounds.smart[cohort].merge_point(node.abs_position);
        }
    }

    let root_velocity = nodes
        .iter()
        .next()
        .map(|n| n.velocity)
        .unwrap_or(Vec3::ZERO);

    bounds.full = full.inflated(0.05);
    let mut predicted = bounds.full;
    predicted.merge_point(bounds.full.min + root_velocity);
    predicted.merge_point(bounds.full.max + root_velocity);
    bounds.predicted = predicted;

    bounds.smart_predicted.resize(bounds.smart.len(), Aabb::EMPTY);
    for i in 0..bounds.smart.len() {
        let aabb = bounds.smart[i];
        if aabb.is_empty() {
            bounds.smart_predicted[i] = Aabb::EMPTY;
            continue;
        }
        let inflated = aabb.inflated(0.05);
        let mut predicted = inflated;
        predicted.merge_point(inflated.min + root_velocity);
        predicted.merge_point(inflated.max + root_velocity);
        bounds.smart[i] = inflated;
        bounds.smart_predicted[i] = predicted;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rig::node::NodeOptions;

    #[test]
    fn test_refresh_bounds_covers_all_nodes() {
        let mut nodes = NodeStore::new();
        nodes.add(Vec3::new(-1.0, 0.0, 0.0), 1.0, NodeOptions::default());
        nodes.add(Vec3::new(1.0, 2.0, 3.0), 1.0, NodeOptions::default());
        let mut bounds = ActorBounds::default();
        refresh_bounds(&nodes, &mut bounds);
        assert!(bounds.full.contains_point(Vec3::new(-1.0, 0.0, 0.0)));
        assert!(bounds.full.contains_point(Vec3::new(1.0, 2.0, 3.0)));
        // Inflation margin.
        assert!(bounds.full.contains_point(Vec3::new(-1.04, 0.0, 0.0)));
    }

    #[test]
    fn test_predicted_bounds_extend_by_velocity() {
        let mut nodes = NodeStore::new();
        let idx = nodes.add(Vec3::ZERO, 1.0, NodeOptions::default());
        nodes.get_mut(idx).velocity = Vec3::new(10.0, 0.0, 0.0);
        let mut bounds = ActorBounds::default();
        refresh_bounds(&nodes, &mut bounds);
        assert!(bounds.predicted.contains_point(Vec3::new(9.0, 0.0, 0.0)));
        assert!(!bounds.full.contains_point(Vec3::new(9.0, 0.0, 0.0)));
    }

    #[test]
    fn test_smart_bounds_split_cohorts() {
        let mut nodes = NodeStore::new();
        nodes.add(
            Vec3::ZERO,
            1.0,
            NodeOptions {
                coll_cohort: Some(0),
                ..NodeOptions::default()
            },
        );
        nodes.add(
            Vec3::new(10.0, 0.0, 0.0),
            1.0,
            NodeOptions {
                coll_cohort: Some(1),
                ..NodeOptions::default()
            },
        );
        let mut bounds = ActorBounds::default();
        refresh_bounds(&nodes, &mut bounds);
        assert_eq!(bounds.smart.len(), 2);
        assert!(bounds.smart[0].contains_point(Vec3::ZERO));
        assert!(!bounds.smart[0].contains_point(Vec3::new(10.0, 0.0, 0.0)));
        assert!(bounds.smart[1].contains_point(Vec3::new(10.0, 0.0, 0.0)));
    }
}
