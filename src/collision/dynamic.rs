//! Inter- and intra-actor collision resolution: triangle-point tests with
//! the back-face heuristic and adaptive per-triangle rate limiting.

use glam::Vec3;

use crate::collision::aabb::Aabb;
use crate::collision::point_col::PointColDetector;
use crate::collision::primitive::point_response;
use crate::collision::triangle::{inside_triangle, CartesianToTriangleTransform, Triangle};
use crate::ground::GroundModel;
use crate::rig::actor::Cabs;
use crate::rig::node::{NodeIndex, NodeStore};

/// Rate value marking a self-colliding triangle as permanently hot.
const INTRA_HOT_RATE: i32 = -20_000;
/// Upper bound on how many sub-steps a quiet triangle may skip.
const MAX_SKIP: i32 = 12;

/// Mutable view of one actor inside the collision pass.
pub struct DynActor<'a> {
    pub id: u32,
    pub nodes: &'a mut NodeStore,
    pub cabs: &'a mut Cabs,
    pub connections: &'a [Vec<NodeIndex>],
    /// Networked actors absorb no reaction force locally.
    pub remote: bool,
}

/// Decide whether a collision happens on the back face of a triangle.
///
/// The colliding node's signed distance is weighted `weight`; each
/// beam-connected neighbour contributes its sign once. A negative sum means
/// the cluster sits behind the plane, so the contact is a back-face one.
/// This is a heuristic, not an accurate calculation - thin panels carry no
/// reliable orientation data.
pub fn backface_collision_test(
    distance: f32,
    normal: Vec3,
    surface_point: Vec3,
    neighbours: &[NodeIndex],
    nodes: &NodeStore,
    weight: i32,
) -> bool {
    let sign = |x: f32| if x >= 0.0 { 1 } else { -1 };

    let mut face_indicator = weight * sign(distance);

    // Neighbour votes only matter when they can still flip the outcome.
    if neighbours.len() as i32 > weight {
        for &id in neighbours {
            let neighbour_distance = normal.dot(nodes.read(id).abs_position - surface_point);
            face_indicator += sign(neighbour_distance);
        }
    }

    face_indicator < 0
}

fn triangle_of(nodes: &NodeStore, tri: [NodeIndex; 3]) -> Triangle {
    Triangle::new(
        nodes.read(tri[0]).abs_position,
        nodes.read(tri[1]).abs_position,
        nodes.read(tri[2]).abs_position,
    )
}

fn tri_aabb(t: &Triangle, range: f32) -> Aabb {
    let mut aabb = Aabb::from_point(t.a);
    aabb.merge_point(t.b);
    aabb.merge_point(t.c);
    aabb.inflated(range)
}

/// Resolve self-collisions of one actor. Wheel/tyre nodes and the triangle's
/// own vertices are excluded; a negative signed distance flips the normal
/// outright (the back-face heuristic is reserved for inter-actor contacts).
pub fn resolve_intra_collisions(
    actor: &mut DynActor<'_>,
    detector: &PointColDetector,
    collrange: f32,
    dt: f32,
    gm: &GroundModel,
    hits: &mut Vec<u32>,
) {
    for ci in 0..actor.cabs.coll_tris.len() {
        let rate = &mut actor.cabs.intra_rate[ci];
        if rate.rate > 0 {
            rate.distance += 1;
            rate.rate -= 1;
            continue;
        }
        if rate.distance > 0 {
            rate.rate = rate.distance.min(MAX_SKIP);
            rate.distance = 0;
        }

        let tri_nodes = actor.cabs.tris[actor.cabs.coll_tris[ci]];
        let triangle = triangle_of(actor.nodes, tri_nodes);
        detector.query(&tri_aabb(&triangle, collrange), hits);

        let mut collision = false;
        if !hits.is_empty() {
            let transform = CartesianToTriangleTransform::new(&triangle);
            let base_normal = triangle.normal();

            for &h in hits.iter() {
                let point = detector.point(h);
                if point.actor != actor.id {
                    continue;
                }
                let hit_idx = point.node;
                {
                    let hitnode = actor.nodes.read(hit_idx);
                    // Ignore wheel/chassis self contact.
                    if hitnode.tyre_node || hitnode.wheel_id.is_some() {
                        continue;
                    }
                }
                if tri_nodes.contains(&hit_idx) {
                    continue;
                }

                let local = transform.transform(actor.nodes.read(hit_idx).abs_position);
                if !inside_triangle(&local, collrange) {
                    continue;
                }
                collision = true;

                let mut normal = base_normal;
                let mut distance = local.distance;
                if distance < 0.0 {
                    normal = -normal;
                    distance = -distance;
                }
                let penetration = collrange - distance;

                apply_contact_force(
                    actor.nodes,
                    None,
                    hit_idx,
                    tri_nodes,
                    [local.alpha, local.beta, local.gamma],
                    normal,
                    penetration,
                    dt,
                    gm,
                    false,
                );
            }
        }

        let rate = &mut actor.cabs.intra_rate[ci];
        if collision {
            rate.rate = INTRA_HOT_RATE;
        } else {
            rate.rate += 1;
        }
    }
}

/// Resolve collisions of one actor's triangles against every other actor's
/// contactable points. Callers iterate triangle owners in actor-id order.
#[allow(clippy::too_many_arguments)]
pub fn resolve_inter_collisions(
    actors: &mut [DynActor<'_>],
    owner_idx: usize,
    detector: &PointColDetector,
    collrange: f32,
    dt: f32,
    gm: &GroundModel,
    backface_weight: i32,
    hits: &mut Vec<u32>,
) {
    let owner_id = actors[owner_idx].id;
    for ci in 0..actors[owner_idx].cabs.coll_tris.len() {
        {
            let rate = &mut actors[owner_idx].cabs.inter_rate[ci];
            if rate.rate > 0 {
                rate.distance += 1;
                rate.rate -= 1;
                continue;
            }
            rate.rate = rate.distance.min(MAX_SKIP);
            rate.distance = 0;
        }

        let tri_nodes = actors[owner_idx].cabs.tris[actors[owner_idx].cabs.coll_tris[ci]];
        let triangle = triangle_of(actors[owner_idx].nodes, tri_nodes);
        detector.query(&tri_aabb(&triangle, collrange), hits);

        let mut any_hit = false;
        let mut any_collision = false;
        let transform = CartesianToTriangleTransform::new(&triangle);
        let base_normal = triangle.normal();
        let surface_point = triangle.c;

        for &h in hits.iter() {
            let (hit_actor_id, hit_idx) = {
                let p = detector.point(h);
                (p.actor, p.node)
            };
            if hit_actor_id == owner_id {
                continue;
            }
            let Some(other_idx) = actors.iter().position(|a| a.id == hit_actor_id) else {
                continue;
            };
            any_hit = true;

            let (owner, other) = two_mut(actors, owner_idx, other_idx);

            let local = transform.transform(other.nodes.read(hit_idx).abs_position);
            if !inside_triangle(&local, collrange) {
                continue;
            }
            any_collision = true;

            let mut normal = base_normal;
            let mut distance = local.distance;
            let neighbours = other
                .connections
                .get(hit_idx)
                .map(|v| v.as_slice())
                .unwrap_or(&[]);
            if backface_collision_test(
                distance,
                normal,
                surface_point,
                neighbours,
                other.nodes,
                backface_weight,
            ) {
                normal = -normal;
                distance = -distance;
            }
            let penetration = collrange - distance;

            apply_contact_force(
                owner.nodes,
                Some(&mut *other.nodes),
                hit_idx,
                tri_nodes,
                [local.alpha, local.beta, local.gamma],
                normal,
                penetration,
                dt,
                gm,
                other.remote,
            );
        }

        let rate = &mut actors[owner_idx].cabs.inter_rate[ci];
        if any_collision {
            rate.rate = 0;
        } else if !any_hit {
            rate.rate += 1;
        }
    }
}

/// Compute and distribute one contact force: `+f` on the hit point,
/// `-αf, -βf, -γf` on the triangle vertices.
#[allow(clippy::too_many_arguments)]
fn apply_contact_force(
    tri_nodes_store: &mut NodeStore,
    hit_store: Option<&mut NodeStore>,
    hit_idx: NodeIndex,
    tri: [NodeIndex; 3],
    bary: [f32; 3],
    normal: Vec3,
    penetration: f32,
    dt: f32,
    gm: &GroundModel,
    remote: bool,
) {
    let [alpha, beta, gamma] = bary;
    let (na, nb, nc) = (
        tri_nodes_store.read(tri[0]).clone(),
        tri_nodes_store.read(tri[1]).clone(),
        tri_nodes_store.read(tri[2]).clone(),
    );

    let (hit_velocity, hit_mass, hit_forces) = match &hit_store {
        Some(store) => {
            let n = store.read(hit_idx);
            (n.velocity, n.mass, n.forces)
        }
        None => {
            let n = tri_nodes_store.read(hit_idx);
            (n.velocity, n.mass, n.forces)
        }
    };

    let surface_velocity = na.velocity * alpha + nb.velocity * beta + nc.velocity * gamma;
    let rel_velocity = hit_velocity - surface_velocity;

    let tr_mass = na.mass * alpha + nb.mass * beta + nc.mass * gamma;
    let mass = if remote {
        hit_mass
    } else {
        (hit_mass * tr_mass) / (hit_mass + tr_mass)
    };

    let tri_force = na.forces * alpha + nb.forces * beta + nc.forces * gamma;
    let force = point_response(
        rel_velocity,
        mass,
        normal,
        penetration,
        hit_forces,
        tri_force,
        dt,
        gm,
    );

    match hit_store {
        Some(store) => {
            let n = store.get_mut(hit_idx);
            n.forces += force;
            n.contacted = true;
        }
        None => {
            let n = tri_nodes_store.get_mut(hit_idx);
            n.forces += force;
            n.contacted = true;
        }
    }
    tri_nodes_store.get_mut(tri[0]).forces -= force * alpha;
    tri_nodes_store.get_mut(tri[1]).forces -= force * beta;
    tri_nodes_store.get_mut(tri[2]).forces -= force * gamma;
}

/// Disjoint mutable access to two slice elements.
fn two_mut<'a, T>(slice: &'a mut [T], i: usize, j: usize) -> (&'a mut T, &'a mut T) {
    debug_assert!(i != j);
    if i < j {
        let (head, tail) = slice.split_at_mut(j);
        (&mut head[i], &mut tail[0])
    } else {
        let (head, tail) = slice.split_at_mut(i);
        (&mut tail[0], &mut head[j])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rig::node::NodeOptions;

    fn store_with(points: &[Vec3]) -> NodeStore {
        let mut store = NodeStore::new();
        for &p in points {
            store.add(p, 1.0, NodeOptions::default());
        }
        store
    }

    #[test]
    fn test_backface_positive_sum_keeps_orientation() {
        // Node in front of the plane, no neighbours: indicator = +weight.
        let nodes = store_with(&[Vec3::new(0.0, 0.5, 0.0)]);
        let flipped = backface_collision_test(0.5, Vec3::Y, Vec3::ZERO, &[], &nodes, 3);
        assert!(!flipped);
    }

    #[test]
    fn test_backface_idempotent_on_positive_weighted_sign() {
        // Applying the heuristic to an already-positive configuration must
        // not flip (n, d): four neighbours in front, node in front.
        let nodes = store_with(&[
            Vec3::new(0.0, 0.1, 0.0),
            Vec3::new(1.0, 0.2, 0.0),
            Vec3::new(-1.0, 0.2, 0.0),
            Vec3::new(0.0, 0.2, 1.0),
            Vec3::new(0.0, 0.2, -1.0),
        ]);
        let flipped =
            backface_collision_test(0.1, Vec3::Y, Vec3::ZERO, &[1, 2, 3, 4], &nodes, 3);
        assert!(!flipped);
    }

    #[test]
    fn test_backface_neighbours_outvote_node() {
        // Node barely in front (weight 3), but five neighbours behind.
        let nodes = store_with(&[
            Vec3::new(0.0, 0.01, 0.0),
            Vec3::new(1.0, -0.5, 0.0),
            Vec3::new(-1.0, -0.5, 0.0),
            Vec3::new(0.0, -0.5, 1.0),
            Vec3::new(0.0, -0.5, -1.0),
            Vec3::new(0.5, -0.5, 0.5),
        ]);
        let flipped =
            backface_collision_test(0.01, Vec3::Y, Vec3::ZERO, &[1, 2, 3, 4, 5], &nodes, 3);
        assert!(flipped);
    }

    #[test]
    fn test_backface_few_neighbours_never_outvote() {
        // Three neighbours (== weight) cannot change the outcome, so the
        // heuristic skips them entirely.
        let nodes = store_with(&[
            Vec3::new(0.0, 0.01, 0.0),
            Vec3::new(1.0, -0.5, 0.0),
            Vec3::new(-1.0, -0.5, 0.0),
            Vec3::new(0.0, -0.5, 1.0),
        ]);
        let flipped = backface_collision_test(0.01, Vec3::Y, Vec3::ZERO, &[1, 2, 3], &nodes, 3);
        assert!(!flipped);
    }

    #[test]
    fn test_two_mut_disjoint() {
        let mut v = vec![1, 2, 3, 4];
        let (a, b) = two_mut(&mut v, 3, 1);
        *a += 10;
        *b += 20;
        assert_eq!(v, vec![1, 22, 3, 14]);
    }
}
