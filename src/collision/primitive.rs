//! Single-point collision response against a surface.
//!
//! Two entry points share the friction model: `ground_collision` resolves a
//! node against the terrain heightfield (steady reaction from the node's own
//! accumulated force plus an impact term), and `point_response` computes the
//! impulse-like force for a point hitting a collision triangle.

use glam::Vec3;

use crate::ground::GroundModel;
use crate::rig::node::Node;

/// Outcome of a surface contact, fed back into slip bookkeeping.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContactInfo {
    pub slip: f32,
    pub normal_force: f32,
}

/// Resolve a node against solid ground (and a possible fluid layer above
/// it). Mutates the node's force accumulator directly and returns the slip
/// speed for particle/skid bookkeeping.
pub fn ground_collision(
    node: &mut Node,
    normal: Vec3,
    penetration: f32,
    dt: f32,
    gm: &GroundModel,
    gravity: f32,
) -> ContactInfo {
    let velocity = node.velocity;
    let v_normal = velocity.dot(normal);
    let mut force = node.forces;

    // Fluid layer above the solid ground: power-law drag plus buoyancy.
    if gm.solid_ground_level != 0.0 && penetration >= 0.0 {
        let v_squared = velocity.length_squared();
        let m = gm.flow_consistency_index * v_squared.powf((gm.flow_behavior_index - 1.0) * 0.5);
        let mut f_drag = velocity * (-m * node.surface_coef);

        // Anisotropic drag pushes back along the surface normal.
        if gm.drag_anisotropy < 1.0 && v_normal > 0.0 {
            let da_factor = if v_squared > gm.va * gm.va {
                1.0
            } else {
                v_squared / (gm.va * gm.va)
            };
            f_drag += normal * (v_normal * m * (1.0 - gm.drag_anisotropy) * da_factor);
        }
        force += f_drag;

        // Simplified buoyancy; pseudoplastic fluids only stop downward
        // motion, they never push a node out.
        let mut f_buoyancy = gm.fluid_density * penetration * (-gravity) * node.volume_coef;
        if gm.flow_behavior_index < 1.0 && v_normal >= 0.0 {
            let f_normal = force.dot(normal);
            if f_normal < 0.0 && f_buoyancy > -f_normal {
                f_buoyancy = -f_normal;
            }
        }
        force += normal * f_buoyancy;
    }

    let mut info = ContactInfo::default();

    // Touching or inside the solid ground.
    if penetration >= gm.solid_ground_level {
        let slip_vec = velocity - v_normal * normal;
        let slipv = slip_vec.length();
        let slip_dir = if slipv > 0.0 { slip_vec / slipv } else { Vec3::ZERO };

        let f_normal = force.dot(normal);
        let mut f_reaction = -f_normal;
        if v_normal < 0.0 {
            // Impact force, Newton's second law.
            f_reaction += -v_normal * node.mass / dt;
        }
        if f_reaction < 0.0 {
            f_reaction = 0.0;
        }
        node.last_collision_slip = slipv;

        let g_reaction = f_reaction * gm.strength * node.friction_coef;
        let ms_g_reaction = gm.ms * g_reaction;
        let tangent_force = force - f_normal * normal;
        if slipv < gm.va && g_reaction > 0.0 && tangent_force.length_squared() <= ms_g_reaction * ms_g_reaction
        {
            // Static friction, smoothed so the integrator can cope.
            let ff = -ms_g_reaction * (1.0 - (-slipv / gm.va).exp());
            force = (f_normal + f_reaction) * normal + ff * slip_dir;
        } else {
            // Stribeck sliding friction plus the hydrodynamic term.
            let g = gm.mc + (gm.ms - gm.mc) * (-(slipv / gm.vs).powf(gm.alpha)).exp();
            let ff = -(g + (gm.t2 * slipv).min(5.0)) * g_reaction;
            force += f_reaction * normal + ff * slip_dir;
        }

        info.slip = slipv;
        info.normal_force = f_reaction;
    }

    node.forces = force;
    info
}

/// Compute the response force for a point colliding with a triangle.
///
/// `rel_velocity` is the point velocity relative to the triangle surface,
/// `mass` the effective contact mass, `point_force`/`tri_force` the already
/// accumulated forces on the point and on the triangle surface point.
/// Returns the force to add to the point (the triangle vertices get the
/// barycentric-weighted negation).
#[allow(clippy::too_many_arguments)]
pub fn point_response(
    rel_velocity: Vec3,
    mass: f32,
    normal: Vec3,
    penetration: f32,
    point_force: Vec3,
    tri_force: Vec3,
    dt: f32,
    gm: &GroundModel,
) -> Vec3 {
    // Separating contacts contribute no velocity term.
    let v_normal = rel_velocity.dot(normal).min(0.0);

    let f_velocity = -mass * v_normal / dt;
    let f_penetration = mass * penetration / (dt * dt);
    // Pre-existing forces pressing the pair together.
    let f_tri = tri_force.dot(normal).max(0.0);
    let f_point = (-point_force.dot(normal)).max(0.0);

    let f_normal = 0.5 * (f_velocity + f_penetration + 0.5 * (f_tri + f_point));

    // Stribeck tangential friction, capped so the tangential velocity is
    // never reversed within one sub-step.
    let tangent_vel = rel_velocity - rel_velocity.dot(normal) * normal;
    let tangent_speed = tangent_vel.length();
    let mut f = normal * f_normal;
    if tangent_speed > 1e-6 {
        let mu = gm.mc + (gm.ms - gm.mc) * (-(tangent_speed / gm.vs).powi(2)).exp();
        let f_tangent = (mu * f_normal).min(mass * tangent_speed / dt);
        f -= (tangent_vel / tangent_speed) * f_tangent;
    }
    f
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rig::node::{NodeOptions, NodeStore};

    fn test_node(velocity: Vec3, forces: Vec3) -> Node {
        let mut store = NodeStore::new();
        let idx = store.add(Vec3::ZERO, 1.0, NodeOptions::default());
        let node = store.get_mut(idx);
        node.velocity = velocity;
        node.forces = forces;
        node.clone()
    }

    #[test]
    fn test_ground_contact_cancels_downward_velocity() {
        let mut node = test_node(Vec3::new(0.0, -5.0, 0.0), Vec3::new(0.0, -9.8, 0.0));
        let gm = GroundModel::default();
        let dt = 0.0005;
        let info = ground_collision(&mut node, Vec3::Y, 0.01, dt, &gm, -9.807);
        // Upward reaction exceeds the accumulated downward force.
        assert!(node.forces.y > 0.0);
        assert!(info.normal_force > 0.0);
        // One integration step must leave the node moving up or stopped.
        let v_next = node.velocity.y + node.forces.y * dt;
        assert!(v_next >= 0.0);
    }

    #[test]
    fn test_friction_opposes_slip() {
        let mut node = test_node(Vec3::new(10.0, 0.0, 0.0), Vec3::new(0.0, -100.0, 0.0));
        let gm = GroundModel {
            ms: 1.0,
            mc: 0.8,
            ..GroundModel::default()
        };
        ground_collision(&mut node, Vec3::Y, 0.0, 0.0005, &gm, -9.807);
        assert!(node.forces.x < 0.0, "friction must oppose slip");
    }

    #[test]
    fn test_static_friction_below_adhesion_velocity() {
        let mut node = test_node(Vec3::new(0.01, 0.0, 0.0), Vec3::new(0.1, -100.0, 0.0));
        let gm = GroundModel {
            va: 0.5,
            ms: 1.0,
            mc: 0.6,
            ..GroundModel::default()
        };
        let info = ground_collision(&mut node, Vec3::Y, 0.0, 0.0005, &gm, -9.807);
        assert!(info.slip < gm.va);
        // Static mode replaces the tangential force entirely.
        assert!(node.forces.x <= 0.0);
    }

    #[test]
    fn test_point_response_pushes_apart() {
        let gm = GroundModel::default();
        let f = point_response(
            Vec3::new(0.0, -2.0, 0.0),
            1.0,
            Vec3::Y,
            0.01,
            Vec3::ZERO,
            Vec3::ZERO,
            0.0005,
            &gm,
        );
        assert!(f.y > 0.0);
    }

    #[test]
    fn test_point_response_separating_contact_only_springs() {
        let gm = GroundModel::default();
        let dt = 0.0005;
        let separating = point_response(
            Vec3::new(0.0, 3.0, 0.0),
            1.0,
            Vec3::Y,
            0.01,
            Vec3::ZERO,
            Vec3::ZERO,
            dt,
            &gm,
        );
        let approaching = point_response(
            Vec3::new(0.0, -3.0, 0.0),
            1.0,
            Vec3::Y,
            0.01,
            Vec3::ZERO,
            Vec3::ZERO,
            dt,
            &gm,
        );
        // Both push out, but the approaching contact pushes harder.
        assert!(separating.y > 0.0);
        assert!(approaching.y > separating.y);
    }

    #[test]
    fn test_tangential_capped_by_reversal_limit() {
        let gm = GroundModel {
            ms: 50.0,
            mc: 50.0,
            ..GroundModel::default()
        };
        let dt = 0.0005;
        let mass = 1.0;
        let tangent_speed = 2.0;
        let f = point_response(
            Vec3::new(tangent_speed, -1.0, 0.0),
            mass,
            Vec3::Y,
            0.01,
            Vec3::ZERO,
            Vec3::ZERO,
            dt,
            &gm,
        );
        // Even with an absurd friction coefficient the tangential force may
        // at most cancel the tangential velocity in one step.
        assert!(f.x.abs() <= mass * tangent_speed / dt + 1e-3);
    }
}
