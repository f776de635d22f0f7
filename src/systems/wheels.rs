//! Wheel torque application, braking aids and the drivetrain coupling.

use bevy_ecs::prelude::*;
use glam::Vec3;

use crate::driveline::{DifferentialData, Driveline, RAD_PER_SEC_TO_RPM};
use crate::events::EventQueue;
use crate::rig::actor::{ActorId, ActorState, Controls, Hydros, Meters};
use crate::rig::node::NodeStore;
use crate::rig::wheel::{Wheels, WHEEL_PROPULSED, WHEEL_PROPULSED_REVERSE};
use crate::systems::DeltaTime;

/// Advance the engine state machine. Runs first in the force phase; the
/// wheel pass afterwards consumes the delivered torque.
pub fn engine_system(
    dt: Res<DeltaTime>,
    mut events: ResMut<EventQueue>,
    mut query: Query<(&ActorId, &ActorState, &Controls, &mut Driveline)>,
) {
    for (actor_id, state, controls, mut driveline) in query.iter_mut() {
        if !state.is_simulated() {
            continue;
        }
        let mut event_sink = Vec::new();
        let wheel_speed = driveline.wheel_speed;
        if let Some(engine) = driveline.engine.as_mut() {
            engine.throttle = controls.throttle;
            // Speed limiter: fade the throttle out over the last 5% below
            // the target.
            if let Some(limit) = controls.speed_limit {
                if limit > 0.0 {
                    let fade = ((limit - wheel_speed.abs()) / (limit * 0.05)).clamp(0.0, 1.0);
                    engine.throttle *= fade;
                }
            }
            if let Some(clutch) = controls.clutch {
                engine.clutch = clutch;
            }
            engine.update(dt.0, controls.brake, &mut event_sink, actor_id.0);
        }
        for event in event_sink {
            events.push(event);
        }
    }
}

/// Distribute drive and brake torque to the wheel nodes and track wheel
/// speeds and slip.
pub fn wheel_force_system(
    dt: Res<DeltaTime>,
    mut query: Query<(
        &ActorState,
        &Controls,
        &Hydros,
        &mut NodeStore,
        &mut Wheels,
        &mut Driveline,
        &mut Meters,
    )>,
) {
    for (state, controls, hydros, mut nodes, mut wheels, mut driveline, mut meters) in
        query.iter_mut()
    {
        if !state.is_simulated() || wheels.is_empty() {
            continue;
        }
        apply_wheel_forces(
            dt.0,
            controls,
            hydros.dir_state,
            &mut nodes,
            &mut wheels,
            &mut driveline,
            &mut meters,
        );
    }
}

/// The full per-actor wheel pass.
pub fn apply_wheel_forces(
    dt: f32,
    controls: &Controls,
    steer_state: f32,
    nodes: &mut NodeStore,
    wheels: &mut Wheels,
    driveline: &mut Driveline,
    meters: &mut Meters,
) {
    let wheel_count = wheels.len();
    let mut newspeeds = vec![0.0f32; wheel_count];
    let mut intertorque = vec![0.0f32; wheel_count];

    let engine_torque_total = driveline
        .engine
        .as_ref()
        .map(|e| e.torque_out())
        .unwrap_or(0.0);
    let engine_torque = if wheels.propelled_count > 0 {
        engine_torque_total / wheels.propelled_count as f32
    } else {
        0.0
    };

    // Detached wheels track their partner so differentials stay sane.
    for a in driveline.axles.iter() {
        let (w1, w2) = (a.wheel_1, a.wheel_2);
        if wheels.wheels[w1].detached {
            wheels.wheels[w1].speed = wheels.wheels[w2].speed;
        }
        if wheels.wheels[w2].detached {
            wheels.wheels[w2].speed = wheels.wheels[w1].speed;
        }
    }

    if driveline.axles.is_empty() {
        // Old-style viscous inter-differential locking over propelled pairs.
        let pairs = &wheels.prop_pairs;
        if pairs.len() >= 4 {
            for i in 0..pairs.len() / 2 - 1 {
                let (a0, a1) = (pairs[i * 2], pairs[i * 2 + 1]);
                let (b0, b1) = (pairs[i * 2 + 2], pairs[i * 2 + 3]);
                let speed1 = (wheels.wheels[a0].speed + wheels.wheels[a1].speed) * 0.5;
                let speed2 = (wheels.wheels[b0].speed + wheels.wheels[b1].speed) * 0.5;
                let torque = (speed1 - speed2) * 10_000.0;
                intertorque[a0] -= torque * 0.5;
                intertorque[a1] -= torque * 0.5;
                intertorque[b0] += torque * 0.5;
                intertorque[b1] += torque * 0.5;
            }
        }
    } else {
        // Inter-axle torsion keeps consecutive axles aligned as if shafted.
        for i in 1..driveline.axles.len() {
            let speed_prev = {
                let a = &driveline.axles[i - 1];
                (wheels.wheels[a.wheel_1].speed + wheels.wheels[a.wheel_2].speed) * 0.5
            };
            let speed_cur = {
                let a = &driveline.axles[i];
                (wheels.wheels[a.wheel_1].speed + wheels.wheels[a.wheel_2].speed) * 0.5
            };
            let mut data = DifferentialData {
                speed: [speed_prev, speed_cur],
                delta_rotation: 0.0,
                out_torque: [0.0; 2],
                in_torque: 0.0,
                dt,
            };
            let prev_delta = driveline.axles[i - 1].diff.delta_rotation;
            data.delta_rotation = prev_delta;
            crate::driveline::Differential::calc_locked(&mut data);
            driveline.axles[i - 1].diff.delta_rotation = data.delta_rotation;

            let (p1, p2) = {
                let a = &driveline.axles[i - 1];
                (a.wheel_1, a.wheel_2)
            };
            let (c1, c2) = {
                let a = &driveline.axles[i];
                (a.wheel_1, a.wheel_2)
            };
            intertorque[p1] = data.out_torque[0];
            intertorque[p2] = data.out_torque[0];
            intertorque[c1] = data.out_torque[1];
            intertorque[c2] = data.out_torque[1];
        }

        // Per-axle differential splits twice the per-wheel engine torque
        // plus whatever the inter-axle coupling moved here.
        for i in 0..driveline.axles.len() {
            let (w1, w2) = (driveline.axles[i].wheel_1, driveline.axles[i].wheel_2);
            let mut data = DifferentialData {
                speed: [wheels.wheels[w1].speed, wheels.wheels[w2].speed],
                delta_rotation: 0.0,
                out_torque: [0.0; 2],
                in_torque: 2.0 * engine_torque + intertorque[w1],
                dt,
            };
            driveline.axles[i].diff.calc_torque(&mut data);
            intertorque[w1] = data.out_torque[0];
            intertorque[w2] = data.out_torque[1];
        }
    }

    driveline.tick_pulses(dt);

    // Road speed reference is the chassis root node.
    let mut curspeed = nodes.read(0).velocity.length();
    let throttle = controls.throttle;
    let brake_force = controls.brake * driveline.brake_force;

    let mut wspeed = 0.0;
    let mut alb_active = false;
    let mut tc_active = false;
    let mut propcounter = 0usize;

    for i in 0..wheel_count {
        let mut total_torque: f32 = if wheels.wheels[i].propulsed > 0 {
            if driveline.axles.is_empty() {
                engine_torque
            } else {
                intertorque[i]
            }
        } else {
            0.0
        };

        // Braking.
        if wheels.wheels[i].braking.has_any() {
            let mut hbrake = 0.0;
            if controls.parking_brake && wheels.wheels[i].braking.has_handbrake() {
                hbrake = driveline.hand_brake_force;
            }

            // Low-speed directional brake for skid-steer combos.
            let mut dbrake = 0.0;
            let combo = wheels.wheels[i].braking;
            if driveline.wheel_speed < 20.0
                && ((combo == crate::rig::wheel::BrakeCombo::FootHandSkidLeft && steer_state > 0.0)
                    || (combo == crate::rig::wheel::BrakeCombo::FootHandSkidRight
                        && steer_state < 0.0))
            {
                dbrake = driveline.brake_force * steer_state.abs();
            }

            let wh_speed = wheels.wheels[i].speed;
            if (brake_force != 0.0 || dbrake != 0.0 || hbrake != 0.0) && wh_speed.abs() > 0.0 {
                let mut brake_coef = 1.0;
                let mut antilock_coef = 1.0;

                // Anti-lock: pulse the brake off while the wheel slips past
                // the allowed ratio above the minimum road speed.
                if let Some(alb) = driveline.alb.filter(|_| driveline.alb_enabled) {
                    let slip_ratio = if curspeed > 0.01 {
                        (curspeed - wh_speed.abs()).max(0.0) / curspeed
                    } else {
                        0.0
                    };
                    if (brake_force > 0.0 || dbrake > 0.0)
                        && slip_ratio > alb.ratio
                        && curspeed > alb.min_speed
                    {
                        if driveline.alb_pulse_state {
                            antilock_coef = 0.0;
                        }
                        alb_active = true;
                    }
                }

                if wh_speed.abs() < 1.0 {
                    if wheels.wheels[i].first_lock {
                        wheels.wheels[i].avg_speed = 0.0;
                        wheels.wheels[i].first_lock = false;
                    }
                    // Anti-jitter near lockup.
                    if wheels.wheels[i].avg_speed.abs() < 2.0 {
                        brake_coef = wh_speed.abs().powi(2);
                    } else {
                        brake_coef = wh_speed.abs().sqrt();
                    }
                    // Anti-skidding: zero the brake when the prediction says
                    // the wheel is about to reverse.
                    wheels.wheels[i].avg_speed =
                        (wheels.wheels[i].avg_speed + wh_speed).clamp(-10.0, 10.0);
                    let speed_diff = wh_speed - wheels.wheels[i].last_speed;
                    let prediction = wh_speed + 0.5 * speed_diff;
                    if prediction * wheels.wheels[i].avg_speed < 0.0 {
                        brake_coef = 0.0;
                    }
                } else {
                    wheels.wheels[i].first_lock = true;
                }

                let braking = ((brake_force + dbrake) * antilock_coef + hbrake) * brake_coef;
                if wh_speed > 0.0 {
                    total_torque -= braking;
                } else {
                    total_torque += braking;
                }
            }
        } else {
            wheels.wheels[i].first_lock = true;
        }

        // Traction control: cut drive torque while the wheel spins up.
        if let Some(tc) = driveline.tc.filter(|_| driveline.tc_enabled) {
            if wheels.wheels[i].propulsed > 0 && throttle > 0.0 {
                curspeed = curspeed.max(0.5);
                let allowed = curspeed * (1.0 + tc.wheelslip);
                let wh_speed = wheels.wheels[i].speed;
                if wh_speed.abs() > allowed {
                    if driveline.tc_pulse_state {
                        let torque_coef = (allowed / wh_speed.abs()).clamp(0.0, 1.0);
                        total_torque *= torque_coef;
                        tc_active = torque_coef < 0.9;
                    }
                    driveline.tc_fade_timer = tc.fade;
                } else if driveline.tc_fade_timer > 0.0 && driveline.tc_pulse_state {
                    total_torque *= 0.5;
                    tc_active = true;
                }
            }
        }

        // Old-style differential locking between wheel partners.
        if driveline.axles.is_empty() && wheels.wheels[i].propulsed > 0 {
            if i % 2 == 1 {
                if !wheels.wheels[i].detached && !wheels.wheels[i - 1].detached {
                    total_torque -= (wheels.wheels[i].speed - wheels.wheels[i - 1].speed) * 10_000.0;
                } else if i + 1 < wheel_count
                    && !wheels.wheels[i].detached
                    && !wheels.wheels[i + 1].detached
                {
                    total_torque -= (wheels.wheels[i].speed - wheels.wheels[i + 1].speed) * 10_000.0;
                }
            }
            if propcounter < intertorque.len() {
                total_torque += intertorque[propcounter];
            }
            propcounter += 1;
        }

        if wheels.wheels[i].detached {
            continue;
        }

        // Apply the torque as tangential node forces.
        let axis0 = wheels.wheels[i].axis0;
        let axis1 = wheels.wheels[i].axis1;
        let mut axis = nodes.read(axis1).rel_position - nodes.read(axis0).rel_position;
        axis = axis.normalize_or_zero();
        let num_nodes = wheels.wheels[i].nodes.len();
        if num_nodes == 0 || axis == Vec3::ZERO {
            continue;
        }
        let axis_precalc = total_torque / num_nodes as f32;

        let mut speedacc = 0.0;
        for j in 0..num_nodes {
            let node_idx = wheels.wheels[i].nodes[j];
            let ref_axis = if j % 2 == 1 { axis1 } else { axis0 };
            let mut radius = nodes.read(node_idx).rel_position - nodes.read(ref_axis).rel_position;
            let r_sq = radius.length_squared();
            if r_sq < 1e-12 {
                continue;
            }
            let inv_rlen = r_sq.sqrt().recip();
            if wheels.wheels[i].propulsed == WHEEL_PROPULSED_REVERSE {
                radius = -radius;
            }
            let dir = axis.cross(radius);
            nodes.get_mut(node_idx).forces += dir * (axis_precalc * inv_rlen * inv_rlen);
            speedacc += (nodes.read(node_idx).velocity - nodes.read(ref_axis).velocity).dot(dir)
                * inv_rlen;
        }

        newspeeds[i] = speedacc / num_nodes as f32;
        if wheels.wheels[i].propulsed == WHEEL_PROPULSED {
            wspeed += newspeeds[i];
        }
        let radius = wheels.wheels[i].radius.max(0.01);
        wheels.wheels[i].rotation += (newspeeds[i] / radius) * dt;

        // Reaction torque on the suspension arm, modulated by how far the
        // arm strays from the wheel plane.
        let rradius = nodes.read(wheels.wheels[i].arm).rel_position
            - nodes.read(wheels.wheels[i].near_attach).rel_position;
        let mut radius_v = rradius - axis * rradius.dot(axis);
        let rlen = radius_v.length();
        let offset = (rradius - radius_v).length();
        let taxis = axis * total_torque;
        if rlen > 0.01 {
            radius_v /= 2.0 * rlen * rlen;
            let mut cforce = taxis.cross(radius_v);
            if offset * 2.0 > rlen {
                cforce = Vec3::ZERO; // too much error
            } else {
                cforce *= 1.0 - (offset * 2.0) / rlen;
            }
            nodes.get_mut(wheels.wheels[i].arm).forces -= cforce;
            nodes.get_mut(wheels.wheels[i].near_attach).forces += cforce;
        }
    }

    driveline.alb_active = alb_active;
    driveline.tc_active = tc_active;

    for i in 0..wheel_count {
        wheels.wheels[i].last_speed = wheels.wheels[i].speed;
        wheels.wheels[i].speed = newspeeds[i];
    }
    if wheels.propelled_count > 0 {
        wspeed /= wheels.propelled_count as f32;
    }
    driveline.wheel_speed = wspeed;

    let first_radius = wheels.wheels.first().map(|w| w.radius).unwrap_or(0.0);
    if let Some(engine) = driveline.engine.as_mut() {
        if first_radius > 0.0 {
            engine.wheel_revolutions = wspeed / first_radius * RAD_PER_SEC_TO_RPM;
        }
    }

    meters.odometer += (wspeed * dt).abs();
}
