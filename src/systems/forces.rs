//! Force seeding and the beam evaluator.

use bevy_ecs::prelude::*;
use glam::Vec3;
use tracing::debug;

use crate::config::{SimConfig, DEFAULT_DRAG, DEFAULT_WATERDRAG, MIN_BEAM_LENGTH, SUPPORT_BEAM_LIMIT_DEFAULT};
use crate::driveline::Driveline;
use crate::events::{EventQueue, SimEvent};
use crate::rig::actor::{ActorId, ActorState, ActorStatics, Attachments, HookState, Meters};
use crate::rig::beam::{BeamBound, BeamRole, BeamStore};
use crate::rig::commands::CommandSet;
use crate::rig::node::{NodeStore, WetState};
use crate::rig::wheel::Wheels;
use crate::systems::shocks::{calc_shock1, calc_shock2, TriggerRequests};
use crate::systems::{DeltaTime, FrameFlags};
use crate::terrain::TerrainResource;

/// Clear every accumulator and seed it with gravity, viscous air drag and
/// basic water drag/buoyancy.
pub fn seed_forces_system(
    config: Res<SimConfig>,
    terrain: Option<Res<TerrainResource>>,
    mut events: ResMut<EventQueue>,
    mut query: Query<(
        &ActorId,
        &ActorState,
        &ActorStatics,
        &mut NodeStore,
        &mut Driveline,
        &mut Meters,
    )>,
) {
    for (actor_id, state, statics, mut nodes, mut driveline, mut meters) in query.iter_mut() {
        if !state.is_simulated() {
            continue;
        }
        meters.water_contact = false;

        for i in 0..nodes.len() {
            let node = nodes.get_mut(i);
            node.forces = Vec3::new(0.0, node.mass * config.gravity, 0.0);

            // Viscous drag, turbulent model.
            if !statics.disable_drag {
                let speed = node.velocity.length();
                node.forces += -(DEFAULT_DRAG * speed) * node.velocity;
            }

            // Water: drag, basic buoyancy and the wet-state transition.
            let water = terrain
                .as_ref()
                .and_then(|t| t.0.water_level(node.abs_position.x, node.abs_position.z));
            if let Some(level) = water {
                if node.abs_position.y < level {
                    let speed = node.velocity.length();
                    node.forces -= (DEFAULT_WATERDRAG * speed) * node.velocity;
                    node.forces += node.buoyancy * Vec3::Y;
                    if node.wet_state != WetState::Wet {
                        events.push(SimEvent::NodeTouchedWater {
                            actor: actor_id.0,
                            node: i,
                        });
                    }
                    node.wet_state = WetState::Wet;
                    // Water over the chassis reference node drowns the
                    // engine.
                    if i == 0 {
                        if let Some(engine) = driveline.engine.as_mut() {
                            engine.stop();
                        }
                    }
                    meters.water_contact = true;
                } else if node.wet_state == WetState::Wet {
                    node.wet_state = WetState::Dripping;
                    node.wet_time = 0.0;
                }
            }
        }
    }
}

/// Evaluate every intra-actor beam: spring-damper forces, shock curves,
/// plastic deformation, breakage and detacher groups.
pub fn beam_forces_system(
    dt: Res<DeltaTime>,
    frame: Res<FrameFlags>,
    mut events: ResMut<EventQueue>,
    mut query: Query<(
        &ActorId,
        &ActorState,
        &mut NodeStore,
        &mut BeamStore,
        &mut CommandSet,
        &mut Wheels,
        &mut Driveline,
        &mut Attachments,
    )>,
) {
    for (actor_id, state, mut nodes, mut beams, mut commands, mut wheels, mut driveline, mut attachments) in
        query.iter_mut()
    {
        if !state.is_simulated() {
            continue;
        }
        let mut requests = TriggerRequests::default();
        evaluate_beams(
            actor_id.0,
            dt.0,
            frame.do_update,
            &mut nodes,
            &mut beams,
            &mut commands,
            &mut wheels,
            &mut requests,
            &mut events,
        );

        // Trigger side effects.
        for (group, lock) in requests.hook_toggles.drain(..) {
            for (hook_idx, hook) in attachments.hooks.iter_mut().enumerate() {
                if hook.group != group {
                    continue;
                }
                if lock {
                    if hook.state == HookState::Unlocked && hook.timer <= 0.0 {
                        hook.state = HookState::Prelock;
                    }
                } else if hook.state != HookState::Unlocked {
                    hook.state = HookState::Preunlock;
                    events.push(SimEvent::HookUnlocked {
                        actor: actor_id.0,
                        hook: hook_idx,
                    });
                }
            }
        }
        if requests.engine_toggle {
            if let Some(engine) = driveline.engine.as_mut() {
                engine.trigger_toggle();
            }
        }
    }
}

/// One actor's beam pass. Iteration is strictly beam-index ascending; force
/// accumulation order is part of the determinism contract.
#[allow(clippy::too_many_arguments)]
pub fn evaluate_beams(
    actor: u32,
    dt: f32,
    do_update: bool,
    nodes: &mut NodeStore,
    beams: &mut BeamStore,
    commands: &mut CommandSet,
    wheels: &mut Wheels,
    requests: &mut TriggerRequests,
    events: &mut EventQueue,
) {
    for i in 0..beams.len() {
        if beams[i].disabled || beams[i].broken || beams[i].is_inter_actor() {
            continue;
        }

        let (p1, p2) = (beams[i].p1, beams[i].p2);
        let dis = nodes.read(p1).rel_position - nodes.read(p2).rel_position;
        let dislen_sq = dis.length_squared();
        let degenerate_limit = MIN_BEAM_LENGTH * MIN_BEAM_LENGTH;
        if dislen_sq < 1e-12
            || (beams[i].role == BeamRole::Structural
                && dislen_sq < degenerate_limit * degenerate_limit)
        {
            // Degenerate beam: endpoints collapsed onto each other. Break it
            // and move on rather than dividing by zero.
            beams.set_broken(i);
            debug!(actor, beam = i, "beam degenerated, marked broken");
            events.push(SimEvent::BeamBroken { actor, beam: i });
            continue;
        }
        let inv_dislen = dislen_sq.sqrt().recip();
        let dislen = dislen_sq * inv_dislen;
        let diff = dislen - beams[i].rest_len;

        let mut k = beams[i].k;
        let mut d = beams[i].d;

        match beams[i].bound {
            BeamBound::Shock1 => calc_shock1(beams, i, diff, &mut k, &mut d),
            BeamBound::Shock2 => {
                let (nk, nd) =
                    calc_shock2(beams, i, diff, dt, do_update, actor, commands, requests, events);
                k = nk;
                d = nd;
            }
            BeamBound::Support => {
                if diff > 0.0 {
                    k = 0.0;
                    d *= 0.1;
                    let break_limit = if beams[i].long_bound > 0.0 {
                        beams[i].long_bound
                    } else {
                        SUPPORT_BEAM_LIMIT_DEFAULT
                    };
                    if diff > beams[i].rest_len * break_limit {
                        beams.set_broken(i);
                        debug!(actor, beam = i, "support beam limit extended, broke");
                        events.push(SimEvent::BeamBroken { actor, beam: i });
                        continue;
                    }
                }
            }
            BeamBound::Rope => {
                if diff < 0.0 {
                    k = 0.0;
                    d *= 0.1;
                }
            }
            BeamBound::None => {}
        }

        let v = nodes.read(p1).velocity - nodes.read(p2).velocity;
        let mut slen = -k * diff - d * v.dot(dis) * inv_dislen;
        beams[i].stress = slen;

        let mut len = slen.abs();
        if len > beams[i].deform_threshold {
            let deformable = beams[i].role == BeamRole::Structural
                && beams[i].bound != BeamBound::Shock1
                && k != 0.0;
            if deformable {
                if slen > beams[i].max_pos_stress && diff < 0.0 {
                    // Compression past yield: shift the rest length towards
                    // the current length by the plastic coefficient.
                    let yield_length = beams[i].max_pos_stress / k;
                    let deform = diff + yield_length * (1.0 - beams[i].plastic_coef);
                    let l_old = beams[i].rest_len;
                    beams[i].rest_len = (beams[i].rest_len + deform).max(MIN_BEAM_LENGTH);
                    slen -= (slen - beams[i].max_pos_stress) * 0.5;
                    len = slen;
                    if beams[i].rest_len > 0.0 && l_old > beams[i].rest_len {
                        beams[i].max_pos_stress *= l_old / beams[i].rest_len;
                        beams[i].deform_threshold = beams[i]
                            .max_pos_stress
                            .min(-beams[i].max_neg_stress)
                            .min(beams[i].strength);
                    }
                    // Compression does not weaken the beam; structure
                    // stability depends on it.
                    events.push(SimEvent::BeamDeformed {
                        actor,
                        beam: i,
                        stress: len,
                    });
                } else if slen < beams[i].max_neg_stress && diff > 0.0 {
                    // Extension past yield.
                    let yield_length = beams[i].max_neg_stress / k;
                    let deform = diff + yield_length * (1.0 - beams[i].plastic_coef);
                    let l_old = beams[i].rest_len;
                    beams[i].rest_len += deform;
                    slen -= (slen - beams[i].max_neg_stress) * 0.5;
                    len = -slen;
                    if l_old > 0.0 && beams[i].rest_len > l_old {
                        beams[i].max_neg_stress *= beams[i].rest_len / l_old;
                        beams[i].deform_threshold = beams[i]
                            .max_pos_stress
                            .min(-beams[i].max_neg_stress)
                            .min(beams[i].strength);
                    }
                    beams[i].strength -= deform * k;
                    events.push(SimEvent::BeamDeformed {
                        actor,
                        beam: i,
                        stress: len,
                    });
                }
            }

            if len > beams[i].strength {
                // Break the beam, unless an endpoint is a contacter node
                // hanging on its last two beams - breaking those makes
                // collision cabs degenerate.
                let p1_fragile =
                    nodes.read(p1).contacter && beams.live_connections(p1) < 3;
                let p2_fragile =
                    nodes.read(p2).contacter && beams.live_connections(p2) < 3;
                if !(p1_fragile || p2_fragile) {
                    slen = 0.0;
                    beams.set_broken(i);
                    debug!(actor, beam = i, force = len, "beam broke");
                    events.push(SimEvent::BeamBroken { actor, beam: i });

                    let group = beams[i].detacher_group;
                    if group > 0 {
                        beams.fire_detacher_group(group);
                        wheels.fire_detacher_group(group);
                        events.push(SimEvent::DetacherFired { actor, group });
                    }
                } else {
                    beams[i].strength = 2.0 * beams[i].deform_threshold;
                }
            }
        }

        let f = dis * (slen * inv_dislen);
        nodes.get_mut(p1).forces += f;
        nodes.get_mut(p2).forces -= f;
    }
}
