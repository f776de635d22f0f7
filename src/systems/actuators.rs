//! Active beam drives: hydros, command beams, rotators, ties and slidenodes.

use bevy_ecs::prelude::*;
use glam::{Quat, Vec3};

use crate::driveline::Driveline;
use crate::rig::actor::{ActorState, Attachments, Controls, Hydros, Rotators};
use crate::rig::beam::{
    BeamStore, HYDRO_FLAG_AILERON, HYDRO_FLAG_DIR, HYDRO_FLAG_ELEVATOR, HYDRO_FLAG_REV_AILERON,
    HYDRO_FLAG_REV_ELEVATOR, HYDRO_FLAG_REV_RUDDER, HYDRO_FLAG_RUDDER, HYDRO_FLAG_SPEED,
};
use crate::rig::commands::CommandSet;
use crate::rig::node::NodeStore;
use crate::systems::DeltaTime;

/// Drive hydro states and lengths, command beams, rotators, ties and
/// slidenodes. Runs after the beam pass, so the lengths written here feed
/// the next sub-step's forces - same data flow as the reference solver.
pub fn actuator_system(
    dt: Res<DeltaTime>,
    mut query: Query<(
        &ActorState,
        &Controls,
        &mut Hydros,
        &mut CommandSet,
        &mut BeamStore,
        &mut NodeStore,
        &mut Rotators,
        &mut Driveline,
        &mut Attachments,
    )>,
) {
    for (state, controls, mut hydros, mut commands, mut beams, mut nodes, mut rotators, mut driveline, mut attachments) in
        query.iter_mut()
    {
        if !state.is_simulated() {
            continue;
        }
        let dt = dt.0;
        let wheel_speed = driveline.wheel_speed;

        update_hydro_states(&mut hydros, controls, wheel_speed, dt);
        update_hydro_lengths(&mut hydros, &mut beams, wheel_speed, dt);
        process_commands(&mut commands, &mut beams, &mut rotators, &mut driveline, dt);
        apply_rotator_forces(&rotators, &mut nodes);
        process_ties(&mut attachments, &mut beams, dt);
        apply_slidenode_forces(&mut attachments, &mut nodes);
    }
}

/// Filter the scalar control inputs into the hydro states. Direction gets
/// speed-coupled rate limiting; the flight channels converge at a fixed
/// rate and decay towards zero when released.
pub fn update_hydro_states(hydros: &mut Hydros, controls: &Controls, wheel_speed: f32, dt: f32) {
    let command = controls.steer;
    if hydros.dir_state != 0.0 || command != 0.0 {
        if !hydros.speed_coupling {
            // Analog devices need a step limit or hydro beams snap.
            let old = hydros.dir_state;
            let mut new_state = command;
            if (new_state - old).abs() > 0.02 {
                new_state = (new_state - old) * 0.02 + old;
            }
            hydros.dir_state = new_state;
        } else {
            // Steering rate shrinks with speed; floor keeps fast vehicles
            // steerable.
            let mut rate = 30.0 / (10.0 + (wheel_speed / 2.0).abs());
            if rate < 1.2 {
                rate = 1.2;
            }
            if command != 0.0 {
                if hydros.dir_state > command {
                    hydros.dir_state -= dt * rate;
                } else {
                    hydros.dir_state += dt * rate;
                }
            }
            // Auto-centering drift.
            if hydros.dir_state > dt {
                hydros.dir_state -= dt;
            } else if hydros.dir_state < -dt {
                hydros.dir_state += dt;
            } else {
                hydros.dir_state = 0.0;
            }
        }
    }

    for (state, command) in [
        (&mut hydros.aileron_state, controls.aileron),
        (&mut hydros.rudder_state, controls.rudder),
        (&mut hydros.elevator_state, controls.elevator),
    ] {
        if *state != 0.0 || command != 0.0 {
            if command != 0.0 {
                if *state > command {
                    *state -= dt * 4.0;
                } else {
                    *state += dt * 4.0;
                }
            }
            if *state > dt {
                *state -= dt;
            } else if *state < -dt {
                *state += dt;
            } else {
                *state = 0.0;
            }
        }
    }
}

/// Combine the hydro states into each hydro beam's rest length.
pub fn update_hydro_lengths(hydros: &mut Hydros, beams: &mut BeamStore, wheel_speed: f32, dt: f32) {
    let dir_state = hydros.dir_state;
    let aileron = hydros.aileron_state;
    let rudder = hydros.rudder_state;
    let elevator = hydros.elevator_state;

    for hi in 0..hydros.beams.len() {
        let bi = hydros.beams[hi];
        if beams[bi].broken {
            continue;
        }
        let flags = beams[bi].hydro_flags;
        let mut cstate = 0.0;
        let mut div = 0;

        if flags & HYDRO_FLAG_SPEED != 0 {
            // Steering effect fades out with road speed.
            if wheel_speed < 12.0 {
                cstate += dir_state * (12.0 - wheel_speed) / 12.0;
            }
            div += 1;
        }
        if flags & HYDRO_FLAG_DIR != 0 {
            cstate += dir_state;
            div += 1;
        }
        if flags & HYDRO_FLAG_AILERON != 0 {
            cstate += aileron;
            div += 1;
        }
        if flags & HYDRO_FLAG_RUDDER != 0 {
            cstate += rudder;
            div += 1;
        }
        if flags & HYDRO_FLAG_ELEVATOR != 0 {
            cstate += elevator;
            div += 1;
        }
        if flags & HYDRO_FLAG_REV_AILERON != 0 {
            cstate -= aileron;
            div += 1;
        }
        if flags & HYDRO_FLAG_REV_RUDDER != 0 {
            cstate -= rudder;
            div += 1;
        }
        if flags & HYDRO_FLAG_REV_ELEVATOR != 0 {
            cstate -= elevator;
            div += 1;
        }

        cstate = cstate.clamp(-1.0, 1.0);

        if div > 0 {
            cstate /= div as f32;
            if let Some(filter) = hydros.inertia.get_mut(hi) {
                cstate = filter.apply(cstate, dt);
            }
            if flags & HYDRO_FLAG_SPEED == 0 {
                hydros.dir_wheel_display = cstate;
            }
            let factor = 1.0 - cstate * beams[bi].hydro_ratio;
            beams[bi].rest_len = beams[bi].hydro_len * factor;
        }
    }
}

/// Command key processing: activation merge, auto-centering, one-press
/// modes, engine coupling, rest-length integration and hydraulic pump work.
pub fn process_commands(
    commands: &mut CommandSet,
    beams: &mut BeamStore,
    rotators: &mut Rotators,
    driveline: &mut Driveline,
    dt: f32,
) {
    // The activation merge always runs: trigger beams press keys even on
    // actors with no command beams of their own.
    if !commands.has_commands {
        commands.refresh_values();
        return;
    }

    let (can_work, mut crankfactor) = match driveline.engine.as_ref() {
        Some(engine) => (engine.can_work(), engine.crank_factor()),
        None => (true, 1.0),
    };
    let engine_running = driveline
        .engine
        .as_ref()
        .map(|e| e.running)
        .unwrap_or(true);

    // Auto-move locks: any key held past half activation freezes the
    // centering of its beams.
    for key in &commands.keys {
        for &signed in &key.beams {
            let bi = signed.unsigned_abs() as usize;
            if bi < beams.len() {
                beams[bi].auto_move_lock = false;
            }
        }
    }
    commands.refresh_values();
    for key in &commands.keys {
        if key.value >= 0.5 {
            for &signed in &key.beams {
                let bi = signed.unsigned_abs() as usize;
                if bi < beams.len() {
                    beams[bi].auto_move_lock = true;
                }
            }
        }
    }

    let mut requested = false;
    let mut work = 0.0;

    for ki in 0..commands.keys.len() {
        let mut requestpower = false;
        let beam_refs = commands.keys[ki].beams.clone();
        for signed in beam_refs {
            let dir = if signed > 0 { 1.0 } else { -1.0 };
            let bi = signed.unsigned_abs() as usize;
            if bi >= beams.len() || beams[bi].broken {
                continue;
            }

            if beams[bi].is_force_restricted {
                crankfactor = crankfactor.min(1.0);
            }

            let mut v = commands.keys[ki].value;

            // Self-centering.
            if beams[bi].is_centering && !beams[bi].auto_move_lock {
                if beams[bi].ref_len == 0.0 || beams[bi].rest_len == 0.0 {
                    continue;
                }
                let current = beams[bi].rest_len / beams[bi].ref_len;
                if (current - beams[bi].center_length).abs() < 0.0001 {
                    beams[bi].auto_moving_mode = 0;
                } else {
                    let mode = beams[bi].auto_moving_mode;
                    beams[bi].auto_moving_mode =
                        if current > beams[bi].center_length { -1 } else { 1 };
                    // Avoid overshooting the center.
                    if mode != 0 && mode != beams[bi].auto_moving_mode {
                        beams[bi].rest_len = beams[bi].center_length * beams[bi].ref_len;
                        beams[bi].auto_moving_mode = 0;
                    }
                }
            }

            if beams[bi].ref_len == 0.0 || beams[bi].rest_len == 0.0 {
                continue;
            }
            let clen = beams[bi].rest_len / beams[bi].ref_len;
            let in_range = (dir > 0.0 && clen < beams[bi].command_long)
                || (dir < 0.0 && clen > beams[bi].command_short);

            if in_range {
                // One-press with centering tracks the crossing phase.
                if beams[bi].one_press_mode == 2 {
                    let auto = beams[bi].auto_moving_mode as f32;
                    if dir * auto > 0.0
                        && dir * clen > dir * beams[bi].center_length
                        && !beams[bi].pressed_center_mode
                    {
                        beams[bi].pressed_center_mode = true;
                        beams[bi].auto_moving_mode = 0;
                    } else if dir * auto < 0.0
                        && dir * clen > dir * beams[bi].center_length
                        && beams[bi].pressed_center_mode
                    {
                        beams[bi].pressed_center_mode = false;
                    }
                }
                if beams[bi].one_press_mode > 0 {
                    let key_down = v > 0.5;
                    let dir_i = if signed > 0 { 1i8 } else { -1i8 };
                    let auto = beams[bi].auto_moving_mode;
                    if dir_i as i32 * auto as i32 <= 0 && key_down {
                        beams[bi].auto_moving_mode = dir_i;
                    } else if auto == dir_i && !key_down {
                        beams[bi].auto_moving_mode = dir_i * 2;
                    } else if auto == dir_i * 2 && key_down {
                        beams[bi].auto_moving_mode = dir_i * 3;
                    } else if auto == dir_i * 3 && !key_down {
                        beams[bi].auto_moving_mode = 0;
                    }
                }

                if let Some(filter) = commands.inertia.get_mut(ki) {
                    v = filter.apply(v, dt);
                }
                if dir * beams[bi].auto_moving_mode as f32 > 0.0 {
                    v = 1.0;
                }

                if beams[bi].command_needs_engine && (!engine_running || !can_work) {
                    continue;
                }
                if v > 0.0 && beams[bi].command_engine_coupling > 0.0 {
                    requestpower = true;
                }

                let cf = if beams[bi].command_engine_coupling > 0.0 {
                    crankfactor
                } else {
                    1.0
                };

                let old_len = beams[bi].rest_len;
                if dir > 0.0 {
                    beams[bi].rest_len *=
                        1.0 + beams[bi].command_ratio_long * v * cf * dt / beams[bi].rest_len;
                } else {
                    beams[bi].rest_len *=
                        1.0 - beams[bi].command_ratio_short * v * cf * dt / beams[bi].rest_len;
                }

                if requestpower {
                    let dl = (old_len - beams[bi].rest_len).abs();
                    work += beams[bi].stress.abs() * dl * beams[bi].command_engine_coupling;
                }
            } else if beams[bi].one_press_mode > 0
                && dir * beams[bi].auto_moving_mode as f32 > 0.0
            {
                // Ran past the length limit; stop the auto move.
                beams[bi].auto_moving_mode = 0;
            }
        }

        // Rotators bound to this key.
        let rotator_refs = commands.keys[ki].rotators.clone();
        for signed in rotator_refs {
            let ri = (signed.unsigned_abs() as usize).saturating_sub(1);
            if ri >= rotators.rotators.len() {
                continue;
            }
            if rotators.rotators[ri].needs_engine && (!engine_running || !can_work) {
                continue;
            }
            let mut v = commands.keys[ki].value;
            if let Some(filter) = rotators.inertia.get_mut(ri) {
                v = filter.apply(v, dt);
            }
            if v > 0.0 && rotators.rotators[ri].engine_coupling > 0.0 {
                requestpower = true;
            }
            let cf = if rotators.rotators[ri].engine_coupling > 0.0 {
                crankfactor
            } else {
                1.0
            };
            let delta = rotators.rotators[ri].rate * v * cf * dt;
            if signed > 0 {
                rotators.rotators[ri].angle += delta;
            } else {
                rotators.rotators[ri].angle -= delta;
            }
        }

        if requestpower {
            requested = true;
        }
    }

    if let Some(engine) = driveline.engine.as_mut() {
        engine.hydropump_load = work;
        engine.prime = requested;
    }
}

/// Exert rotator torque as node forces on both plates.
pub fn apply_rotator_forces(rotators: &Rotators, nodes: &mut NodeStore) {
    for rotator in &rotators.rotators {
        let axis = (nodes.read(rotator.axis1).rel_position - nodes.read(rotator.axis2).rel_position)
            .normalize_or_zero();
        if axis == Vec3::ZERO {
            continue;
        }
        let project = |v: Vec3| v - axis * v.dot(axis);

        for k in 0..2 {
            let ref1 = project(
                nodes.read(rotator.axis2).rel_position
                    - nodes.read(rotator.nodes1[k]).rel_position,
            );
            let ref2 = project(
                nodes.read(rotator.axis2).rel_position
                    - nodes.read(rotator.nodes2[k]).rel_position,
            );
            let th1 = Quat::from_axis_angle(axis, rotator.angle + std::f32::consts::FRAC_PI_2)
                * ref1;
            let aerror = th1
                .normalize_or_zero()
                .dot(ref2.normalize_or_zero())
                .clamp(-1.0, 1.0)
                .asin();

            let dir1 = ref1.cross(axis).normalize_or_zero();
            let dir2 = ref2.cross(axis).normalize_or_zero();
            let mut ref1len = ref1.length();
            let mut ref2len = ref2.length();
            // Jitter fix near the axis.
            if ref1len <= rotator.tolerance {
                ref1len = 0.0;
            }
            if ref2len <= rotator.tolerance {
                ref2len = 0.0;
            }

            let rigidity = rotator.force;
            nodes.get_mut(rotator.nodes1[k]).forces += (aerror * ref1len * rigidity) * dir1;
            nodes.get_mut(rotator.nodes2[k]).forces -= (aerror * ref2len * rigidity) * dir2;
            // Symmetric counter-plate.
            nodes.get_mut(rotator.nodes1[k + 2]).forces -= (aerror * ref1len * rigidity) * dir1;
            nodes.get_mut(rotator.nodes2[k + 2]).forces += (aerror * ref2len * rigidity) * dir2;
        }
    }
}

/// Reel in tying ties until taut, the end stop or the stress limit.
pub fn process_ties(attachments: &mut Attachments, beams: &mut BeamStore, dt: f32) {
    for tie in &mut attachments.ties {
        if !tie.tying {
            continue;
        }
        let bi = tie.beam;
        if bi >= beams.len() || beams[bi].ref_len == 0.0 || beams[bi].rest_len == 0.0 {
            continue;
        }
        let clen = beams[bi].rest_len / beams[bi].ref_len;
        if clen > beams[bi].command_short {
            beams[bi].rest_len *=
                1.0 - beams[bi].command_ratio_short * dt / beams[bi].rest_len;
        } else {
            tie.tying = false;
        }
        if beams[bi].stress.abs() > tie.max_stress {
            tie.tying = false;
        }
    }
}

/// Constrain slidenodes onto their rail segment with a spring-damper, and
/// walk them across segment boundaries.
pub fn apply_slidenode_forces(attachments: &mut Attachments, nodes: &mut NodeStore) {
    for sn in &mut attachments.slidenodes {
        if !sn.attached || sn.rail.len() < 2 {
            continue;
        }
        let seg = sn.segment.min(sn.rail.len() - 2);
        let a = nodes.read(sn.rail[seg]).rel_position;
        let b = nodes.read(sn.rail[seg + 1]).rel_position;
        let p = nodes.read(sn.node).rel_position;

        let ab = b - a;
        let len_sq = ab.length_squared();
        if len_sq < 1e-12 {
            continue;
        }
        let t = (p - a).dot(ab) / len_sq;

        // Walk towards the segment the node actually projects onto.
        if t < 0.0 && seg > 0 {
            sn.segment = seg - 1;
        } else if t > 1.0 && seg + 2 < sn.rail.len() {
            sn.segment = seg + 1;
        }
        let t = t.clamp(0.0, 1.0);
        let target = a + ab * t;

        let rail_vel = nodes.read(sn.rail[seg]).velocity * (1.0 - t)
            + nodes.read(sn.rail[seg + 1]).velocity * t;
        let rel_vel = nodes.read(sn.node).velocity - rail_vel;

        let force = (target - p) * sn.spring - rel_vel * sn.damping;
        if let Some(limit) = sn.break_force {
            if force.length() > limit {
                sn.attached = false;
                continue;
            }
        }

        nodes.get_mut(sn.node).forces += force;
        nodes.get_mut(sn.rail[seg]).forces -= force * (1.0 - t);
        nodes.get_mut(sn.rail[seg + 1]).forces -= force * t;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rig::actor::SlideNode;
    use crate::rig::beam::{Beam, BeamRole};
    use crate::rig::node::NodeOptions;

    #[test]
    fn test_hydro_state_converges_to_command() {
        let mut hydros = Hydros::default();
        let controls = Controls {
            steer: 1.0,
            ..Controls::default()
        };
        for _ in 0..4000 {
            update_hydro_states(&mut hydros, &controls, 0.0, 0.0005);
        }
        assert!(hydros.dir_state > 0.9);
    }

    #[test]
    fn test_hydro_state_centers_on_release() {
        let mut hydros = Hydros {
            dir_state: 0.8,
            ..Hydros::default()
        };
        let controls = Controls::default();
        for _ in 0..8000 {
            update_hydro_states(&mut hydros, &controls, 0.0, 0.0005);
        }
        assert_eq!(hydros.dir_state, 0.0);
    }

    #[test]
    fn test_hydro_length_modulation() {
        let mut hydros = Hydros {
            beams: vec![0],
            inertia: vec![Default::default()],
            speed_coupling: false,
            dir_state: 1.0,
            ..Hydros::default()
        };
        let mut beams = BeamStore::new();
        let mut beam = Beam::new(0, 1, 1000.0, 10.0, 2.0);
        beam.role = BeamRole::Hydro;
        beam.hydro_flags = HYDRO_FLAG_DIR;
        beam.hydro_ratio = 0.4;
        beams.add(beam);

        update_hydro_lengths(&mut hydros, &mut beams, 0.0, 0.0005);
        // factor = 1 - 1.0 * 0.4
        assert!((beams[0].rest_len - 2.0 * 0.6).abs() < 1e-5);
    }

    #[test]
    fn test_speed_flag_fades_with_speed() {
        let mut hydros = Hydros {
            beams: vec![0],
            inertia: vec![Default::default()],
            dir_state: 1.0,
            ..Hydros::default()
        };
        let mut beams = BeamStore::new();
        let mut beam = Beam::new(0, 1, 1000.0, 10.0, 2.0);
        beam.role = BeamRole::Hydro;
        beam.hydro_flags = HYDRO_FLAG_SPEED;
        beam.hydro_ratio = 0.4;
        beams.add(beam);

        update_hydro_lengths(&mut hydros, &mut beams, 20.0, 0.0005);
        // Past 12 m/s the speed-flagged hydro stops responding entirely.
        assert!((beams[0].rest_len - 2.0).abs() < 1e-5);
    }

    #[test]
    fn test_command_extends_towards_long_bound() {
        let mut commands = CommandSet::default();
        commands.has_commands = true;
        commands.keys[1].beams = vec![1]; // beam 0... index is the ref; sign +
        let mut beams = BeamStore::new();
        // Slot 0 is a dummy so beam references stay non-zero (sign carries
        // the direction).
        beams.add(Beam::new(0, 1, 1.0, 1.0, 1.0));
        let mut beam = Beam::new(0, 1, 1000.0, 10.0, 1.0);
        beam.role = BeamRole::Command;
        beam.command_long = 1.5;
        beam.command_short = 0.6;
        beam.command_ratio_long = 1.0;
        beam.command_ratio_short = 1.0;
        beam.command_engine_coupling = 0.0;
        beams.add(beam);
        commands.keys[1].beams = vec![1];
        commands.keys[1].player_input = 1.0;

        let mut rotators = Rotators::default();
        let mut driveline = Driveline::default();
        for _ in 0..2000 {
            process_commands(&mut commands, &mut beams, &mut rotators, &mut driveline, 0.0005);
        }
        let clen = beams[1].rest_len / beams[1].ref_len;
        assert!(clen > 1.4, "command beam should approach long bound, at {}", clen);
        assert!(clen <= 1.5 + 0.01);
    }

    #[test]
    fn test_tie_reels_in_and_stops() {
        let mut attachments = Attachments::default();
        let mut beams = BeamStore::new();
        let mut beam = Beam::new(0, 1, 1000.0, 10.0, 2.0);
        beam.role = BeamRole::Tie;
        beam.command_short = 0.5;
        beam.command_ratio_short = 2.0;
        beams.add(beam);
        attachments.ties.push(crate::rig::actor::Tie {
            beam: 0,
            group: 0,
            tying: true,
            max_stress: 1e9,
            locked_to: None,
        });

        for _ in 0..20000 {
            process_ties(&mut attachments, &mut beams, 0.0005);
        }
        let clen = beams[0].rest_len / beams[0].ref_len;
        assert!(clen <= 0.5 + 1e-3);
        assert!(!attachments.ties[0].tying);
    }

    #[test]
    fn test_slidenode_pulls_towards_rail() {
        let mut nodes = NodeStore::new();
        nodes.add(Vec3::ZERO, 1.0, NodeOptions::default()); // rail a
        nodes.add(Vec3::new(2.0, 0.0, 0.0), 1.0, NodeOptions::default()); // rail b
        nodes.add(Vec3::new(1.0, 0.5, 0.0), 1.0, NodeOptions::default()); // slider
        let mut attachments = Attachments::default();
        attachments.slidenodes.push(SlideNode {
            node: 2,
            rail: vec![0, 1],
            segment: 0,
            spring: 1000.0,
            damping: 10.0,
            break_force: None,
            attached: true,
        });

        apply_slidenode_forces(&mut attachments, &mut nodes);
        // Slider is pulled down onto the rail; rail nodes pushed up.
        assert!(nodes.read(2).forces.y < 0.0);
        assert!(nodes.read(0).forces.y > 0.0);
        assert!(nodes.read(1).forces.y > 0.0);
    }
}
