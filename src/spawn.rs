//! Spawn pipeline: turn a parsed actor definition into populated stores.
//!
//! Validation is report-and-skip per entry; the actor is still produced with
//! the failing entity omitted. Only a structural failure (no usable nodes)
//! aborts the spawn.

use glam::Vec3;
use tracing::warn;

use crate::config::MIN_BEAM_LENGTH;
use crate::def::{ActorDef, NodeRef};
use crate::driveline::{Axle, Differential, DiffKind, Driveline, Engine};
use crate::error::SpawnError;
use crate::rig::actor::{
    ActorBounds, ActorBundle, ActorId, ActorState, ActorStatics, Attachments, Cabs, CollCabRate,
    Controls, Hook, HookState, Hydros, Meters, NetTimer, NodeConnections, Origin, Rope, Rotator,
    Rotators, SleepTimer, SlideNode, Tie,
};
use crate::rig::beam::{
    Beam, BeamBound, BeamRole, BeamStore, Shock, SHOCK_FLAG_ISTRIGGER, SHOCK_FLAG_NORMAL,
    SHOCK_FLAG_SOFTBUMP, SHOCK_FLAG_TRG_BLOCKER, SHOCK_FLAG_TRG_BLOCKER_A,
    SHOCK_FLAG_TRG_CMD_BLOCKER, SHOCK_FLAG_TRG_CMD_SWITCH, SHOCK_FLAG_TRG_CONTINUOUS,
    SHOCK_FLAG_TRG_ENGINE, SHOCK_FLAG_TRG_HOOK_LOCK, SHOCK_FLAG_TRG_HOOK_UNLOCK,
};
use crate::rig::commands::{CommandSet, InertiaFilter};
use crate::rig::node::{NodeOptions, NodeStore};
use crate::rig::wheel::{Wheel, Wheels};
use crate::systems::integrator::refresh_bounds;

/// Everything the spawn produced besides the entity itself.
#[derive(Debug, Default)]
pub struct SpawnReport {
    /// One entry per skipped or degraded definition entry.
    pub messages: Vec<String>,
}

impl SpawnReport {
    fn skip(&mut self, what: &str, index: usize, reason: &str) {
        let msg = format!("{} {}: {}", what, index, reason);
        warn!("{}", msg);
        self.messages.push(msg);
    }
}

/// Build a complete actor bundle from a definition.
///
/// `position` becomes the actor origin; node coordinates in the definition
/// are relative to it.
pub fn build_actor(
    def: &ActorDef,
    position: Vec3,
    id: u32,
) -> Result<(ActorBundle, SpawnReport), SpawnError> {
    let mut report = SpawnReport::default();
    let mut nodes = NodeStore::new();
    let mut beams = BeamStore::new();
    let mut commands = CommandSet::default();
    let mut hydros = Hydros::default();
    let mut rotators = Rotators::default();
    let mut attachments = Attachments::default();
    let mut wheels = Wheels::default();
    let mut cabs = Cabs::default();

    // --- Nodes, in declaration order, ids preserved -----------------------
    for (i, nd) in def.nodes.iter().enumerate() {
        if nodes.index_of_id(nd.id).is_some() {
            report.skip("node", i, "duplicate id");
            continue;
        }
        let idx = nodes.add(
            Vec3::new(nd.x, nd.y, nd.z),
            1.0, // placeholder until mass distribution
            NodeOptions {
                friction_coef: def.defaults.friction,
                buoyancy: nd.buoyancy.unwrap_or(0.0),
                volume_coef: def.defaults.volume,
                surface_coef: def.defaults.surface,
                contacter: nd.contacter,
                contactable: !nd.no_ground_contact,
                lockgroup: nd.lockgroup,
                coll_cohort: nd.coll_cohort,
                id: nd.id,
                no_ground_contact: nd.no_ground_contact,
            },
        );
        if nd.fixed {
            nodes.mark_fixed(idx);
        }
    }
    if nodes.is_empty() {
        return Err(SpawnError::NoValidNodes);
    }

    let resolve = |nodes: &NodeStore, r: NodeRef| -> Option<usize> {
        match r {
            NodeRef::Id(id) => nodes.index_of_id(id),
            NodeRef::Index(i) if i < nodes.len() => Some(i),
            NodeRef::Index(_) => None,
        }
    };

    // --- Mass distribution ------------------------------------------------
    distribute_masses(&mut nodes, def);

    // --- Structural beams -------------------------------------------------
    for (i, bd) in def.beams.iter().enumerate() {
        let (Some(n1), Some(n2)) = (resolve(&nodes, bd.node1), resolve(&nodes, bd.node2)) else {
            report.skip("beam", i, "unresolved node reference");
            continue;
        };
        if n1 == n2 {
            report.skip("beam", i, "both ends on the same node");
            continue;
        }
        let length = nodes.read(n1).rel_position.distance(nodes.read(n2).rel_position);
        if length < MIN_BEAM_LENGTH {
            report.skip("beam", i, "shorter than the minimum beam length");
            continue;
        }
        let mut beam = Beam::new(
            n1,
            n2,
            bd.spring.unwrap_or(def.defaults.spring),
            bd.damp.unwrap_or(def.defaults.damp),
            length,
        )
        .with_limits(
            bd.strength.unwrap_or(def.defaults.strength),
            bd.deform.unwrap_or(def.defaults.deform),
            def.defaults.plastic_coef,
        );
        beam.invisible = bd.invisible;
        beam.detacher_group = bd.detacher_group;
        if bd.support {
            beam.bound = BeamBound::Support;
            beam.long_bound = bd.support_break_limit.unwrap_or(0.0);
        } else if bd.rope {
            beam.bound = BeamBound::Rope;
        }
        beams.add(beam);
    }

    // --- Shocks -----------------------------------------------------------
    for (i, sd) in def.shocks.iter().enumerate() {
        let (Some(n1), Some(n2)) = (resolve(&nodes, sd.node1), resolve(&nodes, sd.node2)) else {
            report.skip("shock", i, "unresolved node reference");
            continue;
        };
        let length = nodes.read(n1).rel_position.distance(nodes.read(n2).rel_position);
        if n1 == n2 || length < MIN_BEAM_LENGTH {
            report.skip("shock", i, "degenerate geometry");
            continue;
        }
        let mut beam = Beam::new(n1, n2, sd.spring_in, sd.damp_in, length).with_limits(
            def.defaults.strength,
            def.defaults.deform,
            def.defaults.plastic_coef,
        );
        beam.bound = BeamBound::Shock2;
        beam.short_bound = sd.short_bound;
        beam.long_bound = sd.long_bound;
        beam.precompression = sd.precompression;
        beam.rest_len *= sd.precompression;
        beam.detacher_group = sd.detacher_group;
        let beam_id = beams.add(beam);

        let mut flags = if sd.soft_bump {
            SHOCK_FLAG_SOFTBUMP
        } else {
            SHOCK_FLAG_NORMAL
        };
        let mut shock = Shock::new(beam_id, flags);
        shock.spring_in = sd.spring_in;
        shock.damp_in = sd.damp_in;
        shock.spring_out = sd.spring_out.unwrap_or(sd.spring_in);
        shock.damp_out = sd.damp_out.unwrap_or(sd.damp_in);
        shock.sprog_in = sd.progression_in;
        shock.dprog_in = sd.progression_in;
        shock.sprog_out = sd.progression_out;
        shock.dprog_out = sd.progression_out;
        shock.sbd_spring = def.defaults.spring;
        shock.sbd_damp = def.defaults.damp;

        if let Some(trigger) = &sd.trigger {
            flags = SHOCK_FLAG_NORMAL | SHOCK_FLAG_ISTRIGGER;
            if trigger.blocker {
                flags |= SHOCK_FLAG_TRG_BLOCKER;
            }
            if trigger.inverted_blocker {
                flags |= SHOCK_FLAG_TRG_BLOCKER_A;
            }
            if trigger.cmd_blocker {
                flags |= SHOCK_FLAG_TRG_CMD_BLOCKER;
            }
            if trigger.cmd_switch {
                flags |= SHOCK_FLAG_TRG_CMD_SWITCH;
            }
            if trigger.continuous {
                flags |= SHOCK_FLAG_TRG_CONTINUOUS;
            }
            if trigger.hook_lock {
                flags |= SHOCK_FLAG_TRG_HOOK_LOCK;
            }
            if trigger.hook_unlock {
                flags |= SHOCK_FLAG_TRG_HOOK_UNLOCK;
            }
            if trigger.engine_trigger {
                flags |= SHOCK_FLAG_TRG_ENGINE;
            }
            shock.flags = flags;
            shock.trigger_cmd_short = trigger.short_action;
            shock.trigger_cmd_long = trigger.long_action;
            shock.trigger_boundary_t = trigger.boundary_timer;
            // A cmd blocker starts with its key held blocked.
            if trigger.cmd_blocker {
                if let Some(key) = commands.keys.get_mut(trigger.short_action) {
                    key.blocked = true;
                }
            }
        }
        beams.add_shock(shock);
    }

    // Inverted blockers hold their downstream triggers blocked until the
    // blocker itself fires.
    for si in 0..beams.shocks.len() {
        if beams.shocks[si].flags & SHOCK_FLAG_TRG_BLOCKER_A == 0 {
            continue;
        }
        let beam_id = beams.shocks[si].beam_id;
        let span = beams.shocks[si].trigger_cmd_long;
        for other in beam_id + 1..=(beam_id + span).min(beams.len().saturating_sub(1)) {
            if let Some(osi) = beams[other].shock {
                if beams.shocks[osi].flags & SHOCK_FLAG_ISTRIGGER != 0 {
                    beams.shocks[osi].trigger_enabled = false;
                }
            }
        }
    }

    // --- Hydros -----------------------------------------------------------
    for (i, hd) in def.hydros.iter().enumerate() {
        let (Some(n1), Some(n2)) = (resolve(&nodes, hd.node1), resolve(&nodes, hd.node2)) else {
            report.skip("hydro", i, "unresolved node reference");
            continue;
        };
        let length = nodes.read(n1).rel_position.distance(nodes.read(n2).rel_position);
        if n1 == n2 || length < MIN_BEAM_LENGTH {
            report.skip("hydro", i, "degenerate geometry");
            continue;
        }
        let mut beam = Beam::new(n1, n2, def.defaults.spring, def.defaults.damp, length)
            .with_limits(
                def.defaults.strength,
                def.defaults.deform,
                def.defaults.plastic_coef,
            );
        beam.role = BeamRole::Hydro;
        beam.hydro_ratio = hd.ratio;
        beam.hydro_flags = if hd.flags == 0 {
            crate::rig::beam::HYDRO_FLAG_DIR
        } else {
            hd.flags
        };
        beam.hydro_len = length;
        let beam_id = beams.add(beam);
        hydros.beams.push(beam_id);
        hydros.inertia.push(if hd.start_delay > 0.0 || hd.stop_delay > 0.0 {
            InertiaFilter::new(hd.start_delay, hd.stop_delay)
        } else {
            InertiaFilter::passthrough()
        });
    }

    // --- Command beams ----------------------------------------------------
    for (i, cd) in def.commands.iter().enumerate() {
        if cd.key >= commands.keys.len() {
            report.skip("command", i, "key out of range");
            continue;
        }
        let (Some(n1), Some(n2)) = (resolve(&nodes, cd.node1), resolve(&nodes, cd.node2)) else {
            report.skip("command", i, "unresolved node reference");
            continue;
        };
        let length = nodes.read(n1).rel_position.distance(nodes.read(n2).rel_position);
        if n1 == n2 || length < MIN_BEAM_LENGTH {
            report.skip("command", i, "degenerate geometry");
            continue;
        }
        let mut beam = Beam::new(n1, n2, def.defaults.spring, def.defaults.damp, length)
            .with_limits(
                def.defaults.strength,
                def.defaults.deform,
                def.defaults.plastic_coef,
            );
        beam.role = BeamRole::Command;
        beam.command_short = cd.short_len;
        beam.command_long = cd.long_len;
        beam.command_ratio_short = cd.rate_short;
        beam.command_ratio_long = cd.rate_long;
        beam.command_engine_coupling = cd.engine_coupling;
        beam.command_needs_engine = cd.needs_engine;
        beam.is_force_restricted = cd.force_restricted;
        beam.is_centering = cd.auto_center;
        beam.center_length = cd.center_length;
        beam.one_press_mode = cd.one_press_mode;
        let beam_id = beams.add(beam) as i64;

        let signed = if cd.contracting { -beam_id } else { beam_id };
        commands.keys[cd.key].beams.push(signed);
        if commands.keys[cd.key].description.is_empty() {
            commands.keys[cd.key].description = cd.description.clone();
        }
        if cd.start_delay > 0.0 || cd.stop_delay > 0.0 {
            commands.inertia[cd.key] = InertiaFilter::new(cd.start_delay, cd.stop_delay);
        }
        commands.has_commands = true;
    }

    // --- Wheels -----------------------------------------------------------
    for (i, wd) in def.wheels.iter().enumerate() {
        let (Some(axis0), Some(axis1), Some(arm)) = (
            resolve(&nodes, wd.axis1),
            resolve(&nodes, wd.axis2),
            resolve(&nodes, wd.arm),
        ) else {
            report.skip("wheel", i, "unresolved node reference");
            continue;
        };
        if wd.rays < 3 {
            report.skip("wheel", i, "needs at least 3 rays");
            continue;
        }
        generate_wheel(
            def, wd, i, axis0, axis1, arm, &mut nodes, &mut beams, &mut wheels,
        );
    }

    // --- Rotators ---------------------------------------------------------
    for (i, rd) in def.rotators.iter().enumerate() {
        let axes = (resolve(&nodes, rd.axis1), resolve(&nodes, rd.axis2));
        let base: Vec<_> = rd.base_plate.iter().filter_map(|&r| resolve(&nodes, r)).collect();
        let plate: Vec<_> = rd
            .rotating_plate
            .iter()
            .filter_map(|&r| resolve(&nodes, r))
            .collect();
        let (Some(a1), Some(a2)) = axes else {
            report.skip("rotator", i, "unresolved axis node");
            continue;
        };
        if base.len() != 4 || plate.len() != 4 {
            report.skip("rotator", i, "unresolved plate node");
            continue;
        }
        let ri = rotators.rotators.len();
        rotators.rotators.push(Rotator {
            axis1: a1,
            axis2: a2,
            nodes1: [base[0], base[1], base[2], base[3]],
            nodes2: [plate[0], plate[1], plate[2], plate[3]],
            angle: 0.0,
            rate: rd.rate,
            force: rd.force,
            tolerance: rd.tolerance,
            engine_coupling: rd.engine_coupling,
            needs_engine: rd.needs_engine,
        });
        rotators.inertia.push(InertiaFilter::passthrough());
        let signed = (ri + 1) as i64;
        if rd.key_cw < commands.keys.len() {
            commands.keys[rd.key_cw].rotators.push(signed);
            commands.has_commands = true;
        }
        if rd.key_ccw < commands.keys.len() {
            commands.keys[rd.key_ccw].rotators.push(-signed);
            commands.has_commands = true;
        }
    }

    // --- Hooks, ropes, ties, slidenodes ------------------------------------
    for (i, hd) in def.hooks.iter().enumerate() {
        let Some(node) = resolve(&nodes, hd.node) else {
            report.skip("hook", i, "unresolved node reference");
            continue;
        };
        // The coupling beam parks disabled between the hook node and the
        // chassis root until a lock target is captured.
        let mut beam = Beam::new(node, 0, def.defaults.spring, def.defaults.damp, 1.0);
        beam.role = BeamRole::Hook;
        beam.disabled = true;
        beam.command_short = hd.lock_range.min(0.001);
        let beam_id = beams.add(beam);
        attachments.hooks.push(Hook {
            node,
            group: hd.group,
            lockgroup: hd.lockgroup,
            beam: beam_id,
            state: HookState::Unlocked,
            locked_node: None,
            lock_range: hd.lock_range,
            lock_speed: hd.lock_speed,
            max_force: hd.max_force,
            auto_lock: hd.auto_lock,
            self_lock: hd.self_lock,
            no_disable: hd.no_disable,
            timer: 0.0,
            timer_preset: hd.timer,
        });
    }

    for (i, rd) in def.ropes.iter().enumerate() {
        let (Some(root), Some(end)) = (resolve(&nodes, rd.root_node), resolve(&nodes, rd.end_node))
        else {
            report.skip("rope", i, "unresolved node reference");
            continue;
        };
        let length = nodes.read(root).rel_position.distance(nodes.read(end).rel_position);
        if root == end || length < MIN_BEAM_LENGTH {
            report.skip("rope", i, "degenerate geometry");
            continue;
        }
        let mut beam = Beam::new(root, end, def.defaults.spring, def.defaults.damp, length);
        beam.bound = BeamBound::Rope;
        let beam_id = beams.add(beam);
        attachments.ropes.push(Rope {
            beam: beam_id,
            group: rd.group,
            locked_to: None,
        });
    }

    for (i, td) in def.ties.iter().enumerate() {
        let Some(root) = resolve(&nodes, td.root_node) else {
            report.skip("tie", i, "unresolved node reference");
            continue;
        };
        let mut beam = Beam::new(root, 0, def.defaults.spring, def.defaults.damp, td.max_reach);
        beam.role = BeamRole::Tie;
        beam.bound = BeamBound::Rope;
        beam.disabled = true;
        beam.command_short = td.short_len;
        beam.command_ratio_short = td.rate;
        let beam_id = beams.add(beam);
        attachments.ties.push(Tie {
            beam: beam_id,
            group: td.group,
            tying: false,
            max_stress: td.max_stress,
            locked_to: None,
        });
    }

    for (i, sd) in def.slidenodes.iter().enumerate() {
        let Some(node) = resolve(&nodes, sd.node) else {
            report.skip("slidenode", i, "unresolved node reference");
            continue;
        };
        let rail: Vec<_> = sd.rail.iter().filter_map(|&r| resolve(&nodes, r)).collect();
        if rail.len() < 2 || rail.len() != sd.rail.len() {
            report.skip("slidenode", i, "bad rail");
            continue;
        }
        attachments.slidenodes.push(SlideNode {
            node,
            rail,
            segment: 0,
            spring: sd.spring,
            damping: sd.damping,
            break_force: sd.break_force,
            attached: true,
        });
    }

    // --- Collision cabinet -------------------------------------------------
    for (i, cd) in def.cab_triangles.iter().enumerate() {
        let tri: Vec<_> = cd.nodes.iter().filter_map(|&r| resolve(&nodes, r)).collect();
        if tri.len() != 3 || tri[0] == tri[1] || tri[1] == tri[2] || tri[0] == tri[2] {
            report.skip("cab triangle", i, "unresolved or degenerate");
            continue;
        }
        let idx = cabs.tris.len();
        cabs.tris.push([tri[0], tri[1], tri[2]]);
        if cd.contact {
            cabs.coll_tris.push(idx);
        }
    }
    cabs.inter_rate = vec![CollCabRate::default(); cabs.coll_tris.len()];
    cabs.intra_rate = vec![CollCabRate::default(); cabs.coll_tris.len()];
    cabs.submesh_ground_model = def.submesh_ground_model.clone();

    // --- Drivetrain ---------------------------------------------------------
    let mut driveline = Driveline::default();
    if let Some(ed) = &def.engine {
        let mut engine = Engine {
            min_rpm: ed.min_rpm,
            max_rpm: ed.max_rpm,
            ..Engine::default()
        };
        engine.stall_rpm = (ed.min_rpm * 0.4).min(300.0);
        engine.idle_rpm = ed.min_rpm;
        if let Some(f) = ed.clutch_force {
            engine.clutch_force = f;
        }
        if let Some(inertia) = ed.inertia {
            engine.inertia = inertia;
        }
        engine.torque_curve = if ed.torque_curve.is_empty() {
            vec![(0.0, ed.torque), (ed.max_rpm, ed.torque)]
        } else {
            ed.torque_curve.clone()
        };
        // Reverse, neutral, then forward gears, premultiplied by the
        // differential ratio.
        let mut ratios = Vec::with_capacity(ed.gear_ratios.len() + 1);
        let mut it = ed.gear_ratios.iter();
        if let Some(&reverse) = it.next() {
            ratios.push(reverse * ed.diff_ratio);
        }
        ratios.push(0.0);
        for &g in it {
            ratios.push(g * ed.diff_ratio);
        }
        engine.gear_ratios = ratios;
        driveline.engine = Some(engine);
    }
    if let Some(bd) = &def.brakes {
        driveline.brake_force = bd.force;
        driveline.hand_brake_force = bd.hand_force.unwrap_or(bd.force * 2.0);
    }
    if let Some(alb) = def.alb {
        driveline.alb = Some(crate::driveline::AlbConfig {
            ratio: alb.ratio,
            min_speed: alb.min_speed,
            pulse_hz: alb.pulse_hz,
        });
    }
    if let Some(tc) = def.tc {
        driveline.tc = Some(crate::driveline::TcConfig {
            wheelslip: tc.wheelslip,
            fade: tc.fade,
            pulse_hz: tc.pulse_hz,
        });
    }
    for (i, ad) in def.axles.iter().enumerate() {
        if ad.wheel_1 >= wheels.len() || ad.wheel_2 >= wheels.len() {
            report.skip("axle", i, "wheel index out of range");
            continue;
        }
        let kinds = if ad.diffs.is_empty() {
            vec![DiffKind::Locked]
        } else {
            ad.diffs.clone()
        };
        driveline.axles.push(Axle {
            wheel_1: ad.wheel_1,
            wheel_2: ad.wheel_2,
            diff: Differential::new(kinds),
        });
    }

    // --- Finalisation -------------------------------------------------------
    let connections = build_connections(&nodes, &beams);

    let lowest_node = (0..nodes.len())
        .min_by(|&a, &b| {
            nodes
                .read(a)
                .rel_position
                .y
                .partial_cmp(&nodes.read(b).rel_position.y)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .unwrap_or(0);

    let mean_coll_edge = {
        let mut sum = 0.0;
        let mut count = 0;
        for &ti in &cabs.coll_tris {
            let [a, b, c] = cabs.tris[ti];
            let (pa, pb, pc) = (
                nodes.read(a).rel_position,
                nodes.read(b).rel_position,
                nodes.read(c).rel_position,
            );
            sum += pa.distance(pb) + pb.distance(pc) + pc.distance(pa);
            count += 3;
        }
        if count > 0 {
            sum / count as f32
        } else {
            0.0
        }
    };

    // Shift node coordinates into the actor-origin frame.
    for i in 0..nodes.len() {
        let node = nodes.get_mut(i);
        node.abs_position = position + node.rel_position;
    }

    let statics = ActorStatics {
        name: def.name.clone(),
        spawn_position: position,
        disable_drag: def.disable_drag,
        lowest_node,
        total_mass: nodes.total_mass(),
        mean_coll_edge,
    };

    let mut bounds = ActorBounds::default();
    refresh_bounds(&nodes, &mut bounds);

    Ok((
        ActorBundle {
            id: ActorId(id),
            state: ActorState::Activated,
            origin: Origin(position),
            sleep: SleepTimer(0.0),
            net: NetTimer(0.0),
            bounds,
            nodes,
            beams,
            wheels,
            commands,
            controls: Controls::default(),
            hydros,
            rotators,
            attachments,
            cabs,
            connections,
            statics,
            meters: Meters::default(),
            driveline,
        },
        report,
    ))
}

/// Distribute the global dry/load mass over the nodes, honouring explicit
/// masses and the per-node minimum.
fn distribute_masses(nodes: &mut NodeStore, def: &ActorDef) {
    let explicit: f32 = def
        .nodes
        .iter()
        .filter_map(|n| n.mass)
        .sum();
    let unloaded: Vec<usize> = def
        .nodes
        .iter()
        .enumerate()
        .filter(|(_, n)| n.mass.is_none())
        .map(|(i, _)| i)
        .collect();
    let loaded: Vec<usize> = def
        .nodes
        .iter()
        .enumerate()
        .filter(|(_, n)| n.load_bearing)
        .map(|(i, _)| i)
        .collect();

    let spread = ((def.globals.dry_mass - explicit) / unloaded.len().max(1) as f32).max(0.0);
    let load_spread = if loaded.is_empty() {
        0.0
    } else {
        def.globals.load_mass / loaded.len() as f32
    };

    for nd in def.nodes.iter() {
        let Some(idx) = nodes.index_of_id(nd.id) else {
            continue;
        };
        let mut mass = nd.mass.unwrap_or(spread);
        if nd.load_bearing {
            mass += load_spread;
        }
        mass = mass.max(def.globals.minimum_mass);
        let was_fixed = nodes.read(idx).inv_mass == 0.0;
        let node = nodes.get_mut(idx);
        node.mass = mass;
        node.inv_mass = if was_fixed { 0.0 } else { 1.0 / mass };
    }
}

/// Synthesise the node/beam cluster of one wheel and register it.
#[allow(clippy::too_many_arguments)]
fn generate_wheel(
    def: &ActorDef,
    wd: &crate::def::WheelDef,
    wheel_index: usize,
    axis0: usize,
    axis1: usize,
    arm: usize,
    nodes: &mut NodeStore,
    beams: &mut BeamStore,
    wheels: &mut Wheels,
) {
    let p0 = nodes.read(axis0).rel_position;
    let p1 = nodes.read(axis1).rel_position;
    let axis = (p1 - p0).normalize_or_zero();
    // Perpendicular basis for the ray directions.
    let seed = if axis.x.abs() < 0.9 { Vec3::X } else { Vec3::Y };
    let u = axis.cross(seed).normalize_or_zero();
    let v = axis.cross(u);

    let near_attach = if nodes.read(arm).rel_position.distance(p0)
        < nodes.read(arm).rel_position.distance(p1)
    {
        axis0
    } else {
        axis1
    };

    let mut wheel = Wheel::new(axis0, axis1, arm, near_attach);
    wheel.kind = wd.kind;
    wheel.radius = wd.radius;
    wheel.width = wd.width;
    wheel.propulsed = wd.propulsion;
    wheel.braking = wd.braking;
    wheel.detacher_group = wd.detacher_group;

    let has_tyre = wd.tyre_radius.is_some();
    let ring_count = if has_tyre { 4 } else { 2 };
    let node_mass = wd.mass / (wd.rays * ring_count) as f32;

    let make_ring = |nodes: &mut NodeStore, radius: f32, tyre: bool| -> Vec<usize> {
        let mut ring = Vec::with_capacity(wd.rays * 2);
        for ray in 0..wd.rays {
            let angle = ray as f32 / wd.rays as f32 * std::f32::consts::TAU;
            let dir = u * angle.cos() + v * angle.sin();
            for center in [p0, p1] {
                let idx = nodes.add(
                    center + dir * radius,
                    node_mass,
                    NodeOptions {
                        friction_coef: def.defaults.friction,
                        contacter: false,
                        contactable: true,
                        id: -1,
                        ..NodeOptions::default()
                    },
                );
                let node = nodes.get_mut(idx);
                node.wheel_id = Some(wheel_index);
                node.tyre_node = tyre;
                ring.push(idx);
            }
        }
        ring
    };

    let add_beam = |nodes: &NodeStore, beams: &mut BeamStore, a: usize, b: usize, k: f32, d: f32| {
        if a == b {
            return;
        }
        let length = nodes.read(a).rel_position.distance(nodes.read(b).rel_position);
        beams.add(
            Beam::new(a, b, k, d, length.max(MIN_BEAM_LENGTH)).with_limits(
                def.defaults.strength,
                def.defaults.deform,
                def.defaults.plastic_coef,
            ),
        );
    };

    let rim = make_ring(nodes, wd.radius, false);

    // Spokes: every rim node to both axis nodes, plus circumference and
    // cross-bracing between the two rim rings.
    for &n in &rim {
        add_beam(nodes, beams, n, axis0, wd.spring, wd.damp);
        add_beam(nodes, beams, n, axis1, wd.spring, wd.damp);
    }
    let n_ring = rim.len();
    for i in 0..n_ring {
        add_beam(nodes, beams, rim[i], rim[(i + 2) % n_ring], wd.spring, wd.damp);
        add_beam(nodes, beams, rim[i], rim[(i + 3) % n_ring], wd.spring, wd.damp);
    }

    if let Some(tyre_radius) = wd.tyre_radius {
        // Wheel2-style tyre lattice around the rim, softer than the rim
        // spokes.
        let tyre_spring = wd.tyre_spring.unwrap_or(wd.spring * 0.1);
        let tyre_damp = wd.tyre_damp.unwrap_or(wd.damp * 0.5);
        let tyre = make_ring(nodes, tyre_radius, true);
        for i in 0..tyre.len() {
            add_beam(nodes, beams, tyre[i], rim[i], tyre_spring, tyre_damp);
            add_beam(nodes, beams, tyre[i], rim[(i + 2) % n_ring], tyre_spring, tyre_damp);
            add_beam(nodes, beams, tyre[i], tyre[(i + 2) % n_ring], tyre_spring, tyre_damp);
            add_beam(nodes, beams, tyre[i], tyre[(i + 3) % n_ring], tyre_spring, tyre_damp);
        }
        wheel.nodes = rim.into_iter().chain(tyre).collect();
        wheel.radius = tyre_radius.max(wd.radius);
    } else {
        wheel.nodes = rim;
    }
    wheels.push(wheel);
}

/// Beam-connected neighbour lists, used by the back-face heuristic.
fn build_connections(nodes: &NodeStore, beams: &BeamStore) -> NodeConnections {
    let mut connections = vec![Vec::new(); nodes.len()];
    for beam in beams.iter() {
        if beam.is_inter_actor() {
            continue;
        }
        connections[beam.p1].push(beam.p2);
        connections[beam.p2].push(beam.p1);
    }
    NodeConnections(connections)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::def::{BeamDef, NodeDef, WheelDef};

    fn node_def(id: i32, x: f32, y: f32, z: f32) -> NodeDef {
        NodeDef {
            id,
            x,
            y,
            z,
            fixed: false,
            mass: None,
            load_bearing: false,
            contacter: false,
            no_ground_contact: false,
            buoyancy: None,
            lockgroup: -1,
            coll_cohort: None,
        }
    }

    fn box_def() -> ActorDef {
        let mut def = ActorDef {
            name: "box".to_string(),
            ..ActorDef::default()
        };
        def.nodes = vec![
            node_def(0, 0.0, 0.0, 0.0),
            node_def(1, 1.0, 0.0, 0.0),
            node_def(2, 0.0, 1.0, 0.0),
            node_def(3, 0.0, 0.0, 1.0),
        ];
        def.beams = vec![
            BeamDef {
                node1: NodeRef::Id(0),
                node2: NodeRef::Id(1),
                spring: None,
                damp: None,
                strength: None,
                deform: None,
                support: false,
                support_break_limit: None,
                rope: false,
                invisible: false,
                detacher_group: 0,
            },
            BeamDef {
                node1: NodeRef::Index(0),
                node2: NodeRef::Index(2),
                spring: None,
                damp: None,
                strength: None,
                deform: None,
                support: false,
                support_break_limit: None,
                rope: false,
                invisible: false,
                detacher_group: 0,
            },
        ];
        def
    }

    #[test]
    fn test_spawn_produces_stores() {
        let (bundle, report) = build_actor(&box_def(), Vec3::new(10.0, 5.0, 0.0), 1).unwrap();
        assert!(report.messages.is_empty());
        assert_eq!(bundle.nodes.len(), 4);
        assert_eq!(bundle.beams.len(), 2);
        // Absolute positions include the spawn origin.
        assert_eq!(bundle.nodes.read(0).abs_position, Vec3::new(10.0, 5.0, 0.0));
        assert_eq!(bundle.origin.0, Vec3::new(10.0, 5.0, 0.0));
    }

    #[test]
    fn test_spawn_skips_bad_entries() {
        let mut def = box_def();
        def.beams.push(BeamDef {
            node1: NodeRef::Id(99), // no such node
            node2: NodeRef::Id(0),
            spring: None,
            damp: None,
            strength: None,
            deform: None,
            support: false,
            support_break_limit: None,
            rope: false,
            invisible: false,
            detacher_group: 0,
        });
        let (bundle, report) = build_actor(&def, Vec3::ZERO, 1).unwrap();
        assert_eq!(bundle.beams.len(), 2);
        assert_eq!(report.messages.len(), 1);
    }

    #[test]
    fn test_spawn_fails_without_nodes() {
        let def = ActorDef {
            name: "empty".to_string(),
            ..ActorDef::default()
        };
        assert!(matches!(
            build_actor(&def, Vec3::ZERO, 1),
            Err(SpawnError::NoValidNodes)
        ));
    }

    #[test]
    fn test_mass_distribution() {
        let mut def = box_def();
        def.globals.dry_mass = 400.0;
        def.globals.minimum_mass = 10.0;
        def.nodes[0].mass = Some(250.0);
        let (bundle, _) = build_actor(&def, Vec3::ZERO, 1).unwrap();
        assert_eq!(bundle.nodes.read(0).mass, 250.0);
        // Remaining 150 kg over three nodes.
        assert!((bundle.nodes.read(1).mass - 50.0).abs() < 1e-3);
        let total: f32 = bundle.nodes.iter().map(|n| n.mass).sum();
        assert!((total - 400.0).abs() < 1e-2);
    }

    #[test]
    fn test_minimum_mass_clamp() {
        let mut def = box_def();
        def.globals.dry_mass = 4.0; // 1 kg per node, below the floor
        def.globals.minimum_mass = 50.0;
        let (bundle, _) = build_actor(&def, Vec3::ZERO, 1).unwrap();
        for node in bundle.nodes.iter() {
            assert!(node.mass >= 50.0);
        }
    }

    #[test]
    fn test_fixed_node_pinned() {
        let mut def = box_def();
        def.nodes[0].fixed = true;
        let (bundle, _) = build_actor(&def, Vec3::ZERO, 1).unwrap();
        assert_eq!(bundle.nodes.read(0).inv_mass, 0.0);
        assert!(bundle.nodes.read(0).mass > 0.0);
    }

    #[test]
    fn test_wheel_generation() {
        let mut def = box_def();
        def.wheels.push(WheelDef {
            axis1: NodeRef::Id(0),
            axis2: NodeRef::Id(3),
            arm: NodeRef::Id(2),
            radius: 0.5,
            width: 0.3,
            rays: 6,
            mass: 60.0,
            spring: 500_000.0,
            damp: 3000.0,
            kind: Default::default(),
            braking: Default::default(),
            propulsion: 1,
            detacher_group: 0,
            tyre_radius: None,
            tyre_spring: None,
            tyre_damp: None,
        });
        let (bundle, report) = build_actor(&def, Vec3::ZERO, 1).unwrap();
        assert!(report.messages.is_empty());
        assert_eq!(bundle.wheels.len(), 1);
        let wheel = &bundle.wheels.wheels[0];
        assert_eq!(wheel.nodes.len(), 12); // 6 rays, 2 rings
        assert_eq!(bundle.nodes.len(), 4 + 12);
        assert_eq!(bundle.wheels.propelled_count, 1);
        // Every generated node is tagged with the wheel index.
        for &n in &wheel.nodes {
            assert_eq!(bundle.nodes.read(n).wheel_id, Some(0));
        }
        // Rim nodes sit at the wheel radius from their axis node.
        let p0 = bundle.nodes.read(wheel.axis0).rel_position;
        let rim = bundle.nodes.read(wheel.nodes[0]).rel_position;
        assert!((rim.distance(p0) - 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_lowest_node_computed_once() {
        let (bundle, _) = build_actor(&box_def(), Vec3::ZERO, 1).unwrap();
        // All chassis nodes share y=0 except node 2; the first lowest wins.
        assert_eq!(bundle.statics.lowest_node, 0);
    }

    #[test]
    fn test_connections_built() {
        let (bundle, _) = build_actor(&box_def(), Vec3::ZERO, 1).unwrap();
        assert!(bundle.connections.0[0].contains(&1));
        assert!(bundle.connections.0[0].contains(&2));
        assert!(bundle.connections.0[1].contains(&0));
    }
}
