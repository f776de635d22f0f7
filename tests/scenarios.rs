//! End-to-end scenarios exercising the solver against known physics.

use std::sync::Arc;

use glam::Vec3;
use softrig::config::SimConfig;
use softrig::def::{ActorDef, BeamDef, NodeDef, NodeRef, RopeDef, ShockDef};
use softrig::driveline::{AlbConfig, Driveline};
use softrig::events::EventQueue;
use softrig::ground::GroundModelRegistry;
use softrig::rig::{
    ActorId, ActorState, Beam, BeamBound, BeamStore, CommandSet, NodeStore, Shock,
};
use softrig::rig::beam::SHOCK_FLAG_NORMAL;
use softrig::systems::shocks::{calc_shock2, TriggerRequests};
use softrig::terrain::FlatTerrain;
use softrig::Simulation;

fn node(id: i32, x: f32, y: f32, z: f32) -> NodeDef {
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

fn plain_beam(a: i32, b: i32, spring: f32, damp: f32) -> BeamDef {
    BeamDef {
        node1: NodeRef::Id(a),
        node2: NodeRef::Id(b),
        spring: Some(spring),
        damp: Some(damp),
        strength: None,
        deform: None,
        support: false,
        support_break_limit: None,
        rope: false,
        invisible: false,
        detacher_group: 0,
    }
}

/// Two nodes, one elastic beam, k=1000, d=0, one end pinned, the free end
/// released at 1.5x the rest length. The free node must oscillate about
/// x = 1.0 with period 2π·√(m/k) ≈ 0.199 s.
#[test]
fn spring_oscillator_period() {
    let config = SimConfig {
        gravity: 0.0,
        ..SimConfig::default()
    };
    let registry = GroundModelRegistry::new().finish();
    let mut sim = Simulation::with_config(config, registry, Arc::new(FlatTerrain::new(-1000.0)));

    let mut def = ActorDef {
        name: "oscillator".to_string(),
        disable_drag: true,
        ..ActorDef::default()
    };
    def.globals.minimum_mass = 0.5;
    def.globals.dry_mass = 0.0;
    let mut fixed = node(0, 0.0, 0.0, 0.0);
    fixed.fixed = true;
    fixed.mass = Some(1.0);
    def.nodes = vec![fixed, node(1, 1.5, 0.0, 0.0)];
    def.nodes[1].mass = Some(1.0);
    def.beams = vec![plain_beam(0, 1, 1000.0, 0.0)];
    // The beam's rest length is the spawn distance (1.5); shrink it to 1.0
    // after spawn so the scenario starts stretched by 0.5.
    let (actor, _) = sim.spawn_actor(&def, Vec3::ZERO).unwrap();
    {
        let world = sim.world_mut();
        let mut query = world.query::<(&ActorId, &mut BeamStore)>();
        for (id, mut beams) in query.iter_mut(world) {
            if *id == actor {
                beams.get_mut(0).rest_len = 1.0;
            }
        }
    }

    // Sample the free node at 600 Hz for 2 seconds.
    let mut crossings: Vec<f64> = Vec::new();
    let mut prev = 0.5f32; // x - 1.0 at t = 0
    let mut min_x = f32::MAX;
    let mut max_x = f32::MIN;
    let frame_dt = 1.0 / 600.0;
    for frame in 0..1200 {
        let snapshot = sim.step(frame_dt);
        let x = snapshot.actors[0].node_positions[1][0];
        let offset = x - 1.0;
        if prev.signum() != offset.signum() && prev != 0.0 {
            // Linear interpolation inside the frame for the crossing time.
            let t1 = (frame as f64 + 1.0) * frame_dt as f64;
            let frac = (prev / (prev - offset)) as f64;
            crossings.push(t1 - frame_dt as f64 * (1.0 - frac));
        }
        prev = offset;
        if frame >= 900 {
            min_x = min_x.min(x);
            max_x = max_x.max(x);
        }
    }

    assert!(crossings.len() >= 10, "oscillation died out");
    // Two crossings per period.
    let periods = (crossings.len() - 1) as f64 / 2.0;
    let measured = (crossings.last().unwrap() - crossings[0]) / periods;
    let expected = 2.0 * std::f64::consts::PI * (1.0f64 / 1000.0).sqrt();
    let error = (measured - expected).abs() / expected;
    assert!(
        error < 0.05,
        "period {:.4} s deviates from {:.4} s by {:.1}%",
        measured,
        expected,
        error * 100.0
    );

    // Oscillation centre and surviving amplitude in the final half second.
    let center = (min_x + max_x) / 2.0;
    assert!((center - 1.0).abs() < 0.05, "centre drifted to {}", center);
    assert!(max_x - center > 0.3, "amplitude collapsed");
}

/// A 1 kg node in free fall reaches -9.807 m/s after one second, then a
/// ground contact removes the downward velocity within a sub-step.
#[test]
fn free_fall_and_ground_contact() {
    let registry = GroundModelRegistry::new().finish();
    let mut sim = Simulation::new(registry, Arc::new(FlatTerrain::new(0.0)));

    let mut def = ActorDef {
        name: "pebble".to_string(),
        disable_drag: true,
        ..ActorDef::default()
    };
    def.globals.minimum_mass = 0.1;
    def.globals.dry_mass = 0.0;
    let mut n = node(0, 0.0, 0.0, 0.0);
    n.mass = Some(1.0);
    def.nodes = vec![n];
    let (actor, _) = sim.spawn_actor(&def, Vec3::new(0.0, 5.0, 0.0)).unwrap();

    // Exactly one second: 100 frames x 20 sub-steps.
    for _ in 0..100 {
        sim.step(0.01);
    }
    let velocity = node_velocity(&mut sim, actor, 0);
    assert!(
        (velocity.y + 9.807).abs() < 0.01,
        "free-fall velocity {} after 1 s",
        velocity.y
    );

    // Let it hit the ground and settle for half a second.
    for _ in 0..50 {
        sim.step(0.01);
    }
    let velocity = node_velocity(&mut sim, actor, 0);
    assert!(velocity.y >= -0.01, "still sinking at {}", velocity.y);
    let y = sim.snapshot().actors[0].node_positions[0][1];
    assert!(y.abs() < 0.1, "node rests at {}", y);
}

/// Progressive shock: compressing through the bound must raise the spring
/// rate by the progression factor over the linear region.
#[test]
fn progressive_shock_force() {
    let mut store = BeamStore::new();
    let mut beam = Beam::new(0, 1, 10_000.0, 0.0, 1.0);
    beam.bound = BeamBound::Shock2;
    beam.short_bound = 0.5; // compression bound
    beam.long_bound = 1.5;
    store.add(beam);
    let mut shock = Shock::new(0, SHOCK_FLAG_NORMAL);
    shock.spring_in = 10_000.0;
    shock.spring_out = 10_000.0;
    shock.sprog_in = 2.0;
    shock.sprog_out = 2.0;
    // Hard stop well above everything so it never masks the progression.
    shock.sbd_spring = 10_000_000.0;
    store.add_shock(shock);

    let mut commands = CommandSet::default();
    let mut requests = TriggerRequests::default();
    let mut events = EventQueue::default();

    // Drive the stretch from 0 to just inside the compression bound at
    // 5 m/s (2.5 mm per sub-step).
    let dt = 0.0005;
    let mut peak_ratio = 0.0f32;
    for step in 1..=198 {
        let diff = -(step as f32) * 5.0 * dt;
        let (k, _) = calc_shock2(
            &mut store, 0, diff, dt, false, 0, &mut commands, &mut requests, &mut events,
        );
        peak_ratio = peak_ratio.max(k / 10_000.0);
    }

    // Expected factor near the bound: 1 + progression ~= 3 (the quadratic
    // progression is at (0.495/0.5)^2 of full scale on the last step).
    assert!(
        (peak_ratio - 3.0).abs() / 3.0 < 0.05,
        "peak spring ratio {} should be ~3",
        peak_ratio
    );
}

/// A trigger beam stretched past its extension boundary presses its
/// long-action command key; the key releases once the beam returns inside
/// the boundaries.
#[test]
fn trigger_beam_drives_command_key() {
    let config = SimConfig {
        gravity: 0.0,
        ..SimConfig::default()
    };
    let registry = GroundModelRegistry::new().finish();
    let mut sim = Simulation::with_config(config, registry, Arc::new(FlatTerrain::new(-1000.0)));

    let mut def = ActorDef {
        name: "trigger rig".to_string(),
        disable_drag: true,
        ..ActorDef::default()
    };
    def.globals.minimum_mass = 1.0;
    def.globals.dry_mass = 0.0;
    let mut a = node(0, 0.0, 0.0, 0.0);
    a.fixed = true;
    a.mass = Some(10.0);
    let mut b = node(1, 1.0, 0.0, 0.0);
    b.fixed = true;
    b.mass = Some(10.0);
    def.nodes = vec![a, b];
    def.shocks = vec![ShockDef {
        node1: NodeRef::Id(0),
        node2: NodeRef::Id(1),
        spring_in: 5_000.0,
        damp_in: 50.0,
        spring_out: None,
        damp_out: None,
        progression_in: 0.0,
        progression_out: 0.0,
        short_bound: 0.5,
        long_bound: 0.5,
        precompression: 1.0,
        soft_bump: false,
        trigger: Some(softrig::def::TriggerDef {
            short_action: 2,
            long_action: 1,
            boundary_timer: 0.0,
            blocker: false,
            inverted_blocker: false,
            cmd_blocker: false,
            cmd_switch: false,
            continuous: false,
            hook_lock: false,
            hook_unlock: false,
            engine_trigger: false,
        }),
        detacher_group: 0,
    }];
    let (actor, _) = sim.spawn_actor(&def, Vec3::ZERO).unwrap();

    let key_pressed = |sim: &mut Simulation, key: usize| -> bool {
        let world = sim.world_mut();
        let mut query = world.query::<(&ActorId, &CommandSet)>();
        let mut pressed = false;
        for (id, commands) in query.iter(world) {
            if *id == actor {
                pressed = commands.keys[key].is_pressed();
            }
        }
        pressed
    };

    // Stretch the trigger beam past the extension boundary.
    set_node_x(&mut sim, actor, 1, 1.8);
    sim.step(0.01);
    assert!(key_pressed(&mut sim, 1), "long action key must be pressed");
    assert!(!key_pressed(&mut sim, 2));
    assert!(sim
        .drain_events()
        .iter()
        .any(|e| matches!(e, softrig::SimEvent::TriggerFired { key: 1, .. })));

    // Back inside the boundaries: the key releases.
    set_node_x(&mut sim, actor, 1, 1.0);
    sim.step(0.01);
    sim.step(0.01);
    assert!(!key_pressed(&mut sim, 1));
}

/// Two actors coupled by a rope wake together and fall asleep together.
#[test]
fn rope_coupled_actors_share_wake_and_sleep() {
    let config = SimConfig {
        gravity: 0.0,
        sleep_grace: 0.2,
        ..SimConfig::default()
    };
    let registry = GroundModelRegistry::new().finish();
    let mut sim = Simulation::with_config(config, registry, Arc::new(FlatTerrain::new(-1000.0)));

    let make_def = |name: &str, with_rope: bool| {
        let mut def = ActorDef {
            name: name.to_string(),
            disable_drag: true,
            ..ActorDef::default()
        };
        def.globals.minimum_mass = 1.0;
        def.globals.dry_mass = 20.0;
        def.nodes = vec![node(0, 0.0, 0.0, 0.0), node(1, 1.5, 0.0, 0.0)];
        def.beams = vec![plain_beam(0, 1, 50_000.0, 500.0)];
        if with_rope {
            // The rope's free end node hangs loose; the captured rope stays
            // slack so nothing moves in zero gravity.
            def.nodes.push(node(2, 2.0, 0.0, 0.0));
            def.ropes = vec![RopeDef {
                root_node: NodeRef::Id(0),
                end_node: NodeRef::Id(2),
                group: 1,
            }];
        }
        def
    };

    let (a, _) = sim.spawn_actor(&make_def("lead", true), Vec3::ZERO).unwrap();
    // B sits within capture range, closer than the rope's rest length so the
    // captured rope hangs slack.
    let (b, _) = sim
        .spawn_actor(&make_def("trailer", false), Vec3::new(0.0, 1.0, 0.0))
        .unwrap();

    sim.rope_toggle(a, 1).unwrap();

    // Everything is motionless: both fall asleep together.
    for _ in 0..30 {
        sim.step(0.02);
    }
    assert_eq!(sim.actor_state(a), Some(ActorState::Sleeping));
    assert_eq!(sim.actor_state(b), Some(ActorState::Sleeping));

    // Waking the lead wakes the coupled trailer in the same sub-step batch.
    sim.wake_actor(a).unwrap();
    sim.step(0.0005);
    assert_eq!(sim.actor_state(a), Some(ActorState::Activated));
    assert_eq!(sim.actor_state(b), Some(ActorState::Activated));

    // Idle again: the pair goes back to sleep together.
    for _ in 0..30 {
        sim.step(0.02);
    }
    assert_eq!(sim.actor_state(a), Some(ActorState::Sleeping));
    assert_eq!(sim.actor_state(b), Some(ActorState::Sleeping));
}

/// Anti-lock braking holds the brake off for half of each pulse window.
#[test]
fn antilock_brake_duty_cycle() {
    use softrig::rig::{BrakeCombo, Controls, Meters, Wheel, Wheels};
    use softrig::rig::NodeOptions;
    use softrig::systems::wheels::apply_wheel_forces;

    let mut nodes = NodeStore::new();
    let axis0 = nodes.add(Vec3::new(0.0, 0.0, -0.2), 5.0, NodeOptions::default());
    let axis1 = nodes.add(Vec3::new(0.0, 0.0, 0.2), 5.0, NodeOptions::default());
    let arm = nodes.add(Vec3::new(0.0, 1.0, 0.0), 5.0, NodeOptions::default());
    let near = nodes.add(Vec3::new(0.0, 0.5, 0.0), 5.0, NodeOptions::default());
    // Root node travels at 10 m/s; the wheel is nearly locked.
    nodes.get_mut(0).velocity = Vec3::new(10.0, 0.0, 0.0);

    let mut wheel = Wheel::new(axis0, axis1, arm, near);
    wheel.braking = BrakeCombo::FootHand;
    wheel.radius = 0.4;
    for k in 0..4 {
        let angle = k as f32 * std::f32::consts::FRAC_PI_2;
        let idx = nodes.add(
            Vec3::new(angle.cos() * 0.4, angle.sin() * 0.4, 0.0),
            1.0,
            NodeOptions::default(),
        );
        wheel.nodes.push(idx);
    }
    let mut wheels = Wheels::default();
    wheels.push(wheel);

    let mut driveline = Driveline {
        brake_force: 5_000.0,
        alb: Some(AlbConfig {
            ratio: 0.3,
            min_speed: 2.0,
            pulse_hz: 5.0,
        }),
        ..Driveline::default()
    };
    let controls = Controls {
        brake: 1.0,
        ..Controls::default()
    };
    let mut meters = Meters::default();

    // One second at the sub-step rate; count the sub-steps with the brake
    // pulsed off and the on/off transitions.
    let dt = 0.0005;
    let steps = 2000;
    let mut off_steps = 0;
    let mut transitions = 0;
    let mut last_active = false;
    for _ in 0..steps {
        // Keep the wheel slipping; the static test rig would otherwise
        // re-measure the wheel speed as zero.
        wheels.wheels[0].speed = 0.5;
        apply_wheel_forces(
            dt,
            &controls,
            0.0,
            &mut nodes,
            &mut wheels,
            &mut driveline,
            &mut meters,
        );
        if driveline.alb_active {
            off_steps += 1;
        }
        if driveline.alb_active != last_active {
            transitions += 1;
            last_active = driveline.alb_active;
        }
    }

    let duty = off_steps as f32 / steps as f32;
    assert!(
        (duty - 0.5).abs() < 0.1,
        "brake should be off half the time, duty {}",
        duty
    );
    // 5 Hz pulsing: ten on/off transitions per second.
    assert!(
        (transitions as i32 - 10).abs() <= 2,
        "expected ~10 transitions, saw {}",
        transitions
    );
}

// ---------------------------------------------------------------------------

fn node_velocity(sim: &mut Simulation, actor: ActorId, index: usize) -> Vec3 {
    let world = sim.world_mut();
    let mut query = world.query::<(&ActorId, &NodeStore)>();
    let mut velocity = Vec3::ZERO;
    for (id, nodes) in query.iter(world) {
        if *id == actor {
            velocity = nodes.read(index).velocity;
        }
    }
    velocity
}

fn set_node_x(sim: &mut Simulation, actor: ActorId, index: usize, x: f32) {
    let world = sim.world_mut();
    let mut query = world.query::<(&ActorId, &mut NodeStore)>();
    for (id, mut nodes) in query.iter_mut(world) {
        if *id == actor {
            let node = nodes.get_mut(index);
            node.rel_position.x = x;
            node.abs_position.x = x;
        }
    }
}
