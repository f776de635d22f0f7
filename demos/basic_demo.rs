//! Basic demonstration of the softrig simulation.
//!
//! Drops a small wheeled test rig onto flat ground, starts the engine and
//! drives forward for a few seconds.
//!
//! Run with: cargo run --example basic_demo

use std::sync::Arc;

use glam::Vec3;
use softrig::def::{
    ActorDef, BeamDef, BrakesDef, EngineDef, NodeDef, NodeRef, WheelDef,
};
use softrig::ground::{GroundModelDef, GroundModelRegistry};
use softrig::terrain::FlatTerrain;
use softrig::Simulation;

fn main() {
    println!("=== softrig - soft-body vehicle demo ===\n");

    let mut registry = GroundModelRegistry::new();
    registry.insert(GroundModelDef {
        name: "asphalt".to_string(),
        va: Some(0.5),
        ms: Some(0.8),
        mc: Some(0.65),
        vs: Some(1.5),
        ..GroundModelDef::default()
    });
    let registry = registry.finish();

    let terrain = Arc::new(FlatTerrain::new(0.0).with_surface("asphalt"));
    let mut sim = Simulation::new(registry, terrain);

    let def = buggy_def();
    let (actor, report) = sim.spawn_actor(&def, Vec3::new(0.0, 1.0, 0.0)).unwrap();
    for msg in &report.messages {
        println!("spawn note: {}", msg);
    }

    sim.start_engine(actor).unwrap();
    sim.set_controls(actor, |c| c.throttle = 0.6).unwrap();
    sim.shift_gear(actor, 1).unwrap();

    println!("Driving for 5 seconds of simulated time...\n");
    let frame_dt = 1.0 / 60.0;
    for frame in 0..300 {
        let snapshot = sim.step(frame_dt);
        if (frame + 1) % 60 == 0 {
            let a = &snapshot.actors[0];
            let pos = a.node_positions[0];
            let engine = a.engine.as_ref().unwrap();
            println!(
                "t={:.1}s  pos=({:.2}, {:.2}, {:.2})  rpm={:.0} gear={}  odo={:.2} m",
                sim.current_time(),
                pos[0],
                pos[1],
                pos[2],
                engine.rpm,
                engine.gear,
                a.odometer
            );
        }
    }

    let events = sim.drain_events();
    println!("\n{} events this run", events.len());
    for event in events.iter().take(10) {
        println!("  {:?}", event);
    }

    println!("\n=== Final snapshot (JSON, truncated) ===");
    let json = sim.snapshot().to_json_pretty().unwrap();
    for line in json.lines().take(30) {
        println!("{}", line);
    }
}

/// A crude rig: a cross-braced chassis box rolling on two full-width
/// wheel clusters.
fn buggy_def() -> ActorDef {
    let mut def = ActorDef {
        name: "demo buggy".to_string(),
        ..ActorDef::default()
    };
    def.globals.dry_mass = 1200.0;
    def.globals.minimum_mass = 10.0;

    // Chassis box, 3 m long, 1.4 m wide, 0.6 m tall.
    let mut id = 0;
    for &y in &[0.0f32, 0.6] {
        for &z in &[-1.5f32, 1.5] {
            for &x in &[-0.7f32, 0.7] {
                def.nodes.push(NodeDef {
                    id,
                    x,
                    y,
                    z,
                    fixed: false,
                    mass: None,
                    load_bearing: false,
                    contacter: true,
                    no_ground_contact: false,
                    buoyancy: None,
                    lockgroup: -1,
                    coll_cohort: None,
                });
                id += 1;
            }
        }
    }
    // Full cross-bracing keeps the box rigid.
    for a in 0..8u32 {
        for b in (a + 1)..8 {
            def.beams.push(BeamDef {
                node1: NodeRef::Id(a as i32),
                node2: NodeRef::Id(b as i32),
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
        }
    }

    for (axis1, axis2, arm) in [(0, 1, 4), (2, 3, 6)] {
        def.wheels.push(WheelDef {
            axis1: NodeRef::Id(axis1),
            axis2: NodeRef::Id(axis2),
            arm: NodeRef::Id(arm),
            radius: 0.35,
            width: 0.25,
            rays: 8,
            mass: 40.0,
            spring: 600_000.0,
            damp: 4_000.0,
            kind: Default::default(),
            braking: softrig::rig::BrakeCombo::FootHand,
            propulsion: 1,
            detacher_group: 0,
            tyre_radius: None,
            tyre_spring: None,
            tyre_damp: None,
        });
    }

    def.engine = Some(EngineDef {
        min_rpm: 800.0,
        max_rpm: 4500.0,
        torque: 300.0,
        diff_ratio: 3.7,
        gear_ratios: vec![-2.5, 2.9, 1.8, 1.3, 1.0],
        torque_curve: Vec::new(),
        clutch_force: None,
        inertia: None,
    });
    def.brakes = Some(BrakesDef {
        force: 8_000.0,
        hand_force: None,
    });
    def
}
