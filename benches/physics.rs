//! Benchmarks for the softrig solver.

use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};
use glam::Vec3;
use softrig::def::{ActorDef, BeamDef, NodeDef, NodeRef};
use softrig::ground::GroundModelRegistry;
use softrig::terrain::FlatTerrain;
use softrig::Simulation;

fn lattice_def(side: usize) -> ActorDef {
    let mut def = ActorDef {
        name: "lattice".to_string(),
        ..ActorDef::default()
    };
    def.globals.dry_mass = 500.0 * side as f32;
    def.globals.minimum_mass = 5.0;

    let mut id = 0;
    for x in 0..side {
        for y in 0..side {
            for z in 0..side {
                def.nodes.push(NodeDef {
                    id,
                    x: x as f32,
                    y: y as f32,
                    z: z as f32,
                    fixed: false,
                    mass: None,
                    load_bearing: false,
                    contacter: x == 0 || y == 0 || z == 0,
                    no_ground_contact: false,
                    buoyancy: None,
                    lockgroup: -1,
                    coll_cohort: None,
                });
                id += 1;
            }
        }
    }
    // Connect each node to its +x/+y/+z neighbours and one body diagonal.
    let index = |x: usize, y: usize, z: usize| (x * side * side + y * side + z) as i32;
    for x in 0..side {
        for y in 0..side {
            for z in 0..side {
                let a = index(x, y, z);
                let mut link = |b: i32| {
                    def.beams.push(BeamDef {
                        node1: NodeRef::Id(a),
                        node2: NodeRef::Id(b),
                        spring: Some(1_000_000.0),
                        damp: Some(3_000.0),
                        strength: None,
                        deform: None,
                        support: false,
                        support_break_limit: None,
                        rope: false,
                        invisible: false,
                        detacher_group: 0,
                    });
                };
                if x + 1 < side {
                    link(index(x + 1, y, z));
                }
                if y + 1 < side {
                    link(index(x, y + 1, z));
                }
                if z + 1 < side {
                    link(index(x, y, z + 1));
                }
                if x + 1 < side && y + 1 < side && z + 1 < side {
                    link(index(x + 1, y + 1, z + 1));
                }
            }
        }
    }
    def
}

fn bench_substeps(c: &mut Criterion) {
    c.bench_function("lattice_4x4x4_one_frame_60hz", |b| {
        let registry = GroundModelRegistry::new().finish();
        let mut sim = Simulation::new(registry, Arc::new(FlatTerrain::new(0.0)));
        sim.spawn_actor(&lattice_def(4), Vec3::new(0.0, 3.0, 0.0))
            .unwrap();
        b.iter(|| sim.step(1.0 / 60.0));
    });
}

fn bench_spawn(c: &mut Criterion) {
    c.bench_function("spawn_lattice_6x6x6", |b| {
        let def = lattice_def(6);
        b.iter(|| {
            let registry = GroundModelRegistry::new().finish();
            let mut sim = Simulation::new(registry, Arc::new(FlatTerrain::new(0.0)));
            sim.spawn_actor(&def, Vec3::new(0.0, 3.0, 0.0)).unwrap()
        });
    });
}

fn bench_two_actor_contact(c: &mut Criterion) {
    c.bench_function("two_lattices_colliding_one_frame", |b| {
        let registry = GroundModelRegistry::new().finish();
        let mut sim = Simulation::new(registry, Arc::new(FlatTerrain::new(0.0)));
        sim.spawn_actor(&lattice_def(3), Vec3::new(0.0, 1.0, 0.0))
            .unwrap();
        sim.spawn_actor(&lattice_def(3), Vec3::new(1.5, 4.0, 1.5))
            .unwrap();
        b.iter(|| sim.step(1.0 / 60.0));
    });
}

criterion_group!(benches, bench_substeps, bench_spawn, bench_two_actor_contact);
criterion_main!(benches);
