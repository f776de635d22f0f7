//! The actor scheduler and public simulation container.
//!
//! `Simulation` owns the ECS world and the per-phase schedules, drives the
//! fixed-timestep sub-step loop, and hosts the serial cross-actor phases:
//! inter-actor beams, hooks/ropes/ties, dynamic collisions, sleep/wake and
//! deferred deletion. Determinism contract: actors are always visited in
//! id order, beams in index order.

use bevy_ecs::prelude::*;
use glam::Vec3;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::collision::aabb::Aabb;
use crate::collision::dynamic::{resolve_inter_collisions, resolve_intra_collisions, DynActor};
use crate::collision::point_col::{ActorPoints, PointColDetector};
use crate::config::SimConfig;
use crate::def::ActorDef;
use crate::driveline::Driveline;
use crate::error::{ActorNotFound, SpawnError};
use crate::events::{EventQueue, SimEvent};
use crate::ground::{GroundModel, GroundModelRegistry};
use crate::rig::actor::{
    ActorBounds, ActorId, ActorState, ActorStatics, Attachments, Cabs, Controls, HookState,
    NetTimer, NodeConnections, Origin, SleepTimer,
};
use crate::rig::beam::{BeamBound, BeamStore};
use crate::rig::commands::CommandSet;
use crate::rig::node::{LockState, NodeStore};
use crate::snapshot::{ReplayRing, Snapshot, SnapshotChannel};
use crate::spawn::{build_actor, SpawnReport};
use crate::systems::actuators::actuator_system;
use crate::systems::forces::{beam_forces_system, seed_forces_system};
use crate::systems::integrator::{ground_collision_system, integrate_system};
use crate::systems::wheels::{engine_system, wheel_force_system};
use crate::systems::{DeltaTime, FrameFlags, SimTick};
use crate::terrain::{Terrain, TerrainResource};

#[cfg(feature = "profile")]
use crate::profiler::Profiler;

/// What an inter-actor link carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    /// A beam whose far end indexes into the partner's node store.
    Beam,
    /// A rope mirror: the owner keeps its own end node, the serial phase
    /// pins it onto the partner. The link only couples the actors.
    Rope,
}

/// A beam owned by one actor whose far end lives in another actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterBeamRef {
    pub owner: u32,
    pub beam: usize,
    pub partner: u32,
    pub kind: LinkKind,
}

/// Registry of live inter-actor beams, maintained by the serial phase.
#[derive(Resource, Debug, Default)]
pub struct InterActorLinks {
    pub beams: Vec<InterBeamRef>,
}

impl InterActorLinks {
    /// Drop every link touching `actor` and return the removed links so the
    /// caller can tear down the owner-side beams.
    fn purge_actor(&mut self, actor: u32) -> Vec<InterBeamRef> {
        let (dropped, kept): (Vec<_>, Vec<_>) = self
            .beams
            .iter()
            .partition(|l| l.owner == actor || l.partner == actor);
        self.beams = kept;
        dropped
    }
}

/// The simulation container: world, schedules and the frame driver.
pub struct Simulation {
    world: World,
    force_schedule: Schedule,
    collision_schedule: Schedule,
    integrate_schedule: Schedule,
    tick: u64,
    time: f64,
    accumulator: f32,
    next_actor_id: u32,
    channel: SnapshotChannel,
    replay: ReplayRing,
    #[cfg(feature = "profile")]
    pub profiler: Profiler,
}

impl Simulation {
    pub fn new(registry: GroundModelRegistry, terrain: Arc<dyn Terrain>) -> Self {
        Self::with_config(SimConfig::default(), registry, terrain)
    }

    pub fn with_config(
        config: SimConfig,
        registry: GroundModelRegistry,
        terrain: Arc<dyn Terrain>,
    ) -> Self {
        let mut world = World::new();
        world.insert_resource(DeltaTime(config.substep_dt()));
        world.insert_resource(SimTick(0));
        world.insert_resource(FrameFlags::default());
        world.insert_resource(EventQueue::default());
        world.insert_resource(PointColDetector::default());
        world.insert_resource(InterActorLinks::default());
        world.insert_resource(TerrainResource(terrain));
        world.insert_resource(registry);
        world.insert_resource(config);

        let mut force_schedule = Schedule::default();
        force_schedule.add_systems(
            (
                seed_forces_system,
                engine_system,
                beam_forces_system,
                wheel_force_system,
                actuator_system,
            )
                .chain(),
        );

        let mut collision_schedule = Schedule::default();
        collision_schedule.add_systems(ground_collision_system);

        let mut integrate_schedule = Schedule::default();
        integrate_schedule.add_systems(integrate_system);

        Self {
            world,
            force_schedule,
            collision_schedule,
            integrate_schedule,
            tick: 0,
            time: 0.0,
            accumulator: 0.0,
            next_actor_id: 0,
            channel: SnapshotChannel::new(),
            replay: ReplayRing::new(config.replay_capacity),
            #[cfg(feature = "profile")]
            profiler: Profiler::new(),
        }
    }

    // ------------------------------------------------------------------
    // Actor management
    // ------------------------------------------------------------------

    /// Spawn an actor from a parsed definition at a world position.
    pub fn spawn_actor(
        &mut self,
        def: &ActorDef,
        position: Vec3,
    ) -> Result<(ActorId, SpawnReport), SpawnError> {
        let id = self.next_actor_id;
        let (bundle, report) = build_actor(def, position, id)?;
        self.next_actor_id += 1;
        self.world.spawn(bundle);
        self.refresh_grid_cell_size();
        Ok((ActorId(id), report))
    }

    /// Mark an actor for removal. The despawn is deferred to the end of the
    /// current frame so in-flight references stay valid.
    pub fn schedule_removal(&mut self, actor: ActorId) -> Result<(), ActorNotFound> {
        let mut query = self.world.query::<(&ActorId, &mut ActorState)>();
        for (id, mut state) in query.iter_mut(&mut self.world) {
            if *id == actor {
                *state = ActorState::Deleted;
                return Ok(());
            }
        }
        Err(ActorNotFound(actor.0))
    }

    /// Hand an actor over to remote control.
    pub fn set_networked(&mut self, actor: ActorId) -> Result<(), ActorNotFound> {
        self.with_actor_state(actor, |state, net| {
            *state = ActorState::Networked;
            net.0 = 0.0;
        })
    }

    /// Ingest an authoritative node state update for a networked actor.
    pub fn ingest_network_state(
        &mut self,
        actor: ActorId,
        positions: &[[f32; 3]],
        velocities: &[[f32; 3]],
    ) -> Result<(), ActorNotFound> {
        let mut query = self
            .world
            .query::<(&ActorId, &mut ActorState, &mut NetTimer, &mut NodeStore, &Origin)>();
        for (id, mut state, mut net, mut nodes, origin) in query.iter_mut(&mut self.world) {
            if *id != actor {
                continue;
            }
            for i in 0..nodes.len().min(positions.len()) {
                let node = nodes.get_mut(i);
                node.abs_position = Vec3::from(positions[i]);
                node.rel_position = node.abs_position - origin.0;
                if let Some(v) = velocities.get(i) {
                    node.velocity = Vec3::from(*v);
                }
            }
            net.0 = 0.0;
            if *state == ActorState::NetworkedInvalid {
                *state = ActorState::Networked;
            }
            return Ok(());
        }
        Err(ActorNotFound(actor.0))
    }

    /// Force an actor awake.
    pub fn wake_actor(&mut self, actor: ActorId) -> Result<(), ActorNotFound> {
        let mut query = self
            .world
            .query::<(&ActorId, &mut ActorState, &mut SleepTimer)>();
        for (id, mut state, mut sleep) in query.iter_mut(&mut self.world) {
            if *id == actor {
                if state.is_simulated() || *state == ActorState::Sleeping {
                    *state = ActorState::Activated;
                }
                sleep.0 = 0.0;
                return Ok(());
            }
        }
        Err(ActorNotFound(actor.0))
    }

    pub fn actor_count(&mut self) -> usize {
        self.world.query::<&ActorId>().iter(&self.world).count()
    }

    pub fn actor_state(&mut self, actor: ActorId) -> Option<ActorState> {
        self.world
            .query::<(&ActorId, &ActorState)>()
            .iter(&self.world)
            .find(|(id, _)| **id == actor)
            .map(|(_, s)| *s)
    }

    // ------------------------------------------------------------------
    // Inbound controls
    // ------------------------------------------------------------------

    /// Set a command key's activation in [0, 1].
    pub fn command_input(
        &mut self,
        actor: ActorId,
        key: usize,
        value: f32,
    ) -> Result<(), ActorNotFound> {
        let mut query = self.world.query::<(&ActorId, &mut CommandSet)>();
        for (id, mut commands) in query.iter_mut(&mut self.world) {
            if *id == actor {
                commands.set_player_input(key, value);
                return Ok(());
            }
        }
        Err(ActorNotFound(actor.0))
    }

    /// Update the scalar vehicle controls.
    pub fn set_controls(
        &mut self,
        actor: ActorId,
        update: impl FnOnce(&mut Controls),
    ) -> Result<(), ActorNotFound> {
        let mut query = self.world.query::<(&ActorId, &mut Controls)>();
        for (id, mut controls) in query.iter_mut(&mut self.world) {
            if *id == actor {
                update(&mut controls);
                return Ok(());
            }
        }
        Err(ActorNotFound(actor.0))
    }

    /// Request a gear shift.
    pub fn shift_gear(&mut self, actor: ActorId, delta: i32) -> Result<(), ActorNotFound> {
        let mut query = self.world.query::<(&ActorId, &mut Driveline)>();
        for (id, mut driveline) in query.iter_mut(&mut self.world) {
            if *id == actor {
                if let Some(engine) = driveline.engine.as_mut() {
                    engine.shift(delta);
                }
                return Ok(());
            }
        }
        Err(ActorNotFound(actor.0))
    }

    /// Start the engine (ignition + starter).
    pub fn start_engine(&mut self, actor: ActorId) -> Result<(), ActorNotFound> {
        let mut query = self.world.query::<(&ActorId, &mut Driveline)>();
        for (id, mut driveline) in query.iter_mut(&mut self.world) {
            if *id == actor {
                if let Some(engine) = driveline.engine.as_mut() {
                    engine.start();
                }
                return Ok(());
            }
        }
        Err(ActorNotFound(actor.0))
    }

    /// Toggle the anti-lock brake on or off.
    pub fn toggle_alb(&mut self, actor: ActorId) -> Result<bool, ActorNotFound> {
        let mut query = self.world.query::<(&ActorId, &mut Driveline)>();
        for (id, mut driveline) in query.iter_mut(&mut self.world) {
            if *id == actor {
                driveline.alb_enabled = !driveline.alb_enabled;
                return Ok(driveline.alb_enabled);
            }
        }
        Err(ActorNotFound(actor.0))
    }

    /// Toggle traction control on or off.
    pub fn toggle_tc(&mut self, actor: ActorId) -> Result<bool, ActorNotFound> {
        let mut query = self.world.query::<(&ActorId, &mut Driveline)>();
        for (id, mut driveline) in query.iter_mut(&mut self.world) {
            if *id == actor {
                driveline.tc_enabled = !driveline.tc_enabled;
                return Ok(driveline.tc_enabled);
            }
        }
        Err(ActorNotFound(actor.0))
    }

    /// Toggle the hooks of a hookgroup (-1 toggles every hook).
    pub fn hook_toggle(&mut self, actor: ActorId, group: i32) -> Result<(), ActorNotFound> {
        let mut query = self.world.query::<(&ActorId, &mut Attachments)>();
        for (id, mut attachments) in query.iter_mut(&mut self.world) {
            if *id == actor {
                for hook in attachments.hooks.iter_mut() {
                    if group != -1 && hook.group != group {
                        continue;
                    }
                    match hook.state {
                        HookState::Unlocked if hook.timer <= 0.0 => {
                            hook.state = HookState::Prelock;
                        }
                        HookState::Locked | HookState::Prelock => {
                            hook.state = HookState::Preunlock;
                        }
                        _ => {}
                    }
                }
                return Ok(());
            }
        }
        Err(ActorNotFound(actor.0))
    }

    /// Start reeling in the ties of a group (-1 for all).
    pub fn tie_toggle(&mut self, actor: ActorId, group: i32) -> Result<(), ActorNotFound> {
        self.attach_toggle(actor, group, true)
    }

    /// Lock or release ropes of a group (-1 for all).
    pub fn rope_toggle(&mut self, actor: ActorId, group: i32) -> Result<(), ActorNotFound> {
        self.attach_toggle(actor, group, false)
    }

    // ------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------

    /// Drain the buffered outbound events.
    pub fn drain_events(&mut self) -> Vec<SimEvent> {
        self.world
            .get_resource_mut::<EventQueue>()
            .map(|mut q| q.drain())
            .unwrap_or_default()
    }

    /// Shared snapshot channel for render/audio threads.
    pub fn snapshot_channel(&self) -> SnapshotChannel {
        self.channel.clone()
    }

    /// Capture a snapshot of the current state.
    pub fn snapshot(&mut self) -> Snapshot {
        Snapshot::from_world(&mut self.world, self.tick, self.time)
    }

    /// Recent-snapshot ring for the rewind feature.
    pub fn replay(&self) -> &ReplayRing {
        &self.replay
    }

    pub fn current_tick(&self) -> u64 {
        self.tick
    }

    pub fn current_time(&self) -> f64 {
        self.time
    }

    /// Direct world access for advanced hosts and tests.
    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    // ------------------------------------------------------------------
    // Frame driver
    // ------------------------------------------------------------------

    /// Advance the simulation by `dt` seconds of frame time and return the
    /// published snapshot. Whole sub-steps are consumed from an accumulator,
    /// so behaviour is identical across frame rates.
    pub fn step(&mut self, dt: f32) -> Snapshot {
        let config = *self.world.resource::<SimConfig>();
        let fixed_dt = config.substep_dt();
        self.accumulator += dt;

        let max_steps = (self.accumulator / fixed_dt) as u32;
        if let Some(mut flags) = self.world.get_resource_mut::<FrameFlags>() {
            flags.max_steps = max_steps;
        }

        let mut first = true;
        while self.accumulator >= fixed_dt {
            if let Some(mut flags) = self.world.get_resource_mut::<FrameFlags>() {
                flags.do_update = first;
            }
            self.sub_step(fixed_dt, &config);
            first = false;
            self.accumulator -= fixed_dt;
        }

        self.end_frame()
    }

    fn sub_step(&mut self, dt: f32, config: &SimConfig) {
        self.world.resource_mut::<DeltaTime>().0 = dt;
        self.world.resource_mut::<SimTick>().increment();

        #[cfg(feature = "profile")]
        self.profiler.begin("forces");
        self.force_schedule.run(&mut self.world);
        #[cfg(feature = "profile")]
        self.profiler.end();

        self.apply_inter_actor_beams();
        self.update_attachments(dt);

        #[cfg(feature = "profile")]
        self.profiler.begin("collision");
        self.collision_schedule.run(&mut self.world);
        self.resolve_dynamic_collisions(dt, config);
        #[cfg(feature = "profile")]
        self.profiler.end();

        #[cfg(feature = "profile")]
        self.profiler.begin("integrate");
        self.integrate_schedule.run(&mut self.world);
        #[cfg(feature = "profile")]
        self.profiler.end();

        self.update_sleep_and_network(dt, config);

        #[cfg(feature = "profile")]
        self.profiler.tick();

        self.tick += 1;
        self.time += dt as f64;
    }

    fn end_frame(&mut self) -> Snapshot {
        self.handle_reset_requests();
        self.process_deletions();
        let snapshot = Snapshot::from_world(&mut self.world, self.tick, self.time);
        self.channel.publish(snapshot.clone());
        self.replay.push(snapshot.clone());
        snapshot
    }

    // ------------------------------------------------------------------
    // Serial phases
    // ------------------------------------------------------------------

    /// Evaluate beams whose far end lives in another actor. These are hook,
    /// rope and tie beams: one-sided where flagged, never plastic, broken
    /// outright past their strength.
    fn apply_inter_actor_beams(&mut self) {
        self.world
            .resource_scope::<InterActorLinks, _>(|world, mut links| {
                if links.beams.is_empty() {
                    return;
                }
                let mut query =
                    world.query::<(&ActorId, &ActorState, &mut NodeStore, &mut BeamStore)>();
                let mut views: Vec<_> = query
                    .iter_mut(world)
                    .map(|(id, state, nodes, beams)| (id.0, state.is_simulated(), nodes, beams))
                    .collect();
                views.sort_by_key(|v| v.0);

                let pending = std::mem::take(&mut links.beams);
                let mut kept = Vec::with_capacity(pending.len());
                for link in pending {
                    let Ok(oi) = views.binary_search_by_key(&link.owner, |v| v.0) else {
                        continue; // owner gone
                    };
                    if link.kind == LinkKind::Rope {
                        // Coupling only; the rope mirror runs elsewhere.
                        if views.binary_search_by_key(&link.partner, |v| v.0).is_ok() {
                            kept.push(link);
                        }
                        continue;
                    }
                    let Ok(pi) = views.binary_search_by_key(&link.partner, |v| v.0) else {
                        // Partner deleted: tear the beam down.
                        if link.beam < views[oi].3.len() {
                            views[oi].3.get_mut(link.beam).disabled = true;
                            views[oi].3.get_mut(link.beam).p2_actor = None;
                        }
                        continue;
                    };
                    if oi == pi {
                        continue;
                    }
                    if !views[oi].1 && !views[pi].1 {
                        kept.push(link);
                        continue;
                    }

                    let (owner, partner) = two_views(&mut views, oi, pi);
                    let beam_idx = link.beam;
                    if beam_idx >= owner.3.len() || owner.3.get(beam_idx).disabled {
                        kept.push(link);
                        continue;
                    }

                    let (p1, p2) = (owner.3.get(beam_idx).p1, owner.3.get(beam_idx).p2);
                    if p2 >= partner.2.len() {
                        owner.3.get_mut(beam_idx).disabled = true;
                        continue;
                    }
                    let dis =
                        owner.2.read(p1).abs_position - partner.2.read(p2).abs_position;
                    let dislen_sq = dis.length_squared();
                    if dislen_sq < 1e-12 {
                        kept.push(link);
                        continue;
                    }
                    let inv_dislen = dislen_sq.sqrt().recip();
                    let dislen = dislen_sq * inv_dislen;

                    let beam = owner.3.get_mut(beam_idx);
                    let diff = dislen - beam.rest_len;
                    let mut k = beam.k;
                    let mut d = beam.d;
                    if beam.bound == BeamBound::Rope && diff < 0.0 {
                        k = 0.0;
                        d *= 0.1;
                    }
                    let v = owner.2.read(p1).velocity - partner.2.read(p2).velocity;
                    let slen = -k * diff - d * v.dot(dis) * inv_dislen;
                    beam.stress = slen;

                    if slen.abs() > beam.strength {
                        beam.broken = true;
                        beam.disabled = true;
                        continue;
                    }

                    let f = dis * (slen * inv_dislen);
                    owner.2.get_mut(p1).forces += f;
                    partner.2.get_mut(p2).forces -= f;
                    kept.push(link);
                }
                links.beams = kept;
            });
    }

    /// Hook, rope and tie bookkeeping: capture, winching, lock transitions.
    fn update_attachments(&mut self, dt: f32) {
        let do_update = self.world.resource::<FrameFlags>().do_update;
        let mut events: Vec<SimEvent> = Vec::new();

        self.world
            .resource_scope::<InterActorLinks, _>(|world, mut links| {
                let mut query = world.query::<(
                    &ActorId,
                    &ActorState,
                    &Origin,
                    &mut NodeStore,
                    &mut BeamStore,
                    &mut Attachments,
                )>();
                let mut views: Vec<_> = query
                    .iter_mut(world)
                    .map(|(id, state, origin, nodes, beams, attachments)| {
                        (id.0, state.is_simulated(), origin.0, nodes, beams, attachments)
                    })
                    .collect();
                views.sort_by_key(|v| v.0);

                for oi in 0..views.len() {
                    if !views[oi].1 {
                        continue;
                    }
                    let owner_id = views[oi].0;

                    for hi in 0..views[oi].5.hooks.len() {
                        // Countdown runs here to avoid speedup by triggers.
                        views[oi].5.hooks[hi].timer =
                            (views[oi].5.hooks[hi].timer - dt).max(0.0);

                        let auto = views[oi].5.hooks[hi].auto_lock;
                        if do_update
                            && auto
                            && views[oi].5.hooks[hi].state == HookState::Unlocked
                            && views[oi].5.hooks[hi].timer <= 0.0
                        {
                            views[oi].5.hooks[hi].state = HookState::Prelock;
                        }

                        match views[oi].5.hooks[hi].state {
                            HookState::Prelock => {
                                if views[oi].5.hooks[hi].locked_node.is_none() {
                                    if !capture_hook_target(&mut views, oi, hi, &mut links) {
                                        views[oi].5.hooks[hi].state = HookState::Unlocked;
                                    }
                                } else if winch_hook(&mut views, oi, hi, &mut links) {
                                    events.push(SimEvent::HookLocked {
                                        actor: owner_id,
                                        hook: hi,
                                    });
                                }
                            }
                            HookState::Preunlock => {
                                release_hook(&mut views, oi, hi, &mut links);
                            }
                            _ => {}
                        }
                    }

                    // Ropes pin their end node onto the locked target.
                    for ri in 0..views[oi].5.ropes.len() {
                        let Some((target_actor, target_node)) = views[oi].5.ropes[ri].locked_to
                        else {
                            continue;
                        };
                        let Ok(pi) = views.binary_search_by_key(&target_actor, |v| v.0) else {
                            views[oi].5.ropes[ri].locked_to = None;
                            continue;
                        };
                        if pi == oi {
                            continue;
                        }
                        let beam_idx = views[oi].5.ropes[ri].beam;
                        let end_node = views[oi].4.get(beam_idx).p2;
                        let (owner, partner) = two_views(&mut views, oi, pi);
                        if target_node >= partner.3.len() {
                            owner.5.ropes[ri].locked_to = None;
                            continue;
                        }
                        let target = partner.3.read(target_node).clone();
                        let origin = owner.2;
                        let end = owner.3.get_mut(end_node);
                        end.abs_position = target.abs_position;
                        end.rel_position = target.abs_position - origin;
                        end.velocity = target.velocity;
                        let transferred = end.forces;
                        end.forces = Vec3::ZERO;
                        partner.3.get_mut(target_node).forces += transferred;
                    }
                }
            });

        if let Some(mut queue) = self.world.get_resource_mut::<EventQueue>() {
            for event in events {
                queue.push(event);
            }
        }
    }

    /// Rebuild the contacter point grid and resolve triangle-point contacts,
    /// actor-id ascending.
    fn resolve_dynamic_collisions(&mut self, dt: f32, config: &SimConfig) {
        // Resolve each actor's submesh ground model up front; the mutable
        // collision pass cannot touch the registry.
        let mut gm_names: Vec<(u32, Option<String>)> = Vec::new();
        {
            let mut query = self.world.query::<(&ActorId, &Cabs)>();
            for (id, cabs) in query.iter(&self.world) {
                gm_names.push((id.0, cabs.submesh_ground_model.clone()));
            }
        }
        let registry = self.world.resource::<GroundModelRegistry>();
        let default_gm = registry.default_model().clone();
        let gm_by_actor: HashMap<u32, GroundModel> = gm_names
            .into_iter()
            .map(|(id, name)| {
                let gm = name
                    .as_deref()
                    .map(|n| registry.lookup_or_default(n).clone())
                    .unwrap_or_else(|| default_gm.clone());
                (id, gm)
            })
            .collect();

        self.world
            .resource_scope::<PointColDetector, _>(|world, mut detector| {
                // Gather the contacter point pool, actor-id ascending, plus
                // the data for the fast-approach rate reset.
                let mut sources: Vec<ActorPoints> = Vec::new();
                let mut kinematics: Vec<(u32, Vec3, Aabb)> = Vec::new();
                {
                    let mut query =
                        world.query::<(&ActorId, &ActorState, &NodeStore, &ActorBounds)>();
                    for (id, state, nodes, bounds) in query.iter(world) {
                        let participates = state.is_simulated()
                            || matches!(
                                state,
                                ActorState::Networked | ActorState::NetworkedInvalid
                            );
                        if !participates {
                            continue;
                        }
                        let root_velocity = nodes
                            .iter()
                            .next()
                            .map(|n| n.velocity)
                            .unwrap_or(Vec3::ZERO);
                        kinematics.push((id.0, root_velocity, bounds.predicted));
                        let points: Vec<_> = nodes
                            .iter()
                            .enumerate()
                            .filter(|(_, n)| n.contacter || n.contactable)
                            .map(|(i, n)| (i, n.abs_position))
                            .collect();
                        if !points.is_empty() {
                            sources.push(ActorPoints {
                                actor: id.0,
                                points,
                            });
                        }
                    }
                }
                sources.sort_by_key(|s| s.actor);
                detector.rebuild(sources);

                // Actors closing in on each other fast cannot afford stale
                // skip counters: drop their triangle backoff entirely.
                let mut hot: HashSet<u32> = HashSet::new();
                for i in 0..kinematics.len() {
                    for j in i + 1..kinematics.len() {
                        let (ia, va, ba) = &kinematics[i];
                        let (ib, vb, bb) = &kinematics[j];
                        if ba.intersects(bb) && (*va - *vb).length_squared() > 16.0 {
                            hot.insert(*ia);
                            hot.insert(*ib);
                        }
                    }
                }

                let mut query = world.query::<(
                    &ActorId,
                    &ActorState,
                    &mut NodeStore,
                    &mut Cabs,
                    &NodeConnections,
                )>();
                let mut dyn_actors: Vec<DynActor> = Vec::new();
                let mut items: Vec<_> = query.iter_mut(world).collect();
                items.sort_by_key(|(id, ..)| id.0);
                for (id, state, nodes, cabs, connections) in items {
                    let remote = matches!(
                        state,
                        ActorState::Networked | ActorState::NetworkedInvalid
                    );
                    if !state.is_simulated() && !remote {
                        continue;
                    }
                    let cabs = cabs.into_inner();
                    if hot.contains(&id.0) {
                        for rate in cabs.inter_rate.iter_mut().chain(cabs.intra_rate.iter_mut())
                        {
                            if rate.rate > 0 {
                                rate.rate = 0;
                            }
                        }
                    }
                    dyn_actors.push(DynActor {
                        id: id.0,
                        nodes: nodes.into_inner(),
                        cabs,
                        connections: &connections.0,
                        remote,
                    });
                }

                let mut hits = Vec::new();
                for oi in 0..dyn_actors.len() {
                    let gm = gm_by_actor
                        .get(&dyn_actors[oi].id)
                        .unwrap_or(&default_gm);
                    resolve_intra_collisions(
                        &mut dyn_actors[oi],
                        &detector,
                        config.collision_range,
                        dt,
                        gm,
                        &mut hits,
                    );
                }
                for oi in 0..dyn_actors.len() {
                    let gm = gm_by_actor
                        .get(&dyn_actors[oi].id)
                        .unwrap_or(&default_gm)
                        .clone();
                    resolve_inter_collisions(
                        &mut dyn_actors,
                        oi,
                        &detector,
                        config.collision_range,
                        dt,
                        &gm,
                        config.backface_weight,
                        &mut hits,
                    );
                }
            });
    }

    /// Sleep/wake bookkeeping plus the networked staleness timeout.
    fn update_sleep_and_network(&mut self, dt: f32, config: &SimConfig) {
        // Networked staleness.
        {
            let mut query = self.world.query::<(&mut ActorState, &mut NetTimer)>();
            for (mut state, mut net) in query.iter_mut(&mut self.world) {
                if *state == ActorState::Networked {
                    net.0 += dt;
                    if net.0 > config.network_timeout {
                        *state = ActorState::NetworkedInvalid;
                        warn!("networked actor went stale, freezing");
                    }
                }
            }
        }

        // Pass 1: timers, commit GoSleep, wake on motion or input.
        {
            let mut query = self.world.query::<(
                &mut ActorState,
                &mut SleepTimer,
                &NodeStore,
                &Controls,
                &CommandSet,
            )>();
            for (mut state, mut sleep, nodes, controls, commands) in
                query.iter_mut(&mut self.world)
            {
                if *state == ActorState::GoSleep {
                    *state = ActorState::Sleeping;
                }
                let velocity_sq = nodes
                    .iter()
                    .next()
                    .map(|n| n.velocity.length_squared())
                    .unwrap_or(0.0);
                let has_input = controls.throttle != 0.0
                    || controls.brake != 0.0
                    || controls.steer != 0.0
                    || commands.keys.iter().any(|k| k.player_input > 0.0);

                if has_input && (*state == ActorState::Sleeping || state.is_simulated()) {
                    *state = ActorState::Activated;
                    sleep.0 = 0.0;
                    continue;
                }
                if !state.is_simulated() {
                    continue;
                }
                if velocity_sq > config.sleep_velocity_sq {
                    sleep.0 = 0.0;
                    if !matches!(*state, ActorState::Activated | ActorState::Desactivated) {
                        *state = ActorState::Activated;
                    }
                } else {
                    sleep.0 += dt;
                }
            }
        }

        // Pass 2: group transitions over the coupling graph.
        let components = self.coupling_components();
        let mut timers: HashMap<u32, f32> = HashMap::new();
        let mut states: HashMap<u32, ActorState> = HashMap::new();
        let mut bounds_of: HashMap<u32, (Aabb, Vec<Aabb>)> = HashMap::new();
        {
            let mut query = self
                .world
                .query::<(&ActorId, &ActorState, &SleepTimer, &ActorBounds)>();
            for (id, state, sleep, bounds) in query.iter(&self.world) {
                timers.insert(id.0, sleep.0);
                states.insert(id.0, *state);
                bounds_of.insert(id.0, (bounds.predicted, bounds.smart_predicted.clone()));
            }
        }

        let mut target: HashMap<u32, ActorState> = HashMap::new();
        for group in &components {
            let group_timer = group
                .iter()
                .filter_map(|id| timers.get(id))
                .fold(f32::MAX, |a, &b| a.min(b));
            let any_activated = group
                .iter()
                .any(|id| states.get(id) == Some(&ActorState::Activated));

            for &id in group {
                let Some(&state) = states.get(&id) else { continue };
                if !state.is_simulated() && state != ActorState::Sleeping {
                    continue;
                }
                let next = if any_activated && state == ActorState::Sleeping {
                    // Coupled actors wake together.
                    ActorState::Activated
                } else if !state.is_simulated() {
                    continue;
                } else if group_timer >= config.sleep_grace {
                    ActorState::GoSleep
                } else if group_timer >= config.sleep_grace * 0.5 {
                    ActorState::MaySleep
                } else if any_activated && state != ActorState::Activated {
                    // Linked to a live actor: simulate along with it.
                    ActorState::Activated
                } else {
                    state
                };
                target.insert(id, next);
            }
        }

        // Snowball: activated actors wake sleepers they are about to touch.
        let mut woken: Vec<u32> = Vec::new();
        let mut frontier: VecDeque<u32> = states
            .iter()
            .filter(|(_, s)| **s == ActorState::Activated)
            .map(|(id, _)| *id)
            .collect();
        let mut visited: HashSet<u32> = frontier.iter().copied().collect();
        while let Some(a) = frontier.pop_front() {
            let Some(abounds) = bounds_of.get(&a) else { continue };
            for (&b, bstate) in &states {
                if visited.contains(&b) {
                    continue;
                }
                let is_asleep = matches!(
                    bstate,
                    ActorState::Sleeping | ActorState::MaySleep | ActorState::GoSleep
                );
                if !is_asleep {
                    continue;
                }
                if let Some(bbounds) = bounds_of.get(&b) {
                    if predicted_intersect(abounds, bbounds, 1.2) {
                        woken.push(b);
                        visited.insert(b);
                        frontier.push_back(b);
                    }
                }
            }
        }
        for id in woken {
            // Near an activated actor but not lead. A coupled wake already
            // promoted to Activated wins.
            target
                .entry(id)
                .and_modify(|s| {
                    if *s != ActorState::Activated {
                        *s = ActorState::Desactivated;
                    }
                })
                .or_insert(ActorState::Desactivated);
        }

        {
            let mut query = self
                .world
                .query::<(&ActorId, &mut ActorState, &mut SleepTimer)>();
            for (id, mut state, mut sleep) in query.iter_mut(&mut self.world) {
                if let Some(&next) = target.get(&id.0) {
                    if next != *state {
                        *state = next;
                        if matches!(next, ActorState::Activated | ActorState::Desactivated) {
                            sleep.0 = 0.0;
                        }
                    }
                }
            }
        }
    }

    /// Connected components of the inter-actor coupling graph.
    fn coupling_components(&mut self) -> Vec<Vec<u32>> {
        let mut adjacency: HashMap<u32, Vec<u32>> = HashMap::new();
        {
            let links = self.world.resource::<InterActorLinks>();
            for link in &links.beams {
                adjacency.entry(link.owner).or_default().push(link.partner);
                adjacency.entry(link.partner).or_default().push(link.owner);
            }
        }
        let mut ids: Vec<u32> = Vec::new();
        {
            let mut query = self.world.query::<&ActorId>();
            for id in query.iter(&self.world) {
                ids.push(id.0);
            }
        }
        ids.sort_unstable();

        let mut seen: HashSet<u32> = HashSet::new();
        let mut components = Vec::new();
        for id in ids {
            if seen.contains(&id) {
                continue;
            }
            let mut component = Vec::new();
            let mut frontier = VecDeque::from([id]);
            seen.insert(id);
            while let Some(a) = frontier.pop_front() {
                component.push(a);
                if let Some(neigh) = adjacency.get(&a) {
                    for &b in neigh {
                        if seen.insert(b) {
                            frontier.push_back(b);
                        }
                    }
                }
            }
            component.sort_unstable();
            components.push(component);
        }
        components
    }

    fn handle_reset_requests(&mut self) {
        let mut events = Vec::new();
        {
            let mut query = self.world.query::<(
                &ActorId,
                &ActorStatics,
                &mut ActorBounds,
                &mut NodeStore,
                &mut Origin,
            )>();
            for (id, statics, mut bounds, mut nodes, mut origin) in
                query.iter_mut(&mut self.world)
            {
                if !bounds.reset_requested {
                    continue;
                }
                debug!(actor = id.0, "position range guard tripped, resetting");
                origin.0 = statics.spawn_position;
                for i in 0..nodes.len() {
                    let node = nodes.get_mut(i);
                    node.velocity = Vec3::ZERO;
                    node.forces = Vec3::ZERO;
                    node.abs_position = origin.0 + node.rel_position;
                }
                bounds.reset_requested = false;
                events.push(SimEvent::ActorReset { actor: id.0 });
            }
        }
        if let Some(mut queue) = self.world.get_resource_mut::<EventQueue>() {
            for event in events {
                queue.push(event);
            }
        }
    }

    fn process_deletions(&mut self) {
        let doomed: Vec<(Entity, u32)> = {
            let mut query = self.world.query::<(Entity, &ActorId, &ActorState)>();
            query
                .iter(&self.world)
                .filter(|(_, _, state)| {
                    matches!(state, ActorState::Deleted | ActorState::Recycle)
                })
                .map(|(entity, id, _)| (entity, id.0))
                .collect()
        };
        if doomed.is_empty() {
            return;
        }
        for &(_, id) in &doomed {
            let dropped = self
                .world
                .resource_mut::<InterActorLinks>()
                .purge_actor(id);
            // Disable surviving owners' beams that pointed at the deleted
            // actor. Rope mirrors self-heal when the partner disappears.
            for link in dropped {
                if link.owner == id || link.kind != LinkKind::Beam {
                    continue;
                }
                let mut query = self.world.query::<(&ActorId, &mut BeamStore)>();
                for (owner_id, mut beams) in query.iter_mut(&mut self.world) {
                    if owner_id.0 == link.owner && link.beam < beams.len() {
                        beams.get_mut(link.beam).disabled = true;
                        beams.get_mut(link.beam).p2_actor = None;
                    }
                }
            }
        }
        for (entity, _) in doomed {
            self.world.despawn(entity);
        }
    }

    fn refresh_grid_cell_size(&mut self) {
        let mut sum = 0.0;
        let mut count = 0;
        {
            let mut query = self.world.query::<&ActorStatics>();
            for statics in query.iter(&self.world) {
                if statics.mean_coll_edge > 0.0 {
                    sum += statics.mean_coll_edge;
                    count += 1;
                }
            }
        }
        let cell = if count > 0 { sum / count as f32 } else { 0.5 };
        self.world
            .resource_mut::<PointColDetector>()
            .set_cell_size(cell);
    }

    fn with_actor_state(
        &mut self,
        actor: ActorId,
        f: impl FnOnce(&mut ActorState, &mut NetTimer),
    ) -> Result<(), ActorNotFound> {
        let mut query = self
            .world
            .query::<(&ActorId, &mut ActorState, &mut NetTimer)>();
        for (id, mut state, mut net) in query.iter_mut(&mut self.world) {
            if *id == actor {
                f(&mut state, &mut net);
                return Ok(());
            }
        }
        Err(ActorNotFound(actor.0))
    }

    /// Shared rope/tie toggle: find a capture target on another actor and
    /// couple the attachment beam to it.
    fn attach_toggle(
        &mut self,
        actor: ActorId,
        group: i32,
        is_tie: bool,
    ) -> Result<(), ActorNotFound> {
        const CAPTURE_RANGE: f32 = 3.0;
        let mut found_actor = false;

        self.world
            .resource_scope::<InterActorLinks, _>(|world, mut links| {
                let mut query = world.query::<(
                    &ActorId,
                    &ActorState,
                    &Origin,
                    &mut NodeStore,
                    &mut BeamStore,
                    &mut Attachments,
                )>();
                let mut views: Vec<_> = query
                    .iter_mut(world)
                    .map(|(id, state, origin, nodes, beams, attachments)| {
                        (id.0, state.is_simulated(), origin.0, nodes, beams, attachments)
                    })
                    .collect();
                views.sort_by_key(|v| v.0);
                let Ok(oi) = views.binary_search_by_key(&actor.0, |v| v.0) else {
                    return;
                };
                found_actor = true;

                let count = if is_tie {
                    views[oi].5.ties.len()
                } else {
                    views[oi].5.ropes.len()
                };
                for ai in 0..count {
                    let (agroup, beam_idx, attached) = if is_tie {
                        let t = &views[oi].5.ties[ai];
                        (t.group, t.beam, t.locked_to.is_some() || t.tying)
                    } else {
                        let r = &views[oi].5.ropes[ai];
                        (r.group, r.beam, r.locked_to.is_some())
                    };
                    if group != -1 && agroup != group {
                        continue;
                    }

                    if attached {
                        // Toggle off: release.
                        let beam = views[oi].4.get_mut(beam_idx);
                        beam.p2_actor = None;
                        if is_tie {
                            beam.disabled = true;
                            views[oi].5.ties[ai].tying = false;
                            views[oi].5.ties[ai].locked_to = None;
                        } else {
                            views[oi].5.ropes[ai].locked_to = None;
                        }
                        links
                            .beams
                            .retain(|l| !(l.owner == actor.0 && l.beam == beam_idx));
                        continue;
                    }

                    // Capture: nearest node of any other actor in range.
                    let root = views[oi].4.get(beam_idx).p1;
                    let root_pos = views[oi].3.read(root).abs_position;
                    let mut best: Option<(u32, usize, f32)> = None;
                    for pj in 0..views.len() {
                        if pj == oi {
                            continue;
                        }
                        for ni in 0..views[pj].3.len() {
                            let dist = views[pj].3.read(ni).abs_position.distance(root_pos);
                            if dist < CAPTURE_RANGE
                                && best.map(|(_, _, d)| dist < d).unwrap_or(true)
                            {
                                best = Some((views[pj].0, ni, dist));
                            }
                        }
                    }
                    let Some((partner, node, dist)) = best else {
                        continue;
                    };

                    if is_tie {
                        // The tie beam re-targets its far end into the
                        // partner's store and reels in from there.
                        let beam = views[oi].4.get_mut(beam_idx);
                        beam.p2 = node;
                        beam.p2_actor = Some(partner);
                        beam.disabled = false;
                        beam.broken = false;
                        beam.rest_len = dist.max(0.001);
                        views[oi].5.ties[ai].tying = true;
                        views[oi].5.ties[ai].locked_to = Some((partner, node));
                        links.beams.push(InterBeamRef {
                            owner: actor.0,
                            beam: beam_idx,
                            partner,
                            kind: LinkKind::Beam,
                        });
                    } else {
                        // The rope keeps its own end node; the serial phase
                        // mirrors it onto the captured node every sub-step.
                        views[oi].5.ropes[ai].locked_to = Some((partner, node));
                        links.beams.push(InterBeamRef {
                            owner: actor.0,
                            beam: beam_idx,
                            partner,
                            kind: LinkKind::Rope,
                        });
                    }
                }
            });

        if found_actor {
            Ok(())
        } else {
            Err(ActorNotFound(actor.0))
        }
    }
}

// ---------------------------------------------------------------------------
// Hook helpers (serial phase)
// ---------------------------------------------------------------------------

type AttachmentView<'a> = (
    u32,
    bool,
    Vec3,
    Mut<'a, NodeStore>,
    Mut<'a, BeamStore>,
    Mut<'a, Attachments>,
);

/// Overlap test between two actors' predicted boxes, preferring the smart
/// per-cohort boxes when both sides have them.
fn predicted_intersect(a: &(Aabb, Vec<Aabb>), b: &(Aabb, Vec<Aabb>), scale: f32) -> bool {
    let (a_full, a_smart) = a;
    let (b_full, b_smart) = b;
    match (a_smart.is_empty(), b_smart.is_empty()) {
        (true, true) => a_full.scaled(scale).intersects(b_full),
        (false, true) => a_smart
            .iter()
            .any(|sa| sa.scaled(scale).intersects(b_full)),
        (true, false) => b_smart
            .iter()
            .any(|sb| a_full.scaled(scale).intersects(sb)),
        (false, false) => a_smart.iter().any(|sa| {
            let sa = sa.scaled(scale);
            b_smart.iter().any(|sb| sa.intersects(sb))
        }),
    }
}

fn two_views<'b, T>(views: &'b mut Vec<T>, i: usize, j: usize) -> (&'b mut T, &'b mut T) {
    debug_assert!(i != j);
    if i < j {
        let (head, tail) = views.split_at_mut(j);
        (&mut head[i], &mut tail[0])
    } else {
        let (head, tail) = views.split_at_mut(i);
        (&mut tail[0], &mut head[j])
    }
}

/// Search for a lockable node within the hook's range. Returns false when
/// nothing was captured.
fn capture_hook_target(
    views: &mut Vec<AttachmentView<'_>>,
    oi: usize,
    hi: usize,
    links: &mut InterActorLinks,
) -> bool {
    let owner_id = views[oi].0;
    let hook_node = views[oi].5.hooks[hi].node;
    let hook_pos = views[oi].3.read(hook_node).abs_position;
    let lock_range = views[oi].5.hooks[hi].lock_range;
    let lockgroup = views[oi].5.hooks[hi].lockgroup;
    let self_lock = views[oi].5.hooks[hi].self_lock;
    let beam_idx = views[oi].5.hooks[hi].beam;

    let mut best: Option<(usize, usize, f32)> = None;
    for pj in 0..views.len() {
        if pj == oi && !self_lock {
            continue;
        }
        for ni in 0..views[pj].3.len() {
            if pj == oi && (ni == hook_node || ni == views[oi].4.get(beam_idx).p2) {
                continue;
            }
            let node = views[pj].3.read(ni);
            if lockgroup != -1 && node.lockgroup != lockgroup {
                continue;
            }
            let dist = node.abs_position.distance(hook_pos);
            if dist < lock_range && best.map(|(_, _, d)| dist < d).unwrap_or(true) {
                best = Some((pj, ni, dist));
            }
        }
    }
    let Some((pj, ni, dist)) = best else {
        return false;
    };
    let partner_id = views[pj].0;

    {
        let beam = views[oi].4.get_mut(beam_idx);
        beam.p2 = ni;
        beam.p2_actor = if pj == oi { None } else { Some(partner_id) };
        beam.rest_len = dist.max(0.001);
        beam.disabled = false;
        beam.broken = false;
    }
    views[oi].5.hooks[hi].locked_node = Some((partner_id, ni));
    views[oi].3.get_mut(hook_node).lock_state = LockState::Prelock;
    views[pj].3.get_mut(ni).lock_state = LockState::Prelock;
    if pj != oi {
        links.beams.push(InterBeamRef {
            owner: owner_id,
            beam: beam_idx,
            partner: partner_id,
            kind: LinkKind::Beam,
        });
    }
    true
}

/// Shorten the hook beam towards full lock. Returns true on the sub-step
/// the hook reaches the locked state.
fn winch_hook(
    views: &mut Vec<AttachmentView<'_>>,
    oi: usize,
    hi: usize,
    links: &mut InterActorLinks,
) -> bool {
    let beam_idx = views[oi].5.hooks[hi].beam;
    let lock_speed = views[oi].5.hooks[hi].lock_speed;
    let max_force = views[oi].5.hooks[hi].max_force;
    let no_disable = views[oi].5.hooks[hi].no_disable;

    let (stress, rest_len) = {
        let beam = views[oi].4.get(beam_idx);
        (beam.stress.abs(), beam.rest_len)
    };

    if stress < max_force {
        if rest_len > lock_speed {
            views[oi].4.get_mut(beam_idx).rest_len = rest_len - lock_speed;
            if views[oi].4.get(beam_idx).rest_len < views[oi].4.get(beam_idx).command_short {
                finish_lock(views, oi, hi);
                return true;
            }
            false
        } else {
            views[oi].4.get_mut(beam_idx).rest_len = 0.001;
            finish_lock(views, oi, hi);
            true
        }
    } else if no_disable {
        finish_lock(views, oi, hi);
        true
    } else {
        release_hook(views, oi, hi, links);
        false
    }
}

fn finish_lock(views: &mut Vec<AttachmentView<'_>>, oi: usize, hi: usize) {
    views[oi].5.hooks[hi].state = HookState::Locked;
    let hook_node = views[oi].5.hooks[hi].node;
    views[oi].3.get_mut(hook_node).lock_state = LockState::Locked;
    if let Some((partner, ni)) = views[oi].5.hooks[hi].locked_node {
        if let Ok(pj) = views.binary_search_by_key(&partner, |v| v.0) {
            if ni < views[pj].3.len() {
                views[pj].3.get_mut(ni).lock_state = LockState::Locked;
            }
        }
    }
}

fn release_hook(
    views: &mut Vec<AttachmentView<'_>>,
    oi: usize,
    hi: usize,
    links: &mut InterActorLinks,
) {
    let owner_id = views[oi].0;
    let beam_idx = views[oi].5.hooks[hi].beam;
    let hook_node = views[oi].5.hooks[hi].node;

    if let Some((partner, ni)) = views[oi].5.hooks[hi].locked_node.take() {
        if let Ok(pj) = views.binary_search_by_key(&partner, |v| v.0) {
            if ni < views[pj].3.len() {
                views[pj].3.get_mut(ni).lock_state = LockState::Unlocked;
            }
        }
    }
    {
        let beam = views[oi].4.get_mut(beam_idx);
        beam.disabled = true;
        beam.p2_actor = None;
        beam.p2 = 0;
    }
    views[oi].3.get_mut(hook_node).lock_state = LockState::Unlocked;
    views[oi].5.hooks[hi].state = HookState::Unlocked;
    views[oi].5.hooks[hi].timer = views[oi].5.hooks[hi].timer_preset;
    links
        .beams
        .retain(|l| !(l.owner == owner_id && l.beam == beam_idx));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::def::{BeamDef, NodeDef, NodeRef};
    use crate::terrain::FlatTerrain;

    fn flat_sim() -> Simulation {
        let registry = GroundModelRegistry::new().finish();
        Simulation::new(registry, Arc::new(FlatTerrain::new(-100.0)))
    }

    fn simple_def() -> ActorDef {
        let mut def = ActorDef {
            name: "pair".to_string(),
            ..ActorDef::default()
        };
        def.globals.dry_mass = 100.0;
        def.globals.minimum_mass = 1.0;
        def.nodes = vec![
            NodeDef {
                id: 0,
                x: 0.0,
                y: 0.0,
                z: 0.0,
                fixed: false,
                mass: None,
                load_bearing: false,
                contacter: false,
                no_ground_contact: false,
                buoyancy: None,
                lockgroup: -1,
                coll_cohort: None,
            },
            NodeDef {
                id: 1,
                x: 1.0,
                y: 0.0,
                z: 0.0,
                fixed: false,
                mass: None,
                load_bearing: false,
                contacter: false,
                no_ground_contact: false,
                buoyancy: None,
                lockgroup: -1,
                coll_cohort: None,
            },
        ];
        def.beams = vec![BeamDef {
            node1: NodeRef::Id(0),
            node2: NodeRef::Id(1),
            spring: Some(10_000.0),
            damp: Some(100.0),
            strength: None,
            deform: None,
            support: false,
            support_break_limit: None,
            rope: false,
            invisible: false,
            detacher_group: 0,
        }];
        def
    }

    #[test]
    fn test_spawn_and_step() {
        let mut sim = flat_sim();
        let (id, report) = sim.spawn_actor(&simple_def(), Vec3::new(0.0, 10.0, 0.0)).unwrap();
        assert!(report.messages.is_empty());
        assert_eq!(sim.actor_count(), 1);

        let snapshot = sim.step(1.0 / 60.0);
        assert!(sim.current_tick() > 0);
        assert_eq!(snapshot.actors.len(), 1);
        assert_eq!(snapshot.actors[0].id, id.0);
        // Gravity pulled the nodes down.
        assert!(snapshot.actors[0].node_positions[0][1] < 10.0);
    }

    #[test]
    fn test_fixed_timestep_accumulation() {
        let mut sim = flat_sim();
        sim.spawn_actor(&simple_def(), Vec3::ZERO).unwrap();
        // ~20 sub-steps at 2 kHz; one may be carried by float rounding.
        sim.step(0.01);
        let first = sim.current_tick();
        assert!((19..=20).contains(&first), "got {} sub-steps", first);
        // A frame shorter than a sub-step runs nothing by itself...
        sim.step(0.0001);
        assert!(sim.current_tick() <= first + 1);
        // ...but the remainder carries over instead of being dropped.
        sim.step(0.0003);
        sim.step(0.0003);
        assert!(sim.current_tick() > first);
    }

    #[test]
    fn test_deferred_removal() {
        let mut sim = flat_sim();
        let (id, _) = sim.spawn_actor(&simple_def(), Vec3::ZERO).unwrap();
        sim.schedule_removal(id).unwrap();
        // Still present until the frame boundary runs.
        assert_eq!(sim.actor_count(), 1);
        sim.step(1.0 / 60.0);
        assert_eq!(sim.actor_count(), 0);
    }

    #[test]
    fn test_unknown_actor_errors() {
        let mut sim = flat_sim();
        assert!(sim.schedule_removal(ActorId(42)).is_err());
        assert!(sim.command_input(ActorId(42), 1, 1.0).is_err());
    }

    #[test]
    fn test_actor_falls_asleep_and_wakes() {
        let registry = GroundModelRegistry::new().finish();
        let config = SimConfig {
            sleep_grace: 0.02,
            ..SimConfig::default()
        };
        let mut sim =
            Simulation::with_config(config, registry, Arc::new(FlatTerrain::new(-100.0)));
        let mut def = simple_def();
        // Pin both nodes so gravity cannot move them.
        def.nodes[0].fixed = true;
        def.nodes[1].fixed = true;
        let (id, _) = sim.spawn_actor(&def, Vec3::ZERO).unwrap();

        for _ in 0..20 {
            sim.step(0.01);
        }
        assert_eq!(sim.actor_state(id), Some(ActorState::Sleeping));

        sim.wake_actor(id).unwrap();
        assert_eq!(sim.actor_state(id), Some(ActorState::Activated));
    }

    #[test]
    fn test_networked_actor_times_out() {
        let mut sim = flat_sim();
        let (id, _) = sim.spawn_actor(&simple_def(), Vec3::ZERO).unwrap();
        sim.set_networked(id).unwrap();
        for _ in 0..150 {
            sim.step(1.0 / 60.0);
        }
        assert_eq!(sim.actor_state(id), Some(ActorState::NetworkedInvalid));

        // An authoritative update revives it.
        sim.ingest_network_state(id, &[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0]], &[])
            .unwrap();
        assert_eq!(sim.actor_state(id), Some(ActorState::Networked));
    }

    #[test]
    fn test_events_drain() {
        let mut sim = flat_sim();
        sim.spawn_actor(&simple_def(), Vec3::ZERO).unwrap();
        sim.step(1.0 / 60.0);
        let _ = sim.drain_events();
        assert!(sim.drain_events().is_empty());
    }

    #[test]
    fn test_replay_ring_fills() {
        let mut sim = flat_sim();
        sim.spawn_actor(&simple_def(), Vec3::ZERO).unwrap();
        for _ in 0..5 {
            sim.step(1.0 / 60.0);
        }
        assert_eq!(sim.replay().len(), 5);
        assert!(sim.replay().rewind(4).is_some());
    }
}
