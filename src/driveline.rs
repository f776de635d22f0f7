//! Engine, gearbox and differentials.
//!
//! The engine is a torque-curve RPM integrator coupled to the wheels through
//! a clutch; the auto gearbox is a small state machine over smoothed RPM,
//! throttle and brake. Differentials couple wheel pairs (and axle pairs)
//! with selectable transfer models.

use bevy_ecs::prelude::*;
use serde::{Deserialize, Serialize};

use crate::events::SimEvent;

pub const RAD_PER_SEC_TO_RPM: f32 = 9.549_296_6;

// ---------------------------------------------------------------------------
// Differentials
// ---------------------------------------------------------------------------

/// Torque transfer model of a differential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DiffKind {
    /// Fixed 50/50 split regardless of wheel speeds.
    Split,
    /// Power follows the normalized wheel speeds (clamped 0.1..0.9).
    Open,
    /// Viscous coupling damps the speed difference.
    Viscous,
    /// Torsion spring holds both sides at the locked relative rotation.
    #[default]
    Locked,
}

/// Inputs and outputs of one differential evaluation.
#[derive(Debug, Clone, Copy)]
pub struct DifferentialData {
    pub speed: [f32; 2],
    pub delta_rotation: f32,
    pub out_torque: [f32; 2],
    pub in_torque: f32,
    pub dt: f32,
}

/// A differential with a rotating list of selectable models; the first
/// entry is active.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Differential {
    pub kinds: Vec<DiffKind>,
    pub delta_rotation: f32,
}

impl Default for Differential {
    fn default() -> Self {
        Self {
            kinds: vec![DiffKind::Locked],
            delta_rotation: 0.0,
        }
    }
}

impl Differential {
    pub fn new(kinds: Vec<DiffKind>) -> Self {
        Self {
            kinds,
            delta_rotation: 0.0,
        }
    }

    pub fn active(&self) -> DiffKind {
        self.kinds.first().copied().unwrap_or_default()
    }

    /// Cycle to the next available model.
    pub fn toggle(&mut self) {
        if self.kinds.len() > 1 {
            self.kinds.rotate_left(1);
        }
    }

    pub fn calc_torque(&mut self, data: &mut DifferentialData) {
        data.delta_rotation = self.delta_rotation;
        match self.active() {
            DiffKind::Split => Self::calc_split(data),
            DiffKind::Open => Self::calc_open(data),
            DiffKind::Viscous => Self::calc_viscous(data),
            DiffKind::Locked => Self::calc_locked(data),
        }
        self.delta_rotation = data.delta_rotation;
    }

    pub fn calc_split(data: &mut DifferentialData) {
        data.out_torque[0] = data.in_torque / 2.0;
        data.out_torque[1] = data.in_torque / 2.0;
    }

    pub fn calc_open(data: &mut DifferentialData) {
        // Power ratio follows the normalized wheel speeds; an even split at
        // standstill.
        let sum_of_vel = data.speed[0].abs() + data.speed[1].abs();
        let min_of_vel = data.speed[0].abs().min(data.speed[1].abs());
        let power_ratio = if min_of_vel > 1.0 {
            data.speed[0].abs() / sum_of_vel
        } else {
            0.5
        };
        data.out_torque[0] = data.in_torque * power_ratio.clamp(0.1, 0.9);
        data.out_torque[1] = data.in_torque * (1.0 - power_ratio).clamp(0.1, 0.9);
    }

    pub fn calc_viscous(data: &mut DifferentialData) {
        const TORSION_DAMP: f32 = 10_000.0;
        let delta_speed = data.speed[0] - data.speed[1];
        data.out_torque[0] = data.in_torque / 2.0 - delta_speed * TORSION_DAMP;
        data.out_torque[1] = data.in_torque / 2.0 + delta_speed * TORSION_DAMP;
    }

    pub fn calc_locked(data: &mut DifferentialData) {
        // Torsion spring between the two sides, wound up by the integrated
        // speed difference.
        const TORSION_RATE: f32 = 1_000_000.0;
        const TORSION_DAMP: f32 = TORSION_RATE / 100.0;
        let delta_speed = data.speed[0] - data.speed[1];
        data.delta_rotation += delta_speed * data.dt;
        data.out_torque[0] =
            data.in_torque / 2.0 - data.delta_rotation * TORSION_RATE - delta_speed * TORSION_DAMP;
        data.out_torque[1] =
            data.in_torque / 2.0 + data.delta_rotation * TORSION_RATE + delta_speed * TORSION_DAMP;
    }
}

/// An axle couples two wheels through a differential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Axle {
    pub wheel_1: usize,
    pub wheel_2: usize,
    pub diff: Differential,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Gearbox shift mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ShiftMode {
    #[default]
    Automatic,
    Semi,
    Manual,
}

/// Automatic selector position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AutoSelect {
    Rear,
    Neutral,
    #[default]
    Drive,
    Two,
    One,
}

/// Torque-curve combustion engine with clutch and gearbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Engine {
    // Static parameters.
    pub min_rpm: f32,
    pub max_rpm: f32,
    pub idle_rpm: f32,
    pub stall_rpm: f32,
    pub inertia: f32,
    pub clutch_force: f32,
    pub clutch_time: f32,
    pub shift_time: f32,
    pub post_shift_time: f32,
    pub braking_torque: f32,
    /// (rpm, torque) samples, ascending rpm; linearly interpolated.
    pub torque_curve: Vec<(f32, f32)>,
    /// `ratios[0]` = reverse, `[1]` = neutral, `[2..]` = forward gears,
    /// all premultiplied by the differential ratio.
    pub gear_ratios: Vec<f32>,

    // Live state.
    pub rpm: f32,
    pub throttle: f32,
    pub clutch: f32,
    pub clutch_torque: f32,
    /// Current gear: -1 reverse, 0 neutral, 1..N forward.
    pub gear: i32,
    pub mode: ShiftMode,
    pub autoselect: AutoSelect,
    pub running: bool,
    /// Ignition contact.
    pub contact: bool,
    pub starter: bool,
    pub hydropump_load: f32,
    pub prime: bool,
    pub wheel_revolutions: f32,

    // Shift machinery.
    pub(crate) shifting: bool,
    pub(crate) shift_val: i32,
    pub(crate) shift_clock: f32,
    pub(crate) post_shifting: bool,
    pub(crate) post_shift_clock: f32,
    pub(crate) auto_throttle: f32,
    // Smoothed observations for the auto FSM.
    pub(crate) avg_rpm: f32,
    pub(crate) avg_throttle: f32,
}

impl Default for Engine {
    fn default() -> Self {
        Self {
            min_rpm: 800.0,
            max_rpm: 4500.0,
            idle_rpm: 800.0,
            stall_rpm: 300.0,
            inertia: 10.0,
            clutch_force: 10_000.0,
            clutch_time: 0.2,
            shift_time: 0.5,
            post_shift_time: 0.2,
            braking_torque: -500.0,
            torque_curve: vec![(0.0, 400.0), (4500.0, 400.0)],
            gear_ratios: vec![-2.8, 0.0, 2.8, 1.8, 1.3, 1.0, 0.8],
            rpm: 0.0,
            throttle: 0.0,
            clutch: 0.0,
            clutch_torque: 0.0,
            gear: 0,
            mode: ShiftMode::Automatic,
            autoselect: AutoSelect::Neutral,
            running: false,
            contact: false,
            starter: false,
            hydropump_load: 0.0,
            prime: false,
            wheel_revolutions: 0.0,
            shifting: false,
            shift_val: 0,
            shift_clock: 0.0,
            post_shifting: false,
            post_shift_clock: 0.0,
            auto_throttle: 0.0,
            avg_rpm: 0.0,
            avg_throttle: 0.0,
        }
    }
}

impl Engine {
    /// Ratio of the current gear.
    #[inline]
    fn current_ratio(&self) -> f32 {
        let idx = (self.gear + 1) as usize;
        self.gear_ratios.get(idx).copied().unwrap_or(0.0)
    }

    pub fn num_forward_gears(&self) -> usize {
        self.gear_ratios.len().saturating_sub(2)
    }

    /// Torque curve sample at an RPM, linearly interpolated.
    pub fn engine_power(&self, rpm: f32) -> f32 {
        if self.torque_curve.is_empty() {
            return 0.0;
        }
        let first = self.torque_curve[0];
        if rpm <= first.0 {
            return first.1;
        }
        for pair in self.torque_curve.windows(2) {
            let (r0, t0) = pair[0];
            let (r1, t1) = pair[1];
            if rpm <= r1 {
                let t = if r1 > r0 { (rpm - r0) / (r1 - r0) } else { 0.0 };
                return t0 + (t1 - t0) * t;
            }
        }
        self.torque_curve.last().map(|&(_, t)| t).unwrap_or(0.0)
    }

    /// Crank factor in [0, 2]: how fast engine-coupled commands move.
    pub fn crank_factor(&self) -> f32 {
        if !self.running {
            return 0.0;
        }
        let span = (self.max_rpm - self.min_rpm).max(1.0);
        (0.5 + 1.5 * ((self.rpm - self.min_rpm) / span).clamp(0.0, 1.0)).clamp(0.0, 2.0)
    }

    /// Engine is turning fast enough to power hydraulics.
    pub fn can_work(&self) -> bool {
        self.rpm > self.idle_rpm * 0.95
    }

    /// Delivered torque towards the wheels: the clutch transfer multiplied
    /// through the gearbox.
    pub fn torque_out(&self) -> f32 {
        if self.gear == 0 {
            0.0
        } else {
            self.clutch_torque * self.current_ratio()
        }
    }

    pub fn start(&mut self) {
        self.contact = true;
        self.running = true;
        self.rpm = self.idle_rpm.max(self.rpm);
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    /// Toggle helper for trigger beams.
    pub fn trigger_toggle(&mut self) {
        if self.running {
            self.stop();
        } else {
            self.start();
        }
    }

    pub fn shift(&mut self, delta: i32) {
        if delta != 0 && !self.shifting {
            self.shift_val = delta;
            self.shifting = true;
            self.shift_clock = 0.0;
        }
    }

    pub fn shift_to(&mut self, gear: i32) {
        self.shift(gear - self.gear);
    }

    /// Advance the engine by one sub-step.
    ///
    /// `wheel_spin_rpm` is the averaged propelled-wheel rotation expressed
    /// in engine RPM terms (before gearing). Emits shift/stall/start events
    /// into `events`.
    pub fn update(
        &mut self,
        dt: f32,
        brake_input: f32,
        events: &mut Vec<SimEvent>,
        actor: u32,
    ) -> f32 {
        let mut acc = self.throttle;
        if self.prime {
            acc = acc.max(0.5);
        }
        // Idle mixture keeps a running engine above idle.
        if self.running && self.rpm < self.idle_rpm {
            acc = acc.max(((self.idle_rpm - self.rpm) / self.idle_rpm).clamp(0.0, 1.0));
        }

        let mut total_torque = 0.0;

        // Engine braking; ten-fold with the ignition off.
        if self.contact {
            total_torque += self.braking_torque * self.rpm / self.max_rpm;
        } else {
            total_torque += 10.0 * self.braking_torque * self.rpm / self.max_rpm;
        }

        // Hydraulic pump load.
        if self.rpm > 100.0 {
            total_torque -= 8.0 * self.hydropump_load / (self.rpm * 0.105 * dt.max(1e-6));
        }

        if self.running && self.contact && self.rpm < self.max_rpm * 1.25 {
            total_torque += self.engine_power(self.rpm) * acc;
        }

        if self.running && self.rpm < self.stall_rpm {
            self.stop();
            events.push(SimEvent::EngineStalled { actor });
        }

        // Starter cranks against the braking torque.
        if self.contact && self.starter && self.rpm < self.stall_rpm * 1.5 {
            total_torque += -self.braking_torque;
        }

        if !self.running && self.contact && self.rpm > self.stall_rpm {
            self.running = true;
            events.push(SimEvent::EngineStarted { actor });
        }

        // Clutch reaction.
        let ratio = self.current_ratio();
        let retorque = if self.gear != 0 && ratio.abs() > 1e-6 {
            self.clutch_torque / ratio
        } else {
            0.0
        };
        total_torque -= retorque;

        self.rpm = (self.rpm + dt * total_torque / self.inertia).max(0.0);

        // Clutch torque transfer.
        if self.gear != 0 && ratio.abs() > 1e-6 {
            let gearbox_spinner = self.rpm / ratio;
            self.clutch_torque =
                (gearbox_spinner - self.wheel_revolutions) * self.clutch * self.clutch * self.clutch_force;
        } else {
            self.clutch_torque = 0.0;
        }

        if self.mode != ShiftMode::Manual {
            self.auto_update(dt, acc, brake_input, events, actor);
        } else if self.shifting {
            self.run_shift_clock(dt, events, actor);
        }

        total_torque
    }

    fn run_shift_clock(&mut self, dt: f32, events: &mut Vec<SimEvent>, actor: u32) {
        self.shift_clock += dt;

        // Declutch, swap the gear mid-shift, clutch back in.
        if self.shift_clock < self.clutch_time {
            self.clutch = 1.0 - self.shift_clock / self.clutch_time;
        } else if self.shift_clock > self.shift_time - self.clutch_time {
            self.clutch = 1.0 - (self.shift_time - self.shift_clock) / self.clutch_time;
        } else {
            self.clutch = 0.0;
        }

        if self.shift_val != 0 && self.shift_clock > self.clutch_time / 2.0 {
            let max_gear = self.num_forward_gears() as i32;
            self.gear = (self.gear + self.shift_val).clamp(-1, max_gear);
            self.shift_val = 0;
            events.push(SimEvent::GearShifted {
                actor,
                gear: self.gear,
            });
        }

        if self.shift_clock > self.shift_time {
            self.shifting = false;
            self.clutch = 1.0;
            self.post_shifting = true;
            self.post_shift_clock = 0.0;
        }
    }

    fn auto_update(&mut self, dt: f32, acc: f32, brake: f32, events: &mut Vec<SimEvent>, actor: u32) {
        if self.shifting {
            self.run_shift_clock(dt, events, actor);
        } else {
            self.auto_throttle = acc;
        }

        if self.post_shifting {
            self.post_shift_clock += dt;
            if self.post_shift_clock > self.post_shift_time {
                self.post_shifting = false;
            }
        }

        // Auto declutch.
        if self.shifting {
            if self.rpm < self.stall_rpm * 1.2 {
                self.clutch = 0.0;
            }
        } else if self.rpm < self.stall_rpm * 1.2 && acc < 0.5 {
            self.clutch = 0.0;
        } else if self.gear.abs() == 1 {
            // First gear feathers the clutch with RPM.
            if self.rpm > self.min_rpm {
                self.clutch = ((self.rpm - self.min_rpm) / (self.max_rpm - self.min_rpm)).min(1.0);
            } else {
                self.clutch = 0.0;
            }
        } else {
            self.clutch = 1.0;
        }

        // Smoothed observations drive the shift decisions; the lockout
        // windows keep it from hunting.
        let blend = (dt * 10.0).min(1.0);
        self.avg_rpm += (self.rpm - self.avg_rpm) * blend;
        self.avg_throttle += (acc - self.avg_throttle) * blend;

        if self.mode == ShiftMode::Automatic
            && matches!(self.autoselect, AutoSelect::Drive | AutoSelect::Two)
            && self.gear > 0
            && !self.shifting
            && !self.post_shifting
        {
            let max_gear = match self.autoselect {
                AutoSelect::Two => self.num_forward_gears().min(2) as i32,
                _ => self.num_forward_gears() as i32,
            };
            let ratio = self.current_ratio();
            if self.avg_rpm > self.max_rpm - 100.0 && self.gear < max_gear {
                self.shift(1);
            } else if self.gear > 1
                && self.avg_rpm < self.min_rpm
                && brake < 0.3
                && self.wheel_revolutions * ratio < self.max_rpm
            {
                self.shift(-1);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Driveline component
// ---------------------------------------------------------------------------

/// Anti-lock brake tuning.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AlbConfig {
    /// Slip ratio beyond which the brake is pulsed off.
    pub ratio: f32,
    /// Road speed below which ALB stays out of the way, m/s.
    pub min_speed: f32,
    /// Pulse frequency in Hz.
    pub pulse_hz: f32,
}

/// Traction control tuning.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TcConfig {
    /// Allowed wheel slip fraction before torque is cut.
    pub wheelslip: f32,
    /// Seconds the torque reduction persists after a slip event.
    pub fade: f32,
    /// Pulse frequency in Hz.
    pub pulse_hz: f32,
}

/// Per-actor drivetrain: engine, axles and the driving aids.
#[derive(Component, Debug, Clone, Serialize, Deserialize)]
pub struct Driveline {
    pub engine: Option<Engine>,
    pub axles: Vec<Axle>,
    /// Average peripheral speed of the propelled wheels, m/s.
    pub wheel_speed: f32,
    pub brake_force: f32,
    pub hand_brake_force: f32,
    pub alb: Option<AlbConfig>,
    /// Driver toggle; the ALB hardware stays fitted but inert when off.
    pub alb_enabled: bool,
    pub alb_timer: f32,
    pub alb_pulse_state: bool,
    pub alb_active: bool,
    pub tc: Option<TcConfig>,
    /// Driver toggle for traction control.
    pub tc_enabled: bool,
    pub tc_timer: f32,
    pub tc_pulse_state: bool,
    pub tc_fade_timer: f32,
    pub tc_active: bool,
}

impl Default for Driveline {
    fn default() -> Self {
        Self {
            engine: None,
            axles: Vec::new(),
            wheel_speed: 0.0,
            brake_force: 0.0,
            hand_brake_force: 0.0,
            alb: None,
            alb_enabled: true,
            alb_timer: 0.0,
            alb_pulse_state: false,
            alb_active: false,
            tc: None,
            tc_enabled: true,
            tc_timer: 0.0,
            tc_pulse_state: false,
            tc_fade_timer: 0.0,
            tc_active: false,
        }
    }
}

impl Driveline {
    /// Advance the ALB/TC pulse clocks.
    pub fn tick_pulses(&mut self, dt: f32) {
        if let Some(alb) = self.alb {
            self.alb_timer += dt;
            let half_period = 1.0 / (2.0 * alb.pulse_hz.max(0.01));
            if self.alb_timer >= half_period {
                self.alb_timer = 0.0;
                self.alb_pulse_state = !self.alb_pulse_state;
            }
        }
        if let Some(tc) = self.tc {
            self.tc_timer += dt;
            let half_period = 1.0 / (2.0 * tc.pulse_hz.max(0.01));
            if self.tc_timer >= half_period {
                self.tc_timer = 0.0;
                self.tc_pulse_state = !self.tc_pulse_state;
            }
            self.tc_fade_timer = (self.tc_fade_timer - dt).max(0.0);
        }
    }
}
