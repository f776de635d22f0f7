//! Shock absorber evaluation: bounded interpolation (shock1), progressive
//! curves (shock2) and the trigger switch semantics built on shock2 beams.

use crate::config::{DEFAULT_DAMP, DEFAULT_SPRING};
use crate::events::{EventQueue, SimEvent};
use crate::rig::beam::{
    BeamStore, SHOCK_FLAG_ISTRIGGER, SHOCK_FLAG_NORMAL, SHOCK_FLAG_SOFTBUMP, SHOCK_FLAG_TRG_BLOCKER,
    SHOCK_FLAG_TRG_BLOCKER_A, SHOCK_FLAG_TRG_CMD_BLOCKER, SHOCK_FLAG_TRG_CMD_SWITCH,
    SHOCK_FLAG_TRG_CONTINUOUS, SHOCK_FLAG_TRG_ENGINE, SHOCK_FLAG_TRG_HOOK_LOCK,
    SHOCK_FLAG_TRG_HOOK_UNLOCK,
};
use crate::rig::commands::CommandSet;

/// Side effects requested by trigger beams, applied by the scheduler after
/// the beam pass.
#[derive(Debug, Default)]
pub struct TriggerRequests {
    /// (hookgroup, lock?) pairs.
    pub hook_toggles: Vec<(i32, bool)>,
    pub engine_toggle: bool,
}

impl TriggerRequests {
    pub fn clear(&mut self) {
        self.hook_toggles.clear();
        self.engine_toggle = false;
    }
}

/// Shock1: interpolate spring/damp towards the hard-stop values once the
/// stretch leaves the configured bounds.
pub fn calc_shock1(store: &BeamStore, beam_idx: usize, diff: f32, k: &mut f32, d: &mut f32) {
    let beam = &store[beam_idx];
    let interp_ratio = if diff > beam.long_bound * beam.rest_len {
        diff - beam.long_bound * beam.rest_len
    } else if diff < -beam.short_bound * beam.rest_len {
        -diff - beam.short_bound * beam.rest_len
    } else {
        return;
    };

    let (tspring, tdamp) = match beam.shock {
        Some(s) => (store.shocks[s].sbd_spring, store.shocks[s].sbd_damp),
        None => (DEFAULT_SPRING, DEFAULT_DAMP),
    };

    *k += (tspring - *k) * interp_ratio;
    *d += (tdamp - *d) * interp_ratio;
}

fn progression(diff: f32, bound: f32, rest_len: f32) -> f32 {
    if bound != 0.0 {
        let f = diff / (bound * rest_len);
        (f * f).min(1.0)
    } else {
        1.0
    }
}

/// Shock2: progressive spring/damp with distinct compression and extension
/// parameters, soft bumpers, hard stops and the trigger machinery.
///
/// Returns the effective (k, d) for this sub-step.
#[allow(clippy::too_many_arguments)]
pub fn calc_shock2(
    store: &mut BeamStore,
    beam_idx: usize,
    diff: f32,
    dt: f32,
    do_update: bool,
    actor: u32,
    commands: &mut CommandSet,
    requests: &mut TriggerRequests,
    events: &mut EventQueue,
) -> (f32, f32) {
    let Some(shock_idx) = store[beam_idx].shock else {
        return (store[beam_idx].k, store[beam_idx].d);
    };

    let rest_len = store[beam_idx].rest_len;
    let long_bound = store[beam_idx].long_bound;
    let short_bound = store[beam_idx].short_bound;
    let flags = store.shocks[shock_idx].flags;
    let last_pos = store.shocks[shock_idx].last_pos;

    let beams_lep = rest_len * 0.8;
    let longbound_prelimit = long_bound * beams_lep;
    let shortbound_prelimit = -short_bound * beams_lep;

    let sh = &store.shocks[shock_idx];
    let (mut k, mut d);
    if last_pos < diff {
        // Extending since the last sub-step.
        k = sh.spring_out;
        d = sh.damp_out;
        let loga = progression(diff, long_bound, rest_len);
        k += sh.sprog_out * k * loga;
        d += sh.dprog_out * d * loga;
    } else {
        // Compressing since the last sub-step.
        k = sh.spring_in;
        d = sh.damp_in;
        let loga = progression(diff, short_bound, rest_len);
        k += sh.sprog_in * k * loga;
        d += sh.dprog_in * d * loga;
    }

    if flags & SHOCK_FLAG_SOFTBUMP != 0 {
        let sh = &store.shocks[shock_idx];
        if diff > longbound_prelimit {
            // Reset to the extension progressive values, then pile the soft
            // bumper progression on top (oscillating beam workaround).
            k = sh.spring_out;
            d = sh.damp_out;
            let loga = progression(diff, long_bound, rest_len);
            k += sh.sprog_out * k * loga;
            d += sh.dprog_out * d * loga;
            let bump = progression((diff - longbound_prelimit) * 5.0, long_bound, rest_len);
            k += (k + 100.0) * sh.sprog_out * bump;
            d += (d + 100.0) * sh.dprog_out * bump;
            if last_pos > diff {
                // Rebound mode.
                k = sh.spring_in;
                d = sh.damp_in;
            }
        } else if diff < shortbound_prelimit {
            k = sh.spring_in;
            d = sh.damp_in;
            let loga = progression(diff, short_bound, rest_len);
            k += sh.sprog_in * k * loga;
            d += sh.dprog_in * d * loga;
            let bump = progression((diff - shortbound_prelimit) * 5.0, short_bound, rest_len);
            k += (k + 100.0) * sh.sprog_out * bump;
            d += (d + 100.0) * sh.dprog_out * bump;
            if last_pos < diff {
                k = sh.spring_out;
                d = sh.damp_out;
            }
        }
        if diff > long_bound * rest_len || diff < -short_bound * rest_len {
            // Block reached: hard bump in soft mode.
            k = k.max(sh.sbd_spring);
            d = d.max(sh.sbd_damp);
        }
    }

    if flags & SHOCK_FLAG_NORMAL != 0 {
        let beyond = diff > long_bound * rest_len || diff < -short_bound * rest_len;
        if beyond && flags & SHOCK_FLAG_ISTRIGGER == 0 {
            // Hard shock bump.
            let sh = &store.shocks[shock_idx];
            k = sh.sbd_spring;
            d = sh.sbd_damp;
        }

        if flags & SHOCK_FLAG_ISTRIGGER != 0 && store.shocks[shock_idx].trigger_enabled {
            if beyond {
                {
                    let sh = &mut store.shocks[shock_idx];
                    sh.trigger_switch_state = (sh.trigger_switch_state - dt).max(0.0);
                }
                run_trigger_actions(
                    store, beam_idx, shock_idx, diff, do_update, actor, commands, requests, events,
                );
            } else {
                // Inside the boundaries again: rearm the switch timer.
                let sh = &mut store.shocks[shock_idx];
                if sh.trigger_switch_state > 0.0 && sh.trigger_switch_state < sh.trigger_boundary_t
                {
                    sh.trigger_switch_state = 0.0;
                }
            }
        }
    }

    store.shocks[shock_idx].last_pos = diff;
    (k, d)
}

#[allow(clippy::too_many_arguments)]
fn run_trigger_actions(
    store: &mut BeamStore,
    beam_idx: usize,
    shock_idx: usize,
    diff: f32,
    do_update: bool,
    actor: u32,
    commands: &mut CommandSet,
    requests: &mut TriggerRequests,
    events: &mut EventQueue,
) {
    let flags = store.shocks[shock_idx].flags;
    let cmd_short = store.shocks[shock_idx].trigger_cmd_short;
    let cmd_long = store.shocks[shock_idx].trigger_cmd_long;
    let rest_len = store[beam_idx].rest_len;
    let long_bound = store[beam_idx].long_bound;
    let past_long = diff > long_bound * rest_len;

    if flags & SHOCK_FLAG_TRG_BLOCKER != 0 {
        // Disable the next `cmd_short` trigger beams.
        for scount in beam_idx + 1..=(beam_idx + cmd_short).min(store.len().saturating_sub(1)) {
            if let Some(si) = store[scount].shock {
                if store.shocks[si].flags & SHOCK_FLAG_ISTRIGGER != 0 {
                    store.shocks[si].trigger_enabled = false;
                }
            }
        }
    } else if flags & SHOCK_FLAG_TRG_BLOCKER_A != 0 {
        // Inverted blocker: releases the next `cmd_long` trigger beams.
        for scount in beam_idx + 1..=(beam_idx + cmd_long).min(store.len().saturating_sub(1)) {
            if let Some(si) = store[scount].shock {
                if store.shocks[si].flags & SHOCK_FLAG_ISTRIGGER != 0 {
                    store.shocks[si].trigger_enabled = true;
                }
            }
        }
    } else if flags & SHOCK_FLAG_TRG_CMD_BLOCKER != 0 {
        // Release the blocked command key.
        if let Some(key) = commands.keys.get_mut(cmd_short) {
            key.blocked = false;
        }
    } else if flags & SHOCK_FLAG_TRG_CMD_SWITCH != 0 {
        if store.shocks[shock_idx].trigger_switch_state == 0.0 {
            // First crossing inside this boundary: swap the command pair of
            // every matching trigger.
            for si in 0..store.shocks.len() {
                if si == shock_idx || store.shocks[si].flags & SHOCK_FLAG_ISTRIGGER == 0 {
                    continue;
                }
                let (s1, l1) = (
                    store.shocks[si].trigger_cmd_short,
                    store.shocks[si].trigger_cmd_long,
                );
                if (s1 == cmd_short && l1 == cmd_long) || (s1 == cmd_long && l1 == cmd_short) {
                    store.shocks[si].trigger_cmd_short = l1;
                    store.shocks[si].trigger_cmd_long = s1;
                }
            }
            let sh = &mut store.shocks[shock_idx];
            sh.trigger_switch_state = sh.trigger_boundary_t;
        }
    } else if flags & (SHOCK_FLAG_TRG_HOOK_LOCK | SHOCK_FLAG_TRG_HOOK_UNLOCK) != 0 {
        // Hook toggles only fire once per frame.
        if do_update {
            let group = if past_long { cmd_long } else { cmd_short } as i32;
            requests
                .hook_toggles
                .push((group, flags & SHOCK_FLAG_TRG_HOOK_LOCK != 0));
        }
    } else if flags & SHOCK_FLAG_TRG_ENGINE != 0 {
        requests.engine_toggle = true;
    } else if past_long {
        // Plain trigger past the long boundary.
        let key = if flags & SHOCK_FLAG_TRG_CONTINUOUS != 0 {
            cmd_short
        } else {
            cmd_long
        };
        if commands.keys.get(key).map(|k| !k.blocked).unwrap_or(false) {
            commands.keys[key].trigger_input = 1.0;
            events.push(SimEvent::TriggerFired {
                actor,
                beam: beam_idx,
                key,
                long_action: true,
            });
        }
    } else {
        // Plain trigger past the short boundary. A continuous trigger
        // releases its key here instead of pressing the short one.
        if commands
            .keys
            .get(cmd_short)
            .map(|k| !k.blocked)
            .unwrap_or(false)
        {
            let value = if flags & SHOCK_FLAG_TRG_CONTINUOUS != 0 {
                0.0
            } else {
                1.0
            };
            commands.keys[cmd_short].trigger_input = value;
            if value > 0.0 {
                events.push(SimEvent::TriggerFired {
                    actor,
                    beam: beam_idx,
                    key: cmd_short,
                    long_action: false,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rig::beam::{Beam, BeamBound, Shock};

    fn shock2_store(long_bound: f32, short_bound: f32, flags: u32) -> BeamStore {
        let mut store = BeamStore::new();
        let mut beam = Beam::new(0, 1, 1000.0, 10.0, 1.0);
        beam.bound = BeamBound::Shock2;
        beam.long_bound = long_bound;
        beam.short_bound = short_bound;
        let idx = store.add(beam);
        let mut shock = Shock::new(idx, flags);
        shock.spring_in = 1000.0;
        shock.damp_in = 10.0;
        shock.spring_out = 2000.0;
        shock.damp_out = 20.0;
        shock.sprog_in = 2.0;
        shock.dprog_in = 0.5;
        shock.sprog_out = 2.0;
        shock.dprog_out = 0.5;
        shock.sbd_spring = 50_000.0;
        shock.sbd_damp = 500.0;
        store.add_shock(shock);
        store
    }

    #[test]
    fn test_progressive_spring_exceeds_linear_near_bound() {
        let mut store = shock2_store(0.5, 0.5, SHOCK_FLAG_NORMAL);
        let mut commands = CommandSet::default();
        let mut requests = TriggerRequests::default();
        let mut events = EventQueue::default();

        // Compressing: last_pos starts at 0, probe below it.
        let (k_small, _) = calc_shock2(
            &mut store, 0, -0.01, 0.0005, false, 0, &mut commands, &mut requests, &mut events,
        );
        let (k_near_bound, _) = calc_shock2(
            &mut store, 0, -0.45, 0.0005, false, 0, &mut commands, &mut requests, &mut events,
        );
        assert!(k_near_bound > k_small);
        // Progression factor caps at sprog * k on top of base k.
        assert!(k_near_bound <= 1000.0 + 2.0 * 1000.0 + 1.0);
    }

    #[test]
    fn test_hard_stop_beyond_bound() {
        let mut store = shock2_store(0.5, 0.5, SHOCK_FLAG_NORMAL);
        let mut commands = CommandSet::default();
        let mut requests = TriggerRequests::default();
        let mut events = EventQueue::default();
        let (k, d) = calc_shock2(
            &mut store, 0, 0.6, 0.0005, false, 0, &mut commands, &mut requests, &mut events,
        );
        assert_eq!(k, 50_000.0);
        assert_eq!(d, 500.0);
    }

    #[test]
    fn test_trigger_fires_long_action_once_per_substep() {
        let mut store = shock2_store(0.5, 0.5, SHOCK_FLAG_NORMAL | SHOCK_FLAG_ISTRIGGER);
        store.shocks[0].trigger_cmd_short = 2;
        store.shocks[0].trigger_cmd_long = 1;
        let mut commands = CommandSet::default();
        let mut requests = TriggerRequests::default();
        let mut events = EventQueue::default();

        calc_shock2(
            &mut store, 0, 0.6, 0.0005, false, 0, &mut commands, &mut requests, &mut events,
        );
        commands.refresh_values();
        assert!(commands.keys[1].is_pressed());

        // No new trigger input: the key releases on the next refresh.
        commands.refresh_values();
        assert!(!commands.keys[1].is_pressed());
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_blocker_disables_following_triggers() {
        let mut store = BeamStore::new();
        for i in 0..2 {
            let mut beam = Beam::new(i, i + 1, 1000.0, 10.0, 1.0);
            beam.bound = BeamBound::Shock2;
            beam.long_bound = 0.5;
            beam.short_bound = 0.5;
            store.add(beam);
        }
        let mut blocker = Shock::new(
            0,
            SHOCK_FLAG_NORMAL | SHOCK_FLAG_ISTRIGGER | SHOCK_FLAG_TRG_BLOCKER,
        );
        blocker.trigger_cmd_short = 1; // blocks one following trigger
        store.add_shock(blocker);
        store.add_shock(Shock::new(1, SHOCK_FLAG_NORMAL | SHOCK_FLAG_ISTRIGGER));

        let mut commands = CommandSet::default();
        let mut requests = TriggerRequests::default();
        let mut events = EventQueue::default();
        calc_shock2(
            &mut store, 0, 0.6, 0.0005, false, 0, &mut commands, &mut requests, &mut events,
        );
        assert!(!store.shocks[1].trigger_enabled);
    }

    #[test]
    fn test_shock1_inside_bounds_untouched() {
        let mut store = BeamStore::new();
        let mut beam = Beam::new(0, 1, 5000.0, 50.0, 1.0);
        beam.bound = BeamBound::Shock1;
        beam.long_bound = 0.5;
        beam.short_bound = 0.5;
        store.add(beam);
        let (mut k, mut d) = (5000.0, 50.0);
        calc_shock1(&store, 0, 0.1, &mut k, &mut d);
        assert_eq!(k, 5000.0);
        assert_eq!(d, 50.0);
        calc_shock1(&store, 0, 0.7, &mut k, &mut d);
        assert!(k > 5000.0);
    }
}
