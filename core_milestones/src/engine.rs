use std::{
    collections::{BTreeMap, BTreeSet},
    ops::Bound,
    sync::Arc,
};

use bevy::prelude::{Res, ResMut, Resource, World};

use crate::{
    config::{MilestoneConfig, MilestoneConfigHandle, MilestoneConfigMetadata},
    host::HostLink,
    persistence::{self, StateStore},
};

/// Most recent online-count sample fed into the evaluation pipeline. Also the
/// value the announcer reads as "current".
#[derive(Resource, Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct OnlineSample(pub u32);

/// In-memory trigger bookkeeping: the all-time online record and the set of
/// thresholds whose actions have been dispatched in the current epoch. An
/// epoch ends only when the triggered set is cleared (reload with persistence
/// disabled).
#[derive(Resource, Debug, Clone, Default, PartialEq, Eq)]
pub struct MilestoneState {
    pub record_online: u32,
    pub triggered: BTreeSet<u32>,
}

/// Smallest configured threshold strictly greater than `current`, or
/// `current` itself when every threshold is already at or below it (the
/// "no further milestone" sentinel).
pub fn next_threshold(table: &BTreeMap<u32, Vec<String>>, current: u32) -> u32 {
    table
        .range((Bound::Excluded(current), Bound::Unbounded))
        .next()
        .map(|(&threshold, _)| threshold)
        .unwrap_or(current)
}

/// First stage of the evaluation pipeline: advance the high-water-mark and
/// write it through. The record never decreases.
pub fn track_record_high(
    sample: Res<OnlineSample>,
    config: Res<MilestoneConfigHandle>,
    mut state: ResMut<MilestoneState>,
    store: Res<StateStore>,
) {
    if sample.0 <= state.record_online {
        return;
    }
    let previous = state.record_online;
    state.record_online = sample.0;
    tracing::info!(
        target: "peakwatch::engine",
        previous,
        record = state.record_online,
        "record.updated"
    );
    persistence::write_through(&store, &state, config.config().persist_thresholds);
}

/// Second stage: fire every not-yet-triggered threshold at or below the
/// sample, in ascending order, dispatching its actions in list order. The
/// durable record is written after each individual threshold, not batched,
/// so a crash mid-pass loses at most the threshold currently firing.
pub fn fire_milestones(
    sample: Res<OnlineSample>,
    config: Res<MilestoneConfigHandle>,
    mut state: ResMut<MilestoneState>,
    store: Res<StateStore>,
    host: Res<HostLink>,
) {
    let cfg = config.get();
    for (&threshold, actions) in cfg.thresholds.range(..=sample.0) {
        if state.triggered.contains(&threshold) {
            continue;
        }
        for action in actions {
            host.execute(action);
        }
        state.triggered.insert(threshold);
        tracing::info!(
            target: "peakwatch::engine",
            threshold,
            online = sample.0,
            actions = actions.len(),
            "milestone.fired"
        );
        if cfg.persist_thresholds {
            persistence::write_through(&store, &state, true);
        }
    }
}

/// Re-read the configuration the active one was loaded from and swap it in
/// wholesale. Disabling persistence starts a new epoch: the triggered set is
/// cleared in memory and the durable record is rewritten immediately, so a
/// restart cannot resurrect the cleared set. A reload that fails to read or
/// parse keeps the active configuration.
pub fn reload(world: &mut World) {
    let path = world.resource::<MilestoneConfigMetadata>().path().cloned();
    let fresh = match path {
        Some(ref path) => match MilestoneConfig::from_file(path) {
            Ok(config) => Arc::new(config),
            Err(err) => {
                tracing::warn!(
                    target: "peakwatch::config",
                    path = %path.display(),
                    error = %err,
                    "milestone_config.reload_failed=keeping_active"
                );
                return;
            }
        },
        None => MilestoneConfig::builtin(),
    };

    let persist = fresh.persist_thresholds;
    let thresholds = fresh.thresholds.len();
    world.resource_mut::<MilestoneConfigHandle>().replace(fresh);

    if !persist {
        world.resource_mut::<MilestoneState>().triggered.clear();
        let state = world.resource::<MilestoneState>().clone();
        let store = world.resource::<StateStore>();
        persistence::write_through(store, &state, false);
    }

    tracing::info!(
        target: "peakwatch::config",
        persist,
        thresholds,
        "milestone_config.reloaded"
    );
}
