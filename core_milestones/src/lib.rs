//! Core crate for the Peakwatch headless milestone server.
//!
//! Tracks the live online player count against a configured table of
//! ascending thresholds, fires each threshold's reward commands exactly once
//! per epoch, keeps a persisted all-time record, and renders the periodic
//! status announcement. All state lives in ECS resources inside a single
//! headless [`App`]; the driver loop owns the app and is the only site that
//! mutates it, so every operation is serialized by construction.

mod announcer;
mod config;
mod engine;
mod host;
mod persistence;

use bevy::prelude::*;
use bevy_ecs::system::RunSystemOnce;

pub use announcer::{broadcast_status, render_status};
pub use config::{
    load_milestone_config_from_env, MilestoneConfig, MilestoneConfigError, MilestoneConfigHandle,
    MilestoneConfigMetadata, BUILTIN_MILESTONE_CONFIG,
};
pub use engine::{fire_milestones, next_threshold, reload, track_record_high, MilestoneState, OnlineSample};
pub use host::{start_directive_server, DirectiveServer, HostDirective, HostLink};
pub use persistence::{PersistedMilestones, StateStore, StateStoreError};

/// Construct a Bevy [`App`] configured with the milestone evaluation
/// pipeline. Configuration and the durable record are loaded here, once;
/// the given [`HostLink`] is where fired actions and broadcasts go.
pub fn build_headless_app(host: HostLink) -> App {
    let (config, metadata) = config::load_milestone_config_from_env();
    let store = persistence::StateStore::from_env();
    let state = persistence::load_or_default(&store, config.persist_thresholds);

    tracing::info!(
        target: "peakwatch::state",
        record = state.record_online,
        triggered = state.triggered.len(),
        path = %store.path().display(),
        "state.loaded"
    );

    let mut app = App::new();
    app.insert_resource(MilestoneConfigHandle::new(config))
        .insert_resource(metadata)
        .insert_resource(state)
        .insert_resource(store)
        .insert_resource(OnlineSample::default())
        .insert_resource(host)
        .add_plugins(MinimalPlugins)
        .add_systems(
            Update,
            (engine::track_record_high, engine::fire_milestones).chain(),
        );

    app
}

/// Feed one online-count sample through the evaluation pipeline
/// (record tracking → milestone firing, in that order).
pub fn run_sample(app: &mut App, online: u32) {
    app.world.insert_resource(OnlineSample(online));
    app.update();
}

/// Render and broadcast the status announcement for the latest sample.
pub fn announce_status(world: &mut World) {
    world.run_system_once(announcer::broadcast_status);
}

/// Best-effort final write of the full current state, invoked once when the
/// driver shuts down.
pub fn persist_on_shutdown(world: &World) {
    let persist = world
        .resource::<MilestoneConfigHandle>()
        .config()
        .persist_thresholds;
    let state = world.resource::<MilestoneState>();
    let store = world.resource::<StateStore>();
    persistence::write_through(store, state, persist);
    tracing::info!(
        target: "peakwatch::state",
        record = state.record_online,
        triggered = state.triggered.len(),
        "state.persisted=shutdown"
    );
}
