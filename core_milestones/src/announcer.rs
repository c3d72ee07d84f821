use std::collections::BTreeMap;

use bevy::prelude::Res;

use crate::{
    config::MilestoneConfigHandle,
    engine::{next_threshold, OnlineSample},
    host::HostLink,
};

const PREVIEW_SEPARATOR: &str = "; ";

/// Interpolate the status template with the current count, the next
/// milestone, the distance to it, and a preview of its pending actions.
/// A placeholder the template does not contain is simply absent from the
/// output; no substitution is an error.
pub fn render_status(template: &str, online: u32, table: &BTreeMap<u32, Vec<String>>) -> String {
    let next = next_threshold(table, online);
    let to_go = next.saturating_sub(online);
    let preview = table
        .get(&next)
        .map(|actions| actions.join(PREVIEW_SEPARATOR))
        .unwrap_or_default();
    template
        .replace("%online%", &online.to_string())
        .replace("%next_threshold%", &next.to_string())
        .replace("%to_go%", &to_go.to_string())
        .replace("%commands_preview%", &preview)
}

/// Periodic status tick: a pure read-and-render path over the latest sample.
/// Mutates nothing; delivery failures are handled on the host side.
pub fn broadcast_status(
    sample: Res<OnlineSample>,
    config: Res<MilestoneConfigHandle>,
    host: Res<HostLink>,
) {
    let cfg = config.get();
    let message = render_status(&cfg.hourly_announcement, sample.0, &cfg.thresholds);
    host.broadcast(&message);
    tracing::debug!(
        target: "peakwatch::announce",
        online = sample.0,
        next = next_threshold(&cfg.thresholds, sample.0),
        "announcement.sent"
    );
}
