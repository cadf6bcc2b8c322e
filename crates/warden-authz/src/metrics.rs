use std::{collections::HashMap, fmt::Write as _};

use crate::core::{MetricsState, METRICS_STATE};

pub(crate) const NOTICE_DROP_REASON_SERIALIZE_ERROR: &str = "serialize_error";
pub(crate) const NOTICE_DROP_REASON_NO_CONNECTION: &str = "no_connection";
pub(crate) const NOTICE_DROP_REASON_CLOSED: &str = "closed";
pub(crate) const NOTICE_DROP_REASON_FULL_QUEUE: &str = "full_queue";

pub(crate) fn metrics_state() -> &'static MetricsState {
    METRICS_STATE.get_or_init(MetricsState::default)
}

pub(crate) fn record_revocation_notice_emitted(kind: &'static str) {
    if let Ok(mut counters) = metrics_state().revocation_notices_emitted.lock() {
        let entry = counters.entry(kind).or_insert(0);
        *entry += 1;
    }
}

pub(crate) fn record_revocation_notice_dropped(kind: &'static str, reason: &'static str) {
    if let Ok(mut counters) = metrics_state().revocation_notices_dropped.lock() {
        let entry = counters.entry((kind, reason)).or_insert(0);
        *entry += 1;
    }
}

pub(crate) fn record_cache_refresh(outcome: &'static str) {
    if let Ok(mut counters) = metrics_state().cache_refreshes.lock() {
        let entry = counters.entry(outcome).or_insert(0);
        *entry += 1;
    }
}

pub(crate) fn record_filter_denied(reason: &'static str) {
    if let Ok(mut counters) = metrics_state().filter_denials.lock() {
        let entry = counters.entry(reason).or_insert(0);
        *entry += 1;
    }
}

/// Renders all counters in prometheus text exposition format. The host
/// serves this from whatever metrics endpoint it already has.
#[must_use]
pub fn render_metrics() -> String {
    let notices_emitted = metrics_state()
        .revocation_notices_emitted
        .lock()
        .map_or_else(|_| HashMap::new(), |guard| guard.clone());
    let notices_dropped = metrics_state()
        .revocation_notices_dropped
        .lock()
        .map_or_else(|_| HashMap::new(), |guard| guard.clone());
    let cache_refreshes = metrics_state()
        .cache_refreshes
        .lock()
        .map_or_else(|_| HashMap::new(), |guard| guard.clone());
    let filter_denials = metrics_state()
        .filter_denials
        .lock()
        .map_or_else(|_| HashMap::new(), |guard| guard.clone());

    let mut output = String::new();
    output.push_str(
        "# HELP warden_revocation_notices_total Count of revocation notices pushed to clients by kind\n",
    );
    output.push_str("# TYPE warden_revocation_notices_total counter\n");
    let mut emitted_entries: Vec<_> = notices_emitted.into_iter().collect();
    emitted_entries.sort_by_key(|(kind, _)| *kind);
    for (kind, value) in emitted_entries {
        let _ = writeln!(
            output,
            "warden_revocation_notices_total{{kind=\"{kind}\"}} {value}"
        );
    }

    output.push_str(
        "# HELP warden_revocation_notices_dropped_total Count of revocation notices that could not be delivered by kind and reason\n",
    );
    output.push_str("# TYPE warden_revocation_notices_dropped_total counter\n");
    let mut dropped_entries: Vec<_> = notices_dropped.into_iter().collect();
    dropped_entries.sort_by_key(|((kind, reason), _)| (*kind, *reason));
    for ((kind, reason), value) in dropped_entries {
        let _ = writeln!(
            output,
            "warden_revocation_notices_dropped_total{{kind=\"{kind}\",reason=\"{reason}\"}} {value}"
        );
    }

    output.push_str(
        "# HELP warden_cache_refreshes_total Count of permission cache refresh attempts by outcome\n",
    );
    output.push_str("# TYPE warden_cache_refreshes_total counter\n");
    let mut refresh_entries: Vec<_> = cache_refreshes.into_iter().collect();
    refresh_entries.sort_by_key(|(outcome, _)| *outcome);
    for (outcome, value) in refresh_entries {
        let _ = writeln!(
            output,
            "warden_cache_refreshes_total{{outcome=\"{outcome}\"}} {value}"
        );
    }

    output.push_str(
        "# HELP warden_filter_denied_records_total Count of records withheld by the read filter by reason\n",
    );
    output.push_str("# TYPE warden_filter_denied_records_total counter\n");
    let mut denial_entries: Vec<_> = filter_denials.into_iter().collect();
    denial_entries.sort_by_key(|(reason, _)| *reason);
    for (reason, value) in denial_entries {
        let _ = writeln!(
            output,
            "warden_filter_denied_records_total{{reason=\"{reason}\"}} {value}"
        );
    }

    output
}
