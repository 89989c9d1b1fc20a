//! Counter offset removal and phase channel nullification.
//!
//! Both steps are pure: they take the cycle's raw record and hand back an
//! adjusted copy, so a failure leaves the caller's record untouched.

use crate::config::Offsets;
use crate::error::{GatewayError, Result};
use crate::telemetry::{Phase, TelemetryRecord, ENERGY_COUNTERS};

/// Totals that are rebuilt from the per-phase fields after nullification,
/// as `(total field, per-phase suffix)`.
const RECOMPUTED_TOTALS: [(&str, &str); 5] = [
    ("total_current", "current"),
    ("total_act_power", "act_power"),
    ("total_aprt_power", "aprt_power"),
    ("total_act", "total_act_energy"),
    ("total_act_ret", "total_act_ret_energy"),
];

/// Fields of a nullified phase that keep reporting, since they describe the
/// grid rather than the load on that phase.
const GRID_FIELDS: [&str; 2] = ["freq", "voltage"];

/// Subtracts the configured baseline from every cumulative energy counter.
pub fn apply_offsets(record: &TelemetryRecord, offsets: &Offsets) -> Result<TelemetryRecord> {
    let mut adjusted = record.clone();
    for counter in ENERGY_COUNTERS {
        let offset = offsets
            .get(counter)
            .ok_or_else(|| GatewayError::config(format!("offset `{counter}` is not configured")))?;
        let raw = record.value(counter)?;
        adjusted.set(counter, raw - offset);
    }
    Ok(adjusted)
}

/// Parses channel identifiers such as `"b"` into phases.
pub fn parse_channels<S: AsRef<str>>(channels: &[S]) -> Result<Vec<Phase>> {
    channels.iter().map(|c| c.as_ref().parse()).collect()
}

/// Validates `channels` and removes their contribution from `record`.
pub fn apply_channel_nullification<S: AsRef<str>>(
    record: &TelemetryRecord,
    channels: &[S],
) -> Result<TelemetryRecord> {
    let phases = parse_channels(channels)?;
    nullify_phases(record, &phases)
}

/// Zeroes the load fields of each phase in `phases` and rebuilds the totals
/// from the phases that remain.
pub fn nullify_phases(record: &TelemetryRecord, phases: &[Phase]) -> Result<TelemetryRecord> {
    let mut adjusted = record.clone();
    let mut nullified: Vec<Phase> = Vec::with_capacity(phases.len());

    for &phase in phases {
        if !nullified.contains(&phase) {
            nullified.push(phase);
        }

        let prefix = format!("{}_", phase.prefix());
        for (key, value) in adjusted.iter_mut() {
            let Some(suffix) = key.strip_prefix(&prefix) else {
                continue;
            };
            if GRID_FIELDS.contains(&suffix) {
                continue;
            }
            if value.is_some() {
                *value = Some(0.0);
            }
        }

        recompute_totals(&mut adjusted, &nullified)?;
    }

    Ok(adjusted)
}

/// Totals are always summed from scratch so repeated runs cannot drift.
fn recompute_totals(record: &mut TelemetryRecord, nullified: &[Phase]) -> Result<()> {
    let remaining: Vec<Phase> = Phase::ALL
        .into_iter()
        .filter(|phase| !nullified.contains(phase))
        .collect();

    for (total, suffix) in RECOMPUTED_TOTALS {
        let mut sum = 0.0;
        for phase in &remaining {
            sum += record.value(&phase.field(suffix))?;
        }
        record.set(total, sum);
    }
    Ok(())
}
