//! Maps Shelly field names onto SunSpec meter quantities and derives the
//! values the Shelly does not report itself.

use crate::error::Result;
use crate::telemetry::{Phase, TelemetryRecord};
use std::collections::BTreeMap;

/// SunSpec quantity name to value
pub type SunSpecValues = BTreeMap<&'static str, f64>;

/// Shelly field to SunSpec register name. Later entries win, so the
/// frequency published as `Hz` is phase C's when all three report one.
const SHELLY_TO_SUNSPEC: &[(&str, &str)] = &[
    // Phase A
    ("a_current", "AphA"),
    ("a_voltage", "PhVphA"),
    ("a_act_power", "WphA"),
    ("a_aprt_power", "VAphA"),
    ("a_pf", "PFphA"),
    ("a_freq", "Hz"),
    // Phase B
    ("b_current", "AphB"),
    ("b_voltage", "PhVphB"),
    ("b_act_power", "WphB"),
    ("b_aprt_power", "VAphB"),
    ("b_pf", "PFphB"),
    ("b_freq", "Hz"),
    // Phase C
    ("c_current", "AphC"),
    ("c_voltage", "PhVphC"),
    ("c_act_power", "WphC"),
    ("c_aprt_power", "VAphC"),
    ("c_pf", "PFphC"),
    ("c_freq", "Hz"),
    // Totals
    ("total_current", "A"),
    ("total_act_power", "W"),
    ("total_aprt_power", "VA"),
    // Energy
    ("a_total_act_ret_energy", "TotWhExpPhA"),
    ("a_total_act_energy", "TotWhImpPhA"),
    ("b_total_act_ret_energy", "TotWhExpPhB"),
    ("b_total_act_energy", "TotWhImpPhB"),
    ("c_total_act_ret_energy", "TotWhExpPhC"),
    ("c_total_act_energy", "TotWhImpPhC"),
    ("total_act_ret", "TotWhExp"),
    ("total_act", "TotWhImp"),
];

const SQRT_3: f64 = 1.732_050_807_568_877_2;

/// Runs sign correction, renaming and derivations on a normalized record.
pub fn derive_and_map(record: &TelemetryRecord) -> Result<SunSpecValues> {
    let record = correct_signs(record)?;

    let mut values = SunSpecValues::new();
    for &(shelly_name, sunspec_name) in SHELLY_TO_SUNSPEC {
        if let Some(Some(value)) = record.get(shelly_name) {
            values.insert(sunspec_name, value);
        }
    }

    let current = |phase: Phase| record.value(&phase.field("current"));
    let voltage = |phase: Phase| record.value(&phase.field("voltage"));
    let pf = |phase: Phase| record.value(&phase.field("pf"));

    values.insert("A", current(Phase::A)? + current(Phase::B)? + current(Phase::C)?);

    let (va, vb, vc) = (voltage(Phase::A)?, voltage(Phase::B)?, voltage(Phase::C)?);
    values.insert("PhV", (va + vb + vc) / 3.0);

    // The Shelly has no line-to-line measurement, so this is approximated
    // from each phase-to-neutral voltage.
    let (ab, bc, ca) = (SQRT_3 * va, SQRT_3 * vb, SQRT_3 * vc);
    values.insert("PPVphAB", ab);
    values.insert("PPVphBC", bc);
    values.insert("PPVphCA", ca);
    values.insert("PPV", (ab + bc + ca) / 3.0);

    values.insert(
        "VAR",
        reactive_power(
            record.value("total_aprt_power")?,
            record.value("total_act_power")?,
        ),
    );
    for (phase, name) in [(Phase::A, "VARphA"), (Phase::B, "VARphB"), (Phase::C, "VARphC")] {
        let apparent = record.value(&phase.field("aprt_power"))?;
        let active = record.value(&phase.field("act_power"))?;
        values.insert(name, reactive_power(apparent, active));
    }

    values.insert("PF", (pf(Phase::A)? + pf(Phase::B)? + pf(Phase::C)?) / 3.0);

    Ok(values)
}

/// The Shelly reports current as a magnitude. When a phase exports, current
/// and power factor are made negative to match the active power's sign.
pub fn correct_signs(record: &TelemetryRecord) -> Result<TelemetryRecord> {
    let mut corrected = record.clone();
    for phase in Phase::ALL {
        let active_power = record.value(&phase.field("act_power"))?;
        if active_power >= 0.0 {
            continue;
        }
        let current_field = phase.field("current");
        corrected.set(current_field.as_str(), -record.value(&current_field)?);

        let pf_field = phase.field("pf");
        let pf = record.value(&pf_field)?;
        if pf > 0.0 {
            corrected.set(pf_field, -pf);
        }
    }
    Ok(corrected)
}

/// `sqrt(S² - P²)`, clamped to zero when noise makes |P| exceed S
pub fn reactive_power(apparent: f64, active: f64) -> f64 {
    let radicand = apparent * apparent - active * active;
    if radicand > 0.0 {
        radicand.sqrt()
    } else {
        0.0
    }
}
