//! Flat telemetry record built from a Shelly Pro 3EM status document.

use crate::error::{GatewayError, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Object holding the instantaneous readings in `Shelly.GetStatus`
pub const INSTANTANEOUS_KEY: &str = "em:0";
/// Object holding the cumulative energy counters in `Shelly.GetStatus`
pub const ENERGY_KEY: &str = "emdata:0";

/// The cumulative energy counters, in the order offsets are listed.
pub const ENERGY_COUNTERS: [&str; 8] = [
    "a_total_act_energy",
    "a_total_act_ret_energy",
    "b_total_act_energy",
    "b_total_act_ret_energy",
    "c_total_act_energy",
    "c_total_act_ret_energy",
    "total_act",
    "total_act_ret",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    A,
    B,
    C,
}

impl Phase {
    pub const ALL: [Phase; 3] = [Phase::A, Phase::B, Phase::C];

    /// Prefix the Shelly uses for this phase's fields, e.g. `a`
    pub fn prefix(self) -> &'static str {
        match self {
            Phase::A => "a",
            Phase::B => "b",
            Phase::C => "c",
        }
    }

    /// Builds a field name such as `b_act_power`
    pub fn field(self, suffix: &str) -> String {
        format!("{}_{}", self.prefix(), suffix)
    }
}

impl FromStr for Phase {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "a" => Ok(Phase::A),
            "b" => Ok(Phase::B),
            "c" => Ok(Phase::C),
            _ => Err(GatewayError::invalid_channel(s)),
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// One meter snapshot. Values are `None` where the meter reported `null`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TelemetryRecord {
    fields: BTreeMap<String, Option<f64>>,
}

impl TelemetryRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges the `em:0` and `emdata:0` objects of a `Shelly.GetStatus`
    /// response. Instantaneous readings win if both objects share a key.
    pub fn from_shelly_status(status: &Value) -> Result<Self> {
        let instantaneous = status
            .get(INSTANTANEOUS_KEY)
            .and_then(Value::as_object)
            .ok_or_else(|| GatewayError::fetch(format!("response has no `{INSTANTANEOUS_KEY}`")))?;
        let energy = status
            .get(ENERGY_KEY)
            .and_then(Value::as_object)
            .ok_or_else(|| GatewayError::fetch(format!("response has no `{ENERGY_KEY}`")))?;

        let mut record = Self::new();
        for (key, value) in energy.iter().chain(instantaneous.iter()) {
            match value {
                Value::Null => {
                    record.fields.insert(key.clone(), None);
                }
                Value::Number(number) => {
                    record.fields.insert(key.clone(), number.as_f64());
                }
                // Arrays and strings (error lists, calibration flags) carry no measurement
                _ => {}
            }
        }
        if record.is_empty() {
            return Err(GatewayError::fetch("response carries no readings"));
        }
        Ok(record)
    }

    /// Raw lookup: `None` if absent, `Some(None)` if reported as null
    pub fn get(&self, field: &str) -> Option<Option<f64>> {
        self.fields.get(field).copied()
    }

    /// Numeric value of a field, treating absent and null alike
    pub fn value(&self, field: &str) -> Result<f64> {
        self.fields
            .get(field)
            .copied()
            .flatten()
            .ok_or_else(|| GatewayError::missing_field(field))
    }

    pub fn set(&mut self, field: impl Into<String>, value: f64) {
        self.fields.insert(field.into(), Some(value));
    }

    pub fn set_null(&mut self, field: impl Into<String>) {
        self.fields.insert(field.into(), None);
    }

    pub fn remove(&mut self, field: &str) -> Option<Option<f64>> {
        self.fields.remove(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut Option<f64>)> {
        self.fields.iter_mut().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// A complete three-phase reading: A and B importing, C exporting.
    pub(crate) fn three_phase_record() -> TelemetryRecord {
        let mut record = TelemetryRecord::new();
        for (phase, current, power, apparent, energy) in [
            (Phase::A, 4.0, 900.0, 920.0, 1000.0),
            (Phase::B, 2.0, 450.0, 460.0, 2000.0),
            (Phase::C, 3.0, -600.0, 690.0, 3000.0),
        ] {
            record.set(phase.field("current"), current);
            record.set(phase.field("voltage"), 230.0);
            record.set(phase.field("act_power"), power);
            record.set(phase.field("aprt_power"), apparent);
            record.set(phase.field("pf"), 0.97);
            record.set(phase.field("freq"), 50.0);
            record.set(phase.field("total_act_energy"), energy);
            record.set(phase.field("total_act_ret_energy"), energy / 4.0);
        }
        record.set("total_current", 9.0);
        record.set("total_act_power", 750.0);
        record.set("total_aprt_power", 2070.0);
        record.set("total_act", 6000.0);
        record.set("total_act_ret", 1500.0);
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_prefers_instantaneous_fields() {
        let status = json!({
            "em:0": {
                "id": 0,
                "a_current": 1.5,
                "n_current": null,
                "errors": ["phase_sequence"],
                "user_calibrated_phase": []
            },
            "emdata:0": {
                "id": 7,
                "a_total_act_energy": 1234.5,
                "total_act": 4000.0
            },
            "sys": { "uptime": 10 }
        });

        let record = TelemetryRecord::from_shelly_status(&status).unwrap();
        assert_eq!(record.value("a_current").unwrap(), 1.5);
        assert_eq!(record.value("a_total_act_energy").unwrap(), 1234.5);
        assert_eq!(record.value("id").unwrap(), 0.0);
        assert_eq!(record.get("n_current"), Some(None));
        assert!(!record.contains("errors"));
        assert!(!record.contains("uptime"));
    }

    #[test]
    fn test_missing_energy_object_is_a_fetch_error() {
        let status = json!({ "em:0": { "a_current": 1.0 } });
        let err = TelemetryRecord::from_shelly_status(&status).unwrap_err();
        assert!(matches!(err, GatewayError::Fetch { .. }));
    }

    #[test]
    fn test_document_without_readings_is_a_fetch_error() {
        let status = json!({
            "em:0": { "user_calibrated_phase": [] },
            "emdata:0": { "errors": ["database_error"] }
        });
        let err = TelemetryRecord::from_shelly_status(&status).unwrap_err();
        assert!(matches!(err, GatewayError::Fetch { .. }));
    }

    #[test]
    fn test_null_value_is_missing() {
        let mut record = TelemetryRecord::new();
        record.set_null("b_pf");
        assert!(matches!(
            record.value("b_pf"),
            Err(GatewayError::MissingField { field }) if field == "b_pf"
        ));
        assert!(record.value("c_pf").is_err());
    }

    #[test]
    fn test_phase_parsing() {
        assert_eq!("a".parse::<Phase>().unwrap(), Phase::A);
        assert_eq!("B".parse::<Phase>().unwrap(), Phase::B);
        assert!(matches!(
            "n".parse::<Phase>(),
            Err(GatewayError::InvalidChannel { .. })
        ));
        assert_eq!(Phase::C.field("voltage"), "c_voltage");
    }
}
