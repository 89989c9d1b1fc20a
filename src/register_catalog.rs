//! SunSpec Common model (1) and float three-phase Meter model (213) layout.
//!
//! Addresses are the 1-based SunSpec register numbers used in the Fronius
//! meter documentation. The register image stores register `address` at
//! offset `address - SUNSPEC_BASE_ADDRESS`.

use crate::error::{GatewayError, Result};
use std::collections::HashMap;
use std::sync::OnceLock;

pub const SUNSPEC_BASE_ADDRESS: u16 = 40000;
/// Offsets 0..=197, from the base up to and including the end-of-map marker
pub const REGISTER_IMAGE_LEN: usize = 198;
/// First offset of the measurement block written on every poll
pub const MEASUREMENT_OFFSET: usize = 72;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterType {
    Uint16,
    Uint32,
    Float32,
    Bitfield32,
    String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterEntry {
    pub name: &'static str,
    pub address: u16,
    pub length: u16,
    pub kind: RegisterType,
    pub description: &'static str,
}

impl RegisterEntry {
    /// Offset of the first word inside the register image. Catalog
    /// addresses all lie above the base.
    pub fn offset(&self) -> usize {
        usize::from(self.address - SUNSPEC_BASE_ADDRESS)
    }

    /// Offsets covered by this entry
    pub fn offsets(&self) -> std::ops::Range<usize> {
        self.offset()..self.offset() + self.length as usize
    }
}

/// Image offset of a SunSpec register, `None` below the base address
pub fn offset_of(address: u16) -> Option<usize> {
    address.checked_sub(SUNSPEC_BASE_ADDRESS).map(usize::from)
}

macro_rules! reg {
    ($name:literal, $address:literal, $length:literal, $kind:ident, $description:literal) => {
        RegisterEntry {
            name: $name,
            address: $address,
            length: $length,
            kind: RegisterType::$kind,
            description: $description,
        }
    };
}

pub const SUNSPEC_METER_REGISTERS: &[RegisterEntry] = &[
    // Common model
    reg!("SID", 40001, 2, Uint32, "Well-known value. Uniquely identifies this as a SunSpec Modbus Map"),
    reg!("ID", 40003, 1, Uint16, "Well-known value. Uniquely identifies this as a SunSpec Common Model block"),
    reg!("L", 40004, 1, Uint16, "Length of Common Model block"),
    reg!("Mn", 40005, 16, String, "Manufacturer"),
    reg!("Md", 40021, 16, String, "Device model"),
    reg!("Opt", 40037, 8, String, "Options"),
    reg!("Vr", 40045, 8, String, "SW version of meter"),
    reg!("SN", 40053, 16, String, "Serial number of the meter"),
    reg!("DA", 40069, 1, Uint16, "Modbus Device Address"),
    // Meter model header
    reg!("MeterID", 40070, 1, Uint16, "SunSpec Meter model; 211: single phase, 212: split phase, 213: three phase"),
    reg!("MeterL", 40071, 1, Uint16, "Length of meter model block"),
    // Measurements
    reg!("A", 40072, 2, Float32, "AC Total Current value"),
    reg!("AphA", 40074, 2, Float32, "AC Phase-A Current value"),
    reg!("AphB", 40076, 2, Float32, "AC Phase-B Current value"),
    reg!("AphC", 40078, 2, Float32, "AC Phase-C Current value"),
    reg!("PhV", 40080, 2, Float32, "AC Voltage Average Phase-to-neutral value"),
    reg!("PhVphA", 40082, 2, Float32, "AC Voltage Phase-A-to-neutral value"),
    reg!("PhVphB", 40084, 2, Float32, "AC Voltage Phase-B-to-neutral value"),
    reg!("PhVphC", 40086, 2, Float32, "AC Voltage Phase-C-to-neutral value"),
    reg!("PPV", 40088, 2, Float32, "AC Voltage Average Phase-to-phase value"),
    reg!("PPVphAB", 40090, 2, Float32, "AC Voltage Phase-AB value"),
    reg!("PPVphBC", 40092, 2, Float32, "AC Voltage Phase-BC value"),
    reg!("PPVphCA", 40094, 2, Float32, "AC Voltage Phase-CA value"),
    reg!("Hz", 40096, 2, Float32, "AC Frequency value"),
    reg!("W", 40098, 2, Float32, "AC Power value"),
    reg!("WphA", 40100, 2, Float32, "AC Power Phase A value"),
    reg!("WphB", 40102, 2, Float32, "AC Power Phase B value"),
    reg!("WphC", 40104, 2, Float32, "AC Power Phase C value"),
    reg!("VA", 40106, 2, Float32, "AC Apparent Power value"),
    reg!("VAphA", 40108, 2, Float32, "AC Apparent Power Phase A value"),
    reg!("VAphB", 40110, 2, Float32, "AC Apparent Power Phase B value"),
    reg!("VAphC", 40112, 2, Float32, "AC Apparent Power Phase C value"),
    reg!("VAR", 40114, 2, Float32, "AC Reactive Power value"),
    reg!("VARphA", 40116, 2, Float32, "AC Reactive Power Phase A value"),
    reg!("VARphB", 40118, 2, Float32, "AC Reactive Power Phase B value"),
    reg!("VARphC", 40120, 2, Float32, "AC Reactive Power Phase C value"),
    reg!("PF", 40122, 2, Float32, "Power Factor value"),
    reg!("PFphA", 40124, 2, Float32, "Power Factor Phase A value"),
    reg!("PFphB", 40126, 2, Float32, "Power Factor Phase B value"),
    reg!("PFphC", 40128, 2, Float32, "Power Factor Phase C value"),
    reg!("TotWhExp", 40130, 2, Float32, "Total Watt-hours Exported"),
    reg!("TotWhExpPhA", 40132, 2, Float32, "Total Watt-hours Exported phase A"),
    reg!("TotWhExpPhB", 40134, 2, Float32, "Total Watt-hours Exported phase B"),
    reg!("TotWhExpPhC", 40136, 2, Float32, "Total Watt-hours Exported phase C"),
    reg!("TotWhImp", 40138, 2, Float32, "Total Watt-hours Imported"),
    reg!("TotWhImpPhA", 40140, 2, Float32, "Total Watt-hours Imported phase A"),
    reg!("TotWhImpPhB", 40142, 2, Float32, "Total Watt-hours Imported phase B"),
    reg!("TotWhImpPhC", 40144, 2, Float32, "Total Watt-hours Imported phase C"),
    reg!("TotVAhExp", 40146, 2, Float32, "Total VA-hours Exported"),
    reg!("TotVAhExpPhA", 40148, 2, Float32, "Total VA-hours Exported phase A"),
    reg!("TotVAhExpPhB", 40150, 2, Float32, "Total VA-hours Exported phase B"),
    reg!("TotVAhExpPhC", 40152, 2, Float32, "Total VA-hours Exported phase C"),
    reg!("TotVAhImp", 40154, 2, Float32, "Total VA-hours Imported"),
    reg!("TotVAhImpPhA", 40156, 2, Float32, "Total VA-hours Imported phase A"),
    reg!("TotVAhImpPhB", 40158, 2, Float32, "Total VA-hours Imported phase B"),
    reg!("TotVAhImpPhC", 40160, 2, Float32, "Total VA-hours Imported phase C"),
    reg!("TotVArhImpQ1", 40162, 2, Float32, "Total VAR-hours Imported Q1"),
    reg!("TotVArhImpQ1phA", 40164, 2, Float32, "Total VAR-hours Imported Q1 phase A"),
    reg!("TotVArhImpQ1phB", 40166, 2, Float32, "Total VAR-hours Imported Q1 phase B"),
    reg!("TotVArhImpQ1phC", 40168, 2, Float32, "Total VAR-hours Imported Q1 phase C"),
    reg!("TotVArhImpQ2", 40170, 2, Float32, "Total VAR-hours Imported Q2"),
    reg!("TotVArhImpQ2phA", 40172, 2, Float32, "Total VAR-hours Imported Q2 phase A"),
    reg!("TotVArhImpQ2phB", 40174, 2, Float32, "Total VAR-hours Imported Q2 phase B"),
    reg!("TotVArhImpQ2phC", 40176, 2, Float32, "Total VAR-hours Imported Q2 phase C"),
    reg!("TotVArhExpQ3", 40178, 2, Float32, "Total VAR-hours Exported Q3"),
    reg!("TotVArhExpQ3phA", 40180, 2, Float32, "Total VAR-hours Exported Q3 phase A"),
    reg!("TotVArhExpQ3phB", 40182, 2, Float32, "Total VAR-hours Exported Q3 phase B"),
    reg!("TotVArhExpQ3phC", 40184, 2, Float32, "Total VAR-hours Exported Q3 phase C"),
    reg!("TotVArhExpQ4", 40186, 2, Float32, "Total VAR-hours Exported Q4"),
    reg!("TotVArhExpQ4phA", 40188, 2, Float32, "Total VAR-hours Exported Q4 phase A"),
    reg!("TotVArhExpQ4phB", 40190, 2, Float32, "Total VAR-hours Exported Q4 phase B"),
    reg!("TotVArhExpQ4phC", 40192, 2, Float32, "Total VAR-hours Exported Q4 phase C"),
    reg!("Evt", 40194, 2, Bitfield32, "Events"),
    // End of map
    reg!("EndID", 40196, 1, Uint16, "End block marker, always 0xFFFF"),
    reg!("EndL", 40197, 1, Uint16, "Length of end block"),
];

#[derive(Debug)]
pub struct RegisterCatalog {
    by_name: HashMap<&'static str, &'static RegisterEntry>,
}

impl RegisterCatalog {
    fn build(entries: &'static [RegisterEntry]) -> Self {
        Self {
            by_name: entries.iter().map(|entry| (entry.name, entry)).collect(),
        }
    }

    /// The process-wide SunSpec meter catalog
    pub fn sunspec_meter() -> &'static RegisterCatalog {
        static CATALOG: OnceLock<RegisterCatalog> = OnceLock::new();
        CATALOG.get_or_init(|| Self::build(SUNSPEC_METER_REGISTERS))
    }

    pub fn get(&self, name: &str) -> Option<&'static RegisterEntry> {
        self.by_name.get(name).copied()
    }

    pub fn lookup(&self, name: &str) -> Result<&'static RegisterEntry> {
        self.get(name)
            .ok_or_else(|| GatewayError::not_found(name))
    }

    /// All entries in register order
    pub fn entries(&self) -> &'static [RegisterEntry] {
        SUNSPEC_METER_REGISTERS
    }
}
