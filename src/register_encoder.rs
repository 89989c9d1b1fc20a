//! Turns named SunSpec values into register words.
//!
//! 32-bit values are written most significant word first, so register
//! `address` holds bits 31-16 and `address + 1` holds bits 15-0.

use crate::config::IdentityConfig;
use crate::error::{GatewayError, Result};
use crate::register_catalog::{RegisterCatalog, RegisterEntry, RegisterType};
use crate::register_table::RegisterImage;
use crate::semantic_mapper::SunSpecValues;

/// "SunS"
const SUNSPEC_ID: u32 = 0x5375_6e53;
const COMMON_MODEL_ID: u16 = 1;
const COMMON_MODEL_LENGTH: u16 = 65;
/// Three-phase wye meter, float registers
const METER_MODEL_ID: u16 = 213;
const METER_MODEL_LENGTH: u16 = 124;
const END_MODEL_ID: u16 = 0xFFFF;

/// Result of encoding one cycle's values
#[derive(Debug)]
pub struct Encoded {
    pub image: RegisterImage,
    /// Values that could not be encoded; their registers keep the base value
    pub rejected: Vec<GatewayError>,
}

pub fn f32_to_registers(value: f32) -> [u16; 2] {
    let bits = value.to_bits();
    [(bits >> 16) as u16, (bits & 0xFFFF) as u16]
}

pub fn registers_to_f32(high: u16, low: u16) -> f32 {
    f32::from_bits(((high as u32) << 16) | low as u32)
}

fn u32_to_registers(value: u32) -> [u16; 2] {
    [(value >> 16) as u16, (value & 0xFFFF) as u16]
}

/// Writes every value that has a catalog entry on top of `base`.
/// Names the catalog does not know are skipped.
pub fn encode(values: &SunSpecValues, catalog: &RegisterCatalog, base: &RegisterImage) -> Encoded {
    let mut image = base.clone();
    let mut rejected = Vec::new();

    for (name, value) in values {
        let Some(entry) = catalog.get(name) else {
            continue;
        };
        let written = encode_value(entry, *value).and_then(|words| image.write(entry.offset(), &words));
        if let Err(err) = written {
            rejected.push(err);
        }
    }

    Encoded { image, rejected }
}

fn encode_value(entry: &RegisterEntry, value: f64) -> Result<Vec<u16>> {
    if !value.is_finite() {
        return Err(GatewayError::encoding(entry.name, format!("{value} is not finite")));
    }
    match entry.kind {
        RegisterType::Float32 => {
            let narrowed = value as f32;
            if !narrowed.is_finite() {
                return Err(GatewayError::encoding(entry.name, format!("{value} overflows f32")));
            }
            Ok(f32_to_registers(narrowed).to_vec())
        }
        RegisterType::Uint16 => {
            let integer = integral_in_range(entry, value, u16::MAX as f64)?;
            Ok(vec![integer as u16])
        }
        RegisterType::Uint32 | RegisterType::Bitfield32 => {
            let integer = integral_in_range(entry, value, u32::MAX as f64)?;
            Ok(u32_to_registers(integer as u32).to_vec())
        }
        RegisterType::String => Err(GatewayError::encoding(
            entry.name,
            "string registers only hold identification data",
        )),
    }
}

fn integral_in_range(entry: &RegisterEntry, value: f64, max: f64) -> Result<f64> {
    if value.fract() != 0.0 || value < 0.0 || value > max {
        return Err(GatewayError::encoding(
            entry.name,
            format!("{value} is not an integer in 0..={max}"),
        ));
    }
    Ok(value)
}

/// The static part of the register map: SunSpec marker, Common model,
/// Meter model header and end marker. Measurements start out as zero.
pub fn identification_image(identity: &IdentityConfig) -> Result<RegisterImage> {
    let catalog = RegisterCatalog::sunspec_meter();
    let mut image = RegisterImage::new();

    put_words(&mut image, catalog, "SID", &u32_to_registers(SUNSPEC_ID))?;
    put_words(&mut image, catalog, "ID", &[COMMON_MODEL_ID])?;
    put_words(&mut image, catalog, "L", &[COMMON_MODEL_LENGTH])?;
    put_string(&mut image, catalog, "Mn", &identity.manufacturer)?;
    put_string(&mut image, catalog, "Md", &identity.model)?;
    put_string(&mut image, catalog, "Opt", &identity.options)?;
    put_string(&mut image, catalog, "Vr", &identity.version)?;
    put_string(&mut image, catalog, "SN", &identity.serial_number)?;
    put_words(&mut image, catalog, "DA", &[identity.device_address])?;
    put_words(&mut image, catalog, "MeterID", &[METER_MODEL_ID])?;
    put_words(&mut image, catalog, "MeterL", &[METER_MODEL_LENGTH])?;
    put_words(&mut image, catalog, "EndID", &[END_MODEL_ID])?;
    put_words(&mut image, catalog, "EndL", &[0])?;

    Ok(image)
}

fn put_words(image: &mut RegisterImage, catalog: &RegisterCatalog, name: &str, words: &[u16]) -> Result<()> {
    let entry = catalog.lookup(name)?;
    if words.len() != entry.length as usize {
        return Err(GatewayError::encoding(
            name,
            format!("expected {} words, got {}", entry.length, words.len()),
        ));
    }
    image.write(entry.offset(), words)
}

/// Fronius inverters read these strings one character per register, zero
/// padded, rather than two characters packed into each word.
fn put_string(image: &mut RegisterImage, catalog: &RegisterCatalog, name: &str, text: &str) -> Result<()> {
    let entry = catalog.lookup(name)?;
    if !text.is_ascii() {
        return Err(GatewayError::encoding(name, format!("`{text}` is not ASCII")));
    }
    if text.len() > entry.length as usize {
        return Err(GatewayError::encoding(
            name,
            format!("`{text}` is longer than {} characters", entry.length),
        ));
    }
    let mut words = vec![0u16; entry.length as usize];
    for (word, byte) in words.iter_mut().zip(text.bytes()) {
        *word = byte as u16;
    }
    image.write(entry.offset(), &words)
}
