//! Decodes register words read back from a SunSpec meter, for diagnostics.

use crate::error::{GatewayError, Result};
use crate::register_catalog::{RegisterEntry, RegisterType};
use crate::register_encoder::registers_to_f32;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum RegisterValue {
    Uint16(u16),
    Uint32(u32),
    Float32(f32),
    Bitfield32(u32),
    Text(String),
}

impl RegisterValue {
    /// Interprets `words` as the value of `entry`.
    pub fn decode(entry: &RegisterEntry, words: &[u16]) -> Result<Self> {
        if words.len() != entry.length as usize {
            return Err(GatewayError::encoding(
                entry.name,
                format!("expected {} words, got {}", entry.length, words.len()),
            ));
        }
        let value = match (entry.kind, words) {
            (RegisterType::Uint16, [word]) => RegisterValue::Uint16(*word),
            (RegisterType::Uint32, [high, low]) => RegisterValue::Uint32(join(*high, *low)),
            (RegisterType::Bitfield32, [high, low]) => {
                RegisterValue::Bitfield32(join(*high, *low))
            }
            (RegisterType::Float32, [high, low]) => {
                RegisterValue::Float32(registers_to_f32(*high, *low))
            }
            (RegisterType::String, _) => RegisterValue::Text(decode_text(words)),
            (kind, _) => {
                return Err(GatewayError::encoding(
                    entry.name,
                    format!("{kind:?} cannot span {} words", words.len()),
                ))
            }
        };
        Ok(value)
    }
}

impl fmt::Display for RegisterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegisterValue::Uint16(value) => write!(f, "{value}"),
            RegisterValue::Uint32(value) => write!(f, "{value}"),
            RegisterValue::Float32(value) => write!(f, "{value}"),
            RegisterValue::Bitfield32(bits) => {
                let set: Vec<String> = (0..32)
                    .filter(|bit| bits & (1 << bit) != 0)
                    .map(|bit| bit.to_string())
                    .collect();
                write!(f, "{bits:#010x} [{}]", set.join(", "))
            }
            RegisterValue::Text(text) => write!(f, "{text:?}"),
        }
    }
}

fn join(high: u16, low: u16) -> u32 {
    (u32::from(high) << 16) | u32::from(low)
}

/// Reads both bytes of every word, skipping NULs. Handles packed strings as
/// well as the one-character-per-register layout Fronius inverters expect.
fn decode_text(words: &[u16]) -> String {
    words
        .iter()
        .flat_map(|word| word.to_be_bytes())
        .filter(|byte| *byte != 0)
        .map(char::from)
        .collect()
}
