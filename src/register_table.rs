//! The register image served to Modbus clients and the table that shares it
//! between the poll loop and the server.
//!
//! The table is a copy-on-write double buffer: writers build a complete new
//! image and swap the `Arc` under a short write lock; readers clone the `Arc`
//! and copy words out of an image nobody can modify anymore.

use crate::error::{GatewayError, Result};
use crate::register_catalog::REGISTER_IMAGE_LEN;
use std::sync::{Arc, PoisonError, RwLock};

/// One complete snapshot of the SunSpec register space, indexed by offset
/// from the SunSpec base address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterImage {
    words: [u16; REGISTER_IMAGE_LEN],
}

impl Default for RegisterImage {
    fn default() -> Self {
        Self {
            words: [0; REGISTER_IMAGE_LEN],
        }
    }
}

impl RegisterImage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn words(&self) -> &[u16] {
        &self.words
    }

    pub fn word(&self, offset: usize) -> Option<u16> {
        self.words.get(offset).copied()
    }

    pub fn read(&self, offset: usize, count: usize) -> Result<&[u16]> {
        let end = offset
            .checked_add(count)
            .filter(|end| *end <= self.words.len())
            .ok_or(GatewayError::OutOfRange { offset, count })?;
        Ok(&self.words[offset..end])
    }

    pub fn write(&mut self, offset: usize, values: &[u16]) -> Result<()> {
        let count = values.len();
        let end = offset
            .checked_add(count)
            .filter(|end| *end <= self.words.len())
            .ok_or(GatewayError::OutOfRange { offset, count })?;
        self.words[offset..end].copy_from_slice(values);
        Ok(())
    }
}

/// Register image shared between the poll loop (writer) and the Modbus
/// server (readers). Cloning shares the same underlying table.
#[derive(Debug, Clone)]
pub struct SharedRegisterTable {
    current: Arc<RwLock<Arc<RegisterImage>>>,
}

impl SharedRegisterTable {
    pub fn new(initial: RegisterImage) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(initial))),
        }
    }

    /// The currently published image. It stays valid and unchanged however
    /// many publishes happen afterwards.
    pub fn snapshot(&self) -> Arc<RegisterImage> {
        let guard = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    pub fn read(&self, offset: usize, count: usize) -> Result<Vec<u16>> {
        let image = self.snapshot();
        Ok(image.read(offset, count)?.to_vec())
    }

    /// Replaces `values.len()` words starting at `offset` in one step.
    pub fn write(&self, offset: usize, values: &[u16]) -> Result<()> {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = RegisterImage::clone(&guard);
        next.write(offset, values)?;
        *guard = Arc::new(next);
        Ok(())
    }

    /// Makes `image` the published snapshot.
    pub fn publish(&self, image: RegisterImage) {
        let next = Arc::new(image);
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        *guard = next;
    }
}
