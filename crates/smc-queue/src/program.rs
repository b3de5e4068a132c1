//! # Programs
//!
//! Opaque program images, building them on a device, and selecting the
//! first device that accepts an image.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use smc_core::{ByteSize, Error, ProgramFault, Result};

use crate::context::Context;
use crate::device::{Device, Platform};

// =============================================================================
// PROGRAM IMAGE
// =============================================================================

/// Pre-built program image; never parsed
#[derive(Clone)]
pub struct ProgramImage {
    bytes: Arc<[u8]>,
    source: Option<PathBuf>,
}

impl ProgramImage {
    /// Wrap in-memory bytes
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into().into(),
            source: None,
        }
    }

    /// Read an image from storage
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| {
            log::warn!("failed to read program image {}: {}", path.display(), e);
            Error::InvalidProgram(ProgramFault::Unreadable)
        })?;
        log::debug!("loaded program image {} ({} bytes)", path.display(), bytes.len());
        Ok(Self {
            bytes: bytes.into(),
            source: Some(path.to_path_buf()),
        })
    }

    /// Image bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Image size
    pub fn size(&self) -> ByteSize {
        ByteSize::from_bytes(self.bytes.len() as u64)
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// File the image was read from
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }
}

impl core::fmt::Debug for ProgramImage {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ProgramImage")
            .field("size", &self.size())
            .field("source", &self.source)
            .finish()
    }
}

// =============================================================================
// PROGRAM
// =============================================================================

/// Program image loaded on a context's device
#[derive(Debug, Clone)]
pub struct Program {
    context: Context,
    image: ProgramImage,
}

impl Program {
    /// Load `image` on the context's device
    pub fn build(context: &Context, image: &ProgramImage) -> Result<Self> {
        if image.is_empty() {
            return Err(ProgramFault::EmptyImage.into());
        }
        let device = context.device();
        if !device.accepts_programs() {
            return Err(ProgramFault::Rejected.into());
        }
        log::debug!("program ({}) built on device {}", image.size(), device.id());
        Ok(Self {
            context: context.clone(),
            image: image.clone(),
        })
    }

    /// Get context
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Get device
    pub fn device(&self) -> &Device {
        self.context.device()
    }

    /// Get image
    pub fn image(&self) -> &ProgramImage {
        &self.image
    }
}

// =============================================================================
// DEVICE SELECTION
// =============================================================================

/// Device on which a program image loaded
#[derive(Debug, Clone)]
pub struct SelectedDevice {
    /// Position in platform enumeration order
    pub index: usize,
    /// Device
    pub device: Device,
    /// Context on the device
    pub context: Context,
    /// Built program
    pub program: Program,
}

/// Try each platform device in order and return the first that loads `image`
pub fn select_device(platform: &Platform, image: &ProgramImage) -> Result<SelectedDevice> {
    for (index, device) in platform.devices().iter().enumerate() {
        log::info!("Trying to program device[{}]: {}", index, device.name());
        let context = Context::new(device);
        match Program::build(&context, image) {
            Ok(program) => {
                log::info!("Device[{}]: program successful!", index);
                return Ok(SelectedDevice {
                    index,
                    device: device.clone(),
                    context,
                    program,
                });
            }
            Err(e) => log::warn!("Failed to program device[{}] with image: {}", index, e),
        }
    }
    log::error!("Failed to program any device on platform '{}'", platform.name());
    Err(Error::NoUsableDevice)
}
