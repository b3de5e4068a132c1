//! # Context
//!
//! Execution context binding programs, regions and queues to one device.

use core::ops::Range;

use smc_core::Result;
use smc_mem::{DeviceRegion, Element, HostBuffer, MemFlags};

use crate::device::Device;

/// Runtime context on a single device
#[derive(Debug, Clone)]
pub struct Context {
    device: Device,
}

impl Context {
    /// Create a context on `device`
    pub fn new(device: &Device) -> Self {
        Self {
            device: device.clone(),
        }
    }

    /// Get device
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Create a region on this context's device bound to `elements` of `host`
    pub fn create_region<T: Element>(
        &self,
        flags: MemFlags,
        host: &HostBuffer<T>,
        elements: Range<usize>,
    ) -> Result<DeviceRegion> {
        DeviceRegion::from_host(self.device.memory(), flags, host, elements)
    }
}
