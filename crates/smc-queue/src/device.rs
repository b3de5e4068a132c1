//! # Devices
//!
//! Emulated accelerator devices and the platform that enumerates them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::RwLock;
use smc_core::{ByteSize, DeviceId};
use smc_mem::MemoryTracker;

use crate::kernel::WorkUnit;

static NEXT_DEVICE_ID: AtomicU64 = AtomicU64::new(1);

// =============================================================================
// DEVICE CONFIGURATION
// =============================================================================

/// Emulated device configuration
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Device name
    pub name: String,
    /// Parallel compute units (queue workers)
    pub compute_units: usize,
    /// Global memory size
    pub global_mem: ByteSize,
    /// Whether program images load successfully
    pub accepts_programs: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: String::from("smc-emu"),
            compute_units: 2,
            global_mem: ByteSize::from_gib(4),
            accepts_programs: true,
        }
    }
}

impl DeviceConfig {
    /// Set name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set compute units (at least one)
    pub fn with_compute_units(mut self, units: usize) -> Self {
        self.compute_units = units.max(1);
        self
    }

    /// Set global memory size
    pub fn with_global_mem(mut self, size: ByteSize) -> Self {
        self.global_mem = size;
        self
    }

    /// Make program loading fail on this device
    pub fn rejecting_programs(mut self) -> Self {
        self.accepts_programs = false;
        self
    }
}

// =============================================================================
// DEVICE
// =============================================================================

struct DeviceInner {
    id: DeviceId,
    config: DeviceConfig,
    kernels: RwLock<HashMap<String, Arc<dyn WorkUnit>>>,
    memory: MemoryTracker,
}

/// Emulated accelerator device
///
/// Cloning shares the same device.
#[derive(Clone)]
pub struct Device {
    inner: Arc<DeviceInner>,
}

impl Device {
    /// Create a device
    pub fn new(config: DeviceConfig) -> Self {
        let id = DeviceId::new(NEXT_DEVICE_ID.fetch_add(1, Ordering::Relaxed));
        let memory = MemoryTracker::new(config.global_mem);
        log::debug!(
            "device {} '{}': {} compute units, {}",
            id,
            config.name,
            config.compute_units,
            config.global_mem
        );
        Self {
            inner: Arc::new(DeviceInner {
                id,
                config,
                kernels: RwLock::new(HashMap::new()),
                memory,
            }),
        }
    }

    /// Register a work unit under its name, replacing any previous one
    pub fn register_kernel(&self, unit: Arc<dyn WorkUnit>) {
        let name = unit.name().to_owned();
        if self.inner.kernels.write().insert(name.clone(), unit).is_some() {
            log::debug!("device {}: kernel '{}' replaced", self.inner.id, name);
        }
    }

    /// Builder-style [`Device::register_kernel`]
    pub fn with_kernel(self, unit: Arc<dyn WorkUnit>) -> Self {
        self.register_kernel(unit);
        self
    }

    /// Look up a registered work unit
    pub fn kernel(&self, name: &str) -> Option<Arc<dyn WorkUnit>> {
        self.inner.kernels.read().get(name).cloned()
    }

    /// Names of registered work units
    pub fn kernel_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.inner.kernels.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Get device ID
    pub fn id(&self) -> DeviceId {
        self.inner.id
    }

    /// Get name
    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    /// Number of compute units
    pub fn compute_units(&self) -> usize {
        self.inner.config.compute_units
    }

    /// Global memory size
    pub fn global_mem(&self) -> ByteSize {
        self.inner.config.global_mem
    }

    /// Whether program images load on this device
    pub fn accepts_programs(&self) -> bool {
        self.inner.config.accepts_programs
    }

    /// Device memory accounting
    pub fn memory(&self) -> &MemoryTracker {
        &self.inner.memory
    }
}

impl core::fmt::Debug for Device {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.inner.id)
            .field("name", &self.inner.config.name)
            .field("compute_units", &self.inner.config.compute_units)
            .finish()
    }
}

// =============================================================================
// PLATFORM
// =============================================================================

/// Ordered collection of devices
#[derive(Debug, Clone)]
pub struct Platform {
    name: String,
    devices: Vec<Device>,
}

impl Platform {
    /// Create an empty platform
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            devices: Vec::new(),
        }
    }

    /// Append a device
    pub fn add_device(&mut self, device: Device) {
        self.devices.push(device);
    }

    /// Builder-style [`Platform::add_device`]
    pub fn with_device(mut self, device: Device) -> Self {
        self.add_device(device);
        self
    }

    /// Devices in enumeration order
    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    /// Get name
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::{ArgKind, KernelArgs};
    use smc_core::Result;

    struct Noop(&'static str);

    impl WorkUnit for Noop {
        fn name(&self) -> &str {
            self.0
        }

        fn signature(&self) -> &[ArgKind] {
            &[]
        }

        fn execute(&self, _args: &KernelArgs) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_device_config() {
        let config = DeviceConfig::default()
            .with_name("u250")
            .with_compute_units(0)
            .with_global_mem(ByteSize::from_mib(64))
            .rejecting_programs();
        let device = Device::new(config);
        assert_eq!(device.name(), "u250");
        assert_eq!(device.compute_units(), 1);
        assert_eq!(device.memory().capacity(), ByteSize::from_mib(64));
        assert!(!device.accepts_programs());
    }

    #[test]
    fn test_kernel_registry() {
        let device = Device::new(DeviceConfig::default())
            .with_kernel(Arc::new(Noop("b")))
            .with_kernel(Arc::new(Noop("a")));
        assert!(device.kernel("a").is_some());
        assert!(device.kernel("c").is_none());
        assert_eq!(device.kernel_names(), vec!["a".to_owned(), "b".to_owned()]);
    }

    #[test]
    fn test_device_ids_unique() {
        let a = Device::new(DeviceConfig::default());
        let b = Device::new(DeviceConfig::default());
        assert_ne!(a.id(), b.id());

        let platform = Platform::new("emu").with_device(a.clone()).with_device(b);
        assert_eq!(platform.devices().len(), 2);
        assert_eq!(platform.devices()[0].id(), a.id());
    }
}
