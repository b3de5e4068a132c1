//! # Kernels
//!
//! Work units, their parameter signatures, and argument binding.
//!
//! ```text
//! Program ──► Kernel::new(name) ──► launch() ──► set_arg(i, v)* ──► finalize()
//!                                                                     │
//!                                                              Invocation (queued)
//! ```

use std::sync::Arc;

use smc_core::{Error, Result};
use smc_mem::DeviceRegion;

use crate::program::Program;

// =============================================================================
// ARGUMENTS
// =============================================================================

/// Parameter type in a work unit's signature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgKind {
    /// Device memory region
    Region,
    /// 32-bit unsigned scalar
    U32,
    /// 32-bit signed scalar
    I32,
    /// 64-bit unsigned scalar
    U64,
    /// Double precision scalar
    F64,
}

/// Bound parameter value
#[derive(Debug, Clone)]
pub enum ArgValue {
    /// Device memory region
    Region(DeviceRegion),
    /// 32-bit unsigned scalar
    U32(u32),
    /// 32-bit signed scalar
    I32(i32),
    /// 64-bit unsigned scalar
    U64(u64),
    /// Double precision scalar
    F64(f64),
}

impl ArgValue {
    /// Kind of this value
    pub fn kind(&self) -> ArgKind {
        match self {
            Self::Region(_) => ArgKind::Region,
            Self::U32(_) => ArgKind::U32,
            Self::I32(_) => ArgKind::I32,
            Self::U64(_) => ArgKind::U64,
            Self::F64(_) => ArgKind::F64,
        }
    }
}

impl From<DeviceRegion> for ArgValue {
    fn from(r: DeviceRegion) -> Self {
        Self::Region(r)
    }
}

impl From<&DeviceRegion> for ArgValue {
    fn from(r: &DeviceRegion) -> Self {
        Self::Region(r.clone())
    }
}

impl From<u32> for ArgValue {
    fn from(v: u32) -> Self {
        Self::U32(v)
    }
}

impl From<i32> for ArgValue {
    fn from(v: i32) -> Self {
        Self::I32(v)
    }
}

impl From<u64> for ArgValue {
    fn from(v: u64) -> Self {
        Self::U64(v)
    }
}

impl From<f64> for ArgValue {
    fn from(v: f64) -> Self {
        Self::F64(v)
    }
}

/// Complete, type-checked argument list handed to a work unit
#[derive(Debug, Clone)]
pub struct KernelArgs {
    values: Vec<ArgValue>,
}

impl KernelArgs {
    fn get(&self, index: u32) -> Result<&ArgValue> {
        self.values
            .get(index as usize)
            .ok_or(Error::InvalidArgIndex(index))
    }

    /// Number of arguments
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Region argument at `index`
    pub fn region(&self, index: u32) -> Result<&DeviceRegion> {
        match self.get(index)? {
            ArgValue::Region(r) => Ok(r),
            _ => Err(Error::InvalidArgValue(index)),
        }
    }

    /// `u32` argument at `index`
    pub fn u32(&self, index: u32) -> Result<u32> {
        match self.get(index)? {
            ArgValue::U32(v) => Ok(*v),
            _ => Err(Error::InvalidArgValue(index)),
        }
    }

    /// `i32` argument at `index`
    pub fn i32(&self, index: u32) -> Result<i32> {
        match self.get(index)? {
            ArgValue::I32(v) => Ok(*v),
            _ => Err(Error::InvalidArgValue(index)),
        }
    }

    /// `u64` argument at `index`
    pub fn u64(&self, index: u32) -> Result<u64> {
        match self.get(index)? {
            ArgValue::U64(v) => Ok(*v),
            _ => Err(Error::InvalidArgValue(index)),
        }
    }

    /// `f64` argument at `index`
    pub fn f64(&self, index: u32) -> Result<f64> {
        match self.get(index)? {
            ArgValue::F64(v) => Ok(*v),
            _ => Err(Error::InvalidArgValue(index)),
        }
    }

    /// All region arguments in signature order
    pub fn regions(&self) -> impl Iterator<Item = &DeviceRegion> {
        self.values.iter().filter_map(|v| match v {
            ArgValue::Region(r) => Some(r),
            _ => None,
        })
    }
}

// =============================================================================
// WORK UNIT
// =============================================================================

/// Computation a device can execute
///
/// Implementations run on queue worker threads and report failures through
/// [`Error`]; the queue turns them into the operation's status code.
pub trait WorkUnit: Send + Sync {
    /// Name the unit is registered under
    fn name(&self) -> &str;

    /// Parameter signature
    fn signature(&self) -> &[ArgKind];

    /// Execute once with a complete argument list
    fn execute(&self, args: &KernelArgs) -> Result<()>;
}

// =============================================================================
// KERNEL
// =============================================================================

/// A work unit looked up in a built program
#[derive(Clone)]
pub struct Kernel {
    unit: Arc<dyn WorkUnit>,
}

impl Kernel {
    /// Look up `name` in `program`
    pub fn new(program: &Program, name: &str) -> Result<Self> {
        let unit = program.device().kernel(name).ok_or_else(|| {
            log::warn!("kernel '{}' not found on {}", name, program.device().name());
            Error::KernelNotFound
        })?;
        Ok(Self { unit })
    }

    /// Kernel name
    pub fn name(&self) -> &str {
        self.unit.name()
    }

    /// Parameter signature
    pub fn signature(&self) -> &[ArgKind] {
        self.unit.signature()
    }

    /// Start binding arguments for one launch
    pub fn launch(&self) -> Launch {
        Launch {
            unit: Arc::clone(&self.unit),
            args: vec![None; self.signature().len()],
        }
    }
}

impl core::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Kernel")
            .field("name", &self.name())
            .field("signature", &self.signature())
            .finish()
    }
}

/// Argument binding for one launch
pub struct Launch {
    unit: Arc<dyn WorkUnit>,
    args: Vec<Option<ArgValue>>,
}

impl Launch {
    /// Bind argument `index`
    pub fn set_arg(&mut self, index: u32, value: impl Into<ArgValue>) -> Result<()> {
        let value = value.into();
        let expected = *self
            .unit
            .signature()
            .get(index as usize)
            .ok_or(Error::InvalidArgIndex(index))?;
        if value.kind() != expected {
            return Err(Error::InvalidArgValue(index));
        }
        self.args[index as usize] = Some(value);
        Ok(())
    }

    /// Builder-style [`Launch::set_arg`]
    pub fn arg(mut self, index: u32, value: impl Into<ArgValue>) -> Result<Self> {
        self.set_arg(index, value)?;
        Ok(self)
    }

    /// Check every argument is bound
    pub fn validate(&self) -> Result<()> {
        match self.args.iter().position(Option::is_none) {
            Some(i) => Err(Error::UnboundArg(i as u32)),
            None => Ok(()),
        }
    }

    /// Freeze the bound arguments into a runnable invocation
    pub fn finalize(self) -> Result<Invocation> {
        self.validate()?;
        let values = self.args.into_iter().flatten().collect();
        Ok(Invocation {
            unit: self.unit,
            args: KernelArgs { values },
        })
    }
}

impl core::fmt::Debug for Launch {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Launch")
            .field("kernel", &self.unit.name())
            .field("args", &self.args)
            .finish()
    }
}

/// Work unit plus its complete arguments
pub struct Invocation {
    unit: Arc<dyn WorkUnit>,
    args: KernelArgs,
}

impl Invocation {
    /// Kernel name
    pub fn name(&self) -> &str {
        self.unit.name()
    }

    /// Bound arguments
    pub fn args(&self) -> &KernelArgs {
        &self.args
    }

    /// Execute on the calling thread
    pub fn run(&self) -> Result<()> {
        self.unit.execute(&self.args)
    }
}

impl core::fmt::Debug for Invocation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Invocation")
            .field("kernel", &self.unit.name())
            .field("args", &self.args.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::device::{Device, DeviceConfig};
    use crate::program::ProgramImage;
    use smc_mem::{HostBuffer, MemFlags};

    struct Scale;

    impl WorkUnit for Scale {
        fn name(&self) -> &str {
            "scale"
        }

        fn signature(&self) -> &[ArgKind] {
            &[ArgKind::Region, ArgKind::F64]
        }

        fn execute(&self, args: &KernelArgs) -> Result<()> {
            let factor = args.f64(1)?;
            let region = args.region(0)?;
            let len = region.len();
            for v in region.map_mut::<f64>(0..len)?.iter_mut() {
                *v *= factor;
            }
            Ok(())
        }
    }

    fn program() -> Program {
        let device = Device::new(DeviceConfig::default()).with_kernel(Arc::new(Scale));
        let context = Context::new(&device);
        Program::build(&context, &ProgramImage::from_bytes(vec![1u8])).unwrap()
    }

    #[test]
    fn test_kernel_lookup() {
        let program = program();
        assert_eq!(Kernel::new(&program, "scale").unwrap().name(), "scale");
        assert_eq!(Kernel::new(&program, "missing").unwrap_err(), Error::KernelNotFound);
    }

    #[test]
    fn test_binding_is_type_checked() {
        let kernel = Kernel::new(&program(), "scale").unwrap();
        let mut launch = kernel.launch();
        assert_eq!(launch.set_arg(2, 1.0f64), Err(Error::InvalidArgIndex(2)));
        assert_eq!(launch.set_arg(1, 3u32), Err(Error::InvalidArgValue(1)));
        launch.set_arg(1, 2.0f64).unwrap();
        assert_eq!(launch.validate(), Err(Error::UnboundArg(0)));
        assert_eq!(launch.finalize().unwrap_err(), Error::UnboundArg(0));
    }

    #[test]
    fn test_invocation_runs_work_unit() {
        let program = program();
        let kernel = Kernel::new(&program, "scale").unwrap();
        let host = HostBuffer::from_vec(vec![1.0f64, 2.0]);
        let region = program
            .context()
            .create_region(MemFlags::READ_WRITE | MemFlags::USE_HOST_PTR, &host, 0..2)
            .unwrap();

        let invocation = kernel
            .launch()
            .arg(0, &region)
            .and_then(|l| l.arg(1, 4.0f64))
            .and_then(Launch::finalize)
            .unwrap();
        assert_eq!(invocation.args().regions().count(), 1);
        invocation.run().unwrap();

        region.sync_to_host().unwrap();
        assert_eq!(host.to_vec(), vec![4.0, 8.0]);
    }
}
