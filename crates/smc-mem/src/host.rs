//! # Host Buffers
//!
//! Caller-owned host memory that device regions are bound to.

use std::sync::Arc;

use bytemuck::Pod;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use smc_core::{ByteSize, Error, Result};

// =============================================================================
// ELEMENT
// =============================================================================

/// Plain-old-data element that can live in host and device memory
pub trait Element: Pod + Send + Sync + 'static {}

impl<T: Pod + Send + Sync + 'static> Element for T {}

// =============================================================================
// HOST BUFFER
// =============================================================================

/// Shared, lock-protected host allocation
///
/// Clones refer to the same allocation. A submission keeps a clone alive
/// until its transfer-out step has written results back.
pub struct HostBuffer<T: Element> {
    data: Arc<RwLock<Vec<T>>>,
}

impl<T: Element> HostBuffer<T> {
    /// Wrap an existing vector
    pub fn from_vec(data: Vec<T>) -> Self {
        Self {
            data: Arc::new(RwLock::new(data)),
        }
    }

    /// Allocate `len` zeroed elements
    pub fn zeroed(len: usize) -> Self {
        Self::from_vec(vec![T::zeroed(); len])
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Size in bytes
    pub fn size(&self) -> ByteSize {
        ByteSize::of::<T>(self.len())
    }

    /// Shared access to the elements
    pub fn read(&self) -> RwLockReadGuard<'_, Vec<T>> {
        self.data.read()
    }

    /// Exclusive access to the elements
    ///
    /// Mutating a buffer that an unresolved submission refers to yields an
    /// unspecified result.
    pub fn write(&self) -> RwLockWriteGuard<'_, Vec<T>> {
        self.data.write()
    }

    /// Copy the current contents out
    pub fn to_vec(&self) -> Vec<T> {
        self.data.read().clone()
    }

    /// Whether both handles refer to the same allocation
    pub fn same_buffer(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }
}

impl<T: Element> Clone for HostBuffer<T> {
    fn clone(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
        }
    }
}

impl<T: Element> core::fmt::Debug for HostBuffer<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HostBuffer")
            .field("element", &core::any::type_name::<T>())
            .field("len", &self.len())
            .finish()
    }
}

// =============================================================================
// TYPE-ERASED ACCESS
// =============================================================================

/// Byte-level access to a host allocation, independent of element type
pub trait HostMemory: Send + Sync {
    /// Length in bytes
    fn byte_len(&self) -> usize;

    /// Copy `dst.len()` bytes starting at `offset` out of host memory
    fn read_bytes(&self, offset: usize, dst: &mut [u8]) -> Result<()>;

    /// Copy `src` into host memory starting at `offset`
    fn write_bytes(&self, offset: usize, src: &[u8]) -> Result<()>;
}

fn checked_span(offset: usize, len: usize, limit: usize) -> Result<core::ops::Range<usize>> {
    match offset.checked_add(len) {
        Some(end) if end <= limit => Ok(offset..end),
        _ => Err(Error::InvalidRegion),
    }
}

impl<T: Element> HostMemory for HostBuffer<T> {
    fn byte_len(&self) -> usize {
        self.len() * core::mem::size_of::<T>()
    }

    fn read_bytes(&self, offset: usize, dst: &mut [u8]) -> Result<()> {
        let data = self.data.read();
        let bytes: &[u8] = bytemuck::cast_slice(data.as_slice());
        let span = checked_span(offset, dst.len(), bytes.len())?;
        dst.copy_from_slice(&bytes[span]);
        Ok(())
    }

    fn write_bytes(&self, offset: usize, src: &[u8]) -> Result<()> {
        let mut data = self.data.write();
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(data.as_mut_slice());
        let span = checked_span(offset, src.len(), bytes.len())?;
        bytes[span].copy_from_slice(src);
        Ok(())
    }
}
