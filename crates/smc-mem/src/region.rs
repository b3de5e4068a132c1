//! # Device Regions
//!
//! Device-visible memory bound to a range of a host buffer.
//!
//! A region holds its own copy of the bytes. Work units write through typed
//! mutable views, which record the touched span; [`DeviceRegion::sync_to_host`]
//! copies exactly that span back into the host buffer.

use core::any::TypeId;
use core::marker::PhantomData;
use core::ops::{Deref, DerefMut, Range};
use std::sync::Arc;

use bitflags::bitflags;
use parking_lot::{Mutex, MutexGuard};
use smc_core::{ByteSize, Error, Result};

use crate::host::{Element, HostBuffer, HostMemory};
use crate::tracker::{Allocation, MemoryTracker};

// =============================================================================
// FLAGS
// =============================================================================

bitflags! {
    /// Region access and host-binding flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MemFlags: u32 {
        /// Work units may read and write
        const READ_WRITE = 1 << 0;
        /// Work units only write
        const WRITE_ONLY = 1 << 1;
        /// Work units only read
        const READ_ONLY = 1 << 2;
        /// Region is backed by the host buffer it was created from
        const USE_HOST_PTR = 1 << 3;
        /// Region is allocated in host-accessible memory
        const ALLOC_HOST_PTR = 1 << 4;
        /// Region is initialised with a copy of the host buffer
        const COPY_HOST_PTR = 1 << 5;
    }
}

impl MemFlags {
    fn validate(self) -> Result<()> {
        let access = self & (Self::READ_WRITE | Self::WRITE_ONLY | Self::READ_ONLY);
        if access.bits().count_ones() > 1 {
            return Err(Error::InvalidRegion);
        }
        if self.contains(Self::USE_HOST_PTR)
            && self.intersects(Self::ALLOC_HOST_PTR | Self::COPY_HOST_PTR)
        {
            return Err(Error::InvalidRegion);
        }
        Ok(())
    }

    /// Whether the region starts with the host buffer's contents
    pub fn copies_host(self) -> bool {
        self.intersects(Self::USE_HOST_PTR | Self::COPY_HOST_PTR)
    }

    /// Whether work units may write the region
    pub fn writable(self) -> bool {
        !self.contains(Self::READ_ONLY)
    }
}

// =============================================================================
// STORAGE
// =============================================================================

// Backing store is kept in u64 words so typed views of any element up to
// eight-byte alignment start on an aligned address.
static_assertions::const_assert!(core::mem::align_of::<u64>() >= core::mem::align_of::<f64>());

#[derive(Debug)]
struct RegionStorage {
    words: Vec<u64>,
    /// Written byte span not yet copied back
    dirty: Option<Range<usize>>,
}

impl RegionStorage {
    fn zeroed(byte_len: usize) -> Self {
        Self {
            words: vec![0; byte_len.div_ceil(8)],
            dirty: None,
        }
    }

    fn bytes(&self, byte_len: usize) -> &[u8] {
        &bytemuck::cast_slice::<u64, u8>(&self.words)[..byte_len]
    }

    fn bytes_mut(&mut self, byte_len: usize) -> &mut [u8] {
        &mut bytemuck::cast_slice_mut::<u64, u8>(&mut self.words)[..byte_len]
    }

    fn mark_dirty(&mut self, span: Range<usize>) {
        self.dirty = Some(match self.dirty.take() {
            Some(d) => d.start.min(span.start)..d.end.max(span.end),
            None => span,
        });
    }
}

// =============================================================================
// DEVICE REGION
// =============================================================================

struct RegionInner {
    flags: MemFlags,
    element: TypeId,
    element_size: usize,
    len: usize,
    host: Arc<dyn HostMemory>,
    host_offset: usize,
    storage: Mutex<RegionStorage>,
    allocation: Allocation,
}

impl RegionInner {
    fn byte_len(&self) -> usize {
        self.len * self.element_size
    }
}

/// Device-visible memory region
///
/// Cloning shares the same region. Device memory is released when the last
/// clone drops.
#[derive(Clone)]
pub struct DeviceRegion {
    inner: Arc<RegionInner>,
}

impl DeviceRegion {
    /// Bind a region to `elements` of `host`
    ///
    /// The device memory is charged to `tracker`. With `USE_HOST_PTR` or
    /// `COPY_HOST_PTR` the region starts with the host contents, otherwise
    /// it starts zeroed.
    pub fn from_host<T: Element>(
        tracker: &MemoryTracker,
        flags: MemFlags,
        host: &HostBuffer<T>,
        elements: Range<usize>,
    ) -> Result<Self> {
        flags.validate()?;
        if elements.start >= elements.end || elements.end > host.len() {
            return Err(Error::InvalidRegion);
        }

        let element_size = core::mem::size_of::<T>();
        let len = elements.end - elements.start;
        let byte_len = len * element_size;
        let host_offset = elements.start * element_size;

        let allocation = tracker.allocate(ByteSize::from_bytes(byte_len as u64))?;

        let mut storage = RegionStorage::zeroed(byte_len);
        if flags.copies_host() {
            host.read_bytes(host_offset, storage.bytes_mut(byte_len))?;
        }

        log::trace!(
            "region {} bound: {} x {} at element {} ({:?})",
            allocation.id(),
            len,
            core::any::type_name::<T>(),
            elements.start,
            flags
        );

        Ok(Self {
            inner: Arc::new(RegionInner {
                flags,
                element: TypeId::of::<T>(),
                element_size,
                len,
                host: Arc::new(host.clone()),
                host_offset,
                storage: Mutex::new(storage),
                allocation,
            }),
        })
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.inner.len
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.inner.len == 0
    }

    /// Device memory held
    pub fn size(&self) -> ByteSize {
        self.inner.allocation.size()
    }

    /// Get flags
    pub fn flags(&self) -> MemFlags {
        self.inner.flags
    }

    /// Whether both handles refer to the same region
    pub fn same_region(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Element span written since the last host synchronisation
    pub fn dirty_elements(&self) -> Option<Range<usize>> {
        let size = self.inner.element_size;
        self.inner
            .storage
            .lock()
            .dirty
            .as_ref()
            .map(|span| span.start / size..span.end / size)
    }

    fn check_type<T: Element>(&self) -> Result<()> {
        if TypeId::of::<T>() == self.inner.element {
            Ok(())
        } else {
            Err(Error::InvalidRegion)
        }
    }

    /// Typed read view of the whole region
    ///
    /// The view holds the region lock; mapping the same region again on the
    /// same thread while a view is alive blocks.
    pub fn map<T: Element>(&self) -> Result<RegionView<'_, T>> {
        self.check_type::<T>()?;
        Ok(RegionView {
            guard: self.inner.storage.lock(),
            byte_len: self.inner.byte_len(),
            _marker: PhantomData,
        })
    }

    /// Typed write view of `elements`, recorded as dirty
    pub fn map_mut<T: Element>(&self, elements: Range<usize>) -> Result<RegionViewMut<'_, T>> {
        self.check_type::<T>()?;
        if !self.inner.flags.writable()
            || elements.start > elements.end
            || elements.end > self.inner.len
        {
            return Err(Error::InvalidRegion);
        }

        let size = self.inner.element_size;
        let span = elements.start * size..elements.end * size;
        let mut guard = self.inner.storage.lock();
        if !span.is_empty() {
            guard.mark_dirty(span.clone());
        }

        Ok(RegionViewMut {
            guard,
            byte_len: self.inner.byte_len(),
            span,
            _marker: PhantomData,
        })
    }

    /// Copy the dirty span back into the host buffer
    ///
    /// Returns the number of bytes transferred.
    pub fn sync_to_host(&self) -> Result<ByteSize> {
        let byte_len = self.inner.byte_len();
        let mut storage = self.inner.storage.lock();
        let Some(span) = storage.dirty.take() else {
            return Ok(ByteSize::ZERO);
        };

        let bytes = &storage.bytes(byte_len)[span.clone()];
        if let Err(e) = self.inner.host.write_bytes(self.inner.host_offset + span.start, bytes) {
            storage.dirty = Some(span);
            return Err(e);
        }
        Ok(ByteSize::from_bytes(span.len() as u64))
    }

    /// Reload the region from the host buffer, discarding unsynchronised
    /// writes
    pub fn sync_from_host(&self) -> Result<()> {
        let byte_len = self.inner.byte_len();
        let mut storage = self.inner.storage.lock();
        self.inner
            .host
            .read_bytes(self.inner.host_offset, storage.bytes_mut(byte_len))?;
        storage.dirty = None;
        Ok(())
    }
}

impl core::fmt::Debug for DeviceRegion {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DeviceRegion")
            .field("allocation", &self.inner.allocation.id())
            .field("len", &self.inner.len)
            .field("flags", &self.inner.flags)
            .finish()
    }
}

// =============================================================================
// VIEWS
// =============================================================================

/// Typed read view of a region
pub struct RegionView<'a, T: Element> {
    guard: MutexGuard<'a, RegionStorage>,
    byte_len: usize,
    _marker: PhantomData<T>,
}

impl<T: Element> Deref for RegionView<'_, T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        bytemuck::cast_slice(self.guard.bytes(self.byte_len))
    }
}

impl<T: Element + core::fmt::Debug> core::fmt::Debug for RegionView<'_, T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

/// Typed write view of part of a region
pub struct RegionViewMut<'a, T: Element> {
    guard: MutexGuard<'a, RegionStorage>,
    byte_len: usize,
    span: Range<usize>,
    _marker: PhantomData<T>,
}

impl<T: Element> Deref for RegionViewMut<'_, T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        bytemuck::cast_slice(&self.guard.bytes(self.byte_len)[self.span.clone()])
    }
}

impl<T: Element> DerefMut for RegionViewMut<'_, T> {
    fn deref_mut(&mut self) -> &mut [T] {
        let span = self.span.clone();
        bytemuck::cast_slice_mut(&mut self.guard.bytes_mut(self.byte_len)[span])
    }
}

impl<T: Element + core::fmt::Debug> core::fmt::Debug for RegionViewMut<'_, T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> MemoryTracker {
        MemoryTracker::new(ByteSize::from_mib(1))
    }

    #[test]
    fn test_use_host_ptr_copies_contents() {
        let host = HostBuffer::from_vec(vec![1.0f64, 2.0, 3.0, 4.0]);
        let region =
            DeviceRegion::from_host(&tracker(), MemFlags::READ_ONLY | MemFlags::USE_HOST_PTR, &host, 1..3)
                .unwrap();
        assert_eq!(region.len(), 2);
        assert_eq!(&*region.map::<f64>().unwrap(), &[2.0, 3.0]);
    }

    #[test]
    fn test_plain_region_starts_zeroed() {
        let host = HostBuffer::from_vec(vec![9i32; 4]);
        let region = DeviceRegion::from_host(&tracker(), MemFlags::READ_WRITE, &host, 0..4).unwrap();
        assert!(region.map::<i32>().unwrap().iter().all(|&v| v == 0));
    }

    #[test]
    fn test_sync_writes_only_dirty_span() {
        let host = HostBuffer::from_vec(vec![0i32; 4]);
        let flags = MemFlags::READ_WRITE | MemFlags::USE_HOST_PTR;
        let a = DeviceRegion::from_host(&tracker(), flags, &host, 0..4).unwrap();
        let b = DeviceRegion::from_host(&tracker(), flags, &host, 0..4).unwrap();

        a.map_mut::<i32>(0..1).unwrap()[0] = 11;
        b.map_mut::<i32>(2..3).unwrap()[0] = 33;
        assert_eq!(a.dirty_elements(), Some(0..1));

        assert_eq!(b.sync_to_host().unwrap(), ByteSize::from_bytes(4));
        assert_eq!(a.sync_to_host().unwrap(), ByteSize::from_bytes(4));
        assert_eq!(host.to_vec(), vec![11, 0, 33, 0]);

        assert_eq!(a.dirty_elements(), None);
        assert_eq!(a.sync_to_host().unwrap(), ByteSize::ZERO);
    }

    #[test]
    fn test_dirty_span_grows() {
        let host = HostBuffer::<u32>::zeroed(8);
        let region = DeviceRegion::from_host(&tracker(), MemFlags::WRITE_ONLY, &host, 2..8).unwrap();
        drop(region.map_mut::<u32>(4..5).unwrap());
        drop(region.map_mut::<u32>(1..2).unwrap());
        assert_eq!(region.dirty_elements(), Some(1..5));

        region.map_mut::<u32>(1..5).unwrap().copy_from_slice(&[1, 2, 3, 4]);
        region.sync_to_host().unwrap();
        assert_eq!(host.to_vec(), vec![0, 0, 0, 1, 2, 3, 4, 0]);
    }

    #[test]
    fn test_sync_from_host_discards_writes() {
        let host = HostBuffer::from_vec(vec![5u32; 2]);
        let region =
            DeviceRegion::from_host(&tracker(), MemFlags::COPY_HOST_PTR, &host, 0..2).unwrap();
        region.map_mut::<u32>(0..2).unwrap()[1] = 6;
        region.sync_from_host().unwrap();
        assert_eq!(&*region.map::<u32>().unwrap(), &[5, 5]);
        assert_eq!(region.dirty_elements(), None);
    }

    #[test]
    fn test_invalid_requests() {
        let t = tracker();
        let host = HostBuffer::from_vec(vec![0f64; 4]);

        let both = MemFlags::READ_ONLY | MemFlags::WRITE_ONLY;
        assert_eq!(DeviceRegion::from_host(&t, both, &host, 0..4).unwrap_err(), Error::InvalidRegion);

        let host_ptr = MemFlags::USE_HOST_PTR | MemFlags::COPY_HOST_PTR;
        assert!(DeviceRegion::from_host(&t, host_ptr, &host, 0..4).is_err());
        assert!(DeviceRegion::from_host(&t, MemFlags::READ_WRITE, &host, 0..5).is_err());
        assert!(DeviceRegion::from_host(&t, MemFlags::READ_WRITE, &host, 2..2).is_err());

        let ro = DeviceRegion::from_host(&t, MemFlags::READ_ONLY, &host, 0..4).unwrap();
        assert_eq!(ro.map_mut::<f64>(0..1).unwrap_err(), Error::InvalidRegion);
        assert_eq!(ro.map::<u64>().unwrap_err(), Error::InvalidRegion);
    }

    #[test]
    fn test_device_memory_released_with_last_clone() {
        let t = MemoryTracker::new(ByteSize::from_bytes(64));
        let host = HostBuffer::from_vec(vec![0f64; 8]);
        let region = DeviceRegion::from_host(&t, MemFlags::READ_WRITE, &host, 0..8).unwrap();
        let clone = region.clone();
        assert_eq!(
            DeviceRegion::from_host(&t, MemFlags::READ_WRITE, &host, 0..1).unwrap_err(),
            Error::OutOfDeviceMemory
        );
        drop(region);
        assert_eq!(t.in_use(), ByteSize::from_bytes(64));
        drop(clone);
        assert_eq!(t.in_use(), ByteSize::ZERO);
    }
}
