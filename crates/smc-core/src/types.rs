//! # SMC Core Types
//!
//! Fundamental type definitions used across the dispatch stack.
//!
//! These types provide:
//! - Type-safe identifiers that cannot be mixed between resource kinds
//! - Byte sizes for device memory accounting

use core::cmp::Ordering;
use core::fmt;
use core::hash::{Hash, Hasher};
use core::marker::PhantomData;

// =============================================================================
// HANDLE TYPES
// =============================================================================

/// Opaque identifier for a runtime object
///
/// Handles are type-safe wrappers that prevent mixing different resource types.
/// The zero id is reserved as the null handle.
#[repr(transparent)]
pub struct Handle<T> {
    id: u64,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    /// Create a new handle
    #[inline]
    pub const fn new(id: u64) -> Self {
        Self {
            id,
            _marker: PhantomData,
        }
    }

    /// Create a null handle
    #[inline]
    pub const fn null() -> Self {
        Self::new(0)
    }

    /// Get the raw ID
    #[inline]
    pub const fn id(self) -> u64 {
        self.id
    }

    /// Check if null
    #[inline]
    pub const fn is_null(self) -> bool {
        self.id == 0
    }

    /// The handle that follows this one
    #[inline]
    pub const fn next(self) -> Self {
        Self::new(self.id + 1)
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for Handle<T> {}

impl<T> PartialOrd for Handle<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Handle<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = core::any::type_name::<T>();
        let short = name.rsplit("::").next().unwrap_or(name);
        write!(f, "Handle<{}>({})", short, self.id)
    }
}

impl<T> fmt::Display for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

// Marker types for handles
/// Marker for submission handles
#[derive(Debug)]
pub enum SubmissionMarker {}
/// Marker for event handles
#[derive(Debug)]
pub enum EventMarker {}
/// Marker for device handles
#[derive(Debug)]
pub enum DeviceMarker {}
/// Marker for device memory allocations
#[derive(Debug)]
pub enum AllocationMarker {}

/// Identifier of one dispatcher submission
pub type SubmissionId = Handle<SubmissionMarker>;
/// Identifier of one queued operation
pub type EventId = Handle<EventMarker>;
/// Identifier of an accelerator device
pub type DeviceId = Handle<DeviceMarker>;
/// Identifier of a device memory allocation
pub type AllocationId = Handle<AllocationMarker>;

// =============================================================================
// SIZE TYPES
// =============================================================================

/// Size in bytes (for device memory accounting)
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct ByteSize(u64);

impl ByteSize {
    /// Zero size
    pub const ZERO: Self = Self(0);

    /// Create from bytes
    #[inline]
    pub const fn from_bytes(bytes: u64) -> Self {
        Self(bytes)
    }

    /// Create from KiB
    #[inline]
    pub const fn from_kib(kib: u64) -> Self {
        Self(kib * 1024)
    }

    /// Create from MiB
    #[inline]
    pub const fn from_mib(mib: u64) -> Self {
        Self(mib * 1024 * 1024)
    }

    /// Create from GiB
    #[inline]
    pub const fn from_gib(gib: u64) -> Self {
        Self(gib * 1024 * 1024 * 1024)
    }

    /// Size of `count` elements of `T`
    #[inline]
    pub const fn of<T>(count: usize) -> Self {
        Self((count * core::mem::size_of::<T>()) as u64)
    }

    /// Get as bytes
    #[inline]
    pub const fn as_bytes(self) -> u64 {
        self.0
    }

    /// Get as MiB
    #[inline]
    pub const fn as_mib(self) -> u64 {
        self.0 / (1024 * 1024)
    }

    /// Checked addition
    #[inline]
    pub const fn checked_add(self, rhs: Self) -> Option<Self> {
        match self.0.checked_add(rhs.0) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Saturating subtraction
    #[inline]
    pub const fn saturating_sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }
}

impl fmt::Debug for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 >= 1024 * 1024 * 1024 {
            write!(f, "{} GiB", self.0 / (1024 * 1024 * 1024))
        } else if self.0 >= 1024 * 1024 {
            write!(f, "{} MiB", self.0 / (1024 * 1024))
        } else if self.0 >= 1024 {
            write!(f, "{} KiB", self.0 / 1024)
        } else {
            write!(f, "{} B", self.0)
        }
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_ordering() {
        let a = SubmissionId::new(1);
        let b = a.next();
        assert!(b > a);
        assert_eq!(b.id(), 2);
        assert!(SubmissionId::null().is_null());
    }

    #[test]
    fn test_handle_debug_names_marker() {
        let id = EventId::new(7);
        assert_eq!(format!("{:?}", id), "Handle<EventMarker>(7)");
        assert_eq!(format!("{}", id), "7");
    }

    #[test]
    fn test_byte_size() {
        assert_eq!(ByteSize::of::<f64>(4096).as_bytes(), 32768);
        assert_eq!(ByteSize::from_mib(3).as_mib(), 3);
        assert_eq!(format!("{}", ByteSize::from_kib(64)), "64 KiB");
        assert_eq!(ByteSize::from_bytes(u64::MAX).checked_add(ByteSize::from_bytes(1)), None);
        assert_eq!(ByteSize::ZERO.saturating_sub(ByteSize::from_bytes(5)), ByteSize::ZERO);
    }
}
