//! Guest linear memory.
//!
//! Arguments for a capability call are written into a [`CallFrame`]. The
//! frame releases everything it allocated when dropped, so a [`Slice`] handed
//! to the host is only meaningful for the synchronous duration of one call.

use crate::marshal::MarshalError;
use serde::{Deserialize, Serialize};

/// A (pointer, length) pair into guest memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Slice {
    /// Offset into guest memory
    pub ptr: u32,
    /// Length in bytes
    pub len: u32,
}

impl Slice {
    /// Create a new slice
    #[must_use]
    pub const fn new(ptr: u32, len: u32) -> Self {
        Self { ptr, len }
    }

    /// The empty slice
    #[must_use]
    pub const fn empty() -> Self {
        Self { ptr: 0, len: 0 }
    }

    /// Exclusive end offset, `None` on overflow
    #[must_use]
    pub fn end(&self) -> Option<u32> {
        self.ptr.checked_add(self.len)
    }
}

/// Memory limit configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryLimit {
    /// Maximum memory in bytes
    pub max_bytes: u32,
}

impl MemoryLimit {
    /// Create a new memory limit
    #[must_use]
    pub const fn new(max_bytes: u32) -> Self {
        Self { max_bytes }
    }

    /// Create from 64KiB wasm pages
    #[must_use]
    pub const fn with_pages(pages: u32) -> Self {
        Self {
            max_bytes: pages.saturating_mul(65_536),
        }
    }

    /// Check if byte count is within limit
    #[must_use]
    pub const fn within_limit(&self, bytes: u64) -> bool {
        bytes <= self.max_bytes as u64
    }
}

impl Default for MemoryLimit {
    fn default() -> Self {
        Self::with_pages(256) // 16MiB
    }
}

/// Guest linear memory
#[derive(Debug, Clone)]
pub struct GuestMemory {
    bytes: Vec<u8>,
    limit: MemoryLimit,
}

impl GuestMemory {
    /// Create an empty memory with the given limit
    #[must_use]
    pub fn new(limit: MemoryLimit) -> Self {
        Self {
            bytes: Vec::new(),
            limit,
        }
    }

    /// Bytes currently in use
    #[must_use]
    pub fn used(&self) -> usize {
        self.bytes.len()
    }

    /// Memory limit
    #[must_use]
    pub fn limit(&self) -> &MemoryLimit {
        &self.limit
    }

    /// Open a call frame. Allocations made through it are released on drop.
    pub fn frame(&mut self) -> CallFrame<'_> {
        let mark = self.bytes.len();
        CallFrame { memory: self, mark }
    }

    /// Borrow the bytes behind a slice
    ///
    /// # Errors
    ///
    /// Returns error if the slice is outside the memory in use
    pub fn read(&self, slice: Slice) -> Result<&[u8], MarshalError> {
        let range = self.range(slice)?;
        Ok(&self.bytes[range])
    }

    /// Overwrite the bytes behind a slice. `data` must fit; the remainder of
    /// the slice is zero filled.
    ///
    /// # Errors
    ///
    /// Returns error if the slice is out of bounds or `data` is longer
    pub fn write(&mut self, slice: Slice, data: &[u8]) -> Result<(), MarshalError> {
        let range = self.range(slice)?;
        if data.len() > range.len() {
            return Err(MarshalError::TooLarge {
                len: data.len(),
                limit: range.len(),
            });
        }
        let target = &mut self.bytes[range];
        target[..data.len()].copy_from_slice(data);
        target[data.len()..].fill(0);
        Ok(())
    }

    fn range(&self, slice: Slice) -> Result<std::ops::Range<usize>, MarshalError> {
        let out_of_bounds = MarshalError::OutOfBounds {
            ptr: slice.ptr,
            len: slice.len,
            size: self.bytes.len(),
        };
        let end = slice.end().ok_or_else(|| out_of_bounds.clone())? as usize;
        if end > self.bytes.len() {
            return Err(out_of_bounds);
        }
        Ok(slice.ptr as usize..end)
    }

    fn alloc(&mut self, data: &[u8]) -> Result<Slice, MarshalError> {
        let start = self.bytes.len();
        let requested = start as u64 + data.len() as u64;
        if !self.limit.within_limit(requested) {
            return Err(MarshalError::OutOfMemory {
                requested: data.len(),
                available: (self.limit.max_bytes as usize).saturating_sub(start),
            });
        }
        self.bytes.extend_from_slice(data);
        // Bounded by `limit.max_bytes`, which is a u32
        Ok(Slice::new(start as u32, data.len() as u32))
    }
}

impl Default for GuestMemory {
    fn default() -> Self {
        Self::new(MemoryLimit::default())
    }
}

/// Scoped allocation region for one capability call
#[derive(Debug)]
pub struct CallFrame<'m> {
    memory: &'m mut GuestMemory,
    mark: usize,
}

impl CallFrame<'_> {
    /// Copy bytes into the frame
    ///
    /// # Errors
    ///
    /// Returns error if guest memory is exhausted
    pub fn alloc_bytes(&mut self, data: &[u8]) -> Result<Slice, MarshalError> {
        self.memory.alloc(data)
    }

    /// Reserve a zeroed output buffer in the frame
    ///
    /// # Errors
    ///
    /// Returns error if guest memory is exhausted
    pub fn alloc_zeroed(&mut self, len: usize) -> Result<Slice, MarshalError> {
        self.memory.alloc(&vec![0u8; len])
    }

    /// Memory as seen by the host during the call
    pub fn memory_mut(&mut self) -> &mut GuestMemory {
        &mut *self.memory
    }

    /// Read-only view of memory
    #[must_use]
    pub fn memory(&self) -> &GuestMemory {
        &*self.memory
    }
}

impl Drop for CallFrame<'_> {
    fn drop(&mut self) {
        self.memory.bytes.truncate(self.mark);
    }
}
