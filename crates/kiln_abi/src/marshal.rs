//! Capability marshalling.
//!
//! The boundary carries no composite types. Strings and byte buffers cross
//! as a [`Slice`]; a sequence of strings crosses as a packed buffer plus a
//! separate table of `(offset, len)` pairs ([`StrArray`]). Status codes come
//! back as a bare `i32` and are classified by [`Status`].

use crate::capability::{Capability, CapabilityError};
use crate::memory::{CallFrame, GuestMemory, Slice};
use serde::{Deserialize, Serialize};

/// Bytes per entry in a string array table: `offset: u32` then `len: u32`,
/// both little endian.
pub const TABLE_ENTRY_LEN: usize = 8;

/// Size limits applied on both sides of the boundary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarshalLimits {
    /// Largest single string or byte buffer
    pub max_buffer_len: usize,
    /// Most elements in one string array
    pub max_array_len: usize,
}

impl MarshalLimits {
    /// Create new limits
    #[must_use]
    pub const fn new(max_buffer_len: usize, max_array_len: usize) -> Self {
        Self {
            max_buffer_len,
            max_array_len,
        }
    }

    /// Set max buffer length
    #[must_use]
    pub const fn with_max_buffer_len(mut self, len: usize) -> Self {
        self.max_buffer_len = len;
        self
    }

    /// Set max array length
    #[must_use]
    pub const fn with_max_array_len(mut self, len: usize) -> Self {
        self.max_array_len = len;
        self
    }

    fn check_len(&self, len: usize) -> Result<(), MarshalError> {
        if len > self.max_buffer_len {
            return Err(MarshalError::TooLarge {
                len,
                limit: self.max_buffer_len,
            });
        }
        Ok(())
    }
}

impl Default for MarshalLimits {
    fn default() -> Self {
        Self::new(1024 * 1024, 4096)
    }
}

/// A string array as it crosses the boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StrArray {
    /// Packed UTF-8 bytes of every element
    pub data: Slice,
    /// `count` little-endian `(offset, len)` pairs relative to `data.ptr`
    pub table: Slice,
    /// Number of elements
    pub count: u32,
}

/// Marshalling errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MarshalError {
    /// Buffer exceeds the configured limit
    #[error("Buffer of {len} bytes exceeds limit of {limit}")]
    TooLarge {
        /// Offending length
        len: usize,
        /// Configured limit
        limit: usize,
    },

    /// Array exceeds the configured element limit
    #[error("Array of {count} elements exceeds limit of {limit}")]
    TooManyElements {
        /// Offending count
        count: usize,
        /// Configured limit
        limit: usize,
    },

    /// Bytes are not valid UTF-8
    #[error("Invalid UTF-8 at 0x{ptr:X}: {reason}")]
    InvalidUtf8 {
        /// Start of the offending buffer
        ptr: u32,
        /// Decoder message
        reason: String,
    },

    /// Slice does not lie inside guest memory
    #[error("Slice 0x{ptr:X}+{len} outside guest memory of {size} bytes")]
    OutOfBounds {
        /// Slice pointer
        ptr: u32,
        /// Slice length
        len: u32,
        /// Memory in use
        size: usize,
    },

    /// Guest memory exhausted
    #[error("Out of guest memory: requested {requested} bytes, {available} available")]
    OutOfMemory {
        /// Bytes requested
        requested: usize,
        /// Bytes left
        available: usize,
    },

    /// String array table is inconsistent
    #[error("Malformed string array table at entry {index}")]
    MalformedTable {
        /// Entry index
        index: usize,
    },
}

/// Encode a string into the call frame
///
/// # Errors
///
/// Returns error if the string is over the limit or memory is exhausted
pub fn encode_str(
    frame: &mut CallFrame<'_>,
    s: &str,
    limits: &MarshalLimits,
) -> Result<Slice, MarshalError> {
    encode_bytes(frame, s.as_bytes(), limits)
}

/// Encode a byte buffer into the call frame
///
/// # Errors
///
/// Returns error if the buffer is over the limit or memory is exhausted
pub fn encode_bytes(
    frame: &mut CallFrame<'_>,
    bytes: &[u8],
    limits: &MarshalLimits,
) -> Result<Slice, MarshalError> {
    limits.check_len(bytes.len())?;
    frame.alloc_bytes(bytes)
}

/// Encode a sequence of strings as packed data plus an offset/length table
///
/// # Errors
///
/// Returns error if any limit is exceeded or memory is exhausted
pub fn encode_str_array<S: AsRef<str>>(
    frame: &mut CallFrame<'_>,
    items: &[S],
    limits: &MarshalLimits,
) -> Result<StrArray, MarshalError> {
    if items.len() > limits.max_array_len {
        return Err(MarshalError::TooManyElements {
            count: items.len(),
            limit: limits.max_array_len,
        });
    }

    let mut data = Vec::new();
    let mut table = Vec::with_capacity(items.len() * TABLE_ENTRY_LEN);
    for item in items {
        let bytes = item.as_ref().as_bytes();
        limits.check_len(bytes.len())?;
        let offset = data.len();
        data.extend_from_slice(bytes);
        limits.check_len(data.len())?;
        // Both fit in u32: the packed buffer is bounded by max_buffer_len
        table.extend_from_slice(&(offset as u32).to_le_bytes());
        table.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    }

    let data = frame.alloc_bytes(&data)?;
    let table = frame.alloc_bytes(&table)?;
    Ok(StrArray {
        data,
        table,
        count: items.len() as u32,
    })
}

/// Decode a byte buffer from guest memory
///
/// # Errors
///
/// Returns error if the slice is out of bounds or over the limit
pub fn read_bytes(
    memory: &GuestMemory,
    slice: Slice,
    limits: &MarshalLimits,
) -> Result<Vec<u8>, MarshalError> {
    limits.check_len(slice.len as usize)?;
    Ok(memory.read(slice)?.to_vec())
}

/// Decode a UTF-8 string from guest memory
///
/// # Errors
///
/// Returns error if the slice is out of bounds, over the limit or not UTF-8
pub fn read_str(
    memory: &GuestMemory,
    slice: Slice,
    limits: &MarshalLimits,
) -> Result<String, MarshalError> {
    limits.check_len(slice.len as usize)?;
    let bytes = memory.read(slice)?;
    std::str::from_utf8(bytes)
        .map(str::to_owned)
        .map_err(|e| MarshalError::InvalidUtf8 {
            ptr: slice.ptr,
            reason: e.to_string(),
        })
}

/// Decode a string array from guest memory
///
/// # Errors
///
/// Returns error if the table is malformed, any element is out of bounds or
/// not UTF-8, or a limit is exceeded
pub fn read_str_array(
    memory: &GuestMemory,
    array: StrArray,
    limits: &MarshalLimits,
) -> Result<Vec<String>, MarshalError> {
    let count = array.count as usize;
    if count > limits.max_array_len {
        return Err(MarshalError::TooManyElements {
            count,
            limit: limits.max_array_len,
        });
    }
    if array.table.len as usize != count * TABLE_ENTRY_LEN {
        return Err(MarshalError::MalformedTable { index: 0 });
    }
    limits.check_len(array.data.len as usize)?;

    let table = memory.read(array.table)?;
    let data = memory.read(array.data)?;

    let mut out = Vec::with_capacity(count);
    for (index, entry) in table.chunks_exact(TABLE_ENTRY_LEN).enumerate() {
        let offset = u32::from_le_bytes([entry[0], entry[1], entry[2], entry[3]]) as usize;
        let len = u32::from_le_bytes([entry[4], entry[5], entry[6], entry[7]]) as usize;
        let end = offset
            .checked_add(len)
            .filter(|end| *end <= data.len())
            .ok_or(MarshalError::MalformedTable { index })?;
        let s = std::str::from_utf8(&data[offset..end]).map_err(|e| MarshalError::InvalidUtf8 {
            ptr: array.data.ptr.saturating_add(offset as u32),
            reason: e.to_string(),
        })?;
        out.push(s.to_owned());
    }
    Ok(out)
}

/// Read a NUL-padded text result out of a fixed-size output buffer
///
/// # Errors
///
/// Returns error if the slice is out of bounds or the text is not UTF-8
pub fn read_padded_str(memory: &GuestMemory, slice: Slice) -> Result<String, MarshalError> {
    let bytes = memory.read(slice)?;
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    std::str::from_utf8(&bytes[..end])
        .map(str::to_owned)
        .map_err(|e| MarshalError::InvalidUtf8 {
            ptr: slice.ptr,
            reason: e.to_string(),
        })
}

/// Status code returned across the boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Status(i32);

/// Classified status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    /// Call succeeded
    Ok,
    /// Capability is absent in this build
    NotImplemented,
    /// Caller must not retry or continue the enclosing span
    Unrecoverable,
    /// Opaque host failure
    Host(i32),
}

impl Status {
    /// Success
    pub const OK: Status = Status(0);
    /// Capability not implemented by this host
    pub const NOT_IMPLEMENTED: Status = Status(-1);
    /// Unrecoverable failure
    pub const UNRECOVERABLE: Status = Status(-2);

    /// Wrap a raw code
    #[must_use]
    pub const fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    /// Raw code
    #[must_use]
    pub const fn as_raw(&self) -> i32 {
        self.0
    }

    /// Build a host error status; reserved values collapse to `1`
    #[must_use]
    pub const fn host_error(code: i32) -> Self {
        match code {
            0 | -1 | -2 => Self(1),
            other => Self(other),
        }
    }

    /// Classify the code
    #[must_use]
    pub const fn kind(&self) -> StatusKind {
        match self.0 {
            0 => StatusKind::Ok,
            -1 => StatusKind::NotImplemented,
            -2 => StatusKind::Unrecoverable,
            code => StatusKind::Host(code),
        }
    }

    /// Translate into a typed result for `capability`
    ///
    /// # Errors
    ///
    /// Returns the typed error for every non-zero status
    pub fn into_result(self, capability: Capability) -> Result<(), CapabilityError> {
        match self.kind() {
            StatusKind::Ok => Ok(()),
            StatusKind::NotImplemented => Err(CapabilityError::NotImplemented { capability }),
            StatusKind::Unrecoverable => Err(CapabilityError::Unrecoverable { capability }),
            StatusKind::Host(code) => Err(CapabilityError::Host { capability, code }),
        }
    }
}
