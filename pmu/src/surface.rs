//! Super-surface access
//!
//! The super surface is a shared-memory region used to pass large structured
//! data (change-sequence scripts, board object tables) between the driver and
//! PMU firmware. The region is addressed by per-member byte offsets from a
//! fixed layout table; every access round-trips to the region; there is no
//! caching layer here.

use spin::Mutex;

/// Byte offsets of the members this core touches
///
/// The real region carries many more members; only the change-sequence script
/// group is addressed from this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceMember {
    /// The three change-sequence script slots (CURRENT, LAST, QUERY)
    ChangeSeqGrp,
}

impl SurfaceMember {
    pub fn offset(self) -> usize {
        match self {
            SurfaceMember::ChangeSeqGrp => 0x1000,
        }
    }
}

/// Raw shared-memory accessors
///
/// Reads and writes are infallible: the region is always mapped for the
/// lifetime of the subsystem. Out-of-range accesses are a construction-time
/// bug, not a runtime condition.
pub trait SuperSurface: Send + Sync {
    fn read(&self, offset: usize, buf: &mut [u8]);
    fn write(&self, offset: usize, data: &[u8]);
}

/// In-memory super surface
///
/// Used by tests and by embeddings that have no DMA-backed region. Writes
/// from the firmware-message context and reads from the calling thread are
/// serialized by a short spinlock critical section.
pub struct SharedSurface {
    data: Mutex<Vec<u8>>,
}

impl SharedSurface {
    pub fn new(size: usize) -> Self {
        Self {
            data: Mutex::new(vec![0u8; size]),
        }
    }
}

impl SuperSurface for SharedSurface {
    fn read(&self, offset: usize, buf: &mut [u8]) {
        let data = self.data.lock();
        let end = offset + buf.len();
        buf.copy_from_slice(&data[offset..end]);
    }

    fn write(&self, offset: usize, bytes: &[u8]) {
        let mut data = self.data.lock();
        let end = offset + bytes.len();
        data[offset..end].copy_from_slice(bytes);
    }
}
