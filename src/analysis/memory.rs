//! MemoryView: bounded reads from the initial contents of linear memory.
//!
//! `MemoryImage` is what memory 0 holds right after instantiation, as far as
//! it can be known statically: the active data segments whose offsets are
//! constant. Bytes outside those segments are not covered and reads touching
//! them fail instead of assuming zero.

use tracing::debug;

use crate::core::module::{DataMode, Module};

/// Errors that can occur during memory reads.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MemoryError {
    #[error("address out of range: {addr:#x}+{len}")]
    OutOfRange { addr: u64, len: usize },
    #[error("bytes at {0:#x} are not statically initialized")]
    Uncovered(u64),
}

/// Bounded little-endian memory reads.
pub trait MemoryView {
    /// Read `len` bytes starting at `addr`.
    fn read_bytes(&self, addr: u64, len: usize) -> Result<&[u8], MemoryError>;

    fn read_u32(&self, addr: u64) -> Result<u32, MemoryError> {
        let b = self.read_bytes(addr, 4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_u64(&self, addr: u64) -> Result<u64, MemoryError> {
        let b = self.read_bytes(addr, 8)?;
        Ok(u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
    }

    /// Read a pointer-sized word (4 or 8 bytes).
    fn read_word(&self, addr: u64, width: u32) -> Result<u64, MemoryError> {
        if width == 8 {
            self.read_u64(addr)
        } else {
            self.read_u32(addr).map(u64::from)
        }
    }
}

/// A contiguous statically initialized byte range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    pub start: u64,
    pub bytes: Vec<u8>,
}

impl Region {
    pub fn end(&self) -> u64 {
        self.start + self.bytes.len() as u64
    }
}

/// Initial memory image built from data segments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryImage {
    /// Disjoint, sorted, with adjacent regions coalesced
    regions: Vec<Region>,
}

impl MemoryImage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Image of memory 0. Segments apply in order, so later ones overwrite
    /// earlier ones as at instantiation. Segments with non-constant offsets
    /// are skipped.
    pub fn from_module(module: &Module) -> Self {
        let mut image = Self::new();
        let mut skipped = 0usize;
        for seg in &module.data {
            let DataMode::Active { memory: 0, offset } = &seg.mode else {
                continue;
            };
            match module.const_offset(offset) {
                Some(start) if start >= 0 => image.write(start as u64, &seg.bytes),
                _ => skipped += 1,
            }
        }
        debug!(
            regions = image.regions.len(),
            bytes = image.covered_bytes(),
            skipped,
            "Memory image built"
        );
        image
    }

    /// Overlay `bytes` at `start`.
    pub fn write(&mut self, start: u64, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let end = start.saturating_add(bytes.len() as u64);
        let mut next = Vec::with_capacity(self.regions.len() + 2);
        for r in self.regions.drain(..) {
            let (rs, re) = (r.start, r.end());
            if re <= start || rs >= end {
                next.push(r);
                continue;
            }
            if rs < start {
                next.push(Region {
                    start: rs,
                    bytes: r.bytes[..(start - rs) as usize].to_vec(),
                });
            }
            if re > end {
                next.push(Region {
                    start: end,
                    bytes: r.bytes[(end - rs) as usize..].to_vec(),
                });
            }
        }
        next.push(Region {
            start,
            bytes: bytes.to_vec(),
        });
        next.sort_by_key(|r| r.start);

        // coalesce adjacent regions
        let mut merged: Vec<Region> = Vec::with_capacity(next.len());
        for r in next {
            match merged.last_mut() {
                Some(last) if last.end() == r.start => last.bytes.extend_from_slice(&r.bytes),
                _ => merged.push(r),
            }
        }
        self.regions = merged;
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn covered_bytes(&self) -> u64 {
        self.regions.iter().map(|r| r.bytes.len() as u64).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// True when every byte of `[addr, addr+len)` is statically known.
    pub fn covers(&self, addr: u64, len: usize) -> bool {
        self.read_bytes(addr, len).is_ok()
    }
}

impl MemoryView for MemoryImage {
    fn read_bytes(&self, addr: u64, len: usize) -> Result<&[u8], MemoryError> {
        let end = addr
            .checked_add(len as u64)
            .ok_or(MemoryError::OutOfRange { addr, len })?;
        // Last region starting at or before addr
        let pos = self.regions.partition_point(|r| r.start <= addr);
        let region = pos
            .checked_sub(1)
            .and_then(|i| self.regions.get(i))
            .ok_or(MemoryError::Uncovered(addr))?;
        if end > region.end() {
            return Err(MemoryError::Uncovered(region.end().max(addr)));
        }
        let from = (addr - region.start) as usize;
        Ok(&region.bytes[from..from + len])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::instruction::{ConstExpr, Val};
    use crate::core::module::DataSegment;

    fn active(offset: i32, bytes: &[u8]) -> DataSegment {
        DataSegment {
            mode: DataMode::Active {
                memory: 0,
                offset: ConstExpr::Const(Val::I32(offset)),
            },
            bytes: bytes.to_vec(),
        }
    }

    #[test]
    fn reads_little_endian_words() {
        let mut m = Module::default();
        m.data.push(active(16, &[1, 0, 0, 0, 2, 0, 0, 0]));
        let image = MemoryImage::from_module(&m);
        assert_eq!(image.read_u32(16), Ok(1));
        assert_eq!(image.read_u32(20), Ok(2));
        assert_eq!(image.read_u64(16), Ok(0x0000_0002_0000_0001));
        assert_eq!(image.read_u32(22), Err(MemoryError::Uncovered(24)));
        assert_eq!(image.read_u32(0), Err(MemoryError::Uncovered(0)));
    }

    #[test]
    fn later_segments_overwrite_and_coalesce() {
        let mut m = Module::default();
        m.data.push(active(0, &[1, 1, 1, 1, 1, 1]));
        m.data.push(active(2, &[9, 9]));
        m.data.push(active(6, &[7]));
        let image = MemoryImage::from_module(&m);
        assert_eq!(image.regions().len(), 1);
        assert_eq!(image.read_bytes(0, 7).unwrap(), &[1, 1, 9, 9, 1, 1, 7]);
        assert_eq!(image.covered_bytes(), 7);
    }

    #[test]
    fn skips_dynamic_offsets() {
        let mut m = Module::default();
        m.data.push(DataSegment {
            mode: DataMode::Active {
                memory: 0,
                offset: ConstExpr::GlobalGet(0),
            },
            bytes: vec![1, 2, 3, 4],
        });
        assert!(MemoryImage::from_module(&m).is_empty());
    }
}
