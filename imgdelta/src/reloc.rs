//! Table of structural relocations recorded for the final image, one entry
//! per location a placement tool must patch, carried in image chunk headers.

use std::io;

use crate::range::SECTOR_SIZE;

/// Structural relocation kinds, values shared with the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocKind {
    /// FreeBSD disklabel rewrite.
    FbsdDisklabel,
    /// OpenBSD disklabel rewrite.
    ObsdDisklabel,
    /// LILO boot block sector address.
    LiloSectorAddr,
    /// LILO map sector.
    LiloMapSector,
    /// LILO descriptor checksum.
    LiloChecksum,
    /// Sector shorter than the full sector size.
    ShortSector,
    /// Value to which the partition offset is added on placement.
    AddPartOffset,
    /// 16-bit XOR checksum over a range.
    Xor16Checksum,
    /// Generic checksum over a range.
    ChecksumRange,
}

impl RelocKind {

    /// Decode the on-disk kind id, returning none for unknown ids.
    pub fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw {
            1 => Self::FbsdDisklabel,
            2 => Self::ObsdDisklabel,
            3 => Self::LiloSectorAddr,
            4 => Self::LiloMapSector,
            5 => Self::LiloChecksum,
            6 => Self::ShortSector,
            7 => Self::AddPartOffset,
            8 => Self::Xor16Checksum,
            9 => Self::ChecksumRange,
            _ => return None,
        })
    }

    /// The on-disk kind id.
    pub fn raw(self) -> u32 {
        match self {
            Self::FbsdDisklabel => 1,
            Self::ObsdDisklabel => 2,
            Self::LiloSectorAddr => 3,
            Self::LiloMapSector => 4,
            Self::LiloChecksum => 5,
            Self::ShortSector => 6,
            Self::AddPartOffset => 7,
            Self::Xor16Checksum => 8,
            Self::ChecksumRange => 9,
        }
    }

}

/// A single relocation: where inside its sector the patched structure lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reloc {
    pub kind: RelocKind,
    /// Sector holding the patched structure.
    pub sector: u64,
    /// Byte offset of the structure inside its sector.
    pub sector_offset: u32,
    /// Byte size of the structure.
    pub size: u32,
}

/// Integer width of the packed wire entries of one image file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocWidth {
    W32,
    W64,
}

impl RelocWidth {

    /// Byte length of one packed entry at this width.
    pub fn entry_len(self) -> usize {
        match self {
            Self::W32 => 16,
            Self::W64 => 20,
        }
    }

}

/// Ordered list of relocations for one image. The wire width is fixed by the
/// first entry added and every later operation must match it.
#[derive(Debug, Default, Clone)]
pub struct RelocTable {
    /// Wire width, resolved on first push.
    width: Option<RelocWidth>,
    /// Entries in non-decreasing sector order.
    relocs: Vec<Reloc>,
}

impl RelocTable {

    pub fn new() -> Self {
        Self::default()
    }

    /// The wire width of this table, none until an entry has been added.
    pub fn width(&self) -> Option<RelocWidth> {
        self.width
    }

    pub fn len(&self) -> usize {
        self.relocs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relocs.is_empty()
    }

    pub fn relocs(&self) -> &[Reloc] {
        &self.relocs
    }

    /// Append a relocation, fixing the table width on first use. Entries
    /// must arrive in non-decreasing sector order.
    pub fn push(&mut self, width: RelocWidth, reloc: Reloc) -> Result<(), RelocError> {

        match self.width {
            None => self.width = Some(width),
            Some(expect) if expect != width => {
                return Err(RelocError::WidthMismatch { expect, got: width });
            }
            Some(_) => {}
        }

        if reloc.sector_offset as u64 + reloc.size as u64 > SECTOR_SIZE as u64 {
            return Err(RelocError::OutOfSector {
                sector: reloc.sector,
                sector_offset: reloc.sector_offset,
                size: reloc.size,
            });
        }

        if width == RelocWidth::W32 && reloc.sector > u32::MAX as u64 {
            return Err(RelocError::SectorTooWide(reloc.sector));
        }

        if self.relocs.last().is_some_and(|last| reloc.sector < last.sector) {
            return Err(RelocError::OutOfOrder { sector: reloc.sector });
        }

        self.relocs.push(reloc);
        Ok(())

    }

    /// Count the relocations whose sector falls in `[addr, addr + size)`.
    pub fn in_range(&self, addr: u64, size: u64) -> usize {
        let from = self.relocs.partition_point(|r| r.sector < addr);
        let to = self.relocs.partition_point(|r| r.sector < addr + size);
        to - from
    }

}

/// Error type for relocation table maintenance and its wire codec.
#[derive(thiserror::Error, Debug)]
pub enum RelocError {
    #[error("io: {0}")]
    Io(#[from] io::Error),
    #[error("relocation table width already fixed to {expect:?}, got {got:?}")]
    WidthMismatch { expect: RelocWidth, got: RelocWidth },
    #[error("relocation at sector {sector} not in non-decreasing order")]
    OutOfOrder { sector: u64 },
    #[error("relocation at sector {sector} (offset {sector_offset}, size {size}) exceeds the sector size")]
    OutOfSector { sector: u64, sector_offset: u32, size: u32 },
    #[error("relocation sector {0} does not fit the 32-bit wire width")]
    SectorTooWide(u64),
    #[error("unknown relocation kind {0}")]
    UnknownKind(u32),
    #[error("chunk relocation payload truncated, expected {expect} bytes, got {got}")]
    Truncated { expect: usize, got: usize },
    #[error("relocation at sector {sector} lies outside its chunk")]
    OutsideChunk { sector: u64 },
}
