//! Packed wire form of relocation entries carried in image chunk headers.

use std::io::{self, Read, Write};

use byteorder::{ReadBytesExt, WriteBytesExt, LE};

use crate::reloc::{Reloc, RelocError, RelocKind, RelocTable, RelocWidth};

/// Fields of a downstream chunk header the relocation machinery works with.
/// The chunk's data covers `[first_sect, last_sect)` and `reloc_count`
/// packed entries trail the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    pub chunk_no: u32,
    pub first_sect: u64,
    pub last_sect: u64,
    pub reloc_count: u32,
}

/// Parse one packed entry at the given width.
pub fn read_entry<R: Read>(reader: &mut R, width: RelocWidth) -> Result<Reloc, RelocError> {

    let raw_kind = reader.read_u32::<LE>()?;
    let kind = RelocKind::from_raw(raw_kind).ok_or(RelocError::UnknownKind(raw_kind))?;

    let sector = match width {
        RelocWidth::W32 => reader.read_u32::<LE>()? as u64,
        RelocWidth::W64 => reader.read_u64::<LE>()?,
    };

    let sector_offset = reader.read_u32::<LE>()?;
    let size = reader.read_u32::<LE>()?;

    Ok(Reloc { kind, sector, sector_offset, size })

}

/// Write one packed entry at the given width. The table guarantees a 32-bit
/// table never holds a wider sector.
pub fn write_entry<W: Write>(writer: &mut W, width: RelocWidth, reloc: &Reloc) -> io::Result<()> {

    writer.write_u32::<LE>(reloc.kind.raw())?;

    match width {
        RelocWidth::W32 => {
            debug_assert!(reloc.sector <= u32::MAX as u64);
            writer.write_u32::<LE>(reloc.sector as u32)?;
        }
        RelocWidth::W64 => writer.write_u64::<LE>(reloc.sector)?,
    }

    writer.write_u32::<LE>(reloc.sector_offset)?;
    writer.write_u32::<LE>(reloc.size)

}

/// Ingest the packed entries trailing a chunk header into the table, in
/// chunk-stream order.
pub fn append_from_chunk(
    table: &mut RelocTable,
    hdr: &ChunkHeader,
    width: RelocWidth,
    payload: &[u8],
) -> Result<(), RelocError> {

    let expect = hdr.reloc_count as usize * width.entry_len();
    if payload.len() < expect {
        return Err(RelocError::Truncated { expect, got: payload.len() });
    }

    let mut reader = &payload[..expect];
    for _ in 0..hdr.reloc_count {
        let reloc = read_entry(&mut reader, width)?;
        if reloc.sector < hdr.first_sect || reloc.sector >= hdr.last_sect {
            return Err(RelocError::OutsideChunk { sector: reloc.sector });
        }
        table.push(width, reloc)?;
    }

    Ok(())

}

/// Pack the table entries whose sector lies in `[first_sect, last_sect)`
/// into a chunk's trailing buffer, returning the count for the header.
pub fn extract_for_chunk(
    table: &RelocTable,
    first_sect: u64,
    last_sect: u64,
    out: &mut Vec<u8>,
) -> Result<u32, RelocError> {

    let width = match table.width() {
        Some(width) => width,
        None => return Ok(0),
    };

    let mut count = 0u32;
    for reloc in table.relocs() {
        if reloc.sector >= last_sect {
            break;
        }
        if reloc.sector >= first_sect {
            write_entry(out, width, reloc)?;
            count += 1;
        }
    }

    Ok(count)

}
