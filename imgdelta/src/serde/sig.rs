//! Signature file format: three versions at two sector widths, all
//! little-endian, normalized to the in-memory form on read.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{ReadBytesExt, WriteBytesExt, LE};

use crate::hash::{HashKind, MAX_DIGEST_LEN};
use crate::sig::{ChunkRef, HashRegion, Signature, DEFAULT_HASH_BLOCK_SIZE};
use crate::stats::DiagSink;

/// Magic bytes opening a signature file.
pub const MAGIC: [u8; 4] = *b"imgh";

/// Fixed byte length of the signature file header, the tail past the used
/// fields is reserved.
pub const HEADER_LEN: usize = 128;

/// Byte length of one region entry at the 32-bit sector width (v1/v2).
const ENTRY_LEN_V32: usize = 32;

/// Byte length of one region entry at the 64-bit sector width (v3).
const ENTRY_LEN_V64: usize = 48;

/// Digest field width of a 32-bit region entry.
const DIGEST_LEN_V32: usize = 20;

/// On-disk signature format version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SigVersion {
    /// 32-bit sectors, implicit 128-sector hash block.
    V1,
    /// 32-bit sectors, explicit hash block size.
    V2,
    /// 64-bit sectors, 32-byte digest field.
    V3,
}

impl SigVersion {

    /// Decode the on-disk version number, returning none for unknown ones.
    pub fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw {
            1 => Self::V1,
            2 => Self::V2,
            3 => Self::V3,
            _ => return None,
        })
    }

    /// The on-disk version number.
    pub fn raw(self) -> u32 {
        match self {
            Self::V1 => 1,
            Self::V2 => 2,
            Self::V3 => 3,
        }
    }

    /// Byte length of one region entry in this version.
    fn entry_len(self) -> usize {
        match self {
            Self::V1 | Self::V2 => ENTRY_LEN_V32,
            Self::V3 => ENTRY_LEN_V64,
        }
    }

    /// Byte length of the digest field of one region entry in this version.
    fn digest_field_len(self) -> usize {
        match self {
            Self::V1 | Self::V2 => DIGEST_LEN_V32,
            Self::V3 => MAX_DIGEST_LEN,
        }
    }

}

/// Read a signature from a seekable stream, rebasing every region by the
/// partition offset so the in-memory form is in absolute sectors.
pub fn from_reader<R: Read + Seek>(reader: &mut R, partition_offset: u64) -> Result<Signature, SigError> {

    let stream_len = reader.seek(SeekFrom::End(0))?;
    reader.seek(SeekFrom::Start(0))?;

    if stream_len < HEADER_LEN as u64 {
        return Err(SigError::TooSmall(stream_len));
    }

    let mut header = [0u8; HEADER_LEN];
    reader.read_exact(&mut header)?;

    if header[..4] != MAGIC {
        return Err(SigError::BadMagic);
    }

    let mut fields: &[u8] = &header[4..];
    let raw_version = fields.read_u32::<LE>()?;
    let version = SigVersion::from_raw(raw_version).ok_or(SigError::BadVersion(raw_version))?;
    let raw_kind = fields.read_u32::<LE>()?;
    let hash_kind = HashKind::from_raw(raw_kind).ok_or(SigError::BadHashKind(raw_kind))?;
    let nregions = fields.read_u32::<LE>()?;

    // The hash block size field only exists from v2 on, v1 always hashed
    // 64 KiB blocks.
    let hash_block_size = match version {
        SigVersion::V1 => DEFAULT_HASH_BLOCK_SIZE,
        _ => fields.read_u32::<LE>()?,
    };

    if hash_block_size == 0 {
        return Err(SigError::BadHashBlockSize);
    }

    // A 32-byte digest cannot live in the 20-byte field of the narrow
    // versions.
    if hash_kind.digest_len() > version.digest_field_len() {
        return Err(SigError::NarrowHashKind { kind: hash_kind, version });
    }

    let body_len = stream_len - HEADER_LEN as u64;
    if nregions as u64 * version.entry_len() as u64 > body_len {
        return Err(SigError::TooManyRegions { nregions, stream_len });
    }

    let mut regions = Vec::new();
    regions.try_reserve_exact(nregions as usize).map_err(|_| SigError::OutOfMemory)?;

    let digest_field_len = version.digest_field_len();
    let digest_len = hash_kind.digest_len();
    let mut prev_end = 0u64;

    for index in 0..nregions {

        let start = match version {
            SigVersion::V3 => reader.read_u64::<LE>()?,
            _ => reader.read_u32::<LE>()? as u64,
        };
        let size = reader.read_u32::<LE>()?;
        let chunk = ChunkRef::from_raw(reader.read_i32::<LE>()?);

        let mut digest = [0u8; MAX_DIGEST_LEN];
        reader.read_exact(&mut digest[..digest_field_len])?;
        // Normalize: only the hash kind's bytes are significant.
        digest[digest_len..].fill(0);

        if size == 0 || size > hash_block_size {
            return Err(SigError::BadRegion { index });
        }

        // Rebase to absolute coordinates, checking both the rebase and the
        // region end against 64-bit overflow.
        let start = start.checked_add(partition_offset).ok_or(SigError::BadRegion { index })?;
        let end = start.checked_add(size as u64).ok_or(SigError::BadRegion { index })?;
        if start < prev_end {
            return Err(SigError::BadRegion { index });
        }
        prev_end = end;

        regions.push(HashRegion { start, size, chunk, digest });

    }

    Ok(Signature::from_parts(hash_kind, hash_block_size, regions))

}

/// Read a signature file from the given path.
pub fn read_from<P: AsRef<Path>>(path: P, partition_offset: u64) -> Result<Signature, SigError> {
    let path = path.as_ref();
    let file = File::open(path)
        .map_err(|e| SigError::File { op: "open", path: path.into(), source: e })?;
    from_reader(&mut BufReader::new(file), partition_offset)
}

/// Write a signature, rebasing every region back to partition-relative
/// coordinates on copy so the in-memory signature stays absolute. The
/// version actually written is returned: a target that cannot represent the
/// content is upgraded, with a warning on the sink.
pub fn to_writer<W: Write>(
    writer: &mut W,
    sig: &Signature,
    target: SigVersion,
    partition_offset: u64,
    diag: &mut dyn DiagSink,
) -> Result<SigVersion, SigError> {

    // Check the rebase before resolving the width, a region underflowing the
    // partition base is an error rather than a downgrade.
    for region in sig.regions() {
        if region.start < partition_offset {
            return Err(SigError::RegionUnderPartition {
                start: region.start,
                partition_offset,
            });
        }
    }

    let mut version = target;

    if version == SigVersion::V1 && sig.hash_block_size() != DEFAULT_HASH_BLOCK_SIZE {
        diag.warning(&format!(
            "hash block size {} not representable in v1, writing v2",
            sig.hash_block_size(),
        ));
        version = SigVersion::V2;
    }

    if sig.hash_kind().digest_len() > version.digest_field_len() {
        diag.warning("sha-256 digests not representable below v3, writing v3");
        version = SigVersion::V3;
    }

    if version != SigVersion::V3 {
        let wide = sig.regions().iter()
            .any(|r| r.start - partition_offset > u32::MAX as u64);
        if wide {
            diag.warning("region starts past the 32-bit sector range, writing v3");
            version = SigVersion::V3;
        }
    }

    let mut header = [0u8; HEADER_LEN];
    header[..4].copy_from_slice(&MAGIC);
    let mut fields: &mut [u8] = &mut header[4..];
    fields.write_u32::<LE>(version.raw())?;
    fields.write_u32::<LE>(sig.hash_kind().raw())?;
    fields.write_u32::<LE>(sig.len() as u32)?;
    if version != SigVersion::V1 {
        fields.write_u32::<LE>(sig.hash_block_size())?;
    }
    writer.write_all(&header)?;

    let digest_field_len = version.digest_field_len();
    for region in sig.regions() {
        let start = region.start - partition_offset;
        match version {
            SigVersion::V3 => writer.write_u64::<LE>(start)?,
            _ => writer.write_u32::<LE>(start as u32)?,
        }
        writer.write_u32::<LE>(region.size)?;
        writer.write_i32::<LE>(region.chunk.raw())?;
        writer.write_all(&region.digest[..digest_field_len])?;
    }

    Ok(version)

}

/// Write a signature file at the given path, then pair its modification time
/// to the image file's so the two can be associated without reading either.
/// Losing the pairing is not fatal, only a warning on the sink.
pub fn write_to<P: AsRef<Path>>(
    path: P,
    sig: &Signature,
    target: SigVersion,
    partition_offset: u64,
    image_path: Option<&Path>,
    diag: &mut dyn DiagSink,
) -> Result<SigVersion, SigError> {

    let path = path.as_ref();
    let file = File::create(path)
        .map_err(|e| SigError::File { op: "create", path: path.into(), source: e })?;

    let mut writer = BufWriter::new(file);
    let version = to_writer(&mut writer, sig, target, partition_offset, diag)?;
    writer.flush()
        .map_err(|e| SigError::File { op: "write", path: path.into(), source: e })?;

    if let Some(image_path) = image_path {
        if let Err(err) = pair_modified(writer.get_ref(), image_path) {
            diag.warning(&format!(
                "cannot pair signature mtime with {}: {err}",
                image_path.display(),
            ));
        }
    }

    Ok(version)

}

/// Copy the image file's modification time onto the freshly written
/// signature file.
fn pair_modified(file: &File, image_path: &Path) -> io::Result<()> {
    let mtime = std::fs::metadata(image_path)?.modified()?;
    file.set_modified(mtime)
}

/// Error type for signature file reading and writing.
#[derive(thiserror::Error, Debug)]
pub enum SigError {
    #[error("io: {0}")]
    Io(#[from] io::Error),
    #[error("{op} {}: {source}", .path.display())]
    File { op: &'static str, path: PathBuf, source: io::Error },
    #[error("the signature file size ({0}) is too short to hold the header")]
    TooSmall(u64),
    #[error("bad signature magic")]
    BadMagic,
    #[error("unsupported signature version {0}")]
    BadVersion(u32),
    #[error("unknown hash kind {0}")]
    BadHashKind(u32),
    #[error("hash kind {kind:?} is not representable by a version {version:?} signature")]
    NarrowHashKind { kind: HashKind, version: SigVersion },
    #[error("zero hash block size")]
    BadHashBlockSize,
    #[error("the region count {nregions} exceeds the file size {stream_len}")]
    TooManyRegions { nregions: u32, stream_len: u64 },
    #[error("region {index} is malformed, out of order or out of range")]
    BadRegion { index: u32 },
    #[error("region at sector {start} lies under the partition offset {partition_offset}")]
    RegionUnderPartition { start: u64, partition_offset: u64 },
    #[error("out of memory reading the signature region table")]
    OutOfMemory,
}
