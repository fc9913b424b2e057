//! Central Directory parser.
//!
//! ZIP archives are read from the end:
//! 1. Find the End of Central Directory (EOCD) in the file's tail
//! 2. If ZIP64, resolve the ZIP64 EOCD through its locator
//! 3. Read the Central Directory to get metadata for all entries
//!
//! The tail is fetched once; when the Central Directory (or the ZIP64
//! EOCD) already sits inside that buffer, no further reads are issued.
//! Over HTTP this keeps a full listing to two range requests at most.

use byteorder::{LittleEndian, ReadBytesExt};
use bytes::Bytes;
use std::io::Cursor;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::io::ByteSource;

use super::structures::*;

/// Maximum ZIP comment size allowed by the format (65535 bytes).
///
/// Bounds the search window when looking for an EOCD behind a comment.
const MAX_COMMENT_SIZE: u64 = 65535;

/// Entry listing plus any non-fatal problems met while decoding it.
pub struct Directory {
    /// Entries in Central Directory order
    pub entries: Vec<ZipEntry>,
    /// Non-fatal decode problems (mid-scan corruption, odd offsets)
    pub warnings: Vec<String>,
}

/// Central Directory parser over any range-capable source.
pub struct DirectoryParser {
    source: Arc<dyn ByteSource>,
    size: u64,
}

impl DirectoryParser {
    /// Create a parser. The source's length must be known.
    pub fn new(source: Arc<dyn ByteSource>) -> Self {
        let size = source.len();
        Self { source, size }
    }

    /// Locate the EOCD, resolve ZIP64 structures, and decode every
    /// Central Directory record.
    ///
    /// A record whose signature check fails mid-scan stops the scan; the
    /// entries decoded so far are returned with a warning. A missing
    /// EOCD, an inconsistent ZIP64 locator, or a truncated directory is
    /// fatal.
    pub async fn read_directory(&self) -> Result<Directory> {
        if self.size < EndOfCentralDirectory::SIZE as u64 {
            return Err(Error::NotAZip);
        }

        let tail_len = (MAX_COMMENT_SIZE + EndOfCentralDirectory::SIZE as u64).min(self.size);
        let tail_start = self.size - tail_len;
        let tail = self.source.read_range(tail_start, self.size - 1).await?;

        let eocd_pos = find_eocd_in_tail(&tail).ok_or(Error::NotAZip)?;
        let eocd = EndOfCentralDirectory::from_bytes(&tail[eocd_pos..])?;

        let (cd_offset, cd_size, total_entries) =
            self.resolve_directory_bounds(&tail, tail_start, eocd_pos, &eocd).await?;

        debug!(
            cd_offset,
            cd_size, total_entries, "central directory located"
        );

        if cd_offset.checked_add(cd_size).map_or(true, |end| end > self.size) {
            return Err(Error::corrupt_directory(
                "central directory extends past end of archive",
            ));
        }

        // Parse in place when the directory is already inside the tail.
        let cd_data: Bytes = if cd_size == 0 {
            Bytes::new()
        } else if cd_offset >= tail_start {
            let lo = (cd_offset - tail_start) as usize;
            tail.slice(lo..lo + cd_size as usize)
        } else {
            self.source
                .read_range(cd_offset, cd_offset + cd_size - 1)
                .await?
        };

        self.parse_records(&cd_data, total_entries)
    }

    /// Resolve directory offset/size/count, following the ZIP64 locator
    /// when one precedes the EOCD.
    async fn resolve_directory_bounds(
        &self,
        tail: &Bytes,
        tail_start: u64,
        eocd_pos: usize,
        eocd: &EndOfCentralDirectory,
    ) -> Result<(u64, u64, u64)> {
        let has_locator = eocd_pos >= Zip64EocdLocator::SIZE
            && &tail[eocd_pos - Zip64EocdLocator::SIZE..eocd_pos - 16]
                == Zip64EocdLocator::SIGNATURE;

        if has_locator {
            let locator =
                Zip64EocdLocator::from_bytes(&tail[eocd_pos - Zip64EocdLocator::SIZE..eocd_pos])?;
            let off = locator.eocd64_offset;
            if off + Zip64Eocd::MIN_SIZE as u64 > self.size {
                return Err(Error::corrupt_directory(
                    "ZIP64 locator points past end of archive",
                ));
            }

            // The ZIP64 EOCD is usually inside the tail already in hand.
            let eocd64 = if off >= tail_start {
                let lo = (off - tail_start) as usize;
                Zip64Eocd::from_bytes(&tail[lo..])?
            } else {
                let raw = self
                    .source
                    .read_range(off, off + Zip64Eocd::MIN_SIZE as u64 - 1)
                    .await?;
                Zip64Eocd::from_bytes(&raw)?
            };

            return Ok((eocd64.cd_offset, eocd64.cd_size, eocd64.total_entries));
        }

        if eocd.is_zip64() {
            return Err(Error::corrupt_directory(
                "ZIP64 sentinel in EOCD but no locator present",
            ));
        }

        Ok((
            u64::from(eocd.cd_offset),
            u64::from(eocd.cd_size),
            u64::from(eocd.total_entries),
        ))
    }

    /// Decode up to `total_entries` file header records from the
    /// directory region.
    fn parse_records(&self, cd_data: &[u8], total_entries: u64) -> Result<Directory> {
        let mut entries = Vec::with_capacity(total_entries.min(1 << 16) as usize);
        let mut warnings = Vec::new();
        let mut cursor = Cursor::new(cd_data);

        for index in 0..total_entries {
            let pos = cursor.position() as usize;
            if pos + 4 > cd_data.len() {
                return Err(Error::corrupt_directory(format!(
                    "directory truncated at record {index}"
                )));
            }
            if &cd_data[pos..pos + 4] != CDFH_SIGNATURE {
                warn!(index, "central directory record signature mismatch");
                warnings.push(format!(
                    "record {index}: bad signature, listing stops here ({} of {total_entries} entries decoded)",
                    entries.len()
                ));
                break;
            }

            let entry = self.parse_record(&mut cursor, cd_data.len())?;

            if entry.local_header_offset + LFH_SIZE as u64 > self.size {
                warnings.push(format!(
                    "entry {:?}: local header offset {} past end of archive",
                    entry.path, entry.local_header_offset
                ));
            }
            entries.push(entry);
        }

        Ok(Directory { entries, warnings })
    }

    /// Decode one Central Directory File Header at the cursor.
    fn parse_record(&self, cursor: &mut Cursor<&[u8]>, cd_len: usize) -> Result<ZipEntry> {
        let mut sig = [0u8; 4];
        std::io::Read::read_exact(cursor, &mut sig)?;

        let _version_made_by = cursor.read_u16::<LittleEndian>()?;
        let _version_needed = cursor.read_u16::<LittleEndian>()?;
        let _flags = cursor.read_u16::<LittleEndian>()?;
        let compression_method = cursor.read_u16::<LittleEndian>()?;
        let last_mod_time = cursor.read_u16::<LittleEndian>()?;
        let last_mod_date = cursor.read_u16::<LittleEndian>()?;
        let crc32 = cursor.read_u32::<LittleEndian>()?;
        let compressed_size32 = cursor.read_u32::<LittleEndian>()?;
        let uncompressed_size32 = cursor.read_u32::<LittleEndian>()?;
        let file_name_length = cursor.read_u16::<LittleEndian>()? as usize;
        let extra_field_length = cursor.read_u16::<LittleEndian>()? as usize;
        let file_comment_length = cursor.read_u16::<LittleEndian>()? as usize;
        let _disk_number_start = cursor.read_u16::<LittleEndian>()?;
        let _internal_attrs = cursor.read_u16::<LittleEndian>()?;
        let _external_attrs = cursor.read_u32::<LittleEndian>()?;
        let lfh_offset32 = cursor.read_u32::<LittleEndian>()?;

        let variable_len = file_name_length + extra_field_length + file_comment_length;
        if cursor.position() as usize + variable_len > cd_len {
            return Err(Error::corrupt_directory(
                "record name/extra/comment extends past directory",
            ));
        }

        let data = *cursor.get_ref();
        let name_start = cursor.position() as usize;
        let name_bytes = &data[name_start..name_start + file_name_length];
        let (path, path_lossy) = match std::str::from_utf8(name_bytes) {
            Ok(s) => (s.to_string(), false),
            Err(_) => (String::from_utf8_lossy(name_bytes).into_owned(), true),
        };
        let is_directory = path.ends_with('/');

        let extra_start = name_start + file_name_length;
        let extra = &data[extra_start..extra_start + extra_field_length];

        let (compressed_size, uncompressed_size, local_header_offset) = apply_zip64_extra(
            extra,
            compressed_size32,
            uncompressed_size32,
            lfh_offset32,
        );

        cursor.set_position((extra_start + extra_field_length + file_comment_length) as u64);

        Ok(ZipEntry {
            path,
            path_lossy,
            compression_method: CompressionMethod::from_u16(compression_method),
            compressed_size,
            uncompressed_size,
            crc32,
            local_header_offset,
            last_modified: DosDateTime::from_dos(last_mod_date, last_mod_time),
            is_directory,
        })
    }
}

/// Backward scan of the tail buffer for the EOCD signature.
///
/// Fast path: an archive without a comment has the EOCD exactly 22 bytes
/// from the end. Otherwise candidates are accepted only when their
/// comment-length field accounts for the bytes behind them, so a stray
/// `PK\x05\x06` inside the comment is not mistaken for the record.
fn find_eocd_in_tail(tail: &[u8]) -> Option<usize> {
    let fixed = EndOfCentralDirectory::SIZE;
    if tail.len() < fixed {
        return None;
    }

    let no_comment_pos = tail.len() - fixed;
    if &tail[no_comment_pos..no_comment_pos + 4] == EndOfCentralDirectory::SIGNATURE
        && tail[no_comment_pos + 20..no_comment_pos + 22] == [0, 0]
    {
        return Some(no_comment_pos);
    }

    for i in (0..=no_comment_pos).rev() {
        if &tail[i..i + 4] == EndOfCentralDirectory::SIGNATURE {
            let comment_len =
                u16::from_le_bytes([tail[i + 20], tail[i + 21]]) as usize;
            if comment_len == tail.len() - i - fixed {
                return Some(i);
            }
        }
    }

    None
}

/// Apply ZIP64 extended-information replacements.
///
/// The 64-bit values appear in order for only those fields whose 32-bit
/// value is the sentinel: uncompressed size, then compressed size, then
/// local header offset, then disk number.
fn apply_zip64_extra(
    extra: &[u8],
    compressed32: u32,
    uncompressed32: u32,
    lfh_offset32: u32,
) -> (u64, u64, u64) {
    let mut compressed = u64::from(compressed32);
    let mut uncompressed = u64::from(uncompressed32);
    let mut lfh_offset = u64::from(lfh_offset32);

    let mut pos = 0usize;
    while pos + 4 <= extra.len() {
        let header_id = u16::from_le_bytes([extra[pos], extra[pos + 1]]);
        let field_size = u16::from_le_bytes([extra[pos + 2], extra[pos + 3]]) as usize;
        let body_start = pos + 4;
        let body_end = (body_start + field_size).min(extra.len());

        if header_id == ZIP64_EXTRA_ID {
            let mut p = body_start;
            let mut take_u64 = |flagged: bool| -> Option<u64> {
                if !flagged {
                    return None;
                }
                if p + 8 > body_end {
                    return None;
                }
                let v = u64::from_le_bytes(extra[p..p + 8].try_into().unwrap());
                p += 8;
                Some(v)
            };

            if let Some(v) = take_u64(uncompressed32 == ZIP64_SENTINEL) {
                uncompressed = v;
            }
            if let Some(v) = take_u64(compressed32 == ZIP64_SENTINEL) {
                compressed = v;
            }
            if let Some(v) = take_u64(lfh_offset32 == ZIP64_SENTINEL) {
                lfh_offset = v;
            }
            // Disk number replacement, if present, is ignored.
        }

        pos = body_end;
    }

    (compressed, uncompressed, lfh_offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_eocd_without_comment() {
        let mut tail = vec![0u8; 100];
        let pos = tail.len() - 22;
        tail[pos..pos + 4].copy_from_slice(EndOfCentralDirectory::SIGNATURE);
        assert_eq!(find_eocd_in_tail(&tail), Some(pos));
    }

    #[test]
    fn finds_eocd_behind_comment() {
        // EOCD followed by a 10-byte comment
        let comment = b"archived!!";
        let mut tail = vec![0u8; 64];
        let pos = tail.len() - 22 - comment.len();
        tail[pos..pos + 4].copy_from_slice(EndOfCentralDirectory::SIGNATURE);
        tail[pos + 20..pos + 22].copy_from_slice(&(comment.len() as u16).to_le_bytes());
        tail[pos + 22..].copy_from_slice(comment);
        assert_eq!(find_eocd_in_tail(&tail), Some(pos));
    }

    #[test]
    fn ignores_signature_with_wrong_comment_length() {
        let mut tail = vec![0u8; 64];
        let pos = 10;
        tail[pos..pos + 4].copy_from_slice(EndOfCentralDirectory::SIGNATURE);
        // comment_len left zero but 32 bytes follow the record
        assert_eq!(find_eocd_in_tail(&tail), None);
    }

    #[test]
    fn zip64_extra_replaces_only_sentinel_fields() {
        // Only the compressed size is deferred; the extra field holds a
        // single u64 that must land on it.
        let mut extra = Vec::new();
        extra.extend_from_slice(&ZIP64_EXTRA_ID.to_le_bytes());
        extra.extend_from_slice(&8u16.to_le_bytes());
        extra.extend_from_slice(&0x1_0000_0005u64.to_le_bytes());

        let (compressed, uncompressed, offset) =
            apply_zip64_extra(&extra, ZIP64_SENTINEL, 500, 1000);
        assert_eq!(compressed, 4_294_967_301);
        assert_eq!(uncompressed, 500);
        assert_eq!(offset, 1000);
    }

    #[test]
    fn zip64_extra_in_declared_order() {
        // Uncompressed and offset deferred; compressed kept 32-bit. The
        // extra field therefore holds [uncompressed, offset].
        let mut extra = Vec::new();
        extra.extend_from_slice(&ZIP64_EXTRA_ID.to_le_bytes());
        extra.extend_from_slice(&16u16.to_le_bytes());
        extra.extend_from_slice(&111u64.to_le_bytes());
        extra.extend_from_slice(&222u64.to_le_bytes());

        let (compressed, uncompressed, offset) =
            apply_zip64_extra(&extra, 99, ZIP64_SENTINEL, ZIP64_SENTINEL);
        assert_eq!(uncompressed, 111);
        assert_eq!(offset, 222);
        assert_eq!(compressed, 99);
    }

    #[test]
    fn skips_foreign_extra_blocks() {
        let mut extra = Vec::new();
        // Unrelated block first (extended timestamp)
        extra.extend_from_slice(&0x5455u16.to_le_bytes());
        extra.extend_from_slice(&5u16.to_le_bytes());
        extra.extend_from_slice(&[1, 2, 3, 4, 5]);
        // Then the ZIP64 block
        extra.extend_from_slice(&ZIP64_EXTRA_ID.to_le_bytes());
        extra.extend_from_slice(&8u16.to_le_bytes());
        extra.extend_from_slice(&777u64.to_le_bytes());

        let (_, uncompressed, _) = apply_zip64_extra(&extra, 0, ZIP64_SENTINEL, 0);
        assert_eq!(uncompressed, 777);
    }
}
