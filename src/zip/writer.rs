//! ZIP assembly for selective re-archival.
//!
//! Writes standard Local File Headers, a fresh Central Directory, and an
//! EOCD, all little-endian. Files are DEFLATE-compressed at the default
//! level; directories become zero-length STORED entries. The writer emits
//! plain (non-ZIP64) archives and refuses outputs whose offsets would
//! overflow 32 bits.

use byteorder::{LittleEndian, WriteBytesExt};
use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::io::Write;

use crate::error::{Error, Result};

use super::structures::{DosDateTime, CDFH_SIGNATURE, LFH_SIGNATURE};

/// General-purpose flag: names are UTF-8
const GP_FLAG_UTF8: u16 = 0x0800;

/// Version needed to extract (2.0 covers DEFLATE)
const VERSION_NEEDED: u16 = 20;

/// DOS directory attribute bit for external attributes
const DOS_DIR_ATTR: u32 = 0x10;

struct Record {
    path: String,
    method: u16,
    crc32: u32,
    compressed_size: u32,
    uncompressed_size: u32,
    lfh_offset: u32,
    dos_time: u16,
    dos_date: u16,
    is_directory: bool,
}

/// Incremental in-memory ZIP writer.
pub struct ZipWriter {
    buf: Vec<u8>,
    records: Vec<Record>,
}

impl ZipWriter {
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            records: Vec::new(),
        }
    }

    /// Append a file entry, DEFLATE-compressed at the default level.
    pub fn add_file(&mut self, path: &str, data: &[u8], modified: DosDateTime) -> Result<()> {
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data)?;
        let compressed = encoder.finish()?;

        let crc = {
            let mut hasher = crc32fast::Hasher::new();
            hasher.update(data);
            hasher.finalize()
        };

        self.append_entry(path, &compressed, data.len(), crc, 8, modified, false)
    }

    /// Append a directory entry (zero-length, STORED).
    pub fn add_directory(&mut self, path: &str, modified: DosDateTime) -> Result<()> {
        let path = if path.ends_with('/') {
            path.to_string()
        } else {
            format!("{path}/")
        };
        self.append_entry(&path, &[], 0, 0, 0, modified, true)
    }

    #[allow(clippy::too_many_arguments)]
    fn append_entry(
        &mut self,
        path: &str,
        stored: &[u8],
        uncompressed_len: usize,
        crc32: u32,
        method: u16,
        modified: DosDateTime,
        is_directory: bool,
    ) -> Result<()> {
        let lfh_offset = self.checked_u32(self.buf.len() as u64)?;
        let compressed_size = self.checked_u32(stored.len() as u64)?;
        let uncompressed_size = self.checked_u32(uncompressed_len as u64)?;
        let (dos_date, dos_time) = modified.to_dos();

        let name = path.as_bytes();
        self.buf.write_all(LFH_SIGNATURE)?;
        self.buf.write_u16::<LittleEndian>(VERSION_NEEDED)?;
        self.buf.write_u16::<LittleEndian>(GP_FLAG_UTF8)?;
        self.buf.write_u16::<LittleEndian>(method)?;
        self.buf.write_u16::<LittleEndian>(dos_time)?;
        self.buf.write_u16::<LittleEndian>(dos_date)?;
        self.buf.write_u32::<LittleEndian>(crc32)?;
        self.buf.write_u32::<LittleEndian>(compressed_size)?;
        self.buf.write_u32::<LittleEndian>(uncompressed_size)?;
        self.buf.write_u16::<LittleEndian>(name.len() as u16)?;
        self.buf.write_u16::<LittleEndian>(0)?; // extra field length
        self.buf.write_all(name)?;
        self.buf.write_all(stored)?;

        self.records.push(Record {
            path: path.to_string(),
            method,
            crc32,
            compressed_size,
            uncompressed_size,
            lfh_offset,
            dos_time,
            dos_date,
            is_directory,
        });
        Ok(())
    }

    /// Write the Central Directory and EOCD, returning the archive bytes.
    pub fn finish(mut self) -> Result<Vec<u8>> {
        let cd_offset = self.checked_u32(self.buf.len() as u64)?;

        for record in &self.records {
            let name = record.path.as_bytes();
            self.buf.write_all(CDFH_SIGNATURE)?;
            self.buf.write_u16::<LittleEndian>(VERSION_NEEDED)?; // version made by
            self.buf.write_u16::<LittleEndian>(VERSION_NEEDED)?;
            self.buf.write_u16::<LittleEndian>(GP_FLAG_UTF8)?;
            self.buf.write_u16::<LittleEndian>(record.method)?;
            self.buf.write_u16::<LittleEndian>(record.dos_time)?;
            self.buf.write_u16::<LittleEndian>(record.dos_date)?;
            self.buf.write_u32::<LittleEndian>(record.crc32)?;
            self.buf.write_u32::<LittleEndian>(record.compressed_size)?;
            self.buf.write_u32::<LittleEndian>(record.uncompressed_size)?;
            self.buf.write_u16::<LittleEndian>(name.len() as u16)?;
            self.buf.write_u16::<LittleEndian>(0)?; // extra field length
            self.buf.write_u16::<LittleEndian>(0)?; // comment length
            self.buf.write_u16::<LittleEndian>(0)?; // disk number start
            self.buf.write_u16::<LittleEndian>(0)?; // internal attributes
            self.buf.write_u32::<LittleEndian>(if record.is_directory {
                DOS_DIR_ATTR
            } else {
                0
            })?;
            self.buf.write_u32::<LittleEndian>(record.lfh_offset)?;
            self.buf.write_all(name)?;
        }

        let cd_end = self.buf.len() as u64;
        let cd_size = self.checked_u32(cd_end - u64::from(cd_offset))?;
        let count = u16::try_from(self.records.len()).map_err(|_| Error::ArchiveOverflow {
            offset: cd_end,
        })?;

        self.buf.write_all(b"PK\x05\x06")?;
        self.buf.write_u16::<LittleEndian>(0)?; // disk number
        self.buf.write_u16::<LittleEndian>(0)?; // disk with central directory
        self.buf.write_u16::<LittleEndian>(count)?;
        self.buf.write_u16::<LittleEndian>(count)?;
        self.buf.write_u32::<LittleEndian>(cd_size)?;
        self.buf.write_u32::<LittleEndian>(cd_offset)?;
        self.buf.write_u16::<LittleEndian>(0)?; // comment length

        Ok(self.buf)
    }

    fn checked_u32(&self, value: u64) -> Result<u32> {
        if value >= u64::from(u32::MAX) {
            return Err(Error::ArchiveOverflow {
                offset: self.buf.len() as u64,
            });
        }
        Ok(value as u32)
    }
}

impl Default for ZipWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{BufferSource, ByteSource};
    use crate::zip::extractor::EntryExtractor;
    use crate::zip::parser::DirectoryParser;
    use crate::Policy;
    use std::sync::Arc;

    fn stamp() -> DosDateTime {
        DosDateTime {
            year: 2023,
            month: 7,
            day: 4,
            hour: 12,
            minute: 0,
            second: 0,
        }
    }

    #[tokio::test]
    async fn written_archive_parses_back() {
        let mut writer = ZipWriter::new();
        writer.add_directory("docs", stamp()).unwrap();
        writer.add_file("docs/a.txt", b"hello", stamp()).unwrap();
        writer
            .add_file("docs/b.bin", &[0xAAu8; 4096], stamp())
            .unwrap();
        let archive = writer.finish().unwrap();

        let source: Arc<dyn ByteSource> = Arc::new(BufferSource::new(archive));
        let dir = DirectoryParser::new(source.clone())
            .read_directory()
            .await
            .unwrap();
        assert!(dir.warnings.is_empty());
        assert_eq!(dir.entries.len(), 3);
        assert_eq!(dir.entries[0].path, "docs/");
        assert!(dir.entries[0].is_directory);
        assert_eq!(dir.entries[1].path, "docs/a.txt");
        assert_eq!(dir.entries[1].uncompressed_size, 5);
        assert_eq!(dir.entries[1].last_modified, stamp());

        let extractor = EntryExtractor::new(source, Policy::default());
        let a = extractor.fetch_raw(&dir.entries[1]).await.unwrap();
        assert_eq!(&a[..], b"hello");
        let b = extractor.fetch_raw(&dir.entries[2]).await.unwrap();
        assert_eq!(&b[..], &[0xAAu8; 4096][..]);
    }

    #[tokio::test]
    async fn compresses_repetitive_content() {
        let mut writer = ZipWriter::new();
        writer
            .add_file("big.dat", &vec![0x41u8; 1 << 20], stamp())
            .unwrap();
        let archive = writer.finish().unwrap();
        // A megabyte of 'A' must deflate well below its raw size.
        assert!(archive.len() < 64 * 1024);

        let source: Arc<dyn ByteSource> = Arc::new(BufferSource::new(archive));
        let dir = DirectoryParser::new(source.clone())
            .read_directory()
            .await
            .unwrap();
        let entry = &dir.entries[0];
        assert!(entry.compressed_size < entry.uncompressed_size);

        let extractor = EntryExtractor::new(source, Policy::default());
        let data = extractor.fetch_raw(entry).await.unwrap();
        assert_eq!(data.len(), 1 << 20);
        assert!(data.iter().all(|&b| b == 0x41));
    }
}
