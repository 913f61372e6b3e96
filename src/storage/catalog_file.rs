//! Catalog file format: one checksummed, compressed snapshot per file.
//!
//! ```text
//! +-----------------------------+
//! | header (64 bytes)           |
//! +-----------------------------+
//! | zstd(bincode(snapshot))     |
//! +-----------------------------+
//! ```
//!
//! Files are written next to their final location and renamed into place,
//! so a crash leaves either the previous catalog or the new one.

use crate::error::{Error, Result};
use crate::storage::catalog::CatalogSnapshot;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Catalog file format version
pub const CATALOG_VERSION: u8 = 1;

/// Header size (64 bytes)
pub const HEADER_SIZE: usize = 64;

/// Magic number: "WFDB1"
pub const MAGIC: &[u8; 5] = b"WFDB1";

/// Compression level for ZSTD (1-22, higher = better compression but slower)
pub const ZSTD_COMPRESSION_LEVEL: i32 = 3;

/// Body is compressed with ZSTD
pub const FLAG_COMPRESSED: u8 = 0x01;

/// Catalog header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogHeader {
    pub generation: u64,
    pub file_count: u32,
    pub segment_count: u32,
    pub restriction_count: u32,
    pub uncompressed_size: u64,
    pub compressed_size: u64,
    pub checksum: u32,
    pub flags: u8,
}

impl CatalogHeader {
    /// Serialize header to bytes
    pub fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE);

        buf.put_slice(MAGIC);
        buf.put_u8(CATALOG_VERSION);
        // Reserved
        buf.put_u16(0);
        buf.put_u64(self.generation);
        buf.put_u32(self.file_count);
        buf.put_u32(self.segment_count);
        buf.put_u32(self.restriction_count);
        buf.put_u64(self.uncompressed_size);
        buf.put_u64(self.compressed_size);
        buf.put_u32(self.checksum);
        buf.put_u8(self.flags);

        // Padding to 64 bytes: 5+1+2+8+4+4+4+8+8+4+1 = 49, need 15 more
        buf.put_bytes(0, 15);

        debug_assert_eq!(buf.len(), HEADER_SIZE);
        buf.freeze()
    }

    /// Deserialize header from bytes
    pub fn deserialize(mut buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(Error::Storage("Invalid header size".to_string()));
        }

        let magic = &buf[0..5];
        if magic != MAGIC {
            return Err(Error::Storage(format!("Invalid magic number: {:?}", magic)));
        }
        buf.advance(5);

        let version = buf.get_u8();
        if version != CATALOG_VERSION {
            return Err(Error::Storage(format!("Unsupported version: {}", version)));
        }
        buf.advance(2);

        Ok(Self {
            generation: buf.get_u64(),
            file_count: buf.get_u32(),
            segment_count: buf.get_u32(),
            restriction_count: buf.get_u32(),
            uncompressed_size: buf.get_u64(),
            compressed_size: buf.get_u64(),
            checksum: buf.get_u32(),
            flags: buf.get_u8(),
        })
    }
}

/// Write `snapshot` to `path`, replacing any previous catalog atomically
pub fn write_catalog(path: &Path, snapshot: &CatalogSnapshot) -> Result<CatalogHeader> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let body = bincode::serialize(snapshot)?;
    let compressed = zstd::encode_all(&body[..], ZSTD_COMPRESSION_LEVEL)
        .map_err(|e| Error::Storage(format!("ZSTD compression failed: {}", e)))?;

    let header = CatalogHeader {
        generation: snapshot.generation,
        file_count: snapshot.files.len() as u32,
        segment_count: snapshot.segments.len() as u32,
        restriction_count: snapshot.restrictions.len() as u32,
        uncompressed_size: body.len() as u64,
        compressed_size: compressed.len() as u64,
        checksum: crc32fast::hash(&compressed),
        flags: FLAG_COMPRESSED,
    };

    let staging = staging_path(path);
    {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&staging)?;
        file.write_all(&header.serialize())?;
        file.write_all(&compressed)?;
        file.sync_all()?;
    }
    std::fs::rename(&staging, path)?;
    Ok(header)
}

/// Read and verify the catalog at `path`
pub fn read_catalog(path: &Path) -> Result<(CatalogHeader, CatalogSnapshot)> {
    let mut file = File::open(path)?;

    let mut header_buf = vec![0u8; HEADER_SIZE];
    file.read_exact(&mut header_buf)?;
    let header = CatalogHeader::deserialize(&header_buf)?;

    let available = file.metadata()?.len().saturating_sub(HEADER_SIZE as u64);
    if header.compressed_size != available {
        return Err(Error::Storage(format!(
            "Catalog size mismatch: header claims {} bytes, file holds {}",
            header.compressed_size, available
        )));
    }

    let mut payload = Vec::with_capacity(available as usize);
    file.read_to_end(&mut payload)?;
    if payload.len() as u64 != header.compressed_size {
        return Err(Error::Storage(format!(
            "Truncated catalog: expected {} bytes, found {}",
            header.compressed_size,
            payload.len()
        )));
    }

    let checksum = crc32fast::hash(&payload);
    if checksum != header.checksum {
        return Err(Error::Storage(format!(
            "Checksum mismatch: expected {}, got {}",
            header.checksum, checksum
        )));
    }

    let body = if header.flags & FLAG_COMPRESSED != 0 {
        zstd::decode_all(&payload[..])
            .map_err(|e| Error::Storage(format!("ZSTD decompression failed: {}", e)))?
    } else {
        payload
    };
    let snapshot: CatalogSnapshot = bincode::deserialize(&body)?;

    if snapshot.files.len() != header.file_count as usize
        || snapshot.segments.len() != header.segment_count as usize
    {
        return Err(Error::Storage(
            "Catalog counts do not match its header".to_string(),
        ));
    }
    Ok((header, snapshot))
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
