//! Framed binary store format shared by the include caches and snapshots.
//!
//! Layout: a 4-byte little-endian header length, a bincode-encoded
//! [`StoreHeader`], then the bincode-encoded payload. The header is small and
//! decodes without touching the payload, so staleness checks can reject an
//! outdated file before paying for the full decode.

use std::path::{Path, PathBuf};

use kiln_common::ContentHash;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::CacheError;

/// Magic bytes identifying a Kiln store.
const STORE_MAGIC: [u8; 4] = *b"KILN";

/// What a store file contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreKind {
    /// Direct include directives per file.
    DirectIncludes,
    /// Flattened include closures per translation unit.
    FlatClosures,
    /// A build-graph snapshot.
    Snapshot,
}

/// Header prepended to every store file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreHeader {
    /// Magic bytes: must be `b"KILN"`.
    pub magic: [u8; 4],
    /// What the payload holds.
    pub kind: StoreKind,
    /// Schema version of the payload.
    pub schema_version: u32,
    /// Kiln version that wrote the file.
    pub kiln_version: String,
    /// Content hash of the payload bytes.
    pub checksum: ContentHash,
}

/// Serializes `value` and writes it to `path` behind a store header.
///
/// The file is written to a sibling temporary path and renamed into place, so
/// readers never observe a partially written store.
pub fn write_store<T: Serialize>(
    path: &Path,
    kind: StoreKind,
    schema_version: u32,
    value: &T,
) -> Result<(), CacheError> {
    let payload = bincode::serde::encode_to_vec(value, bincode::config::standard()).map_err(
        |e| CacheError::Serialization {
            reason: e.to_string(),
        },
    )?;

    let header = StoreHeader {
        magic: STORE_MAGIC,
        kind,
        schema_version,
        kiln_version: env!("CARGO_PKG_VERSION").to_string(),
        checksum: ContentHash::from_bytes(&payload),
    };
    let header_bytes = bincode::serde::encode_to_vec(&header, bincode::config::standard())
        .map_err(|e| CacheError::Serialization {
            reason: e.to_string(),
        })?;

    let header_len = header_bytes.len() as u32;
    let mut output = Vec::with_capacity(4 + header_bytes.len() + payload.len());
    output.extend_from_slice(&header_len.to_le_bytes());
    output.extend_from_slice(&header_bytes);
    output.extend_from_slice(&payload);

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| CacheError::Io {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }
    let temp = temp_path(path);
    std::fs::write(&temp, &output).map_err(|e| CacheError::Io {
        path: temp.clone(),
        source: e,
    })?;
    std::fs::rename(&temp, path).map_err(|e| CacheError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Reads and validates only the header of a store file.
///
/// Checks the magic bytes; kind and version are left to the caller.
pub fn read_header(path: &Path) -> Result<StoreHeader, CacheError> {
    let raw = std::fs::read(path).map_err(|e| CacheError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    split(path, &raw).map(|(header, _)| header)
}

/// Reads a store file, validating header, kind, schema version and checksum
/// before decoding the payload.
pub fn read_store<T: DeserializeOwned>(
    path: &Path,
    kind: StoreKind,
    schema_version: u32,
) -> Result<T, CacheError> {
    let raw = std::fs::read(path).map_err(|e| CacheError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    let (header, payload) = split(path, &raw)?;

    if header.kind != kind {
        return Err(CacheError::InvalidHeader {
            path: path.to_path_buf(),
            reason: format!("expected a {kind:?} store, found {:?}", header.kind),
        });
    }
    if header.schema_version != schema_version {
        return Err(CacheError::VersionMismatch {
            path: path.to_path_buf(),
            expected: schema_version,
            actual: header.schema_version,
        });
    }
    let actual = ContentHash::from_bytes(payload);
    if actual != header.checksum {
        return Err(CacheError::ChecksumMismatch {
            path: path.to_path_buf(),
            expected: header.checksum.to_string(),
            actual: actual.to_string(),
        });
    }

    bincode::serde::decode_from_slice(payload, bincode::config::standard())
        .map(|(value, _)| value)
        .map_err(|e| CacheError::Serialization {
            reason: e.to_string(),
        })
}

fn split<'a>(path: &Path, raw: &'a [u8]) -> Result<(StoreHeader, &'a [u8]), CacheError> {
    let invalid = |reason: &str| CacheError::InvalidHeader {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };

    let len_bytes: [u8; 4] = raw
        .get(..4)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| invalid("file shorter than the length prefix"))?;
    let header_len = u32::from_le_bytes(len_bytes) as usize;
    let header_bytes = raw
        .get(4..4 + header_len)
        .ok_or_else(|| invalid("truncated header"))?;

    let header: StoreHeader =
        bincode::serde::decode_from_slice(header_bytes, bincode::config::standard())
            .map_err(|e| invalid(&e.to_string()))?
            .0;
    if header.magic != STORE_MAGIC {
        return Err(invalid("missing magic bytes"));
    }
    Ok((header, &raw[4 + header_len..]))
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
