//! Binary snapshot of a [`VectorIndex`].
//!
//! ```text
//! header:  magic "GCQIDX\0\1" | version u32 | dim u32 |
//!          provider (u16 len + utf8) | model (u16 len + utf8) | entry_count u64
//! entry:   id (u16 len + utf8) | path (u16 len + utf8) |
//!          byte_start u64 | byte_end u64 | line_start u32 | line_end u32 |
//!          dim x f32
//! trailer: crc32 u32 over header + entries
//! ```
//!
//! All integers little-endian. Writes go to `<path>.tmp`, are fsynced and
//! renamed over the target.

use crate::error::{Result, VectorStoreError};
use crate::index::{ChunkMeta, IndexEntry, IndexIdentity, IndexState, VectorIndex, NORM_TOLERANCE};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const SNAPSHOT_MAGIC: [u8; 8] = *b"GCQIDX\0\x01";
pub const SNAPSHOT_VERSION: u32 = 1;

/// Tolerance for norms read back from disk.
const LOAD_NORM_TOLERANCE: f32 = NORM_TOLERANCE * 10.0;

struct CrcWriter<W> {
    inner: W,
    hasher: crc32fast::Hasher,
}

impl<W: Write> Write for CrcWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

struct CrcReader<R> {
    inner: R,
    hasher: crc32fast::Hasher,
}

impl<R: Read> Read for CrcReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn write_str<W: Write>(w: &mut W, s: &str, what: &str) -> Result<()> {
    let len = u16::try_from(s.len()).map_err(|_| {
        VectorStoreError::Encoding(format!("{what} longer than {} bytes", u16::MAX))
    })?;
    w.write_all(&len.to_le_bytes())?;
    w.write_all(s.as_bytes())?;
    Ok(())
}

fn write_entry<W: Write>(w: &mut W, entry: &IndexEntry) -> Result<()> {
    let meta = &entry.meta;
    write_str(w, &meta.chunk_id, "chunk id")?;
    write_str(w, &meta.file_path, "file path")?;
    w.write_all(&meta.byte_start.to_le_bytes())?;
    w.write_all(&meta.byte_end.to_le_bytes())?;
    w.write_all(&meta.line_start.to_le_bytes())?;
    w.write_all(&meta.line_end.to_le_bytes())?;
    for x in &entry.vector {
        w.write_all(&x.to_le_bytes())?;
    }
    Ok(())
}

impl VectorIndex {
    /// Write a snapshot to `path` atomically. Holds the read lock while
    /// serializing, so writers wait.
    pub fn snapshot(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = tmp_path(path);
        let identity = self.identity();
        let dim = u32::try_from(identity.dimension)
            .map_err(|_| VectorStoreError::Encoding("dimension exceeds u32".into()))?;

        let result = (|| -> Result<()> {
            let file = File::create(&tmp)?;
            let mut w = CrcWriter {
                inner: BufWriter::new(file),
                hasher: crc32fast::Hasher::new(),
            };

            let state = self.read();
            w.write_all(&SNAPSHOT_MAGIC)?;
            w.write_all(&SNAPSHOT_VERSION.to_le_bytes())?;
            w.write_all(&dim.to_le_bytes())?;
            write_str(&mut w, &identity.provider, "provider name")?;
            write_str(&mut w, &identity.model, "model name")?;
            w.write_all(&(state.len as u64).to_le_bytes())?;
            for entries in state.files.values() {
                for entry in entries.iter() {
                    write_entry(&mut w, entry)?;
                }
            }
            drop(state);

            let crc = w.hasher.finalize();
            let mut inner = w.inner;
            inner.write_all(&crc.to_le_bytes())?;
            let file = inner
                .into_inner()
                .map_err(|e| VectorStoreError::Io(e.into_error()))?;
            file.sync_all()?;
            Ok(())
        })();

        if let Err(err) = result {
            let _ = std::fs::remove_file(&tmp);
            return Err(err);
        }
        std::fs::rename(&tmp, path)?;
        sync_parent(path);
        Ok(())
    }

    /// Replace the index contents with the snapshot at `path`.
    ///
    /// The file is fully decoded and verified before the swap; on any error
    /// the in-memory index is untouched. A header whose identity differs
    /// from this index fails with `IncompatibleSnapshot`.
    pub fn load(&self, path: &Path) -> Result<usize> {
        let file = File::open(path)?;
        let mut r = CrcReader {
            inner: BufReader::new(file),
            hasher: crc32fast::Hasher::new(),
        };

        let mut magic = [0u8; 8];
        read_exact(&mut r, &mut magic)?;
        if magic != SNAPSHOT_MAGIC {
            return Err(VectorStoreError::CorruptSnapshot("bad magic".into()));
        }
        let version = read_u32(&mut r)?;
        if version != SNAPSHOT_VERSION {
            return Err(VectorStoreError::CorruptSnapshot(format!(
                "unsupported version {version}"
            )));
        }
        let dim = read_u32(&mut r)? as usize;
        let provider = read_str(&mut r)?;
        let model = read_str(&mut r)?;
        let found = IndexIdentity::new(provider, model, dim);
        if &found != self.identity() {
            return Err(VectorStoreError::IncompatibleSnapshot {
                expected: self.identity().clone(),
                found,
            });
        }

        let count = read_u64(&mut r)?;
        let mut grouped: BTreeMap<String, Vec<IndexEntry>> = BTreeMap::new();
        for _ in 0..count {
            let entry = read_entry(&mut r, dim)?;
            grouped
                .entry(entry.meta.file_path.clone())
                .or_default()
                .push(entry);
        }

        let expected_crc = r.hasher.clone().finalize();
        let mut trailer = [0u8; 4];
        r.inner.read_exact(&mut trailer).map_err(truncated)?;
        if u32::from_le_bytes(trailer) != expected_crc {
            return Err(VectorStoreError::CorruptSnapshot("checksum mismatch".into()));
        }
        let mut rest = [0u8; 1];
        if r.inner.read(&mut rest)? != 0 {
            return Err(VectorStoreError::CorruptSnapshot(
                "trailing bytes after checksum".into(),
            ));
        }

        let mut files = BTreeMap::new();
        let mut len = 0;
        for (path, mut entries) in grouped {
            entries.sort_by(|a, b| {
                a.meta
                    .byte_start
                    .cmp(&b.meta.byte_start)
                    .then_with(|| a.meta.chunk_id.cmp(&b.meta.chunk_id))
            });
            len += entries.len();
            let slice: Arc<[IndexEntry]> = entries.into();
            files.insert(path, slice);
        }

        {
            let mut state = self.write();
            *state = IndexState { files, len };
        }
        self.bump_revision();
        Ok(len)
    }
}

#[cfg(unix)]
fn sync_parent(path: &Path) {
    if let Some(parent) = path.parent() {
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) {}

fn truncated(err: io::Error) -> VectorStoreError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        VectorStoreError::CorruptSnapshot("truncated".into())
    } else {
        VectorStoreError::Io(err)
    }
}

fn read_exact<R: Read>(r: &mut R, buf: &mut [u8]) -> Result<()> {
    r.read_exact(buf).map_err(truncated)
}

fn read_u16<R: Read>(r: &mut R) -> Result<u16> {
    let mut buf = [0u8; 2];
    read_exact(r, &mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

fn read_u32<R: Read>(r: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    read_exact(r, &mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64<R: Read>(r: &mut R) -> Result<u64> {
    let mut buf = [0u8; 8];
    read_exact(r, &mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_str<R: Read>(r: &mut R) -> Result<String> {
    let len = read_u16(r)? as usize;
    let mut buf = vec![0u8; len];
    read_exact(r, &mut buf)?;
    String::from_utf8(buf).map_err(|_| VectorStoreError::CorruptSnapshot("invalid UTF-8".into()))
}

fn read_entry<R: Read>(r: &mut R, dim: usize) -> Result<IndexEntry> {
    let chunk_id = read_str(r)?;
    let file_path = read_str(r)?;
    let byte_start = read_u64(r)?;
    let byte_end = read_u64(r)?;
    let line_start = read_u32(r)?;
    let line_end = read_u32(r)?;

    let mut raw = vec![0u8; dim * 4];
    read_exact(r, &mut raw)?;
    let vector: Vec<f32> = raw
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if (norm - 1.0).abs() > LOAD_NORM_TOLERANCE {
        return Err(VectorStoreError::CorruptSnapshot(format!(
            "chunk {chunk_id} has norm {norm}"
        )));
    }

    Ok(IndexEntry {
        meta: ChunkMeta {
            chunk_id,
            file_path,
            byte_start,
            byte_end,
            line_start,
            line_end,
        },
        vector,
    })
}
