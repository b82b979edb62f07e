//! Filesystem abstraction.
//!
//! The engine needs a byte-addressable, seekable handle and nothing else,
//! so the store surface is deliberately small. Two backends: [`StdFileStore`]
//! over `std::fs`, and [`MemFileStore`] keeping files in memory for tests
//! and simulations.

use crate::error::SessionError;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::rc::Rc;

/// How a file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Existing file, read-only
    Read,
    /// Create or truncate, write-only
    Write,
}

/// A seekable file handle owned by one session for its lifetime.
pub trait FileHandle {
    /// Read into `buf` from the current position.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    /// Write all of `buf` at the current position.
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;
    /// Move the read/write position to an absolute offset.
    fn seek(&mut self, pos: u64) -> io::Result<()>;
    /// Current read/write position.
    fn position(&self) -> u64;
    /// Current size of the file in bytes.
    fn size(&self) -> u64;
    /// Push buffered writes to the backing store.
    fn flush(&mut self) -> io::Result<()>;
}

/// Opens file handles by path.
pub trait FileStore {
    /// Open `path` in the given mode. Directories are rejected.
    fn open(&mut self, path: &str, mode: OpenMode) -> Result<Box<dyn FileHandle>, SessionError>;
}

/// [`FileStore`] over the real filesystem.
#[derive(Debug, Default)]
pub struct StdFileStore;

impl FileStore for StdFileStore {
    fn open(&mut self, path: &str, mode: OpenMode) -> Result<Box<dyn FileHandle>, SessionError> {
        if let Ok(meta) = std::fs::metadata(path) {
            if meta.is_dir() {
                return Err(SessionError::IsDirectory(path.to_string()));
            }
        }
        let (file, size) = match mode {
            OpenMode::Read => {
                let file = File::open(path)?;
                let size = file.metadata()?.len();
                (file, size)
            }
            OpenMode::Write => (File::create(path)?, 0),
        };
        Ok(Box::new(StdFileHandle {
            file,
            pos: 0,
            size,
        }))
    }
}

struct StdFileHandle {
    file: File,
    pos: u64,
    size: u64,
}

impl FileHandle for StdFileHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.file.read(buf)?;
        self.pos += n as u64;
        Ok(n)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.file.write_all(buf)?;
        self.pos += buf.len() as u64;
        self.size = self.size.max(self.pos);
        Ok(())
    }

    fn seek(&mut self, pos: u64) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(pos))?;
        self.pos = pos;
        Ok(())
    }

    fn position(&self) -> u64 {
        self.pos
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// In-memory [`FileStore`] for tests and simulations.
///
/// Clones share the same backing map, so a test can keep one clone and
/// inspect what a session wrote through another.
#[derive(Debug, Clone, Default)]
pub struct MemFileStore {
    files: Rc<RefCell<HashMap<String, Rc<RefCell<Vec<u8>>>>>>,
}

impl MemFileStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a file.
    pub fn insert(&self, path: &str, contents: &[u8]) {
        self.files
            .borrow_mut()
            .insert(path.to_string(), Rc::new(RefCell::new(contents.to_vec())));
    }

    /// Contents of a file, if present.
    pub fn contents(&self, path: &str) -> Option<Vec<u8>> {
        self.files
            .borrow()
            .get(path)
            .map(|data| data.borrow().clone())
    }
}

impl FileStore for MemFileStore {
    fn open(&mut self, path: &str, mode: OpenMode) -> Result<Box<dyn FileHandle>, SessionError> {
        let data = match mode {
            OpenMode::Read => self
                .files
                .borrow()
                .get(path)
                .cloned()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.to_string()))?,
            OpenMode::Write => {
                let data = Rc::new(RefCell::new(Vec::new()));
                self.files
                    .borrow_mut()
                    .insert(path.to_string(), Rc::clone(&data));
                data
            }
        };
        Ok(Box::new(MemFileHandle { data, pos: 0 }))
    }
}

struct MemFileHandle {
    data: Rc<RefCell<Vec<u8>>>,
    pos: u64,
}

impl FileHandle for MemFileHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let data = self.data.borrow();
        let start = (self.pos as usize).min(data.len());
        let n = (data.len() - start).min(buf.len());
        buf[..n].copy_from_slice(&data[start..start + n]);
        drop(data);
        self.pos += n as u64;
        Ok(n)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        let mut data = self.data.borrow_mut();
        let start = self.pos as usize;
        if data.len() < start {
            data.resize(start, 0);
        }
        let overlap = (data.len() - start).min(buf.len());
        data[start..start + overlap].copy_from_slice(&buf[..overlap]);
        data.extend_from_slice(&buf[overlap..]);
        drop(data);
        self.pos += buf.len() as u64;
        Ok(())
    }

    fn seek(&mut self, pos: u64) -> io::Result<()> {
        self.pos = pos;
        Ok(())
    }

    fn position(&self) -> u64 {
        self.pos
    }

    fn size(&self) -> u64 {
        self.data.borrow().len() as u64
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn std_store_reads_and_sizes() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"0123456789").unwrap();

        let mut store = StdFileStore;
        let path = tmp.path().to_str().unwrap().to_string();
        let mut handle = store.open(&path, OpenMode::Read).unwrap();
        assert_eq!(handle.size(), 10);

        let mut buf = [0u8; 4];
        assert_eq!(handle.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"0123");
        assert_eq!(handle.position(), 4);

        handle.seek(8).unwrap();
        assert_eq!(handle.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"89");
    }

    #[test]
    fn std_store_rejects_directories() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = StdFileStore;
        let path = dir.path().to_str().unwrap().to_string();
        assert!(matches!(
            store.open(&path, OpenMode::Read),
            Err(SessionError::IsDirectory(_))
        ));
        assert!(matches!(
            store.open(&path, OpenMode::Write),
            Err(SessionError::IsDirectory(_))
        ));
    }

    #[test]
    fn std_store_write_tracks_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let path = path.to_str().unwrap().to_string();

        let mut store = StdFileStore;
        let mut handle = store.open(&path, OpenMode::Write).unwrap();
        handle.write_all(b"hello").unwrap();
        handle.flush().unwrap();
        assert_eq!(handle.size(), 5);
        assert_eq!(std::fs::read(&path).unwrap(), b"hello");
    }

    #[test]
    fn mem_store_round_trip() {
        let store = MemFileStore::new();
        store.insert("/in.txt", b"abc");

        let mut writer = store.clone();
        let mut handle = writer.open("/out.txt", OpenMode::Write).unwrap();
        handle.write_all(b"xyz").unwrap();
        assert_eq!(store.contents("/out.txt").unwrap(), b"xyz");

        let mut handle = writer.open("/in.txt", OpenMode::Read).unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(handle.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], b"abc");
        assert_eq!(handle.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn mem_store_missing_file() {
        let mut store = MemFileStore::new();
        assert!(store.open("/nope", OpenMode::Read).is_err());
    }

    #[test]
    fn mem_store_seek_back_overwrites() {
        let mut store = MemFileStore::new();
        let mut handle = store.open("/f", OpenMode::Write).unwrap();
        handle.write_all(b"aaaa").unwrap();
        handle.seek(2).unwrap();
        handle.write_all(b"bb").unwrap();
        assert_eq!(store.contents("/f").unwrap(), b"aabb");
        assert_eq!(handle.size(), 4);
    }
}
