//! Persistent key/value byte store collaborator and two reference
//! implementations: an in-memory map for tests and a single-file store for
//! the simulator. On hardware this seam wraps the MCU's preferences/EEPROM
//! API.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;

/// Namespaced byte store. Writes become durable on `commit`; the node
/// treats a store failure as best-effort (logged and surfaced, in-memory
/// state kept).
pub trait Storage {
    /// Open (and create if needed) the given namespace. Fatal to
    /// [`Node::begin`] on failure.
    ///
    /// [`Node::begin`]: crate::Node::begin
    fn open(&mut self, namespace: &str, read_only: bool) -> anyhow::Result<()>;

    /// Returns None for keys never written — a freshly-erased store reads
    /// as empty, not as an error.
    fn get_bytes(&self, key: &str) -> Option<Vec<u8>>;

    fn put_bytes(&mut self, key: &str, data: &[u8]) -> anyhow::Result<()>;

    fn get_u32(&self, key: &str, default: u32) -> u32 {
        self.get_bytes(key)
            .and_then(|b| <[u8; 4]>::try_from(b.as_slice()).ok())
            .map(u32::from_le_bytes)
            .unwrap_or(default)
    }

    fn put_u32(&mut self, key: &str, value: u32) -> anyhow::Result<()> {
        self.put_bytes(key, &value.to_le_bytes())
    }

    /// Drop every key in the namespace.
    fn clear(&mut self) -> anyhow::Result<()>;

    /// Flush pending writes.
    fn commit(&mut self) -> anyhow::Result<()>;
}

// -- In-memory store --

/// Volatile store for tests and ephemeral nodes.
#[derive(Debug, Default)]
pub struct MemStore {
    entries: HashMap<String, Vec<u8>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemStore {
    fn open(&mut self, _namespace: &str, _read_only: bool) -> anyhow::Result<()> {
        Ok(())
    }

    fn get_bytes(&self, key: &str) -> Option<Vec<u8>> {
        self.entries.get(key).cloned()
    }

    fn put_bytes(&mut self, key: &str, data: &[u8]) -> anyhow::Result<()> {
        self.entries.insert(key.to_string(), data.to_vec());
        Ok(())
    }

    fn clear(&mut self) -> anyhow::Result<()> {
        self.entries.clear();
        Ok(())
    }

    fn commit(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

// -- Single-file store --

const FILE_MAGIC: [u8; 4] = *b"MLKV";

/// File-backed store: one file per namespace under a base directory.
/// Entry layout after the magic: key_len(1), key, value_len(2 LE), value.
/// Commits write a temp file and rename it into place, so a crash mid-write
/// leaves the previous snapshot intact.
#[derive(Debug)]
pub struct FileStore {
    base_dir: PathBuf,
    path: Option<PathBuf>,
    read_only: bool,
    entries: HashMap<String, Vec<u8>>,
    dirty: bool,
}

impl FileStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            path: None,
            read_only: false,
            entries: HashMap::new(),
            dirty: false,
        }
    }

    fn load(path: &PathBuf) -> anyhow::Result<HashMap<String, Vec<u8>>> {
        let data = match fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => return Err(e).context("reading store file"),
        };

        let mut entries = HashMap::new();
        if data.len() < 4 || data[0..4] != FILE_MAGIC {
            // Virgin or foreign file: start empty rather than failing
            return Ok(entries);
        }

        let mut offset = 4;
        while offset < data.len() {
            let key_len = data[offset] as usize;
            offset += 1;
            if offset + key_len + 2 > data.len() {
                break;
            }
            let key = String::from_utf8_lossy(&data[offset..offset + key_len]).to_string();
            offset += key_len;
            let value_len =
                u16::from_le_bytes([data[offset], data[offset + 1]]) as usize;
            offset += 2;
            if offset + value_len > data.len() {
                break;
            }
            entries.insert(key, data[offset..offset + value_len].to_vec());
            offset += value_len;
        }
        Ok(entries)
    }

    fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64);
        buf.extend_from_slice(&FILE_MAGIC);
        for (key, value) in &self.entries {
            buf.push(key.len().min(255) as u8);
            buf.extend_from_slice(&key.as_bytes()[..key.len().min(255)]);
            buf.extend_from_slice(&(value.len().min(u16::MAX as usize) as u16).to_le_bytes());
            buf.extend_from_slice(&value[..value.len().min(u16::MAX as usize)]);
        }
        buf
    }
}

impl Storage for FileStore {
    fn open(&mut self, namespace: &str, read_only: bool) -> anyhow::Result<()> {
        fs::create_dir_all(&self.base_dir)
            .with_context(|| format!("creating store dir {}", self.base_dir.display()))?;
        let path = self.base_dir.join(format!("{namespace}.kv"));
        self.entries = Self::load(&path)?;
        self.path = Some(path);
        self.read_only = read_only;
        self.dirty = false;
        Ok(())
    }

    fn get_bytes(&self, key: &str) -> Option<Vec<u8>> {
        self.entries.get(key).cloned()
    }

    fn put_bytes(&mut self, key: &str, data: &[u8]) -> anyhow::Result<()> {
        anyhow::ensure!(!self.read_only, "store opened read-only");
        anyhow::ensure!(self.path.is_some(), "store not opened");
        self.entries.insert(key.to_string(), data.to_vec());
        self.dirty = true;
        Ok(())
    }

    fn clear(&mut self) -> anyhow::Result<()> {
        anyhow::ensure!(!self.read_only, "store opened read-only");
        self.entries.clear();
        self.dirty = true;
        Ok(())
    }

    fn commit(&mut self) -> anyhow::Result<()> {
        if !self.dirty {
            return Ok(());
        }
        let path = self
            .path
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("store not opened"))?;
        let tmp = path.with_extension("kv.tmp");
        let mut file = fs::File::create(&tmp)
            .with_context(|| format!("creating {}", tmp.display()))?;
        file.write_all(&self.serialize())?;
        file.sync_all()?;
        fs::rename(&tmp, path)
            .with_context(|| format!("replacing {}", path.display()))?;
        self.dirty = false;
        Ok(())
    }
}
