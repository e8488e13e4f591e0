//! Block storage backends
//!
//! Blobs are opaque to the database: the map writes `u8 version` followed by
//! the serialized block and reads the same bytes back.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::core::error::Error;
use crate::core::types::{IVec3, Result};
use crate::core::types::{block_pos_to_key, key_to_block_pos};

/// Persistent key/value store for block blobs
pub trait MapDatabase: Send {
    /// Start a batch of writes
    fn begin_save(&mut self) {}

    /// Finish a batch of writes
    fn end_save(&mut self) {}

    fn save_block(&mut self, pos: IVec3, data: &[u8]) -> Result<()>;

    fn load_block(&mut self, pos: IVec3) -> Result<Option<Vec<u8>>>;

    fn delete_block(&mut self, pos: IVec3) -> Result<()>;

    fn list_all_loadable_blocks(&mut self) -> Result<Vec<IVec3>>;
}

/// In-memory database, keyed by the integer block key
#[derive(Debug, Default)]
pub struct MemoryDatabase {
    blocks: HashMap<i64, Vec<u8>>,
    in_batch: bool,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

impl MapDatabase for MemoryDatabase {
    fn begin_save(&mut self) {
        self.in_batch = true;
    }

    fn end_save(&mut self) {
        self.in_batch = false;
    }

    fn save_block(&mut self, pos: IVec3, data: &[u8]) -> Result<()> {
        self.blocks.insert(block_pos_to_key(pos), data.to_vec());
        Ok(())
    }

    fn load_block(&mut self, pos: IVec3) -> Result<Option<Vec<u8>>> {
        Ok(self.blocks.get(&block_pos_to_key(pos)).cloned())
    }

    fn delete_block(&mut self, pos: IVec3) -> Result<()> {
        self.blocks.remove(&block_pos_to_key(pos));
        Ok(())
    }

    fn list_all_loadable_blocks(&mut self) -> Result<Vec<IVec3>> {
        let mut out: Vec<IVec3> = self.blocks.keys().map(|&k| key_to_block_pos(k)).collect();
        out.sort_by_key(|p| (p.z, p.y, p.x));
        Ok(out)
    }
}

/// One file per block under `base_dir/y_<y>/block_<x>_<y>_<z>.bin`
#[derive(Debug)]
pub struct FileDatabase {
    base_dir: PathBuf,
    saved_in_batch: usize,
}

impl FileDatabase {
    pub fn open(base_dir: impl AsRef<Path>) -> Result<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir, saved_in_batch: 0 })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Get the file path for a block
    pub fn block_path(base_dir: &Path, pos: IVec3) -> PathBuf {
        // Subdirectories by Y keep directory sizes reasonable
        base_dir
            .join(format!("y_{}", pos.y))
            .join(format!("block_{}_{}_{}.bin", pos.x, pos.y, pos.z))
    }

    fn parse_block_file_name(name: &str) -> Option<IVec3> {
        let coords = name.strip_prefix("block_")?.strip_suffix(".bin")?;
        let mut it = coords.split('_').map(|s| s.parse::<i32>());
        let x = it.next()?.ok()?;
        let y = it.next()?.ok()?;
        let z = it.next()?.ok()?;
        if it.next().is_some() {
            return None;
        }
        Some(IVec3::new(x, y, z))
    }
}

impl MapDatabase for FileDatabase {
    fn begin_save(&mut self) {
        self.saved_in_batch = 0;
    }

    fn end_save(&mut self) {
        if self.saved_in_batch > 0 {
            log::debug!("FileDatabase: wrote {} blocks", self.saved_in_batch);
        }
        self.saved_in_batch = 0;
    }

    fn save_block(&mut self, pos: IVec3, data: &[u8]) -> Result<()> {
        let path = Self::block_path(&self.base_dir, pos);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // Write to a temp file and rename so a crash never leaves half a block
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, &path)?;
        self.saved_in_batch += 1;
        Ok(())
    }

    fn load_block(&mut self, pos: IVec3) -> Result<Option<Vec<u8>>> {
        let path = Self::block_path(&self.base_dir, pos);
        match std::fs::read(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Database(format!("reading {}: {}", path.display(), e))),
        }
    }

    fn delete_block(&mut self, pos: IVec3) -> Result<()> {
        let path = Self::block_path(&self.base_dir, pos);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn list_all_loadable_blocks(&mut self) -> Result<Vec<IVec3>> {
        let mut out = Vec::new();
        for dir in std::fs::read_dir(&self.base_dir)? {
            let dir = dir?;
            if !dir.file_type()?.is_dir() {
                continue;
            }
            for entry in std::fs::read_dir(dir.path())? {
                let entry = entry?;
                if let Some(pos) = entry.file_name().to_str().and_then(Self::parse_block_file_name) {
                    out.push(pos);
                }
            }
        }
        out.sort_by_key(|p| (p.z, p.y, p.x));
        Ok(out)
    }
}
