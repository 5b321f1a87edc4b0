//! Append-only file log store.
//!
//! A directory of files named with 10-digit 1-based decimal indexes. Each
//! file is a concatenation of value bytes, leaf records, internal records,
//! zero padding and meta records; record boundaries are only recoverable from
//! stored offsets, except the meta, which is self-framed by its magic and
//! checksum and aligned to a multiple of 36 bytes.
//!
//! Writes accumulate in a tail buffer. `commit` pads the buffer to meta
//! alignment, appends the meta, writes everything in one shot and fsyncs, so
//! any meta the backward scan finds points at fully persisted subtrees.

use std::cell::RefCell;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use hashbrown::hash_map::Entry;
use hashbrown::HashMap;
use log::debug;

use crate::consts::{INTERNAL_SIZE, LEAF_SIZE, MAX_FILE_SIZE, META_MAGIC, META_SIZE};
use crate::errors::Result;
use crate::hasher::{Hasher, Sha256};
use crate::meta::Meta;
use crate::node::Node;
use crate::store::{decode_record, load_root, Store};
use crate::utils::read_u32;

pub struct FileStore<H = Sha256> {
    dir: PathBuf,
    /// Current write file index, 1-based.
    index: u16,
    /// Logical size of the current file, staged tail included.
    pos: u32,
    /// Staged records since the last commit.
    buf: Vec<u8>,
    file: File,
    /// Read handles for earlier files, opened on demand.
    readers: RefCell<HashMap<u16, File>>,
    state: Option<Meta>,
    hasher: H,
}

impl<H: Hasher> FileStore<H> {
    /// Open (or create) the store in `dir` and recover the last committed
    /// state from the newest log file, falling back to earlier files when the
    /// newest holds no valid meta yet.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let index = count_log_files(&dir)?.max(1);
        let file = open_log(&dir, index)?;
        let size = file.metadata()?.len();

        let hasher = H::new();
        let mut state = recover(&file, size, &hasher)?;
        if state.is_none() && index > 1 {
            for idx in (1..index).rev() {
                let earlier = open_log(&dir, idx)?;
                let earlier_size = earlier.metadata()?.len();
                state = recover(&earlier, earlier_size, &hasher)?;
                if state.is_some() {
                    break;
                }
            }
        }
        match &state {
            Some(meta) => debug!(
                "recovered meta at {}/{} (root {}/{})",
                meta.meta_index, meta.meta_pos, meta.root_index, meta.root_pos
            ),
            None => debug!("no committed state under {:?}", dir),
        }

        Ok(FileStore {
            dir,
            index,
            pos: size as u32,
            buf: Vec::new(),
            file,
            readers: RefCell::new(HashMap::new()),
            state,
            hasher,
        })
    }

    fn read_file(&self, index: u16, pos: u64, buf: &mut [u8]) -> Result<()> {
        if index == self.index {
            read_at(&self.file, pos, buf)?;
            return Ok(());
        }
        let mut readers = self.readers.borrow_mut();
        let file = match readers.entry(index) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(open_log(&self.dir, index)?),
        };
        read_at(file, pos, buf)?;
        Ok(())
    }

    fn append(&mut self, bytes: &[u8]) -> Result<(u16, u32)> {
        // Keep headroom for alignment padding plus the commit's meta.
        if self.pos as u64 + bytes.len() as u64 + 2 * META_SIZE as u64 > MAX_FILE_SIZE {
            self.rollover()?;
        }
        let at = self.pos;
        self.buf.extend_from_slice(bytes);
        self.pos += bytes.len() as u32;
        Ok((self.index, at))
    }

    /// Flush the staged tail and continue in a fresh file. The commit under
    /// way lands its meta in the new file; references into earlier files keep
    /// working through the per-child index the codec carries.
    fn rollover(&mut self) -> Result<()> {
        if !self.buf.is_empty() {
            self.file.write_all(&self.buf)?;
            self.file.sync_all()?;
            self.buf.clear();
        }
        self.index += 1;
        self.file = open_log(&self.dir, self.index)?;
        self.pos = 0;
        debug!("log rolled over to file {}", self.index);
        Ok(())
    }

    fn commit_inner(&mut self, root_index: u16, root_pos: u32, root_is_leaf: bool) -> Result<()> {
        let pad = (META_SIZE - self.pos as usize % META_SIZE) % META_SIZE;
        self.buf.resize(self.buf.len() + pad, 0);
        self.pos += pad as u32;

        let meta = Meta {
            meta_index: self.index,
            meta_pos: self.pos,
            root_index,
            root_pos,
            root_is_leaf,
        };
        self.buf.extend_from_slice(&meta.encode(&self.hasher));
        self.pos += META_SIZE as u32;

        self.file.write_all(&self.buf)?;
        self.file.sync_all()?;
        self.state = Some(meta);
        Ok(())
    }
}

impl<H: Hasher> Store for FileStore<H> {
    fn get_root(&self) -> Result<Node> {
        match self.state {
            None => Ok(Node::Null),
            Some(meta) => load_root(
                self,
                &self.hasher,
                meta.root_index,
                meta.root_pos,
                meta.root_is_leaf,
            ),
        }
    }

    fn get_node(&self, index: u16, pos: u32, is_leaf: bool) -> Result<Node> {
        let size = if is_leaf { LEAF_SIZE } else { INTERNAL_SIZE };
        let mut bytes = vec![0u8; size];
        self.read_file(index, pos as u64, &mut bytes)?;
        decode_record(&bytes, is_leaf)
    }

    fn get_value(&self, index: u16, pos: u32, size: u16) -> Result<Vec<u8>> {
        let mut bytes = vec![0u8; size as usize];
        self.read_file(index, pos as u64, &mut bytes)?;
        Ok(bytes)
    }

    fn write_node(&mut self, bytes: &[u8]) -> Result<(u16, u32)> {
        self.append(bytes)
    }

    fn write_value(&mut self, bytes: &[u8]) -> Result<(u16, u32)> {
        self.append(bytes)
    }

    fn commit(&mut self, root_index: u16, root_pos: u32, root_is_leaf: bool) -> Result<()> {
        let result = self.commit_inner(root_index, root_pos, root_is_leaf);
        self.buf.clear();
        if result.is_err() {
            // Rewind to what actually reached the file so a retry starts clean.
            if let Ok(metadata) = self.file.metadata() {
                self.pos = metadata.len() as u32;
            }
        }
        result
    }

    fn close(&mut self) -> Result<()> {
        self.buf.clear();
        self.file.sync_all()?;
        self.readers.borrow_mut().clear();
        Ok(())
    }
}

fn log_name(index: u16) -> String {
    format!("{:010}", index)
}

fn open_log(dir: &Path, index: u16) -> Result<File> {
    let path = dir.join(log_name(index));
    let file = OpenOptions::new()
        .read(true)
        .append(true)
        .create(true)
        .open(path)?;
    Ok(file)
}

/// Count files whose names are valid log indexes; everything else in the
/// directory is ignored.
fn count_log_files(dir: &Path) -> Result<u16> {
    let mut count = 0u16;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.len() == 10 && name.chars().all(|c| c.is_ascii_digit()) && name != "0000000000" {
            count += 1;
        }
    }
    Ok(count)
}

fn read_at(mut file: &File, pos: u64, buf: &mut [u8]) -> std::io::Result<()> {
    file.seek(SeekFrom::Start(pos))?;
    file.read_exact(buf)
}

/// Scan `file` backward for the newest valid meta. The scan starts one full
/// window below the tail rounded down to meta alignment, so a torn trailing
/// meta is skipped; windows that match the magic but fail full decoding are
/// skipped as well.
fn recover<H: Hasher>(file: &File, size: u64, hasher: &H) -> Result<Option<Meta>> {
    let mut window = [0u8; META_SIZE];
    let mut slot = size - size % META_SIZE as u64;
    while slot >= META_SIZE as u64 {
        slot -= META_SIZE as u64;
        read_at(file, slot, &mut window)?;
        if read_u32(&window) != META_MAGIC {
            continue;
        }
        match Meta::decode(&window, hasher) {
            Ok(meta) => return Ok(Some(meta)),
            Err(err) => debug!("skipping meta candidate at {}: {}", slot, err),
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_open_names_first_file() {
        let dir = tempdir().unwrap();
        let store: FileStore = FileStore::open(dir.path()).unwrap();
        assert_eq!(store.index, 1);
        assert!(dir.path().join("0000000001").exists());
        assert!(store.get_root().unwrap().is_null());
    }

    #[test]
    fn test_commit_aligns_meta() {
        let dir = tempdir().unwrap();
        let mut store: FileStore = FileStore::open(dir.path()).unwrap();
        store.write_value(b"odd-sized").unwrap();
        store.commit(0, 0, false).unwrap();

        let size = fs::metadata(dir.path().join("0000000001")).unwrap().len();
        assert_eq!(size % META_SIZE as u64, 0);
        assert_eq!(size, 72); // 9 bytes, padded to 36, plus the meta
    }

    #[test]
    fn test_reopen_recovers_state() {
        let dir = tempdir().unwrap();
        {
            let mut store: FileStore = FileStore::open(dir.path()).unwrap();
            let (index, pos) = store.write_value(b"value").unwrap();
            store.commit(index, pos, true).unwrap();
        }
        let store: FileStore = FileStore::open(dir.path()).unwrap();
        let state = store.state.unwrap();
        assert_eq!(state.root_index, 1);
        assert_eq!(state.root_pos, 0);
        assert!(state.root_is_leaf);
    }

    #[test]
    fn test_recovery_skips_torn_tail() {
        let dir = tempdir().unwrap();
        {
            let mut store: FileStore = FileStore::open(dir.path()).unwrap();
            store.write_value(b"first").unwrap();
            store.commit(1, 0, true).unwrap();
            store.write_value(b"second").unwrap();
            store.commit(1, 72, true).unwrap();
        }
        let path = dir.path().join("0000000001");
        let size = fs::metadata(&path).unwrap().len();
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(size - 1).unwrap();

        let store: FileStore = FileStore::open(dir.path()).unwrap();
        let state = store.state.unwrap();
        assert_eq!(state.root_pos, 0);
    }

    #[test]
    fn test_recovery_of_truncated_log_is_empty() {
        let dir = tempdir().unwrap();
        {
            let mut store: FileStore = FileStore::open(dir.path()).unwrap();
            store.write_value(b"only").unwrap();
            store.commit(1, 0, true).unwrap();
        }
        let path = dir.path().join("0000000001");
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(35).unwrap();

        let store: FileStore = FileStore::open(dir.path()).unwrap();
        assert!(store.state.is_none());
        assert!(store.get_root().unwrap().is_null());
    }

    #[test]
    fn test_ignores_foreign_files() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("notes.txt"), b"hi").unwrap();
        fs::write(dir.path().join("0000000abc"), b"hi").unwrap();
        let store: FileStore = FileStore::open(dir.path()).unwrap();
        assert_eq!(store.index, 1);
    }

    #[test]
    fn test_staged_writes_discarded_without_commit() {
        let dir = tempdir().unwrap();
        {
            let mut store: FileStore = FileStore::open(dir.path()).unwrap();
            store.write_value(b"never committed").unwrap();
        }
        let size = fs::metadata(dir.path().join("0000000001")).unwrap().len();
        assert_eq!(size, 0);
    }
}
