use std::cell::RefCell;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::rc::Rc;

use log::{debug, error, info};
use thiserror::Error;

use crate::constants::PAGE_SIZE;
use crate::lru::LruQueue;
use crate::page::Page;
use crate::row::Rowable;

#[derive(Debug, Error)]
pub enum BufferError {
    #[error("file {0} is not registered")]
    UnknownFile(String),
    #[error("all frames are pinned, no page can be evicted")]
    NoFreeFrame,
    #[error("page {pid} is out of range for file {file}")]
    PageOutOfRange { file: String, pid: i32 },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/*
 * One slot of the buffer pool. The byte buffer is row-type agnostic;
 * typed access goes through the Page / TreeNode views constructed at the
 * API boundary. An empty frame has page_id == -1 and no owning file.
 */
pub struct Frame {
    pub(crate) data: Box<[u8; PAGE_SIZE]>,
    pub(crate) page_id: i32,
    pub(crate) pin_count: i32,
    pub(crate) is_dirty: bool,
    pub(crate) file: Option<String>,
}

impl Frame {
    pub(crate) fn empty() -> Self {
        Frame {
            data: Box::new([0u8; PAGE_SIZE]),
            page_id: -1,
            pin_count: 0,
            is_dirty: false,
            file: None,
        }
    }
}

struct FileHandle {
    file: File,
    next_page_id: i32,
    // key: pageId, value: frame index
    page_table: HashMap<i32, usize>,
}

/*
 * Fixed-frame buffer pool over multiple page-addressed heap files.
 *
 * Guarantees: at most one resident copy per (file, pageId); pages handed
 * out are pinned and survive until the matching unpin; dirty pages are
 * written back before their frame is reused; eviction picks the least
 * recently used unpinned frame.
 */
pub struct BufferManager {
    buffer_size: usize,
    frames: Vec<Rc<RefCell<Frame>>>,
    lru: LruQueue,
    file_table: HashMap<String, FileHandle>,
    io_reads: u64,
    io_writes: u64,
}

impl BufferManager {
    pub fn new(buffer_size: usize) -> Self {
        // The frame array is allocated once up front; frames never move.
        let frames = (0..buffer_size)
            .map(|_| Rc::new(RefCell::new(Frame::empty())))
            .collect();
        BufferManager {
            buffer_size,
            frames,
            lru: LruQueue::new(),
            file_table: HashMap::new(),
            io_reads: 0,
            io_writes: 0,
        }
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Disk pages read plus disk pages written since construction.
    pub fn io_count(&self) -> u64 {
        self.io_reads + self.io_writes
    }

    /// Open `path` if it exists, create it otherwise. Returns whether the
    /// file already existed. Registering a registered file is a no-op.
    pub fn register_file(&mut self, path: &str) -> Result<bool, BufferError> {
        if self.file_table.contains_key(path) {
            debug!("file {} already registered", path);
            return Ok(true);
        }
        let existed = Path::new(path).exists();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        let next_page_id = (file.metadata()?.len() / PAGE_SIZE as u64) as i32;
        self.file_table.insert(
            path.to_string(),
            FileHandle {
                file,
                next_page_id,
                page_table: HashMap::new(),
            },
        );
        info!("file {} registered ({} pages)", path, next_page_id);
        Ok(existed)
    }

    /// Number of pages the file holds, counting unflushed created pages.
    pub fn page_count(&self, path: &str) -> Option<i32> {
        self.file_table.get(path).map(|h| h.next_page_id)
    }

    /// Fetch page `pid` of `path`, reading it from disk if it is not
    /// resident. The page comes back pinned.
    pub fn get_frame(&mut self, pid: i32, path: &str) -> Result<Rc<RefCell<Frame>>, BufferError> {
        let handle = self
            .file_table
            .get(path)
            .ok_or_else(|| BufferError::UnknownFile(path.to_string()))?;

        if let Some(&fi) = handle.page_table.get(&pid) {
            let frame = self.frames[fi].clone();
            {
                let mut f = frame.borrow_mut();
                debug_assert_eq!(f.page_id, pid);
                f.pin_count += 1;
            }
            self.lru.touch(fi);
            return Ok(frame);
        }

        if pid < 0 || pid >= handle.next_page_id {
            return Err(BufferError::PageOutOfRange {
                file: path.to_string(),
                pid,
            });
        }

        let fi = self.acquire_frame()?;
        let frame = self.frames[fi].clone();
        {
            let mut f = frame.borrow_mut();
            let handle = self.file_table.get_mut(path).unwrap();
            handle
                .file
                .seek(SeekFrom::Start(pid as u64 * PAGE_SIZE as u64))?;
            handle.file.read_exact(&mut f.data[..])?;
            handle.page_table.insert(pid, fi);
            f.page_id = pid;
            f.pin_count = 1;
            f.is_dirty = false;
            f.file = Some(path.to_string());
        }
        self.io_reads += 1;
        self.lru.touch(fi);
        Ok(frame)
    }

    /// Allocate the next page of `path` in a fresh zeroed frame. The page
    /// comes back pinned and already marked dirty.
    pub fn create_frame(&mut self, path: &str) -> Result<Rc<RefCell<Frame>>, BufferError> {
        if !self.file_table.contains_key(path) {
            return Err(BufferError::UnknownFile(path.to_string()));
        }
        let fi = self.acquire_frame()?;
        let frame = self.frames[fi].clone();
        {
            let handle = self.file_table.get_mut(path).unwrap();
            let pid = handle.next_page_id;
            handle.next_page_id += 1;
            handle.page_table.insert(pid, fi);

            let mut f = frame.borrow_mut();
            f.data.fill(0);
            f.page_id = pid;
            f.pin_count = 1;
            f.is_dirty = true;
            f.file = Some(path.to_string());
        }
        self.lru.touch(fi);
        Ok(frame)
    }

    pub fn get_page<R: Rowable>(&mut self, pid: i32, path: &str) -> Result<Page<R>, BufferError> {
        Ok(Page::new(self.get_frame(pid, path)?))
    }

    pub fn create_page<R: Rowable>(&mut self, path: &str) -> Result<Page<R>, BufferError> {
        Ok(Page::new(self.create_frame(path)?))
    }

    /// Flag a resident page as modified. Marking a page that is not
    /// resident is a caller bug; it is reported and ignored.
    pub fn mark_dirty(&mut self, pid: i32, path: &str) {
        match self.resident_frame(pid, path) {
            Some(fi) => self.frames[fi].borrow_mut().is_dirty = true,
            None => error!("mark_dirty: page {} of {} not in buffer pool", pid, path),
        }
    }

    /// Drop one pin from a resident page. Unpinning below zero is a caller
    /// bug; it is reported and the count stays at zero.
    pub fn unpin_page(&mut self, pid: i32, path: &str) {
        match self.resident_frame(pid, path) {
            Some(fi) => {
                let mut f = self.frames[fi].borrow_mut();
                if f.pin_count > 0 {
                    f.pin_count -= 1;
                } else {
                    error!("unpin_page: page {} of {} pin count already 0", pid, path);
                }
            }
            None => error!("unpin_page: page {} of {} not in buffer pool", pid, path),
        }
    }

    /// Write every unpinned dirty page back to its file. Pinned dirty
    /// pages are reported and skipped.
    pub fn force(&mut self) -> Result<(), BufferError> {
        debug!("force all pages to disk");
        for fi in 0..self.frames.len() {
            let (page_id, pin_count, is_dirty) = {
                let f = self.frames[fi].borrow();
                (f.page_id, f.pin_count, f.is_dirty)
            };
            if page_id == -1 {
                continue;
            }
            if pin_count != 0 {
                error!("force: page {} is still pinned, cannot write back", page_id);
                continue;
            }
            if is_dirty {
                self.write_back(fi)?;
            }
        }
        Ok(())
    }

    /// Drop a file from the pool and delete it from disk: scratch files
    /// owned by operators end their life here. Resident pages are discarded
    /// without write-back; a still-pinned page is a caller bug.
    pub fn remove_file(&mut self, path: &str) -> Result<(), BufferError> {
        if let Some(handle) = self.file_table.remove(path) {
            for (pid, fi) in handle.page_table {
                let mut f = self.frames[fi].borrow_mut();
                if f.pin_count > 0 {
                    error!("remove_file: page {} of {} is still pinned", pid, path);
                }
                f.page_id = -1;
                f.pin_count = 0;
                f.is_dirty = false;
                f.file = None;
                self.lru.remove(fi);
            }
        }
        match std::fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        debug!("removed file {}", path);
        Ok(())
    }

    fn resident_frame(&self, pid: i32, path: &str) -> Option<usize> {
        self.file_table
            .get(path)
            .and_then(|h| h.page_table.get(&pid))
            .copied()
    }

    /// Find a frame to (re)use: any empty frame first, otherwise evict the
    /// least recently used unpinned frame, writing it back if dirty.
    fn acquire_frame(&mut self) -> Result<usize, BufferError> {
        for (i, frame) in self.frames.iter().enumerate() {
            if frame.borrow().page_id == -1 {
                return Ok(i);
            }
        }

        let victim = self
            .lru
            .iter()
            .find(|&fi| self.frames[fi].borrow().pin_count == 0)
            .ok_or(BufferError::NoFreeFrame)?;

        let (pid, path, is_dirty) = {
            let f = self.frames[victim].borrow();
            (f.page_id, f.file.clone().expect("resident frame has a file"), f.is_dirty)
        };
        if is_dirty {
            self.write_back(victim)?;
        }
        if let Some(handle) = self.file_table.get_mut(&path) {
            handle.page_table.remove(&pid);
        }
        self.lru.remove(victim);
        {
            let mut f = self.frames[victim].borrow_mut();
            f.page_id = -1;
            f.is_dirty = false;
            f.file = None;
        }
        debug!("evicted page {} of {} from frame {}", pid, path, victim);
        Ok(victim)
    }

    fn write_back(&mut self, fi: usize) -> Result<(), BufferError> {
        let frame = self.frames[fi].clone();
        {
            let f = frame.borrow();
            let path = f.file.as_ref().expect("dirty frame has a file");
            let handle = self
                .file_table
                .get_mut(path)
                .ok_or_else(|| BufferError::UnknownFile(path.clone()))?;
            handle
                .file
                .seek(SeekFrom::Start(f.page_id as u64 * PAGE_SIZE as u64))?;
            handle.file.write_all(&f.data[..])?;
            handle.file.flush()?;
        }
        frame.borrow_mut().is_dirty = false;
        self.io_writes += 1;
        Ok(())
    }
}

impl Drop for BufferManager {
    fn drop(&mut self) {
        if let Err(e) = self.force() {
            // Failing the final write-back compromises durability.
            error!("write-back failed while dropping buffer pool: {}", e);
        }
    }
}
