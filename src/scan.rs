use std::cell::RefCell;
use std::rc::Rc;

use anyhow::Result;
use log::debug;

use crate::buffer::BufferManager;
use crate::operator::Operator;
use crate::page::Page;
use crate::row::{Rowable, Tuple};

/// Full scan of a heap file, one pinned page at a time. Stops when the
/// next page cannot be fetched or holds no records.
pub struct ScanOp<R: Rowable> {
    bm: Rc<RefCell<BufferManager>>,
    file_path: String,
    start_pid: i32,
    next_pid: i32,
    slot: i32,
    page: Option<Page<R>>,
}

impl<R: Rowable> ScanOp<R> {
    pub fn new(bm: Rc<RefCell<BufferManager>>, file_path: &str, start_pid: i32) -> Self {
        ScanOp {
            bm,
            file_path: file_path.to_string(),
            start_pid,
            next_pid: start_pid,
            slot: 0,
            page: None,
        }
    }

    fn release_page(&mut self) {
        if let Some(page) = self.page.take() {
            self.bm.borrow_mut().unpin_page(page.pid(), &self.file_path);
        }
    }
}

impl<R: Rowable> Operator for ScanOp<R> {
    fn open(&mut self) -> Result<()> {
        self.release_page();
        self.slot = 0;
        self.next_pid = self.start_pid + 1;
        self.bm.borrow_mut().register_file(&self.file_path)?;
        match self.bm.borrow_mut().get_page::<R>(self.start_pid, &self.file_path) {
            Ok(page) => self.page = Some(page),
            Err(e) => {
                // an empty file has no first page; the scan just yields nothing
                debug!("scan of {} starts empty: {}", self.file_path, e);
                self.page = None;
            }
        }
        Ok(())
    }

    fn next(&mut self, out: &mut Tuple) -> Result<bool> {
        let row = match &self.page {
            None => return Ok(false),
            Some(page) => page.get_row(self.slot),
        };
        let row = match row {
            Some(r) => r,
            None => {
                // current page exhausted, move to the next one
                self.release_page();
                let fetched = self
                    .bm
                    .borrow_mut()
                    .get_page::<R>(self.next_pid, &self.file_path);
                match fetched {
                    Ok(page) => {
                        self.next_pid += 1;
                        self.slot = 0;
                        let first = page.get_row(0);
                        self.page = Some(page);
                        match first {
                            Some(r) => r,
                            None => return Ok(false), // empty page ends the scan
                        }
                    }
                    Err(_) => return Ok(false), // past the last page
                }
            }
        };
        self.slot += 1;
        *out = row.to_tuple();
        Ok(true)
    }

    fn close(&mut self) -> Result<()> {
        self.release_page();
        Ok(())
    }
}

impl<R: Rowable> Drop for ScanOp<R> {
    fn drop(&mut self) {
        self.release_page();
    }
}
