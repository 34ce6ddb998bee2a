use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use anyhow::Result;
use log::{debug, warn};

use crate::buffer::BufferManager;
use crate::operator::Operator;
use crate::row::{Rowable, Tuple};
use crate::scan::ScanOp;

/*
 * Drains its child into a scratch heap file on the first `next`, then
 * serves scans of that file. Worth it when a join's inner side gets
 * re-scanned once per outer block: the child's pipeline runs once and
 * every rescan afterwards is a plain disk scan.
 *
 * A close/open cycle restarts the scan of the scratch file without
 * touching the child again; the scratch file itself lives as long as the
 * operator and is deleted when it is dropped.
 */
pub struct MaterializeOp<R: Rowable> {
    child: Box<dyn Operator>,
    bm: Rc<RefCell<BufferManager>>,
    temp_file: String,
    idx_map: HashMap<String, usize>,
    // present exactly when the scratch file has been written
    scan: Option<ScanOp<R>>,
}

impl<R: Rowable> MaterializeOp<R> {
    pub fn new(
        child: Box<dyn Operator>,
        bm: Rc<RefCell<BufferManager>>,
        temp_file: &str,
        idx_map: HashMap<String, usize>,
    ) -> Self {
        // a stale scratch file from an earlier run must not leak rows in
        let _ = std::fs::remove_file(temp_file);
        MaterializeOp {
            child,
            bm,
            temp_file: temp_file.to_string(),
            idx_map,
            scan: None,
        }
    }

    fn materialize(&mut self) -> Result<()> {
        self.bm.borrow_mut().register_file(&self.temp_file)?;
        let mut page = self.bm.borrow_mut().create_page::<R>(&self.temp_file)?;
        let mut t = Tuple::default();
        let mut count: u64 = 0;
        while self.child.next(&mut t)? {
            let row = match R::from_tuple(&t, &self.idx_map) {
                Ok(r) => r,
                Err(e) => {
                    warn!("materialize skipping tuple: {}", e);
                    continue;
                }
            };
            if page.is_full() {
                let pid = page.pid();
                let mut pool = self.bm.borrow_mut();
                pool.unpin_page(pid, &self.temp_file);
                page = pool.create_page::<R>(&self.temp_file)?;
            }
            page.insert_row(&row);
            count += 1;
        }
        self.bm.borrow_mut().unpin_page(page.pid(), &self.temp_file);
        debug!("materialized {} rows into {}", count, self.temp_file);
        Ok(())
    }
}

impl<R: Rowable> Operator for MaterializeOp<R> {
    fn open(&mut self) -> Result<()> {
        match self.scan.as_mut() {
            // already materialized: just rewind over the scratch file
            Some(scan) => {
                scan.close()?;
                scan.open()
            }
            None => self.child.open(),
        }
    }

    fn next(&mut self, out: &mut Tuple) -> Result<bool> {
        if self.scan.is_none() {
            self.materialize()?;
            let mut scan = ScanOp::<R>::new(self.bm.clone(), &self.temp_file, 0);
            scan.open()?;
            self.scan = Some(scan);
        }
        self.scan.as_mut().expect("scan exists after materialize").next(out)
    }

    fn close(&mut self) -> Result<()> {
        if let Some(scan) = self.scan.as_mut() {
            scan.close()?;
        }
        self.child.close()
    }
}

impl<R: Rowable> Drop for MaterializeOp<R> {
    fn drop(&mut self) {
        // the scan's own Drop releases its pin before the file goes away
        self.scan = None;
        let _ = self.bm.borrow_mut().remove_file(&self.temp_file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::mock::MockScanOp;
    use crate::row::WorkedOnKeyRow;
    use tempfile::tempdir;

    fn idx_map() -> HashMap<String, usize> {
        [("movieId".to_string(), 0), ("personId".to_string(), 1)]
            .into_iter()
            .collect()
    }

    fn source(n: usize) -> Box<MockScanOp> {
        let data = (0..n)
            .map(|i| Tuple::new(vec![format!("tt{:07}", i), format!("nm{:07}", i)]))
            .collect();
        Box::new(MockScanOp::new(data))
    }

    fn drain(op: &mut dyn Operator) -> Vec<Tuple> {
        let mut results = Vec::new();
        op.open().unwrap();
        let mut t = Tuple::default();
        while op.next(&mut t).unwrap() {
            results.push(t.clone());
        }
        op.close().unwrap();
        results
    }

    #[test]
    fn test_materialize_replays_child() {
        let dir = tempdir().unwrap();
        let temp = dir.path().join("mat.tmp").to_string_lossy().into_owned();
        let bm = Rc::new(RefCell::new(BufferManager::new(8)));

        // 500 rows of 19 bytes: several pages worth
        let mut op = MaterializeOp::<WorkedOnKeyRow>::new(source(500), bm, &temp, idx_map());
        let out = drain(&mut op);
        assert_eq!(out.len(), 500);
        assert_eq!(out[0].fields[0], "tt0000000");
        assert_eq!(out[499].fields[1], "nm0000499");
    }

    #[test]
    fn test_reopen_rescans_without_redraining_child() {
        let dir = tempdir().unwrap();
        let temp = dir.path().join("mat.tmp").to_string_lossy().into_owned();
        let bm = Rc::new(RefCell::new(BufferManager::new(8)));

        // the child yields its 10 tuples exactly once; a second traversal
        // must come out of the scratch file
        let mut op = MaterializeOp::<WorkedOnKeyRow>::new(source(10), bm, &temp, idx_map());
        assert_eq!(drain(&mut op).len(), 10);
        assert_eq!(drain(&mut op).len(), 10);
    }

    #[test]
    fn test_scratch_file_removed_on_drop() {
        let dir = tempdir().unwrap();
        let temp = dir.path().join("mat.tmp").to_string_lossy().into_owned();
        let bm = Rc::new(RefCell::new(BufferManager::new(8)));

        let mut op = MaterializeOp::<WorkedOnKeyRow>::new(source(10), bm, &temp, idx_map());
        drain(&mut op);
        assert!(std::path::Path::new(&temp).exists());
        drop(op);
        assert!(!std::path::Path::new(&temp).exists());
    }
}
