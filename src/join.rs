use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::hash::Hash;
use std::marker::PhantomData;
use std::rc::Rc;

use anyhow::{anyhow, bail, Result};
use log::{debug, warn};

use crate::btree::Rid;
use crate::buffer::BufferManager;
use crate::operator::Operator;
use crate::page::Page;
use crate::row::{Rowable, Tuple};

/*
 * Block-nested-loop equi-join.
 *
 * Build: pull left tuples into up to `block_size` pinned pages of a
 * scratch file, converting each to the fixed-width row type R, and hash
 * every join key to its (pid, slot) positions within the block.
 *
 * Probe: stream right tuples; a hash hit yields one output per matching
 * block position, the left row re-read from the scratch file and spliced
 * in front of the right tuple's fields.
 *
 * When the right side runs dry the block is released, the right child is
 * closed and re-opened, and the next block is built; the join ends when a
 * build produces no pages.
 */
pub struct BnlJoinOp<K, R>
where
    K: Eq + Hash,
    R: Rowable,
{
    bm: Rc<RefCell<BufferManager>>,
    left: Box<dyn Operator>,
    right: Box<dyn Operator>,
    block_size: usize,
    temp_file: String,
    left_key: Box<dyn Fn(&Tuple) -> K>,
    right_key: Box<dyn Fn(&Tuple) -> K>,
    // maps row field names to indices of the left child's tuples
    idx_map: HashMap<String, usize>,

    block_pages: Vec<i32>,
    block_hash: HashMap<K, Vec<Rid>>,
    probe_list: Vec<Rid>,
    probe_idx: usize,
    last_right: Tuple,
    build_done: bool,

    total_left: u64,
    total_out: Rc<Cell<u64>>,
    _row: PhantomData<R>,
}

impl<K, R> BnlJoinOp<K, R>
where
    K: Eq + Hash,
    R: Rowable,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bm: Rc<RefCell<BufferManager>>,
        left: Box<dyn Operator>,
        right: Box<dyn Operator>,
        block_size: usize,
        temp_file: &str,
        left_key: Box<dyn Fn(&Tuple) -> K>,
        right_key: Box<dyn Fn(&Tuple) -> K>,
        idx_map: HashMap<String, usize>,
    ) -> Result<Self> {
        if block_size < 1 {
            bail!("join block size must be at least 1");
        }
        // a stale scratch file from an earlier run must not leak rows in
        let _ = std::fs::remove_file(temp_file);
        Ok(BnlJoinOp {
            bm,
            left,
            right,
            block_size,
            temp_file: temp_file.to_string(),
            left_key,
            right_key,
            idx_map,
            block_pages: Vec::new(),
            block_hash: HashMap::new(),
            probe_list: Vec::new(),
            probe_idx: 0,
            last_right: Tuple::default(),
            build_done: false,
            total_left: 0,
            total_out: Rc::new(Cell::new(0)),
            _row: PhantomData,
        })
    }

    /// Running count of emitted join tuples, shared with the plan driver.
    pub fn total_out_handle(&self) -> Rc<Cell<u64>> {
        self.total_out.clone()
    }

    fn release_block(&mut self) {
        let mut pool = self.bm.borrow_mut();
        for pid in self.block_pages.drain(..) {
            pool.unpin_page(pid, &self.temp_file);
        }
        self.block_hash.clear();
    }

    fn build_next_block(&mut self) -> Result<()> {
        self.release_block();
        self.bm.borrow_mut().register_file(&self.temp_file)?;

        let mut current: Option<Page<R>> = None;
        let mut t = Tuple::default();
        while self.block_pages.len() < self.block_size {
            if !self.left.next(&mut t)? {
                break;
            }
            self.total_left += 1;
            let row = match R::from_tuple(&t, &self.idx_map) {
                Ok(r) => r,
                Err(e) => {
                    warn!("join skipping left tuple: {}", e);
                    continue;
                }
            };
            let need_new = current.as_ref().map_or(true, |p| p.is_full());
            if need_new {
                let page = self.bm.borrow_mut().create_page::<R>(&self.temp_file)?;
                self.block_pages.push(page.pid());
                current = Some(page);
            }
            let page = current.as_ref().expect("block page exists");
            let slot = page.insert_row(&row);
            let key = (self.left_key)(&t);
            self.block_hash
                .entry(key)
                .or_default()
                .push((page.pid(), slot));
        }
        debug!(
            "join block of {} pages built, {} left tuples consumed so far",
            self.block_pages.len(),
            self.total_left
        );
        Ok(())
    }

    fn make_joined_tuple(&self, pid: i32, slot: i32) -> Result<Tuple> {
        let page = self.bm.borrow_mut().get_page::<R>(pid, &self.temp_file)?;
        let row = page
            .get_row(slot)
            .ok_or_else(|| anyhow!("block row ({}, {}) missing from {}", pid, slot, self.temp_file))?;
        self.bm.borrow_mut().unpin_page(pid, &self.temp_file);

        let mut result = row.to_tuple();
        result.fields.extend(self.last_right.fields.iter().cloned());
        self.total_out.set(self.total_out.get() + 1);
        Ok(result)
    }
}

impl<K, R> Operator for BnlJoinOp<K, R>
where
    K: Eq + Hash,
    R: Rowable,
{
    fn open(&mut self) -> Result<()> {
        self.left.open()?;
        self.right.open()?;
        self.release_block();
        self.probe_list.clear();
        self.probe_idx = 0;
        self.build_done = false;
        Ok(())
    }

    fn next(&mut self, out: &mut Tuple) -> Result<bool> {
        loop {
            if !self.build_done {
                self.build_next_block()?;
                if self.block_pages.is_empty() {
                    // left side exhausted
                    return Ok(false);
                }
                self.build_done = true;
            }

            // remaining matches of the current right tuple against the block
            if self.probe_idx < self.probe_list.len() {
                let (pid, slot) = self.probe_list[self.probe_idx];
                self.probe_idx += 1;
                *out = self.make_joined_tuple(pid, slot)?;
                return Ok(true);
            }

            let mut right_t = Tuple::default();
            let mut right_live = false;
            while self.right.next(&mut right_t)? {
                let key = (self.right_key)(&right_t);
                if let Some(positions) = self.block_hash.get(&key) {
                    self.probe_list = positions.clone();
                    self.probe_idx = 1; // slot 0 is consumed right now
                    self.last_right = right_t;
                    right_live = true;
                    break;
                }
            }
            if right_live {
                let (pid, slot) = self.probe_list[0];
                *out = self.make_joined_tuple(pid, slot)?;
                return Ok(true);
            }

            // right side exhausted: restart it against the next block
            self.right.close()?;
            self.right.open()?;
            self.release_block();
            self.probe_list.clear();
            self.probe_idx = 0;
            self.build_done = false;
        }
    }

    fn close(&mut self) -> Result<()> {
        self.left.close()?;
        self.right.close()?;
        self.release_block();
        self.probe_list.clear();
        self.probe_idx = 0;
        self.build_done = false;
        self.bm.borrow_mut().remove_file(&self.temp_file)?;
        Ok(())
    }
}

impl<K, R> Drop for BnlJoinOp<K, R>
where
    K: Eq + Hash,
    R: Rowable,
{
    fn drop(&mut self) {
        self.release_block();
        let _ = self.bm.borrow_mut().remove_file(&self.temp_file);
    }
}
