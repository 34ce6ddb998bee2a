use std::cell::Cell;
use std::rc::Rc;

use anyhow::{bail, Result};

use crate::row::Tuple;

/// Pull-based iterator protocol. `next` fills `out` and returns true, or
/// returns false exactly when input is exhausted. `close` followed by
/// `open` resets an operator for a second traversal.
pub trait Operator {
    fn open(&mut self) -> Result<()>;
    fn next(&mut self, out: &mut Tuple) -> Result<bool>;
    fn close(&mut self) -> Result<()>;
}

/// Seen/passed counters a SelectOp shares with the plan driver, since the
/// operator itself disappears into the plan tree.
#[derive(Debug, Default)]
pub struct SelectStats {
    selected: Cell<u64>,
    total: Cell<u64>,
}

impl SelectStats {
    pub fn selected(&self) -> u64 {
        self.selected.get()
    }

    pub fn total(&self) -> u64 {
        self.total.get()
    }

    pub fn selectivity(&self) -> f64 {
        if self.total.get() == 0 {
            0.0
        } else {
            self.selected.get() as f64 / self.total.get() as f64
        }
    }
}

/// Filters child tuples through a predicate, counting seen and passed
/// tuples for selectivity reporting.
pub struct SelectOp {
    child: Box<dyn Operator>,
    predicate: Box<dyn Fn(&Tuple) -> bool>,
    stats: Rc<SelectStats>,
}

impl SelectOp {
    pub fn new(child: Box<dyn Operator>, predicate: Box<dyn Fn(&Tuple) -> bool>) -> Self {
        SelectOp {
            child,
            predicate,
            stats: Rc::new(SelectStats::default()),
        }
    }

    pub fn stats(&self) -> Rc<SelectStats> {
        self.stats.clone()
    }
}

impl Operator for SelectOp {
    fn open(&mut self) -> Result<()> {
        self.child.open()
    }

    fn next(&mut self, out: &mut Tuple) -> Result<bool> {
        while self.child.next(out)? {
            self.stats.total.set(self.stats.total.get() + 1);
            if (self.predicate)(out) {
                self.stats.selected.set(self.stats.selected.get() + 1);
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn close(&mut self) -> Result<()> {
        self.child.close()
    }
}

/// Copies the requested child columns into the output, in the order given.
pub struct ProjectOp {
    child: Box<dyn Operator>,
    keep_cols: Vec<usize>,
}

impl ProjectOp {
    pub fn new(child: Box<dyn Operator>, keep_cols: Vec<usize>) -> Self {
        ProjectOp { child, keep_cols }
    }
}

impl Operator for ProjectOp {
    fn open(&mut self) -> Result<()> {
        self.child.open()
    }

    fn next(&mut self, out: &mut Tuple) -> Result<bool> {
        let mut input = Tuple::default();
        if !self.child.next(&mut input)? {
            return Ok(false);
        }
        out.fields.clear();
        for &c in &self.keep_cols {
            match input.fields.get(c) {
                Some(f) => out.fields.push(f.clone()),
                None => bail!("project column {} out of range ({} fields)", c, input.fields.len()),
            }
        }
        Ok(true)
    }

    fn close(&mut self) -> Result<()> {
        self.child.close()
    }
}
