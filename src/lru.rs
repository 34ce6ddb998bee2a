use std::collections::VecDeque;

/*
 * Recency order over buffer frame indices. Front is the least recently
 * used frame, back the most recently used. The queue holds exactly the
 * frames that currently hold a page; pinned frames stay in the queue
 * (eligibility is the eviction scan's problem, not the tracker's).
 */
#[derive(Debug, Default)]
pub struct LruQueue {
    order: VecDeque<usize>,
}

impl LruQueue {
    pub fn new() -> Self {
        LruQueue {
            order: VecDeque::new(),
        }
    }

    /// Record a use of `frame`: move it to the most-recently-used end,
    /// inserting it if it was not tracked yet.
    pub fn touch(&mut self, frame: usize) {
        self.order.retain(|&f| f != frame);
        self.order.push_back(frame);
    }

    /// Drop `frame` from the order entirely (its page was evicted).
    pub fn remove(&mut self, frame: usize) {
        self.order.retain(|&f| f != frame);
    }

    /// Frames in ascending recency: least recently used first.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.order.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
