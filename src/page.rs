use std::cell::RefCell;
use std::marker::PhantomData;
use std::rc::Rc;

use crate::buffer::Frame;
use crate::constants::{PAGE_HEADER_SIZE, PAGE_SIZE};
use crate::row::Rowable;

/*
 * Heap page layout:
 *
 *   offset 0   4 bytes   record count (little-endian i32)
 *   offset 4   n * R     packed fixed-width records, no padding
 *   rest                 zero on creation
 *
 * Page is a typed view over a pinned frame; the record count lives only in
 * the page bytes so the in-memory view and the on-disk image never diverge.
 */
pub struct Page<R: Rowable> {
    frame: Rc<RefCell<Frame>>,
    _row: PhantomData<R>,
}

impl<R: Rowable> Page<R> {
    pub(crate) fn new(frame: Rc<RefCell<Frame>>) -> Self {
        Page {
            frame,
            _row: PhantomData,
        }
    }

    pub fn pid(&self) -> i32 {
        self.frame.borrow().page_id
    }

    pub fn num_records(&self) -> i32 {
        let f = self.frame.borrow();
        i32::from_le_bytes(f.data[..PAGE_HEADER_SIZE].try_into().unwrap())
    }

    /// Append a record. Returns the new slot id, or -1 when another record
    /// would overflow the page.
    pub fn insert_row(&self, row: &R) -> i32 {
        let n = self.num_records() as usize;
        if PAGE_HEADER_SIZE + (n + 1) * R::ROW_SIZE > PAGE_SIZE {
            return -1;
        }
        let mut f = self.frame.borrow_mut();
        let offset = PAGE_HEADER_SIZE + n * R::ROW_SIZE;
        row.write_to(&mut f.data[offset..offset + R::ROW_SIZE]);
        let count = (n + 1) as i32;
        f.data[..PAGE_HEADER_SIZE].copy_from_slice(&count.to_le_bytes());
        n as i32
    }

    /// Fetch the record at `slot`, or `None` when the slot id is out of
    /// range (negative or past the record count).
    pub fn get_row(&self, slot: i32) -> Option<R> {
        if slot < 0 || slot >= self.num_records() {
            return None;
        }
        let f = self.frame.borrow();
        let offset = PAGE_HEADER_SIZE + slot as usize * R::ROW_SIZE;
        Some(R::read_from(&f.data[offset..offset + R::ROW_SIZE]))
    }

    pub fn is_full(&self) -> bool {
        PAGE_HEADER_SIZE + (self.num_records() as usize + 1) * R::ROW_SIZE > PAGE_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::MovieRow;

    fn fresh_page() -> Page<MovieRow> {
        Page::new(Rc::new(RefCell::new(Frame::empty())))
    }

    #[test]
    fn test_insert_and_get_roundtrip() {
        let page = fresh_page();
        let a = MovieRow::new("tt0000001", "Carmencita");
        let b = MovieRow::new("tt0000002", "Le clown et ses chiens");

        assert_eq!(page.insert_row(&a), 0);
        assert_eq!(page.insert_row(&b), 1);
        assert_eq!(page.num_records(), 2);
        assert_eq!(page.get_row(0), Some(a));
        assert_eq!(page.get_row(1), Some(b));
    }

    #[test]
    fn test_out_of_range_slots() {
        let page = fresh_page();
        page.insert_row(&MovieRow::new("tt0000001", "Carmencita"));
        assert_eq!(page.get_row(-1), None);
        assert_eq!(page.get_row(1), None);
        assert_eq!(page.get_row(999), None);
    }

    #[test]
    fn test_fills_up_and_rejects() {
        let page = fresh_page();
        let capacity = (PAGE_SIZE - PAGE_HEADER_SIZE) / MovieRow::ROW_SIZE;
        for i in 0..capacity {
            assert!(!page.is_full());
            let row = MovieRow::new(&format!("tt{:07}", i), "t");
            assert_eq!(page.insert_row(&row) as usize, i);
        }
        assert!(page.is_full());
        assert_eq!(page.insert_row(&MovieRow::new("overflow", "x")), -1);
        assert_eq!(page.num_records() as usize, capacity);
    }

    #[test]
    fn test_count_header_is_in_page_bytes() {
        let frame = Rc::new(RefCell::new(Frame::empty()));
        let page: Page<MovieRow> = Page::new(frame.clone());
        page.insert_row(&MovieRow::new("tt0000001", "Carmencita"));
        let raw = i32::from_le_bytes(frame.borrow().data[..4].try_into().unwrap());
        assert_eq!(raw, 1);
    }
}
