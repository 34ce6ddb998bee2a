use std::cell::RefCell;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::rc::Rc;

use anyhow::{bail, Result};
use log::{debug, error};

use crate::buffer::BufferManager;
use crate::tree_node::{FixedWidth, TreeNode};

/// Record id: (pageId, slotId) within a heap file.
pub type Rid = (i32, i32);

/*
 * Clustered, duplicate-permitting B+ tree whose nodes are pages of one
 * dedicated file managed by the buffer pool. Page 0 is a reserved header
 * carrying the root page id (-1 when the tree is empty); it is read on
 * open and written back when the tree is dropped.
 *
 * Keys must be totally ordered and fixed-width; leaf values are rids,
 * internal values are child page ids. All leaves sit at the same depth and
 * chain forward through their `next` pointers in key order.
 */
pub struct BTree<K: FixedWidth + Ord> {
    file_path: String,
    bm: Rc<RefCell<BufferManager>>,
    root: i32,
    // child pid -> parent pid bindings recorded on the most recent descent
    parents: HashMap<i32, i32>,
    _marker: PhantomData<K>,
}

impl<K: FixedWidth + Ord> BTree<K> {
    pub fn open(file_path: &str, bm: Rc<RefCell<BufferManager>>) -> Result<Self> {
        let page_count = {
            let mut pool = bm.borrow_mut();
            pool.register_file(file_path)?;
            pool.page_count(file_path).unwrap_or(0)
        };

        let mut root = -1;
        if page_count > 0 {
            let frame = bm.borrow_mut().get_frame(0, file_path)?;
            root = i32::from_le_bytes(frame.borrow().data[..4].try_into().unwrap());
            bm.borrow_mut().unpin_page(0, file_path);
        } else {
            // reserve page 0 for the header
            let frame = bm.borrow_mut().create_frame(file_path)?;
            frame.borrow_mut().data[..4].copy_from_slice(&(-1i32).to_le_bytes());
            bm.borrow_mut().unpin_page(0, file_path);
        }
        debug!("opened btree {} with root {}", file_path, root);

        Ok(BTree {
            file_path: file_path.to_string(),
            bm,
            root,
            parents: HashMap::new(),
            _marker: PhantomData,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.root == -1
    }

    /// Insert `(key, rid)`, keeping the leaf sorted. Equal keys land after
    /// existing ones, so duplicates keep their insertion order.
    pub fn insert(&mut self, key: K, rid: Rid) -> Result<()> {
        let leaf_id = if self.root == -1 {
            let frame = self.bm.borrow_mut().create_frame(&self.file_path)?;
            let pid = frame.borrow().page_id;
            let node = TreeNode::<K>::new(frame);
            node.set_is_leaf(true);
            node.set_size(0);
            node.set_next(-1);
            self.root = pid;
            self.bm.borrow_mut().unpin_page(pid, &self.file_path);
            pid
        } else {
            self.find_leaf(key)?
        };

        let frame = self.bm.borrow_mut().get_frame(leaf_id, &self.file_path)?;
        let leaf = TreeNode::<K>::new(frame);
        let size = leaf.size();
        let mut pos = size;
        for i in 0..size {
            if key < leaf.key::<Rid>(i) {
                pos = i;
                break;
            }
        }
        leaf.insert_key_value::<Rid>(key, rid, pos);
        leaf.set_size(size + 1);
        self.bm.borrow_mut().mark_dirty(leaf_id, &self.file_path);

        let cap = TreeNode::<K>::capacity::<Rid>();
        if leaf.size() > cap {
            let new_frame = self.bm.borrow_mut().create_frame(&self.file_path)?;
            let new_pid = new_frame.borrow().page_id;
            let new_leaf = TreeNode::<K>::new(new_frame);
            new_leaf.set_is_leaf(true);
            new_leaf.set_next(leaf.next());
            leaf.set_next(new_pid);

            // entries from ceil(cap / 2) move to the new leaf
            let split_line = cap / 2 + cap % 2;
            let total = leaf.size();
            for i in split_line..total {
                new_leaf.insert_key_value::<Rid>(
                    leaf.key::<Rid>(i),
                    leaf.value::<Rid>(i),
                    i - split_line,
                );
            }
            new_leaf.set_size(total - split_line);
            leaf.set_size(split_line);

            let promote = new_leaf.key::<Rid>(0);
            self.bm.borrow_mut().unpin_page(new_pid, &self.file_path);
            self.bm.borrow_mut().unpin_page(leaf_id, &self.file_path);
            self.insert_into_parent(promote, leaf_id, new_pid)?;
        } else {
            self.bm.borrow_mut().unpin_page(leaf_id, &self.file_path);
        }
        Ok(())
    }

    /// Single-pass load into an empty tree: fill the rightmost leaf, chain
    /// a new one when it is full. Sorted input yields a well-shaped tree.
    pub fn bulk_insert(&mut self, data: &[(K, Rid)]) -> Result<()> {
        if self.root != -1 {
            bail!("bulk insert requires an empty tree");
        }
        self.parents.clear();

        let leaf_frame = self.bm.borrow_mut().create_frame(&self.file_path)?;
        let mut leaf_id = leaf_frame.borrow().page_id;
        let mut leaf = TreeNode::<K>::new(leaf_frame);
        leaf.set_is_leaf(true);
        leaf.set_size(0);
        leaf.set_next(-1);

        let root_frame = self.bm.borrow_mut().create_frame(&self.file_path)?;
        let root_id = root_frame.borrow().page_id;
        let root_node = TreeNode::<K>::new(root_frame);
        root_node.set_is_leaf(false);
        root_node.set_next(-1);
        root_node.insert_value::<i32>(leaf_id, 0);
        root_node.set_size(1);
        self.root = root_id;
        self.parents.insert(leaf_id, root_id);
        self.bm.borrow_mut().unpin_page(root_id, &self.file_path);

        let cap = TreeNode::<K>::capacity::<Rid>();
        for &(key, rid) in data {
            if leaf.size() == cap {
                let new_frame = self.bm.borrow_mut().create_frame(&self.file_path)?;
                let new_id = new_frame.borrow().page_id;
                let new_leaf = TreeNode::<K>::new(new_frame);
                new_leaf.set_is_leaf(true);
                new_leaf.set_next(-1);
                leaf.set_next(new_id);
                new_leaf.insert_key_value::<Rid>(key, rid, 0);
                new_leaf.set_size(1);
                self.insert_into_parent(key, leaf_id, new_id)?;
                self.bm.borrow_mut().unpin_page(leaf_id, &self.file_path);
                leaf_id = new_id;
                leaf = new_leaf;
            } else {
                let size = leaf.size();
                leaf.insert_key_value::<Rid>(key, rid, size);
                leaf.set_size(size + 1);
            }
        }
        self.bm.borrow_mut().unpin_page(leaf_id, &self.file_path);
        Ok(())
    }

    /// All rids stored under `key`, in insertion order.
    pub fn search(&mut self, key: K) -> Result<Vec<Rid>> {
        let mut results = Vec::new();
        if self.root == -1 {
            return Ok(results);
        }
        let mut leaf = self.find_leaf(key)?;
        'chain: while leaf != -1 {
            let frame = self.bm.borrow_mut().get_frame(leaf, &self.file_path)?;
            let node = TreeNode::<K>::new(frame);
            let size = node.size();
            for pos in 0..size {
                let k = node.key::<Rid>(pos);
                if k > key {
                    self.bm.borrow_mut().unpin_page(leaf, &self.file_path);
                    break 'chain;
                }
                if k == key {
                    results.push(node.value::<Rid>(pos));
                }
            }
            let next = node.next();
            self.bm.borrow_mut().unpin_page(leaf, &self.file_path);
            leaf = next;
        }
        Ok(results)
    }

    /// All rids with keys in `[start_key, end_key]`, ascending by key,
    /// ties in insertion order.
    pub fn range_search(&mut self, start_key: K, end_key: K) -> Result<Vec<Rid>> {
        let mut results = Vec::new();
        if self.root == -1 {
            return Ok(results);
        }
        let mut leaf = self.find_leaf(start_key)?;
        'chain: while leaf != -1 {
            let frame = self.bm.borrow_mut().get_frame(leaf, &self.file_path)?;
            let node = TreeNode::<K>::new(frame);
            let size = node.size();
            for pos in 0..size {
                let k = node.key::<Rid>(pos);
                if k > end_key {
                    self.bm.borrow_mut().unpin_page(leaf, &self.file_path);
                    break 'chain;
                }
                if k >= start_key {
                    results.push(node.value::<Rid>(pos));
                }
            }
            let next = node.next();
            self.bm.borrow_mut().unpin_page(leaf, &self.file_path);
            leaf = next;
        }
        Ok(results)
    }

    /// Descend to the leaf whose range contains `key`, recording each
    /// child -> parent binding for insert_into_parent. Equal internal keys
    /// send the descent left, keeping duplicates reachable.
    fn find_leaf(&mut self, key: K) -> Result<i32> {
        self.parents.clear();
        let mut cur = self.root;
        loop {
            let frame = self.bm.borrow_mut().get_frame(cur, &self.file_path)?;
            let node = TreeNode::<K>::new(frame);
            if node.is_leaf() {
                self.bm.borrow_mut().unpin_page(cur, &self.file_path);
                return Ok(cur);
            }
            let size = node.size();
            let mut pos = size - 1;
            for i in 1..size {
                if key <= node.key::<i32>(i) {
                    pos = i - 1;
                    break;
                }
            }
            let child = node.value::<i32>(pos);
            self.parents.insert(child, cur);
            self.bm.borrow_mut().unpin_page(cur, &self.file_path);
            cur = child;
        }
    }

    /// After `n1` split off `n2`, push `key` into their parent, growing a
    /// new root when `n1` was the root. An overflowing parent splits with
    /// the key at the split line promoted and its child becoming the new
    /// node's left-most child.
    fn insert_into_parent(&mut self, key: K, n1: i32, n2: i32) -> Result<()> {
        if n1 == self.root {
            let frame = self.bm.borrow_mut().create_frame(&self.file_path)?;
            let pid = frame.borrow().page_id;
            let node = TreeNode::<K>::new(frame);
            node.set_is_leaf(false);
            node.set_next(-1);
            node.insert_value::<i32>(n1, 0);
            node.set_size(1);
            self.root = pid;
            self.parents.insert(n1, pid);
            self.bm.borrow_mut().unpin_page(pid, &self.file_path);
        }

        let parent_id = match self.parents.get(&n1) {
            Some(&p) => p,
            None => bail!("no parent recorded for node {}", n1),
        };
        let frame = self.bm.borrow_mut().get_frame(parent_id, &self.file_path)?;
        let parent = TreeNode::<K>::new(frame);
        let size = parent.size();
        for i in 0..size {
            if parent.value::<i32>(i) == n1 {
                parent.insert_key_value::<i32>(key, n2, i + 1);
                break;
            }
        }
        parent.set_size(size + 1);
        self.parents.insert(n2, parent_id);
        self.bm.borrow_mut().mark_dirty(parent_id, &self.file_path);

        let cap = TreeNode::<K>::capacity::<i32>();
        if parent.size() > cap {
            let new_frame = self.bm.borrow_mut().create_frame(&self.file_path)?;
            let new_pid = new_frame.borrow().page_id;
            let new_node = TreeNode::<K>::new(new_frame);
            new_node.set_is_leaf(false);
            new_node.set_next(-1);

            let split_line = cap / 2 + cap % 2;
            let total = parent.size();
            new_node.insert_value::<i32>(parent.value::<i32>(split_line), 0);
            for i in (split_line + 1)..total {
                new_node.insert_key_value::<i32>(
                    parent.key::<i32>(i),
                    parent.value::<i32>(i),
                    i - split_line,
                );
            }
            let promote = parent.key::<i32>(split_line);
            new_node.set_size(total - split_line);
            parent.set_size(split_line);

            // children carried into the new node now answer to it
            for i in 0..new_node.size() {
                self.parents.insert(new_node.value::<i32>(i), new_pid);
            }

            self.bm.borrow_mut().unpin_page(new_pid, &self.file_path);
            self.bm.borrow_mut().unpin_page(parent_id, &self.file_path);
            self.insert_into_parent(promote, parent_id, new_pid)?;
        } else {
            self.bm.borrow_mut().unpin_page(parent_id, &self.file_path);
        }
        Ok(())
    }

    fn write_header(&self) -> Result<()> {
        let frame = self.bm.borrow_mut().get_frame(0, &self.file_path)?;
        frame.borrow_mut().data[..4].copy_from_slice(&self.root.to_le_bytes());
        let mut pool = self.bm.borrow_mut();
        pool.mark_dirty(0, &self.file_path);
        pool.unpin_page(0, &self.file_path);
        Ok(())
    }
}

impl<K: FixedWidth + Ord> Drop for BTree<K> {
    fn drop(&mut self) {
        // persist the root pid, then flush the tree's dirty pages
        if let Err(e) = self.write_header() {
            error!("failed to write btree header for {}: {}", self.file_path, e);
            return;
        }
        if let Err(e) = self.bm.borrow_mut().force() {
            error!("failed to flush btree {}: {}", self.file_path, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed_str::FixedTitle;
    use tempfile::tempdir;

    fn pool(frames: usize) -> Rc<RefCell<BufferManager>> {
        Rc::new(RefCell::new(BufferManager::new(frames)))
    }

    fn path_in(dir: &tempfile::TempDir, name: &str) -> String {
        dir.path().join(name).to_string_lossy().into_owned()
    }

    #[test]
    fn test_insert_search_and_duplicates() {
        let dir = tempdir().unwrap();
        let f = path_in(&dir, "tree.bin");
        let bm = pool(20);
        let mut tree: BTree<i32> = BTree::open(&f, bm).unwrap();

        for i in 0..100_000 {
            tree.insert(i, (0, i)).unwrap();
        }
        assert_eq!(tree.search(283).unwrap(), vec![(0, 283)]);

        let range = tree.range_search(50, 80).unwrap();
        assert_eq!(range.len(), 31);
        assert_eq!(range, (50..=80).map(|i| (0, i)).collect::<Vec<_>>());

        // a second identical round doubles every key
        for i in 0..100_000 {
            tree.insert(i, (0, i)).unwrap();
        }
        assert_eq!(tree.search(283).unwrap(), vec![(0, 283), (0, 283)]);
        assert_eq!(tree.range_search(50, 80).unwrap().len(), 62);
    }

    #[test]
    fn test_bulk_insert_matches_single_inserts() {
        let dir = tempdir().unwrap();
        let f = path_in(&dir, "tree.bin");
        let bm = pool(20);
        let mut tree: BTree<i32> = BTree::open(&f, bm).unwrap();

        let data: Vec<(i32, Rid)> = (0..100_000).map(|i| (i, (0, i))).collect();
        tree.bulk_insert(&data).unwrap();

        assert_eq!(tree.search(283).unwrap(), vec![(0, 283)]);
        let range = tree.range_search(50, 80).unwrap();
        assert_eq!(range, (50..=80).map(|i| (0, i)).collect::<Vec<_>>());
    }

    #[test]
    fn test_extreme_keys() {
        let dir = tempdir().unwrap();
        let f = path_in(&dir, "tree.bin");
        let bm = pool(20);
        let mut tree: BTree<i32> = BTree::open(&f, bm).unwrap();

        tree.insert(-1_000_000, (1, -1_000_000)).unwrap();
        tree.insert(1_000_000, (1, 1_000_000)).unwrap();

        assert_eq!(tree.search(-1_000_000).unwrap(), vec![(1, -1_000_000)]);
        assert_eq!(
            tree.range_search(999_999, 1_000_000).unwrap(),
            vec![(1, 1_000_000)]
        );
    }

    #[test]
    fn test_empty_tree_searches() {
        let dir = tempdir().unwrap();
        let f = path_in(&dir, "tree.bin");
        let bm = pool(4);
        let mut tree: BTree<i32> = BTree::open(&f, bm).unwrap();
        assert!(tree.is_empty());
        assert!(tree.search(1).unwrap().is_empty());
        assert!(tree.range_search(0, 10).unwrap().is_empty());
    }

    #[test]
    fn test_root_persists_across_reopen() {
        let dir = tempdir().unwrap();
        let f = path_in(&dir, "tree.bin");
        let bm = pool(20);

        {
            let mut tree: BTree<i32> = BTree::open(&f, bm.clone()).unwrap();
            for i in 0..5_000 {
                tree.insert(i, (0, i)).unwrap();
            }
        } // drop writes the header and flushes

        let mut tree: BTree<i32> = BTree::open(&f, bm).unwrap();
        assert!(!tree.is_empty());
        assert_eq!(tree.search(4_321).unwrap(), vec![(0, 4_321)]);
    }

    #[test]
    fn test_string_keys() {
        let dir = tempdir().unwrap();
        let f = path_in(&dir, "tree.bin");
        let bm = pool(20);
        let mut tree: BTree<FixedTitle> = BTree::open(&f, bm).unwrap();

        let titles = ["Carmencita", "Un bon bock", "Blacksmith Scene", "Miss Jerry"];
        for (i, t) in titles.iter().enumerate() {
            tree.insert(FixedTitle::new(t), (0, i as i32)).unwrap();
        }

        assert_eq!(tree.search(FixedTitle::new("Miss Jerry")).unwrap(), vec![(0, 3)]);
        // everything in [B, D) by byte order
        let hits = tree
            .range_search(FixedTitle::new("B"), FixedTitle::new("D"))
            .unwrap();
        assert_eq!(hits, vec![(0, 2), (0, 0)]);
    }

    #[test]
    fn test_duplicates_across_leaf_splits() {
        // one key repeated past a leaf's capacity has to spill into chained
        // leaves and still come back in insertion order
        let dir = tempdir().unwrap();
        let f = path_in(&dir, "tree.bin");
        let bm = pool(20);
        let mut tree: BTree<i32> = BTree::open(&f, bm).unwrap();

        let dup_count = 500; // leaf capacity for (i32, Rid) is 339
        for i in 0..dup_count {
            tree.insert(7, (0, i)).unwrap();
        }
        tree.insert(3, (0, -1)).unwrap();
        tree.insert(9, (0, -2)).unwrap();

        let mut hits = tree.search(7).unwrap();
        assert_eq!(hits.len(), dup_count as usize);
        hits.sort();
        assert_eq!(hits, (0..dup_count).map(|i| (0, i)).collect::<Vec<_>>());
        assert_eq!(tree.search(3).unwrap(), vec![(0, -1)]);
        assert_eq!(tree.search(9).unwrap(), vec![(0, -2)]);
    }
}
