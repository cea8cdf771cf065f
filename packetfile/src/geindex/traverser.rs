use std::collections::VecDeque;
use std::path::Path;

use super::addr::{
    child_slot_path, entry_slot_paths, BundleAddr, ChildBucketAddr, CHILD_ADDRS_PER_BUCKET,
};
use super::bucket::{IndexBundle, LoadedChildBucket};
use super::entries::IndexEntry;
use super::header::GeIndexHeader;
use crate::error::{PacketFileError, Result};
use crate::qtpath::QuadtreePath;

/// One bucket path on the walk: its own slots not yet returned and the
/// child subtrees not yet entered
struct Frame<E> {
    path: QuadtreePath,
    pending: VecDeque<(QuadtreePath, Vec<E>)>,
    child: Option<LoadedChildBucket>,
    next_slot: usize,
}

impl<E: IndexEntry> Frame<E> {
    fn load(
        index: &IndexBundle,
        path: QuadtreePath,
        entry_addr: BundleAddr,
        child_addr: ChildBucketAddr,
    ) -> Result<Frame<E>> {
        let mut pending = VecDeque::new();
        if entry_addr.is_valid() {
            let paths = entry_slot_paths(&path);
            for (slot, entries) in index.load_entry_bucket::<E>(entry_addr)? {
                let slot_path = paths.get(slot as usize).ok_or_else(|| {
                    PacketFileError::corrupt_index(
                        index.dir(),
                        format!("slot {} below deepest level in bucket {}", slot, path),
                    )
                })?;
                if !entries.is_empty() {
                    pending.push_back((*slot_path, entries));
                }
            }
        }
        let child = if child_addr.is_valid() {
            Some(index.load_child_bucket(child_addr)?)
        } else {
            None
        };
        Ok(Frame {
            path,
            pending,
            child,
            next_slot: 0,
        })
    }
}

/// Every non-empty path of a geindex with its entries, in preorder.
///
/// The walk holds one loaded bucket pair per bucket level. It stops after
/// the first error.
pub struct GeIndexTraverser<E: IndexEntry> {
    index: IndexBundle,
    stack: Vec<Frame<E>>,
    failed: bool,
}

impl<E: IndexEntry> GeIndexTraverser<E> {
    pub fn open(dir: impl AsRef<Path>) -> Result<GeIndexTraverser<E>> {
        let index = IndexBundle::open(dir)?;
        index.check_entry_kind::<E>()?;
        let header = index.header();
        let root = Frame::load(
            &index,
            QuadtreePath::root(),
            header.root_entry_addr,
            header.root_child_addr,
        )?;
        Ok(GeIndexTraverser {
            index,
            stack: vec![root],
            failed: false,
        })
    }

    pub fn header(&self) -> &GeIndexHeader {
        self.index.header()
    }

    fn step(&mut self) -> Result<Option<(QuadtreePath, Vec<E>)>> {
        loop {
            let Some(top) = self.stack.last_mut() else {
                return Ok(None);
            };
            let mut next_child = None;
            if let Some(child) = &top.child {
                while top.next_slot < CHILD_ADDRS_PER_BUCKET {
                    let s = top.next_slot;
                    let (entry_addr, child_addr) = (child.entry_addrs[s], child.child_addrs[s]);
                    if entry_addr.is_valid() || child_addr.is_valid() {
                        next_child = Some((s as u8, entry_addr, child_addr));
                        break;
                    }
                    top.next_slot += 1;
                }
            }

            let Some((slot, entry_addr, child_addr)) = next_child else {
                if let Some(item) = top.pending.pop_front() {
                    return Ok(Some(item));
                }
                self.stack.pop();
                continue;
            };
            let sub = child_slot_path(&top.path, slot)?
                .ok_or_else(|| PacketFileError::InvalidPath(top.path.to_string()))?;
            // own slots that come before the subtree go first
            if top.pending.front().map_or(false, |(p, _)| *p < sub) {
                return Ok(top.pending.pop_front());
            }
            top.next_slot += 1;
            let frame = Frame::load(&self.index, sub, entry_addr, child_addr)?;
            self.stack.push(frame);
        }
    }
}

impl<E: IndexEntry> Iterator for GeIndexTraverser<E> {
    type Item = Result<(QuadtreePath, Vec<E>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.step() {
            Ok(item) => item.map(Ok),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}
