/*
 * Copyright 2025 the slfs developers
 *
 * This file is part of slfs.
 *
 * slfs is free software: you can redistribute it and/or modify it under the
 * terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or (at your option) any later
 * version.
 *
 * slfs is distributed in the hope that it will be useful, but WITHOUT ANY
 * WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR
 * A PARTICULAR PURPOSE. See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * slfs. If not, see <https://www.gnu.org/licenses/>.
 */

//! Logical-to-physical block resolution.
//!
//! Both lookup and allocation walk the inode-map tree by recursing on the
//! parent id. The recursion always bottoms out before depth 0 because every
//! [`sync`](Disk::sync) restages the root: the staging segment's slot 0
//! holds the one writable copy of it.

use crate::disk::Disk;
use crate::types::{BLOCKS_PER_SEGMENT, Block, BlockAddr, BlockId};
use std::io;
use std::ptr;

impl Disk {
    /// Where `id` lives in the staging segment, if it was written there
    /// since the last commit.
    ///
    /// A linear scan of the staging segment's table; the first null entry
    /// terminates the used prefix.
    pub fn staged(&self, id: BlockId) -> Option<BlockAddr> {
        for (slot, entry) in self.staging().table.iter().enumerate() {
            if entry.is_null() {
                return None;
            }
            if *entry == id {
                return Some(BlockAddr::new(self.next_segment, slot));
            }
        }
        None
    }

    /// The physical location of the block named by `id`, or `None` if no
    /// such block has ever been written. Never allocates.
    pub fn locate(&self, id: BlockId) -> Option<BlockAddr> {
        if id.is_null() {
            return None;
        }
        if let Some(addr) = self.staged(id) {
            return Some(addr);
        }
        // the root can only live in the staging segment; if the scan missed
        // it there is nothing above to resolve through
        if id.depth() == 0 {
            return None;
        }
        let parent = self.locate(id.parent())?;
        let addr = self.block_at(parent).indirect()[id.parent_slot()];
        if addr.is_null() { None } else { Some(addr) }
    }

    /// The block named by `id`, or `None` if it does not exist.
    pub fn find(&self, id: BlockId) -> Option<&Block> {
        self.locate(id).map(|addr| self.block_at(addr))
    }

    /// Ensures the block named by `id` and all of its ancestors live in the
    /// staging segment, creating missing blocks as empty, and returns its
    /// staged location. Subsequent mutation through
    /// [`block_at_mut`](Self::block_at_mut) is in place.
    ///
    /// An id that is not staged yet can cost up to `depth` fresh slots, one
    /// per missing ancestor. The capacity check happens up front, before
    /// anything is allocated, so a single call's chain never straddles a
    /// segment boundary; when the staging segment cannot hold the chain it
    /// is committed first.
    pub fn touch(&mut self, id: BlockId) -> io::Result<BlockAddr> {
        assert!(!id.is_null(), "touch of a null block id");
        if self.next_block + id.depth() >= BLOCKS_PER_SEGMENT {
            self.sync()?;
        }
        Ok(self.touch_chain(id))
    }

    fn touch_chain(&mut self, id: BlockId) -> BlockAddr {
        if let Some(addr) = self.staged(id) {
            return addr;
        }
        assert!(id.depth() > 0, "inode-map root missing from the staging segment");
        let parent = self.touch_chain(id.parent());

        let addr = BlockAddr::new(self.next_segment, self.next_block);
        self.next_block += 1;

        // carry over the committed contents, if any
        let old = self.block_at(parent).indirect()[id.parent_slot()];
        let fresh = self.block_ptr(addr);
        unsafe {
            if old.is_null() {
                ptr::write_bytes(fresh, 0, 1);
            } else {
                ptr::copy_nonoverlapping(self.block_ptr(old) as *const Block, fresh, 1);
            }
        }

        self.staging_mut().table[addr.block()] = id;
        self.block_at_mut(parent).indirect_mut()[id.parent_slot()] = addr;
        addr
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::file::datanum_to_block_id;

    /// Slots the deepest possible ancestry chain can take.
    const MAX_CHAIN: usize = 7;

    fn scratch() -> (tempfile::TempDir, Disk) {
        let dir = tempfile::tempdir().unwrap();
        let disk = Disk::open(dir.path().join("disk.img"), true).unwrap();
        (dir, disk)
    }

    #[test]
    fn touch_allocates_and_links() {
        let (_dir, mut disk) = scratch();

        let id = BlockId::root().child(5);
        let addr = disk.touch(id).unwrap();
        assert_eq!((addr.segment(), addr.block()), (0, 1));

        // the table names the slot, the root points at it
        assert_eq!(disk.staging().table[1], id);
        let root = disk.find(BlockId::root()).unwrap();
        assert_eq!(root.indirect()[5], addr);

        assert_eq!(disk.staged(id), Some(addr));
        assert_eq!(disk.locate(id), Some(addr));
        // a new block starts out zeroed
        assert!(disk.block_at(addr).data().iter().all(|&b| b == 0));
    }

    #[test]
    fn touch_of_a_staged_block_is_in_place() {
        let (_dir, mut disk) = scratch();

        let id = BlockId::root().child(9);
        let first = disk.touch(id).unwrap();
        let second = disk.touch(id).unwrap();
        assert_eq!(first, second);

        // no slot was burned by the second call
        let other = disk.touch(BlockId::root().child(10)).unwrap();
        assert_eq!(other.block(), first.block() + 1);
    }

    #[test]
    fn touch_stages_the_whole_ancestry() {
        let (_dir, mut disk) = scratch();

        let id = datanum_to_block_id(0x010203, 0);
        assert_eq!(id.depth(), 4);
        let addr = disk.touch(id).unwrap();

        // root was staged already; the chain takes the next four slots
        assert_eq!(addr.block(), 4);
        assert_eq!(disk.next_block, 5);
        let mut ancestor = id;
        while ancestor.depth() > 0 {
            let staged = disk.staged(ancestor).unwrap();
            assert!(staged.block() < disk.next_block);
            assert_eq!(disk.staging().table[staged.block()], ancestor);
            ancestor = ancestor.parent();
        }
    }

    #[test]
    fn touch_carries_contents_across_sync() {
        let (_dir, mut disk) = scratch();

        let id = datanum_to_block_id(7, 0);
        let addr = disk.touch(id).unwrap();
        disk.block_at_mut(addr).data_mut()[..5].copy_from_slice(b"fresh");
        disk.sync().unwrap();

        let again = disk.touch(id).unwrap();
        assert_eq!(again.segment(), 1);
        // copy-on-write carried the bytes; the committed copy is untouched
        assert_eq!(&disk.block_at(again).data()[..5], b"fresh");
        assert_eq!(&disk.block_at(addr).data()[..5], b"fresh");
        assert_ne!(addr.segment(), again.segment());
    }

    #[test]
    fn find_never_allocates() {
        let (_dir, disk) = scratch();

        let id = datanum_to_block_id(17, 3);
        assert!(disk.find(id).is_none());
        assert!(disk.locate(id).is_none());
        assert!(disk.find(BlockId::NULL).is_none());
        // nothing was staged by the misses
        assert_eq!(disk.next_block, 1);
    }

    #[test]
    fn full_staging_segment_flushes_before_the_chain() {
        let (_dir, mut disk) = scratch();

        // burn slots with single-indirect data blocks of one file until the
        // next deep chain cannot fit
        let mut n = crate::types::N_DIRECT as u64;
        while disk.next_block < BLOCKS_PER_SEGMENT - MAX_CHAIN {
            disk.touch(datanum_to_block_id(1, n)).unwrap();
            n += 1;
        }
        assert_eq!(disk.next_segment, 0);

        // a triple-indirect leaf needs its whole chain in one segment
        let deep = datanum_to_block_id(1, 11_000_000);
        assert_eq!(deep.depth(), 7);
        let addr = disk.touch(deep).unwrap();

        assert_eq!(disk.next_segment, 1);
        assert_eq!(addr.segment(), 1);
        let mut ancestor = deep;
        while ancestor.depth() > 0 {
            assert_eq!(disk.staged(ancestor).unwrap().segment(), 1);
            ancestor = ancestor.parent();
        }
    }
}
