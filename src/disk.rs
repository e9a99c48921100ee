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

//! The disk substrate.
//!
//! The image is accessed through a shared memory mapping, so the page cache
//! stands in for a buffer cache: blocks are faulted in on access and written
//! back by the kernel. Page protection enforces the append-only discipline:
//! the whole image is mapped read-only except the one segment currently
//! staging writes, and a stray store into committed data faults instead of
//! corrupting it.
//!
//! [`Disk::sync`] commits the staging segment. The superblock update in the
//! middle of it is the commit point: a crash before it discards the staging
//! segment, a crash after it publishes the new root.

use crate::types::{
    BYTES_PER_BLOCK, Block, BlockAddr, BlockId, DISK_BYTES, SEGMENT_BYTES, SEGMENT_TABLE_BYTES,
    SEGMENTS_PER_DISK, Segment, Superblock,
};
use std::fs::OpenOptions;
use std::io;
use std::io::Error;
use std::os::fd::AsRawFd;
use std::path::Path;
use std::ptr;

/// An open disk image.
///
/// Packages the mapping together with the staging cursor; all block-store
/// and file-layer operations go through a `Disk`. The type is deliberately
/// neither `Send` nor `Sync`: mutation is single-threaded and the protection
/// state of the mapping is per-handle.
pub struct Disk {
    /// Base of the mapping.
    base: *mut u8,
    /// Index of the staging segment.
    pub(crate) next_segment: usize,
    /// First free slot in the staging segment.
    pub(crate) next_block: usize,
}

impl Disk {
    /// Opens the image at `path`, creating and extending it as needed, and
    /// maps it.
    ///
    /// With `format`, any previous contents are abandoned and the log
    /// restarts from segment 0 with an empty root; otherwise the staging
    /// position is recovered from the superblock. Either way the function
    /// ends with a [`sync`](Self::sync), so exactly one writable staging
    /// segment exists afterwards and everything staged before a crash is
    /// discarded.
    pub fn open<P: AsRef<Path>>(path: P, format: bool) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        file.set_len(DISK_BYTES as u64)?;
        let base = unsafe {
            libc::mmap(
                ptr::null_mut(),
                DISK_BYTES,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(Error::last_os_error());
        }
        // the mapping outlives the descriptor; `file` may close here

        let mut disk = Self {
            base: base as *mut u8,
            next_segment: 0,
            next_block: 1,
        };
        if format {
            disk.next_segment = SEGMENTS_PER_DISK - 1;
            // a reformat must not inherit a root from a previous image
            let staging = unsafe { &mut *disk.segment_ptr(disk.next_segment) };
            staging.table.fill(BlockId::NULL);
            staging.blocks[0].data_mut().fill(0);
        } else {
            disk.next_segment = unsafe { (*disk.superblock_ptr()).current_segment } as usize;
        }
        // committed data is read-only; sync() opens the staging window
        disk.protect(disk.base, DISK_BYTES, libc::PROT_READ)?;
        disk.sync()?;
        Ok(disk)
    }

    /// Commits the staging segment and opens the next one.
    ///
    /// The step order matters: the segment is flushed and sealed, then the
    /// superblock names it as current (the commit point), then the following
    /// segment becomes writable and is seeded with a copy of the root it
    /// must always hold in slot 0.
    ///
    /// Wrap-around onto a segment that still holds live blocks is not
    /// detected at this layer; a cleaner has to reclaim segments before the
    /// log comes back around.
    pub fn sync(&mut self) -> io::Result<()> {
        // seal the staging segment
        let staging = self.segment_ptr(self.next_segment) as *mut u8;
        self.flush(staging, SEGMENT_BYTES)?;
        self.protect(staging, SEGMENT_BYTES, libc::PROT_READ)?;

        // publish it in the superblock
        let sb = self.superblock_ptr();
        self.protect(sb as *mut u8, BYTES_PER_BLOCK, libc::PROT_READ | libc::PROT_WRITE)?;
        unsafe {
            (*sb).current_segment = self.next_segment as u16;
        }
        self.flush(sb as *mut u8, BYTES_PER_BLOCK)?;
        self.protect(sb as *mut u8, BYTES_PER_BLOCK, libc::PROT_READ)?;

        // open the next staging window
        let committed = self.next_segment;
        self.next_segment = (self.next_segment + 1) % SEGMENTS_PER_DISK;
        self.next_block = 1;
        let fresh = self.segment_ptr(self.next_segment) as *mut u8;
        self.protect(fresh, SEGMENT_BYTES, libc::PROT_READ | libc::PROT_WRITE)?;

        // the new staging segment starts with a writable copy of the live
        // root in its reserved slot 0
        unsafe {
            let src = self.block_ptr(BlockAddr::new(committed, 0));
            let dst = self.block_ptr(BlockAddr::new(self.next_segment, 0));
            ptr::copy_nonoverlapping(src as *const Block, dst, 1);
        }
        let table = &mut self.staging_mut().table;
        table.fill(BlockId::NULL);
        table[0] = BlockId::root();
        Ok(())
    }

    /// The block at physical address `addr`.
    pub fn block_at(&self, addr: BlockAddr) -> &Block {
        unsafe { &*self.block_ptr(addr) }
    }

    /// Mutable access to the block at `addr`. Writing through it to a slot
    /// outside the staging segment faults.
    pub fn block_at_mut(&mut self, addr: BlockAddr) -> &mut Block {
        unsafe { &mut *self.block_ptr(addr) }
    }

    pub(crate) fn block_ptr(&self, addr: BlockAddr) -> *mut Block {
        debug_assert!(!addr.is_null());
        unsafe {
            (self.segment_ptr(addr.segment()) as *mut u8)
                .add(SEGMENT_TABLE_BYTES + addr.block() * BYTES_PER_BLOCK) as *mut Block
        }
    }

    pub(crate) fn segment_ptr(&self, segment: usize) -> *mut Segment {
        debug_assert!(segment < SEGMENTS_PER_DISK);
        unsafe { self.base.add(segment * SEGMENT_BYTES) as *mut Segment }
    }

    /// The staging segment.
    pub(crate) fn staging(&self) -> &Segment {
        unsafe { &*self.segment_ptr(self.next_segment) }
    }

    pub(crate) fn staging_mut(&mut self) -> &mut Segment {
        unsafe { &mut *self.segment_ptr(self.next_segment) }
    }

    fn superblock_ptr(&self) -> *mut Superblock {
        unsafe { self.base.add(SEGMENTS_PER_DISK * SEGMENT_BYTES) as *mut Superblock }
    }

    /// `mprotect` wrapper; the kernel extends `len` to page granularity.
    fn protect(&self, addr: *mut u8, len: usize, prot: libc::c_int) -> io::Result<()> {
        let ret = unsafe { libc::mprotect(addr as *mut libc::c_void, len, prot) };
        if ret < 0 {
            return Err(Error::last_os_error());
        }
        Ok(())
    }

    /// Synchronously writes `len` mapped bytes at `addr` back to the image.
    fn flush(&self, addr: *mut u8, len: usize) -> io::Result<()> {
        let ret = unsafe { libc::msync(addr as *mut libc::c_void, len, libc::MS_SYNC) };
        if ret < 0 {
            return Err(Error::last_os_error());
        }
        Ok(())
    }
}

impl Drop for Disk {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.base as *mut libc::c_void, DISK_BYTES);
        }
    }
}
