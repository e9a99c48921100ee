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

//! A log-structured filesystem storage core.
//!
//! The disk image is a flat array of append-only segments followed by a
//! superblock, memory-mapped in one piece. Every block is named by its path
//! from a single inode-map root; writes go copy-on-write into the one
//! writable staging segment, dragging the touched block's ancestry along,
//! and [`Disk::sync`] commits the segment with an atomic superblock flip.
//!
//! [`Disk::open`] yields the handle everything else hangs off: block-level
//! resolution ([`Disk::find`]/[`Disk::touch`]) and the byte-range file API
//! ([`Disk::read`]/[`Disk::write`]).

use std::fmt;
use std::process::exit;

pub mod disk;
pub mod file;
pub mod store;
pub mod types;

pub use disk::Disk;
pub use file::{InodeNum, datanum_to_block_id, inode_block_id};
pub use types::{Block, BlockAddr, BlockId};

/// Writes an error to stderr, then exits.
pub fn error<M: fmt::Display>(bin: &str, msg: M) -> ! {
    eprintln!("{bin}: error: {msg}");
    exit(1);
}
