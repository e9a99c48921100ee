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

//! Demonstration shell around the storage core: opens (or formats) an image,
//! reads a test extent, then writes and commits it. Run it twice to see the
//! extent survive.

use slfs::types::BYTES_PER_BLOCK;
use slfs::{Disk, datanum_to_block_id, error};
use std::env;
use std::path::PathBuf;
use std::process::exit;

/// The file the demo extent lives in.
const DEMO_FILE: u32 = 17;
/// Byte offset of the demo extent, far enough out to need an indirect block.
const DEMO_OFFSET: u64 = 100_000_000;

/// Structure storing command line arguments.
#[derive(Default)]
struct Args {
    /// If true, print command line help.
    help: bool,
    /// If true, reformat the image even if it holds data.
    format: bool,
    /// Path to the image file.
    image: Option<PathBuf>,
}

fn parse_args() -> Args {
    let mut res: Args = Default::default();
    for arg in env::args_os().skip(1) {
        match arg.to_str() {
            Some("-h" | "--help") => res.help = true,
            Some("-f" | "--format") => res.format = true,
            _ => res.image = Some(PathBuf::from(arg)),
        }
    }
    res
}

/// Prints the command's usage.
fn print_usage() {
    eprintln!("Usage:");
    eprintln!(" slfs [-f] <image>");
    eprintln!();
    eprintln!(" -f, --format   start from an empty image");
    eprintln!(" -h, --help     print this help");
}

fn main() {
    let args = parse_args();
    if args.help {
        print_usage();
        exit(0);
    }
    let Some(image) = args.image else {
        print_usage();
        exit(1);
    };

    let mut disk = Disk::open(&image, args.format).unwrap_or_else(|e| error("slfs", e));

    let mut buf = [0; 12];
    if disk.read(DEMO_FILE, &mut buf, DEMO_OFFSET) {
        println!("read back: {:?}", String::from_utf8_lossy(&buf));
    } else {
        println!("extent not present yet");
    }

    let payload = b"hello world\0";
    let ok = disk
        .write(DEMO_FILE, payload, DEMO_OFFSET)
        .unwrap_or_else(|e| error("slfs", e));
    if !ok {
        error("slfs", "demo extent out of range");
    }
    disk.sync().unwrap_or_else(|e| error("slfs", e));

    let id = datanum_to_block_id(DEMO_FILE, DEMO_OFFSET / BYTES_PER_BLOCK as u64);
    let addr = disk
        .locate(id)
        .unwrap_or_else(|| error("slfs", "extent vanished after sync"));
    println!("committed block [{id}] at {addr}");
}
