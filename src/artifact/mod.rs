//! Image artifacts built from the finished staging tree.
//!
//! - [`iso`] - hybrid ISO via `xorriso`, Limine BIOS install, checksum

pub mod iso;
