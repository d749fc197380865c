//! A log-structured flash filesystem for embedded and space-qualified
//! systems.
//!
//! Ported from the `original_source` C++ implementation module by module;
//! each module's doc comment names the file(s) it is grounded on. The
//! top-level entry point is [`device::Device`], which wires every other
//! component (area management, the area summary cache, garbage collection,
//! the B+-tree and its cache, the page address cache, the superblock chain
//! and the journal) into the public `format`/`mount`/`open`/`read`/`write`/…
//! surface described in `original_source/src/paffs.hpp`.

pub mod addr;
pub mod area;
pub mod bitlist;
pub mod btree;
pub mod config;
pub mod data_io;
pub mod device;
pub mod driver;
pub mod error;
pub mod gc;
pub mod inode_pool;
pub mod journal;
pub mod lru;
pub mod pac;
pub mod summary_cache;
pub mod superblock;
pub mod tree;
pub mod tree_cache;
pub mod types;

pub use config::{Params, ParamsBuilder};
pub use device::Device;
pub use driver::Driver;
pub use error::{PaffsError, Result};
pub use types::{Dir, DirEntry, Inode, InodeType, ObjInfo, Obj, OpenFlags, Permission, SeekMode};
