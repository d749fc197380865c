//! Plain on-disk and in-memory data shapes shared across components.
//!
//! Ported from `original_source/src/commonTypes.hpp`: permissions, open
//! flags, inode type, the fixed-size `Inode` record and the directory-facing
//! `Dirent`/`Obj`/`Dir`/`ObjInfo` handles. The original's bitfields
//! (`Permission perm:3`, `Area`'s packed `erasecount:17`) are expressed here
//! as plain fields; on-flash packing for `Inode`/`Area` happens at
//! serialization time in the owning component instead of via `repr`
//! bitfields, since Rust has no portable bitfield layout guarantee.

use std::time::SystemTime;

use bitflags::bitflags;

use crate::addr::Addr;
use crate::config::{FileSize, InodeNo};

bitflags! {
    /// `chmod`-style permission bits. Ported from `commonTypes.hpp`'s
    /// `Permission`/`R`/`W`/`X`.
    #[derive(Default)]
    pub struct Permission: u8 {
        const READ = 0x1;
        const WRITE = 0x2;
        const EXEC = 0x4;
    }
}

bitflags! {
    /// `open()`-style mode flags. Ported from `commonTypes.hpp`'s
    /// `Fileopenmask`/`FR`/`FW`/`FEX`/`FA`/`FE`/`FC`.
    #[derive(Default)]
    pub struct OpenFlags: u8 {
        /// Open for reading.
        const READ = 0x01;
        /// Open for writing.
        const WRITE = 0x02;
        /// Open for execution (bookkeeping only, no code is ever executed).
        const EXEC = 0x04;
        /// All writes happen at the current end of file.
        const APPEND = 0x08;
        /// Fail unless the object already exists.
        const EXISTING = 0x10;
        /// Create the object if it does not already exist.
        const CREATE = 0x20;
    }
}

/// Seek origin, mirrors `commonTypes.hpp`'s `Seekmode`.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SeekMode {
    Set,
    Cur,
    End,
}

/// The kind of filesystem object an inode describes.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum InodeType {
    File,
    Dir,
    // Symbolic/hard links are an explicit Non-goal; the variant is kept so
    // on-disk inodes written by a hypothetical future version still decode,
    // surfacing as `PaffsError::Nimpl` wherever it is observed.
    Link,
}

/// Number of direct page-address slots carried inline in every [`Inode`]
/// before falling back to single/double/triple indirection.
pub const DIRECT_ADDR_COUNT: usize = 11;

/// The complete metadata record for one filesystem object.
///
/// Ported from `commonTypes.hpp`'s `Inode`. `direct`/`indir`/`d_indir`/
/// `t_indir` are the same four-tier addressing scheme the original uses;
/// [`crate::pac::PageAddressCache`] is what turns a page number into one of
/// these slots (or a walk through the indirection chain behind `indir`).
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Inode {
    pub no: InodeNo,
    pub ty: InodeType,
    pub perm: Permission,
    pub reserved_pages: u32,
    pub size: FileSize,
    pub created: u64,
    pub modified: u64,
    pub direct: [Option<Addr>; DIRECT_ADDR_COUNT],
    pub indir: Option<Addr>,
    pub d_indir: Option<Addr>,
    pub t_indir: Option<Addr>,
}

impl Inode {
    /// Builds a fresh, empty inode of the given type and permission mask.
    pub fn new(no: InodeNo, ty: InodeType, perm: Permission) -> Self {
        let now = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self {
            no,
            ty,
            perm,
            reserved_pages: 0,
            size: 0,
            created: now,
            modified: now,
            direct: [None; DIRECT_ADDR_COUNT],
            indir: None,
            d_indir: None,
            t_indir: None,
        }
    }
}

/// A single directory entry as stored in a directory's payload data.
///
/// The original's `Dirent` carries a lazily-loaded `SmartInodePtr` and a
/// `parent` back-pointer for path reconstruction; here directory contents
/// are plain `(name, inode_no)` pairs on disk (see
/// [`crate::device::marshal_dir_entries`]) and the owning `InodeNo` is
/// resolved through the B+-tree on demand, so no parent pointer is kept.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct DirEntry {
    pub name: String,
    pub no: InodeNo,
}

/// A handle to an open directory, returned by
/// [`crate::device::Device::open_dir`].
#[derive(Debug, Clone)]
pub struct Dir {
    pub no: InodeNo,
    pub entries: Vec<DirEntry>,
    pub pos: usize,
}

/// A handle to an open file, returned by [`crate::device::Device::open`].
#[derive(Debug, Clone)]
pub struct Obj {
    pub no: InodeNo,
    pub read_only: bool,
    pub file_pointer: u32,
    pub flags: OpenFlags,
}

/// Metadata snapshot returned by [`crate::device::Device::get_obj_info`].
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ObjInfo {
    pub size: FileSize,
    pub created: u64,
    pub modified: u64,
    pub is_dir: bool,
    pub perm: Permission,
}

/// The purpose an area is currently dedicated to.
///
/// Ported from `commonTypes.hpp`'s `AreaType` enum.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum AreaType {
    Unset,
    Superblock,
    Index,
    Data,
    GarbageBuffer,
    Retired,
}

/// The lifecycle state of an area. Ported from `commonTypes.hpp`'s
/// `AreaStatus`.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum AreaStatus {
    Closed,
    Active,
    Empty,
}

/// Per-page status, as tracked by the [`crate::summary_cache::SummaryCache`].
///
/// Ported from `commonTypes.hpp`'s `SummaryEntry`.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SummaryEntry {
    Free,
    Used,
    Dirty,
    Error,
}

/// One entry of the device-wide area map.
///
/// Ported from `commonTypes.hpp`'s `Area` (the bitfield packing is dropped;
/// nothing in this port sends the struct over the wire as raw bytes outside
/// of the superblock chain, which serializes it explicitly).
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Area {
    pub ty: AreaType,
    pub status: AreaStatus,
    pub erase_count: u32,
    pub position: crate::config::AreaPos,
}

impl Area {
    /// A freshly-initialized, unused area at physical `position`.
    pub fn unset(position: crate::config::AreaPos) -> Self {
        Self {
            ty: AreaType::Unset,
            status: AreaStatus::Closed,
            erase_count: 0,
            position,
        }
    }
}
