//! Device orchestrator (§4.K): the public `format`/`mount`/`open`/`read`/
//! `write`/… surface, wiring every other component together.
//!
//! Ported from `original_source/src/device.{hpp,cpp}`'s `Device`. The
//! original reaches into `BTree`/`DataIO`/`AreaManagement`/`SummaryCache`/
//! `GarbageCollection`/`Superblock`/`Journal` through member references it
//! hands each of them at construction time; here every collaborator is a
//! plain field and this module is the only place that holds all of them at
//! once, passing the ones each call needs as explicit arguments — the same
//! "no back-pointers" shape every other module in this port already uses.
//!
//! Directory contents are a flat, flash-resident payload rather than the
//! original's in-RAM `Dirent` tree with `SmartInodePtr` children: see
//! [`marshal_dir_entries`]/[`unmarshal_dir_entries`] for the on-disk format
//! (§3), which this module reads and writes through the same
//! [`crate::data_io::DataIo`] byte-range calls a regular file uses.
//!
//! Two journal grains are wired up here, not one. Every mutating call also
//! appends a coarse [`Topic::Device`] checkpoint and flushes every cache when
//! the log gets full; the superblock chain, not this checkpoint, is what
//! makes a *completed* operation durable. But a write that was torn mid-page
//! by a crash is not caught by that coarse grain at all — for that,
//! [`Device::mount`] replays [`crate::data_io::DataIo`]'s
//! [`crate::journal::PageStateMachine`] (`Topic::DataIo`) sequence recovered
//! from the log before the log is cleared, reverting or rolling forward
//! whichever write was in flight, the same way [`crate::data_io::DataIo::write_inode_data`]
//! records it going forward.

use std::collections::HashMap;

use log::{debug, trace, warn};

use crate::area::AreaManager;
use crate::btree::BTree;
use crate::config::{FileSize, InodeNo, Params};
use crate::data_io::DataIo;
use crate::driver::Driver;
use crate::error::{PaffsError, Result};
use crate::inode_pool::{InodeHandle, InodePool};
use crate::journal::{Journal, JournalEntry, Topic};
use crate::summary_cache::SummaryCache;
use crate::superblock::{Superblock, SuperIndex};
use crate::tree_cache::TreeCache;
use crate::types::{
    AreaType, Dir, DirEntry, Inode, InodeType, Obj, ObjInfo, OpenFlags, Permission, SeekMode,
};

/// Inode number of the always-present root directory, created by [`Device::format`].
pub const ROOT_INODE_NO: InodeNo = 0;

/// Longest name one directory entry record can carry (`entryLen`'s `u8`
/// range minus the 5 fixed header bytes).
const MAX_NAME_LEN: usize = 250;

/// How many distinct inodes may be resident in the working-set pool at once.
const INODE_POOL_CAPACITY: usize = 64;

/// Journal entries of headroom below which a mutating call forces a full
/// cache flush before returning, rather than risking the next call finding
/// the log full.
const JOURNAL_HEADROOM: usize = 4;

/// Packs directory entries into §3's on-flash payload format: a `u16` count
/// followed by that many `{u8 entryLen, u32 inodeNo, name}` records, where
/// `entryLen` is `5 + name.len()` and names are not null-terminated.
pub(crate) fn marshal_dir_entries(entries: &[DirEntry]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(2 + entries.len() * 12);
    buf.extend_from_slice(&(entries.len() as u16).to_le_bytes());
    for e in entries {
        let name_bytes = e.name.as_bytes();
        let entry_len = (5 + name_bytes.len()) as u8;
        buf.push(entry_len);
        buf.extend_from_slice(&e.no.to_le_bytes());
        buf.extend_from_slice(name_bytes);
    }
    buf
}

/// Inverse of [`marshal_dir_entries`]. Fails with [`PaffsError::Bug`] on any
/// length mismatch — directory payloads are only ever produced by this
/// module, so a malformed one means on-flash corruption, not bad input.
pub(crate) fn unmarshal_dir_entries(buf: &[u8]) -> Result<Vec<DirEntry>> {
    if buf.is_empty() {
        return Ok(Vec::new());
    }
    if buf.len() < 2 {
        return Err(PaffsError::Bug);
    }
    let count = u16::from_le_bytes([buf[0], buf[1]]) as usize;
    let mut pos = 2usize;
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        if pos >= buf.len() {
            return Err(PaffsError::Bug);
        }
        let entry_len = buf[pos] as usize;
        pos += 1;
        if entry_len < 5 || pos + 4 > buf.len() {
            return Err(PaffsError::Bug);
        }
        let no = u32::from_le_bytes(buf[pos..pos + 4].try_into().unwrap());
        pos += 4;
        let name_len = entry_len - 5;
        if pos + name_len > buf.len() {
            return Err(PaffsError::Bug);
        }
        let name = String::from_utf8_lossy(&buf[pos..pos + name_len]).into_owned();
        pos += name_len;
        out.push(DirEntry { name, no });
    }
    Ok(out)
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('/') {
        return Err(PaffsError::InvalidInput);
    }
    if name.len() > MAX_NAME_LEN {
        return Err(PaffsError::ObjNameTooLong);
    }
    Ok(())
}

fn split_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|c| !c.is_empty()).collect()
}

/// The filesystem's single entry point, wiring every other component into
/// the public POSIX-subset surface described by §4.K.
pub struct Device<Dr: Driver> {
    driver: Dr,
    params: Params,
    area_mgr: AreaManager,
    summary_cache: SummaryCache,
    tree_cache: TreeCache,
    btree: BTree,
    data_io: DataIo,
    superblock: Superblock,
    journal: Journal,
    journal_capacity: usize,
    inode_pool: InodePool,
    open_files: HashMap<InodeNo, InodeHandle>,
    open_counts: HashMap<InodeNo, u32>,
    mounted: bool,
    read_only: bool,
    testmode: bool,
}

impl<Dr: Driver> Device<Dr> {
    /// Builds an unmounted device over `driver`. `journal_capacity` is the
    /// number of log entries the journal's MRAM region can hold; the caller
    /// sizes the underlying MRAM (see [`crate::driver::simu::SimDriver`])
    /// to match.
    pub fn new(driver: Dr, params: Params, journal_capacity: usize) -> Self {
        Self {
            driver,
            params,
            area_mgr: AreaManager::new(params),
            summary_cache: SummaryCache::new(params),
            tree_cache: TreeCache::new(params),
            btree: BTree::new(params),
            data_io: DataIo::new(params),
            superblock: Superblock::new(params),
            journal: Journal::new(journal_capacity),
            journal_capacity,
            inode_pool: InodePool::new(INODE_POOL_CAPACITY),
            open_files: HashMap::new(),
            open_counts: HashMap::new(),
            mounted: false,
            read_only: false,
            testmode: false,
        }
    }

    /// Forces a full superblock chain rewrite on every commit instead of
    /// the usual short-circuit. See [`Superblock::set_testmode`].
    pub fn set_testmode(&mut self, t: bool) {
        self.testmode = t;
        self.superblock.set_testmode(t);
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    fn ensure_mounted(&self) -> Result<()> {
        if !self.mounted {
            return Err(PaffsError::NotMounted);
        }
        Ok(())
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(PaffsError::ReadOnly);
        }
        Ok(())
    }

    /// Erases the whole device and writes a fresh, empty filesystem: an
    /// area map with the superblock chain's areas reserved, one dedicated
    /// garbage-collection buffer area, a root directory inode, and an
    /// initial superindex. Leaves the device unmounted.
    pub fn format(&mut self) -> Result<()> {
        self.driver.initialize_nand()?;

        self.area_mgr = AreaManager::new(self.params);
        for a in 0..self.params.areas_no() {
            self.area_mgr.set_pos(a, a);
            self.area_mgr.delete_area_contents(&mut self.driver, a)?;
        }
        for a in 0..self.params.super_chain_elems() {
            self.area_mgr.set_type(a, AreaType::Superblock);
            self.area_mgr.set_status(a, crate::types::AreaStatus::Empty);
        }
        let gc_buffer = self.params.super_chain_elems();
        if gc_buffer >= self.params.areas_no() {
            return Err(PaffsError::NoSpace);
        }
        self.area_mgr.set_type(gc_buffer, AreaType::GarbageBuffer);
        self.area_mgr.set_status(gc_buffer, crate::types::AreaStatus::Empty);

        self.summary_cache = SummaryCache::new(self.params);
        self.tree_cache = TreeCache::new(self.params);
        self.btree = BTree::new(self.params);
        self.data_io = DataIo::new(self.params);
        self.superblock = Superblock::new(self.params);
        self.superblock.set_testmode(self.testmode);
        self.journal = Journal::new(self.journal_capacity);
        self.journal.clear(&mut self.driver)?;
        self.inode_pool = InodePool::new(INODE_POOL_CAPACITY);
        self.open_files.clear();
        self.open_counts.clear();

        let root = Inode::new(ROOT_INODE_NO, InodeType::Dir, Permission::all());
        self.btree.insert_inode(
            &mut self.tree_cache,
            root,
            &mut self.driver,
            &mut self.area_mgr,
            &mut self.summary_cache,
        )?;
        let root_addr = self
            .btree
            .commit_cache(&mut self.tree_cache, &mut self.driver, &mut self.area_mgr, &mut self.summary_cache)?
            .ok_or(PaffsError::Bug)?;
        self.superblock.register_rootnode(root_addr);

        self.commit_super_index()?;
        self.btree.wipe_cache(&mut self.tree_cache);
        self.mounted = false;
        debug!("formatted device, root at {root_addr:?}");
        Ok(())
    }

    /// Walks the superblock chain, restores the area map and active-area
    /// summaries, and replays the journal. Fails with
    /// [`PaffsError::AlreadyMounted`] if already mounted, or whatever
    /// [`Superblock::read_super_index`] reports (typically
    /// [`PaffsError::NotFound`] on a never-formatted device).
    pub fn mount(&mut self, read_only: bool) -> Result<()> {
        if self.mounted {
            return Err(PaffsError::AlreadyMounted);
        }
        self.driver.initialize_nand()?;

        self.area_mgr = AreaManager::new(self.params);
        self.superblock = Superblock::new(self.params);
        self.superblock.set_testmode(self.testmode);
        let index = self.superblock.read_super_index(&mut self.driver, &self.area_mgr)?;
        let SuperIndex { area_map, as_positions, area_summaries, .. } = index;
        self.area_mgr.restore_map(area_map);

        self.summary_cache = SummaryCache::new(self.params);
        if let Some(area) = as_positions[0] {
            self.summary_cache.set_summary_status(area, &area_summaries[0])?;
        }
        if let Some(area) = as_positions[1] {
            self.summary_cache.set_summary_status(area, &area_summaries[1])?;
        }

        self.tree_cache = TreeCache::new(self.params);
        self.tree_cache.get_root_node(self.superblock.get_rootnode_addr(), &mut self.driver, &self.area_mgr)?;
        self.btree = BTree::new(self.params);
        self.data_io = DataIo::new(self.params);

        self.journal = Journal::mount(self.journal_capacity, &mut self.driver)?;
        if !self.journal.is_empty() {
            let entries = self.journal.entries(&mut self.driver)?;
            debug!(
                "replaying {} journal entries from prior session",
                entries.len()
            );
            for entry in &entries {
                self.data_io.replay_journal_entry(entry)?;
            }
            let (committed, restores) = self.data_io.finish_journal_replay(&mut self.summary_cache)?;
            if !committed {
                warn!("reverted a data write interrupted by a crash before its last mount");
            }
            if !restores.is_empty() {
                warn!(
                    "journal replay recovered {} positional page pointers with no consumer wired up",
                    restores.len()
                );
            }
        }
        self.journal.clear(&mut self.driver)?;

        self.inode_pool = InodePool::new(INODE_POOL_CAPACITY);
        self.open_files.clear();
        self.open_counts.clear();
        self.read_only = read_only;
        self.mounted = true;
        debug!("mounted, root at {:?}", self.superblock.get_rootnode_addr());
        Ok(())
    }

    /// Flushes every cache, then marks the device unmounted. All still-open
    /// [`Obj`]/[`Dir`] handles become invalid.
    pub fn unmount(&mut self) -> Result<()> {
        self.ensure_mounted()?;
        self.flush_all_caches()?;
        self.open_files.clear();
        self.open_counts.clear();
        self.btree.wipe_cache(&mut self.tree_cache);
        self.summary_cache.evict_clean();
        self.driver.deinitialize_nand()?;
        self.mounted = false;
        Ok(())
    }

    fn checkpoint(&mut self) -> Result<()> {
        self.journal.append(JournalEntry::Checkpoint(Topic::Device), &mut self.driver)?;
        if self.journal.is_nearly_full(JOURNAL_HEADROOM) {
            trace!("journal nearly full, flushing all caches");
            self.flush_all_caches()?;
        }
        Ok(())
    }

    /// Commits the page address cache, the tree cache, the active data/index
    /// area summaries, and the superblock chain, then clears the journal.
    /// Ported from `flushAllCaches`.
    fn flush_all_caches(&mut self) -> Result<()> {
        self.data_io.flush(&mut self.tree_cache, &self.btree, &mut self.driver, &mut self.area_mgr, &mut self.summary_cache)?;
        if let Some(addr) = self.btree.commit_cache(
            &mut self.tree_cache,
            &mut self.driver,
            &mut self.area_mgr,
            &mut self.summary_cache,
        )? {
            self.superblock.register_rootnode(addr);
        }
        for ty in [AreaType::Data, AreaType::Index] {
            if let Some(area) = self.area_mgr.active_area(ty) {
                self.summary_cache.commit_area_summary(area, &mut self.driver, &self.area_mgr)?;
            }
        }
        self.commit_super_index()?;
        self.journal.clear(&mut self.driver)?;
        Ok(())
    }

    fn build_super_index(&mut self) -> Result<SuperIndex> {
        let empty_summary = || vec![crate::types::SummaryEntry::Free; self.params.data_pages_per_area() as usize];
        let data_area = self.area_mgr.active_area(AreaType::Data);
        let index_area = self.area_mgr.active_area(AreaType::Index);
        let data_summary = match data_area {
            Some(a) => self.summary_cache.get_summary_status(a)?,
            None => empty_summary(),
        };
        let index_summary = match index_area {
            Some(a) => self.summary_cache.get_summary_status(a)?,
            None => empty_summary(),
        };
        Ok(SuperIndex {
            serial: 0,
            log_prev: 0,
            root_node: self.superblock.get_rootnode_addr(),
            used_areas: self.area_mgr.used_areas(),
            area_map: self.area_mgr.map().to_vec(),
            as_positions: [data_area, index_area],
            area_summaries: [data_summary, index_summary],
        })
    }

    fn commit_super_index(&mut self) -> Result<()> {
        let index = self.build_super_index()?;
        self.superblock.commit_super_index(&mut self.driver, &mut self.area_mgr, index)
    }

    fn read_dir_entries(&mut self, dir_no: InodeNo) -> Result<Vec<DirEntry>> {
        let inode = self.btree.get_inode(
            &mut self.tree_cache,
            dir_no,
            &mut self.driver,
            &mut self.area_mgr,
            &mut self.summary_cache,
        )?;
        if inode.ty != InodeType::Dir {
            return Err(PaffsError::NotDirectory);
        }
        let mut buf = vec![0u8; inode.size as usize];
        if !buf.is_empty() {
            self.data_io.read_inode_data(
                &inode,
                0,
                inode.size,
                &mut buf,
                &mut self.tree_cache,
                &self.btree,
                &mut self.driver,
                &mut self.area_mgr,
                &mut self.summary_cache,
            )?;
        }
        let entries = unmarshal_dir_entries(&buf)?;
        check_folder_sanity(&inode, &entries)?;
        Ok(entries)
    }

    fn write_dir_entries(&mut self, dir_no: InodeNo, entries: &[DirEntry]) -> Result<()> {
        let mut inode = self.btree.get_inode(
            &mut self.tree_cache,
            dir_no,
            &mut self.driver,
            &mut self.area_mgr,
            &mut self.summary_cache,
        )?;
        let payload = marshal_dir_entries(entries);
        let old_size = inode.size;
        if (payload.len() as FileSize) < old_size {
            self.data_io.delete_inode_data(
                &mut inode,
                payload.len() as FileSize,
                &mut self.tree_cache,
                &self.btree,
                &mut self.driver,
                &mut self.area_mgr,
                &mut self.summary_cache,
            )?;
        }
        if payload.is_empty() {
            self.data_io.flush(&mut self.tree_cache, &self.btree, &mut self.driver, &mut self.area_mgr, &mut self.summary_cache)?;
        } else {
            self.data_io.write_inode_data(
                &mut inode,
                0,
                &payload,
                &mut self.tree_cache,
                &self.btree,
                &mut self.driver,
                &mut self.area_mgr,
                &mut self.summary_cache,
                &mut self.journal,
            )?;
        }
        Ok(())
    }

    /// Resolves an absolute, `/`-separated path to its inode number.
    fn resolve(&mut self, path: &str) -> Result<InodeNo> {
        let mut cur = ROOT_INODE_NO;
        for component in split_path(path) {
            let entries = self.read_dir_entries(cur)?;
            cur = entries
                .iter()
                .find(|e| e.name == component)
                .map(|e| e.no)
                .ok_or(PaffsError::NotFound)?;
        }
        Ok(cur)
    }

    /// Resolves every path component but the last, returning the parent's
    /// inode number and the leaf name. Fails with [`PaffsError::NoParent`]
    /// if an intermediate component doesn't exist.
    fn resolve_parent<'a>(&mut self, path: &'a str) -> Result<(InodeNo, &'a str)> {
        let components = split_path(path);
        let (&leaf, init) = components.split_last().ok_or(PaffsError::InvalidInput)?;
        let mut cur = ROOT_INODE_NO;
        for component in init {
            let entries = self.read_dir_entries(cur)?;
            cur = entries
                .iter()
                .find(|e| e.name == *component)
                .map(|e| e.no)
                .ok_or(PaffsError::NoParent)?;
        }
        Ok((cur, leaf))
    }

    fn create_object(&mut self, path: &str, ty: InodeType, perm: Permission) -> Result<InodeNo> {
        let (parent_no, name) = self.resolve_parent(path)?;
        validate_name(name)?;
        let parent = self.btree.get_inode(
            &mut self.tree_cache,
            parent_no,
            &mut self.driver,
            &mut self.area_mgr,
            &mut self.summary_cache,
        )?;
        if parent.ty != InodeType::Dir {
            return Err(PaffsError::NotDirectory);
        }
        if !parent.perm.contains(Permission::WRITE) {
            return Err(PaffsError::NoPerm);
        }
        let mut entries = self.read_dir_entries(parent_no)?;
        if entries.iter().any(|e| e.name == name) {
            return Err(PaffsError::Exists);
        }
        let no = self.btree.find_first_free_no(
            &mut self.tree_cache,
            &mut self.driver,
            &mut self.area_mgr,
            &mut self.summary_cache,
        )?;
        let inode = Inode::new(no, ty, perm);
        self.btree.insert_inode(&mut self.tree_cache, inode, &mut self.driver, &mut self.area_mgr, &mut self.summary_cache)?;
        entries.push(DirEntry { name: name.to_string(), no });
        if let Err(e) = self.write_dir_entries(parent_no, &entries) {
            let _ = self.btree.delete_inode(&mut self.tree_cache, no, &mut self.driver, &mut self.area_mgr, &mut self.summary_cache);
            return Err(e);
        }
        Ok(no)
    }

    /// Creates an empty file at `path` if one does not already exist.
    pub fn touch(&mut self, path: &str) -> Result<()> {
        self.ensure_mounted()?;
        self.ensure_writable()?;
        self.create_object(path, InodeType::File, Permission::READ | Permission::WRITE)?;
        self.checkpoint()
    }

    /// Creates a directory at `path`.
    pub fn mkdir(&mut self, path: &str, perm: Permission) -> Result<()> {
        self.ensure_mounted()?;
        self.ensure_writable()?;
        self.create_object(path, InodeType::Dir, perm)?;
        self.checkpoint()
    }

    /// Opens `path` for byte-range I/O, creating it first if `flags`
    /// requests [`OpenFlags::CREATE`] and it does not already exist.
    pub fn open(&mut self, path: &str, flags: OpenFlags) -> Result<Obj> {
        self.ensure_mounted()?;
        let no = match self.resolve(path) {
            Ok(no) => no,
            Err(PaffsError::NotFound) => {
                if flags.contains(OpenFlags::EXISTING) || !flags.contains(OpenFlags::CREATE) {
                    return Err(PaffsError::NotFound);
                }
                self.ensure_writable()?;
                self.create_object(path, InodeType::File, Permission::READ | Permission::WRITE)?
            }
            Err(e) => return Err(e),
        };

        let inode = self.btree.get_inode(
            &mut self.tree_cache,
            no,
            &mut self.driver,
            &mut self.area_mgr,
            &mut self.summary_cache,
        )?;
        if inode.ty != InodeType::File {
            return Err(PaffsError::IsDirectory);
        }
        if flags.contains(OpenFlags::WRITE) {
            self.ensure_writable()?;
            if !inode.perm.contains(Permission::WRITE) {
                return Err(PaffsError::NoPerm);
            }
        }
        if flags.contains(OpenFlags::READ) && !inode.perm.contains(Permission::READ) {
            return Err(PaffsError::NoPerm);
        }

        if !self.open_files.contains_key(&no) {
            let handle = match self.inode_pool.acquire_existing(no) {
                Ok(h) => h,
                Err(_) => self.inode_pool.insert_new(inode)?,
            };
            self.open_files.insert(no, handle);
        }
        *self.open_counts.entry(no).or_insert(0) += 1;

        let file_pointer = if flags.contains(OpenFlags::APPEND) { inode.size } else { 0 };
        Ok(Obj { no, read_only: !flags.contains(OpenFlags::WRITE), file_pointer, flags })
    }

    /// Closes a previously-opened file handle. Evicts the inode from the
    /// working-set pool once its last open handle closes.
    pub fn close(&mut self, obj: Obj) -> Result<()> {
        self.ensure_mounted()?;
        if let Some(count) = self.open_counts.get_mut(&obj.no) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.open_counts.remove(&obj.no);
                self.open_files.remove(&obj.no);
            }
        }
        Ok(())
    }

    /// Reads up to `buf.len()` bytes starting at `obj`'s current file
    /// pointer, advancing it by the number of bytes actually read.
    pub fn read(&mut self, obj: &mut Obj, buf: &mut [u8]) -> Result<FileSize> {
        self.ensure_mounted()?;
        if !obj.flags.contains(OpenFlags::READ) {
            return Err(PaffsError::NoPerm);
        }
        let inode = self.btree.get_inode(
            &mut self.tree_cache,
            obj.no,
            &mut self.driver,
            &mut self.area_mgr,
            &mut self.summary_cache,
        )?;
        let read = self.data_io.read_inode_data(
            &inode,
            obj.file_pointer,
            buf.len() as FileSize,
            buf,
            &mut self.tree_cache,
            &self.btree,
            &mut self.driver,
            &mut self.area_mgr,
            &mut self.summary_cache,
        )?;
        obj.file_pointer += read;
        Ok(read)
    }

    /// Writes `data` at `obj`'s current file pointer (or at end-of-file if
    /// opened with [`OpenFlags::APPEND`]), advancing the pointer by the
    /// number of bytes written.
    pub fn write(&mut self, obj: &mut Obj, data: &[u8]) -> Result<FileSize> {
        self.ensure_mounted()?;
        self.ensure_writable()?;
        if !obj.flags.contains(OpenFlags::WRITE) {
            return Err(PaffsError::NoPerm);
        }
        let mut inode = self.btree.get_inode(
            &mut self.tree_cache,
            obj.no,
            &mut self.driver,
            &mut self.area_mgr,
            &mut self.summary_cache,
        )?;
        let offs = if obj.flags.contains(OpenFlags::APPEND) { inode.size } else { obj.file_pointer };
        let written = self.data_io.write_inode_data(
            &mut inode,
            offs,
            data,
            &mut self.tree_cache,
            &self.btree,
            &mut self.driver,
            &mut self.area_mgr,
            &mut self.summary_cache,
            &mut self.journal,
        )?;
        obj.file_pointer = offs + written;
        if let Some(h) = self.open_files.get(&obj.no) {
            h.with_mut(|i| *i = inode);
        }
        self.checkpoint()?;
        Ok(written)
    }

    /// Repositions `obj`'s file pointer per `mode`, relative to the start,
    /// the current pointer, or end-of-file.
    pub fn seek(&mut self, obj: &mut Obj, offs: i64, mode: SeekMode) -> Result<FileSize> {
        self.ensure_mounted()?;
        let inode = self.btree.get_inode(
            &mut self.tree_cache,
            obj.no,
            &mut self.driver,
            &mut self.area_mgr,
            &mut self.summary_cache,
        )?;
        let base: i64 = match mode {
            SeekMode::Set => 0,
            SeekMode::Cur => obj.file_pointer as i64,
            SeekMode::End => inode.size as i64,
        };
        let new_pos = base.checked_add(offs).ok_or(PaffsError::InvalidInput)?;
        if new_pos < 0 {
            return Err(PaffsError::InvalidInput);
        }
        obj.file_pointer = new_pos as FileSize;
        Ok(obj.file_pointer)
    }

    /// Commits every dirty cache to flash. `obj` is accepted for symmetry
    /// with `open`/`close` but every open file shares the same underlying
    /// page address cache, so this flushes the whole device.
    pub fn flush(&mut self, _obj: &Obj) -> Result<()> {
        self.ensure_mounted()?;
        self.flush_all_caches()
    }

    /// Grows or shrinks the file at `path` to exactly `new_size` bytes.
    /// Growing pads with zero bytes; shrinking frees the now-unreachable
    /// pages.
    pub fn truncate(&mut self, path: &str, new_size: FileSize) -> Result<()> {
        self.ensure_mounted()?;
        self.ensure_writable()?;
        let no = self.resolve(path)?;
        let mut inode = self.btree.get_inode(
            &mut self.tree_cache,
            no,
            &mut self.driver,
            &mut self.area_mgr,
            &mut self.summary_cache,
        )?;
        if inode.ty != InodeType::File {
            return Err(PaffsError::IsDirectory);
        }
        if !inode.perm.contains(Permission::WRITE) {
            return Err(PaffsError::NoPerm);
        }
        match new_size.cmp(&inode.size) {
            std::cmp::Ordering::Less => {
                self.data_io.delete_inode_data(
                    &mut inode,
                    new_size,
                    &mut self.tree_cache,
                    &self.btree,
                    &mut self.driver,
                    &mut self.area_mgr,
                    &mut self.summary_cache,
                )?;
                self.data_io.flush(&mut self.tree_cache, &self.btree, &mut self.driver, &mut self.area_mgr, &mut self.summary_cache)?;
            }
            std::cmp::Ordering::Greater => {
                let padding = vec![0u8; (new_size - inode.size) as usize];
                self.data_io.write_inode_data(
                    &mut inode,
                    inode.size,
                    &padding,
                    &mut self.tree_cache,
                    &self.btree,
                    &mut self.driver,
                    &mut self.area_mgr,
                    &mut self.summary_cache,
                    &mut self.journal,
                )?;
            }
            std::cmp::Ordering::Equal => {}
        }
        if let Some(h) = self.open_files.get(&no) {
            let updated = self.btree.get_inode(
                &mut self.tree_cache,
                no,
                &mut self.driver,
                &mut self.area_mgr,
                &mut self.summary_cache,
            )?;
            h.with_mut(|i| *i = updated);
        }
        self.checkpoint()
    }

    /// Removes the file or empty directory at `path`.
    pub fn remove(&mut self, path: &str) -> Result<()> {
        self.ensure_mounted()?;
        self.ensure_writable()?;
        let (parent_no, name) = self.resolve_parent(path)?;
        let mut entries = self.read_dir_entries(parent_no)?;
        let pos = entries.iter().position(|e| e.name == name).ok_or(PaffsError::NotFound)?;
        let no = entries[pos].no;

        let mut inode = self.btree.get_inode(
            &mut self.tree_cache,
            no,
            &mut self.driver,
            &mut self.area_mgr,
            &mut self.summary_cache,
        )?;
        if inode.ty == InodeType::Dir {
            let children = self.read_dir_entries(no)?;
            if !children.is_empty() {
                return Err(PaffsError::DirNotEmpty);
            }
        }
        if inode.size > 0 {
            self.data_io.delete_inode_data(
                &mut inode,
                0,
                &mut self.tree_cache,
                &self.btree,
                &mut self.driver,
                &mut self.area_mgr,
                &mut self.summary_cache,
            )?;
            self.data_io.flush(&mut self.tree_cache, &self.btree, &mut self.driver, &mut self.area_mgr, &mut self.summary_cache)?;
        }
        self.btree.delete_inode(&mut self.tree_cache, no, &mut self.driver, &mut self.area_mgr, &mut self.summary_cache)?;
        let _ = self.inode_pool.delete(no);
        self.open_files.remove(&no);
        self.open_counts.remove(&no);

        entries.remove(pos);
        self.write_dir_entries(parent_no, &entries)?;
        self.checkpoint()
    }

    /// Changes the permission bits of the object at `path`.
    pub fn chmod(&mut self, path: &str, perm: Permission) -> Result<()> {
        self.ensure_mounted()?;
        self.ensure_writable()?;
        let no = self.resolve(path)?;
        let mut inode = self.btree.get_inode(
            &mut self.tree_cache,
            no,
            &mut self.driver,
            &mut self.area_mgr,
            &mut self.summary_cache,
        )?;
        inode.perm = perm;
        self.btree.update_existing_inode(&mut self.tree_cache, inode, &mut self.driver, &mut self.area_mgr, &mut self.summary_cache)?;
        if let Some(h) = self.open_files.get(&no) {
            h.with_mut(|i| i.perm = perm);
        }
        self.checkpoint()
    }

    /// Reads back the metadata of the object at `path`.
    pub fn get_obj_info(&mut self, path: &str) -> Result<ObjInfo> {
        self.ensure_mounted()?;
        let no = self.resolve(path)?;
        let inode = self.btree.get_inode(
            &mut self.tree_cache,
            no,
            &mut self.driver,
            &mut self.area_mgr,
            &mut self.summary_cache,
        )?;
        Ok(ObjInfo {
            size: inode.size,
            created: inode.created,
            modified: inode.modified,
            is_dir: inode.ty == InodeType::Dir,
            perm: inode.perm,
        })
    }

    /// Opens `path` as a directory, snapshotting its entries.
    pub fn open_dir(&mut self, path: &str) -> Result<Dir> {
        self.ensure_mounted()?;
        let no = self.resolve(path)?;
        let inode = self.btree.get_inode(
            &mut self.tree_cache,
            no,
            &mut self.driver,
            &mut self.area_mgr,
            &mut self.summary_cache,
        )?;
        if inode.ty != InodeType::Dir {
            return Err(PaffsError::NotDirectory);
        }
        let entries = self.read_dir_entries(no)?;
        Ok(Dir { no, entries, pos: 0 })
    }

    /// Returns the next entry of `dir`, or `None` once exhausted.
    pub fn read_dir(&mut self, dir: &mut Dir) -> Result<Option<DirEntry>> {
        self.ensure_mounted()?;
        if dir.pos >= dir.entries.len() {
            return Ok(None);
        }
        let entry = dir.entries[dir.pos].clone();
        dir.pos += 1;
        Ok(Some(entry))
    }

    /// Resets `dir`'s read cursor back to the first entry.
    pub fn rewind_dir(&self, dir: &mut Dir) {
        dir.pos = 0;
    }

    /// Closes a directory handle. A no-op beyond consuming `dir`: the
    /// snapshot it held carries no flash-side state to release.
    pub fn close_dir(&self, _dir: Dir) {}

    /// Inode numbers of every file currently held open.
    pub fn get_list_of_open_files(&self) -> Vec<InodeNo> {
        self.open_files.keys().copied().collect()
    }
}

/// Validates that a decoded directory payload's re-encoded length matches
/// what the inode claims, catching truncated or corrupted directory data
/// before it is handed back to a caller. Ported from `checkFolderSanity`.
fn check_folder_sanity(inode: &Inode, entries: &[DirEntry]) -> Result<()> {
    if inode.ty != InodeType::Dir {
        return Err(PaffsError::NotDirectory);
    }
    if marshal_dir_entries(entries).len() as FileSize != inode.size {
        return Err(PaffsError::Bug);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ParamsBuilder;
    use crate::driver::simu::SimDriver;

    fn params() -> Params {
        ParamsBuilder::new()
            .data_bytes_per_page(256)
            .oob_bytes_per_page(16)
            .pages_per_block(8)
            .blocks_total(64)
            .blocks_per_area(2)
            .jump_pad_no(1)
            .build()
            .unwrap()
    }

    fn new_device() -> Device<SimDriver> {
        let p = params();
        let driver = SimDriver::new(p, 16384);
        Device::new(driver, p, 64)
    }

    #[test]
    fn format_then_mount_exposes_root_directory() {
        let mut dev = new_device();
        dev.format().unwrap();
        dev.mount(false).unwrap();
        let info = dev.get_obj_info("/").unwrap();
        assert!(info.is_dir);
        assert_eq!(info.size, 0);
    }

    #[test]
    fn mount_before_format_fails_not_found() {
        let mut dev = new_device();
        assert_eq!(dev.mount(false), Err(PaffsError::NotFound));
    }

    #[test]
    fn create_write_and_read_file_round_trips() {
        let mut dev = new_device();
        dev.format().unwrap();
        dev.mount(false).unwrap();

        let mut obj = dev.open("/hello.txt", OpenFlags::READ | OpenFlags::WRITE | OpenFlags::CREATE).unwrap();
        let payload = b"hello, paffs";
        let written = dev.write(&mut obj, payload).unwrap();
        assert_eq!(written as usize, payload.len());
        dev.close(obj).unwrap();

        let mut obj = dev.open("/hello.txt", OpenFlags::READ).unwrap();
        let mut buf = vec![0u8; payload.len()];
        let read = dev.read(&mut obj, &mut buf).unwrap();
        assert_eq!(read as usize, payload.len());
        assert_eq!(&buf, payload);
        dev.close(obj).unwrap();
    }

    #[test]
    fn mkdir_and_read_dir_lists_children() {
        let mut dev = new_device();
        dev.format().unwrap();
        dev.mount(false).unwrap();

        dev.mkdir("/docs", Permission::all()).unwrap();
        dev.touch("/docs/a.txt").unwrap();
        dev.touch("/docs/b.txt").unwrap();

        let mut dir = dev.open_dir("/docs").unwrap();
        let mut names = Vec::new();
        while let Some(e) = dev.read_dir(&mut dir).unwrap() {
            names.push(e.name);
        }
        names.sort();
        assert_eq!(names, vec!["a.txt".to_string(), "b.txt".to_string()]);
        dev.close_dir(dir);
    }

    #[test]
    fn open_nonexistent_without_create_fails() {
        let mut dev = new_device();
        dev.format().unwrap();
        dev.mount(false).unwrap();
        assert_eq!(dev.open("/missing", OpenFlags::READ), Err(PaffsError::NotFound));
    }

    #[test]
    fn write_denied_on_read_only_permission() {
        let mut dev = new_device();
        dev.format().unwrap();
        dev.mount(false).unwrap();
        dev.touch("/ro.txt").unwrap();
        dev.chmod("/ro.txt", Permission::READ).unwrap();
        assert_eq!(
            dev.open("/ro.txt", OpenFlags::READ | OpenFlags::WRITE),
            Err(PaffsError::NoPerm)
        );
    }

    #[test]
    fn remove_nonempty_directory_fails() {
        let mut dev = new_device();
        dev.format().unwrap();
        dev.mount(false).unwrap();
        dev.mkdir("/d", Permission::all()).unwrap();
        dev.touch("/d/f").unwrap();
        assert_eq!(dev.remove("/d"), Err(PaffsError::DirNotEmpty));
        dev.remove("/d/f").unwrap();
        dev.remove("/d").unwrap();
        assert_eq!(dev.get_obj_info("/d"), Err(PaffsError::NotFound));
    }

    #[test]
    fn truncate_shrinks_and_grows() {
        let mut dev = new_device();
        dev.format().unwrap();
        dev.mount(false).unwrap();
        let mut obj = dev.open("/f", OpenFlags::READ | OpenFlags::WRITE | OpenFlags::CREATE).unwrap();
        dev.write(&mut obj, &[1u8; 100]).unwrap();
        dev.close(obj).unwrap();

        dev.truncate("/f", 10).unwrap();
        assert_eq!(dev.get_obj_info("/f").unwrap().size, 10);

        dev.truncate("/f", 50).unwrap();
        assert_eq!(dev.get_obj_info("/f").unwrap().size, 50);
        let mut obj = dev.open("/f", OpenFlags::READ).unwrap();
        let mut buf = vec![0xFFu8; 50];
        dev.read(&mut obj, &mut buf).unwrap();
        assert_eq!(&buf[10..], &[0u8; 40]);
        dev.close(obj).unwrap();
    }

    #[test]
    fn data_survives_unmount_and_remount() {
        let p = params();
        let driver = SimDriver::new(p, 16384);
        let mut dev = Device::new(driver, p, 64);
        dev.format().unwrap();
        dev.mount(false).unwrap();
        dev.mkdir("/keep", Permission::all()).unwrap();
        let mut obj = dev.open("/keep/data.bin", OpenFlags::READ | OpenFlags::WRITE | OpenFlags::CREATE).unwrap();
        dev.write(&mut obj, b"persisted").unwrap();
        dev.close(obj).unwrap();
        dev.unmount().unwrap();

        dev.mount(false).unwrap();
        let mut obj = dev.open("/keep/data.bin", OpenFlags::READ).unwrap();
        let mut buf = vec![0u8; 9];
        dev.read(&mut obj, &mut buf).unwrap();
        assert_eq!(&buf, b"persisted");
        dev.close(obj).unwrap();

        let mut dir = dev.open_dir("/").unwrap();
        let mut names = Vec::new();
        while let Some(e) = dev.read_dir(&mut dir).unwrap() {
            names.push(e.name);
        }
        assert_eq!(names, vec!["keep".to_string()]);
    }

    #[test]
    fn read_only_mount_rejects_writes() {
        let p = params();
        let driver = SimDriver::new(p, 16384);
        let mut dev = Device::new(driver, p, 64);
        dev.format().unwrap();
        dev.mount(true).unwrap();
        assert_eq!(dev.touch("/x"), Err(PaffsError::ReadOnly));
    }

    #[test]
    fn name_too_long_is_rejected() {
        let mut dev = new_device();
        dev.format().unwrap();
        dev.mount(false).unwrap();
        let long_name = format!("/{}", "a".repeat(MAX_NAME_LEN + 1));
        assert_eq!(dev.touch(&long_name), Err(PaffsError::ObjNameTooLong));
    }
}
