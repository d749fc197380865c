//! Page address cache (§4.G): per-inode direct/indirect/double/triple page
//! resolution, cached and dirty-tracked.
//!
//! Ported from `original_source/src/pageAddressCache.{hpp,cpp}`'s
//! `PageAddressCache`/`AddrListCacheElem`. The original's single `Device*`
//! back-pointer is replaced, as elsewhere in this port, with collaborators
//! (`AreaManager`, `SummaryCache`, `Driver`, and — since committing touches
//! the inode's tree entry — [`BTree`]/[`TreeCache`]) passed explicitly into
//! [`PageAddressCache::commit`].

use log::trace;

use crate::addr::Addr;
use crate::area::AreaManager;
use crate::btree::BTree;
use crate::config::{FileSize, Params};
use crate::driver::Driver;
use crate::error::{PaffsError, Result};
use crate::summary_cache::SummaryCache;
use crate::tree_cache::TreeCache;
use crate::types::{AreaType, Inode, SummaryEntry};

pub type PageNo = u32;

/// One resident indirection page: a dense array of up to `addrs_per_page`
/// [`Addr`]s plus bookkeeping. Ported from `pageAddressCache.hpp`'s
/// `AddrListCacheElem`.
#[derive(Debug, Clone)]
struct AddrListCacheElem {
    cache: Vec<Option<Addr>>,
    /// The flash address this page was last loaded from / written to.
    /// `None` means "not yet committed to flash".
    source: Option<Addr>,
    /// Slot within the shallower element's (or, for depth 0, unused) cache
    /// array that this element's `source` was read out of, so a commit can
    /// patch the new address back into the right place.
    position_in_parent: u16,
    dirty: bool,
    active: bool,
}

impl AddrListCacheElem {
    fn empty(addrs_per_page: usize) -> Self {
        Self {
            cache: vec![None; addrs_per_page],
            source: None,
            position_in_parent: 0,
            dirty: false,
            active: false,
        }
    }
}

fn serialize_addr_list(list: &[Option<Addr>], page_bytes: usize) -> Vec<u8> {
    let mut buf = Vec::with_capacity(page_bytes);
    for a in list {
        let raw = a.map(Addr::into_raw).unwrap_or(u64::MAX);
        buf.extend_from_slice(&raw.to_le_bytes());
    }
    buf.resize(page_bytes, 0xFF);
    buf
}

fn deserialize_addr_list(buf: &[u8], count: usize) -> Vec<Option<Addr>> {
    (0..count)
        .map(|i| {
            let raw = u64::from_le_bytes(buf[i * 8..i * 8 + 8].try_into().unwrap());
            Addr::from_raw(raw)
        })
        .collect()
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum Which {
    Single,
    Double,
    Triple,
}

/// Per-inode indirection resolver. Holds at most one single-indirection
/// element, two double-indirection elements, and three triple-indirection
/// elements resident at a time (§3's "PAC cache element").
pub struct PageAddressCache {
    single: [AddrListCacheElem; 1],
    doubl: [AddrListCacheElem; 2],
    tripl: [AddrListCacheElem; 3],
    inode: Option<Inode>,
    params: Params,
}

impl PageAddressCache {
    pub fn new(params: Params) -> Self {
        let app = params.addrs_per_page() as usize;
        Self {
            single: [AddrListCacheElem::empty(app)],
            doubl: [AddrListCacheElem::empty(app), AddrListCacheElem::empty(app)],
            tripl: [
                AddrListCacheElem::empty(app),
                AddrListCacheElem::empty(app),
                AddrListCacheElem::empty(app),
            ],
            inode: None,
            params,
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.single.iter().any(|e| e.dirty)
            || self.doubl.iter().any(|e| e.dirty)
            || self.tripl.iter().any(|e| e.dirty)
    }

    /// The current target inode's authoritative state: every direct/
    /// indirect address this cache has set so far is reflected here even
    /// before `commit`, since `set_page`/`commit_single` mutate this copy
    /// directly rather than one handed back to the caller.
    pub fn target_inode(&self) -> Inode {
        self.inode.expect("no target inode set")
    }

    /// Grows the target inode's recorded size if `size` extends past it.
    pub fn grow_size_to(&mut self, size: FileSize) {
        let inode = self.inode.as_mut().expect("no target inode set");
        if size > inode.size {
            inode.size = size;
        }
    }

    /// Overwrites the target inode's recorded size unconditionally (used by
    /// truncation, which only ever shrinks).
    pub fn set_size(&mut self, size: FileSize) {
        self.inode.as_mut().expect("no target inode set").size = size;
    }

    /// Adjusts the target inode's reserved page count by `delta`.
    pub fn adjust_reserved_pages(&mut self, delta: i64) {
        let inode = self.inode.as_mut().expect("no target inode set");
        inode.reserved_pages = (inode.reserved_pages as i64 + delta).max(0) as u32;
    }

    /// Switches the inode this cache resolves pages for. If it is the same
    /// inode number as before, the call just refreshes metadata (size,
    /// permissions, …) without disturbing resident indirection pages —
    /// ported from the original's `setTargetInode` early-return when the
    /// file doesn't change. Otherwise the previous inode's dirty state is
    /// committed first and every indirection element is dropped.
    pub fn set_target_inode<Dr: Driver>(
        &mut self,
        inode: Inode,
        tc: &mut TreeCache,
        bt: &BTree,
        driver: &mut Dr,
        area_mgr: &mut AreaManager,
        summary_cache: &mut SummaryCache,
    ) -> Result<()> {
        if self.inode.as_ref().map(|i| i.no) == Some(inode.no) {
            self.inode = Some(inode);
            return Ok(());
        }
        if self.is_dirty() {
            self.commit(tc, bt, driver, area_mgr, summary_cache)?;
        }
        self.inode = Some(inode);
        let app = self.params.addrs_per_page() as usize;
        self.single = [AddrListCacheElem::empty(app)];
        self.doubl = [AddrListCacheElem::empty(app), AddrListCacheElem::empty(app)];
        self.tripl = [
            AddrListCacheElem::empty(app),
            AddrListCacheElem::empty(app),
            AddrListCacheElem::empty(app),
        ];
        Ok(())
    }

    fn elem(&self, which: Which, depth: usize) -> &AddrListCacheElem {
        match which {
            Which::Single => &self.single[depth],
            Which::Double => &self.doubl[depth],
            Which::Triple => &self.tripl[depth],
        }
    }

    fn elem_mut(&mut self, which: Which, depth: usize) -> &mut AddrListCacheElem {
        match which {
            Which::Single => &mut self.single[depth],
            Which::Double => &mut self.doubl[depth],
            Which::Triple => &mut self.tripl[depth],
        }
    }

    fn levels(which: Which) -> usize {
        match which {
            Which::Single => 1,
            Which::Double => 2,
            Which::Triple => 3,
        }
    }

    fn write_elem<Dr: Driver>(
        &self,
        elem: &AddrListCacheElem,
        driver: &mut Dr,
        area_mgr: &mut AreaManager,
        summary_cache: &mut SummaryCache,
    ) -> Result<Addr> {
        let area = area_mgr.find_writable_area(AreaType::Index, driver, summary_cache)?;
        let used: Vec<bool> = (0..self.params.data_pages_per_area())
            .map(|p| {
                summary_cache
                    .get_page_status(area, p)
                    .map(|s| s != SummaryEntry::Free)
                    .unwrap_or(true)
            })
            .collect();
        let page = area_mgr.find_first_free_page(area, &used)?;
        let buf = serialize_addr_list(&elem.cache, self.params.data_bytes_per_page() as usize);
        let abs = area_mgr.data_page_abs(area, page);
        driver.write_page(abs, &buf)?;
        summary_cache.set_page_status(area, page, SummaryEntry::Used)?;
        if let Some(old) = elem.source {
            summary_cache.set_page_status(old.extract_logical_area(), old.extract_page_offs(), SummaryEntry::Dirty)?;
        }
        Ok(Addr::combine(area, page))
    }

    fn load_elem<Dr: Driver>(&self, from: Option<Addr>, driver: &mut Dr, area_mgr: &AreaManager) -> Result<Vec<Option<Addr>>> {
        let app = self.params.addrs_per_page() as usize;
        match from {
            None => Ok(vec![None; app]),
            Some(addr) => {
                let abs = area_mgr.data_page_abs(addr.extract_logical_area(), addr.extract_page_offs());
                let mut buf = vec![0u8; self.params.total_bytes_per_page() as usize];
                match driver.read_page(abs, &mut buf) {
                    Ok(()) | Err(PaffsError::BiterrorCorrected) => {}
                    Err(e) => return Err(e),
                }
                Ok(deserialize_addr_list(&buf, app))
            }
        }
    }

    /// Ensures every indirection level on the path rooted at `root_addr`
    /// through `positions` is resident, evicting (writing back first if
    /// dirty) any mismatched sibling at each depth. `positions.len()` must
    /// equal the number of indirection levels for `which` (1/2/3); the last
    /// entry is not used to load a level, only to index into the deepest
    /// one once loaded.
    fn load_path<Dr: Driver>(
        &mut self,
        which: Which,
        root_addr: Option<Addr>,
        positions: &[PageNo],
        driver: &mut Dr,
        area_mgr: &mut AreaManager,
        summary_cache: &mut SummaryCache,
    ) -> Result<()> {
        let mut current_target = root_addr;
        for depth in 0..positions.len() {
            let elem_matches = {
                let elem = self.elem(which, depth);
                elem.active && elem.source == current_target
            };
            if !elem_matches {
                if self.elem(which, depth).dirty {
                    self.commit_single(which, depth, driver, area_mgr, summary_cache)?;
                }
                let loaded = self.load_elem(current_target, driver, area_mgr)?;
                let elem = self.elem_mut(which, depth);
                elem.cache = loaded;
                elem.source = current_target;
                elem.active = true;
                elem.dirty = false;
                if depth > 0 {
                    elem.position_in_parent = positions[depth - 1] as u16;
                }
            }
            if depth + 1 < positions.len() {
                current_target = self.elem(which, depth).cache[positions[depth] as usize];
            }
        }
        Ok(())
    }

    /// Writes one dirty element back and patches the address into its
    /// parent slot (the inode for `depth == 0`, the shallower element
    /// otherwise).
    fn commit_single<Dr: Driver>(
        &mut self,
        which: Which,
        depth: usize,
        driver: &mut Dr,
        area_mgr: &mut AreaManager,
        summary_cache: &mut SummaryCache,
    ) -> Result<()> {
        if !self.elem(which, depth).dirty {
            return Ok(());
        }
        let all_empty = self.elem(which, depth).cache.iter().all(|a| a.is_none());
        let patch = if all_empty {
            if let Some(old) = self.elem(which, depth).source {
                summary_cache.set_page_status(old.extract_logical_area(), old.extract_page_offs(), SummaryEntry::Dirty)?;
            }
            None
        } else {
            Some(self.write_elem(self.elem(which, depth), driver, area_mgr, summary_cache)?)
        };
        if depth == 0 {
            let inode = self.inode.as_mut().expect("commit without target inode");
            match which {
                Which::Single => inode.indir = patch,
                Which::Double => inode.d_indir = patch,
                Which::Triple => inode.t_indir = patch,
            }
        } else {
            let position = self.elem(which, depth).position_in_parent as usize;
            let parent = self.elem_mut(which, depth - 1);
            parent.cache[position] = patch;
            parent.dirty = true;
        }
        let elem = self.elem_mut(which, depth);
        elem.source = patch;
        elem.dirty = false;
        elem.active = patch.is_some();
        Ok(())
    }

    /// `page_no`, resolved to `(which, per-level index path, Some(direct
    /// slot) for the direct-addressed range)`.
    fn positions(&self, page_no: PageNo) -> Result<(Which, Vec<PageNo>, Option<PageNo>)> {
        const DIRECT: PageNo = crate::types::DIRECT_ADDR_COUNT as PageNo;
        let app = self.params.addrs_per_page();
        if page_no < DIRECT {
            return Ok((Which::Single, vec![], Some(page_no)));
        }
        let mut p = page_no - DIRECT;
        if p < app {
            return Ok((Which::Single, vec![p], None));
        }
        p -= app;
        if p < app * app {
            return Ok((Which::Double, vec![p / app, p % app], None));
        }
        p -= app * app;
        if p < app * app * app {
            let l0 = p / (app * app);
            let rem = p % (app * app);
            return Ok((Which::Triple, vec![l0, rem / app, rem % app], None));
        }
        Err(PaffsError::TooBig)
    }

    /// Resolves `page_no` to its current [`Addr`], `None` meaning a hole.
    pub fn get_page<Dr: Driver>(
        &mut self,
        page_no: PageNo,
        driver: &mut Dr,
        area_mgr: &mut AreaManager,
        summary_cache: &mut SummaryCache,
    ) -> Result<Option<Addr>> {
        let inode = self.inode.as_ref().ok_or(PaffsError::Bug)?.clone();
        let (which, path, direct) = self.positions(page_no)?;
        if let Some(d) = direct {
            return Ok(inode.direct[d as usize]);
        }
        let root_addr = match which {
            Which::Single => inode.indir,
            Which::Double => inode.d_indir,
            Which::Triple => inode.t_indir,
        };
        self.load_path(which, root_addr, &path, driver, area_mgr, summary_cache)?;
        let last_depth = Self::levels(which) - 1;
        let last_pos = path[last_depth];
        Ok(self.elem(which, last_depth).cache[last_pos as usize])
    }

    /// Sets `page_no`'s address, marking the owning indirection element (or
    /// the inode's direct slot) dirty.
    pub fn set_page<Dr: Driver>(
        &mut self,
        page_no: PageNo,
        addr: Option<Addr>,
        driver: &mut Dr,
        area_mgr: &mut AreaManager,
        summary_cache: &mut SummaryCache,
    ) -> Result<()> {
        trace!("set page {page_no}");
        let (which, path, direct) = self.positions(page_no)?;
        if let Some(d) = direct {
            let inode = self.inode.as_mut().ok_or(PaffsError::Bug)?;
            inode.direct[d as usize] = addr;
            return Ok(());
        }
        let inode = self.inode.as_ref().ok_or(PaffsError::Bug)?.clone();
        let root_addr = match which {
            Which::Single => inode.indir,
            Which::Double => inode.d_indir,
            Which::Triple => inode.t_indir,
        };
        self.load_path(which, root_addr, &path, driver, area_mgr, summary_cache)?;
        let last_depth = Self::levels(which) - 1;
        let last_pos = path[last_depth];
        let elem = self.elem_mut(which, last_depth);
        elem.cache[last_pos as usize] = addr;
        elem.dirty = true;
        elem.active = true;
        Ok(())
    }

    /// Writes every dirty indirection level, deepest first, then
    /// re-inserts the inode into the tree via `updateExistingInode`.
    pub fn commit<Dr: Driver>(
        &mut self,
        tc: &mut TreeCache,
        bt: &BTree,
        driver: &mut Dr,
        area_mgr: &mut AreaManager,
        summary_cache: &mut SummaryCache,
    ) -> Result<()> {
        for depth in (0..3).rev() {
            self.commit_single(Which::Triple, depth, driver, area_mgr, summary_cache)?;
        }
        for depth in (0..2).rev() {
            self.commit_single(Which::Double, depth, driver, area_mgr, summary_cache)?;
        }
        self.commit_single(Which::Single, 0, driver, area_mgr, summary_cache)?;
        if let Some(inode) = self.inode.clone() {
            bt.update_existing_inode(tc, inode, driver, area_mgr, summary_cache)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ParamsBuilder;
    use crate::driver::simu::SimDriver;
    use crate::types::{AreaStatus, AreaType, InodeType, Permission};

    fn setup() -> (Params, AreaManager, SummaryCache, SimDriver) {
        let p = ParamsBuilder::new()
            .data_bytes_per_page(64)
            .oob_bytes_per_page(8)
            .pages_per_block(4)
            .blocks_total(32)
            .blocks_per_area(2)
            .build()
            .unwrap();
        let mut area_mgr = AreaManager::new(p);
        for a in 0..p.areas_no() {
            area_mgr.set_pos(a, a);
        }
        let mut drv = SimDriver::new(p, 4096);
        for a in 0..p.areas_no() {
            area_mgr.delete_area_contents(&mut drv, a).unwrap();
        }
        area_mgr.set_type(0, AreaType::Index);
        area_mgr.set_status(0, AreaStatus::Empty);
        area_mgr.init_area(0);
        (p, area_mgr, SummaryCache::new(p), drv)
    }

    #[test]
    fn direct_page_round_trips_without_flash_io() {
        let (p, mut area_mgr, mut sc, mut drv) = setup();
        let mut pac = PageAddressCache::new(p);
        let mut tc = TreeCache::new(p);
        let bt = BTree::new(p);
        let inode = Inode::new(1, InodeType::File, Permission::all());
        pac.set_target_inode(inode, &mut tc, &bt, &mut drv, &mut area_mgr, &mut sc).unwrap();
        pac.set_page(3, Some(Addr::combine(5, 9)), &mut drv, &mut area_mgr, &mut sc).unwrap();
        assert_eq!(pac.get_page(3, &mut drv, &mut area_mgr, &mut sc).unwrap(), Some(Addr::combine(5, 9)));
    }

    #[test]
    fn single_indirect_page_commits_and_reloads() {
        let (p, mut area_mgr, mut sc, mut drv) = setup();
        let app = p.addrs_per_page();
        let page_no = crate::types::DIRECT_ADDR_COUNT as u32 + 2;
        assert!(page_no - crate::types::DIRECT_ADDR_COUNT as u32 < app);
        let mut pac = PageAddressCache::new(p);
        let mut tc = TreeCache::new(p);
        let bt = BTree::new(p);
        bt.insert_inode(&mut tc, Inode::new(9, InodeType::File, Permission::all()), &mut drv, &mut area_mgr, &mut sc)
            .unwrap();
        let inode = bt.get_inode(&mut tc, 9, &mut drv, &mut area_mgr, &mut sc).unwrap();
        pac.set_target_inode(inode, &mut tc, &bt, &mut drv, &mut area_mgr, &mut sc).unwrap();
        pac.set_page(page_no, Some(Addr::combine(4, 1)), &mut drv, &mut area_mgr, &mut sc).unwrap();
        pac.commit(&mut tc, &bt, &mut drv, &mut area_mgr, &mut sc).unwrap();

        let inode2 = bt.get_inode(&mut tc, 9, &mut drv, &mut area_mgr, &mut sc).unwrap();
        assert!(inode2.indir.is_some());
        pac.set_target_inode(inode2, &mut tc, &bt, &mut drv, &mut area_mgr, &mut sc).unwrap();
        assert_eq!(
            pac.get_page(page_no, &mut drv, &mut area_mgr, &mut sc).unwrap(),
            Some(Addr::combine(4, 1))
        );
    }

    #[test]
    fn double_indirect_page_commits_and_reloads() {
        let (p, mut area_mgr, mut sc, mut drv) = setup();
        let app = p.addrs_per_page();
        let page_no = crate::types::DIRECT_ADDR_COUNT as u32 + app + 3;
        let mut pac = PageAddressCache::new(p);
        let mut tc = TreeCache::new(p);
        let bt = BTree::new(p);
        bt.insert_inode(&mut tc, Inode::new(11, InodeType::File, Permission::all()), &mut drv, &mut area_mgr, &mut sc)
            .unwrap();
        let inode = bt.get_inode(&mut tc, 11, &mut drv, &mut area_mgr, &mut sc).unwrap();
        pac.set_target_inode(inode, &mut tc, &bt, &mut drv, &mut area_mgr, &mut sc).unwrap();
        pac.set_page(page_no, Some(Addr::combine(6, 2)), &mut drv, &mut area_mgr, &mut sc).unwrap();
        pac.commit(&mut tc, &bt, &mut drv, &mut area_mgr, &mut sc).unwrap();

        let inode2 = bt.get_inode(&mut tc, 11, &mut drv, &mut area_mgr, &mut sc).unwrap();
        assert!(inode2.d_indir.is_some());
        pac.set_target_inode(inode2, &mut tc, &bt, &mut drv, &mut area_mgr, &mut sc).unwrap();
        assert_eq!(
            pac.get_page(page_no, &mut drv, &mut area_mgr, &mut sc).unwrap(),
            Some(Addr::combine(6, 2))
        );
    }

    #[test]
    fn unallocated_indirect_page_reads_as_hole() {
        let (p, mut area_mgr, mut sc, mut drv) = setup();
        let mut pac = PageAddressCache::new(p);
        let mut tc = TreeCache::new(p);
        let bt = BTree::new(p);
        let inode = Inode::new(2, InodeType::File, Permission::all());
        pac.set_target_inode(inode, &mut tc, &bt, &mut drv, &mut area_mgr, &mut sc).unwrap();
        let page_no = crate::types::DIRECT_ADDR_COUNT as u32 + 1;
        assert_eq!(pac.get_page(page_no, &mut drv, &mut area_mgr, &mut sc).unwrap(), None);
    }
}
