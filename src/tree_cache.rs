//! Tree cache (§4.E): memoises B⁺-tree nodes in a fixed-capacity arena,
//! tracks dirty/locked state, and reconciles dirty nodes with flash.
//!
//! Ported from `original_source/src/treeCache.{hpp,cpp}`. The original's
//! `TreeCacheNode cache[treeNodeCacheSize]` fixed array plus raw
//! parent/child pointers becomes a `Vec<Option<TreeCacheNode>>` arena
//! addressed by `u16` index (§9 design notes); `cacheUsage: BitList<N>`
//! becomes a `Vec<bool>` companion since the capacity is a mount-time
//! `Params`-derived value here, not a compile-time constant.

use log::{debug, trace};

use crate::addr::Addr;
use crate::area::AreaManager;
use crate::config::Params;
use crate::driver::Driver;
use crate::error::{PaffsError, Result};
use crate::summary_cache::SummaryCache;
use crate::tree::{branch_order, leaf_order, CacheIndex, TreeCacheNode, TreeNode, TreeNodeData};
use crate::types::{AreaType, Inode, InodeType, Permission, SummaryEntry};

/// Serializes one [`TreeNode`] into a page-sized buffer.
///
/// Layout: `self` (8 bytes, `u64::MAX` sentinel for "uncommitted"),
/// `is_leaf` (1 byte), `num_keys` (2 bytes), then either `num_keys` leaf
/// key+inode pairs or `num_keys` branch keys followed by `num_keys + 1`
/// pointer addresses.
pub fn serialize_tree_node(node: &TreeNode, page_bytes: usize) -> Vec<u8> {
    let mut buf = Vec::with_capacity(page_bytes);
    let self_raw = node.self_addr.map(Addr::into_raw).unwrap_or(u64::MAX);
    buf.extend_from_slice(&self_raw.to_le_bytes());
    buf.push(node.data.is_leaf() as u8);
    buf.extend_from_slice(&(node.data.num_keys() as u16).to_le_bytes());
    match &node.data {
        TreeNodeData::Leaf { keys, inodes } => {
            for (k, inode) in keys.iter().zip(inodes.iter()) {
                buf.extend_from_slice(&k.to_le_bytes());
                serialize_inode(inode, &mut buf);
            }
        }
        TreeNodeData::Branch { keys, pointers } => {
            for k in keys {
                buf.extend_from_slice(&k.to_le_bytes());
            }
            for p in pointers {
                let raw = p.map(Addr::into_raw).unwrap_or(u64::MAX);
                buf.extend_from_slice(&raw.to_le_bytes());
            }
        }
    }
    buf.resize(page_bytes, 0xFF);
    buf
}

pub fn serialize_inode(inode: &Inode, buf: &mut Vec<u8>) {
    buf.extend_from_slice(&inode.no.to_le_bytes());
    buf.push(match inode.ty {
        InodeType::File => 0,
        InodeType::Dir => 1,
        InodeType::Link => 2,
    });
    buf.push(inode.perm.bits());
    buf.extend_from_slice(&inode.reserved_pages.to_le_bytes());
    buf.extend_from_slice(&inode.size.to_le_bytes());
    buf.extend_from_slice(&inode.created.to_le_bytes());
    buf.extend_from_slice(&inode.modified.to_le_bytes());
    for d in &inode.direct {
        let raw = d.map(Addr::into_raw).unwrap_or(u64::MAX);
        buf.extend_from_slice(&raw.to_le_bytes());
    }
    for ind in [&inode.indir, &inode.d_indir, &inode.t_indir] {
        let raw = ind.map(Addr::into_raw).unwrap_or(u64::MAX);
        buf.extend_from_slice(&raw.to_le_bytes());
    }
}

pub fn deserialize_inode(buf: &[u8], pos: &mut usize) -> Inode {
    let mut rd = |n: usize| -> &[u8] {
        let s = &buf[*pos..*pos + n];
        *pos += n;
        s
    };
    let no = u32::from_le_bytes(rd(4).try_into().unwrap());
    let ty = match rd(1)[0] {
        0 => InodeType::File,
        1 => InodeType::Dir,
        _ => InodeType::Link,
    };
    let perm = Permission::from_bits_truncate(rd(1)[0]);
    let reserved_pages = u32::from_le_bytes(rd(4).try_into().unwrap());
    let size = u32::from_le_bytes(rd(4).try_into().unwrap());
    let created = u64::from_le_bytes(rd(8).try_into().unwrap());
    let modified = u64::from_le_bytes(rd(8).try_into().unwrap());
    let mut direct = [None; crate::types::DIRECT_ADDR_COUNT];
    for d in &mut direct {
        let raw = u64::from_le_bytes(rd(8).try_into().unwrap());
        *d = Addr::from_raw(raw);
    }
    let indir = Addr::from_raw(u64::from_le_bytes(rd(8).try_into().unwrap()));
    let d_indir = Addr::from_raw(u64::from_le_bytes(rd(8).try_into().unwrap()));
    let t_indir = Addr::from_raw(u64::from_le_bytes(rd(8).try_into().unwrap()));
    Inode {
        no,
        ty,
        perm,
        reserved_pages,
        size,
        created,
        modified,
        direct,
        indir,
        d_indir,
        t_indir,
    }
}

/// Deserializes a page-sized buffer back into a [`TreeNode`].
pub fn deserialize_tree_node(buf: &[u8]) -> TreeNode {
    let mut pos = 0usize;
    let self_raw = u64::from_le_bytes(buf[0..8].try_into().unwrap());
    pos += 8;
    let is_leaf = buf[pos] != 0;
    pos += 1;
    let num_keys = u16::from_le_bytes(buf[pos..pos + 2].try_into().unwrap()) as usize;
    pos += 2;
    let data = if is_leaf {
        let mut keys = Vec::with_capacity(num_keys);
        let mut inodes = Vec::with_capacity(num_keys);
        for _ in 0..num_keys {
            keys.push(u32::from_le_bytes(buf[pos..pos + 4].try_into().unwrap()));
            pos += 4;
            inodes.push(deserialize_inode(buf, &mut pos));
        }
        TreeNodeData::Leaf { keys, inodes }
    } else {
        let mut keys = Vec::with_capacity(num_keys);
        for _ in 0..num_keys {
            keys.push(u32::from_le_bytes(buf[pos..pos + 4].try_into().unwrap()));
            pos += 4;
        }
        let mut pointers = Vec::with_capacity(num_keys + 1);
        for _ in 0..=num_keys {
            let raw = u64::from_le_bytes(buf[pos..pos + 8].try_into().unwrap());
            pos += 8;
            pointers.push(Addr::from_raw(raw));
        }
        TreeNodeData::Branch { keys, pointers }
    };
    TreeNode {
        self_addr: Addr::from_raw(self_raw),
        data,
    }
}

/// The bounded-size, arena-backed cache of resident tree nodes.
pub struct TreeCache {
    slots: Vec<Option<TreeCacheNode>>,
    used: Vec<bool>,
    root: Option<CacheIndex>,
    params: Params,
}

impl TreeCache {
    /// Mirrors the original's `treeNodeCacheSize`: enough nodes resident at
    /// once to hold a root-to-leaf path plus a sibling for redistribution.
    pub const CAPACITY: usize = 32;

    pub fn new(params: Params) -> Self {
        Self {
            slots: (0..Self::CAPACITY).map(|_| None).collect(),
            used: vec![false; Self::CAPACITY],
            root: None,
            params,
        }
    }

    pub fn leaf_order(&self) -> usize {
        leaf_order(&self.params)
    }

    pub fn branch_order(&self) -> usize {
        branch_order(&self.params)
    }

    fn find_first_free_index(&self) -> Option<CacheIndex> {
        self.used.iter().position(|u| !*u).map(|i| i as CacheIndex)
    }

    pub fn node(&self, idx: CacheIndex) -> &TreeCacheNode {
        self.slots[idx as usize].as_ref().expect("stale cache index")
    }

    pub fn node_mut(&mut self, idx: CacheIndex) -> &mut TreeCacheNode {
        self.slots[idx as usize].as_mut().expect("stale cache index")
    }

    pub fn root_index(&self) -> Option<CacheIndex> {
        self.root
    }

    /// Inserts a brand-new, dirty node into a free slot, evicting clean
    /// nodes first if the cache is full. Ported from `addNewCacheNode`.
    pub fn add_new_cache_node<Dr: Driver>(
        &mut self,
        raw: TreeNode,
        parent: CacheIndex,
        driver: &mut Dr,
        area_mgr: &mut AreaManager,
        summary_cache: &mut SummaryCache,
    ) -> Result<CacheIndex> {
        if self.find_first_free_index().is_none() {
            self.free_nodes(1, driver, area_mgr, summary_cache)?;
        }
        let idx = self.find_first_free_index().ok_or(PaffsError::LowMem)?;
        let mut node = TreeCacheNode::new(raw, parent, self.branch_order());
        node.dirty = true;
        self.slots[idx as usize] = Some(node);
        self.used[idx as usize] = true;
        Ok(idx)
    }

    /// Ensures the root is resident, loading it from flash via
    /// `root_addr` if necessary. Ported from `getRootNodeFromCache`.
    pub fn get_root_node<Dr: Driver>(
        &mut self,
        root_addr: Option<Addr>,
        driver: &mut Dr,
        area_mgr: &AreaManager,
    ) -> Result<CacheIndex> {
        if let Some(idx) = self.root {
            if self.slots[idx as usize].is_some() {
                return Ok(idx);
            }
        }
        let addr = root_addr.ok_or(PaffsError::Bug)?;
        let raw = self.read_tree_node(driver, area_mgr, addr)?;
        let idx = self.find_first_free_index().ok_or(PaffsError::LowMem)?;
        let node = TreeCacheNode::new(raw, idx, self.branch_order());
        self.slots[idx as usize] = Some(node);
        self.used[idx as usize] = true;
        self.root = Some(idx);
        Ok(idx)
    }

    /// Installs a freshly-created root (used at format time and whenever
    /// the root splits or collapses). Ported from `setRoot`.
    pub fn set_root(&mut self, idx: CacheIndex) {
        self.node_mut(idx).parent = idx;
        self.root = Some(idx);
    }

    /// Resolves child `index` of `parent`, loading it from flash if it is
    /// not yet resident. Ported from `getTreeNodeAtIndexFrom`.
    pub fn get_child<Dr: Driver>(
        &mut self,
        parent: CacheIndex,
        index: usize,
        driver: &mut Dr,
        area_mgr: &mut AreaManager,
        summary_cache: &mut SummaryCache,
    ) -> Result<CacheIndex> {
        if let Some(existing) = self.node(parent).pointers[index] {
            if self.slots[existing as usize].is_some() {
                return Ok(existing);
            }
        }
        let addr = match &self.node(parent).raw.data {
            TreeNodeData::Branch { pointers, .. } => pointers[index].ok_or(PaffsError::Bug)?,
            TreeNodeData::Leaf { .. } => return Err(PaffsError::Bug),
        };
        if self.find_first_free_index().is_none() {
            self.node_mut(parent).locked = true;
            self.free_nodes(1, driver, area_mgr, summary_cache)?;
            self.node_mut(parent).locked = false;
        }
        let raw = self.read_tree_node(driver, area_mgr, addr)?;
        let idx = self.find_first_free_index().ok_or(PaffsError::LowMem)?;
        let node = TreeCacheNode::new(raw, parent, self.branch_order());
        self.slots[idx as usize] = Some(node);
        self.used[idx as usize] = true;
        self.node_mut(parent).pointers[index] = Some(idx);
        Ok(idx)
    }

    /// Locks `node` and propagates `inherited_lock` up to the root.
    pub fn lock(&mut self, idx: CacheIndex) {
        self.node_mut(idx).locked = true;
        let mut cur = idx;
        while self.node(cur).parent != cur {
            let parent = self.node(cur).parent;
            self.node_mut(parent).inherited_lock = true;
            cur = parent;
        }
    }

    /// Unlocks `node`, clearing `inherited_lock` up the chain while no
    /// sibling path still holds a lock.
    pub fn unlock(&mut self, idx: CacheIndex) {
        self.node_mut(idx).locked = false;
        let mut cur = idx;
        while self.node(cur).parent != cur {
            let parent = self.node(cur).parent;
            let any_locked = self
                .node(parent)
                .pointers
                .iter()
                .filter_map(|p| *p)
                .any(|c| self.slots[c as usize].as_ref().map(|n| n.locked || n.inherited_lock).unwrap_or(false));
            if !any_locked {
                self.node_mut(parent).inherited_lock = false;
            }
            cur = parent;
        }
    }

    /// Frees a slot, marking its old on-flash location dirty in the
    /// summary cache. Ported from `removeNode` + `deleteTreeNode`.
    pub fn remove_node(&mut self, idx: CacheIndex, summary_cache: &mut SummaryCache, area_mgr: &AreaManager) -> Result<()> {
        if let Some(self_addr) = self.node(idx).raw.self_addr {
            summary_cache.set_page_status(
                self_addr.extract_logical_area(),
                self_addr.extract_page_offs(),
                SummaryEntry::Dirty,
            )?;
        }
        let _ = area_mgr;
        self.slots[idx as usize] = None;
        self.used[idx as usize] = false;
        if self.root == Some(idx) {
            self.root = None;
        }
        Ok(())
    }

    fn read_tree_node<Dr: Driver>(&self, driver: &mut Dr, area_mgr: &AreaManager, addr: Addr) -> Result<TreeNode> {
        let abs = area_mgr.data_page_abs(addr.extract_logical_area(), addr.extract_page_offs());
        let mut buf = vec![0u8; self.params.total_bytes_per_page() as usize];
        match driver.read_page(abs, &mut buf) {
            Ok(()) | Err(PaffsError::BiterrorCorrected) => {}
            Err(e) => return Err(e),
        }
        Ok(deserialize_tree_node(&buf[..self.params.data_bytes_per_page() as usize]))
    }

    /// Writes one dirty node to a freshly-allocated index-area page,
    /// patching its new `self` address into `new_root` if it is the root.
    fn write_tree_node<Dr: Driver>(
        &mut self,
        idx: CacheIndex,
        driver: &mut Dr,
        area_mgr: &mut AreaManager,
        summary_cache: &mut SummaryCache,
    ) -> Result<Addr> {
        let area = area_mgr.find_writable_area(AreaType::Index, driver, summary_cache)?;
        let used: Vec<bool> = (0..self.params.data_pages_per_area())
            .map(|p| summary_cache.get_page_status(area, p).map(|s| s != SummaryEntry::Free).unwrap_or(true))
            .collect();
        let page = area_mgr.find_first_free_page(area, &used)?;
        let old_addr = self.node(idx).raw.self_addr;
        let buf = serialize_tree_node(&self.node(idx).raw, self.params.data_bytes_per_page() as usize);
        let abs = area_mgr.data_page_abs(area, page);
        driver.write_page(abs, &buf)?;
        summary_cache.set_page_status(area, page, SummaryEntry::Used)?;
        if let Some(old) = old_addr {
            summary_cache.set_page_status(
                old.extract_logical_area(),
                old.extract_page_offs(),
                SummaryEntry::Dirty,
            )?;
        }
        let new_addr = Addr::combine(area, page);
        self.node_mut(idx).raw.self_addr = Some(new_addr);
        self.node_mut(idx).dirty = false;
        Ok(new_addr)
    }

    /// Writes every dirty node to flash, deepest first, patching each
    /// parent's pointer slot as it goes. Returns the (possibly new) root
    /// address. Ported from `commitCache`/`commitNodesRecursively`.
    pub fn commit_cache<Dr: Driver>(
        &mut self,
        driver: &mut Dr,
        area_mgr: &mut AreaManager,
        summary_cache: &mut SummaryCache,
    ) -> Result<Option<Addr>> {
        let Some(root) = self.root else { return Ok(None) };
        self.commit_recursive(root, driver, area_mgr, summary_cache)?;
        Ok(self.node(root).raw.self_addr)
    }

    fn commit_recursive<Dr: Driver>(
        &mut self,
        idx: CacheIndex,
        driver: &mut Dr,
        area_mgr: &mut AreaManager,
        summary_cache: &mut SummaryCache,
    ) -> Result<()> {
        let child_indices: Vec<Option<CacheIndex>> = self.node(idx).pointers.clone();
        for (slot, child) in child_indices.iter().enumerate() {
            if let Some(c) = child {
                if self.node(*c).dirty {
                    self.commit_recursive(*c, driver, area_mgr, summary_cache)?;
                    let new_addr = self.node(*c).raw.self_addr;
                    if let TreeNodeData::Branch { pointers, .. } = &mut self.node_mut(idx).raw.data {
                        pointers[slot] = new_addr;
                    }
                    self.node_mut(idx).dirty = true;
                }
            }
        }
        if self.node(idx).dirty {
            self.write_tree_node(idx, driver, area_mgr, summary_cache)?;
        }
        Ok(())
    }

    /// Drops every resident node without writing anything back, used by
    /// `wipeCache` on unmount after a successful commit.
    pub fn clear(&mut self) {
        debug!("clearing tree cache");
        for s in &mut self.slots {
            *s = None;
        }
        self.used = vec![false; Self::CAPACITY];
        self.root = None;
    }

    /// Running out of free slots, evict what can be evicted: clean leaves
    /// first, then clean branches, committing as a last resort. Ported
    /// from `freeNodes`/`cleanFreeLeafNodes`/`cleanFreeNodes`.
    fn free_nodes<Dr: Driver>(
        &mut self,
        needed: usize,
        driver: &mut Dr,
        area_mgr: &mut AreaManager,
        summary_cache: &mut SummaryCache,
    ) -> Result<()> {
        trace!("freeing {needed} tree cache slots");
        let mut freed = 0;
        for i in 0..Self::CAPACITY {
            if freed >= needed {
                break;
            }
            if let Some(node) = &self.slots[i] {
                let is_leaf_clean = node.raw.data.is_leaf()
                    && !node.dirty
                    && !node.locked
                    && !node.inherited_lock
                    && self.root != Some(i as CacheIndex);
                if is_leaf_clean {
                    self.detach_from_parent(i as CacheIndex);
                    self.slots[i] = None;
                    self.used[i] = false;
                    freed += 1;
                }
            }
        }
        if freed < needed {
            for i in 0..Self::CAPACITY {
                if freed >= needed {
                    break;
                }
                if let Some(node) = &self.slots[i] {
                    let clean = !node.dirty
                        && !node.locked
                        && !node.inherited_lock
                        && self.root != Some(i as CacheIndex)
                        && node.pointers.iter().all(|p| p.is_none());
                    if clean {
                        self.detach_from_parent(i as CacheIndex);
                        self.slots[i] = None;
                        self.used[i] = false;
                        freed += 1;
                    }
                }
            }
        }
        if freed < needed {
            // Everything resident is dirty or locked: commit to flash to
            // make room, same last resort the original falls back to.
            self.commit_cache(driver, area_mgr, summary_cache)?;
            for i in 0..Self::CAPACITY {
                if freed >= needed {
                    break;
                }
                if let Some(node) = &self.slots[i] {
                    if !node.locked && !node.inherited_lock && self.root != Some(i as CacheIndex) {
                        self.detach_from_parent(i as CacheIndex);
                        self.slots[i] = None;
                        self.used[i] = false;
                        freed += 1;
                    }
                }
            }
        }
        if freed < needed {
            return Err(PaffsError::LowMem);
        }
        Ok(())
    }

    fn detach_from_parent(&mut self, idx: CacheIndex) {
        let parent = self.node(idx).parent;
        if parent == idx {
            return;
        }
        if let Some(slot) = self.node(parent).pointers.iter().position(|p| *p == Some(idx)) {
            self.node_mut(parent).pointers[slot] = None;
        }
    }

    /// Validates every cache invariant in §4.E: every used slot reachable
    /// from the root, parent pointers consistent, keys ordered, and every
    /// non-dirty node has a flash address.
    pub fn is_tree_cache_valid(&self) -> bool {
        let Some(root) = self.root else { return true };
        let mut reachable = vec![false; Self::CAPACITY];
        self.check_subtree(root, &mut reachable, u32::MIN, u32::MAX)
    }

    fn check_subtree(&self, idx: CacheIndex, reachable: &mut [bool], min: u32, max: u32) -> bool {
        if reachable[idx as usize] {
            return false; // cycle
        }
        reachable[idx as usize] = true;
        let node = self.node(idx);
        if !node.dirty && node.raw.self_addr.is_none() {
            return false;
        }
        let keys = node.raw.data.keys();
        if !keys.windows(2).all(|w| w[0] < w[1]) {
            return false;
        }
        if let Some(&first) = keys.first() {
            if first < min {
                return false;
            }
        }
        if let Some(&last) = keys.last() {
            if last > max {
                return false;
            }
        }
        for (slot, child) in node.pointers.iter().enumerate() {
            if let Some(c) = child {
                if self.node(*c).parent != idx {
                    return false;
                }
                let _ = slot;
                if !self.check_subtree(*c, reachable, min, max) {
                    return false;
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ParamsBuilder;
    use crate::driver::simu::SimDriver;
    use crate::types::{InodeType, Permission};

    fn params() -> Params {
        ParamsBuilder::new()
            .data_bytes_per_page(512)
            .oob_bytes_per_page(16)
            .pages_per_block(8)
            .blocks_total(64)
            .blocks_per_area(4)
            .build()
            .unwrap()
    }

    #[test]
    fn tree_node_round_trips_through_serialization() {
        let p = params();
        let mut leaf = TreeNode::new_leaf();
        leaf.self_addr = Some(Addr::combine(1, 2));
        if let TreeNodeData::Leaf { keys, inodes } = &mut leaf.data {
            keys.push(5);
            inodes.push(Inode::new(5, InodeType::File, Permission::READ));
        }
        let buf = serialize_tree_node(&leaf, p.data_bytes_per_page() as usize);
        let back = deserialize_tree_node(&buf);
        assert!(back.data.is_leaf());
        assert_eq!(back.data.keys(), &[5]);
    }

    #[test]
    fn add_new_root_then_commit_assigns_self_addr() {
        let p = params();
        let mut tc = TreeCache::new(p);
        let mut area_mgr = AreaManager::new(p);
        let mut summary_cache = SummaryCache::new(p);
        let mut drv = SimDriver::new(p, 1024);
        for a in 0..p.areas_no() {
            area_mgr.set_pos(a, a);
        }
        area_mgr.set_type(0, AreaType::Index);
        area_mgr.delete_area_contents(&mut drv, 0).unwrap();
        area_mgr.init_area(0);

        let idx = tc
            .add_new_cache_node(TreeNode::new_leaf(), 0, &mut drv, &mut area_mgr, &mut summary_cache)
            .unwrap();
        tc.set_root(idx);
        assert!(tc.is_tree_cache_valid());
        let addr = tc.commit_cache(&mut drv, &mut area_mgr, &mut summary_cache).unwrap();
        assert!(addr.is_some());
        assert!(!tc.node(idx).dirty);
    }
}
