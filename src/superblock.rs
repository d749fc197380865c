//! Superblock chain (§4.I): the crash-safe bootstrap path from "power on" to
//! "I know the root node address and the whole area map".
//!
//! Ported from `original_source/src/superblock.{hpp,cpp}`. The original's
//! `AreaPos` fields in this file are explicitly documented there as holding
//! *physical* area numbers rather than logical ones, to sidestep the
//! logical-to-physical indirection the area map itself exists to provide.
//! This port keeps that convention for chain links but expresses it simply:
//! superblock-type areas are never garbage-collected or repositioned by
//! [`crate::area::AreaManager::swap_area_position`], so their logical
//! `AreaPos` and physical position always coincide and
//! [`AreaManager::data_page_abs`] can be used directly for chain I/O, even
//! before a valid area map has been installed from a just-read superindex.
//!
//! The chain is `Anchor -> JumpPad_1 -> .. -> JumpPad_k -> SuperIndex`
//! (`superChainElems = jumpPadNo + 2` links). Area 0 always holds the anchor.

use log::{debug, trace};

use crate::addr::Addr;
use crate::area::AreaManager;
use crate::config::{AreaPos, PageOffs, Params};
use crate::driver::Driver;
use crate::error::{PaffsError, Result};
use crate::types::{Area, AreaStatus, AreaType, SummaryEntry};

/// On-flash compatibility tag, checked against the anchor at mount time.
pub const FS_VERSION: u8 = 1;

/// Reserved `serial` value meaning "this page was never written".
const SERIAL_EMPTY: u32 = 0xFFFF_FFFF;

/// In-memory view of the anchor record. Ported from `superblock.hpp`'s
/// `AnchorEntry`. `logPrev` is always zero for the anchor (it may wrap
/// within its area but never moves), so it is not modeled as a field.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct AnchorEntry {
    pub serial: u32,
    pub jump_pad_area: AreaPos,
    pub params: Params,
    pub fs_version: u8,
}

/// Ported from `superblock.hpp`'s `JumpPadEntry`.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct JumpPadEntry {
    pub serial: u32,
    pub log_prev: AreaPos,
    pub next_area: AreaPos,
}

/// In-memory view of the superindex: everything needed to resume a mounted
/// device without replaying the whole flash. Ported from `superblock.hpp`'s
/// `SuperIndex`.
#[derive(Debug, Clone)]
pub struct SuperIndex {
    pub serial: u32,
    pub log_prev: AreaPos,
    pub root_node: Option<Addr>,
    pub used_areas: u32,
    pub area_map: Vec<Area>,
    /// The (data, index) area whose summary was open at checkpoint time.
    pub as_positions: [Option<AreaPos>; 2],
    pub area_summaries: [Vec<SummaryEntry>; 2],
}

fn phys_page_abs(area_mgr: &AreaManager, area: AreaPos, page: PageOffs) -> u64 {
    area_mgr.data_page_abs(area, page)
}

/// Scans every page of `area` and returns the offset and serial of the page
/// that currently "wins" under §4.I's mount rule: the maximum non-empty
/// serial, except that a `0` following a non-empty run is treated as newer
/// (the block/area wrapped and started a new life).
fn find_latest_entry<Dr: Driver>(
    params: &Params,
    area_mgr: &AreaManager,
    driver: &mut Dr,
    area: AreaPos,
) -> Result<Option<(PageOffs, u32)>> {
    let mut best: Option<(PageOffs, u32)> = None;
    let mut buf = vec![0u8; params.data_bytes_per_page() as usize];
    for page in 0..params.total_pages_per_area() {
        let abs = phys_page_abs(area_mgr, area, page);
        match driver.read_page(abs, &mut buf) {
            Ok(()) | Err(PaffsError::BiterrorCorrected) => {}
            Err(e) => return Err(e),
        }
        let serial = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        if serial == SERIAL_EMPTY {
            continue;
        }
        best = Some(match best {
            None => (page, serial),
            Some((_, best_serial)) => {
                if serial == 0 && best_serial != 0 {
                    (page, serial)
                } else if serial >= best_serial {
                    (page, serial)
                } else {
                    best.unwrap()
                }
            }
        });
    }
    Ok(best)
}

/// Finds the first page offset in `area` that starts a run of `needed`
/// consecutive never-written pages, if one exists.
fn find_free_run<Dr: Driver>(
    params: &Params,
    area_mgr: &AreaManager,
    driver: &mut Dr,
    area: AreaPos,
    needed: u32,
) -> Result<Option<PageOffs>> {
    let total = params.total_pages_per_area();
    let mut buf = vec![0u8; 4];
    let mut run_start: Option<PageOffs> = None;
    let mut run_len = 0u32;
    for page in 0..total {
        let abs = phys_page_abs(area_mgr, area, page);
        driver.read_page(abs, &mut buf).ok();
        let serial = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        if serial == SERIAL_EMPTY {
            if run_start.is_none() {
                run_start = Some(page);
            }
            run_len += 1;
            if run_len >= needed {
                return Ok(run_start);
            }
        } else {
            run_start = None;
            run_len = 0;
        }
    }
    Ok(None)
}

/// Picks a fresh superblock-type area to relocate a chain link into, never
/// reusing `avoid`. Ported from `findBestNextFreeArea`; this never invokes
/// garbage collection, matching the spec's "plain first-free empty
/// superblock area search" rule for chain relocation.
fn find_best_next_free_area(area_mgr: &AreaManager, params: &Params, avoid: AreaPos) -> Result<AreaPos> {
    (0..params.areas_no())
        .find(|&a| a != avoid && area_mgr.get_type(a) == AreaType::Superblock && area_mgr.get_status(a) != AreaStatus::Active)
        .ok_or(PaffsError::NoSpace)
}

fn serialize_params(p: &Params, buf: &mut Vec<u8>) {
    buf.extend_from_slice(&p.data_bytes_per_page.to_le_bytes());
    buf.extend_from_slice(&p.oob_bytes_per_page.to_le_bytes());
    buf.extend_from_slice(&p.pages_per_block.to_le_bytes());
    buf.extend_from_slice(&p.blocks_total.to_le_bytes());
    buf.extend_from_slice(&p.blocks_per_area.to_le_bytes());
    buf.extend_from_slice(&p.jump_pad_no.to_le_bytes());
}

fn deserialize_params(buf: &[u8]) -> Result<Params> {
    if buf.len() < 24 {
        return Err(PaffsError::Bug);
    }
    let mut next = |i: usize| u32::from_le_bytes(buf[i * 4..i * 4 + 4].try_into().unwrap());
    crate::config::ParamsBuilder::new()
        .data_bytes_per_page(next(0))
        .oob_bytes_per_page(next(1))
        .pages_per_block(next(2))
        .blocks_total(next(3))
        .blocks_per_area(next(4))
        .jump_pad_no(next(5))
        .build()
}

fn serialize_anchor(e: &AnchorEntry) -> Vec<u8> {
    let mut buf = Vec::with_capacity(33);
    buf.extend_from_slice(&e.serial.to_le_bytes());
    buf.extend_from_slice(&e.jump_pad_area.to_le_bytes());
    buf.push(e.fs_version);
    serialize_params(&e.params, &mut buf);
    buf
}

fn deserialize_anchor(buf: &[u8]) -> Result<AnchorEntry> {
    if buf.len() < 33 {
        return Err(PaffsError::Bug);
    }
    Ok(AnchorEntry {
        serial: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
        jump_pad_area: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
        fs_version: buf[8],
        params: deserialize_params(&buf[9..33])?,
    })
}

fn serialize_jump_pad(e: &JumpPadEntry) -> Vec<u8> {
    let mut buf = Vec::with_capacity(12);
    buf.extend_from_slice(&e.serial.to_le_bytes());
    buf.extend_from_slice(&e.log_prev.to_le_bytes());
    buf.extend_from_slice(&e.next_area.to_le_bytes());
    buf
}

fn deserialize_jump_pad(buf: &[u8]) -> Result<JumpPadEntry> {
    if buf.len() < 12 {
        return Err(PaffsError::Bug);
    }
    Ok(JumpPadEntry {
        serial: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
        log_prev: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
        next_area: u32::from_le_bytes(buf[8..12].try_into().unwrap()),
    })
}

fn encode_summary_entry(e: SummaryEntry) -> u8 {
    match e {
        SummaryEntry::Free => 0,
        SummaryEntry::Used => 1,
        SummaryEntry::Dirty => 2,
        SummaryEntry::Error => 3,
    }
}

fn decode_summary_entry(v: u8) -> SummaryEntry {
    match v & 0b11 {
        0 => SummaryEntry::Free,
        1 => SummaryEntry::Used,
        2 => SummaryEntry::Dirty,
        _ => SummaryEntry::Error,
    }
}

fn pack_summary(entries: &[SummaryEntry]) -> Vec<u8> {
    let mut bytes = vec![0u8; (entries.len() * 2 + 7) / 8];
    for (i, e) in entries.iter().enumerate() {
        let v = encode_summary_entry(*e);
        bytes[i / 4] |= v << ((i % 4) * 2);
    }
    bytes
}

fn unpack_summary(buf: &[u8], count: usize) -> Vec<SummaryEntry> {
    (0..count)
        .map(|i| decode_summary_entry((buf[i / 4] >> ((i % 4) * 2)) & 0b11))
        .collect()
}

fn serialize_area_map(map: &[Area]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(map.len() * 10);
    for a in map {
        let ty = match a.ty {
            AreaType::Unset => 0u8,
            AreaType::Superblock => 1,
            AreaType::Index => 2,
            AreaType::Data => 3,
            AreaType::GarbageBuffer => 4,
            AreaType::Retired => 5,
        };
        let status = match a.status {
            AreaStatus::Closed => 0u8,
            AreaStatus::Active => 1,
            AreaStatus::Empty => 2,
        };
        buf.push(ty);
        buf.push(status);
        buf.extend_from_slice(&a.erase_count.to_le_bytes());
        buf.extend_from_slice(&a.position.to_le_bytes());
    }
    buf
}

fn deserialize_area_map(buf: &[u8], areas_no: u32) -> Result<Vec<Area>> {
    let mut out = Vec::with_capacity(areas_no as usize);
    for i in 0..areas_no as usize {
        let base = i * 10;
        if buf.len() < base + 10 {
            return Err(PaffsError::Bug);
        }
        let ty = match buf[base] {
            0 => AreaType::Unset,
            1 => AreaType::Superblock,
            2 => AreaType::Index,
            3 => AreaType::Data,
            4 => AreaType::GarbageBuffer,
            5 => AreaType::Retired,
            _ => return Err(PaffsError::Bug),
        };
        let status = match buf[base + 1] {
            0 => AreaStatus::Closed,
            1 => AreaStatus::Active,
            2 => AreaStatus::Empty,
            _ => return Err(PaffsError::Bug),
        };
        let erase_count = u32::from_le_bytes(buf[base + 2..base + 6].try_into().unwrap());
        let position = u32::from_le_bytes(buf[base + 6..base + 10].try_into().unwrap());
        out.push(Area { ty, status, erase_count, position });
    }
    Ok(out)
}

fn serialize_super_index(idx: &SuperIndex, params: &Params) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&idx.serial.to_le_bytes());
    buf.extend_from_slice(&idx.log_prev.to_le_bytes());
    buf.extend_from_slice(&idx.root_node.map(Addr::into_raw).unwrap_or(u64::MAX).to_le_bytes());
    buf.extend_from_slice(&idx.used_areas.to_le_bytes());
    for p in idx.as_positions {
        buf.extend_from_slice(&p.unwrap_or(u32::MAX).to_le_bytes());
    }
    buf.extend_from_slice(&serialize_area_map(&idx.area_map));
    for s in &idx.area_summaries {
        let packed = pack_summary(s);
        debug_assert!(packed.len() <= (params.data_pages_per_area() as usize * 2 + 7) / 8);
        buf.extend_from_slice(&packed);
    }
    buf
}

fn deserialize_super_index(buf: &[u8], params: &Params, serial: u32) -> Result<SuperIndex> {
    if buf.len() < 24 {
        return Err(PaffsError::Bug);
    }
    let log_prev = u32::from_le_bytes(buf[4..8].try_into().unwrap());
    let root_raw = u64::from_le_bytes(buf[8..16].try_into().unwrap());
    let used_areas = u32::from_le_bytes(buf[16..20].try_into().unwrap());
    let mut pos = 20;
    let mut as_positions = [None; 2];
    for slot in &mut as_positions {
        let v = u32::from_le_bytes(buf[pos..pos + 4].try_into().unwrap());
        *slot = if v == u32::MAX { None } else { Some(v) };
        pos += 4;
    }
    let areas_no = params.areas_no();
    let area_map = deserialize_area_map(&buf[pos..], areas_no)?;
    pos += areas_no as usize * 10;
    let summary_bytes = (params.data_pages_per_area() as usize * 2 + 7) / 8;
    let mut area_summaries: [Vec<SummaryEntry>; 2] = [Vec::new(), Vec::new()];
    for s in &mut area_summaries {
        if buf.len() < pos + summary_bytes {
            return Err(PaffsError::Bug);
        }
        *s = unpack_summary(&buf[pos..pos + summary_bytes], params.data_pages_per_area() as usize);
        pos += summary_bytes;
    }
    Ok(SuperIndex {
        serial,
        log_prev,
        root_node: Addr::from_raw(root_raw),
        used_areas,
        area_map,
        as_positions,
        area_summaries,
    })
}

/// The superblock chain bootstrap path. Owns only the rootnode cursor and
/// the last-known location/serial of every chain link; everything else
/// (area map, summaries) lives in the [`SuperIndex`] this module reads and
/// writes, owned by the device orchestrator between calls.
pub struct Superblock {
    params: Params,
    root_node: Option<Addr>,
    rootnode_dirty: bool,
    /// Current area of each chain link: `[anchor, jumppad_1, .., jumppad_k, superindex]`.
    link_areas: Vec<AreaPos>,
    link_serials: Vec<u32>,
    testmode: bool,
}

impl Superblock {
    pub fn new(params: Params) -> Self {
        let elems = params.super_chain_elems() as usize;
        Self {
            params,
            root_node: None,
            rootnode_dirty: false,
            link_areas: vec![0; elems],
            link_serials: vec![SERIAL_EMPTY; elems],
            testmode: false,
        }
    }

    /// Forces a full chain rewrite on every commit instead of stopping
    /// early once the superindex write didn't require a new area. Used by
    /// tests that need a deterministic, fully-replicated chain on flash.
    pub fn set_testmode(&mut self, t: bool) {
        self.testmode = t;
    }

    pub fn register_rootnode(&mut self, addr: Addr) {
        self.root_node = Some(addr);
        self.rootnode_dirty = true;
    }

    pub fn get_rootnode_addr(&self) -> Option<Addr> {
        self.root_node
    }

    /// Walks the chain from the anchor, returning `Err(NotFound)` if area 0
    /// has never had an anchor written (a never-formatted device). Ported
    /// from `readSuperIndex`.
    pub fn read_super_index<Dr: Driver>(
        &mut self,
        driver: &mut Dr,
        area_mgr: &AreaManager,
    ) -> Result<SuperIndex> {
        const ANCHOR_AREA: AreaPos = 0;
        let (anchor_page, anchor_serial) =
            find_latest_entry(&self.params, area_mgr, driver, ANCHOR_AREA)?.ok_or(PaffsError::NotFound)?;
        let mut page_buf = vec![0u8; self.params.data_bytes_per_page() as usize];
        driver.read_page(phys_page_abs(area_mgr, ANCHOR_AREA, anchor_page), &mut page_buf)?;
        let anchor = deserialize_anchor(&page_buf)?;
        if anchor.fs_version != FS_VERSION || anchor.params != self.params {
            return Err(PaffsError::Bug);
        }
        self.link_areas[0] = ANCHOR_AREA;
        self.link_serials[0] = anchor_serial;

        let mut reverted = Vec::new();
        let mut cur_area = anchor.jump_pad_area;
        let jump_pad_no = self.params.jump_pad_no as usize;
        for link in 1..=jump_pad_no {
            let (page, serial) =
                find_latest_entry(&self.params, area_mgr, driver, cur_area)?.ok_or(PaffsError::Bug)?;
            driver.read_page(phys_page_abs(area_mgr, cur_area, page), &mut page_buf)?;
            let jp = deserialize_jump_pad(&page_buf)?;
            self.link_areas[link] = cur_area;
            self.link_serials[link] = serial;
            if jp.log_prev != 0 {
                reverted.push(jp.log_prev);
            }
            cur_area = jp.next_area;
        }

        let (page, serial) =
            find_latest_entry(&self.params, area_mgr, driver, cur_area)?.ok_or(PaffsError::Bug)?;
        let bytes_needed = self.super_index_bytes();
        let page_size = self.params.data_bytes_per_page() as usize;
        let pages_needed = (bytes_needed + page_size - 1) / page_size;
        let mut payload = Vec::with_capacity(bytes_needed);
        for i in 0..pages_needed as u32 {
            driver.read_page(phys_page_abs(area_mgr, cur_area, page + i), &mut page_buf)?;
            payload.extend_from_slice(&page_buf);
        }
        let mut index = deserialize_super_index(&payload, &self.params, serial)?;
        self.link_areas[jump_pad_no + 1] = cur_area;
        self.link_serials[jump_pad_no + 1] = serial;
        if index.log_prev != 0 {
            reverted.push(index.log_prev);
        }

        for area in reverted {
            if let Some(a) = index.area_map.get_mut(area as usize) {
                a.status = AreaStatus::Empty;
            }
        }

        if index.area_map.first().map(|a| a.ty) != Some(AreaType::Superblock) {
            return Err(PaffsError::Bug);
        }
        trace!("superindex mounted at serial {}", index.serial);
        self.root_node = index.root_node;
        index.root_node = self.root_node;
        Ok(index)
    }

    fn super_index_bytes(&self) -> usize {
        let summary_bytes = (self.params.data_pages_per_area() as usize * 2 + 7) / 8;
        20 + self.params.areas_no() as usize * 10 + 2 * summary_bytes
    }

    /// Writes `index` (minus `root_node`, taken from [`Self::register_rootnode`])
    /// down to the anchor, stopping as soon as a link didn't need to move to
    /// a new area — unless [`Self::set_testmode`] forces the full chain.
    /// Ported from `commitSuperIndex`.
    pub fn commit_super_index<Dr: Driver>(
        &mut self,
        driver: &mut Dr,
        area_mgr: &mut AreaManager,
        mut index: SuperIndex,
    ) -> Result<()> {
        index.root_node = self.root_node;
        let jump_pad_no = self.params.jump_pad_no as usize;
        let si_link = jump_pad_no + 1;
        let si_area = self.link_areas[si_link];
        let si_serial = self.link_serials[si_link].wrapping_add(1);
        let payload = serialize_super_index(&index, &self.params);
        let page_size = self.params.data_bytes_per_page() as usize;
        let pages_needed = (payload.len() + page_size - 1) / page_size;

        let (target_area, moved) =
            match find_free_run(&self.params, area_mgr, driver, si_area, pages_needed as u32)? {
                Some(offs) => {
                    self.write_super_index_pages(driver, area_mgr, si_area, offs, si_serial, &payload, page_size)?;
                    (si_area, false)
                }
                None => {
                    let new_area = find_best_next_free_area(area_mgr, &self.params, si_area)?;
                    self.write_super_index_pages(driver, area_mgr, new_area, 0, si_serial, &payload, page_size)?;
                    self.link_areas[si_link] = new_area;
                    (new_area, true)
                }
            };
        self.link_serials[si_link] = si_serial;
        debug!("committed superindex at area {target_area}, serial {si_serial}, moved={moved}");

        if !moved && !self.testmode {
            self.rootnode_dirty = false;
            return Ok(());
        }

        // The superindex relocated (or testmode forces it): rewrite every
        // chain link above it so `logPrev` records the move, bottom to top.
        let mut child_moved = moved;
        let mut child_log_prev = if moved { si_area } else { 0 };
        for link in (1..=jump_pad_no).rev() {
            let area = self.link_areas[link];
            let serial = self.link_serials[link].wrapping_add(1);
            let entry = JumpPadEntry {
                serial,
                log_prev: child_log_prev,
                next_area: self.link_areas[link + 1],
            };
            let buf = serialize_jump_pad(&entry);
            let (area, moved_this) = match find_free_run(&self.params, area_mgr, driver, area, 1)? {
                Some(offs) => {
                    self.write_small(driver, area_mgr, area, offs, &buf)?;
                    (area, false)
                }
                None => {
                    let new_area = find_best_next_free_area(area_mgr, &self.params, area)?;
                    self.write_small(driver, area_mgr, new_area, 0, &buf)?;
                    self.link_areas[link] = new_area;
                    (new_area, true)
                }
            };
            self.link_serials[link] = serial;
            child_moved = self.testmode || moved_this;
            child_log_prev = if moved_this { area } else { 0 };
            if !child_moved && !self.testmode {
                self.rootnode_dirty = false;
                return Ok(());
            }
        }

        let anchor = AnchorEntry {
            serial: self.link_serials[0].wrapping_add(1),
            jump_pad_area: self.link_areas[1],
            params: self.params,
            fs_version: FS_VERSION,
        };
        let buf = serialize_anchor(&anchor);
        let offs = find_free_run(&self.params, area_mgr, driver, 0, 1)?.unwrap_or(0);
        self.write_small(driver, area_mgr, 0, offs, &buf)?;
        self.link_serials[0] = anchor.serial;
        self.rootnode_dirty = false;
        Ok(())
    }

    fn write_small<Dr: Driver>(
        &self,
        driver: &mut Dr,
        area_mgr: &AreaManager,
        area: AreaPos,
        offs: PageOffs,
        payload: &[u8],
    ) -> Result<()> {
        let page_size = self.params.data_bytes_per_page() as usize;
        let mut buf = vec![0xFFu8; page_size];
        buf[..payload.len()].copy_from_slice(payload);
        driver.write_page(phys_page_abs(area_mgr, area, offs), &buf)
    }

    fn write_super_index_pages<Dr: Driver>(
        &self,
        driver: &mut Dr,
        area_mgr: &AreaManager,
        area: AreaPos,
        offs: PageOffs,
        serial: u32,
        payload: &[u8],
        page_size: usize,
    ) -> Result<()> {
        let serial_bytes = serial.to_le_bytes();
        for (i, chunk) in payload.chunks(page_size).enumerate() {
            let mut buf = vec![0xFFu8; page_size];
            buf[..chunk.len()].copy_from_slice(chunk);
            buf[0..4].copy_from_slice(&serial_bytes);
            driver.write_page(phys_page_abs(area_mgr, area, offs + i as u32), &buf)?;
        }
        Ok(())
    }

    /// Whether the rootnode has changed since the last committed superindex.
    pub fn is_rootnode_dirty(&self) -> bool {
        self.rootnode_dirty
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ParamsBuilder;
    use crate::driver::simu::SimDriver;

    fn params() -> Params {
        ParamsBuilder::new()
            .data_bytes_per_page(128)
            .oob_bytes_per_page(8)
            .pages_per_block(8)
            .blocks_total(32)
            .blocks_per_area(4)
            .jump_pad_no(1)
            .build()
            .unwrap()
    }

    fn formatted_area_mgr(p: Params, drv: &mut SimDriver) -> AreaManager {
        let mut mgr = AreaManager::new(p);
        for a in 0..p.areas_no() {
            mgr.delete_area_contents(drv, a).unwrap();
        }
        for a in 0..p.super_chain_elems() {
            mgr.set_type(a, AreaType::Superblock);
            mgr.set_status(a, AreaStatus::Empty);
        }
        mgr
    }

    fn sample_index(p: Params, area_mgr: &AreaManager) -> SuperIndex {
        SuperIndex {
            serial: 0,
            log_prev: 0,
            root_node: None,
            used_areas: area_mgr.used_areas(),
            area_map: area_mgr.map().to_vec(),
            as_positions: [None, None],
            area_summaries: [
                vec![SummaryEntry::Free; p.data_pages_per_area() as usize],
                vec![SummaryEntry::Free; p.data_pages_per_area() as usize],
            ],
        }
    }

    #[test]
    fn commit_then_read_round_trips_root_node() {
        let p = params();
        let mut drv = SimDriver::new(p, 16384);
        let mut area_mgr = formatted_area_mgr(p, &mut drv);
        let mut sb = Superblock::new(p);

        // Seed the chain: anchor + one jump pad, both at their home areas.
        let anchor = AnchorEntry { serial: 0, jump_pad_area: 1, params: p, fs_version: FS_VERSION };
        sb.write_small(&mut drv, &area_mgr, 0, 0, &serialize_anchor(&anchor)).unwrap();
        let jp = JumpPadEntry { serial: 0, log_prev: 0, next_area: 2 };
        sb.write_small(&mut drv, &area_mgr, 1, 0, &serialize_jump_pad(&jp)).unwrap();
        sb.link_areas = vec![0, 1, 2];
        sb.link_serials = vec![0, 0, SERIAL_EMPTY];

        let rootnode = Addr::combine(5, 3);
        sb.register_rootnode(rootnode);
        let index = sample_index(p, &area_mgr);
        sb.commit_super_index(&mut drv, &mut area_mgr, index).unwrap();

        let mut sb2 = Superblock::new(p);
        let read_back = sb2.read_super_index(&mut drv, &area_mgr).unwrap();
        assert_eq!(read_back.root_node, Some(rootnode));
        assert_eq!(sb2.get_rootnode_addr(), Some(rootnode));
    }

    #[test]
    fn testmode_rewrites_the_whole_chain_every_commit() {
        let p = params();
        let mut drv = SimDriver::new(p, 16384);
        let mut area_mgr = formatted_area_mgr(p, &mut drv);
        let mut sb = Superblock::new(p);
        sb.set_testmode(true);

        let anchor = AnchorEntry { serial: 0, jump_pad_area: 1, params: p, fs_version: FS_VERSION };
        sb.write_small(&mut drv, &area_mgr, 0, 0, &serialize_anchor(&anchor)).unwrap();
        let jp = JumpPadEntry { serial: 0, log_prev: 0, next_area: 2 };
        sb.write_small(&mut drv, &area_mgr, 1, 0, &serialize_jump_pad(&jp)).unwrap();
        sb.link_areas = vec![0, 1, 2];
        sb.link_serials = vec![0, 0, SERIAL_EMPTY];

        sb.register_rootnode(Addr::combine(1, 1));
        let index = sample_index(p, &area_mgr);
        sb.commit_super_index(&mut drv, &mut area_mgr, index).unwrap();
        assert_eq!(sb.link_serials[0], 1, "testmode must also rewrite the anchor");
    }
}
