//! Area summary cache (§4.C): per-page free/used/dirty tracking, kept in RAM
//! for a bounded number of areas and committed to flash on eviction.
//!
//! Ported from `original_source/src/summaryCache.hpp`. The original packs
//! two status bits per page into a raw byte array and maintains its own
//! `unordered_map<AreaPos, uint16_t>` plus a fixed-size
//! `AreaSummaryElem summaryCache[areaSummaryCacheSize]` array with a
//! hand-rolled "find next free/evict" search. We reuse [`TwoBitList`] for
//! the packed bits (same bit layout, an existing component instead of a
//! hand-rolled pack/unpack pair) and [`LruCache`] for the eviction policy
//! (same recency-based choice the original's `freeNextBestSummaryCacheEntry`
//! approximates by scanning for non-dirty, non-active entries).

use log::{debug, trace};

use crate::area::AreaManager;
use crate::bitlist::TwoBitList;
use crate::config::{AreaPos, Params, PageOffs};
use crate::driver::Driver;
use crate::error::{PaffsError, Result};
use crate::lru::LruCache;
use crate::types::SummaryEntry;

const MAX_DATA_PAGES_PER_AREA: usize = 4096;

/// Non-`0xFF` marker byte identifying a written area summary on flash (§6).
/// `0xFF` is what an erased, never-written area reads back as.
const OOB_SUMMARY_MARKER: u8 = 0xAA;

/// Packs `summary` into the on-flash OOB format: one marker byte followed by
/// `ceil(data_pages / 8)` bytes, bit `i` of byte `i / 8` clear iff page `i`
/// is `dirty`. `used` and `free` pages both read back as a set bit; telling
/// them apart on load means inspecting the referenced data page itself (see
/// [`unpack_oob_summary`]'s `complete` counterpart in
/// [`SummaryCache::load_area_summary`]).
fn pack_oob_summary(summary: &[SummaryEntry], data_pages: u32) -> Vec<u8> {
    let byte_len = (data_pages as usize + 7) / 8;
    let mut bytes = vec![0xFFu8; byte_len];
    for (i, s) in summary.iter().enumerate().take(data_pages as usize) {
        if *s == SummaryEntry::Dirty {
            bytes[i / 8] &= !(1 << (i % 8));
        }
    }
    let mut buf = Vec::with_capacity(1 + byte_len);
    buf.push(OOB_SUMMARY_MARKER);
    buf.extend_from_slice(&bytes);
    buf
}

/// Unpacks the marker + bitset written by [`pack_oob_summary`], returning
/// `None` for an area whose summary was never written (marker byte still
/// `0xFF`). Each `true` entry means "dirty"; everything else still needs the
/// used/free distinction resolved by reading the underlying data page.
fn unpack_oob_summary(buf: &[u8], data_pages: u32) -> Option<Vec<bool>> {
    let byte_len = (data_pages as usize + 7) / 8;
    if buf.len() < 1 + byte_len || buf[0] == 0xFF {
        return None;
    }
    Some(
        (0..data_pages as usize)
            .map(|i| (buf[1 + i / 8] >> (i % 8)) & 1 == 0)
            .collect(),
    )
}

fn encode(e: SummaryEntry) -> u8 {
    match e {
        SummaryEntry::Free => 0,
        SummaryEntry::Used => 1,
        SummaryEntry::Dirty => 2,
        SummaryEntry::Error => 3,
    }
}

fn decode(v: u8) -> SummaryEntry {
    match v {
        0 => SummaryEntry::Free,
        1 => SummaryEntry::Used,
        2 => SummaryEntry::Dirty,
        _ => SummaryEntry::Error,
    }
}

/// The in-RAM per-page status vector for one area, plus its bookkeeping
/// flags. Ported from `summaryCache.hpp`'s `AreaSummaryElem`.
#[derive(Clone)]
pub struct AreaSummaryElem {
    bits: TwoBitList<MAX_DATA_PAGES_PER_AREA>,
    dirty: bool,
    as_written: bool,
    loaded_from_super_page: bool,
}

impl AreaSummaryElem {
    fn new() -> Self {
        Self {
            bits: TwoBitList::new(),
            dirty: false,
            as_written: false,
            loaded_from_super_page: false,
        }
    }

    pub fn get_status(&self, page: PageOffs) -> SummaryEntry {
        decode(self.bits.get_value(page as usize))
    }

    pub fn set_status(&mut self, page: PageOffs, value: SummaryEntry) {
        self.bits.set_value(page as usize, encode(value));
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn set_dirty(&mut self, dirty: bool) {
        self.dirty = dirty;
    }

    pub fn is_as_written(&self) -> bool {
        self.as_written
    }

    pub fn set_as_written(&mut self, written: bool) {
        self.as_written = written;
    }

    pub fn is_loaded_from_super_page(&self) -> bool {
        self.loaded_from_super_page
    }

    pub fn set_loaded_from_super_page(&mut self, loaded: bool) {
        self.loaded_from_super_page = loaded;
    }

    fn count(&self, data_pages_per_area: u32, want: SummaryEntry) -> PageOffs {
        (0..data_pages_per_area)
            .filter(|&p| self.get_status(p) == want)
            .count() as PageOffs
    }

    pub fn count_dirty_pages(&self, data_pages_per_area: u32) -> PageOffs {
        self.count(data_pages_per_area, SummaryEntry::Dirty)
    }

    pub fn count_used_pages(&self, data_pages_per_area: u32) -> PageOffs {
        self.count(data_pages_per_area, SummaryEntry::Used)
    }

    pub fn count_unused_pages(&self, data_pages_per_area: u32) -> PageOffs {
        self.count(data_pages_per_area, SummaryEntry::Free)
    }
}

/// The bounded-size RAM cache of area summaries.
pub struct SummaryCache {
    cache: LruCache<AreaPos, AreaSummaryElem, { SummaryCache::CAPACITY }>,
    params: Params,
}

impl SummaryCache {
    /// Mirrors the original's `areaSummaryCacheSize`: enough areas resident
    /// at once to cover the active area of every `AreaType` plus headroom
    /// for garbage collection's source/destination pair.
    pub const CAPACITY: usize = 8;

    pub fn new(params: Params) -> Self {
        Self {
            cache: LruCache::new(),
            params,
        }
    }

    /// Whether `area`'s summary is currently resident in RAM.
    pub fn is_cached(&self, area: AreaPos) -> bool {
        self.cache.peek(&area).is_some()
    }

    /// Whether `area`'s summary was committed to flash since it was last
    /// loaded (garbage collection prefers these areas, they cost nothing
    /// extra to evict).
    pub fn was_as_written(&self, area: AreaPos) -> bool {
        self.cache.peek(&area).map(|e| e.is_as_written()).unwrap_or(false)
    }

    pub fn reset_as_written(&mut self, area: AreaPos) {
        if let Some(e) = self.cache.get(area) {
            e.set_as_written(false);
        }
    }

    /// Ensures `area` has a resident, zeroed summary (evicting another area
    /// if the cache is full), returning a mutable reference to it.
    ///
    /// Mirrors §4.C's eviction contract's first branch only: a clean
    /// (not-dirty) resident entry is reclaimed first. A dirty entry is
    /// never silently dropped here — this call has no driver to commit one
    /// to OOB, so if every resident entry is dirty the cache simply grows
    /// past [`Self::CAPACITY`] rather than discarding unpersisted page
    /// state. [`Device`](crate::device::Device) keeps the steady-state count
    /// of dirty entries low by committing areas on close and on unmount, so
    /// this soft overflow is a safety margin, not the common case.
    fn entry(&mut self, area: AreaPos) -> &mut AreaSummaryElem {
        let new = AreaSummaryElem::new();
        let params = self.params;
        let (slot, evicted) = self
            .cache
            .get_or_insert_with_evicting(
                area,
                |e: &AreaSummaryElem| !e.is_dirty(),
                || -> Result<AreaSummaryElem> {
                    debug!("loading area summary for area {area}");
                    let _ = params;
                    Ok(new)
                },
            )
            .expect("infallible insert closure");
        if let Some((evicted_area, _)) = evicted {
            trace!("evicted clean area summary for area {evicted_area} to make room for area {area}");
        }
        slot
    }

    /// Sets the status of one page, loading the area's summary into the
    /// cache first if necessary.
    pub fn set_page_status(&mut self, area: AreaPos, page: PageOffs, state: SummaryEntry) -> Result<()> {
        let e = self.entry(area);
        e.set_status(page, state);
        e.set_dirty(true);
        Ok(())
    }

    /// Reads the status of one page, loading the area's summary into the
    /// cache first if necessary.
    pub fn get_page_status(&mut self, area: AreaPos, page: PageOffs) -> Result<SummaryEntry> {
        Ok(self.entry(area).get_status(page))
    }

    /// Bulk-replaces an area's whole summary (used when loading a
    /// previously-committed area summary from flash).
    pub fn set_summary_status(&mut self, area: AreaPos, summary: &[SummaryEntry]) -> Result<()> {
        let e = self.entry(area);
        for (p, s) in summary.iter().enumerate() {
            e.set_status(p as PageOffs, *s);
        }
        e.set_loaded_from_super_page(true);
        Ok(())
    }

    /// Reads out an area's whole summary.
    pub fn get_summary_status(&mut self, area: AreaPos) -> Result<Vec<SummaryEntry>> {
        let data_pages = self.params.data_pages_per_area();
        let e = self.entry(area);
        Ok((0..data_pages).map(|p| e.get_status(p)).collect())
    }

    /// Drops a retired or otherwise unused area's summary from the cache
    /// without committing it.
    pub fn delete_summary(&mut self, area: AreaPos) -> Result<()> {
        self.cache.remove(&area);
        Ok(())
    }

    /// Counts dirty pages in `area`, loading its summary first if needed.
    pub fn count_dirty_pages(&mut self, area: AreaPos) -> Result<PageOffs> {
        let data_pages = self.params.data_pages_per_area();
        Ok(self.entry(area).count_dirty_pages(data_pages))
    }

    /// Evicts every non-dirty resident summary, the bounded equivalent of
    /// the original's `freeNextBestSummaryCacheEntry` sweep. Dirty entries
    /// are left for an explicit commit.
    pub fn evict_clean(&mut self) {
        trace!("evicting clean area summaries");
        self.cache.retain(|_, e| e.is_dirty());
    }

    /// Writes `area`'s cached summary to its OOB region (§6's packed
    /// format), spread across `oob_pages_per_area` pages the same way
    /// [`AreaManager::summary_page_abs`] lays them out, and marks it
    /// as-written. Called by the device orchestrator and by garbage
    /// collection when an area closes or is evicted from the cache; never
    /// from a hot-path per-page call.
    pub fn commit_area_summary<Dr: Driver>(
        &mut self,
        area: AreaPos,
        driver: &mut Dr,
        area_mgr: &AreaManager,
    ) -> Result<()> {
        let data_pages = self.params.data_pages_per_area();
        let page_bytes = self.params.data_bytes_per_page() as usize;
        let oob_pages = self.params.oob_pages_per_area();
        let summary = self.get_summary_status(area)?;
        let packed = pack_oob_summary(&summary, data_pages);

        for p in 0..oob_pages {
            let start = p as usize * page_bytes;
            if start >= packed.len() {
                break;
            }
            let end = (start + page_bytes).min(packed.len());
            let mut buf = vec![0xFFu8; page_bytes];
            buf[..end - start].copy_from_slice(&packed[start..end]);
            let abs = area_mgr.summary_page_abs(area, p);
            driver.write_page(abs, &buf)?;
        }
        if let Some(e) = self.cache.get(area) {
            e.set_dirty(false);
            e.set_as_written(true);
        }
        Ok(())
    }

    /// Reads `area`'s packed OOB summary back into the cache, returning
    /// `false` without touching the cache if the area's summary was never
    /// written (a freshly erased area). In `complete` mode, every page the
    /// packed bits leave ambiguous between `free` and `used` is resolved by
    /// reading the data page itself and checking for the all-`0xFF` erased
    /// pattern; otherwise such pages are optimistically reported `used`.
    pub fn load_area_summary<Dr: Driver>(
        &mut self,
        area: AreaPos,
        driver: &mut Dr,
        area_mgr: &AreaManager,
        complete: bool,
    ) -> Result<bool> {
        let data_pages = self.params.data_pages_per_area();
        let page_bytes = self.params.data_bytes_per_page() as usize;
        let oob_pages = self.params.oob_pages_per_area();
        let needed = 1 + (data_pages as usize + 7) / 8;

        let mut packed = Vec::with_capacity(oob_pages as usize * page_bytes);
        for p in 0..oob_pages {
            if packed.len() >= needed {
                break;
            }
            let mut buf = vec![0u8; page_bytes];
            let abs = area_mgr.summary_page_abs(area, p);
            match driver.read_page(abs, &mut buf) {
                Ok(()) | Err(PaffsError::BiterrorCorrected) => {}
                Err(e) => return Err(e),
            }
            packed.extend_from_slice(&buf);
        }

        let Some(dirty) = unpack_oob_summary(&packed, data_pages) else {
            debug!("area {area} has no written summary, treating as empty");
            return Ok(false);
        };

        let mut entries = Vec::with_capacity(data_pages as usize);
        for (page, is_dirty) in dirty.into_iter().enumerate() {
            if is_dirty {
                entries.push(SummaryEntry::Dirty);
                continue;
            }
            if complete {
                let abs = area_mgr.data_page_abs(area, page as u32);
                let mut page_buf = vec![0u8; page_bytes];
                match driver.read_page(abs, &mut page_buf) {
                    Ok(()) | Err(PaffsError::BiterrorCorrected) => {}
                    Err(e) => return Err(e),
                }
                if page_buf.iter().all(|b| *b == 0xFF) {
                    entries.push(SummaryEntry::Free);
                } else {
                    entries.push(SummaryEntry::Used);
                }
            } else {
                entries.push(SummaryEntry::Used);
            }
        }
        self.set_summary_status(area, &entries)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ParamsBuilder;

    fn params() -> Params {
        ParamsBuilder::new()
            .data_bytes_per_page(64)
            .oob_bytes_per_page(8)
            .pages_per_block(4)
            .blocks_total(16)
            .blocks_per_area(2)
            .build()
            .unwrap()
    }

    #[test]
    fn set_then_get_page_status_round_trips() {
        let mut sc = SummaryCache::new(params());
        sc.set_page_status(0, 3, SummaryEntry::Used).unwrap();
        assert_eq!(sc.get_page_status(0, 3).unwrap(), SummaryEntry::Used);
        assert_eq!(sc.get_page_status(0, 4).unwrap(), SummaryEntry::Free);
    }

    #[test]
    fn count_dirty_pages_reflects_sets() {
        let mut sc = SummaryCache::new(params());
        sc.set_page_status(1, 0, SummaryEntry::Dirty).unwrap();
        sc.set_page_status(1, 1, SummaryEntry::Dirty).unwrap();
        assert_eq!(sc.count_dirty_pages(1).unwrap(), 2);
    }

    #[test]
    fn evict_clean_keeps_dirty_entries() {
        let mut sc = SummaryCache::new(params());
        sc.set_page_status(2, 0, SummaryEntry::Used).unwrap();
        sc.evict_clean();
        assert!(!sc.is_cached(2));
    }

    #[test]
    fn commit_and_load_area_summary_round_trips() {
        use crate::area::AreaManager;
        use crate::driver::simu::SimDriver;

        let p = params();
        let mut area_mgr = AreaManager::new(p);
        for a in 0..p.areas_no() {
            area_mgr.set_pos(a, a);
        }
        let mut drv = SimDriver::new(p, 256);
        for a in 0..p.areas_no() {
            area_mgr.delete_area_contents(&mut drv, a).unwrap();
        }

        let mut sc = SummaryCache::new(p);
        sc.set_page_status(0, 0, SummaryEntry::Used).unwrap();
        sc.set_page_status(0, 1, SummaryEntry::Dirty).unwrap();
        sc.commit_area_summary(0, &mut drv, &area_mgr).unwrap();
        assert!(sc.was_as_written(0));

        let mut reloaded = SummaryCache::new(p);
        let found = reloaded.load_area_summary(0, &mut drv, &area_mgr, false).unwrap();
        assert!(found);
        assert_eq!(reloaded.get_page_status(0, 0).unwrap(), SummaryEntry::Used);
        assert_eq!(reloaded.get_page_status(0, 1).unwrap(), SummaryEntry::Dirty);
    }

    #[test]
    fn dirty_entry_survives_cache_pressure_instead_of_being_silently_dropped() {
        let mut sc = SummaryCache::new(params());
        sc.set_page_status(0, 0, SummaryEntry::Used).unwrap();
        assert!(sc.entry(0).is_dirty());

        // Touch more distinct areas than CAPACITY. Every one of them is left
        // dirty too (set_page_status always dirties its slot), so none is a
        // legal eviction victim and area 0's data must not be discarded.
        for a in 1..(SummaryCache::CAPACITY as AreaPos + 4) {
            sc.set_page_status(a, 0, SummaryEntry::Used).unwrap();
        }

        assert_eq!(sc.get_page_status(0, 0).unwrap(), SummaryEntry::Used);
    }

    #[test]
    fn clean_entry_is_evicted_before_any_dirty_one() {
        let mut sc = SummaryCache::new(params());
        // Area 0 is loaded (via set_summary_status, which does not mark
        // dirty) and never touched again, so it is both LRU and clean.
        sc.set_summary_status(0, &vec![SummaryEntry::Free; 4]).unwrap();
        for a in 1..SummaryCache::CAPACITY as AreaPos {
            sc.set_page_status(a, 0, SummaryEntry::Used).unwrap();
        }
        assert!(sc.is_cached(0));

        // One more distinct area: area 0 (clean) is the correct victim, not
        // whichever dirty area happens to be least recently used.
        sc.set_page_status(SummaryCache::CAPACITY as AreaPos, 0, SummaryEntry::Used)
            .unwrap();
        assert!(!sc.is_cached(0));
        for a in 1..SummaryCache::CAPACITY as AreaPos {
            assert!(sc.is_cached(a), "dirty area {a} must not have been evicted");
        }
    }

    #[test]
    fn load_area_summary_reports_unwritten_area() {
        use crate::area::AreaManager;
        use crate::driver::simu::SimDriver;

        let p = params();
        let mut area_mgr = AreaManager::new(p);
        for a in 0..p.areas_no() {
            area_mgr.set_pos(a, a);
        }
        let mut drv = SimDriver::new(p, 256);
        for a in 0..p.areas_no() {
            area_mgr.delete_area_contents(&mut drv, a).unwrap();
        }
        let mut sc = SummaryCache::new(p);
        assert!(!sc.load_area_summary(0, &mut drv, &area_mgr, false).unwrap());
    }
}
