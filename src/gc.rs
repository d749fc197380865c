//! Garbage collector (§4.D).
//!
//! Ported from `original_source/src/garbage_collection.hpp`. The original
//! holds a `Device*` and calls back into the tree/summary cache/area map
//! through it; here `collect_garbage` takes exactly the collaborators it
//! needs as arguments, avoiding the back-pointer. The key invariant carried
//! over unchanged: a logical area's *address space* never moves, only its
//! physical backing does — valid pages are copied into the dedicated GC
//! buffer area and then [`AreaManager::swap_area_position`] exchanges which
//! physical area each logical number points to, so every `Addr` still
//! pointing at the source logical area stays valid without being rewritten.

use log::{info, trace};

use crate::area::AreaManager;
use crate::config::{AreaPos, Params, PageOffs};
use crate::driver::Driver;
use crate::error::{PaffsError, Result};
use crate::summary_cache::SummaryCache;
use crate::types::{AreaStatus, AreaType, SummaryEntry};

/// Stateless collector: all mutable state it touches belongs to the
/// [`AreaManager`] and [`SummaryCache`] passed into each call.
pub struct GarbageCollector {
    params: Params,
}

impl GarbageCollector {
    pub fn new(params: Params) -> Self {
        Self { params }
    }

    /// Counts dirty pages in `summary`.
    pub fn count_dirty_pages(&self, summary: &[SummaryEntry]) -> PageOffs {
        summary.iter().filter(|s| **s == SummaryEntry::Dirty).count() as PageOffs
    }

    /// Picks the best collection victim: the closed area of `target` (or,
    /// if `target` is `None`, of any data-bearing type) with the most
    /// dirty pages, favouring areas whose summary is already cached or
    /// already committed to flash (no extra I/O to reclaim those).
    pub fn find_next_best_area(
        &self,
        area_mgr: &AreaManager,
        summary_cache: &mut SummaryCache,
        target: Option<AreaType>,
    ) -> Result<(AreaPos, Vec<SummaryEntry>)> {
        let mut best: Option<(AreaPos, PageOffs, bool)> = None;
        for area in 0..self.params.areas_no() {
            let ty = area_mgr.get_type(area);
            if ty == AreaType::Retired || ty == AreaType::Unset {
                continue;
            }
            if let Some(t) = target {
                if ty != t {
                    continue;
                }
            }
            if area_mgr.get_status(area) != AreaStatus::Closed {
                continue;
            }
            let dirty = summary_cache.count_dirty_pages(area)?;
            let favoured = summary_cache.is_cached(area) || summary_cache.was_as_written(area);
            let better = match &best {
                None => true,
                Some((_, best_dirty, best_favoured)) => {
                    (favoured && !best_favoured) || (favoured == *best_favoured && dirty > *best_dirty)
                }
            };
            if better {
                best = Some((area, dirty, favoured));
            }
        }
        let (area, _, _) = best.ok_or(PaffsError::NoSpace)?;
        let summary = summary_cache.get_summary_status(area)?;
        Ok((area, summary))
    }

    /// Copies every still-used page of `src` into `dst` (typically the
    /// dedicated GC buffer area), marks the source pages dirty, then swaps
    /// the two logical areas' physical backing so `src`'s address space now
    /// resolves to the freshly compacted data.
    pub fn move_valid_data_to_new_area<Dr: Driver>(
        &self,
        driver: &mut Dr,
        area_mgr: &mut AreaManager,
        summary_cache: &mut SummaryCache,
        src: AreaPos,
        dst: AreaPos,
        summary: &[SummaryEntry],
    ) -> Result<()> {
        trace!("moving valid data from area {src} to {dst}");
        let page_bytes = self.params.total_bytes_per_page() as usize;
        let mut buf = vec![0u8; page_bytes];
        for (page, status) in summary.iter().enumerate() {
            if *status != SummaryEntry::Used {
                continue;
            }
            let page = page as u32;
            let src_abs = area_mgr.data_page_abs(src, page);
            let dst_abs = area_mgr.data_page_abs(dst, page);
            driver.read_page(src_abs, &mut buf)?;
            driver.write_page(dst_abs, &buf)?;
            summary_cache.set_page_status(dst, page, SummaryEntry::Used)?;
            summary_cache.set_page_status(src, page, SummaryEntry::Dirty)?;
        }
        area_mgr.swap_area_position(src, dst);
        Ok(())
    }

    /// Frees one area of `target` type (or, if `None`, whichever area is
    /// cheapest to reclaim overall), using the always-empty
    /// [`AreaType::GarbageBuffer`] area as the scratch destination.
    pub fn collect_garbage<Dr: Driver>(
        &self,
        driver: &mut Dr,
        area_mgr: &mut AreaManager,
        summary_cache: &mut SummaryCache,
        target: Option<AreaType>,
    ) -> Result<AreaPos> {
        let gc_buffer = (0..self.params.areas_no())
            .find(|&a| area_mgr.get_type(a) == AreaType::GarbageBuffer)
            .ok_or(PaffsError::Bug)?;

        let (victim, summary) = self.find_next_best_area(area_mgr, summary_cache, target)?;
        info!("garbage collecting area {victim} into buffer {gc_buffer}");

        self.move_valid_data_to_new_area(driver, area_mgr, summary_cache, victim, gc_buffer, &summary)?;
        summary_cache.delete_summary(victim)?;

        // `victim`'s logical number now points at the freshly-compacted
        // physical area; its old (now stale, fully dirty) physical backing
        // lives under `gc_buffer`'s logical number and must be erased
        // before anything can write to it again.
        area_mgr.delete_area_contents(driver, gc_buffer)?;
        area_mgr.set_type(gc_buffer, AreaType::GarbageBuffer);
        area_mgr.set_status(victim, AreaStatus::Empty);
        if let Some(t) = target {
            area_mgr.set_type(victim, t);
        }
        Ok(victim)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ParamsBuilder;
    use crate::driver::simu::SimDriver;

    fn params() -> Params {
        ParamsBuilder::new()
            .data_bytes_per_page(64)
            .oob_bytes_per_page(8)
            .pages_per_block(4)
            .blocks_total(24)
            .blocks_per_area(2)
            .build()
            .unwrap()
    }

    #[test]
    fn collect_garbage_reclaims_fully_dirty_area() {
        let p = params();
        let mut area_mgr = AreaManager::new(p);
        let mut summary_cache = SummaryCache::new(p);
        let mut drv = SimDriver::new(p, 256);
        let gc = GarbageCollector::new(p);

        for area in 0..p.areas_no() {
            area_mgr.set_pos(area, area);
        }
        area_mgr.set_type(0, AreaType::Data);
        area_mgr.set_status(0, AreaStatus::Closed);
        area_mgr.set_type(1, AreaType::GarbageBuffer);
        area_mgr.set_status(1, AreaStatus::Empty);
        area_mgr.delete_area_contents(&mut drv, 0).unwrap();
        area_mgr.delete_area_contents(&mut drv, 1).unwrap();
        area_mgr.set_status(0, AreaStatus::Closed);

        summary_cache
            .set_page_status(0, 0, SummaryEntry::Dirty)
            .unwrap();

        let victim = gc
            .collect_garbage(&mut drv, &mut area_mgr, &mut summary_cache, Some(AreaType::Data))
            .unwrap();
        assert_eq!(victim, 0);
        assert_eq!(area_mgr.get_status(0), AreaStatus::Empty);
    }
}
