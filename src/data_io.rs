//! Data I/O (§4.H): turns inode-relative byte ranges into page reads/writes
//! through the page address cache.
//!
//! Ported from `original_source/src/dataIO.{hpp,cpp}`'s `DataIO`. The
//! original's journal-integrated `writePageData`/`readPageData` pair is kept
//! as the same read-modify-write-on-partial-page shape, including its
//! `PageStateMachine` crash-recovery bookkeeping: `write_inode_data` tracks
//! every page it replaces through [`PageStateMachine`] (`Topic::DataIo`) so a
//! crash mid-write reverts cleanly, exactly like the original's
//! `writePageData`. [`crate::device::Device::mount`] replays this topic's
//! sequence before clearing the journal.

use log::trace;

use crate::area::AreaManager;
use crate::btree::BTree;
use crate::config::{FileSize, Params};
use crate::driver::Driver;
use crate::error::{PaffsError, Result};
use crate::journal::{Journal, JournalEntry, PageStateMachine, RecoveredPosition, Topic};
use crate::pac::{PageAddressCache, PageNo};
use crate::summary_cache::SummaryCache;
use crate::tree_cache::TreeCache;
use crate::types::{AreaType, Inode, SummaryEntry};

/// Upper bound on how many pages one `write_inode_data`/`delete_inode_data`
/// call tracks through the journal at once before forcing an intermediate
/// `Success`/`InvalidateOldPages` checkpoint. Mirrors the original's
/// `journalPageStatemachine`'s fixed `maxPages` sizing, chosen generously
/// above what a single page-sized I/O call plausibly touches.
pub const DATA_IO_PSM_PAGES: usize = 64;

/// Owns the per-inode page address cache and implements the byte-range
/// read/write/truncate operations above it.
pub struct DataIo {
    pac: PageAddressCache,
    params: Params,
    psm: PageStateMachine<DATA_IO_PSM_PAGES>,
}

impl DataIo {
    pub fn new(params: Params) -> Self {
        Self {
            pac: PageAddressCache::new(params),
            params,
            psm: PageStateMachine::new(Topic::DataIo),
        }
    }

    /// Feeds one journal entry recovered at mount time into this topic's
    /// replay state. Entries belonging to another topic are ignored.
    pub fn replay_journal_entry(&mut self, entry: &JournalEntry) -> Result<()> {
        self.psm.process_entry(entry)
    }

    /// Finalizes replay once every recovered entry has been fed through
    /// [`DataIo::replay_journal_entry`], reverting or rolling forward
    /// whichever write was in flight at crash time. See
    /// [`PageStateMachine::signal_end_of_log`].
    pub fn finish_journal_replay(
        &mut self,
        summary_cache: &mut SummaryCache,
    ) -> Result<(bool, Vec<RecoveredPosition>)> {
        self.psm.signal_end_of_log(summary_cache)
    }

    /// Closes out the in-flight page-state-machine sequence, if any,
    /// marking every page it replaced since the last checkpoint durable.
    /// Called once a `write_inode_data`/`delete_inode_data` call has placed
    /// every one of its pages.
    fn checkpoint_psm<Dr: Driver>(
        &mut self,
        journal: &mut Journal,
        summary_cache: &mut SummaryCache,
        driver: &mut Dr,
    ) -> Result<()> {
        journal.append(JournalEntry::Success(Topic::DataIo), driver)?;
        self.psm.invalidate_old_pages(journal, summary_cache, driver)
    }

    fn page_size(&self) -> usize {
        self.params.data_bytes_per_page() as usize
    }

    fn page_range(&self, offs: FileSize, bytes: FileSize) -> (PageNo, PageNo) {
        let page_size = self.page_size() as FileSize;
        let from = offs / page_size;
        let to = if bytes == 0 { from } else { (offs + bytes - 1) / page_size };
        (from, to)
    }

    fn allocate_data_page<Dr: Driver>(
        &self,
        driver: &mut Dr,
        area_mgr: &mut AreaManager,
        summary_cache: &mut SummaryCache,
    ) -> Result<(u32, u32)> {
        let area = area_mgr.find_writable_area(AreaType::Data, driver, summary_cache)?;
        let used: Vec<bool> = (0..self.params.data_pages_per_area())
            .map(|p| {
                summary_cache
                    .get_page_status(area, p)
                    .map(|s| s != SummaryEntry::Free)
                    .unwrap_or(true)
            })
            .collect();
        let page = area_mgr.find_first_free_page(area, &used)?;
        Ok((area, page))
    }

    /// Writes `data` at inode-relative offset `offs`, growing `inode.size`
    /// and `inode.reserved_pages` as needed. Returns the number of bytes
    /// written (always `data.len()` barring an early error). Ported from
    /// `writeInodeData`/`writePageData`.
    pub fn write_inode_data<Dr: Driver>(
        &mut self,
        inode: &mut Inode,
        offs: FileSize,
        data: &[u8],
        tc: &mut TreeCache,
        bt: &BTree,
        driver: &mut Dr,
        area_mgr: &mut AreaManager,
        summary_cache: &mut SummaryCache,
        journal: &mut Journal,
    ) -> Result<FileSize> {
        if data.is_empty() {
            return Ok(0);
        }
        let bytes = data.len() as FileSize;
        trace!("write {bytes} bytes at offset {offs} to inode {}", inode.no);
        self.pac.set_target_inode(*inode, tc, bt, driver, area_mgr, summary_cache)?;

        let page_size = self.page_size();
        let (page_from, page_to) = self.page_range(offs, bytes);
        let mut written: FileSize = 0;

        for page_no in page_from..=page_to {
            let page_start = page_no as FileSize * page_size as FileSize;
            let page_end = page_start + page_size as FileSize;
            let write_start = offs.max(page_start);
            let write_end = (offs + bytes).min(page_end);
            let local_start = (write_start - page_start) as usize;
            let local_end = (write_end - page_start) as usize;
            let is_partial = local_start > 0 || local_end < page_size;

            let old_addr = self.pac.get_page(page_no, driver, area_mgr, summary_cache)?;
            let mut buf = vec![0xFFu8; page_size];
            if is_partial {
                // Holes (no existing page) read back as zero, not 0xFF.
                if old_addr.is_none() {
                    buf.fill(0);
                } else if let Some(addr) = old_addr {
                    let abs = area_mgr.data_page_abs(addr.extract_logical_area(), addr.extract_page_offs());
                    match driver.read_page(abs, &mut buf) {
                        Ok(()) | Err(PaffsError::BiterrorCorrected) => {}
                        Err(e) => return Err(e),
                    }
                }
            }
            let src_start = (write_start - offs) as usize;
            let src_end = (write_end - offs) as usize;
            buf[local_start..local_end].copy_from_slice(&data[src_start..src_end]);

            if self.psm.min_space_left() == 0 {
                self.checkpoint_psm(journal, summary_cache, driver)?;
            }
            let (area, page) = self.allocate_data_page(driver, area_mgr, summary_cache)?;
            let new_addr = crate::addr::Addr::combine(area, page);
            let abs_new = area_mgr.data_page_abs(area, page);
            driver.write_page(abs_new, &buf)?;
            // Tracks both the new and old page through the journal-backed
            // state machine, the same way the original's `writePageData`
            // does, so a crash here reverts cleanly on the next mount: the
            // old page stays `Used` and the new one reads back `Dirty`
            // until `checkpoint_psm` below durably commits the whole write.
            self.psm.replace_page(new_addr, old_addr, journal, summary_cache, driver)?;
            if old_addr.is_none() {
                self.pac.adjust_reserved_pages(1);
            }
            self.pac.set_page(page_no, Some(new_addr), driver, area_mgr, summary_cache)?;
            written += write_end - write_start;
        }
        self.checkpoint_psm(journal, summary_cache, driver)?;

        self.pac.grow_size_to(offs + bytes);
        self.pac.commit(tc, bt, driver, area_mgr, summary_cache)?;
        *inode = self.pac.target_inode();
        Ok(written)
    }

    /// Reads `bytes` bytes starting at inode-relative offset `offs` into
    /// `buf` (`buf.len() >= bytes as usize`). Pages with no mapping (holes)
    /// read back as zero. Ported from `readInodeData`/`readPageData`.
    pub fn read_inode_data<Dr: Driver>(
        &mut self,
        inode: &Inode,
        offs: FileSize,
        bytes: FileSize,
        buf: &mut [u8],
        tc: &mut TreeCache,
        bt: &BTree,
        driver: &mut Dr,
        area_mgr: &mut AreaManager,
        summary_cache: &mut SummaryCache,
    ) -> Result<FileSize> {
        if bytes == 0 {
            return Ok(0);
        }
        let readable = bytes.min(inode.size.saturating_sub(offs));
        if readable == 0 {
            return Ok(0);
        }
        self.pac.set_target_inode(*inode, tc, bt, driver, area_mgr, summary_cache)?;

        let page_size = self.page_size();
        let (page_from, page_to) = self.page_range(offs, readable);
        let mut read: FileSize = 0;

        for page_no in page_from..=page_to {
            let page_start = page_no as FileSize * page_size as FileSize;
            let page_end = page_start + page_size as FileSize;
            let read_start = offs.max(page_start);
            let read_end = (offs + readable).min(page_end);
            let local_start = (read_start - page_start) as usize;
            let local_end = (read_end - page_start) as usize;
            let dst_start = (read_start - offs) as usize;
            let dst_end = (read_end - offs) as usize;

            match self.pac.get_page(page_no, driver, area_mgr, summary_cache)? {
                None => buf[dst_start..dst_end].fill(0),
                Some(addr) => {
                    let abs = area_mgr.data_page_abs(addr.extract_logical_area(), addr.extract_page_offs());
                    let mut page_buf = vec![0u8; page_size];
                    match driver.read_page(abs, &mut page_buf) {
                        Ok(()) => {}
                        Err(PaffsError::BiterrorCorrected) => {
                            trace!("page {page_no} of inode {} had a corrected bit error", inode.no);
                        }
                        Err(e) => return Err(e),
                    }
                    buf[dst_start..dst_end].copy_from_slice(&page_buf[local_start..local_end]);
                }
            }
            read += read_end - read_start;
        }
        Ok(read)
    }

    /// Truncates an inode's data to `new_offs` bytes, freeing every page at
    /// or past the new tail, back to front. Leaves `inode.size` and
    /// `inode.reserved_pages` updated but does not commit the page address
    /// cache — the caller re-inserts the inode into the tree itself.
    /// Ported from `deleteInodeData`.
    pub fn delete_inode_data<Dr: Driver>(
        &mut self,
        inode: &mut Inode,
        new_offs: FileSize,
        tc: &mut TreeCache,
        bt: &BTree,
        driver: &mut Dr,
        area_mgr: &mut AreaManager,
        summary_cache: &mut SummaryCache,
    ) -> Result<()> {
        if new_offs >= inode.size {
            return Ok(());
        }
        self.pac.set_target_inode(*inode, tc, bt, driver, area_mgr, summary_cache)?;

        let page_size = self.page_size() as FileSize;
        let last_page = if inode.size == 0 { 0 } else { (inode.size - 1) / page_size };
        let first_freed_page = new_offs / page_size + if new_offs % page_size == 0 { 0 } else { 1 };

        for page_no in (first_freed_page..=last_page).rev() {
            if let Some(addr) = self.pac.get_page(page_no, driver, area_mgr, summary_cache)? {
                summary_cache.set_page_status(addr.extract_logical_area(), addr.extract_page_offs(), SummaryEntry::Dirty)?;
                self.pac.set_page(page_no, None, driver, area_mgr, summary_cache)?;
                self.pac.adjust_reserved_pages(-1);
            }
        }
        self.pac.set_size(new_offs);
        *inode = self.pac.target_inode();
        Ok(())
    }

    /// Commits the page address cache if it holds unwritten changes for
    /// whichever inode it currently targets. Called by the device
    /// orchestrator's `flushAllCaches` before a journal checkpoint.
    pub fn flush<Dr: Driver>(
        &mut self,
        tc: &mut TreeCache,
        bt: &BTree,
        driver: &mut Dr,
        area_mgr: &mut AreaManager,
        summary_cache: &mut SummaryCache,
    ) -> Result<()> {
        if self.pac.is_dirty() {
            self.pac.commit(tc, bt, driver, area_mgr, summary_cache)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ParamsBuilder;
    use crate::driver::simu::SimDriver;
    use crate::addr::Addr;
    use crate::journal::Journal;
    use crate::types::{AreaStatus, AreaType, InodeType, Permission};

    fn setup() -> (Params, AreaManager, SummaryCache, SimDriver) {
        let p = ParamsBuilder::new()
            .data_bytes_per_page(64)
            .oob_bytes_per_page(8)
            .pages_per_block(4)
            .blocks_total(64)
            .blocks_per_area(2)
            .build()
            .unwrap();
        let mut area_mgr = AreaManager::new(p);
        for a in 0..p.areas_no() {
            area_mgr.set_pos(a, a);
        }
        let mut drv = SimDriver::new(p, 8192);
        for a in 0..p.areas_no() {
            area_mgr.delete_area_contents(&mut drv, a).unwrap();
        }
        area_mgr.set_type(0, AreaType::Index);
        area_mgr.set_status(0, AreaStatus::Empty);
        area_mgr.init_area(0);
        area_mgr.set_type(1, AreaType::Data);
        area_mgr.set_status(1, AreaStatus::Empty);
        area_mgr.init_area(1);
        (p, area_mgr, SummaryCache::new(p), drv)
    }

    #[test]
    fn write_then_read_round_trips_across_several_pages() {
        let (p, mut area_mgr, mut sc, mut drv) = setup();
        let mut tc = TreeCache::new(p);
        let bt = BTree::new(p);
        let mut dio = DataIo::new(p);
        let mut journal = Journal::new(64);
        let mut inode = Inode::new(1, InodeType::File, Permission::all());
        bt.insert_inode(&mut tc, inode, &mut drv, &mut area_mgr, &mut sc).unwrap();

        let payload: Vec<u8> = (0..200u32).map(|i| (i % 251) as u8).collect();
        let written = dio
            .write_inode_data(&mut inode, 0, &payload, &mut tc, &bt, &mut drv, &mut area_mgr, &mut sc, &mut journal)
            .unwrap();
        assert_eq!(written as usize, payload.len());
        assert_eq!(inode.size as usize, payload.len());

        let mut readback = vec![0u8; payload.len()];
        let read = dio
            .read_inode_data(&inode, 0, payload.len() as u32, &mut readback, &mut tc, &bt, &mut drv, &mut area_mgr, &mut sc)
            .unwrap();
        assert_eq!(read as usize, payload.len());
        assert_eq!(readback, payload);
    }

    #[test]
    fn partial_page_overwrite_preserves_neighboring_bytes() {
        let (p, mut area_mgr, mut sc, mut drv) = setup();
        let mut tc = TreeCache::new(p);
        let bt = BTree::new(p);
        let mut dio = DataIo::new(p);
        let mut journal = Journal::new(64);
        let mut inode = Inode::new(2, InodeType::File, Permission::all());
        bt.insert_inode(&mut tc, inode, &mut drv, &mut area_mgr, &mut sc).unwrap();

        let initial = vec![0xAAu8; 64];
        dio.write_inode_data(&mut inode, 0, &initial, &mut tc, &bt, &mut drv, &mut area_mgr, &mut sc, &mut journal).unwrap();
        let patch = vec![0x55u8; 4];
        dio.write_inode_data(&mut inode, 10, &patch, &mut tc, &bt, &mut drv, &mut area_mgr, &mut sc, &mut journal).unwrap();

        let mut out = vec![0u8; 64];
        dio.read_inode_data(&inode, 0, 64, &mut out, &mut tc, &bt, &mut drv, &mut area_mgr, &mut sc).unwrap();
        assert_eq!(&out[0..10], &[0xAAu8; 10]);
        assert_eq!(&out[10..14], &[0x55u8; 4]);
        assert_eq!(&out[14..64], &[0xAAu8; 50]);
    }

    #[test]
    fn hole_reads_as_zero_before_first_write() {
        let (p, mut area_mgr, mut sc, mut drv) = setup();
        let mut tc = TreeCache::new(p);
        let bt = BTree::new(p);
        let mut dio = DataIo::new(p);
        let mut journal = Journal::new(64);
        let mut inode = Inode::new(3, InodeType::File, Permission::all());
        bt.insert_inode(&mut tc, inode, &mut drv, &mut area_mgr, &mut sc).unwrap();
        dio.write_inode_data(&mut inode, 100, &[7u8; 4], &mut tc, &bt, &mut drv, &mut area_mgr, &mut sc, &mut journal).unwrap();

        let mut out = vec![0xFFu8; 10];
        dio.read_inode_data(&inode, 0, 10, &mut out, &mut tc, &bt, &mut drv, &mut area_mgr, &mut sc).unwrap();
        assert_eq!(out, vec![0u8; 10]);
    }

    #[test]
    fn delete_inode_data_truncates_and_frees_pages() {
        let (p, mut area_mgr, mut sc, mut drv) = setup();
        let mut tc = TreeCache::new(p);
        let bt = BTree::new(p);
        let mut dio = DataIo::new(p);
        let mut journal = Journal::new(64);
        let mut inode = Inode::new(4, InodeType::File, Permission::all());
        bt.insert_inode(&mut tc, inode, &mut drv, &mut area_mgr, &mut sc).unwrap();
        dio.write_inode_data(&mut inode, 0, &[1u8; 192], &mut tc, &bt, &mut drv, &mut area_mgr, &mut sc, &mut journal).unwrap();
        assert_eq!(inode.reserved_pages, 3);

        dio.delete_inode_data(&mut inode, 64, &mut tc, &bt, &mut drv, &mut area_mgr, &mut sc).unwrap();
        assert_eq!(inode.size, 64);
        assert_eq!(inode.reserved_pages, 1);
    }

    #[test]
    fn overwrite_checkpoints_its_psm_sequence_in_the_journal() {
        let (p, mut area_mgr, mut sc, mut drv) = setup();
        let mut tc = TreeCache::new(p);
        let bt = BTree::new(p);
        let mut dio = DataIo::new(p);
        let mut journal = Journal::new(64);
        let mut inode = Inode::new(5, InodeType::File, Permission::all());
        bt.insert_inode(&mut tc, inode, &mut drv, &mut area_mgr, &mut sc).unwrap();

        // First write: a fresh file has no old pages to replace.
        dio.write_inode_data(&mut inode, 0, &[1u8; 64], &mut tc, &bt, &mut drv, &mut area_mgr, &mut sc, &mut journal)
            .unwrap();
        // Second write: overwrites the page the first write just placed.
        dio.write_inode_data(&mut inode, 0, &[2u8; 64], &mut tc, &bt, &mut drv, &mut area_mgr, &mut sc, &mut journal)
            .unwrap();

        let entries = journal.entries(&mut drv).unwrap();
        let success_count = entries
            .iter()
            .filter(|e| matches!(e, JournalEntry::Success(Topic::DataIo)))
            .count();
        assert_eq!(success_count, 2, "each completed write checkpoints its own PSM sequence");
        let invalidate_count = entries
            .iter()
            .filter(|e| matches!(e, JournalEntry::InvalidateOldPages(Topic::DataIo)))
            .count();
        assert_eq!(invalidate_count, 1, "only the second write has an old page to invalidate");
    }

    /// §8 scenario 6: a crash right after the new page's `ReplacePage` entry
    /// is journaled, but before the write's `Success`/`InvalidateOldPages`
    /// checkpoint. Drives `replace_page` directly (rather than through
    /// `write_inode_data`) to stop exactly at that point, the same way
    /// `journal.rs`'s own crash tests stage a partial sequence.
    #[test]
    fn crash_after_replace_before_checkpoint_reverts_on_replay() {
        let (p, mut area_mgr, mut sc, mut drv) = setup();
        let mut tc = TreeCache::new(p);
        let bt = BTree::new(p);
        let mut dio = DataIo::new(p);
        let mut journal = Journal::new(64);
        let mut inode = Inode::new(6, InodeType::File, Permission::all());
        bt.insert_inode(&mut tc, inode, &mut drv, &mut area_mgr, &mut sc).unwrap();

        let original = vec![0xAAu8; 64];
        dio.write_inode_data(&mut inode, 0, &original, &mut tc, &bt, &mut drv, &mut area_mgr, &mut sc, &mut journal)
            .unwrap();
        journal.clear(&mut drv).unwrap();
        let old_addr = dio.pac.get_page(0, &mut drv, &mut area_mgr, &mut sc).unwrap().unwrap();

        // Stage a second write's replacement page without ever checkpointing
        // it — the crash point §8 scenario 6 describes.
        let (area, page) = dio.allocate_data_page(&mut drv, &mut area_mgr, &mut sc).unwrap();
        let new_addr = Addr::combine(area, page);
        let abs_new = area_mgr.data_page_abs(area, page);
        drv.write_page(abs_new, &[0x55u8; 64]).unwrap();
        dio.psm.replace_page(new_addr, Some(old_addr), &mut journal, &mut sc, &mut drv).unwrap();
        // crash: no Success, no invalidate_old_pages, no pac.set_page/commit.

        assert_eq!(sc.get_page_status(new_addr.extract_logical_area(), new_addr.extract_page_offs()).unwrap(), SummaryEntry::Used);

        let remounted = Journal::mount(64, &mut drv).unwrap();
        let entries = remounted.entries(&mut drv).unwrap();
        let mut replay = DataIo::new(p);
        for e in &entries {
            replay.replay_journal_entry(e).unwrap();
        }
        let (committed, restores) = replay.finish_journal_replay(&mut sc).unwrap();
        assert!(!committed, "sequence never saw a Success entry, so it must revert");
        assert!(restores.is_empty(), "write_inode_data never uses positional replacement");

        assert_eq!(
            sc.get_page_status(new_addr.extract_logical_area(), new_addr.extract_page_offs()).unwrap(),
            SummaryEntry::Dirty,
            "the new page must be reclaimable, not linked into the file"
        );
        assert_eq!(
            sc.get_page_status(old_addr.extract_logical_area(), old_addr.extract_page_offs()).unwrap(),
            SummaryEntry::Used,
            "the old page is still the one the tree points at"
        );

        let mut readback = vec![0u8; 64];
        dio.read_inode_data(&inode, 0, 64, &mut readback, &mut tc, &bt, &mut drv, &mut area_mgr, &mut sc)
            .unwrap();
        assert_eq!(readback, original, "the file still reads back its pre-crash bytes");
    }
}
