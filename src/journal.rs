//! Write-ahead journal (§4.J): an MRAM-resident log of in-flight metadata
//! operations, plus the topic-scoped page-state machines that use it to make
//! multi-page writes atomic across a crash.
//!
//! Ported from `original_source/src/journal.hpp`/`journalEntry.hpp` (the log
//! itself) and `journalPageStatemachine.hpp`/`journalPagePosStatemachine.hpp`
//! (the state machine). The original keeps one global `Journal` plus one
//! `PageStateMachine<maxPages, topic>` instance per topic, the `topic`
//! baked in as a non-type template parameter; here it is a runtime
//! [`Topic`] field instead, since Rust const generics can't carry an enum.
//! The `maxPages` capacity stays a const generic (`MAX_PAGES`), the same
//! fixed-size-array-over-pointer choice the tree cache and PAC make
//! elsewhere in this crate.
//!
//! This module only owns the log format and the per-topic replay state; it
//! does not call into a B⁺-tree/PAC/device itself. [`crate::data_io::DataIo`]
//! is the one topic currently wired end to end: it drives `replace_page`/
//! `invalidate_old_pages` as it writes, and
//! [`crate::device::Device::mount`] feeds the recovered log back through
//! `process_entry`/`signal_end_of_log` before the log is cleared. A topic
//! using `replace_page_pos`'s positional recovery would need its own caller
//! to apply `RecoveredPosition`'s old-pointer restores; none does yet.

use log::{debug, trace, warn};

use crate::addr::Addr;
use crate::config::InodeNo;
use crate::driver::Driver;
use crate::error::{PaffsError, Result};
use crate::summary_cache::SummaryCache;
use crate::types::SummaryEntry;

/// Which subsystem a journal entry — or a `PageStateMachine` instance —
/// belongs to. Mirrors `journalEntry::Topic`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum Topic {
    Tree,
    SummaryCache,
    DataIo,
    AreaMgmt,
    Device,
}

/// One entry in the log. Ported from `journalEntry::Max`'s union of a
/// `Checkpoint`/`Success` marker and the page-state-machine records; the
/// original's further per-topic payloads (`btree` insert/update/remove,
/// `summaryCache` set-status, `device` mkObjInode/insertIntoDir, ...) are
/// out of scope for this port's replay and are not modeled as entries —
/// the device orchestrator checkpoints at a coarser, whole-operation grain
/// instead (see `crate::device`).
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum JournalEntry {
    /// Marks the preceding operation on `topic` as durable.
    Checkpoint(Topic),
    /// Marks the end of a page-state-machine sequence on `topic`.
    Success(Topic),
    /// A page-state-machine step: `new` replaces `old` (absent if this is a
    /// fresh allocation with nothing to retire).
    ReplacePage { topic: Topic, new: Addr, old: Option<Addr> },
    /// Like `ReplacePage`, but also records which inode/position the new
    /// page belongs at, so recovery can patch the pointer back in place.
    ReplacePagePos {
        topic: Topic,
        new: Addr,
        old: Option<Addr>,
        inode: InodeNo,
        position: u16,
    },
    /// Closes a page-state-machine sequence: every `old` page recorded
    /// since the last `Success`/clear is now safe to mark dirty.
    InvalidateOldPages(Topic),
}

const TAG_EMPTY: u8 = 0;
const TAG_CHECKPOINT: u8 = 1;
const TAG_SUCCESS: u8 = 2;
const TAG_REPLACE_PAGE: u8 = 3;
const TAG_REPLACE_PAGE_POS: u8 = 4;
const TAG_INVALIDATE_OLD_PAGES: u8 = 5;

/// Bytes one serialized [`JournalEntry`] occupies in MRAM.
pub const ENTRY_SIZE: usize = 24;

fn topic_to_byte(t: Topic) -> u8 {
    match t {
        Topic::Tree => 0,
        Topic::SummaryCache => 1,
        Topic::DataIo => 2,
        Topic::AreaMgmt => 3,
        Topic::Device => 4,
    }
}

fn topic_from_byte(b: u8) -> Result<Topic> {
    Ok(match b {
        0 => Topic::Tree,
        1 => Topic::SummaryCache,
        2 => Topic::DataIo,
        3 => Topic::AreaMgmt,
        4 => Topic::Device,
        _ => return Err(PaffsError::Bug),
    })
}

fn addr_to_raw(a: Option<Addr>) -> u64 {
    a.map(Addr::into_raw).unwrap_or(u64::MAX)
}

fn addr_from_raw(raw: u64) -> Option<Addr> {
    Addr::from_raw(raw)
}

fn serialize_entry(entry: JournalEntry) -> [u8; ENTRY_SIZE] {
    let mut buf = [0u8; ENTRY_SIZE];
    let (tag, topic, new, old, inode, position) = match entry {
        JournalEntry::Checkpoint(t) => (TAG_CHECKPOINT, t, u64::MAX, u64::MAX, 0, 0),
        JournalEntry::Success(t) => (TAG_SUCCESS, t, u64::MAX, u64::MAX, 0, 0),
        JournalEntry::ReplacePage { topic, new, old } => {
            (TAG_REPLACE_PAGE, topic, new.into_raw(), addr_to_raw(old), 0, 0)
        }
        JournalEntry::ReplacePagePos { topic, new, old, inode, position } => (
            TAG_REPLACE_PAGE_POS,
            topic,
            new.into_raw(),
            addr_to_raw(old),
            inode,
            position,
        ),
        JournalEntry::InvalidateOldPages(t) => (TAG_INVALIDATE_OLD_PAGES, t, u64::MAX, u64::MAX, 0, 0),
    };
    buf[0] = tag;
    buf[1] = topic_to_byte(topic);
    buf[2..10].copy_from_slice(&new.to_le_bytes());
    buf[10..18].copy_from_slice(&old.to_le_bytes());
    buf[18..22].copy_from_slice(&inode.to_le_bytes());
    buf[22..24].copy_from_slice(&position.to_le_bytes());
    buf
}

/// Returns `Ok(None)` for an unwritten (all-zero tag) slot.
fn deserialize_entry(buf: &[u8; ENTRY_SIZE]) -> Result<Option<JournalEntry>> {
    let tag = buf[0];
    if tag == TAG_EMPTY {
        return Ok(None);
    }
    let topic = topic_from_byte(buf[1])?;
    let new = u64::from_le_bytes(buf[2..10].try_into().unwrap());
    let old = u64::from_le_bytes(buf[10..18].try_into().unwrap());
    let inode = u32::from_le_bytes(buf[18..22].try_into().unwrap());
    let position = u16::from_le_bytes(buf[22..24].try_into().unwrap());
    Ok(Some(match tag {
        TAG_CHECKPOINT => JournalEntry::Checkpoint(topic),
        TAG_SUCCESS => JournalEntry::Success(topic),
        TAG_REPLACE_PAGE => JournalEntry::ReplacePage {
            topic,
            new: Addr::from_raw(new).ok_or(PaffsError::Bug)?,
            old: addr_from_raw(old),
        },
        TAG_REPLACE_PAGE_POS => JournalEntry::ReplacePagePos {
            topic,
            new: Addr::from_raw(new).ok_or(PaffsError::Bug)?,
            old: addr_from_raw(old),
            inode,
            position,
        },
        TAG_INVALIDATE_OLD_PAGES => JournalEntry::InvalidateOldPages(topic),
        _ => return Err(PaffsError::Bug),
    }))
}

/// The append-only MRAM log. Ported from `journal.hpp`'s `Journal`: the
/// original keeps a running byte `head`; this port derives the same thing
/// by scanning for the first unwritten (all-zero) slot, so no separate
/// durable head pointer needs to be kept consistent with the entries
/// themselves.
pub struct Journal {
    capacity_entries: usize,
    /// Number of entries written since the log was last cleared.
    head: usize,
}

impl Journal {
    /// Builds a journal over `capacity_entries` MRAM-resident slots,
    /// starting empty. Use [`Journal::mount`] instead when reopening a
    /// device that may already hold a log from a previous session.
    pub fn new(capacity_entries: usize) -> Self {
        Self { capacity_entries, head: 0 }
    }

    /// Reconstructs `head` by scanning MRAM for the first unwritten slot.
    /// Ported from the original's startup call to replay the journal.
    pub fn mount<Dr: Driver>(capacity_entries: usize, driver: &mut Dr) -> Result<Self> {
        let mut j = Self::new(capacity_entries);
        let mut buf = [0u8; ENTRY_SIZE];
        for slot in 0..capacity_entries {
            driver.read_mram((slot * ENTRY_SIZE) as u64, &mut buf)?;
            if buf[0] == TAG_EMPTY {
                break;
            }
            j.head = slot + 1;
        }
        trace!("journal mount found {} pending entries", j.head);
        Ok(j)
    }

    /// How many entries are currently held in the log.
    pub fn len(&self) -> usize {
        self.head
    }

    pub fn is_empty(&self) -> bool {
        self.head == 0
    }

    /// Whether fewer than `headroom` entries of space remain. The device
    /// orchestrator uses this to decide when to call `flushAllCaches`.
    pub fn is_nearly_full(&self, headroom: usize) -> bool {
        self.capacity_entries.saturating_sub(self.head) <= headroom
    }

    /// Appends one entry, returning `PaffsError::LowMem` if the log is full
    /// (the caller must checkpoint/flush and retry).
    pub fn append<Dr: Driver>(&mut self, entry: JournalEntry, driver: &mut Dr) -> Result<()> {
        if self.head >= self.capacity_entries {
            warn!("journal full at {} entries", self.capacity_entries);
            return Err(PaffsError::LowMem);
        }
        let buf = serialize_entry(entry);
        driver.write_mram((self.head * ENTRY_SIZE) as u64, &buf)?;
        self.head += 1;
        Ok(())
    }

    /// Reads back every entry currently in the log, in order.
    pub fn entries<Dr: Driver>(&self, driver: &mut Dr) -> Result<Vec<JournalEntry>> {
        let mut out = Vec::with_capacity(self.head);
        let mut buf = [0u8; ENTRY_SIZE];
        for slot in 0..self.head {
            driver.read_mram((slot * ENTRY_SIZE) as u64, &mut buf)?;
            if let Some(e) = deserialize_entry(&buf)? {
                out.push(e);
            }
        }
        Ok(out)
    }

    /// Empties the log: zeroes every written slot and resets `head`. Called
    /// once a checkpoint makes every entry in the log durable elsewhere.
    pub fn clear<Dr: Driver>(&mut self, driver: &mut Dr) -> Result<()> {
        let zero = [0u8; ENTRY_SIZE];
        for slot in 0..self.head {
            driver.write_mram((slot * ENTRY_SIZE) as u64, &zero)?;
        }
        self.head = 0;
        Ok(())
    }
}

/// Internal replay state of a [`PageStateMachine`]. Mirrors the original's
/// `JournalState` enum (`ok`/`invalid`/`recover`).
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum PsmState {
    Ok,
    Invalid,
    Recover,
}

/// One page pointer recovered from a positional (`ReplacePagePos`) entry
/// that `signal_end_of_log` could not apply itself — the caller owns the
/// inode/tree and must restore the pointer.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct RecoveredPosition {
    pub inode: InodeNo,
    pub position: u16,
    pub old: Option<Addr>,
}

/// Guards one multi-page atomic write for a given [`Topic`], emitting
/// journal entries as it goes and replaying them on the next mount.
///
/// Ported from `journalPageStatemachine.hpp`'s `PageStateMachine<maxPages,
/// topic>`: `MAX_PAGES` is the same fixed capacity (`maxPages`), `topic`
/// moves from a template parameter to a field set at construction.
pub struct PageStateMachine<const MAX_PAGES: usize> {
    topic: Topic,
    new_pages: [Option<Addr>; MAX_PAGES],
    old_pages: [Option<Addr>; MAX_PAGES],
    positions: [Option<(InodeNo, u16)>; MAX_PAGES],
    hwm: usize,
    state: PsmState,
}

impl<const MAX_PAGES: usize> PageStateMachine<MAX_PAGES> {
    pub fn new(topic: Topic) -> Self {
        Self {
            topic,
            new_pages: [None; MAX_PAGES],
            old_pages: [None; MAX_PAGES],
            positions: [None; MAX_PAGES],
            hwm: 0,
            state: PsmState::Ok,
        }
    }

    pub fn clear(&mut self) {
        self.state = PsmState::Ok;
        self.new_pages = [None; MAX_PAGES];
        self.old_pages = [None; MAX_PAGES];
        self.positions = [None; MAX_PAGES];
        self.hwm = 0;
    }

    pub fn min_space_left(&self) -> usize {
        MAX_PAGES - self.hwm
    }

    fn push(&mut self, new: Addr, old: Option<Addr>, position: Option<(InodeNo, u16)>) -> Result<()> {
        if self.hwm == MAX_PAGES {
            return Err(PaffsError::LowMem);
        }
        self.new_pages[self.hwm] = Some(new);
        self.old_pages[self.hwm] = old;
        self.positions[self.hwm] = position;
        self.hwm += 1;
        Ok(())
    }

    /// Records one page replacement and marks `new` used. Ported from
    /// `PageStateMachine::replacePage`.
    pub fn replace_page<Dr: Driver>(
        &mut self,
        new: Addr,
        old: Option<Addr>,
        journal: &mut Journal,
        summary_cache: &mut SummaryCache,
        driver: &mut Dr,
    ) -> Result<()> {
        trace!("psm[{:?}] replace {:?} <- {:?} at {}", self.topic, old, new, self.hwm);
        self.push(new, old, None)?;
        journal.append(JournalEntry::ReplacePage { topic: self.topic, new, old }, driver)?;
        summary_cache.set_page_status(new.extract_logical_area(), new.extract_page_offs(), SummaryEntry::Used)
    }

    /// Like [`PageStateMachine::replace_page`], but also remembers the
    /// inode/position the page belongs at, so recovery can restore the
    /// pointer if the sequence never completes.
    pub fn replace_page_pos<Dr: Driver>(
        &mut self,
        new: Addr,
        old: Option<Addr>,
        inode: InodeNo,
        position: u16,
        journal: &mut Journal,
        summary_cache: &mut SummaryCache,
        driver: &mut Dr,
    ) -> Result<()> {
        self.push(new, old, Some((inode, position)))?;
        journal.append(
            JournalEntry::ReplacePagePos { topic: self.topic, new, old, inode, position },
            driver,
        )?;
        summary_cache.set_page_status(new.extract_logical_area(), new.extract_page_offs(), SummaryEntry::Used)
    }

    /// Marks every recorded `old` page dirty and closes the sequence.
    /// Ported from `PageStateMachine::invalidateOldPages`.
    pub fn invalidate_old_pages<Dr: Driver>(
        &mut self,
        journal: &mut Journal,
        summary_cache: &mut SummaryCache,
        driver: &mut Dr,
    ) -> Result<()> {
        let mut any = false;
        for i in 0..self.hwm {
            if let Some(old) = self.old_pages[i] {
                any = true;
                summary_cache.set_page_status(old.extract_logical_area(), old.extract_page_offs(), SummaryEntry::Dirty)?;
            }
        }
        if any {
            journal.append(JournalEntry::InvalidateOldPages(self.topic), driver)?;
        }
        self.clear();
        Ok(())
    }

    /// Feeds one replayed entry into the state machine. Ignores entries
    /// belonging to a different topic. Ported from
    /// `PageStateMachine::processEntry`.
    pub fn process_entry(&mut self, entry: &JournalEntry) -> Result<()> {
        match (self.state, entry) {
            (PsmState::Ok, JournalEntry::ReplacePage { topic, new, old }) if *topic == self.topic => {
                self.push(*new, *old, None)?;
                self.state = PsmState::Invalid;
            }
            (PsmState::Ok, JournalEntry::ReplacePagePos { topic, new, old, inode, position })
                if *topic == self.topic =>
            {
                self.push(*new, *old, Some((*inode, *position)))?;
                self.state = PsmState::Invalid;
            }
            (PsmState::Ok, JournalEntry::Success(topic)) if *topic == self.topic => {
                // A stray Success with nothing staged; the original treats
                // this as a transient artifact of the PAC's own replay.
            }
            (PsmState::Invalid, JournalEntry::ReplacePage { topic, new, old }) if *topic == self.topic => {
                self.push(*new, *old, None)?;
            }
            (PsmState::Invalid, JournalEntry::ReplacePagePos { topic, new, old, inode, position })
                if *topic == self.topic =>
            {
                self.push(*new, *old, Some((*inode, *position)))?;
            }
            (PsmState::Invalid, JournalEntry::Success(topic)) if *topic == self.topic => {
                self.state = PsmState::Recover;
            }
            (PsmState::Recover, JournalEntry::InvalidateOldPages(topic)) if *topic == self.topic => {
                self.state = PsmState::Ok;
                self.clear();
            }
            _ => {
                // Entries for other topics (or out-of-order for this one)
                // are simply not ours to react to.
            }
        }
        Ok(())
    }

    /// Finalizes replay once the whole log has been fed through
    /// [`PageStateMachine::process_entry`]. Returns whether the sequence
    /// this topic was mid-way through is now considered committed, plus
    /// any positional pointers the caller must restore.
    ///
    /// - `Ok` (nothing staged): no-op, returns `true`.
    /// - `Invalid` (crashed before `Success`): revert — every staged `new`
    ///   page is marked dirty, and positional entries are handed back so
    ///   the caller restores the inode's old pointer. Returns `false`.
    /// - `Recover` (crashed after `Success`, before `InvalidateOldPages`):
    ///   roll forward — every staged `old` page is marked dirty. Returns
    ///   `true`.
    pub fn signal_end_of_log(&mut self, summary_cache: &mut SummaryCache) -> Result<(bool, Vec<RecoveredPosition>)> {
        let result = match self.state {
            PsmState::Ok => (true, Vec::new()),
            PsmState::Invalid => {
                let mut restores = Vec::new();
                for i in 0..self.hwm {
                    if let Some(new) = self.new_pages[i] {
                        summary_cache.set_page_status(new.extract_logical_area(), new.extract_page_offs(), SummaryEntry::Dirty)?;
                    }
                    if let Some((inode, position)) = self.positions[i] {
                        restores.push(RecoveredPosition { inode, position, old: self.old_pages[i] });
                    }
                }
                debug!("psm[{:?}] reverted {} staged pages", self.topic, self.hwm);
                (false, restores)
            }
            PsmState::Recover => {
                for i in 0..self.hwm {
                    if let Some(old) = self.old_pages[i] {
                        summary_cache.set_page_status(old.extract_logical_area(), old.extract_page_offs(), SummaryEntry::Dirty)?;
                    }
                }
                debug!("psm[{:?}] rolled forward {} staged pages", self.topic, self.hwm);
                (true, Vec::new())
            }
        };
        self.clear();
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ParamsBuilder;
    use crate::driver::simu::SimDriver;

    fn driver() -> SimDriver {
        let p = ParamsBuilder::new()
            .data_bytes_per_page(64)
            .oob_bytes_per_page(8)
            .pages_per_block(4)
            .blocks_total(16)
            .blocks_per_area(2)
            .build()
            .unwrap();
        SimDriver::new(p, 4096)
    }

    #[test]
    fn append_and_read_back_round_trips() {
        let mut drv = driver();
        let mut j = Journal::new(8);
        let new = Addr::combine(1, 2);
        let old = Addr::combine(1, 1);
        j.append(JournalEntry::ReplacePage { topic: Topic::DataIo, new, old: Some(old) }, &mut drv).unwrap();
        j.append(JournalEntry::Success(Topic::DataIo), &mut drv).unwrap();
        assert_eq!(j.len(), 2);

        let entries = j.entries(&mut drv).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], JournalEntry::ReplacePage { topic: Topic::DataIo, new, old: Some(old) });
        assert_eq!(entries[1], JournalEntry::Success(Topic::DataIo));
    }

    #[test]
    fn mount_recovers_head_from_mram() {
        let mut drv = driver();
        {
            let mut j = Journal::new(8);
            j.append(JournalEntry::Checkpoint(Topic::Tree), &mut drv).unwrap();
            j.append(JournalEntry::Checkpoint(Topic::Tree), &mut drv).unwrap();
        }
        let remounted = Journal::mount(8, &mut drv).unwrap();
        assert_eq!(remounted.len(), 2);
    }

    #[test]
    fn clear_zeroes_written_slots() {
        let mut drv = driver();
        let mut j = Journal::new(8);
        j.append(JournalEntry::Checkpoint(Topic::Tree), &mut drv).unwrap();
        j.clear(&mut drv).unwrap();
        assert_eq!(j.len(), 0);
        let remounted = Journal::mount(8, &mut drv).unwrap();
        assert_eq!(remounted.len(), 0);
    }

    #[test]
    fn append_past_capacity_reports_low_mem() {
        let mut drv = driver();
        let mut j = Journal::new(1);
        j.append(JournalEntry::Checkpoint(Topic::Device), &mut drv).unwrap();
        assert_eq!(j.append(JournalEntry::Checkpoint(Topic::Device), &mut drv), Err(PaffsError::LowMem));
    }

    fn params() -> crate::config::Params {
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
    fn clean_commit_leaves_psm_ok_on_replay() {
        let mut drv = driver();
        let mut sc = SummaryCache::new(params());
        let mut j = Journal::new(16);
        let mut psm: PageStateMachine<4> = PageStateMachine::new(Topic::DataIo);

        let new = Addr::combine(0, 1);
        psm.replace_page(new, None, &mut j, &mut sc, &mut drv).unwrap();
        psm.invalidate_old_pages(&mut j, &mut sc, &mut drv).unwrap();
        j.append(JournalEntry::Checkpoint(Topic::DataIo), &mut drv).unwrap();
        j.clear(&mut drv).unwrap();

        let remounted = Journal::mount(16, &mut drv).unwrap();
        assert!(remounted.is_empty());
    }

    #[test]
    fn crash_after_replace_before_success_reverts_on_replay() {
        let mut drv = driver();
        let mut sc = SummaryCache::new(params());
        let mut j = Journal::new(16);
        let mut writer: PageStateMachine<4> = PageStateMachine::new(Topic::DataIo);

        let old = Addr::combine(0, 1);
        let new = Addr::combine(0, 2);
        writer.replace_page(new, Some(old), &mut j, &mut sc, &mut drv).unwrap();
        // crash: no Success, no InvalidateOldPages, no clear() was called.

        let replayed = Journal::mount(16, &mut drv).unwrap();
        let entries = replayed.entries(&mut drv).unwrap();
        let mut reader: PageStateMachine<4> = PageStateMachine::new(Topic::DataIo);
        for e in &entries {
            reader.process_entry(e).unwrap();
        }
        let mut sc2 = SummaryCache::new(params());
        let (committed, restores) = reader.signal_end_of_log(&mut sc2).unwrap();
        assert!(!committed);
        assert!(restores.is_empty());
        assert_eq!(sc2.get_page_status(new.extract_logical_area(), new.extract_page_offs()).unwrap(), SummaryEntry::Dirty);
    }

    #[test]
    fn crash_after_success_before_invalidate_rolls_forward_on_replay() {
        let mut drv = driver();
        let mut sc = SummaryCache::new(params());
        let mut j = Journal::new(16);
        let mut writer: PageStateMachine<4> = PageStateMachine::new(Topic::Tree);

        let old = Addr::combine(0, 1);
        let new = Addr::combine(0, 2);
        writer.replace_page(new, Some(old), &mut j, &mut sc, &mut drv).unwrap();
        j.append(JournalEntry::Success(Topic::Tree), &mut drv).unwrap();
        // crash: InvalidateOldPages was never appended or applied.

        let replayed = Journal::mount(16, &mut drv).unwrap();
        let entries = replayed.entries(&mut drv).unwrap();
        let mut reader: PageStateMachine<4> = PageStateMachine::new(Topic::Tree);
        for e in &entries {
            reader.process_entry(e).unwrap();
        }
        let mut sc2 = SummaryCache::new(params());
        let (committed, _) = reader.signal_end_of_log(&mut sc2).unwrap();
        assert!(committed);
        assert_eq!(sc2.get_page_status(old.extract_logical_area(), old.extract_page_offs()).unwrap(), SummaryEntry::Dirty);
    }

    #[test]
    fn positional_replace_surfaces_restore_info_on_revert() {
        let mut drv = driver();
        let mut sc = SummaryCache::new(params());
        let mut j = Journal::new(16);
        let mut writer: PageStateMachine<4> = PageStateMachine::new(Topic::Tree);

        let old = Addr::combine(0, 1);
        let new = Addr::combine(0, 2);
        writer.replace_page_pos(new, Some(old), 7, 3, &mut j, &mut sc, &mut drv).unwrap();

        let replayed = Journal::mount(16, &mut drv).unwrap();
        let entries = replayed.entries(&mut drv).unwrap();
        let mut reader: PageStateMachine<4> = PageStateMachine::new(Topic::Tree);
        for e in &entries {
            reader.process_entry(e).unwrap();
        }
        let mut sc2 = SummaryCache::new(params());
        let (committed, restores) = reader.signal_end_of_log(&mut sc2).unwrap();
        assert!(!committed);
        assert_eq!(restores, vec![RecoveredPosition { inode: 7, position: 3, old: Some(old) }]);
    }
}
