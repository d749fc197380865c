//! The storage seam (§4.A Driver contract).
//!
//! Every byte this crate ever moves to or from flash goes through this
//! trait, ported from `original_source/src/driver/driver.hpp`'s `Driver`
//! abstract base. The concrete NAND/SpaceWire drivers that base class had
//! real subclasses for (`office_model_nexys3`, the RTEMS glue) are out of
//! scope per the spec's own Non-goals; [`simu::SimDriver`] (ported from
//! `driver/simu.cpp`) is the one concrete implementation this crate ships,
//! used by every test and available to callers who want an in-memory device.

pub mod simu;

use crate::config::{BlockAbs, PageAbs};
use crate::error::Result;

/// Factory-marked bad blocks reported once at driver initialization.
///
/// Ported from `commonTypes.hpp`'s `BadBlockList`: distinct from blocks that
/// go bad during operation (those are reported live through
/// [`Driver::mark_bad`]/discovered through [`Driver::check_bad`]).
#[derive(Debug, Clone, Default)]
pub struct BadBlockList {
    blocks: Vec<BlockAbs>,
}

impl BadBlockList {
    /// An empty bad block list.
    pub fn new() -> Self {
        Self { blocks: Vec::new() }
    }

    /// Registers `block` as factory-bad.
    pub fn push(&mut self, block: BlockAbs) {
        self.blocks.push(block);
    }

    /// Whether `block` was reported bad at init time.
    pub fn contains(&self, block: BlockAbs) -> bool {
        self.blocks.contains(&block)
    }

    /// Iterates over every factory-bad block.
    pub fn iter(&self) -> impl Iterator<Item = BlockAbs> + '_ {
        self.blocks.iter().copied()
    }
}

/// The storage medium a [`crate::device::Device`] is mounted on.
///
/// A block must be erased before any of its pages are written again; a
/// page must not be written twice between erases (the area/GC layers above
/// this trait enforce that discipline, this trait only ever forwards the
/// request to the medium). `data_len` may be smaller than a full page; the
/// implementation is responsible for padding with `0xFF` the way real NAND
/// reads back unwritten cells.
pub trait Driver {
    /// Powers on / prepares the underlying medium, returning the
    /// factory-bad block list it reports.
    fn initialize_nand(&mut self) -> Result<BadBlockList>;

    /// Powers down / flushes the underlying medium.
    fn deinitialize_nand(&mut self) -> Result<()>;

    /// Writes `data` to page `page_no`, zero-padded to the page width if
    /// `data` is shorter.
    fn write_page(&mut self, page_no: PageAbs, data: &[u8]) -> Result<()>;

    /// Reads a full page's worth of bytes from `page_no` into `data`.
    ///
    /// Returns `Ok(())` on a clean read, `Err(PaffsError::BiterrorCorrected)`
    /// if the medium's ECC fixed a bit flip (data in `data` is still
    /// correct), or `Err(PaffsError::BiterrorNotCorrected)` if it could not.
    fn read_page(&mut self, page_no: PageAbs, data: &mut [u8]) -> Result<()>;

    /// Erases every page in `block_no`, returning it to the all-`0xFF`
    /// state.
    fn erase_block(&mut self, block_no: BlockAbs) -> Result<()>;

    /// Marks `block_no` as bad; it must never be handed out for allocation
    /// again.
    fn mark_bad(&mut self, block_no: BlockAbs) -> Result<()>;

    /// Checks whether `block_no` has been marked bad.
    fn check_bad(&mut self, block_no: BlockAbs) -> Result<bool>;

    /// Writes `data` to the MRAM-resident journal region starting at
    /// `start_byte`.
    fn write_mram(&mut self, start_byte: u64, data: &[u8]) -> Result<()>;

    /// Reads `data.len()` bytes from the MRAM-resident journal region
    /// starting at `start_byte`.
    fn read_mram(&mut self, start_byte: u64, data: &mut [u8]) -> Result<()>;
}
