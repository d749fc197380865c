//! Device geometry and derived constants (§6 External Interfaces).
//!
//! The original source keeps these as compile-time `constexpr`s
//! (`commonTypes.hpp`, `config/auto.hpp`); in this port the geometry is a
//! property of the storage medium handed to [`crate::driver::Driver`] at
//! construction time, so we carry it as a plain value computed once, in the
//! same builder idiom the teacher uses for `SystemConfigurationBuilder`.

use crate::error::{PaffsError, Result};

/// Address type packing `(logical_area, page_offset)` — see [`crate::addr::Addr`].
pub type AreaPos = u32;
/// Offset of a page within an area.
pub type PageOffs = u32;
/// Absolute page number across the whole device.
pub type PageAbs = u64;
/// Absolute block number across the whole device.
pub type BlockAbs = u32;
/// Size of a file, in bytes.
pub type FileSize = u32;
/// Unique id of an inode.
pub type InodeNo = u32;

/// Marks an unused page slot together with `logical_area == 0`.
pub const UNUSED_MARKER: PageOffs = 0xFFFF_FFFF;

/// Minimum number of areas kept free of ordinary allocation, reserved so
/// the index area type can always make progress.
pub const MIN_FREE_AREAS: u32 = 1;

/// Device geometry plus every constant derived from it.
///
/// Constructed once via [`ParamsBuilder`] at `format`/`mount` time and
/// shared (by value — it is `Copy`) by every component that needs to turn
/// an `Addr` into a page offset or size a fixed-capacity buffer.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Params {
    /// User-visible bytes per flash page.
    pub data_bytes_per_page: u32,
    /// Out-of-band (spare) bytes per flash page.
    pub oob_bytes_per_page: u32,
    /// Pages per erase block.
    pub pages_per_block: u32,
    /// Total blocks on the device.
    pub blocks_total: u32,
    /// Blocks per area.
    pub blocks_per_area: u32,
    /// Number of jump-pad links in the superblock chain.
    pub jump_pad_no: u32,

    // Derived, filled in by `ParamsBuilder::build`.
    total_bytes_per_page: u32,
    areas_no: u32,
    total_pages_per_area: u32,
    oob_pages_per_area: u32,
    data_pages_per_area: u32,
    area_summary_size: u32,
    super_chain_elems: u32,
    addrs_per_page: u32,
}

impl Params {
    /// User-visible bytes per flash page. Same value as the public field;
    /// provided so call sites that already use `()` accessors for the
    /// derived fields below don't need to special-case the raw ones.
    pub fn data_bytes_per_page(&self) -> u32 {
        self.data_bytes_per_page
    }
    /// Pages per erase block. See [`Params::data_bytes_per_page`].
    pub fn pages_per_block(&self) -> u32 {
        self.pages_per_block
    }
    /// Blocks per area. See [`Params::data_bytes_per_page`].
    pub fn blocks_per_area(&self) -> u32 {
        self.blocks_per_area
    }
    /// Total bytes physically occupied by one page (data + OOB).
    pub fn total_bytes_per_page(&self) -> u32 {
        self.total_bytes_per_page
    }
    /// Number of areas the device is partitioned into.
    pub fn areas_no(&self) -> u32 {
        self.areas_no
    }
    /// Pages per area, data and OOB combined.
    pub fn total_pages_per_area(&self) -> u32 {
        self.total_pages_per_area
    }
    /// Pages reserved at the tail of every area for the packed summary.
    pub fn oob_pages_per_area(&self) -> u32 {
        self.oob_pages_per_area
    }
    /// Pages available for user/meta data within one area.
    pub fn data_pages_per_area(&self) -> u32 {
        self.data_pages_per_area
    }
    /// Bytes needed to hold one area's packed summary plus its marker byte.
    pub fn area_summary_size(&self) -> u32 {
        self.area_summary_size
    }
    /// Anchor + jump pads + super index link count.
    pub fn super_chain_elems(&self) -> u32 {
        self.super_chain_elems
    }
    /// How many `Addr` values fit in one data page (indirection fan-out).
    pub fn addrs_per_page(&self) -> u32 {
        self.addrs_per_page
    }
}

/// Builder for [`Params`], mirroring the teacher's
/// `SystemConfigurationBuilder` (`keos::SystemConfigurationBuilder`):
/// collect the externally-supplied knobs, then derive the rest in one place.
#[derive(Debug, Clone, Copy)]
pub struct ParamsBuilder {
    data_bytes_per_page: u32,
    oob_bytes_per_page: u32,
    pages_per_block: u32,
    blocks_total: u32,
    blocks_per_area: u32,
    jump_pad_no: u32,
}

impl Default for ParamsBuilder {
    fn default() -> Self {
        Self {
            data_bytes_per_page: 2048,
            oob_bytes_per_page: 64,
            pages_per_block: 64,
            blocks_total: 512,
            blocks_per_area: 4,
            jump_pad_no: 1,
        }
    }
}

impl ParamsBuilder {
    /// Starts a new builder with the standard parameter set used by the
    /// original test suite (`original_source/src/commonTypes.hpp`'s
    /// `stdParam`-adjacent defaults).
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `dataBytesPerPage`.
    pub fn data_bytes_per_page(mut self, v: u32) -> Self {
        self.data_bytes_per_page = v;
        self
    }
    /// Sets `oobBytesPerPage`.
    pub fn oob_bytes_per_page(mut self, v: u32) -> Self {
        self.oob_bytes_per_page = v;
        self
    }
    /// Sets `pagesPerBlock`.
    pub fn pages_per_block(mut self, v: u32) -> Self {
        self.pages_per_block = v;
        self
    }
    /// Sets `blocksTotal`.
    pub fn blocks_total(mut self, v: u32) -> Self {
        self.blocks_total = v;
        self
    }
    /// Sets `blocksPerArea`.
    pub fn blocks_per_area(mut self, v: u32) -> Self {
        self.blocks_per_area = v;
        self
    }
    /// Sets `jumpPadNo`.
    pub fn jump_pad_no(mut self, v: u32) -> Self {
        self.jump_pad_no = v;
        self
    }

    /// Computes every derived constant, validating the geometry is
    /// internally consistent (non-zero divisors, at least one jump pad
    /// slot, etc.).
    pub fn build(self) -> Result<Params> {
        if self.blocks_per_area == 0 || self.pages_per_block == 0 || self.data_bytes_per_page == 0
        {
            return Err(PaffsError::InvalidInput);
        }
        if self.blocks_total < self.blocks_per_area {
            return Err(PaffsError::InvalidInput);
        }
        let total_bytes_per_page = self.data_bytes_per_page + self.oob_bytes_per_page;
        let areas_no = self.blocks_total / self.blocks_per_area;
        let total_pages_per_area = self.blocks_per_area * self.pages_per_block;
        // minimum one byte with one bit per page in an area, divided by page width.
        let oob_pages_per_area =
            1 + (total_pages_per_area / 8 / self.data_bytes_per_page).max(0);
        let data_pages_per_area = total_pages_per_area
            .checked_sub(oob_pages_per_area)
            .ok_or(PaffsError::InvalidInput)?;
        let area_summary_size = 1 + data_pages_per_area / 8 + 1;
        let super_chain_elems = self.jump_pad_no + 2;
        let addrs_per_page = self.data_bytes_per_page / core::mem::size_of::<u64>() as u32;
        if areas_no == 0 || data_pages_per_area == 0 || addrs_per_page == 0 {
            return Err(PaffsError::InvalidInput);
        }
        Ok(Params {
            data_bytes_per_page: self.data_bytes_per_page,
            oob_bytes_per_page: self.oob_bytes_per_page,
            pages_per_block: self.pages_per_block,
            blocks_total: self.blocks_total,
            blocks_per_area: self.blocks_per_area,
            jump_pad_no: self.jump_pad_no,
            total_bytes_per_page,
            areas_no,
            total_pages_per_area,
            oob_pages_per_area,
            data_pages_per_area,
            area_summary_size,
            super_chain_elems,
            addrs_per_page,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_consistent_geometry() {
        let p = ParamsBuilder::new()
            .data_bytes_per_page(512)
            .oob_bytes_per_page(16)
            .pages_per_block(8)
            .blocks_total(64)
            .blocks_per_area(4)
            .jump_pad_no(1)
            .build()
            .unwrap();
        assert_eq!(p.areas_no(), 16);
        assert_eq!(p.total_pages_per_area(), 32);
        assert_eq!(p.super_chain_elems(), 3);
        assert_eq!(p.addrs_per_page(), 64);
    }

    #[test]
    fn rejects_zero_blocks_per_area() {
        assert_eq!(
            ParamsBuilder::new().blocks_per_area(0).build(),
            Err(PaffsError::InvalidInput)
        );
    }
}
