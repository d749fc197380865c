//! Tree node shapes shared by the tree cache (§4.E) and the B⁺-tree (§4.F).
//!
//! Ported from `original_source/src/treeTypes.hpp`'s `TreeNode`/
//! `TreeCacheNode`. The original's `union As { Branch; Leaf; }` becomes a
//! plain Rust enum (no active-variant bookkeeping needed, the compiler does
//! it); the original's raw `TreeCacheNode*` parent/child pointers become
//! `u16` arena indices into [`crate::tree_cache::TreeCache`]'s backing
//! `Vec`, per the spec's own design notes (§9 "Parent pointers").

use crate::addr::Addr;
use crate::config::{InodeNo, Params};
use crate::types::Inode;

/// Number of `InodeNo`+`Addr` or `InodeNo`+`Inode` pairs one page can hold,
/// ported from `treeTypes.hpp`'s `branchOrder`/`leafOrder` constexprs. Those
/// were compile-time in the original because `dataBytesPerPage` was a
/// template constant; here `Params` is a mount-time value, so the orders are
/// derived once from it instead.
pub fn leaf_order(params: &Params) -> usize {
    let avail = (params.data_bytes_per_page() as usize).saturating_sub(header_bytes());
    (avail / (core::mem::size_of::<InodeNo>() + core::mem::size_of::<Inode>())).max(2)
}

/// See [`leaf_order`].
pub fn branch_order(params: &Params) -> usize {
    let avail = (params.data_bytes_per_page() as usize).saturating_sub(header_bytes());
    (avail / (core::mem::size_of::<InodeNo>() + core::mem::size_of::<u64>())).max(3)
}

fn header_bytes() -> usize {
    // self: Addr (as a raw u64 on flash) + isLeaf: bool + keys: u16
    core::mem::size_of::<u64>() + 1 + 2
}

/// The two possible shapes a tree node's payload can take.
#[derive(Debug, Clone)]
pub enum TreeNodeData {
    Leaf {
        keys: Vec<InodeNo>,
        inodes: Vec<Inode>,
    },
    Branch {
        keys: Vec<InodeNo>,
        pointers: Vec<Option<Addr>>,
    },
}

impl TreeNodeData {
    pub fn is_leaf(&self) -> bool {
        matches!(self, TreeNodeData::Leaf { .. })
    }

    pub fn num_keys(&self) -> usize {
        match self {
            TreeNodeData::Leaf { keys, .. } => keys.len(),
            TreeNodeData::Branch { keys, .. } => keys.len(),
        }
    }

    pub fn keys(&self) -> &[InodeNo] {
        match self {
            TreeNodeData::Leaf { keys, .. } => keys,
            TreeNodeData::Branch { keys, .. } => keys,
        }
    }
}

/// One on-flash tree node. Ported from `treeTypes.hpp`'s `TreeNode`: `self`
/// is `None` until the node has actually been written, mirroring the
/// original's "if '0', it is not committed yet" comment.
#[derive(Debug, Clone)]
pub struct TreeNode {
    pub self_addr: Option<Addr>,
    pub data: TreeNodeData,
}

impl TreeNode {
    pub fn new_leaf() -> Self {
        Self {
            self_addr: None,
            data: TreeNodeData::Leaf {
                keys: Vec::new(),
                inodes: Vec::new(),
            },
        }
    }

    pub fn new_branch() -> Self {
        Self {
            self_addr: None,
            data: TreeNodeData::Branch {
                keys: Vec::new(),
                pointers: Vec::new(),
            },
        }
    }
}

/// Sentinel meaning "this cache slot is the root" for `parent`: ported from
/// the original's self-loop (`root.parent == &root`).
pub type CacheIndex = u16;

/// One resident tree node plus cache bookkeeping. Ported from
/// `treeTypes.hpp`'s `TreeCacheNode`.
#[derive(Debug, Clone)]
pub struct TreeCacheNode {
    pub raw: TreeNode,
    /// Index of the parent slot; equal to this node's own slot index if it
    /// is the root (mirrors the original's self-loop).
    pub parent: CacheIndex,
    /// Children, indexed by branch position. `None` where not yet resident.
    /// Always empty for leaf nodes.
    pub pointers: Vec<Option<CacheIndex>>,
    pub dirty: bool,
    pub locked: bool,
    pub inherited_lock: bool,
}

impl TreeCacheNode {
    pub fn new(raw: TreeNode, parent: CacheIndex, branch_order: usize) -> Self {
        let pointers = if raw.data.is_leaf() {
            Vec::new()
        } else {
            vec![None; branch_order]
        };
        Self {
            raw,
            parent,
            pointers,
            dirty: false,
            locked: false,
            inherited_lock: false,
        }
    }
}
