//! Per-field metadata: role flags, scope, split and merge policies.
//!
//! The numeric values are part of the public contract; they match the values
//! used by the workflow description files.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Role flags of a field (bitset).
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Flags(pub u32);

impl Flags {
    pub const NOFLAG: Flags = Flags(0);
    /// The field defines the item count of the container.
    pub const NBITEM: Flags = Flags(1);
    /// 3-float positions used as spatial key.
    pub const ZCURVEKEY: Flags = Flags(2);
    /// Morton-encoded cell index.
    pub const ZCURVEINDEX: Flags = Flags(4);

    pub fn contains(self, other: Flags) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for Flags {
    type Output = Flags;
    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

/// Scope of a field inside a container.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scope {
    /// Same value on every rank; only taken into account for item counts when
    /// it holds more than one item.
    Shared = 0,
    /// Rank-local data, split item-wise.
    #[default]
    Private = 1,
    /// Control data, cloned verbatim into every chunk.
    System = 2,
}

/// How a field is cut into per-destination chunks.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SplitPolicy {
    #[default]
    Default = 0,
    /// Every chunk gets the whole value.
    KeepValue = 1,
    /// Simple integers: every chunk gets its own item count.
    MinusNbItem = 2,
    Segmented = 4,
}

/// How two chunks of a field are combined on arrival.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MergePolicy {
    #[default]
    Default = 0,
    FirstValue = 1,
    AddValue = 2,
    AppendValues = 4,
    /// 6-float boxes `[min xyz, max xyz]` folded into their union.
    BBoxPos = 8,
}

impl fmt::Display for SplitPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SplitPolicy::Default => "SPLIT_DEFAULT",
            SplitPolicy::KeepValue => "SPLIT_KEEP_VALUE",
            SplitPolicy::MinusNbItem => "SPLIT_MINUS_NBITEM",
            SplitPolicy::Segmented => "SPLIT_SEGMENTED",
        };
        f.write_str(s)
    }
}

impl fmt::Display for MergePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MergePolicy::Default => "MERGE_DEFAULT",
            MergePolicy::FirstValue => "MERGE_FIRST_VALUE",
            MergePolicy::AddValue => "MERGE_ADD_VALUE",
            MergePolicy::AppendValues => "MERGE_APPEND_VALUES",
            MergePolicy::BBoxPos => "MERGE_BBOX_POS",
        };
        f.write_str(s)
    }
}
