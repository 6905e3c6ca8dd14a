//! Data model: typed fields, containers and their split/merge rules.

pub mod block;
pub mod container;
pub mod field;
pub mod morton;
pub mod msgtools;
pub mod payload;
pub mod policy;

pub use block::{BBox, Block, Extents};
pub use container::{Container, DataField};
pub use field::Field;
pub use morton::{morton_decode, morton_encode};
pub use payload::{Element, Payload, Scalar};
pub use policy::{Flags, MergePolicy, Scope, SplitPolicy};
