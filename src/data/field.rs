//! Polymorphic leaf value of a container.
//!
//! A [`Field`] knows how many items it holds, how to cut itself into
//! chunks and how to merge a chunk back, so the redistribution code never
//! needs to know its element type.
//!
//! | variant  | items                       | split            | merge                        |
//! |----------|-----------------------------|------------------|------------------------------|
//! | `Simple` | 1                           | duplicate        | equal / first / add          |
//! | `Array`  | `len / element_per_items`   | windows, runs    | append / first / bbox        |
//! | `Vector` | `len / element_per_items`   | windows, runs    | append / first / bbox        |
//! | `Block`  | 1                           | block overlap    | union / first                |

use crate::data::block::Block;
use crate::data::payload::{Element, Payload, Scalar, type_mismatch};
use crate::data::policy::{MergePolicy, SplitPolicy};
use crate::redist_error::RedistError;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Field {
    Simple(Scalar),
    /// Shared buffer; `KEEP_VALUE` splits hand out views of the same `Arc`.
    Array {
        values: Arc<Payload>,
        element_per_items: usize,
    },
    Vector {
        values: Payload,
        element_per_items: usize,
    },
    Block(Box<Block>),
}

impl Field {
    pub fn simple<T: Element>(value: T) -> Self {
        Field::Simple(value.into_scalar())
    }

    /// `element_per_items` is raised to 1 when given as 0. The payload
    /// length must be a multiple of it; containers reject fields that are
    /// not (see [`is_well_shaped`](Self::is_well_shaped)).
    pub fn array<T: Element>(values: Vec<T>, element_per_items: usize) -> Self {
        Field::Array {
            values: Arc::new(T::into_payload(values)),
            element_per_items: element_per_items.max(1),
        }
    }

    pub fn shared_array(values: Arc<Payload>, element_per_items: usize) -> Self {
        Field::Array {
            values,
            element_per_items: element_per_items.max(1),
        }
    }

    pub fn vector<T: Element>(values: Vec<T>, element_per_items: usize) -> Self {
        Field::Vector {
            values: T::into_payload(values),
            element_per_items: element_per_items.max(1),
        }
    }

    pub fn block(block: Block) -> Self {
        Field::Block(Box::new(block))
    }

    pub fn variant_name(&self) -> &'static str {
        match self {
            Field::Simple(_) => "Simple",
            Field::Array { .. } => "Array",
            Field::Vector { .. } => "Vector",
            Field::Block(_) => "Block",
        }
    }

    /// `Array<f32>`, `Simple<i32>`, `Block`.
    pub fn type_name(&self) -> String {
        match self {
            Field::Simple(s) => format!("Simple<{}>", s.type_name()),
            Field::Array { values, .. } => format!("Array<{}>", values.type_name()),
            Field::Vector { values, .. } => format!("Vector<{}>", values.type_name()),
            Field::Block(_) => "Block".to_string(),
        }
    }

    pub fn payload(&self) -> Option<&Payload> {
        match self {
            Field::Array { values, .. } => Some(values),
            Field::Vector { values, .. } => Some(values),
            _ => None,
        }
    }

    pub fn element_per_items(&self) -> usize {
        match self {
            Field::Array {
                element_per_items, ..
            }
            | Field::Vector {
                element_per_items, ..
            } => *element_per_items,
            _ => 1,
        }
    }

    pub fn as_simple<T: Element>(&self) -> Option<&T> {
        match self {
            Field::Simple(s) => T::scalar(s),
            _ => None,
        }
    }

    pub fn values<T: Element>(&self) -> Option<&[T]> {
        self.payload().and_then(T::slice)
    }

    pub fn as_block(&self) -> Option<&Block> {
        match self {
            Field::Block(b) => Some(b),
            _ => None,
        }
    }

    pub fn is_block_splitable(&self) -> bool {
        matches!(self, Field::Block(_))
    }

    /// Whether the field takes part in item arithmetic.
    pub fn is_countable(&self) -> bool {
        !matches!(self, Field::Block(_))
    }

    pub fn nb_items(&self) -> usize {
        match self {
            Field::Simple(_) | Field::Block(_) => 1,
            Field::Array {
                values,
                element_per_items,
            } => values.len() / element_per_items,
            Field::Vector {
                values,
                element_per_items,
            } => values.len() / element_per_items,
        }
    }

    /// Payload length is a whole number of items.
    pub fn is_well_shaped(&self) -> bool {
        self.payload()
            .is_none_or(|p| p.len() % self.element_per_items() == 0)
    }

    pub(crate) fn shape_error(&self, name: &str) -> RedistError {
        RedistError::ShapeMismatch {
            name: name.to_string(),
            len: self.payload().map_or(0, Payload::len),
            element_per_items: self.element_per_items(),
        }
    }

    fn check_shape(&self) -> Result<(), RedistError> {
        if self.is_well_shaped() {
            return Ok(());
        }
        log::error!(
            "{} of {} elements is not a whole number of {}-element items",
            self.type_name(),
            self.payload().map_or(0, Payload::len),
            self.element_per_items()
        );
        Err(self.shape_error(&self.type_name()))
    }

    /// Same variant, same element type, same item stride.
    pub fn can_merge(&self, other: &Field) -> bool {
        let same_stride = self.element_per_items() == other.element_per_items();
        match (self, other) {
            (Field::Simple(a), Field::Simple(b)) => a.same_type(b),
            (Field::Array { values: a, .. }, Field::Array { values: b, .. }) => {
                a.same_type(b) && same_stride
            }
            (Field::Vector { values: a, .. }, Field::Vector { values: b, .. }) => {
                a.same_type(b) && same_stride
            }
            (Field::Block(_), Field::Block(_)) => true,
            _ => false,
        }
    }

    /// Keep the schema, drop the values. Simple and Block values are kept.
    pub fn soft_clean(&mut self) {
        match self {
            Field::Array { values, .. } => *values = Arc::new(values.empty_like()),
            Field::Vector { values, .. } => values.clear(),
            Field::Simple(_) | Field::Block(_) => {}
        }
    }

    fn with_payload(&self, p: Payload) -> Field {
        match self {
            Field::Array {
                element_per_items, ..
            } => Field::Array {
                values: Arc::new(p),
                element_per_items: *element_per_items,
            },
            Field::Vector {
                element_per_items, ..
            } => Field::Vector {
                values: p,
                element_per_items: *element_per_items,
            },
            other => other.clone(),
        }
    }

    /// Split into `counts.len()` chunks of `counts[i]` consecutive items.
    pub fn split_counts(
        &self,
        counts: &[usize],
        policy: SplitPolicy,
    ) -> Result<Vec<Field>, RedistError> {
        if policy == SplitPolicy::KeepValue {
            return Ok(vec![self.clone(); counts.len()]);
        }
        match self {
            Field::Simple(s) => split_simple(s, counts.iter().copied(), policy),
            Field::Block(_) => Ok(vec![self.clone(); counts.len()]),
            Field::Array {
                values,
                element_per_items,
            } => self.split_windows(values, *element_per_items, counts),
            Field::Vector {
                values,
                element_per_items,
            } => self.split_windows(values, *element_per_items, counts),
        }
    }

    fn split_windows(
        &self,
        values: &Payload,
        epi: usize,
        counts: &[usize],
    ) -> Result<Vec<Field>, RedistError> {
        self.check_shape()?;
        let total: usize = counts.iter().sum();
        if total != self.nb_items() {
            log::error!(
                "split of {} requested {} items but the field holds {}",
                self.type_name(),
                total,
                self.nb_items()
            );
            return Err(RedistError::RangeMismatch {
                expected: self.nb_items(),
                got: total,
            });
        }
        let mut start = 0;
        let mut out = Vec::with_capacity(counts.len());
        for &c in counts {
            let run = start * epi..(start + c) * epi;
            out.push(self.with_payload(values.gather(std::slice::from_ref(&run))));
            start += c;
        }
        Ok(out)
    }

    /// Split into chunks made of item runs. Runs may overlap across chunks.
    pub fn split_segments(
        &self,
        segments: &[Vec<Range<usize>>],
        policy: SplitPolicy,
    ) -> Result<Vec<Field>, RedistError> {
        if policy == SplitPolicy::KeepValue {
            return Ok(vec![self.clone(); segments.len()]);
        }
        let lens = segments
            .iter()
            .map(|runs| runs.iter().map(|r| r.len()).sum::<usize>());
        match self {
            Field::Simple(s) => split_simple(s, lens, policy),
            Field::Block(_) => Ok(vec![self.clone(); segments.len()]),
            Field::Array {
                values,
                element_per_items,
            } => self.split_runs(values, *element_per_items, segments),
            Field::Vector {
                values,
                element_per_items,
            } => self.split_runs(values, *element_per_items, segments),
        }
    }

    fn split_runs(
        &self,
        values: &Payload,
        epi: usize,
        segments: &[Vec<Range<usize>>],
    ) -> Result<Vec<Field>, RedistError> {
        self.check_shape()?;
        let n = self.nb_items();
        if let Some(bad) = segments.iter().flatten().find(|r| r.end > n) {
            log::error!("segment {bad:?} out of bounds for {} items", n);
            return Err(RedistError::RangeMismatch {
                expected: n,
                got: bad.end,
            });
        }
        Ok(segments
            .iter()
            .map(|runs| {
                let elems: Vec<Range<usize>> =
                    runs.iter().map(|r| r.start * epi..r.end * epi).collect();
                self.with_payload(values.gather(&elems))
            })
            .collect())
    }

    /// Block fields only: one overlap per target block.
    pub fn split_blocks(
        &self,
        blocks: &[Block],
        policy: SplitPolicy,
    ) -> Result<Vec<Field>, RedistError> {
        match (self, policy) {
            (_, SplitPolicy::KeepValue) => Ok(vec![self.clone(); blocks.len()]),
            (Field::Block(b), SplitPolicy::Default) => Ok(blocks
                .iter()
                .map(|t| Field::block(b.overlap(t)))
                .collect()),
            _ => Err(RedistError::PolicyUnsupported {
                policy: policy.to_string(),
                field: format!("block split of {}", self.type_name()),
            }),
        }
    }

    /// Merge `other` into `self` under `policy`. On error `self` is unchanged.
    pub fn merge(&mut self, other: &Field, policy: MergePolicy) -> Result<(), RedistError> {
        if !self.can_merge(other) {
            log::error!(
                "cannot merge {} into {}",
                other.type_name(),
                self.type_name()
            );
            return Err(type_mismatch(&self.type_name(), &other.type_name()));
        }
        if policy == MergePolicy::FirstValue {
            return Ok(());
        }
        let field = self.type_name();
        let unsupported = move || {
            log::error!("{policy} is not supported by {field}");
            RedistError::PolicyUnsupported {
                policy: policy.to_string(),
                field,
            }
        };
        match (self, other) {
            (Field::Simple(a), Field::Simple(b)) => match policy {
                MergePolicy::Default => {
                    if a != b {
                        log::error!("DEFAULT merge of different simple values {a:?} and {b:?}");
                        return Err(RedistError::MergeValueMismatch(format!("{a:?} != {b:?}")));
                    }
                    Ok(())
                }
                MergePolicy::AddValue => a.add_assign(b),
                _ => Err(unsupported()),
            },
            (Field::Array { values: a, .. }, Field::Array { values: b, .. }) => match policy {
                MergePolicy::Default | MergePolicy::AppendValues => {
                    Arc::make_mut(a).append(b)
                }
                MergePolicy::BBoxPos => Arc::make_mut(a).merge_bbox(b),
                _ => Err(unsupported()),
            },
            (Field::Vector { values: a, .. }, Field::Vector { values: b, .. }) => match policy {
                MergePolicy::Default | MergePolicy::AppendValues => a.append(b),
                MergePolicy::BBoxPos => a.merge_bbox(b),
                _ => Err(unsupported()),
            },
            (Field::Block(a), Field::Block(b)) => match policy {
                MergePolicy::Default => {
                    a.make_union(b);
                    Ok(())
                }
                _ => Err(unsupported()),
            },
            _ => Err(unsupported()),
        }
    }

    /// Merge several chunks at once; appends reserve the final size first.
    /// A chunk that fails to merge is skipped and the first error returned.
    pub fn merge_many(&mut self, others: &[&Field], policy: MergePolicy) -> Result<(), RedistError> {
        if matches!(policy, MergePolicy::Default | MergePolicy::AppendValues) {
            let extra: usize = others
                .iter()
                .filter_map(|f| f.payload())
                .map(Payload::len)
                .sum();
            match self {
                Field::Array { values, .. } => Arc::make_mut(values).reserve(extra),
                Field::Vector { values, .. } => values.reserve(extra),
                _ => {}
            }
        }
        let mut first_err = None;
        for other in others {
            if let Err(e) = self.merge(other, policy) {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

fn split_simple(
    s: &Scalar,
    lens: impl Iterator<Item = usize>,
    policy: SplitPolicy,
) -> Result<Vec<Field>, RedistError> {
    match policy {
        SplitPolicy::MinusNbItem => lens
            .map(|n| s.with_count(n).map(Field::Simple))
            .collect(),
        _ => Ok(lens.map(|_| Field::Simple(s.clone())).collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::block::{BBox, Extents};

    #[test]
    fn array_counts_and_windows() {
        let f = Field::array(vec![0.0f32, 0.1, 1.0, 1.1, 2.0, 2.1], 2);
        assert_eq!(f.nb_items(), 3);
        let parts = f.split_counts(&[1, 2], SplitPolicy::Default).unwrap();
        assert_eq!(parts[0].values::<f32>().unwrap(), &[0.0, 0.1]);
        assert_eq!(parts[1].values::<f32>().unwrap(), &[1.0, 1.1, 2.0, 2.1]);
        assert!(matches!(
            f.split_counts(&[1, 1], SplitPolicy::Default),
            Err(RedistError::RangeMismatch { expected: 3, got: 2 })
        ));
    }

    #[test]
    fn partial_items_are_rejected() {
        let f = Field::array(vec![1i32, 2, 3], 2);
        assert!(!f.is_well_shaped());
        assert!(matches!(
            f.split_counts(&[1], SplitPolicy::Default),
            Err(RedistError::ShapeMismatch { len: 3, element_per_items: 2, .. })
        ));
        assert!(f.split_segments(&[vec![0..1]], SplitPolicy::Default).is_err());
        assert!(Field::vector(vec![1u8, 2], 2).is_well_shaped());
        assert!(Field::simple(1i32).is_well_shaped());
    }

    #[test]
    fn merge_requires_the_same_stride() {
        let mut a = Field::array(vec![1i32, 2], 2);
        let b = Field::array(vec![7i32, 8, 9], 3);
        assert!(!a.can_merge(&b));
        assert!(matches!(
            a.merge(&b, MergePolicy::AppendValues),
            Err(RedistError::TypeMismatch { .. })
        ));
        assert_eq!(a.values::<i32>().unwrap(), &[1, 2]);
        a.merge(&Field::array(vec![3i32, 4], 2), MergePolicy::AppendValues)
            .unwrap();
        assert_eq!(a.nb_items(), 2);
    }

    #[test]
    fn keep_value_shares_the_buffer() {
        let f = Field::array(vec![1u64; 64], 1);
        let parts = f.split_counts(&[10, 54], SplitPolicy::KeepValue).unwrap();
        match (&f, &parts[1]) {
            (Field::Array { values: a, .. }, Field::Array { values: b, .. }) => {
                assert!(Arc::ptr_eq(a, b))
            }
            _ => panic!("expected arrays"),
        }
    }

    #[test]
    fn segments_gather_runs() {
        let f = Field::vector(vec![10i32, 11, 12, 13, 14], 1);
        let parts = f
            .split_segments(&[vec![0..1, 3..5], vec![], vec![1..3]], SplitPolicy::Default)
            .unwrap();
        assert_eq!(parts[0].values::<i32>().unwrap(), &[10, 13, 14]);
        assert_eq!(parts[1].nb_items(), 0);
        assert_eq!(parts[2].values::<i32>().unwrap(), &[11, 12]);
    }

    #[test]
    fn simple_split_policies() {
        let f = Field::simple(42i32);
        let dup = f.split_counts(&[3, 4], SplitPolicy::Default).unwrap();
        assert!(dup.iter().all(|p| p.as_simple::<i32>() == Some(&42)));
        let cnt = f.split_counts(&[3, 4], SplitPolicy::MinusNbItem).unwrap();
        assert_eq!(cnt[0].as_simple::<i32>(), Some(&3));
        assert_eq!(cnt[1].as_simple::<i32>(), Some(&4));
    }

    #[test]
    fn simple_merge_policies() {
        let mut a = Field::simple(5i32);
        a.merge(&Field::simple(5i32), MergePolicy::Default).unwrap();
        assert!(matches!(
            a.merge(&Field::simple(6i32), MergePolicy::Default),
            Err(RedistError::MergeValueMismatch(_))
        ));
        a.merge(&Field::simple(6i32), MergePolicy::FirstValue).unwrap();
        assert_eq!(a.as_simple::<i32>(), Some(&5));
        a.merge(&Field::simple(6i32), MergePolicy::AddValue).unwrap();
        assert_eq!(a.as_simple::<i32>(), Some(&11));
        assert!(a.merge(&Field::simple(1i32), MergePolicy::BBoxPos).is_err());
    }

    #[test]
    fn add_value_overflow_keeps_the_value() {
        let mut a = Field::simple(i32::MAX);
        assert!(matches!(
            a.merge(&Field::simple(1i32), MergePolicy::AddValue),
            Err(RedistError::Overflow(_))
        ));
        assert_eq!(a.as_simple::<i32>(), Some(&i32::MAX));
    }

    #[test]
    fn merge_type_mismatch_keeps_state() {
        let mut a = Field::vector(vec![1i32, 2], 1);
        let err = a
            .merge(&Field::vector(vec![1.0f32], 1), MergePolicy::AppendValues)
            .unwrap_err();
        assert!(matches!(err, RedistError::TypeMismatch { .. }));
        assert_eq!(a.values::<i32>().unwrap(), &[1, 2]);
        assert!(!a.can_merge(&Field::array(vec![1i32], 1)));
    }

    #[test]
    fn merge_many_appends_in_order() {
        let mut a = Field::array(vec![1u8], 1);
        let b = Field::array(vec![2u8, 3], 1);
        let c = Field::array(vec![4u8], 1);
        a.merge_many(&[&b, &c], MergePolicy::AppendValues).unwrap();
        assert_eq!(a.values::<u8>().unwrap(), &[1, 2, 3, 4]);
    }

    #[test]
    fn block_split_and_union() {
        let dom = Block::domain(
            BBox::new([0.0; 3], [4.0; 3]),
            Extents::new([0; 3], [4; 3]),
            1.0,
        );
        let mut left = dom.clone();
        left.local_extents = Some(Extents::new([0; 3], [2, 4, 4]));
        left.update_extents();
        let mut right = dom.clone();
        right.local_extents = Some(Extents::new([2, 0, 0], [2, 4, 4]));
        right.update_extents();

        let f = Field::block(dom);
        let parts = f
            .split_blocks(&[left.clone(), right.clone()], SplitPolicy::Default)
            .unwrap();
        assert_eq!(parts[0].as_block().unwrap().local_extents, left.local_extents);
        assert_eq!(parts[1].as_block().unwrap().local_extents, right.local_extents);

        let mut merged = parts[0].clone();
        merged.merge(&parts[1], MergePolicy::Default).unwrap();
        assert_eq!(
            merged.as_block().unwrap().local_extents,
            Some(Extents::new([0; 3], [4; 3]))
        );
        assert!(
            Field::simple(1i32)
                .split_blocks(&[left], SplitPolicy::Default)
                .is_err()
        );
    }
}
