//! Typed storage behind fields: a closed set of element types.
//!
//! [`Payload`] holds a flat buffer of one element type, [`Scalar`] a single
//! value. The [`Element`] trait gives typed access to both for the
//! supported element types (`i32, u32, i64, u64, f32, f64, u8, String`).

use crate::redist_error::RedistError;
use num_traits::{CheckedAdd, Float, NumCast};
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Flat buffer of elements of one type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    I32(Vec<i32>),
    U32(Vec<u32>),
    I64(Vec<i64>),
    U64(Vec<u64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
    U8(Vec<u8>),
    Str(Vec<String>),
}

/// Single value of one of the element types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Scalar {
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    U8(u8),
    Str(String),
}

/// Apply `$body` to the inner vector of a payload and rewrap the result in
/// the same variant.
macro_rules! map_payload {
    ($value:expr, |$v:ident| $body:expr) => {
        match $value {
            Payload::I32($v) => Payload::I32($body),
            Payload::U32($v) => Payload::U32($body),
            Payload::I64($v) => Payload::I64($body),
            Payload::U64($v) => Payload::U64($body),
            Payload::F32($v) => Payload::F32($body),
            Payload::F64($v) => Payload::F64($body),
            Payload::U8($v) => Payload::U8($body),
            Payload::Str($v) => Payload::Str($body),
        }
    };
}

/// Apply `$body` to the inner vector of a payload.
macro_rules! with_payload {
    ($value:expr, |$v:ident| $body:expr) => {
        match $value {
            Payload::I32($v) => $body,
            Payload::U32($v) => $body,
            Payload::I64($v) => $body,
            Payload::U64($v) => $body,
            Payload::F32($v) => $body,
            Payload::F64($v) => $body,
            Payload::U8($v) => $body,
            Payload::Str($v) => $body,
        }
    };
}

fn gather_runs<T: Clone>(v: &[T], runs: &[Range<usize>]) -> Vec<T> {
    let total = runs.iter().map(|r| r.len()).sum();
    let mut out = Vec::with_capacity(total);
    for r in runs {
        out.extend_from_slice(&v[r.clone()]);
    }
    out
}

fn fold_bbox<T: Float>(a: &mut [T], b: &[T]) {
    for i in 0..3 {
        a[i] = a[i].min(b[i]);
        a[i + 3] = a[i + 3].max(b[i + 3]);
    }
}

impl Payload {
    pub fn len(&self) -> usize {
        with_payload!(self, |v| v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Payload::I32(_) => "i32",
            Payload::U32(_) => "u32",
            Payload::I64(_) => "i64",
            Payload::U64(_) => "u64",
            Payload::F32(_) => "f32",
            Payload::F64(_) => "f64",
            Payload::U8(_) => "u8",
            Payload::Str(_) => "String",
        }
    }

    /// Same element type, no elements.
    pub fn empty_like(&self) -> Payload {
        map_payload!(self, |_v| Vec::new())
    }

    /// Concatenate the element runs `runs` (element indices) into a new buffer.
    pub fn gather(&self, runs: &[Range<usize>]) -> Payload {
        map_payload!(self, |v| gather_runs(v, runs))
    }

    pub fn same_type(&self, other: &Payload) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }

    pub fn reserve(&mut self, additional: usize) {
        with_payload!(self, |v| v.reserve(additional))
    }

    pub fn clear(&mut self) {
        with_payload!(self, |v| v.clear())
    }

    /// Append the elements of `other`; both buffers must share the element type.
    pub fn append(&mut self, other: &Payload) -> Result<(), RedistError> {
        match (self, other) {
            (Payload::I32(a), Payload::I32(b)) => a.extend_from_slice(b),
            (Payload::U32(a), Payload::U32(b)) => a.extend_from_slice(b),
            (Payload::I64(a), Payload::I64(b)) => a.extend_from_slice(b),
            (Payload::U64(a), Payload::U64(b)) => a.extend_from_slice(b),
            (Payload::F32(a), Payload::F32(b)) => a.extend_from_slice(b),
            (Payload::F64(a), Payload::F64(b)) => a.extend_from_slice(b),
            (Payload::U8(a), Payload::U8(b)) => a.extend_from_slice(b),
            (Payload::Str(a), Payload::Str(b)) => a.extend_from_slice(b),
            (a, b) => return Err(type_mismatch(a.type_name(), b.type_name())),
        }
        Ok(())
    }

    /// Fold two `[min xyz, max xyz]` boxes into their union.
    pub fn merge_bbox(&mut self, other: &Payload) -> Result<(), RedistError> {
        if self.len() != 6 || other.len() != 6 {
            return Err(RedistError::PolicyUnsupported {
                policy: "MERGE_BBOX_POS".into(),
                field: format!("buffers of {} and {} elements", self.len(), other.len()),
            });
        }
        match (self, other) {
            (Payload::F32(a), Payload::F32(b)) => fold_bbox(a, b),
            (Payload::F64(a), Payload::F64(b)) => fold_bbox(a, b),
            (a, b) if a.same_type(b) => {
                return Err(RedistError::PolicyUnsupported {
                    policy: "MERGE_BBOX_POS".into(),
                    field: format!("{} buffer", a.type_name()),
                });
            }
            (a, b) => return Err(type_mismatch(a.type_name(), b.type_name())),
        }
        Ok(())
    }
}

pub(crate) fn type_mismatch(expected: &str, got: &str) -> RedistError {
    RedistError::TypeMismatch {
        expected: expected.to_string(),
        got: got.to_string(),
    }
}

fn add<T: Float>(a: T, b: T) -> T {
    a + b
}

fn checked_add<T: CheckedAdd + std::fmt::Debug>(a: T, b: T) -> Result<T, RedistError> {
    a.checked_add(&b).ok_or_else(|| {
        log::error!("ADD_VALUE merge overflows: {a:?} + {b:?}");
        RedistError::Overflow(format!("{a:?} + {b:?}"))
    })
}

fn from_count<T: NumCast>(n: usize) -> Option<T> {
    T::from(n)
}

impl Scalar {
    pub fn type_name(&self) -> &'static str {
        match self {
            Scalar::I32(_) => "i32",
            Scalar::U32(_) => "u32",
            Scalar::I64(_) => "i64",
            Scalar::U64(_) => "u64",
            Scalar::F32(_) => "f32",
            Scalar::F64(_) => "f64",
            Scalar::U8(_) => "u8",
            Scalar::Str(_) => "String",
        }
    }

    pub fn same_type(&self, other: &Scalar) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }

    /// Arithmetic sum; strings are not arithmetic. Integer overflow is an
    /// error and leaves `self` unchanged.
    pub fn add_assign(&mut self, other: &Scalar) -> Result<(), RedistError> {
        match (self, other) {
            (Scalar::I32(a), Scalar::I32(b)) => *a = checked_add(*a, *b)?,
            (Scalar::U32(a), Scalar::U32(b)) => *a = checked_add(*a, *b)?,
            (Scalar::I64(a), Scalar::I64(b)) => *a = checked_add(*a, *b)?,
            (Scalar::U64(a), Scalar::U64(b)) => *a = checked_add(*a, *b)?,
            (Scalar::F32(a), Scalar::F32(b)) => *a = add(*a, *b),
            (Scalar::F64(a), Scalar::F64(b)) => *a = add(*a, *b),
            (Scalar::U8(a), Scalar::U8(b)) => *a = checked_add(*a, *b)?,
            (Scalar::Str(_), Scalar::Str(_)) => {
                return Err(RedistError::PolicyUnsupported {
                    policy: "MERGE_ADD_VALUE".into(),
                    field: "simple String".into(),
                });
            }
            (a, b) => return Err(type_mismatch(a.type_name(), b.type_name())),
        }
        Ok(())
    }

    /// Same type, value replaced by an item count.
    pub fn with_count(&self, n: usize) -> Result<Scalar, RedistError> {
        let out = match self {
            Scalar::I32(_) => from_count(n).map(Scalar::I32),
            Scalar::U32(_) => from_count(n).map(Scalar::U32),
            Scalar::I64(_) => from_count(n).map(Scalar::I64),
            Scalar::U64(_) => from_count(n).map(Scalar::U64),
            Scalar::U8(_) => from_count(n).map(Scalar::U8),
            Scalar::F32(_) | Scalar::F64(_) | Scalar::Str(_) => None,
        };
        out.ok_or_else(|| RedistError::PolicyUnsupported {
            policy: "SPLIT_MINUS_NBITEM".into(),
            field: format!("simple {} with {n} items", self.type_name()),
        })
    }
}

/// Element types a field can hold.
pub trait Element: Clone + PartialEq + std::fmt::Debug + Send + Sync + 'static {
    fn into_payload(v: Vec<Self>) -> Payload;
    fn slice(p: &Payload) -> Option<&[Self]>;
    fn into_scalar(self) -> Scalar;
    fn scalar(s: &Scalar) -> Option<&Self>;
}

macro_rules! impl_element {
    ($t:ty, $variant:ident) => {
        impl Element for $t {
            fn into_payload(v: Vec<Self>) -> Payload {
                Payload::$variant(v)
            }
            fn slice(p: &Payload) -> Option<&[Self]> {
                match p {
                    Payload::$variant(v) => Some(v),
                    _ => None,
                }
            }
            fn into_scalar(self) -> Scalar {
                Scalar::$variant(self)
            }
            fn scalar(s: &Scalar) -> Option<&Self> {
                match s {
                    Scalar::$variant(v) => Some(v),
                    _ => None,
                }
            }
        }
    };
}

impl_element!(i32, I32);
impl_element!(u32, U32);
impl_element!(i64, I64);
impl_element!(u64, U64);
impl_element!(f32, F32);
impl_element!(f64, F64);
impl_element!(u8, U8);
impl_element!(String, Str);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gather_concatenates_runs() {
        let p = Payload::I32(vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(p.gather(&[4..6, 0..2]), Payload::I32(vec![4, 5, 0, 1]));
        assert_eq!(p.gather(&[]), Payload::I32(vec![]));
    }

    #[test]
    fn append_rejects_other_type() {
        let mut p = Payload::F32(vec![1.0]);
        assert!(p.append(&Payload::F32(vec![2.0])).is_ok());
        assert_eq!(p.len(), 2);
        let err = p.append(&Payload::I32(vec![3])).unwrap_err();
        assert!(matches!(err, RedistError::TypeMismatch { .. }));
        assert_eq!(p.len(), 2);
    }

    #[test]
    fn bbox_union() {
        let mut a = Payload::F32(vec![0.0, 0.0, 0.0, 1.0, 1.0, 1.0]);
        let b = Payload::F32(vec![-1.0, 0.5, 0.2, 0.5, 2.0, 1.0]);
        a.merge_bbox(&b).unwrap();
        assert_eq!(a, Payload::F32(vec![-1.0, 0.0, 0.0, 1.0, 2.0, 1.0]));
    }

    #[test]
    fn scalar_add_and_count() {
        let mut s = Scalar::I32(3);
        s.add_assign(&Scalar::I32(4)).unwrap();
        assert_eq!(s, Scalar::I32(7));
        assert!(Scalar::Str("a".into()).add_assign(&Scalar::Str("b".into())).is_err());
        assert_eq!(Scalar::U64(9).with_count(2).unwrap(), Scalar::U64(2));
        assert!(Scalar::F32(1.0).with_count(2).is_err());
    }

    #[test]
    fn integer_add_overflow_is_an_error() {
        let mut s = Scalar::I32(i32::MAX);
        assert!(matches!(
            s.add_assign(&Scalar::I32(1)),
            Err(RedistError::Overflow(_))
        ));
        assert_eq!(s, Scalar::I32(i32::MAX));
        let mut u = Scalar::U8(250);
        assert!(u.add_assign(&Scalar::U8(6)).is_err());
        u.add_assign(&Scalar::U8(5)).unwrap();
        assert_eq!(u, Scalar::U8(255));
        let mut f = Scalar::F32(f32::MAX);
        f.add_assign(&Scalar::F32(f32::MAX)).unwrap();
        assert_eq!(f, Scalar::F32(f32::INFINITY));
    }
}
