//! Fixed little-endian wire records for control messages.
//!
//! Containers travel as opaque bincode blobs; the small control messages
//! (reception counts, channel values, collective operands) travel as
//! arrays of the `Pod` records below.

use bytemuck::{Pod, Zeroable};
use bytes::Bytes;
use static_assertions::const_assert_eq;
use std::mem::size_of;

pub fn cast_slice<T: Pod>(v: &[T]) -> &[u8] {
    bytemuck::cast_slice(v)
}

pub fn cast_slice_mut<T: Pod>(v: &mut [T]) -> &mut [u8] {
    bytemuck::cast_slice_mut(v)
}

/// Copy `v` into an owned message buffer.
pub fn encode<T: Pod>(v: &[T]) -> Bytes {
    Bytes::copy_from_slice(cast_slice(v))
}

/// Decode a buffer of `T` records. The input needs no particular alignment.
pub fn decode<T: Pod>(data: &[u8]) -> Result<Vec<T>, String> {
    let width = size_of::<T>();
    if width == 0 || data.len() % width != 0 {
        return Err(format!(
            "buffer of {} bytes is not a whole number of {width}-byte records",
            data.len()
        ));
    }
    let mut out = vec![T::zeroed(); data.len() / width];
    cast_slice_mut(&mut out).copy_from_slice(data);
    Ok(out)
}

#[repr(transparent)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct WireI32 {
    pub v_le: i32,
}

impl WireI32 {
    pub fn new(v: i32) -> Self {
        Self { v_le: v.to_le() }
    }
    pub fn get(self) -> i32 {
        i32::from_le(self.v_le)
    }
}

#[repr(transparent)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct WireU64 {
    pub v_le: u64,
}

impl WireU64 {
    pub fn new(v: u64) -> Self {
        Self { v_le: v.to_le() }
    }
    pub fn get(self) -> u64 {
        u64::from_le(self.v_le)
    }
}

#[repr(transparent)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct WireF32 {
    pub bits_le: u32,
}

impl WireF32 {
    pub fn new(v: f32) -> Self {
        Self {
            bits_le: v.to_bits().to_le(),
        }
    }
    pub fn get(self) -> f32 {
        f32::from_bits(u32::from_le(self.bits_le))
    }
}

const_assert_eq!(size_of::<WireI32>(), 4);
const_assert_eq!(size_of::<WireU64>(), 8);
const_assert_eq!(size_of::<WireF32>(), 4);

pub fn encode_i32s(v: &[i32]) -> Bytes {
    let w: Vec<WireI32> = v.iter().map(|&x| WireI32::new(x)).collect();
    encode(&w)
}

pub fn decode_i32s(data: &[u8]) -> Result<Vec<i32>, String> {
    Ok(decode::<WireI32>(data)?.into_iter().map(WireI32::get).collect())
}

pub fn encode_u64s(v: &[u64]) -> Bytes {
    let w: Vec<WireU64> = v.iter().map(|&x| WireU64::new(x)).collect();
    encode(&w)
}

pub fn decode_u64s(data: &[u8]) -> Result<Vec<u64>, String> {
    Ok(decode::<WireU64>(data)?.into_iter().map(WireU64::get).collect())
}

pub fn encode_f32s(v: &[f32]) -> Bytes {
    let w: Vec<WireF32> = v.iter().map(|&x| WireF32::new(x)).collect();
    encode(&w)
}

pub fn decode_f32s(data: &[u8]) -> Result<Vec<f32>, String> {
    Ok(decode::<WireF32>(data)?.into_iter().map(WireF32::get).collect())
}
