//! Thin façade over intra-process (threads) or inter-process (MPI) message passing.
//!
//! Messages are *contiguous byte buffers* owned by the caller as [`Bytes`];
//! a send handle keeps its buffer alive until `.wait()` returns. Receives
//! are blocking probes on a tag, optionally restricted to one source.
//!
//! Groups are built from contiguous rank ranges of an existing communicator
//! ([`Communicator::subgroup`]); members are numbered in range order.
//! Collective operations must be entered in the same order by every member.

use bytes::Bytes;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::algs::wire::{
    decode_f32s, decode_i32s, decode_u64s, encode_f32s, encode_i32s, encode_u64s,
};

/// Message tag. Non-negative tags are free for users.
pub type Tag = i32;

/// Message-passing interface used by redistribution and channels.
pub trait Communicator: Sized {
    /// Handle returned by `isend`.
    type SendHandle: Wait;

    fn rank(&self) -> usize;
    fn size(&self) -> usize;

    /// Non-blocking send; the buffer lives in the handle until completion.
    fn isend(&self, peer: usize, tag: Tag, buf: Bytes) -> Self::SendHandle;
    /// Blocking receive of the next message with `tag` from any source.
    fn probe_receive(&self, tag: Tag) -> (usize, Vec<u8>);
    /// Non-blocking variant of [`probe_receive`](Self::probe_receive).
    fn try_probe_receive(&self, tag: Tag) -> Option<(usize, Vec<u8>)>;
    /// Blocking receive of the next message with `tag` from `peer`.
    fn receive_from(&self, peer: usize, tag: Tag) -> Vec<u8>;

    /// Communicator over the ranks in `ranges`, numbered in range order.
    /// Ranks outside the ranges get `None` without communicating; members
    /// must create their subgroups in the same order.
    fn subgroup(&self, ranges: &[Range<usize>]) -> Option<Self>;
    fn barrier(&self);
    /// Tear down the whole job.
    fn abort(&self, code: i32) -> !;

    /// Inclusive prefix sum.
    fn scan_sum(&self, value: u64) -> u64;
    fn all_reduce_sum(&self, value: u64) -> u64;
    fn all_reduce_min_f32(&self, values: &[f32]) -> Vec<f32>;
    fn all_reduce_max_f32(&self, values: &[f32]) -> Vec<f32>;
    /// Element-wise sum on rank 0; `None` elsewhere.
    fn reduce_sum_to_root(&self, values: &[i32]) -> Option<Vec<i32>>;
    /// Rank 0 provides one value per rank; every rank gets its own.
    fn scatter_from_root(&self, values: Option<&[i32]>) -> i32;
}

/// Anything that can be waited on.
pub trait Wait {
    /// Wait for completion and return the received data (if any).
    fn wait(self) -> Option<Vec<u8>>;
}

impl Wait for () {
    fn wait(self) -> Option<Vec<u8>> {
        None
    }
}

/// Compile-time no-op comm for pure serial use: a world of one rank where
/// every collective is the identity.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Communicator for NoComm {
    type SendHandle = ();

    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        1
    }
    fn isend(&self, _peer: usize, _tag: Tag, _buf: Bytes) {}
    fn probe_receive(&self, _tag: Tag) -> (usize, Vec<u8>) {
        (0, Vec::new())
    }
    fn try_probe_receive(&self, _tag: Tag) -> Option<(usize, Vec<u8>)> {
        None
    }
    fn receive_from(&self, _peer: usize, _tag: Tag) -> Vec<u8> {
        Vec::new()
    }
    fn subgroup(&self, ranges: &[Range<usize>]) -> Option<Self> {
        ranges.iter().any(|r| r.contains(&0)).then_some(NoComm)
    }
    fn barrier(&self) {}
    fn abort(&self, code: i32) -> ! {
        panic!("abort requested with code {code}")
    }
    fn scan_sum(&self, value: u64) -> u64 {
        value
    }
    fn all_reduce_sum(&self, value: u64) -> u64 {
        value
    }
    fn all_reduce_min_f32(&self, values: &[f32]) -> Vec<f32> {
        values.to_vec()
    }
    fn all_reduce_max_f32(&self, values: &[f32]) -> Vec<f32> {
        values.to_vec()
    }
    fn reduce_sum_to_root(&self, values: &[i32]) -> Option<Vec<i32>> {
        Some(values.to_vec())
    }
    fn scatter_from_root(&self, values: Option<&[i32]>) -> i32 {
        values.and_then(|v| v.first().copied()).unwrap_or(0)
    }
}

// --- LocalComm: intra-process / one thread per rank ---
type MailKey = (u64, usize, Tag); // (context, dst, tag)

static MAILBOX: Lazy<DashMap<MailKey, VecDeque<(usize, Bytes)>>> = Lazy::new(DashMap::new);
static NEXT_CONTEXT: AtomicU64 = AtomicU64::new(1);

const GATHER_TAG: Tag = -1;
const BCAST_TAG: Tag = -2;

/// In-process communicator: each rank runs on its own thread and messages
/// go through a global mailbox keyed by communicator context. Messages
/// between one pair of ranks on one tag are delivered in order.
#[derive(Clone, Debug)]
pub struct LocalComm {
    context: u64,
    rank: usize,
    size: usize,
    groups: Arc<Mutex<hashbrown::HashMap<u64, u64>>>,
}

impl LocalComm {
    /// One communicator per rank of a fresh world of `size` ranks.
    pub fn world(size: usize) -> Vec<LocalComm> {
        let context = NEXT_CONTEXT.fetch_add(1, Ordering::Relaxed);
        (0..size)
            .map(|rank| LocalComm {
                context,
                rank,
                size,
                groups: Arc::default(),
            })
            .collect()
    }

    fn post(&self, peer: usize, tag: Tag, buf: Bytes) {
        MAILBOX
            .entry((self.context, peer, tag))
            .or_default()
            .push_back((self.rank, buf));
    }

    /// Drained queues are dropped so rolling tags do not grow the mailbox.
    fn take(&self, tag: Tag, from: Option<usize>) -> Option<(usize, Bytes)> {
        let key = (self.context, self.rank, tag);
        let msg = {
            let mut queue = MAILBOX.get_mut(&key)?;
            let pos = match from {
                Some(peer) => queue.iter().position(|(src, _)| *src == peer)?,
                None => 0,
            };
            queue.remove(pos)
        };
        MAILBOX.remove_if(&key, |_, q| q.is_empty());
        msg
    }

    /// Mailbox queues currently held for this communicator context.
    #[cfg(test)]
    fn pending_queues(&self) -> usize {
        MAILBOX.iter().filter(|e| e.key().0 == self.context).count()
    }

    fn wait_take(&self, tag: Tag, from: Option<usize>) -> (usize, Bytes) {
        loop {
            if let Some(msg) = self.take(tag, from) {
                return msg;
            }
            std::thread::yield_now();
        }
    }

    fn gather_to_root(&self, local: Bytes) -> Option<Vec<Bytes>> {
        self.post(0, GATHER_TAG, local);
        if self.rank != 0 {
            return None;
        }
        Some(
            (0..self.size)
                .map(|src| self.wait_take(GATHER_TAG, Some(src)).1)
                .collect(),
        )
    }

    fn all_gather(&self, local: Bytes) -> Vec<Bytes> {
        if let Some(all) = self.gather_to_root(local) {
            for dst in 0..self.size {
                for b in &all {
                    self.post(dst, BCAST_TAG, b.clone());
                }
            }
        }
        (0..self.size)
            .map(|_| self.wait_take(BCAST_TAG, Some(0)).1)
            .collect()
    }

    fn all_gather_f32(&self, values: &[f32]) -> Vec<Vec<f32>> {
        self.all_gather(encode_f32s(values))
            .iter()
            .map(|b| decode_f32s(b).unwrap_or_default())
            .collect()
    }

    fn all_gather_u64(&self, value: u64) -> Vec<u64> {
        self.all_gather(encode_u64s(&[value]))
            .iter()
            .map(|b| decode_u64s(b).ok().and_then(|v| v.first().copied()).unwrap_or(0))
            .collect()
    }
}

fn fold_columns(rows: Vec<Vec<f32>>, f: fn(f32, f32) -> f32) -> Vec<f32> {
    let mut it = rows.into_iter();
    let first = it.next().unwrap_or_default();
    it.fold(first, |acc, row| {
        acc.iter().zip(row.iter()).map(|(&a, &b)| f(a, b)).collect()
    })
}

impl Communicator for LocalComm {
    type SendHandle = ();

    fn rank(&self) -> usize {
        self.rank
    }
    fn size(&self) -> usize {
        self.size
    }

    fn isend(&self, peer: usize, tag: Tag, buf: Bytes) {
        self.post(peer, tag, buf);
    }

    fn probe_receive(&self, tag: Tag) -> (usize, Vec<u8>) {
        let (src, b) = self.wait_take(tag, None);
        (src, b.to_vec())
    }

    fn try_probe_receive(&self, tag: Tag) -> Option<(usize, Vec<u8>)> {
        self.take(tag, None).map(|(src, b)| (src, b.to_vec()))
    }

    fn receive_from(&self, peer: usize, tag: Tag) -> Vec<u8> {
        self.wait_take(tag, Some(peer)).1.to_vec()
    }

    fn subgroup(&self, ranges: &[Range<usize>]) -> Option<Self> {
        let mut members: Vec<usize> = Vec::new();
        for x in ranges.iter().flat_map(|r| r.clone()) {
            if !members.contains(&x) {
                members.push(x);
            }
        }
        let rank = members.iter().position(|&m| m == self.rank)?;

        let mut h = DefaultHasher::new();
        (self.context, ranges).hash(&mut h);
        let key = h.finish();
        let seq = {
            let mut groups = self.groups.lock();
            let n = groups.entry(key).or_insert(0);
            *n += 1;
            *n
        };
        let mut h = DefaultHasher::new();
        (key, seq).hash(&mut h);
        Some(LocalComm {
            context: h.finish(),
            rank,
            size: members.len(),
            groups: Arc::default(),
        })
    }

    fn barrier(&self) {
        self.all_gather(Bytes::new());
    }

    fn abort(&self, code: i32) -> ! {
        panic!("rank {} requested abort with code {code}", self.rank)
    }

    fn scan_sum(&self, value: u64) -> u64 {
        self.all_gather_u64(value)[..=self.rank].iter().sum()
    }

    fn all_reduce_sum(&self, value: u64) -> u64 {
        self.all_gather_u64(value).iter().sum()
    }

    fn all_reduce_min_f32(&self, values: &[f32]) -> Vec<f32> {
        fold_columns(self.all_gather_f32(values), f32::min)
    }

    fn all_reduce_max_f32(&self, values: &[f32]) -> Vec<f32> {
        fold_columns(self.all_gather_f32(values), f32::max)
    }

    fn reduce_sum_to_root(&self, values: &[i32]) -> Option<Vec<i32>> {
        let rows = self.gather_to_root(encode_i32s(values))?;
        let mut out = vec![0i32; values.len()];
        for row in rows {
            for (o, v) in out.iter_mut().zip(decode_i32s(&row).unwrap_or_default()) {
                *o += v;
            }
        }
        Some(out)
    }

    fn scatter_from_root(&self, values: Option<&[i32]>) -> i32 {
        if self.rank == 0 {
            let values = values.unwrap_or(&[]);
            for dst in 0..self.size {
                let v = values.get(dst).copied().unwrap_or(0);
                self.post(dst, BCAST_TAG, encode_i32s(&[v]));
            }
        }
        let b = self.wait_take(BCAST_TAG, Some(0)).1;
        decode_i32s(&b)
            .ok()
            .and_then(|v| v.first().copied())
            .unwrap_or(0)
    }
}

// --- MPI backend (feature = "mpi-support") ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::{Communicator, Tag, Wait};
    use crate::redist_error::RedistError;
    use bytes::Bytes;
    use mpi::collective::SystemOperation;
    use mpi::environment::Universe;
    use mpi::request::StaticScope;
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::*;
    use std::ops::Range;
    use std::sync::Arc;

    pub struct MpiComm {
        comm: SimpleCommunicator,
        rank: usize,
        size: usize,
        _universe: Option<Arc<Universe>>,
    }

    impl MpiComm {
        /// Initialize MPI and wrap `MPI_COMM_WORLD`. MPI is finalized when
        /// the last communicator derived from it is dropped.
        pub fn init() -> Result<Self, RedistError> {
            let universe = mpi::initialize()
                .ok_or_else(|| RedistError::InvalidConfig("MPI is already initialized".into()))?;
            let world = universe.world();
            Ok(Self::wrap(world, Some(Arc::new(universe))))
        }

        /// Wrap a communicator owned by the application.
        pub fn from_communicator(comm: SimpleCommunicator) -> Self {
            Self::wrap(comm, None)
        }

        fn wrap(comm: SimpleCommunicator, universe: Option<Arc<Universe>>) -> Self {
            let rank = comm.rank() as usize;
            let size = comm.size() as usize;
            Self {
                comm,
                rank,
                size,
                _universe: universe,
            }
        }
    }

    /// Pending send; completes the request on `wait` or on drop.
    pub struct MpiSendHandle {
        finish: Option<Box<dyn FnOnce()>>,
        _buf: Bytes,
    }

    impl Wait for MpiSendHandle {
        fn wait(mut self) -> Option<Vec<u8>> {
            if let Some(f) = self.finish.take() {
                f();
            }
            None
        }
    }

    impl Drop for MpiSendHandle {
        fn drop(&mut self) {
            if let Some(f) = self.finish.take() {
                f();
            }
        }
    }

    impl Communicator for MpiComm {
        type SendHandle = MpiSendHandle;

        fn rank(&self) -> usize {
            self.rank
        }
        fn size(&self) -> usize {
            self.size
        }

        fn isend(&self, peer: usize, tag: Tag, buf: Bytes) -> MpiSendHandle {
            // SAFETY: `buf` is stored in the handle, and the handle completes
            // the request before the buffer is released.
            let data: &'static [u8] =
                unsafe { std::slice::from_raw_parts(buf.as_ptr(), buf.len()) };
            let req = self
                .comm
                .process_at_rank(peer as i32)
                .immediate_send_with_tag(StaticScope, data, tag);
            MpiSendHandle {
                finish: Some(Box::new(move || {
                    req.wait();
                })),
                _buf: buf,
            }
        }

        fn probe_receive(&self, tag: Tag) -> (usize, Vec<u8>) {
            let (msg, status) = self.comm.any_process().matched_probe_with_tag(tag);
            let (data, _) = msg.matched_receive_vec::<u8>();
            (status.source_rank() as usize, data)
        }

        fn try_probe_receive(&self, tag: Tag) -> Option<(usize, Vec<u8>)> {
            self.comm
                .any_process()
                .immediate_matched_probe_with_tag(tag)
                .map(|(msg, status)| {
                    let (data, _) = msg.matched_receive_vec::<u8>();
                    (status.source_rank() as usize, data)
                })
        }

        fn receive_from(&self, peer: usize, tag: Tag) -> Vec<u8> {
            let (data, _) = self
                .comm
                .process_at_rank(peer as i32)
                .receive_vec_with_tag::<u8>(tag);
            data
        }

        fn subgroup(&self, ranges: &[Range<usize>]) -> Option<Self> {
            let mut members: Vec<i32> = Vec::new();
            for r in ranges {
                for x in r.clone() {
                    if !members.contains(&(x as i32)) {
                        members.push(x as i32);
                    }
                }
            }
            if !members.contains(&(self.rank as i32)) {
                return None;
            }
            let group = self.comm.group().include(&members);
            let sub = self.comm.split_by_subgroup(&group)?;
            Some(Self::wrap(sub, self._universe.clone()))
        }

        fn barrier(&self) {
            self.comm.barrier();
        }

        fn abort(&self, code: i32) -> ! {
            self.comm.abort(code)
        }

        fn scan_sum(&self, value: u64) -> u64 {
            let mut out = 0u64;
            self.comm.scan_into(&value, &mut out, SystemOperation::sum());
            out
        }

        fn all_reduce_sum(&self, value: u64) -> u64 {
            let mut out = 0u64;
            self.comm
                .all_reduce_into(&value, &mut out, SystemOperation::sum());
            out
        }

        fn all_reduce_min_f32(&self, values: &[f32]) -> Vec<f32> {
            let mut out = vec![0f32; values.len()];
            self.comm
                .all_reduce_into(values, &mut out[..], SystemOperation::min());
            out
        }

        fn all_reduce_max_f32(&self, values: &[f32]) -> Vec<f32> {
            let mut out = vec![0f32; values.len()];
            self.comm
                .all_reduce_into(values, &mut out[..], SystemOperation::max());
            out
        }

        fn reduce_sum_to_root(&self, values: &[i32]) -> Option<Vec<i32>> {
            let root = self.comm.process_at_rank(0);
            if self.rank == 0 {
                let mut out = vec![0i32; values.len()];
                root.reduce_into_root(values, &mut out[..], SystemOperation::sum());
                Some(out)
            } else {
                root.reduce_into(values, SystemOperation::sum());
                None
            }
        }

        fn scatter_from_root(&self, values: Option<&[i32]>) -> i32 {
            let root = self.comm.process_at_rank(0);
            let mut out = 0i32;
            if self.rank == 0 {
                let send: Vec<i32> = match values {
                    Some(v) if v.len() == self.size => v.to_vec(),
                    _ => vec![0; self.size],
                };
                root.scatter_into_root(&send[..], &mut out);
            } else {
                root.scatter_into(&mut out);
            }
            out
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::{MpiComm, MpiSendHandle};
