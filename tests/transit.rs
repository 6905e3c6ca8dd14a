//! Chunks addressed to the sending rank itself never go through the
//! communicator.

mod util;

use bytes::Bytes;
use dataflow_redist::algs::communicator::Tag;
use dataflow_redist::prelude::*;
use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use util::{ints, vector_i32};

/// `LocalComm` that counts messages a rank sends to itself.
#[derive(Clone)]
struct CountingComm {
    inner: LocalComm,
    self_sends: Arc<AtomicUsize>,
}

impl Communicator for CountingComm {
    type SendHandle = ();

    fn rank(&self) -> usize {
        self.inner.rank()
    }
    fn size(&self) -> usize {
        self.inner.size()
    }
    fn isend(&self, peer: usize, tag: Tag, buf: Bytes) {
        if peer == self.rank() {
            self.self_sends.fetch_add(1, Ordering::Relaxed);
        }
        self.inner.isend(peer, tag, buf)
    }
    fn probe_receive(&self, tag: Tag) -> (usize, Vec<u8>) {
        self.inner.probe_receive(tag)
    }
    fn try_probe_receive(&self, tag: Tag) -> Option<(usize, Vec<u8>)> {
        self.inner.try_probe_receive(tag)
    }
    fn receive_from(&self, peer: usize, tag: Tag) -> Vec<u8> {
        self.inner.receive_from(peer, tag)
    }
    fn subgroup(&self, ranges: &[Range<usize>]) -> Option<Self> {
        self.inner.subgroup(ranges).map(|inner| CountingComm {
            inner,
            self_sends: self.self_sends.clone(),
        })
    }
    fn barrier(&self) {
        self.inner.barrier()
    }
    fn abort(&self, code: i32) -> ! {
        self.inner.abort(code)
    }
    fn scan_sum(&self, value: u64) -> u64 {
        self.inner.scan_sum(value)
    }
    fn all_reduce_sum(&self, value: u64) -> u64 {
        self.inner.all_reduce_sum(value)
    }
    fn all_reduce_min_f32(&self, values: &[f32]) -> Vec<f32> {
        self.inner.all_reduce_min_f32(values)
    }
    fn all_reduce_max_f32(&self, values: &[f32]) -> Vec<f32> {
        self.inner.all_reduce_max_f32(values)
    }
    fn reduce_sum_to_root(&self, values: &[i32]) -> Option<Vec<i32>> {
        self.inner.reduce_sum_to_root(values)
    }
    fn scatter_from_root(&self, values: Option<&[i32]>) -> i32 {
        self.inner.scatter_from_root(values)
    }
}

fn run(kind: StrategyKind, config: RedistConfig) -> (usize, Vec<Vec<i32>>) {
    let counter = Arc::new(AtomicUsize::new(0));
    let out = util::run_ranks(3, |inner| {
        let comm = CountingComm {
            inner,
            self_sends: counter.clone(),
        };
        let mut red: DynRedistComp<CountingComm> = RedistComp::new(
            &comm,
            0,
            3,
            0,
            3,
            kind.build(ZCurveConfig::default()),
            config,
        )
        .unwrap();
        let r = comm.rank() as i32;
        let mut data = vector_i32("v", vec![r * 10, r * 10 + 1, r * 10 + 2]);
        red.process(&mut data, RedistRole::Source).unwrap();
        let mut got = Container::new();
        red.process(&mut got, RedistRole::Dest).unwrap();
        red.flush();
        let mut v = ints(&got, "v");
        v.sort_unstable();
        v
    });
    (counter.load(Ordering::Relaxed), out)
}

#[test]
fn no_self_sends_for_any_protocol() {
    let p2p = RedistConfig {
        comm_method: CommMethod::P2P,
        ..RedistConfig::default()
    };
    for (kind, config) in [
        (StrategyKind::Count, RedistConfig::default()),
        (StrategyKind::Count, p2p),
        (StrategyKind::Round, RedistConfig::default()),
        (StrategyKind::Proc, RedistConfig::default()),
    ] {
        let (self_sends, out) = run(kind, config);
        assert_eq!(self_sends, 0, "{kind:?} {config:?}");
        let total: usize = out.iter().map(Vec::len).sum();
        assert_eq!(total, 9, "{kind:?} {config:?}");
    }
}

#[test]
fn process_strategy_keeps_data_local_on_identity_mapping() {
    let (self_sends, out) = run(StrategyKind::Proc, RedistConfig::default());
    assert_eq!(self_sends, 0);
    assert_eq!(out, vec![vec![0, 1, 2], vec![10, 11, 12], vec![20, 21, 22]]);
}
