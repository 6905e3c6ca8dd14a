//! Redistribution of containers from M source ranks to N destination ranks.
//!
//! A [`RedistComp`] owns the communicators of one link ([`GroupLayout`]) and
//! a placement [`Strategy`]. Each iteration, sources call
//! [`process`](RedistComp::process) with [`RedistRole::Source`] and
//! destinations with [`RedistRole::Dest`]; a rank holding both roles calls
//! both, source first. [`flush`](RedistComp::flush) completes the sends.
//!
//! ## Protocols
//! * **Collective**: sources reduce the per-destination message counts to
//!   the source root, which forwards them to the destination root on
//!   [`METADATA_TAG`]; the destination root scatters one reception count to
//!   each destination, which then probes that many messages from any source.
//! * **P2P**: every source sends one message to every destination, empty
//!   when it has nothing for it; destinations receive one message per source.
//! * **Fixed** (process strategy): destinations receive from a known list
//!   of sources, in ascending order.
//!
//! A chunk addressed to the local rank goes through a transit slot and
//! never touches the transport. Data tags start at [`DATA_TAG`] and move
//! forward once per iteration, wrapping at `i32::MAX`.

pub mod block;
pub mod count;
pub mod layout;
pub mod plan;
pub mod proc;
pub mod round;
pub mod zcurve;

pub use block::BlockStrategy;
pub use count::CountStrategy;
pub use layout::GroupLayout;
pub use plan::{Route, RoutingPlan};
pub use proc::ProcStrategy;
pub use round::RoundStrategy;
pub use zcurve::{ZCurveConfig, ZCurveStrategy};

use crate::algs::communicator::{Communicator, Tag, Wait};
use crate::algs::wire::{decode_i32s, encode_i32s};
use crate::data::container::Container;
use crate::redist_error::RedistError;
use serde::{Deserialize, Serialize};

pub const METADATA_TAG: Tag = 1;
pub const DATA_TAG: Tag = 2;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum RedistRole {
    Source,
    Dest,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommMethod {
    #[default]
    Collective,
    P2P,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeMethod {
    /// Merge each chunk on arrival.
    #[default]
    Step,
    /// Keep the chunks and merge them once at the end of the iteration.
    Once,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedistConfig {
    pub comm_method: CommMethod,
    pub merge_method: MergeMethod,
}

impl Default for RedistConfig {
    fn default() -> Self {
        Self {
            comm_method: CommMethod::Collective,
            merge_method: MergeMethod::Step,
        }
    }
}

/// Placement policy of a redistribution component.
pub trait Strategy<C: Communicator> {
    fn name(&self) -> &'static str;

    /// Collective work over the source communicator, before the split.
    fn compute_global(
        &mut self,
        _layout: &GroupLayout<C>,
        _data: &Container,
    ) -> Result<(), RedistError> {
        Ok(())
    }

    /// One entry per destination; `None` when nothing goes there.
    fn split_data(
        &mut self,
        layout: &GroupLayout<C>,
        data: &Container,
    ) -> Result<Vec<Option<Container>>, RedistError>;

    /// Sources this destination receives from, in order, when the routes
    /// are fixed by the group sizes. `None` for data-dependent routes.
    fn fixed_sources(&self, _layout: &GroupLayout<C>) -> Result<Option<Vec<usize>>, RedistError> {
        Ok(None)
    }
}

impl<C: Communicator, S: Strategy<C> + ?Sized> Strategy<C> for Box<S> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn compute_global(
        &mut self,
        layout: &GroupLayout<C>,
        data: &Container,
    ) -> Result<(), RedistError> {
        (**self).compute_global(layout, data)
    }

    fn split_data(
        &mut self,
        layout: &GroupLayout<C>,
        data: &Container,
    ) -> Result<Vec<Option<Container>>, RedistError> {
        (**self).split_data(layout, data)
    }

    fn fixed_sources(&self, layout: &GroupLayout<C>) -> Result<Option<Vec<usize>>, RedistError> {
        (**self).fixed_sources(layout)
    }
}

/// Strategy selected by name at run time.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    Count,
    Round,
    Block,
    ZCurve,
    Proc,
}

impl StrategyKind {
    /// Z-curve placement uses `zcurve`; the other strategies ignore it.
    pub fn build<C: Communicator + 'static>(self, zcurve: ZCurveConfig) -> Box<dyn Strategy<C>> {
        match self {
            StrategyKind::Count => Box::new(CountStrategy::new()),
            StrategyKind::Round => Box::new(RoundStrategy::new()),
            StrategyKind::Block => Box::new(BlockStrategy::new()),
            StrategyKind::ZCurve => Box::new(ZCurveStrategy::new(zcurve)),
            StrategyKind::Proc => Box::new(ProcStrategy::new()),
        }
    }
}

impl std::str::FromStr for StrategyKind {
    type Err = RedistError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "count" => Ok(StrategyKind::Count),
            "round" => Ok(StrategyKind::Round),
            "block" => Ok(StrategyKind::Block),
            "zcurve" => Ok(StrategyKind::ZCurve),
            "proc" => Ok(StrategyKind::Proc),
            other => Err(RedistError::InvalidConfig(format!(
                "unknown redistribution `{other}`"
            ))),
        }
    }
}

/// Component whose strategy is chosen at run time.
pub type DynRedistComp<C> = RedistComp<C, Box<dyn Strategy<C>>>;

fn next_tag(tag: Tag) -> Tag {
    if tag == Tag::MAX { DATA_TAG } else { tag + 1 }
}

pub struct RedistComp<C: Communicator, S> {
    layout: GroupLayout<C>,
    strategy: S,
    config: RedistConfig,
    send_tag: Tag,
    recv_tag: Tag,
    transit: Option<Container>,
    root_counts: Option<Vec<i32>>,
    pending: Vec<C::SendHandle>,
    plan: Option<RoutingPlan>,
}

impl<C: Communicator, S: Strategy<C>> RedistComp<C, S> {
    /// Sources are the world ranks `[rank_source, rank_source + nb_sources)`,
    /// destinations `[rank_dest, rank_dest + nb_dests)`. Both ranges must be
    /// non-empty.
    pub fn new(
        world: &C,
        rank_source: usize,
        nb_sources: usize,
        rank_dest: usize,
        nb_dests: usize,
        strategy: S,
        config: RedistConfig,
    ) -> Result<Self, RedistError> {
        if nb_sources == 0 || nb_dests == 0 {
            log::error!(
                "redistribution needs at least one source and one destination, got {nb_sources} and {nb_dests}"
            );
            return Err(RedistError::InvalidConfig(format!(
                "empty rank range: {nb_sources} sources, {nb_dests} destinations"
            )));
        }
        Ok(Self {
            layout: GroupLayout::new(world, rank_source, nb_sources, rank_dest, nb_dests),
            strategy,
            config,
            send_tag: DATA_TAG,
            recv_tag: DATA_TAG,
            transit: None,
            root_counts: None,
            pending: Vec::new(),
            plan: None,
        })
    }

    pub fn layout(&self) -> &GroupLayout<C> {
        &self.layout
    }

    pub fn config(&self) -> &RedistConfig {
        &self.config
    }

    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    pub fn is_source(&self) -> bool {
        self.layout.is_source()
    }

    pub fn is_dest(&self) -> bool {
        self.layout.is_dest()
    }

    /// Plan of the current iteration, until [`flush`](Self::flush).
    pub fn plan(&self) -> Option<&RoutingPlan> {
        self.plan.as_ref()
    }

    /// Run one iteration for `role`. As a source `data` is read; as a
    /// destination the received chunks are merged into `data`.
    pub fn process(&mut self, data: &mut Container, role: RedistRole) -> Result<(), RedistError> {
        match role {
            RedistRole::Source if self.layout.is_source() => {
                let plan = self.split(data)?;
                self.send(plan)
            }
            RedistRole::Dest if self.layout.is_dest() => self.receive(data),
            _ => Ok(()),
        }
    }

    /// Destination side of one iteration, for callers pulling frames.
    /// Returns whether anything was received.
    pub fn get(&mut self, data: &mut Container) -> Result<bool, RedistError> {
        self.process(data, RedistRole::Dest)?;
        Ok(data.nb_fields() > 0)
    }

    /// Abort the whole job when `result` holds a fatal error.
    pub fn abort_on_fatal<T>(&self, result: Result<T, RedistError>) -> Result<T, RedistError> {
        match result {
            Err(e) if e.is_fatal() => {
                log::error!("fatal redistribution error ({}): {e}", self.strategy.name());
                match self.layout.comm() {
                    Some(c) => c.abort(1),
                    None => Err(e),
                }
            }
            other => other,
        }
    }

    fn split(&mut self, data: &Container) -> Result<RoutingPlan, RedistError> {
        let self_dest = self.layout.dest_index();
        let fixed = self.strategy.fixed_sources(&self.layout)?.is_some();
        if data.is_system() && !fixed {
            return RoutingPlan::replicate(data, self.layout.nb_dests(), self_dest);
        }
        self.strategy.compute_global(&self.layout, data)?;
        let chunks = self.strategy.split_data(&self.layout, data)?;
        if chunks.len() != self.layout.nb_dests() {
            return Err(RedistError::InvalidConfig(format!(
                "{} produced {} chunks for {} destinations",
                self.strategy.name(),
                chunks.len(),
                self.layout.nb_dests()
            )));
        }
        RoutingPlan::build(chunks, self_dest)
    }

    fn send(&mut self, plan: RoutingPlan) -> Result<(), RedistError> {
        let (Some(comm), Some(sources)) = (self.layout.comm(), self.layout.sources()) else {
            return Ok(());
        };
        let rank = comm.rank();
        let fixed = self.strategy.fixed_sources(&self.layout)?.is_some();

        if !fixed && self.config.comm_method == CommMethod::Collective {
            if let Some(sum) = sources.reduce_sum_to_root(&plan.summarize_dest) {
                if self.layout.shared_root() {
                    self.root_counts = Some(sum);
                } else {
                    self.pending.push(comm.isend(
                        self.layout.local_dest(),
                        METADATA_TAG,
                        encode_i32s(&sum),
                    ));
                }
            }
        }

        let p2p = !fixed && self.config.comm_method == CommMethod::P2P;
        for (d, route) in plan.routes.iter().enumerate() {
            let dst = self.layout.dest_rank(d);
            match route {
                Route::Send { chunk, .. } if dst == rank => self.transit = Some(chunk.clone()),
                Route::Send {
                    payload: Some(b), ..
                } => self.pending.push(comm.isend(dst, self.send_tag, b.clone())),
                Route::Send { payload: None, .. } => {}
                Route::Empty if p2p && dst != rank => {
                    self.pending
                        .push(comm.isend(dst, self.send_tag, bytes::Bytes::new()));
                }
                Route::Empty => {}
            }
        }
        log::trace!(
            "{}: sent iteration on tag {} ({} pending)",
            self.strategy.name(),
            self.send_tag,
            self.pending.len()
        );
        self.send_tag = next_tag(self.send_tag);
        self.plan = Some(plan);
        Ok(())
    }

    fn merge_chunk(&self, data: &mut Container, buf: &[u8]) -> Result<(), RedistError> {
        match self.config.merge_method {
            MergeMethod::Step => data.merge_bytes(buf),
            MergeMethod::Once => data.unserialize_and_store(buf),
        }
    }

    fn merge_transit(&mut self, data: &mut Container) -> Result<(), RedistError> {
        let Some(chunk) = self.transit.take() else {
            return Ok(());
        };
        match self.config.merge_method {
            MergeMethod::Step => data.merge(&chunk),
            MergeMethod::Once => data.store(chunk),
        }
    }

    fn receive(&mut self, data: &mut Container) -> Result<(), RedistError> {
        let tag = self.recv_tag;
        self.recv_tag = next_tag(self.recv_tag);
        let result = match self.strategy.fixed_sources(&self.layout)? {
            Some(sources) => self.receive_fixed(data, &sources, tag),
            None => match self.config.comm_method {
                CommMethod::Collective => self.receive_collective(data, tag),
                CommMethod::P2P => self.receive_p2p(data, tag),
            },
        };
        result?;
        if self.config.merge_method == MergeMethod::Once {
            data.merge_stored_data()?;
        }
        Ok(())
    }

    /// Receive `nb` messages from any source, merging every one of them
    /// even after a failed merge; the first error is returned.
    fn receive_any(&self, data: &mut Container, nb: usize, tag: Tag) -> Result<(), RedistError> {
        let Some(comm) = self.layout.comm() else {
            return Ok(());
        };
        let mut maybe_err = None;
        for _ in 0..nb {
            let (src, buf) = comm.probe_receive(tag);
            if buf.is_empty() {
                continue;
            }
            if let Err(e) = self.merge_chunk(data, &buf) {
                log::error!("merge of the chunk from rank {src} failed: {e}");
                maybe_err.get_or_insert(e);
            }
        }
        maybe_err.map_or(Ok(()), Err)
    }

    fn receive_collective(&mut self, data: &mut Container, tag: Tag) -> Result<(), RedistError> {
        let (Some(comm), Some(dests)) = (self.layout.comm(), self.layout.dests()) else {
            return Ok(());
        };
        let mut root_err = None;
        let counts = if dests.rank() == 0 {
            if self.layout.shared_root() {
                Some(self.root_counts.take().unwrap_or_else(|| {
                    root_err = Some(RedistError::InvalidConfig(
                        "destination step ran before the source step".into(),
                    ));
                    vec![0; self.layout.nb_dests()]
                }))
            } else {
                let src = self.layout.local_source();
                let buf = comm.receive_from(src, METADATA_TAG);
                Some(decode_i32s(&buf).map_err(|reason| RedistError::CommError {
                    peer: src,
                    reason,
                })?)
            }
        } else {
            None
        };
        let nb_recep = dests.scatter_from_root(counts.as_deref());
        log::trace!("expecting {nb_recep} messages on tag {tag}");

        let transit = self.merge_transit(data);
        let received = self.receive_any(data, nb_recep.max(0) as usize, tag);
        root_err.map_or(Ok(()), Err).and(transit).and(received)
    }

    fn receive_p2p(&mut self, data: &mut Container, tag: Tag) -> Result<(), RedistError> {
        let nb_recep = self.layout.nb_sources() - usize::from(self.layout.is_source());
        let received = self.receive_any(data, nb_recep, tag);
        self.merge_transit(data).and(received)
    }

    fn receive_fixed(
        &mut self,
        data: &mut Container,
        sources: &[usize],
        tag: Tag,
    ) -> Result<(), RedistError> {
        let Some(comm) = self.layout.comm() else {
            return Ok(());
        };
        let rank = comm.rank();
        let mut maybe_err = None;
        for &s in sources {
            let src = self.layout.source_rank(s);
            let merged = if src == rank {
                self.merge_transit(data)
            } else {
                let buf = match self.layout.comm() {
                    Some(c) => c.receive_from(src, tag),
                    None => Vec::new(),
                };
                self.merge_chunk(data, &buf)
            };
            if let Err(e) = merged {
                log::error!("merge of the chunk from rank {src} failed: {e}");
                maybe_err.get_or_insert(e);
            }
        }
        maybe_err.map_or(Ok(()), Err)
    }

    /// Complete every pending send and drop the plan of the iteration.
    pub fn flush(&mut self) {
        for h in self.pending.drain(..) {
            h.wait();
        }
        self.plan = None;
    }

    /// Complete pending sends and forget per-iteration state.
    pub fn shutdown(&mut self) {
        self.flush();
        self.transit = None;
        self.root_counts = None;
    }
}
