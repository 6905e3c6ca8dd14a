//! Flow-controlled streaming between a producer, an optional dataflow and
//! a consumer.
//!
//! A datastream wraps the redistribution components of a workflow link and
//! adds one-way signalling so that the consumer, and optionally the
//! producer, are throttled by the dataflow buffer:
//!
//! * [`SingleFeedback`]: the consumer tells the dataflow when it is ready
//!   for the next frame; the dataflow buffers producer frames meanwhile.
//! * [`DoubleFeedback`]: the producer also asks the dataflow for a buffer
//!   slot before sending.
//! * [`NoLink`]: producer to consumer directly, the producer waiting for
//!   the consumer.
//!
//! Every rank of the world builds the datastream; each then calls the
//! `process_*` method of its role once per iteration. A producer ends the
//! stream by sending a container marked with
//! [`set_quit`](crate::data::msgtools::set_quit).

pub mod double_feedback;
pub mod frame;
pub mod no_link;
pub mod single_feedback;
pub mod storage;

pub use double_feedback::DoubleFeedback;
pub use frame::{
    FrameCommand, FrameManager, LowHighFrameManager, RecentFrameManager, SeqFrameManager,
};
pub use no_link::NoLink;
pub use single_feedback::SingleFeedback;
pub use storage::{FileStorage, MainMemoryStorage, Storage, StorageCollection};

use crate::algs::communicator::Communicator;
use crate::data::container::Container;
use crate::data::msgtools;
use crate::redist::{DynRedistComp, RedistRole};
use crate::redist_error::RedistError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;
use std::path::PathBuf;
use std::str::FromStr;

/// Environment variable naming the folder of file-backed storage.
pub const STORAGE_FOLDER_ENV: &str = "REDIST_STORAGE_FOLDER";

/// Dataflow decision meaning "nothing to forward this step".
pub(crate) const NO_FRAME: i32 = -1;
/// Dataflow decision ending the stream.
pub(crate) const QUIT_FRAME: i32 = -2;

macro_rules! policy_names {
    ($ty:ident { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(self) -> &'static str {
                match self {
                    $($ty::$variant => $name),+
                }
            }

            /// Parse `s`, falling back to the default value with a warning.
            pub fn parse_or_default(s: &str) -> Self {
                s.parse().unwrap_or_else(|_| {
                    let d = Self::default();
                    log::warn!(
                        "unknown {} `{s}`, using `{}`",
                        stringify!($ty),
                        d.as_str()
                    );
                    d
                })
            }
        }

        impl FromStr for $ty {
            type Err = RedistError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.to_ascii_lowercase().as_str() {
                    $($name => Ok($ty::$variant),)+
                    other => Err(RedistError::InvalidConfig(format!(
                        "unknown {} `{other}`",
                        stringify!($ty)
                    ))),
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamPolicy {
    #[default]
    None,
    Single,
    Double,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FramePolicy {
    #[default]
    Seq,
    Recent,
    LowHigh,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageCollectionPolicy {
    #[default]
    Greedy,
    Lru,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    #[default]
    MainMem,
    File,
}

policy_names!(StreamPolicy { None => "none", Single => "single", Double => "double" });
policy_names!(FramePolicy { Seq => "seq", Recent => "recent", LowHigh => "lowhigh" });
policy_names!(StorageCollectionPolicy { Greedy => "greedy", Lru => "lru" });
policy_names!(StorageType { MainMem => "mainmem", File => "file" });

/// Stream parameters of one workflow link.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub stream: StreamPolicy,
    pub frame_policy: FramePolicy,
    /// The producer sends one iteration out of `prod_freq_output`.
    pub prod_freq_output: u32,
    pub storage_policy: StorageCollectionPolicy,
    pub storages: Vec<StorageType>,
    /// Capacity in frames of each entry of `storages`.
    pub storage_max_buffer: Vec<u32>,
    pub low_frequency: u32,
    pub high_frequency: u32,
    pub storage_folder: Option<PathBuf>,
    /// Hold the producer when every storage tier is full.
    pub blocking: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            stream: StreamPolicy::None,
            frame_policy: FramePolicy::Seq,
            prod_freq_output: 1,
            storage_policy: StorageCollectionPolicy::Greedy,
            storages: vec![StorageType::MainMem],
            storage_max_buffer: vec![10],
            low_frequency: 1,
            high_frequency: 1,
            storage_folder: None,
            blocking: true,
        }
    }
}

impl StreamConfig {
    /// `storage_folder`, else `$REDIST_STORAGE_FOLDER`, else the system
    /// temp directory.
    pub fn storage_folder(&self) -> PathBuf {
        self.storage_folder
            .clone()
            .or_else(|| std::env::var_os(STORAGE_FOLDER_ENV).map(PathBuf::from))
            .unwrap_or_else(std::env::temp_dir)
    }

    pub fn frame_manager(&self) -> Box<dyn FrameManager> {
        match self.frame_policy {
            FramePolicy::Seq => Box::new(SeqFrameManager::default()),
            FramePolicy::Recent => Box::new(RecentFrameManager::default()),
            FramePolicy::LowHigh => Box::new(LowHighFrameManager::new(
                self.low_frequency,
                self.high_frequency,
            )),
        }
    }

    pub fn storage(&self, rank: usize) -> Result<StorageCollection, RedistError> {
        StorageCollection::from_types(
            self.storage_policy,
            &self.storages,
            &self.storage_max_buffer,
            &self.storage_folder(),
            rank,
        )
    }
}

/// World rank ranges of the stream roles. The first rank of each range is
/// its root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamRanks {
    pub prod: Range<usize>,
    pub dflow: Range<usize>,
    pub con: Range<usize>,
}

impl StreamRanks {
    pub fn is_prod(&self, rank: usize) -> bool {
        self.prod.contains(&rank)
    }

    pub fn is_dflow(&self, rank: usize) -> bool {
        self.dflow.contains(&rank)
    }

    pub fn is_con(&self, rank: usize) -> bool {
        self.con.contains(&rank)
    }

    pub(crate) fn len(r: &Range<usize>) -> usize {
        r.end.saturating_sub(r.start)
    }
}

pub trait Datastream {
    /// Producer step. Returns whether `data` was sent this iteration.
    fn process_prod(&mut self, data: &mut Container) -> Result<bool, RedistError>;
    /// Dataflow step; `data` receives the frame pulled from the producers,
    /// if any. Returns `false` once the stream is over.
    fn process_dflow(&mut self, data: &mut Container) -> Result<bool, RedistError>;
    /// Consumer step; `data` is replaced by the next frame.
    fn process_con(&mut self, data: &mut Container) -> Result<(), RedistError>;
}

/// Redistribution components wrapped by a datastream.
pub enum StreamLinks<C: Communicator> {
    Dataflow {
        prod_dflow: DynRedistComp<C>,
        dflow_con: DynRedistComp<C>,
    },
    Direct {
        prod_con: DynRedistComp<C>,
    },
}

/// Datastream selected by `config.stream`; `None` for
/// [`StreamPolicy::None`].
pub fn build_datastream<C>(
    config: &StreamConfig,
    world: &C,
    ranks: StreamRanks,
    links: StreamLinks<C>,
) -> Result<Option<Box<dyn Datastream>>, RedistError>
where
    C: Communicator + 'static,
    C::SendHandle: 'static,
{
    let stream: Box<dyn Datastream> = match (config.stream, links) {
        (StreamPolicy::None, _) => return Ok(None),
        (StreamPolicy::Single, StreamLinks::Direct { prod_con }) => {
            Box::new(NoLink::new(config, world, ranks, prod_con))
        }
        (
            StreamPolicy::Single,
            StreamLinks::Dataflow {
                prod_dflow,
                dflow_con,
            },
        ) => Box::new(SingleFeedback::new(
            config, world, ranks, prod_dflow, dflow_con,
        )?),
        (
            StreamPolicy::Double,
            StreamLinks::Dataflow {
                prod_dflow,
                dflow_con,
            },
        ) => Box::new(DoubleFeedback::new(
            config, world, ranks, prod_dflow, dflow_con,
        )?),
        (StreamPolicy::Double, StreamLinks::Direct { .. }) => {
            log::error!("double feedback needs a dataflow");
            return Err(RedistError::InvalidConfig(
                "double feedback needs a dataflow".into(),
            ));
        }
    };
    log::info!("{} feedback datastream built", config.stream);
    Ok(Some(stream))
}

/// Output rate of the producer: quit messages always go through.
#[derive(Debug)]
pub(crate) struct ProdGate {
    freq: u32,
    iteration: u64,
}

impl ProdGate {
    pub(crate) fn new(freq: u32) -> Self {
        Self {
            freq: freq.max(1),
            iteration: 0,
        }
    }

    pub(crate) fn should_send(&mut self, data: &Container) -> bool {
        let it = self.iteration;
        self.iteration += 1;
        msgtools::is_quit(data) || it % u64::from(self.freq) == 0
    }
}

/// Frames buffered on a dataflow rank. Ids are assigned in arrival order,
/// identically on every dataflow rank.
pub(crate) struct FrameBuffer {
    pub(crate) frames: Box<dyn FrameManager>,
    pub(crate) storage: StorageCollection,
    next_id: u32,
}

impl FrameBuffer {
    pub(crate) fn new(config: &StreamConfig, rank: usize) -> Result<Self, RedistError> {
        Ok(Self {
            frames: config.frame_manager(),
            storage: config.storage(rank)?,
            next_id: 0,
        })
    }

    /// Keep a copy of `data` unless the frame manager skips it; only the
    /// root schedules it.
    pub(crate) fn store(&mut self, data: &Container, root: bool) -> Result<u32, RedistError> {
        let id = self.next_id;
        self.next_id += 1;
        if !self.frames.keeps(id) {
            return Ok(id);
        }
        self.storage.insert(id, data.clone())?;
        if root {
            self.frames.put_frame(id);
        }
        log::trace!("stored frame {id} ({} buffered)", self.storage.len());
        Ok(id)
    }

    /// Send frame `id` to the consumers and apply the frame command.
    pub(crate) fn forward<C: Communicator>(
        &mut self,
        id: u32,
        red: &mut DynRedistComp<C>,
    ) -> Result<(), RedistError> {
        let mut frame = self.storage.get(id)?.ok_or_else(|| {
            log::error!("frame {id} selected for forwarding is not stored");
            RedistError::FrameUnavailable(format!("frame {id}"))
        })?;
        red.process(&mut frame, RedistRole::Source)?;
        red.flush();
        self.storage.apply(self.frames.command(), id)
    }
}

/// Spin until `ready` holds.
pub(crate) fn spin_until(mut ready: impl FnMut() -> bool) {
    while !ready() {
        std::thread::yield_now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_names_round_trip() {
        assert_eq!("LowHigh".parse::<FramePolicy>().unwrap(), FramePolicy::LowHigh);
        assert_eq!(StorageType::MainMem.to_string(), "mainmem");
        assert!("fifo".parse::<FramePolicy>().is_err());
        assert_eq!(FramePolicy::parse_or_default("fifo"), FramePolicy::Seq);
    }

    #[test]
    fn producer_gate_lets_quit_through() {
        let mut gate = ProdGate::new(3);
        let data = Container::new();
        let sent: Vec<bool> = (0..4).map(|_| gate.should_send(&data)).collect();
        assert_eq!(sent, vec![true, false, false, true]);
        let mut quit = Container::new();
        msgtools::set_quit(&mut quit).unwrap();
        assert!(gate.should_send(&quit));
    }
}
