#![cfg_attr(docsrs, feature(doc_cfg))]
//! # dataflow-redist
//!
//! dataflow-redist moves self-describing data containers between the
//! process groups of a parallel workflow. A producer group of M ranks hands
//! a [`Container`](data::Container) to a redistribution component, which
//! splits it into per-destination chunks and ships them to a consumer
//! group of N ranks, where they are merged back into one container.
//!
//! ## Features
//! - Typed fields (scalars, arrays, vectors, spatial blocks) with per-field
//!   scope, split policy and merge policy
//! - Redistribution by item count, round-robin, spatial block, Z-curve or
//!   process folding, over collective or point-to-point protocols
//! - Overlapping or disjoint source and destination rank ranges, with an
//!   in-memory transit path for self-addressed chunks
//! - Datastreams: single and double feedback flow control with pluggable
//!   frame policies and memory or file storage tiers
//! - Pluggable communicators: in-process threads for tests, MPI for runs
//!
//! ## Usage
//!
//! ```toml
//! [dependencies]
//! dataflow-redist = "0.3"
//! # Optional features:
//! # features = ["mpi-support","rayon"]
//! ```
//!
//! Each iteration a source calls
//! [`RedistComp::process`](redist::RedistComp::process) with
//! [`RedistRole::Source`](redist::RedistRole::Source), a destination calls it
//! with [`RedistRole::Dest`](redist::RedistRole::Dest), then both call
//! [`flush`](redist::RedistComp::flush).
//!
//! ## Errors
//!
//! Configuration errors (non-dividing process counts, non-countable data, a
//! missing domain block or Z-curve key) are returned as
//! [`RedistError`](redist_error::RedistError) values for which
//! [`is_fatal`](redist_error::RedistError::is_fatal) holds. The collectives
//! that follow would deadlock, so callers abort the whole job with
//! [`Communicator::abort`](algs::communicator::Communicator::abort), or let
//! [`RedistComp::abort_on_fatal`](redist::RedistComp::abort_on_fatal) do it.

pub mod algs;
pub mod data;
pub mod redist;
pub mod redist_error;
pub mod stream;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::algs::channel::{Command, OneWayChannel};
    pub use crate::algs::communicator::{Communicator, LocalComm, NoComm, Wait};
    #[cfg(feature = "mpi-support")]
    pub use crate::algs::communicator::MpiComm;
    pub use crate::data::msgtools::{is_quit, set_quit};
    pub use crate::data::{
        BBox, Block, Container, Element, Extents, Field, Flags, MergePolicy, Scope, SplitPolicy,
    };
    pub use crate::redist::{
        BlockStrategy, CommMethod, CountStrategy, DynRedistComp, MergeMethod, ProcStrategy,
        RedistComp, RedistConfig, RedistRole, RoundStrategy, Strategy, StrategyKind,
        ZCurveConfig, ZCurveStrategy,
    };
    pub use crate::redist_error::RedistError;
    pub use crate::stream::{
        build_datastream, Datastream, StreamConfig, StreamLinks, StreamPolicy, StreamRanks,
    };
}
