//! Transport plumbing: communicators, wire records and signalling channels.

pub mod channel;
pub mod communicator;
pub mod wire;

pub use channel::{Command, OneWayChannel};
pub use communicator::{Communicator, LocalComm, NoComm, Tag, Wait};
#[cfg(feature = "mpi-support")]
pub use communicator::MpiComm;
