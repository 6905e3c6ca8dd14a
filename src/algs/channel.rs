//! One-way signalling channel between one source rank and a range of
//! receiver ranks.
//!
//! Every participant owns a single-integer slot. The source overwrites the
//! slot of every receiver with [`send_int`](OneWayChannel::send_int);
//! receivers read and compare-and-swap their own slot. Pending messages are
//! drained before each read, so the latest value sent wins.
//!
//! Ranks outside the channel read [`Command::Ok`] and never succeed a swap.

use crate::algs::communicator::{Communicator, Tag, Wait};
use crate::algs::wire::{decode_i32s, encode_i32s};
use parking_lot::Mutex;

pub const CHANNEL_TAG: Tag = 7;

/// Values exchanged on datastream channels.
#[repr(i32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Command {
    Ok = 0,
    Wait = 1,
    Get = 2,
    Put = 4,
}

impl Command {
    pub fn from_i32(v: i32) -> Option<Command> {
        match v {
            0 => Some(Command::Ok),
            1 => Some(Command::Wait),
            2 => Some(Command::Get),
            4 => Some(Command::Put),
            _ => None,
        }
    }
}

pub struct OneWayChannel<C: Communicator> {
    comm: Option<C>,
    rank_source: usize,
    recep: std::ops::Range<usize>,
    slot: Mutex<i32>,
    pending: Mutex<Vec<C::SendHandle>>,
}

impl<C: Communicator> OneWayChannel<C> {
    /// Channel from world rank `source` to world ranks
    /// `[start_recep, start_recep + nb_recep)`. Every rank of `world` may
    /// call this; only participants take part in the group creation.
    pub fn new(world: &C, source: usize, start_recep: usize, nb_recep: usize, default: i32) -> Self {
        let end_recep = start_recep + nb_recep;
        let (ranges, rank_source, recep) = if (start_recep..end_recep).contains(&source) {
            (vec![start_recep..end_recep], source - start_recep, 0..nb_recep)
        } else if source < start_recep {
            (vec![source..source + 1, start_recep..end_recep], 0, 1..nb_recep + 1)
        } else {
            (vec![start_recep..end_recep, source..source + 1], nb_recep, 0..nb_recep)
        };
        let comm = world.subgroup(&ranges);
        log::debug!(
            "channel {source} -> [{start_recep}, {end_recep}) created, member: {}",
            comm.is_some()
        );
        Self {
            comm,
            rank_source,
            recep,
            slot: Mutex::new(default),
            pending: Mutex::new(Vec::new()),
        }
    }

    pub fn is_in_channel(&self) -> bool {
        self.comm.is_some()
    }

    pub fn is_source(&self) -> bool {
        self.comm.as_ref().is_some_and(|c| c.rank() == self.rank_source)
    }

    pub fn is_recep(&self) -> bool {
        self.comm
            .as_ref()
            .is_some_and(|c| self.recep.contains(&c.rank()))
    }

    fn drain(&self) {
        let Some(comm) = &self.comm else {
            return;
        };
        while let Some((src, data)) = comm.try_probe_receive(CHANNEL_TAG) {
            match decode_i32s(&data) {
                Ok(v) if v.len() == 1 => *self.slot.lock() = v[0],
                _ => log::warn!("malformed channel message from rank {src}"),
            }
        }
    }

    /// Overwrite the slot of every receiver. No-op outside the source.
    pub fn send_int(&self, value: i32) {
        let Some(comm) = self.comm.as_ref().filter(|_| self.is_source()) else {
            return;
        };
        let mut pending = self.pending.lock();
        for h in pending.drain(..) {
            h.wait();
        }
        for r in self.recep.clone() {
            if r == comm.rank() {
                *self.slot.lock() = value;
            } else {
                pending.push(comm.isend(r, CHANNEL_TAG, encode_i32s(&[value])));
            }
        }
    }

    /// Block until the next value sent by the source arrives. The source
    /// reads its own slot.
    pub fn recv_int(&self) -> i32 {
        let Some(comm) = &self.comm else {
            return Command::Ok as i32;
        };
        if self.is_source() {
            return *self.slot.lock();
        }
        let data = comm.receive_from(self.rank_source, CHANNEL_TAG);
        let mut slot = self.slot.lock();
        match decode_i32s(&data) {
            Ok(v) if v.len() == 1 => *slot = v[0],
            _ => log::warn!("malformed channel message from rank {}", self.rank_source),
        }
        *slot
    }

    pub fn send_command(&self, command: Command) {
        self.send_int(command as i32);
    }

    pub fn check_self_int(&self) -> i32 {
        if !self.is_in_channel() {
            return Command::Ok as i32;
        }
        self.drain();
        *self.slot.lock()
    }

    pub fn check_self_command(&self, command: Command) -> bool {
        self.check_self_int() == command as i32
    }

    pub fn update_self_value(&self, value: i32) {
        if self.is_in_channel() {
            self.drain();
            *self.slot.lock() = value;
        }
    }

    /// Swap in `replace` if the slot holds `wanted`.
    pub fn check_and_replace_self_int(&self, wanted: i32, replace: i32) -> bool {
        if !self.is_in_channel() {
            return false;
        }
        self.drain();
        let mut slot = self.slot.lock();
        if *slot == wanted {
            *slot = replace;
            true
        } else {
            false
        }
    }

    pub fn check_and_replace_self_command(&self, wanted: Command, replace: Command) -> bool {
        self.check_and_replace_self_int(wanted as i32, replace as i32)
    }

    /// Swap in `replace` if the slot differs from `different`; returns the
    /// value found.
    pub fn check_different_and_replace_self_int(&self, different: i32, replace: i32) -> Option<i32> {
        if !self.is_in_channel() {
            return None;
        }
        self.drain();
        let mut slot = self.slot.lock();
        if *slot != different {
            let found = *slot;
            *slot = replace;
            Some(found)
        } else {
            None
        }
    }
}

impl<C: Communicator> Drop for OneWayChannel<C> {
    fn drop(&mut self) {
        for h in self.pending.get_mut().drain(..) {
            h.wait();
        }
    }
}
