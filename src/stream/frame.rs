//! Frame selection policies.
//!
//! A frame manager runs on the dataflow root. It records the id of every
//! frame stored from the producers and, each time the consumer is ready,
//! picks the frame to forward. The [`FrameCommand`] then tells every
//! dataflow rank which stored frames to drop.

use std::collections::VecDeque;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum FrameCommand {
    /// Drop the forwarded frame only.
    Remove,
    /// Drop every frame up to the forwarded one, included.
    RemoveUntil,
    /// Drop every frame before the forwarded one.
    RemoveUntilExcluded,
}

pub trait FrameManager {
    /// Whether frame `id` is worth storing at all. Must depend on `id` only,
    /// since every dataflow rank asks independently.
    fn keeps(&self, _id: u32) -> bool {
        true
    }
    /// A new frame is available in storage.
    fn put_frame(&mut self, id: u32);
    /// Frame to forward next, if any.
    fn next_frame(&mut self) -> Option<u32>;
    /// Storage command applied once the frame returned by
    /// [`next_frame`](FrameManager::next_frame) is forwarded.
    fn command(&self) -> FrameCommand;
    /// Frames still eligible for forwarding.
    fn nb_pending(&self) -> usize;
}

/// Every frame, oldest first.
#[derive(Debug, Default)]
pub struct SeqFrameManager {
    queue: VecDeque<u32>,
}

impl FrameManager for SeqFrameManager {
    fn put_frame(&mut self, id: u32) {
        self.queue.push_back(id);
    }

    fn next_frame(&mut self) -> Option<u32> {
        self.queue.pop_front()
    }

    fn command(&self) -> FrameCommand {
        FrameCommand::Remove
    }

    fn nb_pending(&self) -> usize {
        self.queue.len()
    }
}

/// Only the newest frame; older ones are skipped.
#[derive(Debug, Default)]
pub struct RecentFrameManager {
    latest: Option<u32>,
}

impl FrameManager for RecentFrameManager {
    fn put_frame(&mut self, id: u32) {
        self.latest = Some(self.latest.map_or(id, |l| l.max(id)));
    }

    fn next_frame(&mut self) -> Option<u32> {
        self.latest.take()
    }

    fn command(&self) -> FrameCommand {
        FrameCommand::RemoveUntil
    }

    fn nb_pending(&self) -> usize {
        usize::from(self.latest.is_some())
    }
}

/// Frames whose id is a multiple of `high` are forwarded in order while
/// the consumer keeps up. When more than one is waiting, the manager jumps
/// to the newest one that is also a multiple of `low`, falling back to the
/// newest one.
#[derive(Debug)]
pub struct LowHighFrameManager {
    low: u32,
    high: u32,
    queue: VecDeque<u32>,
}

impl LowHighFrameManager {
    pub fn new(low: u32, high: u32) -> Self {
        Self {
            low: low.max(1),
            high: high.max(1),
            queue: VecDeque::new(),
        }
    }
}

impl FrameManager for LowHighFrameManager {
    fn keeps(&self, id: u32) -> bool {
        id % self.high == 0
    }

    fn put_frame(&mut self, id: u32) {
        if self.keeps(id) {
            self.queue.push_back(id);
        }
    }

    fn next_frame(&mut self) -> Option<u32> {
        if self.queue.len() <= 1 {
            return self.queue.pop_front();
        }
        let pick = self
            .queue
            .iter()
            .rev()
            .find(|id| *id % self.low == 0)
            .or(self.queue.back())
            .copied()?;
        log::debug!(
            "consumer lagging by {} frames, jumping to frame {pick}",
            self.queue.len()
        );
        self.queue.retain(|id| *id > pick);
        Some(pick)
    }

    fn command(&self) -> FrameCommand {
        FrameCommand::RemoveUntil
    }

    fn nb_pending(&self) -> usize {
        self.queue.len()
    }
}
