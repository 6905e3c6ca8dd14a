//! Flow control on both sides of the dataflow.
//!
//! The producer root requests a buffer slot before every send and waits
//! for the dataflow root to grant it. The dataflow root runs the schedule:
//! each step it either grants a producer request while storage has room
//! ([`Command::Get`]: every dataflow rank pulls a producer frame) or
//! forwards a frame to a ready consumer ([`Command::Put`] followed by the
//! frame id). When the producers have quit and storage is drained, the
//! quit message goes to the consumers.

use super::{
    spin_until, Datastream, FrameBuffer, ProdGate, StreamConfig, StreamRanks, NO_FRAME,
    QUIT_FRAME,
};
use crate::algs::channel::{Command, OneWayChannel};
use crate::algs::communicator::Communicator;
use crate::data::container::Container;
use crate::data::msgtools;
use crate::redist::{DynRedistComp, RedistRole};
use crate::redist_error::RedistError;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Step {
    Get,
    Put(u32),
    Quit,
}

pub struct DoubleFeedback<C: Communicator> {
    rank: usize,
    ranks: StreamRanks,
    blocking: bool,
    prod_dflow: DynRedistComp<C>,
    dflow_con: DynRedistComp<C>,
    /// Consumer root to dataflow root: ready for a frame.
    con_dflow: OneWayChannel<C>,
    /// Producer root to dataflow root: slot request.
    request: OneWayChannel<C>,
    /// Dataflow root to producer root: slot granted.
    grant: OneWayChannel<C>,
    /// Dataflow root to every dataflow rank: schedule.
    dflow: OneWayChannel<C>,
    /// Producer root to every producer rank.
    prod: OneWayChannel<C>,
    buffer: FrameBuffer,
    gate: ProdGate,
    first_send: bool,
    first_con: bool,
    producer_done: bool,
    quit: Option<Container>,
}

impl<C: Communicator> DoubleFeedback<C> {
    pub fn new(
        config: &StreamConfig,
        world: &C,
        ranks: StreamRanks,
        prod_dflow: DynRedistComp<C>,
        dflow_con: DynRedistComp<C>,
    ) -> Result<Self, RedistError> {
        let rank = world.rank();
        let (prod_root, dflow_root, con_root) = (ranks.prod.start, ranks.dflow.start, ranks.con.start);
        let con_dflow = OneWayChannel::new(world, con_root, dflow_root, 1, Command::Wait as i32);
        let request = OneWayChannel::new(world, prod_root, dflow_root, 1, Command::Ok as i32);
        let grant = OneWayChannel::new(world, dflow_root, prod_root, 1, Command::Wait as i32);
        let dflow = OneWayChannel::new(
            world,
            dflow_root,
            dflow_root,
            StreamRanks::len(&ranks.dflow),
            NO_FRAME,
        );
        let prod = OneWayChannel::new(
            world,
            prod_root,
            prod_root,
            StreamRanks::len(&ranks.prod),
            Command::Wait as i32,
        );
        Ok(Self {
            rank,
            blocking: config.blocking,
            buffer: FrameBuffer::new(config, rank)?,
            gate: ProdGate::new(config.prod_freq_output),
            ranks,
            prod_dflow,
            dflow_con,
            con_dflow,
            request,
            grant,
            dflow,
            prod,
            first_send: true,
            first_con: true,
            producer_done: false,
            quit: None,
        })
    }

    /// Root only: wait for the next thing to do and tell the other
    /// dataflow ranks.
    fn schedule(&mut self) -> Step {
        let step = loop {
            let room = !self.buffer.storage.is_full() || !self.blocking;
            if !self.producer_done
                && room
                && self
                    .request
                    .check_and_replace_self_command(Command::Wait, Command::Ok)
            {
                self.grant.send_command(Command::Ok);
                break Step::Get;
            }
            if self.buffer.frames.nb_pending() > 0
                && (self.first_send
                    || self
                        .con_dflow
                        .check_and_replace_self_command(Command::Ok, Command::Wait))
            {
                if let Some(id) = self.buffer.frames.next_frame() {
                    self.first_send = false;
                    break Step::Put(id);
                }
            }
            if self.producer_done && self.buffer.frames.nb_pending() == 0 {
                break Step::Quit;
            }
            std::thread::yield_now();
        };
        match step {
            Step::Get => self.dflow.send_command(Command::Get),
            Step::Put(id) => {
                self.dflow.send_command(Command::Put);
                self.dflow.send_int(id as i32);
            }
            Step::Quit => self.dflow.send_int(QUIT_FRAME),
        }
        step
    }

    fn follow(&self) -> Result<Step, RedistError> {
        let v = self.dflow.recv_int();
        match Command::from_i32(v) {
            Some(Command::Get) => Ok(Step::Get),
            Some(Command::Put) => Ok(Step::Put(self.dflow.recv_int() as u32)),
            _ if v == QUIT_FRAME => Ok(Step::Quit),
            _ => Err(RedistError::CommError {
                peer: self.ranks.dflow.start,
                reason: format!("unexpected dataflow command {v}"),
            }),
        }
    }
}

impl<C: Communicator> Datastream for DoubleFeedback<C> {
    fn process_prod(&mut self, data: &mut Container) -> Result<bool, RedistError> {
        if !self.ranks.is_prod(self.rank) || !self.gate.should_send(data) {
            return Ok(false);
        }
        if self.rank == self.ranks.prod.start {
            self.request.send_command(Command::Wait);
            let grant = &self.grant;
            spin_until(|| grant.check_and_replace_self_command(Command::Ok, Command::Wait));
            self.prod.send_command(Command::Ok);
        } else {
            self.prod.recv_int();
        }
        self.prod_dflow.process(data, RedistRole::Source)?;
        self.prod_dflow.flush();
        Ok(true)
    }

    fn process_dflow(&mut self, data: &mut Container) -> Result<bool, RedistError> {
        if !self.ranks.is_dflow(self.rank) {
            return Ok(false);
        }
        let root = self.rank == self.ranks.dflow.start;
        let step = if root { self.schedule() } else { self.follow()? };
        log::trace!("dataflow rank {}: {step:?}", self.rank);
        match step {
            Step::Get => {
                data.purge_data();
                self.prod_dflow.process(data, RedistRole::Dest)?;
                if msgtools::is_quit(data) {
                    self.producer_done = true;
                    self.quit = Some(data.clone());
                } else {
                    self.buffer.store(data, root)?;
                }
                Ok(true)
            }
            Step::Put(id) => {
                data.purge_data();
                self.buffer.forward(id, &mut self.dflow_con)?;
                Ok(true)
            }
            Step::Quit => {
                let mut quit = self.quit.take().unwrap_or_default();
                self.dflow_con.process(&mut quit, RedistRole::Source)?;
                self.dflow_con.flush();
                Ok(false)
            }
        }
    }

    fn process_con(&mut self, data: &mut Container) -> Result<(), RedistError> {
        if !self.ranks.is_con(self.rank) {
            return Ok(());
        }
        data.purge_data();
        if !self.first_con && self.rank == self.ranks.con.start {
            self.con_dflow.send_command(Command::Ok);
        }
        self.first_con = false;
        self.dflow_con.process(data, RedistRole::Dest)
    }
}
