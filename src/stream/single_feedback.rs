//! Consumer-driven flow control through a buffering dataflow.
//!
//! Producers send every iteration. Each dataflow step pulls one producer
//! frame into storage; the dataflow root then checks whether the consumer
//! asked for more and, if so, picks a frame with the frame manager and
//! tells every dataflow rank which frame to forward. The consumer root
//! signals [`Command::Ok`] before each receive except the first.

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

pub struct SingleFeedback<C: Communicator> {
    rank: usize,
    ranks: StreamRanks,
    prod_dflow: DynRedistComp<C>,
    dflow_con: DynRedistComp<C>,
    /// Consumer root to dataflow root.
    con_dflow: OneWayChannel<C>,
    /// Dataflow root to every dataflow rank: frame decisions.
    dflow: OneWayChannel<C>,
    buffer: FrameBuffer,
    gate: ProdGate,
    first_send: bool,
    first_con: bool,
    quit: Option<Container>,
}

impl<C: Communicator> SingleFeedback<C> {
    pub fn new(
        config: &StreamConfig,
        world: &C,
        ranks: StreamRanks,
        prod_dflow: DynRedistComp<C>,
        dflow_con: DynRedistComp<C>,
    ) -> Result<Self, RedistError> {
        let rank = world.rank();
        let con_dflow = OneWayChannel::new(
            world,
            ranks.con.start,
            ranks.dflow.start,
            1,
            Command::Wait as i32,
        );
        let dflow = OneWayChannel::new(
            world,
            ranks.dflow.start,
            ranks.dflow.start,
            StreamRanks::len(&ranks.dflow),
            NO_FRAME,
        );
        Ok(Self {
            rank,
            buffer: FrameBuffer::new(config, rank)?,
            gate: ProdGate::new(config.prod_freq_output),
            ranks,
            prod_dflow,
            dflow_con,
            con_dflow,
            dflow,
            first_send: true,
            first_con: true,
            quit: None,
        })
    }

    fn is_dflow_root(&self) -> bool {
        self.rank == self.ranks.dflow.start
    }

    /// Root only: block until the consumer is ready for a frame.
    fn wait_consumer(&mut self) {
        if !self.first_send {
            let channel = &self.con_dflow;
            spin_until(|| channel.check_and_replace_self_command(Command::Ok, Command::Wait));
        }
        self.first_send = false;
    }

    fn forward(&mut self, decision: i32) -> Result<(), RedistError> {
        if decision >= 0 {
            self.buffer.forward(decision as u32, &mut self.dflow_con)?;
        }
        Ok(())
    }

    /// Forward every pending frame as the consumer asks for them, then the
    /// quit message.
    fn drain(&mut self) -> Result<(), RedistError> {
        if self.is_dflow_root() {
            while self.buffer.frames.nb_pending() > 0 {
                self.wait_consumer();
                let Some(id) = self.buffer.frames.next_frame() else {
                    break;
                };
                self.dflow.send_int(id as i32);
                self.forward(id as i32)?;
            }
            self.dflow.send_int(QUIT_FRAME);
        } else {
            loop {
                match self.dflow.recv_int() {
                    QUIT_FRAME => break,
                    decision => self.forward(decision)?,
                }
            }
        }
        let mut quit = self.quit.take().unwrap_or_default();
        self.dflow_con.process(&mut quit, RedistRole::Source)?;
        self.dflow_con.flush();
        log::debug!("dataflow rank {} forwarded the quit message", self.rank);
        Ok(())
    }
}

impl<C: Communicator> Datastream for SingleFeedback<C> {
    fn process_prod(&mut self, data: &mut Container) -> Result<bool, RedistError> {
        if !self.ranks.is_prod(self.rank) || !self.gate.should_send(data) {
            return Ok(false);
        }
        self.prod_dflow.process(data, RedistRole::Source)?;
        self.prod_dflow.flush();
        Ok(true)
    }

    fn process_dflow(&mut self, data: &mut Container) -> Result<bool, RedistError> {
        if !self.ranks.is_dflow(self.rank) {
            return Ok(false);
        }
        data.purge_data();
        self.prod_dflow.process(data, RedistRole::Dest)?;
        if msgtools::is_quit(data) {
            self.quit = Some(data.clone());
            self.drain()?;
            return Ok(false);
        }
        let root = self.is_dflow_root();
        self.buffer.store(data, root)?;

        let decision = if root {
            let ready = self.buffer.frames.nb_pending() > 0
                && (self.first_send
                    || self
                        .con_dflow
                        .check_and_replace_self_command(Command::Ok, Command::Wait));
            let decision = match ready.then(|| self.buffer.frames.next_frame()).flatten() {
                Some(id) => {
                    self.first_send = false;
                    id as i32
                }
                None => NO_FRAME,
            };
            self.dflow.send_int(decision);
            decision
        } else {
            self.dflow.recv_int()
        };
        self.forward(decision)?;
        Ok(true)
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
