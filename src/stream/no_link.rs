//! Consumer-driven flow control without a dataflow: the producer root
//! waits for the consumer root before each send but the first.

use super::{spin_until, Datastream, ProdGate, StreamConfig, StreamRanks};
use crate::algs::channel::{Command, OneWayChannel};
use crate::algs::communicator::Communicator;
use crate::data::container::Container;
use crate::redist::{DynRedistComp, RedistRole};
use crate::redist_error::RedistError;

pub struct NoLink<C: Communicator> {
    rank: usize,
    ranks: StreamRanks,
    prod_con: DynRedistComp<C>,
    /// Consumer root to producer root.
    con_prod: OneWayChannel<C>,
    /// Producer root to every producer rank.
    prod: OneWayChannel<C>,
    gate: ProdGate,
    first_prod: bool,
    first_con: bool,
}

impl<C: Communicator> NoLink<C> {
    pub fn new(
        config: &StreamConfig,
        world: &C,
        ranks: StreamRanks,
        prod_con: DynRedistComp<C>,
    ) -> Self {
        let con_prod = OneWayChannel::new(
            world,
            ranks.con.start,
            ranks.prod.start,
            1,
            Command::Wait as i32,
        );
        let prod = OneWayChannel::new(
            world,
            ranks.prod.start,
            ranks.prod.start,
            StreamRanks::len(&ranks.prod),
            Command::Wait as i32,
        );
        Self {
            rank: world.rank(),
            gate: ProdGate::new(config.prod_freq_output),
            ranks,
            prod_con,
            con_prod,
            prod,
            first_prod: true,
            first_con: true,
        }
    }
}

impl<C: Communicator> Datastream for NoLink<C> {
    fn process_prod(&mut self, data: &mut Container) -> Result<bool, RedistError> {
        if !self.ranks.is_prod(self.rank) || !self.gate.should_send(data) {
            return Ok(false);
        }
        if self.rank == self.ranks.prod.start {
            if !self.first_prod {
                let channel = &self.con_prod;
                spin_until(|| channel.check_and_replace_self_command(Command::Ok, Command::Wait));
            }
            self.prod.send_command(Command::Ok);
        } else {
            self.prod.recv_int();
        }
        self.first_prod = false;
        self.prod_con.process(data, RedistRole::Source)?;
        self.prod_con.flush();
        Ok(true)
    }

    fn process_dflow(&mut self, _data: &mut Container) -> Result<bool, RedistError> {
        Ok(false)
    }

    fn process_con(&mut self, data: &mut Container) -> Result<(), RedistError> {
        if !self.ranks.is_con(self.rank) {
            return Ok(());
        }
        data.purge_data();
        if !self.first_con && self.rank == self.ranks.con.start {
            self.con_prod.send_command(Command::Ok);
        }
        self.first_con = false;
        self.prod_con.process(data, RedistRole::Dest)
    }
}
