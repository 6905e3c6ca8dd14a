//! Round-robin placement: global item `g` goes to destination `g mod N`.

use super::count::route_chunks;
use super::{GroupLayout, Strategy};
use crate::algs::communicator::Communicator;
use crate::data::container::{push_item, Container};
use crate::redist_error::RedistError;
use std::ops::Range;

/// Item runs per destination for `nb_local` items starting at global
/// index `first`.
pub fn round_segments(first: u64, nb_local: usize, nb_dests: usize) -> Vec<Vec<Range<usize>>> {
    let mut segments = vec![Vec::new(); nb_dests];
    for i in 0..nb_local {
        let d = ((first + i as u64) % nb_dests as u64) as usize;
        push_item(&mut segments[d], i);
    }
    segments
}

#[derive(Debug, Default, Clone)]
pub struct RoundStrategy {
    global_item_rank: u64,
}

impl RoundStrategy {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<C: Communicator> Strategy<C> for RoundStrategy {
    fn name(&self) -> &'static str {
        "round"
    }

    fn compute_global(
        &mut self,
        layout: &GroupLayout<C>,
        data: &Container,
    ) -> Result<(), RedistError> {
        if !data.is_partially_countable() {
            log::error!("round redistribution of a container with incoherent item counts");
            return Err(RedistError::NotCountable);
        }
        let local = data.nb_items() as u64;
        self.global_item_rank = match layout.sources() {
            Some(sources) if layout.nb_sources() > 1 => sources.scan_sum(local) - local,
            _ => 0,
        };
        Ok(())
    }

    fn split_data(
        &mut self,
        layout: &GroupLayout<C>,
        data: &Container,
    ) -> Result<Vec<Option<Container>>, RedistError> {
        let segments = round_segments(self.global_item_rank, data.nb_items(), layout.nb_dests());
        let chunks = data.split_segments(&segments)?;
        let sizes: Vec<usize> = segments
            .iter()
            .map(|runs| runs.iter().map(|r| r.len()).sum())
            .collect();
        Ok(route_chunks(data, chunks, |d| sizes[d]))
    }
}
