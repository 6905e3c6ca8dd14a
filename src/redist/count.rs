//! Contiguous near-equal shares of the global item space.

use super::{GroupLayout, Strategy};
use crate::algs::communicator::Communicator;
use crate::data::container::Container;
use crate::redist_error::RedistError;
use std::ops::Range;

/// Global item range owned by destination `d` out of `nb_dests`; the first
/// `total % nb_dests` destinations get one extra item.
pub fn dest_range(total: u64, nb_dests: usize, d: usize) -> Range<u64> {
    let n = nb_dests as u64;
    let d = d as u64;
    let (q, r) = (total / n, total % n);
    d * q + d.min(r)..(d + 1) * q + (d + 1).min(r)
}

/// Items this rank sends to each destination, given its first global item.
pub fn dest_counts(first: u64, nb_local: u64, total: u64, nb_dests: usize) -> Vec<usize> {
    let local = first..first + nb_local;
    (0..nb_dests)
        .map(|d| {
            let r = dest_range(total, nb_dests, d);
            r.end.min(local.end).saturating_sub(r.start.max(local.start)) as usize
        })
        .collect()
}

/// Wrap split chunks into routes: destinations without items receive the
/// SYSTEM fields alone when there are any, nothing otherwise.
pub(crate) fn route_chunks(
    data: &Container,
    chunks: Vec<Container>,
    nb_items: impl Fn(usize) -> usize,
) -> Vec<Option<Container>> {
    let has_system = data.has_system();
    chunks
        .into_iter()
        .enumerate()
        .map(|(d, c)| match nb_items(d) {
            0 if has_system => Some(data.system_only()),
            0 => None,
            _ => Some(c),
        })
        .collect()
}

#[derive(Debug, Default, Clone)]
pub struct CountStrategy {
    global_item_rank: u64,
    global_nb_items: u64,
}

impl CountStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    /// First global item of this rank, from the last `compute_global`.
    pub fn global_item_rank(&self) -> u64 {
        self.global_item_rank
    }

    pub fn global_nb_items(&self) -> u64 {
        self.global_nb_items
    }
}

impl<C: Communicator> Strategy<C> for CountStrategy {
    fn name(&self) -> &'static str {
        "count"
    }

    fn compute_global(
        &mut self,
        layout: &GroupLayout<C>,
        data: &Container,
    ) -> Result<(), RedistError> {
        if !data.is_countable() {
            log::error!("count redistribution of a non-countable container");
            return Err(RedistError::NotCountable);
        }
        let local = data.nb_items() as u64;
        match layout.sources() {
            Some(sources) if layout.nb_sources() > 1 => {
                self.global_item_rank = sources.scan_sum(local) - local;
                self.global_nb_items = sources.all_reduce_sum(local);
            }
            _ => {
                self.global_item_rank = 0;
                self.global_nb_items = local;
            }
        }
        log::debug!(
            "count: items [{}, {}) of {}",
            self.global_item_rank,
            self.global_item_rank + local,
            self.global_nb_items
        );
        Ok(())
    }

    fn split_data(
        &mut self,
        layout: &GroupLayout<C>,
        data: &Container,
    ) -> Result<Vec<Option<Container>>, RedistError> {
        let counts = dest_counts(
            self.global_item_rank,
            data.nb_items() as u64,
            self.global_nb_items,
            layout.nb_dests(),
        );
        let chunks = data.split_counts(&counts)?;
        Ok(route_chunks(data, chunks, |d| counts[d]))
    }
}
