//! Rank folding: whole containers go from source ranks to destination
//! ranks by rank arithmetic alone.
//!
//! With `M` sources and `N` destinations, `M >= N` gathers `M / N`
//! consecutive sources into each destination, and `M < N` broadcasts each
//! source to `N / M` consecutive destinations. One count must divide the
//! other.

use super::{GroupLayout, Strategy};
use crate::algs::communicator::Communicator;
use crate::data::container::Container;
use crate::redist_error::RedistError;
use std::ops::Range;

/// Routing between `nb_sources` and `nb_dests` ranks.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Folding {
    Gather { per_dest: usize },
    Broadcast { per_source: usize },
}

impl Folding {
    pub fn new(nb_sources: usize, nb_dests: usize) -> Result<Self, RedistError> {
        if nb_sources == 0 || nb_dests == 0 {
            return Err(RedistError::InvalidConfig(
                "process redistribution needs at least one source and one destination".into(),
            ));
        }
        if nb_sources >= nb_dests {
            if nb_sources % nb_dests != 0 {
                log::error!(
                    "process redistribution: {nb_dests} destinations do not divide {nb_sources} sources"
                );
                return Err(RedistError::InvalidConfig(format!(
                    "{nb_sources} sources cannot be gathered into {nb_dests} destinations"
                )));
            }
            Ok(Folding::Gather {
                per_dest: nb_sources / nb_dests,
            })
        } else {
            if nb_dests % nb_sources != 0 {
                log::error!(
                    "process redistribution: {nb_sources} sources do not divide {nb_dests} destinations"
                );
                return Err(RedistError::InvalidConfig(format!(
                    "{nb_sources} sources cannot be broadcast to {nb_dests} destinations"
                )));
            }
            Ok(Folding::Broadcast {
                per_source: nb_dests / nb_sources,
            })
        }
    }

    /// Destination indices fed by source `s`.
    pub fn dests_of(&self, s: usize) -> Range<usize> {
        match *self {
            Folding::Gather { per_dest } => s / per_dest..s / per_dest + 1,
            Folding::Broadcast { per_source } => s * per_source..(s + 1) * per_source,
        }
    }

    /// Source indices feeding destination `d`, ascending.
    pub fn sources_of(&self, d: usize) -> Range<usize> {
        match *self {
            Folding::Gather { per_dest } => d * per_dest..(d + 1) * per_dest,
            Folding::Broadcast { per_source } => d / per_source..d / per_source + 1,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct ProcStrategy;

impl ProcStrategy {
    pub fn new() -> Self {
        Self
    }
}

fn folding<C: Communicator>(layout: &GroupLayout<C>) -> Result<Folding, RedistError> {
    Folding::new(layout.nb_sources(), layout.nb_dests())
}

impl<C: Communicator> Strategy<C> for ProcStrategy {
    fn name(&self) -> &'static str {
        "proc"
    }

    fn split_data(
        &mut self,
        layout: &GroupLayout<C>,
        data: &Container,
    ) -> Result<Vec<Option<Container>>, RedistError> {
        let fold = folding(layout)?;
        let mut chunks = vec![None; layout.nb_dests()];
        if let Some(s) = layout.source_index() {
            for d in fold.dests_of(s) {
                chunks[d] = Some(data.clone());
            }
        }
        Ok(chunks)
    }

    fn fixed_sources(&self, layout: &GroupLayout<C>) -> Result<Option<Vec<usize>>, RedistError> {
        let fold = folding(layout)?;
        Ok(Some(
            layout
                .dest_index()
                .map(|d| fold.sources_of(d).collect())
                .unwrap_or_default(),
        ))
    }
}
