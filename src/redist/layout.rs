//! Communicators of one redistribution link.
//!
//! The link communicator covers the source range and the destination range
//! of the world. Disjoint ranges are laid out in increasing world order;
//! overlapping ranges are covered by one contiguous range. Sources are then
//! the ranks `[local_source, local_source + nb_sources)` of the link
//! communicator and destinations `[local_dest, local_dest + nb_dests)`.

use crate::algs::communicator::Communicator;
use std::ops::Range;

pub struct GroupLayout<C> {
    comm: Option<C>,
    sources: Option<C>,
    dests: Option<C>,
    local_source: usize,
    local_dest: usize,
    nb_sources: usize,
    nb_dests: usize,
}

impl<C: Communicator> GroupLayout<C> {
    /// Every rank of `world` may call this; ranks outside both ranges end up
    /// with no communicator.
    pub fn new(
        world: &C,
        rank_source: usize,
        nb_sources: usize,
        rank_dest: usize,
        nb_dests: usize,
    ) -> Self {
        let src = rank_source..rank_source + nb_sources;
        let dst = rank_dest..rank_dest + nb_dests;
        let disjoint = dst.start >= src.end || src.start >= dst.end;

        let (ranges, local_source, local_dest): (Vec<Range<usize>>, usize, usize) = if disjoint {
            if rank_dest < rank_source {
                (vec![dst.clone(), src.clone()], nb_dests, 0)
            } else {
                (vec![src.clone(), dst.clone()], 0, nb_sources)
            }
        } else {
            let lo = rank_source.min(rank_dest);
            let hi = src.end.max(dst.end);
            if rank_dest < rank_source {
                (vec![lo..hi], rank_source - rank_dest, 0)
            } else {
                (vec![lo..hi], 0, rank_dest - rank_source)
            }
        };

        let comm = world.subgroup(&ranges);
        let sources = world.subgroup(std::slice::from_ref(&src));
        let dests = world.subgroup(std::slice::from_ref(&dst));
        log::debug!(
            "link sources {src:?} -> dests {dst:?}: local source {local_source}, local dest {local_dest}"
        );
        Self {
            comm,
            sources,
            dests,
            local_source,
            local_dest,
            nb_sources,
            nb_dests,
        }
    }

    pub fn comm(&self) -> Option<&C> {
        self.comm.as_ref()
    }

    pub fn sources(&self) -> Option<&C> {
        self.sources.as_ref()
    }

    pub fn dests(&self) -> Option<&C> {
        self.dests.as_ref()
    }

    /// Rank in the link communicator.
    pub fn rank(&self) -> Option<usize> {
        self.comm.as_ref().map(|c| c.rank())
    }

    pub fn nb_sources(&self) -> usize {
        self.nb_sources
    }

    pub fn nb_dests(&self) -> usize {
        self.nb_dests
    }

    /// Link rank of the first source (the source root).
    pub fn local_source(&self) -> usize {
        self.local_source
    }

    /// Link rank of the first destination (the destination root).
    pub fn local_dest(&self) -> usize {
        self.local_dest
    }

    pub fn is_source(&self) -> bool {
        self.source_index().is_some()
    }

    pub fn is_dest(&self) -> bool {
        self.dest_index().is_some()
    }

    /// Index of this rank among the sources.
    pub fn source_index(&self) -> Option<usize> {
        let r = self.rank()?;
        (self.local_source..self.local_source + self.nb_sources)
            .contains(&r)
            .then(|| r - self.local_source)
    }

    /// Index of this rank among the destinations.
    pub fn dest_index(&self) -> Option<usize> {
        let r = self.rank()?;
        (self.local_dest..self.local_dest + self.nb_dests)
            .contains(&r)
            .then(|| r - self.local_dest)
    }

    pub fn dest_rank(&self, dest_index: usize) -> usize {
        self.local_dest + dest_index
    }

    pub fn source_rank(&self, source_index: usize) -> usize {
        self.local_source + source_index
    }

    /// Both roots live on the same rank.
    pub fn shared_root(&self) -> bool {
        self.local_source == self.local_dest
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;

    #[test]
    fn single_rank_overlap() {
        let l = GroupLayout::new(&NoComm, 0, 1, 0, 1);
        assert!(l.is_source() && l.is_dest());
        assert!(l.shared_root());
        assert_eq!(l.source_index(), Some(0));
        assert_eq!(l.dest_index(), Some(0));
    }

    #[test]
    fn outside_rank_has_no_role() {
        let l = GroupLayout::new(&NoComm, 1, 2, 3, 2);
        assert!(l.comm().is_none());
        assert!(!l.is_source() && !l.is_dest());
    }
}
