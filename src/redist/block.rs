//! Spatial placement over a regular grid.
//!
//! The global domain, held in the [`DOMAIN_BLOCK`] field, is bisected into
//! one sub-block per destination. Block fields are cut to the overlap with
//! each sub-block; item fields follow the position of their items.

use super::{GroupLayout, Strategy};
use crate::algs::communicator::Communicator;
use crate::data::block::{Block, Extents};
use crate::data::container::Container;
use crate::data::field::Field;
use crate::redist_error::RedistError;

pub const DOMAIN_BLOCK: &str = "domain_block";

/// Bisect `domain` into `k` sub-blocks. Each cut halves the longest axis of
/// the current extents (the lowest axis on ties), the first half taking
/// the extra cell, and hands `⌈k/2⌉` blocks to the first half.
pub fn bvh_split(domain: &Block, k: usize) -> Result<Vec<Block>, RedistError> {
    let (Some(ext), Some(_), Some(_)) = (
        domain.global_extents,
        domain.global_bbox,
        domain.gridspace,
    ) else {
        log::error!("domain block needs global extents, a global box and a grid spacing");
        return Err(RedistError::MissingDomainBlock(DOMAIN_BLOCK.into()));
    };
    let mut leaves = Vec::with_capacity(k);
    bisect(ext, k, &mut leaves);
    Ok(leaves
        .into_iter()
        .map(|e| {
            let mut b = Block {
                gridspace: domain.gridspace,
                global_bbox: domain.global_bbox,
                global_extents: domain.global_extents,
                local_extents: Some(e),
                own_extents: Some(e),
                ..Block::default()
            };
            b.update_extents();
            if let Some(g) = domain.ghost_size.filter(|g| *g > 0) {
                b.build_ghost_regions(g);
            }
            b
        })
        .collect())
}

fn bisect(ext: Extents, k: usize, out: &mut Vec<Extents>) {
    if k <= 1 {
        out.push(ext);
        return;
    }
    let mut axis = 0;
    for i in 1..3 {
        if ext.count[i] > ext.count[axis] {
            axis = i;
        }
    }
    let n = ext.count[axis];
    let c1 = n / 2 + n % 2;
    let mut first = ext;
    first.count[axis] = c1;
    let mut second = ext;
    second.offset[axis] += c1;
    second.count[axis] = n - c1;
    bisect(first, k - k / 2, out);
    bisect(second, k / 2, out);
}

#[derive(Debug, Default, Clone)]
pub struct BlockStrategy {
    blocks: Vec<Block>,
}

impl BlockStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sub-blocks of the last split, one per destination.
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }
}

impl<C: Communicator> Strategy<C> for BlockStrategy {
    fn name(&self) -> &'static str {
        "block"
    }

    fn compute_global(
        &mut self,
        layout: &GroupLayout<C>,
        data: &Container,
    ) -> Result<(), RedistError> {
        let Some(domain) = data.get_block(DOMAIN_BLOCK) else {
            log::error!("block redistribution without a `{DOMAIN_BLOCK}` field");
            return Err(RedistError::MissingDomainBlock(DOMAIN_BLOCK.into()));
        };
        if !data.is_partially_countable() {
            log::error!("block redistribution of a container with incoherent item counts");
            return Err(RedistError::NotCountable);
        }
        if self.blocks.len() != layout.nb_dests() {
            self.blocks = bvh_split(domain, layout.nb_dests())?;
        }
        Ok(())
    }

    fn split_data(
        &mut self,
        _layout: &GroupLayout<C>,
        data: &Container,
    ) -> Result<Vec<Option<Container>>, RedistError> {
        let chunks = data.split_blocks(&self.blocks)?;
        let has_items = data.nb_items() > 0;
        chunks
            .into_iter()
            .zip(&self.blocks)
            .map(|(mut chunk, sub)| {
                chunk.update_data(DOMAIN_BLOCK, Field::block(sub.clone()))?;
                Ok((!has_items || chunk.nb_items() > 0).then_some(chunk))
            })
            .collect()
    }
}
