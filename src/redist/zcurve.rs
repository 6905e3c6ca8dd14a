//! Space-filling-curve placement.
//!
//! Points of the ZCURVEKEY field are binned into a `slices[0] x slices[1] x
//! slices[2]` grid over the global bounding box; each cell is Morton-encoded
//! and the code range `[0, morton(slices - 1)]` is cut into `N` contiguous
//! buckets, the first `max_index % N` one code longer than the others.
//! Codes hold 10 bits per axis, so each axis has at most 1024 slices.

use super::count::route_chunks;
use super::{GroupLayout, Strategy};
use crate::algs::communicator::Communicator;
use crate::data::container::{push_item, Container};
use crate::data::morton::{morton_encode, AXIS_CELLS};
use crate::redist_error::RedistError;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZCurveConfig {
    /// `[min_x, min_y, min_z, max_x, max_y, max_z]`; measured over the
    /// sources on first use when absent.
    pub bbox: Option<[f32; 6]>,
    pub slices: [i32; 3],
}

impl Default for ZCurveConfig {
    fn default() -> Self {
        Self {
            bbox: None,
            slices: [8, 8, 8],
        }
    }
}

/// Destination of a Morton code among `nb_dests` contiguous buckets.
pub fn dest_of_code(code: u32, max_index: u32, nb_dests: usize) -> usize {
    let n = nb_dests as u32;
    let ipd = max_index / n;
    let off = max_index % n;
    let d = if code < off * (ipd + 1) {
        code / (ipd + 1)
    } else if ipd == 0 {
        n - 1
    } else {
        off + (code - off * (ipd + 1)) / ipd
    };
    (d as usize).min(nb_dests - 1)
}

#[derive(Debug, Clone, Default)]
pub struct ZCurveStrategy {
    config: ZCurveConfig,
    slices: [u32; 3],
    bbox: Option<[f32; 6]>,
}

impl ZCurveStrategy {
    pub fn new(config: ZCurveConfig) -> Self {
        let slices = config.slices.map(|s| {
            let s = s.max(1) as u32;
            if s > AXIS_CELLS {
                log::warn!("zcurve slices {s} capped to {AXIS_CELLS} cells per axis");
            }
            s.min(AXIS_CELLS)
        });
        Self {
            bbox: config.bbox,
            slices,
            config,
        }
    }

    pub fn config(&self) -> &ZCurveConfig {
        &self.config
    }

    /// Bounding box in use, once known.
    pub fn bbox(&self) -> Option<[f32; 6]> {
        self.bbox
    }

    pub fn max_index(&self) -> u32 {
        let [x, y, z] = self.slices;
        morton_encode(x - 1, y - 1, z - 1)
    }

    /// Morton code of the grid cell holding `p`. Points outside the box
    /// are clamped to the border cells.
    pub fn cell_code(&self, p: [f32; 3]) -> Option<u32> {
        let bbox = self.bbox?;
        let mut cell = [0u32; 3];
        for i in 0..3 {
            let extent = bbox[i + 3] - bbox[i];
            let s = self.slices[i];
            if extent > 0.0 {
                let c = ((p[i] - bbox[i]) / extent * s as f32).floor();
                cell[i] = (c.max(0.0) as u32).min(s - 1);
            }
        }
        Some(morton_encode(cell[0], cell[1], cell[2]))
    }
}

impl<C: Communicator> Strategy<C> for ZCurveStrategy {
    fn name(&self) -> &'static str {
        "zcurve"
    }

    fn compute_global(
        &mut self,
        layout: &GroupLayout<C>,
        data: &Container,
    ) -> Result<(), RedistError> {
        if !data.is_countable() {
            log::error!("zcurve redistribution of a non-countable container");
            return Err(RedistError::NotCountable);
        }
        let Some(pos) = data.zcurve_key() else {
            log::error!("zcurve redistribution without a ZCURVEKEY field");
            return Err(RedistError::MissingZCurveKey);
        };
        if self.bbox.is_some() {
            return Ok(());
        }
        if pos.len() < 3 {
            log::error!("zcurve bounding box requested on a source without particles");
            return Err(RedistError::NoParticles);
        }
        let mut min = [f32::MAX; 3];
        let mut max = [f32::MIN; 3];
        for p in pos.chunks_exact(3) {
            for i in 0..3 {
                min[i] = min[i].min(p[i]);
                max[i] = max[i].max(p[i]);
            }
        }
        if let Some(sources) = layout.sources().filter(|_| layout.nb_sources() > 1) {
            let gmin = sources.all_reduce_min_f32(&min);
            let gmax = sources.all_reduce_max_f32(&max);
            min.copy_from_slice(&gmin);
            max.copy_from_slice(&gmax);
        }
        log::debug!("zcurve bounding box {min:?} - {max:?}");
        self.bbox = Some([min[0], min[1], min[2], max[0], max[1], max[2]]);
        Ok(())
    }

    fn split_data(
        &mut self,
        layout: &GroupLayout<C>,
        data: &Container,
    ) -> Result<Vec<Option<Container>>, RedistError> {
        let pos = data.zcurve_key().ok_or(RedistError::MissingZCurveKey)?;
        let n = layout.nb_dests();
        let max_index = self.max_index();
        let mut segments = vec![Vec::new(); n];
        for (item, p) in pos.chunks_exact(3).enumerate() {
            let code = self
                .cell_code([p[0], p[1], p[2]])
                .ok_or(RedistError::NoParticles)?;
            push_item(&mut segments[dest_of_code(code, max_index, n)], item);
        }
        let chunks = data.split_segments(&segments)?;
        let sizes: Vec<usize> = segments
            .iter()
            .map(|runs| runs.iter().map(|r| r.len()).sum())
            .collect();
        Ok(route_chunks(data, chunks, |d| sizes[d]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buckets_are_contiguous_and_cover_all_destinations() {
        let s = ZCurveStrategy::new(ZCurveConfig::default());
        let max = s.max_index();
        assert_eq!(max, 511);
        for n in 1..=7 {
            let dests: Vec<usize> = (0..=max).map(|c| dest_of_code(c, max, n)).collect();
            assert!(dests.windows(2).all(|w| w[0] <= w[1] && w[1] - w[0] <= 1));
            assert_eq!(dests[0], 0);
            assert_eq!(*dests.last().unwrap(), n - 1);
        }
    }

    #[test]
    fn more_destinations_than_codes() {
        assert_eq!(dest_of_code(0, 0, 4), 3);
        assert_eq!(dest_of_code(1, 1, 4), 3);
    }

    #[test]
    fn points_are_clamped_into_the_grid() {
        let s = ZCurveStrategy::new(ZCurveConfig {
            bbox: Some([0.0, 0.0, 0.0, 1.0, 1.0, 1.0]),
            slices: [2, 0, 2],
        });
        assert_eq!(s.slices, [2, 1, 2]);
        assert_eq!(s.cell_code([-5.0, 0.5, 0.0]), Some(0));
        assert_eq!(s.cell_code([1.0, 1.0, 1.0]), Some(morton_encode(1, 0, 1)));
    }

    #[test]
    fn slices_stop_at_the_code_width() {
        let s = ZCurveStrategy::new(ZCurveConfig {
            bbox: Some([0.0, 0.0, 0.0, 2048.0, 1.0, 1.0]),
            slices: [2048, 1, 1],
        });
        assert_eq!(s.slices, [1024, 1, 1]);
        assert_eq!(s.max_index(), morton_encode(1023, 0, 0));
        let near = s.cell_code([0.5, 0.0, 0.0]).unwrap();
        let far = s.cell_code([2047.5, 0.0, 0.0]).unwrap();
        assert_eq!(near, 0);
        assert_eq!(far, s.max_index());
        assert_ne!(dest_of_code(near, s.max_index(), 2), dest_of_code(far, s.max_index(), 2));
    }
}
