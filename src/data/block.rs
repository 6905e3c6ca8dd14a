//! Spatial block descriptor for regular grids.
//!
//! A [`Block`] describes a sub-domain of a regular 3-D grid with three
//! nested views: the *global* domain, the *local* region held by a rank
//! (including ghost cells) and the *own* region the rank is responsible
//! for. Each view carries a float bounding box and integer cell extents.

use serde::{Deserialize, Serialize};

/// Axis-aligned box given by its lower corner and its size along each axis.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub min: [f32; 3],
    pub size: [f32; 3],
}

/// Cell range `[offset, offset + count)` along each axis.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Extents {
    pub offset: [u32; 3],
    pub count: [u32; 3],
}

impl BBox {
    pub fn new(min: [f32; 3], size: [f32; 3]) -> Self {
        Self { min, size }
    }

    /// Inclusive on both faces.
    pub fn contains(&self, p: [f32; 3]) -> bool {
        (0..3).all(|i| p[i] >= self.min[i] && p[i] <= self.min[i] + self.size[i])
    }

    pub fn union(&self, other: &BBox) -> BBox {
        let mut out = BBox::default();
        for i in 0..3 {
            let lo = self.min[i].min(other.min[i]);
            let hi = (self.min[i] + self.size[i]).max(other.min[i] + other.size[i]);
            out.min[i] = lo;
            out.size[i] = hi - lo;
        }
        out
    }

    /// Empty intersections get a zero size on the lower corner of the overlap.
    pub fn intersection(&self, other: &BBox) -> BBox {
        let mut out = BBox::default();
        for i in 0..3 {
            let lo = self.min[i].max(other.min[i]);
            let hi = (self.min[i] + self.size[i]).min(other.min[i] + other.size[i]);
            out.min[i] = lo;
            out.size[i] = (hi - lo).max(0.0);
        }
        out
    }
}

impl Extents {
    pub fn new(offset: [u32; 3], count: [u32; 3]) -> Self {
        Self { offset, count }
    }

    pub fn end(&self, axis: usize) -> u32 {
        self.offset[axis] + self.count[axis]
    }

    /// Half-open test.
    pub fn contains(&self, cell: [u32; 3]) -> bool {
        (0..3).all(|i| cell[i] >= self.offset[i] && cell[i] < self.end(i))
    }

    pub fn is_empty(&self) -> bool {
        self.count.iter().any(|&c| c == 0)
    }

    pub fn nb_cells(&self) -> u64 {
        self.count.iter().map(|&c| c as u64).product()
    }

    pub fn includes(&self, other: &Extents) -> bool {
        (0..3).all(|i| other.offset[i] >= self.offset[i] && other.end(i) <= self.end(i))
    }

    pub fn union(&self, other: &Extents) -> Extents {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        let mut out = Extents::default();
        for i in 0..3 {
            let lo = self.offset[i].min(other.offset[i]);
            let hi = self.end(i).max(other.end(i));
            out.offset[i] = lo;
            out.count[i] = hi - lo;
        }
        out
    }

    pub fn intersection(&self, other: &Extents) -> Extents {
        let mut out = Extents::default();
        for i in 0..3 {
            let lo = self.offset[i].max(other.offset[i]);
            let hi = self.end(i).min(other.end(i));
            out.offset[i] = lo;
            out.count[i] = hi.saturating_sub(lo);
        }
        out
    }
}

/// Block descriptor; every view is optional until set.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub gridspace: Option<f32>,
    pub global_bbox: Option<BBox>,
    pub global_extents: Option<Extents>,
    pub local_bbox: Option<BBox>,
    pub local_extents: Option<Extents>,
    pub own_bbox: Option<BBox>,
    pub own_extents: Option<Extents>,
    pub ghost_size: Option<u32>,
}

impl Block {
    /// Global domain with grid spacing; local and own views start as the
    /// whole domain.
    pub fn domain(global_bbox: BBox, global_extents: Extents, gridspace: f32) -> Self {
        Self {
            gridspace: Some(gridspace),
            global_bbox: Some(global_bbox),
            global_extents: Some(global_extents),
            local_bbox: Some(global_bbox),
            local_extents: Some(global_extents),
            own_bbox: Some(global_bbox),
            own_extents: Some(global_extents),
            ghost_size: None,
        }
    }

    pub fn is_in_local_block(&self, p: [f32; 3]) -> bool {
        self.local_bbox.is_some_and(|b| b.contains(p))
    }

    pub fn is_in_own_block(&self, p: [f32; 3]) -> bool {
        self.own_bbox.is_some_and(|b| b.contains(p))
    }

    pub fn is_in_global_block(&self, p: [f32; 3]) -> bool {
        self.global_bbox.is_some_and(|b| b.contains(p))
    }

    pub fn is_in_local_cells(&self, cell: [u32; 3]) -> bool {
        self.local_extents.is_some_and(|e| e.contains(cell))
    }

    pub fn is_in_own_cells(&self, cell: [u32; 3]) -> bool {
        self.own_extents.is_some_and(|e| e.contains(cell))
    }

    pub fn is_in_global_cells(&self, cell: [u32; 3]) -> bool {
        self.global_extents.is_some_and(|e| e.contains(cell))
    }

    pub fn has_same_extents(&self, other: &Block) -> bool {
        self.local_extents == other.local_extents && self.own_extents == other.own_extents
    }

    /// Cell containing `p`, relative to the global domain. `None` outside or
    /// without grid spacing.
    pub fn cell_of(&self, p: [f32; 3]) -> Option<[u32; 3]> {
        let (g, bbox, ext) = (self.gridspace?, self.global_bbox?, self.global_extents?);
        if !bbox.contains(p) || g <= 0.0 {
            return None;
        }
        let mut cell = [0u32; 3];
        for i in 0..3 {
            let c = ((p[i] - bbox.min[i]) / g) as u32 + ext.offset[i];
            cell[i] = c.min(ext.end(i).saturating_sub(1));
        }
        Some(cell)
    }

    /// Lower corner of a cell.
    pub fn position_of(&self, cell: [u32; 3]) -> Option<[f32; 3]> {
        let (g, bbox, ext) = (self.gridspace?, self.global_bbox?, self.global_extents?);
        let mut p = [0f32; 3];
        for i in 0..3 {
            p[i] = bbox.min[i] + (cell[i] as f32 - ext.offset[i] as f32) * g;
        }
        Some(p)
    }

    fn bbox_of(&self, ext: &Extents) -> Option<BBox> {
        let g = self.gridspace?;
        let min = self.position_of(ext.offset)?;
        let mut size = [0f32; 3];
        for i in 0..3 {
            size[i] = ext.count[i] as f32 * g;
        }
        Some(BBox { min, size })
    }

    /// Recompute the local and own boxes from their cell extents.
    pub fn update_extents(&mut self) {
        if let Some(ext) = self.local_extents {
            if let Some(b) = self.bbox_of(&ext) {
                self.local_bbox = Some(b);
            }
        }
        if let Some(ext) = self.own_extents {
            if let Some(b) = self.bbox_of(&ext) {
                self.own_bbox = Some(b);
            }
        }
    }

    /// The current local region becomes the own region; the local region
    /// grows by `ghost` cells on every face, clamped to the global domain.
    pub fn build_ghost_regions(&mut self, ghost: u32) {
        let (Some(local), Some(global)) = (self.local_extents, self.global_extents) else {
            log::warn!("build_ghost_regions: block without local or global extents");
            return;
        };
        self.ghost_size = Some(ghost);
        self.own_extents = Some(local);
        self.own_bbox = self.local_bbox;

        let mut grown = local;
        for i in 0..3 {
            let lo = local.offset[i].saturating_sub(ghost).max(global.offset[i]);
            let hi = (local.end(i) + ghost).min(global.end(i));
            grown.offset[i] = lo;
            grown.count[i] = hi.saturating_sub(lo);
        }
        self.local_extents = Some(grown);
        if let Some(b) = self.bbox_of(&grown) {
            self.local_bbox = Some(b);
        }
    }

    /// Grow the local and own views to cover `other` as well.
    pub fn make_union(&mut self, other: &Block) {
        fn join<T: Copy>(a: Option<T>, b: Option<T>, f: impl Fn(&T, &T) -> T) -> Option<T> {
            match (a, b) {
                (Some(x), Some(y)) => Some(f(&x, &y)),
                (x, y) => x.or(y),
            }
        }
        self.local_extents = join(self.local_extents, other.local_extents, Extents::union);
        self.own_extents = join(self.own_extents, other.own_extents, Extents::union);
        self.local_bbox = join(self.local_bbox, other.local_bbox, BBox::union);
        self.own_bbox = join(self.own_bbox, other.own_bbox, BBox::union);
        if self.global_extents.is_none() {
            self.global_extents = other.global_extents;
            self.global_bbox = other.global_bbox;
            self.gridspace = other.gridspace;
        }
        self.ghost_size = self.ghost_size.or(other.ghost_size);
    }

    /// Part of this block that falls inside `target`'s local region.
    pub fn overlap(&self, target: &Block) -> Block {
        let mut out = self.clone();
        let mine = self.own_extents.or(self.local_extents);
        if let (Some(m), Some(t)) = (mine, target.local_extents) {
            let cut = m.intersection(&t);
            out.local_extents = Some(cut);
            out.own_extents = Some(cut);
        }
        let mine_box = self.own_bbox.or(self.local_bbox);
        if let (Some(m), Some(t)) = (mine_box, target.local_bbox) {
            let cut = m.intersection(&t);
            out.local_bbox = Some(cut);
            out.own_bbox = Some(cut);
        }
        out
    }
}
