//! Regular grid domains and their balanced recursive bisection.

use serde::{Deserialize, Serialize};

use crate::error::{RedistError, RedistResult};

/// Cell range on a regular grid: origin x,y,z then cell count x,y,z.
pub type Extents = [u32; 6];

/// Describes a rectangular piece of a regular global grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BlockDomain {
    /// Edge length of one cell.
    pub gridspace: f32,
    /// Coordinates of cell (0, 0, 0).
    pub origin: [f32; 3],
    /// The whole grid.
    pub global_extents: Extents,
    /// The piece owned by the holder of this descriptor.
    pub local_extents: Extents,
}

impl BlockDomain {
    /// Descriptor owning the whole grid.
    pub fn whole(gridspace: f32, origin: [f32; 3], cells: [u32; 3]) -> Self {
        let extents = [0, 0, 0, cells[0], cells[1], cells[2]];
        Self {
            gridspace,
            origin,
            global_extents: extents,
            local_extents: extents,
        }
    }

    /// Same grid, another local piece.
    pub fn with_local_extents(&self, local_extents: Extents) -> Self {
        Self {
            local_extents,
            ..*self
        }
    }

    fn bbox(&self, extents: &Extents) -> [f32; 6] {
        let mut b = [0.0f32; 6];
        for axis in 0..3 {
            b[axis] = self.origin[axis] + extents[axis] as f32 * self.gridspace;
            b[axis + 3] = extents[axis + 3] as f32 * self.gridspace;
        }
        b
    }

    /// Local box: min x,y,z then size x,y,z.
    pub fn local_bbox(&self) -> [f32; 6] {
        self.bbox(&self.local_extents)
    }

    /// Global box: min x,y,z then size x,y,z.
    pub fn global_bbox(&self) -> [f32; 6] {
        self.bbox(&self.global_extents)
    }

    /// True when `point` falls in the local piece. Pieces are half-open,
    /// except on the upper faces of the global grid.
    pub fn owns(&self, point: [f32; 3]) -> bool {
        let local = self.local_bbox();
        let global = self.global_bbox();
        (0..3).all(|axis| {
            let lo = local[axis];
            let hi = lo + local[axis + 3];
            let global_hi = global[axis] + global[axis + 3];
            let p = point[axis];
            if p < lo {
                return false;
            }
            if p < hi {
                return true;
            }
            p == hi && hi >= global_hi
        })
    }

    /// Number of cells in the local piece.
    pub fn local_cells(&self) -> u64 {
        self.local_extents[3..]
            .iter()
            .map(|&c| c as u64)
            .product()
    }
}

/// Cuts `extents` into `parts` axis-aligned pieces, always halving the
/// largest of the first `dims` axes and sizing each half in proportion to
/// the number of parts it will hold.
pub fn bisect(extents: Extents, parts: usize, dims: u8) -> RedistResult<Vec<Extents>> {
    if parts == 0 {
        return Err(RedistError::Configuration(
            "cannot split a domain into zero blocks".to_string(),
        ));
    }
    let dims = dims.clamp(1, 3) as usize;
    let mut out = Vec::with_capacity(parts);
    bisect_into(extents, parts, dims, &mut out)?;
    Ok(out)
}

fn bisect_into(extents: Extents, parts: usize, dims: usize, out: &mut Vec<Extents>) -> RedistResult<()> {
    if parts == 1 {
        out.push(extents);
        return Ok(());
    }
    let mut axis = 0;
    for candidate in 1..dims {
        if extents[3 + candidate] > extents[3 + axis] {
            axis = candidate;
        }
    }
    let count = extents[3 + axis];
    if count < 2 {
        return Err(RedistError::Configuration(format!(
            "domain {:?} cannot be cut into {} blocks along {} dimension(s)",
            extents, parts, dims
        )));
    }
    let left_parts = parts.div_ceil(2);
    let right_parts = parts - left_parts;
    let left_count = ((count as u64 * left_parts as u64) / parts as u64).clamp(1, count as u64 - 1) as u32;

    let mut left = extents;
    left[3 + axis] = left_count;
    let mut right = extents;
    right[axis] = extents[axis] + left_count;
    right[3 + axis] = count - left_count;

    bisect_into(left, left_parts, dims, out)?;
    bisect_into(right, right_parts, dims, out)
}
