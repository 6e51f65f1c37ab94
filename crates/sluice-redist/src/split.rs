//! Range splitters: pure functions mapping a source's local items onto
//! destination indices, one per redistribution strategy.

use crate::block::{BlockDomain, Extents};
use crate::config::{StrategyConfig, ZCurveMapping};
use crate::error::{RedistError, RedistResult};
use crate::morton;
use crate::record::{push_item, ItemSpan, Selection};
use crate::window::GlobalIndexWindow;

/// Fixed whole-record mapping between a source group and a destination group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcMapping {
    nb_sources: usize,
    nb_dests: usize,
}

impl ProcMapping {
    /// Validates that one group size divides the other.
    pub fn new(nb_sources: usize, nb_dests: usize) -> RedistResult<Self> {
        if nb_sources == 0 || nb_dests == 0 {
            return Err(RedistError::Configuration(
                "proc mapping needs at least one source and one destination".to_string(),
            ));
        }
        if nb_sources >= nb_dests && nb_sources % nb_dests != 0 {
            return Err(RedistError::Configuration(format!(
                "{} destinations do not divide {} sources",
                nb_dests, nb_sources
            )));
        }
        if nb_sources < nb_dests && nb_dests % nb_sources != 0 {
            return Err(RedistError::Configuration(format!(
                "{} sources do not divide {} destinations",
                nb_sources, nb_dests
            )));
        }
        Ok(Self { nb_sources, nb_dests })
    }

    /// Destinations that receive a copy of source `source`'s record.
    pub fn targets(&self, source: usize) -> std::ops::Range<usize> {
        if self.nb_sources >= self.nb_dests {
            let d = source / (self.nb_sources / self.nb_dests);
            d..d + 1
        } else {
            let per = self.nb_dests / self.nb_sources;
            source * per..(source + 1) * per
        }
    }

    /// Sources that send to destination `dest`.
    pub fn sources(&self, dest: usize) -> std::ops::Range<usize> {
        if self.nb_sources >= self.nb_dests {
            let per = self.nb_sources / self.nb_dests;
            dest * per..(dest + 1) * per
        } else {
            let s = dest / (self.nb_dests / self.nb_sources);
            s..s + 1
        }
    }
}

/// Z-curve parameters after defaults and clamping.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZCurveParams {
    /// Configured bounding box: min x,y,z then max x,y,z.
    pub bbox: Option<[f32; 6]>,
    /// Cells per axis, each in `1..=1024`.
    pub slices: [u32; 3],
    /// Code to destination mapping.
    pub mapping: ZCurveMapping,
}

/// Runtime form of a redistribution strategy.
#[derive(Debug, Clone, PartialEq)]
pub enum Strategy {
    /// Item `i` goes to destination `i mod n`.
    RoundRobin,
    /// Balanced contiguous blocks of the global item sequence.
    ContiguousCount,
    /// Geometric sub-blocks, cutting along the first `dims` axes.
    Block(u8),
    /// Whole records along a fixed rank mapping.
    ProcToProc(ProcMapping),
    /// Spatial bucketing by Morton code.
    ZCurve(ZCurveParams),
}

impl Strategy {
    /// Builds the strategy for the given group sizes.
    pub fn from_config(config: &StrategyConfig, nb_sources: usize, nb_dests: usize) -> RedistResult<Self> {
        Ok(match config {
            StrategyConfig::RoundRobin => Strategy::RoundRobin,
            StrategyConfig::Count => Strategy::ContiguousCount,
            StrategyConfig::Block { dims } => Strategy::Block((*dims).clamp(1, 3)),
            StrategyConfig::Proc => Strategy::ProcToProc(ProcMapping::new(nb_sources, nb_dests)?),
            StrategyConfig::Zcurve { bbox, slices, mapping } => Strategy::ZCurve(ZCurveParams {
                bbox: *bbox,
                slices: slices.map(|s| s.clamp(1, morton::MAX_CELL + 1)),
                mapping: *mapping,
            }),
        })
    }

    /// True when the strategy needs the source's global index window.
    pub fn needs_global_index(&self) -> bool {
        matches!(self, Strategy::RoundRobin | Strategy::ContiguousCount)
    }
}

fn balanced_block(index: usize, total: u64, parts: usize) -> (u64, u64) {
    let parts = parts as u64;
    let per = total / parts;
    let rem = total % parts;
    let i = index as u64;
    let start = i * per + i.min(rem);
    let len = per + u64::from(i < rem);
    (start, len)
}

fn balanced_owner(index: u64, total: u64, parts: usize) -> usize {
    let parts = parts as u64;
    let per = total / parts;
    let rem = total % parts;
    let boundary = rem * (per + 1);
    if index < boundary {
        (index / (per + 1)) as usize
    } else {
        (rem + (index - boundary) / per.max(1)) as usize
    }
}

/// Global item range held by destination `dest` under the contiguous-count split.
pub fn count_block(dest: usize, global_count: u64, nb_dests: usize) -> std::ops::Range<u64> {
    let (start, len) = balanced_block(dest, global_count, nb_dests);
    start..start + len
}

/// Contiguous-count split of one source window. Spans are local indices;
/// `None` means nothing to send to that destination.
pub fn count_spans(window: &GlobalIndexWindow, nb_dests: usize) -> Vec<Option<ItemSpan>> {
    (0..nb_dests)
        .map(|d| {
            let block = count_block(d, window.global_count, nb_dests);
            let lo = block.start.max(window.local_offset);
            let hi = block.end.min(window.local_end());
            (lo < hi).then(|| ItemSpan::new(lo - window.local_offset, hi - lo))
        })
        .collect()
}

/// Round-robin split of one source window.
pub fn round_robin_selections(window: &GlobalIndexWindow, nb_dests: usize) -> Vec<Selection> {
    let mut selections = vec![Selection::new(); nb_dests];
    for k in 0..window.local_count {
        let dest = ((window.local_offset + k) % nb_dests as u64) as usize;
        push_item(&mut selections[dest], k);
    }
    selections
}

/// Block split: each item goes to the sub-block whose region owns its position.
/// Items outside the domain are not selected.
pub fn block_selections(positions: &[[f32; 3]], domain: &BlockDomain, blocks: &[Extents]) -> Vec<Selection> {
    let pieces: Vec<BlockDomain> = blocks.iter().map(|b| domain.with_local_extents(*b)).collect();
    let mut selections = vec![Selection::new(); blocks.len()];
    for (k, p) in positions.iter().enumerate() {
        if let Some(d) = pieces.iter().position(|piece| piece.owns(*p)) {
            push_item(&mut selections[d], k as u64);
        }
    }
    selections
}

/// Morton cell of a position inside `bbox` (min x,y,z then max x,y,z).
/// Positions outside the box are clamped onto its faces.
pub fn zcurve_code(p: [f32; 3], bbox: &[f32; 6], slices: [u32; 3]) -> u32 {
    let mut cell = [0u32; 3];
    for axis in 0..3 {
        let lo = bbox[axis];
        let extent = bbox[axis + 3] - lo;
        let c = if extent > 0.0 {
            ((p[axis] - lo) / extent * slices[axis] as f32).floor()
        } else {
            0.0
        };
        cell[axis] = (c.max(0.0) as u32).min(slices[axis] - 1);
    }
    morton::encode(cell[0], cell[1], cell[2])
}

/// Z-curve split of a set of positions.
pub fn zcurve_selections(positions: &[[f32; 3]], bbox: &[f32; 6], params: &ZCurveParams, nb_dests: usize) -> Vec<Selection> {
    let max_code = morton::encode(params.slices[0] - 1, params.slices[1] - 1, params.slices[2] - 1) as u64;
    let mut selections = vec![Selection::new(); nb_dests];
    for (k, p) in positions.iter().enumerate() {
        let code = zcurve_code(*p, bbox, params.slices) as u64;
        let dest = match params.mapping {
            ZCurveMapping::RoundRobin => (code % nb_dests as u64) as usize,
            ZCurveMapping::Contiguous => balanced_owner(code, max_code + 1, nb_dests),
        };
        push_item(&mut selections[dest], k as u64);
    }
    selections
}

/// Bounding box of a set of positions: min x,y,z then max x,y,z.
/// Empty input yields an inverted box that is neutral under min/max reduction.
pub fn local_bbox(positions: &[[f32; 3]]) -> [f32; 6] {
    let mut b = [f32::INFINITY, f32::INFINITY, f32::INFINITY, f32::NEG_INFINITY, f32::NEG_INFINITY, f32::NEG_INFINITY];
    for p in positions {
        for axis in 0..3 {
            b[axis] = b[axis].min(p[axis]);
            b[axis + 3] = b[axis + 3].max(p[axis]);
        }
    }
    b
}
