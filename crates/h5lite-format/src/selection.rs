//! Rectangular read windows and the box copy shared by every layout.
//!
//! ```
//! use h5lite_format::selection::Selection;
//!
//! // rows 20..30, columns 40..60 of a 100x100 dataset
//! let sel = Selection::slice(&[20..30, 40..60]);
//! assert_eq!(sel.num_elements().unwrap(), 200);
//! assert!(sel.validate(&[100, 100]).is_ok());
//! ```

use std::ops::Range;

use crate::error::{FormatError, Result};

/// A hyperslab window: `count[d]` elements from `start[d]` in each dimension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub start: Vec<u64>,
    pub count: Vec<u64>,
}

impl Selection {
    pub fn new(start: Vec<u64>, count: Vec<u64>) -> Self {
        Selection { start, count }
    }

    /// The whole extent `dims`.
    pub fn all(dims: &[u64]) -> Self {
        Selection {
            start: vec![0; dims.len()],
            count: dims.to_vec(),
        }
    }

    /// One range per dimension.
    pub fn slice(ranges: &[Range<u64>]) -> Self {
        Selection {
            start: ranges.iter().map(|r| r.start).collect(),
            count: ranges.iter().map(|r| r.end.saturating_sub(r.start)).collect(),
        }
    }

    pub fn rank(&self) -> usize {
        self.start.len()
    }

    pub fn num_elements(&self) -> Result<u64> {
        self.count
            .iter()
            .try_fold(1u64, |acc, &n| acc.checked_mul(n))
            .ok_or(FormatError::ArithmeticOverflow("selection element count"))
    }

    /// Check that the window lies inside `dims`.
    pub fn validate(&self, dims: &[u64]) -> Result<()> {
        if self.start.len() != dims.len() || self.count.len() != dims.len() {
            return Err(FormatError::InvalidSelection(format!(
                "rank {} selection on rank {} dataspace",
                self.start.len(),
                dims.len()
            )));
        }
        for (d, ((&s, &n), &extent)) in self.start.iter().zip(&self.count).zip(dims).enumerate() {
            if s.checked_add(n).map_or(true, |end| end > extent) {
                return Err(FormatError::InvalidSelection(format!(
                    "dimension {d}: {s}+{n} exceeds extent {extent}"
                )));
            }
        }
        Ok(())
    }

    /// Whether the chunk at `offsets` with extent `chunk_dims` overlaps the
    /// window.
    pub fn intersects_chunk(&self, offsets: &[u64], chunk_dims: &[u64]) -> bool {
        self.start
            .iter()
            .zip(&self.count)
            .zip(offsets.iter().zip(chunk_dims))
            .all(|((&s, &n), (&o, &c))| o < s.saturating_add(n) && o.saturating_add(c) > s)
    }

    pub(crate) fn region(&self) -> Region<'_> {
        Region {
            origin: &self.start,
            extent: &self.count,
        }
    }
}

/// A row-major box of elements positioned in dataset coordinates.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Region<'a> {
    pub origin: &'a [u64],
    pub extent: &'a [u64],
}

impl Region<'_> {
    fn linear(&self, index: &[u64]) -> usize {
        index
            .iter()
            .zip(self.origin)
            .zip(self.extent)
            .fold(0u64, |acc, ((&i, &o), &e)| acc * e + (i - o)) as usize
    }
}

/// Copy the elements `from` and `to` have in common, clipped to `limit`,
/// from `src` (laid out as `from`) into `dst` (laid out as `to`).
///
/// Both buffers must hold their whole box.
pub(crate) fn copy_intersection(src: &[u8], from: Region<'_>, dst: &mut [u8], to: Region<'_>, limit: &[u64], element_size: usize) {
    let rank = from.origin.len();
    if rank == 0 {
        let n = element_size.min(src.len()).min(dst.len());
        dst[..n].copy_from_slice(&src[..n]);
        return;
    }
    let lo: Vec<u64> = (0..rank).map(|d| from.origin[d].max(to.origin[d])).collect();
    let hi: Vec<u64> = (0..rank)
        .map(|d| {
            from.origin[d]
                .saturating_add(from.extent[d])
                .min(to.origin[d].saturating_add(to.extent[d]))
                .min(limit[d])
        })
        .collect();
    if lo.iter().zip(&hi).any(|(l, h)| l >= h) {
        return;
    }

    let last = rank - 1;
    let run = (hi[last] - lo[last]) as usize * element_size;
    let mut index = lo.clone();
    loop {
        let s = from.linear(&index) * element_size;
        let t = to.linear(&index) * element_size;
        dst[t..t + run].copy_from_slice(&src[s..s + run]);

        // odometer over every dimension but the last
        let mut d = last;
        loop {
            if d == 0 {
                return;
            }
            d -= 1;
            index[d] += 1;
            if index[d] < hi[d] {
                break;
            }
            index[d] = lo[d];
        }
    }
}
