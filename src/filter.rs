//! Scanline filters: reversing them when reading, choosing and applying them when writing.

use crate::error::{Error, ErrorKind, Warnings};
use crate::settings::FilterStrategy;
use std::fmt;
use std::ops;

/// Filter type byte at the start of every scanline
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FilterType {
    None = 0,
    Sub = 1,
    Up = 2,
    Average = 3,
    Paeth = 4,
}

impl FilterType {
    pub const ALL: [Self; 5] = [Self::None, Self::Sub, Self::Up, Self::Average, Self::Paeth];

    #[inline]
    pub fn from_u8(n: u8) -> Option<Self> {
        Self::ALL.get(n as usize).copied()
    }
}

/// Set of filter types the encoder may choose from
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct FilterSet(u8);

impl FilterSet {
    pub const NONE: Self = Self(1 << 0);
    pub const SUB: Self = Self(1 << 1);
    pub const UP: Self = Self(1 << 2);
    pub const AVERAGE: Self = Self(1 << 3);
    pub const PAETH: Self = Self(1 << 4);
    pub const ALL: Self = Self(0x1f);

    #[inline]
    pub fn contains(self, f: FilterType) -> bool {
        self.0 & (1 << f as u8) != 0
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 & 0x1f == 0
    }

    /// The only member, if there's exactly one
    pub fn single(self) -> Option<FilterType> {
        let bits = self.0 & 0x1f;
        if bits.count_ones() == 1 {
            FilterType::from_u8(bits.trailing_zeros() as u8)
        } else {
            None
        }
    }

    pub fn iter(self) -> impl Iterator<Item = FilterType> {
        FilterType::ALL.into_iter().filter(move |&f| self.contains(f))
    }
}

impl From<FilterType> for FilterSet {
    #[inline]
    fn from(f: FilterType) -> Self {
        Self(1 << f as u8)
    }
}

impl ops::BitOr for FilterSet {
    type Output = Self;
    #[inline]
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for FilterSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// `a` left, `b` above, `c` above-left
#[inline]
pub fn paeth_predictor(a: u8, b: u8, c: u8) -> u8 {
    let p = i16::from(b) - i16::from(c);
    let pc = i16::from(a) - i16::from(c);
    let pa = p.abs();
    let pb = pc.abs();
    let pc = (p + pc).abs();
    if pa <= pb && pa <= pc {
        a
    } else if pb <= pc {
        b
    } else {
        c
    }
}

/// Reverses `filter` in place. `prev` is the previous reconstructed row of the
/// same pass, all zeros for the first one. `bpp` is bytes per pixel, at least 1.
pub fn unfilter_scanline(row: &mut [u8], prev: &[u8], bpp: usize, filter: FilterType) {
    let len = row.len();
    debug_assert!(prev.len() >= len);
    let prev = &prev[..len];
    let bpp = bpp.min(len);
    match filter {
        FilterType::None => {},
        FilterType::Sub => {
            for i in bpp..len {
                row[i] = row[i].wrapping_add(row[i - bpp]);
            }
        },
        FilterType::Up => {
            for (r, &p) in row.iter_mut().zip(prev) {
                *r = r.wrapping_add(p);
            }
        },
        FilterType::Average => {
            for i in 0..bpp {
                row[i] = row[i].wrapping_add(prev[i] >> 1);
            }
            for i in bpp..len {
                let avg = (u16::from(row[i - bpp]) + u16::from(prev[i])) >> 1;
                row[i] = row[i].wrapping_add(avg as u8);
            }
        },
        FilterType::Paeth => {
            for i in 0..bpp {
                row[i] = row[i].wrapping_add(prev[i]);
            }
            for i in bpp..len {
                row[i] = row[i].wrapping_add(paeth_predictor(row[i - bpp], prev[i], prev[i - bpp]));
            }
        },
    }
}

/// Reads the filter byte of a decompressed scanline and reverses the filter
/// on the rest. Unknown filter types are treated as None.
pub(crate) fn defilter_row(buf: &mut [u8], prev: &[u8], bpp: usize, warnings: &mut Warnings) {
    if let Some((&mut ftype, row)) = buf.split_first_mut() {
        let filter = FilterType::from_u8(ftype).unwrap_or_else(|| {
            warnings.push(None, "Ignoring bad adaptive filter type");
            FilterType::None
        });
        unfilter_scanline(row, prev, bpp, filter);
    }
}

/// Scores a filtered byte as its distance from 0, treating it as signed
#[inline(always)]
fn magnitude(v: u8) -> u64 {
    u64::from(if v < 128 { v } else { 0u8.wrapping_sub(v) })
}

/// Sum of absolute values of the filtered bytes read as signed
pub fn score(filtered: &[u8]) -> u64 {
    filtered.iter().map(|&v| magnitude(v)).sum()
}

/// Filters into `out` and returns the score. Gives up with `None` once the
/// score is above `limit`, leaving `out` partly filtered.
#[inline(always)]
fn filter_scored(out: &mut [u8], row: &[u8], limit: u64, predict: impl Fn(&[u8], usize) -> u8) -> Option<u64> {
    let mut sum = 0;
    for i in 0..row.len() {
        let v = row[i].wrapping_sub(predict(row, i));
        out[i] = v;
        sum += magnitude(v);
        if sum > limit {
            return None;
        }
    }
    Some(sum)
}

fn filter_limited(out: &mut [u8], row: &[u8], prev: &[u8], bpp: usize, filter: FilterType, limit: u64) -> Option<u64> {
    let prev = &prev[..row.len()];
    match filter {
        FilterType::None => filter_scored(out, row, limit, |_, _| 0),
        FilterType::Sub => filter_scored(out, row, limit, |row, i| if i >= bpp { row[i - bpp] } else { 0 }),
        FilterType::Up => filter_scored(out, row, limit, |_, i| prev[i]),
        FilterType::Average => filter_scored(out, row, limit, |row, i| {
            let a = if i >= bpp { row[i - bpp] } else { 0 };
            ((u16::from(a) + u16::from(prev[i])) >> 1) as u8
        }),
        FilterType::Paeth => filter_scored(out, row, limit, |row, i| {
            if i >= bpp {
                paeth_predictor(row[i - bpp], prev[i], prev[i - bpp])
            } else {
                prev[i]
            }
        }),
    }
}

/// Applies `filter` to `row`, writing the same number of bytes to `out`.
/// `prev` is the previous unfiltered row of the same pass, zeros for the first one.
pub fn filter_scanline(out: &mut [u8], row: &[u8], prev: &[u8], bpp: usize, filter: FilterType) {
    filter_limited(&mut out[..row.len()], row, prev, bpp, filter, u64::MAX);
}

const WEIGHT_SHIFT: u32 = 8;
const WEIGHT_FACTOR: f64 = (1 << WEIGHT_SHIFT) as f64;
const COST_SHIFT: u32 = 3;
const COST_FACTOR: f64 = (1 << COST_SHIFT) as f64;
const HISHIFT: u32 = 10;
const LOMASK: u64 = 0xffff;
const HIMASK: u64 = (!(LOMASK as u32) >> HISHIFT) as u64;
const MAXSUM: u64 = (u32::MAX >> 1) as u64;

/// Tuning of the weighted filter heuristic
#[derive(Clone, Debug, PartialEq)]
pub struct FilterWeights {
    /// One entry per remembered row, most recent first. A value above 1 makes
    /// a filter that won that row more likely to be picked again.
    /// Negative values mean no preference.
    pub weights: Vec<f64>,
    /// Relative cost of each filter type, at least 1. Smaller is preferred.
    pub costs: [f64; 5],
}

impl Default for FilterWeights {
    fn default() -> Self {
        Self {
            weights: vec![2.0, 1.5, 1.25],
            costs: [1.0, 1.3, 1.3, 1.5, 1.7],
        }
    }
}

/// Fixed-point form of [`FilterWeights`] plus the history of winners
#[derive(Debug, Clone)]
struct Weighting {
    prev_filters: Vec<u8>,
    weights: Vec<u64>,
    inv_weights: Vec<u64>,
    costs: [u64; 5],
    inv_costs: [u64; 5],
}

impl Weighting {
    fn new(w: &FilterWeights) -> Self {
        let (weights, inv_weights) = w.weights.iter().map(|&w| {
            if w < 0.0 {
                (WEIGHT_FACTOR as u64, WEIGHT_FACTOR as u64)
            } else {
                ((WEIGHT_FACTOR / w + 0.5) as u16 as u64, (WEIGHT_FACTOR * w + 0.5) as u16 as u64)
            }
        }).unzip();
        let mut costs = [COST_FACTOR as u64; 5];
        let mut inv_costs = [COST_FACTOR as u64; 5];
        for (i, &c) in w.costs.iter().enumerate() {
            if c >= 1.0 {
                inv_costs[i] = (COST_FACTOR / c + 0.5) as u16 as u64;
                costs[i] = (COST_FACTOR * c + 0.5) as u16 as u64;
            }
        }
        Self {
            // no row has been filtered yet
            prev_filters: vec![255; w.weights.len()],
            weights,
            inv_weights,
            costs,
            inv_costs,
        }
    }

    /// Scales a sum by the factors of each remembered row that used `filter`, then by its cost
    fn scale(&self, sum: u64, filter: FilterType, inverse: bool) -> u64 {
        let (weights, costs) = if inverse { (&self.inv_weights, &self.inv_costs) } else { (&self.weights, &self.costs) };
        let mut lo = sum & LOMASK;
        let mut hi = (sum >> HISHIFT) & HIMASK;
        for (&prev, &w) in self.prev_filters.iter().zip(weights) {
            if prev == filter as u8 {
                lo = (lo * w) >> WEIGHT_SHIFT;
                hi = (hi * w) >> WEIGHT_SHIFT;
            }
        }
        let cost = costs[filter as usize];
        lo = (lo * cost) >> COST_SHIFT;
        hi = (hi * cost) >> COST_SHIFT;
        if hi > HIMASK {
            MAXSUM
        } else {
            (hi << HISHIFT) + lo
        }
    }

    fn remember(&mut self, chosen: FilterType) {
        if !self.prev_filters.is_empty() {
            self.prev_filters.rotate_right(1);
            self.prev_filters[0] = chosen as u8;
        }
    }
}

#[derive(Debug, Clone)]
enum Selection {
    Fixed(FilterType),
    Predefined { filters: Box<[u8]>, next: usize },
    Adaptive { set: FilterSet, weighting: Option<Weighting> },
}

/// Picks and applies the filter of each scanline the encoder writes
#[derive(Debug, Clone)]
pub struct FilterSelector {
    selection: Selection,
    best: Vec<u8>,
    attempt: Vec<u8>,
}

impl FilterSelector {
    /// `force_zero` is set for images where filtering doesn't help (palette, sub-byte depths)
    pub fn new(strategy: &FilterStrategy, force_zero: bool) -> Result<Self, Error> {
        let selection = if force_zero {
            Selection::Fixed(FilterType::None)
        } else {
            match strategy {
                FilterStrategy::Zero => Selection::Fixed(FilterType::None),
                FilterStrategy::Fixed(f) => Selection::Fixed(*f),
                FilterStrategy::MinSum(set) | FilterStrategy::Weighted(set, _) if set.is_empty() => {
                    return Err(Error::msg(ErrorKind::InvalidArgument, "no filter types enabled"));
                },
                FilterStrategy::MinSum(set) => match set.single() {
                    Some(f) => Selection::Fixed(f),
                    None => Selection::Adaptive { set: *set, weighting: None },
                },
                FilterStrategy::Weighted(set, w) => match set.single() {
                    Some(f) => Selection::Fixed(f),
                    None => Selection::Adaptive { set: *set, weighting: Some(Weighting::new(w)) },
                },
                FilterStrategy::Predefined(filters) => {
                    if filters.is_empty() || filters.iter().any(|&f| f > 4) {
                        return Err(Error::msg(ErrorKind::InvalidArgument, "predefined filter types must be 0-4"));
                    }
                    Selection::Predefined { filters: filters.clone(), next: 0 }
                },
            }
        };
        Ok(Self {
            selection,
            best: Vec::new(),
            attempt: Vec::new(),
        })
    }

    /// Filters `row` into `out`, which gets the filter type byte followed by
    /// `row.len()` filtered bytes. Returns the chosen filter.
    pub fn filter_row(&mut self, row: &[u8], prev: &[u8], bpp: usize, out: &mut Vec<u8>) -> FilterType {
        out.clear();
        out.resize(row.len() + 1, 0);
        let chosen = match &mut self.selection {
            Selection::Fixed(f) => *f,
            Selection::Predefined { filters, next } => {
                let f = filters[(*next).min(filters.len() - 1)];
                *next += 1;
                FilterType::from_u8(f).unwrap_or(FilterType::None)
            },
            Selection::Adaptive { set, weighting } => {
                let chosen = Self::select(*set, weighting.as_ref(), row, prev, bpp, &mut self.best, &mut self.attempt);
                if let Some(w) = weighting {
                    w.remember(chosen);
                }
                out[0] = chosen as u8;
                out[1..].copy_from_slice(&self.best[..row.len()]);
                return chosen;
            },
        };
        out[0] = chosen as u8;
        filter_scanline(&mut out[1..], row, prev, bpp, chosen);
        chosen
    }

    /// Minimum sum of absolute differences, optionally weighted. Leaves the
    /// winner's bytes in `best`. Ties go to the lower filter type.
    fn select(set: FilterSet, weighting: Option<&Weighting>, row: &[u8], prev: &[u8], bpp: usize, best: &mut Vec<u8>, attempt: &mut Vec<u8>) -> FilterType {
        best.resize(row.len(), 0);
        attempt.resize(row.len(), 0);
        let mut mins = u64::MAX;
        let mut chosen = None;
        for f in set.iter() {
            // compare raw running sums against the best, unscaled for this filter
            let limit = match (weighting, chosen) {
                (Some(w), Some(_)) => w.scale(mins, f, true),
                _ => mins,
            };
            // a candidate that gave up has an incomplete row and can't win
            let mut sum = match filter_limited(attempt, row, prev, bpp, f, limit) {
                Some(sum) => sum,
                None => continue,
            };
            if let Some(w) = weighting {
                sum = w.scale(sum, f, false);
            }
            if chosen.is_none() || sum < mins {
                mins = sum;
                chosen = Some(f);
                std::mem::swap(best, attempt);
            }
        }
        chosen.unwrap_or(FilterType::None)
    }
}
