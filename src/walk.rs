//! Random-walk primitives shared by landmark selection and aggregation.

use rand::prelude::*;
use rand_distr::Geometric;

use crate::config::WalkLength;
use crate::sparse::SparseRow;
use crate::HsneError;

/// Stream tags keep the generators of different phases independent.
pub(crate) const STREAM_TREES: u64 = 0x7472_6565;
pub(crate) const STREAM_SELECTION: u64 = 0x7365_6c65;
pub(crate) const STREAM_SAMPLING: u64 = 0x7361_6d70;
pub(crate) const STREAM_INFLUENCE: u64 = 0x696e_666c;

fn splitmix64(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

/// Seed for work unit `unit` of `stream` at `scale`.
pub(crate) fn unit_seed(seed: u64, scale: usize, stream: u64, unit: u64) -> u64 {
    splitmix64(splitmix64(splitmix64(seed ^ stream).wrapping_add(scale as u64)).wrapping_add(unit))
}

/// Generator owned by a single work unit.
pub(crate) fn unit_rng(seed: u64, scale: usize, stream: u64, unit: u64) -> StdRng {
    StdRng::seed_from_u64(unit_seed(seed, scale, stream, unit))
}

/// Draw the next state from a transition row. `None` for an empty row.
#[inline]
pub(crate) fn step<R: Rng>(row: &SparseRow, rng: &mut R) -> Option<u32> {
    let entries = row.entries();
    let (last, _) = *entries.last()?;
    let mut target = rng.gen::<f32>();
    for &(col, weight) in entries {
        target -= weight;
        if target < 0.0 {
            return Some(col);
        }
    }
    // Rounding left the row sum a hair under one.
    Some(last)
}

/// Samples walk lengths according to a [`WalkLength`].
#[derive(Debug, Clone, Copy)]
pub(crate) enum WalkLengthSampler {
    Fixed(usize),
    Geometric(Geometric),
}

impl WalkLengthSampler {
    pub(crate) fn new(length: WalkLength) -> Result<Self, HsneError> {
        match length {
            WalkLength::Fixed(steps) => Ok(Self::Fixed(steps)),
            WalkLength::Geometric { mean } => {
                // Geometric counts failures before a success; one is added per draw.
                let p = 1.0 / mean as f64;
                let dist = Geometric::new(p).map_err(|err| {
                    HsneError::Parameter(format!("invalid geometric walk length: {err}"))
                })?;
                Ok(Self::Geometric(dist))
            }
        }
    }

    #[inline]
    pub(crate) fn sample<R: Rng>(&self, rng: &mut R) -> usize {
        match self {
            Self::Fixed(steps) => *steps,
            Self::Geometric(dist) => 1 + dist.sample(rng) as usize,
        }
    }
}
