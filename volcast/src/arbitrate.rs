//! Collision policies for samples landing in the same bin
//!
//! When two cells produce a sample for the same `(x, y, z)` bin, the
//! [`SampleVolume`](crate::SampleVolume) keeps exactly one of them.  The
//! decision is made by an [`Arbitrator`], which must implement a strict total
//! order over sample vectors: that's what makes the surviving sample
//! independent of the order in which cells were extracted.
use crate::opacity::OpacityMap;
use std::cmp::Ordering;

/// Decides which of two colliding samples survives
///
/// Implementations must be pure functions of their inputs, and
/// `prefers(a, b)` must describe a strict total order (irreflexive,
/// transitive, and total over distinct vectors).  Under those conditions,
/// inserting any permutation of a set of candidates yields the same winner.
pub trait Arbitrator: Send + Sync {
    /// Returns `true` if `candidate` should replace `existing`
    fn prefers(&self, candidate: &[f32], existing: &[f32]) -> bool;
}

/// Compares two vectors lexicographically with [`f32::total_cmp`]
fn lexicographic(a: &[f32], b: &[f32]) -> Ordering {
    a.iter()
        .zip(b)
        .map(|(a, b)| a.total_cmp(b))
        .find(|o| o.is_ne())
        .unwrap_or_else(|| a.len().cmp(&b.len()))
}

////////////////////////////////////////////////////////////////////////////////

/// Default policy: the more opaque sample wins
///
/// Samples are ordered by
/// 1. the opacity that the [`OpacityMap`] assigns to the opacity variable,
/// 2. the raw value of the opacity variable (larger wins), then
/// 3. every variable, compared lexicographically.
///
/// The second step keeps the larger value when both samples land on the same
/// opacity, which avoids flickering across flat regions of the transfer
/// function; it is a policy choice rather than a physical law.  The third step
/// only matters for samples which agree on the opacity variable, and makes the
/// winner's whole vector independent of insertion order.
#[derive(Copy, Clone, Debug)]
pub struct OpacityMapArbitrator<'a> {
    map: &'a OpacityMap,
    variable: usize,
}

impl<'a> OpacityMapArbitrator<'a> {
    /// Builds an arbitrator looking up `variable` in the given map
    pub fn new(map: &'a OpacityMap, variable: usize) -> Self {
        Self { map, variable }
    }

    /// Returns the total order used by this arbitrator
    pub fn compare(&self, a: &[f32], b: &[f32]) -> Ordering {
        let (va, vb) = (a[self.variable], b[self.variable]);
        self.map
            .alpha(va)
            .total_cmp(&self.map.alpha(vb))
            .then_with(|| va.total_cmp(&vb))
            .then_with(|| lexicographic(a, b))
    }
}

impl Arbitrator for OpacityMapArbitrator<'_> {
    fn prefers(&self, candidate: &[f32], existing: &[f32]) -> bool {
        self.compare(candidate, existing) == Ordering::Greater
    }
}

/// Alternative policy: the larger value of one variable wins
///
/// Ties fall back to a lexicographic comparison of the whole vector.
#[derive(Copy, Clone, Debug, Default)]
pub struct MaxValueArbitrator {
    /// Index of the variable to maximize
    pub variable: usize,
}

impl Arbitrator for MaxValueArbitrator {
    fn prefers(&self, candidate: &[f32], existing: &[f32]) -> bool {
        candidate[self.variable]
            .total_cmp(&existing[self.variable])
            .then_with(|| lexicographic(candidate, existing))
            == Ordering::Greater
    }
}
