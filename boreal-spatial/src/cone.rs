//! Cone decomposition into nested cell-id ranges.

use crate::healpix::{angular_separation, cell_center, cell_radius_bound};

/// Decompose a cone into disjoint half-open cell-id ranges that fully
/// cover it, at a resolution no finer than `max_nside`.
///
/// The cover is an over-approximation: every position within `radius_deg`
/// of the center falls inside some returned range, but ranges may also
/// contain positions outside the cone. Callers scale the ranges up to the
/// storage resolution with [`scale_ranges`] and conjoin the exact
/// [`angular_separation`] predicate.
pub fn cone_to_ranges(
    ra_deg: f64,
    dec_deg: f64,
    radius_deg: f64,
    max_nside: u32,
) -> (u32, Vec<(i64, i64)>) {
    // Coarsest resolution whose cells are no bigger than the cone keeps
    // the range count small without losing precision to the exact filter.
    let mut nside: u32 = 1;
    while nside < max_nside && cell_radius_bound(nside as i64) > radius_deg.max(1e-9) {
        nside <<= 1;
    }
    let target_order = nside.trailing_zeros();

    let mut ranges = Vec::new();
    for base in 0..12 {
        visit(base, 0, target_order, ra_deg, dec_deg, radius_deg, &mut ranges);
    }
    merge(&mut ranges);
    (nside, ranges)
}

/// Scale ranges produced at a coarser `nside` up to `storage_nside`.
pub fn scale_ranges(ranges: &[(i64, i64)], nside: u32, storage_nside: u32) -> Vec<(i64, i64)> {
    let scale = ((storage_nside / nside) as i64).pow(2);
    ranges
        .iter()
        .map(|&(lo, hi)| (lo * scale, hi * scale))
        .collect()
}

fn visit(
    pix: i64,
    order: u32,
    target_order: u32,
    ra_deg: f64,
    dec_deg: f64,
    radius_deg: f64,
    ranges: &mut Vec<(i64, i64)>,
) {
    let nside = 1i64 << order;
    let (cra, cdec) = cell_center(pix, nside as u32);
    let sep = angular_separation(ra_deg, dec_deg, cra, cdec);
    let bound = cell_radius_bound(nside);

    if sep > radius_deg + bound {
        // provably disjoint from the cone
        return;
    }

    let shift = 2 * (target_order - order);
    if sep + bound <= radius_deg || order == target_order {
        // fully inside, or a leaf that may straddle the boundary: emit the
        // whole nested subtree, which is contiguous at the target order
        ranges.push((pix << shift, (pix + 1) << shift));
        return;
    }

    for child in 0..4 {
        visit(pix * 4 + child, order + 1, target_order, ra_deg, dec_deg, radius_deg, ranges);
    }
}

fn merge(ranges: &mut Vec<(i64, i64)>) {
    ranges.sort_unstable();
    let mut merged: Vec<(i64, i64)> = Vec::with_capacity(ranges.len());
    for &(lo, hi) in ranges.iter() {
        match merged.last_mut() {
            Some(last) if lo <= last.1 => last.1 = last.1.max(hi),
            _ => merged.push((lo, hi)),
        }
    }
    *ranges = merged;
}
