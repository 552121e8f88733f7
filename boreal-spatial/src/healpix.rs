//! Nested-scheme HEALPix projection.
//!
//! The ang2pix / pix2ang formulation below is the standard HEALPix
//! equatorial/polar split with Morton-interleaved face coordinates.

use std::f64::consts::{FRAC_PI_2, PI};

/// Storage resolution of the `cell_id` index column.
pub const STORAGE_NSIDE: u32 = 1 << 16;

const JRLL: [i64; 12] = [2, 2, 2, 2, 3, 3, 3, 3, 4, 4, 4, 4];
const JPLL: [i64; 12] = [1, 3, 5, 7, 0, 2, 4, 6, 1, 3, 5, 7];

/// Nested HEALPix cell id of `(ra, dec)` (degrees) at `nside`.
///
/// Deterministic for a given input; this is the stored index function and
/// must never change for data already ingested.
pub fn cell_id(ra_deg: f64, dec_deg: f64, nside: u32) -> i64 {
    let nside = nside as i64;
    let z = dec_deg.to_radians().sin();
    let za = z.abs();
    let phi = ra_deg.rem_euclid(360.0).to_radians();
    let tt = phi / FRAC_PI_2; // in [0, 4)

    let (face, ix, iy) = if za <= 2.0 / 3.0 {
        // equatorial region
        let temp1 = nside as f64 * (0.5 + tt);
        let temp2 = nside as f64 * z * 0.75;
        let jp = (temp1 - temp2) as i64; // ascending edge line index
        let jm = (temp1 + temp2) as i64; // descending edge line index
        let ifp = jp / nside;
        let ifm = jm / nside;
        let face = if ifp == ifm {
            (ifp & 3) + 4
        } else if ifp < ifm {
            ifp & 3
        } else {
            (ifm & 3) + 8
        };
        (face, jm & (nside - 1), nside - (jp & (nside - 1)) - 1)
    } else {
        // polar caps
        let ntt = (tt as i64).min(3);
        let tp = tt - ntt as f64;
        let tmp = nside as f64 * (3.0 * (1.0 - za)).sqrt();
        let jp = ((tp * tmp) as i64).min(nside - 1);
        let jm = (((1.0 - tp) * tmp) as i64).min(nside - 1);
        if z >= 0.0 {
            (ntt, nside - jm - 1, nside - jp - 1)
        } else {
            (ntt + 8, jp, jm)
        }
    };

    face * nside * nside + (spread_bits(ix as u64) | (spread_bits(iy as u64) << 1)) as i64
}

/// Center of a nested cell, as `(ra, dec)` in degrees.
pub fn cell_center(pix: i64, nside: u32) -> (f64, f64) {
    let nside = nside as i64;
    let npface = nside * nside;
    let face = (pix / npface) as usize;
    let t = (pix % npface) as u64;
    let ix = compress_bits(t) as i64;
    let iy = compress_bits(t >> 1) as i64;

    let jr = JRLL[face] * nside - ix - iy - 1;
    let (nr, z, kshift) = if jr < nside {
        // north polar cap
        let nr = jr;
        (nr, 1.0 - (nr * nr) as f64 / (3.0 * npface as f64), 0)
    } else if jr > 3 * nside {
        // south polar cap
        let nr = 4 * nside - jr;
        (nr, (nr * nr) as f64 / (3.0 * npface as f64) - 1.0, 0)
    } else {
        // equatorial belt
        let z = (2 * nside - jr) as f64 * 2.0 / (3.0 * nside as f64);
        (nside, z, (jr - nside) & 1)
    };

    let mut jp = (JPLL[face] * nr + ix - iy + 1 + kshift) / 2;
    if jp > 4 * nr {
        jp -= 4 * nr;
    }
    if jp < 1 {
        jp += 4 * nr;
    }
    let phi = (jp as f64 - (kshift as f64 + 1.0) * 0.5) * FRAC_PI_2 / nr as f64;

    (phi.to_degrees().rem_euclid(360.0), z.asin().to_degrees())
}

/// Exact great-circle separation between two positions, in degrees.
pub fn angular_separation(ra1_deg: f64, dec1_deg: f64, ra2_deg: f64, dec2_deg: f64) -> f64 {
    let l1 = ra1_deg.to_radians();
    let b1 = dec1_deg.to_radians();
    let l2 = ra2_deg.to_radians();
    let b2 = dec2_deg.to_radians();
    let sdlon = ((l2 - l1) / 2.0).sin();
    let sdlat = ((b2 - b1) / 2.0).sin();
    let h = sdlat * sdlat + b1.cos() * b2.cos() * sdlon * sdlon;
    (2.0 * h.sqrt().min(1.0).asin()).to_degrees()
}

/// Upper bound, in degrees, on the distance from a cell center to any
/// point inside the cell at `nside`. Deliberately loose: the cone cover
/// must never prune a cell that touches the cone.
pub(crate) fn cell_radius_bound(nside: i64) -> f64 {
    (FRAC_PI_2 / nside as f64).min(PI).to_degrees()
}

fn spread_bits(v: u64) -> u64 {
    let mut v = v & 0xffff_ffff;
    v = (v | (v << 16)) & 0x0000_ffff_0000_ffff;
    v = (v | (v << 8)) & 0x00ff_00ff_00ff_00ff;
    v = (v | (v << 4)) & 0x0f0f_0f0f_0f0f_0f0f;
    v = (v | (v << 2)) & 0x3333_3333_3333_3333;
    v = (v | (v << 1)) & 0x5555_5555_5555_5555;
    v
}

fn compress_bits(v: u64) -> u64 {
    let mut v = v & 0x5555_5555_5555_5555;
    v = (v | (v >> 1)) & 0x3333_3333_3333_3333;
    v = (v | (v >> 2)) & 0x0f0f_0f0f_0f0f_0f0f;
    v = (v | (v >> 4)) & 0x00ff_00ff_00ff_00ff;
    v = (v | (v >> 8)) & 0x0000_ffff_0000_ffff;
    v = (v | (v >> 16)) & 0x0000_0000_ffff_ffff;
    v
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_interleave_round_trips() {
        for v in [0u64, 1, 2, 0xffff, 0x1234, 0xbeef] {
            assert_eq!(compress_bits(spread_bits(v)), v);
        }
        assert_eq!(spread_bits(0b11), 0b0101);
    }

    #[test]
    fn cell_id_is_in_range() {
        for nside in [1u32, 2, 16, STORAGE_NSIDE] {
            let npix = 12 * (nside as i64) * (nside as i64);
            for &(ra, dec) in &[
                (0.0, 0.0),
                (359.999, 0.0),
                (45.0, 89.9999),
                (123.4, -89.9999),
                (271.5, 41.8),
                (12.0, -41.8),
            ] {
                let pix = cell_id(ra, dec, nside);
                assert!((0..npix).contains(&pix), "pix {pix} out of range at nside {nside}");
            }
        }
    }

    #[test]
    fn cell_center_maps_back_to_its_cell() {
        for nside in [1u32, 2, 8, 256, 1 << 12] {
            for &(ra, dec) in &[
                (0.1, 0.2),
                (90.0, 45.0),
                (180.0, -45.0),
                (300.0, 80.0),
                (200.0, -80.0),
                (42.0, 3.0),
            ] {
                let pix = cell_id(ra, dec, nside);
                let (cra, cdec) = cell_center(pix, nside);
                assert_eq!(
                    cell_id(cra, cdec, nside),
                    pix,
                    "center of pix {pix} left its cell at nside {nside}"
                );
            }
        }
    }

    #[test]
    fn cell_center_stays_close_to_the_source_position() {
        let nside = 1u32 << 12;
        for &(ra, dec) in &[(10.0, 10.0), (250.0, -30.0), (33.3, 66.6)] {
            let pix = cell_id(ra, dec, nside);
            let (cra, cdec) = cell_center(pix, nside);
            let sep = angular_separation(ra, dec, cra, cdec);
            assert!(
                sep <= cell_radius_bound(nside as i64),
                "separation {sep} exceeds bound at nside {nside}"
            );
        }
    }

    #[test]
    fn separation_matches_known_values() {
        assert!(angular_separation(10.0, 0.0, 10.0, 0.0).abs() < 1e-12);
        assert!((angular_separation(0.0, 0.0, 90.0, 0.0) - 90.0).abs() < 1e-9);
        assert!((angular_separation(0.0, -90.0, 0.0, 90.0) - 180.0).abs() < 1e-9);
        // one degree of ra at the equator is one degree of arc
        assert!((angular_separation(0.0, 0.0, 1.0, 0.0) - 1.0).abs() < 1e-9);
        // ...but shrinks with declination
        assert!(angular_separation(0.0, 80.0, 1.0, 80.0) < 0.2);
    }
}
