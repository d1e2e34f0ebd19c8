//! Element distribution and repartitioning.
//!
//! Elements keep their global file order; a partition is a set of
//! contiguous per-rank ranges. The initial distribution balances element
//! counts; [`repartition`] rebalances by an arbitrary per-element cost
//! (for example a multi-rate time-stepping level), migrates element
//! records to their new owners, and rebuilds connectivity.

use super::{Mesh, connect};
use crate::error::PsError;
use crate::parallel::{Comm, Wait, tags};

/// Contiguous offsets distributing `total` elements over `size` ranks as
/// evenly as element counts allow. Length `size + 1`.
pub fn balanced_ranges(total: u64, size: usize) -> Vec<u64> {
    let mut offsets = Vec::with_capacity(size + 1);
    for r in 0..=size {
        offsets.push(total * r as u64 / size as u64);
    }
    offsets
}

/// Contiguous offsets balancing the summed per-element weight instead of
/// the element count. Greedy prefix cut at each multiple of the mean
/// per-rank load.
pub fn weighted_ranges(weights: &[f64], size: usize) -> Vec<u64> {
    let total: f64 = weights.iter().sum();
    let target = total / size as f64;
    let mut offsets = vec![0u64; size + 1];
    let mut cum = 0.0;
    let mut r = 1;
    for (e, &w) in weights.iter().enumerate() {
        cum += w;
        while r < size && cum >= target * r as f64 {
            offsets[r] = (e + 1) as u64;
            r += 1;
        }
    }
    for k in r..size {
        offsets[k] = weights.len() as u64;
    }
    offsets[size] = weights.len() as u64;
    // Offsets must stay monotone even for degenerate weights.
    for k in 1..=size {
        offsets[k] = offsets[k].max(offsets[k - 1]);
    }
    offsets
}

fn intersect(a0: u64, a1: u64, b0: u64, b1: u64) -> (u64, u64) {
    let lo = a0.max(b0);
    let hi = a1.min(b1);
    (lo, hi.max(lo))
}

/// Redistribute the mesh onto the ranges given by per-element `weights`
/// (uniform when `None`), then rebuild connectivity.
pub fn repartition<C: Comm>(
    mesh: &mut Mesh,
    weights: Option<&[f64]>,
    comm: &C,
) -> Result<(), PsError> {
    let size = comm.size();
    let rank = comm.rank();
    let uniform = vec![1.0; mesh.nelements];
    let local_weights = weights.unwrap_or(&uniform);
    if local_weights.len() != mesh.nelements {
        return Err(PsError::SizeMismatch {
            expected: mesh.nelements,
            got: local_weights.len(),
        });
    }

    // Global weight vector in file order (rank order == global order).
    let gathered = comm.all_gather_bytes(bytemuck::cast_slice(local_weights));
    let mut global_weights = Vec::with_capacity(mesh.global_nelements() as usize);
    for contrib in &gathered {
        global_weights.extend_from_slice(bytemuck::cast_slice::<u8, f64>(contrib));
    }

    let old = mesh.rank_offsets.clone();
    let new = weighted_ranges(&global_weights, size);
    if new == old {
        return Ok(());
    }

    let nverts = mesh.n_verts();
    let dim = mesh.dim;
    let np = mesh.np;
    let ints_per_elem = nverts + np;
    let floats_per_elem = nverts * dim + 2;

    let pack = |mesh: &Mesh, lo: usize, hi: usize| -> (Vec<u64>, Vec<f64>) {
        let mut ints = Vec::with_capacity((hi - lo) * ints_per_elem);
        let mut floats = Vec::with_capacity((hi - lo) * floats_per_elem);
        for e in lo..hi {
            ints.extend_from_slice(&mesh.etov[e * nverts..(e + 1) * nverts]);
            ints.extend_from_slice(&mesh.node_ids[e * np..(e + 1) * np]);
            floats.extend_from_slice(&mesh.coords[e * nverts * dim..(e + 1) * nverts * dim]);
            floats.push(mesh.geo[e].hx);
            floats.push(mesh.geo[e].hy);
        }
        (ints, floats)
    };

    // Post receives for the slices of my new range owned elsewhere.
    let mut recvs = Vec::new();
    for peer in 0..size {
        if peer == rank {
            continue;
        }
        let (lo, hi) = intersect(old[peer], old[peer + 1], new[rank], new[rank + 1]);
        if hi > lo {
            let n = (hi - lo) as usize;
            recvs.push((
                peer,
                lo,
                comm.irecv(peer, tags::CONNECT_BASE + 1, n * ints_per_elem * 8),
                comm.irecv(peer, tags::CONNECT_BASE + 2, n * floats_per_elem * 8),
            ));
        }
    }

    // Send the slices of my old range owned elsewhere now.
    let mut sends = Vec::new();
    for peer in 0..size {
        if peer == rank {
            continue;
        }
        let (lo, hi) = intersect(old[rank], old[rank + 1], new[peer], new[peer + 1]);
        if hi > lo {
            let local_lo = (lo - old[rank]) as usize;
            let local_hi = (hi - old[rank]) as usize;
            let (ints, floats) = pack(mesh, local_lo, local_hi);
            sends.push(comm.isend(peer, tags::CONNECT_BASE + 1, bytemuck::cast_slice(&ints)));
            sends.push(comm.isend(peer, tags::CONNECT_BASE + 2, bytemuck::cast_slice(&floats)));
        }
    }

    // Assemble the new local arrays in global order: contributions from
    // each source rank cover disjoint ascending id ranges.
    let new_count = (new[rank + 1] - new[rank]) as usize;
    let mut etov = vec![0u64; new_count * nverts];
    let mut node_ids = vec![0u64; new_count * np];
    let mut coords = vec![0.0f64; new_count * nverts * dim];
    let mut geo = vec![super::QuadGeom { hx: 0.0, hy: 0.0 }; new_count];

    let mut place = |mesh_lo: u64, ints: &[u64], floats: &[f64]| {
        let n = ints.len() / ints_per_elem;
        for k in 0..n {
            let e = (mesh_lo - new[rank]) as usize + k;
            let ik = &ints[k * ints_per_elem..(k + 1) * ints_per_elem];
            etov[e * nverts..(e + 1) * nverts].copy_from_slice(&ik[..nverts]);
            node_ids[e * np..(e + 1) * np].copy_from_slice(&ik[nverts..]);
            let fk = &floats[k * floats_per_elem..(k + 1) * floats_per_elem];
            coords[e * nverts * dim..(e + 1) * nverts * dim]
                .copy_from_slice(&fk[..nverts * dim]);
            geo[e] = super::QuadGeom {
                hx: fk[nverts * dim],
                hy: fk[nverts * dim + 1],
            };
        }
    };

    // Kept slice.
    let (keep_lo, keep_hi) = intersect(old[rank], old[rank + 1], new[rank], new[rank + 1]);
    if keep_hi > keep_lo {
        let local_lo = (keep_lo - old[rank]) as usize;
        let local_hi = (keep_hi - old[rank]) as usize;
        let (ints, floats) = pack(mesh, local_lo, local_hi);
        place(keep_lo, &ints, &floats);
    }
    for (peer, lo, hi_ints, hi_floats) in recvs {
        let ints_raw = hi_ints.wait().ok_or_else(|| PsError::CommError {
            neighbor: peer,
            reason: "element migration (connectivity payload) failed".into(),
        })?;
        let floats_raw = hi_floats.wait().ok_or_else(|| PsError::CommError {
            neighbor: peer,
            reason: "element migration (geometry payload) failed".into(),
        })?;
        place(
            lo,
            bytemuck::cast_slice(&ints_raw),
            bytemuck::cast_slice(&floats_raw),
        );
    }
    for s in sends {
        let _ = s.wait();
    }

    mesh.nelements = new_count;
    mesh.rank_offsets = new;
    mesh.etov = etov;
    mesh.node_ids = node_ids;
    mesh.coords = coords;
    mesh.geo = geo;

    log::debug!(
        "repartition: rank {rank} now holds {new_count} elements (weighted load {:.3})",
        global_weights
            [mesh.rank_offsets[rank] as usize..mesh.rank_offsets[rank + 1] as usize]
            .iter()
            .sum::<f64>(),
    );

    connect(mesh, comm)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn balanced_ranges_cover() {
        let offsets = balanced_ranges(10, 4);
        assert_eq!(offsets, vec![0, 2, 5, 7, 10]);
    }

    #[test]
    fn weighted_ranges_follow_cost() {
        // Heavy elements up front should shrink rank 0's range.
        let weights = [4.0, 4.0, 1.0, 1.0, 1.0, 1.0];
        let offsets = weighted_ranges(&weights, 2);
        assert_eq!(offsets[0], 0);
        assert_eq!(offsets[2], 6);
        assert!(offsets[1] <= 2, "heavy prefix must cut early: {offsets:?}");
    }

    #[test]
    fn weighted_ranges_degenerate_weights() {
        let weights = [0.0; 5];
        let offsets = weighted_ranges(&weights, 3);
        assert_eq!(offsets.len(), 4);
        assert_eq!(offsets[3], 5);
        for k in 1..4 {
            assert!(offsets[k] >= offsets[k - 1]);
        }
    }
}
