//! Face-matching connectivity builder.
//!
//! Every face is reduced to a canonical key (its sorted global vertex
//! ids). All ranks assemble the global face table, sort it by
//! `(key, element gid, face)`, and pair adjacent entries with equal
//! keys: two entries form an interior face, a lone entry is a physical
//! boundary face, and three or more matches mean the mesh itself is
//! inconsistent, which is a fatal user-input error.
//!
//! The face table is replicated on every rank, so setup memory scales
//! with the global face count. For meshes far beyond the current
//! target sizes the allgather would need to become a bucketed exchange
//! keyed on a hash of the face key.

use super::{BoundaryTag, Mesh, Neighbor};
use crate::error::PsError;
use crate::parallel::Comm;

const KEY_VERTS: usize = 4;
const RECORD_WORDS: usize = KEY_VERTS + 3; // key, elem gid, rank, face

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct FaceRecord {
    key: [u64; KEY_VERTS],
    elem_gid: u64,
    rank: u64,
    face: u64,
}

fn local_face_records(mesh: &Mesh) -> Vec<FaceRecord> {
    let nverts = mesh.n_verts();
    let face_verts = mesh.elem_type.face_verts();
    let mut records = Vec::with_capacity(mesh.nelements * mesh.n_faces());
    for e in 0..mesh.nelements {
        let verts = &mesh.etov[e * nverts..(e + 1) * nverts];
        for (f, fv) in face_verts.iter().enumerate() {
            let mut key = [u64::MAX; KEY_VERTS];
            for (slot, &lv) in key.iter_mut().zip(fv.iter()) {
                *slot = verts[lv];
            }
            key[..fv.len()].sort_unstable();
            records.push(FaceRecord {
                key,
                elem_gid: mesh.global_elem_id(e),
                rank: mesh.rank as u64,
                face: f as u64,
            });
        }
    }
    records
}

fn pack(records: &[FaceRecord]) -> Vec<u64> {
    let mut flat = Vec::with_capacity(records.len() * RECORD_WORDS);
    for r in records {
        flat.extend_from_slice(&r.key);
        flat.push(r.elem_gid);
        flat.push(r.rank);
        flat.push(r.face);
    }
    flat
}

fn unpack(flat: &[u64]) -> Vec<FaceRecord> {
    flat.chunks_exact(RECORD_WORDS)
        .map(|c| FaceRecord {
            key: [c[0], c[1], c[2], c[3]],
            elem_gid: c[KEY_VERTS],
            rank: c[KEY_VERTS + 1],
            face: c[KEY_VERTS + 2],
        })
        .collect()
}

/// Resolve `EToE`/`EToF`/`EToP` for the local elements of `mesh`.
///
/// Unmatched faces become [`Neighbor::Boundary`] with the default wall
/// tag; over-matched faces are reported as [`PsError::DanglingFace`].
pub fn connect<C: Comm>(mesh: &mut Mesh, comm: &C) -> Result<(), PsError> {
    let local = local_face_records(mesh);
    let gathered = comm.all_gather_bytes(bytemuck::cast_slice(&pack(&local)));

    let mut all = Vec::new();
    for contrib in &gathered {
        all.extend(unpack(bytemuck::cast_slice::<u8, u64>(contrib)));
    }
    all.sort_unstable();

    let nfaces = mesh.n_faces();
    mesh.neighbors = vec![Neighbor::Boundary(BoundaryTag::WALL); mesh.nelements * nfaces];

    let my_rank = mesh.rank as u64;
    let my_offset = mesh.rank_offsets[mesh.rank];
    let mut i = 0;
    while i < all.len() {
        let mut j = i + 1;
        while j < all.len() && all[j].key == all[i].key {
            j += 1;
        }
        match j - i {
            1 => {} // physical boundary, keep the default tag
            2 => {
                for (a, b) in [(i, i + 1), (i + 1, i)] {
                    let me = &all[a];
                    let other = &all[b];
                    if me.rank == my_rank {
                        let e = (me.elem_gid - my_offset) as usize;
                        let peer_rank = other.rank as usize;
                        let peer_elem =
                            (other.elem_gid - mesh.rank_offsets[peer_rank]) as usize;
                        let slot = e * nfaces + me.face as usize;
                        mesh.neighbors[slot] = if peer_rank == mesh.rank {
                            Neighbor::Local {
                                elem: peer_elem,
                                face: other.face as usize,
                            }
                        } else {
                            Neighbor::Remote {
                                rank: peer_rank,
                                elem: peer_elem,
                                face: other.face as usize,
                            }
                        };
                    }
                }
            }
            count => {
                return Err(PsError::DanglingFace {
                    elem: all[i].elem_gid,
                    face: all[i].face as usize,
                    count,
                });
            }
        }
        i = j;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parallel::SerialComm;

    #[test]
    fn serial_box_adjacency() {
        let mut mesh = Mesh::box_2d(&SerialComm, 2, 2, 1);
        connect(&mut mesh, &SerialComm).unwrap();
        // Element 0 (lower left): right neighbor is element 1 via its
        // left face, top neighbor is element 2 via its bottom face.
        assert_eq!(
            mesh.neighbors[1],
            Neighbor::Local { elem: 1, face: 3 }
        );
        assert_eq!(
            mesh.neighbors[2],
            Neighbor::Local { elem: 2, face: 0 }
        );
        // Lower and left faces of element 0 are physical boundary.
        assert!(matches!(mesh.neighbors[0], Neighbor::Boundary(_)));
        assert!(matches!(mesh.neighbors[3], Neighbor::Boundary(_)));
    }

    #[test]
    fn adjacency_is_symmetric() {
        let mut mesh = Mesh::box_2d(&SerialComm, 3, 3, 1);
        connect(&mut mesh, &SerialComm).unwrap();
        let nfaces = mesh.n_faces();
        for e in 0..mesh.nelements {
            for f in 0..nfaces {
                if let Neighbor::Local { elem, face } = mesh.neighbors[e * nfaces + f] {
                    assert_eq!(
                        mesh.neighbors[elem * nfaces + face],
                        Neighbor::Local { elem: e, face: f }
                    );
                }
            }
        }
    }

    #[test]
    fn duplicated_element_is_rejected() {
        let mut mesh = Mesh::box_2d(&SerialComm, 2, 2, 1);
        // Duplicate element 0's vertices into element 2: the face shared
        // by elements 0 and 1 now appears three times in the face table.
        let etov0: Vec<u64> = mesh.etov[0..4].to_vec();
        mesh.etov[8..12].copy_from_slice(&etov0);
        match connect(&mut mesh, &SerialComm) {
            Err(PsError::DanglingFace { count, .. }) => assert!(count > 2),
            other => panic!("expected DanglingFace, got {other:?}"),
        }
    }
}
