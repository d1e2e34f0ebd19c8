//! Persistent halo-exchange plans.
//!
//! Setup scans the face adjacency once, splits elements into internal
//! (no cross-rank neighbor) and halo sets, assigns every cross-rank
//! neighbor a contiguous *halo slot* appended after the local elements,
//! and precomputes per-neighbor send/receive lists ordered by a
//! canonical (sender gid, receiver gid) key so both sides agree on the
//! message layout without further negotiation. A count handshake at
//! setup turns a send/receive size mismatch into an error instead of a
//! deadlock.
//!
//! Steady-state exchanges allocate nothing: the caller owns flat send
//! and receive buffers of exactly `total_halo_pairs * entry_len`
//! entries. `extract` must fill the send buffer before `start`, and the
//! receive buffer contents are valid only after `finish`; `finish`
//! without a matching `start` cannot be expressed because it consumes
//! the in-flight [`HaloExchange`] handle.

use super::{BoundaryTag, Mesh, Neighbor};
use crate::error::PsError;
use crate::parallel::{Comm, Wait, tags};

/// Global element id, tagged by ownership. Ghost entries describe halo
/// slots mirroring an element owned by another rank; they are excluded
/// from global sums.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlobalId {
    Owned(u64),
    Ghost(u64),
}

impl GlobalId {
    pub fn id(self) -> u64 {
        match self {
            GlobalId::Owned(id) | GlobalId::Ghost(id) => id,
        }
    }

    pub fn is_ghost(self) -> bool {
        matches!(self, GlobalId::Ghost(_))
    }
}

/// Face adjacency after halo setup: local elements and halo slots share
/// one flat index space of length `nelements + total_halo_pairs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaceNeighbor {
    Elem { slot: usize, face: usize },
    Boundary(BoundaryTag),
}

#[derive(Debug, Clone)]
struct Segment {
    rank: usize,
    /// Local element ids (send side) or halo slot ordinals (receive side).
    entries: Vec<usize>,
}

/// Persistent exchange plan for one mesh.
#[derive(Debug, Clone)]
pub struct HaloExchanger {
    pub nelements: usize,
    pub total_halo_pairs: usize,
    /// Elements with no cross-rank face neighbor.
    pub internal_elements: Vec<usize>,
    /// Elements with at least one cross-rank face neighbor.
    pub halo_elements: Vec<usize>,
    /// Global ids for local elements followed by halo slots.
    pub global_ids: Vec<GlobalId>,
    /// Rewritten adjacency, `nelements * n_faces`.
    pub face_neighbor: Vec<FaceNeighbor>,
    send_segments: Vec<Segment>,
    recv_segments: Vec<Segment>,
}

/// In-flight exchange; produced by [`HaloExchanger::start`] and consumed
/// by [`HaloExchanger::finish`].
pub struct HaloExchange<C: Comm> {
    sends: Vec<C::SendHandle>,
    recvs: Vec<(usize, C::RecvHandle)>,
    entry_len: usize,
}

impl HaloExchanger {
    /// Build the exchange plan from resolved mesh adjacency.
    pub fn setup<C: Comm>(mesh: &Mesh, comm: &C) -> Result<HaloExchanger, PsError> {
        let nfaces = mesh.n_faces();
        let nelements = mesh.nelements;
        let offsets = &mesh.rank_offsets;
        let my_offset = offsets[mesh.rank];

        // One halo pair per cross-rank face, slots in face-scan order.
        // Pair records: (peer rank, sender gid, receiver gid, local data).
        let mut send_pairs: Vec<(usize, u64, u64, usize)> = Vec::new();
        let mut recv_pairs: Vec<(usize, u64, u64, usize)> = Vec::new();
        let mut face_neighbor = Vec::with_capacity(nelements * nfaces);
        let mut halo_flag = vec![false; nelements];
        let mut total_halo_pairs = 0usize;
        let mut ghost_ids = Vec::new();

        for e in 0..nelements {
            for f in 0..nfaces {
                match mesh.neighbors[e * nfaces + f] {
                    Neighbor::Local { elem, face } => {
                        face_neighbor.push(FaceNeighbor::Elem { slot: elem, face });
                    }
                    Neighbor::Boundary(tag) => {
                        face_neighbor.push(FaceNeighbor::Boundary(tag));
                    }
                    Neighbor::Remote { rank, elem, face } => {
                        let slot = total_halo_pairs;
                        let my_gid = my_offset + e as u64;
                        let peer_gid = offsets[rank] + elem as u64;
                        face_neighbor.push(FaceNeighbor::Elem {
                            slot: nelements + slot,
                            face,
                        });
                        ghost_ids.push(GlobalId::Ghost(peer_gid));
                        send_pairs.push((rank, my_gid, peer_gid, e));
                        recv_pairs.push((rank, peer_gid, my_gid, slot));
                        halo_flag[e] = true;
                        total_halo_pairs += 1;
                    }
                }
            }
        }

        let mut internal_elements = Vec::with_capacity(nelements);
        let mut halo_elements = Vec::new();
        for (e, &flagged) in halo_flag.iter().enumerate() {
            if flagged {
                halo_elements.push(e);
            } else {
                internal_elements.push(e);
            }
        }

        let mut global_ids: Vec<GlobalId> = (0..nelements)
            .map(|e| GlobalId::Owned(my_offset + e as u64))
            .collect();
        global_ids.extend(ghost_ids);

        // Canonical (sender gid, receiver gid) order makes both sides of
        // each rank pair agree on message layout.
        send_pairs.sort_unstable_by_key(|&(rank, a, b, _)| (rank, a, b));
        recv_pairs.sort_unstable_by_key(|&(rank, a, b, _)| (rank, a, b));

        let group = |pairs: &[(usize, u64, u64, usize)]| -> Vec<Segment> {
            let mut segments: Vec<Segment> = Vec::new();
            for &(rank, _, _, entry) in pairs {
                match segments.last_mut() {
                    Some(seg) if seg.rank == rank => seg.entries.push(entry),
                    _ => segments.push(Segment {
                        rank,
                        entries: vec![entry],
                    }),
                }
            }
            segments
        };
        let send_segments = group(&send_pairs);
        let recv_segments = group(&recv_pairs);

        let halo = HaloExchanger {
            nelements,
            total_halo_pairs,
            internal_elements,
            halo_elements,
            global_ids,
            face_neighbor,
            send_segments,
            recv_segments,
        };
        halo.handshake(comm)?;

        log::debug!(
            "halo setup: rank {} has {} internal / {} halo elements, {} halo pairs, {} neighbor ranks",
            comm.rank(),
            halo.internal_elements.len(),
            halo.halo_elements.len(),
            halo.total_halo_pairs,
            halo.send_segments.len(),
        );
        Ok(halo)
    }

    /// Verify that every neighbor expects exactly the message sizes this
    /// rank will send. A mismatch here would otherwise hang inside
    /// `finish` with no diagnostic.
    fn handshake<C: Comm>(&self, comm: &C) -> Result<(), PsError> {
        let mut recvs = Vec::with_capacity(self.recv_segments.len());
        for seg in &self.recv_segments {
            recvs.push((seg, comm.irecv(seg.rank, tags::HALO_BASE, 8)));
        }
        let mut sends = Vec::with_capacity(self.send_segments.len());
        for seg in &self.send_segments {
            sends.push(comm.isend(
                seg.rank,
                tags::HALO_BASE,
                &(seg.entries.len() as u64).to_le_bytes(),
            ));
        }
        let mut mismatch = None;
        for (seg, h) in recvs {
            let data = h.wait().ok_or_else(|| PsError::CommError {
                neighbor: seg.rank,
                reason: "halo size handshake failed".into(),
            })?;
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&data);
            let incoming = u64::from_le_bytes(raw) as usize;
            if incoming != seg.entries.len() && mismatch.is_none() {
                mismatch = Some(PsError::CommMismatch {
                    neighbor: seg.rank,
                    sending: incoming,
                    expected: seg.entries.len(),
                });
            }
        }
        for s in sends {
            let _ = s.wait();
        }
        match mismatch {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Flat index space length: local elements plus halo slots.
    pub fn total_slots(&self) -> usize {
        self.nelements + self.total_halo_pairs
    }

    /// Required send/receive buffer length for entries of `entry_len`.
    pub fn buffer_len(&self, entry_len: usize) -> usize {
        self.total_halo_pairs * entry_len
    }

    /// Gather per-halo-element payload from `source` (addressed by local
    /// element id, `entry_len` values per element) into the flat send
    /// buffer, ordered by destination rank.
    pub fn extract(&self, source: &[f64], entry_len: usize, send_buf: &mut [f64]) {
        debug_assert!(send_buf.len() >= self.buffer_len(entry_len));
        let mut pos = 0;
        for seg in &self.send_segments {
            for &e in &seg.entries {
                send_buf[pos..pos + entry_len]
                    .copy_from_slice(&source[e * entry_len..(e + 1) * entry_len]);
                pos += entry_len;
            }
        }
    }

    /// Post one non-blocking send and receive per neighbor rank with
    /// nonzero traffic. `send_buf` must already hold the payload written
    /// by [`extract`]; `recv_buf` contents are undefined until
    /// [`finish`](Self::finish) returns.
    pub fn start<C: Comm>(
        &self,
        comm: &C,
        entry_len: usize,
        send_buf: &[f64],
        recv_buf: &[f64],
    ) -> Result<HaloExchange<C>, PsError> {
        let needed = self.buffer_len(entry_len);
        if send_buf.len() < needed || recv_buf.len() < needed {
            return Err(PsError::SizeMismatch {
                expected: needed,
                got: send_buf.len().min(recv_buf.len()),
            });
        }
        let mut recvs = Vec::with_capacity(self.recv_segments.len());
        for (i, seg) in self.recv_segments.iter().enumerate() {
            let bytes = seg.entries.len() * entry_len * std::mem::size_of::<f64>();
            recvs.push((i, comm.irecv(seg.rank, tags::HALO_BASE + 1, bytes)));
        }
        let mut sends = Vec::with_capacity(self.send_segments.len());
        let mut pos = 0;
        for seg in &self.send_segments {
            let n = seg.entries.len() * entry_len;
            sends.push(comm.isend(
                seg.rank,
                tags::HALO_BASE + 1,
                bytemuck::cast_slice(&send_buf[pos..pos + n]),
            ));
            pos += n;
        }
        Ok(HaloExchange {
            sends,
            recvs,
            entry_len,
        })
    }

    /// Block until the exchange completes and scatter received payloads
    /// into `recv_buf`, addressed by halo slot ordinal.
    pub fn finish<C: Comm>(
        &self,
        exchange: HaloExchange<C>,
        recv_buf: &mut [f64],
    ) -> Result<(), PsError> {
        let entry_len = exchange.entry_len;
        for (seg_idx, h) in exchange.recvs {
            let seg = &self.recv_segments[seg_idx];
            let raw = h.wait().ok_or_else(|| PsError::CommError {
                neighbor: seg.rank,
                reason: "halo exchange receive failed".into(),
            })?;
            let values: &[f64] = bytemuck::cast_slice(&raw);
            for (k, &slot) in seg.entries.iter().enumerate() {
                recv_buf[slot * entry_len..(slot + 1) * entry_len]
                    .copy_from_slice(&values[k * entry_len..(k + 1) * entry_len]);
            }
        }
        for s in exchange.sends {
            let _ = s.wait();
        }
        Ok(())
    }

    /// Convenience wrapper running extract, start, and finish in order.
    pub fn exchange<C: Comm>(
        &self,
        comm: &C,
        source: &[f64],
        entry_len: usize,
        send_buf: &mut [f64],
        recv_buf: &mut [f64],
    ) -> Result<(), PsError> {
        self.extract(source, entry_len, send_buf);
        let inflight = self.start(comm, entry_len, send_buf, recv_buf)?;
        self.finish(inflight, recv_buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::connect;
    use crate::parallel::SerialComm;

    #[test]
    fn serial_mesh_has_no_halo() {
        let mut mesh = Mesh::box_2d(&SerialComm, 4, 4, 1);
        connect(&mut mesh, &SerialComm).unwrap();
        let halo = HaloExchanger::setup(&mesh, &SerialComm).unwrap();
        assert_eq!(halo.total_halo_pairs, 0);
        assert_eq!(halo.internal_elements.len(), 16);
        assert!(halo.halo_elements.is_empty());
        assert_eq!(halo.global_ids.len(), 16);
        assert!(halo.global_ids.iter().all(|g| !g.is_ghost()));
    }

    #[test]
    fn serial_exchange_is_a_noop() {
        let mut mesh = Mesh::box_2d(&SerialComm, 2, 2, 1);
        connect(&mut mesh, &SerialComm).unwrap();
        let halo = HaloExchanger::setup(&mesh, &SerialComm).unwrap();
        let source = vec![1.0; mesh.nelements];
        let mut send = vec![0.0; halo.buffer_len(1)];
        let mut recv = vec![0.0; halo.buffer_len(1)];
        halo.exchange(&SerialComm, &source, 1, &mut send, &mut recv)
            .unwrap();
    }
}
