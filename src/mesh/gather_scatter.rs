//! Gather-scatter assembly for shared global nodes.
//!
//! Continuous discretizations duplicate a global node on every element
//! (and rank) that touches it. Setup inventories the duplicates from the
//! global node numbering alone: nodes duplicated only locally become
//! *local groups*, nodes shared with another rank become *halo groups*
//! with one message link per neighbor rank. Applying the operation
//! replaces every duplicate with the combined value over all duplicates,
//! on every rank.
//!
//! Combination is deterministic: contributions to a halo group are
//! folded in global rank order, so a sum produces bitwise-identical
//! results on every rank that shares the node.

use std::collections::HashMap;

use crate::error::PsError;
use crate::parallel::{Comm, Wait, tags};

/// Combining operation applied across duplicates of a shared node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GsOp {
    Sum,
    Min,
    Max,
}

impl GsOp {
    fn combine(self, a: f64, b: f64) -> f64 {
        match self {
            GsOp::Sum => a + b,
            GsOp::Min => a.min(b),
            GsOp::Max => a.max(b),
        }
    }
}

#[derive(Debug, Clone)]
struct Group {
    /// Local indices holding a duplicate of this node.
    members: Vec<usize>,
}

#[derive(Debug, Clone)]
struct Link {
    rank: usize,
    /// Halo group ordinals shared with `rank`, in ascending global-id
    /// order. Both sides list the same ids in the same order, which
    /// fixes the message layout.
    groups: Vec<usize>,
}

/// Persistent gather-scatter plan over one global node numbering.
#[derive(Debug, Clone)]
pub struct GatherScatter {
    n: usize,
    my_rank: usize,
    local_groups: Vec<Group>,
    halo_groups: Vec<Group>,
    links: Vec<Link>,
}

/// In-flight neighbor reduction; produced by [`GatherScatter::start`]
/// and consumed by [`GatherScatter::finish`].
pub struct GsExchange<C: Comm> {
    sends: Vec<C::SendHandle>,
    recvs: Vec<(usize, C::RecvHandle)>,
    partials: Vec<f64>,
}

impl GatherScatter {
    /// Build the plan from the local slice of a global node numbering.
    pub fn setup<C: Comm>(node_ids: &[u64], comm: &C) -> GatherScatter {
        let my_rank = comm.rank();

        let mut by_gid: HashMap<u64, Vec<usize>> = HashMap::new();
        for (i, &gid) in node_ids.iter().enumerate() {
            by_gid.entry(gid).or_default().push(i);
        }
        let mut my_gids: Vec<u64> = by_gid.keys().copied().collect();
        my_gids.sort_unstable();

        let gathered = comm.all_gather_bytes(bytemuck::cast_slice(&my_gids));

        // Ascending-gid intersection with each peer's id list.
        let mut shared: HashMap<u64, usize> = HashMap::new(); // gid -> group ordinal
        let mut halo_groups: Vec<Group> = Vec::new();
        let mut links: Vec<Link> = Vec::new();
        for (peer, contrib) in gathered.iter().enumerate() {
            if peer == my_rank {
                continue;
            }
            let peer_gids: &[u64] = bytemuck::cast_slice(contrib);
            let mut groups = Vec::new();
            let (mut a, mut b) = (0, 0);
            while a < my_gids.len() && b < peer_gids.len() {
                match my_gids[a].cmp(&peer_gids[b]) {
                    std::cmp::Ordering::Less => a += 1,
                    std::cmp::Ordering::Greater => b += 1,
                    std::cmp::Ordering::Equal => {
                        let gid = my_gids[a];
                        let ordinal = *shared.entry(gid).or_insert_with(|| {
                            halo_groups.push(Group {
                                members: by_gid[&gid].clone(),
                            });
                            halo_groups.len() - 1
                        });
                        groups.push(ordinal);
                        a += 1;
                        b += 1;
                    }
                }
            }
            if !groups.is_empty() {
                links.push(Link { rank: peer, groups });
            }
        }

        let mut local_groups = Vec::new();
        for &gid in &my_gids {
            if by_gid[&gid].len() > 1 && !shared.contains_key(&gid) {
                local_groups.push(Group {
                    members: by_gid[&gid].clone(),
                });
            }
        }

        log::debug!(
            "gather-scatter setup: rank {my_rank} has {} local and {} halo groups over {} neighbor ranks",
            local_groups.len(),
            halo_groups.len(),
            links.len(),
        );
        GatherScatter {
            n: node_ids.len(),
            my_rank,
            local_groups,
            halo_groups,
            links,
        }
    }

    /// Local vector length this plan was built for.
    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    /// Mask of local indices that duplicate a node shared with another
    /// rank. Every member of a halo group is on an element touching the
    /// partition boundary, which is what overlapped operators key on.
    pub fn halo_node_mask(&self) -> Vec<bool> {
        let mut mask = vec![false; self.n];
        for group in &self.halo_groups {
            for &i in &group.members {
                mask[i] = true;
            }
        }
        mask
    }

    /// Compute the local partial for every halo group and post the
    /// neighbor messages. `values` must already hold the complete local
    /// contribution for every halo-group member.
    pub fn start<C: Comm>(
        &self,
        op: GsOp,
        values: &[f64],
        comm: &C,
    ) -> Result<GsExchange<C>, PsError> {
        if values.len() != self.n {
            return Err(PsError::SizeMismatch {
                expected: self.n,
                got: values.len(),
            });
        }
        let partials: Vec<f64> = self
            .halo_groups
            .iter()
            .map(|g| {
                let mut acc = values[g.members[0]];
                for &i in &g.members[1..] {
                    acc = op.combine(acc, values[i]);
                }
                acc
            })
            .collect();

        let mut recvs = Vec::with_capacity(self.links.len());
        for (li, link) in self.links.iter().enumerate() {
            recvs.push((li, comm.irecv(link.rank, tags::GS_BASE, link.groups.len() * 8)));
        }
        let mut sends = Vec::with_capacity(self.links.len());
        for link in &self.links {
            let payload: Vec<f64> = link.groups.iter().map(|&g| partials[g]).collect();
            sends.push(comm.isend(link.rank, tags::GS_BASE, bytemuck::cast_slice(&payload)));
        }
        Ok(GsExchange {
            sends,
            recvs,
            partials,
        })
    }

    /// Combine purely local duplicates. Safe to run while a neighbor
    /// exchange is in flight; local and halo groups are disjoint.
    pub fn apply_local(&self, op: GsOp, values: &mut [f64]) {
        for group in &self.local_groups {
            let mut acc = values[group.members[0]];
            for &i in &group.members[1..] {
                acc = op.combine(acc, values[i]);
            }
            for &i in &group.members {
                values[i] = acc;
            }
        }
    }

    /// Wait for neighbor partials, fold them in global rank order, and
    /// scatter the combined value back to every local duplicate.
    pub fn finish<C: Comm>(
        &self,
        exchange: GsExchange<C>,
        op: GsOp,
        values: &mut [f64],
    ) -> Result<(), PsError> {
        let mut contrib: Vec<Vec<(usize, f64)>> = vec![Vec::new(); self.halo_groups.len()];
        for (li, h) in exchange.recvs {
            let link = &self.links[li];
            let raw = h.wait().ok_or_else(|| PsError::CommError {
                neighbor: link.rank,
                reason: "gather-scatter exchange receive failed".into(),
            })?;
            let vals: &[f64] = bytemuck::cast_slice(&raw);
            for (k, &g) in link.groups.iter().enumerate() {
                contrib[g].push((link.rank, vals[k]));
            }
        }
        for (g, group) in self.halo_groups.iter().enumerate() {
            let mut entries = std::mem::take(&mut contrib[g]);
            entries.push((self.my_rank, exchange.partials[g]));
            entries.sort_unstable_by_key(|&(rank, _)| rank);
            let mut acc = entries[0].1;
            for &(_, v) in &entries[1..] {
                acc = op.combine(acc, v);
            }
            for &i in &group.members {
                values[i] = acc;
            }
        }
        for s in exchange.sends {
            let _ = s.wait();
        }
        Ok(())
    }

    /// Full gather-scatter: start the neighbor exchange, combine local
    /// groups while it is in flight, then finish.
    pub fn apply<C: Comm>(
        &self,
        op: GsOp,
        values: &mut [f64],
        comm: &C,
    ) -> Result<(), PsError> {
        let exchange = self.start(op, values, comm)?;
        self.apply_local(op, values);
        self.finish(exchange, op, values)
    }

    /// Reciprocal node multiplicity: 1 over the number of duplicates of
    /// each node across all ranks. This is the natural weight for
    /// globally consistent inner products on duplicated vectors.
    pub fn inverse_degree<C: Comm>(&self, comm: &C) -> Result<Vec<f64>, PsError> {
        let mut degree = vec![1.0; self.n];
        self.apply(GsOp::Sum, &mut degree, comm)?;
        Ok(degree.iter().map(|&d| 1.0 / d).collect())
    }
}
