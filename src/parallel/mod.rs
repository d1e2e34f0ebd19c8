//! Communication façade over serial, threaded, or MPI execution.
//!
//! Messages are contiguous byte slices. All point-to-point handles are
//! waitable but non-blocking: the halo engine calls `.wait()` before it
//! trusts that a buffer is ready. Collectives have deterministic,
//! rank-ordered reduction semantics so that globally reduced scalars are
//! identical on every rank.

pub mod thread_comm;
pub use thread_comm::{ThreadComm, ThreadWorld};

#[cfg(feature = "mpi")]
pub mod mpi_comm;
#[cfg(feature = "mpi")]
pub use mpi_comm::MpiComm;

/// Anything that can be waited on. Receives yield the delivered bytes.
pub trait Wait {
    fn wait(self) -> Option<Vec<u8>>;
}

impl Wait for () {
    fn wait(self) -> Option<Vec<u8>> {
        None
    }
}

/// Non-blocking communication interface plus the small set of collectives
/// the solver core needs. Default collective implementations are built on
/// `isend`/`irecv` so a backend only has to provide point-to-point
/// primitives; MPI overrides them with native collectives.
pub trait Comm: Send + Sync {
    type SendHandle: Wait;
    type RecvHandle: Wait;

    fn rank(&self) -> usize;
    fn size(&self) -> usize;

    /// Post a non-blocking send of `buf` to `peer`.
    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle;
    /// Post a non-blocking receive of exactly `len` bytes from `peer`.
    fn irecv(&self, peer: usize, tag: u16, len: usize) -> Self::RecvHandle;

    /// Gather one byte payload from every rank, indexed by rank.
    fn all_gather_bytes(&self, local: &[u8]) -> Vec<Vec<u8>> {
        let me = self.rank();
        let size = self.size();
        let mut recvs = Vec::with_capacity(size);
        for peer in 0..size {
            if peer != me {
                // Length is pre-agreed out of band for the default path:
                // exchange the lengths first.
                recvs.push(Some(self.irecv(peer, tags::GATHER_LEN, 8)));
            } else {
                recvs.push(None);
            }
        }
        let mut len_sends = Vec::new();
        let len_bytes = (local.len() as u64).to_le_bytes();
        for peer in 0..size {
            if peer != me {
                len_sends.push(self.isend(peer, tags::GATHER_LEN, &len_bytes));
            }
        }
        let mut lens = vec![0usize; size];
        lens[me] = local.len();
        for (peer, h) in recvs.into_iter().enumerate() {
            if let Some(h) = h {
                let data = h.wait().expect("length exchange");
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&data);
                lens[peer] = u64::from_le_bytes(raw) as usize;
            }
        }
        for s in len_sends {
            let _ = s.wait();
        }

        let mut payload_recvs = Vec::with_capacity(size);
        for peer in 0..size {
            if peer != me {
                payload_recvs.push(Some(self.irecv(peer, tags::GATHER_PAYLOAD, lens[peer])));
            } else {
                payload_recvs.push(None);
            }
        }
        let mut payload_sends = Vec::new();
        for peer in 0..size {
            if peer != me {
                payload_sends.push(self.isend(peer, tags::GATHER_PAYLOAD, local));
            }
        }
        let mut out = vec![Vec::new(); size];
        out[me] = local.to_vec();
        for (peer, h) in payload_recvs.into_iter().enumerate() {
            if let Some(h) = h {
                out[peer] = h.wait().expect("payload exchange");
            }
        }
        for s in payload_sends {
            let _ = s.wait();
        }
        out
    }

    /// Gather one u64 from every rank.
    fn all_gather_u64(&self, v: u64) -> Vec<u64> {
        self.all_gather_bytes(&v.to_le_bytes())
            .into_iter()
            .map(|b| {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&b);
                u64::from_le_bytes(raw)
            })
            .collect()
    }

    /// Global sum, reduced in rank order on every rank.
    fn all_reduce_sum(&self, x: f64) -> f64 {
        self.all_gather_bytes(&x.to_le_bytes())
            .into_iter()
            .map(|b| {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&b);
                f64::from_le_bytes(raw)
            })
            .sum()
    }

    /// Elementwise global sum of a small vector of partial reductions.
    fn all_reduce_sum_many(&self, xs: &[f64], out: &mut [f64]) {
        debug_assert_eq!(xs.len(), out.len());
        let contributions = self.all_gather_bytes(bytemuck::cast_slice(xs));
        out.fill(0.0);
        for contrib in &contributions {
            let vals: &[f64] = bytemuck::cast_slice(contrib);
            for (o, v) in out.iter_mut().zip(vals) {
                *o += v;
            }
        }
    }

    fn barrier(&self) {
        let _ = self.all_gather_bytes(&[]);
    }
}

/// Reserved tags for collectives built on point-to-point messages.
pub(crate) mod tags {
    pub const GATHER_LEN: u16 = 0xFFF0;
    pub const GATHER_PAYLOAD: u16 = 0xFFF1;
    pub const HALO_BASE: u16 = 0x4000;
    pub const GS_BASE: u16 = 0x5000;
    pub const CONNECT_BASE: u16 = 0x6000;
}

/// Single-process communicator for serial runs and unit tests.
#[derive(Clone, Debug, Default)]
pub struct SerialComm;

impl Comm for SerialComm {
    type SendHandle = ();
    type RecvHandle = ();

    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        1
    }
    fn isend(&self, _peer: usize, _tag: u16, _buf: &[u8]) {}
    fn irecv(&self, _peer: usize, _tag: u16, _len: usize) {}

    fn all_gather_bytes(&self, local: &[u8]) -> Vec<Vec<u8>> {
        vec![local.to_vec()]
    }
    fn all_reduce_sum(&self, x: f64) -> f64 {
        x
    }
    fn all_reduce_sum_many(&self, xs: &[f64], out: &mut [f64]) {
        out.copy_from_slice(xs);
    }
    fn barrier(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_collectives() {
        let comm = SerialComm;
        assert_eq!(comm.all_gather_u64(7), vec![7]);
        assert_eq!(comm.all_reduce_sum(2.5), 2.5);
        let mut out = [0.0; 2];
        comm.all_reduce_sum_many(&[1.0, -3.0], &mut out);
        assert_eq!(out, [1.0, -3.0]);
    }
}
