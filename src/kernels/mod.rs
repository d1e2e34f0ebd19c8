//! Vector kernels shared by the operator and solver layers.
//!
//! All hot loops in the solver go through [`KernelSet`] so a backend can
//! swap in its own implementations; [`CpuKernels`] is the portable
//! default, threaded with rayon when the feature is enabled. Inner
//! products are exposed as fixed-size block partial sums: the caller
//! reduces the partial vector (locally, then across ranks), which keeps
//! the summation order independent of thread count.

use num_traits::Float;

/// Partial-sum block length for inner products.
pub const BLOCK_SIZE: usize = 256;

/// Number of partial-sum blocks covering a vector of length `n`.
pub fn n_blocks(n: usize) -> usize {
    n.div_ceil(BLOCK_SIZE)
}

/// Backend-swappable vector kernels.
pub trait KernelSet<T: Float>: Send + Sync {
    /// `y[i] = value`.
    fn set(&self, value: T, y: &mut [T]);

    /// `y = alpha * x + beta * y`.
    fn scaled_add(&self, alpha: T, x: &[T], beta: T, y: &mut [T]);

    /// `out[k] = x[idx[k]]`.
    fn gather(&self, idx: &[usize], x: &[T], out: &mut [T]);

    /// `y[idx[k]] = x[k]`.
    fn scatter(&self, idx: &[usize], x: &[T], y: &mut [T]);

    /// Blockwise partials of `sum_i w[i] * x[i] * y[i]` (unweighted when
    /// `w` is `None`). `partials` must have length [`n_blocks`]`(x.len())`.
    fn inner_product_partials(&self, w: Option<&[T]>, x: &[T], y: &[T], partials: &mut [T]);

    /// `out += sum_m coeffs[m] * basis[m]` over `dim` stacked basis
    /// vectors of length `out.len()`.
    fn reconstruct(&self, coeffs: &[T], basis: &[T], dim: usize, out: &mut [T]);
}

/// Portable CPU kernels.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuKernels;

#[cfg(feature = "rayon")]
impl CpuKernels {
    /// Size the global rayon pool to the machine. Call once before the
    /// first parallel kernel; later calls are no-ops.
    pub fn init_thread_pool() {
        rayon::ThreadPoolBuilder::new()
            .num_threads(num_cpus::get())
            .build_global()
            .ok();
    }
}

impl<T: Float + Send + Sync> KernelSet<T> for CpuKernels {
    fn set(&self, value: T, y: &mut [T]) {
        #[cfg(feature = "rayon")]
        {
            use rayon::prelude::*;
            y.par_iter_mut().for_each(|v| *v = value);
        }
        #[cfg(not(feature = "rayon"))]
        y.fill(value);
    }

    fn scaled_add(&self, alpha: T, x: &[T], beta: T, y: &mut [T]) {
        debug_assert_eq!(x.len(), y.len());
        #[cfg(feature = "rayon")]
        {
            use rayon::prelude::*;
            y.par_iter_mut()
                .zip(x.par_iter())
                .for_each(|(yv, &xv)| *yv = alpha * xv + beta * *yv);
        }
        #[cfg(not(feature = "rayon"))]
        for (yv, &xv) in y.iter_mut().zip(x) {
            *yv = alpha * xv + beta * *yv;
        }
    }

    fn gather(&self, idx: &[usize], x: &[T], out: &mut [T]) {
        debug_assert_eq!(idx.len(), out.len());
        for (o, &i) in out.iter_mut().zip(idx) {
            *o = x[i];
        }
    }

    fn scatter(&self, idx: &[usize], x: &[T], y: &mut [T]) {
        debug_assert_eq!(idx.len(), x.len());
        for (&i, &v) in idx.iter().zip(x) {
            y[i] = v;
        }
    }

    fn inner_product_partials(&self, w: Option<&[T]>, x: &[T], y: &[T], partials: &mut [T]) {
        debug_assert_eq!(x.len(), y.len());
        debug_assert_eq!(partials.len(), n_blocks(x.len()));
        let block = |b: usize| -> T {
            let lo = b * BLOCK_SIZE;
            let hi = (lo + BLOCK_SIZE).min(x.len());
            let mut acc = T::zero();
            match w {
                Some(w) => {
                    for i in lo..hi {
                        acc = acc + w[i] * x[i] * y[i];
                    }
                }
                None => {
                    for i in lo..hi {
                        acc = acc + x[i] * y[i];
                    }
                }
            }
            acc
        };
        #[cfg(feature = "rayon")]
        {
            use rayon::prelude::*;
            partials
                .par_iter_mut()
                .enumerate()
                .for_each(|(b, p)| *p = block(b));
        }
        #[cfg(not(feature = "rayon"))]
        for (b, p) in partials.iter_mut().enumerate() {
            *p = block(b);
        }
    }

    fn reconstruct(&self, coeffs: &[T], basis: &[T], dim: usize, out: &mut [T]) {
        let n = out.len();
        debug_assert!(coeffs.len() >= dim);
        debug_assert!(basis.len() >= dim * n);
        #[cfg(feature = "rayon")]
        {
            use rayon::prelude::*;
            out.par_iter_mut().enumerate().for_each(|(i, o)| {
                let mut acc = *o;
                for m in 0..dim {
                    acc = acc + coeffs[m] * basis[m * n + i];
                }
                *o = acc;
            });
        }
        #[cfg(not(feature = "rayon"))]
        for (i, o) in out.iter_mut().enumerate() {
            let mut acc = *o;
            for m in 0..dim {
                acc = acc + coeffs[m] * basis[m * n + i];
            }
            *o = acc;
        }
    }
}

/// Reduce a partial-sum vector sequentially. Deterministic for a fixed
/// vector length regardless of thread count.
pub fn reduce_partials<T: Float>(partials: &[T]) -> T {
    partials.iter().fold(T::zero(), |acc, &p| acc + p)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn scaled_add_axpby() {
        let k = CpuKernels;
        let x = vec![1.0, 2.0, 3.0];
        let mut y = vec![10.0, 10.0, 10.0];
        k.scaled_add(2.0, &x, 0.5, &mut y);
        assert_eq!(y, vec![7.0, 9.0, 11.0]);
    }

    #[test]
    fn weighted_partials_reduce_to_dot() {
        let k = CpuKernels;
        let n = BLOCK_SIZE * 2 + 17;
        let x: Vec<f64> = (0..n).map(|i| (i % 7) as f64).collect();
        let y: Vec<f64> = (0..n).map(|i| 1.0 / (1.0 + i as f64)).collect();
        let w: Vec<f64> = (0..n).map(|i| if i % 2 == 0 { 1.0 } else { 0.5 }).collect();
        let mut partials = vec![0.0; n_blocks(n)];
        k.inner_product_partials(Some(&w), &x, &y, &mut partials);
        let got = reduce_partials(&partials);
        let want: f64 = (0..n).map(|i| w[i] * x[i] * y[i]).sum();
        assert_relative_eq!(got, want, max_relative = 1e-14);
    }

    #[test]
    fn gather_scatter_roundtrip_subset() {
        let k = CpuKernels;
        let x = vec![0.0, 10.0, 20.0, 30.0];
        let idx = [3, 1];
        let mut picked = vec![0.0; 2];
        k.gather(&idx, &x, &mut picked);
        assert_eq!(picked, vec![30.0, 10.0]);
        let mut y = vec![0.0; 4];
        k.scatter(&idx, &picked, &mut y);
        assert_eq!(y, vec![0.0, 10.0, 0.0, 30.0]);
    }

    #[test]
    fn reconstruct_accumulates_basis_combination() {
        let k = CpuKernels;
        let basis = vec![1.0, 0.0, 0.0, 1.0]; // two basis vectors of length 2
        let coeffs = [3.0, -2.0];
        let mut out = vec![1.0, 1.0];
        k.reconstruct(&coeffs, &basis, 2, &mut out);
        assert_eq!(out, vec![4.0, -1.0]);
    }
}
