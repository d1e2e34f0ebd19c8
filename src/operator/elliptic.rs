//! Matrix-free screened Poisson operator on quadrilateral spectral
//! elements.
//!
//! The discretization is collocation on Gauss-Lobatto-Legendre (GLL)
//! nodes, so mass and quadrature share the nodal points and the element
//! apply reduces to 1D stencils along each tensor direction. Two forms
//! are supported:
//!
//! * continuous (C0): duplicated nodal storage made consistent by
//!   gather-scatter; Dirichlet conditions are imposed by masking, and
//!   the apply overlaps the neighbor reduction with the interior
//!   element sweep;
//! * interior penalty (IPDG): element-local storage with SIPG face
//!   fluxes; neighbor traces arrive through the halo exchange, which
//!   overlaps the volume sweep.

use std::sync::Arc;

use crate::config::Discretization;
use crate::error::PsError;
use crate::kernels::{CpuKernels, KernelSet};
use crate::mesh::{
    FaceNeighbor, GatherScatter, GsOp, HaloExchanger, Mesh, QuadGeom, quad_face_nodes,
};
use crate::operator::{BcType, PdeOperator, Physics};
use crate::parallel::Comm;

/// Uniform shift applied to remove the null space of the pure-Neumann,
/// unshifted operator.
const NULL_SPACE_PENALTY: f64 = 1.0;

/// GLL nodes and quadrature weights on `[-1, 1]` for `n1` points.
pub fn gll_nodes_weights(n1: usize) -> (Vec<f64>, Vec<f64>) {
    let n = n1 - 1;
    let mut nodes = vec![0.0; n1];
    nodes[0] = -1.0;
    nodes[n] = 1.0;
    // Interior nodes are the roots of P_n'; Newton from Chebyshev guesses.
    for k in 1..n {
        let mut x = -(std::f64::consts::PI * k as f64 / n as f64).cos();
        for _ in 0..64 {
            let (p, dp) = legendre(n, x);
            // P'' from the Legendre ODE.
            let step = dp * (1.0 - x * x) / (2.0 * x * dp - (n * (n + 1)) as f64 * p);
            x -= step;
            if step.abs() < 1e-15 {
                break;
            }
        }
        nodes[k] = x;
    }
    let scale = 2.0 / (n * (n + 1)) as f64;
    let weights = nodes
        .iter()
        .map(|&x| {
            let (p, _) = legendre(n, x);
            scale / (p * p)
        })
        .collect();
    (nodes, weights)
}

/// `(P_n(x), P_n'(x))` by forward recurrence; `x` strictly inside
/// `(-1, 1)` for the derivative.
fn legendre(n: usize, x: f64) -> (f64, f64) {
    if n == 0 {
        return (1.0, 0.0);
    }
    let mut pm = 1.0;
    let mut p = x;
    for k in 2..=n {
        let kf = k as f64;
        let next = ((2.0 * kf - 1.0) * x * p - (kf - 1.0) * pm) / kf;
        pm = p;
        p = next;
    }
    let dp = n as f64 * (x * p - pm) / (x * x - 1.0);
    (p, dp)
}

/// Nodal differentiation matrix, `d[m * n1 + k] = l_k'(x_m)`.
pub fn diff_matrix(nodes: &[f64]) -> Vec<f64> {
    let n1 = nodes.len();
    let n = n1 - 1;
    let pn: Vec<f64> = nodes.iter().map(|&x| legendre_value(n, x)).collect();
    let mut d = vec![0.0; n1 * n1];
    for m in 0..n1 {
        for k in 0..n1 {
            if m != k {
                d[m * n1 + k] = pn[m] / (pn[k] * (nodes[m] - nodes[k]));
            }
        }
    }
    let corner = (n * (n + 1)) as f64 / 4.0;
    d[0] = -corner;
    d[n1 * n1 - 1] = corner;
    d
}

fn legendre_value(n: usize, x: f64) -> f64 {
    if n == 0 {
        return 1.0;
    }
    let mut pm = 1.0;
    let mut p = x;
    for k in 2..=n {
        let kf = k as f64;
        let next = ((2.0 * kf - 1.0) * x * p - (kf - 1.0) * pm) / kf;
        pm = p;
        p = next;
    }
    p
}

/// Reference-element basis data shared by both discretizations.
#[derive(Debug, Clone)]
struct Basis {
    n1: usize,
    np: usize,
    nodes: Vec<f64>,
    w: Vec<f64>,
    /// Differentiation matrix, `n1 * n1`.
    d: Vec<f64>,
    /// 1D weak Laplacian `s[i][k] = sum_m w_m d[m][i] d[m][k]`.
    s: Vec<f64>,
    face_nodes: [Vec<usize>; 4],
}

impl Basis {
    fn setup(degree: usize) -> Basis {
        let n1 = degree + 1;
        let (nodes, w) = gll_nodes_weights(n1);
        let d = diff_matrix(&nodes);
        let mut s = vec![0.0; n1 * n1];
        for i in 0..n1 {
            for k in 0..n1 {
                let mut acc = 0.0;
                for m in 0..n1 {
                    acc += w[m] * d[m * n1 + i] * d[m * n1 + k];
                }
                s[i * n1 + k] = acc;
            }
        }
        Basis {
            n1,
            np: n1 * n1,
            nodes,
            w,
            d,
            s,
            face_nodes: quad_face_nodes(degree),
        }
    }

    /// Element volume apply: `ax = lambda M u + K u` in weak form.
    fn element_ax(&self, lambda: f64, geom: QuadGeom, u: &[f64], ax: &mut [f64]) {
        let n1 = self.n1;
        let jac = geom.jacobian();
        let gx = geom.hy / geom.hx;
        let gy = geom.hx / geom.hy;
        for j in 0..n1 {
            for i in 0..n1 {
                let mut val = lambda * jac * self.w[i] * self.w[j] * u[j * n1 + i];
                let mut sx = 0.0;
                for k in 0..n1 {
                    sx += self.s[i * n1 + k] * u[j * n1 + k];
                }
                val += gx * self.w[j] * sx;
                let mut sy = 0.0;
                for k in 0..n1 {
                    sy += self.s[j * n1 + k] * u[k * n1 + i];
                }
                val += gy * self.w[i] * sy;
                ax[j * n1 + i] = val;
            }
        }
    }

    /// Physical-space gradient at the nodes of one element.
    fn element_grad(&self, geom: QuadGeom, u: &[f64], qx: &mut [f64], qy: &mut [f64]) {
        let n1 = self.n1;
        let rx = 2.0 / geom.hx;
        let ry = 2.0 / geom.hy;
        for j in 0..n1 {
            for i in 0..n1 {
                let mut dx = 0.0;
                let mut dy = 0.0;
                for k in 0..n1 {
                    dx += self.d[i * n1 + k] * u[j * n1 + k];
                    dy += self.d[j * n1 + k] * u[k * n1 + i];
                }
                qx[j * n1 + i] = rx * dx;
                qy[j * n1 + i] = ry * dy;
            }
        }
    }

    /// Normal axis (0 = x, 1 = y) and outward sign of a quad face.
    fn face_axis(f: usize) -> (usize, f64) {
        match f {
            0 => (1, -1.0),
            1 => (0, 1.0),
            2 => (1, 1.0),
            3 => (0, -1.0),
            _ => unreachable!(),
        }
    }
}

/// Discretization-specific state.
enum Discretized {
    Continuous {
        gs: GatherScatter,
        /// Dirichlet node mask, consistent across duplicates.
        mask: Vec<bool>,
        inv_degree: Vec<f64>,
        /// Elements touching a node shared with another rank.
        boundary_elems: Vec<usize>,
        interior_elems: Vec<usize>,
        /// Masked copy of the input vector.
        xm: Vec<f64>,
    },
    Ipdg {
        halo: HaloExchanger,
        /// Geometry for local elements and ghost slots.
        geo_ext: Vec<QuadGeom>,
        /// Field, extended over ghost slots.
        q: Vec<f64>,
        qx: Vec<f64>,
        qy: Vec<f64>,
        send: Vec<f64>,
    },
}

/// Matrix-free screened Poisson operator `-div(grad u) + lambda u`.
pub struct EllipticOperator<C: Comm> {
    comm: Arc<C>,
    mesh: Mesh,
    basis: Basis,
    lambda: f64,
    /// Boundary condition per face; `None` on interior faces.
    bc: Vec<Option<BcType>>,
    all_neumann: bool,
    state: Discretized,
}

impl<C: Comm> EllipticOperator<C> {
    pub fn setup<P: Physics>(
        mesh: Mesh,
        physics: &P,
        lambda: f64,
        disc: Discretization,
        comm: Arc<C>,
    ) -> Result<Self, PsError> {
        if mesh.dim != 2 || mesh.n_verts() != 4 {
            return Err(PsError::Unsupported(
                "the elliptic operator is built for 2D quadrilateral meshes",
            ));
        }
        let basis = Basis::setup(mesh.degree);
        let n = mesh.nelements * basis.np;

        let bc: Vec<Option<BcType>> = mesh
            .boundary_tags()
            .iter()
            .map(|t| t.map(|tag| physics.bc_type(tag)))
            .collect();
        let local_dirichlet = bc.iter().flatten().any(|&b| b == BcType::Dirichlet);
        let global_dirichlet =
            comm.all_reduce_sum(if local_dirichlet { 1.0 } else { 0.0 }) > 0.0;
        let all_neumann = !global_dirichlet && lambda == 0.0;
        if all_neumann {
            log::debug!("pure Neumann operator: null-space shift enabled");
        }

        let state = match disc {
            Discretization::Continuous => {
                let gs = GatherScatter::setup(&mesh.node_ids, &*comm);
                let inv_degree = gs.inverse_degree(&*comm)?;

                // Dirichlet mask, then Max over duplicates so a shared
                // node masked on any rank is masked on all of them.
                let mut maskf = vec![0.0; n];
                for e in 0..mesh.nelements {
                    for f in 0..mesh.n_faces() {
                        if bc[e * mesh.n_faces() + f] == Some(BcType::Dirichlet) {
                            for &node in &basis.face_nodes[f] {
                                maskf[e * basis.np + node] = 1.0;
                            }
                        }
                    }
                }
                gs.apply(GsOp::Max, &mut maskf, &*comm)?;
                let mask: Vec<bool> = maskf.iter().map(|&v| v > 0.5).collect();

                // Elements owning a shared node are swept first so the
                // neighbor reduction can start early.
                let halo_nodes = gs.halo_node_mask();
                let mut boundary_elems = Vec::new();
                let mut interior_elems = Vec::new();
                for e in 0..mesh.nelements {
                    let touches = halo_nodes[e * basis.np..(e + 1) * basis.np]
                        .iter()
                        .any(|&m| m);
                    if touches {
                        boundary_elems.push(e);
                    } else {
                        interior_elems.push(e);
                    }
                }
                Discretized::Continuous {
                    gs,
                    mask,
                    inv_degree,
                    boundary_elems,
                    interior_elems,
                    xm: vec![0.0; n],
                }
            }
            Discretization::Ipdg => {
                let halo = HaloExchanger::setup(&mesh, &*comm)?;
                let total = halo.total_slots();

                // Ghost slots need the neighbor's element geometry for
                // trace gradients; one setup-time exchange fills it.
                let mut geo_ext = mesh.geo.clone();
                geo_ext.resize(total, QuadGeom { hx: 0.0, hy: 0.0 });
                let flat: Vec<f64> = mesh.geo.iter().flat_map(|g| [g.hx, g.hy]).collect();
                let mut send2 = vec![0.0; halo.buffer_len(2)];
                let mut recv2 = vec![0.0; halo.buffer_len(2)];
                halo.exchange(&*comm, &flat, 2, &mut send2, &mut recv2)?;
                for k in 0..halo.total_halo_pairs {
                    geo_ext[mesh.nelements + k] = QuadGeom {
                        hx: recv2[2 * k],
                        hy: recv2[2 * k + 1],
                    };
                }

                Discretized::Ipdg {
                    halo,
                    geo_ext,
                    q: vec![0.0; total * basis.np],
                    qx: vec![0.0; total * basis.np],
                    qy: vec![0.0; total * basis.np],
                    send: vec![0.0; mesh.nelements.max(1) * basis.np * 4],
                }
            }
        };

        Ok(EllipticOperator {
            comm,
            mesh,
            basis,
            lambda,
            bc,
            all_neumann,
            state,
        })
    }

    /// Physical coordinates of node `(i, j)` of element `e`.
    fn node_coords(&self, e: usize, i: usize, j: usize) -> (f64, f64) {
        let nv = self.mesh.n_verts();
        let x0 = self.mesh.coords[e * nv * 2];
        let y0 = self.mesh.coords[e * nv * 2 + 1];
        let geom = self.mesh.geo[e];
        (
            x0 + 0.5 * geom.hx * (self.basis.nodes[i] + 1.0),
            y0 + 0.5 * geom.hy * (self.basis.nodes[j] + 1.0),
        )
    }

    /// Nodal interpolant of `f(x, y)`.
    pub fn interpolate(&self, f: impl Fn(f64, f64) -> f64) -> Vec<f64> {
        let n1 = self.basis.n1;
        let mut out = vec![0.0; self.len()];
        for e in 0..self.mesh.nelements {
            for j in 0..n1 {
                for i in 0..n1 {
                    let (x, y) = self.node_coords(e, i, j);
                    out[e * self.basis.np + j * n1 + i] = f(x, y);
                }
            }
        }
        out
    }

    /// Weighted right-hand side for the given physics: quadrature of the
    /// forcing, assembled across duplicates for the continuous form, with
    /// Dirichlet rows replaced by the prescribed boundary values.
    pub fn assemble_rhs<P: Physics>(&self, physics: &P) -> Result<Vec<f64>, PsError> {
        let n1 = self.basis.n1;
        let np = self.basis.np;
        let mut b = vec![0.0; self.len()];
        for e in 0..self.mesh.nelements {
            let jac = self.mesh.geo[e].jacobian();
            for j in 0..n1 {
                for i in 0..n1 {
                    let (x, y) = self.node_coords(e, i, j);
                    b[e * np + j * n1 + i] =
                        jac * self.basis.w[i] * self.basis.w[j] * physics.forcing(x, y);
                }
            }
        }
        if let Discretized::Continuous { gs, mask, .. } = &self.state {
            gs.apply(GsOp::Sum, &mut b, &*self.comm)?;
            for (i, &m) in mask.iter().enumerate() {
                if m {
                    b[i] = 0.0;
                }
            }
            // Prescribed values on Dirichlet faces; the masked rows of
            // the operator are identity rows.
            for e in 0..self.mesh.nelements {
                for f in 0..self.mesh.n_faces() {
                    let slot = e * self.mesh.n_faces() + f;
                    if self.bc[slot] == Some(BcType::Dirichlet) {
                        let tag = match self.mesh.neighbors[slot] {
                            crate::mesh::Neighbor::Boundary(tag) => tag,
                            _ => continue,
                        };
                        for &node in &self.basis.face_nodes[f] {
                            let idx = e * np + node;
                            let (x, y) = self.node_coords(e, node % n1, node / n1);
                            b[idx] = physics.boundary_state(tag, x, y);
                        }
                    }
                }
            }
        }
        Ok(b)
    }

    /// Inner-product weights making rank-local dots globally consistent:
    /// the reciprocal node multiplicity for the continuous form, ones for
    /// the duplicate-free IPDG form.
    pub fn dot_weights(&self) -> Vec<f64> {
        match &self.state {
            Discretized::Continuous { inv_degree, .. } => inv_degree.clone(),
            Discretized::Ipdg { .. } => vec![1.0; self.len()],
        }
    }

    /// Dirichlet node mask (continuous form only).
    pub fn dirichlet_mask(&self) -> Option<&[bool]> {
        match &self.state {
            Discretized::Continuous { mask, .. } => Some(mask),
            Discretized::Ipdg { .. } => None,
        }
    }

    /// Assembled operator diagonal, for Jacobi preconditioning. The IPDG
    /// diagonal keeps the volume and penalty terms, which dominate.
    pub fn diagonal(&self) -> Result<Vec<f64>, PsError> {
        let n1 = self.basis.n1;
        let np = self.basis.np;
        let w = &self.basis.w;
        let s = &self.basis.s;
        let mut diag = vec![0.0; self.len()];
        for e in 0..self.mesh.nelements {
            let geom = self.mesh.geo[e];
            let jac = geom.jacobian();
            let gx = geom.hy / geom.hx;
            let gy = geom.hx / geom.hy;
            for j in 0..n1 {
                for i in 0..n1 {
                    diag[e * np + j * n1 + i] = self.lambda * jac * w[i] * w[j]
                        + gx * w[j] * s[i * n1 + i]
                        + gy * w[i] * s[j * n1 + j];
                }
            }
        }
        match &self.state {
            Discretized::Continuous { gs, mask, .. } => {
                gs.apply(GsOp::Sum, &mut diag, &*self.comm)?;
                for (i, &m) in mask.iter().enumerate() {
                    if m {
                        diag[i] = 1.0;
                    }
                }
            }
            Discretized::Ipdg { .. } => {
                for e in 0..self.mesh.nelements {
                    let geom = self.mesh.geo[e];
                    for f in 0..self.mesh.n_faces() {
                        let (axis, _) = Basis::face_axis(f);
                        let (h_n, h_t) = if axis == 0 {
                            (geom.hx, geom.hy)
                        } else {
                            (geom.hy, geom.hx)
                        };
                        let tau = 2.0 * (n1 * n1) as f64 / h_n;
                        let bc_scale = match self.bc[e * self.mesh.n_faces() + f] {
                            Some(BcType::Dirichlet) => 2.0,
                            Some(BcType::Neumann) => 0.0,
                            None => 1.0,
                        };
                        for (t, &node) in self.basis.face_nodes[f].iter().enumerate() {
                            diag[e * np + node] += 0.5 * h_t * w[t] * tau * bc_scale;
                        }
                    }
                }
            }
        }
        Ok(diag)
    }

    fn apply_continuous(&mut self, x: &[f64], ax: &mut [f64]) -> Result<(), PsError> {
        let basis = &self.basis;
        let mesh = &self.mesh;
        let lambda = self.lambda;
        let comm = &*self.comm;
        let np = basis.np;
        let Discretized::Continuous {
            gs,
            mask,
            inv_degree,
            boundary_elems,
            interior_elems,
            xm,
        } = &mut self.state
        else {
            unreachable!()
        };

        xm.copy_from_slice(x);
        for (i, &m) in mask.iter().enumerate() {
            if m {
                xm[i] = 0.0;
            }
        }

        // Partition-boundary elements first so their assembly messages
        // travel while the interior sweep runs.
        for &e in boundary_elems.iter() {
            basis.element_ax(lambda, mesh.geo[e], &xm[e * np..(e + 1) * np], &mut ax
                [e * np..(e + 1) * np]);
        }
        let exchange = gs.start(GsOp::Sum, ax, comm)?;
        for &e in interior_elems.iter() {
            basis.element_ax(lambda, mesh.geo[e], &xm[e * np..(e + 1) * np], &mut ax
                [e * np..(e + 1) * np]);
        }
        gs.apply_local(GsOp::Sum, ax);
        gs.finish(exchange, GsOp::Sum, ax)?;

        for (i, &m) in mask.iter().enumerate() {
            if m {
                ax[i] = x[i];
            }
        }

        if self.all_neumann {
            let local: f64 = inv_degree.iter().zip(x).map(|(&w, &v)| w * v).sum();
            let shift = NULL_SPACE_PENALTY * comm.all_reduce_sum(local);
            for v in ax.iter_mut() {
                *v += shift;
            }
        }
        Ok(())
    }

    fn apply_ipdg(&mut self, x: &[f64], ax: &mut [f64]) -> Result<(), PsError> {
        let basis = &self.basis;
        let mesh = &self.mesh;
        let lambda = self.lambda;
        let comm = &*self.comm;
        let np = basis.np;
        let n1 = basis.n1;
        let nloc = mesh.nelements * np;
        let Discretized::Ipdg {
            halo,
            geo_ext,
            q,
            qx,
            qy,
            send,
        } = &mut self.state
        else {
            unreachable!()
        };

        q[..nloc].copy_from_slice(x);
        halo.extract(x, np, send);
        let inflight = halo.start(comm, np, send, &q[nloc..])?;

        // Volume sweep overlaps the trace exchange.
        for e in 0..mesh.nelements {
            let geom = geo_ext[e];
            basis.element_grad(
                geom,
                &q[e * np..(e + 1) * np],
                &mut qx[e * np..(e + 1) * np],
                &mut qy[e * np..(e + 1) * np],
            );
            basis.element_ax(lambda, geom, &q[e * np..(e + 1) * np], &mut ax
                [e * np..(e + 1) * np]);
        }

        {
            let (_, ghost) = q.split_at_mut(nloc);
            halo.finish(inflight, ghost)?;
        }
        for k in 0..halo.total_halo_pairs {
            let slot = mesh.nelements + k;
            basis.element_grad(
                geo_ext[slot],
                &q[slot * np..(slot + 1) * np],
                &mut qx[slot * np..(slot + 1) * np],
                &mut qy[slot * np..(slot + 1) * np],
            );
        }

        // SIPG face fluxes. Conforming axis-aligned faces pair nodes by
        // their shared tangential ordinate.
        for e in 0..mesh.nelements {
            let geom = geo_ext[e];
            for f in 0..mesh.n_faces() {
                let (axis, sign) = Basis::face_axis(f);
                let (h_n, h_t) = if axis == 0 {
                    (geom.hx, geom.hy)
                } else {
                    (geom.hy, geom.hx)
                };
                let tau = 2.0 * (n1 * n1) as f64 / h_n;
                let row = if sign > 0.0 { n1 - 1 } else { 0 };
                let neighbor = halo.face_neighbor[e * mesh.n_faces() + f];
                for t in 0..n1 {
                    let m = e * np + basis.face_nodes[f][t];
                    let um = q[m];
                    let dudn_m = sign * if axis == 0 { qx[m] } else { qy[m] };
                    let (up, dudn_p) = match neighbor {
                        FaceNeighbor::Elem { slot, face } => {
                            let p = slot * np + basis.face_nodes[face][t];
                            (q[p], sign * if axis == 0 { qx[p] } else { qy[p] })
                        }
                        FaceNeighbor::Boundary(_) => {
                            match self.bc[e * mesh.n_faces() + f] {
                                Some(BcType::Neumann) => (um, -dudn_m),
                                // Mirror trace for Dirichlet faces.
                                _ => (-um, dudn_m),
                            }
                        }
                    };
                    let jump = um - up;
                    let avg = 0.5 * (dudn_m + dudn_p);
                    let sw = 0.5 * h_t * basis.w[t];
                    ax[m] += sw * (tau * jump - avg);
                    // Symmetry term, distributed along the normal line.
                    let coeff = sw * 0.5 * jump * sign * 2.0 / h_n;
                    for k in 0..n1 {
                        let node = if axis == 0 { t * n1 + k } else { k * n1 + t };
                        ax[e * np + node] -= coeff * basis.d[row * n1 + k];
                    }
                }
            }
        }

        if self.all_neumann {
            let local: f64 = x.iter().sum();
            let shift = NULL_SPACE_PENALTY * comm.all_reduce_sum(local);
            for v in ax.iter_mut() {
                *v += shift;
            }
        }
        Ok(())
    }

    /// Globally consistent weighted inner product over this operator's
    /// vector layout.
    pub fn global_dot(&self, x: &[f64], y: &[f64]) -> f64 {
        let kernels = CpuKernels;
        let mut partials = vec![0.0; crate::kernels::n_blocks(x.len())];
        let weights = self.dot_weights();
        kernels.inner_product_partials(Some(&weights), x, y, &mut partials);
        self.comm
            .all_reduce_sum(crate::kernels::reduce_partials(&partials))
    }
}

impl<C: Comm> PdeOperator for EllipticOperator<C> {
    fn apply(&mut self, x: &[f64], ax: &mut [f64]) -> Result<(), PsError> {
        if x.len() != self.len() || ax.len() != self.len() {
            return Err(PsError::SizeMismatch {
                expected: self.len(),
                got: x.len().min(ax.len()),
            });
        }
        match self.state {
            Discretized::Continuous { .. } => self.apply_continuous(x, ax),
            Discretized::Ipdg { .. } => self.apply_ipdg(x, ax),
        }
    }

    fn len(&self) -> usize {
        self.mesh.nelements * self.basis.np
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::SineSolution;
    use crate::parallel::SerialComm;
    use approx::assert_relative_eq;

    fn serial_operator(
        nx: usize,
        degree: usize,
        lambda: f64,
        disc: Discretization,
    ) -> EllipticOperator<SerialComm> {
        let mut mesh = Mesh::box_2d(&SerialComm, nx, nx, degree);
        crate::mesh::connect(&mut mesh, &SerialComm).unwrap();
        EllipticOperator::setup(
            mesh,
            &SineSolution::new(lambda),
            lambda,
            disc,
            Arc::new(SerialComm),
        )
        .unwrap()
    }

    #[test]
    fn gll_low_order_nodes_and_weights() {
        let (x2, w2) = gll_nodes_weights(2);
        assert_eq!(x2, vec![-1.0, 1.0]);
        assert_eq!(w2, vec![1.0, 1.0]);

        let (x3, w3) = gll_nodes_weights(3);
        assert_relative_eq!(x3[1], 0.0, epsilon = 1e-14);
        assert_relative_eq!(w3[0], 1.0 / 3.0, max_relative = 1e-13);
        assert_relative_eq!(w3[1], 4.0 / 3.0, max_relative = 1e-13);
    }

    #[test]
    fn gll_quadrature_is_exact_for_polynomials() {
        // Degree-n1 GLL rule integrates x^k exactly for k <= 2*n1 - 3.
        let (x, w) = gll_nodes_weights(5);
        for k in 0..=7usize {
            let got: f64 = x.iter().zip(&w).map(|(&xi, &wi)| wi * xi.powi(k as i32)).sum();
            let want = if k % 2 == 0 { 2.0 / (k as f64 + 1.0) } else { 0.0 };
            assert_relative_eq!(got, want, epsilon = 1e-12);
        }
    }

    #[test]
    fn diff_matrix_kills_constants_and_differentiates_x() {
        let (x, _) = gll_nodes_weights(4);
        let d = diff_matrix(&x);
        for m in 0..4 {
            let row_sum: f64 = (0..4).map(|k| d[m * 4 + k]).sum();
            assert_relative_eq!(row_sum, 0.0, epsilon = 1e-12);
            let dx: f64 = (0..4).map(|k| d[m * 4 + k] * x[k]).sum();
            assert_relative_eq!(dx, 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn continuous_operator_is_symmetric() {
        let mut op = serial_operator(3, 3, 0.7, Discretization::Continuous);
        let n = op.len();
        let u = op.interpolate(|x, y| (x * 2.1).sin() * (y + 0.3).cos());
        let v = op.interpolate(|x, y| x * x + 0.5 * y);
        let mut au = vec![0.0; n];
        let mut av = vec![0.0; n];
        op.apply(&u, &mut au).unwrap();
        op.apply(&v, &mut av).unwrap();
        let uav = op.global_dot(&u, &av);
        let vau = op.global_dot(&v, &au);
        assert_relative_eq!(uav, vau, max_relative = 1e-10);
    }

    #[test]
    fn ipdg_operator_is_symmetric() {
        let mut op = serial_operator(3, 2, 0.0, Discretization::Ipdg);
        let n = op.len();
        let u = op.interpolate(|x, y| (3.0 * x).sin() + y * y);
        let v = op.interpolate(|x, y| x * y + 1.0);
        let mut au = vec![0.0; n];
        let mut av = vec![0.0; n];
        op.apply(&u, &mut au).unwrap();
        op.apply(&v, &mut av).unwrap();
        assert_relative_eq!(op.global_dot(&u, &av), op.global_dot(&v, &au), max_relative = 1e-9);
    }

    #[test]
    fn operator_apply_is_linear() {
        for disc in [Discretization::Continuous, Discretization::Ipdg] {
            let mut op = serial_operator(3, 3, 0.4, disc);
            let n = op.len();
            let u = op.interpolate(|x, y| (x * 1.7).sin() + y);
            let v = op.interpolate(|x, y| x * y - 0.25 * y * y);
            let sum: Vec<f64> = u.iter().zip(&v).map(|(a, b)| a + b).collect();
            let mut au = vec![0.0; n];
            let mut av = vec![0.0; n];
            let mut asum = vec![0.0; n];
            op.apply(&u, &mut au).unwrap();
            op.apply(&v, &mut av).unwrap();
            op.apply(&sum, &mut asum).unwrap();
            for i in 0..n {
                assert_relative_eq!(asum[i], au[i] + av[i], epsilon = 1e-9, max_relative = 1e-9);
            }
        }
    }

    #[test]
    fn continuous_operator_is_positive_on_nonzero_fields() {
        let mut op = serial_operator(2, 2, 0.1, Discretization::Continuous);
        let u = op.interpolate(|x, y| x * (1.0 - x) * y);
        let mut au = vec![0.0; op.len()];
        op.apply(&u, &mut au).unwrap();
        assert!(op.global_dot(&u, &au) > 0.0);
    }

    #[test]
    fn dirichlet_rows_are_identity() {
        let mut op = serial_operator(2, 2, 0.0, Discretization::Continuous);
        let mask = op.dirichlet_mask().unwrap().to_vec();
        assert!(mask.iter().any(|&m| m));
        let u = op.interpolate(|x, y| x + y);
        let mut au = vec![0.0; op.len()];
        op.apply(&u, &mut au).unwrap();
        for (i, &m) in mask.iter().enumerate() {
            if m {
                assert_eq!(au[i], u[i]);
            }
        }
    }

    #[test]
    fn diagonal_is_positive() {
        for disc in [Discretization::Continuous, Discretization::Ipdg] {
            let op = serial_operator(2, 3, 0.0, disc);
            let diag = op.diagonal().unwrap();
            assert!(diag.iter().all(|&d| d > 0.0));
        }
    }
}
