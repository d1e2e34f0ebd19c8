//! Distributed mesh data model.
//!
//! A [`Mesh`] holds the rank-local slice of a global element set:
//! element-vertex incidence (global vertex ids), per-element vertex
//! coordinates, face adjacency, and, for continuous discretizations, a
//! global node numbering. Elements are distributed in contiguous
//! global-id ranges ("file order"); [`partition`] rebalances the ranges
//! and [`connect`] resolves face adjacency within and across ranks.
//!
//! Adjacency uses tagged variants instead of sentinel values: a face
//! neighbor is [`Neighbor::Local`], [`Neighbor::Remote`], or
//! [`Neighbor::Boundary`].

pub mod connect;
pub mod gather_scatter;
pub mod halo;
pub mod partition;

pub use connect::connect;
pub use gather_scatter::{GatherScatter, GsOp};
pub use halo::{FaceNeighbor, GlobalId, HaloExchanger};
pub use partition::{balanced_ranges, repartition, weighted_ranges};

use crate::config::{ElementType, Settings};
use crate::error::PsError;
use crate::parallel::Comm;

/// Physical boundary tag carried by unmatched faces. The meaning of a
/// tag (Dirichlet, Neumann, ...) is assigned by the physics layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoundaryTag(pub u32);

impl BoundaryTag {
    /// Tag assigned by the connectivity builder to unmatched faces.
    pub const WALL: BoundaryTag = BoundaryTag(1);
}

/// Resolved neighbor of one element face.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Neighbor {
    /// Neighbor element on this rank.
    Local { elem: usize, face: usize },
    /// Neighbor element on another rank, identified by its local index there.
    Remote { rank: usize, elem: usize, face: usize },
    /// Physical boundary face.
    Boundary(BoundaryTag),
}

/// Axis-aligned quadrilateral geometric factors.
#[derive(Debug, Clone, Copy)]
pub struct QuadGeom {
    pub hx: f64,
    pub hy: f64,
}

impl QuadGeom {
    pub fn jacobian(&self) -> f64 {
        0.25 * self.hx * self.hy
    }
}

/// Rank-local slice of a distributed mesh.
#[derive(Debug, Clone)]
pub struct Mesh {
    pub elem_type: ElementType,
    pub dim: usize,
    /// Polynomial degree of the nodal basis.
    pub degree: usize,
    /// Nodes per element.
    pub np: usize,
    /// Local element count.
    pub nelements: usize,
    pub rank: usize,
    /// Prefix sums of per-rank element counts; `rank_offsets[rank]` is
    /// the global id of this rank's first element. Length `size + 1`.
    pub rank_offsets: Vec<u64>,
    /// Global vertex ids, `nelements * n_verts`.
    pub etov: Vec<u64>,
    /// Vertex coordinates, `nelements * n_verts * dim`, interleaved.
    pub coords: Vec<f64>,
    /// Face adjacency, `nelements * n_faces`. Valid after [`connect`].
    pub neighbors: Vec<Neighbor>,
    /// Global C0 node ids, `nelements * np`.
    pub node_ids: Vec<u64>,
    /// Per-element geometric factors (quadrilateral meshes).
    pub geo: Vec<QuadGeom>,
}

/// Nodes per element for a nodal basis of the given degree.
pub fn nodes_per_element(elem_type: ElementType, degree: usize) -> usize {
    let n = degree;
    match elem_type {
        ElementType::Tri => (n + 1) * (n + 2) / 2,
        ElementType::Quad => (n + 1) * (n + 1),
        ElementType::Tet => (n + 1) * (n + 2) * (n + 3) / 6,
        ElementType::Hex => (n + 1) * (n + 1) * (n + 1),
    }
}

/// Local node indices of each quadrilateral face, ordered by increasing
/// tangential coordinate. Nodes are numbered row-major with `i` (the x
/// direction) fastest.
pub fn quad_face_nodes(degree: usize) -> [Vec<usize>; 4] {
    let n1 = degree + 1;
    let mut faces = [vec![], vec![], vec![], vec![]];
    for i in 0..n1 {
        faces[0].push(i); // y = -1
        faces[1].push(i * n1 + (n1 - 1)); // x = +1
        faces[2].push((n1 - 1) * n1 + i); // y = +1
        faces[3].push(i * n1); // x = -1
    }
    faces
}

/// Face of the neighboring quadrilateral that coincides with face `f`
/// on a conforming axis-aligned mesh.
pub fn quad_opposite_face(f: usize) -> usize {
    match f {
        0 => 2,
        1 => 3,
        2 => 0,
        3 => 1,
        _ => unreachable!(),
    }
}

impl Mesh {
    pub fn size(&self) -> usize {
        self.rank_offsets.len() - 1
    }

    pub fn n_faces(&self) -> usize {
        self.elem_type.n_faces()
    }

    pub fn n_verts(&self) -> usize {
        self.elem_type.n_verts()
    }

    /// Global id of local element `e`.
    pub fn global_elem_id(&self, e: usize) -> u64 {
        self.rank_offsets[self.rank] + e as u64
    }

    /// Total element count across all ranks.
    pub fn global_nelements(&self) -> u64 {
        *self.rank_offsets.last().unwrap()
    }

    /// Mask of local nodes sitting on a physical boundary face.
    /// Requires resolved adjacency; quadrilateral meshes only.
    pub fn boundary_node_mask(&self) -> Vec<bool> {
        let face_nodes = quad_face_nodes(self.degree);
        let mut mask = vec![false; self.nelements * self.np];
        for e in 0..self.nelements {
            for f in 0..self.n_faces() {
                if let Neighbor::Boundary(_) = self.neighbors[e * self.n_faces() + f] {
                    for &n in &face_nodes[f] {
                        mask[e * self.np + n] = true;
                    }
                }
            }
        }
        mask
    }

    /// Per-face boundary tags, `nelements * n_faces`; `None` for
    /// interior faces.
    pub fn boundary_tags(&self) -> Vec<Option<BoundaryTag>> {
        self.neighbors
            .iter()
            .map(|n| match n {
                Neighbor::Boundary(tag) => Some(*tag),
                _ => None,
            })
            .collect()
    }

    /// Build the rank-local slice of a structured `nx * ny` quadrilateral
    /// box mesh of the unit square, elements in row-major global order.
    ///
    /// Global C0 node ids come from the structured fine grid
    /// `(nx*degree + 1) x (ny*degree + 1)`, so shared edge/vertex nodes
    /// receive identical ids on every rank that touches them.
    pub fn box_2d<C: Comm>(comm: &C, nx: usize, ny: usize, degree: usize) -> Mesh {
        let elem_type = ElementType::Quad;
        let size = comm.size();
        let rank = comm.rank();
        let rank_offsets = balanced_ranges((nx * ny) as u64, size);
        let first = rank_offsets[rank] as usize;
        let last = rank_offsets[rank + 1] as usize;
        let nelements = last - first;

        let np = nodes_per_element(elem_type, degree);
        let n1 = degree + 1;
        let nodes_x = nx * degree + 1;
        let dx = 1.0 / nx as f64;
        let dy = 1.0 / ny as f64;

        let mut etov = Vec::with_capacity(nelements * 4);
        let mut coords = Vec::with_capacity(nelements * 4 * 2);
        let mut node_ids = Vec::with_capacity(nelements * np);
        let mut geo = Vec::with_capacity(nelements);

        for ge in first..last {
            let ex = ge % nx;
            let ey = ge / nx;
            let (x0, y0) = (ex as f64 * dx, ey as f64 * dy);
            // Counterclockwise corners.
            let corner = |cx: usize, cy: usize| ((ey + cy) * (nx + 1) + ex + cx) as u64;
            etov.extend_from_slice(&[
                corner(0, 0),
                corner(1, 0),
                corner(1, 1),
                corner(0, 1),
            ]);
            coords.extend_from_slice(&[
                x0,
                y0,
                x0 + dx,
                y0,
                x0 + dx,
                y0 + dy,
                x0,
                y0 + dy,
            ]);
            for j in 0..n1 {
                for i in 0..n1 {
                    let gx = (ex * degree + i) as u64;
                    let gy = (ey * degree + j) as u64;
                    node_ids.push(gy * nodes_x as u64 + gx);
                }
            }
            geo.push(QuadGeom { hx: dx, hy: dy });
        }

        Mesh {
            elem_type,
            dim: 2,
            degree,
            np,
            nelements,
            rank,
            rank_offsets,
            etov,
            coords,
            neighbors: vec![Neighbor::Boundary(BoundaryTag::WALL); nelements * 4],
            node_ids,
            geo,
        }
    }

    /// Full setup pipeline driven by [`Settings`]: build the box mesh,
    /// resolve connectivity, and return the mesh ready for halo and
    /// gather-scatter setup.
    pub fn setup<C: Comm>(settings: &Settings, comm: &C) -> Result<Mesh, PsError> {
        let elem_type = settings.element_type()?;
        if elem_type != ElementType::Quad {
            return Err(PsError::Unsupported(
                "box mesh setup currently builds quadrilateral meshes only",
            ));
        }
        let dim: usize = settings.get_parsed_or("MESH DIMENSION", 2)?;
        if dim != 2 {
            return Err(PsError::Unsupported("box mesh setup is 2D"));
        }
        let degree: usize = settings.get_parsed("POLYNOMIAL DEGREE")?;
        let nx: usize = settings.get_parsed_or("BOX NX", 8)?;
        let ny: usize = settings.get_parsed_or("BOX NY", 8)?;

        let mut mesh = Mesh::box_2d(comm, nx, ny, degree);
        connect(&mut mesh, comm)?;
        log::debug!(
            "mesh setup: rank {}/{} holds {} of {} elements (degree {})",
            mesh.rank,
            mesh.size(),
            mesh.nelements,
            mesh.global_nelements(),
            degree,
        );
        Ok(mesh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parallel::SerialComm;

    #[test]
    fn box_mesh_counts() {
        let mesh = Mesh::box_2d(&SerialComm, 3, 2, 2);
        assert_eq!(mesh.nelements, 6);
        assert_eq!(mesh.np, 9);
        assert_eq!(mesh.etov.len(), 6 * 4);
        assert_eq!(mesh.node_ids.len(), 6 * 9);
        assert_eq!(mesh.global_nelements(), 6);
    }

    #[test]
    fn box_mesh_shared_nodes_have_shared_ids() {
        let mesh = Mesh::box_2d(&SerialComm, 2, 1, 1);
        // Elements 0 and 1 share the edge x = 0.5: right edge of elem 0,
        // left edge of elem 1.
        let e0 = &mesh.node_ids[0..4];
        let e1 = &mesh.node_ids[4..8];
        assert_eq!(e0[1], e1[0]);
        assert_eq!(e0[3], e1[2]);
    }

    #[test]
    fn quad_face_node_ordering_is_tangential() {
        let faces = quad_face_nodes(2);
        assert_eq!(faces[0], vec![0, 1, 2]);
        assert_eq!(faces[1], vec![2, 5, 8]);
        assert_eq!(faces[2], vec![6, 7, 8]);
        assert_eq!(faces[3], vec![0, 3, 6]);
    }

    #[test]
    fn connected_box_faces_pair_up_opposite() {
        let mut mesh = Mesh::box_2d(&SerialComm, 3, 3, 1);
        connect(&mut mesh, &SerialComm).unwrap();
        for e in 0..mesh.nelements {
            for f in 0..mesh.n_faces() {
                if let Neighbor::Local { elem, face } = mesh.neighbors[e * 4 + f] {
                    assert_eq!(face, quad_opposite_face(f));
                    assert_eq!(mesh.neighbors[elem * 4 + face], Neighbor::Local { elem: e, face: f });
                }
            }
        }
    }

    #[test]
    fn boundary_mask_flags_the_perimeter() {
        let mut mesh = Mesh::box_2d(&SerialComm, 2, 2, 2);
        connect(&mut mesh, &SerialComm).unwrap();
        let mask = mesh.boundary_node_mask();
        // Element 0 sits in the lower-left corner: its node (0,0) is on
        // the boundary, its node (2,2) (the box center) is not.
        assert!(mask[0]);
        assert!(!mask[8]);
        // Per element, a degree-2 quad with two boundary faces exposes 5
        // of its 9 nodes.
        let flagged = mask[0..9].iter().filter(|&&m| m).count();
        assert_eq!(flagged, 5);
    }
}
