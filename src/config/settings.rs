//! String-keyed solver and mesh settings.
//!
//! Mirrors the option surface of the setup pipeline: `ELEMENT TYPE`,
//! `MESH DIMENSION`, `POLYNOMIAL DEGREE`, `DISCRETIZATION`,
//! `LINEAR SOLVER`, `INITIAL GUESS STRATEGY`,
//! `INITIAL GUESS HISTORY SPACE DIMENSION`, `VERBOSE`, plus the box-mesh
//! extents `BOX NX` / `BOX NY`.

use crate::error::PsError;
use std::collections::HashMap;
use std::str::FromStr;

/// Supported element shapes. The numeric codes follow the conventional
/// encoding (3 = triangles, 4 = quadrilaterals, 6 = tetrahedra,
/// 12 = hexahedra).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementType {
    Tri,
    Quad,
    Tet,
    Hex,
}

impl ElementType {
    /// Vertices per element.
    pub fn n_verts(self) -> usize {
        match self {
            ElementType::Tri => 3,
            ElementType::Quad => 4,
            ElementType::Tet => 4,
            ElementType::Hex => 8,
        }
    }

    /// Faces per element.
    pub fn n_faces(self) -> usize {
        match self {
            ElementType::Tri => 3,
            ElementType::Quad => 4,
            ElementType::Tet => 4,
            ElementType::Hex => 6,
        }
    }

    /// Vertices per face.
    pub fn n_face_verts(self) -> usize {
        match self {
            ElementType::Tri => 2,
            ElementType::Quad => 2,
            ElementType::Tet => 3,
            ElementType::Hex => 4,
        }
    }

    /// Local vertex indices of each face, counterclockwise for 2D shapes.
    pub fn face_verts(self) -> &'static [&'static [usize]] {
        match self {
            ElementType::Tri => &[&[0, 1], &[1, 2], &[2, 0]],
            ElementType::Quad => &[&[0, 1], &[1, 2], &[2, 3], &[3, 0]],
            ElementType::Tet => &[&[0, 1, 2], &[0, 1, 3], &[1, 2, 3], &[0, 2, 3]],
            ElementType::Hex => &[
                &[0, 1, 2, 3],
                &[0, 1, 5, 4],
                &[1, 2, 6, 5],
                &[2, 3, 7, 6],
                &[3, 0, 4, 7],
                &[4, 5, 6, 7],
            ],
        }
    }

    pub fn dim(self) -> usize {
        match self {
            ElementType::Tri | ElementType::Quad => 2,
            ElementType::Tet | ElementType::Hex => 3,
        }
    }
}

/// Discretization family for the model operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discretization {
    /// Continuous (C0) spectral elements, assembled by gather-scatter.
    Continuous,
    /// Interior-penalty discontinuous Galerkin.
    Ipdg,
}

/// Krylov recurrence variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CgVariant {
    /// Unpreconditioned conjugate gradients.
    Cg,
    /// Preconditioned conjugate gradients.
    Pcg,
    /// Flexible PCG (beta from z.Ap, tolerates a varying preconditioner).
    FlexPcg,
}

/// Initial-guess strategy selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitialGuessKind {
    None,
    Zero,
    Classic,
}

/// String-keyed settings map, consumed at setup time only.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    map: HashMap<String, String>,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: &str, value: impl ToString) -> &mut Self {
        self.map.insert(key.to_string(), value.to_string());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(|s| s.as_str())
    }

    /// True if `key` is present and equals `value` (case-insensitive).
    pub fn compare(&self, key: &str, value: &str) -> bool {
        self.get(key).is_some_and(|v| v.eq_ignore_ascii_case(value))
    }

    /// Parse a required numeric setting.
    pub fn get_parsed<T: FromStr>(&self, key: &str) -> Result<T, PsError> {
        let raw = self
            .get(key)
            .ok_or_else(|| PsError::MissingSetting(key.to_string()))?;
        raw.parse().map_err(|_| PsError::InvalidSetting {
            key: key.to_string(),
            value: raw.to_string(),
        })
    }

    /// Parse an optional numeric setting, falling back to `default`.
    pub fn get_parsed_or<T: FromStr>(&self, key: &str, default: T) -> Result<T, PsError> {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => raw.parse().map_err(|_| PsError::InvalidSetting {
                key: key.to_string(),
                value: raw.to_string(),
            }),
        }
    }

    pub fn element_type(&self) -> Result<ElementType, PsError> {
        let key = "ELEMENT TYPE";
        let raw = self
            .get(key)
            .ok_or_else(|| PsError::MissingSetting(key.to_string()))?;
        match raw.to_ascii_uppercase().as_str() {
            "TRI" | "TRIANGLES" | "3" => Ok(ElementType::Tri),
            "QUAD" | "QUADRILATERALS" | "4" => Ok(ElementType::Quad),
            "TET" | "TETRAHEDRA" | "6" => Ok(ElementType::Tet),
            "HEX" | "HEXAHEDRA" | "12" => Ok(ElementType::Hex),
            _ => Err(PsError::InvalidSetting {
                key: key.to_string(),
                value: raw.to_string(),
            }),
        }
    }

    pub fn discretization(&self) -> Result<Discretization, PsError> {
        let key = "DISCRETIZATION";
        match self.get(key).unwrap_or("CONTINUOUS").to_ascii_uppercase().as_str() {
            "CONTINUOUS" => Ok(Discretization::Continuous),
            "IPDG" => Ok(Discretization::Ipdg),
            other => Err(PsError::InvalidSetting {
                key: key.to_string(),
                value: other.to_string(),
            }),
        }
    }

    pub fn cg_variant(&self) -> Result<CgVariant, PsError> {
        let key = "LINEAR SOLVER";
        match self.get(key).unwrap_or("PCG").to_ascii_uppercase().as_str() {
            "CG" => Ok(CgVariant::Cg),
            "PCG" => Ok(CgVariant::Pcg),
            "FPCG" | "FLEXIBLE PCG" => Ok(CgVariant::FlexPcg),
            other => Err(PsError::InvalidSetting {
                key: key.to_string(),
                value: other.to_string(),
            }),
        }
    }

    pub fn initial_guess(&self) -> Result<InitialGuessKind, PsError> {
        let key = "INITIAL GUESS STRATEGY";
        match self.get(key).unwrap_or("NONE").to_ascii_uppercase().as_str() {
            "NONE" => Ok(InitialGuessKind::None),
            "ZERO" => Ok(InitialGuessKind::Zero),
            "CLASSIC" => Ok(InitialGuessKind::Classic),
            other => Err(PsError::InvalidSetting {
                key: key.to_string(),
                value: other.to_string(),
            }),
        }
    }

    pub fn verbose(&self) -> bool {
        self.compare("VERBOSE", "TRUE")
    }
}
