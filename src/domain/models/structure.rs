//! Atomic structure model.
//!
//! A [`Structure`] is immutable once built. Relaxation produces a new value
//! rather than editing the old one.

use serde::{Deserialize, Serialize};

use crate::domain::errors::{DomainError, DomainResult};

/// A single atomic site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Site {
    /// Chemical element symbol.
    pub species: String,

    /// Kind label. Sites sharing a kind are symmetry-equivalent.
    pub kind: String,

    /// Cartesian position in angstrom.
    pub position: [f64; 3],

    /// Orbital manifold receiving a Hubbard correction (e.g. `3d`), if any.
    #[serde(default)]
    pub hubbard_manifold: Option<String>,
}

impl Site {
    pub fn new(species: impl Into<String>, position: [f64; 3]) -> Self {
        let species = species.into();
        Self {
            kind: species.clone(),
            species,
            position,
            hubbard_manifold: None,
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    pub fn with_hubbard(mut self, manifold: impl Into<String>) -> Self {
        self.hubbard_manifold = Some(manifold.into());
        self
    }

    pub fn is_hubbard(&self) -> bool {
        self.hubbard_manifold.is_some()
    }
}

/// Periodic atomic geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Structure {
    /// Lattice vectors as rows, in angstrom.
    pub cell: [[f64; 3]; 3],

    /// Atomic sites.
    pub sites: Vec<Site>,
}

impl Structure {
    /// Build and validate a structure.
    pub fn new(cell: [[f64; 3]; 3], sites: Vec<Site>) -> DomainResult<Self> {
        let structure = Self { cell, sites };
        structure.validate()?;
        Ok(structure)
    }

    /// Check the invariants a deserialized structure must satisfy.
    pub fn validate(&self) -> DomainResult<()> {
        if self.sites.is_empty() {
            return Err(DomainError::InvalidInput(
                "structure has no sites".to_string(),
            ));
        }
        if determinant(&self.cell).abs() < 1e-8 {
            return Err(DomainError::InvalidInput(
                "structure cell is singular".to_string(),
            ));
        }
        for (index, site) in self.sites.iter().enumerate() {
            if site.position.iter().any(|c| !c.is_finite()) {
                return Err(DomainError::InvalidInput(format!(
                    "site {index} has a non-finite position"
                )));
            }
            if site.kind.is_empty() {
                return Err(DomainError::InvalidInput(format!(
                    "site {index} has an empty kind label"
                )));
            }
        }
        Ok(())
    }

    /// Number of sites.
    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    /// Indices and sites carrying a Hubbard manifold, in site order.
    pub fn hubbard_sites(&self) -> impl Iterator<Item = (usize, &Site)> {
        self.sites.iter().enumerate().filter(|(_, s)| s.is_hubbard())
    }

    /// Hubbard sites grouped by kind label.
    ///
    /// Groups are ordered by their lowest site index and each group is sorted.
    pub fn equivalence_groups(&self) -> Vec<Vec<usize>> {
        let mut groups: Vec<(String, Vec<usize>)> = Vec::new();
        for (index, site) in self.hubbard_sites() {
            match groups.iter_mut().find(|(kind, _)| *kind == site.kind) {
                Some((_, members)) => members.push(index),
                None => groups.push((site.kind.clone(), vec![index])),
            }
        }
        groups.into_iter().map(|(_, members)| members).collect()
    }

    /// Minimum-image distance between two sites, in angstrom.
    pub fn distance(&self, i: usize, j: usize) -> f64 {
        let a = self.sites[i].position;
        let b = self.sites[j].position;
        norm(&self.minimum_image([b[0] - a[0], b[1] - a[1], b[2] - a[2]]))
    }

    /// Largest change between this structure and `other`, in angstrom.
    ///
    /// Covers both site displacements (minimum image in `other`'s cell) and
    /// lattice vector changes. Structures with different site lists cannot
    /// be compared.
    pub fn max_displacement(&self, other: &Structure) -> DomainResult<f64> {
        if self.sites.len() != other.sites.len() {
            return Err(DomainError::InvalidInput(format!(
                "relaxed structure has {} sites, expected {}",
                other.sites.len(),
                self.sites.len()
            )));
        }

        let mut max = 0.0_f64;
        for (index, (old, new)) in self.sites.iter().zip(&other.sites).enumerate() {
            if old.species != new.species {
                return Err(DomainError::InvalidInput(format!(
                    "site {index} changed species from {} to {}",
                    old.species, new.species
                )));
            }
            let delta = [
                new.position[0] - old.position[0],
                new.position[1] - old.position[1],
                new.position[2] - old.position[2],
            ];
            max = max.max(norm(&other.minimum_image(delta)));
        }

        for (old_row, new_row) in self.cell.iter().zip(&other.cell) {
            for (old, new) in old_row.iter().zip(new_row) {
                max = max.max((new - old).abs());
            }
        }

        Ok(max)
    }

    /// Take the geometry of `relaxed` while keeping this structure's site labels.
    ///
    /// Relaxation codes report positions and cells; kind labels and Hubbard
    /// manifolds stay those of the structure that was relaxed.
    pub fn relaxed_to(&self, relaxed: &Structure) -> DomainResult<Structure> {
        self.max_displacement(relaxed)?;
        let sites = self
            .sites
            .iter()
            .zip(&relaxed.sites)
            .map(|(old, new)| Site {
                position: new.position,
                ..old.clone()
            })
            .collect();
        Structure::new(relaxed.cell, sites)
    }

    /// Wrap a cartesian vector to its minimum image in this cell.
    fn minimum_image(&self, vector: [f64; 3]) -> [f64; 3] {
        let transposed = transpose(&self.cell);
        let Some(inverse) = invert(&transposed) else {
            return vector;
        };
        let mut fractional = mat_vec(&inverse, &vector);
        for f in &mut fractional {
            *f -= f.round();
        }
        mat_vec(&transposed, &fractional)
    }
}

fn determinant(m: &[[f64; 3]; 3]) -> f64 {
    m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
}

fn transpose(m: &[[f64; 3]; 3]) -> [[f64; 3]; 3] {
    let mut t = [[0.0; 3]; 3];
    for (i, row) in m.iter().enumerate() {
        for (j, value) in row.iter().enumerate() {
            t[j][i] = *value;
        }
    }
    t
}

fn invert(m: &[[f64; 3]; 3]) -> Option<[[f64; 3]; 3]> {
    let det = determinant(m);
    if det.abs() < 1e-12 {
        return None;
    }
    let mut inv = [[0.0; 3]; 3];
    for (i, row) in inv.iter_mut().enumerate() {
        for (j, value) in row.iter_mut().enumerate() {
            // Cofactor of (j, i) gives the adjugate entry (i, j).
            let r0 = (j + 1) % 3;
            let r1 = (j + 2) % 3;
            let c0 = (i + 1) % 3;
            let c1 = (i + 2) % 3;
            *value = (m[r0][c0] * m[r1][c1] - m[r0][c1] * m[r1][c0]) / det;
        }
    }
    Some(inv)
}

fn mat_vec(m: &[[f64; 3]; 3], v: &[f64; 3]) -> [f64; 3] {
    [
        m[0][0] * v[0] + m[0][1] * v[1] + m[0][2] * v[2],
        m[1][0] * v[0] + m[1][1] * v[1] + m[1][2] * v[2],
        m[2][0] * v[0] + m[2][1] * v[1] + m[2][2] * v[2],
    ]
}

fn norm(v: &[f64; 3]) -> f64 {
    (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
}
