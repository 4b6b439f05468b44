//! Hubbard parameter keys and parameter sets.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::structure::Structure;

/// Identifies one Hubbard parameter.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubbardKey {
    /// On-site U for one manifold of one site.
    OnSite { site: usize, manifold: String },
    /// Inter-site V between two sites, stored with `site_i < site_j`.
    InterSite {
        site_i: usize,
        site_j: usize,
        manifold_i: String,
        manifold_j: String,
    },
}

impl HubbardKey {
    pub fn on_site(site: usize, manifold: impl Into<String>) -> Self {
        Self::OnSite {
            site,
            manifold: manifold.into(),
        }
    }

    /// Inter-site key with the pair put in canonical order.
    pub fn inter_site(
        site_i: usize,
        manifold_i: impl Into<String>,
        site_j: usize,
        manifold_j: impl Into<String>,
    ) -> Self {
        let (manifold_i, manifold_j) = (manifold_i.into(), manifold_j.into());
        if site_i <= site_j {
            Self::InterSite {
                site_i,
                site_j,
                manifold_i,
                manifold_j,
            }
        } else {
            Self::InterSite {
                site_i: site_j,
                site_j: site_i,
                manifold_i: manifold_j,
                manifold_j: manifold_i,
            }
        }
    }

    /// The site that owns this key during decomposition.
    pub fn owner_site(&self) -> usize {
        match self {
            Self::OnSite { site, .. } => *site,
            Self::InterSite { site_i, .. } => *site_i,
        }
    }

    pub fn is_on_site(&self) -> bool {
        matches!(self, Self::OnSite { .. })
    }
}

impl fmt::Display for HubbardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OnSite { site, manifold } => write!(f, "U({site}, {manifold})"),
            Self::InterSite {
                site_i,
                site_j,
                manifold_i,
                manifold_j,
            } => write!(f, "V({site_i}-{site_j}, {manifold_i}-{manifold_j})"),
        }
    }
}

/// Derive the required key set of a structure.
///
/// Every Hubbard site contributes one on-site key. When `intersite_cutoff`
/// is given, every pair of Hubbard sites closer than the cutoff contributes
/// one inter-site key.
pub fn required_keys(structure: &Structure, intersite_cutoff: Option<f64>) -> BTreeSet<HubbardKey> {
    let hubbard: Vec<(usize, &str)> = structure
        .hubbard_sites()
        .filter_map(|(i, s)| s.hubbard_manifold.as_deref().map(|m| (i, m)))
        .collect();

    let mut keys: BTreeSet<HubbardKey> = hubbard
        .iter()
        .map(|(site, manifold)| HubbardKey::on_site(*site, *manifold))
        .collect();

    if let Some(cutoff) = intersite_cutoff {
        for (a, (site_i, manifold_i)) in hubbard.iter().enumerate() {
            for (site_j, manifold_j) in &hubbard[a + 1..] {
                if structure.distance(*site_i, *site_j) < cutoff {
                    keys.insert(HubbardKey::inter_site(
                        *site_i,
                        *manifold_i,
                        *site_j,
                        *manifold_j,
                    ));
                }
            }
        }
    }

    keys
}

/// One serialized parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubbardEntry {
    pub key: HubbardKey,
    pub value: f64,
}

/// A complete set of Hubbard parameters, in eV.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(into = "Vec<HubbardEntry>", try_from = "Vec<HubbardEntry>")]
pub struct HubbardParameterSet {
    values: BTreeMap<HubbardKey, f64>,
}

impl HubbardParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from entries, rejecting duplicate keys and non-finite values.
    pub fn from_entries(
        entries: impl IntoIterator<Item = (HubbardKey, f64)>,
    ) -> DomainResult<Self> {
        let mut values = BTreeMap::new();
        for (key, value) in entries {
            if !value.is_finite() {
                return Err(DomainError::InvalidInput(format!(
                    "non-finite value for {key}"
                )));
            }
            if values.insert(key.clone(), value).is_some() {
                return Err(DomainError::InvalidInput(format!("duplicate key {key}")));
            }
        }
        Ok(Self { values })
    }

    /// The same value for every key.
    pub fn uniform<'a>(keys: impl IntoIterator<Item = &'a HubbardKey>, value: f64) -> Self {
        Self {
            values: keys.into_iter().map(|k| (k.clone(), value)).collect(),
        }
    }

    /// Merge partial sets produced by disjoint decomposition tasks.
    ///
    /// A key appearing in more than one part is an internal consistency
    /// violation; it is never resolved by picking one of the values.
    pub fn merge_disjoint(
        parts: impl IntoIterator<Item = HubbardParameterSet>,
    ) -> DomainResult<Self> {
        let mut values = BTreeMap::new();
        for part in parts {
            for (key, value) in part.values {
                if values.contains_key(&key) {
                    return Err(DomainError::InternalConsistency(format!(
                        "key {key} produced by more than one decomposition task"
                    )));
                }
                values.insert(key, value);
            }
        }
        Ok(Self { values })
    }

    pub fn get(&self, key: &HubbardKey) -> Option<f64> {
        self.values.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn keys(&self) -> BTreeSet<HubbardKey> {
        self.values.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&HubbardKey, f64)> {
        self.values.iter().map(|(k, v)| (k, *v))
    }

    /// Largest absolute difference over the union of both key sets.
    ///
    /// A key present on only one side is compared against zero.
    pub fn max_abs_delta(&self, other: &HubbardParameterSet) -> f64 {
        self.values
            .keys()
            .chain(other.values.keys())
            .map(|key| {
                let a = self.get(key).unwrap_or(0.0);
                let b = other.get(key).unwrap_or(0.0);
                (a - b).abs()
            })
            .fold(0.0, f64::max)
    }

    /// Project onto a new key set, keeping values for surviving keys.
    pub fn carried_over(&self, keys: &BTreeSet<HubbardKey>, default: f64) -> Self {
        Self {
            values: keys
                .iter()
                .map(|k| (k.clone(), self.get(k).unwrap_or(default)))
                .collect(),
        }
    }
}

impl From<HubbardParameterSet> for Vec<HubbardEntry> {
    fn from(set: HubbardParameterSet) -> Self {
        set.values
            .into_iter()
            .map(|(key, value)| HubbardEntry { key, value })
            .collect()
    }
}

impl TryFrom<Vec<HubbardEntry>> for HubbardParameterSet {
    type Error = DomainError;

    fn try_from(entries: Vec<HubbardEntry>) -> Result<Self, Self::Error> {
        Self::from_entries(entries.into_iter().map(|e| (e.key, e.value)))
    }
}

impl fmt::Display for HubbardParameterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .values
            .iter()
            .map(|(k, v)| format!("{k}={v:.4}"))
            .collect();
        write!(f, "[{}]", parts.join(", "))
    }
}
