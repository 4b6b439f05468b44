//! Shared fixtures for the integration tests.
//!
//! Runners here answer by stage: ground-state jobs always converge, and
//! extraction jobs report values chosen by a closure of
//! `(cycle, iteration, site)`.

#![allow(dead_code)]

use serde_json::json;
use std::sync::Arc;

use hubbard_scf::adapters::runners::{MockJobRunner, MockStep};
use hubbard_scf::domain::models::{
    Config, HubbardKey, JobPayload, JobSpec, PollingConfig, Site, Structure,
};

/// Config with millisecond polling and the given tolerance and budget.
pub fn fast_config(tolerance: f64, max_iterations: u32) -> Config {
    let mut config = Config::default();
    config.convergence.tolerance = tolerance;
    config.convergence.max_iterations = max_iterations;
    config.polling = PollingConfig {
        initial_interval_ms: 1,
        max_interval_ms: 2,
    };
    config
}

/// Two Hubbard sites of different kinds, far apart.
pub fn two_site_structure() -> Structure {
    Structure::new(
        [[10.0, 0.0, 0.0], [0.0, 10.0, 0.0], [0.0, 0.0, 10.0]],
        vec![
            Site::new("Fe", [0.0, 0.0, 0.0]).with_hubbard("3d"),
            Site::new("Ni", [5.0, 5.0, 5.0]).with_hubbard("3d"),
        ],
    )
    .expect("valid structure")
}

/// One oxygen followed by three Hubbard sites of distinct kinds.
pub fn three_hubbard_site_structure() -> Structure {
    Structure::new(
        [[8.0, 0.0, 0.0], [0.0, 8.0, 0.0], [0.0, 0.0, 8.0]],
        vec![
            Site::new("O", [4.0, 4.0, 4.0]),
            Site::new("Fe", [0.0, 0.0, 0.0]).with_hubbard("3d"),
            Site::new("Co", [2.0, 0.0, 0.0]).with_hubbard("3d"),
            Site::new("Ni", [0.0, 2.0, 0.0]).with_hubbard("3d"),
        ],
    )
    .expect("valid structure")
}

pub fn u(site: usize) -> HubbardKey {
    HubbardKey::on_site(site, "3d")
}

pub fn ground_state_doc(handle: &str) -> serde_json::Value {
    json!({ "handle": handle, "total_energy": -1234.5, "converged": true })
}

/// Hubbard document with one on-site entry per `(site, value)`.
pub fn hubbard_doc(values: &[(usize, f64)]) -> serde_json::Value {
    let entries: Vec<_> = values
        .iter()
        .map(|(site, value)| {
            json!({
                "key": { "type": "on_site", "site": site, "manifold": "3d" },
                "value": value
            })
        })
        .collect();
    json!({ "hubbard": entries })
}

pub fn structure_doc(structure: &Structure) -> serde_json::Value {
    json!({ "structure": structure })
}

/// `(cycle, iteration)` encoded in a job label such as `c1.i2.ground_state`.
/// Relaxation labels carry no iteration and report 0.
pub fn label_position(label: &str) -> (u32, u32) {
    let mut parts = label.split('.');
    let cycle = parts
        .next()
        .and_then(|p| p.strip_prefix('c'))
        .and_then(|p| p.parse().ok())
        .unwrap_or(0);
    let iteration = parts
        .next()
        .and_then(|p| p.strip_prefix('i'))
        .and_then(|p| p.parse().ok())
        .unwrap_or(0);
    (cycle, iteration)
}

/// Answer a job the way a healthy code would.
///
/// Relaxations hand back `relax(cycle, structure)`; extraction values come
/// from `value(cycle, iteration, site)`.
pub fn healthy_step<V, R>(spec: &JobSpec, value: &V, relax: &R) -> MockStep
where
    V: Fn(u32, u32, usize) -> f64,
    R: Fn(u32, &Structure) -> Structure,
{
    let (cycle, iteration) = label_position(&spec.label);
    match &spec.payload {
        JobPayload::GroundState { .. } => {
            MockStep::succeed_json(&ground_state_doc(&format!("gs-{}", spec.label)))
        }
        JobPayload::ParameterExtraction { sites, .. } => {
            let values: Vec<_> = sites
                .iter()
                .map(|&site| (site, value(cycle, iteration, site)))
                .collect();
            MockStep::succeed_json(&hubbard_doc(&values))
        }
        JobPayload::Relaxation { structure, .. } => {
            MockStep::succeed_json(&structure_doc(&relax(cycle, structure)))
        }
    }
}

/// Runner whose extraction values follow `value`; relaxations leave the
/// structure untouched.
pub fn runner_with_values<V>(value: V) -> Arc<MockJobRunner>
where
    V: Fn(u32, u32, usize) -> f64 + Send + Sync + 'static,
{
    Arc::new(MockJobRunner::with_responder(move |spec| {
        healthy_step(spec, &value, &|_: u32, structure: &Structure| structure.clone())
    }))
}

/// Runner with both extraction values and relaxation results supplied.
pub fn runner_with_relaxation<V, R>(value: V, relax: R) -> Arc<MockJobRunner>
where
    V: Fn(u32, u32, usize) -> f64 + Send + Sync + 'static,
    R: Fn(u32, &Structure) -> Structure + Send + Sync + 'static,
{
    Arc::new(MockJobRunner::with_responder(move |spec| {
        healthy_step(spec, &value, &relax)
    }))
}

/// Values of the two-site example run: `[2.0, 2.0]`, then `[2.05, 1.98]`.
pub fn two_site_schedule(_cycle: u32, iteration: u32, site: usize) -> f64 {
    match (iteration, site) {
        (0, _) => 2.0,
        (_, 0) => 2.05,
        _ => 1.98,
    }
}

/// Copy of `structure` with every position shifted along x.
pub fn shifted(structure: &Structure, dx: f64) -> Structure {
    let sites = structure
        .sites
        .iter()
        .map(|site| {
            let mut site = site.clone();
            site.position[0] += dx;
            site
        })
        .collect();
    Structure::new(structure.cell, sites).expect("valid structure")
}
