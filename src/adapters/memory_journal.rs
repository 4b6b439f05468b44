//! In-memory IterationJournal for tests and dry runs.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{JournalEntry, LoopSnapshot, RunManifest};
use crate::domain::ports::IterationJournal;

#[derive(Default)]
struct RunRecord {
    manifest: Option<RunManifest>,
    entries: Vec<JournalEntry>,
    snapshot: Option<LoopSnapshot>,
}

/// Journal kept in process memory. Lost when dropped.
#[derive(Default)]
pub struct InMemoryJournal {
    runs: RwLock<HashMap<Uuid, RunRecord>>,
    order: RwLock<Vec<Uuid>>,
}

impl InMemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IterationJournal for InMemoryJournal {
    async fn begin_run(&self, manifest: &RunManifest) -> DomainResult<()> {
        let mut runs = self.runs.write().await;
        if runs.contains_key(&manifest.run_id) {
            return Err(DomainError::JournalOrdering(format!(
                "run {} already exists",
                manifest.run_id
            )));
        }
        runs.insert(
            manifest.run_id,
            RunRecord {
                manifest: Some(manifest.clone()),
                ..RunRecord::default()
            },
        );
        self.order.write().await.push(manifest.run_id);
        Ok(())
    }

    async fn manifest(&self, run_id: Uuid) -> DomainResult<Option<RunManifest>> {
        Ok(self
            .runs
            .read()
            .await
            .get(&run_id)
            .and_then(|r| r.manifest.clone()))
    }

    async fn append(
        &self,
        run_id: Uuid,
        entry: &JournalEntry,
        snapshot: &LoopSnapshot,
    ) -> DomainResult<()> {
        let mut runs = self.runs.write().await;
        let record = runs.get_mut(&run_id).ok_or_else(|| DomainError::RunNotFound(run_id.to_string()))?;

        let duplicate = record.entries.iter().any(|e| {
            e.kind() == entry.kind()
                && e.cycle() == entry.cycle()
                && e.iteration() == entry.iteration()
        });
        if duplicate {
            return Err(DomainError::JournalOrdering(format!(
                "{} entry for cycle {} iteration {} already recorded for run {run_id}",
                entry.kind(),
                entry.cycle(),
                entry.iteration()
            )));
        }

        record.entries.push(entry.clone());
        record.snapshot = Some(snapshot.clone());
        Ok(())
    }

    async fn entries(&self, run_id: Uuid) -> DomainResult<Vec<JournalEntry>> {
        Ok(self
            .runs
            .read()
            .await
            .get(&run_id)
            .map(|r| r.entries.clone())
            .unwrap_or_default())
    }

    async fn snapshot(&self, run_id: Uuid) -> DomainResult<Option<LoopSnapshot>> {
        Ok(self
            .runs
            .read()
            .await
            .get(&run_id)
            .and_then(|r| r.snapshot.clone()))
    }

    async fn runs(&self) -> DomainResult<Vec<RunManifest>> {
        let runs = self.runs.read().await;
        let order = self.order.read().await;
        Ok(order
            .iter()
            .filter_map(|id| runs.get(id).and_then(|r| r.manifest.clone()))
            .collect())
    }
}
