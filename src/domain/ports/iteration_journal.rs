//! Iteration journal port - durable, append-only record of loop progress.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{JournalEntry, LoopSnapshot, RunManifest};

/// Stores run manifests, journal entries and the latest loop snapshot.
///
/// Entries are append-only. Each `append` writes the entry and the snapshot
/// atomically: either both land or neither does.
#[async_trait]
pub trait IterationJournal: Send + Sync {
    /// Register a new run.
    async fn begin_run(&self, manifest: &RunManifest) -> DomainResult<()>;

    async fn manifest(&self, run_id: Uuid) -> DomainResult<Option<RunManifest>>;

    /// Append an entry and replace the run's snapshot.
    async fn append(
        &self,
        run_id: Uuid,
        entry: &JournalEntry,
        snapshot: &LoopSnapshot,
    ) -> DomainResult<()>;

    /// All entries of a run, in append order.
    async fn entries(&self, run_id: Uuid) -> DomainResult<Vec<JournalEntry>>;

    async fn snapshot(&self, run_id: Uuid) -> DomainResult<Option<LoopSnapshot>>;

    /// All runs, oldest first.
    async fn runs(&self) -> DomainResult<Vec<RunManifest>>;

    /// Most recently started run.
    async fn latest_run(&self) -> DomainResult<Option<Uuid>> {
        Ok(self.runs().await?.last().map(|m| m.run_id))
    }
}
