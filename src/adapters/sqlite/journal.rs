//! SQLite implementation of the IterationJournal.

use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{JournalEntry, LoopSnapshot, RunManifest};
use crate::domain::ports::IterationJournal;

#[derive(Clone)]
pub struct SqliteJournal {
    pool: SqlitePool,
}

impl SqliteJournal {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn ordering_or_database(err: sqlx::Error, context: String) -> DomainError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => DomainError::JournalOrdering(context),
        _ => err.into(),
    }
}

#[async_trait]
impl IterationJournal for SqliteJournal {
    async fn begin_run(&self, manifest: &RunManifest) -> DomainResult<()> {
        let manifest_json = serde_json::to_string(manifest)?;
        sqlx::query("INSERT INTO runs (run_id, manifest, created_at) VALUES (?, ?, ?)")
            .bind(manifest.run_id.to_string())
            .bind(&manifest_json)
            .bind(manifest.created_at.to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(|e| ordering_or_database(e, format!("run {} already exists", manifest.run_id)))?;
        Ok(())
    }

    async fn manifest(&self, run_id: Uuid) -> DomainResult<Option<RunManifest>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT manifest FROM runs WHERE run_id = ?")
            .bind(run_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|(json,)| serde_json::from_str(&json).map_err(DomainError::from))
            .transpose()
    }

    async fn append(
        &self,
        run_id: Uuid,
        entry: &JournalEntry,
        snapshot: &LoopSnapshot,
    ) -> DomainResult<()> {
        let payload = serde_json::to_string(entry)?;
        let snapshot_json = serde_json::to_string(snapshot)?;
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"INSERT INTO journal_entries (run_id, kind, cycle, iteration, payload, recorded_at)
               VALUES (?, ?, ?, ?, ?, ?)"#,
        )
        .bind(run_id.to_string())
        .bind(entry.kind())
        .bind(i64::from(entry.cycle()))
        .bind(i64::from(entry.iteration()))
        .bind(&payload)
        .bind(entry.recorded_at().to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            ordering_or_database(
                e,
                format!(
                    "{} entry for cycle {} iteration {} already recorded for run {run_id}",
                    entry.kind(),
                    entry.cycle(),
                    entry.iteration()
                ),
            )
        })?;

        sqlx::query(
            r#"INSERT INTO loop_snapshots (run_id, phase, cycle, iteration, snapshot, updated_at)
               VALUES (?, ?, ?, ?, ?, ?)
               ON CONFLICT(run_id) DO UPDATE SET
                   phase = excluded.phase,
                   cycle = excluded.cycle,
                   iteration = excluded.iteration,
                   snapshot = excluded.snapshot,
                   updated_at = excluded.updated_at"#,
        )
        .bind(run_id.to_string())
        .bind(snapshot.phase.as_str())
        .bind(i64::from(snapshot.cycle))
        .bind(i64::from(snapshot.iteration))
        .bind(&snapshot_json)
        .bind(snapshot.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn entries(&self, run_id: Uuid) -> DomainResult<Vec<JournalEntry>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT payload FROM journal_entries WHERE run_id = ? ORDER BY seq")
                .bind(run_id.to_string())
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter()
            .map(|(json,)| serde_json::from_str(&json).map_err(DomainError::from))
            .collect()
    }

    async fn snapshot(&self, run_id: Uuid) -> DomainResult<Option<LoopSnapshot>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT snapshot FROM loop_snapshots WHERE run_id = ?")
                .bind(run_id.to_string())
                .fetch_optional(&self.pool)
                .await?;
        row.map(|(json,)| serde_json::from_str(&json).map_err(DomainError::from))
            .transpose()
    }

    async fn runs(&self) -> DomainResult<Vec<RunManifest>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT manifest FROM runs ORDER BY created_at, rowid")
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter()
            .map(|(json,)| serde_json::from_str(&json).map_err(DomainError::from))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::connection::create_test_pool;
    use crate::adapters::sqlite::migrations::{all_embedded_migrations, Migrator};
    use crate::domain::models::{
        HubbardKey, HubbardParameterSet, IterationRecord, JobOutcome, LoopDecision, LoopState,
        Site, StageSummary, Structure,
    };
    use chrono::Utc;

    async fn journal() -> SqliteJournal {
        let pool = create_test_pool().await.unwrap();
        Migrator::new(pool.clone())
            .run_embedded_migrations(all_embedded_migrations())
            .await
            .unwrap();
        SqliteJournal::new(pool)
    }

    fn manifest() -> RunManifest {
        let structure = Structure::new(
            [[4.0, 0.0, 0.0], [0.0, 4.0, 0.0], [0.0, 0.0, 4.0]],
            vec![Site::new("Ni", [0.0; 3]).with_hubbard("3d")],
        )
        .unwrap();
        let keys = [HubbardKey::on_site(0, "3d")];
        RunManifest::new(structure, HubbardParameterSet::uniform(&keys, 0.0))
    }

    fn entry(iteration: u32) -> JournalEntry {
        let params = HubbardParameterSet::uniform(&[HubbardKey::on_site(0, "3d")], 1.5);
        JournalEntry::Iteration(IterationRecord {
            cycle: 0,
            iteration,
            input: params.clone(),
            output: Some(params),
            max_delta: Some(1.5),
            ground_state: StageSummary {
                outcome: JobOutcome::Success(()),
                attempts: 1,
                total_energy: Some(-120.5),
                task_count: None,
            },
            extraction: None,
            decision: LoopDecision::Continue,
            failure: None,
            recorded_at: Utc::now(),
        })
    }

    #[tokio::test]
    async fn test_begin_run_and_read_manifest() {
        let journal = journal().await;
        let manifest = manifest();
        journal.begin_run(&manifest).await.unwrap();

        let loaded = journal.manifest(manifest.run_id).await.unwrap();
        assert_eq!(loaded, Some(manifest.clone()));
        assert!(journal.manifest(Uuid::new_v4()).await.unwrap().is_none());

        let err = journal.begin_run(&manifest).await.unwrap_err();
        assert!(matches!(err, DomainError::JournalOrdering(_)));
    }

    #[tokio::test]
    async fn test_append_keeps_order_and_replaces_snapshot() {
        let journal = journal().await;
        let manifest = manifest();
        journal.begin_run(&manifest).await.unwrap();
        let mut state = LoopState::start(&manifest).unwrap();

        for i in 0..3 {
            state.iteration = i + 1;
            journal
                .append(manifest.run_id, &entry(i), &state.snapshot())
                .await
                .unwrap();
        }

        let entries = journal.entries(manifest.run_id).await.unwrap();
        let iterations: Vec<u32> = entries.iter().map(JournalEntry::iteration).collect();
        assert_eq!(iterations, vec![0, 1, 2]);

        let snapshot = journal.snapshot(manifest.run_id).await.unwrap().unwrap();
        assert_eq!(snapshot.iteration, 3);
    }

    #[tokio::test]
    async fn test_duplicate_entry_is_rejected_atomically() {
        let journal = journal().await;
        let manifest = manifest();
        journal.begin_run(&manifest).await.unwrap();
        let mut state = LoopState::start(&manifest).unwrap();

        state.iteration = 1;
        journal
            .append(manifest.run_id, &entry(0), &state.snapshot())
            .await
            .unwrap();

        state.iteration = 7;
        let err = journal
            .append(manifest.run_id, &entry(0), &state.snapshot())
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::JournalOrdering(_)));

        assert_eq!(journal.entries(manifest.run_id).await.unwrap().len(), 1);
        let snapshot = journal.snapshot(manifest.run_id).await.unwrap().unwrap();
        assert_eq!(snapshot.iteration, 1);
    }

    #[tokio::test]
    async fn test_latest_run_is_most_recent() {
        let journal = journal().await;
        assert_eq!(journal.latest_run().await.unwrap(), None);

        let first = manifest();
        let mut second = manifest();
        second.created_at = first.created_at + chrono::Duration::seconds(5);
        journal.begin_run(&first).await.unwrap();
        journal.begin_run(&second).await.unwrap();

        assert_eq!(journal.runs().await.unwrap().len(), 2);
        assert_eq!(journal.latest_run().await.unwrap(), Some(second.run_id));
    }
}
