use crate::core::sink::{SchemaPolicy, TabularSink};
use crate::core::source::{RangeSpec, TabularSource};
use crate::domain::model::PartitionKey;
use crate::domain::ports::{Catalog, Storage, TabularProvider};
use crate::utils::error::{EtlError, Result};
use serde::Serialize;
use std::fmt;

/// Loader 狀態機：IDLE → SOURCING → TYPING → SINKING → DONE，任何非終止狀態都可進入 FAILED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoaderState {
    Idle,
    Sourcing,
    Typing,
    Sinking,
    Done,
    Failed,
}

impl LoaderState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LoaderState::Done | LoaderState::Failed)
    }

    pub fn can_transition_to(&self, next: LoaderState) -> bool {
        use LoaderState::*;
        match (self, next) {
            (Idle, Sourcing) | (Sourcing, Typing) | (Typing, Sinking) | (Sinking, Done) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for LoaderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoaderState::Idle => "IDLE",
            LoaderState::Sourcing => "SOURCING",
            LoaderState::Typing => "TYPING",
            LoaderState::Sinking => "SINKING",
            LoaderState::Done => "DONE",
            LoaderState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadReport {
    pub rows: usize,
    pub columns: Vec<String>,
    pub partition: PartitionKey,
    pub files: Vec<String>,
    pub null_cells: usize,
    /// Cells that failed coercion and were nulled.
    pub coerced_to_null: usize,
}

/// Runs one source → typing → sink load. A loader is single use.
pub struct Loader<P: TabularProvider, S: Storage, C: Catalog> {
    source: TabularSource<P>,
    range: RangeSpec,
    sink: TabularSink<S, C>,
    policy: SchemaPolicy,
    state: LoaderState,
    history: Vec<LoaderState>,
}

impl<P: TabularProvider, S: Storage, C: Catalog> Loader<P, S, C> {
    pub fn new(source: TabularSource<P>, range: RangeSpec, sink: TabularSink<S, C>) -> Self {
        Self {
            source,
            range,
            sink,
            policy: SchemaPolicy::default(),
            state: LoaderState::Idle,
            history: vec![LoaderState::Idle],
        }
    }

    pub fn with_schema_policy(mut self, policy: SchemaPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn state(&self) -> LoaderState {
        self.state
    }

    /// Every state the loader has been in, starting with `Idle`.
    pub fn history(&self) -> &[LoaderState] {
        &self.history
    }

    pub fn sink(&self) -> &TabularSink<S, C> {
        &self.sink
    }

    fn transition(&mut self, next: LoaderState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(EtlError::ProcessingError {
                message: format!("Invalid loader transition {} → {}", self.state, next),
            });
        }
        tracing::debug!("Loader {} → {}", self.state, next);
        self.state = next;
        self.history.push(next);
        Ok(())
    }

    pub async fn run(&mut self) -> Result<LoadReport> {
        if self.state != LoaderState::Idle {
            return Err(EtlError::ProcessingError {
                message: format!("Loader already ran and is {}", self.state),
            });
        }

        tracing::info!(
            "Starting load {} → {}",
            self.source.describe(),
            self.sink.describe()
        );

        match self.execute().await {
            Ok(report) => {
                self.transition(LoaderState::Done)?;
                tracing::info!(
                    "✅ Loaded {} rows into partition {}",
                    report.rows,
                    report.partition
                );
                Ok(report)
            }
            Err(e) => {
                tracing::error!("❌ Load failed while {}: {}", self.state, e);
                self.transition(LoaderState::Failed)?;
                Err(e)
            }
        }
    }

    async fn execute(&mut self) -> Result<LoadReport> {
        self.transition(LoaderState::Sourcing)?;
        let raw = self.source.read_raw(&self.range).await?;

        // 型別已知也照樣走一次轉型，統一檢查每個儲存格
        self.transition(LoaderState::Typing)?;
        let (batch, stats) = self.source.coercer().apply(&raw)?;

        self.transition(LoaderState::Sinking)?;
        let written = self.sink.write(&batch, self.policy).await?;

        Ok(LoadReport {
            rows: written.rows,
            columns: batch.columns.iter().map(|c| c.name.clone()).collect(),
            partition: written.partition,
            files: written.files,
            null_cells: batch.null_count(),
            coerced_to_null: stats.failed_cells,
        })
    }
}
