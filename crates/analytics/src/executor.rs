use std::sync::Arc;
use std::time::Instant;

use arrow::record_batch::RecordBatch;
use datafusion::datasource::TableProvider;
use datafusion::datasource::MemTable;
use datafusion::error::DataFusionError;
use datafusion::prelude::{Expr, SessionContext};
use foundation::ids::Generation;
use runtime::generation::GenerationClock;
use runtime::metrics::{Counter, Series, SharedMetrics};
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use crate::sql::SqlError;
use crate::table::LogicalTable;

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("query is empty")]
    Empty,
    #[error(transparent)]
    Sql(#[from] SqlError),
    #[error("{0}")]
    Engine(#[from] DataFusionError),
    #[error("query task failed: {0}")]
    Task(String),
}

/// What to run and against which table.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub sql: String,
    pub table: Arc<LogicalTable>,
    /// Filter applied to the table before the query sees it.
    pub filter: Option<Expr>,
}

#[derive(Debug, Clone)]
pub struct QueryOutput {
    pub batches: Vec<RecordBatch>,
    pub elapsed_ms: u64,
}

impl QueryOutput {
    pub fn num_rows(&self) -> usize {
        self.batches.iter().map(|b| b.num_rows()).sum()
    }
}

/// Sent back by a finished query task.
#[derive(Debug)]
pub struct QueryCompletion {
    pub generation: Generation,
    pub result: Result<QueryOutput, QueryError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorState {
    Idle,
    Running(Generation),
}

/// Terminal state of one run.
#[derive(Debug)]
pub enum QueryOutcome {
    Applied {
        generation: Generation,
        output: QueryOutput,
    },
    Superseded(Generation),
    Errored {
        generation: Generation,
        error: QueryError,
    },
}

/// Runs one query at a time; starting a new one aborts the old.
#[derive(Debug)]
pub struct QueryExecutor {
    table_name: String,
    state: ExecutorState,
    running: Option<AbortHandle>,
    metrics: SharedMetrics,
}

impl QueryExecutor {
    pub fn new(table_name: impl Into<String>, metrics: SharedMetrics) -> Self {
        Self {
            table_name: table_name.into(),
            state: ExecutorState::Idle,
            running: None,
            metrics,
        }
    }

    pub fn state(&self) -> ExecutorState {
        self.state
    }

    /// Spawns the query for `generation`, aborting any run still in flight.
    /// `on_done` receives the completion unless the task is aborted first.
    pub fn start<F>(&mut self, generation: Generation, request: QueryRequest, on_done: F)
    where
        F: FnOnce(QueryCompletion) + Send + 'static,
    {
        self.cancel();
        self.metrics.inc(Counter::QueriesStarted);
        let table_name = self.table_name.clone();
        let handle = tokio::spawn(async move {
            let result = execute(&table_name, request).await;
            on_done(QueryCompletion { generation, result });
        });
        self.running = Some(handle.abort_handle());
        self.state = ExecutorState::Running(generation);
        debug!(%generation, "query started");
    }

    /// Aborts the in-flight run, if any.
    pub fn cancel(&mut self) {
        if let ExecutorState::Running(previous) = self.state {
            if let Some(handle) = self.running.take() {
                handle.abort();
            }
            self.metrics.inc(Counter::QueriesSuperseded);
            debug!(%previous, "query aborted");
        }
        self.state = ExecutorState::Idle;
    }

    /// Settles a completion against the clock.
    ///
    /// Only the current generation is applied; anything else is reported as
    /// superseded and leaves the executor's running state alone.
    pub fn finish(&mut self, completion: QueryCompletion, clock: &GenerationClock) -> QueryOutcome {
        let QueryCompletion { generation, result } = completion;
        if self.state != ExecutorState::Running(generation) {
            debug!(%generation, "late completion of an aborted query dropped");
            return QueryOutcome::Superseded(generation);
        }
        self.state = ExecutorState::Idle;
        self.running = None;

        if clock.is_stale(generation) {
            self.metrics.inc(Counter::QueriesSuperseded);
            debug!(%generation, current = %clock.current(), "stale query result dropped");
            return QueryOutcome::Superseded(generation);
        }
        match result {
            Ok(output) => {
                self.metrics.inc(Counter::QueriesApplied);
                self.metrics.record(Series::QueryMillis, output.elapsed_ms as i64);
                QueryOutcome::Applied { generation, output }
            }
            Err(error) => {
                self.metrics.inc(Counter::QueriesErrored);
                warn!(%generation, %error, "query failed");
                QueryOutcome::Errored { generation, error }
            }
        }
    }
}

/// Binds `request.table` under `table_name` in a fresh engine session and
/// runs the query.
pub async fn execute(table_name: &str, request: QueryRequest) -> Result<QueryOutput, QueryError> {
    let sql = request.sql.trim();
    if sql.is_empty() {
        return Err(QueryError::Empty);
    }
    let started = Instant::now();
    let ctx = SessionContext::new();
    let table = request.table;
    let mem = Arc::new(MemTable::try_new(
        table.schema.clone(),
        vec![table.batches.clone()],
    )?);

    let provider: Arc<dyn TableProvider> = match request.filter {
        Some(filter) => ctx.read_table(mem)?.filter(filter)?.into_view(),
        None => mem,
    };
    ctx.register_table(table_name, provider)?;

    let batches = ctx.sql(sql).await?.collect().await?;
    Ok(QueryOutput {
        batches,
        elapsed_ms: started.elapsed().as_millis() as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::{ExecutorState, QueryCompletion, QueryExecutor, QueryOutcome, QueryRequest, execute};
    use crate::table::LogicalTable;
    use crate::testing::{data_schema, london_batch};
    use arrow::array::AsArray;
    use arrow::datatypes::Int64Type;
    use datafusion::prelude::{col, lit};
    use foundation::ids::Generation;
    use pretty_assertions::assert_eq;
    use runtime::generation::GenerationClock;
    use runtime::metrics::{Counter, SharedMetrics};
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn table() -> Arc<LogicalTable> {
        Arc::new(LogicalTable::new(
            data_schema(),
            vec![london_batch()],
            BTreeSet::new(),
            BTreeSet::new(),
        ))
    }

    fn request(sql: &str) -> QueryRequest {
        QueryRequest {
            sql: sql.to_string(),
            table: table(),
            filter: None,
        }
    }

    fn count(batches: &[arrow::record_batch::RecordBatch]) -> i64 {
        batches[0].column(0).as_primitive::<Int64Type>().value(0)
    }

    #[tokio::test]
    async fn runs_against_named_table() {
        let out = execute("spatial_data", request("SELECT COUNT(*) FROM spatial_data"))
            .await
            .unwrap();
        assert_eq!(count(&out.batches), 3);
    }

    #[tokio::test]
    async fn filter_restricts_the_table() {
        let mut req = request("SELECT COUNT(*) FROM spatial_data");
        req.filter = Some(col("value").between(lit(2.0), lit(5.0)));
        let out = execute("spatial_data", req).await.unwrap();
        assert_eq!(count(&out.batches), 1);
    }

    #[tokio::test]
    async fn bad_sql_is_an_error_not_a_panic() {
        assert!(execute("spatial_data", request("SELEC nonsense")).await.is_err());
        assert!(execute("spatial_data", request("  ")).await.is_err());
    }

    #[tokio::test]
    async fn older_generation_never_overwrites_newer() {
        let clock = GenerationClock::new();
        let metrics = SharedMetrics::new();
        let mut executor = QueryExecutor::new("spatial_data", metrics.clone());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let g5 = clock.advance();
        let tx5 = tx.clone();
        executor.start(g5, request("SELECT COUNT(*) FROM spatial_data"), move |c| {
            let _ = tx5.send(c);
        });
        let g6 = clock.advance();
        executor.start(g6, request("SELECT COUNT(*) FROM spatial_data"), move |c| {
            let _ = tx.send(c);
        });
        assert_eq!(executor.state(), ExecutorState::Running(g6));

        let done = rx.recv().await.unwrap();
        assert_eq!(done.generation, g6);
        assert!(matches!(
            executor.finish(done, &clock),
            QueryOutcome::Applied { generation, .. } if generation == g6
        ));
        assert_eq!(executor.state(), ExecutorState::Idle);

        // The generation 5 run was aborted: its sender is dropped without
        // ever delivering a completion.
        assert!(rx.recv().await.is_none());

        // Generation 5 finishing afterwards is dropped.
        let late = QueryCompletion {
            generation: g5,
            result: execute("spatial_data", request("SELECT COUNT(*) FROM spatial_data")).await,
        };
        assert!(matches!(
            executor.finish(late, &clock),
            QueryOutcome::Superseded(g) if g == g5
        ));
        assert_eq!(metrics.counter(Counter::QueriesApplied), 1);
        assert_eq!(metrics.counter(Counter::QueriesSuperseded), 1);
    }

    #[tokio::test]
    async fn current_completion_after_clock_moved_is_superseded() {
        let clock = GenerationClock::new();
        let mut executor = QueryExecutor::new("spatial_data", SharedMetrics::new());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let g = clock.advance();
        executor.start(g, request("SELECT 1"), move |c| {
            let _ = tx.send(c);
        });
        let done = rx.recv().await.unwrap();
        clock.advance();
        assert!(matches!(
            executor.finish(done, &clock),
            QueryOutcome::Superseded(_)
        ));
        assert_eq!(executor.state(), ExecutorState::Idle);
    }

    #[tokio::test]
    async fn sql_error_is_reported_as_errored() {
        let clock = GenerationClock::new();
        let mut executor = QueryExecutor::new("spatial_data", SharedMetrics::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let g = clock.advance();
        executor.start(g, request("SELECT missing_column FROM spatial_data"), move |c| {
            let _ = tx.send(c);
        });
        let done = rx.recv().await.unwrap();
        assert!(matches!(
            executor.finish(done, &clock),
            QueryOutcome::Errored { .. }
        ));
    }

    #[test]
    fn finishing_unknown_generation_keeps_state() {
        let clock = GenerationClock::new();
        let mut executor = QueryExecutor::new("spatial_data", SharedMetrics::new());
        let outcome = executor.finish(
            QueryCompletion {
                generation: Generation(9),
                result: Err(super::QueryError::Empty),
            },
            &clock,
        );
        assert!(matches!(outcome, QueryOutcome::Superseded(_)));
        assert_eq!(executor.state(), ExecutorState::Idle);
    }
}
