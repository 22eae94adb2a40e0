//! The viewport session: one actor task that owns all per-map state.
//!
//! Viewport changes, queries and inbound envelopes arrive on an mpsc channel.
//! Table builds and queries run in spawned tasks and report back on the same
//! channel, so every state change happens on the actor. Results are applied
//! only when their generation is still current.

use std::sync::Arc;

use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use foundation::ids::Generation;
use foundation::viewport::Viewport;
use serde::Serialize;
use serde_json::{Map, Value};
use streaming::broadcast::InboundOutcome;
use streaming::filter::FilterSet;
use streaming::protocol::{Envelope, MessageKind, StatusPayload, StatusState};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::aggregate::{AggregateError, AggregateSet, AggregateTable, Aggregator};
use crate::builder::{QueryTableBuilder, TableError, ViewportTable};
use crate::context::EngineContext;
use crate::executor::{QueryCompletion, QueryExecutor, QueryOutcome, QueryOutput, QueryRequest};
use crate::predicate::filter_expr;
use crate::sql::{ColumnAllowList, default_metrics_query};
use crate::table::LogicalTable;
use runtime::metrics::Counter;

#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error(transparent)]
    Table(#[from] TableError),
    #[error(transparent)]
    Aggregate(#[from] AggregateError),
    #[error("fetch cycle task failed: {0}")]
    Task(String),
}

/// What a finished fetch cycle hands back to the session.
#[derive(Debug)]
pub struct CycleTable {
    pub table: ViewportTable,
    /// Fresh aggregates; `None` when the table was reused or not built.
    pub aggregates: Option<Arc<AggregateSet>>,
}

#[derive(Debug)]
pub enum SessionEvent {
    Viewport(Viewport),
    /// Replaces the user query; `None` restores the default metrics query.
    Query(Option<String>),
    Inbound(Envelope),
    TableReady {
        generation: Generation,
        result: Result<CycleTable, CycleError>,
    },
    QueryDone(QueryCompletion),
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("viewport session has shut down")]
pub struct SessionClosed;

/// Cloneable sender side of a running session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionHandle {
    fn send(&self, event: SessionEvent) -> Result<(), SessionClosed> {
        self.tx.send(event).map_err(|_| SessionClosed)
    }

    pub fn set_viewport(&self, viewport: Viewport) -> Result<(), SessionClosed> {
        self.send(SessionEvent::Viewport(viewport))
    }

    pub fn set_query(&self, sql: Option<String>) -> Result<(), SessionClosed> {
        self.send(SessionEvent::Query(sql))
    }

    pub fn inbound(&self, envelope: Envelope) -> Result<(), SessionClosed> {
        self.send(SessionEvent::Inbound(envelope))
    }

    pub fn shutdown(&self) -> Result<(), SessionClosed> {
        self.send(SessionEvent::Shutdown)
    }
}

/// Payload of the `data` envelope.
#[derive(Debug, Serialize)]
pub struct DataPayload<'a> {
    pub generation: Generation,
    pub zoom: Option<f64>,
    pub rows: Vec<Map<String, Value>>,
    /// More rows were produced than one envelope carries.
    pub truncated: bool,
    pub table_rows: usize,
    pub aggregates: Option<&'a AggregateTable>,
}

pub struct ViewportSession {
    ctx: Arc<EngineContext>,
    builder: QueryTableBuilder,
    aggregator: Aggregator,
    executor: QueryExecutor,
    filters: FilterSet,
    user_query: Option<String>,
    viewport: Option<Viewport>,
    table: Option<Arc<LogicalTable>>,
    aggregates: Arc<AggregateSet>,
    pending_cycle: Option<Generation>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    tx: mpsc::WeakUnboundedSender<SessionEvent>,
}

impl ViewportSession {
    /// Starts the actor; it stops on [`SessionEvent::Shutdown`] or once every
    /// handle is dropped.
    pub fn spawn(ctx: Arc<EngineContext>) -> (SessionHandle, JoinHandle<()>) {
        let (tx, events) = mpsc::unbounded_channel();
        let session = ViewportSession {
            builder: QueryTableBuilder::new(ctx.clone()),
            aggregator: Aggregator::from_config(ctx.codec.clone(), ctx.ladder.clone(), &ctx.config),
            executor: QueryExecutor::new(ctx.config.table_name.clone(), ctx.metrics.clone()),
            filters: FilterSet::new(),
            user_query: None,
            viewport: None,
            table: None,
            aggregates: Arc::new(AggregateSet::default()),
            pending_cycle: None,
            events,
            tx: tx.downgrade(),
            ctx,
        };
        let join = tokio::spawn(session.run());
        (SessionHandle { tx }, join)
    }

    async fn run(mut self) {
        info!(
            channel = self.ctx.broadcaster.channel(),
            table = %self.ctx.config.table_name,
            "viewport session started"
        );
        while let Some(event) = self.events.recv().await {
            match event {
                SessionEvent::Viewport(viewport) => self.on_viewport(viewport),
                SessionEvent::Query(sql) => self.on_query(sql),
                SessionEvent::Inbound(envelope) => self.on_inbound(&envelope),
                SessionEvent::TableReady { generation, result } => {
                    self.on_table_ready(generation, result)
                }
                SessionEvent::QueryDone(completion) => self.on_query_done(completion),
                SessionEvent::Shutdown => break,
            }
        }
        self.executor.cancel();
        info!("viewport session stopped");
    }

    fn on_viewport(&mut self, viewport: Viewport) {
        let generation = self.ctx.clock.advance();
        self.ctx.metrics.inc(Counter::CyclesStarted);
        if let Some(stale) = self.pending_cycle.replace(generation) {
            self.ctx.metrics.inc(Counter::CyclesDropped);
            debug!(%stale, %generation, "fetch cycle superseded");
        }
        self.executor.cancel();
        self.viewport = Some(viewport);
        self.status(generation, StatusState::Loading, None);

        let Some(tx) = self.tx.upgrade() else { return };
        let builder = self.builder.clone();
        let aggregator = self.aggregator.clone();
        let previous = self.table.clone();
        let cycle = tokio::spawn(async move {
            run_cycle(&builder, &aggregator, generation, &viewport, previous).await
        });
        // Always report back so a panicking cycle cannot leave the session pending.
        tokio::spawn(async move {
            let result = match cycle.await {
                Ok(result) => result,
                Err(err) => Err(CycleError::Task(err.to_string())),
            };
            let _ = tx.send(SessionEvent::TableReady { generation, result });
        });
    }

    fn on_query(&mut self, sql: Option<String>) {
        self.user_query = sql.filter(|s| !s.trim().is_empty());
        debug!(custom = self.user_query.is_some(), "query updated");
        self.requery();
    }

    fn on_inbound(&mut self, envelope: &Envelope) {
        match self.ctx.broadcaster.handle_inbound(envelope, &mut self.filters) {
            InboundOutcome::FilterChanged => self.requery(),
            InboundOutcome::Invalid(reason) => {
                warn!(from = %envelope.from_component, %reason, "inbound filter rejected");
            }
            InboundOutcome::Unchanged | InboundOutcome::Ignored => {}
        }
    }

    /// Re-runs the query for the current table under a new generation.
    fn requery(&mut self) {
        if self.pending_cycle.is_some() {
            // The cycle in flight reads the latest query and filters when it lands.
            return;
        }
        if self.table.is_none() {
            return;
        }
        let generation = self.ctx.clock.advance();
        self.start_query(generation);
    }

    fn on_table_ready(&mut self, generation: Generation, result: Result<CycleTable, CycleError>) {
        if self.pending_cycle != Some(generation) || self.ctx.clock.is_stale(generation) {
            debug!(%generation, "stale fetch cycle dropped");
            return;
        }
        self.pending_cycle = None;

        let cycle = match result {
            Ok(cycle) => cycle,
            Err(err) => {
                warn!(%generation, error = %err, "fetch cycle failed");
                self.status(generation, StatusState::FetchError, Some(err.to_string()));
                return;
            }
        };

        match cycle.table {
            ViewportTable::Ready(table) => {
                if let Some(aggregates) = cycle.aggregates {
                    self.aggregates = aggregates;
                }
                self.table = Some(table);
                self.start_query(generation);
            }
            ViewportTable::ZoomIn => self.clear(generation, StatusState::ZoomIn),
            ViewportTable::NoData => self.clear(generation, StatusState::NoData),
            ViewportTable::Superseded => debug!(%generation, "fetch cycle superseded"),
        }
    }

    /// Drops the table and publishes an empty render.
    fn clear(&mut self, generation: Generation, state: StatusState) {
        self.table = None;
        self.aggregates = Arc::new(AggregateSet::default());
        self.ctx.broadcaster.publish(
            MessageKind::Data,
            &DataPayload {
                generation,
                zoom: self.viewport.map(|v| v.zoom),
                rows: Vec::new(),
                truncated: false,
                table_rows: 0,
                aggregates: None,
            },
        );
        self.status(generation, state, None);
    }

    fn start_query(&mut self, generation: Generation) {
        let Some(table) = self.table.clone() else { return };
        let columns = ColumnAllowList::new(table.schema.clone());
        let filter = match filter_expr(&self.filters, &columns) {
            Ok(filter) => filter,
            Err(err) => {
                self.status(generation, StatusState::QueryError, Some(err.to_string()));
                return;
            }
        };
        let sql = self.user_query.clone().unwrap_or_else(|| {
            default_metrics_query(
                &self.ctx.config.table_name,
                &columns,
                &self.ctx.config.value_column,
            )
        });

        let Some(tx) = self.tx.upgrade() else { return };
        self.executor.start(
            generation,
            QueryRequest { sql, table, filter },
            move |completion| {
                let _ = tx.send(SessionEvent::QueryDone(completion));
            },
        );
    }

    fn on_query_done(&mut self, completion: QueryCompletion) {
        match self.executor.finish(completion, &self.ctx.clock) {
            QueryOutcome::Applied { generation, output } => self.publish_data(generation, &output),
            QueryOutcome::Superseded(generation) => {
                debug!(%generation, "superseded query result dropped");
            }
            QueryOutcome::Errored { generation, error } => {
                self.status(generation, StatusState::QueryError, Some(error.to_string()));
            }
        }
    }

    fn publish_data(&self, generation: Generation, output: &QueryOutput) {
        let limit = self.ctx.config.max_result_rows;
        let (rows, truncated) = match rows_to_json(&output.batches, limit) {
            Ok(rows) => rows,
            Err(err) => {
                self.status(generation, StatusState::QueryError, Some(err.to_string()));
                return;
            }
        };
        let zoom = self.viewport.map(|v| v.zoom);
        let aggregates = zoom.and_then(|z| self.aggregator.table_for_zoom(&self.aggregates, z));
        let sinks = self.ctx.broadcaster.publish(
            MessageKind::Data,
            &DataPayload {
                generation,
                zoom,
                rows,
                truncated,
                table_rows: self.table.as_ref().map_or(0, |t| t.num_rows),
                aggregates: aggregates.map(|a| a.as_ref()),
            },
        );
        debug!(%generation, rows = output.num_rows(), sinks, "query result published");
        self.status(generation, StatusState::Ready, None);
    }

    fn status(&self, generation: Generation, state: StatusState, message: Option<String>) {
        let payload = match message {
            Some(message) => StatusPayload::with_message(generation, state, message),
            None => StatusPayload::new(generation, state),
        };
        self.ctx.broadcaster.publish(MessageKind::Status, &payload);
    }
}

async fn run_cycle(
    builder: &QueryTableBuilder,
    aggregator: &Aggregator,
    generation: Generation,
    viewport: &Viewport,
    previous: Option<Arc<LogicalTable>>,
) -> Result<CycleTable, CycleError> {
    let table = builder
        .ensure_viewport_for(generation, viewport, previous.as_ref())
        .await?;
    let aggregates = match &table {
        ViewportTable::Ready(t) if !previous.as_ref().is_some_and(|p| Arc::ptr_eq(p, t)) => {
            Some(Arc::new(aggregator.build(t)?))
        }
        _ => None,
    };
    Ok(CycleTable { table, aggregates })
}

/// Query rows as JSON objects, at most `limit` of them.
pub fn rows_to_json(
    batches: &[RecordBatch],
    limit: usize,
) -> Result<(Vec<Map<String, Value>>, bool), ArrowError> {
    let total: usize = batches.iter().map(|b| b.num_rows()).sum();
    let mut writer = arrow::json::ArrayWriter::new(Vec::new());
    let mut left = limit;
    for batch in batches {
        if left == 0 {
            break;
        }
        let take = batch.num_rows().min(left);
        writer.write(&batch.slice(0, take))?;
        left -= take;
    }
    writer.finish()?;
    let buf = writer.into_inner();
    if buf.is_empty() {
        return Ok((Vec::new(), total > limit));
    }
    let rows: Vec<Map<String, Value>> =
        serde_json::from_slice(&buf).map_err(|e| ArrowError::JsonError(e.to_string()))?;
    Ok((rows, total > limit))
}
