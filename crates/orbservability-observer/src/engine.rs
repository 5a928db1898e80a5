//! Script execution against Pixie's Vizier API
//!
//! `ScriptExecutor` starts one execution and hands back its result stream.
//! `ScriptResults::stream` pulls one response frame per call and pushes its
//! contents into the table muxer: metadata frames open a table session, row
//! batches are transposed into rows, and an end-of-stream flag closes the
//! table.

use crate::column::{ColumnSpec, ColumnValue, RawCell, Row, TableMetadata};
use crate::mux::TableMuxer;
use crate::session::{HandlerError, TableRecordHandler};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use orbservability_common::proto::vizier::column::ColData;
use orbservability_common::proto::vizier::execute_script_response::Result as FrameResult;
use orbservability_common::proto::vizier::{
    error_details, Column, DataType, QueryMetadata, RowBatchData, Status as VizierStatus,
};
use orbservability_common::proto::{ExecuteScriptRequest, ExecuteScriptResponse, VizierServiceClient};
use orbservability_common::ObserverError;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tonic::transport::Channel;
use tonic::{Code, Status};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// Maximum decoded response frame size (64MB)
const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Outcome of a failed execution attempt, as seen by the retry loop
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScriptError {
    #[error("failed to start script execution: {0}")]
    ExecutionStart(String),

    #[error("script failed to compile: {0}")]
    Compilation(String),

    #[error("stream has already been closed")]
    StreamClosed,

    #[error("script execution failed: {0}")]
    Runtime(String),

    #[error("failed to forward event: {0}")]
    Send(String),
}

/// How the retry loop treats a [`ScriptError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The attempt ended normally
    Benign,
    /// Counted against the error budget; execution is retried
    Retryable,
    /// Stop immediately
    Terminal,
}

impl ScriptError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ScriptError::StreamClosed => ErrorClass::Benign,
            ScriptError::Compilation(_) => ErrorClass::Terminal,
            ScriptError::ExecutionStart(_) | ScriptError::Runtime(_) | ScriptError::Send(_) => {
                ErrorClass::Retryable
            }
        }
    }

    /// Short label for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            ScriptError::ExecutionStart(_) => "execution_start",
            ScriptError::Compilation(_) => "compilation",
            ScriptError::StreamClosed => "stream_closed",
            ScriptError::Runtime(_) => "runtime",
            ScriptError::Send(_) => "send",
        }
    }
}

/// Result of one pull from the result stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStep {
    /// A frame was processed; more may follow
    Continue,
    /// The execution's result stream ended
    Finished,
}

/// Starts script executions
#[async_trait]
pub trait ScriptExecutor: Send + Sync {
    async fn execute_script(&self, script: &str) -> Result<Box<dyn ScriptResults>, ScriptError>;
}

/// Result stream of one execution
#[async_trait]
pub trait ScriptResults: Send {
    /// Pull and dispatch the next frame.
    async fn stream(&mut self, mux: &mut dyn TableMuxer) -> Result<StreamStep, ScriptError>;

    /// Stop the execution and drop any open table sessions.
    async fn close(&mut self);
}

/// Executes scripts through `VizierService/ExecuteScript`
pub struct VizierExecutor {
    client: VizierServiceClient<Channel>,
    cluster_id: String,
}

impl VizierExecutor {
    /// Build a client for `endpoint`. The connection is made on first use so
    /// an unreachable Pixie shows up as a failed execution, not a startup error.
    pub fn connect_lazy(endpoint: String, cluster_id: impl Into<String>) -> Result<Self, ObserverError> {
        info!("Using Pixie API at {}", endpoint);

        let channel = Channel::from_shared(endpoint.clone())
            .map_err(|_| ObserverError::InvalidEndpoint(endpoint))?
            .connect_timeout(Duration::from_secs(30))
            .tcp_keepalive(Some(Duration::from_secs(10)))
            .http2_keep_alive_interval(Duration::from_secs(10))
            .keep_alive_timeout(Duration::from_secs(20))
            .keep_alive_while_idle(true)
            .connect_lazy();

        Ok(Self {
            client: VizierServiceClient::new(channel).max_decoding_message_size(MAX_MESSAGE_SIZE),
            cluster_id: cluster_id.into(),
        })
    }
}

#[async_trait]
impl ScriptExecutor for VizierExecutor {
    async fn execute_script(&self, script: &str) -> Result<Box<dyn ScriptResults>, ScriptError> {
        let query_id = Uuid::new_v4().to_string();
        let request = ExecuteScriptRequest {
            query_str: script.to_string(),
            cluster_id: self.cluster_id.clone(),
            query_id: query_id.clone(),
        };

        debug!(query_id = %query_id, cluster_id = %self.cluster_id, "Executing script");

        let mut client = self.client.clone();
        let response = client.execute_script(request).await.map_err(|status| {
            ScriptError::ExecutionStart(format!("{:?}: {}", status.code(), status.message()))
        })?;

        Ok(Box::new(VizierResults::new(query_id, response.into_inner())))
    }
}

struct OpenTable {
    metadata: TableMetadata,
    handler: Box<dyn TableRecordHandler>,
}

/// Result stream of one `ExecuteScript` call
pub struct VizierResults<S> {
    query_id: String,
    stream: Option<S>,
    tables: HashMap<String, OpenTable>,
    /// Tables whose session was dropped after a protocol error
    discarded: HashSet<String>,
}

impl<S> VizierResults<S>
where
    S: Stream<Item = Result<ExecuteScriptResponse, Status>> + Unpin + Send,
{
    pub fn new(query_id: String, stream: S) -> Self {
        Self {
            query_id,
            stream: Some(stream),
            tables: HashMap::new(),
            discarded: HashSet::new(),
        }
    }

    async fn handle_frame(
        &mut self,
        frame: ExecuteScriptResponse,
        mux: &mut dyn TableMuxer,
    ) -> Result<(), ScriptError> {
        if let Some(status) = frame.status.as_ref().filter(|s| s.code != 0) {
            return Err(status_error(status));
        }

        match frame.result {
            Some(FrameResult::MetaData(metadata)) => self.open_table(metadata, mux).await,
            Some(FrameResult::Data(data)) => match data.batch {
                Some(batch) => self.handle_batch(batch).await,
                None => Ok(()),
            },
            None => Ok(()),
        }
    }

    async fn open_table(
        &mut self,
        metadata: QueryMetadata,
        mux: &mut dyn TableMuxer,
    ) -> Result<(), ScriptError> {
        let metadata = table_metadata(metadata);
        let mut handler = mux.accept_table(&metadata);

        let init = handler.handle_init(&metadata).await;
        match init {
            Ok(()) => {
                let id = metadata.id.clone();
                if self.tables.insert(id.clone(), OpenTable { metadata, handler }).is_some() {
                    debug!(table_id = %id, "Table announced twice, replacing session");
                }
                Ok(())
            }
            Err(e) => self.handler_failure(&metadata.id, e),
        }
    }

    async fn handle_batch(&mut self, batch: RowBatchData) -> Result<(), ScriptError> {
        let Some(table) = self.tables.get_mut(&batch.table_id) else {
            if self.discarded.contains(&batch.table_id) {
                trace!(table_id = %batch.table_id, "Skipping batch for discarded table");
            } else {
                warn!(table_id = %batch.table_id, query_id = %self.query_id, "Row batch for unknown table, skipping");
            }
            return Ok(());
        };

        let rows = transpose(&table.metadata, &batch)?;
        let fed = feed(table, rows, batch.eos).await;
        match fed {
            Ok(()) => {
                if batch.eos {
                    self.tables.remove(&batch.table_id);
                }
                Ok(())
            }
            Err(e) => self.handler_failure(&batch.table_id, e),
        }
    }

    fn handler_failure(&mut self, table_id: &str, err: HandlerError) -> Result<(), ScriptError> {
        match err {
            HandlerError::Send(e) => Err(ScriptError::Send(e.to_string())),
            e @ HandlerError::OutOfOrder { .. } => {
                warn!(table_id = %table_id, error = %e, "Discarding table session");
                self.tables.remove(table_id);
                self.discarded.insert(table_id.to_string());
                Ok(())
            }
        }
    }

    async fn finish_open_tables(&mut self) -> Result<(), ScriptError> {
        for (id, mut table) in std::mem::take(&mut self.tables) {
            match table.handler.handle_done().await {
                Ok(()) => {}
                Err(HandlerError::Send(e)) => return Err(ScriptError::Send(e.to_string())),
                Err(e) => warn!(table_id = %id, error = %e, "Failed to finish table"),
            }
        }
        Ok(())
    }
}

async fn feed(table: &mut OpenTable, rows: Vec<Row>, eos: bool) -> Result<(), HandlerError> {
    for row in rows {
        table.handler.handle_record(row).await?;
    }
    if eos {
        table.handler.handle_done().await?;
    }
    Ok(())
}

#[async_trait]
impl<S> ScriptResults for VizierResults<S>
where
    S: Stream<Item = Result<ExecuteScriptResponse, Status>> + Unpin + Send,
{
    async fn stream(&mut self, mux: &mut dyn TableMuxer) -> Result<StreamStep, ScriptError> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(ScriptError::StreamClosed);
        };

        let next = stream.next().await;
        match next {
            Some(Ok(frame)) => {
                self.handle_frame(frame, mux).await?;
                Ok(StreamStep::Continue)
            }
            Some(Err(status)) => Err(transport_error(&status)),
            None => {
                debug!(query_id = %self.query_id, "Result stream ended");
                self.stream = None;
                self.finish_open_tables().await?;
                Ok(StreamStep::Finished)
            }
        }
    }

    async fn close(&mut self) {
        if self.stream.take().is_some() || !self.tables.is_empty() {
            debug!(
                query_id = %self.query_id,
                open_tables = self.tables.len(),
                "Closing result stream"
            );
        }
        self.tables.clear();
    }
}

fn table_metadata(metadata: QueryMetadata) -> TableMetadata {
    let columns = metadata
        .relation
        .map(|relation| relation.columns)
        .unwrap_or_default()
        .into_iter()
        .map(|info| ColumnSpec {
            data_type: DataType::try_from(info.column_type).unwrap_or(DataType::Unknown),
            name: info.column_name,
        })
        .collect();

    TableMetadata {
        id: metadata.id,
        name: metadata.name,
        columns,
    }
}

/// Turn a columnar batch into rows, classifying every cell.
fn transpose(metadata: &TableMetadata, batch: &RowBatchData) -> Result<Vec<Row>, ScriptError> {
    let num_rows = usize::try_from(batch.num_rows).map_err(|_| {
        ScriptError::Runtime(format!(
            "table {}: invalid row count {}",
            metadata.name, batch.num_rows
        ))
    })?;

    if batch.cols.len() != metadata.columns.len() {
        return Err(ScriptError::Runtime(format!(
            "table {}: batch has {} columns, table declares {}",
            metadata.name,
            batch.cols.len(),
            metadata.columns.len()
        )));
    }

    let mut typed_columns = 0;
    for (i, col) in batch.cols.iter().enumerate() {
        if let Some(len) = column_len(col) {
            typed_columns += 1;
            if len != num_rows {
                return Err(ScriptError::Runtime(format!(
                    "table {}: column {} has {} values, batch declares {} rows",
                    metadata.name, i, len, num_rows
                )));
            }
        }
    }

    // Nothing to check the row count against
    if typed_columns == 0 && num_rows != 0 {
        return Err(ScriptError::Runtime(format!(
            "table {}: batch declares {} rows but carries no column data",
            metadata.name, num_rows
        )));
    }

    // Rendering for cells the engine sent without typed data
    let fallbacks: Vec<String> = (0..batch.cols.len())
        .map(|i| {
            let data_type = metadata
                .columns
                .get(i)
                .map(|c| c.data_type)
                .unwrap_or(DataType::Unknown);
            format!("<{}>", data_type.as_str_name())
        })
        .collect();

    Ok((0..num_rows)
        .map(|row| {
            batch
                .cols
                .iter()
                .zip(&fallbacks)
                .map(|(col, fallback)| ColumnValue::classify(cell_at(col, row, fallback)))
                .collect()
        })
        .collect())
}

fn column_len(col: &Column) -> Option<usize> {
    match col.col_data.as_ref()? {
        ColData::BooleanData(c) => Some(c.data.len()),
        ColData::Int64Data(c) => Some(c.data.len()),
        ColData::Uint128Data(c) => Some(c.data.len()),
        ColData::Time64nsData(c) => Some(c.data.len()),
        ColData::Float64Data(c) => Some(c.data.len()),
        ColData::StringData(c) => Some(c.data.len()),
    }
}

/// Cell `row` of `col`. Lengths are checked by [`transpose`] first.
fn cell_at<'a>(col: &'a Column, row: usize, fallback: &'a str) -> RawCell<'a> {
    match &col.col_data {
        Some(ColData::BooleanData(c)) => RawCell::Boolean(c.data[row]),
        Some(ColData::Int64Data(c)) => RawCell::Int64(c.data[row]),
        Some(ColData::Uint128Data(c)) => RawCell::UInt128 {
            high: c.data[row].high,
            low: c.data[row].low,
        },
        Some(ColData::Time64nsData(c)) => RawCell::Time64Ns(c.data[row]),
        Some(ColData::Float64Data(c)) => RawCell::Float64(c.data[row]),
        Some(ColData::StringData(c)) => RawCell::String(&c.data[row]),
        None => RawCell::Other(fallback),
    }
}

/// Classify an in-band status frame
fn status_error(status: &VizierStatus) -> ScriptError {
    let compiler_errors: Vec<String> = status
        .error_details
        .iter()
        .filter_map(|detail| match &detail.error {
            Some(error_details::Error::CompilerError(e)) => {
                Some(format!("{}:{} {}", e.line, e.column, e.message))
            }
            None => None,
        })
        .collect();

    if compiler_errors.is_empty() {
        ScriptError::Runtime(format!("status {}: {}", status.code, status.message))
    } else {
        ScriptError::Compilation(compiler_errors.join("; "))
    }
}

/// Classify a gRPC error raised mid-stream
fn transport_error(status: &Status) -> ScriptError {
    match status.code() {
        Code::InvalidArgument => ScriptError::Compilation(status.message().to_string()),
        code @ (Code::Unknown | Code::Internal) => {
            warn!(code = ?code, "Unclassified script execution error: {}", status.message());
            ScriptError::Runtime(format!("{:?}: {}", code, status.message()))
        }
        code => ScriptError::Runtime(format!("{:?}: {}", code, status.message())),
    }
}
