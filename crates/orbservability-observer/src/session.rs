//! Per-table record handling
//!
//! The execution engine drives one handler per result table:
//! `handle_init` once, `handle_record` per row, then `handle_done`.

use crate::column::{Row, TableMetadata};
use crate::mapper::{map_row, EventSchema};
use crate::outbound::{EventSink, SendError};
use crate::telemetry::metrics;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Failure reported back to the execution engine by a table handler
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// The engine broke the init/record/done protocol. Fatal to this table only.
    #[error("table {table}: {call} called while {state}")]
    OutOfOrder {
        table: String,
        call: &'static str,
        state: &'static str,
    },

    /// The outbound stream is broken. Fatal to the execution attempt.
    #[error(transparent)]
    Send(#[from] SendError),
}

/// Callbacks the execution engine invokes for one result table
#[async_trait]
pub trait TableRecordHandler: Send {
    async fn handle_init(&mut self, metadata: &TableMetadata) -> Result<(), HandlerError>;
    async fn handle_record(&mut self, row: Row) -> Result<(), HandlerError>;
    async fn handle_done(&mut self) -> Result<(), HandlerError>;
}

enum SessionState {
    Uninitialized,
    Active { columns: Vec<String> },
    Done,
}

impl SessionState {
    fn name(&self) -> &'static str {
        match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::Active { .. } => "active",
            SessionState::Done => "done",
        }
    }
}

/// Maps a table's rows into `E` and forwards them to the shared sink
pub struct TableSession<E: EventSchema> {
    table: String,
    state: SessionState,
    sink: Arc<dyn EventSink<E>>,
    rows_forwarded: u64,
    rows_dropped: u64,
}

impl<E: EventSchema> TableSession<E> {
    pub fn new(table: impl Into<String>, sink: Arc<dyn EventSink<E>>) -> Self {
        Self {
            table: table.into(),
            state: SessionState::Uninitialized,
            sink,
            rows_forwarded: 0,
            rows_dropped: 0,
        }
    }

    fn out_of_order(&self, call: &'static str) -> HandlerError {
        HandlerError::OutOfOrder {
            table: self.table.clone(),
            call,
            state: self.state.name(),
        }
    }
}

#[async_trait]
impl<E: EventSchema> TableRecordHandler for TableSession<E> {
    async fn handle_init(&mut self, metadata: &TableMetadata) -> Result<(), HandlerError> {
        if !matches!(self.state, SessionState::Uninitialized) {
            return Err(self.out_of_order("handle_init"));
        }

        let columns = metadata.column_names();
        debug!(table = %self.table, columns = ?columns, "Table session initialized");
        self.state = SessionState::Active { columns };
        Ok(())
    }

    async fn handle_record(&mut self, row: Row) -> Result<(), HandlerError> {
        let SessionState::Active { columns } = &self.state else {
            return Err(self.out_of_order("handle_record"));
        };

        let event = match map_row::<E>(columns, &row) {
            Ok(event) => event,
            Err(e) => {
                self.rows_dropped += 1;
                metrics::record_row_dropped(e.reason());
                warn!(table = %self.table, error = %e, "Dropping row that does not fit the event schema");
                return Ok(());
            }
        };

        self.sink.send(event).await?;
        self.rows_forwarded += 1;
        metrics::record_row_forwarded();
        Ok(())
    }

    async fn handle_done(&mut self) -> Result<(), HandlerError> {
        match self.state {
            SessionState::Active { .. } => {
                info!(
                    table = %self.table,
                    rows_forwarded = self.rows_forwarded,
                    rows_dropped = self.rows_dropped,
                    "Table stream complete"
                );
                self.state = SessionState::Done;
                Ok(())
            }
            SessionState::Done => Ok(()),
            SessionState::Uninitialized => Err(self.out_of_order("handle_done")),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::column::{ColumnSpec, ColumnValue};
    use orbservability_common::proto::vizier::DataType;
    use orbservability_common::proto::PixieEvent;
    use parking_lot::Mutex;

    /// Sink that records every event, optionally failing once closed
    #[derive(Default)]
    pub(crate) struct RecordingSink {
        pub events: Mutex<Vec<PixieEvent>>,
        pub closed: Mutex<bool>,
    }

    impl RecordingSink {
        pub fn cmdlines(&self) -> Vec<String> {
            self.events.lock().iter().map(|e| e.cmdline.clone()).collect()
        }
    }

    #[async_trait]
    impl EventSink<PixieEvent> for RecordingSink {
        async fn send(&self, event: PixieEvent) -> Result<(), SendError> {
            if *self.closed.lock() {
                return Err(SendError::Closed);
            }
            self.events.lock().push(event);
            Ok(())
        }

        async fn finalize(&self) -> Result<(), SendError> {
            *self.closed.lock() = true;
            Ok(())
        }
    }

    pub(crate) fn metadata(name: &str, columns: &[(&str, DataType)]) -> TableMetadata {
        TableMetadata {
            id: format!("{}-id", name),
            name: name.to_string(),
            columns: columns
                .iter()
                .map(|(name, data_type)| ColumnSpec {
                    name: name.to_string(),
                    data_type: *data_type,
                })
                .collect(),
        }
    }

    fn process_table() -> TableMetadata {
        metadata("process_stats", &[("pid", DataType::Int64), ("cmdline", DataType::String)])
    }

    fn row(pid: i64, cmdline: &str) -> Row {
        vec![ColumnValue::Int64(pid), ColumnValue::String(cmdline.into())]
    }

    fn session(sink: &Arc<RecordingSink>) -> TableSession<PixieEvent> {
        TableSession::new("process_stats", sink.clone() as Arc<dyn EventSink<PixieEvent>>)
    }

    #[tokio::test]
    async fn test_rows_forwarded_in_order() {
        let sink = Arc::new(RecordingSink::default());
        let mut session = session(&sink);

        session.handle_init(&process_table()).await.unwrap();
        for (pid, cmd) in [(1, "init"), (2, "sshd"), (3, "nginx")] {
            session.handle_record(row(pid, cmd)).await.unwrap();
        }
        session.handle_done().await.unwrap();

        assert_eq!(sink.cmdlines(), vec!["init", "sshd", "nginx"]);
        assert_eq!(session.rows_forwarded, 3);
    }

    #[tokio::test]
    async fn test_bad_row_is_dropped_and_stream_continues() {
        let sink = Arc::new(RecordingSink::default());
        let mut session = session(&sink);
        session.handle_init(&process_table()).await.unwrap();

        session.handle_record(row(1, "first")).await.unwrap();
        // pid carried as a string: type mismatch
        session
            .handle_record(vec![ColumnValue::String("2".into()), ColumnValue::String("bad".into())])
            .await
            .unwrap();
        // short row: schema mismatch
        session.handle_record(vec![ColumnValue::Int64(3)]).await.unwrap();
        session.handle_record(row(4, "last")).await.unwrap();

        assert_eq!(sink.cmdlines(), vec!["first", "last"]);
        assert_eq!(session.rows_dropped, 2);
        assert_eq!(session.rows_forwarded, 2);
    }

    #[tokio::test]
    async fn test_record_before_init_is_out_of_order() {
        let sink = Arc::new(RecordingSink::default());
        let mut session = session(&sink);

        let err = session.handle_record(row(1, "early")).await.unwrap_err();
        assert!(matches!(err, HandlerError::OutOfOrder { call: "handle_record", state: "uninitialized", .. }));
        assert!(sink.events.lock().is_empty());
    }

    #[tokio::test]
    async fn test_double_init_is_out_of_order() {
        let sink = Arc::new(RecordingSink::default());
        let mut session = session(&sink);

        session.handle_init(&process_table()).await.unwrap();
        let err = session.handle_init(&process_table()).await.unwrap_err();
        assert!(matches!(err, HandlerError::OutOfOrder { call: "handle_init", state: "active", .. }));
    }

    #[tokio::test]
    async fn test_done_is_idempotent_and_final() {
        let sink = Arc::new(RecordingSink::default());
        let mut session = session(&sink);

        assert!(session.handle_done().await.is_err());

        session.handle_init(&process_table()).await.unwrap();
        session.handle_done().await.unwrap();
        session.handle_done().await.unwrap();

        let err = session.handle_record(row(1, "late")).await.unwrap_err();
        assert!(matches!(err, HandlerError::OutOfOrder { state: "done", .. }));
    }

    #[tokio::test]
    async fn test_send_failure_propagates() {
        let sink = Arc::new(RecordingSink::default());
        *sink.closed.lock() = true;
        let mut session = session(&sink);
        session.handle_init(&process_table()).await.unwrap();

        let err = session.handle_record(row(1, "lost")).await.unwrap_err();
        assert!(matches!(err, HandlerError::Send(SendError::Closed)));
        assert_eq!(session.rows_forwarded, 0);
    }
}
