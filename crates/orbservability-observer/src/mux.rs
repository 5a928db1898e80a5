//! Hands each result table of an execution its own session

use crate::column::TableMetadata;
use crate::mapper::EventSchema;
use crate::outbound::EventSink;
use crate::session::{TableRecordHandler, TableSession};
use crate::telemetry::metrics;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::debug;

/// Invoked by the execution engine once per announced table
pub trait TableMuxer: Send {
    fn accept_table(&mut self, metadata: &TableMetadata) -> Box<dyn TableRecordHandler>;
}

/// Muxer that binds every table to the same outbound sink
pub struct TableMux<E: EventSchema> {
    sink: Arc<dyn EventSink<E>>,
    tables_accepted: u64,
    _schema: PhantomData<fn() -> E>,
}

impl<E: EventSchema> TableMux<E> {
    pub fn new(sink: Arc<dyn EventSink<E>>) -> Self {
        Self {
            sink,
            tables_accepted: 0,
            _schema: PhantomData,
        }
    }

    pub fn tables_accepted(&self) -> u64 {
        self.tables_accepted
    }
}

impl<E: EventSchema> TableMuxer for TableMux<E> {
    fn accept_table(&mut self, metadata: &TableMetadata) -> Box<dyn TableRecordHandler> {
        self.tables_accepted += 1;
        metrics::record_table_accepted();
        debug!(table = %metadata.name, id = %metadata.id, "Accepted result table");
        Box::new(TableSession::<E>::new(metadata.name.clone(), self.sink.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::ColumnValue;
    use crate::session::tests::{metadata, RecordingSink};
    use orbservability_common::proto::vizier::DataType;
    use orbservability_common::proto::PixieEvent;

    #[tokio::test]
    async fn test_tables_get_independent_sessions() {
        let sink = Arc::new(RecordingSink::default());
        let mut mux = TableMux::<PixieEvent>::new(sink.clone());

        let procs = metadata("procs", &[("cmdline", DataType::String)]);
        let conns = metadata("conns", &[("remote_addr", DataType::String)]);
        let mut first = mux.accept_table(&procs);
        let mut second = mux.accept_table(&conns);

        first.handle_init(&procs).await.unwrap();
        second.handle_init(&conns).await.unwrap();
        first.handle_record(vec![ColumnValue::String("a".into())]).await.unwrap();
        second.handle_record(vec![ColumnValue::String("10.0.0.1".into())]).await.unwrap();
        first.handle_record(vec![ColumnValue::String("b".into())]).await.unwrap();

        // Finishing one table does not affect the other
        first.handle_done().await.unwrap();
        second.handle_record(vec![ColumnValue::String("10.0.0.2".into())]).await.unwrap();
        second.handle_done().await.unwrap();

        let events = sink.events.lock();
        let cmdlines: Vec<&str> = events
            .iter()
            .filter(|e| !e.cmdline.is_empty())
            .map(|e| e.cmdline.as_str())
            .collect();
        let addrs: Vec<&str> = events
            .iter()
            .filter(|e| !e.remote_addr.is_empty())
            .map(|e| e.remote_addr.as_str())
            .collect();
        assert_eq!(cmdlines, vec!["a", "b"]);
        assert_eq!(addrs, vec!["10.0.0.1", "10.0.0.2"]);
        assert_eq!(mux.tables_accepted(), 2);
    }
}
