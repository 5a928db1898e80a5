//! Field tables for the gateway's `PixieEvent` schema
//!
//! Keys are the Pixie column names; values write into the prost message.

use crate::mapper::{map_members, EventSchema, FieldSetter, FieldTable};
use once_cell::sync::Lazy;
use orbservability_common::proto::events::UInt128;
use orbservability_common::proto::{KubernetesContext, PixieEvent};

static PIXIE_EVENT_FIELDS: Lazy<FieldTable<PixieEvent>> = Lazy::new(|| {
    FieldTable::<PixieEvent>::new()
        .field("time_", FieldSetter::Time64Ns(|e, v| e.time_unix_nano = v))
        .field("upid", FieldSetter::UInt128(|e, v| e.upid = Some(UInt128::from(v))))
        .field("pid", FieldSetter::Int64(|e, v| e.pid = v))
        .field("cmdline", FieldSetter::String(|e, v| e.cmdline = v))
        .field("remote_addr", FieldSetter::String(|e, v| e.remote_addr = v))
        .field("remote_port", FieldSetter::Int64(|e, v| e.remote_port = v))
        .field("trace_role", FieldSetter::Int64(|e, v| e.trace_role = v))
        .field("req_method", FieldSetter::String(|e, v| e.req_method = v))
        .field("req_path", FieldSetter::String(|e, v| e.req_path = v))
        .field("req_body", FieldSetter::Rendered(|e, v| e.req_body = v))
        .field("resp_status", FieldSetter::Int64(|e, v| e.resp_status = v))
        .field("resp_body", FieldSetter::Rendered(|e, v| e.resp_body = v))
        .field("latency", FieldSetter::Int64(|e, v| e.latency = v))
        .field("encrypted", FieldSetter::Boolean(|e, v| e.encrypted = v))
        .field("cpu_usage", FieldSetter::Float64(|e, v| e.cpu_usage = v))
        .field(
            "ctx",
            FieldSetter::Nested(|e, members| {
                e.ctx = Some(map_members(members)?);
                Ok(())
            }),
        )
});

static KUBERNETES_CONTEXT_FIELDS: Lazy<FieldTable<KubernetesContext>> = Lazy::new(|| {
    FieldTable::<KubernetesContext>::new()
        .field("namespace", FieldSetter::String(|e, v| e.namespace = v))
        .field("pod", FieldSetter::String(|e, v| e.pod = v))
        .field("service", FieldSetter::String(|e, v| e.service = v))
        .field("node", FieldSetter::String(|e, v| e.node = v))
        .field("container", FieldSetter::String(|e, v| e.container = v))
});

impl EventSchema for PixieEvent {
    fn field_table() -> &'static FieldTable<Self> {
        &PIXIE_EVENT_FIELDS
    }
}

impl EventSchema for KubernetesContext {
    fn field_table() -> &'static FieldTable<Self> {
        &KUBERNETES_CONTEXT_FIELDS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::ColumnValue;
    use crate::mapper::{map_row, MappingError};

    fn names(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_upid_and_cmdline() {
        let columns = names(&["upid", "cmdline"]);
        let row = vec![
            ColumnValue::UInt128((0x1u128 << 64) | 0x2),
            ColumnValue::String("nginx -g daemon off;".into()),
        ];

        let event: PixieEvent = map_row(&columns, &row).unwrap();
        assert_eq!(event.upid, Some(UInt128 { high: 0x1, low: 0x2 }));
        assert_eq!(event.cmdline, "nginx -g daemon off;");
        assert_eq!(event.pid, 0);
    }

    #[test]
    fn test_http_events_row() {
        let columns = names(&[
            "time_",
            "remote_addr",
            "remote_port",
            "req_method",
            "req_path",
            "resp_status",
            "resp_body",
            "latency",
            "encrypted",
            "ctx",
            "px_info_",
        ]);
        let row = vec![
            ColumnValue::Time64Ns(1_700_000_000_123_456_789),
            ColumnValue::String("10.0.0.7".into()),
            ColumnValue::Int64(51234),
            ColumnValue::String("GET".into()),
            ColumnValue::String("/healthz".into()),
            ColumnValue::Int64(200),
            ColumnValue::Int64(2),
            ColumnValue::Int64(1_250_000),
            ColumnValue::Boolean(false),
            ColumnValue::String(r#"{"namespace":"default","pod":"default/web-0","service":"default/web"}"#.into()),
            ColumnValue::String("ignored".into()),
        ];

        let event: PixieEvent = map_row(&columns, &row).unwrap();
        assert_eq!(event.time_unix_nano, 1_700_000_000_123_456_789);
        assert_eq!(event.remote_port, 51234);
        assert_eq!(event.resp_status, 200);
        assert_eq!(event.resp_body, "2");
        let ctx = event.ctx.unwrap();
        assert_eq!(ctx.pod, "default/web-0");
        assert_eq!(ctx.service, "default/web");
        assert_eq!(ctx.node, "");
    }

    #[test]
    fn test_time_column_must_be_timestamp() {
        let err = map_row::<PixieEvent>(&names(&["time_"]), &[ColumnValue::Int64(5)]).unwrap_err();
        assert!(matches!(err, MappingError::TypeMismatch { ref field, .. } if field == "time_"));
    }

    #[test]
    fn test_cpu_usage_float() {
        let event: PixieEvent =
            map_row(&names(&["cpu_usage"]), &[ColumnValue::Float64(0.25)]).unwrap();
        assert_eq!(event.cpu_usage, 0.25);
    }
}
