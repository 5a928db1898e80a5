//! Orbservability event gateway API (`orbservability.schemas.v1`).

/// 128-bit id split into halves (UPIDs)
#[derive(Clone, Copy, PartialEq, Eq, Hash, prost::Message)]
pub struct UInt128 {
    #[prost(uint64, tag = "1")]
    pub high: u64,

    #[prost(uint64, tag = "2")]
    pub low: u64,
}

impl From<u128> for UInt128 {
    fn from(value: u128) -> Self {
        Self {
            high: (value >> 64) as u64,
            low: value as u64,
        }
    }
}

impl From<UInt128> for u128 {
    fn from(value: UInt128) -> Self {
        ((value.high as u128) << 64) | value.low as u128
    }
}

/// Kubernetes placement of the process that produced an event
#[derive(Clone, PartialEq, prost::Message)]
pub struct KubernetesContext {
    #[prost(string, tag = "1")]
    pub namespace: String,

    #[prost(string, tag = "2")]
    pub pod: String,

    #[prost(string, tag = "3")]
    pub service: String,

    #[prost(string, tag = "4")]
    pub node: String,

    #[prost(string, tag = "5")]
    pub container: String,
}

/// One row of Pixie output, as forwarded to the gateway
#[derive(Clone, PartialEq, prost::Message)]
pub struct PixieEvent {
    /// Nanoseconds since the Unix epoch
    #[prost(int64, tag = "1")]
    pub time_unix_nano: i64,

    #[prost(message, optional, tag = "2")]
    pub upid: Option<UInt128>,

    #[prost(int64, tag = "3")]
    pub pid: i64,

    #[prost(string, tag = "4")]
    pub cmdline: String,

    #[prost(string, tag = "5")]
    pub remote_addr: String,

    #[prost(int64, tag = "6")]
    pub remote_port: i64,

    #[prost(int64, tag = "7")]
    pub trace_role: i64,

    #[prost(string, tag = "8")]
    pub req_method: String,

    #[prost(string, tag = "9")]
    pub req_path: String,

    #[prost(string, tag = "10")]
    pub req_body: String,

    #[prost(int64, tag = "11")]
    pub resp_status: i64,

    #[prost(string, tag = "12")]
    pub resp_body: String,

    /// Nanoseconds
    #[prost(int64, tag = "13")]
    pub latency: i64,

    #[prost(bool, tag = "14")]
    pub encrypted: bool,

    #[prost(double, tag = "15")]
    pub cpu_usage: f64,

    #[prost(message, optional, tag = "16")]
    pub ctx: Option<KubernetesContext>,
}

/// Acknowledgment sent once the client half-closes the stream
#[derive(Clone, PartialEq, prost::Message)]
pub struct StreamEventsResponse {
    #[prost(uint64, tag = "1")]
    pub events_received: u64,
}

/// gRPC client for `orbservability.schemas.v1.EventGatewayService`
pub mod event_gateway_service_client {
    use tonic::codegen::*;

    #[derive(Debug, Clone)]
    pub struct EventGatewayServiceClient<T> {
        inner: tonic::client::Grpc<T>,
    }

    impl<T> EventGatewayServiceClient<T>
    where
        T: tonic::client::GrpcService<tonic::body::BoxBody>,
        T::Error: Into<StdError> + std::fmt::Debug,
        T::ResponseBody: Body<Data = Bytes> + std::marker::Send + 'static,
        <T::ResponseBody as Body>::Error: Into<StdError> + std::marker::Send,
    {
        pub fn new(inner: T) -> Self {
            let inner = tonic::client::Grpc::new(inner);
            Self { inner }
        }

        /// Client-streaming upload of events; resolves after the stream is half-closed
        pub async fn stream_events(
            &mut self,
            request: impl tonic::IntoStreamingRequest<Message = super::PixieEvent>,
        ) -> std::result::Result<tonic::Response<super::StreamEventsResponse>, tonic::Status>
        {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(
                    tonic::Code::Unknown,
                    format!("Service not ready: {:?}", e),
                )
            })?;

            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static(
                "/orbservability.schemas.v1.EventGatewayService/StreamEvents",
            );
            let mut req = request.into_streaming_request();
            req.extensions_mut().insert(GrpcMethod::new(
                "orbservability.schemas.v1.EventGatewayService",
                "StreamEvents",
            ));
            self.inner.client_streaming(req, path, codec).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn test_uint128_halves() {
        let id = UInt128::from((1u128 << 64) | 2);
        assert_eq!(id.high, 1);
        assert_eq!(id.low, 2);
        assert_eq!(u128::from(id), (1u128 << 64) | 2);
    }

    #[test]
    fn test_event_wire_encoding() {
        let event = PixieEvent {
            cmdline: "nginx -g daemon off;".into(),
            upid: Some(UInt128 { high: 1, low: 2 }),
            ..Default::default()
        };
        let bytes = event.encode_to_vec();
        let decoded = PixieEvent::decode(bytes.as_slice()).unwrap();
        assert_eq!(decoded, event);
    }
}
