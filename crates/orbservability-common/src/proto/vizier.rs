//! Pixie Vizier script execution API (`px.api.vizierpb`).
//!
//! Hand-maintained prost types covering the subset of `vizierapi.proto` the
//! observer consumes: `VizierService/ExecuteScript` and its columnar result
//! frames. Field numbers follow the upstream definition.

/// Request to compile and run a PxL script
#[derive(Clone, PartialEq, prost::Message)]
pub struct ExecuteScriptRequest {
    /// PxL source
    #[prost(string, tag = "1")]
    pub query_str: String,

    /// Cluster the script runs against
    #[prost(string, tag = "3")]
    pub cluster_id: String,

    /// Caller-chosen id, echoed back in every response frame
    #[prost(string, tag = "7")]
    pub query_id: String,
}

/// One frame of the `ExecuteScript` response stream
#[derive(Clone, PartialEq, prost::Message)]
pub struct ExecuteScriptResponse {
    #[prost(message, optional, tag = "1")]
    pub status: Option<Status>,

    #[prost(string, tag = "2")]
    pub query_id: String,

    #[prost(oneof = "execute_script_response::Result", tags = "3, 4")]
    pub result: Option<execute_script_response::Result>,
}

pub mod execute_script_response {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Result {
        #[prost(message, tag = "3")]
        Data(super::QueryData),
        #[prost(message, tag = "4")]
        MetaData(super::QueryMetadata),
    }
}

/// In-band execution status. A zero code means OK.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Status {
    #[prost(int32, tag = "1")]
    pub code: i32,

    #[prost(string, tag = "2")]
    pub message: String,

    #[prost(message, repeated, tag = "4")]
    pub error_details: Vec<ErrorDetails>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ErrorDetails {
    #[prost(oneof = "error_details::Error", tags = "1")]
    pub error: Option<error_details::Error>,
}

pub mod error_details {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Error {
        #[prost(message, tag = "1")]
        CompilerError(super::CompilerError),
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CompilerError {
    #[prost(uint64, tag = "1")]
    pub line: u64,

    #[prost(uint64, tag = "2")]
    pub column: u64,

    #[prost(string, tag = "3")]
    pub message: String,
}

/// Announces a result table before any of its rows
#[derive(Clone, PartialEq, prost::Message)]
pub struct QueryMetadata {
    #[prost(message, optional, tag = "1")]
    pub relation: Option<Relation>,

    #[prost(string, tag = "2")]
    pub name: String,

    #[prost(string, tag = "3")]
    pub id: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Relation {
    #[prost(message, repeated, tag = "1")]
    pub columns: Vec<ColumnInfo>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ColumnInfo {
    #[prost(string, tag = "1")]
    pub column_name: String,

    #[prost(enumeration = "DataType", tag = "2")]
    pub column_type: i32,

    #[prost(string, tag = "3")]
    pub column_desc: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum DataType {
    Unknown = 0,
    Boolean = 1,
    Int64 = 2,
    Uint128 = 3,
    Float64 = 4,
    String = 5,
    Time64ns = 6,
}

impl DataType {
    /// Upstream enum value name
    pub fn as_str_name(&self) -> &'static str {
        match self {
            DataType::Unknown => "DATA_TYPE_UNKNOWN",
            DataType::Boolean => "BOOLEAN",
            DataType::Int64 => "INT64",
            DataType::Uint128 => "UINT128",
            DataType::Float64 => "FLOAT64",
            DataType::String => "STRING",
            DataType::Time64ns => "TIME64NS",
        }
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct QueryData {
    #[prost(message, optional, tag = "1")]
    pub batch: Option<RowBatchData>,
}

/// Columnar batch of rows for one table
#[derive(Clone, PartialEq, prost::Message)]
pub struct RowBatchData {
    #[prost(message, repeated, tag = "1")]
    pub cols: Vec<Column>,

    #[prost(int64, tag = "2")]
    pub num_rows: i64,

    /// End of window
    #[prost(bool, tag = "3")]
    pub eow: bool,

    /// End of stream for this table
    #[prost(bool, tag = "4")]
    pub eos: bool,

    #[prost(string, tag = "5")]
    pub table_id: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Column {
    #[prost(oneof = "column::ColData", tags = "1, 2, 3, 4, 5, 6")]
    pub col_data: Option<column::ColData>,
}

pub mod column {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum ColData {
        #[prost(message, tag = "1")]
        BooleanData(super::BooleanColumn),
        #[prost(message, tag = "2")]
        Int64Data(super::Int64Column),
        #[prost(message, tag = "3")]
        Uint128Data(super::UInt128Column),
        #[prost(message, tag = "4")]
        Time64nsData(super::Time64NsColumn),
        #[prost(message, tag = "5")]
        Float64Data(super::Float64Column),
        #[prost(message, tag = "6")]
        StringData(super::StringColumn),
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct BooleanColumn {
    #[prost(bool, repeated, tag = "1")]
    pub data: Vec<bool>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Int64Column {
    #[prost(int64, repeated, tag = "1")]
    pub data: Vec<i64>,
}

#[derive(Clone, Copy, PartialEq, prost::Message)]
pub struct UInt128 {
    #[prost(uint64, tag = "1")]
    pub low: u64,

    #[prost(uint64, tag = "2")]
    pub high: u64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct UInt128Column {
    #[prost(message, repeated, tag = "1")]
    pub data: Vec<UInt128>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Float64Column {
    #[prost(double, repeated, tag = "1")]
    pub data: Vec<f64>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Time64NsColumn {
    #[prost(int64, repeated, tag = "1")]
    pub data: Vec<i64>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct StringColumn {
    #[prost(bytes = "vec", repeated, tag = "1")]
    pub data: Vec<Vec<u8>>,
}

/// gRPC client for `px.api.vizierpb.VizierService`
pub mod vizier_service_client {
    use tonic::codegen::*;

    #[derive(Debug, Clone)]
    pub struct VizierServiceClient<T> {
        inner: tonic::client::Grpc<T>,
    }

    impl<T> VizierServiceClient<T>
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

        pub fn max_decoding_message_size(mut self, limit: usize) -> Self {
            self.inner = self.inner.max_decoding_message_size(limit);
            self
        }

        /// Run a script and stream its result frames
        pub async fn execute_script(
            &mut self,
            request: impl tonic::IntoRequest<super::ExecuteScriptRequest>,
        ) -> std::result::Result<
            tonic::Response<tonic::codec::Streaming<super::ExecuteScriptResponse>>,
            tonic::Status,
        > {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(
                    tonic::Code::Unknown,
                    format!("Service not ready: {:?}", e),
                )
            })?;

            let codec = tonic::codec::ProstCodec::default();
            let path =
                http::uri::PathAndQuery::from_static("/px.api.vizierpb.VizierService/ExecuteScript");
            let mut req = request.into_request();
            req.extensions_mut()
                .insert(GrpcMethod::new("px.api.vizierpb.VizierService", "ExecuteScript"));
            self.inner.server_streaming(req, path, codec).await
        }
    }
}
