//! Outbound event stream to the Orbservability event gateway
//!
//! One `StreamEvents` call is opened at startup and shared by every table
//! session for the life of the process. Events are pushed through a bounded
//! channel feeding the client-streaming request body, so concurrent senders
//! are serialized by the channel.

use async_trait::async_trait;
use orbservability_common::proto::{EventGatewayServiceClient, PixieEvent, StreamEventsResponse};
use orbservability_common::ObserverError;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tonic::metadata::{Ascii, MetadataValue};
use tonic::service::interceptor::InterceptedService;
use tonic::service::Interceptor;
use tonic::transport::Channel;
use tracing::{debug, info, warn};

/// Failure to hand an event to the gateway
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("outbound event stream is closed")]
    Closed,

    #[error("event gateway rejected the stream: {0}")]
    Rejected(#[from] tonic::Status),

    #[error("event upload task failed: {0}")]
    Task(String),
}

/// Destination for mapped events
#[async_trait]
pub trait EventSink<E: Send + 'static>: Send + Sync {
    /// Forward one event, in call order.
    async fn send(&self, event: E) -> Result<(), SendError>;

    /// Half-close the stream and wait for the collector's acknowledgment.
    async fn finalize(&self) -> Result<(), SendError>;
}

type UploadHandle = JoinHandle<Result<StreamEventsResponse, tonic::Status>>;

/// Events allowed in flight ahead of the gateway: one row at a time
pub const DEFAULT_OUTBOUND_BUFFER: usize = 1;

/// Stamps gateway calls with the observer's id
#[derive(Clone)]
pub struct ObserverIdInterceptor {
    observer_id: MetadataValue<Ascii>,
}

impl ObserverIdInterceptor {
    pub fn new(observer_id: &str) -> Result<Self, ObserverError> {
        let observer_id = MetadataValue::try_from(observer_id)
            .map_err(|e| ObserverError::ConfigError(format!("invalid observer id: {}", e)))?;
        Ok(Self { observer_id })
    }
}

impl Interceptor for ObserverIdInterceptor {
    fn call(&mut self, mut request: tonic::Request<()>) -> Result<tonic::Request<()>, tonic::Status> {
        debug!(observer_id = ?self.observer_id, "Starting event gateway call");
        request
            .metadata_mut()
            .insert("x-observer-id", self.observer_id.clone());
        Ok(request)
    }
}

/// Client-streaming `StreamEvents` call shared by all table sessions
pub struct GrpcEventStream {
    sender: Mutex<Option<mpsc::Sender<PixieEvent>>>,
    upload: Mutex<Option<UploadHandle>>,
    sent: AtomicU64,
}

impl GrpcEventStream {
    /// Dial the gateway and open the event stream.
    pub async fn connect(
        endpoint: String,
        observer_id: &str,
        buffer: usize,
    ) -> Result<Self, ObserverError> {
        info!("Connecting to event gateway at {}", endpoint);

        let channel = Channel::from_shared(endpoint.clone())
            .map_err(|_| ObserverError::InvalidEndpoint(endpoint))?
            .connect_timeout(Duration::from_secs(30))
            .tcp_keepalive(Some(Duration::from_secs(10)))
            .http2_keep_alive_interval(Duration::from_secs(10))
            .keep_alive_timeout(Duration::from_secs(20))
            .keep_alive_while_idle(true)
            .connect()
            .await?;

        let mut client = EventGatewayServiceClient::new(InterceptedService::new(
            channel,
            ObserverIdInterceptor::new(observer_id)?,
        ));

        let (tx, rx) = mpsc::channel(buffer.max(1));
        let upload = tokio::spawn(async move {
            client
                .stream_events(ReceiverStream::new(rx))
                .await
                .map(|response| response.into_inner())
        });

        Ok(Self::from_parts(tx, upload))
    }

    /// Wrap an already-running upload fed by `sender`.
    pub fn from_parts(sender: mpsc::Sender<PixieEvent>, upload: UploadHandle) -> Self {
        Self {
            sender: Mutex::new(Some(sender)),
            upload: Mutex::new(Some(upload)),
            sent: AtomicU64::new(0),
        }
    }

    pub fn events_sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Collect the upload task's outcome after the channel broke.
    async fn upload_failure(&self) -> SendError {
        self.sender.lock().take();
        let upload = self.upload.lock().take();
        match upload {
            Some(handle) => match handle.await {
                Ok(Err(status)) => SendError::Rejected(status),
                Ok(Ok(_)) => SendError::Closed,
                Err(e) => SendError::Task(e.to_string()),
            },
            None => SendError::Closed,
        }
    }
}

#[async_trait]
impl EventSink<PixieEvent> for GrpcEventStream {
    async fn send(&self, event: PixieEvent) -> Result<(), SendError> {
        let sender = self.sender.lock().clone().ok_or(SendError::Closed)?;
        if sender.send(event).await.is_err() {
            return Err(self.upload_failure().await);
        }
        self.sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn finalize(&self) -> Result<(), SendError> {
        // Dropping the last sender ends the request stream (half-close)
        self.sender.lock().take();

        let Some(upload) = self.upload.lock().take() else {
            return Ok(());
        };

        match upload.await {
            Ok(Ok(ack)) => {
                info!(
                    events_sent = self.events_sent(),
                    events_received = ack.events_received,
                    "Event gateway acknowledged stream"
                );
                Ok(())
            }
            Ok(Err(status)) => {
                warn!(code = ?status.code(), "Event gateway closed stream with error: {}", status.message());
                Err(SendError::Rejected(status))
            }
            Err(e) => Err(SendError::Task(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;

    fn event(cmdline: &str) -> PixieEvent {
        PixieEvent {
            cmdline: cmdline.to_string(),
            ..Default::default()
        }
    }

    /// Gateway stand-in that acknowledges whatever it drained.
    fn draining_gateway() -> (GrpcEventStream, tokio::sync::oneshot::Receiver<Vec<PixieEvent>>) {
        let (tx, mut rx) = mpsc::channel(8);
        let (seen_tx, seen_rx) = tokio::sync::oneshot::channel();
        let upload = tokio::spawn(async move {
            let mut seen = Vec::new();
            while let Some(event) = rx.recv().await {
                seen.push(event);
            }
            let events_received = seen.len() as u64;
            let _ = seen_tx.send(seen);
            Ok(StreamEventsResponse { events_received })
        });
        (GrpcEventStream::from_parts(tx, upload), seen_rx)
    }

    #[tokio::test]
    async fn test_send_preserves_order_and_finalize_acks() {
        let (stream, seen) = draining_gateway();

        for name in ["a", "b", "c"] {
            stream.send(event(name)).await.unwrap();
        }
        stream.finalize().await.unwrap();

        let seen: Vec<String> = seen.await.unwrap().into_iter().map(|e| e.cmdline).collect();
        assert_eq!(seen, vec!["a", "b", "c"]);
        assert_eq!(stream.events_sent(), 3);
    }

    #[tokio::test]
    async fn test_send_after_finalize_is_closed() {
        let (stream, _seen) = draining_gateway();
        stream.finalize().await.unwrap();

        assert!(matches!(stream.send(event("late")).await, Err(SendError::Closed)));
        // Second finalize is a no-op
        assert!(stream.finalize().await.is_ok());
    }

    #[tokio::test]
    async fn test_rejected_stream_surfaces_status() {
        let (tx, rx) = mpsc::channel(8);
        let upload = tokio::spawn(async move {
            drop(rx);
            Err(tonic::Status::unavailable("gateway down"))
        });
        while !upload.is_finished() {
            tokio::task::yield_now().await;
        }
        let stream = GrpcEventStream::from_parts(tx, upload);

        match stream.send(event("x")).await {
            Err(SendError::Rejected(status)) => assert_eq!(status.code(), tonic::Code::Unavailable),
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(matches!(stream.send(event("y")).await, Err(SendError::Closed)));
    }

    #[tokio::test]
    async fn test_default_buffer_holds_one_event() {
        let (tx, rx) = mpsc::channel(DEFAULT_OUTBOUND_BUFFER);
        // Gateway that accepts the stream but never reads it
        let upload = tokio::spawn(async move {
            let _rx = rx;
            std::future::pending::<Result<StreamEventsResponse, tonic::Status>>().await
        });
        let stream = GrpcEventStream::from_parts(tx, upload);

        stream.send(event("first")).await.unwrap();
        assert!(stream.send(event("second")).now_or_never().is_none());
        assert_eq!(stream.events_sent(), 1);
    }

    #[test]
    fn test_interceptor_sets_observer_id() {
        let mut interceptor = ObserverIdInterceptor::new("observer-1").unwrap();
        let request = interceptor.call(tonic::Request::new(())).unwrap();
        assert_eq!(request.metadata().get("x-observer-id").unwrap(), "observer-1");

        assert!(ObserverIdInterceptor::new("bad\nid").is_err());
    }
}
