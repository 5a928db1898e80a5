//! Error types shared by the observer services

/// Result type alias using ObserverError
pub type Result<T> = std::result::Result<T, ObserverError>;

/// Startup and wiring errors for the observer.
///
/// Errors raised while a script is streaming are classified separately by the
/// bridge; this type covers everything that happens before the bridge runs.
#[derive(Debug, thiserror::Error)]
pub enum ObserverError {
    /// Missing or malformed configuration
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The PxL script could not be read
    #[error("Failed to read PxL script {path}: {source}")]
    ScriptLoad {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Endpoint address could not be turned into a URI
    #[error("Invalid endpoint '{0}'")]
    InvalidEndpoint(String),

    /// gRPC transport error
    #[error("gRPC error: {0}")]
    GrpcError(#[from] tonic::transport::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_endpoint_message_quotes_address() {
        let err = ObserverError::InvalidEndpoint("http://[::".into());
        assert_eq!(err.to_string(), "Invalid endpoint 'http://[::'");
    }

    #[test]
    fn test_script_load_message_names_path() {
        let err = ObserverError::ScriptLoad {
            path: "./config/config.pxl".into(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        };
        assert!(err.to_string().contains("./config/config.pxl"));
    }
}
