/// Errors raised while establishing or operating a backend transport (C4).
///
/// Per §7: a child spawn failure or HTTP transport-negotiation failure is
/// recoverable during the HTTP fallback ladder (the next variant is
/// tried); at the stdio layer it surfaces to the caller, who decides
/// whether to retry.
#[derive(Debug, thiserror::Error, Clone)]
pub enum TransportError {
    #[error("failed to spawn stdio backend '{backend}': {message}")]
    ChildSpawnFailed { backend: String, message: String },

    #[error("stdio backend '{backend}' closed its pipes before the handshake completed")]
    EarlyEof { backend: String },

    #[error("cannot connect to HTTP backend at {url}")]
    ConnectionRefused { url: String },

    #[error("{transport} transport to '{backend}' failed: {message}")]
    HttpTransportFailed {
        backend: String,
        transport: &'static str,
        message: String,
    },

    #[error("all HTTP transports to '{backend}' failed; last error ({transport}): {message}")]
    AllTransportsFailed {
        backend: String,
        transport: &'static str,
        message: String,
    },

    #[error("schema fetch for '{url}' timed out after {timeout_secs}s")]
    SchemaFetchTimeout { url: String, timeout_secs: u64 },
}

/// Classifies a raw error message the way §4.4 "Connection error
/// classification" requires: messages containing any of a handful of
/// well-known connect-failure substrings are reported as "cannot connect".
pub fn classify_connect_error(backend: &str, url: &str, raw: &str) -> TransportError {
    let lowered = raw.to_ascii_lowercase();
    let is_connect_failure = ["connection refused", "no such host", "network is unreachable"]
        .iter()
        .any(|needle| lowered.contains(needle));

    if is_connect_failure {
        TransportError::ConnectionRefused { url: url.to_string() }
    } else {
        TransportError::HttpTransportFailed {
            backend: backend.to_string(),
            transport: "unknown",
            message: raw.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_connection_refused() {
        let err = classify_connect_error("b", "http://h/m", "dial tcp: connection refused");
        assert!(matches!(err, TransportError::ConnectionRefused { .. }));
        assert_eq!(err.to_string(), "cannot connect to HTTP backend at http://h/m");
    }

    #[test]
    fn classifies_no_such_host() {
        let err = classify_connect_error("b", "http://h/m", "lookup h: no such host");
        assert!(matches!(err, TransportError::ConnectionRefused { .. }));
    }

    #[test]
    fn classifies_unreachable_network() {
        let err = classify_connect_error("b", "http://h/m", "connect: network is unreachable");
        assert!(matches!(err, TransportError::ConnectionRefused { .. }));
    }

    #[test]
    fn non_connect_errors_pass_through() {
        let err = classify_connect_error("b", "http://h/m", "tls handshake timeout");
        assert!(matches!(err, TransportError::HttpTransportFailed { .. }));
    }
}
