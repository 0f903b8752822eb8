use std::fmt;

use crate::store::StoreError;

/// Error type for bus operations.
#[derive(Debug)]
pub enum BusError {
    /// The named serialization protocol is not recognized.
    UnsupportedProtocol(String),
    /// The payload kind cannot be carried by this transport.
    UnsupportedPayload(&'static str),
    /// `listen` was called while the listener loop is already running.
    AlreadyListening,
    /// `stop_listening` was called while no listener loop exists.
    NotListening,
    /// `listen` was called with no usable topic names.
    EmptyTopicList,
    /// Serializing a payload or envelope failed.
    Encode(String),
    /// Wire data could not be parsed into an event.
    Parse(String),
    /// The store client reported a failure.
    Store(StoreError),
    /// A shared lock was poisoned by a panicking thread.
    LockPoisoned(&'static str),
    /// The listener loop thread panicked before returning a result.
    ListenerPanicked,
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusError::UnsupportedProtocol(name) => {
                write!(f, "unsupported serialization protocol: {}", name)
            }
            BusError::UnsupportedPayload(kind) => {
                write!(f, "unsupported payload kind: {}", kind)
            }
            BusError::AlreadyListening => write!(f, "already listening"),
            BusError::NotListening => write!(f, "not listening yet"),
            BusError::EmptyTopicList => write!(f, "no topics to listen on"),
            BusError::Encode(msg) => write!(f, "encode failed: {}", msg),
            BusError::Parse(msg) => write!(f, "parse failed: {}", msg),
            BusError::Store(e) => write!(f, "store error: {}", e),
            BusError::LockPoisoned(what) => write!(f, "{} lock poisoned", what),
            BusError::ListenerPanicked => write!(f, "listener loop panicked"),
        }
    }
}

impl std::error::Error for BusError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BusError::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for BusError {
    fn from(e: StoreError) -> Self {
        BusError::Store(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_detail() {
        let e = BusError::UnsupportedProtocol("xml".to_string());
        assert_eq!(e.to_string(), "unsupported serialization protocol: xml");

        let e = BusError::Store(StoreError::NoSuchKey("orders".to_string()));
        assert!(e.to_string().contains("orders"));
    }

    #[test]
    fn store_error_is_source() {
        use std::error::Error;
        let e = BusError::from(StoreError::NoSuchKey("k".to_string()));
        assert!(e.source().is_some());
    }
}
