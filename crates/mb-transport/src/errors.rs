//! Transport error types.

use crate::ports::LinkId;
use thiserror::Error;

/// Failures opening, accepting or using a link.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The endpoint string is not understood by this connector.
    #[error("Invalid endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    /// Nothing is listening on the endpoint.
    #[error("Connection refused by '{endpoint}'")]
    ConnectionRefused { endpoint: String },

    /// Another listener already owns the endpoint.
    #[error("Endpoint '{endpoint}' already has a listener")]
    AddressInUse { endpoint: String },

    /// The link was closed by either side.
    #[error("Link {link} is closed")]
    Closed { link: LinkId },

    /// `on_receive` was called twice on the same link.
    #[error("Receive handler already installed on link {link}")]
    ReceiverInstalled { link: LinkId },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_name_the_endpoint() {
        let err = TransportError::ConnectionRefused {
            endpoint: "mem/alpha".into(),
        };
        assert!(err.to_string().contains("mem/alpha"));

        let err = TransportError::Closed { link: LinkId(7) };
        assert_eq!(err.to_string(), "Link link-7 is closed");
    }
}
