use std::fmt;

/// Error kind for broker errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Connection failure, I/O error or command timeout.
    Transport,
    /// Malformed or unexpected broker reply.
    Protocol,
    /// Misconfiguration: missing consumer group, bad setting, unknown stream.
    Config,
    /// Payload that cannot be turned into broker fields (or back).
    Format,
}

/// Error returned by every `StreamBroker` method.
#[derive(Debug)]
pub struct BrokerError {
    pub kind: ErrorKind,
    pub message: String,
}

impl BrokerError {
    pub fn transport(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Transport, message: msg.into() }
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Protocol, message: msg.into() }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Config, message: msg.into() }
    }

    pub fn format(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Format, message: msg.into() }
    }

    /// Consumer group does not exist on the stream.
    pub fn no_group(stream: &str, group: &str) -> Self {
        Self::config(format!("no consumer group '{group}' on stream '{stream}'"))
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Add context to the error, preserving the original ErrorKind.
    ///
    /// Produces: `"context: original message"`.
    pub fn with_context(self, ctx: impl fmt::Display) -> Self {
        Self {
            kind: self.kind,
            message: format!("{ctx}: {}", self.message),
        }
    }
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for BrokerError {}
