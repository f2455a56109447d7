use std::fmt;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// The error kinds surfaced by the emulator.
///
/// Errors cross subsystem boundaries unchanged, so a caller can always ask
/// what ultimately went wrong (see [`Error::contains`]).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed `host:port` input to the facade.
    #[error("invalid endpoint address: {0}")]
    AddressParse(String),

    /// The resolver returned no addresses for the domain.
    #[error("cannot resolve domain: {0}")]
    Resolution(String),

    /// Every per-address dial attempt failed.
    #[error(transparent)]
    Dial(#[from] ErrDial),

    #[error("connection refused")]
    ConnectionRefused,

    /// The peer reset the connection, possibly via DPI RST injection.
    #[error("connection reset by peer")]
    ConnectionReset,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("operation canceled")]
    Canceled,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Operation on a link (or NIC) that has been torn down.
    #[error("link is closed")]
    ClosedLink,

    /// Operation on a topology that has been torn down.
    #[error("topology is closed")]
    ClosedTopology,

    #[error("tls handshake failed: {0}")]
    TlsHandshake(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Reports whether this error, or any error contained in a dial
    /// aggregate, satisfies `pred`.
    ///
    /// This is the "matches any contained error" check callers use to ask
    /// e.g. whether a failed dial was ultimately a connection reset:
    ///
    /// ```
    /// # use netem::Error;
    /// # let err = Error::ConnectionReset;
    /// err.contains(&|e| matches!(e, Error::ConnectionReset));
    /// ```
    pub fn contains(&self, pred: &dyn Fn(&Error) -> bool) -> bool {
        if pred(self) {
            return true;
        }
        match self {
            Error::Dial(aggregate) => aggregate
                .errors
                .iter()
                .any(|(_, error)| error.contains(pred)),
            _ => false,
        }
    }
}

/// All the errors collected while dialing an endpoint that resolved to
/// multiple addresses, each annotated with the endpoint that produced it.
#[derive(Debug, Default)]
pub struct ErrDial {
    pub errors: Vec<(String, Error)>,
}

impl ErrDial {
    pub(crate) fn push(&mut self, endpoint: impl Into<String>, error: Error) {
        self.errors.push((endpoint.into(), error));
    }
}

impl fmt::Display for ErrDial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dial failed: ")?;
        for (index, (endpoint, error)) in self.errors.iter().enumerate() {
            write!(f, "{endpoint}: {error}")?;
            if index < self.errors.len() - 1 {
                write!(f, "; ")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for ErrDial {}
