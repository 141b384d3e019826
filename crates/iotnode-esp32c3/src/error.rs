use alloc::borrow::Cow;
use alloc::format;

/// All possible error kinds.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The `Wi-Fi` controller failed.
    Wifi,
    /// The network stack has not been configured in time.
    Network,
    /// An `HTTP` request failed.
    Http,
    /// A collector authority is not a valid `host:port` pair.
    InvalidAuthority,
    /// A collector host name could not be resolved.
    Dns,
    /// An `embassy` task could not be spawned.
    Spawn,
}

impl ErrorKind {
    pub(crate) const fn description(self) -> &'static str {
        match self {
            Self::Wifi => "Wi-Fi",
            Self::Network => "Network",
            Self::Http => "Http",
            Self::InvalidAuthority => "Invalid Authority",
            Self::Dns => "Dns",
            Self::Spawn => "Spawn",
        }
    }
}

impl core::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.description())
    }
}

/// A board error.
pub struct Error {
    kind: ErrorKind,
    description: Cow<'static, str>,
}

impl core::fmt::Debug for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}: {}", self.kind, self.description)
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}: {}", self.kind, self.description)
    }
}

impl core::error::Error for Error {}

impl Error {
    /// Creates a new [`Error`].
    pub fn new(kind: ErrorKind, description: impl Into<Cow<'static, str>>) -> Self {
        Self {
            kind,
            description: description.into(),
        }
    }

    /// Returns the [`ErrorKind`].
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl From<esp_radio::InitializationError> for Error {
    fn from(e: esp_radio::InitializationError) -> Self {
        Self::new(ErrorKind::Wifi, format!("{e:?}"))
    }
}

impl From<esp_radio::wifi::WifiError> for Error {
    fn from(e: esp_radio::wifi::WifiError) -> Self {
        Self::new(ErrorKind::Wifi, format!("{e:?}"))
    }
}

impl From<embassy_executor::SpawnError> for Error {
    fn from(e: embassy_executor::SpawnError) -> Self {
        Self::new(ErrorKind::Spawn, format!("{e:?}"))
    }
}

impl<E: core::fmt::Debug> From<edge_http::io::Error<E>> for Error {
    fn from(e: edge_http::io::Error<E>) -> Self {
        Self::new(ErrorKind::Http, format!("{e:?}"))
    }
}

/// A specialized [`Result`] type for [`Error`].
pub type Result<T> = core::result::Result<T, Error>;
