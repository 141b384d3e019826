use alloc::borrow::Cow;

/// All possible error kinds.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// No collector endpoint has been configured.
    EmptyEndpointSet,
    /// A rendered request does not fit into its buffer.
    Overflow,
    /// The memory budget of the capability interface is exhausted.
    OutOfMemory,
    /// The scheduler could not start a task.
    Spawn,
    /// The device has not been initialized yet.
    NotInitialized,
    /// The device tasks are already running.
    AlreadySpawned,
    /// The body of a collector response is not valid `JSON`.
    InvalidResponse,
}

impl ErrorKind {
    pub(crate) const fn description(self) -> &'static str {
        match self {
            Self::EmptyEndpointSet => "Empty Endpoint Set",
            Self::Overflow => "Overflow",
            Self::OutOfMemory => "Out Of Memory",
            Self::Spawn => "Spawn",
            Self::NotInitialized => "Not Initialized",
            Self::AlreadySpawned => "Already Spawned",
            Self::InvalidResponse => "Invalid Response",
        }
    }
}

impl core::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.description())
    }
}

/// A library error.
#[derive(PartialEq)]
pub struct Error {
    kind: ErrorKind,
    description: Cow<'static, str>,
}

impl core::fmt::Debug for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.error())
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.error())
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

    /// Returns the error description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    pub(crate) fn error(&self) -> ErrorDisplay<'_> {
        ErrorDisplay(self)
    }
}

pub(crate) struct ErrorDisplay<'a>(&'a Error);

impl core::fmt::Display for ErrorDisplay<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}: {}", self.0.kind, self.0.description)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::new(ErrorKind::InvalidResponse, alloc::format!("{e}"))
    }
}

/// A specialized [`Result`] type for [`Error`].
pub type Result<T> = core::result::Result<T, Error>;
