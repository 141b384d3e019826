use alloc::collections::BTreeSet;
use alloc::format;
use alloc::string::String;

use crate::error::{Error, ErrorKind, Result};

/// A set of candidate collector endpoints.
///
/// Each endpoint is stored as a `host:port` authority, and identical
/// authorities are stored only once.
///
/// Selection is deterministic: the lexicographically smallest authority is
/// always chosen, so every sender observing the same set converges on the
/// same collector. Endpoints are never removed after a failure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointSet(BTreeSet<String>);

impl EndpointSet {
    /// Creates an empty [`EndpointSet`].
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeSet::new())
    }

    /// Adds an endpoint.
    ///
    /// An endpoint equal to an already present one is ignored.
    pub fn add(&mut self, host: &str, port: u16) {
        let _ = self.0.insert(format!("{host}:{port}"));
    }

    /// Adds an endpoint, consuming and returning the [`EndpointSet`].
    #[must_use]
    pub fn endpoint(mut self, host: &str, port: u16) -> Self {
        self.add(host, port);
        self
    }

    /// Selects the authority of the endpoint to contact.
    ///
    /// # Errors
    ///
    /// An [`ErrorKind::EmptyEndpointSet`] error is returned when no endpoint
    /// has been added.
    pub fn select(&self) -> Result<&str> {
        self.0.first().map(String::as_str).ok_or_else(|| {
            Error::new(
                ErrorKind::EmptyEndpointSet,
                "No collector endpoint has been configured.",
            )
        })
    }

    /// Returns the number of endpoints.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Checks whether there are no endpoints.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns an iterator over the endpoints authorities in selection order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<'a> IntoIterator for &'a EndpointSet {
    type Item = &'a String;
    type IntoIter = alloc::collections::btree_set::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
