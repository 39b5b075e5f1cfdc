/// A per-request hint overriding how a factory resolves the connection to open.
///
/// ```rust
/// use dbconn_core::connection_info::{ConnectionInfo, ConnectionTarget};
///
/// let info = ConnectionInfo::named("reporting").with_connection_string("file:reports.db");
/// assert!(matches!(info.target(), ConnectionTarget::ConnectionString { .. }));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionInfo {
    connection_string: Option<String>,
    provider_name: Option<String>,
    named_connection: Option<String>,
}

/// Where a connection should come from, most specific first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionTarget<'a> {
    ConnectionString { connection_string: &'a str, provider_name: Option<&'a str> },
    Named(&'a str),
    Default,
}

impl ConnectionInfo {
    pub fn for_connection_string<S: Into<String>>(connection_string: S) -> Self {
        Self { connection_string: Some(connection_string.into()), ..Default::default() }
    }

    pub fn named<S: Into<String>>(named_connection: S) -> Self {
        Self { named_connection: Some(named_connection.into()), ..Default::default() }
    }

    pub fn with_connection_string<S: Into<String>>(mut self, connection_string: S) -> Self {
        self.connection_string = Some(connection_string.into());
        self
    }

    pub fn with_provider_name<S: Into<String>>(mut self, provider_name: S) -> Self {
        self.provider_name = Some(provider_name.into());
        self
    }

    pub fn with_named_connection<S: Into<String>>(mut self, named_connection: S) -> Self {
        self.named_connection = Some(named_connection.into());
        self
    }

    pub fn connection_string(&self) -> Option<&str> {
        self.connection_string.as_deref()
    }

    pub fn provider_name(&self) -> Option<&str> {
        self.provider_name.as_deref()
    }

    pub fn named_connection(&self) -> Option<&str> {
        self.named_connection.as_deref()
    }

    /// Resolve the hint: an explicit connection string wins over a named connection, which wins over the factory
    /// defaults.
    pub fn target(&self) -> ConnectionTarget<'_> {
        match (&self.connection_string, &self.named_connection) {
            (Some(connection_string), _) => ConnectionTarget::ConnectionString {
                connection_string,
                provider_name: self.provider_name.as_deref(),
            },
            (None, Some(named_connection)) => ConnectionTarget::Named(named_connection),
            (None, None) => ConnectionTarget::Default,
        }
    }
}
