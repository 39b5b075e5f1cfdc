use dbconn_core::Error;
use std::path::PathBuf;
use std::time::Duration;

/// How the database file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    ReadOnly,
    ReadWrite,
    ReadWriteCreate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Memory,
    File(PathBuf),
}

/// A parsed SQLite connection string.
///
/// The following forms are accepted:
/// - `:memory:`
/// - a plain file path: `/var/lib/app/app.db`
/// - key/value pairs: `Data Source=app.db;Mode=ReadOnly;Default Timeout=5`
/// - an URI: `sqlite:///var/lib/app/app.db?mode=ro&busy_timeout=500` or `sqlite:///:memory:`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqliteConnectionString {
    pub location: Location,
    pub mode: OpenMode,
    pub busy_timeout: Option<Duration>,
}

/// The name of the in-memory database.
pub const IN_MEMORY: &str = ":memory:";

/// The path in a URI for in-memory databases.
pub const IN_MEMORY_URI_PATH: &str = "/:memory:";

/// The URI for in-memory databases.
pub const IN_MEMORY_URI: &str = "sqlite:///:memory:";

fn invalid(connection_string: &str, reason: &str) -> Error {
    Error::InvalidArgument {
        name: "connection_string",
        reason: format!("{} (connection string: '{}')", reason, connection_string),
    }
}

impl SqliteConnectionString {
    pub fn parse(connection_string: &str) -> Result<Self, Error> {
        let connection_string = connection_string.trim();
        if connection_string.is_empty() {
            return Err(Error::ArgumentNull { name: "connection_string" });
        }
        if connection_string.starts_with("sqlite:") {
            Self::parse_uri(connection_string)
        } else if connection_string.contains('=') {
            Self::parse_key_values(connection_string)
        } else {
            Ok(Self::for_location(Self::location(connection_string)))
        }
    }

    fn for_location(location: Location) -> Self {
        Self { location, mode: OpenMode::ReadWriteCreate, busy_timeout: None }
    }

    fn location(path: &str) -> Location {
        match path {
            IN_MEMORY => Location::Memory,
            path => Location::File(PathBuf::from(path)),
        }
    }

    fn parse_uri(connection_string: &str) -> Result<Self, Error> {
        let uri = url::Url::parse(connection_string).map_err(|e| invalid(connection_string, &e.to_string()))?;
        let mut result = match uri.path() {
            IN_MEMORY_URI_PATH => Self::for_location(Location::Memory),
            "" | "/" => return Err(invalid(connection_string, "Missing database path")),
            path => Self::for_location(Location::File(PathBuf::from(path))),
        };
        for (key, value) in uri.query_pairs() {
            match key.as_ref() {
                "mode" => {
                    result.mode = match value.as_ref() {
                        "ro" => OpenMode::ReadOnly,
                        "rw" => OpenMode::ReadWrite,
                        "rwc" => OpenMode::ReadWriteCreate,
                        "memory" => {
                            result.location = Location::Memory;
                            OpenMode::ReadWriteCreate
                        }
                        _ => return Err(invalid(connection_string, "Invalid mode")),
                    }
                }
                "busy_timeout" => {
                    let millis = value.parse::<u64>().map_err(|_| invalid(connection_string, "Invalid busy_timeout"))?;
                    result.busy_timeout = Some(Duration::from_millis(millis));
                }
                _ => return Err(invalid(connection_string, &format!("Unsupported parameter '{}'", key))),
            }
        }
        Ok(result)
    }

    fn parse_key_values(connection_string: &str) -> Result<Self, Error> {
        let mut location = None;
        let mut mode = OpenMode::ReadWriteCreate;
        let mut busy_timeout = None;
        for pair in connection_string.split(';').map(str::trim).filter(|pair| !pair.is_empty()) {
            let (key, value) =
                pair.split_once('=').ok_or_else(|| invalid(connection_string, "Expecting 'key=value' pairs"))?;
            let value = value.trim();
            match key.trim().to_lowercase().as_str() {
                "data source" | "datasource" | "filename" => location = Some(Self::location(value)),
                "mode" => {
                    mode = match value.to_lowercase().as_str() {
                        "readonly" => OpenMode::ReadOnly,
                        "readwrite" => OpenMode::ReadWrite,
                        "readwritecreate" => OpenMode::ReadWriteCreate,
                        "memory" => {
                            location = Some(Location::Memory);
                            OpenMode::ReadWriteCreate
                        }
                        _ => return Err(invalid(connection_string, "Invalid mode")),
                    }
                }
                "default timeout" | "defaulttimeout" => {
                    let seconds =
                        value.parse::<u64>().map_err(|_| invalid(connection_string, "Invalid default timeout"))?;
                    busy_timeout = Some(Duration::from_secs(seconds));
                }
                _ => return Err(invalid(connection_string, &format!("Unsupported keyword '{}'", key.trim()))),
            }
        }
        match location {
            Some(location) => Ok(Self { location, mode, busy_timeout }),
            None => Err(invalid(connection_string, "Missing data source")),
        }
    }
}
