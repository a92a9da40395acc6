//! Config snapshot: the two named selectors reconfiguration can change.

use std::fmt;
use std::path::Path;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};

/// Which transaction logger backend is active.
///
/// `Unknown` preserves the original string so the caller can report it;
/// constructing a logger from `Unknown` fails fast (see
/// `cloudkv_server::logger::build`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoggerKind {
    File,
    Psql,
    Unknown(String),
}

impl fmt::Display for LoggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File => write!(f, "File"),
            Self::Psql => write!(f, "PSQL"),
            Self::Unknown(s) => write!(f, "{s}"),
        }
    }
}

impl From<&str> for LoggerKind {
    fn from(s: &str) -> Self {
        match s {
            "File" => Self::File,
            "PSQL" => Self::Psql,
            other => Self::Unknown(other.to_string()),
        }
    }
}

/// Which frontend wire surface is active.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrontendKind {
    Rest,
    Grpc,
    Unknown(String),
}

impl fmt::Display for FrontendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rest => write!(f, "REST"),
            Self::Grpc => write!(f, "GRPC"),
            Self::Unknown(s) => write!(f, "{s}"),
        }
    }
}

impl From<&str> for FrontendKind {
    fn from(s: &str) -> Self {
        match s {
            "REST" => Self::Rest,
            "GRPC" => Self::Grpc,
            other => Self::Unknown(other.to_string()),
        }
    }
}

macro_rules! impl_string_serde {
    ($ty:ty) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                Ok(Self::from(s.as_str()))
            }
        }
    };
}

impl_string_serde!(LoggerKind);
impl_string_serde!(FrontendKind);

/// Immutable reconfiguration value. A new snapshot is produced every time
/// the config file changes; the old one is simply dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    pub logger: LoggerKind,
    pub frontend: FrontendKind,
}

impl Default for ConfigSnapshot {
    /// `{"logger":"File","frontend":"REST"}` — used when the config file is
    /// absent.
    fn default() -> Self {
        Self {
            logger: LoggerKind::File,
            frontend: FrontendKind::Rest,
        }
    }
}

/// Errors parsing a config snapshot from disk.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("parsing config file: {0}")]
    Parse(#[from] serde_json::Error),
}

impl ConfigSnapshot {
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(contents)?)
    }

    /// Reads and parses the config file at `path`. Returns
    /// [`ConfigSnapshot::default`] if the file does not exist — creating it
    /// is the binary's bootstrapping job, not this function's.
    pub fn read(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::parse(&contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_file_and_rest() {
        let snapshot = ConfigSnapshot::default();
        assert_eq!(snapshot.logger, LoggerKind::File);
        assert_eq!(snapshot.frontend, FrontendKind::Rest);
    }

    #[test]
    fn parses_both_known_values() {
        let snapshot = ConfigSnapshot::parse(r#"{"logger":"PSQL","frontend":"GRPC"}"#).unwrap();
        assert_eq!(snapshot.logger, LoggerKind::Psql);
        assert_eq!(snapshot.frontend, FrontendKind::Grpc);
    }

    #[test]
    fn unknown_values_become_neutral_sentinel() {
        let snapshot = ConfigSnapshot::parse(r#"{"logger":"Mongo","frontend":"SOAP"}"#).unwrap();
        assert_eq!(snapshot.logger, LoggerKind::Unknown("Mongo".to_string()));
        assert_eq!(snapshot.frontend, FrontendKind::Unknown("SOAP".to_string()));
    }

    #[test]
    fn read_missing_file_returns_default() {
        let path = std::path::Path::new("/nonexistent/cloudkv-config-test.json");
        let snapshot = ConfigSnapshot::read(path).unwrap();
        assert_eq!(snapshot, ConfigSnapshot::default());
    }

    #[test]
    fn read_roundtrips_through_a_real_file() {
        let dir = std::env::temp_dir().join(format!(
            "cloudkv-config-test-{}",
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.json");
        std::fs::write(&path, r#"{"logger":"File","frontend":"GRPC"}"#).unwrap();

        let snapshot = ConfigSnapshot::read(&path).unwrap();
        assert_eq!(snapshot.logger, LoggerKind::File);
        assert_eq!(snapshot.frontend, FrontendKind::Grpc);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn serialize_round_trips() {
        let snapshot = ConfigSnapshot {
            logger: LoggerKind::Psql,
            frontend: FrontendKind::Rest,
        };
        let json = serde_json::to_string(&snapshot).unwrap();
        let parsed = ConfigSnapshot::parse(&json).unwrap();
        assert_eq!(snapshot, parsed);
    }
}
