//! Error types for hotspotd

use std::fmt;
use std::io;
use std::path::PathBuf;

#[derive(Debug)]
pub enum HotspotError {
    /// IO error
    Io(io::Error),
    /// Not running with administrative privilege
    PermissionDenied(String),
    /// Invalid user input
    InvalidParameter(String),
    /// External command could not be launched
    SpawnFailed { cmd: String, reason: String },
    /// External command ran but reported failure
    CommandFailed { cmd: String, code: Option<i32>, output: String },
    /// External command did not finish within its bound
    Timeout { cmd: String, secs: u64 },
    /// Configuration file does not exist
    ConfigNotFound(PathBuf),
    /// Configuration file exists but is not a valid record
    ConfigParse(String),
    /// Configuration could not be written or runtime settings are unusable
    ConfigError(String),
    /// Daemon did not reach or leave the running state
    ServiceError(String),
    /// Interface not found
    InterfaceNotFound(String),
    /// Parse error for OS-provided data
    ParseError(String),
}

impl HotspotError {
    /// Whether this error must abort a running sequence instead of being
    /// recorded as a failed step.
    pub fn is_fatal(&self) -> bool {
        matches!(self, HotspotError::Timeout { .. } | HotspotError::PermissionDenied(_))
    }
}

impl fmt::Display for HotspotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HotspotError::Io(e) => write!(f, "IO error: {}", e),
            HotspotError::PermissionDenied(msg) => write!(f, "Permission denied: {}", msg),
            HotspotError::InvalidParameter(msg) => write!(f, "Invalid parameter: {}", msg),
            HotspotError::SpawnFailed { cmd, reason } => {
                write!(f, "Command '{}' could not be started: {}", cmd, reason)
            }
            HotspotError::CommandFailed { cmd, code, output } => {
                if let Some(code) = code {
                    write!(f, "Command '{}' failed with code {}: {}", cmd, code, output.trim())
                } else {
                    write!(f, "Command '{}' failed: {}", cmd, output.trim())
                }
            }
            HotspotError::Timeout { cmd, secs } => {
                write!(f, "Command '{}' did not finish within {}s", cmd, secs)
            }
            HotspotError::ConfigNotFound(path) => {
                write!(f, "Configuration not found: {}", path.display())
            }
            HotspotError::ConfigParse(msg) => write!(f, "Configuration parse error: {}", msg),
            HotspotError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            HotspotError::ServiceError(msg) => write!(f, "Service error: {}", msg),
            HotspotError::InterfaceNotFound(name) => write!(f, "Interface not found: {}", name),
            HotspotError::ParseError(msg) => write!(f, "Parse error: {}", msg),
        }
    }
}

impl std::error::Error for HotspotError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            HotspotError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for HotspotError {
    fn from(error: io::Error) -> Self {
        HotspotError::Io(error)
    }
}

impl From<toml::de::Error> for HotspotError {
    fn from(error: toml::de::Error) -> Self {
        HotspotError::ConfigParse(error.to_string())
    }
}

impl From<serde_json::Error> for HotspotError {
    fn from(error: serde_json::Error) -> Self {
        HotspotError::ParseError(error.to_string())
    }
}

pub type HotspotResult<T> = Result<T, HotspotError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_timeout_and_privilege_are_fatal() {
        assert!(HotspotError::Timeout { cmd: "iptables -L".into(), secs: 30 }.is_fatal());
        assert!(HotspotError::PermissionDenied("not root".into()).is_fatal());
        assert!(!HotspotError::SpawnFailed { cmd: "hostapd".into(), reason: "missing".into() }
            .is_fatal());
        assert!(!HotspotError::CommandFailed { cmd: "ip".into(), code: Some(2), output: String::new() }
            .is_fatal());
        assert!(!HotspotError::ServiceError("hostapd is not running after launch".into()).is_fatal());
    }

    #[test]
    fn test_command_failed_display() {
        let err = HotspotError::CommandFailed {
            cmd: "iptables -P FORWARD ACCEPT".to_string(),
            code: Some(4),
            output: "iptables: Resource temporarily unavailable.\n".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Command 'iptables -P FORWARD ACCEPT' failed with code 4: iptables: Resource temporarily unavailable."
        );
    }
}
