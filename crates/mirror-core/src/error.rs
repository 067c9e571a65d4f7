use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Errors produced by the mirroring subsystem.
///
/// Cloneable so one failure can be reported on the error stream and returned
/// from the control call that caused it.
#[derive(Debug, Clone, Error)]
pub enum MirrorError {
    #[error("cannot prepare capture folder {}: {reason}", .path.display())]
    Directory { path: PathBuf, reason: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("{component} error: {message}")]
    Collaborator {
        component: &'static str,
        message: String,
    },

    #[error("{action}. No mirror session found for: {key}")]
    NoSession { action: &'static str, key: String },

    #[error("config error: {0}")]
    Config(String),

    #[error("mirror worker is not running")]
    WorkerGone,

    #[error("io error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("{0}")]
    Other(String),
}

impl MirrorError {
    /// Error raised by a relay, writer or scene-switch collaborator.
    pub fn collaborator(component: &'static str, message: impl Into<String>) -> Self {
        MirrorError::Collaborator {
            component,
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for MirrorError {
    fn from(e: std::io::Error) -> Self {
        MirrorError::Io(Arc::new(e))
    }
}

pub type MirrorResult<T> = Result<T, MirrorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_session_message_names_the_action_and_key() {
        let err = MirrorError::NoSession {
            action: "Error disconnecting",
            key: "10.0.0.5".into(),
        };
        assert_eq!(
            err.to_string(),
            "Error disconnecting. No mirror session found for: 10.0.0.5"
        );
    }

    #[test]
    fn directory_error_shows_path() {
        let err = MirrorError::Directory {
            path: PathBuf::from("/cap"),
            reason: "permission denied".into(),
        };
        assert_eq!(
            err.to_string(),
            "cannot prepare capture folder /cap: permission denied"
        );
    }

    #[test]
    fn io_errors_convert_and_clone() {
        let err: MirrorError = std::io::Error::new(std::io::ErrorKind::Other, "boom").into();
        let copy = err.clone();
        assert_eq!(copy.to_string(), "io error: boom");
    }
}
