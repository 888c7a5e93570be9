use thiserror::Error;

/// The abstract error taxonomy of the runtime.
///
/// Every fallible operation below `cli::commands` returns one of these
/// variants rather than a raw `errno`; the textual form of the underlying
/// syscall failure is preserved in the message for logs, but callers should
/// match on the variant, not parse the string.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("memory error: {0}")]
    Memory(String),

    #[error("namespace error: {0}")]
    Namespace(String),

    #[error("cgroup error: {0}")]
    Cgroup(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("process error: {0}")]
    Process(String),

    #[error("permission denied: {0}")]
    Permission(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    Invalid(String),

    #[error("already exists: {0}")]
    Exists(String),

    #[error("I/O error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, RuntimeError>;

impl From<std::io::Error> for RuntimeError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => RuntimeError::NotFound(e.to_string()),
            std::io::ErrorKind::PermissionDenied => RuntimeError::Permission(e.to_string()),
            std::io::ErrorKind::AlreadyExists => RuntimeError::Exists(e.to_string()),
            _ => RuntimeError::Io(e.to_string()),
        }
    }
}

impl From<nix::Error> for RuntimeError {
    fn from(e: nix::Error) -> Self {
        match e {
            nix::Error::EPERM | nix::Error::EACCES => RuntimeError::Permission(e.to_string()),
            nix::Error::ENOENT => RuntimeError::NotFound(e.to_string()),
            nix::Error::EEXIST => RuntimeError::Exists(e.to_string()),
            nix::Error::EINVAL => RuntimeError::Invalid(e.to_string()),
            _ => RuntimeError::Io(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for RuntimeError {
    fn from(e: serde_json::Error) -> Self {
        RuntimeError::Invalid(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variants_format_with_kind_prefix() {
        assert_eq!(
            RuntimeError::NotFound("container abc".into()).to_string(),
            "not found: container abc"
        );
        assert_eq!(
            RuntimeError::Cgroup("no controllers".into()).to_string(),
            "cgroup error: no controllers"
        );
    }

    #[test]
    fn io_not_found_maps_to_not_found_variant() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: RuntimeError = io_err.into();
        assert!(matches!(err, RuntimeError::NotFound(_)));
    }

    #[test]
    fn nix_eexist_maps_to_exists_variant() {
        let err: RuntimeError = nix::Error::EEXIST.into();
        assert!(matches!(err, RuntimeError::Exists(_)));
    }
}
