use std::path::PathBuf;
use thiserror::Error;

/// The central error type for the threatsmith toolkit.
///
/// Core layers (codecs, balancer, integrity checker) report data-shape
/// problems as violation lists and never construct these variants; only
/// infrastructure failures (I/O, network, documents that cannot be parsed
/// at all) travel through here. The CLI boundary maps each class to a
/// process exit code.
#[derive(Error, Debug)]
pub enum ThreatsmithError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Workspace error: {0}")]
    Workspace(#[from] WorkspaceError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("No component initialized")]
    NoComponent,

    #[error("There is already a component. Restart before creating a new one")]
    ComponentExists,

    #[error("Storage error at {path}: {message}")]
    Storage { path: PathBuf, message: String },

    #[error("Template file corrupted: {0}")]
    Corrupted(String),
}

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Failed to parse {format} document: {message}")]
    Parse { format: String, message: String },

    #[error("Schema validation failed:\n{}", .violations.join("\n"))]
    Schema { violations: Vec<String> },

    #[error("Missing sheet '{0}' in workbook")]
    MissingSheet(String),

    #[error("Failed to write {format} document: {message}")]
    Write { format: String, message: String },
}

#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("Request timed out")]
    Timeout,

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Remote returned status {status}: {message}")]
    HttpStatus { status: u16, message: String },

    #[error("Failed to parse remote response: {0}")]
    Parse(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("The generator did not produce a parseable answer after {attempts} attempts")]
    GeneratorExhausted { attempts: usize },
}

#[derive(Error, Debug)]
pub enum WorkspaceError {
    #[error("Version '{0}' not found")]
    VersionNotFound(String),

    #[error("Library '{library}' not found in version '{version}'")]
    LibraryNotFound { version: String, library: String },

    #[error("Version '{0}' already exists")]
    VersionExists(String),

    #[error("Invalid ref '{0}': refs must be alphanumeric with hyphens")]
    InvalidRef(String),

    #[error("Element '{0}' not found")]
    ElementNotFound(String),
}

pub type Result<T> = std::result::Result<T, ThreatsmithError>;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_ERROR: u8 = 1;
pub const EXIT_CONFIG_ERROR: u8 = 2;
pub const EXIT_VALIDATION_ERROR: u8 = 3;
pub const EXIT_REMOTE_ERROR: u8 = 4;

/// Determine the appropriate process exit code for an error.
pub fn get_exit_code(e: &anyhow::Error) -> u8 {
    if let Some(err) = e.downcast_ref::<ThreatsmithError>() {
        return match err {
            ThreatsmithError::Config(_) => EXIT_CONFIG_ERROR,
            ThreatsmithError::Codec(CodecError::Schema { .. }) => EXIT_VALIDATION_ERROR,
            ThreatsmithError::Remote(_) => EXIT_REMOTE_ERROR,
            _ => EXIT_ERROR,
        };
    }

    // Direct enum unwraps fallback
    if e.downcast_ref::<RemoteError>().is_some() {
        return EXIT_REMOTE_ERROR;
    }
    if let Some(CodecError::Schema { .. }) = e.downcast_ref::<CodecError>() {
        return EXIT_VALIDATION_ERROR;
    }

    EXIT_ERROR
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_config_error() {
        let err: anyhow::Error = ThreatsmithError::Config("missing api key".to_string()).into();
        assert_eq!(
            get_exit_code(&err),
            EXIT_CONFIG_ERROR,
            "Config error should yield exit code 2"
        );
    }

    #[test]
    fn test_exit_code_schema_error_wrapped() {
        let err: anyhow::Error = ThreatsmithError::Codec(CodecError::Schema {
            violations: vec!["$.component: 'ref' is a required property".to_string()],
        })
        .into();
        assert_eq!(
            get_exit_code(&err),
            EXIT_VALIDATION_ERROR,
            "Schema violations should yield exit code 3"
        );
    }

    #[test]
    fn test_exit_code_schema_error_direct() {
        let err: anyhow::Error = CodecError::Schema {
            violations: vec!["$.component: 'ref' is a required property".to_string()],
        }
        .into();
        assert_eq!(get_exit_code(&err), EXIT_VALIDATION_ERROR);
    }

    #[test]
    fn test_exit_code_remote_error() {
        let err: anyhow::Error = ThreatsmithError::Remote(RemoteError::Timeout).into();
        assert_eq!(
            get_exit_code(&err),
            EXIT_REMOTE_ERROR,
            "Remote error should yield exit code 4"
        );
    }

    #[test]
    fn test_exit_code_remote_error_direct() {
        let err: anyhow::Error = RemoteError::GeneratorExhausted { attempts: 5 }.into();
        assert_eq!(get_exit_code(&err), EXIT_REMOTE_ERROR);
    }

    #[test]
    fn test_exit_code_store_error() {
        let err: anyhow::Error = ThreatsmithError::Store(StoreError::NoComponent).into();
        assert_eq!(
            get_exit_code(&err),
            EXIT_ERROR,
            "Store error should yield the generic exit code 1"
        );
    }

    #[test]
    fn test_exit_code_parse_error_is_not_validation() {
        // Parse failures are infrastructure problems, not schema gate rejections
        let err: anyhow::Error = CodecError::Parse {
            format: "xml".to_string(),
            message: "unexpected end of document".to_string(),
        }
        .into();
        assert_eq!(get_exit_code(&err), EXIT_ERROR);
    }

    #[test]
    fn test_exit_code_plain_anyhow_default() {
        let err = anyhow::anyhow!("something completely unexpected happened");
        assert_eq!(get_exit_code(&err), EXIT_ERROR);
    }

    #[test]
    fn test_schema_error_message_lists_violations() {
        let err = CodecError::Schema {
            violations: vec![
                "$.component: 'ref' is a required property".to_string(),
                "$.component.name: expected string".to_string(),
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("'ref' is a required property"));
        assert!(msg.contains("expected string"));
    }

    #[test]
    fn test_exit_code_constants() {
        assert_eq!(EXIT_SUCCESS, 0);
        assert_eq!(EXIT_ERROR, 1);
        assert_eq!(EXIT_CONFIG_ERROR, 2);
        assert_eq!(EXIT_VALIDATION_ERROR, 3);
        assert_eq!(EXIT_REMOTE_ERROR, 4);
    }
}
