//! Crate Error
//!
//! Each module reports its own `thiserror` enum; [`NetError`] folds them for
//! callers that just want one `Result` type.

use thiserror::Error;

use crate::core::codec::CodecError;
use crate::network::config::ConfigError;
use crate::network::router::RouterError;
use crate::replication::template::CatalogError;
use crate::replication::ReplicationError;

/// Any failure the crate can report.
#[derive(Debug, Error)]
pub enum NetError {
    /// Wire decode failure
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Template catalog load failure
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// Transport refused a send
    #[error(transparent)]
    Router(#[from] RouterError),

    /// Registry or dispatch failure
    #[error(transparent)]
    Replication(#[from] ReplicationError),

    /// Bad configuration
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Crate-wide result alias.
pub type NetResult<T> = Result<T, NetError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(id: i32) -> NetResult<()> {
        let found: Result<(), ReplicationError> = Err(ReplicationError::UnknownEntityReference(id));
        found?;
        Ok(())
    }

    #[test]
    fn test_question_mark_converts() {
        let err = lookup(7).unwrap_err();
        assert!(matches!(err, NetError::Replication(ReplicationError::UnknownEntityReference(7))));
        assert_eq!(err.to_string(), "unknown entity 7");
    }
}
