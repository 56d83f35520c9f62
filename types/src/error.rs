use thiserror::Error;

/// The stable discriminator every caller can branch on without matching
/// every concrete variant (spec §7). Mirrors the way
/// `server/src/error.rs::ServerError` reduces to a `StatusCode` - here we
/// reduce to a taxonomy instead of a wire status, since the admin/transport
/// surfaces that would map it to HTTP are out of scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Request fails syntactic or semantic validation. Caller fixes input.
    Validation,
    /// Referenced entity absent.
    NotFound,
    /// Operation would violate a referential invariant.
    RefConflict,
    /// Concurrent modification detected (stale version/advisory lock timeout).
    Conflict,
    /// Network/store transient failure; safe to retry.
    Transport,
    /// A bug. Always reported, never retried automatically.
    Internal,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("validation failed: {0}")]
    Validation(String),

    /// Distinguished from `Validation` per spec §4.1: the Store surfaces
    /// uniqueness violations (e.g. two CIDRs named the same thing within a
    /// network) under their own discriminator rather than a generic one.
    #[error("duplicate name: {0}")]
    DuplicateName(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("referential conflict: {0}")]
    RefConflict(String),

    #[error("concurrent modification: {0}")]
    Conflict(String),

    #[error("transient transport failure: {0}")]
    Transport(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("database error")]
    Database(#[from] rusqlite::Error),

    #[error("I/O error")]
    Io(#[from] std::io::Error),

    #[error("JSON error")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        use Error::*;
        match self {
            Validation(_) | DuplicateName(_) => ErrorKind::Validation,
            NotFound(_) => ErrorKind::NotFound,
            RefConflict(_) => ErrorKind::RefConflict,
            Conflict(_) => ErrorKind::Conflict,
            Transport(_) | Io(_) => ErrorKind::Transport,
            Internal(_) | Json(_) => ErrorKind::Internal,
            Database(e) => classify_sqlite(e),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    pub fn duplicate_name(msg: impl Into<String>) -> Self {
        Error::DuplicateName(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Error::NotFound(what.into())
    }

    pub fn ref_conflict(msg: impl Into<String>) -> Self {
        Error::RefConflict(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Error::Conflict(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transport)
    }
}

fn classify_sqlite(e: &rusqlite::Error) -> ErrorKind {
    use rusqlite::Error::*;
    match e {
        QueryReturnedNoRows => ErrorKind::NotFound,
        SqliteFailure(code, _)
            if code.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            ErrorKind::Validation
        },
        SqliteFailure(code, _) if code.code == rusqlite::ErrorCode::DatabaseBusy => {
            ErrorKind::Transport
        },
        _ => ErrorKind::Internal,
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_has_validation_kind() {
        assert_eq!(Error::validation("bad cidr").kind(), ErrorKind::Validation);
    }

    #[test]
    fn not_found_maps_from_sqlite() {
        let e: Error = rusqlite::Error::QueryReturnedNoRows.into();
        assert_eq!(e.kind(), ErrorKind::NotFound);
    }
}
