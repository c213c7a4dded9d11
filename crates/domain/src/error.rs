/// Shared error type used across all LEITL crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("protocol: {0}")]
    Protocol(String),

    #[error("store: {0}")]
    Store(String),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config: {0}")]
    Config(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// `true` for failures a caller may reasonably retry later.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Timeout(_) | Error::Store(_) | Error::Http(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(Error::Timeout("store get".into()).is_transient());
        assert!(Error::Store("unreachable".into()).is_transient());
        assert!(!Error::Auth("bad password".into()).is_transient());
        assert!(!Error::InvalidRequest("agent_name".into()).is_transient());
    }

    #[test]
    fn display_includes_kind() {
        let e = Error::NotFound("leitl-abc".into());
        assert_eq!(e.to_string(), "not found: leitl-abc");
    }
}
