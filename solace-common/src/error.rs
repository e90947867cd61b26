//! Shared startup error type.
//!
//! Request-level failures in the gateway have their own types; this one covers
//! what can stop the relay from coming up.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Unusable configuration, such as a listen host that is not an IP address.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A component could not be constructed.
    #[error("Internal error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_names_the_category() {
        let err = Error::Config("invalid server.host \"localhost:3000\"".into());
        assert!(err.to_string().starts_with("Configuration error:"));

        let err = Error::Internal("Failed to build HTTP client".into());
        assert_eq!(err.to_string(), "Internal error: Failed to build HTTP client");
    }

    #[test]
    fn test_converts_into_anyhow() {
        fn start() -> anyhow::Result<()> {
            Err(Error::Config("bad host".into()))?;
            Ok(())
        }
        let err = start().unwrap_err();
        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::Config(_))));
    }
}
