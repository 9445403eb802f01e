//! Opaque bearer credential.

use std::fmt;

use reqwest::header::HeaderValue;
use zeroize::Zeroizing;

use crate::error::ApiError;

/// A bearer token that cannot be printed, serialized or read back.
///
/// The only way to use the value is through this crate's authorized
/// requests. Memory is wiped on drop.
pub struct Sensitive(Zeroizing<String>);

impl Sensitive {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Zeroizing::new(token.into()))
    }

    /// True when a non-blank token is held. Does not reveal the value.
    pub fn is_present(&self) -> bool {
        !self.0.trim().is_empty()
    }

    /// Builds the `Authorization` header, marked sensitive so HTTP
    /// tooling never logs it.
    pub(crate) fn authorization(&self) -> Result<HeaderValue, ApiError> {
        if !self.is_present() {
            return Err(ApiError::Credential("missing bearer token"));
        }
        let header = Zeroizing::new(format!("Bearer {}", self.0.trim()));
        let mut value = HeaderValue::from_str(&header)
            .map_err(|_| ApiError::Credential("token contains invalid header characters"))?;
        value.set_sensitive(true);
        Ok(value)
    }
}

impl fmt::Debug for Sensitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Sensitive(<redacted>)")
    }
}

impl From<String> for Sensitive {
    fn from(token: String) -> Self {
        Self::new(token)
    }
}

impl From<&str> for Sensitive {
    fn from(token: &str) -> Self {
        Self::new(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_is_redacted() {
        let token = Sensitive::new("super-secret-token");
        let dbg = format!("{token:?}");
        assert!(!dbg.contains("super-secret-token"));
        assert!(dbg.contains("redacted"));
    }

    #[test]
    fn presence_check() {
        assert!(Sensitive::new("abc").is_present());
        assert!(!Sensitive::new("").is_present());
        assert!(!Sensitive::new("   ").is_present());
    }

    #[test]
    fn authorization_header_is_bearer_and_sensitive() {
        let value = Sensitive::new("tok").authorization().unwrap();
        assert!(value.is_sensitive());
        assert_eq!(value.to_str().unwrap(), "Bearer tok");
    }

    #[test]
    fn blank_token_fails_without_revealing_anything() {
        let err = Sensitive::new(" ").authorization().unwrap_err();
        assert!(matches!(err, ApiError::Credential(_)));
    }

    #[test]
    fn invalid_characters_rejected() {
        let err = Sensitive::new("line\nbreak").authorization().unwrap_err();
        assert!(!err.to_string().contains("line"));
    }
}
