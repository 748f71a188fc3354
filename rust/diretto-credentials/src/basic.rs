use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// A username and password decoded from a Basic `Authorization` header.
#[derive(Clone, PartialEq, Eq)]
pub struct BasicCredentials {
    /// The claimed username
    pub username: String,
    /// The presented password
    pub password: String,
}

impl BasicCredentials {
    /// Credentials for `username`
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Decode `Basic <base64(username:password)>`.
    ///
    /// The password is everything after the first colon, so it may itself
    /// contain colons. Returns `None` for any other scheme, invalid base64,
    /// non-UTF-8 contents or a payload without a colon.
    pub fn parse(header: &str) -> Option<Self> {
        let (scheme, encoded) = header.split_once(char::is_whitespace)?;
        if scheme != "Basic" || encoded.is_empty() {
            return None;
        }
        if !encoded
            .bytes()
            .all(|byte| byte.is_ascii_alphanumeric() || matches!(byte, b'+' | b'/' | b'='))
        {
            return None;
        }

        let decoded = STANDARD.decode(encoded).ok()?;
        let decoded = String::from_utf8(decoded).ok()?;
        let (username, password) = decoded.split_once(':')?;

        Some(Self {
            username: username.to_string(),
            password: password.to_string(),
        })
    }

    /// Encode these credentials as a Basic `Authorization` header value.
    pub fn to_header(&self) -> String {
        format!(
            "Basic {}",
            STANDARD.encode(format!("{}:{}", self.username, self.password))
        )
    }
}

impl std::fmt::Debug for BasicCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicCredentials")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}
