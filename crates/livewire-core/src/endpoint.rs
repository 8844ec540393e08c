//! Where a channel connects, and with what.
//!
//! Request target format: `/ws/{user_id}?token={urlencoded token}`

use secrecy::{ExposeSecret, SecretString};

/// Path segment every channel endpoint lives under.
pub const CHANNEL_PATH: &str = "/ws/";

/// User id plus auth token identifying one channel.
#[derive(Debug)]
pub struct Credentials {
    user_id: String,
    token: SecretString,
}

impl Credentials {
    /// Create credentials, rejecting empty parts.
    pub fn new(
        user_id: impl Into<String>,
        token: impl Into<String>,
    ) -> Result<Self, CredentialsError> {
        let user_id = user_id.into();
        let token = token.into();
        if user_id.is_empty() {
            return Err(CredentialsError::MissingUserId);
        }
        if token.is_empty() {
            return Err(CredentialsError::MissingToken);
        }
        Ok(Self {
            user_id,
            token: SecretString::from(token),
        })
    }

    /// Build credentials from optional parts, as handed over by callers that
    /// may not have a session yet.
    pub fn from_parts(
        user_id: Option<&str>,
        token: Option<&str>,
    ) -> Result<Self, CredentialsError> {
        let user_id = user_id.ok_or(CredentialsError::MissingUserId)?;
        let token = token.ok_or(CredentialsError::MissingToken)?;
        Self::new(user_id, token)
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// The raw token. Keep it out of logs.
    pub fn token(&self) -> &str {
        self.token.expose_secret()
    }
}

/// Missing part of a credential pair.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CredentialsError {
    #[error("user id is missing")]
    MissingUserId,
    #[error("auth token is missing")]
    MissingToken,
}

/// Base address of the backend's channel endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    base: String,
}

impl Endpoint {
    /// `base` is a `ws://` or `wss://` origin, optionally with a path prefix.
    pub fn new(base: impl Into<String>) -> Self {
        let mut base = base.into();
        while base.ends_with('/') {
            base.pop();
        }
        Self { base }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    /// Full URL for one user's channel.
    pub fn url_for(&self, credentials: &Credentials) -> String {
        format!(
            "{}{}{}?token={}",
            self.base,
            CHANNEL_PATH,
            urlencoding::encode(credentials.user_id()),
            urlencoding::encode(credentials.token()),
        )
    }

    /// Same as [`Endpoint::url_for`] with the token masked, for logging.
    pub fn redacted_url_for(&self, credentials: &Credentials) -> String {
        format!(
            "{}{}{}?token=***",
            self.base,
            CHANNEL_PATH,
            urlencoding::encode(credentials.user_id()),
        )
    }
}

/// Recover credentials from a handshake request target such as
/// `/ws/42?token=abc`.
pub fn parse_request_target(target: &str) -> Result<Credentials, TargetParseError> {
    let (path, query) = target.split_once('?').unwrap_or((target, ""));

    let user_segment = path
        .strip_prefix(CHANNEL_PATH)
        .ok_or_else(|| TargetParseError::WrongPath(path.to_string()))?;
    if user_segment.is_empty() || user_segment.contains('/') {
        return Err(TargetParseError::WrongPath(path.to_string()));
    }
    let user_id = urlencoding::decode(user_segment)
        .map_err(|_| TargetParseError::BadEncoding)?
        .into_owned();

    let raw_token = query
        .split('&')
        .find_map(|pair| pair.strip_prefix("token="))
        .ok_or(TargetParseError::Credentials(CredentialsError::MissingToken))?;
    // Query strings may encode spaces as '+'.
    let token = urlencoding::decode(&raw_token.replace('+', "%20"))
        .map_err(|_| TargetParseError::BadEncoding)?
        .into_owned();

    Ok(Credentials::new(user_id, token)?)
}

/// Error parsing a handshake request target.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TargetParseError {
    #[error("request path must be /ws/{{user_id}}, got: {0}")]
    WrongPath(String),
    #[error("request target is not valid percent-encoded UTF-8")]
    BadEncoding,
    #[error(transparent)]
    Credentials(#[from] CredentialsError),
}
