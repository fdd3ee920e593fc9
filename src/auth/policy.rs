use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use subtle::ConstantTimeEq;
use tracing::debug;
use zeroize::Zeroizing;

use super::tokens::TokenStore;

/// Kind of credential an endpoint is willing to accept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Identity {
    AccessToken,
    SessionToken,
    SourceToken,
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::AccessToken => write!(f, "AccessToken"),
            Identity::SessionToken => write!(f, "SessionToken"),
            Identity::SourceToken => write!(f, "SourceToken"),
        }
    }
}

/// Credentials presented by a caller, in whatever combination they arrived
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub session_token: Option<String>,
    #[serde(default)]
    pub source_token: Option<String>,
}

impl Credentials {
    /// Pick credential fields out of a JSON object, ignoring non-string values
    pub fn from_json_object(object: &serde_json::Map<String, serde_json::Value>) -> Self {
        let field = |name: &str| {
            object
                .get(name)
                .and_then(serde_json::Value::as_str)
                .map(str::to_string)
        };
        Credentials {
            access_token: field("accessToken"),
            session_token: field("sessionToken"),
            source_token: field("sourceToken"),
        }
    }

    /// Read credentials from a URL query string
    pub fn from_query(query: &str) -> Self {
        let mut credentials = Credentials::default();
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            let slot = match key.as_ref() {
                "accessToken" => &mut credentials.access_token,
                "sessionToken" => &mut credentials.session_token,
                "sourceToken" => &mut credentials.source_token,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(value.into_owned());
            }
        }
        credentials
    }

    /// Fill any missing credential from `fallback`
    pub fn or(self, fallback: Credentials) -> Credentials {
        Credentials {
            access_token: self.access_token.or(fallback.access_token),
            session_token: self.session_token.or(fallback.session_token),
            source_token: self.source_token.or(fallback.source_token),
        }
    }
}

/// Outcome of an authorization check.
///
/// `expires_in_ms` is only set when a session token granted access and
/// tells the caller how long the grant lasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthorizationResult {
    pub authorized: bool,
    pub expires_in_ms: Option<i64>,
}

impl AuthorizationResult {
    pub const DENIED: Self = Self {
        authorized: false,
        expires_in_ms: None,
    };

    pub const GRANTED: Self = Self {
        authorized: true,
        expires_in_ms: None,
    };
}

/// Decides whether presented credentials satisfy an endpoint's allowed identities
pub struct AuthenticationPolicy {
    required: bool,
    source_token: Option<Zeroizing<String>>,
    tokens: Arc<TokenStore>,
}

impl fmt::Debug for AuthenticationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthenticationPolicy")
            .field("required", &self.required)
            .field("source_token", &self.source_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl AuthenticationPolicy {
    pub fn new(required: bool, source_token: Option<String>, tokens: Arc<TokenStore>) -> Self {
        Self {
            required,
            source_token: source_token.filter(|t| !t.is_empty()).map(Zeroizing::new),
            tokens,
        }
    }

    pub fn tokens(&self) -> &Arc<TokenStore> {
        &self.tokens
    }

    /// Evaluate `credentials` against `allowed`, first match wins.
    ///
    /// Identities are tried in a fixed order: access token, session token,
    /// source token. When authentication is disabled every request passes.
    pub fn authorize(&self, credentials: &Credentials, allowed: &[Identity]) -> AuthorizationResult {
        if !self.required {
            return AuthorizationResult::GRANTED;
        }

        if allowed.contains(&Identity::AccessToken)
            && self
                .tokens
                .access_token_valid(credentials.access_token.as_deref())
        {
            debug!(identity = %Identity::AccessToken, "Request authorized");
            return AuthorizationResult::GRANTED;
        }

        if allowed.contains(&Identity::SessionToken) {
            let session = credentials.session_token.as_deref();
            if self.tokens.session_token_valid(session)
                && let Some(expiry) = self.tokens.session_token_expiry(session)
            {
                let expires_in_ms = expiry - self.tokens.now_ms();
                debug!(identity = %Identity::SessionToken, expires_in_ms, "Request authorized");
                return AuthorizationResult {
                    authorized: true,
                    expires_in_ms: Some(expires_in_ms),
                };
            }
        }

        if allowed.contains(&Identity::SourceToken)
            && self.source_token_matches(credentials.source_token.as_deref())
        {
            debug!(identity = %Identity::SourceToken, "Request authorized");
            return AuthorizationResult::GRANTED;
        }

        debug!(?allowed, "Request denied");
        AuthorizationResult::DENIED
    }

    fn source_token_matches(&self, presented: Option<&str>) -> bool {
        match (self.source_token.as_deref(), presented) {
            (Some(expected), Some(presented)) => {
                bool::from(expected.as_bytes().ct_eq(presented.as_bytes()))
            }
            _ => false,
        }
    }
}
