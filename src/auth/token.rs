//! Simple-token provider: opaque `prefix.index` tokens mapped to user names.

use std::collections::BTreeMap;
use std::time::Duration;

pub const TOKEN_TYPE_SIMPLE: &str = "simple";
pub const DEFAULT_SIMPLE_TOKEN_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("auth: unknown token type {0:?}")]
    UnknownTokenType(String),
    #[error("auth: token TTL must be positive")]
    ZeroTtl,
}

#[derive(Debug)]
pub struct TokenProvider {
    enabled: bool,
    ttl: Duration,
    tokens: BTreeMap<String, String>,
}

impl TokenProvider {
    pub fn new(token_type: &str, ttl: Duration) -> Result<Self, TokenError> {
        if token_type != TOKEN_TYPE_SIMPLE {
            return Err(TokenError::UnknownTokenType(token_type.to_owned()));
        }
        if ttl.is_zero() {
            return Err(TokenError::ZeroTtl);
        }
        Ok(TokenProvider { enabled: false, ttl, tokens: BTreeMap::new() })
    }

    pub fn enable(&mut self) {
        tracing::debug!(ttl_secs = self.ttl.as_secs(), "simple token provider enabled");
        self.enabled = true;
    }

    /// Disabling drops every issued token.
    pub fn disable(&mut self) {
        self.enabled = false;
        self.tokens.clear();
    }

    /// Binds `prefix.index` to `username` and returns the token.
    ///
    /// # Panics
    /// When the token is already bound; a prefix is used at most once per index.
    pub fn assign(&mut self, prefix: &str, index: u64, username: &str) -> String {
        let token = format!("{prefix}.{index}");
        if self.tokens.contains_key(&token) {
            tracing::error!(user = username, "simple token already in use");
            panic!("failed to assign already-used simple token to a user");
        }
        self.tokens.insert(token.clone(), username.to_owned());
        token
    }

    /// Drops every token issued to `username`.
    pub fn invalidate_user(&mut self, username: &str) {
        self.tokens.retain(|_, user| user != username);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> TokenProvider {
        TokenProvider::new(TOKEN_TYPE_SIMPLE, DEFAULT_SIMPLE_TOKEN_TTL).unwrap()
    }

    fn user_of<'a>(tp: &'a TokenProvider, token: &str) -> Option<&'a str> {
        tp.tokens.get(token).map(String::as_str)
    }

    #[test]
    fn rejects_unknown_type_and_zero_ttl() {
        assert_eq!(
            TokenProvider::new("jwt", DEFAULT_SIMPLE_TOKEN_TTL).unwrap_err(),
            TokenError::UnknownTokenType("jwt".into())
        );
        assert_eq!(TokenProvider::new(TOKEN_TYPE_SIMPLE, Duration::ZERO).unwrap_err(), TokenError::ZeroTtl);
    }

    #[test]
    fn assigned_token_is_bound_until_user_is_invalidated() {
        let mut tp = provider();
        let token = tp.assign("abc", 7, "alice");
        assert_eq!(token, "abc.7");
        assert_eq!(user_of(&tp, &token), Some("alice"));
        tp.invalidate_user("alice");
        assert_eq!(user_of(&tp, &token), None);
    }

    #[test]
    fn disabling_drops_tokens() {
        let mut tp = provider();
        tp.enable();
        let token = tp.assign("abc", 1, "alice");
        tp.disable();
        assert!(!tp.is_enabled());
        assert_eq!(user_of(&tp, &token), None);
        // The same prefix and index can be bound again.
        tp.assign("abc", 1, "bob");
    }

    #[test]
    #[should_panic(expected = "already-used simple token")]
    fn reusing_a_token_panics() {
        let mut tp = provider();
        tp.assign("abc", 1, "alice");
        tp.assign("abc", 1, "bob");
    }
}
