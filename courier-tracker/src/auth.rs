use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

/// Opaque bearer credential. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct BearerToken(Box<str>);

impl BearerToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into().into_boxed_str())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BearerToken(..)")
    }
}

/// Holds the current bearer token for the backend.
///
/// Cloning shares the same credential. The login provider installs a token
/// with [`AuthContext::set_token`]; the sync client calls
/// [`AuthContext::invalidate`] when the backend answers `401`. Interested
/// parties observe both through [`AuthContext::subscribe`].
#[derive(Clone)]
pub struct AuthContext {
    token: Arc<watch::Sender<Option<BearerToken>>>,
}

impl AuthContext {
    pub fn new(token: Option<String>) -> Self {
        let (tx, _rx) = watch::channel(token.map(BearerToken::new));
        Self { token: Arc::new(tx) }
    }

    pub fn anonymous() -> Self {
        Self::new(None)
    }

    pub fn bearer(&self) -> Option<BearerToken> {
        self.token.borrow().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.borrow().is_some()
    }

    pub fn set_token(&self, token: impl Into<String>) {
        self.token.send_replace(Some(BearerToken::new(token)));
        info!("Bearer token installed");
    }

    /// Drop the current token. Returns `false` if there was none.
    pub fn invalidate(&self) -> bool {
        let previous = self.token.send_replace(None);
        if previous.is_some() {
            warn!("Bearer token invalidated, re-authentication required");
        }
        previous.is_some()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<BearerToken>> {
        self.token.subscribe()
    }
}

impl fmt::Debug for AuthContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthContext")
            .field("authenticated", &self.is_authenticated())
            .finish()
    }
}
