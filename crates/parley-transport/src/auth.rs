use std::sync::{Mutex, PoisonError};

use crate::wire::AuthTokens;

#[derive(Default)]
struct Tokens {
    access: Option<String>,
    refresh: Option<String>,
}

/// In-memory bearer credentials shared by every request the transport makes.
#[derive(Default)]
pub struct TokenStore {
    tokens: Mutex<Tokens>,
}

impl TokenStore {
    pub fn new(access: Option<String>, refresh: Option<String>) -> Self {
        Self {
            tokens: Mutex::new(Tokens { access, refresh }),
        }
    }

    pub fn access_token(&self) -> Option<String> {
        self.lock().access.clone()
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.lock().refresh.clone()
    }

    /// Store a refreshed pair. A response without a refresh token keeps the
    /// previous one.
    pub fn update(&self, fresh: AuthTokens) {
        let mut tokens = self.lock();
        tokens.access = Some(fresh.access_token);
        if let Some(refresh) = fresh.refresh_token {
            tokens.refresh = Some(refresh);
        }
    }

    pub fn clear(&self) {
        let mut tokens = self.lock();
        tokens.access = None;
        tokens.refresh = None;
    }

    pub fn is_authenticated(&self) -> bool {
        self.lock().access.is_some()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Tokens> {
        self.tokens.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tokens = self.lock();
        f.debug_struct("TokenStore")
            .field("access", &tokens.access.as_ref().map(|_| "<redacted>"))
            .field("refresh", &tokens.refresh.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
