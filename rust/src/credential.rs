use std::sync::{Arc, RwLock};

/// Told when the server rejects the session token. The core never logs out on
/// its own; the host decides what to do.
#[uniffi::export(callback_interface)]
pub trait AuthFailureHook: Send + Sync + 'static {
    fn on_auth_failure(&self, reason: String);
}

pub type SharedAuthFailureHook = Arc<RwLock<Option<Arc<dyn AuthFailureHook>>>>;

/// Bearer token for the current login, shared by the websocket handshake and
/// the settlement client. Cloning shares the same slot.
#[derive(Debug, Clone, Default)]
pub struct SessionCredential {
    token: Arc<RwLock<Option<String>>>,
}

impl SessionCredential {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn initialize(&self, token: &str) {
        let token = Some(token.trim().to_string()).filter(|t| !t.is_empty());
        match self.token.write() {
            Ok(mut slot) => *slot = token,
            Err(poison) => *poison.into_inner() = token,
        }
    }

    pub fn clear(&self) {
        match self.token.write() {
            Ok(mut slot) => *slot = None,
            Err(poison) => *poison.into_inner() = None,
        }
    }

    pub fn bearer(&self) -> Option<String> {
        match self.token.read() {
            Ok(slot) => slot.clone(),
            Err(poison) => poison.into_inner().clone(),
        }
    }

    pub fn is_set(&self) -> bool {
        self.bearer().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_lifecycle() {
        let cred = SessionCredential::new();
        let held = cred.clone();
        assert_eq!(held.bearer(), None);

        cred.initialize(" tok-1 ");
        assert_eq!(held.bearer().as_deref(), Some("tok-1"));

        cred.clear();
        assert!(!held.is_set());

        cred.initialize("   ");
        assert!(!held.is_set());
    }
}
