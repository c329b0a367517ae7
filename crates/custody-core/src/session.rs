//! Session key: the live, password-derived key held only in memory.
//!
//! At most one key exists per handle. Clones share it, so a handle kept by the
//! host process survives a keyring reload the way a browser session store
//! survives a popup reload. Dropping the key zeroizes it.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use crate::error::CustodyError;
use crate::key::Key;

#[derive(Clone, Default)]
pub struct SessionKey {
    inner: Arc<RwLock<Option<Key>>>,
}

impl SessionKey {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install(&self, key: Key) {
        *self.inner.write() = Some(key);
        info!("session key installed");
    }

    /// Discards the key. The only way secrets become inaccessible again.
    pub fn lock(&self) {
        let had_key = self.inner.write().take().is_some();
        if had_key {
            info!("session key discarded");
        }
    }

    pub fn is_unlocked(&self) -> bool {
        self.inner.read().is_some()
    }

    /// Runs `f` with the key; `Locked` when no session is live.
    pub fn with_key<F, R>(&self, f: F) -> Result<R, CustodyError>
    where
        F: FnOnce(&Key) -> Result<R, CustodyError>,
    {
        let guard = self.inner.read();
        match guard.as_ref() {
            Some(key) => f(key),
            None => Err(CustodyError::Locked),
        }
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKey")
            .field("unlocked", &self.is_unlocked())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KdfParams;
    use crate::sealed_box::SealedBox;

    #[test]
    fn locked_session_refuses_work() {
        let session = SessionKey::new();
        let res = session.with_key(|_| Ok(()));
        assert!(matches!(res, Err(CustodyError::Locked)));
    }

    #[test]
    fn clones_share_the_key_and_the_lock() {
        let session = SessionKey::new();
        let other = session.clone();
        let (key, _) = Key::create("pw", &KdfParams::fast()).unwrap();
        session.install(key);
        let sealed = other.with_key(|k| SealedBox::seal(k, b"x")).unwrap();
        assert!(session
            .with_key(|k| sealed.unseal(k).map(|_| ()))
            .is_ok());
        other.lock();
        assert!(!session.is_unlocked());
    }
}
