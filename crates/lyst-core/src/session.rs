//! Signed-in state and change notification.
//!
//! `SessionTracker` is created once per process and handed to whoever needs
//! it. Listeners run synchronously on the thread that changed the session,
//! outside the internal lock, so a listener may read the tracker again.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};

use crate::error::AuthError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub uid: String,

    #[serde(default)]
    pub email: Option<String>,

    #[serde(default)]
    pub display_name: Option<String>,
}

impl User {
    pub fn label(&self) -> &str {
        self.display_name
            .as_deref()
            .or(self.email.as_deref())
            .unwrap_or(&self.uid)
    }
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Session persisted by an earlier run, if any.
    async fn restore(&self) -> Result<Option<User>, AuthError>;

    async fn sign_in(&self) -> Result<User, AuthError>;

    async fn sign_out(&self) -> Result<(), AuthError>;

    /// Short-lived bearer token for `user`. Providers may refresh here.
    async fn id_token(&self, user: &User) -> Result<String, AuthError>;
}

pub type Listener = Arc<dyn Fn(Option<&User>) + Send + Sync>;

struct Inner {
    current: Option<User>,
    listeners: Vec<(u64, Listener)>,
    next_listener_id: u64,
}

pub struct SessionTracker {
    provider: Arc<dyn IdentityProvider>,
    inner: Mutex<Inner>,
}

/// Keeps a listener registered. Dropping it unsubscribes.
pub struct Subscription {
    tracker: Weak<SessionTracker>,
    id: u64,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(tracker) = self.tracker.upgrade() {
            tracker.remove_listener(self.id);
        }
    }
}

impl SessionTracker {
    pub fn new(provider: Arc<dyn IdentityProvider>) -> Arc<Self> {
        Arc::new(Self {
            provider,
            inner: Mutex::new(Inner {
                current: None,
                listeners: Vec::new(),
                next_listener_id: 0,
            }),
        })
    }

    /// Restores a persisted session and announces the initial state.
    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<Option<User>, AuthError> {
        let restored = match self.provider.restore().await {
            Ok(user) => user,
            Err(err) => {
                error!(error = %err, "failed to restore session");
                self.set_current(None);
                return Err(err);
            }
        };

        match restored.as_ref() {
            Some(user) => info!(uid = %user.uid, "restored session"),
            None => debug!("no persisted session"),
        }
        self.set_current(restored.clone());
        Ok(restored)
    }

    pub fn current_user(&self) -> Option<User> {
        self.inner.lock().current.clone()
    }

    pub fn is_signed_in(&self) -> bool {
        self.inner.lock().current.is_some()
    }

    pub fn subscribe<F>(self: &Arc<Self>, listener: F) -> Subscription
    where
        F: Fn(Option<&User>) + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock();
        let id = inner.next_listener_id;
        inner.next_listener_id += 1;
        inner.listeners.push((id, Arc::new(listener)));
        debug!(listener = id, total = inner.listeners.len(), "session listener added");

        Subscription {
            tracker: Arc::downgrade(self),
            id,
        }
    }

    #[instrument(skip(self))]
    pub async fn sign_in(&self) -> Result<User, AuthError> {
        match self.provider.sign_in().await {
            Ok(user) => {
                info!(uid = %user.uid, "user signed in");
                self.set_current(Some(user.clone()));
                Ok(user)
            }
            Err(err) => {
                error!(error = %err, "error signing in");
                Err(err)
            }
        }
    }

    #[instrument(skip(self))]
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        if let Err(err) = self.provider.sign_out().await {
            error!(error = %err, "sign out error");
            return Err(err);
        }

        info!("signed out successfully");
        self.set_current(None);
        Ok(())
    }

    /// Fetches a fresh bearer token for the current user.
    ///
    /// A `SessionExpired` answer from the provider ends the session and
    /// notifies listeners.
    #[instrument(skip(self))]
    pub async fn id_token(&self) -> Result<String, AuthError> {
        let user = self.current_user().ok_or(AuthError::NotSignedIn)?;

        match self.provider.id_token(&user).await {
            Ok(token) => Ok(token),
            Err(AuthError::SessionExpired) => {
                warn!(uid = %user.uid, "session invalidated by provider");
                self.set_current(None);
                Err(AuthError::SessionExpired)
            }
            Err(err) => Err(err),
        }
    }

    fn set_current(&self, user: Option<User>) {
        let listeners: Vec<Listener> = {
            let mut inner = self.inner.lock();
            inner.current = user.clone();
            inner.listeners.iter().map(|(_, l)| Arc::clone(l)).collect()
        };

        debug!(
            signed_in = user.is_some(),
            listeners = listeners.len(),
            "notifying session listeners"
        );
        for listener in listeners {
            listener(user.as_ref());
        }
    }

    fn remove_listener(&self, id: u64) {
        let mut inner = self.inner.lock();
        inner.listeners.retain(|(listener_id, _)| *listener_id != id);
        debug!(listener = id, total = inner.listeners.len(), "session listener removed");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct FakeProvider {
        persisted: Option<User>,
        token: Mutex<Result<String, ()>>,
        fail_sign_in: bool,
    }

    impl FakeProvider {
        fn new() -> Self {
            Self {
                persisted: None,
                token: Mutex::new(Ok("tok".to_string())),
                fail_sign_in: false,
            }
        }
    }

    #[async_trait]
    impl IdentityProvider for FakeProvider {
        async fn restore(&self) -> Result<Option<User>, AuthError> {
            Ok(self.persisted.clone())
        }

        async fn sign_in(&self) -> Result<User, AuthError> {
            if self.fail_sign_in {
                return Err(AuthError::Cancelled);
            }
            Ok(user("u1"))
        }

        async fn sign_out(&self) -> Result<(), AuthError> {
            Ok(())
        }

        async fn id_token(&self, _user: &User) -> Result<String, AuthError> {
            self.token
                .lock()
                .clone()
                .map_err(|()| AuthError::SessionExpired)
        }
    }

    fn user(uid: &str) -> User {
        User {
            uid: uid.to_string(),
            email: Some(format!("{uid}@example.com")),
            display_name: None,
        }
    }

    fn recorder(tracker: &Arc<SessionTracker>) -> (Arc<Mutex<Vec<Option<String>>>>, Subscription) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let sub = tracker.subscribe(move |user| {
            sink.lock().push(user.map(|u| u.uid.clone()));
        });
        (seen, sub)
    }

    #[tokio::test]
    async fn sign_in_and_out_notify_synchronously() {
        let tracker = SessionTracker::new(Arc::new(FakeProvider::new()));
        let (seen, _sub) = recorder(&tracker);

        tracker.sign_in().await.expect("sign in");
        assert_eq!(seen.lock().as_slice(), &[Some("u1".to_string())]);
        assert!(tracker.is_signed_in());

        tracker.sign_out().await.expect("sign out");
        assert_eq!(seen.lock().as_slice(), &[Some("u1".to_string()), None]);
        assert!(tracker.current_user().is_none());
    }

    #[tokio::test]
    async fn failed_sign_in_leaves_state_untouched() {
        let mut provider = FakeProvider::new();
        provider.fail_sign_in = true;
        let tracker = SessionTracker::new(Arc::new(provider));
        let (seen, _sub) = recorder(&tracker);

        let err = tracker.sign_in().await.expect_err("cancelled");
        assert!(matches!(err, AuthError::Cancelled));
        assert!(seen.lock().is_empty());
        assert!(!tracker.is_signed_in());
    }

    #[tokio::test]
    async fn start_announces_restored_user() {
        let mut provider = FakeProvider::new();
        provider.persisted = Some(user("saved"));
        let tracker = SessionTracker::new(Arc::new(provider));
        let (seen, _sub) = recorder(&tracker);

        let restored = tracker.start().await.expect("start");
        assert_eq!(restored.map(|u| u.uid), Some("saved".to_string()));
        assert_eq!(seen.lock().as_slice(), &[Some("saved".to_string())]);
    }

    #[tokio::test]
    async fn dropped_subscription_stops_notifications() {
        let tracker = SessionTracker::new(Arc::new(FakeProvider::new()));
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let sub = tracker.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tracker.sign_in().await.expect("sign in");
        sub.unsubscribe();
        tracker.sign_out().await.expect("sign out");

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn id_token_requires_user() {
        let tracker = SessionTracker::new(Arc::new(FakeProvider::new()));
        let err = tracker.id_token().await.expect_err("signed out");
        assert!(matches!(err, AuthError::NotSignedIn));

        tracker.sign_in().await.expect("sign in");
        assert_eq!(tracker.id_token().await.expect("token"), "tok");
    }

    #[tokio::test]
    async fn expired_session_signs_user_out() {
        let provider = Arc::new(FakeProvider::new());
        let tracker = SessionTracker::new(provider.clone());
        tracker.sign_in().await.expect("sign in");
        let (seen, _sub) = recorder(&tracker);

        *provider.token.lock() = Err(());
        let err = tracker.id_token().await.expect_err("expired");

        assert!(matches!(err, AuthError::SessionExpired));
        assert!(!tracker.is_signed_in());
        assert_eq!(seen.lock().as_slice(), &[None]);
    }
}
