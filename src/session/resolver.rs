// src/session/resolver.rs
//! Current identity and role, derived from provider session state

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::claims::{Role, Session};
use crate::core::config_manager::ConfigManager;
use crate::core::observable::{lock, Observable, Subscription};
use crate::core::service_client::ServiceClient;
use crate::utils::validate_id;

/// Source of the session persisted by the identity provider.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn load_session(&self) -> anyhow::Result<Option<Session>>;
}

/// Provider backed by a token handed over through configuration.
pub struct StaticTokenProvider {
    token: Option<String>,
}

impl StaticTokenProvider {
    pub fn new(token: Option<String>) -> Self {
        Self { token }
    }

    pub fn from_config(config: &ConfigManager) -> Self {
        Self::new(config.service.access_token.clone())
    }
}

#[async_trait]
impl IdentityProvider for StaticTokenProvider {
    async fn load_session(&self) -> anyhow::Result<Option<Session>> {
        self.token
            .as_deref()
            .map(Session::from_access_token)
            .transpose()
    }
}

#[derive(Debug, Clone)]
pub enum AuthEvent {
    InitialSession(Option<Session>),
    SignedIn(Session),
    TokenRefreshed(Session),
    SignedOut,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub email: Option<String>,
}

impl From<&Session> for Identity {
    fn from(session: &Session) -> Self {
        Self {
            user_id: session.user_id.clone(),
            email: session.email.clone(),
        }
    }
}

/// What subscribers see. `loading` is only true while a role lookup is in flight.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AuthSnapshot {
    pub identity: Option<Identity>,
    pub role: Option<Role>,
    pub loading: bool,
    /// Bumped by every auth event, so a token refresh reaches subscribers even
    /// when identity and role are unchanged. Older revisions are never published.
    pub revision: u64,
}

impl AuthSnapshot {
    pub fn is_signed_in(&self) -> bool {
        self.identity.is_some()
    }
}

#[derive(Debug, Deserialize)]
struct RoleLookup {
    role: Option<String>,
}

#[derive(Default)]
struct ResolverState {
    session: Option<Session>,
    generation: u64,
    /// Resolved role for a user id; survives token refreshes for that user.
    cached_role: Option<(String, Role)>,
}

struct ResolverInner {
    client: ServiceClient,
    state: Mutex<ResolverState>,
    snapshot: Observable<AuthSnapshot>,
    expiry_watch: Mutex<Option<Subscription>>,
}

#[derive(Clone)]
pub struct SessionResolver {
    inner: Arc<ResolverInner>,
}

impl SessionResolver {
    /// The resolver signs out whenever `client` reports an expired session.
    pub fn new(client: ServiceClient) -> Self {
        let inner = Arc::new(ResolverInner {
            client,
            state: Mutex::new(ResolverState::default()),
            snapshot: Observable::new(AuthSnapshot::default()),
            expiry_watch: Mutex::new(None),
        });

        let weak = Arc::downgrade(&inner);
        let expiries = inner.client.session_expiries();
        let baseline = expiries.get();
        let subscription = expiries.subscribe(move |count| {
            if *count <= baseline {
                return;
            }
            if let Some(inner) = weak.upgrade() {
                info!("Session expired; signing out");
                SessionResolver { inner }.sign_out();
            }
        });
        *lock(&inner.expiry_watch) = Some(subscription);

        Self { inner }
    }

    pub fn current_session(&self) -> Option<Session> {
        lock(&self.inner.state).session.clone()
    }

    pub fn access_token(&self) -> Option<String> {
        self.current_session().map(|s| s.access_token)
    }

    pub fn snapshot(&self) -> AuthSnapshot {
        self.inner.snapshot.get()
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&AuthSnapshot) + Send + Sync + 'static,
    {
        self.inner.snapshot.subscribe(callback)
    }

    pub fn watch(&self) -> watch::Receiver<AuthSnapshot> {
        self.inner.snapshot.watch()
    }

    /// Pick up whatever session the provider persisted
    pub async fn initialize(&self, provider: &dyn IdentityProvider) -> AuthSnapshot {
        match provider.load_session().await {
            Ok(session) => self.handle_event(AuthEvent::InitialSession(session)).await,
            Err(e) => {
                warn!("Could not load persisted session: {:#}", e);
                self.sign_out();
                self.snapshot()
            }
        }
    }

    pub async fn handle_event(&self, event: AuthEvent) -> AuthSnapshot {
        let session = match event {
            AuthEvent::InitialSession(session) => session,
            AuthEvent::SignedIn(session) | AuthEvent::TokenRefreshed(session) => Some(session),
            AuthEvent::SignedOut => None,
        };

        let Some(session) = session else {
            self.sign_out();
            return self.snapshot();
        };

        let (generation, cached) = {
            let mut state = lock(&self.inner.state);
            state.generation += 1;
            state.session = Some(session.clone());
            let cached = match &state.cached_role {
                Some((user_id, role)) if *user_id == session.user_id => Some(*role),
                _ => None,
            };
            if cached.is_none() {
                state.cached_role = None;
            }
            (state.generation, cached)
        };

        let identity = Identity::from(&session);

        if let Some(role) = session.role_claim.or(cached) {
            self.finish(generation, &session.user_id, identity, role);
            return self.snapshot();
        }

        self.publish(AuthSnapshot {
            identity: Some(identity.clone()),
            role: None,
            loading: true,
            revision: generation,
        });

        let role = self.lookup_role(&session).await;
        self.finish(generation, &session.user_id, identity, role);
        self.snapshot()
    }

    pub fn sign_out(&self) {
        let generation = {
            let mut state = lock(&self.inner.state);
            state.generation += 1;
            state.session = None;
            state.cached_role = None;
            state.generation
        };
        self.publish(AuthSnapshot {
            revision: generation,
            ..AuthSnapshot::default()
        });
    }

    /// Embedded claim first; otherwise one lookup that defaults to candidate on any failure.
    pub async fn resolve_role(&self, session: &Session) -> Role {
        match session.role_claim {
            Some(role) => role,
            None => self.lookup_role(session).await,
        }
    }

    async fn lookup_role(&self, session: &Session) -> Role {
        let user_id = match validate_id("user", &session.user_id) {
            Ok(id) => id,
            Err(e) => {
                warn!("Skipping role lookup: {}", e);
                return Role::Candidate;
            }
        };

        let path = format!("/users/{}", user_id);
        match self
            .inner
            .client
            .get_without_expiry::<RoleLookup>(&path, Some(&session.access_token))
            .await
        {
            Ok(found) => Role::from_lookup(found.role.as_deref()),
            Err(e) => {
                warn!("Role lookup for {} failed, defaulting to candidate: {}", user_id, e);
                Role::Candidate
            }
        }
    }

    /// Publish the resolved role unless the session changed in the meantime.
    fn finish(&self, generation: u64, user_id: &str, identity: Identity, role: Role) {
        {
            let mut state = lock(&self.inner.state);
            if state.generation != generation {
                debug!("Discarding role resolution for superseded session");
                return;
            }
            state.cached_role = Some((user_id.to_string(), role));
        }
        self.publish(AuthSnapshot {
            identity: Some(identity),
            role: Some(role),
            loading: false,
            revision: generation,
        });
    }

    /// A snapshot built under an older generation loses to whatever a newer
    /// event already published.
    fn publish(&self, snapshot: AuthSnapshot) {
        self.inner
            .snapshot
            .set_when(snapshot, |current, next| next.revision >= current.revision);
    }
}
