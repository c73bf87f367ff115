use std::{collections::HashSet, sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::{header::CONTENT_TYPE, Client, Method};
use serde::{de::DeserializeOwned, Serialize};
use shared::{
    domain::{Role, UserId, UserRecord},
    protocol::{
        ApiEnvelope, LoginData, LoginRequest, LogoutRequest, RegisterData, RegisterRequest,
        UpdateRoleRequest, VerifyData,
    },
};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, info, warn};
use url::Url;

pub mod error;
pub mod session_vault;
pub mod view;

pub use error::RequestError;
pub use session_vault::{DurableSessionVault, MemorySessionVault, PersistedSession, SessionVault};
pub use view::ViewModel;

const REGISTER_REDIRECT_DELAY: Duration = Duration::from_secs(2);
const LOGIN_REDIRECT_DELAY: Duration = Duration::from_millis(1500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    Index,
    Login,
    Register,
    Dashboard,
    Admin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertKind {
    Success,
    Error,
    Info,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub kind: AlertKind,
    pub message: String,
}

/// Session lifecycle. `Assumed` covers the window between restoring a stored
/// token at startup and the server's verdict on it: the UI already paints the
/// authenticated view, but privileged operations re-verify before acting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Anonymous,
    Assumed,
    Confirmed,
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    SessionChanged,
    AlertRaised(Alert),
    AlertCleared,
    NavigationRequested(Page),
    UserListUpdated,
}

/// Interactive yes/no gate in front of privileged mutations. The front-end
/// supplies the real prompt; the default denies everything.
#[async_trait]
pub trait ConfirmPrompt: Send + Sync {
    async fn confirm(&self, message: &str) -> bool;
}

pub struct DenyAllConfirm;

#[async_trait]
impl ConfirmPrompt for DenyAllConfirm {
    async fn confirm(&self, _message: &str) -> bool {
        false
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub phase: SessionPhase,
    pub user: Option<UserRecord>,
    pub roster: Vec<UserRecord>,
}

struct AuthClientState {
    token: Option<String>,
    user: Option<UserRecord>,
    phase: SessionPhase,
    roster: Vec<UserRecord>,
    inflight_role_updates: HashSet<UserId>,
}

/// Owns the session (token + profile), mirrors it to the vault, talks to the
/// authentication API and fans state transitions out to the front-end.
pub struct AuthClient {
    http: Client,
    base_url: String,
    vault: Arc<dyn SessionVault>,
    confirm: Arc<dyn ConfirmPrompt>,
    inner: Mutex<AuthClientState>,
    events: broadcast::Sender<SessionEvent>,
}

impl AuthClient {
    pub fn new(base_url: Url) -> Arc<Self> {
        Self::new_with_dependencies(
            base_url,
            Arc::new(MemorySessionVault::default()),
            Arc::new(DenyAllConfirm),
        )
    }

    pub fn new_with_vault(base_url: Url, vault: Arc<dyn SessionVault>) -> Arc<Self> {
        Self::new_with_dependencies(base_url, vault, Arc::new(DenyAllConfirm))
    }

    pub fn new_with_dependencies(
        base_url: Url,
        vault: Arc<dyn SessionVault>,
        confirm: Arc<dyn ConfirmPrompt>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(1024);
        Arc::new(Self {
            http: Client::new(),
            base_url: base_url.as_str().trim_end_matches('/').to_string(),
            vault,
            confirm,
            inner: Mutex::new(AuthClientState {
                token: None,
                user: None,
                phase: SessionPhase::Anonymous,
                roster: Vec::new(),
                inflight_role_updates: HashSet::new(),
            }),
            events,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let guard = self.inner.lock().await;
        SessionSnapshot {
            phase: guard.phase,
            user: guard.user.clone(),
            roster: guard.roster.clone(),
        }
    }

    pub async fn render(&self) -> ViewModel {
        view::render(&self.snapshot().await)
    }

    /// Loads the stored session, if any, and kicks off verification in the
    /// background. Until the verdict arrives the session is only `Assumed`.
    pub async fn restore_session(self: &Arc<Self>) {
        let restored = match self.vault.load().await {
            Ok(restored) => restored,
            Err(err) => {
                warn!("session: vault load failed, starting anonymous: {err:#}");
                None
            }
        };

        let Some(persisted) = restored else {
            return;
        };

        info!(
            user_id = persisted.user.id.0,
            "session: restored stored session, verification pending"
        );
        {
            let mut guard = self.inner.lock().await;
            guard.token = Some(persisted.token);
            guard.user = Some(persisted.user);
            guard.phase = SessionPhase::Assumed;
        }
        self.emit(SessionEvent::SessionChanged);

        let client = Arc::clone(self);
        tokio::spawn(async move {
            client.verify().await;
        });
    }

    /// Sends the registration form. Session state is never touched; success
    /// only schedules navigation to the login page.
    pub async fn register(self: &Arc<Self>, form: RegisterRequest) {
        self.emit(SessionEvent::AlertCleared);

        match self
            .request::<RegisterData, _>("/register", Method::POST, Some(&form), false)
            .await
        {
            Ok(envelope) if envelope.success => {
                self.alert(AlertKind::Success, "Registration successful! Please login.");
                self.schedule_navigation(Page::Login, REGISTER_REDIRECT_DELAY);
            }
            Ok(envelope) => {
                self.alert(
                    AlertKind::Error,
                    envelope.message_or("Registration failed. Please try again."),
                );
            }
            Err(err) => {
                warn!("auth: register request failed: {err}");
                self.alert(AlertKind::Error, "Registration failed. Please try again.");
            }
        }
    }

    /// On success the token and profile are installed together, in memory and
    /// in the vault; on any failure the current session is left untouched.
    pub async fn login(self: &Arc<Self>, credentials: LoginRequest) {
        self.emit(SessionEvent::AlertCleared);

        match self
            .request::<LoginData, _>("/login", Method::POST, Some(&credentials), false)
            .await
        {
            Ok(envelope) if envelope.success => {
                let Some(data) = envelope.data else {
                    warn!("auth: login succeeded without a session payload");
                    self.alert(AlertKind::Error, "Login failed. Please check your credentials.");
                    return;
                };
                info!(user_id = data.user.id.0, "auth: login confirmed");
                self.install_session(data.token, data.user).await;
                self.alert(AlertKind::Success, "Login successful! Redirecting...");
                self.schedule_navigation(Page::Dashboard, LOGIN_REDIRECT_DELAY);
            }
            Ok(envelope) => {
                self.alert(
                    AlertKind::Error,
                    envelope.message_or("Login failed. Please check your credentials."),
                );
            }
            Err(err) => {
                warn!("auth: login request failed: {err}");
                self.alert(AlertKind::Error, "Login failed. Please check your credentials.");
            }
        }
    }

    /// Best-effort server notification followed by an unconditional local
    /// clear; logout always succeeds locally.
    pub async fn logout(&self) {
        let token = { self.inner.lock().await.token.clone() };
        let Some(token) = token else {
            return;
        };

        if let Err(err) = self
            .request::<serde_json::Value, _>(
                "/logout",
                Method::POST,
                Some(&LogoutRequest { token }),
                false,
            )
            .await
        {
            debug!("auth: logout notification failed, clearing locally anyway: {err}");
        }

        self.clear_session().await;
        self.emit(SessionEvent::NavigationRequested(Page::Index));
    }

    /// Checks the held token against the server. Any failure, transport or
    /// rejection, purges the session; this is the only path that detects a
    /// stale token.
    pub async fn verify(&self) -> bool {
        let has_token = { self.inner.lock().await.token.is_some() };
        if !has_token {
            return false;
        }

        match self
            .request::<VerifyData, _>("/verify", Method::GET, None::<&()>, true)
            .await
        {
            Ok(envelope) if envelope.success => {
                let mut guard = self.inner.lock().await;
                // A logout may have raced the verification; never confirm an
                // already-cleared session.
                if guard.token.is_some() {
                    guard.phase = SessionPhase::Confirmed;
                }
                true
            }
            Ok(envelope) => {
                info!(
                    "auth: token rejected by server: {}",
                    envelope.message_or("no reason given")
                );
                self.clear_session().await;
                false
            }
            Err(err) => {
                warn!("auth: verify request failed: {err}");
                self.clear_session().await;
                false
            }
        }
    }

    /// Replaces the displayed user list. Requires a freshly verified session
    /// and the admin role; otherwise no request is issued at all. Failures
    /// are logged and leave the stale list in place.
    pub async fn load_users(&self) {
        if !self.verify().await {
            return;
        }

        let is_admin = {
            let guard = self.inner.lock().await;
            guard
                .user
                .as_ref()
                .is_some_and(|user| user.role == Role::Admin)
        };
        if !is_admin {
            return;
        }

        match self
            .request::<Vec<UserRecord>, _>("/users", Method::GET, None::<&()>, true)
            .await
        {
            Ok(envelope) if envelope.success => {
                let Some(users) = envelope.data else {
                    return;
                };
                {
                    let mut guard = self.inner.lock().await;
                    guard.roster = users;
                }
                self.emit(SessionEvent::UserListUpdated);
            }
            Ok(envelope) => {
                error!(
                    "auth: user list rejected: {}",
                    envelope.message_or("no reason given")
                );
            }
            Err(err) => {
                error!("auth: failed to load users: {err}");
            }
        }
    }

    /// Privileged role change. Gated on interactive confirmation, guarded
    /// against concurrent duplicates for the same target, and never applied
    /// optimistically: the list is re-fetched only after the server agrees.
    pub async fn update_role(&self, user_id: UserId, new_role: Role) {
        {
            let mut guard = self.inner.lock().await;
            if !guard.inflight_role_updates.insert(user_id) {
                info!(
                    user_id = user_id.0,
                    "auth: role update already in flight; ignoring duplicate"
                );
                return;
            }
        }

        let refresh = self.update_role_request(user_id, new_role).await;

        self.inner
            .lock()
            .await
            .inflight_role_updates
            .remove(&user_id);

        if refresh {
            self.load_users().await;
        }
    }

    async fn update_role_request(&self, user_id: UserId, new_role: Role) -> bool {
        let prompt = format!("Change this user's role to {}?", new_role.as_str());
        if !self.confirm.confirm(&prompt).await {
            info!(
                user_id = user_id.0,
                "auth: role update cancelled at confirmation"
            );
            return false;
        }

        let payload = UpdateRoleRequest { user_id, new_role };
        match self
            .request::<serde_json::Value, _>("/users/update-role", Method::POST, Some(&payload), true)
            .await
        {
            Ok(envelope) if envelope.success => {
                self.alert(AlertKind::Success, "User role updated successfully!");
                true
            }
            Ok(envelope) => {
                self.alert(
                    AlertKind::Error,
                    envelope.message_or("Failed to update user role"),
                );
                false
            }
            Err(err) => {
                warn!(user_id = user_id.0, "auth: role update request failed: {err}");
                self.alert(AlertKind::Error, "Failed to update user role");
                false
            }
        }
    }

    /// Page-specific entry points, dispatched from the front-end's handler
    /// table instead of looked up by name at runtime.
    pub async fn init_page(self: &Arc<Self>, page: Page) {
        match page {
            Page::Dashboard | Page::Admin => {
                let (has_token, is_admin) = {
                    let guard = self.inner.lock().await;
                    (
                        guard.token.is_some(),
                        guard
                            .user
                            .as_ref()
                            .is_some_and(|user| user.role == Role::Admin),
                    )
                };
                if !has_token {
                    self.emit(SessionEvent::NavigationRequested(Page::Login));
                    return;
                }
                self.emit(SessionEvent::SessionChanged);
                if is_admin {
                    self.load_users().await;
                }
            }
            Page::Login | Page::Register => {
                let has_token = { self.inner.lock().await.token.is_some() };
                if has_token {
                    self.emit(SessionEvent::NavigationRequested(Page::Dashboard));
                    return;
                }
                self.emit(SessionEvent::SessionChanged);
            }
            Page::Index => {
                self.emit(SessionEvent::SessionChanged);
            }
        }
    }

    async fn install_session(&self, token: String, user: UserRecord) {
        {
            let mut guard = self.inner.lock().await;
            guard.token = Some(token.clone());
            guard.user = Some(user.clone());
            guard.phase = SessionPhase::Confirmed;
            guard.roster.clear();
            guard.inflight_role_updates.clear();
        }
        if let Err(err) = self.vault.save(&PersistedSession { token, user }).await {
            error!("session: failed to mirror session to vault: {err:#}");
        }
        self.emit(SessionEvent::SessionChanged);
    }

    async fn clear_session(&self) {
        {
            let mut guard = self.inner.lock().await;
            guard.token = None;
            guard.user = None;
            guard.phase = SessionPhase::Anonymous;
            guard.roster.clear();
            guard.inflight_role_updates.clear();
        }
        if let Err(err) = self.vault.clear().await {
            error!("session: failed to clear vault: {err:#}");
        }
        self.emit(SessionEvent::SessionChanged);
    }

    async fn bearer_token(&self) -> Option<String> {
        self.inner.lock().await.token.clone()
    }

    /// Single request path for every endpoint: JSON content type, bearer
    /// header when asked for and a token is held, body only on mutating
    /// methods, and the envelope parsed from the body regardless of the HTTP
    /// status code.
    async fn request<T, B>(
        &self,
        endpoint: &str,
        method: Method,
        body: Option<&B>,
        auth: bool,
    ) -> Result<ApiEnvelope<T>, RequestError>
    where
        T: DeserializeOwned,
        B: Serialize,
    {
        let url = format!("{}{endpoint}", self.base_url);
        let mut builder = self
            .http
            .request(method.clone(), url)
            .header(CONTENT_TYPE, "application/json");

        if auth {
            if let Some(token) = self.bearer_token().await {
                builder = builder.bearer_auth(token);
            }
        }

        if let Some(body) = body {
            if method == Method::POST || method == Method::PUT {
                builder = builder.json(body);
            }
        }

        let response = builder
            .send()
            .await
            .map_err(|source| RequestError::Transport {
                endpoint: endpoint.to_string(),
                source,
            })?;

        response
            .json::<ApiEnvelope<T>>()
            .await
            .map_err(|source| RequestError::Decode {
                endpoint: endpoint.to_string(),
                source,
            })
    }

    fn schedule_navigation(self: &Arc<Self>, page: Page, delay: Duration) {
        let client = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            client.emit(SessionEvent::NavigationRequested(page));
        });
    }

    fn alert(&self, kind: AlertKind, message: impl Into<String>) {
        self.emit(SessionEvent::AlertRaised(Alert {
            kind,
            message: message.into(),
        }));
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
