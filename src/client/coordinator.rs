use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::{broadcast, watch};

use super::api::{SessionApi, SessionCheck};
use super::browser::{Browser, has_auth_flag};
use super::channel::{AuthChannel, AuthEvent, AuthMessage};
use crate::redirect;
use crate::types::SessionUser;

static NEXT_TAB_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStatus {
    Loading,
    Authenticated,
    Unauthenticated,
}

/// What the UI renders from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSnapshot {
    pub status: AuthStatus,
    pub user: Option<SessionUser>,
    /// Last transient failure, cleared by the next successful check.
    pub error: Option<String>,
}

impl AuthSnapshot {
    fn loading() -> Self {
        Self {
            status: AuthStatus::Loading,
            user: None,
            error: None,
        }
    }

    fn signed_out() -> Self {
        Self {
            status: AuthStatus::Unauthenticated,
            user: None,
            error: None,
        }
    }
}

/// Client-side auth state machine: `loading -> {authenticated, unauthenticated}`.
///
/// Construct one per page and pass it to whatever needs auth state.
/// Subscribers observe changes through [`subscribe`](Self::subscribe).
pub struct AuthCoordinator<A, B> {
    api: A,
    browser: B,
    state: watch::Sender<AuthSnapshot>,
    channel: Option<AuthChannel>,
    tab_id: u64,
    auth_path: String,
    login_page: String,
    login_pending: AtomicBool,
}

impl<A: SessionApi, B: Browser> AuthCoordinator<A, B> {
    #[must_use]
    pub fn new(api: A, browser: B) -> Self {
        let (state, _) = watch::channel(AuthSnapshot::loading());
        Self {
            api,
            browser,
            state,
            channel: None,
            tab_id: NEXT_TAB_ID.fetch_add(1, Ordering::Relaxed),
            auth_path: "/api/auth".into(),
            login_page: "/login".into(),
            login_pending: AtomicBool::new(false),
        }
    }

    /// Join the cross-tab channel. Call [`listen`](Self::listen) with a
    /// receiver from the same channel to react to other tabs.
    #[must_use]
    pub fn with_channel(mut self, channel: AuthChannel) -> Self {
        self.channel = Some(channel);
        self
    }

    #[must_use]
    pub fn with_auth_path(mut self, path: impl Into<String>) -> Self {
        self.auth_path = path.into();
        self
    }

    #[must_use]
    pub fn with_login_page(mut self, path: impl Into<String>) -> Self {
        self.login_page = path.into();
        self
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AuthSnapshot> {
        self.state.subscribe()
    }

    #[must_use]
    pub fn snapshot(&self) -> AuthSnapshot {
        self.state.borrow().clone()
    }

    #[must_use]
    pub fn status(&self) -> AuthStatus {
        self.state.borrow().status
    }

    #[must_use]
    pub fn tab_id(&self) -> u64 {
        self.tab_id
    }

    /// Initial session check. Anonymous visitors without the flag cookie
    /// settle immediately without a request.
    pub async fn mount(&self) {
        self.login_pending.store(false, Ordering::Release);
        if !has_auth_flag(&self.browser.document_cookie()) {
            tracing::debug!("No auth flag cookie, skipping session check");
            self.state.send_replace(AuthSnapshot::signed_out());
            return;
        }
        self.check_session().await;
    }

    /// Window regained focus.
    pub async fn on_focus(&self) {
        self.revalidate().await;
    }

    pub async fn on_visibility_change(&self, visible: bool) {
        if visible {
            self.revalidate().await;
        }
    }

    async fn revalidate(&self) {
        if self.status() == AuthStatus::Authenticated {
            self.check_session().await;
        }
    }

    /// Asks the server for the current user and applies the outcome.
    pub async fn check_session(&self) {
        match self.api.fetch_session().await {
            Ok(SessionCheck::Authenticated(user)) => {
                let previous = self.state.send_replace(AuthSnapshot {
                    status: AuthStatus::Authenticated,
                    user: Some(user),
                    error: None,
                });
                if previous.status != AuthStatus::Authenticated {
                    self.publish(AuthEvent::Login);
                }
            }
            Ok(SessionCheck::Unauthenticated) => {
                let previous = self.state.send_replace(AuthSnapshot::signed_out());
                if previous.status == AuthStatus::Authenticated {
                    self.redirect_session_expired();
                }
            }
            Ok(SessionCheck::ServerError(status)) => {
                tracing::warn!(status, "Session check failed");
                self.state.send_modify(|s| {
                    // A first check that fails has nothing to keep.
                    if s.status == AuthStatus::Loading {
                        s.status = AuthStatus::Unauthenticated;
                    }
                    s.error = Some(format!("Session check failed ({status})"));
                });
            }
            Err(e) => {
                tracing::warn!(error = %e, "Session check unreachable");
                self.state.send_if_modified(|s| {
                    if s.status != AuthStatus::Loading {
                        return false;
                    }
                    s.status = AuthStatus::Unauthenticated;
                    true
                });
            }
        }
    }

    /// Navigates to the login entry point. Returns `false` if a login is
    /// already under way.
    pub fn login(&self, redirect_to: Option<&str>) -> bool {
        if self.login_pending.swap(true, Ordering::AcqRel) {
            return false;
        }
        let target = redirect::validate_callback_url(redirect_to);
        self.browser.navigate(&format!(
            "{}/login?callbackUrl={}",
            self.auth_path,
            urlencoding::encode(&target)
        ));
        true
    }

    #[must_use]
    pub fn is_login_pending(&self) -> bool {
        self.login_pending.load(Ordering::Acquire)
    }

    /// Ends the session. Local state is cleared whatever the server says.
    pub async fn logout(&self) {
        let target = match self.api.logout().await {
            Ok(outcome) => outcome.redirect_url.unwrap_or_else(|| "/".into()),
            Err(e) => {
                tracing::warn!(error = %e, "Logout request failed, clearing local state anyway");
                "/".into()
            }
        };

        self.state.send_replace(AuthSnapshot::signed_out());
        self.publish(AuthEvent::Logout);
        self.browser.navigate(&target);
    }

    /// Applies a message from another tab. Own messages are ignored.
    pub async fn handle_broadcast(&self, message: AuthMessage) {
        if message.tab_id == self.tab_id {
            return;
        }
        match message.event {
            // No session-expired redirect: the user chose to leave.
            AuthEvent::Logout => {
                self.state.send_replace(AuthSnapshot::signed_out());
            }
            // Tabs that already hold a user have nothing to pick up.
            AuthEvent::Login if self.status() != AuthStatus::Authenticated => {
                self.check_session().await;
            }
            AuthEvent::Login => {}
        }
    }

    fn publish(&self, event: AuthEvent) {
        if let Some(channel) = &self.channel {
            channel.publish(AuthMessage {
                tab_id: self.tab_id,
                event,
            });
        }
    }

    /// Processes cross-tab messages until the channel closes.
    pub async fn listen(&self, mut rx: broadcast::Receiver<AuthMessage>) {
        loop {
            match rx.recv().await {
                Ok(message) => self.handle_broadcast(message).await,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Auth channel lagged, re-checking session");
                    self.check_session().await;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.with_user(|u| u.has_role(role))
    }

    #[must_use]
    pub fn has_any_role<S: AsRef<str>>(&self, roles: &[S]) -> bool {
        self.with_user(|u| u.has_any_role(roles))
    }

    #[must_use]
    pub fn has_all_roles<S: AsRef<str>>(&self, roles: &[S]) -> bool {
        self.with_user(|u| u.has_all_roles(roles))
    }

    /// `None` or an empty list admits any authenticated user.
    #[must_use]
    pub fn can_access<S: AsRef<str>>(&self, required: Option<&[S]>) -> bool {
        self.with_user(|u| u.can_access(required))
    }

    fn with_user(&self, f: impl FnOnce(&SessionUser) -> bool) -> bool {
        self.state.borrow().user.as_ref().is_some_and(f)
    }

    fn redirect_session_expired(&self) {
        let current = self.browser.current_path();
        let callback = redirect::validate_callback_url(Some(&current));
        tracing::info!("Session expired, redirecting to login");
        self.browser.navigate(&format!(
            "{}?reason=session_expired&callbackUrl={}",
            self.login_page,
            urlencoding::encode(&callback)
        ));
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::client::api::LogoutOutcome;
    use crate::error::Error;

    #[derive(Default)]
    struct FakeApi {
        checks: Mutex<VecDeque<Result<SessionCheck, Error>>>,
        logout: Mutex<Option<Result<LogoutOutcome, Error>>>,
        calls: Mutex<usize>,
    }

    impl FakeApi {
        fn with_checks(checks: Vec<Result<SessionCheck, Error>>) -> Self {
            Self {
                checks: Mutex::new(checks.into()),
                ..Self::default()
            }
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    impl SessionApi for Arc<FakeApi> {
        async fn fetch_session(&self) -> Result<SessionCheck, Error> {
            *self.calls.lock().unwrap() += 1;
            self.checks
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(SessionCheck::Unauthenticated))
        }

        async fn logout(&self) -> Result<LogoutOutcome, Error> {
            self.logout
                .lock()
                .unwrap()
                .take()
                .unwrap_or(Ok(LogoutOutcome::default()))
        }
    }

    #[derive(Default)]
    struct FakeBrowser {
        cookie: String,
        path: String,
        navigations: Mutex<Vec<String>>,
    }

    impl FakeBrowser {
        fn signed_in() -> Self {
            Self {
                cookie: "isAuthenticated=true".into(),
                path: "/seller/orders?page=2".into(),
                ..Self::default()
            }
        }

        fn navigations(&self) -> Vec<String> {
            self.navigations.lock().unwrap().clone()
        }
    }

    impl Browser for Arc<FakeBrowser> {
        fn document_cookie(&self) -> String {
            self.cookie.clone()
        }

        fn current_path(&self) -> String {
            self.path.clone()
        }

        fn navigate(&self, url: &str) {
            self.navigations.lock().unwrap().push(url.to_string());
        }
    }

    type Coordinator = AuthCoordinator<Arc<FakeApi>, Arc<FakeBrowser>>;

    fn user() -> SessionUser {
        SessionUser {
            id: "u-1".into(),
            email: Some("sam@shop.example".into()),
            name: None,
            roles: ["SELLER", "CUSTOMER"].into_iter().map(String::from).collect(),
        }
    }

    fn network_failure() -> Error {
        Error::Timeout("session check")
    }

    fn setup(
        checks: Vec<Result<SessionCheck, Error>>,
        browser: FakeBrowser,
    ) -> (Coordinator, Arc<FakeApi>, Arc<FakeBrowser>) {
        let api = Arc::new(FakeApi::with_checks(checks));
        let browser = Arc::new(browser);
        let coordinator = AuthCoordinator::new(Arc::clone(&api), Arc::clone(&browser));
        (coordinator, api, browser)
    }

    #[tokio::test]
    async fn anonymous_mount_skips_request() {
        let (c, api, _) = setup(vec![], FakeBrowser::default());
        assert_eq!(c.status(), AuthStatus::Loading);
        c.mount().await;
        assert_eq!(c.status(), AuthStatus::Unauthenticated);
        assert_eq!(api.calls(), 0);
    }

    #[tokio::test]
    async fn mount_authenticates() {
        let (c, _, _) = setup(
            vec![Ok(SessionCheck::Authenticated(user()))],
            FakeBrowser::signed_in(),
        );
        c.mount().await;
        let snapshot = c.snapshot();
        assert_eq!(snapshot.status, AuthStatus::Authenticated);
        assert_eq!(snapshot.user, Some(user()));
    }

    #[tokio::test]
    async fn unauthorized_settles_unauthenticated() {
        let (c, _, browser) = setup(vec![Ok(SessionCheck::Unauthenticated)], FakeBrowser::signed_in());
        c.mount().await;
        assert_eq!(c.status(), AuthStatus::Unauthenticated);
        // Never authenticated in this page, so no expiry redirect.
        assert!(browser.navigations().is_empty());
    }

    #[tokio::test]
    async fn network_failure_while_loading_settles_unauthenticated() {
        let (c, _, _) = setup(vec![Err(network_failure())], FakeBrowser::signed_in());
        c.mount().await;
        assert_eq!(c.status(), AuthStatus::Unauthenticated);
    }

    #[tokio::test]
    async fn network_failure_keeps_authenticated() {
        let (c, _, _) = setup(
            vec![Ok(SessionCheck::Authenticated(user())), Err(network_failure())],
            FakeBrowser::signed_in(),
        );
        c.mount().await;
        c.on_focus().await;
        assert_eq!(c.status(), AuthStatus::Authenticated);
        assert!(c.snapshot().error.is_none());
    }

    #[tokio::test]
    async fn server_error_keeps_authenticated_with_error() {
        let (c, _, _) = setup(
            vec![
                Ok(SessionCheck::Authenticated(user())),
                Ok(SessionCheck::ServerError(500)),
            ],
            FakeBrowser::signed_in(),
        );
        c.mount().await;
        c.check_session().await;
        let snapshot = c.snapshot();
        assert_eq!(snapshot.status, AuthStatus::Authenticated);
        assert!(snapshot.error.is_some());
        assert_eq!(snapshot.user, Some(user()));
    }

    #[tokio::test]
    async fn focus_revalidates_only_when_authenticated() {
        let (c, api, _) = setup(vec![], FakeBrowser::default());
        c.mount().await;
        c.on_focus().await;
        c.on_visibility_change(true).await;
        assert_eq!(api.calls(), 0);

        let (c, api, _) = setup(
            vec![
                Ok(SessionCheck::Authenticated(user())),
                Ok(SessionCheck::Authenticated(user())),
            ],
            FakeBrowser::signed_in(),
        );
        c.mount().await;
        c.on_visibility_change(false).await;
        assert_eq!(api.calls(), 1);
        c.on_visibility_change(true).await;
        assert_eq!(api.calls(), 2);
    }

    #[tokio::test]
    async fn expiry_redirects_to_login() {
        let (c, _, browser) = setup(
            vec![
                Ok(SessionCheck::Authenticated(user())),
                Ok(SessionCheck::Unauthenticated),
            ],
            FakeBrowser::signed_in(),
        );
        c.mount().await;
        c.on_focus().await;
        assert_eq!(c.status(), AuthStatus::Unauthenticated);
        assert_eq!(
            browser.navigations(),
            vec!["/login?reason=session_expired&callbackUrl=%2Fseller%2Forders%3Fpage%3D2"]
        );
    }

    #[tokio::test]
    async fn login_validates_target_and_guards_reentry() {
        let (c, _, browser) = setup(vec![], FakeBrowser::default());
        assert!(c.login(Some("//evil.example")));
        assert!(c.is_login_pending());
        assert!(!c.login(Some("/cart")));
        assert_eq!(browser.navigations(), vec!["/api/auth/login?callbackUrl=%2F"]);
    }

    #[tokio::test]
    async fn logout_follows_federated_redirect() {
        let (c, api, browser) = setup(
            vec![Ok(SessionCheck::Authenticated(user()))],
            FakeBrowser::signed_in(),
        );
        *api.logout.lock().unwrap() = Some(Ok(LogoutOutcome {
            redirect_url: Some("https://id.example.com/logout".into()),
        }));
        c.mount().await;
        c.logout().await;
        assert_eq!(c.status(), AuthStatus::Unauthenticated);
        assert_eq!(browser.navigations(), vec!["https://id.example.com/logout"]);
    }

    #[tokio::test]
    async fn failed_logout_still_clears_state() {
        let (c, api, browser) = setup(
            vec![Ok(SessionCheck::Authenticated(user()))],
            FakeBrowser::signed_in(),
        );
        *api.logout.lock().unwrap() = Some(Err(network_failure()));
        c.mount().await;
        c.logout().await;
        assert_eq!(c.snapshot(), AuthSnapshot::signed_out());
        assert_eq!(browser.navigations(), vec!["/"]);
    }

    #[tokio::test]
    async fn cross_tab_logout() {
        let channel = AuthChannel::new();
        let (first, _, _) = setup(
            vec![Ok(SessionCheck::Authenticated(user()))],
            FakeBrowser::signed_in(),
        );
        let first = first.with_channel(channel.clone());
        let (second, _, second_browser) = setup(
            vec![Ok(SessionCheck::Authenticated(user()))],
            FakeBrowser::signed_in(),
        );
        let mut rx = channel.subscribe();

        first.mount().await;
        second.mount().await;
        assert_eq!(rx.recv().await.unwrap().event, AuthEvent::Login);
        first.logout().await;

        let message = rx.recv().await.unwrap();
        assert_eq!(message.event, AuthEvent::Logout);
        assert_eq!(message.tab_id, first.tab_id());

        // The sender ignores its own message.
        first.handle_broadcast(message).await;
        second.handle_broadcast(message).await;
        assert_eq!(second.status(), AuthStatus::Unauthenticated);
        assert!(second_browser.navigations().is_empty());
    }

    #[tokio::test]
    async fn sign_in_propagates_to_other_tabs() {
        let channel = AuthChannel::new();
        let (first, _, _) = setup(
            vec![Ok(SessionCheck::Authenticated(user()))],
            FakeBrowser::signed_in(),
        );
        let first = first.with_channel(channel.clone());
        let (second, second_api, _) = setup(
            vec![Ok(SessionCheck::Authenticated(user()))],
            FakeBrowser::default(),
        );
        let second = second.with_channel(channel.clone());
        let mut rx = channel.subscribe();

        second.mount().await;
        assert_eq!(second.status(), AuthStatus::Unauthenticated);
        assert_eq!(second_api.calls(), 0);

        first.mount().await;
        let message = rx.recv().await.unwrap();
        assert_eq!(
            message,
            AuthMessage {
                tab_id: first.tab_id(),
                event: AuthEvent::Login,
            }
        );

        second.handle_broadcast(message).await;
        assert_eq!(second.status(), AuthStatus::Authenticated);
        assert_eq!(second.snapshot().user, Some(user()));
        assert_eq!(second_api.calls(), 1);

        // The second tab announces its own transition; the first already has a user.
        let echo = rx.recv().await.unwrap();
        assert_eq!(echo.tab_id, second.tab_id());
        first.handle_broadcast(echo).await;
        assert_eq!(first.status(), AuthStatus::Authenticated);
    }

    #[tokio::test]
    async fn revalidation_does_not_rebroadcast_login() {
        let channel = AuthChannel::new();
        let (c, _, _) = setup(
            vec![
                Ok(SessionCheck::Authenticated(user())),
                Ok(SessionCheck::Authenticated(user())),
            ],
            FakeBrowser::signed_in(),
        );
        let c = c.with_channel(channel.clone());
        let mut rx = channel.subscribe();

        c.mount().await;
        c.on_focus().await;
        assert_eq!(rx.recv().await.unwrap().event, AuthEvent::Login);
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn role_predicates_follow_user() {
        let (c, _, _) = setup(
            vec![Ok(SessionCheck::Authenticated(user()))],
            FakeBrowser::signed_in(),
        );
        assert!(!c.can_access::<&str>(None));
        c.mount().await;
        assert!(!c.has_role("ADMIN"));
        assert!(c.has_any_role(&["ADMIN", "SELLER"]));
        assert!(c.has_all_roles(&["SELLER", "CUSTOMER"]));
        assert!(!c.has_all_roles(&["SELLER", "ADMIN"]));
        assert!(c.can_access(Some(&["SELLER"][..])));
        assert!(!c.can_access(Some(&["DELIVERY_AGENT"][..])));
    }

    #[tokio::test]
    async fn subscribers_see_transitions() {
        let (c, _, _) = setup(
            vec![Ok(SessionCheck::Authenticated(user()))],
            FakeBrowser::signed_in(),
        );
        let mut rx = c.subscribe();
        c.mount().await;
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().status, AuthStatus::Authenticated);
    }
}
