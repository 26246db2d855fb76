//! Shared application state

use std::sync::Arc;

use gate_auth::{AdminModeAuthenticator, AuthContext, CookieConfig, LoginAuthenticator};

use crate::health::HealthChecker;

pub struct AppState {
    pub auth: AuthContext,
    pub login: LoginAuthenticator,
    pub admin_mode: AdminModeAuthenticator,
    pub cookie: CookieConfig,
    pub health: Arc<HealthChecker>,
}

impl AppState {
    pub fn new(auth: AuthContext, cookie: CookieConfig, health: HealthChecker) -> Self {
        Self {
            login: LoginAuthenticator::new(auth.clone()),
            admin_mode: AdminModeAuthenticator::new(auth.clone()),
            auth,
            cookie,
            health: Arc::new(health),
        }
    }
}
