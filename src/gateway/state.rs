use std::sync::Arc;

use crate::custody::TransferCoordinator;

/// Shared gateway state
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<TransferCoordinator>,
    /// HS256 secret for Bearer tokens
    jwt_secret: Arc<str>,
}

impl AppState {
    pub fn new(coordinator: Arc<TransferCoordinator>, jwt_secret: &str) -> Self {
        Self {
            coordinator,
            jwt_secret: Arc::from(jwt_secret),
        }
    }

    pub fn jwt_secret(&self) -> &str {
        &self.jwt_secret
    }
}
