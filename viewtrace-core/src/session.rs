//! Current user and session identifiers
//!
//! Identifiers are read when a batch is dispatched; until `set` is called
//! batches carry empty strings.

use std::sync::{PoisonError, RwLock};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionIds {
    pub user_id: String,
    pub session_id: String,
}

#[derive(Debug, Default)]
pub struct SessionController {
    ids: RwLock<SessionIds>,
}

impl SessionController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace both identifiers; last write wins
    pub fn set(&self, user_id: impl Into<String>, session_id: impl Into<String>) {
        let mut ids = self.ids.write().unwrap_or_else(PoisonError::into_inner);
        ids.user_id = user_id.into();
        ids.session_id = session_id.into();
    }

    pub fn current(&self) -> SessionIds {
        self.ids
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
