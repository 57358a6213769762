//! Error-reporting context shared by the components of one process.
//!
//! Created once at startup and handed around by `Arc`; nothing in the crate
//! reaches for it as a global.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::Mutex;

const MAX_BREADCRUMBS: usize = 100;

#[derive(Debug, Clone, PartialEq)]
pub struct Breadcrumb {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

#[derive(Debug)]
pub struct Diagnostics {
    release: String,
    platform: String,
    user: Mutex<Option<String>>,
    breadcrumbs: Mutex<VecDeque<Breadcrumb>>,
}

impl Diagnostics {
    pub fn new(release: impl Into<String>) -> Self {
        Self {
            release: release.into(),
            platform: format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH),
            user: Mutex::new(None),
            breadcrumbs: Mutex::new(VecDeque::with_capacity(MAX_BREADCRUMBS)),
        }
    }

    pub fn release(&self) -> &str {
        &self.release
    }

    pub fn platform(&self) -> &str {
        &self.platform
    }

    /// Tag subsequent reports with the signed-in user.
    pub fn set_user(&self, username: impl Into<String>) {
        if let Ok(mut user) = self.user.lock() {
            *user = Some(username.into());
        }
    }

    /// Record a step on the trail leading up to a possible failure.
    pub fn breadcrumb(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!(breadcrumb = %message);
        if let Ok(mut trail) = self.breadcrumbs.lock() {
            if trail.len() == MAX_BREADCRUMBS {
                trail.pop_front();
            }
            trail.push_back(Breadcrumb {
                timestamp: Utc::now(),
                message,
            });
        }
    }

    /// Report a failure together with the context gathered so far.
    pub fn capture_message(&self, message: &str) {
        let user = self.user.lock().ok().and_then(|u| u.clone());
        let trail = self.breadcrumbs().len();
        tracing::error!(
            release = %self.release,
            platform = %self.platform,
            user = user.as_deref().unwrap_or("anonymous"),
            breadcrumbs = trail,
            "{}",
            message
        );
    }

    pub fn breadcrumbs(&self) -> Vec<Breadcrumb> {
        self.breadcrumbs
            .lock()
            .map(|trail| trail.iter().cloned().collect())
            .unwrap_or_default()
    }
}
