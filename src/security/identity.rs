//! Request identity and the provider that resolves it.

use std::collections::{BTreeSet, HashMap};

use serde::Serialize;

use crate::config::UserConfig;

/// Who is making the current request. Lives only as long as the request.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Identity {
    /// `0` for anonymous callers.
    pub user_id: u64,
    pub capabilities: BTreeSet<String>,
    pub ip: String,
    pub user_agent: String,
    /// Session binding for anti-forgery tokens. Never logged.
    #[serde(skip)]
    pub session: String,
}

impl Identity {
    pub fn anonymous(ip: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            user_agent: user_agent.into(),
            ..Self::default()
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.user_id == 0
    }

    pub fn has_capability(&self, name: &str) -> bool {
        self.capabilities.contains(name)
    }
}

/// Resolves the caller of a request.
pub trait IdentityProvider: Send + Sync {
    fn identify(&self, session: Option<&str>, ip: &str, user_agent: &str) -> Identity;
}

/// Identity provider backed by the `[[users]]` config section.
#[derive(Debug, Clone, Default)]
pub struct ConfiguredUsers {
    by_session: HashMap<String, UserConfig>,
}

impl ConfiguredUsers {
    pub fn new(users: &[UserConfig]) -> Self {
        Self {
            by_session: users
                .iter()
                .map(|u| (u.session.clone(), u.clone()))
                .collect(),
        }
    }
}

impl IdentityProvider for ConfiguredUsers {
    fn identify(&self, session: Option<&str>, ip: &str, user_agent: &str) -> Identity {
        match session.and_then(|s| self.by_session.get(s)) {
            Some(user) => Identity {
                user_id: user.id,
                capabilities: user.capabilities.iter().cloned().collect(),
                ip: ip.to_string(),
                user_agent: user_agent.to_string(),
                session: user.session.clone(),
            },
            None => Identity::anonymous(ip, user_agent),
        }
    }
}
