//! Session handles and the configuration negotiated per session.
//!
//! A build session is identified by a correlation token generated once for
//! the underlying build invocation. Callers carry an explicit
//! [`SessionHandle`] through the code paths that send messages; cloning the
//! handle (e.g. for a sub-module of the same build) shares the token, so
//! every clone addresses the same logical session.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use uuid::Uuid;

use crate::message::Message;

/// Reply property that, when set to `true` on a session start, opts the
/// observer into receiving a projects-read message with every project and
/// its effective model.
pub const CONFIG_SEND_AFTER_PROJECTS_READ: &str = "afterProjectsRead";

/// Handle for one logical build session.
///
/// The correlation token is stable across clones and never derived from a
/// framework object that may be reclaimed mid-build.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionHandle {
    id: Arc<str>,
}

impl SessionHandle {
    /// Create a handle with a freshly generated correlation token.
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string().into(),
        }
    }

    /// The correlation token advertised as the wire session id.
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Default for SessionHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only view of the configuration the observer sent for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Configuration {
    send_projects: bool,
}

impl Configuration {
    /// Derive a configuration from the reply to a session start message.
    pub fn of(message: &Message) -> Self {
        Self {
            send_projects: message.bool_property(CONFIG_SEND_AFTER_PROJECTS_READ),
        }
    }

    /// Whether project-read notifications should be sent for this session.
    pub fn send_projects(&self) -> bool {
        self.send_projects
    }
}

/// Thread-safe map of correlation token to negotiated configuration.
///
/// Populated from the reply to the first message of a session and consulted
/// by later calls on the same logical session.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    configurations: Mutex<HashMap<String, Configuration>>,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the configuration negotiated for `session`.
    pub fn register(&self, session: &SessionHandle, configuration: Configuration) {
        self.lock().insert(session.id().to_string(), configuration);
    }

    /// Look up the configuration of `session`, `None` if none was ever
    /// negotiated (channel disabled or start message never replied to).
    pub fn get(&self, session: &SessionHandle) -> Option<Configuration> {
        self.lock().get(session.id()).copied()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Configuration>> {
        self.configurations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::WorkerId;
    use crate::message::Properties;

    #[test]
    fn test_handle_clones_share_token() {
        let handle = SessionHandle::new();
        let clone = handle.clone();
        assert_eq!(handle.id(), clone.id());
    }

    #[test]
    fn test_handles_are_distinct() {
        assert_ne!(SessionHandle::new().id(), SessionHandle::new().id());
    }

    #[test]
    fn test_configuration_from_reply() {
        let mut payload = Properties::new();
        payload.insert(
            CONFIG_SEND_AFTER_PROJECTS_READ.to_string(),
            Some("true".to_string()),
        );
        let reply = Message::generic(payload, WorkerId::new(0));
        assert!(Configuration::of(&reply).send_projects());
    }

    #[test]
    fn test_configuration_defaults_to_false() {
        let reply = Message::generic(Properties::new(), WorkerId::new(0));
        assert!(!Configuration::of(&reply).send_projects());
    }

    #[test]
    fn test_registry_lookup_through_clone() {
        let registry = SessionRegistry::new();
        let handle = SessionHandle::new();
        let configuration = Configuration::default();

        assert!(registry.get(&handle).is_none());
        registry.register(&handle, configuration);
        assert_eq!(registry.get(&handle.clone()), Some(configuration));
    }
}
