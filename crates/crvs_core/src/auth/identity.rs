//! Actor identity resolution.

use crate::auth::scope::{ScopeName, ScopeParseError, ScopeSet};
use crate::model::record::ActorId;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Authenticated actor as seen by the workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: ActorId,
    pub role: String,
    pub scopes: ScopeSet,
}

impl Actor {
    /// Whether the actor may release or move other actors' assignments.
    pub fn can_override(&self) -> bool {
        self.scopes.has(ScopeName::UserUnassignOthers)
    }
}

/// Resolves bearer tokens into actors.
pub trait IdentityProvider {
    fn resolve(&self, token: &str) -> Result<Actor, IdentityError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    MissingToken,
    UnknownToken,
    InvalidScope(ScopeParseError),
}

impl Display for IdentityError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingToken => write!(f, "missing access token"),
            Self::UnknownToken => write!(f, "access token is not recognized"),
            Self::InvalidScope(err) => write!(f, "{err}"),
        }
    }
}

impl Error for IdentityError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidScope(err) => Some(err),
            Self::MissingToken | Self::UnknownToken => None,
        }
    }
}

impl From<ScopeParseError> for IdentityError {
    fn from(value: ScopeParseError) -> Self {
        Self::InvalidScope(value)
    }
}

/// Serialized identity entry, e.g. from a fixtures file.
#[derive(Debug, Clone, Deserialize)]
pub struct StaticIdentity {
    pub token: String,
    pub actor_id: String,
    pub role: String,
    #[serde(default)]
    pub scopes: Vec<String>,
}

/// Fixed token table, used by tests and the operator CLI.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentityProvider {
    actors: BTreeMap<String, Actor>,
}

impl StaticIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a provider from identity entries; any invalid scope fails.
    pub fn from_entries(
        entries: impl IntoIterator<Item = StaticIdentity>,
    ) -> Result<Self, IdentityError> {
        let mut provider = Self::new();
        for entry in entries {
            let scopes = ScopeSet::parse(entry.scopes.iter().map(String::as_str))?;
            provider.insert(
                entry.token,
                Actor {
                    id: ActorId::new(entry.actor_id),
                    role: entry.role,
                    scopes,
                },
            );
        }
        Ok(provider)
    }

    pub fn insert(&mut self, token: impl Into<String>, actor: Actor) {
        self.actors.insert(token.into(), actor);
    }

    pub fn with_actor(mut self, token: impl Into<String>, actor: Actor) -> Self {
        self.insert(token, actor);
        self
    }
}

impl IdentityProvider for StaticIdentityProvider {
    fn resolve(&self, token: &str) -> Result<Actor, IdentityError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(IdentityError::MissingToken);
        }
        self.actors
            .get(token)
            .cloned()
            .ok_or(IdentityError::UnknownToken)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_known_tokens_only() {
        let provider = StaticIdentityProvider::from_entries([StaticIdentity {
            token: "t-admin".to_string(),
            actor_id: "admin".to_string(),
            role: "NATIONAL_SYSTEM_ADMIN".to_string(),
            scopes: vec!["record.read".to_string(), "user.unassign-others".to_string()],
        }])
        .expect("valid identities");

        let actor = provider.resolve("t-admin").expect("known token");
        assert_eq!(actor.id, ActorId::from("admin"));
        assert!(actor.can_override());

        assert_eq!(provider.resolve(""), Err(IdentityError::MissingToken));
        assert_eq!(provider.resolve("t-other"), Err(IdentityError::UnknownToken));
    }

    #[test]
    fn invalid_scopes_fail_loading() {
        let result = StaticIdentityProvider::from_entries([StaticIdentity {
            token: "t".to_string(),
            actor_id: "a".to_string(),
            role: "R".to_string(),
            scopes: vec!["record.fly".to_string()],
        }]);
        assert!(matches!(result, Err(IdentityError::InvalidScope(_))));
    }
}
