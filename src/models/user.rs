//! User profile model shared by the session manager and the persisted store.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// A user's role claim: the backend sends either one role or a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Role {
    Single(String),
    Many(Vec<String>),
}

impl Role {
    /// Case-insensitive membership check over either shape.
    pub fn contains(&self, role: &str) -> bool {
        match self {
            Role::Single(r) => r.trim().eq_ignore_ascii_case(role),
            Role::Many(roles) => roles.iter().any(|r| r.trim().eq_ignore_ascii_case(role)),
        }
    }
}

impl From<&str> for Role {
    fn from(role: &str) -> Self {
        Role::Single(role.to_string())
    }
}

/// Denormalized user profile, as returned by the auth API or decoded from
/// the access token.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    /// Backend user ID (numeric IDs are stringified)
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    /// Display name; derived from first/last name when not supplied
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// Any other profile fields the backend sends, kept verbatim
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl UserProfile {
    /// Fill in `name` from first and last name if it is missing or blank.
    ///
    /// An explicit name is never replaced.
    pub fn ensure_display_name(&mut self) {
        if self.name.as_deref().is_some_and(|n| !n.trim().is_empty()) {
            return;
        }

        let combined = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        if !combined.is_empty() {
            self.name = Some(combined);
        }
    }

    pub fn display_name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.role.as_ref().is_some_and(|r| r.contains(role))
    }

    /// Copy over fields that are present in `previous` but missing here.
    ///
    /// Used when a profile re-derived from a rotated token is thinner than
    /// the one we already had for the same user.
    pub fn fill_missing_from(&mut self, previous: &UserProfile) {
        fn fill(slot: &mut Option<String>, prev: &Option<String>) {
            if slot.is_none() {
                slot.clone_from(prev);
            }
        }

        if self.id.is_empty() {
            self.id.clone_from(&previous.id);
        }
        fill(&mut self.email, &previous.email);
        fill(&mut self.first_name, &previous.first_name);
        fill(&mut self.last_name, &previous.last_name);
        fill(&mut self.name, &previous.name);
        fill(&mut self.phone_number, &previous.phone_number);
        fill(&mut self.address, &previous.address);
        if self.role.is_none() {
            self.role.clone_from(&previous.role);
        }
        for (key, value) in &previous.extra {
            self.extra
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
    }
}

/// Accept `"42"`, `42` or `null` for identifier fields.
pub(crate) fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Null => Ok(String::new()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {}",
            other
        ))),
    }
}
