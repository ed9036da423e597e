use serde::{Deserialize, Serialize};

/// Principal role. The wire contract uses the long names; the legacy
/// synonyms `admin` and `user` are accepted on input and normalized here,
/// so no internal code ever branches on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
  #[serde(alias = "admin")]
  Administrator,
  Operator,
  #[serde(alias = "user")]
  Viewer,
}

impl Role {
  pub fn as_str(&self) -> &'static str {
    match self {
      Role::Administrator => "administrator",
      Role::Operator => "operator",
      Role::Viewer => "viewer",
    }
  }

  pub fn is_admin(&self) -> bool {
    matches!(self, Role::Administrator)
  }
}

impl std::fmt::Display for Role {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// An authenticated identity. Immutable inside a request; hydrated from the
/// catalog store during token verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
  pub id: String,
  pub username: String,
  pub role: Role,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub email: Option<String>,
  #[serde(default = "default_active")]
  pub is_active: bool,
}

fn default_active() -> bool {
  true
}

impl Principal {
  /// The compact shape injected as `X-User-Info` towards downstream
  /// services: `{id, username, role, email?}`.
  pub fn to_header_json(&self) -> serde_json::Value {
    let mut obj = serde_json::json!({
      "id": self.id,
      "username": self.username,
      "role": self.role,
    });
    if let Some(email) = &self.email {
      obj["email"] = serde_json::json!(email);
    }
    obj
  }
}

/// User record as the catalog store returns it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
  pub id: String,
  pub username: String,
  pub role: Role,
  #[serde(default)]
  pub email: Option<String>,
  #[serde(default = "default_active")]
  pub is_active: bool,
}

impl From<UserRecord> for Principal {
  fn from(user: UserRecord) -> Self {
    Principal {
      id: user.id,
      username: user.username,
      role: user.role,
      email: user.email,
      is_active: user.is_active,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn legacy_role_synonyms_normalize_on_ingress() {
    let admin: Role = serde_json::from_str("\"admin\"").unwrap();
    assert_eq!(admin, Role::Administrator);
    let viewer: Role = serde_json::from_str("\"user\"").unwrap();
    assert_eq!(viewer, Role::Viewer);
    // And serialization always emits the contract names.
    assert_eq!(serde_json::to_string(&admin).unwrap(), "\"administrator\"");
    assert_eq!(serde_json::to_string(&viewer).unwrap(), "\"viewer\"");
  }

  #[test]
  fn contract_names_still_parse() {
    assert_eq!(
      serde_json::from_str::<Role>("\"operator\"").unwrap(),
      Role::Operator
    );
    assert_eq!(
      serde_json::from_str::<Role>("\"administrator\"").unwrap(),
      Role::Administrator
    );
  }

  #[test]
  fn header_json_omits_email_when_absent() {
    let p = Principal {
      id: "u-1".into(),
      username: "alice".into(),
      role: Role::Administrator,
      email: None,
      is_active: true,
    };
    let v = p.to_header_json();
    assert_eq!(v["role"], "administrator");
    assert!(v.get("email").is_none());
  }
}
