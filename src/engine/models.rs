//! Domain records shared by the repositories, the policy layer and the API.

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

/// Record status. Stored as 1 (active) / 2 (disabled).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Active,
    Disabled,
}

impl Status {
    pub fn code(self) -> i64 {
        match self {
            Status::Active => 1,
            Status::Disabled => 2,
        }
    }

    pub fn from_code(code: i64) -> Self {
        if code == 1 {
            Status::Active
        } else {
            Status::Disabled
        }
    }

    pub fn is_active(self) -> bool {
        self == Status::Active
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: i64,
    pub name: String,
    /// Stable identity used as the policy subject.
    pub keyword: String,
    pub description: Option<String>,
    pub status: Status,
    /// Privilege rank, lower is more privileged.
    pub sort: u32,
    pub creator: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRole {
    pub name: String,
    pub keyword: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Status,
    pub sort: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Api {
    pub id: i64,
    pub method: String,
    /// Route template, e.g. `/user/update/:userId`.
    pub path: String,
    pub category: String,
    pub description: String,
    pub creator: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewApi {
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Menu {
    pub id: i64,
    pub name: String,
    pub title: String,
    pub path: String,
    pub parent_id: i64,
    pub sort: u32,
    pub status: Status,
    pub creator: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMenu {
    pub name: String,
    pub title: String,
    pub path: String,
    #[serde(default)]
    pub parent_id: i64,
    pub sort: u32,
    #[serde(default)]
    pub status: Status,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub nickname: Option<String>,
    pub status: Status,
    pub creator: String,
    pub roles: Vec<Role>,
}

impl User {
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Keywords of the roles that are not disabled.
    pub fn active_role_keywords(&self) -> Vec<String> {
        self.roles
            .iter()
            .filter(|r| r.status.is_active())
            .map(|r| r.keyword.clone())
            .collect()
    }

    pub fn role_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.roles.iter().map(|r| r.id).collect();
        ids.sort_unstable();
        ids
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub password_hash: String,
    pub nickname: Option<String>,
    pub status: Status,
    pub role_ids: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserUpdate {
    pub username: String,
    pub nickname: Option<String>,
    pub status: Status,
    pub role_ids: Vec<i64>,
    /// Replacement password hash; `None` keeps the stored one.
    pub password_hash: Option<String>,
}

/// Filters for the user list. Paging applies only when both page fields
/// are given.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct UserQuery {
    pub username: Option<String>,
    pub nickname: Option<String>,
    pub status: Option<Status>,
    pub page_num: Option<u32>,
    pub page_size: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn role(id: i64, keyword: &str, status: Status) -> Role {
        Role {
            id,
            name: keyword.to_string(),
            keyword: keyword.to_string(),
            description: None,
            status,
            sort: 3,
            creator: "system".to_string(),
        }
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(Status::from_code(1), Status::Active);
        assert_eq!(Status::from_code(2), Status::Disabled);
        assert_eq!(Status::Disabled.code(), 2);
    }

    #[test]
    fn test_active_role_keywords_skip_disabled() {
        let user = User {
            id: 1,
            username: "alice".into(),
            password_hash: String::new(),
            nickname: None,
            status: Status::Active,
            creator: "system".into(),
            roles: vec![role(2, "user", Status::Active), role(3, "guest", Status::Disabled)],
        };
        assert_eq!(user.active_role_keywords(), vec!["user".to_string()]);
        assert_eq!(user.role_ids(), vec![2, 3]);
    }

    #[test]
    fn test_password_hash_not_serialized() {
        let user = User {
            id: 1,
            username: "alice".into(),
            password_hash: "secret".into(),
            nickname: None,
            status: Status::Active,
            creator: "system".into(),
            roles: vec![],
        };
        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("secret"));
    }
}
