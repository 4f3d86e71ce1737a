use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub nickname: String,
    pub email: String,
    pub phone: String,
    /// Per-channel contact handles, e.g. `{"dingtalk_robot_token": "..."}`.
    pub contacts: BTreeMap<String, String>,
    pub roles: Vec<String>,
    pub update_at: i64,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.roles.iter().any(|r| r == "Admin")
    }

    /// Contact handle for a channel's `contact_key`.
    pub fn contact(&self, key: &str) -> Option<&str> {
        let v = match key {
            "email" => self.email.as_str(),
            "phone" => self.phone.as_str(),
            other => self.contacts.get(other).map(String::as_str).unwrap_or(""),
        };
        (!v.is_empty()).then_some(v)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UserGroup {
    pub id: i64,
    pub name: String,
    pub user_ids: Vec<i64>,
    pub update_at: i64,
}
