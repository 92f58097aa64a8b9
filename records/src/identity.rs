use serde::{Deserialize, Serialize};

use crate::Role;

/// What the external identity provider hands over after a successful login.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub user_id: String,
    pub first_name: String,
    pub last_name: String,
    pub emails: Vec<String>,
    pub suggested_role: Option<Role>,
}

impl Identity {
    pub fn primary_email(&self) -> Option<&str> {
        self.emails.first().map(String::as_str)
    }
}
