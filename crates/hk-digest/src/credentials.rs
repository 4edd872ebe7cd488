use std::fmt;

use serde::{Deserialize, Serialize};

fn is_present(value: &str) -> bool {
    let value = value.trim();
    !value.is_empty() && value != "undefined"
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestCredentials {
    pub username: String,
    pub password: String,
}

impl DigestCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Both parts present, non-blank and not the literal `undefined` that
    /// unresolved template variables leave behind.
    pub fn is_usable(&self) -> bool {
        is_present(&self.username) && is_present(&self.password)
    }
}

impl fmt::Debug for DigestCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DigestCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}
