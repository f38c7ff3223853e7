use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Person {
    pub id: i32,
    pub name: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PersonRole {
    #[serde(rename = "PI")]
    Investigator,
    Contact,
    Manager,
}

impl PersonRole {
    pub fn label(&self) -> &'static str {
        match self {
            PersonRole::Investigator => "PI",
            PersonRole::Contact => "Contact",
            PersonRole::Manager => "Manager",
        }
    }
}

/// Free-text note attached to design experiments after registration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub comment: String,
    pub username: String,
    pub time: String, // yyyy-MM-ddTHH:mm:ss.SSSZ
}

impl Note {
    pub fn new(comment: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            comment: comment.into(),
            username: username.into(),
            time: chrono::Utc::now()
                .format("%Y-%m-%dT%H:%M:%S%.3fZ")
                .to_string(),
        }
    }
}

/// Acting user, taken from request headers; recorded as project owner and note author
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserContext {
    pub user_id: String,
    pub user_name: Option<String>,
}

impl UserContext {
    pub fn new(user_id: impl Into<String>, user_name: Option<String>) -> Self {
        Self {
            user_id: user_id.into(),
            user_name,
        }
    }

    pub fn display_name(&self) -> &str {
        self.user_name.as_deref().unwrap_or(&self.user_id)
    }
}

impl Default for UserContext {
    /// Development fallback when no user headers are sent
    fn default() -> Self {
        Self::new("dev-user", None)
    }
}
