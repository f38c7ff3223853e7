use serde::{Deserialize, Serialize};

/// Named group of same-tier samples collapsed into one derived sample
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pool {
    pub name: String,
    /// Member sample codes in declared order
    pub members: Vec<String>,
}

impl Pool {
    pub fn new(name: impl Into<String>, members: Vec<String>) -> Self {
        Self {
            name: name.into(),
            members,
        }
    }
}
