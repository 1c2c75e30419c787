use std::time::SystemTime;

use serde::Serialize;

use crate::models::ManagerId;

/// Placeholder address shared by every synthetic local source.
pub const LOCAL_SOURCE_URL: &str = "https://microsoft.com/local-pc-source";

#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize)]
pub struct Source {
    pub manager: ManagerId,
    pub name: String,
    pub url: String,
    pub update_date: Option<SystemTime>,
    pub is_virtual: bool,
}

impl Source {
    pub fn new(manager: ManagerId, name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            manager,
            name: name.into(),
            url: url.into(),
            update_date: None,
            is_virtual: false,
        }
    }

    pub fn local(manager: ManagerId, name: impl Into<String>) -> Self {
        Self {
            manager,
            name: name.into(),
            url: LOCAL_SOURCE_URL.to_string(),
            update_date: None,
            is_virtual: true,
        }
    }

    pub fn update_date(mut self, update_date: SystemTime) -> Self {
        self.update_date = Some(update_date);
        self
    }
}
