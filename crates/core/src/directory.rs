//! Collaborators consumed but not owned by the routing engine: the
//! organization directory and the form-template catalog.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::config::DirectoryConfig;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: String,
    pub name: String,
    pub department: Option<String>,
}

pub trait Directory: Send + Sync {
    fn member(&self, actor_id: &str) -> Option<Member>;

    fn is_administrator(&self, actor_id: &str) -> bool;

    /// Display name, falling back to the raw id for unknown actors.
    fn display_name(&self, actor_id: &str) -> String {
        self.member(actor_id).map(|member| member.name).unwrap_or_else(|| actor_id.to_string())
    }
}

pub trait FormCatalog: Send + Sync {
    fn form_name(&self, sformno: &str) -> Option<String>;
}

#[derive(Clone, Debug, Default)]
pub struct StaticDirectory {
    members: HashMap<String, Member>,
    administrators: HashSet<String>,
}

impl StaticDirectory {
    pub fn new(members: Vec<Member>, administrators: Vec<String>) -> Self {
        Self {
            members: members.into_iter().map(|member| (member.id.clone(), member)).collect(),
            administrators: administrators.into_iter().collect(),
        }
    }

    pub fn from_config(config: &DirectoryConfig) -> Self {
        let members = config
            .members
            .iter()
            .map(|(id, entry)| Member {
                id: id.clone(),
                name: entry.name.clone(),
                department: entry.department.clone(),
            })
            .collect();
        Self::new(members, config.administrators.clone())
    }
}

impl Directory for StaticDirectory {
    fn member(&self, actor_id: &str) -> Option<Member> {
        self.members.get(actor_id).cloned()
    }

    fn is_administrator(&self, actor_id: &str) -> bool {
        self.administrators.contains(actor_id)
    }
}

#[derive(Clone, Debug, Default)]
pub struct StaticFormCatalog {
    forms: HashMap<String, String>,
}

impl StaticFormCatalog {
    pub fn new(forms: HashMap<String, String>) -> Self {
        Self { forms }
    }

    pub fn from_config(config: &DirectoryConfig) -> Self {
        Self::new(config.forms.clone())
    }
}

impl FormCatalog for StaticFormCatalog {
    fn form_name(&self, sformno: &str) -> Option<String> {
        self.forms.get(sformno).cloned()
    }
}
