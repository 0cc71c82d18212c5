//! The durable `username -> {password_hash, permissions}` mapping
//! backing login, admin authorization, and permission checks.
//!
//! Grounded on `server.py`'s `init_users`/`update_users`/`create_user`/
//! `update_user`/`delete_user`: every mutation is followed immediately by
//! a full rewrite of the users file, serialized behind a single mutex so
//! concurrent admin requests never interleave partial writes.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::common;

/// One of the three permission letters a user can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Permission {
    #[serde(rename = "r")]
    Read,
    #[serde(rename = "w")]
    Write,
    #[serde(rename = "a")]
    Admin,
}

impl Permission {
    pub fn as_str(self) -> &'static str {
        match self {
            Permission::Read => "r",
            Permission::Write => "w",
            Permission::Admin => "a",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "r" => Some(Permission::Read),
            "w" => Some(Permission::Write),
            "a" => Some(Permission::Admin),
            _ => None,
        }
    }

    pub fn can_read(self) -> bool {
        matches!(self, Permission::Read | Permission::Write | Permission::Admin)
    }

    pub fn can_write(self) -> bool {
        matches!(self, Permission::Write | Permission::Admin)
    }

    pub fn can_admin(self) -> bool {
        matches!(self, Permission::Admin)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    pub password_hash: String,
    pub permissions: Permission,
}

/// A mutation to apply to an existing user via `update_user`. Any field
/// left `None` is left untouched; `password`, if present, is hashed
/// before being stored (matching `server.py::update_user`'s special
/// casing of the `password` key in `to_modify`).
#[derive(Debug, Default)]
pub struct UserUpdate {
    pub password: Option<String>,
    pub permissions: Option<Permission>,
}

struct State {
    users: HashMap<String, User>,
}

pub struct UsersStore {
    path: PathBuf,
    state: Mutex<State>,
}

impl UsersStore {
    /// Load the users file at `path`, creating it (empty) if it is
    /// missing or contains an empty file, matching `server.py`'s
    /// try-read/fallback-to-`init_users` sequence.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let users = match fs::read_to_string(path) {
            Ok(contents) if contents.trim().is_empty() => HashMap::new(),
            Ok(contents) => serde_json::from_str::<HashMap<String, User>>(&contents)
                .context("parsing users file")?,
            Err(_) => {
                info!("users file missing, creating a fresh one");
                HashMap::new()
            }
        };

        let store = UsersStore { path: path.to_path_buf(), state: Mutex::new(State { users }) };
        store.persist()?;
        Ok(store)
    }

    fn persist(&self) -> anyhow::Result<()> {
        let state = self.state.lock().expect("users lock poisoned");
        let encoded = serde_json::to_string(&state.users).context("encoding users file")?;
        fs::write(&self.path, encoded).context("writing users file")?;
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().expect("users lock poisoned").users.is_empty()
    }

    pub fn get(&self, username: &str) -> Option<User> {
        self.state.lock().expect("users lock poisoned").users.get(username).cloned()
    }

    pub fn exists(&self, username: &str) -> bool {
        self.state.lock().expect("users lock poisoned").users.contains_key(username)
    }

    /// Check a plaintext password against the stored hash for `username`,
    /// used by login, admin authorization, and clear-user-sessions.
    pub fn check_password(&self, username: &str, password: &str) -> bool {
        match self.get(username) {
            Some(user) => user.password_hash == common::hash_password(password),
            None => false,
        }
    }

    pub fn all_usernames(&self) -> Vec<String> {
        let state = self.state.lock().expect("users lock poisoned");
        let mut names: Vec<String> = state.users.keys().cloned().collect();
        names.sort();
        names
    }

    #[instrument(skip(self, password))]
    pub fn create_user(
        &self,
        username: &str,
        password: &str,
        permissions: Permission,
    ) -> anyhow::Result<()> {
        {
            let mut state = self.state.lock().expect("users lock poisoned");
            state.users.insert(
                username.to_string(),
                User {
                    username: username.to_string(),
                    password_hash: common::hash_password(password),
                    permissions,
                },
            );
        }
        self.persist()
    }

    #[instrument(skip(self, update))]
    pub fn update_user(&self, username: &str, update: UserUpdate) -> anyhow::Result<bool> {
        {
            let mut state = self.state.lock().expect("users lock poisoned");
            let Some(user) = state.users.get_mut(username) else {
                return Ok(false);
            };
            if let Some(password) = update.password {
                user.password_hash = common::hash_password(&password);
            }
            if let Some(permissions) = update.permissions {
                user.permissions = permissions;
            }
        }
        self.persist()?;
        Ok(true)
    }

    #[instrument(skip(self))]
    pub fn delete_user(&self, username: &str) -> anyhow::Result<bool> {
        {
            let mut state = self.state.lock().expect("users lock poisoned");
            if state.users.remove(username).is_none() {
                return Ok(false);
            }
        }
        self.persist()?;
        Ok(true)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tempfile::tempdir;

    fn store() -> (tempfile::TempDir, UsersStore) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("users.json");
        let store = UsersStore::load(&path).unwrap();
        (dir, store)
    }

    #[test]
    fn fresh_store_is_empty_and_persisted() {
        let (dir, store) = store();
        assert!(store.is_empty());
        assert!(dir.path().join("users.json").exists());
    }

    #[test]
    fn create_then_reload_survives() {
        let (dir, store) = store();
        store.create_user("alice", "hunter2", Permission::Admin).unwrap();
        assert!(store.check_password("alice", "hunter2"));
        assert!(!store.check_password("alice", "wrong"));

        let reloaded = UsersStore::load(&dir.path().join("users.json")).unwrap();
        assert!(reloaded.exists("alice"));
        assert_eq!(reloaded.get("alice").unwrap().permissions, Permission::Admin);
    }

    #[test]
    fn update_user_rehashes_password() {
        let (_dir, store) = store();
        store.create_user("bob", "old", Permission::Read).unwrap();
        let updated = store
            .update_user(
                "bob",
                UserUpdate { password: Some("new".to_string()), permissions: None },
            )
            .unwrap();
        assert!(updated);
        assert!(store.check_password("bob", "new"));
        assert!(!store.check_password("bob", "old"));
    }

    #[test]
    fn delete_user_removes_from_store() {
        let (_dir, store) = store();
        store.create_user("carol", "pw", Permission::Write).unwrap();
        assert!(store.delete_user("carol").unwrap());
        assert!(!store.exists("carol"));
        assert!(!store.delete_user("carol").unwrap());
    }

    #[test]
    fn all_usernames_sorted() {
        let (_dir, store) = store();
        store.create_user("zed", "pw", Permission::Read).unwrap();
        store.create_user("amy", "pw", Permission::Read).unwrap();
        assert_eq!(store.all_usernames(), vec!["amy".to_string(), "zed".to_string()]);
    }
}
