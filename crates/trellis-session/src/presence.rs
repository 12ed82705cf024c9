//! Online users and their presence metadata.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use trellis_core::UserId;

/// A user currently connected to the session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OnlineUser {
    pub id: UserId,
    /// Admins may kick other users.
    pub admin: bool,
    /// Free-form presence data (selection, viewport, frame, ...).
    pub metadata: HashMap<String, Value>,
}

impl OnlineUser {
    pub fn new(id: UserId, admin: bool) -> Self {
        Self {
            id,
            admin,
            metadata: HashMap::new(),
        }
    }
}

/// The online users of a session, keyed by id.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UserTable {
    users: BTreeMap<UserId, OnlineUser>,
}

impl UserTable {
    pub fn new() -> Self {
        Self {
            users: BTreeMap::new(),
        }
    }

    pub fn join(&mut self, user: OnlineUser) {
        self.users.insert(user.id.clone(), user);
    }

    pub fn leave(&mut self, id: &UserId) -> Option<OnlineUser> {
        self.users.remove(id)
    }

    pub fn get(&self, id: &UserId) -> Option<&OnlineUser> {
        self.users.get(id)
    }

    pub fn contains(&self, id: &UserId) -> bool {
        self.users.contains_key(id)
    }

    pub fn is_admin(&self, id: &UserId) -> bool {
        self.users.get(id).map(|u| u.admin).unwrap_or(false)
    }

    /// Merge `data` into a user's metadata. Unknown users are ignored.
    pub fn update_metadata(&mut self, id: &UserId, data: &HashMap<String, Value>) -> bool {
        match self.users.get_mut(id) {
            Some(user) => {
                user.metadata
                    .extend(data.iter().map(|(k, v)| (k.clone(), v.clone())));
                true
            }
            None => false,
        }
    }

    /// Replace the whole table with the host's view.
    pub fn replace(&mut self, users: Vec<OnlineUser>) {
        self.users = users.into_iter().map(|u| (u.id.clone(), u)).collect();
    }

    pub fn clear(&mut self) {
        self.users.clear();
    }

    pub fn to_vec(&self) -> Vec<OnlineUser> {
        self.users.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_join_leave_admin() {
        let mut table = UserTable::new();
        table.join(OnlineUser::new(UserId::new("alice"), true));
        table.join(OnlineUser::new(UserId::new("bob"), false));

        assert_eq!(table.len(), 2);
        assert!(table.is_admin(&UserId::new("alice")));
        assert!(!table.is_admin(&UserId::new("bob")));
        assert!(!table.is_admin(&UserId::new("carol")));

        table.leave(&UserId::new("bob"));
        assert!(!table.contains(&UserId::new("bob")));
    }

    #[test]
    fn test_metadata_merges() {
        let mut table = UserTable::new();
        let bob = UserId::new("bob");
        table.join(OnlineUser::new(bob.clone(), false));

        let first = HashMap::from([
            ("frame".to_string(), json!(10)),
            ("view".to_string(), json!("top")),
        ]);
        let second = HashMap::from([("frame".to_string(), json!(42))]);

        assert!(table.update_metadata(&bob, &first));
        assert!(table.update_metadata(&bob, &second));
        assert!(!table.update_metadata(&UserId::new("ghost"), &second));

        let user = table.get(&bob).unwrap();
        assert_eq!(user.metadata["frame"], json!(42));
        assert_eq!(user.metadata["view"], json!("top"));
    }

    #[test]
    fn test_replace() {
        let mut table = UserTable::new();
        table.join(OnlineUser::new(UserId::new("stale"), false));
        table.replace(vec![OnlineUser::new(UserId::new("host"), true)]);

        assert_eq!(table.len(), 1);
        assert!(table.is_admin(&UserId::new("host")));
    }
}
