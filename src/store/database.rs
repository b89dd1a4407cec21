//! In-memory aggregate of the account files.
//!
//! Record order mirrors on-disk line order; the name/id maps are derived
//! indices rebuilt after every mutation. An `AccountDatabase` is private to
//! a single operation and never outlives the lock scope that loaded it.

use std::collections::HashMap;

use super::codec::{GshadowEntry, ShadowEntry};
use super::error::StoreError;
use super::record::{GroupRecord, UserRecord};
use super::{codec, Kind};

#[derive(Debug, Default)]
pub struct AccountDatabase {
    users: Vec<UserRecord>,
    groups: Vec<GroupRecord>,
    /// Shadow entries naming no user in the users file. Kept so a rewrite
    /// never drops lines the engine does not own.
    orphan_shadow: Vec<ShadowEntry>,
    orphan_gshadow: Vec<GshadowEntry>,
    user_names: HashMap<String, usize>,
    user_ids: HashMap<u32, usize>,
    group_names: HashMap<String, usize>,
    group_ids: HashMap<u32, usize>,
}

impl AccountDatabase {
    pub fn new(
        mut users: Vec<UserRecord>,
        shadow: Vec<ShadowEntry>,
        mut groups: Vec<GroupRecord>,
        gshadow: Vec<GshadowEntry>,
    ) -> Self {
        let mut orphan_shadow = Vec::new();
        let mut by_name: HashMap<&str, usize> = HashMap::new();
        for (idx, user) in users.iter().enumerate() {
            by_name.entry(user.name.as_str()).or_insert(idx);
        }
        let mut shadow_targets: Vec<(usize, ShadowEntry)> = Vec::new();
        for entry in shadow {
            match by_name.get(entry.name.as_str()) {
                Some(&idx) => shadow_targets.push((idx, entry)),
                None => orphan_shadow.push(entry),
            }
        }
        for (idx, entry) in shadow_targets {
            users[idx].shadow = Some(entry.fields);
        }

        let mut orphan_gshadow = Vec::new();
        let mut group_by_name: HashMap<&str, usize> = HashMap::new();
        for (idx, group) in groups.iter().enumerate() {
            group_by_name.entry(group.name.as_str()).or_insert(idx);
        }
        let mut gshadow_targets: Vec<(usize, GshadowEntry)> = Vec::new();
        for entry in gshadow {
            match group_by_name.get(entry.name.as_str()) {
                Some(&idx) => gshadow_targets.push((idx, entry)),
                None => orphan_gshadow.push(entry),
            }
        }
        for (idx, entry) in gshadow_targets {
            groups[idx].gshadow = Some(entry.fields);
        }

        let mut db = Self {
            users,
            groups,
            orphan_shadow,
            orphan_gshadow,
            ..Default::default()
        };
        db.rebuild_indices();
        db
    }

    /// First occurrence wins on pre-existing duplicates, like getpwnam.
    fn rebuild_indices(&mut self) {
        self.user_names.clear();
        self.user_ids.clear();
        for (idx, user) in self.users.iter().enumerate() {
            self.user_names.entry(user.name.clone()).or_insert(idx);
            self.user_ids.entry(user.uid).or_insert(idx);
        }
        self.group_names.clear();
        self.group_ids.clear();
        for (idx, group) in self.groups.iter().enumerate() {
            self.group_names.entry(group.name.clone()).or_insert(idx);
            self.group_ids.entry(group.gid).or_insert(idx);
        }
    }

    pub fn users(&self) -> &[UserRecord] {
        &self.users
    }

    pub fn groups(&self) -> &[GroupRecord] {
        &self.groups
    }

    pub fn user_by_uid(&self, uid: u32) -> Option<&UserRecord> {
        self.user_ids.get(&uid).map(|&idx| &self.users[idx])
    }

    pub fn user_by_name(&self, name: &str) -> Option<&UserRecord> {
        self.user_names.get(name).map(|&idx| &self.users[idx])
    }

    pub fn group_by_gid(&self, gid: u32) -> Option<&GroupRecord> {
        self.group_ids.get(&gid).map(|&idx| &self.groups[idx])
    }

    pub fn group_by_name(&self, name: &str) -> Option<&GroupRecord> {
        self.group_names.get(name).map(|&idx| &self.groups[idx])
    }

    /// Lowest unused id in `[floor, ceiling]`.
    pub fn next_free_id(&self, kind: Kind, floor: u32, ceiling: u32) -> Result<u32, StoreError> {
        let taken = |id: u32| match kind {
            Kind::User => self.user_ids.contains_key(&id),
            Kind::Group => self.group_ids.contains_key(&id),
        };
        (floor..=ceiling).find(|&id| !taken(id)).ok_or_else(|| {
            StoreError::InvalidRecord(format!("no free {kind} id in range {floor}-{ceiling}"))
        })
    }

    pub fn push_user(&mut self, user: UserRecord) -> Result<(), StoreError> {
        if self.user_names.contains_key(&user.name) {
            return Err(StoreError::DuplicateName {
                kind: Kind::User,
                name: user.name,
            });
        }
        if self.user_ids.contains_key(&user.uid) {
            return Err(StoreError::DuplicateId {
                kind: Kind::User,
                id: user.uid,
            });
        }
        self.users.push(user);
        self.rebuild_indices();
        Ok(())
    }

    /// Replace the user with the same uid. Renames re-key the shadow entry
    /// implicitly (it lives inside the record) and rewrite group member and
    /// administrator lists that referenced the old name.
    pub fn update_user(&mut self, user: &UserRecord) -> Result<(), StoreError> {
        let idx = *self
            .user_ids
            .get(&user.uid)
            .ok_or_else(|| StoreError::NotFound {
                kind: Kind::User,
                key: user.uid.to_string(),
            })?;
        if let Some(&other) = self.user_names.get(&user.name)
            && other != idx
        {
            return Err(StoreError::DuplicateName {
                kind: Kind::User,
                name: user.name.clone(),
            });
        }
        let old_name = self.users[idx].name.clone();
        let old_shadow = self.users[idx].shadow.clone();
        self.users[idx] = user.clone();
        if self.users[idx].shadow.is_none() {
            self.users[idx].shadow = old_shadow;
        }
        if old_name != user.name {
            self.rename_member_refs(&old_name, &user.name);
        }
        self.rebuild_indices();
        Ok(())
    }

    /// Remove a user and scrub it from group member/administrator lists.
    /// Returns false when no such uid exists.
    pub fn remove_user(&mut self, uid: u32) -> bool {
        let Some(&idx) = self.user_ids.get(&uid) else {
            return false;
        };
        let name = self.users[idx].name.clone();
        self.users.remove(idx);
        for group in &mut self.groups {
            group.members.retain(|m| *m != name);
            if let Some(gshadow) = group.gshadow.as_mut() {
                gshadow.members.retain(|m| *m != name);
                gshadow.admins.retain(|m| *m != name);
            }
        }
        self.rebuild_indices();
        true
    }

    fn rename_member_refs(&mut self, old: &str, new: &str) {
        let rename = |list: &mut Vec<String>| {
            for member in list.iter_mut() {
                if member == old {
                    *member = new.to_string();
                }
            }
        };
        for group in &mut self.groups {
            rename(&mut group.members);
            if let Some(gshadow) = group.gshadow.as_mut() {
                rename(&mut gshadow.members);
                rename(&mut gshadow.admins);
            }
        }
    }

    pub fn push_group(&mut self, group: GroupRecord) -> Result<(), StoreError> {
        if self.group_names.contains_key(&group.name) {
            return Err(StoreError::DuplicateName {
                kind: Kind::Group,
                name: group.name,
            });
        }
        if self.group_ids.contains_key(&group.gid) {
            return Err(StoreError::DuplicateId {
                kind: Kind::Group,
                id: group.gid,
            });
        }
        self.groups.push(group);
        self.rebuild_indices();
        Ok(())
    }

    pub fn update_group(&mut self, group: &GroupRecord) -> Result<(), StoreError> {
        let idx = *self
            .group_ids
            .get(&group.gid)
            .ok_or_else(|| StoreError::NotFound {
                kind: Kind::Group,
                key: group.gid.to_string(),
            })?;
        if let Some(&other) = self.group_names.get(&group.name)
            && other != idx
        {
            return Err(StoreError::DuplicateName {
                kind: Kind::Group,
                name: group.name.clone(),
            });
        }
        let old_gshadow = self.groups[idx].gshadow.clone();
        self.groups[idx] = group.clone();
        if self.groups[idx].gshadow.is_none() {
            self.groups[idx].gshadow = old_gshadow;
        }
        self.rebuild_indices();
        Ok(())
    }

    pub fn remove_group(&mut self, gid: u32) -> bool {
        let Some(&idx) = self.group_ids.get(&gid) else {
            return false;
        };
        self.groups.remove(idx);
        self.rebuild_indices();
        true
    }

    pub fn set_user_locked(&mut self, uid: u32, locked: bool) -> bool {
        let Some(&idx) = self.user_ids.get(&uid) else {
            return false;
        };
        self.users[idx].set_locked(locked);
        true
    }

    pub fn set_group_locked(&mut self, gid: u32, locked: bool) -> bool {
        let Some(&idx) = self.group_ids.get(&gid) else {
            return false;
        };
        self.groups[idx].set_locked(locked);
        true
    }

    pub fn passwd_content(&self) -> String {
        codec::serialize_users(&self.users)
    }

    /// Shadow entries follow users-file order; orphan lines are appended at
    /// the end unchanged.
    pub fn shadow_content(&self) -> String {
        let mut entries: Vec<ShadowEntry> = self
            .users
            .iter()
            .filter_map(|user| {
                user.shadow.as_ref().map(|fields| ShadowEntry {
                    name: user.name.clone(),
                    fields: fields.clone(),
                })
            })
            .collect();
        entries.extend(self.orphan_shadow.iter().cloned());
        codec::serialize_shadow(&entries)
    }

    pub fn group_content(&self) -> String {
        codec::serialize_groups(&self.groups)
    }

    pub fn gshadow_content(&self) -> String {
        let mut entries: Vec<GshadowEntry> = self
            .groups
            .iter()
            .filter_map(|group| {
                group.gshadow.as_ref().map(|fields| GshadowEntry {
                    name: group.name.clone(),
                    fields: fields.clone(),
                })
            })
            .collect();
        entries.extend(self.orphan_gshadow.iter().cloned());
        codec::serialize_gshadow(&entries)
    }

    pub fn has_shadow_data(&self) -> bool {
        !self.orphan_shadow.is_empty() || self.users.iter().any(|u| u.shadow.is_some())
    }

    pub fn has_gshadow_data(&self) -> bool {
        !self.orphan_gshadow.is_empty() || self.groups.iter().any(|g| g.gshadow.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::record::ShadowFields;

    fn user(name: &str, uid: u32) -> UserRecord {
        UserRecord {
            name: name.to_string(),
            password: "x".to_string(),
            uid,
            gid: 100,
            gecos: String::new(),
            home: format!("/home/{name}"),
            shell: "/bin/bash".to_string(),
            shadow: Some(ShadowFields::for_new_user(20000)),
        }
    }

    fn group(name: &str, gid: u32, members: &[&str]) -> GroupRecord {
        GroupRecord {
            name: name.to_string(),
            password: "x".to_string(),
            gid,
            members: members.iter().map(|m| m.to_string()).collect(),
            gshadow: None,
        }
    }

    fn empty_db() -> AccountDatabase {
        AccountDatabase::new(Vec::new(), Vec::new(), Vec::new(), Vec::new())
    }

    #[test]
    fn test_uniqueness_enforced() {
        let mut db = empty_db();
        db.push_user(user("alice", 1000)).unwrap();

        let err = db.push_user(user("alice", 1001)).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateName { .. }));

        let err = db.push_user(user("bob", 1000)).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateId { .. }));

        db.push_user(user("bob", 1001)).unwrap();
        assert_eq!(db.users().len(), 2);
    }

    #[test]
    fn test_next_free_id_skips_taken() {
        let mut db = empty_db();
        db.push_user(user("a", 1000)).unwrap();
        db.push_user(user("b", 1001)).unwrap();
        db.push_user(user("c", 1003)).unwrap();
        assert_eq!(db.next_free_id(Kind::User, 1000, 60000).unwrap(), 1002);

        let err = db.next_free_id(Kind::User, 1000, 1001).unwrap_err();
        assert!(matches!(err, StoreError::InvalidRecord(_)));
    }

    #[test]
    fn test_rename_propagates_to_groups() {
        let mut db = empty_db();
        db.push_user(user("alice", 1000)).unwrap();
        db.push_group(group("eng", 500, &["alice", "bob"])).unwrap();

        let mut renamed = db.user_by_uid(1000).unwrap().clone();
        renamed.name = "alicia".to_string();
        db.update_user(&renamed).unwrap();

        assert!(db.user_by_name("alice").is_none());
        assert_eq!(db.user_by_uid(1000).unwrap().name, "alicia");
        assert_eq!(db.group_by_name("eng").unwrap().members, vec!["alicia", "bob"]);
    }

    #[test]
    fn test_modify_preserves_shadow_when_absent_from_input() {
        let mut db = empty_db();
        db.push_user(user("alice", 1000)).unwrap();

        let mut changed = db.user_by_uid(1000).unwrap().clone();
        changed.shell = "/bin/zsh".to_string();
        changed.shadow = None;
        db.update_user(&changed).unwrap();

        let stored = db.user_by_uid(1000).unwrap();
        assert_eq!(stored.shell, "/bin/zsh");
        assert!(stored.shadow.is_some());
    }

    #[test]
    fn test_modify_unknown_uid_is_not_found() {
        let mut db = empty_db();
        let err = db.update_user(&user("ghost", 4242)).unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[test]
    fn test_delete_scrubs_membership_and_is_idempotent() {
        let mut db = empty_db();
        db.push_user(user("alice", 1000)).unwrap();
        db.push_group(group("eng", 500, &["alice", "bob"])).unwrap();

        assert!(db.remove_user(1000));
        assert_eq!(db.group_by_name("eng").unwrap().members, vec!["bob"]);
        assert!(!db.remove_user(1000));
        assert_eq!(db.users().len(), 0);
    }

    #[test]
    fn test_orphan_shadow_lines_survive_rewrite() {
        let entries = vec![ShadowEntry {
            name: "ghost".to_string(),
            fields: ShadowFields::for_new_user(19000),
        }];
        let mut db = AccountDatabase::new(vec![user("alice", 1000)], entries, Vec::new(), Vec::new());
        db.push_user(user("bob", 1001)).unwrap();
        let shadow = db.shadow_content();
        assert!(shadow.contains("ghost:"));
        // user entries come first, in users-file order
        let names: Vec<&str> = shadow.lines().map(|l| l.split(':').next().unwrap()).collect();
        assert_eq!(names, vec!["alice", "bob", "ghost"]);
    }
}
