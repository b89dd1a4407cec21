//! The account store: a transactional engine for the POSIX account files.
//!
//! Lookups read a fresh snapshot without taking the database lock, so they
//! may observe either side of a concurrent commit (each commit itself is
//! atomic). Every mutation runs read-modify-write under the exclusive
//! cross-process lock; two racing mutators serialize, and the loser
//! revalidates against the winner's committed state.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use glob::Pattern;
use regex::Regex;
use serde::Serialize;

pub mod codec;
pub mod database;
pub mod error;
pub mod lock;
pub mod provision;
pub mod record;

pub use error::{StoreError, Warning};
pub use provision::{FsProvisioner, ProvisionError, Provisioner};
pub use record::{GroupRecord, GshadowFields, ShadowFields, UserRecord};

use crate::common::config::Settings;
use database::AccountDatabase;
use lock::{LockManager, PUBLIC_FILE_MODE, SHADOW_FILE_MODE, StagedWrite};

/// Tag distinguishing the two record variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    User,
    Group,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Kind::User => write!(f, "user"),
            Kind::Group => write!(f, "group"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Record {
    User(UserRecord),
    Group(GroupRecord),
}

impl Record {
    pub fn name(&self) -> &str {
        match self {
            Record::User(user) => &user.name,
            Record::Group(group) => &group.name,
        }
    }

    pub fn id(&self) -> u32 {
        match self {
            Record::User(user) => user.uid,
            Record::Group(group) => group.gid,
        }
    }
}

#[derive(Debug, Clone)]
pub struct UserOptions {
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub home: Option<String>,
    pub shell: Option<String>,
    pub comment: Option<String>,
    pub create_home: bool,
    pub create_mail: bool,
}

impl Default for UserOptions {
    fn default() -> Self {
        Self {
            uid: None,
            gid: None,
            home: None,
            shell: None,
            comment: None,
            create_home: true,
            create_mail: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GroupOptions {
    pub gid: Option<u32>,
    pub members: Vec<String>,
}

/// Result of a user mutation. Warnings carry provisioning failures and
/// advisory integrity notices; the record itself is already committed.
#[derive(Debug)]
pub struct UserChange {
    pub record: UserRecord,
    pub warnings: Vec<Warning>,
}

#[derive(Debug)]
pub struct GroupChange {
    pub record: GroupRecord,
    pub warnings: Vec<Warning>,
}

pub struct AccountStore {
    settings: Settings,
    lock: LockManager,
    provisioner: Box<dyn Provisioner>,
    name_pattern: Regex,
}

impl AccountStore {
    pub fn new(settings: Settings) -> Result<Self, StoreError> {
        let provisioner = FsProvisioner::new(
            settings.physical(&settings.mail_dir),
            settings.mail_gid,
        );
        Self::with_provisioner(settings, Box::new(provisioner))
    }

    pub fn with_provisioner(
        settings: Settings,
        provisioner: Box<dyn Provisioner>,
    ) -> Result<Self, StoreError> {
        let name_pattern = match &settings.name_pattern {
            Some(pattern) => Regex::new(pattern).map_err(|err| {
                StoreError::InvalidRecord(format!("bad name_pattern '{pattern}': {err}"))
            })?,
            None => record::default_name_pattern().clone(),
        };
        let lock = LockManager::new(
            settings.lock_file.clone(),
            Duration::from_millis(settings.lock_timeout_ms),
            settings.backup,
        );
        Ok(Self {
            settings,
            lock,
            provisioner,
            name_pattern,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Parse a fresh snapshot of all account files. A missing file reads as
    /// empty, so a pristine `--root` tree bootstraps itself.
    pub fn load(&self) -> Result<AccountDatabase, StoreError> {
        let passwd = self.read_optional(&self.settings.passwd_file)?.unwrap_or_default();
        let group = self.read_optional(&self.settings.group_file)?.unwrap_or_default();
        let shadow = self.read_optional(&self.settings.shadow_file)?.unwrap_or_default();
        let gshadow = self.read_optional(&self.settings.gshadow_file)?.unwrap_or_default();

        let users = codec::parse_users(&self.settings.passwd_file, &passwd)?;
        let shadow = codec::parse_shadow(&self.settings.shadow_file, &shadow)?;
        let groups = codec::parse_groups(&self.settings.group_file, &group)?;
        let gshadow = codec::parse_gshadow(&self.settings.gshadow_file, &gshadow)?;
        Ok(AccountDatabase::new(users, shadow, groups, gshadow))
    }

    fn read_optional(&self, path: &Path) -> Result<Option<String>, StoreError> {
        match std::fs::read_to_string(path) {
            Ok(content) => Ok(Some(content)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Read-modify-write under the exclusive lock. The closure mutates a
    /// private snapshot; on success all files commit atomically, on error
    /// nothing on disk changes.
    fn with_lock<T>(
        &self,
        mutate: impl FnOnce(&mut AccountDatabase) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let guard = self.lock.begin()?;
        let mut db = self.load()?;
        let value = mutate(&mut db)?;
        guard.commit(&self.stage_writes(&db))?;
        Ok(value)
    }

    fn stage_writes(&self, db: &AccountDatabase) -> Vec<StagedWrite> {
        let mut writes = vec![
            StagedWrite {
                path: self.settings.passwd_file.clone(),
                content: db.passwd_content(),
                mode_if_new: PUBLIC_FILE_MODE,
            },
            StagedWrite {
                path: self.settings.group_file.clone(),
                content: db.group_content(),
                mode_if_new: PUBLIC_FILE_MODE,
            },
        ];
        if db.has_shadow_data() || self.settings.shadow_file.exists() {
            writes.push(StagedWrite {
                path: self.settings.shadow_file.clone(),
                content: db.shadow_content(),
                mode_if_new: SHADOW_FILE_MODE,
            });
        }
        if db.has_gshadow_data() || self.settings.gshadow_file.exists() {
            writes.push(StagedWrite {
                path: self.settings.gshadow_file.clone(),
                content: db.gshadow_content(),
                mode_if_new: SHADOW_FILE_MODE,
            });
        }
        writes
    }

    // ---- lookups -----------------------------------------------------

    pub fn by_id(&self, kind: Kind, id: u32) -> Result<Option<Record>, StoreError> {
        let db = self.load()?;
        Ok(match kind {
            Kind::User => db.user_by_uid(id).cloned().map(Record::User),
            Kind::Group => db.group_by_gid(id).cloned().map(Record::Group),
        })
    }

    pub fn by_name(&self, kind: Kind, name: &str) -> Result<Option<Record>, StoreError> {
        let db = self.load()?;
        Ok(match kind {
            Kind::User => db.user_by_name(name).cloned().map(Record::User),
            Kind::Group => db.group_by_name(name).cloned().map(Record::Group),
        })
    }

    pub fn user_by_name(&self, name: &str) -> Result<Option<UserRecord>, StoreError> {
        Ok(self.load()?.user_by_name(name).cloned())
    }

    pub fn group_by_name(&self, name: &str) -> Result<Option<GroupRecord>, StoreError> {
        Ok(self.load()?.group_by_name(name).cloned())
    }

    /// Records whose name matches the shell-style pattern, in file order.
    /// Each call rescans current state.
    pub fn enumerate(&self, kind: Kind, pattern: &str) -> Result<Vec<Record>, StoreError> {
        let pattern = Pattern::new(pattern)
            .map_err(|err| StoreError::InvalidRecord(format!("bad glob pattern: {err}")))?;
        let db = self.load()?;
        Ok(match kind {
            Kind::User => db
                .users()
                .iter()
                .filter(|u| pattern.matches(&u.name))
                .cloned()
                .map(Record::User)
                .collect(),
            Kind::Group => db
                .groups()
                .iter()
                .filter(|g| pattern.matches(&g.name))
                .cloned()
                .map(Record::Group)
                .collect(),
        })
    }

    pub fn list(&self, kind: Kind) -> Result<Vec<Record>, StoreError> {
        self.enumerate(kind, "*")
    }

    // ---- creation ----------------------------------------------------

    fn build_user(
        &self,
        db: &AccountDatabase,
        name: &str,
        opts: &UserOptions,
    ) -> Result<UserRecord, StoreError> {
        record::validate_name(name, &self.name_pattern)?;
        if db.user_by_name(name).is_some() {
            return Err(StoreError::DuplicateName {
                kind: Kind::User,
                name: name.to_string(),
            });
        }
        let uid = match opts.uid {
            Some(uid) => {
                if db.user_by_uid(uid).is_some() {
                    return Err(StoreError::DuplicateId {
                        kind: Kind::User,
                        id: uid,
                    });
                }
                uid
            }
            None => db.next_free_id(
                Kind::User,
                self.settings.uid_range.min,
                self.settings.uid_range.max,
            )?,
        };
        let home = match &opts.home {
            Some(home) => home.clone(),
            None => self
                .settings
                .home_base
                .join(name)
                .to_string_lossy()
                .into_owned(),
        };
        Ok(UserRecord {
            name: name.to_string(),
            password: "x".to_string(),
            uid,
            gid: opts.gid.unwrap_or(self.settings.default_gid),
            gecos: opts.comment.clone().unwrap_or_default(),
            home,
            shell: opts
                .shell
                .clone()
                .unwrap_or_else(|| self.settings.default_shell.clone()),
            shadow: Some(ShadowFields::for_new_user(days_since_epoch())),
        })
    }

    /// Validate and fill in a user record without persisting it. The id is
    /// tentative; [`AccountStore::add_user`] revalidates under the lock.
    pub fn new_user(&self, name: &str, opts: &UserOptions) -> Result<UserRecord, StoreError> {
        let db = self.load()?;
        self.build_user(&db, name, opts)
    }

    /// Create and persist a user in one lock scope, then provision home and
    /// mail spool outside it.
    pub fn create_user(&self, name: &str, opts: &UserOptions) -> Result<UserChange, StoreError> {
        let (record, mut warnings) = self.with_lock(|db| {
            let record = self.build_user(db, name, opts)?;
            let warnings = advisory_warnings(db, &record);
            db.push_user(record.clone())?;
            Ok((record, warnings))
        })?;
        self.provision_user(&record, opts.create_home, opts.create_mail, &mut warnings);
        Ok(UserChange { record, warnings })
    }

    /// Persist a previously built record. Uniqueness is re-checked under the
    /// lock, so a record that went stale fails with DuplicateName/Id.
    pub fn add_user(
        &self,
        record: &UserRecord,
        create_home: bool,
        create_mail: bool,
    ) -> Result<UserChange, StoreError> {
        record::validate_name(&record.name, &self.name_pattern)?;
        let mut warnings = self.with_lock(|db| {
            let warnings = advisory_warnings(db, record);
            db.push_user(record.clone())?;
            Ok(warnings)
        })?;
        self.provision_user(record, create_home, create_mail, &mut warnings);
        Ok(UserChange {
            record: record.clone(),
            warnings,
        })
    }

    fn build_group(
        &self,
        db: &AccountDatabase,
        name: &str,
        opts: &GroupOptions,
    ) -> Result<GroupRecord, StoreError> {
        record::validate_name(name, &self.name_pattern)?;
        if db.group_by_name(name).is_some() {
            return Err(StoreError::DuplicateName {
                kind: Kind::Group,
                name: name.to_string(),
            });
        }
        let gid = match opts.gid {
            Some(gid) => {
                if db.group_by_gid(gid).is_some() {
                    return Err(StoreError::DuplicateId {
                        kind: Kind::Group,
                        id: gid,
                    });
                }
                gid
            }
            None => db.next_free_id(
                Kind::Group,
                self.settings.gid_range.min,
                self.settings.gid_range.max,
            )?,
        };
        let mut members: Vec<String> = Vec::new();
        for member in &opts.members {
            if !members.contains(member) {
                members.push(member.clone());
            }
        }
        // Only keep a gshadow entry when the system maintains that file.
        let gshadow = self
            .settings
            .gshadow_file
            .exists()
            .then(|| GshadowFields {
                password: "!".to_string(),
                admins: Vec::new(),
                members: members.clone(),
            });
        Ok(GroupRecord {
            name: name.to_string(),
            password: "x".to_string(),
            gid,
            members,
            gshadow,
        })
    }

    pub fn new_group(&self, name: &str, opts: &GroupOptions) -> Result<GroupRecord, StoreError> {
        let db = self.load()?;
        self.build_group(&db, name, opts)
    }

    pub fn create_group(&self, name: &str, opts: &GroupOptions) -> Result<GroupChange, StoreError> {
        let record = self.with_lock(|db| {
            let record = self.build_group(db, name, opts)?;
            db.push_group(record.clone())?;
            Ok(record)
        })?;
        Ok(GroupChange {
            record,
            warnings: Vec::new(),
        })
    }

    pub fn add_group(&self, record: &GroupRecord) -> Result<(), StoreError> {
        record::validate_name(&record.name, &self.name_pattern)?;
        self.with_lock(|db| db.push_group(record.clone()))
    }

    // ---- modification ------------------------------------------------

    /// Replace the user identified by `record.uid`. Renaming is allowed and
    /// keeps the uid; a missing uid is a hard error.
    pub fn modify_user(&self, record: &UserRecord) -> Result<Vec<Warning>, StoreError> {
        record::validate_name(&record.name, &self.name_pattern)?;
        self.with_lock(|db| {
            db.update_user(record)?;
            Ok(advisory_warnings(db, record))
        })
    }

    pub fn modify_group(&self, record: &GroupRecord) -> Result<(), StoreError> {
        record::validate_name(&record.name, &self.name_pattern)?;
        self.with_lock(|db| db.update_group(record))
    }

    // ---- deletion and lock state -------------------------------------

    /// Remove a record. Returns false when nothing by that id exists —
    /// deleting twice is a no-op, not an error. Home and mail spool are left
    /// alone; callers compose removal explicitly.
    pub fn delete(&self, kind: Kind, id: u32) -> Result<bool, StoreError> {
        self.with_lock(|db| {
            Ok(match kind {
                Kind::User => db.remove_user(id),
                Kind::Group => db.remove_group(id),
            })
        })
    }

    pub fn set_locked(&self, kind: Kind, id: u32, locked: bool) -> Result<bool, StoreError> {
        self.with_lock(|db| {
            Ok(match kind {
                Kind::User => db.set_user_locked(id, locked),
                Kind::Group => db.set_group_locked(id, locked),
            })
        })
    }

    pub fn lock_record(&self, kind: Kind, id: u32) -> Result<bool, StoreError> {
        self.set_locked(kind, id, true)
    }

    pub fn unlock_record(&self, kind: Kind, id: u32) -> Result<bool, StoreError> {
        self.set_locked(kind, id, false)
    }

    // ---- home and mail lifecycle -------------------------------------

    fn provision_user(
        &self,
        record: &UserRecord,
        create_home: bool,
        create_mail: bool,
        warnings: &mut Vec<Warning>,
    ) {
        if create_home
            && let Err(source) = self.create_home_for(record)
        {
            warnings.push(Warning::Provisioning {
                what: "creating home directory",
                user: record.name.clone(),
                source,
            });
        }
        if create_mail
            && let Err(source) = self.create_mail_for(record)
        {
            warnings.push(Warning::Provisioning {
                what: "creating mail spool",
                user: record.name.clone(),
                source,
            });
        }
    }

    pub fn create_home_for(&self, record: &UserRecord) -> Result<(), ProvisionError> {
        let home = self.settings.physical(Path::new(&record.home));
        let skel = self.settings.physical(&self.settings.skel_dir);
        self.provisioner
            .create_home(&home, Some(&skel), record.uid, record.gid)
    }

    pub fn remove_home_for(&self, record: &UserRecord) -> Result<(), ProvisionError> {
        let home = self.settings.physical(Path::new(&record.home));
        self.provisioner.remove_home(&home)
    }

    pub fn has_home(&self, record: &UserRecord) -> bool {
        self.settings.physical(Path::new(&record.home)).is_dir()
    }

    pub fn create_mail_for(&self, record: &UserRecord) -> Result<(), ProvisionError> {
        self.provisioner
            .create_mail_spool(&record.name, record.uid, record.gid)
    }

    pub fn remove_mail_for(&self, record: &UserRecord) -> Result<(), ProvisionError> {
        self.provisioner.remove_mail_spool(&record.name)
    }
}

fn advisory_warnings(db: &AccountDatabase, record: &UserRecord) -> Vec<Warning> {
    if db.group_by_gid(record.gid).is_none() {
        vec![Warning::UnknownPrimaryGroup {
            user: record.name.clone(),
            gid: record.gid,
        }]
    } else {
        Vec::new()
    }
}

fn days_since_epoch() -> i64 {
    Utc::now().timestamp().div_euclid(86400)
}
