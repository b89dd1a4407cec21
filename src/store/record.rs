use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

use super::error::StoreError;

/// Marker prepended to a password hash to disable the account.
/// Same convention as `usermod -L`.
pub const LOCK_MARKER: char = '!';

/// Names an account must not exceed (matches shadow-utils).
pub const MAX_NAME_LEN: usize = 32;

static DEFAULT_NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z_][a-z0-9_-]*$").unwrap());

pub fn default_name_pattern() -> &'static Regex {
    &DEFAULT_NAME_PATTERN
}

/// Validate an account name against the given pattern.
pub fn validate_name(name: &str, pattern: &Regex) -> Result<(), StoreError> {
    if name.is_empty() {
        return Err(StoreError::InvalidRecord("empty account name".to_string()));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(StoreError::InvalidRecord(format!(
            "account name '{name}' exceeds {MAX_NAME_LEN} characters"
        )));
    }
    if !pattern.is_match(name) {
        return Err(StoreError::InvalidRecord(format!(
            "account name '{name}' does not match {}",
            pattern.as_str()
        )));
    }
    Ok(())
}

/// Shadow columns for a user. All fields are carried verbatim; the engine
/// only ever interprets the password column far enough to lock/unlock it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShadowFields {
    pub password: String,
    pub last_change: String,
    pub min: String,
    pub max: String,
    pub warn: String,
    pub inactive: String,
    pub expire: String,
    /// Columns past the eighth, preserved byte-for-byte.
    pub extra: Vec<String>,
}

impl ShadowFields {
    /// Aging defaults applied by `useradd`: password disabled until one is
    /// set, no minimum age, 99999-day maximum, one week of warning.
    pub fn for_new_user(last_change_days: i64) -> Self {
        Self {
            password: LOCK_MARKER.to_string(),
            last_change: last_change_days.to_string(),
            min: "0".to_string(),
            max: "99999".to_string(),
            warn: "7".to_string(),
            inactive: String::new(),
            expire: String::new(),
            extra: vec![String::new()],
        }
    }
}

/// One line of the users file, plus the shadow entry keyed by the same name.
/// `shadow: None` means the user has no shadow entry; `modify` treats it as
/// "leave the existing entry untouched".
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserRecord {
    pub name: String,
    pub password: String,
    pub uid: u32,
    pub gid: u32,
    pub gecos: String,
    pub home: String,
    pub shell: String,
    pub shadow: Option<ShadowFields>,
}

impl UserRecord {
    fn password_field(&mut self) -> &mut String {
        match self.shadow.as_mut() {
            Some(shadow) => &mut shadow.password,
            None => &mut self.password,
        }
    }

    pub fn is_locked(&self) -> bool {
        let field = match self.shadow.as_ref() {
            Some(shadow) => &shadow.password,
            None => &self.password,
        };
        field.starts_with(LOCK_MARKER)
    }

    /// Prefix the disable marker. Already-locked accounts are left alone so
    /// that `unlock` always restores the original hash.
    pub fn set_locked(&mut self, locked: bool) {
        let field = self.password_field();
        match (locked, field.starts_with(LOCK_MARKER)) {
            (true, false) => field.insert(0, LOCK_MARKER),
            (false, true) => {
                field.remove(0);
            }
            _ => {}
        }
    }
}

/// Gshadow columns for a group. Present only when the gshadow file carries
/// an entry for the group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GshadowFields {
    pub password: String,
    pub admins: Vec<String>,
    pub members: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupRecord {
    pub name: String,
    pub password: String,
    pub gid: u32,
    pub members: Vec<String>,
    pub gshadow: Option<GshadowFields>,
}

impl GroupRecord {
    /// Administrator names, from the gshadow entry when one exists.
    pub fn admins(&self) -> &[String] {
        self.gshadow.as_ref().map(|g| g.admins.as_slice()).unwrap_or(&[])
    }

    fn password_field(&mut self) -> &mut String {
        match self.gshadow.as_mut() {
            Some(gshadow) => &mut gshadow.password,
            None => &mut self.password,
        }
    }

    pub fn is_locked(&self) -> bool {
        let field = match self.gshadow.as_ref() {
            Some(gshadow) => &gshadow.password,
            None => &self.password,
        };
        field.starts_with(LOCK_MARKER)
    }

    pub fn set_locked(&mut self, locked: bool) {
        let field = self.password_field();
        match (locked, field.starts_with(LOCK_MARKER)) {
            (true, false) => field.insert(0, LOCK_MARKER),
            (false, true) => {
                field.remove(0);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_validation() {
        let pattern = default_name_pattern();
        assert!(validate_name("alice", pattern).is_ok());
        assert!(validate_name("_system", pattern).is_ok());
        assert!(validate_name("web-data1", pattern).is_ok());

        assert!(validate_name("", pattern).is_err());
        assert!(validate_name("Alice", pattern).is_err());
        assert!(validate_name("1alice", pattern).is_err());
        assert!(validate_name("al ice", pattern).is_err());
        assert!(validate_name(&"a".repeat(33), pattern).is_err());
    }

    #[test]
    fn test_lock_unlock_restores_hash() {
        let mut user = UserRecord {
            name: "alice".to_string(),
            password: "x".to_string(),
            uid: 1000,
            gid: 100,
            gecos: String::new(),
            home: "/home/alice".to_string(),
            shell: "/bin/bash".to_string(),
            shadow: Some(ShadowFields {
                password: "$6$salt$hash".to_string(),
                last_change: "20000".to_string(),
                min: "0".to_string(),
                max: "99999".to_string(),
                warn: "7".to_string(),
                inactive: String::new(),
                expire: String::new(),
                extra: vec![String::new()],
            }),
        };

        assert!(!user.is_locked());
        user.set_locked(true);
        assert!(user.is_locked());
        assert_eq!(user.shadow.as_ref().unwrap().password, "!$6$salt$hash");

        // Locking twice must not stack markers.
        user.set_locked(true);
        assert_eq!(user.shadow.as_ref().unwrap().password, "!$6$salt$hash");

        user.set_locked(false);
        assert!(!user.is_locked());
        assert_eq!(user.shadow.as_ref().unwrap().password, "$6$salt$hash");
    }

    #[test]
    fn test_lock_without_shadow_uses_passwd_field() {
        let mut user = UserRecord {
            name: "legacy".to_string(),
            password: "abcdef".to_string(),
            uid: 1001,
            gid: 100,
            gecos: String::new(),
            home: "/home/legacy".to_string(),
            shell: "/bin/sh".to_string(),
            shadow: None,
        };
        user.set_locked(true);
        assert_eq!(user.password, "!abcdef");
        user.set_locked(false);
        assert_eq!(user.password, "abcdef");
    }
}
