//! Line codecs for the four account file formats.
//!
//! Parsing is all-or-nothing per file: the first malformed line aborts with
//! `CorruptRecord` naming the file and line. Blank lines are skipped and not
//! re-emitted; everything else round-trips byte-for-byte.

use std::path::Path;

use super::error::StoreError;
use super::record::{GroupRecord, GshadowFields, ShadowFields, UserRecord};

pub const PASSWD_FIELD_COUNT: usize = 7;
pub const GROUP_FIELD_COUNT: usize = 4;
pub const GSHADOW_FIELD_COUNT: usize = 4;
/// name, password and the six aging columns; anything past that is opaque.
pub const SHADOW_MIN_FIELD_COUNT: usize = 8;

/// A shadow line not yet attached to a user record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadowEntry {
    pub name: String,
    pub fields: ShadowFields,
}

/// A gshadow line not yet attached to a group record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GshadowEntry {
    pub name: String,
    pub fields: GshadowFields,
}

fn corrupt(file: &Path, line: usize, reason: impl Into<String>) -> StoreError {
    StoreError::CorruptRecord {
        file: file.to_path_buf(),
        line,
        reason: reason.into(),
    }
}

fn parse_id(file: &Path, line: usize, column: &str, value: &str) -> Result<u32, StoreError> {
    value
        .parse::<u32>()
        .map_err(|_| corrupt(file, line, format!("non-numeric {column} '{value}'")))
}

fn split_members(field: &str) -> Vec<String> {
    if field.is_empty() {
        Vec::new()
    } else {
        field.split(',').map(str::to_string).collect()
    }
}

fn lines(content: &str) -> impl Iterator<Item = (usize, &str)> {
    content
        .lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line))
        .filter(|(_, line)| !line.trim().is_empty())
}

pub fn parse_users(file: &Path, content: &str) -> Result<Vec<UserRecord>, StoreError> {
    let mut users = Vec::new();
    for (lineno, line) in lines(content) {
        let fields: Vec<&str> = line.split(':').collect();
        if fields.len() != PASSWD_FIELD_COUNT {
            return Err(corrupt(
                file,
                lineno,
                format!("expected {PASSWD_FIELD_COUNT} fields, found {}", fields.len()),
            ));
        }
        users.push(UserRecord {
            name: fields[0].to_string(),
            password: fields[1].to_string(),
            uid: parse_id(file, lineno, "uid", fields[2])?,
            gid: parse_id(file, lineno, "gid", fields[3])?,
            gecos: fields[4].to_string(),
            home: fields[5].to_string(),
            shell: fields[6].to_string(),
            shadow: None,
        });
    }
    Ok(users)
}

pub fn serialize_users(users: &[UserRecord]) -> String {
    let mut out = String::new();
    for user in users {
        out.push_str(&format!(
            "{}:{}:{}:{}:{}:{}:{}\n",
            user.name, user.password, user.uid, user.gid, user.gecos, user.home, user.shell
        ));
    }
    out
}

pub fn parse_shadow(file: &Path, content: &str) -> Result<Vec<ShadowEntry>, StoreError> {
    let mut entries = Vec::new();
    for (lineno, line) in lines(content) {
        let fields: Vec<&str> = line.split(':').collect();
        if fields.len() < SHADOW_MIN_FIELD_COUNT {
            return Err(corrupt(
                file,
                lineno,
                format!(
                    "expected at least {SHADOW_MIN_FIELD_COUNT} fields, found {}",
                    fields.len()
                ),
            ));
        }
        entries.push(ShadowEntry {
            name: fields[0].to_string(),
            fields: ShadowFields {
                password: fields[1].to_string(),
                last_change: fields[2].to_string(),
                min: fields[3].to_string(),
                max: fields[4].to_string(),
                warn: fields[5].to_string(),
                inactive: fields[6].to_string(),
                expire: fields[7].to_string(),
                extra: fields[8..].iter().map(|f| f.to_string()).collect(),
            },
        });
    }
    Ok(entries)
}

pub fn serialize_shadow(entries: &[ShadowEntry]) -> String {
    let mut out = String::new();
    for entry in entries {
        let f = &entry.fields;
        out.push_str(&entry.name);
        for field in [
            &f.password,
            &f.last_change,
            &f.min,
            &f.max,
            &f.warn,
            &f.inactive,
            &f.expire,
        ] {
            out.push(':');
            out.push_str(field);
        }
        for field in &f.extra {
            out.push(':');
            out.push_str(field);
        }
        out.push('\n');
    }
    out
}

pub fn parse_groups(file: &Path, content: &str) -> Result<Vec<GroupRecord>, StoreError> {
    let mut groups = Vec::new();
    for (lineno, line) in lines(content) {
        let fields: Vec<&str> = line.split(':').collect();
        if fields.len() != GROUP_FIELD_COUNT {
            return Err(corrupt(
                file,
                lineno,
                format!("expected {GROUP_FIELD_COUNT} fields, found {}", fields.len()),
            ));
        }
        groups.push(GroupRecord {
            name: fields[0].to_string(),
            password: fields[1].to_string(),
            gid: parse_id(file, lineno, "gid", fields[2])?,
            members: split_members(fields[3]),
            gshadow: None,
        });
    }
    Ok(groups)
}

pub fn serialize_groups(groups: &[GroupRecord]) -> String {
    let mut out = String::new();
    for group in groups {
        out.push_str(&format!(
            "{}:{}:{}:{}\n",
            group.name,
            group.password,
            group.gid,
            group.members.join(",")
        ));
    }
    out
}

pub fn parse_gshadow(file: &Path, content: &str) -> Result<Vec<GshadowEntry>, StoreError> {
    let mut entries = Vec::new();
    for (lineno, line) in lines(content) {
        let fields: Vec<&str> = line.split(':').collect();
        if fields.len() != GSHADOW_FIELD_COUNT {
            return Err(corrupt(
                file,
                lineno,
                format!("expected {GSHADOW_FIELD_COUNT} fields, found {}", fields.len()),
            ));
        }
        entries.push(GshadowEntry {
            name: fields[0].to_string(),
            fields: GshadowFields {
                password: fields[1].to_string(),
                admins: split_members(fields[2]),
                members: split_members(fields[3]),
            },
        });
    }
    Ok(entries)
}

pub fn serialize_gshadow(entries: &[GshadowEntry]) -> String {
    let mut out = String::new();
    for entry in entries {
        out.push_str(&format!(
            "{}:{}:{}:{}\n",
            entry.name,
            entry.fields.password,
            entry.fields.admins.join(","),
            entry.fields.members.join(",")
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn file() -> PathBuf {
        PathBuf::from("/etc/passwd")
    }

    #[test]
    fn test_passwd_round_trip() {
        let content = "root:x:0:0:root:/root:/bin/bash\n\
                       daemon:x:1:1:daemon:/usr/sbin:/usr/sbin/nologin\n\
                       alice:x:1000:100:Alice,,,:/home/alice:/bin/zsh\n";
        let users = parse_users(&file(), content).unwrap();
        assert_eq!(users.len(), 3);
        assert_eq!(users[2].name, "alice");
        assert_eq!(users[2].uid, 1000);
        assert_eq!(users[2].gecos, "Alice,,,");
        assert_eq!(serialize_users(&users), content);
    }

    #[test]
    fn test_shadow_round_trip_preserves_reserved_column() {
        let content = "root:$6$salt$hash:19000:0:99999:7:::\n\
                       alice:!:19500:0:99999:7:30:20000:\n";
        let entries = parse_shadow(&file(), content).unwrap();
        assert_eq!(entries[0].fields.extra, vec![String::new()]);
        assert_eq!(entries[1].fields.inactive, "30");
        assert_eq!(serialize_shadow(&entries), content);
    }

    #[test]
    fn test_shadow_accepts_eight_fields() {
        let content = "compact:*:19000:0:99999:7::\n";
        let entries = parse_shadow(&file(), content).unwrap();
        assert!(entries[0].fields.extra.is_empty());
        assert_eq!(serialize_shadow(&entries), content);
    }

    #[test]
    fn test_group_round_trip() {
        let content = "root:x:0:\n\
                       eng:x:1000:alice,bob\n";
        let groups = parse_groups(&file(), content).unwrap();
        assert_eq!(groups[0].members, Vec::<String>::new());
        assert_eq!(groups[1].members, vec!["alice", "bob"]);
        assert_eq!(serialize_groups(&groups), content);
    }

    #[test]
    fn test_gshadow_round_trip() {
        let content = "eng:!:alice:alice,bob\n";
        let entries = parse_gshadow(&file(), content).unwrap();
        assert_eq!(entries[0].fields.admins, vec!["alice"]);
        assert_eq!(entries[0].fields.members, vec!["alice", "bob"]);
        assert_eq!(serialize_gshadow(&entries), content);
    }

    #[test]
    fn test_blank_lines_are_skipped() {
        let content = "root:x:0:0:root:/root:/bin/bash\n\n  \nbin:x:2:2:bin:/bin:/usr/sbin/nologin\n";
        let users = parse_users(&file(), content).unwrap();
        assert_eq!(users.len(), 2);
    }

    #[test]
    fn test_wrong_field_count_is_corrupt() {
        let err = parse_users(&file(), "root:x:0:0:root:/root\n").unwrap_err();
        match err {
            crate::store::error::StoreError::CorruptRecord { line, .. } => assert_eq!(line, 1),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_non_numeric_uid_is_corrupt() {
        let content = "root:x:0:0:root:/root:/bin/bash\nbad:x:abc:0:bad:/:/bin/sh\n";
        let err = parse_users(&file(), content).unwrap_err();
        match err {
            crate::store::error::StoreError::CorruptRecord { line, reason, .. } => {
                assert_eq!(line, 2);
                assert!(reason.contains("uid"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
