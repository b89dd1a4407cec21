use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Default settings file location. Missing file means defaults.
pub const DEFAULT_SETTINGS_PATH: &str = "/etc/usrctl.toml";

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdRange {
    pub min: u32,
    pub max: u32,
}

fn default_passwd_file() -> PathBuf {
    PathBuf::from("/etc/passwd")
}

fn default_group_file() -> PathBuf {
    PathBuf::from("/etc/group")
}

fn default_shadow_file() -> PathBuf {
    PathBuf::from("/etc/shadow")
}

fn default_gshadow_file() -> PathBuf {
    PathBuf::from("/etc/gshadow")
}

/// glibc's lckpwdf lock file; sharing it means cooperating with the
/// system's own passwd tooling.
fn default_lock_file() -> PathBuf {
    PathBuf::from("/etc/.pwd.lock")
}

fn default_uid_range() -> IdRange {
    IdRange { min: 1000, max: 60000 }
}

fn default_gid_range() -> IdRange {
    IdRange { min: 1000, max: 60000 }
}

fn default_gid() -> u32 {
    100 // the conventional "users" group
}

fn default_shell() -> String {
    "/bin/bash".to_string()
}

fn default_home_base() -> PathBuf {
    PathBuf::from("/home")
}

fn default_skel_dir() -> PathBuf {
    PathBuf::from("/etc/skel")
}

fn default_mail_dir() -> PathBuf {
    PathBuf::from("/var/mail")
}

fn default_mail_gid() -> u32 {
    8 // "mail" on most distributions
}

fn default_lock_timeout_ms() -> u64 {
    3000
}

fn default_backup() -> bool {
    true
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Settings {
    #[serde(default = "default_passwd_file")]
    pub passwd_file: PathBuf,
    #[serde(default = "default_group_file")]
    pub group_file: PathBuf,
    #[serde(default = "default_shadow_file")]
    pub shadow_file: PathBuf,
    #[serde(default = "default_gshadow_file")]
    pub gshadow_file: PathBuf,
    #[serde(default = "default_lock_file")]
    pub lock_file: PathBuf,
    #[serde(default = "default_uid_range")]
    pub uid_range: IdRange,
    #[serde(default = "default_gid_range")]
    pub gid_range: IdRange,
    #[serde(default = "default_gid")]
    pub default_gid: u32,
    #[serde(default = "default_shell")]
    pub default_shell: String,
    #[serde(default = "default_home_base")]
    pub home_base: PathBuf,
    #[serde(default = "default_skel_dir")]
    pub skel_dir: PathBuf,
    #[serde(default = "default_mail_dir")]
    pub mail_dir: PathBuf,
    #[serde(default = "default_mail_gid")]
    pub mail_gid: u32,
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
    #[serde(default = "default_backup")]
    pub backup: bool,
    /// Override for the account name syntax. Defaults to the usual
    /// `^[a-z_][a-z0-9_-]*$` when unset.
    #[serde(default)]
    pub name_pattern: Option<String>,
    /// Set by `--root`; never read from the settings file.
    #[serde(skip)]
    pub root: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        toml::from_str("").expect("empty settings deserialize via field defaults")
    }
}

impl Settings {
    /// Load settings. An explicitly given path must exist; the default
    /// `/etc/usrctl.toml` is optional.
    pub fn load(path: Option<&Path>) -> Result<Settings> {
        let (path, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_SETTINGS_PATH), false),
        };
        if !path.exists() {
            if required {
                anyhow::bail!("settings file {} does not exist", path.display());
            }
            return Ok(Settings::default());
        }
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("reading settings {}", path.display()))?;
        let mut settings: Settings = toml::from_str(&raw)
            .with_context(|| format!("parsing settings {}", path.display()))?;
        settings.expand_tildes();
        Ok(settings)
    }

    fn expand_tildes(&mut self) {
        for path in [
            &mut self.passwd_file,
            &mut self.group_file,
            &mut self.shadow_file,
            &mut self.gshadow_file,
            &mut self.lock_file,
            &mut self.home_base,
            &mut self.skel_dir,
            &mut self.mail_dir,
        ] {
            if let Some(s) = path.to_str() {
                *path = PathBuf::from(shellexpand::tilde(s).into_owned());
            }
        }
    }

    /// Re-root the account files under `root` (the `--root` flag, analogous
    /// to shadow-utils `--prefix`). Lets tests and image builds operate on a
    /// directory tree instead of the running system. Home, skeleton and mail
    /// paths stay logical — records keep `/home/name` — and provisioning
    /// resolves them through [`Settings::physical`].
    pub fn reroot(&mut self, root: &Path) {
        let rebase = |path: &mut PathBuf| {
            let relative = path
                .strip_prefix("/")
                .map(Path::to_path_buf)
                .unwrap_or_else(|_| path.clone());
            *path = root.join(relative);
        };
        rebase(&mut self.passwd_file);
        rebase(&mut self.group_file);
        rebase(&mut self.shadow_file);
        rebase(&mut self.gshadow_file);
        rebase(&mut self.lock_file);
        self.root = Some(root.to_path_buf());
    }

    /// Where a logical path actually lives on disk.
    pub fn physical(&self, path: &Path) -> PathBuf {
        match &self.root {
            Some(root) => {
                let relative = path.strip_prefix("/").unwrap_or(path);
                root.join(relative)
            }
            None => path.to_path_buf(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.passwd_file, PathBuf::from("/etc/passwd"));
        assert_eq!(settings.uid_range.min, 1000);
        assert_eq!(settings.default_shell, "/bin/bash");
        assert!(settings.backup);
        assert!(settings.name_pattern.is_none());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let settings: Settings = toml::from_str(
            r#"
            passwd_file = "/tmp/passwd"
            lock_timeout_ms = 250
            "#,
        )
        .unwrap();
        assert_eq!(settings.passwd_file, PathBuf::from("/tmp/passwd"));
        assert_eq!(settings.lock_timeout_ms, 250);
        assert_eq!(settings.group_file, PathBuf::from("/etc/group"));
    }

    #[test]
    fn test_reroot() {
        let mut settings = Settings::default();
        settings.reroot(Path::new("/srv/chroot"));
        assert_eq!(settings.passwd_file, PathBuf::from("/srv/chroot/etc/passwd"));
        assert_eq!(settings.lock_file, PathBuf::from("/srv/chroot/etc/.pwd.lock"));
        // logical paths are unchanged, physical resolution applies the root
        assert_eq!(settings.home_base, PathBuf::from("/home"));
        assert_eq!(
            settings.physical(Path::new("/home/alice")),
            PathBuf::from("/srv/chroot/home/alice")
        );
    }

    #[test]
    fn test_physical_without_root_is_identity() {
        let settings = Settings::default();
        assert_eq!(
            settings.physical(Path::new("/var/mail")),
            PathBuf::from("/var/mail")
        );
    }
}
