//! Home directory and mail spool lifecycle.
//!
//! Provisioning runs outside the database lock: copying a skeleton tree or
//! deleting a large home must never block other account mutations. Removal
//! of something that does not exist is success, so delete flows can be
//! retried freely.

use std::fs::{self, Permissions};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use nix::unistd::{Gid, Uid, chown};
use thiserror::Error;
use walkdir::WalkDir;

pub const HOME_MODE: u32 = 0o755;
pub const MAIL_SPOOL_MODE: u32 = 0o600;

#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("{} already exists", path.display())]
    AlreadyExists { path: PathBuf },

    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("changing owner of {}: {source}", path.display())]
    Chown {
        path: PathBuf,
        source: nix::errno::Errno,
    },
}

impl ProvisionError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

pub trait Provisioner: Send + Sync {
    fn create_home(
        &self,
        home: &Path,
        skel: Option<&Path>,
        uid: u32,
        gid: u32,
    ) -> Result<(), ProvisionError>;

    fn remove_home(&self, home: &Path) -> Result<(), ProvisionError>;

    fn create_mail_spool(&self, name: &str, uid: u32, gid: u32) -> Result<(), ProvisionError>;

    fn remove_mail_spool(&self, name: &str) -> Result<(), ProvisionError>;
}

/// Direct filesystem implementation.
#[derive(Debug, Clone)]
pub struct FsProvisioner {
    mail_dir: PathBuf,
    mail_gid: u32,
}

impl FsProvisioner {
    pub fn new(mail_dir: PathBuf, mail_gid: u32) -> Self {
        Self { mail_dir, mail_gid }
    }

    fn spool_path(&self, name: &str) -> PathBuf {
        self.mail_dir.join(name)
    }

    fn copy_skeleton(skel: &Path, home: &Path, uid: Uid, gid: Gid) -> Result<(), ProvisionError> {
        for entry in WalkDir::new(skel).min_depth(1) {
            let entry = entry.map_err(|err| {
                let path = err.path().unwrap_or(skel).to_path_buf();
                ProvisionError::Io {
                    source: err.into(),
                    path,
                }
            })?;
            let relative = entry
                .path()
                .strip_prefix(skel)
                .expect("walkdir yields paths under its root");
            let target = home.join(relative);
            if entry.file_type().is_dir() {
                fs::create_dir_all(&target).map_err(|e| ProvisionError::io(&target, e))?;
            } else if entry.file_type().is_symlink() {
                let link = fs::read_link(entry.path())
                    .map_err(|e| ProvisionError::io(entry.path(), e))?;
                std::os::unix::fs::symlink(&link, &target)
                    .map_err(|e| ProvisionError::io(&target, e))?;
            } else {
                // fs::copy carries the source permissions over
                fs::copy(entry.path(), &target).map_err(|e| ProvisionError::io(&target, e))?;
            }
            if !entry.file_type().is_symlink() {
                chown(&target, Some(uid), Some(gid)).map_err(|source| ProvisionError::Chown {
                    path: target.clone(),
                    source,
                })?;
            }
        }
        Ok(())
    }
}

impl Provisioner for FsProvisioner {
    fn create_home(
        &self,
        home: &Path,
        skel: Option<&Path>,
        uid: u32,
        gid: u32,
    ) -> Result<(), ProvisionError> {
        if home.exists() {
            return Err(ProvisionError::AlreadyExists {
                path: home.to_path_buf(),
            });
        }
        fs::create_dir_all(home).map_err(|e| ProvisionError::io(home, e))?;
        fs::set_permissions(home, Permissions::from_mode(HOME_MODE))
            .map_err(|e| ProvisionError::io(home, e))?;

        let uid = Uid::from_raw(uid);
        let gid = Gid::from_raw(gid);
        if let Some(skel) = skel
            && skel.is_dir()
        {
            Self::copy_skeleton(skel, home, uid, gid)?;
        }
        chown(home, Some(uid), Some(gid)).map_err(|source| ProvisionError::Chown {
            path: home.to_path_buf(),
            source,
        })?;
        Ok(())
    }

    fn remove_home(&self, home: &Path) -> Result<(), ProvisionError> {
        if !home.exists() {
            return Ok(());
        }
        fs::remove_dir_all(home).map_err(|e| ProvisionError::io(home, e))
    }

    fn create_mail_spool(&self, name: &str, uid: u32, _gid: u32) -> Result<(), ProvisionError> {
        let path = self.spool_path(name);
        if path.exists() {
            return Err(ProvisionError::AlreadyExists { path });
        }
        fs::create_dir_all(&self.mail_dir).map_err(|e| ProvisionError::io(&self.mail_dir, e))?;
        fs::File::create(&path).map_err(|e| ProvisionError::io(&path, e))?;
        fs::set_permissions(&path, Permissions::from_mode(MAIL_SPOOL_MODE))
            .map_err(|e| ProvisionError::io(&path, e))?;
        chown(
            &path,
            Some(Uid::from_raw(uid)),
            Some(Gid::from_raw(self.mail_gid)),
        )
        .map_err(|source| ProvisionError::Chown {
            path: path.clone(),
            source,
        })?;
        Ok(())
    }

    fn remove_mail_spool(&self, name: &str) -> Result<(), ProvisionError> {
        let path = self.spool_path(name);
        if !path.exists() {
            return Ok(());
        }
        fs::remove_file(&path).map_err(|e| ProvisionError::io(&path, e))
    }
}
