use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A throwaway root tree for one test. The binary runs with `--root` so it
/// never touches the real account files.
pub struct TestEnvironment {
    temp_dir: TempDir,
}

impl TestEnvironment {
    pub fn new() -> Result<Self> {
        let env = Self {
            temp_dir: tempfile::tempdir()?,
        };
        fs::create_dir_all(env.etc_dir())?;
        Ok(env)
    }

    /// The tree root passed to `--root`.
    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn etc_dir(&self) -> PathBuf {
        self.root().join("etc")
    }

    pub fn passwd_path(&self) -> PathBuf {
        self.etc_dir().join("passwd")
    }

    pub fn group_path(&self) -> PathBuf {
        self.etc_dir().join("group")
    }

    pub fn shadow_path(&self) -> PathBuf {
        self.etc_dir().join("shadow")
    }

    pub fn home_path(&self, name: &str) -> PathBuf {
        self.root().join("home").join(name)
    }

    /// Seed the tree with a small but realistic set of accounts. `carol`
    /// carries a real password hash so lock/unlock round-trips are visible.
    pub fn seed(&self) -> Result<()> {
        fs::write(
            self.passwd_path(),
            "root:x:0:0:root:/root:/bin/bash\n\
             carol:x:1500:100:Carol:/home/carol:/bin/bash\n",
        )?;
        fs::write(
            self.group_path(),
            "root:x:0:\n\
             users:x:100:\n\
             eng:x:990:carol\n",
        )?;
        fs::write(
            self.shadow_path(),
            "root:*:19000:0:99999:7:::\n\
             carol:$6$abc$def:19500:0:99999:7:::\n",
        )?;
        Ok(())
    }

    pub fn read(&self, path: &Path) -> Result<String> {
        Ok(fs::read_to_string(path)?)
    }
}
