//! Heartbeat file a supervised child touches to prove it is alive.
//!
//! The file is created with mode `000` and each [`NotificationFile::notify`]
//! flips its permission bits, which bumps the inode change time without
//! writing any data. The `file` check compares that change time against its
//! timeout. Only the path helpers are available off unix.

#![allow(missing_docs)]

#[cfg(unix)]
use std::collections::HashMap;
#[cfg(unix)]
use std::fs::{self, File, OpenOptions, Permissions};
#[cfg(unix)]
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::PathBuf;
#[cfg(unix)]
use std::path::Path;

#[cfg(unix)]
use crate::core::errors::{CheckError, Result};

/// Environment variable supervisord sets to the child's group.
pub const ENV_GROUP_NAME: &str = "SUPERVISOR_GROUP_NAME";
/// Environment variable supervisord sets to the child's process name.
pub const ENV_PROCESS_NAME: &str = "SUPERVISOR_PROCESS_NAME";

/// Directory holding heartbeat files.
#[must_use]
pub fn notification_dir() -> PathBuf {
    std::env::temp_dir().join("supervisor_checks")
}

#[must_use]
pub fn notification_file_name(group: &str, name: &str, pid: u32) -> String {
    format!("{group}-{name}-{pid}")
}

/// Default heartbeat path for a process.
#[must_use]
pub fn notification_path(group: &str, name: &str, pid: u32) -> PathBuf {
    notification_dir().join(notification_file_name(group, name, pid))
}

/// An open heartbeat file.
#[cfg(unix)]
#[derive(Debug)]
pub struct NotificationFile {
    file: File,
    path: PathBuf,
    delete: bool,
    spinner: bool,
}

#[cfg(unix)]
impl NotificationFile {
    /// Create the heartbeat file for the calling process at the default path,
    /// using the group and name supervisord put in the environment.
    pub fn for_current_process() -> Result<Self> {
        let env: HashMap<String, String> = std::env::vars().collect();
        Self::from_env(&env, &notification_dir(), std::process::id())
    }

    /// Create the heartbeat file for `pid` inside `dir`, named after the group
    /// and process name found in `env`. `dir` is created when missing and the
    /// file is removed on drop.
    pub fn from_env(env: &HashMap<String, String>, dir: &Path, pid: u32) -> Result<Self> {
        let var = |key: &str| {
            env.get(key).ok_or_else(|| CheckError::InvalidConfig {
                details: format!("{key} is not set; is this process supervised?"),
            })
        };
        let group = var(ENV_GROUP_NAME)?;
        let name = var(ENV_PROCESS_NAME)?;
        fs::create_dir_all(dir).map_err(|e| CheckError::io(dir, e))?;
        Self::create(dir.join(notification_file_name(group, name, pid)), true)
    }

    /// Create a heartbeat file at `path`. Symlinks are refused.
    pub fn create(path: impl Into<PathBuf>, delete: bool) -> Result<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .mode(0o000)
            .custom_flags(libc::O_NOFOLLOW)
            .open(&path)
            .map_err(|e| CheckError::io(&path, e))?;
        Ok(Self {
            file,
            path,
            delete,
            spinner: false,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Signal liveness.
    pub fn notify(&mut self) -> Result<()> {
        self.spinner = !self.spinner;
        let mode = u32::from(self.spinner);
        self.file
            .set_permissions(Permissions::from_mode(mode))
            .map_err(|e| CheckError::io(&self.path, e))
    }
}

#[cfg(unix)]
impl Drop for NotificationFile {
    fn drop(&mut self) {
        if self.delete {
            let _ = fs::remove_file(&self.path);
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::MetadataExt;

    fn supervised_env(group: Option<&str>, name: &str) -> HashMap<String, String> {
        let mut env = HashMap::from([(ENV_PROCESS_NAME.to_string(), name.to_string())]);
        if let Some(group) = group {
            env.insert(ENV_GROUP_NAME.to_string(), group.to_string());
        }
        env
    }

    #[test]
    fn supervised_process_gets_file_in_created_directory() {
        let root = tempfile::tempdir().expect("tempdir");
        let dir = root.path().join("nested").join("supervisor_checks");
        let env = supervised_env(Some("web"), "web_1");

        let file = NotificationFile::from_env(&env, &dir, 42).expect("heartbeat");

        assert_eq!(file.path(), dir.join("web-web_1-42"));
        assert!(file.path().exists());
        drop(file);
        assert!(!dir.join("web-web_1-42").exists());
    }

    #[test]
    fn missing_group_variable_is_a_configuration_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let env = supervised_env(None, "web_1");

        let err = NotificationFile::from_env(&env, dir.path(), 42).expect_err("no group");

        assert_eq!(err.code(), "SCK-1001");
        assert!(err.to_string().contains(ENV_GROUP_NAME));
        assert_eq!(fs::read_dir(dir.path()).expect("read dir").count(), 0);
    }

    #[test]
    fn default_path_encodes_group_name_and_pid() {
        let path = notification_path("web", "web_1", 42);
        assert!(path.ends_with("supervisor_checks/web-web_1-42"));
    }

    #[test]
    fn notify_toggles_mode_bits() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("hb");
        let mut file = NotificationFile::create(&path, true).expect("create");
        assert_eq!(fs::metadata(&path).expect("meta").mode() & 0o777, 0);
        file.notify().expect("notify");
        assert_eq!(fs::metadata(&path).expect("meta").mode() & 0o777, 1);
        file.notify().expect("notify");
        assert_eq!(fs::metadata(&path).expect("meta").mode() & 0o777, 0);
    }

    #[test]
    fn drop_removes_file_only_when_asked() {
        let dir = tempfile::tempdir().expect("tempdir");
        let kept = dir.path().join("kept");
        let removed = dir.path().join("removed");
        drop(NotificationFile::create(&kept, false).expect("create"));
        drop(NotificationFile::create(&removed, true).expect("create"));
        assert!(kept.exists());
        assert!(!removed.exists());
    }

    #[test]
    fn refuses_to_follow_symlinks() {
        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("target");
        let link = dir.path().join("link");
        fs::write(&target, b"").expect("target");
        std::os::unix::fs::symlink(&target, &link).expect("symlink");
        assert!(NotificationFile::create(&link, false).is_err());
    }
}
