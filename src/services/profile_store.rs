//! Network config profile storage
//!
//! Each profile has an access-point and a station variant stored in the
//! profile directory as `<name>.ap.conf` / `<name>.station.conf`. Exactly one
//! variant is active at the profile's system target path.

use crate::{config::ProfileConfig, error::FileError, services::network_mode::NetworkMode};
use log::{debug, error, info};
use serde::Serialize;
use std::{
    collections::BTreeMap,
    fmt,
    fs::{self, OpenOptions, Permissions},
    io::{ErrorKind, Write},
    os::unix::fs::{OpenOptionsExt, PermissionsExt},
    path::{Path, PathBuf},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileName {
    WpaSupplicant,
    Dhcpcd,
    Dnsmasq,
    Hostapd,
}

impl ProfileName {
    /// Commit order of a full profile set.
    pub const ALL: [ProfileName; 4] = [
        ProfileName::WpaSupplicant,
        ProfileName::Dhcpcd,
        ProfileName::Dnsmasq,
        ProfileName::Hostapd,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProfileName::WpaSupplicant => "wpa_supplicant",
            ProfileName::Dhcpcd => "dhcpcd",
            ProfileName::Dnsmasq => "dnsmasq",
            ProfileName::Hostapd => "hostapd",
        }
    }

    pub(crate) fn target_env_var(&self) -> &'static str {
        match self {
            ProfileName::WpaSupplicant => "WPA_SUPPLICANT_CONF",
            ProfileName::Dhcpcd => "DHCPCD_CONF",
            ProfileName::Dnsmasq => "DNSMASQ_CONF",
            ProfileName::Hostapd => "HOSTAPD_CONF",
        }
    }

    /// Mode of a newly created target; an existing target keeps its own.
    pub fn default_mode(&self) -> u32 {
        match self {
            // holds the Wi-Fi passphrase
            ProfileName::WpaSupplicant => 0o600,
            _ => 0o644,
        }
    }

    pub(crate) fn default_target(&self) -> &'static str {
        match self {
            ProfileName::WpaSupplicant => "/etc/wpa_supplicant/wpa_supplicant.conf",
            ProfileName::Dhcpcd => "/etc/dhcpcd.conf",
            ProfileName::Dnsmasq => "/etc/dnsmasq.conf",
            ProfileName::Hostapd => "/etc/hostapd/hostapd.conf",
        }
    }
}

impl fmt::Display for ProfileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A target that was replaced by [`ProfileStore::write_active_set`].
#[derive(Debug)]
struct Replaced {
    target: PathBuf,
    /// `None` if the target did not exist before the commit
    backup: Option<PathBuf>,
}

/// A committed profile set whose previous contents are still recoverable.
///
/// Call [`AppliedSet::finalize`] once the new configuration is in effect, or
/// [`AppliedSet::restore`] to put the previous files back.
#[must_use]
#[derive(Debug)]
pub struct AppliedSet {
    replaced: Vec<Replaced>,
}

impl AppliedSet {
    pub fn finalize(self) {
        for replaced in &self.replaced {
            if let Some(backup) = &replaced.backup {
                remove_if_exists(backup);
            }
        }
    }

    pub fn restore(self) -> Result<(), FileError> {
        restore_replaced(&self.replaced)
    }
}

pub struct ProfileStore {
    source_dir: PathBuf,
    targets: BTreeMap<ProfileName, PathBuf>,
}

impl ProfileStore {
    pub fn new(config: &ProfileConfig) -> Self {
        Self {
            source_dir: config.source_dir.clone(),
            targets: config.targets.clone(),
        }
    }

    pub fn target(&self, name: ProfileName) -> PathBuf {
        self.targets
            .get(&name)
            .cloned()
            .unwrap_or_else(|| PathBuf::from(name.default_target()))
    }

    pub fn variant_path(&self, name: ProfileName, mode: NetworkMode) -> PathBuf {
        let suffix = match mode {
            NetworkMode::AccessPoint => "ap",
            NetworkMode::Station => "station",
        };
        self.source_dir.join(format!("{name}.{suffix}.conf"))
    }

    /// Read the stored content of one profile variant.
    pub fn load_profile(&self, name: ProfileName, mode: NetworkMode) -> Result<String, FileError> {
        let path = self.variant_path(name, mode);
        debug!("load profile {name} ({mode}) from {path:?}");

        fs::read_to_string(&path).map_err(|e| FileError::new("read profile", path, e))
    }

    /// Replace the active config of one profile atomically.
    pub fn write_active(&self, name: ProfileName, content: &str) -> Result<(), FileError> {
        let target = self.target(name);
        info!("write {name} config to {target:?}");

        let mode = target_mode(&target, name.default_mode());

        write_atomic(&target, content.as_bytes(), mode)
    }

    /// Replace the active configs of a whole profile set, all or nothing.
    ///
    /// Every file is staged next to its target before any target is touched.
    /// If staging or any rename fails, targets already replaced are restored
    /// and the error is returned.
    pub fn write_active_set(
        &self,
        resolved: &[(ProfileName, String)],
    ) -> Result<AppliedSet, FileError> {
        let staged = self.stage_all(resolved)?;

        let mut replaced = Vec::with_capacity(staged.len());

        for (index, (name, temp, target)) in staged.iter().enumerate() {
            let result = backup(target).and_then(|backup| {
                fs::rename(temp, target)
                    .map(|_| backup.clone())
                    .map_err(|e| {
                        if let Some(backup) = &backup {
                            remove_if_exists(backup);
                        }
                        FileError::new("replace", target, e)
                    })
            });

            match result {
                Ok(backup) => {
                    info!("{name} config replaced at {target:?}");
                    replaced.push(Replaced {
                        target: target.clone(),
                        backup,
                    });
                }
                Err(e) => {
                    error!("commit of {name} failed, restoring {} replaced configs", replaced.len());
                    for (_, temp, _) in &staged[index..] {
                        remove_if_exists(temp);
                    }
                    if let Err(restore_err) = restore_replaced(&replaced) {
                        error!("failed to restore previous configs: {restore_err:#}");
                    }
                    return Err(e);
                }
            }
        }

        Ok(AppliedSet { replaced })
    }

    fn stage_all(
        &self,
        resolved: &[(ProfileName, String)],
    ) -> Result<Vec<(ProfileName, PathBuf, PathBuf)>, FileError> {
        let mut staged: Vec<(ProfileName, PathBuf, PathBuf)> = Vec::with_capacity(resolved.len());

        for (name, content) in resolved {
            let target = self.target(*name);
            let temp = temp_path(&target);

            let mode = target_mode(&target, name.default_mode());

            if let Err(e) = write_synced(&temp, content.as_bytes(), mode) {
                error!("staging {name} failed, discarding {} staged configs", staged.len());
                remove_if_exists(&temp);
                for (_, temp, _) in &staged {
                    remove_if_exists(temp);
                }
                return Err(e);
            }

            debug!("{name} staged at {temp:?}");
            staged.push((*name, temp, target));
        }

        Ok(staged)
    }
}

fn temp_path(target: &Path) -> PathBuf {
    let mut name = target.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    target.with_file_name(name)
}

fn backup_path(target: &Path) -> PathBuf {
    let mut name = target.file_name().unwrap_or_default().to_os_string();
    name.push(".old");
    target.with_file_name(name)
}

fn write_synced(path: &Path, data: &[u8], mode: u32) -> Result<(), FileError> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(mode)
        .open(path)
        .map_err(|e| FileError::new("create", path, e))?;
    // the open mode is masked by the umask and ignored for a leftover file
    file.set_permissions(Permissions::from_mode(mode))
        .map_err(|e| FileError::new("set permissions of", path, e))?;
    file.write_all(data)
        .map_err(|e| FileError::new("write", path, e))?;
    file.sync_all().map_err(|e| FileError::new("sync", path, e))
}

/// Permission bits of `path`, or `default` if it does not exist yet.
pub fn target_mode(path: &Path, default: u32) -> u32 {
    fs::metadata(path)
        .map(|metadata| metadata.permissions().mode() & 0o7777)
        .unwrap_or(default)
}

/// Write `data` with permission bits `mode` to a sibling temp file and
/// rename it over `path`.
///
/// Readers see either the old or the new content, never a truncated file.
pub fn write_atomic(path: &Path, data: &[u8], mode: u32) -> Result<(), FileError> {
    let temp = temp_path(path);

    if let Err(e) = write_synced(&temp, data, mode) {
        remove_if_exists(&temp);
        return Err(e);
    }

    fs::rename(&temp, path).map_err(|e| {
        remove_if_exists(&temp);
        FileError::new("replace", path, e)
    })
}

/// Copy `target` aside. Returns `None` if there was nothing to keep.
fn backup(target: &Path) -> Result<Option<PathBuf>, FileError> {
    let backup = backup_path(target);

    match fs::copy(target, &backup) {
        Ok(_) => Ok(Some(backup)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(FileError::new("back up", target, e)),
    }
}

fn restore_replaced(replaced: &[Replaced]) -> Result<(), FileError> {
    let mut first_error = None;

    for replaced in replaced.iter().rev() {
        let result = match &replaced.backup {
            Some(backup) => fs::rename(backup, &replaced.target)
                .map_err(|e| FileError::new("restore", &replaced.target, e)),
            None => match fs::remove_file(&replaced.target) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                Err(e) => Err(FileError::new("remove", &replaced.target, e)),
            },
        };

        match result {
            Ok(()) => info!("restored previous config at {:?}", replaced.target),
            Err(e) => {
                error!("{e}: {}", e.source);
                first_error.get_or_insert(e);
            }
        }
    }

    first_error.map_or(Ok(()), Err)
}

fn remove_if_exists(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => error!("failed to remove {path:?}: {e}"),
    }
}
