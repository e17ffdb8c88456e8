//! Persistence of the device token
//!
//! The token lives in a single JSON record carrying a schema version so the
//! format can evolve: `{"version":1,"token":"..."}`.

use crate::{
    error::{FileError, TokenStoreError},
    services::profile_store::write_atomic,
};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};
use std::{
    fmt, fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

/// Opaque bearer credential proving the device's registered identity.
#[derive(Clone, PartialEq, Eq)]
pub struct DeviceToken(String);

impl DeviceToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn value(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for DeviceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DeviceToken(<redacted>)")
    }
}

/// The token is a bearer credential, only the owner may read it.
const TOKEN_FILE_MODE: u32 = 0o600;

#[derive(Clone, Copy, Debug, PartialEq, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
enum RecordVersion {
    V1 = 1,
}

/// Leading part of any record version, read before the full record.
#[derive(Deserialize)]
struct RecordHeader {
    version: u64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct TokenRecord {
    version: RecordVersion,
    token: String,
}

pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the stored token. A missing file means the device is not registered.
    pub fn load(&self) -> Result<Option<DeviceToken>, TokenStoreError> {
        let data = match fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("no device token at {:?}", self.path);
                return Ok(None);
            }
            Err(e) => return Err(FileError::new("read", &self.path, e).into()),
        };

        let format_error = |source| TokenStoreError::Format {
            path: self.path.clone(),
            source,
        };

        let header: RecordHeader = serde_json::from_str(&data).map_err(format_error)?;
        if header.version != RecordVersion::V1 as u64 {
            return Err(TokenStoreError::UnsupportedVersion {
                path: self.path.clone(),
                version: header.version,
            });
        }

        let record: TokenRecord = serde_json::from_str(&data).map_err(format_error)?;

        if record.token.is_empty() {
            return Err(TokenStoreError::Format {
                path: self.path.clone(),
                source: serde::de::Error::custom("token is empty"),
            });
        }

        debug!("loaded device token record {:?}", record.version);
        Ok(Some(DeviceToken(record.token)))
    }

    pub fn save(&self, token: &DeviceToken) -> Result<(), TokenStoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| FileError::new("create directory", parent, e))?;
        }

        let record = TokenRecord {
            version: RecordVersion::V1,
            token: token.value().to_string(),
        };
        let data = serde_json::to_vec(&record).map_err(|source| TokenStoreError::Format {
            path: self.path.clone(),
            source,
        })?;

        write_atomic(&self.path, &data, TOKEN_FILE_MODE)?;
        info!("device token saved to {:?}", self.path);

        Ok(())
    }

    /// Forget the device registration. Clearing a missing token is not an error.
    pub fn clear(&self) -> Result<(), TokenStoreError> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                info!("device token cleared");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(FileError::new("remove", &self.path, e).into()),
        }
    }
}
