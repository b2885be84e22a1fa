use crate::error::{Error, Result};
use crate::instance::conf::InstanceConf;
use crate::instance::validate_instance_id;
use std::io;
use std::path::{Path, PathBuf};

/// File name of the server config inside an instance directory.
pub const CONFIG_FILE_NAME: &str = "server.conf";
/// Name of the data directory inside an instance directory.
pub const DATA_DIR_NAME: &str = "data";
/// File receiving the server's stdout and stderr.
pub const LOG_FILE_NAME: &str = "server.log";

/// On-disk layout of instances under a base directory.
///
/// ```text
/// <base>/<id>/server.conf
/// <base>/<id>/data/
/// <base>/<id>/server.log
/// ```
///
/// Every path is a pure function of the base directory and the instance id.
#[derive(Debug, Clone)]
pub struct InstanceLayout {
    base_dir: PathBuf,
}

impl InstanceLayout {
    /// Layout rooted at `base_dir`.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// The base directory.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// `<base>/<id>`
    pub fn instance_dir(&self, id: &str) -> PathBuf {
        self.base_dir.join(id)
    }

    /// `<base>/<id>/server.conf`
    pub fn config_path(&self, id: &str) -> PathBuf {
        self.instance_dir(id).join(CONFIG_FILE_NAME)
    }

    /// `<base>/<id>/data`
    pub fn data_dir(&self, id: &str) -> PathBuf {
        self.instance_dir(id).join(DATA_DIR_NAME)
    }

    /// `<base>/<id>/server.log`
    pub fn log_path(&self, id: &str) -> PathBuf {
        self.instance_dir(id).join(LOG_FILE_NAME)
    }

    /// Whether an instance directory exists for `id`.
    pub fn exists(&self, id: &str) -> bool {
        self.instance_dir(id).is_dir()
    }

    /// Create the instance directory, its data directory and its config file.
    ///
    /// Refuses to touch an existing instance directory. On error the caller
    /// is responsible for removing whatever was created (see [`Self::remove`]).
    pub fn materialize(&self, id: &str, port: u16, password: Option<String>) -> Result<InstanceConf> {
        let creation_error = |message: String| Error::Creation {
            id: id.to_string(),
            message,
        };

        std::fs::create_dir_all(&self.base_dir).map_err(|e| {
            creation_error(format!(
                "cannot create base directory {}: {}",
                self.base_dir.display(),
                e
            ))
        })?;

        let instance_dir = self.instance_dir(id);
        std::fs::create_dir(&instance_dir).map_err(|e| {
            if e.kind() == io::ErrorKind::AlreadyExists {
                Error::AlreadyExists(id.to_string())
            } else {
                creation_error(format!(
                    "cannot create {}: {}",
                    instance_dir.display(),
                    e
                ))
            }
        })?;

        let data_dir = self.data_dir(id);
        std::fs::create_dir(&data_dir).map_err(|e| {
            creation_error(format!("cannot create {}: {}", data_dir.display(), e))
        })?;

        let conf = InstanceConf::new(port, data_dir, password);
        let config_path = self.config_path(id);
        conf.write(&config_path).map_err(|e| {
            creation_error(format!("cannot write {}: {}", config_path.display(), e))
        })?;

        tracing::debug!(id = %id, port, path = %config_path.display(), "Instance files written");
        Ok(conf)
    }

    /// Remove the instance directory. A missing directory is not an error.
    pub fn remove(&self, id: &str) -> io::Result<()> {
        match std::fs::remove_dir_all(self.instance_dir(id)) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }

    /// Ids of all instance directories under the base directory.
    ///
    /// Entries that are not directories or whose names are not valid ids are
    /// ignored. A missing base directory yields an empty list.
    pub fn list_ids(&self) -> io::Result<Vec<String>> {
        let entries = match std::fs::read_dir(&self.base_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if validate_instance_id(&name).is_ok() {
                ids.push(name);
            }
        }
        ids.sort();
        Ok(ids)
    }
}
