//! The `<data file>.lock` marker.
//!
//! Existence means "somebody may hold the write lock". The body is a few
//! lines of diagnostic text for whoever finds the file on the share; nothing
//! reads it back.

use chrono::{DateTime, Utc};
use fs_err::OpenOptions;
use std::ffi::OsString;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::types::{format_timestamp, UserId};

#[derive(Debug, Clone)]
pub struct MarkerContents<'a> {
    pub username: &'a str,
    pub machine_name: &'a str,
    pub user_id: UserId,
    pub created_at: DateTime<Utc>,
}

impl MarkerContents<'_> {
    fn render(&self) -> String {
        format!(
            "{}@{}\n{}\n{}\n",
            self.username,
            self.machine_name,
            format_timestamp(self.created_at),
            self.user_id
        )
    }
}

#[derive(Debug, Clone)]
pub struct LockFileMarker {
    path: PathBuf,
}

impl LockFileMarker {
    /// Marker for `data_file`, i.e. `shared.db` → `shared.db.lock`.
    pub fn for_data_file(data_file: &Path) -> Self {
        let mut path = OsString::from(data_file.as_os_str());
        path.push(".lock");
        Self {
            path: PathBuf::from(path),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Creates the marker exclusively.
    ///
    /// Fails with `ErrorKind::AlreadyExists` when another client got there
    /// first. A marker that cannot be fully written is removed again.
    pub fn create(&self, contents: &MarkerContents<'_>) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)?;

        let written = file
            .write_all(contents.render().as_bytes())
            .and_then(|()| file.sync_all());
        if let Err(err) = written {
            drop(file);
            let _ = fs_err::remove_file(&self.path);
            return Err(err);
        }
        Ok(())
    }

    /// Time since the marker was last written; `None` when there is none.
    ///
    /// A clock ahead of the file server's reads as age zero.
    pub fn age(&self) -> io::Result<Option<Duration>> {
        match fs_err::metadata(&self.path) {
            Ok(metadata) => {
                let modified = metadata.modified()?;
                Ok(Some(
                    SystemTime::now()
                        .duration_since(modified)
                        .unwrap_or_default(),
                ))
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Removes the marker. `Ok(false)` when it was already gone.
    pub fn remove(&self) -> io::Result<bool> {
        match fs_err::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err),
        }
    }
}
