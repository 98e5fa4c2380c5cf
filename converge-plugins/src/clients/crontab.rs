//! Crontab storage: the user crontab via the `crontab` command, or a
//! cron.d-style file.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info};

/// Whole-document read/write access to one crontab.
pub trait CrontabStore {
    fn read(&mut self) -> Result<String>;
    fn write(&mut self, content: &str) -> Result<()>;
    /// Whether job lines carry a user column (cron.d format).
    fn has_user_column(&self) -> bool;
}

/// A user's crontab, managed through the `crontab` binary.
pub struct SystemCrontab {
    binary: PathBuf,
    user: Option<String>,
}

impl SystemCrontab {
    pub fn new(user: Option<String>) -> Self {
        Self {
            binary: PathBuf::from("crontab"),
            user,
        }
    }

    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        if let Some(user) = &self.user {
            cmd.arg("-u").arg(user);
        }
        cmd
    }
}

impl CrontabStore for SystemCrontab {
    fn read(&mut self) -> Result<String> {
        let output = self
            .command()
            .arg("-l")
            .output()
            .context("Failed to run crontab -l")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            // No crontab yet is an empty crontab.
            if stderr.contains("no crontab for") {
                return Ok(String::new());
            }
            return Err(anyhow!("crontab -l failed: {}", stderr.trim()));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn write(&mut self, content: &str) -> Result<()> {
        info!(user = ?self.user, "Installing crontab");

        let mut child = self
            .command()
            .arg("-")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .context("Failed to run crontab -")?;

        child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("crontab stdin unavailable"))?
            .write_all(content.as_bytes())
            .context("Failed to write crontab")?;

        let output = child.wait_with_output().context("Failed to wait for crontab")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("crontab - failed: {}", stderr.trim()));
        }

        Ok(())
    }

    fn has_user_column(&self) -> bool {
        false
    }
}

/// A cron.d-style file. An empty document removes the file.
pub struct CronFile {
    path: PathBuf,
}

impl CronFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CrontabStore for CronFile {
    fn read(&mut self) -> Result<String> {
        match fs::read_to_string(&self.path) {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", self.path.display())),
        }
    }

    fn write(&mut self, content: &str) -> Result<()> {
        if content.is_empty() {
            debug!(path = %self.path.display(), "Removing empty cron file");
            return match fs::remove_file(&self.path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => {
                    Err(e).with_context(|| format!("Failed to remove {}", self.path.display()))
                }
            };
        }

        info!(path = %self.path.display(), "Writing cron file");
        fs::write(&self.path, content)
            .with_context(|| format!("Failed to write {}", self.path.display()))
    }

    fn has_user_column(&self) -> bool {
        true
    }
}
