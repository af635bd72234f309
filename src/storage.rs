use anyhow::Result;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Base directory for config, logs and persisted notifications.
///
/// `$TASKDASH_HOME` wins; otherwise `~/.taskdash`.
pub fn taskdash_dir() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("TASKDASH_HOME") {
        return Ok(PathBuf::from(path));
    }

    let home = dirs::home_dir().ok_or_else(|| anyhow::anyhow!("No home directory"))?;
    Ok(home.join(".taskdash"))
}

pub fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}

/// Write via a temp file and rename, so a crash never leaves half a document.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }

    let tmp_path = path.with_extension("tmp");
    let file = std::fs::File::create(&tmp_path)?;
    let mut writer = std::io::BufWriter::new(file);
    writer.write_all(bytes)?;
    writer.flush()?;
    drop(writer);
    std::fs::rename(tmp_path, path)?;
    Ok(())
}

/// A single durable string value (the browser's localStorage entry, on disk).
pub trait KeyValueSlot: Send {
    fn load(&self) -> Result<Option<String>>;
    fn store(&self, value: &str) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

/// Slot backed by one file.
pub struct FileSlot {
    path: PathBuf,
}

impl FileSlot {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// `<taskdash_dir>/<file_name>`
    pub fn in_home(file_name: &str) -> Result<Self> {
        Ok(Self::new(taskdash_dir()?.join(file_name)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl KeyValueSlot for FileSlot {
    fn load(&self) -> Result<Option<String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn store(&self, value: &str) -> Result<()> {
        write_atomic(&self.path, value.as_bytes())
    }

    fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-process slot. Clones share nothing; use it for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemorySlot {
    value: Mutex<Option<String>>,
}

impl MemorySlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(value: &str) -> Self {
        Self {
            value: Mutex::new(Some(value.to_string())),
        }
    }

    pub fn get(&self) -> Option<String> {
        self.value.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl KeyValueSlot for MemorySlot {
    fn load(&self) -> Result<Option<String>> {
        Ok(self.get())
    }

    fn store(&self, value: &str) -> Result<()> {
        *self.value.lock().unwrap_or_else(|e| e.into_inner()) = Some(value.to_string());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.value.lock().unwrap_or_else(|e| e.into_inner()) = None;
        Ok(())
    }
}
