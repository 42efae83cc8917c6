use std::fmt;
use std::fs;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::path::Path;

use tempfile::NamedTempFile;
use tracing::debug;

pub const UPLOAD_ERR_OK: i64 = 0;
pub const UPLOAD_ERR_INI_SIZE: i64 = 1;
pub const UPLOAD_ERR_FORM_SIZE: i64 = 2;
pub const UPLOAD_ERR_PARTIAL: i64 = 3;
pub const UPLOAD_ERR_NO_FILE: i64 = 4;
pub const UPLOAD_ERR_NO_TMP_DIR: i64 = 6;
pub const UPLOAD_ERR_CANT_WRITE: i64 = 7;
pub const UPLOAD_ERR_EXTENSION: i64 = 8;

const DEFAULT_MEDIA_TYPE: &str = "text/plain";
const TEMP_PREFIX: &str = "upload_";

/// Client-side metadata handed to a storage factory with the content.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileInfo {
    pub error: i64,
    pub client_filename: Option<String>,
    pub client_media_type: Option<String>,
    /// Size declared by the sender, if any. The stored size is what was read.
    pub size: Option<u64>,
}

impl FileInfo {
    pub fn new(client_filename: impl Into<String>, client_media_type: impl Into<String>) -> Self {
        FileInfo {
            error: UPLOAD_ERR_OK,
            client_filename: Some(client_filename.into()),
            client_media_type: Some(client_media_type.into()),
            size: None,
        }
    }
}

enum Storage {
    Memory(Vec<u8>),
    Temp(NamedTempFile),
    Moved,
}

impl fmt::Debug for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Storage::Memory(data) => write!(f, "Memory({} bytes)", data.len()),
            Storage::Temp(file) => write!(f, "Temp({})", file.path().display()),
            Storage::Moved => f.write_str("Moved"),
        }
    }
}

/// An uploaded file: stored content plus what the client told us about it.
#[derive(Debug)]
pub struct UploadedFile {
    storage: Storage,
    size: u64,
    error: i64,
    client_filename: Option<String>,
    client_media_type: String,
}

fn already_moved() -> io::Error {
    io::Error::other("file has already been moved")
}

impl UploadedFile {
    fn new(storage: Storage, size: u64, info: FileInfo) -> Self {
        if let Some(declared) = info.size {
            if declared != size {
                debug!(declared, stored = size, "uploaded file size mismatch");
            }
        }
        UploadedFile {
            storage,
            size,
            error: info.error,
            client_filename: info.client_filename,
            client_media_type: info
                .client_media_type
                .unwrap_or_else(|| DEFAULT_MEDIA_TYPE.to_owned()),
        }
    }

    pub fn client_filename(&self) -> Option<&str> {
        self.client_filename.as_deref()
    }

    pub fn client_media_type(&self) -> &str {
        &self.client_media_type
    }

    pub fn error(&self) -> i64 {
        self.error
    }

    /// Number of bytes stored.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn is_moved(&self) -> bool {
        matches!(self.storage, Storage::Moved)
    }

    /// Path of the backing temporary file, if the content was spooled.
    pub fn temp_path(&self) -> Option<&Path> {
        match &self.storage {
            Storage::Temp(file) => Some(file.path()),
            _ => None,
        }
    }

    /// A fresh reader positioned at the start of the content.
    pub fn reader(&self) -> io::Result<Box<dyn Read + '_>> {
        match &self.storage {
            Storage::Memory(data) => Ok(Box::new(Cursor::new(data.as_slice()))),
            Storage::Temp(file) => Ok(Box::new(file.reopen()?)),
            Storage::Moved => Err(already_moved()),
        }
    }

    pub fn contents(&self) -> io::Result<Vec<u8>> {
        let mut out = Vec::with_capacity(usize::try_from(self.size).unwrap_or(0));
        self.reader()?.read_to_end(&mut out)?;
        Ok(out)
    }

    /// Move the content to `target`. Only possible once.
    pub fn move_to(&mut self, target: impl AsRef<Path>) -> io::Result<()> {
        let target = target.as_ref();
        match std::mem::replace(&mut self.storage, Storage::Moved) {
            Storage::Memory(data) => {
                if let Err(e) = fs::write(target, &data) {
                    self.storage = Storage::Memory(data);
                    return Err(e);
                }
            }
            Storage::Temp(file) => {
                if let Err(e) = file.persist(target) {
                    // rename can fail across filesystems; fall back to a copy
                    debug!(error = %e.error, target = %target.display(), "persist failed, copying");
                    let file = e.file;
                    if let Err(e) = fs::copy(file.path(), target) {
                        self.storage = Storage::Temp(file);
                        return Err(e);
                    }
                }
            }
            Storage::Moved => return Err(already_moved()),
        }
        Ok(())
    }
}

/// Storage collaborator turning raw content into an [`UploadedFile`].
pub trait UploadedFileFactory {
    fn create_uploaded_file(&self, content: &mut dyn Read, info: FileInfo) -> io::Result<UploadedFile>;
}

/// Spools every upload into a temporary file removed when the handle drops.
#[derive(Debug, Clone, Copy, Default)]
pub struct TempFileFactory;

impl UploadedFileFactory for TempFileFactory {
    fn create_uploaded_file(&self, content: &mut dyn Read, info: FileInfo) -> io::Result<UploadedFile> {
        let mut file = tempfile::Builder::new().prefix(TEMP_PREFIX).tempfile()?;
        let size = io::copy(content, &mut file)?;
        file.flush()?;
        file.as_file_mut().seek(SeekFrom::Start(0))?;
        Ok(UploadedFile::new(Storage::Temp(file), size, info))
    }
}

/// Keeps uploads in memory.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryFactory;

impl UploadedFileFactory for MemoryFactory {
    fn create_uploaded_file(&self, content: &mut dyn Read, info: FileInfo) -> io::Result<UploadedFile> {
        let mut data = Vec::new();
        content.read_to_end(&mut data)?;
        let size = data.len() as u64;
        Ok(UploadedFile::new(Storage::Memory(data), size, info))
    }
}
