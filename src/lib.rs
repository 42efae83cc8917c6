pub mod body;
pub mod headers;
pub mod multipart;
pub mod tree;
pub mod types;
pub mod upload;
pub mod urlencoded;

pub use body::{BodyError, BodyParser};
pub use headers::{HeaderAttributes, HeaderMap};
pub use tree::{map_files, uploaded_files, FileForest, LeafAttributes};
pub use types::*;
pub use upload::{FileInfo, MemoryFactory, TempFileFactory, UploadedFile, UploadedFileFactory};
