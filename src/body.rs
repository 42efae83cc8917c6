use std::fmt;
use std::io::{Read, Seek, SeekFrom};

use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::headers::parse_value;
use crate::multipart;
use crate::types::FieldMap;
use crate::upload::{TempFileFactory, UploadedFile, UploadedFileFactory};
use crate::urlencoded;

pub const URLENCODED: &str = "application/x-www-form-urlencoded";
pub const MULTIPART: &str = "multipart/form-data";

#[derive(Debug)]
pub enum BodyError {
    UnsupportedContentType(String),
    NoBody,
    Io(std::io::Error),
}

impl fmt::Display for BodyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BodyError::UnsupportedContentType(ct) => write!(f, "unsupported content type: {ct}"),
            BodyError::NoBody => f.write_str("no parsed body available"),
            BodyError::Io(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for BodyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BodyError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for BodyError {
    fn from(e: std::io::Error) -> Self {
        BodyError::Io(e)
    }
}

/// A request body decoded according to its `Content-Type`.
///
/// Decoding happens once, at construction. Url-encoded bodies always produce
/// a field map (possibly empty); multipart bodies produce one only if at
/// least one field part was present.
#[derive(Debug)]
pub struct BodyParser {
    content_type: String,
    boundary: String,
    parsed: Option<FieldMap>,
    files: IndexMap<String, UploadedFile>,
}

impl BodyParser {
    /// Decode `body`, spooling uploads into temporary files.
    pub fn new(body: &[u8], content_type: &str) -> Result<Self, BodyError> {
        Self::with_factory(body, content_type, &TempFileFactory)
    }

    pub fn with_factory(
        body: &[u8],
        content_type: &str,
        factory: &dyn UploadedFileFactory,
    ) -> Result<Self, BodyError> {
        let attrs = parse_value(content_type);
        let main = attrs.bare(0).unwrap_or("").trim().to_owned();
        let boundary = attrs.get("boundary").unwrap_or("").trim().to_owned();

        let mut parser = BodyParser {
            content_type: main,
            boundary,
            parsed: None,
            files: IndexMap::new(),
        };

        match parser.content_type.as_str() {
            URLENCODED => {
                let fields = urlencoded::decode(body);
                debug!(fields = fields.len(), "decoded url-encoded body");
                parser.parsed = Some(fields);
            }
            MULTIPART => {
                if parser.boundary.is_empty() {
                    warn!("multipart body without a boundary");
                }
                let decoded = multipart::decode(body, &parser.boundary, factory)?;
                debug!(
                    fields = decoded.fields.as_ref().map_or(0, |f| f.len()),
                    files = decoded.files.len(),
                    "decoded multipart body"
                );
                parser.parsed = decoded.fields;
                parser.files = decoded.files;
            }
            "" => {}
            other => return Err(BodyError::UnsupportedContentType(other.to_owned())),
        }
        Ok(parser)
    }

    /// Rewind `source`, read it to the end and decode the result.
    pub fn from_reader<R: Read + Seek>(
        mut source: R,
        content_type: &str,
        factory: &dyn UploadedFileFactory,
    ) -> Result<Self, BodyError> {
        source.seek(SeekFrom::Start(0))?;
        let mut body = Vec::new();
        source.read_to_end(&mut body)?;
        Self::with_factory(&body, content_type, factory)
    }

    /// Main content type, without parameters.
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    pub fn fetch_body(&self) -> Option<&FieldMap> {
        self.parsed.as_ref()
    }

    pub fn fetch_body_array(&self) -> Result<&FieldMap, BodyError> {
        self.parsed.as_ref().ok_or(BodyError::NoBody)
    }

    pub fn fetch_files(&self) -> &IndexMap<String, UploadedFile> {
        &self.files
    }

    /// Hand out the uploaded files, e.g. to move them.
    pub fn into_files(self) -> IndexMap<String, UploadedFile> {
        self.files
    }
}
