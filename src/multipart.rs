use std::io;

use indexmap::IndexMap;
use memchr::memmem;
use tracing::{debug, trace};

use crate::headers::{bytes_to_string, split_from_body_and_parse, trim_blank};
use crate::types::{FieldMap, FormValue};
use crate::upload::{FileInfo, UploadedFile, UploadedFileFactory, UPLOAD_ERR_OK};

const DISPOSITION: &str = "content-disposition";
const CONTENT_TYPE: &str = "content-type";
const DEFAULT_MEDIA_TYPE: &str = "text/plain";

/// Fields and files decoded from a multipart body. `fields` stays `None`
/// until the first field part is stored.
#[derive(Debug, Default)]
pub struct Multipart {
    pub fields: Option<FieldMap>,
    pub files: IndexMap<String, UploadedFile>,
}

/// Split `body` on `--boundary` and classify every `form-data` part.
///
/// Malformed parts are dropped. Only a storage failure aborts the decode.
pub fn decode(
    body: &[u8],
    boundary: &str,
    factory: &dyn UploadedFileFactory,
) -> io::Result<Multipart> {
    let delimiter = format!("--{boundary}");
    let mut out = Multipart::default();
    for (idx, segment) in split_on(body, delimiter.as_bytes()).into_iter().enumerate() {
        let check = trim_blank(segment);
        if check.is_empty() || check == b"--" {
            trace!(segment = idx, "skipping empty segment");
            continue;
        }
        decode_part(&mut out, idx, segment, factory)?;
    }
    Ok(out)
}

/// Plain substring split, like `str::split` on bytes.
fn split_on<'a>(data: &'a [u8], delimiter: &[u8]) -> Vec<&'a [u8]> {
    let mut segments = Vec::new();
    let mut start = 0;
    for pos in memmem::find_iter(data, delimiter) {
        segments.push(&data[start..pos]);
        start = pos + delimiter.len();
    }
    segments.push(&data[start..]);
    segments
}

fn decode_part(
    out: &mut Multipart,
    idx: usize,
    part: &[u8],
    factory: &dyn UploadedFileFactory,
) -> io::Result<()> {
    let (headers, body) = split_from_body_and_parse(part);
    let disposition = headers.values(DISPOSITION);

    if disposition.bare(0) != Some("form-data") {
        debug!(
            part = idx,
            disposition = disposition.bare(0).unwrap_or(""),
            "discarding part without form-data disposition"
        );
        return Ok(());
    }

    let name = match disposition.get("name") {
        Some(name) if !name.is_empty() => name.to_owned(),
        _ => {
            debug!(part = idx, "discarding part without a name");
            return Ok(());
        }
    };

    let filename = disposition.get("filename");
    if filename.is_none() && !headers.has(CONTENT_TYPE) {
        let value = bytes_to_string(trim_blank(body));
        trace!(part = idx, name = %name, bytes = value.len(), "field part");
        out.fields
            .get_or_insert_with(FieldMap::new)
            .insert(name, FormValue::from(value));
        return Ok(());
    }

    let media_type = headers
        .values(CONTENT_TYPE)
        .bare(0)
        .unwrap_or(DEFAULT_MEDIA_TYPE)
        .to_owned();
    let info = FileInfo {
        error: UPLOAD_ERR_OK,
        client_filename: Some(filename.unwrap_or("").to_owned()),
        client_media_type: Some(media_type),
        size: None,
    };
    trace!(part = idx, name = %name, bytes = body.len(), "file part");
    let mut content = body;
    let file = factory.create_uploaded_file(&mut content, info)?;
    out.files.insert(name, file);
    Ok(())
}
