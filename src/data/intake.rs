use std::{
    collections::HashMap,
    io::{Seek, SeekFrom, Write},
};

use bytes::Bytes;
use futures::{Stream, TryStreamExt};
use mime::Mime;
use mpart_async::server::MultipartStream;
use tempfile::SpooledTempFile;
use warp::Buf;

use crate::{error::Error, util::spawn_blocking};

/// Which media types a part may carry (mapped to the file extension to use) and how much of its
/// body is held in memory before spilling to a temporary file.
pub struct MediaPolicy<'a> {
    pub allowed_types: &'a HashMap<String, String>,
    pub spill_threshold: usize,
}

/// A single multipart part read from the request. The body is rewound to the start.
pub struct UploadedPart {
    pub file: SpooledTempFile,
    /// The content type header of the part as sent, parameters included.
    pub content_type: String,
    pub extension: String,
    pub size: u64,
}

/// Extracts the boundary parameter from the `Content-Type` header of the request.
pub fn multipart_boundary(content_type: Option<&str>) -> Result<String, Error> {
    let content_type = content_type.ok_or_else(|| {
        Error::BadMultipartError(String::from("Missing Content-Type header"))
    })?;
    let mime = content_type
        .parse::<Mime>()
        .map_err(|e| Error::BadMultipartError(format!("Invalid Content-Type header: {e}")))?;

    if mime.type_() != mime::MULTIPART || mime.subtype() != mime::FORM_DATA {
        return Err(Error::BadMultipartError(format!(
            "Expected multipart/form-data request but got '{}'",
            mime.essence_str()
        )));
    }

    mime.get_param(mime::BOUNDARY)
        .map(|v| v.to_string())
        .ok_or_else(|| Error::BadMultipartError(String::from("No mime boundary")))
}

/// Resolves the file extension for the advertised content type of a part, rejecting types that
/// are not part of the allowed mapping.
pub fn resolve_media_type(
    content_type: &str,
    allowed_types: &HashMap<String, String>,
) -> Result<String, Error> {
    let media_type = content_type
        .parse::<Mime>()
        .map_err(|_| Error::UnsupportedMediaError(content_type.to_string()))?;

    match allowed_types.get(media_type.essence_str()) {
        Some(extension) => Ok(extension.clone()),
        None => Err(Error::UnsupportedMediaError(content_type.to_string())),
    }
}

/// Reads the part named `part_name` from the multipart body.
///
/// Parts with other names are skipped. The media type of the part is checked against the policy
/// before any of its bytes are buffered.
pub async fn read_part(
    boundary: String,
    body: impl Stream<Item = Result<impl Buf, warp::Error>> + Unpin,
    part_name: &str,
    policy: MediaPolicy<'_>,
) -> Result<UploadedPart, Error> {
    let mut stream = MultipartStream::new(
        boundary,
        body.map_ok(|mut buf| buf.copy_to_bytes(buf.remaining())),
    );

    loop {
        let mut field = match stream.try_next().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                return Err(Error::BadMultipartError(format!(
                    "Failed to parse multipart body: {e}"
                )));
            }
        };

        let name = field
            .name()
            .map_err(|e| Error::BadMultipartError(e.to_string()))?;

        if name != part_name {
            log::debug!("Skipping multipart field '{}'", name);
            while field
                .try_next()
                .await
                .map_err(|e| Error::BadMultipartError(e.to_string()))?
                .is_some()
            {}
            continue;
        }

        let content_type = field
            .content_type()
            .map_err(|_| {
                Error::UnsupportedMediaError(String::from("missing part content type"))
            })?
            .to_string();
        let extension = resolve_media_type(&content_type, policy.allowed_types)?;

        let mut file = SpooledTempFile::new(policy.spill_threshold);
        let mut size: u64 = 0;
        while let Some(chunk) = field
            .try_next()
            .await
            .map_err(|e| Error::BadMultipartError(e.to_string()))?
        {
            size += chunk.len() as u64;
            file = write_chunk(file, chunk).await?;
        }

        let file = spawn_blocking(move || {
            let mut file = file;
            file.seek(SeekFrom::Start(0))?;
            Ok(file)
        })
        .await?;

        return Ok(UploadedPart {
            file,
            content_type,
            extension,
            size,
        });
    }

    Err(Error::BadMultipartError(format!(
        "No file specified, no multipart form field found for name '{part_name}'"
    )))
}

async fn write_chunk(mut file: SpooledTempFile, chunk: Bytes) -> Result<SpooledTempFile, Error> {
    if file.is_rolled() {
        // spilled to disk, keep the blocking write off the runtime
        spawn_blocking(move || {
            file.write_all(&chunk)?;
            Ok(file)
        })
        .await
    } else {
        file.write_all(&chunk)?;
        Ok(file)
    }
}
