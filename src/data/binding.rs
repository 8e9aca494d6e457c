use url::Url;

use crate::{
    data::s3utils::{PRESIGNED_URL_EXPIRY, Presigner},
    error::Error,
    model::VideoRecord,
    util::join_url,
};

/// How the URL of an uploaded video is stored on its record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UrlMode {
    /// Objects are publicly reachable through a CDN distribution.
    PublicCdn { distribution: String },
    /// Objects live in a private bucket, the record stores `bucket,key` and is signed on read.
    PrivateBucket { bucket: String },
}

pub fn bind_video_url(mode: &UrlMode, key: &str) -> Result<String, Error> {
    match mode {
        UrlMode::PublicCdn { distribution } => {
            let mut url = Url::parse(&format!("https://{distribution}/")).map_err(|e| {
                Error::StorageError(format!("Invalid CDN distribution '{distribution}': {e}"))
            })?;
            join_url(&mut url, key.split('/'))?;
            Ok(url.to_string())
        }
        UrlMode::PrivateBucket { bucket } => Ok(format!("{bucket},{key}")),
    }
}

/// Splits a stored `bucket,key` pair. Returns `None` for absolute URLs.
fn stored_bucket_key(video_url: &str) -> Option<Result<(&str, &str), Error>> {
    if video_url.starts_with("https://") || video_url.starts_with("http://") {
        return None;
    }

    Some(match video_url.split_once(',') {
        Some((bucket, key)) if !bucket.is_empty() && !key.is_empty() => Ok((bucket, key)),
        _ => Err(Error::MalformedStoredUrlError(video_url.to_string())),
    })
}

/// Replaces a stored `bucket,key` pair on the record with a freshly presigned GET URL. Records
/// without a video URL or with an absolute URL are returned unchanged.
pub fn sign_video_url(
    presigner: &dyn Presigner,
    mut record: VideoRecord,
) -> Result<VideoRecord, Error> {
    let Some(video_url) = record.video_url.as_deref() else {
        return Ok(record);
    };

    let signed = match stored_bucket_key(video_url) {
        None => return Ok(record),
        Some(parts) => {
            let (bucket, key) = parts?;
            presigner.presign_get(bucket, key, PRESIGNED_URL_EXPIRY)?
        }
    };

    record.video_url = Some(signed);
    Ok(record)
}
