use std::{
    io::{self, Write},
    path::PathBuf,
    sync::Arc,
};

use chrono::Utc;
use futures::Stream;
use uuid::Uuid;
use warp::{Buf, Filter, Rejection, Reply};

use crate::{
    auth::with_owner,
    catalog::Catalog,
    config::{Config, THUMBNAIL_SPILL_THRESHOLD, VIDEO_SPILL_THRESHOLD},
    data::{
        assets::{asset_file_name, asset_url, store_asset},
        binding::{bind_video_url, sign_video_url},
        encode::{aspect_prefix, probe_aspect_ratio, remux_fast_start, remux_output_path},
        intake::{MediaPolicy, multipart_boundary, read_part},
        s3utils::{ObjectStore, Presigner, generate_object_key},
    },
    error::Error,
    model::VideoRecord,
    util::spawn_blocking,
};

pub mod assets;
pub mod binding;
pub mod encode;
pub mod intake;
pub mod mp4;
pub mod s3utils;

/// Everything the handlers need, shared read-only between requests.
pub struct IngestContext {
    pub config: Config,
    pub catalog: Arc<dyn Catalog>,
    pub object_store: Arc<dyn ObjectStore>,
    pub presigner: Arc<dyn Presigner>,
}

fn with_context(
    ctx: Arc<IngestContext>,
) -> impl Filter<Extract = (Arc<IngestContext>,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || ctx.clone())
}

/// Path segment holding the id of the video, rejects with a 400 if it is not a UUID.
fn video_id_param() -> impl Filter<Extract = (Uuid,), Error = Rejection> + Clone {
    warp::path::param::<String>().and_then(|video_id: String| async move {
        Uuid::parse_str(&video_id)
            .map_err(|_| warp::reject::custom(Error::InvalidIdError(video_id)))
    })
}

/// The upload, read and asset routes of the API.
pub fn routes(
    ctx: Arc<IngestContext>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let jwt_secret = Arc::new(ctx.config.jwt_secret.clone());

    let thumbnail_upload_route = warp::post()
        .and(warp::path("api"))
        .and(warp::path("thumbnail_upload"))
        .and(video_id_param())
        .and(warp::path::end())
        .and(with_owner(jwt_secret.clone()))
        .and(warp::header::optional::<String>("content-type"))
        .and(warp::body::stream())
        .and(with_context(ctx.clone()))
        .and_then(upload_thumbnail_handler);

    let video_upload_route = warp::post()
        .and(warp::path("api"))
        .and(warp::path("video_upload"))
        .and(video_id_param())
        .and(warp::path::end())
        .and(with_owner(jwt_secret.clone()))
        .and(warp::header::optional::<String>("content-type"))
        .and(warp::body::stream())
        .and(with_context(ctx.clone()))
        .and_then(upload_video_handler);

    let get_video_route = warp::get()
        .and(warp::path("api"))
        .and(warp::path("videos"))
        .and(video_id_param())
        .and(warp::path::end())
        .and(with_owner(jwt_secret))
        .and(with_context(ctx.clone()))
        .and_then(get_video_handler);

    let assets_route = warp::path("assets").and(warp::fs::dir(ctx.config.assets_root.clone()));

    thumbnail_upload_route
        .or(video_upload_route)
        .or(get_video_route)
        .or(assets_route)
}

/// Loads the video and checks that it belongs to the caller.
async fn load_owned_video(
    ctx: &IngestContext,
    video_id: Uuid,
    owner_id: &Uuid,
) -> Result<VideoRecord, Error> {
    let video = ctx
        .catalog
        .get(video_id)
        .await?
        .ok_or(Error::VideoNotFoundError(video_id))?;

    if !video.is_owned_by(owner_id) {
        log::warn!(
            "User {} attempted to modify video {} owned by {}",
            owner_id,
            video_id,
            video.owner_id
        );
        return Err(Error::NotOwnerError(video_id));
    }

    Ok(video)
}

/// Writes the record to the catalog and returns the copy sent back to the client, with a stored
/// `bucket,key` video url replaced by a signed url. A stored url that cannot be signed is returned
/// as is, the write has already happened at that point.
async fn persist_video(ctx: &IngestContext, mut video: VideoRecord) -> Result<VideoRecord, Error> {
    video.update_timestamp = Utc::now();
    ctx.catalog.put(&video).await?;

    match sign_video_url(ctx.presigner.as_ref(), video.clone()) {
        Ok(signed) => Ok(signed),
        Err(e) => {
            log::warn!("Returning unsigned video url for video {}: {}", video.id, e);
            Ok(video)
        }
    }
}

pub async fn upload_thumbnail_handler(
    video_id: Uuid,
    owner_id: Uuid,
    content_type: Option<String>,
    body: impl Stream<Item = Result<impl Buf, warp::Error>> + Unpin,
    ctx: Arc<IngestContext>,
) -> Result<impl Reply, Rejection> {
    let mut video = load_owned_video(&ctx, video_id, &owner_id).await?;
    let boundary = multipart_boundary(content_type.as_deref())?;

    log::info!("Uploading thumbnail for video {} by user {}", video_id, owner_id);
    let part = read_part(
        boundary,
        body,
        "thumbnail",
        MediaPolicy {
            allowed_types: &ctx.config.allowed_image_types,
            spill_threshold: THUMBNAIL_SPILL_THRESHOLD,
        },
    )
    .await?;

    log::debug!(
        "Received {} bytes of {} for video {}",
        part.size,
        part.content_type,
        video_id
    );
    let file_name = asset_file_name(&video_id, &part.extension);
    store_asset(&ctx.config.assets_root, &video_id, part).await?;

    video.thumbnail_url = Some(asset_url(
        &ctx.config.public_host,
        ctx.config.port,
        &file_name,
    ));

    let video = persist_video(&ctx, video).await?;
    Ok(warp::reply::json(&video))
}

/// Removes the file at `path` when dropped, if it has been created.
struct TempArtifactSentinel {
    path: PathBuf,
}

impl Drop for TempArtifactSentinel {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => log::debug!("Removed temporary file {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => log::warn!(
                "Failed to remove temporary file {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}

pub async fn upload_video_handler(
    video_id: Uuid,
    owner_id: Uuid,
    content_type: Option<String>,
    body: impl Stream<Item = Result<impl Buf, warp::Error>> + Unpin,
    ctx: Arc<IngestContext>,
) -> Result<impl Reply, Rejection> {
    let mut video = load_owned_video(&ctx, video_id, &owner_id).await?;
    let boundary = multipart_boundary(content_type.as_deref())?;

    log::info!("Uploading video {} by user {}", video_id, owner_id);
    let part = read_part(
        boundary,
        body,
        "video",
        MediaPolicy {
            allowed_types: &ctx.config.allowed_video_types,
            spill_threshold: VIDEO_SPILL_THRESHOLD,
        },
    )
    .await?;
    log::debug!(
        "Received {} bytes of {} for video {}",
        part.size,
        part.content_type,
        video_id
    );
    let extension = part.extension.clone();
    let part_content_type = part.content_type.clone();

    // the capture is deleted when dropped, the remux output by its sentinel, covering every exit
    // including the request future being dropped
    let temp_dir = ctx.config.temp_dir.clone();
    let capture = spawn_blocking(move || {
        let mut source = part.file;
        let mut capture = tempfile::Builder::new()
            .prefix("vidvault-upload-")
            .tempfile_in(&temp_dir)?;
        io::copy(&mut source, capture.as_file_mut())?;
        capture.as_file_mut().flush()?;
        Ok(capture)
    })
    .await?;
    let remux_sentinel = TempArtifactSentinel {
        path: remux_output_path(capture.path()),
    };

    let aspect_ratio = probe_aspect_ratio(&ctx.config.ffprobe_path, capture.path()).await?;
    let prefix = aspect_prefix(aspect_ratio.as_deref(), &ctx.config.aspect_ratio_prefixes);
    log::debug!(
        "Video {} has aspect ratio {:?}, using prefix '{}'",
        video_id,
        aspect_ratio,
        prefix
    );

    let remuxed_path = remux_fast_start(&ctx.config.ffmpeg_path, capture.path()).await?;
    let remuxed = tokio::fs::File::open(&remuxed_path)
        .await
        .map_err(Error::from)?;

    let object_key = generate_object_key(prefix, &extension)?;
    ctx.object_store
        .put_file(&object_key, remuxed, &part_content_type)
        .await?;

    video.video_url = Some(bind_video_url(&ctx.config.url_mode, &object_key)?);
    let video = persist_video(&ctx, video).await.inspect_err(|e| {
        log::warn!(
            "Object {} is orphaned, failed to update video {}: {}",
            object_key,
            video_id,
            e
        )
    })?;

    drop(remux_sentinel);
    drop(capture);

    log::info!("Stored video {} as {}", video_id, object_key);
    Ok(warp::reply::json(&video))
}

pub async fn get_video_handler(
    video_id: Uuid,
    owner_id: Uuid,
    ctx: Arc<IngestContext>,
) -> Result<impl Reply, Rejection> {
    let video = load_owned_video(&ctx, video_id, &owner_id).await?;
    let video = sign_video_url(ctx.presigner.as_ref(), video)?;
    Ok(warp::reply::json(&video))
}
