use std::{
    fs::File,
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
};

use uuid::Uuid;

use crate::{data::intake::UploadedPart, error::Error, util::spawn_blocking};

/// Name of the asset stored for a video, subsequent uploads for the same video replace it.
pub fn asset_file_name(video_id: &Uuid, extension: &str) -> String {
    format!("{video_id}.{extension}")
}

/// Public URL of an asset served by this process under `/assets`.
pub fn asset_url(public_host: &str, port: u16, file_name: &str) -> String {
    format!("http://{public_host}:{port}/assets/{file_name}")
}

/// Writes the part body to `{assets_root}/{video_id}.{ext}`, creating or truncating the file.
///
/// Concurrent writers for the same video race, the last one to finish wins.
pub async fn store_asset(
    assets_root: &Path,
    video_id: &Uuid,
    part: UploadedPart,
) -> Result<PathBuf, Error> {
    let file_name = asset_file_name(video_id, &part.extension);
    let path = assets_root.join(&file_name);
    let target = path.clone();

    let written = spawn_blocking(move || {
        let mut source = part.file;
        let mut writer = BufWriter::new(File::create(&target)?);
        let written = io::copy(&mut source, &mut writer)?;
        writer.flush()?;
        Ok(written)
    })
    .await
    .map_err(|e| {
        log::error!("Failed to write asset {}: {}", path.display(), e);
        e
    })?;

    log::debug!("Stored asset {} ({} bytes)", path.display(), written);
    Ok(path)
}
