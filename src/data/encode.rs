use std::{
    collections::HashMap,
    ffi::OsString,
    path::{Path, PathBuf},
    process::Stdio,
    time::Instant,
};

use serde::Deserialize;
use tokio::process::Command;

use crate::{
    data::mp4,
    error::Error,
    util::{format_duration, spawn_blocking},
};

pub const OTHER_ASPECT_PREFIX: &str = "other";
pub const REMUX_SUFFIX: &str = ".processing";

#[derive(Deserialize, Debug)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Deserialize, Debug)]
struct FfprobeStream {
    display_aspect_ratio: Option<String>,
}

/// Runs ffprobe on the file and returns the display aspect ratio of its first stream, e.g. `16:9`.
///
/// A missing ratio is not an error and results in `None`.
pub async fn probe_aspect_ratio(ffprobe: &str, path: &Path) -> Result<Option<String>, Error> {
    let process_output = Command::new(ffprobe)
        .args(["-v", "error", "-print_format", "json", "-show_streams"])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| Error::ProbeError(format!("Failed to run ffprobe process: {e}")))?;

    if !process_output.status.success() {
        let error_msg = String::from_utf8_lossy(&process_output.stderr);
        return Err(Error::ProbeError(format!(
            "ffprobe failed with status {}: {}",
            process_output.status, error_msg
        )));
    }

    let ffprobe_output = serde_json::from_slice::<FfprobeOutput>(&process_output.stdout)
        .map_err(|e| Error::ProbeError(format!("Failed to deserialize ffprobe output: {e}")))?;

    Ok(ffprobe_output
        .streams
        .into_iter()
        .next()
        .and_then(|stream| stream.display_aspect_ratio)
        .filter(|ratio| !ratio.is_empty()))
}

/// Maps a display aspect ratio to the object key prefix, anything not in the mapping is `other`.
pub fn aspect_prefix<'a>(ratio: Option<&str>, prefixes: &'a HashMap<String, String>) -> &'a str {
    ratio
        .and_then(|ratio| prefixes.get(ratio.trim()))
        .map(String::as_str)
        .unwrap_or(OTHER_ASPECT_PREFIX)
}

/// Path the remuxed copy of `path` is written to.
pub fn remux_output_path(path: &Path) -> PathBuf {
    let mut output: OsString = path.as_os_str().to_owned();
    output.push(REMUX_SUFFIX);
    PathBuf::from(output)
}

/// Rewrites the MP4 container so the `moov` atom sits at the head of the file. Streams are copied,
/// nothing is re-encoded. Returns the path of the output file, which the caller has to delete.
///
/// The process is killed if the returned future is dropped.
pub async fn remux_fast_start(ffmpeg: &str, path: &Path) -> Result<PathBuf, Error> {
    let output_path = remux_output_path(path);
    let start_time = Instant::now();

    log::debug!("Spawning ffmpeg to remux {}", path.display());
    let process_output = Command::new(ffmpeg)
        .arg("-i")
        .arg(path)
        .args(["-c", "copy", "-movflags", "faststart", "-f", "mp4"])
        .arg(&output_path)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| Error::RemuxError(format!("Failed to run ffmpeg process: {e}")))?;

    if !process_output.status.success() {
        let error_msg = String::from_utf8_lossy(&process_output.stderr);
        return Err(Error::RemuxError(format!(
            "ffmpeg for {} failed with status {}: {}",
            path.display(),
            process_output.status,
            error_msg
        )));
    }

    let check_path = output_path.clone();
    let fast_start = spawn_blocking(move || {
        let mut file = std::fs::File::open(&check_path)?;
        mp4::is_fast_start(&mut file).map_err(Error::from)
    })
    .await
    .map_err(|e| Error::RemuxError(format!("Failed to inspect remuxed output: {e}")))?;

    if !fast_start {
        return Err(Error::RemuxError(format!(
            "Remuxed output {} does not start with the moov atom",
            output_path.display()
        )));
    }

    log::info!(
        "Remuxed {} for fast start in {}",
        path.display(),
        format_duration(start_time.elapsed())
    );
    Ok(output_path)
}

#[cfg(all(test, unix))]
pub mod tests {
    use std::{
        collections::HashMap,
        os::unix::fs::PermissionsExt,
        path::{Path, PathBuf},
    };

    use super::{
        OTHER_ASPECT_PREFIX, aspect_prefix, probe_aspect_ratio, remux_fast_start, remux_output_path,
    };
    use crate::{
        config::{DEFAULT_ASPECT_RATIO_PREFIXES, parse_mapping},
        data::mp4::tests::mp4_with_order,
        error::Error,
    };

    /// Writes an executable shell script standing in for ffprobe / ffmpeg.
    pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    /// ffprobe stand-in printing a stream with the given display aspect ratio.
    pub fn fake_ffprobe(dir: &Path, ratio: Option<&str>) -> PathBuf {
        let stream = match ratio {
            Some(ratio) => {
                format!("{{\"index\": 0, \"codec_type\": \"video\", \"display_aspect_ratio\": \"{ratio}\"}}")
            }
            None => String::from("{\"index\": 0, \"codec_type\": \"video\"}"),
        };
        write_script(
            dir,
            "ffprobe",
            &format!("cat <<'JSON'\n{{\"streams\": [{stream}]}}\nJSON"),
        )
    }

    /// ffmpeg stand-in copying a fixture with the given box order to the last argument.
    pub fn fake_ffmpeg(dir: &Path, order: &[&[u8; 4]]) -> PathBuf {
        let fixture = dir.join("remuxed-fixture.mp4");
        std::fs::write(&fixture, mp4_with_order(order)).unwrap();
        write_script(
            dir,
            "ffmpeg",
            &format!(
                "for last; do :; done\ncp '{}' \"$last\"",
                fixture.display()
            ),
        )
    }

    pub fn failing_tool(dir: &Path, name: &str) -> PathBuf {
        write_script(dir, name, "echo 'simulated failure' >&2\nexit 1")
    }

    fn prefixes() -> HashMap<String, String> {
        parse_mapping(DEFAULT_ASPECT_RATIO_PREFIXES).unwrap()
    }

    #[test]
    fn test_aspect_prefix() {
        let prefixes = prefixes();
        assert_eq!(aspect_prefix(Some("16:9"), &prefixes), "landscape");
        assert_eq!(aspect_prefix(Some("9:16"), &prefixes), "portrait");
        for other in [Some("4:3"), Some("1:1"), Some(""), Some("16:10"), None] {
            assert_eq!(aspect_prefix(other, &prefixes), OTHER_ASPECT_PREFIX);
        }
    }

    #[test]
    fn test_remux_output_path() {
        assert_eq!(
            remux_output_path(Path::new("/tmp/upload123")),
            PathBuf::from("/tmp/upload123.processing")
        );
    }

    #[tokio::test]
    async fn test_probe_aspect_ratio() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.mp4");
        std::fs::write(&input, b"video").unwrap();

        let ffprobe = fake_ffprobe(dir.path(), Some("9:16"));
        let ratio = probe_aspect_ratio(ffprobe.to_str().unwrap(), &input)
            .await
            .unwrap();
        assert_eq!(ratio.as_deref(), Some("9:16"));
    }

    #[tokio::test]
    async fn test_probe_without_aspect_ratio() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.mp4");
        std::fs::write(&input, b"video").unwrap();

        let ffprobe = fake_ffprobe(dir.path(), None);
        let ratio = probe_aspect_ratio(ffprobe.to_str().unwrap(), &input)
            .await
            .unwrap();
        assert_eq!(ratio, None);

        let ffprobe = write_script(dir.path(), "ffprobe-empty", "echo '{\"streams\": []}'");
        let ratio = probe_aspect_ratio(ffprobe.to_str().unwrap(), &input)
            .await
            .unwrap();
        assert_eq!(ratio, None);
    }

    #[tokio::test]
    async fn test_probe_failures() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.mp4");
        std::fs::write(&input, b"video").unwrap();

        let ffprobe = failing_tool(dir.path(), "ffprobe");
        let res = probe_aspect_ratio(ffprobe.to_str().unwrap(), &input).await;
        assert!(matches!(res, Err(Error::ProbeError(_))));

        let ffprobe = write_script(dir.path(), "ffprobe-garbage", "echo 'not json'");
        let res = probe_aspect_ratio(ffprobe.to_str().unwrap(), &input).await;
        assert!(matches!(res, Err(Error::ProbeError(_))));

        let missing = dir.path().join("no-such-ffprobe");
        let res = probe_aspect_ratio(missing.to_str().unwrap(), &input).await;
        assert!(matches!(res, Err(Error::ProbeError(_))));
    }

    #[tokio::test]
    async fn test_remux_fast_start() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.mp4");
        std::fs::write(&input, mp4_with_order(&[b"ftyp", b"mdat", b"moov"])).unwrap();

        let ffmpeg = fake_ffmpeg(dir.path(), &[b"ftyp", b"moov", b"mdat"]);
        let output = remux_fast_start(ffmpeg.to_str().unwrap(), &input)
            .await
            .unwrap();
        assert_eq!(output, remux_output_path(&input));
        assert!(output.exists());
    }

    #[tokio::test]
    async fn test_remux_rejects_output_without_fast_start() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.mp4");
        std::fs::write(&input, b"video").unwrap();

        let ffmpeg = fake_ffmpeg(dir.path(), &[b"ftyp", b"mdat", b"moov"]);
        let res = remux_fast_start(ffmpeg.to_str().unwrap(), &input).await;
        assert!(matches!(res, Err(Error::RemuxError(_))));
    }

    #[tokio::test]
    async fn test_remux_process_failure() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.mp4");
        std::fs::write(&input, b"video").unwrap();

        let ffmpeg = failing_tool(dir.path(), "ffmpeg");
        let res = remux_fast_start(ffmpeg.to_str().unwrap(), &input).await;
        assert!(matches!(res, Err(Error::RemuxError(_))));
        assert!(!remux_output_path(&input).exists());
    }
}
