use std::{collections::HashMap, path::PathBuf, str::FromStr};

use crate::data::binding::UrlMode;

pub const DEFAULT_ALLOWED_IMAGE_TYPES: &str = "image/jpeg=jpg,image/png=png,image/gif=gif";
pub const DEFAULT_ALLOWED_VIDEO_TYPES: &str = "video/mp4=mp4";
pub const DEFAULT_ASPECT_RATIO_PREFIXES: &str = "16:9=landscape,9:16=portrait";

/// Spill threshold for thumbnail parts, larger parts are buffered on disk.
pub const THUMBNAIL_SPILL_THRESHOLD: usize = 10 << 20;
/// Spill threshold for video parts.
pub const VIDEO_SPILL_THRESHOLD: usize = 1 << 30;

/// Settings the ingest handlers read, immutable once the server is started.
#[derive(Clone, Debug)]
pub struct Config {
    pub jwt_secret: String,
    pub assets_root: PathBuf,
    pub public_host: String,
    pub port: u16,
    pub s3_bucket: String,
    pub s3_region: String,
    pub s3_endpoint: Option<String>,
    pub url_mode: UrlMode,
    pub allowed_image_types: HashMap<String, String>,
    pub allowed_video_types: HashMap<String, String>,
    pub aspect_ratio_prefixes: HashMap<String, String>,
    pub temp_dir: PathBuf,
    pub ffprobe_path: String,
    pub ffmpeg_path: String,
}

impl Config {
    /// Reads the configuration from the environment, panicking on missing or invalid values.
    /// Only called on startup.
    pub fn from_env() -> Self {
        let port = u16::from_str(&required_var("PORT")).expect("PORT var is not a valid u16 value");
        let s3_bucket = required_var("S3_BUCKET");
        let s3_cf_distribution = optional_var("S3_CF_DISTRIBUTION");

        let url_mode = match s3_cf_distribution {
            Some(distribution) => UrlMode::PublicCdn { distribution },
            None => UrlMode::PrivateBucket {
                bucket: s3_bucket.clone(),
            },
        };

        Config {
            jwt_secret: required_var("JWT_SECRET"),
            assets_root: optional_var("ASSETS_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("assets")),
            public_host: optional_var("PUBLIC_HOST").unwrap_or_else(|| String::from("localhost")),
            port,
            s3_bucket,
            s3_region: required_var("S3_REGION"),
            s3_endpoint: optional_var("S3_ENDPOINT"),
            url_mode,
            allowed_image_types: parse_mapping(
                &optional_var("ALLOWED_IMAGE_TYPES")
                    .unwrap_or_else(|| String::from(DEFAULT_ALLOWED_IMAGE_TYPES)),
            )
            .expect("ALLOWED_IMAGE_TYPES is not a valid list of mime=extension pairs"),
            allowed_video_types: parse_mapping(
                &optional_var("ALLOWED_VIDEO_TYPES")
                    .unwrap_or_else(|| String::from(DEFAULT_ALLOWED_VIDEO_TYPES)),
            )
            .expect("ALLOWED_VIDEO_TYPES is not a valid list of mime=extension pairs"),
            aspect_ratio_prefixes: parse_mapping(
                &optional_var("ASPECT_RATIO_PREFIXES")
                    .unwrap_or_else(|| String::from(DEFAULT_ASPECT_RATIO_PREFIXES)),
            )
            .expect("ASPECT_RATIO_PREFIXES is not a valid list of ratio=prefix pairs"),
            temp_dir: optional_var("TEMP_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(std::env::temp_dir),
            ffprobe_path: optional_var("FFPROBE_PATH").unwrap_or_else(|| String::from("ffprobe")),
            ffmpeg_path: optional_var("FFMPEG_PATH").unwrap_or_else(|| String::from("ffmpeg")),
        }
    }
}

fn required_var(name: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| panic!("Missing environment variable {name} must be set"))
}

fn optional_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Parses a comma separated list of `key=value` pairs, e.g. `image/png=png,image/gif=gif`.
///
/// Keys are lowercased since they are matched against mime essences and aspect ratios.
pub fn parse_mapping(value: &str) -> Result<HashMap<String, String>, String> {
    let mut mapping = HashMap::new();
    for entry in value.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (key, value) = entry
            .split_once('=')
            .ok_or_else(|| format!("Entry '{entry}' is not a key=value pair"))?;
        let (key, value) = (key.trim(), value.trim());
        if key.is_empty() || value.is_empty() {
            return Err(format!("Entry '{entry}' has an empty key or value"));
        }
        mapping.insert(key.to_lowercase(), value.to_string());
    }

    if mapping.is_empty() {
        return Err(String::from("Mapping must not be empty"));
    }

    Ok(mapping)
}

#[cfg(test)]
mod tests {
    use super::{
        DEFAULT_ALLOWED_IMAGE_TYPES, DEFAULT_ALLOWED_VIDEO_TYPES, DEFAULT_ASPECT_RATIO_PREFIXES,
        parse_mapping,
    };

    #[test]
    fn test_default_mappings() {
        let images = parse_mapping(DEFAULT_ALLOWED_IMAGE_TYPES).unwrap();
        assert_eq!(images.len(), 3);
        assert_eq!(images["image/jpeg"], "jpg");
        assert_eq!(images["image/png"], "png");
        assert_eq!(images["image/gif"], "gif");

        let videos = parse_mapping(DEFAULT_ALLOWED_VIDEO_TYPES).unwrap();
        assert_eq!(videos.len(), 1);
        assert_eq!(videos["video/mp4"], "mp4");

        let ratios = parse_mapping(DEFAULT_ASPECT_RATIO_PREFIXES).unwrap();
        assert_eq!(ratios["16:9"], "landscape");
        assert_eq!(ratios["9:16"], "portrait");
    }

    #[test]
    fn test_mapping_tolerates_whitespace_and_case() {
        let mapping = parse_mapping(" Image/WebP = webp , ").unwrap();
        assert_eq!(mapping.len(), 1);
        assert_eq!(mapping["image/webp"], "webp");
    }

    #[test]
    fn test_invalid_mappings() {
        assert!(parse_mapping("").is_err());
        assert!(parse_mapping("image/png").is_err());
        assert!(parse_mapping("image/png=").is_err());
        assert!(parse_mapping("=png").is_err());
    }
}
