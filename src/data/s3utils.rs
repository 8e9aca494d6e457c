use std::time::{Duration, Instant};

use async_trait::async_trait;
use ring::rand::{SecureRandom, SystemRandom};
use s3::{Bucket, Region, creds::Credentials};

use crate::{error::Error, util::format_duration};

/// Number of random bytes in generated object keys.
pub const OBJECT_KEY_RANDOM_BYTES: usize = 32;
/// Lifetime of presigned GET URLs.
pub const PRESIGNED_URL_EXPIRY: Duration = Duration::from_secs(60 * 60);

/// Destination for uploaded videos.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Uploads the whole file under `key`. Dropping the future aborts the upload.
    async fn put_file(
        &self,
        key: &str,
        file: tokio::fs::File,
        content_type: &str,
    ) -> Result<(), Error>;
}

/// Creates time limited GET URLs for objects in private buckets.
pub trait Presigner: Send + Sync {
    fn presign_get(&self, bucket: &str, key: &str, expiry: Duration) -> Result<String, Error>;
}

/// Generates a key of the form `{prefix}/{random}.{extension}` where `random` is 32 bytes from the
/// system CSPRNG encoded as unpadded URL-safe base64.
pub fn generate_object_key(prefix: &str, extension: &str) -> Result<String, Error> {
    let mut random = [0u8; OBJECT_KEY_RANDOM_BYTES];
    SystemRandom::new()
        .fill(&mut random)
        .map_err(|_| Error::IoError(String::from("Failed to generate random object key")))?;
    let encoded = data_encoding::BASE64URL_NOPAD.encode(&random);
    Ok(format!("{prefix}/{encoded}.{extension}"))
}

pub struct S3Store {
    bucket_name: String,
    bucket: Bucket,
    region: Region,
    credentials: Credentials,
    path_style: bool,
}

impl S3Store {
    /// Creates a store for the given bucket. With an `endpoint` the bucket is addressed path-style
    /// on that custom endpoint (e.g. MinIO), else `region` must be an AWS region name.
    pub fn new(
        bucket_name: &str,
        region: &str,
        endpoint: Option<&str>,
        access_key: &str,
        secret_key: &str,
    ) -> Result<Self, Error> {
        let (region, path_style) = match endpoint {
            Some(endpoint) => (
                Region::Custom {
                    region: String::from(region),
                    endpoint: String::from(endpoint),
                },
                true,
            ),
            None => (
                region
                    .parse::<Region>()
                    .map_err(|e| Error::StorageError(format!("Invalid region: {e}")))?,
                false,
            ),
        };

        let credentials = Credentials {
            access_key: Some(String::from(access_key)),
            secret_key: Some(String::from(secret_key)),
            security_token: None,
            session_token: None,
            expiration: None,
        };

        let bucket = create_bucket(bucket_name, &region, &credentials, path_style)?;

        Ok(Self {
            bucket_name: String::from(bucket_name),
            bucket,
            region,
            credentials,
            path_style,
        })
    }
}

fn create_bucket(
    bucket_name: &str,
    region: &Region,
    credentials: &Credentials,
    path_style: bool,
) -> Result<Bucket, Error> {
    Bucket::new(bucket_name, region.clone(), credentials.clone())
        .map_err(|e| Error::StorageError(format!("Invalid bucket '{bucket_name}': {e}")))
        .map(|b| if path_style { b.with_path_style() } else { b })
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn put_file(
        &self,
        key: &str,
        mut file: tokio::fs::File,
        content_type: &str,
    ) -> Result<(), Error> {
        log::info!("Starting S3 upload for {}", key);
        let start_time = Instant::now();
        let status = self
            .bucket
            .put_object_stream_with_content_type(&mut file, key, content_type)
            .await?;
        if status >= 300 {
            return Err(Error::S3ResponseError(status));
        }
        log::info!(
            "Finished S3 upload for {} in {}",
            key,
            format_duration(start_time.elapsed())
        );
        Ok(())
    }
}

impl Presigner for S3Store {
    fn presign_get(&self, bucket: &str, key: &str, expiry: Duration) -> Result<String, Error> {
        let signed = if bucket == self.bucket_name {
            self.bucket.presign_get(key, expiry.as_secs() as u32, None)
        } else {
            create_bucket(bucket, &self.region, &self.credentials, self.path_style)?.presign_get(
                key,
                expiry.as_secs() as u32,
                None,
            )
        };

        signed.map_err(Error::from)
    }
}
