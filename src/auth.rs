use std::sync::Arc;

use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use warp::{
    Filter, Rejection,
    filters::header::headers_cloned,
    http::header::{self, HeaderMap},
};

use crate::error::Error;

const JWT_BEARER_PREFIX: &str = "Bearer ";

/// Struct encoded in the JWT that contains its expiry and the subject user id.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub exp: usize,
    pub sub: String,
}

/// Warp filter for requests that require a caller identified by the auth header. Extracts the
/// owner id of the caller.
pub fn with_owner(
    jwt_secret: Arc<String>,
) -> impl Filter<Extract = (Uuid,), Error = Rejection> + Clone {
    headers_cloned().and_then(move |header_map: HeaderMap| {
        let jwt_secret = jwt_secret.clone();
        async move { verify_bearer(&header_map, &jwt_secret).map_err(warp::reject::custom) }
    })
}

/// Validates the bearer token in the `Authorization` header against the signing secret and
/// returns the owner id stored in its `sub` claim.
///
/// Fails with [`Error::MissingAuthHeaderError`] if there is no header and with
/// [`Error::InvalidJwtError`] if the header is malformed or the token is expired, carries an
/// invalid signature or a subject that is not a UUID.
pub fn verify_bearer(header_map: &HeaderMap, jwt_secret: &str) -> Result<Uuid, Error> {
    let auth_header = match header_map.get(header::AUTHORIZATION) {
        Some(h) => std::str::from_utf8(h.as_bytes()).map_err(|_| Error::InvalidJwtError)?,
        None => return Err(Error::MissingAuthHeaderError),
    };

    let jwt_token = auth_header
        .strip_prefix(JWT_BEARER_PREFIX)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(Error::InvalidJwtError)?;

    // fails if expired
    let token_data = decode::<Claims>(
        jwt_token,
        &DecodingKey::from_secret(jwt_secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .map_err(|e| {
        log::debug!("Rejecting JWT: {e}");
        Error::InvalidJwtError
    })?;

    Uuid::parse_str(&token_data.claims.sub).map_err(|_| Error::InvalidJwtError)
}
