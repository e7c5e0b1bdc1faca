//! `Authorization: Bearer <token>` extraction.

use http::HeaderMap;
use http::header::AUTHORIZATION;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BearerError {
    #[error("no Authorization header")]
    Missing,
    #[error("Authorization header is not visible ASCII")]
    NotAscii,
    #[error("Authorization header is not of the form `Bearer <token>`")]
    Malformed,
    #[error("Authorization scheme is `{0}`, not `Bearer`")]
    WrongScheme(String),
}

/// Pull the bearer token out of the request headers.
///
/// The header must hold exactly two whitespace-separated parts, the first
/// of which is `bearer` in any case.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, BearerError> {
    let value = headers.get(AUTHORIZATION).ok_or(BearerError::Missing)?;
    let value = value.to_str().map_err(|_| BearerError::NotAscii)?;

    let mut parts = value.split_whitespace();
    let (Some(scheme), Some(token), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(BearerError::Malformed);
    };

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(BearerError::WrongScheme(scheme.to_string()));
    }
    Ok(token)
}
