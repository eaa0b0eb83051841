use axum::Extension;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use tracing::debug;

use crate::server::error::Error;
use crate::server::services::ProxyServices;

/// The base rewritten playlists should point back at, plus the services.
///
/// With `PUBLIC_URL` configured that's used as-is, otherwise it's the path this request
/// came in on so players resolve the callbacks relative to the playlist they fetched.
pub struct ProxyContext(pub String, pub ProxyServices);

impl<S> FromRequestParts<S> for ProxyContext
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Extension(services): Extension<ProxyServices> =
            Extension::from_request_parts(parts, state)
                .await
                .map_err(|err| Error::InternalServerErrorWithContext(err.to_string()))?;

        let proxy_base = match services.config.public_url.as_deref() {
            Some(public) if !public.is_empty() => public.to_string(),
            _ => parts.uri.path().to_string(),
        };

        debug!("proxy base for this request: {}", proxy_base);

        Ok(ProxyContext(proxy_base, services))
    }
}
