use std::net::SocketAddr;

use axum::{
    RequestPartsExt,
    extract::{ConnectInfo, FromRequestParts},
    http::{StatusCode, request::Parts},
};
use axum_extra::{TypedHeader, headers::UserAgent};
use sluice_core::{RequestIdentifier, rate_limit::identifier::UNKNOWN_ADDRESS};

pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// Id of the authenticated user, inserted as a request extension by whatever
/// authentication layer runs before the admission layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUserId(pub String);

/// Who is making the request, as far as admission control is concerned.
#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub user_id: Option<String>,
    /// Client address: first `x-forwarded-for` entry, else the peer address.
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub identifier: RequestIdentifier,
}

impl ClientInfo {
    /// The address to record against login attempts.
    pub fn ip_or_unknown(&self) -> &str {
        self.ip.as_deref().unwrap_or(UNKNOWN_ADDRESS)
    }
}

impl<S> FromRequestParts<S> for ClientInfo
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_agent = parts
            .extract::<Option<TypedHeader<UserAgent>>>()
            .await
            .map_err(|_| (StatusCode::BAD_REQUEST, "Invalid user agent header"))?
            .map(|ua| ua.to_string());

        let user_id = parts
            .extensions
            .get::<AuthenticatedUserId>()
            .map(|AuthenticatedUserId(id)| id.clone());

        let forwarded_for = parts
            .headers
            .get(FORWARDED_FOR_HEADER)
            .and_then(|header| header.to_str().ok())
            .map(str::to_string);

        let peer = parts
            .extract::<ConnectInfo<SocketAddr>>()
            .await
            .ok()
            .map(|ConnectInfo(addr)| addr.ip().to_string());

        let forwarded_for = forwarded_for.or(peer);
        let identifier =
            RequestIdentifier::from_request(user_id.as_deref(), forwarded_for.as_deref());
        let ip = forwarded_for
            .as_deref()
            .and_then(|list| list.split(',').next())
            .map(|addr| addr.trim().to_string())
            .filter(|addr| !addr.is_empty());

        Ok(ClientInfo {
            user_id,
            ip,
            user_agent,
            identifier,
        })
    }
}
