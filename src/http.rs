//! HTTP API for the disposal ledger
//!
//! ## Identity
//!
//! - `X-Actor-Id: <user id>` - end-user caller, may act only for itself
//! - `Authorization: Bearer <service_token>` - trusted service caller
//!
//! ## Ledger
//! - `POST /disposals` - Record a disposal and run bookkeeping
//! - `POST /users/{id}/reconcile` - Recompute totals from history
//!
//! ## Profiles
//! - `GET /users/{id}/profile` - Profile with level progress (created on first access)
//! - `PUT /users/{id}/profile` - Update profile details
//! - `GET /users/{id}/disposals?limit=n` - Disposal history
//! - `GET /users/{id}/experience?limit=n` - Experience history
//! - `GET /users/{id}/badges` - Badge catalog with earned state
//!
//! ## Catalog, challenges, leaderboard
//! - `GET|POST /categories`, `GET|POST /badges`, `GET|POST /challenges`
//! - `POST /challenges/{id}/join?user_id=` - Join (defaults to the caller)
//! - `GET /leaderboard?by=waste|points&limit=n`
//!
//! ## Example Usage
//!
//! ```bash
//! curl -X POST -H "X-Actor-Id: u1" -H "Content-Type: application/json" \
//!      -d '{"user_id":"u1","category_id":"plastic","weight_kg":2.5}' \
//!      http://localhost:8095/disposals
//! ```

use crate::db;
use crate::error::LedgerError;
use crate::ledger::{CallerContext, NewDisposal};
use crate::services::response::{self, HandlerResult};
use crate::services::Services;
use bytes::Bytes;
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{header, Method, Request, Response};
use hyper_util::rt::TokioIo;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// Header carrying the end-user identity
pub const ACTOR_HEADER: &str = "x-actor-id";

/// Largest accepted request body
const MAX_BODY_BYTES: usize = 64 * 1024;

/// History page size when `?limit=` is absent
const DEFAULT_PAGE: u32 = 50;

/// `?limit=` for history endpoints
#[derive(Debug, Default, Deserialize)]
struct PageQuery {
    limit: Option<u32>,
}

/// `?by=&limit=` for the leaderboard
#[derive(Debug, Default, Deserialize)]
struct LeaderboardQuery {
    #[serde(default)]
    by: db::LeaderboardKind,
    limit: Option<u32>,
}

/// `?user_id=` for joining on behalf of a user
#[derive(Debug, Default, Deserialize)]
struct JoinQuery {
    user_id: Option<String>,
}

/// HTTP server state
pub struct HttpServer {
    services: Arc<Services>,
    bind_addr: SocketAddr,
    service_token: Option<String>,
}

impl HttpServer {
    /// Create a new HTTP server
    pub fn new(services: Arc<Services>, bind_addr: SocketAddr) -> Self {
        Self {
            services,
            bind_addr,
            service_token: None,
        }
    }

    /// Accept `Authorization: Bearer <token>` as a service caller
    pub fn with_service_token(mut self, token: Option<String>) -> Self {
        self.service_token = token.filter(|t| !t.is_empty());
        self
    }

    /// Run the HTTP server
    pub async fn run(self: Arc<Self>) -> Result<(), LedgerError> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        info!(addr = %self.bind_addr, "HTTP server listening");

        loop {
            let (stream, remote_addr) = listener.accept().await?;
            let io = TokioIo::new(stream);
            let server = self.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let server = server.clone();
                    async move { server.handle_request(req).await }
                });

                if let Err(err) = http1::Builder::new()
                    .serve_connection(io, service)
                    .await
                {
                    warn!(addr = %remote_addr, error = %err, "Connection error");
                }
            });
        }
    }

    /// Route requests to handlers
    async fn handle_request(
        &self,
        req: Request<Incoming>,
    ) -> Result<Response<Full<Bytes>>, hyper::Error> {
        let path = req.uri().path().to_string();
        let method = req.method().clone();

        debug!(method = %method, path = %path, "Incoming request");

        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();

        let result = match (&method, segments.as_slice()) {
            (&Method::GET, ["health"]) => self.handle_health(),

            (&Method::POST, ["disposals"]) => self.handle_submit_disposal(req).await,

            (&Method::GET, ["users", user_id, "profile"]) => {
                self.caller(&req).map(|ctx| response::from_result(self.services.profiles.get_or_create(&ctx, user_id)))
            }
            (&Method::PUT, ["users", user_id, "profile"]) => self.handle_update_profile(req, user_id).await,
            (&Method::GET, ["users", user_id, "disposals"]) => self.caller(&req).and_then(|ctx| {
                let limit = page_limit(req.uri().query())?;
                Ok(response::from_result(self.services.profiles.disposal_history(&ctx, user_id, limit)))
            }),
            (&Method::GET, ["users", user_id, "experience"]) => self.caller(&req).and_then(|ctx| {
                let limit = page_limit(req.uri().query())?;
                Ok(response::from_result(self.services.profiles.experience_history(&ctx, user_id, limit)))
            }),
            (&Method::GET, ["users", user_id, "badges"]) => {
                self.caller(&req).map(|ctx| response::from_result(self.services.profiles.achievements(&ctx, user_id)))
            }
            (&Method::POST, ["users", user_id, "reconcile"]) => {
                self.caller(&req).map(|ctx| response::from_result(self.services.ledger.reconcile(&ctx, user_id)))
            }

            (&Method::GET, ["categories"]) => Ok(response::from_result(self.services.catalog.list_categories())),
            (&Method::POST, ["categories"]) => self.handle_create_category(req).await,
            (&Method::GET, ["badges"]) => Ok(response::from_result(self.services.catalog.list_badges())),
            (&Method::POST, ["badges"]) => self.handle_create_badge(req).await,

            (&Method::GET, ["challenges"]) => {
                self.caller(&req).map(|ctx| response::from_result(self.services.challenges.list_open(&ctx)))
            }
            (&Method::POST, ["challenges"]) => self.handle_create_challenge(req).await,
            (&Method::POST, ["challenges", challenge_id, "join"]) => self.handle_join(&req, challenge_id),

            (&Method::GET, ["leaderboard"]) => self.handle_leaderboard(&req),

            (_, ["health"])
            | (_, ["disposals"])
            | (_, ["categories"])
            | (_, ["badges"])
            | (_, ["challenges"])
            | (_, ["leaderboard"]) => Ok(response::method_not_allowed()),

            _ => Ok(response::not_found("Not Found")),
        };

        Ok(result.unwrap_or_else(response::error_response))
    }

    /// Resolve the caller from request headers
    fn caller(&self, req: &Request<Incoming>) -> Result<CallerContext, LedgerError> {
        caller_from_headers(req.headers(), self.service_token.as_deref())
    }

    /// Health check endpoint
    fn handle_health(&self) -> HandlerResult {
        let stats = self.services.db.stats()?;
        Ok(response::ok(&serde_json::json!({
            "status": "ok",
            "users": stats.users,
            "disposals": stats.disposals,
            "badges_awarded": stats.badges_awarded,
            "active_challenges": stats.active_challenges,
            "event_subscribers": self.services.events.subscriber_count(),
        })))
    }

    /// POST /disposals
    async fn handle_submit_disposal(&self, req: Request<Incoming>) -> HandlerResult {
        let ctx = self.caller(&req)?;
        let request: NewDisposal = read_json(req).await?;

        let ledger = Arc::clone(&self.services.ledger);
        let receipt = tokio::task::spawn_blocking(move || ledger.submit_disposal(&ctx, request))
            .await
            .map_err(|e| LedgerError::Internal(format!("Disposal task failed: {}", e)))??;

        if receipt.replayed {
            Ok(response::ok(&receipt))
        } else {
            Ok(response::created(&receipt))
        }
    }

    /// PUT /users/{id}/profile
    async fn handle_update_profile(&self, req: Request<Incoming>, user_id: &str) -> HandlerResult {
        let ctx = self.caller(&req)?;
        let details: db::ProfileDetails = read_json(req).await?;
        Ok(response::from_result(self.services.profiles.update_details(&ctx, user_id, &details)))
    }

    /// POST /categories
    async fn handle_create_category(&self, req: Request<Incoming>) -> HandlerResult {
        let ctx = self.caller(&req)?;
        let input: db::CreateCategoryInput = read_json(req).await?;
        Ok(response::from_create_result(self.services.catalog.create_category(&ctx, &input)))
    }

    /// POST /badges
    async fn handle_create_badge(&self, req: Request<Incoming>) -> HandlerResult {
        let ctx = self.caller(&req)?;
        let input: db::CreateBadgeInput = read_json(req).await?;
        Ok(response::from_create_result(self.services.catalog.create_badge(&ctx, &input)))
    }

    /// POST /challenges
    async fn handle_create_challenge(&self, req: Request<Incoming>) -> HandlerResult {
        let ctx = self.caller(&req)?;
        let input: db::CreateChallengeInput = read_json(req).await?;
        Ok(response::from_create_result(self.services.challenges.create(&ctx, &input)))
    }

    /// POST /challenges/{id}/join, for the caller or `?user_id=`
    fn handle_join(&self, req: &Request<Incoming>, challenge_id: &str) -> HandlerResult {
        let ctx = self.caller(req)?;
        let query: JoinQuery = parse_query(req.uri().query())?;
        let user_id = query.user_id.unwrap_or_else(|| ctx.actor_id.clone());

        self.services.challenges.join(&ctx, challenge_id, &user_id)?;
        Ok(response::ok(&serde_json::json!({
            "joined": true,
            "challenge_id": challenge_id,
            "user_id": user_id,
        })))
    }

    /// GET /leaderboard
    fn handle_leaderboard(&self, req: &Request<Incoming>) -> HandlerResult {
        let query: LeaderboardQuery = parse_query(req.uri().query())?;
        Ok(response::from_result(self.services.profiles.leaderboard(query.by, query.limit)))
    }
}

/// Build a caller context from headers.
///
/// A bearer token must match the configured service token; otherwise the
/// `X-Actor-Id` header names an end user.
pub fn caller_from_headers(
    headers: &header::HeaderMap,
    service_token: Option<&str>,
) -> Result<CallerContext, LedgerError> {
    if let Some(auth) = headers.get(header::AUTHORIZATION) {
        let token = auth
            .to_str()
            .ok()
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or_else(|| LedgerError::Unauthorized("malformed Authorization header".into()))?;
        return match service_token {
            Some(expected) if expected == token => Ok(CallerContext::service("service")),
            _ => Err(LedgerError::Unauthorized("invalid service token".into())),
        };
    }

    headers
        .get(ACTOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(CallerContext::user)
        .ok_or_else(|| LedgerError::Unauthorized("missing X-Actor-Id header".into()))
}

/// Read and parse a JSON request body
async fn read_json<T: DeserializeOwned>(req: Request<Incoming>) -> Result<T, LedgerError> {
    let body = Limited::new(req.into_body(), MAX_BODY_BYTES)
        .collect()
        .await
        .map_err(|e| LedgerError::InvalidInput(format!("Failed to read body: {}", e)))?
        .to_bytes();

    serde_json::from_slice(&body).map_err(|e| LedgerError::InvalidInput(format!("Invalid JSON body: {}", e)))
}

/// Parse a query string; a missing query yields the defaults
fn parse_query<T: DeserializeOwned>(query: Option<&str>) -> Result<T, LedgerError> {
    serde_urlencoded::from_str(query.unwrap_or(""))
        .map_err(|e| LedgerError::InvalidInput(format!("Invalid query: {}", e)))
}

/// `?limit=` for history endpoints, 50 when absent
fn page_limit(query: Option<&str>) -> Result<u32, LedgerError> {
    Ok(parse_query::<PageQuery>(query)?.limit.unwrap_or(DEFAULT_PAGE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::CallerRole;
    use hyper::header::{HeaderMap, HeaderValue};

    #[test]
    fn test_actor_header_is_user() {
        let mut headers = HeaderMap::new();
        headers.insert(ACTOR_HEADER, HeaderValue::from_static("u1"));
        let ctx = caller_from_headers(&headers, Some("secret")).unwrap();
        assert_eq!(ctx.actor_id, "u1");
        assert_eq!(ctx.role, CallerRole::User);
    }

    #[test]
    fn test_service_token() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer secret"));
        assert!(caller_from_headers(&headers, Some("secret")).unwrap().is_service());
        assert!(matches!(
            caller_from_headers(&headers, Some("other")),
            Err(LedgerError::Unauthorized(_))
        ));
        assert!(matches!(caller_from_headers(&headers, None), Err(LedgerError::Unauthorized(_))));
    }

    #[test]
    fn test_page_limit() {
        assert_eq!(page_limit(None).unwrap(), DEFAULT_PAGE);
        assert_eq!(page_limit(Some("limit=7")).unwrap(), 7);
        assert!(matches!(page_limit(Some("limit=lots")), Err(LedgerError::InvalidInput(_))));
        assert!(matches!(page_limit(Some("limit=-1")), Err(LedgerError::InvalidInput(_))));
    }

    #[test]
    fn test_leaderboard_query_rejects_unknown_kind() {
        let query: LeaderboardQuery = parse_query(Some("by=points&limit=3")).unwrap();
        assert_eq!(query.by, db::LeaderboardKind::Points);
        assert_eq!(query.limit, Some(3));
        assert!(parse_query::<LeaderboardQuery>(Some("by=karma")).is_err());
    }

    #[test]
    fn test_missing_identity() {
        let headers = HeaderMap::new();
        assert!(matches!(caller_from_headers(&headers, None), Err(LedgerError::Unauthorized(_))));
    }
}
