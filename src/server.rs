use std::{net::SocketAddr, sync::Arc};

use anyhow::{anyhow, Context};
use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    auth, conf,
    docs::ApiDoc,
    generator::{
        Generation, ImageGenerator, OpenRouter, PromptEnhancer, Resolution,
    },
    quota::Tracker,
    types::{
        ErrorResponse, GenerateReq, GenerateResp, QuotaStatus, RepromptReq,
        RepromptResp,
    },
};


const QUOTA_EXHAUSTED: &str = "Daily limit reached. Try again tomorrow.";

#[derive(Debug)]
pub struct ApiError(StatusCode, Json<ErrorResponse>);

impl ApiError {
    fn new(status: StatusCode, error: &str) -> Self {
        ApiError(
            status,
            Json(ErrorResponse {
                error: error.to_string(),
                details: None,
            }),
        )
    }

    fn with_details(mut self, details: String) -> Self {
        self.1.details = Some(details);
        self
    }
}

impl From<StatusCode> for ApiError {
    fn from(status: StatusCode) -> Self {
        ApiError::new(status, status.canonical_reason().unwrap_or("Unknown error"))
    }
}

impl axum::response::IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let ApiError(status, body) = self;
        (status, body).into_response()
    }
}

#[derive(Clone)]
pub struct AppState {
    pub tracker: Tracker,
    pub generator: Arc<dyn ImageGenerator>,
    pub enhancer: Arc<dyn PromptEnhancer>,
    pub default_resolution: Resolution,
}

#[tracing::instrument(name = "server", skip_all)]
pub async fn run(conf: Arc<conf::Conf>) -> anyhow::Result<()> {
    tracing::info!(?conf, "Starting.");
    let addr = SocketAddr::from((conf.addr, conf.port));

    let default_resolution: Resolution = conf
        .upstream
        .default_resolution
        .parse()
        .context("Invalid upstream.default_resolution")?;
    let upstream = Arc::new(OpenRouter::new(conf.upstream.clone())?);
    let state = AppState {
        tracker: Tracker::new(conf.daily_limit),
        generator: upstream.clone(),
        enhancer: upstream,
        default_resolution,
    };

    let routes = router(state, Arc::new(conf.jwt.clone()))
        .layer(cors(&conf.allowed_origins));
    let service = routes.into_make_service();

    match &conf.tls {
        None => {
            let listener = tokio::net::TcpListener::bind(addr).await?;
            tracing::warn!(?addr, "Listening unencrypted.");
            axum::serve(listener, service).await?;
        }
        Some(conf::Tls {
            cert_file,
            key_file,
        }) => {
            // XXX One MUST do this manual init of rustls provider when using
            //     more than a single dep which itself depends on rustls.
            //     Here we using 2:
            //     - axum_server
            //     - reqwest
            rustls::crypto::aws_lc_rs::default_provider()
                .install_default()
                .map_err(|crypto_provider| {
                    anyhow!(
                        "Failed to install default crypto provider: \
                        {crypto_provider:?}"
                    )
                })?;

            let config =
                axum_server::tls_rustls::RustlsConfig::from_pem_file(
                    cert_file, key_file,
                )
                .await
                .context(format!(
                    "Failed to construct RustlsConfig. \
                    cert_file={cert_file:?}, key_file={key_file:?}"
                ))?;

            tracing::info!(
                ?addr,
                ?cert_file,
                ?key_file,
                "Listening with TLS."
            );
            axum_server::bind_rustls(addr, config)
                .serve(service)
                .await?;
        }
    }

    Ok(())
}

pub fn router(state: AppState, jwt_conf: Arc<conf::Jwt>) -> Router {
    let authenticated = Router::new()
        .route("/rate-limit", get(rate_limit_handler))
        .route("/generate", post(generate_handler))
        .route("/reprompt", post(reprompt_handler))
        .route_layer(middleware::from_fn(move |req: Request, next: Next| {
            auth_layer(jwt_conf.clone(), req, next)
        }));
    Router::new()
        .route("/health", get(health_check))
        .merge(
            SwaggerUi::new("/swagger-ui")
                .url("/api-docs/openapi.json", ApiDoc::openapi()),
        )
        .merge(authenticated)
        .route_layer(middleware::from_fn({
            |req: Request, next: Next| {
                REQ_ID.scope(ReqId::new(), next.run(req))
            }
        }))
        .with_state(state)
}

fn cors(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| {
            origin
                .parse::<HeaderValue>()
                .inspect_err(|error| {
                    tracing::warn!(?origin, ?error, "Ignoring invalid origin.");
                })
                .ok()
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::ACCEPT,
            header::ORIGIN,
        ])
        .allow_credentials(true)
        .expose_headers([header::CONTENT_TYPE, header::CONTENT_LENGTH])
}

#[tracing::instrument(
    skip_all,
    fields(
        req_id = %REQ_ID.get().req_id,
        uid = %USER.get().uid,
    )
)]
#[utoipa::path(
    get,
    path = "/rate-limit",
    responses(
        (status = 200, description = "Remaining allowance for today", body = QuotaStatus),
        (status = 401, description = "Missing or invalid JWT token", body = ErrorResponse),
    ),
    security(
        ("jwt" = [])
    )
)]
pub async fn rate_limit_handler(
    State(state): State<AppState>,
) -> Json<QuotaStatus> {
    let user = USER.get();
    let status = state.tracker.status(&user.uid);
    tracing::info!(remaining = status.remaining, "Handling quota status request.");
    Json(QuotaStatus {
        remaining: status.remaining,
        reset: status.reset.timestamp_millis(),
    })
}

#[tracing::instrument(
    skip_all,
    fields(
        req_id = %REQ_ID.get().req_id,
        uid = %USER.get().uid,
    )
)]
#[utoipa::path(
    post,
    path = "/generate",
    request_body = GenerateReq,
    responses(
        (status = 200, description = "Thumbnail generated, one unit consumed", body = GenerateResp),
        (status = 400, description = "Blank prompt or malformed resolution", body = ErrorResponse),
        (status = 401, description = "Missing or invalid JWT token", body = ErrorResponse),
        (status = 429, description = "Daily limit reached", body = ErrorResponse),
        (status = 502, description = "Generation failed, no quota consumed", body = ErrorResponse),
    ),
    security(
        ("jwt" = [])
    )
)]
pub async fn generate_handler(
    State(state): State<AppState>,
    Json(req): Json<GenerateReq>,
) -> Result<Json<GenerateResp>, ApiError> {
    let user = USER.get();
    let generation = parse_generation(req, state.default_resolution)?;

    // Held, not locked, while the generator runs. Dropping it refunds.
    let Some(reservation) = state.tracker.reserve(&user.uid) else {
        tracing::info!("Daily limit reached.");
        return Err(ApiError::new(StatusCode::TOO_MANY_REQUESTS, QUOTA_EXHAUSTED));
    };

    tracing::info!(resolution = %generation.resolution, "Generating.");
    match state.generator.generate(&generation).await {
        Ok(url) => {
            let remaining = reservation.commit();
            tracing::info!(remaining, "Generated.");
            Ok(Json(GenerateResp { url, remaining }))
        }
        Err(error) => {
            drop(reservation);
            tracing::error!(?error, "Image generation failed.");
            Err(ApiError::new(StatusCode::BAD_GATEWAY, "Generation failed"))
        }
    }
}

#[tracing::instrument(
    skip_all,
    fields(
        req_id = %REQ_ID.get().req_id,
        uid = %USER.get().uid,
    )
)]
#[utoipa::path(
    post,
    path = "/reprompt",
    request_body = RepromptReq,
    responses(
        (status = 200, description = "Prompt rewritten", body = RepromptResp),
        (status = 400, description = "Blank prompt", body = ErrorResponse),
        (status = 401, description = "Missing or invalid JWT token", body = ErrorResponse),
        (status = 502, description = "Enhancer failed", body = ErrorResponse),
    ),
    security(
        ("jwt" = [])
    )
)]
pub async fn reprompt_handler(
    State(state): State<AppState>,
    Json(req): Json<RepromptReq>,
) -> Result<Json<RepromptResp>, ApiError> {
    let prompt = req.prompt.trim();
    if prompt.is_empty() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "Prompt is required"));
    }
    let enhanced_prompt =
        state.enhancer.enhance(prompt).await.map_err(|error| {
            tracing::error!(?error, "Prompt enhancement failed.");
            ApiError::new(StatusCode::BAD_GATEWAY, "Failed to enhance prompt")
        })?;
    Ok(Json(RepromptResp { enhanced_prompt }))
}

async fn health_check() -> &'static str {
    "OK"
}

fn parse_generation(
    req: GenerateReq,
    default_resolution: Resolution,
) -> Result<Generation, ApiError> {
    let GenerateReq {
        prompt,
        image_url,
        resolution,
    } = req;
    if prompt.trim().is_empty() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "Prompt is required"));
    }
    let resolution = match resolution.as_deref().map(str::trim) {
        None | Some("") => default_resolution,
        Some(s) => s.parse::<Resolution>().map_err(|error| {
            tracing::warn!(?error, "Bad resolution.");
            ApiError::new(StatusCode::BAD_REQUEST, "Invalid resolution")
                .with_details(error.to_string())
        })?,
    };
    let image_url = image_url.filter(|url| !url.trim().is_empty());
    Ok(Generation {
        prompt,
        image_url,
        resolution,
    })
}

#[derive(Debug, Clone)]
struct User {
    pub uid: String,
}

#[derive(Debug, Clone)]
struct ReqId {
    pub req_id: String,
}

impl ReqId {
    fn new() -> Self {
        let req_id = cuid2::create_id();
        Self { req_id }
    }
}

tokio::task_local! {
    static USER: User;
    static REQ_ID: ReqId;
}

async fn auth_layer(
    jwt_conf: Arc<conf::Jwt>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let auth_token = req
        .headers()
        .get(header::AUTHORIZATION)
        .ok_or_else(|| {
            tracing::warn!("Missing Authorization header");
            StatusCode::UNAUTHORIZED
        })?
        .to_str()
        .map_err(|e| {
            tracing::warn!(error = ?e, "Invalid Authorization header encoding");
            StatusCode::UNAUTHORIZED
        })?
        .strip_prefix("Bearer ")
        .ok_or_else(|| {
            tracing::warn!("Authorization header missing 'Bearer ' prefix");
            StatusCode::UNAUTHORIZED
        })?;

    match authorize(auth_token, &jwt_conf) {
        Some(user) => {
            tracing::debug!(user_id = ?user.uid, "User authenticated.");
            Ok(USER.scope(user, next.run(req)).await)
        }
        None => Err(StatusCode::UNAUTHORIZED.into()),
    }
}

fn authorize(auth_token: &str, jwt_conf: &conf::Jwt) -> Option<User> {
    auth::Claims::from_str(auth_token, jwt_conf)
        .inspect_err(|error| {
            tracing::warn!(
                ?error,
                token_prefix = ?auth_token.get(..10).unwrap_or(""),
                "JWT validation failed"
            );
        })
        .ok()
        .map(|claims| User { uid: claims.sub })
}
