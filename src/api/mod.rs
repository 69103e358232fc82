//! HTTP surface: admin user management, health, redirects and the `OpenAPI`
//! document.

use anyhow::Result;
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{HeaderName, HeaderValue, Request},
    middleware,
    routing::get,
    Extension, Router,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{info, info_span, Span};
use ulid::Ulid;
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    admin::AdminExecutor, config::SiteConfig, redirect::RedirectResolver, storage::Backend,
    webhook::WebhookNotifier,
};

pub mod bearer;
pub mod handlers;
mod openapi;


pub use openapi::openapi;

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Everything a handler needs, shared through an `Extension` layer.
#[derive(Clone)]
pub struct AppState {
    pub admin: AdminExecutor<Backend>,
    pub config: Arc<SiteConfig>,
    pub redirect: Arc<RedirectResolver>,
    pub webhook: Option<Arc<WebhookNotifier>>,
}

impl AppState {
    #[must_use]
    pub fn new(
        admin: AdminExecutor<Backend>,
        config: Arc<SiteConfig>,
        redirect: Arc<RedirectResolver>,
    ) -> Self {
        Self {
            admin,
            config,
            redirect,
            webhook: None,
        }
    }

    #[must_use]
    pub fn with_webhook(mut self, webhook: Option<Arc<WebhookNotifier>>) -> Self {
        self.webhook = webhook;
        self
    }
}

/// Routes plus the bearer-claims middleware, without transport layers.
#[must_use]
pub fn router(state: AppState) -> Router {
    let config = Arc::clone(&state.config);

    Router::new()
        .route(
            "/health",
            get(handlers::health::health).options(handlers::health::health),
        )
        .route(
            "/admin/users",
            get(handlers::admin::list_users).post(handlers::admin::create_user),
        )
        .route(
            "/admin/users/:user_id",
            get(handlers::admin::get_user)
                .put(handlers::admin::update_user)
                .delete(handlers::admin::delete_user),
        )
        .route(
            "/redirect",
            get(handlers::redirect::redirect).post(handlers::redirect::redirect),
        )
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", openapi()))
        .layer(middleware::from_fn_with_state(config, bearer::attach_claims))
        .layer(Extension(state))
}

/// Start the server
/// # Errors
/// Return error if failed to bind or serve
pub async fn new(port: u16, state: AppState) -> Result<()> {
    let app = router(state).layer(
        ServiceBuilder::new()
            .layer(SetRequestHeaderLayer::if_not_present(
                HeaderName::from_static(REQUEST_ID_HEADER),
                |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
            ))
            .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                REQUEST_ID_HEADER,
            )))
            .layer(TraceLayer::new_for_http().make_span_with(make_span)),
    );

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}
