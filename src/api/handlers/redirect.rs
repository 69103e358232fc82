use axum::{
    extract::{Extension, Form, Query},
    http::{header::REFERER, HeaderMap},
    response::Redirect,
};
use serde::Deserialize;
use tracing::debug;
use utoipa::{IntoParams, ToSchema};

use crate::api::AppState;

/// Header consulted before the query/form field of the same name.
pub const REDIRECT_TO: &str = "redirect_to";

#[derive(Debug, Default, Deserialize, IntoParams, ToSchema)]
#[into_params(parameter_in = Query)]
pub struct RedirectParams {
    pub redirect_to: Option<String>,
}

#[utoipa::path(
    get,
    path = "/redirect",
    params(RedirectParams),
    responses(
        (status = 303, description = "Redirect to the validated target, the referrer or the site URL")
    ),
    tag = "redirect"
)]
pub async fn redirect(
    Extension(state): Extension<AppState>,
    headers: HeaderMap,
    query: Option<Query<RedirectParams>>,
    form: Option<Form<RedirectParams>>,
) -> Redirect {
    let header = header_value(&headers, REDIRECT_TO);
    let query = query.and_then(|Query(params)| params.redirect_to);
    let form = form.and_then(|Form(params)| params.redirect_to);
    let requested = form.as_deref().filter(|value| !value.is_empty()).or(query.as_deref());
    let referrer = headers.get(REFERER).and_then(|value| value.to_str().ok());

    let target = state.redirect.effective_redirect(header, requested, referrer);
    debug!(target = %target, "resolved redirect");

    Redirect::to(&target)
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}
