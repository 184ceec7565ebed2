//! HTTP read surface over the published state
//!
//! Pure presentation: every handler reads the latest snapshot from the watch
//! channel and formats it. Nothing here mutates state. An unrefreshed or
//! error-marked staking payload surfaces as a server error rather than stale
//! or fabricated data.

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;

use crate::refresh::PublishedState;

/// Read handle on the published state
pub type Published = watch::Receiver<Arc<PublishedState>>;

const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// Build the read-surface router
pub fn router(published: Published) -> Router {
    Router::new()
        .route("/staking", get(staking_whole).options(preflight))
        .route("/staking/suf", get(staking_suf).options(preflight))
        .route("/{stat}", get(stat_plain).options(preflight))
        .route("/{stat}/{format}", get(stat_formatted).options(preflight))
        .with_state(published)
}

async fn preflight() -> Response {
    let mut response = StatusCode::OK.into_response();
    let headers = response.headers_mut();
    headers.insert(
        "access-control-allow-headers",
        HeaderValue::from_static("Content-Type, Origin, Accept"),
    );
    headers.insert(
        "access-control-allow-methods",
        HeaderValue::from_static("GET, OPTIONS"),
    );
    headers.insert(
        "access-control-allow-origin",
        HeaderValue::from_static("*"),
    );
    response
}

async fn staking_whole(State(published): State<Published>) -> Response {
    let state = published.borrow().clone();
    serve_staking(&state, false)
}

async fn staking_suf(State(published): State<Published>) -> Response {
    let state = published.borrow().clone();
    serve_staking(&state, true)
}

async fn stat_plain(
    State(published): State<Published>,
    Path(stat): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let state = published.borrow().clone();
    serve_stat(&state, &stat, None, query.contains_key("json"))
}

async fn stat_formatted(
    State(published): State<Published>,
    Path((stat, format)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let state = published.borrow().clone();
    serve_stat(&state, &stat, Some(&format), query.contains_key("json"))
}

fn serve_staking(state: &PublishedState, raw: bool) -> Response {
    let Some(staking) = &state.staking else {
        return respond(
            StatusCode::INTERNAL_SERVER_ERROR,
            Some(JSON_CONTENT_TYPE),
            state.refreshed,
            "{}".to_string(),
        );
    };

    let body = if raw {
        serde_json::to_string(&staking.suf)
    } else {
        serde_json::to_string(&staking.whole)
    };
    match body {
        Ok(body) => respond(StatusCode::OK, Some(JSON_CONTENT_TYPE), state.refreshed, body),
        Err(e) => {
            log::error!("failed to serialize staking payload: {e}");
            respond(
                StatusCode::INTERNAL_SERVER_ERROR,
                Some(JSON_CONTENT_TYPE),
                state.refreshed,
                "{}".to_string(),
            )
        }
    }
}

fn serve_stat(state: &PublishedState, stat: &str, format: Option<&str>, as_json: bool) -> Response {
    if state.minted == 0.0 {
        // no successful refresh has ever completed
        return respond(
            StatusCode::INTERNAL_SERVER_ERROR,
            None,
            state.refreshed,
            String::new(),
        );
    }

    let (as_suf, whole) = match format {
        None => (false, false),
        Some("suf") => (true, false),
        Some("int") => (false, true),
        Some(_) => {
            return respond(StatusCode::NOT_FOUND, None, state.refreshed, String::new());
        }
    };

    let Some((label, amount)) = stat_value(state, stat) else {
        return respond(StatusCode::NOT_FOUND, None, state.refreshed, String::new());
    };

    let content_type = as_json.then_some(JSON_CONTENT_TYPE);
    respond(
        StatusCode::OK,
        content_type,
        state.refreshed,
        format_stat(as_suf, as_json, whole, label, amount),
    )
}

fn stat_value(state: &PublishedState, stat: &str) -> Option<(&'static str, f64)> {
    match stat {
        "minted" | "supply" => Some(("total_supply", state.minted)),
        "circulating" => Some(("circulating_supply", state.circulating)),
        "locked" => Some(("locked_tokens", state.locked)),
        "bprewards" => Some(("bp_rewards", state.bp_rewards)),
        "bpbucket" => Some(("bp_bucket_pool", state.bp_bucket_pool)),
        _ => None,
    }
}

/// Render a metric value: nine decimal places by default, a rounded whole
/// number for `/int`, minimal units (decimal point stripped) for `/suf`,
/// label-wrapped JSON for `?json`
fn format_stat(as_suf: bool, as_json: bool, whole: bool, label: &str, amount: f64) -> String {
    let mut value = format!("{amount:.9}");
    if whole {
        value = format!("{:.0}", amount.round());
    }
    if as_suf {
        value = value.replace('.', "");
    }
    if as_json {
        return format!("{{\"{label}\":{value}}}");
    }
    value
}

fn respond(
    status: StatusCode,
    content_type: Option<&'static str>,
    refreshed: Option<DateTime<Utc>>,
    body: String,
) -> Response {
    let mut response = (status, body).into_response();
    let headers = response.headers_mut();
    headers.insert(
        "access-control-allow-origin",
        HeaderValue::from_static("*"),
    );
    if let Some(ct) = content_type {
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(ct));
    }
    if let Some(ts) = refreshed {
        let formatted = ts.format("%a, %d %b %Y %H:%M:%S UTC").to_string();
        if let Ok(v) = HeaderValue::from_str(&formatted) {
            headers.insert("x-last-refreshed", v);
        }
    }
    response
}
