//! Newsletter subscription and the admin subscriber listing.

use axum::{
    Json,
    extract::{
        Extension, Query,
        rejection::{JsonRejection, QueryRejection},
    },
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use utoipa::{IntoParams, ToSchema};

use super::{
    auth::{
        AuthState, require_auth,
        utils::{normalize_email, valid_email},
    },
    internal_error,
};
use crate::{
    api::error::{ApiError, ErrorBody},
    store::{StoreError, Stores, Subscriber},
};

const DEFAULT_PAGE: i64 = 1;
const DEFAULT_LIMIT: i64 = 10;
const MAX_LIMIT: i64 = 100;

#[derive(ToSchema, Deserialize, Debug, Default)]
pub struct SubscribeRequest {
    pub email: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SubscribeResponse {
    pub message: String,
    pub subscriber: Subscriber,
}

#[derive(IntoParams, Deserialize, Debug, Default)]
#[into_params(parameter_in = Query)]
pub struct PageParams {
    /// 1-based page number, default 1.
    pub page: Option<String>,
    /// Page size, default 10, at most 100.
    pub limit: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SubscriberList {
    pub subscribers: Vec<Subscriber>,
    pub current_page: i64,
    pub total_pages: i64,
    pub total_subscribers: i64,
}

#[utoipa::path(
    post,
    path = "/api/newsletter/subscribe",
    request_body = SubscribeRequest,
    responses(
        (status = 201, description = "Subscribed", body = SubscribeResponse),
        (status = 400, description = "Missing or invalid email", body = ErrorBody),
        (status = 409, description = "Already subscribed", body = ErrorBody)
    ),
    tag = "newsletter"
)]
pub async fn subscribe(
    stores: Extension<Stores>,
    payload: Result<Json<SubscribeRequest>, JsonRejection>,
) -> impl IntoResponse {
    let request = payload.map(|Json(request)| request).unwrap_or_default();
    let Some(email) = request
        .email
        .as_deref()
        .map(normalize_email)
        .filter(|email| !email.is_empty())
    else {
        return ApiError::invalid_request("Email is required").into_response();
    };
    if !valid_email(&email) {
        return ApiError::invalid_request("Invalid email address").into_response();
    }

    match stores.subscribers.subscribe(&email).await {
        Ok(subscriber) => {
            info!(subscriber_id = %subscriber.id, "newsletter subscription added");
            (
                StatusCode::CREATED,
                Json(SubscribeResponse {
                    message: "Successfully subscribed to the newsletter".to_string(),
                    subscriber,
                }),
            )
                .into_response()
        }
        Err(StoreError::Conflict) => {
            ApiError::Conflict("Email is already subscribed".to_string()).into_response()
        }
        Err(err) => internal_error("Failed to add subscriber")(err).into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/api/newsletter-subscribers",
    params(PageParams),
    responses(
        (status = 200, description = "One page of subscribers, newest first", body = SubscriberList),
        (status = 401, description = "Unauthorized", body = ErrorBody)
    ),
    tag = "newsletter"
)]
pub async fn list_subscribers(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    stores: Extension<Stores>,
    params: Result<Query<PageParams>, QueryRejection>,
) -> impl IntoResponse {
    if let Err(err) = require_auth(&headers, &auth_state).await {
        return err.into_response();
    }
    let params = params.map(|Query(params)| params).unwrap_or_default();
    let (page, limit) = page_window(&params);

    match stores.subscribers.page((page - 1) * limit, limit).await {
        Ok(result) => (
            StatusCode::OK,
            Json(SubscriberList {
                subscribers: result.subscribers,
                current_page: page,
                total_pages: total_pages(result.total, limit),
                total_subscribers: result.total,
            }),
        )
            .into_response(),
        Err(err) => internal_error("Failed to list subscribers")(err).into_response(),
    }
}

/// Unparseable or non-positive values fall back to the defaults.
fn page_window(params: &PageParams) -> (i64, i64) {
    let parse = |value: Option<&str>, default: i64| {
        value
            .and_then(|value| value.trim().parse::<i64>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(default)
    };
    let page = parse(params.page.as_deref(), DEFAULT_PAGE).min(i64::from(i32::MAX));
    let limit = parse(params.limit.as_deref(), DEFAULT_LIMIT).min(MAX_LIMIT);
    (page, limit)
}

fn total_pages(total: i64, limit: i64) -> i64 {
    if total <= 0 {
        0
    } else {
        (total + limit - 1) / limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(page: Option<&str>, limit: Option<&str>) -> PageParams {
        PageParams {
            page: page.map(str::to_string),
            limit: limit.map(str::to_string),
        }
    }

    #[test]
    fn page_window_defaults_and_caps() {
        assert_eq!(page_window(&params(None, None)), (1, 10));
        assert_eq!(page_window(&params(Some("3"), Some("25"))), (3, 25));
        assert_eq!(page_window(&params(Some("0"), Some("-4"))), (1, 10));
        assert_eq!(page_window(&params(Some("abc"), Some("5000"))), (1, 100));
    }

    #[test]
    fn total_pages_rounds_up() {
        assert_eq!(total_pages(0, 10), 0);
        assert_eq!(total_pages(10, 10), 1);
        assert_eq!(total_pages(11, 10), 2);
        assert_eq!(total_pages(1, 100), 1);
    }
}
