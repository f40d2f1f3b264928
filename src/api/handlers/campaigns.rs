//! Newsletter campaign routes.
//!
//! At most one campaign is active. Activation and `isActive` updates go
//! through a single store call that deactivates the others atomically.

use axum::{
    Json,
    extract::{
        Extension, Multipart, Path,
        multipart::MultipartRejection,
        rejection::JsonRejection,
    },
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use super::{
    auth::{AuthState, require_auth},
    form::FormData,
    internal_error, parse_id,
};
use crate::{
    api::{
        error::{ApiError, ErrorBody},
        handlers::auth::types::MessageResponse,
    },
    blob::{BlobStore, StoredBlob, blob_id_from_url},
    store::{Campaign, CampaignInput, StoreError, Stores},
};

const CAMPAIGN_NOT_FOUND: &str = "Campaign not found";

/// Multipart body of `POST /api/newsletter-campaigns`.
#[derive(ToSchema)]
#[allow(dead_code)]
pub struct CampaignUpload {
    title: String,
    message: String,
    #[schema(value_type = String, format = Binary)]
    image: Vec<u8>,
}

/// Multipart body of `PUT /api/newsletter-campaigns/{id}`. Blank fields keep
/// the stored value.
#[derive(ToSchema)]
#[allow(dead_code)]
#[schema(rename_all = "camelCase")]
pub struct CampaignUpdateUpload {
    title: Option<String>,
    message: Option<String>,
    #[schema(value_type = Option<String>, format = Binary)]
    image: Option<Vec<u8>>,
    /// `"true"` activates the campaign, anything else deactivates it.
    is_active: Option<String>,
}

#[derive(ToSchema, Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ActivateCampaignRequest {
    pub campaign_id: Option<String>,
}

#[utoipa::path(
    get,
    path = "/api/newsletter-campaigns",
    responses(
        (status = 200, description = "All campaigns, newest first", body = [Campaign]),
        (status = 500, description = "Internal error", body = ErrorBody)
    ),
    tag = "newsletter"
)]
pub async fn list_campaigns(stores: Extension<Stores>) -> impl IntoResponse {
    match stores.campaigns.list().await {
        Ok(campaigns) => (StatusCode::OK, Json(campaigns)).into_response(),
        Err(err) => internal_error("Failed to list campaigns")(err).into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/api/newsletter-campaigns/active",
    responses(
        (status = 200, description = "The active campaign", body = Campaign),
        (status = 404, description = "No campaign is active", body = ErrorBody)
    ),
    tag = "newsletter"
)]
pub async fn active_campaign(stores: Extension<Stores>) -> impl IntoResponse {
    match stores.campaigns.active().await {
        Ok(Some(campaign)) => (StatusCode::OK, Json(campaign)).into_response(),
        Ok(None) => ApiError::not_found("No active campaign found").into_response(),
        Err(err) => internal_error("Failed to load active campaign")(err).into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/api/newsletter-campaigns/{id}",
    params(("id" = String, Path, description = "Campaign id")),
    responses(
        (status = 200, description = "Campaign", body = Campaign),
        (status = 404, description = "Campaign not found", body = ErrorBody)
    ),
    tag = "newsletter"
)]
pub async fn get_campaign(Path(id): Path<String>, stores: Extension<Stores>) -> impl IntoResponse {
    match find_campaign(&stores, &id).await {
        Ok((_, campaign)) => (StatusCode::OK, Json(campaign)).into_response(),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/api/newsletter-campaigns",
    request_body(content = CampaignUpload, content_type = "multipart/form-data"),
    responses(
        (status = 201, description = "Campaign created inactive", body = Campaign),
        (status = 400, description = "Missing fields", body = ErrorBody),
        (status = 401, description = "Unauthorized", body = ErrorBody)
    ),
    tag = "newsletter"
)]
pub async fn create_campaign(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    stores: Extension<Stores>,
    blobs: Extension<Arc<dyn BlobStore>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> impl IntoResponse {
    if let Err(err) = require_auth(&headers, &auth_state).await {
        return err.into_response();
    }
    let form = match FormData::read(multipart).await {
        Ok(form) => form,
        Err(err) => return err.into_response(),
    };
    match create_from_form(&stores, blobs.as_ref(), &form).await {
        Ok(campaign) => (StatusCode::CREATED, Json(campaign)).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn create_from_form(
    stores: &Stores,
    blobs: &dyn BlobStore,
    form: &FormData,
) -> Result<Campaign, ApiError> {
    let (Some(title), Some(message), Some(image)) =
        (form.text("title"), form.text("message"), form.file("image"))
    else {
        return Err(ApiError::invalid_request(
            "Title, message, and image are required",
        ));
    };

    let stored = blobs
        .put(&image.file_name, image.data.clone())
        .await
        .map_err(internal_error("Failed to upload campaign image"))?;

    let input = CampaignInput {
        title,
        message,
        image_url: stored.url.clone(),
    };
    match stores.campaigns.create(input).await {
        Ok(campaign) => {
            info!(campaign_id = %campaign.id, "campaign created");
            Ok(campaign)
        }
        Err(err) => {
            discard_blob(blobs, &stored.blob_id).await;
            Err(internal_error("Failed to create campaign")(err))
        }
    }
}

#[utoipa::path(
    put,
    path = "/api/newsletter-campaigns/{id}",
    params(("id" = String, Path, description = "Campaign id")),
    request_body(content = CampaignUpdateUpload, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Campaign updated", body = Campaign),
        (status = 401, description = "Unauthorized", body = ErrorBody),
        (status = 404, description = "Campaign not found", body = ErrorBody)
    ),
    tag = "newsletter"
)]
pub async fn update_campaign(
    headers: HeaderMap,
    Path(id): Path<String>,
    auth_state: Extension<Arc<AuthState>>,
    stores: Extension<Stores>,
    blobs: Extension<Arc<dyn BlobStore>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> impl IntoResponse {
    if let Err(err) = require_auth(&headers, &auth_state).await {
        return err.into_response();
    }
    let form = match FormData::read(multipart).await {
        Ok(form) => form,
        Err(err) => return err.into_response(),
    };
    match update_from_form(&stores, blobs.as_ref(), &id, &form).await {
        Ok(campaign) => (StatusCode::OK, Json(campaign)).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn update_from_form(
    stores: &Stores,
    blobs: &dyn BlobStore,
    id: &str,
    form: &FormData,
) -> Result<Campaign, ApiError> {
    let (id, current) = find_campaign(stores, id).await?;
    let is_active = form.text("isActive").as_deref() == Some("true");

    let uploaded: Option<StoredBlob> = match form.file("image") {
        Some(image) => Some(
            blobs
                .put(&image.file_name, image.data.clone())
                .await
                .map_err(internal_error("Failed to upload campaign image"))?,
        ),
        None => None,
    };

    let input = CampaignInput {
        title: form.text("title").unwrap_or_else(|| current.title.clone()),
        message: form.text("message").unwrap_or_else(|| current.message.clone()),
        image_url: uploaded
            .as_ref()
            .map_or_else(|| current.image_url.clone(), |blob| blob.url.clone()),
    };

    let campaign = match stores.campaigns.update(id, input, is_active).await {
        Ok(campaign) => campaign,
        Err(err) => {
            if let Some(blob) = &uploaded {
                discard_blob(blobs, &blob.blob_id).await;
            }
            return Err(match err {
                StoreError::NotFound => ApiError::not_found(CAMPAIGN_NOT_FOUND),
                err => internal_error("Failed to update campaign")(err),
            });
        }
    };

    if uploaded.is_some() {
        discard_image_url(blobs, &current.image_url).await;
    }
    info!(campaign_id = %campaign.id, is_active, "campaign updated");
    Ok(campaign)
}

#[utoipa::path(
    delete,
    path = "/api/newsletter-campaigns/{id}",
    params(("id" = String, Path, description = "Campaign id")),
    responses(
        (status = 200, description = "Campaign deleted", body = MessageResponse),
        (status = 401, description = "Unauthorized", body = ErrorBody),
        (status = 404, description = "Campaign not found", body = ErrorBody)
    ),
    tag = "newsletter"
)]
pub async fn delete_campaign(
    headers: HeaderMap,
    Path(id): Path<String>,
    auth_state: Extension<Arc<AuthState>>,
    stores: Extension<Stores>,
    blobs: Extension<Arc<dyn BlobStore>>,
) -> impl IntoResponse {
    if let Err(err) = require_auth(&headers, &auth_state).await {
        return err.into_response();
    }
    let result = async {
        let (id, campaign) = find_campaign(&stores, &id).await?;
        match stores.campaigns.delete(id).await {
            Ok(()) => {}
            Err(StoreError::NotFound) => return Err(ApiError::not_found(CAMPAIGN_NOT_FOUND)),
            Err(err) => return Err(internal_error("Failed to delete campaign")(err)),
        }
        discard_image_url(blobs.as_ref(), &campaign.image_url).await;
        info!(campaign_id = %id, "campaign deleted");
        Ok(())
    }
    .await;

    match result {
        Ok(()) => (
            StatusCode::OK,
            Json(MessageResponse::new("Campaign deleted successfully")),
        )
            .into_response(),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/api/newsletter-campaigns/activate",
    request_body = ActivateCampaignRequest,
    responses(
        (status = 200, description = "Campaign is now the only active one", body = Campaign),
        (status = 400, description = "Campaign id missing", body = ErrorBody),
        (status = 401, description = "Unauthorized", body = ErrorBody),
        (status = 404, description = "Campaign not found", body = ErrorBody)
    ),
    tag = "newsletter"
)]
pub async fn activate_campaign(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    stores: Extension<Stores>,
    payload: Result<Json<ActivateCampaignRequest>, JsonRejection>,
) -> impl IntoResponse {
    if let Err(err) = require_auth(&headers, &auth_state).await {
        return err.into_response();
    }
    let request = payload.map(|Json(request)| request).unwrap_or_default();
    let Some(campaign_id) = request
        .campaign_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
    else {
        return ApiError::invalid_request("Campaign ID is required").into_response();
    };
    let Some(id) = parse_id(campaign_id) else {
        return ApiError::not_found(CAMPAIGN_NOT_FOUND).into_response();
    };

    match stores.campaigns.activate(id).await {
        Ok(campaign) => {
            info!(campaign_id = %campaign.id, "campaign activated");
            (StatusCode::OK, Json(campaign)).into_response()
        }
        Err(StoreError::NotFound) => ApiError::not_found(CAMPAIGN_NOT_FOUND).into_response(),
        Err(err) => internal_error("Failed to activate campaign")(err).into_response(),
    }
}

async fn find_campaign(stores: &Stores, id: &str) -> Result<(Uuid, Campaign), ApiError> {
    let id = parse_id(id).ok_or_else(|| ApiError::not_found(CAMPAIGN_NOT_FOUND))?;
    stores
        .campaigns
        .get(id)
        .await
        .map_err(internal_error("Failed to load campaign"))?
        .map(|campaign| (id, campaign))
        .ok_or_else(|| ApiError::not_found(CAMPAIGN_NOT_FOUND))
}

async fn discard_image_url(blobs: &dyn BlobStore, url: &str) {
    match blob_id_from_url(url) {
        Some(blob_id) => discard_blob(blobs, blob_id).await,
        None => warn!(url, "campaign image url has no blob id"),
    }
}

async fn discard_blob(blobs: &dyn BlobStore, blob_id: &str) {
    if let Err(err) = blobs.delete(blob_id).await {
        error!(blob_id, "Failed to delete campaign image: {err}");
    }
}
