//! Portfolio project routes.
//!
//! Reads are public. Create, update and delete call [`require_auth`] before
//! the multipart body is read or any blob is written.

use axum::{
    Json,
    extract::{Extension, Multipart, Path, multipart::MultipartRejection},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use std::{collections::HashSet, sync::Arc};
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
    blob::BlobStore,
    store::{Project, ProjectImage, ProjectInput, StoreError, Stores},
};

const PROJECT_NOT_FOUND: &str = "Project not found";

/// Multipart body of `POST /api/projects`.
#[derive(ToSchema)]
#[allow(dead_code)]
pub struct ProjectUpload {
    name: String,
    description: Option<String>,
    category: Option<String>,
    #[schema(value_type = Vec<String>, format = Binary)]
    images: Vec<Vec<u8>>,
    captions: Vec<String>,
}

/// Multipart body of `PUT /api/projects/{id}`.
#[derive(ToSchema)]
#[allow(dead_code)]
#[schema(rename_all = "camelCase")]
pub struct ProjectUpdateUpload {
    name: String,
    description: Option<String>,
    category: Option<String>,
    /// JSON array of the stored images to keep, with their captions.
    #[schema(value_type = String)]
    existing_images: Vec<ProjectImage>,
    #[schema(value_type = Vec<String>, format = Binary)]
    new_images: Vec<Vec<u8>>,
    new_captions: Vec<String>,
}

#[utoipa::path(
    get,
    path = "/api/projects",
    responses(
        (status = 200, description = "All projects, newest first", body = [Project]),
        (status = 500, description = "Internal error", body = ErrorBody)
    ),
    tag = "projects"
)]
pub async fn list_projects(stores: Extension<Stores>) -> impl IntoResponse {
    match stores.projects.list().await {
        Ok(projects) => (StatusCode::OK, Json(projects)).into_response(),
        Err(err) => internal_error("Failed to list projects")(err).into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/api/projects/{id}",
    params(("id" = String, Path, description = "Project id")),
    responses(
        (status = 200, description = "Project", body = Project),
        (status = 404, description = "Project not found", body = ErrorBody)
    ),
    tag = "projects"
)]
pub async fn get_project(Path(id): Path<String>, stores: Extension<Stores>) -> impl IntoResponse {
    match find_project(&stores, &id).await {
        Ok((_, project)) => (StatusCode::OK, Json(project)).into_response(),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/api/projects",
    request_body(content = ProjectUpload, content_type = "multipart/form-data"),
    responses(
        (status = 201, description = "Project created", body = Project),
        (status = 400, description = "Name or images missing", body = ErrorBody),
        (status = 401, description = "Unauthorized", body = ErrorBody)
    ),
    tag = "projects"
)]
pub async fn create_project(
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
        Ok(project) => (StatusCode::CREATED, Json(project)).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn create_from_form(
    stores: &Stores,
    blobs: &dyn BlobStore,
    form: &FormData,
) -> Result<Project, ApiError> {
    let name = form.text("name");
    let files = form.files("images");
    let Some(name) = name.filter(|_| !files.is_empty()) else {
        return Err(ApiError::invalid_request(
            "Name and at least one image are required",
        ));
    };

    let images = upload_images(blobs, form, "images", "captions").await?;
    let input = ProjectInput {
        name,
        description: form.text("description"),
        category: form.text("category"),
        images,
    };

    match stores.projects.create(input.clone()).await {
        Ok(project) => {
            info!(project_id = %project.id, images = project.images.len(), "project created");
            Ok(project)
        }
        Err(err) => {
            discard_images(blobs, &input.images).await;
            Err(internal_error("Failed to create project")(err))
        }
    }
}

#[utoipa::path(
    put,
    path = "/api/projects/{id}",
    params(("id" = String, Path, description = "Project id")),
    request_body(content = ProjectUpdateUpload, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Project updated", body = Project),
        (status = 400, description = "Invalid form", body = ErrorBody),
        (status = 401, description = "Unauthorized", body = ErrorBody),
        (status = 404, description = "Project not found", body = ErrorBody)
    ),
    tag = "projects"
)]
pub async fn update_project(
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
        Ok(project) => (StatusCode::OK, Json(project)).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn update_from_form(
    stores: &Stores,
    blobs: &dyn BlobStore,
    id: &str,
    form: &FormData,
) -> Result<Project, ApiError> {
    let (id, current) = find_project(stores, id).await?;
    let Some(name) = form.text("name") else {
        return Err(ApiError::invalid_request("Name is required"));
    };

    let requested: Vec<ProjectImage> = match form.text("existingImages") {
        Some(json) => serde_json::from_str(&json)
            .map_err(|_| ApiError::invalid_request("existingImages must be a JSON array"))?,
        None => Vec::new(),
    };
    let (kept, removed) = partition_images(&current.images, &requested);

    let uploaded = upload_images(blobs, form, "newImages", "newCaptions").await?;
    let mut images = kept;
    images.extend(uploaded.iter().cloned());

    let input = ProjectInput {
        name,
        description: form.text("description"),
        category: form.text("category"),
        images,
    };

    let project = match stores.projects.update(id, input).await {
        Ok(project) => project,
        Err(StoreError::NotFound) => {
            discard_images(blobs, &uploaded).await;
            return Err(ApiError::not_found(PROJECT_NOT_FOUND));
        }
        Err(err) => {
            discard_images(blobs, &uploaded).await;
            return Err(internal_error("Failed to update project")(err));
        }
    };

    discard_images(blobs, &removed).await;
    info!(project_id = %project.id, removed = removed.len(), added = uploaded.len(), "project updated");
    Ok(project)
}

/// Split stored images into those the client kept (taking its caption) and
/// those it dropped. Entries that do not match a stored blob are ignored.
fn partition_images(
    stored: &[ProjectImage],
    requested: &[ProjectImage],
) -> (Vec<ProjectImage>, Vec<ProjectImage>) {
    let mut kept = Vec::new();
    let mut seen = HashSet::new();
    for request in requested {
        if !seen.insert(request.blob_id.as_str()) {
            continue;
        }
        if let Some(image) = stored.iter().find(|image| image.blob_id == request.blob_id) {
            kept.push(ProjectImage {
                caption: request.caption.clone(),
                ..image.clone()
            });
        }
    }
    let removed = stored
        .iter()
        .filter(|image| !seen.contains(image.blob_id.as_str()))
        .cloned()
        .collect();
    (kept, removed)
}

#[utoipa::path(
    delete,
    path = "/api/projects/{id}",
    params(("id" = String, Path, description = "Project id")),
    responses(
        (status = 200, description = "Project deleted", body = MessageResponse),
        (status = 401, description = "Unauthorized", body = ErrorBody),
        (status = 404, description = "Project not found", body = ErrorBody)
    ),
    tag = "projects"
)]
pub async fn delete_project(
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
        let (id, project) = find_project(&stores, &id).await?;
        match stores.projects.delete(id).await {
            Ok(()) => {}
            Err(StoreError::NotFound) => return Err(ApiError::not_found(PROJECT_NOT_FOUND)),
            Err(err) => return Err(internal_error("Failed to delete project")(err)),
        }
        discard_images(blobs.as_ref(), &project.images).await;
        info!(project_id = %id, "project deleted");
        Ok(())
    }
    .await;

    match result {
        Ok(()) => (
            StatusCode::OK,
            Json(MessageResponse::new("Project deleted successfully")),
        )
            .into_response(),
        Err(err) => err.into_response(),
    }
}

async fn find_project(stores: &Stores, id: &str) -> Result<(Uuid, Project), ApiError> {
    let id = parse_id(id).ok_or_else(|| ApiError::not_found(PROJECT_NOT_FOUND))?;
    stores
        .projects
        .get(id)
        .await
        .map_err(internal_error("Failed to load project"))?
        .map(|project| (id, project))
        .ok_or_else(|| ApiError::not_found(PROJECT_NOT_FOUND))
}

/// Store every file of `files_field`, pairing it with the caption at the same
/// index in `captions_field`. Already stored blobs are removed on failure.
async fn upload_images(
    blobs: &dyn BlobStore,
    form: &FormData,
    files_field: &str,
    captions_field: &str,
) -> Result<Vec<ProjectImage>, ApiError> {
    let captions = form.texts(captions_field);
    let mut images = Vec::new();
    for (index, file) in form.files(files_field).iter().enumerate() {
        match blobs.put(&file.file_name, file.data.clone()).await {
            Ok(stored) => images.push(ProjectImage {
                url: stored.url,
                caption: captions
                    .get(index)
                    .map(|caption| caption.trim().to_string())
                    .unwrap_or_default(),
                blob_id: stored.blob_id,
            }),
            Err(err) => {
                error!("Failed to upload image {}: {err}", index + 1);
                discard_images(blobs, &images).await;
                return Err(ApiError::Internal);
            }
        }
    }
    Ok(images)
}

async fn discard_images(blobs: &dyn BlobStore, images: &[ProjectImage]) {
    for image in images {
        if let Err(err) = blobs.delete(&image.blob_id).await {
            warn!(blob_id = %image.blob_id, "Failed to delete image: {err}");
        }
    }
}
