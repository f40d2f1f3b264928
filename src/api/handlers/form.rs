//! Multipart form collection for the content upload routes.

use axum::extract::{
    Multipart,
    multipart::{MultipartError, MultipartRejection},
};
use bytes::Bytes;
use std::collections::HashMap;

use crate::api::error::ApiError;

#[derive(Debug, Clone)]
pub(crate) struct UploadedFile {
    pub file_name: String,
    pub data: Bytes,
}

/// All text and file parts of a form, keyed by field name in arrival order.
#[derive(Debug, Default)]
pub(crate) struct FormData {
    texts: HashMap<String, Vec<String>>,
    files: HashMap<String, Vec<UploadedFile>>,
}

impl FormData {
    /// Collect the form. Call only after the caller is authenticated, so a
    /// body that is not `multipart/form-data` never hides a 401.
    pub(crate) async fn read(
        multipart: Result<Multipart, MultipartRejection>,
    ) -> Result<Self, ApiError> {
        let mut multipart =
            multipart.map_err(|rejection| ApiError::invalid_request(rejection.body_text()))?;
        let malformed = |err: MultipartError| ApiError::invalid_request(err.body_text());
        let mut form = Self::default();
        while let Some(field) = multipart.next_field().await.map_err(malformed)? {
            let name = field.name().unwrap_or_default().to_string();
            if let Some(file_name) = field.file_name().map(str::to_string) {
                let data = field.bytes().await.map_err(malformed)?;
                // Browsers submit an empty part for an untouched file input.
                if data.is_empty() {
                    continue;
                }
                form.files
                    .entry(name)
                    .or_default()
                    .push(UploadedFile { file_name, data });
            } else {
                let text = field.text().await.map_err(malformed)?;
                form.texts.entry(name).or_default().push(text);
            }
        }
        Ok(form)
    }

    /// First value of a text field, trimmed, `None` when blank.
    pub(crate) fn text(&self, name: &str) -> Option<String> {
        self.texts
            .get(name)
            .and_then(|values| values.first())
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    pub(crate) fn texts(&self, name: &str) -> &[String] {
        self.texts.get(name).map_or(&[], Vec::as_slice)
    }

    pub(crate) fn files(&self, name: &str) -> &[UploadedFile] {
        self.files.get(name).map_or(&[], Vec::as_slice)
    }

    pub(crate) fn file(&self, name: &str) -> Option<&UploadedFile> {
        self.files(name).first()
    }
}

#[cfg(test)]
impl FormData {
    pub(crate) fn with_text(mut self, name: &str, value: &str) -> Self {
        self.texts
            .entry(name.to_string())
            .or_default()
            .push(value.to_string());
        self
    }

    pub(crate) fn with_file(mut self, name: &str, file_name: &str, data: &'static [u8]) -> Self {
        self.files
            .entry(name.to_string())
            .or_default()
            .push(UploadedFile {
                file_name: file_name.to_string(),
                data: Bytes::from_static(data),
            });
        self
    }
}
