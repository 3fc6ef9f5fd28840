//! Attachment persistence and download.
//!
//! Each file is written blob first, row second; a failed row insert removes
//! its blob. When files arrive with a new request, any failure also removes
//! the request (its attachment rows go with it) and every blob already
//! written, so a create either lands whole or not at all.

use axum::body::Bytes;
use axum::extract::Multipart;
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::{error, warn};
use uuid::Uuid;

use crate::core::error::{ApiError, ApiResult};
use crate::core::scope::RequestScope;
use crate::core::shared::models::{RequestAttachment, ServiceRequest};
use crate::core::shared::state::AppState;
use crate::core::shared::utils::stored_file_name;
use crate::file::BlobReader;
use crate::notifications::{Outcome, WorkflowEvent};
use crate::security::auth_api::AuthenticatedUser;

use super::workflow::{self, NewRequest};

/// Multipart field names that carry files.
const FILE_FIELDS: [&str; 2] = ["files", "file"];

#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: String,
    pub bytes: Bytes,
}

/// Text fields and files of a multipart body.
#[derive(Debug, Default)]
pub struct MultipartForm {
    pub fields: HashMap<String, String>,
    pub files: Vec<UploadedFile>,
}

impl MultipartForm {
    pub fn text(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }
}

fn multipart_error(err: axum::extract::multipart::MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::validation("Upload exceeds the maximum allowed size")
    } else {
        ApiError::Validation {
            message: "Malformed multipart body".to_string(),
            details: Some(serde_json::Value::String(err.body_text())),
        }
    }
}

pub async fn read_multipart(mut multipart: Multipart) -> ApiResult<MultipartForm> {
    let mut form = MultipartForm::default();
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(str::to_string);
        match file_name {
            Some(file_name) if FILE_FIELDS.contains(&name.as_str()) => {
                let bytes = field.bytes().await.map_err(multipart_error)?;
                if file_name.trim().is_empty() && bytes.is_empty() {
                    // browsers send an empty part for an untouched file input
                    continue;
                }
                form.files.push(UploadedFile { file_name, bytes });
            }
            _ => {
                let value = field.text().await.map_err(multipart_error)?;
                form.fields.insert(name, value);
            }
        }
    }
    Ok(form)
}

fn validate_uploads(uploads: &[UploadedFile]) -> ApiResult<()> {
    for upload in uploads {
        if upload.file_name.trim().is_empty() {
            return Err(ApiError::field("files", "Every file needs a name"));
        }
        if upload.bytes.is_empty() {
            return Err(ApiError::field(
                "files",
                format!("{} is empty", upload.file_name),
            ));
        }
    }
    Ok(())
}

pub fn mime_type_for(file_name: &str) -> String {
    mime_guess::from_path(file_name)
        .first_or_octet_stream()
        .to_string()
}

struct BatchFailure {
    error: ApiError,
    stored: Vec<RequestAttachment>,
}

async fn persist_one(
    state: &AppState,
    request_id: Uuid,
    uploader: Uuid,
    upload: &UploadedFile,
    now: DateTime<Utc>,
) -> ApiResult<RequestAttachment> {
    let stored_name = stored_file_name(&upload.file_name);
    let file_path = state
        .files
        .put(request_id, &stored_name, &upload.bytes)
        .await?;

    let attachment = RequestAttachment {
        id: Uuid::new_v4(),
        request_id,
        file_name: upload.file_name.trim().to_string(),
        stored_name,
        file_path,
        file_size: upload.bytes.len() as i64,
        mime_type: mime_type_for(&upload.file_name),
        uploaded_by_id: uploader,
        created_at: now,
    };
    if let Err(e) = state.store.insert_attachment(&attachment) {
        if let Err(cleanup) = state.files.delete(request_id, &attachment.stored_name).await {
            warn!(
                "Could not remove orphaned blob {}: {cleanup}",
                attachment.stored_name
            );
        }
        return Err(e.into());
    }
    Ok(attachment)
}

async fn persist_batch(
    state: &AppState,
    request_id: Uuid,
    uploader: Uuid,
    uploads: &[UploadedFile],
    now: DateTime<Utc>,
) -> Result<Vec<RequestAttachment>, BatchFailure> {
    let mut stored = Vec::with_capacity(uploads.len());
    for upload in uploads {
        match persist_one(state, request_id, uploader, upload, now).await {
            Ok(attachment) => stored.push(attachment),
            Err(error) => return Err(BatchFailure { error, stored }),
        }
    }
    Ok(stored)
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedRequest {
    #[serde(flatten)]
    pub request: ServiceRequest,
    pub attachments: Vec<RequestAttachment>,
}

pub async fn create_with_files(
    state: &AppState,
    actor: &AuthenticatedUser,
    input: NewRequest,
    uploads: Vec<UploadedFile>,
    now: DateTime<Utc>,
) -> ApiResult<Outcome<CreatedRequest>> {
    validate_uploads(&uploads)?;
    let Outcome { value: request, events } =
        workflow::create_request(state.store.as_ref(), actor, input, now)?;

    let attachments = match persist_batch(state, request.id, actor.user_id, &uploads, now).await {
        Ok(attachments) => attachments,
        Err(failure) => {
            error!(
                "Attachment write failed for {}, rolling back: {}",
                request.service_queue_id, failure.error
            );
            for attachment in &failure.stored {
                if let Err(e) = state.files.delete(request.id, &attachment.stored_name).await {
                    warn!("Could not remove blob {}: {e}", attachment.stored_name);
                }
            }
            if let Err(e) = state.store.delete_request(request.id) {
                error!(
                    "Could not remove request {} after failed upload: {e}",
                    request.service_queue_id
                );
            }
            return Err(ApiError::Internal(format!(
                "Failed to store attachments: {}",
                failure.error
            )));
        }
    };

    Ok(Outcome {
        value: CreatedRequest {
            request,
            attachments,
        },
        events,
    })
}

pub async fn add_attachments(
    state: &AppState,
    actor: &AuthenticatedUser,
    scope: &RequestScope,
    id: Uuid,
    uploads: Vec<UploadedFile>,
    now: DateTime<Utc>,
) -> ApiResult<Outcome<Vec<RequestAttachment>>> {
    let request = scope.load_request(state.store.as_ref(), id)?;
    if uploads.is_empty() {
        return Err(ApiError::field("files", "At least one file is required"));
    }
    validate_uploads(&uploads)?;

    let attachments = match persist_batch(state, request.id, actor.user_id, &uploads, now).await
    {
        Ok(attachments) => attachments,
        Err(failure) => {
            warn!(
                "Upload to {} stopped after {} of {} files",
                request.service_queue_id,
                failure.stored.len(),
                uploads.len()
            );
            // files stored before the failure stay, so they are still announced
            if !failure.stored.is_empty() {
                state
                    .dispatcher
                    .dispatch(vec![attachments_added(request, actor, &failure.stored)]);
            }
            return Err(failure.error);
        }
    };

    let event = attachments_added(request, actor, &attachments);
    Ok(Outcome::new(attachments).with_event(event))
}

fn attachments_added(
    request: ServiceRequest,
    actor: &AuthenticatedUser,
    attachments: &[RequestAttachment],
) -> WorkflowEvent {
    WorkflowEvent::AttachmentsAdded {
        request,
        actor_id: actor.user_id,
        file_names: attachments.iter().map(|a| a.file_name.clone()).collect(),
    }
}

pub fn list_attachments(
    state: &AppState,
    scope: &RequestScope,
    id: Uuid,
) -> ApiResult<Vec<RequestAttachment>> {
    let request = scope.load_request(state.store.as_ref(), id)?;
    Ok(state.store.list_attachments(request.id)?)
}

/// Resolves a stored attachment to its metadata and an open reader.
pub async fn load_download(
    state: &AppState,
    scope: &RequestScope,
    id: Uuid,
    stored_name: &str,
) -> ApiResult<(RequestAttachment, BlobReader)> {
    let request = scope.load_request(state.store.as_ref(), id)?;
    let attachment = state
        .store
        .find_attachment(request.id, stored_name)?
        .ok_or(ApiError::NotFound("Attachment"))?;
    let reader = state.files.open(request.id, &attachment.stored_name).await?;
    Ok((attachment, reader))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mime_type_comes_from_extension() {
        assert_eq!(mime_type_for("policy.pdf"), "application/pdf");
        assert_eq!(mime_type_for("photo.JPG"), "image/jpeg");
        assert_eq!(mime_type_for("no_extension"), "application/octet-stream");
    }

    #[test]
    fn test_empty_files_are_rejected() {
        let uploads = vec![UploadedFile {
            file_name: "empty.txt".into(),
            bytes: Bytes::new(),
        }];
        assert!(matches!(
            validate_uploads(&uploads),
            Err(ApiError::Validation { .. })
        ));
    }

    #[test]
    fn test_form_text_ignores_blank_values() {
        let mut form = MultipartForm::default();
        form.fields.insert("client".into(), "Sam".into());
        form.fields.insert("dueDate".into(), "  ".into());
        assert_eq!(form.text("client"), Some("Sam"));
        assert_eq!(form.text("dueDate"), None);
        assert_eq!(form.text("missing"), None);
    }
}
