use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, State},
    http::{StatusCode, header},
    response::Response,
};

use super::profiles::owned_profile;
use crate::AppState;
use crate::api::models::photos::{CharacterPhotoForm, CharacterPreviewResponse, PhotoResponse, PhotoType, PhotoUploadForm};
use crate::api::models::users::CurrentUser;
use crate::config::PhotosConfig;
use crate::db::handlers::{ComfortItems, FamilyMembers, Photos};
use crate::db::models::photos::PhotoCreateDBRequest;
use crate::errors::{Error, Result};
use crate::generation::ImageInput;
use crate::generation::photo_analyzer::analyze_photo;
use crate::types::{ComfortItemId, FamilyMemberId, PhotoId, ProfileId};

const CHILD_RELATIONSHIP: &str = "child";

fn photo_not_found(id: PhotoId) -> Error {
    Error::NotFound {
        resource: "Photo".to_string(),
        id: id.to_string(),
    }
}

/// A parsed upload, before ownership of the referenced family member or comfort item is checked
#[derive(Debug, Default)]
struct PhotoUpload {
    data: Vec<u8>,
    content_type: Option<String>,
    photo_type: Option<PhotoType>,
    description: Option<String>,
    is_primary: bool,
    family_member_id: Option<FamilyMemberId>,
    comfort_item_id: Option<ComfortItemId>,
}

impl PhotoUpload {
    /// The explicit type, else one implied by what the photo is attached to
    fn resolved_type(&self) -> PhotoType {
        match (self.photo_type, self.family_member_id, self.comfort_item_id) {
            (Some(photo_type), _, _) => photo_type,
            (None, Some(_), _) => PhotoType::Family,
            (None, None, Some(_)) => PhotoType::ComfortItem,
            (None, None, None) => PhotoType::default(),
        }
    }
}

fn parse_id(field: &str, value: &str) -> Result<Option<uuid::Uuid>> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    value.parse().map(Some).map_err(|_| Error::BadRequest {
        message: format!("{field} must be a UUID"),
    })
}

fn parse_bool(field: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" | "" => Ok(false),
        _ => Err(Error::BadRequest {
            message: format!("{field} must be true or false"),
        }),
    }
}

/// A multipart form carrying one image under `file`, plus its text fields in order
#[derive(Debug, Default)]
struct ImageForm {
    data: Vec<u8>,
    content_type: String,
    fields: Vec<(String, String)>,
}

/// Read the multipart form, enforcing the size limit while the file streams in
async fn read_image_form(multipart: &mut Multipart, config: &PhotosConfig) -> Result<ImageForm> {
    let mut data = Vec::new();
    let mut content_type = None;
    let mut saw_file = false;
    let mut fields = Vec::new();

    while let Some(mut field) = multipart.next_field().await.map_err(|e| Error::BadRequest {
        message: format!("Failed to parse multipart data: {e}"),
    })? {
        let field_name = field.name().unwrap_or("").to_string();

        if field_name == "file" {
            saw_file = true;
            content_type = field.content_type().map(|s| s.to_ascii_lowercase());

            while let Some(chunk) = field.chunk().await.map_err(|e| Error::BadRequest {
                message: format!("Failed to read file chunk: {e}"),
            })? {
                if data.len() + chunk.len() > config.max_upload_bytes {
                    tracing::warn!(max_upload_bytes = config.max_upload_bytes, "Photo size limit exceeded, aborting upload");
                    return Err(Error::PayloadTooLarge {
                        message: format!(
                            "Photo exceeds maximum allowed size of {} bytes ({} MB)",
                            config.max_upload_bytes,
                            config.max_upload_bytes / (1024 * 1024)
                        ),
                    });
                }
                data.extend_from_slice(&chunk);
            }
            continue;
        }

        let value = field.text().await.map_err(|e| Error::BadRequest {
            message: format!("Failed to read field '{field_name}': {e}"),
        })?;
        fields.push((field_name, value));
    }

    if !saw_file || data.is_empty() {
        return Err(Error::BadRequest {
            message: "A non-empty 'file' field is required".to_string(),
        });
    }

    let content_type = match content_type {
        Some(ct) if config.allowed_content_types.iter().any(|allowed| allowed.eq_ignore_ascii_case(&ct)) => ct,
        other => {
            return Err(Error::BadRequest {
                message: format!(
                    "Unsupported photo type '{}'. Allowed: {}",
                    other.as_deref().unwrap_or("unknown"),
                    config.allowed_content_types.join(", ")
                ),
            });
        }
    };

    Ok(ImageForm {
        data,
        content_type,
        fields,
    })
}

impl PhotoUpload {
    fn from_form(form: ImageForm) -> Result<Self> {
        let mut upload = PhotoUpload {
            data: form.data,
            content_type: Some(form.content_type),
            ..Default::default()
        };

        for (name, value) in form.fields {
            match name.as_str() {
                "photo_type" => {
                    upload.photo_type = Some(value.parse().map_err(|message| Error::BadRequest { message })?);
                }
                "description" => upload.description = Some(value).filter(|d| !d.trim().is_empty()),
                "is_primary" => upload.is_primary = parse_bool("is_primary", &value)?,
                "family_member_id" => upload.family_member_id = parse_id("family_member_id", &value)?,
                "comfort_item_id" => upload.comfort_item_id = parse_id("comfort_item_id", &value)?,
                other => tracing::debug!("Ignoring unknown upload field '{}'", other),
            }
        }

        if upload.family_member_id.is_some() && upload.comfort_item_id.is_some() {
            return Err(Error::BadRequest {
                message: "A photo can belong to a family member or a comfort item, not both".to_string(),
            });
        }

        Ok(upload)
    }
}

#[utoipa::path(
    get,
    path = "/profiles/{id}/photos",
    tag = "photos",
    summary = "List a profile's photos",
    params(("id" = uuid::Uuid, Path, description = "Profile ID")),
    responses(
        (status = 200, description = "Photo metadata, oldest first", body = Vec<PhotoResponse>),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Profile not found"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn list_photos(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(profile_id): Path<ProfileId>,
) -> Result<Json<Vec<PhotoResponse>>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    owned_profile(&mut conn, profile_id, current_user.id).await?;

    let photos = Photos::new(&mut conn).list_for_profile(profile_id).await?;
    Ok(Json(photos.into_iter().map(Into::into).collect()))
}

/// Upload a photo of the child, a family member or a comfort item.
///
/// Photos attached to a family member or comfort item are never primary.
#[utoipa::path(
    post,
    path = "/profiles/{id}/photos",
    tag = "photos",
    summary = "Upload a photo",
    request_body(content = PhotoUploadForm, content_type = "multipart/form-data"),
    params(("id" = uuid::Uuid, Path, description = "Profile ID")),
    responses(
        (status = 201, description = "Photo stored", body = PhotoResponse),
        (status = 400, description = "Invalid upload"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Profile, family member or comfort item not found"),
        (status = 413, description = "Photo too large"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn upload_photo(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(profile_id): Path<ProfileId>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<PhotoResponse>)> {
    let upload = PhotoUpload::from_form(read_image_form(&mut multipart, &state.config.photos).await?)?;
    let photo_type = upload.resolved_type();

    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;
    owned_profile(&mut tx, profile_id, current_user.id).await?;

    if let Some(member_id) = upload.family_member_id
        && FamilyMembers::new(&mut tx).get(profile_id, member_id).await?.is_none()
    {
        return Err(Error::NotFound {
            resource: "Family member".to_string(),
            id: member_id.to_string(),
        });
    }
    if let Some(item_id) = upload.comfort_item_id
        && ComfortItems::new(&mut tx).get(profile_id, item_id).await?.is_none()
    {
        return Err(Error::NotFound {
            resource: "Comfort item".to_string(),
            id: item_id.to_string(),
        });
    }

    let photo = Photos::new(&mut tx)
        .create(&PhotoCreateDBRequest {
            profile_id,
            family_member_id: upload.family_member_id,
            comfort_item_id: upload.comfort_item_id,
            photo_type,
            description: upload.description,
            is_primary: upload.is_primary,
            content_type: upload.content_type.unwrap_or_default(),
            data: upload.data,
        })
        .await?;
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    tracing::info!(photo_id = %photo.id, size_bytes = photo.size_bytes, "Stored photo");
    Ok((StatusCode::CREATED, Json(photo.into())))
}

#[utoipa::path(
    delete,
    path = "/profiles/{id}/photos/{photo_id}",
    tag = "photos",
    summary = "Delete a photo",
    params(
        ("id" = uuid::Uuid, Path, description = "Profile ID"),
        ("photo_id" = uuid::Uuid, Path, description = "Photo ID"),
    ),
    responses(
        (status = 204, description = "Photo deleted"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Photo not found"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn delete_photo(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path((profile_id, photo_id)): Path<(ProfileId, PhotoId)>,
) -> Result<StatusCode> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut repo = Photos::new(&mut conn);

    match repo.get_for_user(photo_id, current_user.id).await? {
        Some(photo) if photo.profile_id == profile_id => {}
        _ => return Err(photo_not_found(photo_id)),
    }

    if repo.delete(photo_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(photo_not_found(photo_id))
    }
}

#[utoipa::path(
    put,
    path = "/profiles/{id}/photos/{photo_id}/primary",
    tag = "photos",
    summary = "Make a photo the profile's primary photo",
    params(
        ("id" = uuid::Uuid, Path, description = "Profile ID"),
        ("photo_id" = uuid::Uuid, Path, description = "Photo ID"),
    ),
    responses(
        (status = 200, description = "Primary photo set", body = PhotoResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Photo not found, or not a photo of the child"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn set_primary_photo(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path((profile_id, photo_id)): Path<(ProfileId, PhotoId)>,
) -> Result<Json<PhotoResponse>> {
    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;
    owned_profile(&mut tx, profile_id, current_user.id).await?;

    let photo = match Photos::new(&mut tx).set_primary(profile_id, photo_id).await {
        Ok(photo) => photo,
        Err(crate::db::errors::DbError::NotFound) => return Err(photo_not_found(photo_id)),
        Err(e) => return Err(e.into()),
    };
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    Ok(Json(photo.into()))
}

#[utoipa::path(
    get,
    path = "/photos/{photo_id}/content",
    tag = "photos",
    summary = "Download a photo",
    params(("photo_id" = uuid::Uuid, Path, description = "Photo ID")),
    responses(
        (status = 200, description = "The uploaded image bytes", content_type = "application/octet-stream"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Photo not found"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn get_photo_content(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(photo_id): Path<PhotoId>,
) -> Result<Response> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let content = Photos::new(&mut conn)
        .get_content_for_user(photo_id, current_user.id)
        .await?
        .ok_or_else(|| photo_not_found(photo_id))?;

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content.content_type)
        .header(header::CACHE_CONTROL, "private, max-age=3600")
        .body(Body::from(content.data))
        .map_err(|e| Error::Internal {
            operation: format!("build photo response: {e}"),
        })
}

/// Describe the person in a photo the way stories will draw them. Nothing is stored.
#[utoipa::path(
    post,
    path = "/photos/analyze-character",
    tag = "photos",
    summary = "Preview a character description from a photo",
    request_body(content = CharacterPhotoForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Visual description and sample illustration prompt", body = CharacterPreviewResponse),
        (status = 400, description = "Invalid upload or missing character name"),
        (status = 401, description = "Unauthorized"),
        (status = 413, description = "Photo too large"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn analyze_character_photo(
    State(state): State<AppState>,
    _current_user: CurrentUser,
    mut multipart: Multipart,
) -> Result<Json<CharacterPreviewResponse>> {
    let form = read_image_form(&mut multipart, &state.config.photos).await?;

    let field = |name: &str| {
        form.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };
    let character_name = field("character_name").ok_or_else(|| Error::BadRequest {
        message: "character_name is required".to_string(),
    })?;
    let relationship = field("relationship").unwrap_or_else(|| CHILD_RELATIONSHIP.to_string());

    let image = ImageInput {
        content_type: &form.content_type,
        data: &form.data,
    };
    let description = analyze_photo(state.pipeline.vision(), image, &character_name, &relationship).await;

    Ok(Json(CharacterPreviewResponse::new(
        character_name,
        relationship,
        description.text,
        description.from_photo,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::pipeline::StoryPipeline;
    use crate::test_utils::{
        FakeImages, FakeText, FakeVision, bearer_token, create_test_app, create_test_config, create_test_server,
        unreachable_pool,
    };
    use axum_test::multipart::{MultipartForm, Part};
    use serde_json::Value;
    use std::sync::Arc;

    fn png() -> Part {
        Part::bytes(vec![0x89, b'P', b'N', b'G']).file_name("grandma.png").mime_type("image/png")
    }

    fn upload_path() -> String {
        format!("/api/v1/profiles/{}/photos", uuid::Uuid::new_v4())
    }

    #[test]
    fn test_photo_type_is_inferred_from_attachment() {
        let mut upload = PhotoUpload::default();
        assert_eq!(upload.resolved_type(), PhotoType::Gallery);

        upload.comfort_item_id = Some(uuid::Uuid::new_v4());
        assert_eq!(upload.resolved_type(), PhotoType::ComfortItem);

        upload.family_member_id = Some(uuid::Uuid::new_v4());
        assert_eq!(upload.resolved_type(), PhotoType::Family);

        upload.photo_type = Some(PhotoType::Object);
        assert_eq!(upload.resolved_type(), PhotoType::Object);
    }

    #[test]
    fn test_form_value_parsing() {
        assert!(parse_bool("is_primary", "TRUE").unwrap());
        assert!(!parse_bool("is_primary", "").unwrap());
        assert!(parse_bool("is_primary", "maybe").is_err());

        assert_eq!(parse_id("family_member_id", " ").unwrap(), None);
        assert!(parse_id("family_member_id", "abc").is_err());
        let id = uuid::Uuid::new_v4();
        assert_eq!(parse_id("family_member_id", &id.to_string()).unwrap(), Some(id));
    }

    #[tokio::test]
    async fn test_oversized_upload_is_rejected_before_storage() {
        let mut config = create_test_config();
        config.photos.max_upload_bytes = 16;
        let token = bearer_token(&config);
        let server = create_test_server(config);

        let form = MultipartForm::new()
            .add_text("photo_type", "profile")
            .add_part("file", Part::bytes(vec![0u8; 64]).file_name("emma.png").mime_type("image/png"));
        let response = server
            .post(&upload_path())
            .add_header(header::AUTHORIZATION, token)
            .multipart(form)
            .await;

        response.assert_status(StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_unsupported_content_type_is_rejected() {
        let config = create_test_config();
        let token = bearer_token(&config);
        let server = create_test_server(config);

        let form = MultipartForm::new().add_part(
            "file",
            Part::bytes(b"%PDF-1.4".to_vec()).file_name("drawing.pdf").mime_type("application/pdf"),
        );
        let response = server
            .post(&upload_path())
            .add_header(header::AUTHORIZATION, token)
            .multipart(form)
            .await;

        response.assert_status(StatusCode::BAD_REQUEST);
        assert!(response.text().contains("application/pdf"));
    }

    #[tokio::test]
    async fn test_missing_file_is_rejected() {
        let config = create_test_config();
        let token = bearer_token(&config);
        let server = create_test_server(config);

        let form = MultipartForm::new().add_text("description", "at the beach");
        let response = server
            .post(&upload_path())
            .add_header(header::AUTHORIZATION, token)
            .multipart(form)
            .await;

        response.assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_character_preview_describes_the_photo() {
        let config = create_test_config();
        let token = bearer_token(&config);
        let vision = Arc::new(FakeVision::answering("Silver curls, round glasses and a bright cardigan."));
        let pipeline = StoryPipeline::new(
            Arc::new(FakeText::failing()),
            vision.clone(),
            Arc::new(FakeImages::succeeding()),
            &config.generation,
        );
        let server = create_test_app(unreachable_pool(), config, pipeline);

        let form = MultipartForm::new()
            .add_text("character_name", "Grandma Rose")
            .add_text("relationship", "grandmother")
            .add_part("file", png());
        let response = server
            .post("/api/v1/photos/analyze-character")
            .add_header(header::AUTHORIZATION, token)
            .multipart(form)
            .await;

        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["character_name"], "Grandma Rose");
        assert_eq!(body["relationship"], "grandmother");
        assert_eq!(body["visual_description"], "Silver curls, round glasses and a bright cardigan.");
        assert_eq!(body["photo_processed"], true);
        assert!(
            body["sample_illustration_prompt"]
                .as_str()
                .unwrap()
                .contains("Grandma Rose (grandmother): Silver curls")
        );
        assert!(vision.prompts()[0].contains("this grandmother named Grandma Rose"));
    }

    #[tokio::test]
    async fn test_character_preview_falls_back_when_vision_fails() {
        let config = create_test_config();
        let token = bearer_token(&config);
        let server = create_test_server(config);

        let form = MultipartForm::new().add_text("character_name", "Emma").add_part("file", png());
        let response = server
            .post("/api/v1/photos/analyze-character")
            .add_header(header::AUTHORIZATION, token)
            .multipart(form)
            .await;

        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["relationship"], "child");
        assert_eq!(body["photo_processed"], false);
        assert_eq!(
            body["visual_description"],
            "Emma is a cheerful child with a warm smile and kind eyes."
        );
    }

    #[tokio::test]
    async fn test_character_preview_requires_name_and_login() {
        let config = create_test_config();
        let token = bearer_token(&config);
        let server = create_test_server(config);

        server
            .post("/api/v1/photos/analyze-character")
            .multipart(MultipartForm::new().add_text("character_name", "Emma").add_part("file", png()))
            .await
            .assert_status(StatusCode::UNAUTHORIZED);

        let response = server
            .post("/api/v1/photos/analyze-character")
            .add_header(header::AUTHORIZATION, token)
            .multipart(MultipartForm::new().add_text("character_name", "  ").add_part("file", png()))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert!(response.text().contains("character_name is required"));
    }
}
