use std::collections::BTreeMap;

use axum::{
    Json,
    body::Body,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::Response,
};
use chrono::Utc;
use tracing::{info, warn};

use super::profiles::{load_subjects, owned_profile};
use crate::AppState;
use crate::api::models::pagination::PaginatedResponse;
use crate::api::models::stories::{
    GenerateStoryRequest, GeneratedStoryResponse, ListStoriesQuery, RatingRequest, StoryResponse, StoryTemplate,
    StoryTemplatesQuery, story_templates,
};
use crate::api::models::subscriptions::Feature;
use crate::api::models::users::CurrentUser;
use crate::db::errors::DbError;
use crate::db::handlers::{Stories, Subscriptions, stories::StoryFilter};
use crate::db::models::stories::StoryCreateDBRequest;
use crate::db::models::subscriptions::SubscriptionDBResponse;
use crate::errors::{Error, Result};
use crate::generation::characters::{ChildSubject, FamilySubject, RawTraits};
use crate::generation::narrative::StoryBrief;
use crate::generation::pipeline::StoryRequest;
use crate::metering::{UsageDenied, UsageType, check_feature, check_generation};
use crate::storybook;
use crate::types::{StoryId, UserId, abbrev_uuid};

fn story_not_found(id: StoryId) -> Error {
    Error::NotFound {
        resource: "Story".to_string(),
        id: id.to_string(),
    }
}

/// Once the gate has admitted a generation, internal failures are reported as "not charged"
fn not_charged(error: Error) -> Error {
    if error.status_code().is_server_error() {
        Error::GenerationFailed {
            reason: format!("{error:#}"),
        }
    } else {
        error
    }
}

/// Comfort items for the prompt: the profile's in preference order, then any extras from the
/// request that are not already listed
fn merge_comfort_items(profile_items: Vec<String>, extra: &[String]) -> Vec<String> {
    let mut merged = profile_items;
    for item in extra.iter().map(|i| i.trim()).filter(|i| !i.is_empty()) {
        if !merged.iter().any(|m| m.eq_ignore_ascii_case(item)) {
            merged.push(item.to_string());
        }
    }
    merged
}

/// Resolve the subscription for `now` and run the usage gate.
///
/// The period rollover is committed even when generation later fails.
async fn admit_generation(state: &AppState, user_id: UserId) -> Result<(UsageType, SubscriptionDBResponse)> {
    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;
    let subscription = Subscriptions::new(&mut tx)
        .current_for_update(user_id, Utc::now())
        .await?
        .ok_or(UsageDenied::NoSubscription)?;
    let usage_type = check_generation(&subscription)?;
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;
    Ok((usage_type, subscription))
}

/// Everything the pipeline needs, plus what is stored alongside the story
struct PreparedStory {
    request: StoryRequest,
    family_relations: BTreeMap<String, String>,
}

async fn prepare_story(
    state: &AppState,
    user_id: UserId,
    body: &GenerateStoryRequest,
    illustrate: bool,
) -> Result<PreparedStory> {
    let (child, family, family_relations, profile_items, favorite_places) = match body.profile_id {
        Some(profile_id) => {
            let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
            let profile = owned_profile(&mut conn, profile_id, user_id).await?;
            let mut subjects =
                load_subjects(&mut conn, &profile, Utc::now().date_naive(), state.pipeline.max_family_members()).await?;
            if let Some(age) = body.age {
                subjects.child.age = age;
            }
            (
                subjects.child,
                subjects.family,
                subjects.family_relations,
                subjects.comfort_items,
                subjects.favorite_places,
            )
        }
        None => {
            let child = ChildSubject {
                name: body.child_name.as_deref().unwrap_or_default().trim().to_string(),
                age: body.age.unwrap_or(GenerateStoryRequest::MIN_AGE),
                traits: RawTraits::Missing,
                photo: None,
            };
            let family = body
                .family_members
                .iter()
                .map(|(name, relation)| FamilySubject {
                    name: name.clone(),
                    relation: relation.clone(),
                    traits: RawTraits::Missing,
                    photo: None,
                })
                .collect();
            (child, family, body.family_members.clone(), Vec::new(), Vec::new())
        }
    };

    let comfort_items = if body.include_comfort_items {
        merge_comfort_items(profile_items, &body.favorite_items)
    } else {
        merge_comfort_items(Vec::new(), &body.favorite_items)
    };

    let brief = StoryBrief {
        child_name: child.name.clone(),
        age: child.age,
        fear_or_challenge: body.fear_or_challenge.trim().to_string(),
        tone: body.tone,
        comfort_items,
        custom_elements: body.custom_elements.clone(),
        favorite_places,
    };

    Ok(PreparedStory {
        request: StoryRequest {
            brief,
            child,
            family,
            include_family: body.include_family,
            illustrate,
        },
        family_relations: if body.include_family {
            family_relations
        } else {
            BTreeMap::new()
        },
    })
}

/// Generate a personalized story.
///
/// The usage gate runs first and a denial short-circuits everything. The story is only stored and
/// charged if generation finishes; the usage update and the insert commit together.
#[utoipa::path(
    post,
    path = "/stories/generate",
    tag = "stories",
    summary = "Generate a story",
    request_body = GenerateStoryRequest,
    responses(
        (status = 201, description = "Story generated and saved", body = GeneratedStoryResponse),
        (status = 400, description = "Invalid input"),
        (status = 401, description = "Unauthorized"),
        (status = 402, description = "Story limit reached or payment failed"),
        (status = 403, description = "Subscription cancelled"),
        (status = 404, description = "Profile not found"),
        (status = 500, description = "Generation failed; nothing was charged"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all, fields(user_id = %abbrev_uuid(&current_user.id)))]
pub async fn generate_story(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(body): Json<GenerateStoryRequest>,
) -> Result<(StatusCode, Json<GeneratedStoryResponse>)> {
    body.validate()?;

    let (usage_type, subscription) = admit_generation(&state, current_user.id).await?;
    let illustrate = subscription.features.has(Feature::ImageGeneration);

    let prepared = prepare_story(&state, current_user.id, &body, illustrate)
        .await
        .map_err(not_charged)?;
    let generated = state.pipeline.generate(&prepared.request).await;

    let create = StoryCreateDBRequest {
        user_id: current_user.id,
        profile_id: body.profile_id,
        title: generated.narrative.title.clone(),
        story_text: generated.narrative.story_text.clone(),
        key_message: generated.narrative.key_message.clone(),
        tone: body.tone,
        child_name: prepared.request.brief.child_name.clone(),
        age: prepared.request.brief.age,
        fear_or_challenge: prepared.request.brief.fear_or_challenge.clone(),
        favorite_items: prepared.request.brief.comfort_items.clone(),
        family_members: prepared.family_relations,
        scenes: generated.scenes(),
        word_count: generated.word_count,
        reading_time: generated.reading_time,
        model_used: generated.model_used.clone(),
        prompt_tokens: generated.prompt_tokens,
        completion_tokens: generated.completion_tokens,
        generation_time_ms: generated.generation_time.as_millis().try_into().unwrap_or(i64::MAX),
        used_fallback: generated.used_fallback,
        usage_type,
    };

    let mut tx = state.db.begin().await.map_err(|e| not_charged(Error::Database(e.into())))?;
    let subscription = Subscriptions::new(&mut tx)
        .current_for_update(current_user.id, Utc::now())
        .await
        .map_err(|e| not_charged(e.into()))?
        .ok_or(UsageDenied::NoSubscription)?;

    let recorded = Subscriptions::new(&mut tx)
        .record_generation(current_user.id, usage_type)
        .await
        .map_err(|e| not_charged(e.into()))?;
    if !recorded {
        // A concurrent request used up the allowance; dropping the transaction rolls back
        warn!(usage_type = usage_type.as_str(), "Usage changed during generation, discarding story");
        let denied = check_generation(&subscription).err().unwrap_or(UsageDenied::LimitReached {
            limit: subscription.stories_per_month,
        });
        return Err(denied.into());
    }

    let story = Stories::new(&mut tx).create(&create).await.map_err(|e| not_charged(e.into()))?;
    tx.commit().await.map_err(|e| not_charged(Error::Database(e.into())))?;

    let credits_remaining = if usage_type.spends_credit() {
        subscription.individual_story_credits - 1
    } else {
        subscription.individual_story_credits
    };

    info!(
        story_id = %abbrev_uuid(&story.id),
        usage_type = usage_type.as_str(),
        used_fallback = story.used_fallback,
        scenes = story.scenes.len(),
        generation_time_ms = story.generation_time_ms,
        "Story generated"
    );

    Ok((
        StatusCode::CREATED,
        Json(GeneratedStoryResponse {
            story: story.into(),
            generation_usage: usage_type,
            credits_remaining,
            characters: generated.characters.to_map(),
        }),
    ))
}

#[utoipa::path(
    get,
    path = "/stories",
    tag = "stories",
    summary = "List stories",
    params(ListStoriesQuery),
    responses(
        (status = 200, description = "Stories of the current account, newest first", body = PaginatedResponse<StoryResponse>),
        (status = 401, description = "Unauthorized"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn list_stories(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Query(query): Query<ListStoriesQuery>,
) -> Result<Json<PaginatedResponse<StoryResponse>>> {
    let skip = query.pagination.skip();
    let limit = query.pagination.limit();

    let mut filter = StoryFilter::new(current_user.id, skip, limit);
    filter.profile_id = query.profile_id;
    filter.favorites_only = query.favorites_only.unwrap_or(false);

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut repo = Stories::new(&mut conn);
    let stories = repo.list(&filter).await?;
    let total_count = repo.count(&filter).await?;

    Ok(Json(PaginatedResponse::new(
        stories.into_iter().map(Into::into).collect(),
        total_count,
        skip,
        limit,
    )))
}

/// Fetching a story counts as reading it
#[utoipa::path(
    get,
    path = "/stories/{id}",
    tag = "stories",
    summary = "Read a story",
    params(("id" = uuid::Uuid, Path, description = "Story ID")),
    responses(
        (status = 200, description = "The story, with its read count incremented", body = StoryResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Story not found"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn get_story(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(story_id): Path<StoryId>,
) -> Result<Json<StoryResponse>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    match Stories::new(&mut conn).mark_read(story_id, current_user.id).await {
        Ok(story) => Ok(Json(story.into())),
        Err(DbError::NotFound) => Err(story_not_found(story_id)),
        Err(e) => Err(e.into()),
    }
}

#[utoipa::path(
    put,
    path = "/stories/{id}/favorite",
    tag = "stories",
    summary = "Toggle a story's favourite flag",
    params(("id" = uuid::Uuid, Path, description = "Story ID")),
    responses(
        (status = 200, description = "The story with its new favourite flag", body = StoryResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Story not found"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn toggle_favorite(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(story_id): Path<StoryId>,
) -> Result<Json<StoryResponse>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    match Stories::new(&mut conn).toggle_favorite(story_id, current_user.id).await {
        Ok(story) => Ok(Json(story.into())),
        Err(DbError::NotFound) => Err(story_not_found(story_id)),
        Err(e) => Err(e.into()),
    }
}

#[utoipa::path(
    post,
    path = "/stories/{id}/rating",
    tag = "stories",
    summary = "Rate a story",
    request_body = RatingRequest,
    params(("id" = uuid::Uuid, Path, description = "Story ID")),
    responses(
        (status = 200, description = "Rating saved", body = StoryResponse),
        (status = 400, description = "Rating outside 1 to 5"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Story not found"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn rate_story(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(story_id): Path<StoryId>,
    Json(rating): Json<RatingRequest>,
) -> Result<Json<StoryResponse>> {
    rating.validate()?;

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    match Stories::new(&mut conn).set_rating(story_id, current_user.id, rating.rating).await {
        Ok(story) => Ok(Json(story.into())),
        Err(DbError::NotFound) => Err(story_not_found(story_id)),
        Err(e) => Err(e.into()),
    }
}

#[utoipa::path(
    delete,
    path = "/stories/{id}",
    tag = "stories",
    summary = "Delete a story",
    params(("id" = uuid::Uuid, Path, description = "Story ID")),
    responses(
        (status = 204, description = "Story deleted"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Story not found"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn delete_story(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(story_id): Path<StoryId>,
) -> Result<StatusCode> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    if Stories::new(&mut conn).delete(story_id, current_user.id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(story_not_found(story_id))
    }
}

/// Download a story as a printable storybook. Requires a plan with PDF export.
#[utoipa::path(
    get,
    path = "/stories/{id}/pdf",
    tag = "stories",
    summary = "Export a story as PDF",
    params(("id" = uuid::Uuid, Path, description = "Story ID")),
    responses(
        (status = 200, description = "The storybook", content_type = "application/pdf"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "PDF export is not part of the current plan"),
        (status = 404, description = "Story not found"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all, fields(user_id = %abbrev_uuid(&current_user.id), story_id = %abbrev_uuid(&story_id)))]
pub async fn export_story_pdf(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(story_id): Path<StoryId>,
) -> Result<Response> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let subscription = Subscriptions::new(&mut conn)
        .get_by_user(current_user.id)
        .await?
        .ok_or(UsageDenied::NoSubscription)?;
    check_feature(&subscription, Feature::PdfExport)?;

    let story = Stories::new(&mut conn)
        .get_for_user(story_id, current_user.id)
        .await?
        .ok_or_else(|| story_not_found(story_id))?;

    let pdf = storybook::render_storybook(&story, Utc::now().date_naive())?;
    info!(bytes = pdf.len(), "Exported storybook");

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/pdf")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", storybook::file_name(&story)),
        )
        .body(Body::from(pdf))
        .map_err(|e| Error::Internal {
            operation: format!("build storybook response: {e}"),
        })
}

/// Common fears and challenges by age, to help parents pick a story theme
#[utoipa::path(
    get,
    path = "/stories/templates",
    tag = "stories",
    summary = "List story templates",
    params(StoryTemplatesQuery),
    responses(
        (status = 200, description = "Templates for the requested age group, or all of them", body = Vec<StoryTemplate>),
        (status = 401, description = "Unauthorized"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn list_story_templates(
    _current_user: CurrentUser,
    Query(query): Query<StoryTemplatesQuery>,
) -> Json<Vec<StoryTemplate>> {
    Json(story_templates(query.age_group.as_deref()))
}
