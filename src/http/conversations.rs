use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, put},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::error::ChatError;
use crate::state::AppState;
use crate::store::models::{Conversation, ConversationKind, Message, UserSummary};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_conversations).post(create_conversation))
        .route("/{id}", get(get_conversation))
        .route("/{id}/messages", get(list_messages).post(send_message))
        .route(
            "/{id}/messages/{message_id}",
            put(edit_message).delete(delete_message),
        )
        .route("/{id}/read", put(mark_read))
}

// ---------------------------------------------------------------------------
// Response shapes. Every success body carries `success: true`; errors map to
// `{success: false, message}` via ChatError.
// ---------------------------------------------------------------------------

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ConversationSummary {
    id: Uuid,
    kind: ConversationKind,
    name: Option<String>,
    description: Option<String>,
    avatar: Option<String>,
    participants: Vec<UserSummary>,
    last_message: Option<Message>,
    last_activity: DateTime<Utc>,
    unread_count: usize,
}

impl ConversationSummary {
    fn build(
        conversation: &Conversation,
        viewer_id: &str,
        users: &HashMap<&str, &UserSummary>,
    ) -> Self {
        Self {
            id: conversation.id,
            kind: conversation.kind,
            name: conversation.name.clone(),
            description: conversation.description.clone(),
            avatar: conversation.avatar.clone(),
            participants: resolve_participants(&conversation.participants, users),
            last_message: conversation.last_message.clone(),
            last_activity: conversation.last_activity,
            unread_count: conversation.unread_count(viewer_id),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ConversationDetail {
    id: Uuid,
    kind: ConversationKind,
    name: Option<String>,
    description: Option<String>,
    avatar: Option<String>,
    admins: Vec<String>,
    participants: Vec<UserSummary>,
    messages: Vec<Message>,
    last_message: Option<Message>,
    last_activity: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct ConversationsResponse {
    success: bool,
    conversations: Vec<ConversationSummary>,
}

#[derive(Serialize)]
struct ConversationResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    conversation: ConversationDetail,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Pagination {
    page: usize,
    limit: usize,
    total: usize,
    pages: usize,
}

#[derive(Serialize)]
struct MessagesResponse {
    success: bool,
    messages: Vec<Message>,
    pagination: Pagination,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SendMessageResponse {
    success: bool,
    message: String,
    new_message: Message,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EditMessageResponse {
    success: bool,
    message: String,
    updated_message: Message,
}

#[derive(Serialize)]
struct BasicResponse {
    success: bool,
    message: String,
}

fn resolve_participants(
    ids: &[String],
    users: &HashMap<&str, &UserSummary>,
) -> Vec<UserSummary> {
    ids.iter()
        .filter_map(|id| users.get(id.as_str()).map(|u| (*u).clone()))
        .collect()
}

async fn participant_map(
    state: &AppState,
    conversations: &[Conversation],
) -> Result<Vec<UserSummary>, ChatError> {
    let mut ids: Vec<String> = conversations
        .iter()
        .flat_map(|c| c.participants.iter().cloned())
        .collect();
    ids.sort();
    ids.dedup();
    state.store.user_summaries(&ids).await
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// GET /api/conversations
async fn list_conversations(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<ConversationsResponse>, ChatError> {
    let conversations = state.store.list_for_user(&user.id).await?;
    let summaries = participant_map(&state, &conversations).await?;
    let by_id: HashMap<&str, &UserSummary> =
        summaries.iter().map(|u| (u.id.as_str(), u)).collect();

    let conversations = conversations
        .iter()
        .map(|c| ConversationSummary::build(c, &user.id, &by_id))
        .collect();

    Ok(Json(ConversationsResponse {
        success: true,
        conversations,
    }))
}

/// GET /api/conversations/{id}
async fn get_conversation(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ConversationResponse>, ChatError> {
    let conversation = state.store.get_for_participant(id, &user.id).await?;
    let detail = detail_for(&state, conversation).await?;

    Ok(Json(ConversationResponse {
        success: true,
        message: None,
        conversation: detail,
    }))
}

async fn detail_for(
    state: &AppState,
    conversation: Conversation,
) -> Result<ConversationDetail, ChatError> {
    let summaries = state.store.user_summaries(&conversation.participants).await?;
    let by_id: HashMap<&str, &UserSummary> =
        summaries.iter().map(|u| (u.id.as_str(), u)).collect();

    Ok(ConversationDetail {
        id: conversation.id,
        kind: conversation.kind,
        name: conversation.name,
        description: conversation.description,
        avatar: conversation.avatar,
        admins: conversation.admins,
        participants: resolve_participants(&conversation.participants, &by_id),
        messages: conversation.messages,
        last_message: conversation.last_message,
        last_activity: conversation.last_activity,
        created_at: conversation.created_at,
    })
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageParams {
    page: Option<usize>,
    limit: Option<usize>,
}

/// GET /api/conversations/{id}/messages?page&limit
async fn list_messages(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Query(params): Query<PageParams>,
) -> Result<Json<MessagesResponse>, ChatError> {
    let page = state
        .store
        .list_messages(
            id,
            &user.id,
            params.page.unwrap_or(1),
            params.limit.unwrap_or(50),
        )
        .await?;

    Ok(Json(MessagesResponse {
        success: true,
        messages: page.messages,
        pagination: Pagination {
            page: page.page,
            limit: page.limit,
            total: page.total,
            pages: page.pages,
        },
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateConversationBody {
    participant_id: String,
}

/// POST /api/conversations — find-or-create the direct conversation.
async fn create_conversation(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(body): Json<CreateConversationBody>,
) -> Result<Json<ConversationResponse>, ChatError> {
    if body.participant_id.is_empty() {
        return Err(ChatError::InvalidInput("Participant ID is required".into()));
    }
    if body.participant_id == user.id {
        return Err(ChatError::InvalidInput(
            "Cannot create a conversation with yourself".into(),
        ));
    }
    if state.store.get_user(&body.participant_id).await?.is_none() {
        return Err(ChatError::NotFound("User"));
    }

    let conversation = state
        .store
        .find_or_create_direct(&user.id, &body.participant_id)
        .await?;
    let detail = detail_for(&state, conversation).await?;

    Ok(Json(ConversationResponse {
        success: true,
        message: Some("Conversation retrieved successfully".to_string()),
        conversation: detail,
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendMessageBody {
    content: String,
    #[serde(default)]
    message_type: crate::store::models::MessageType,
}

/// POST /api/conversations/{id}/messages
async fn send_message(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(body): Json<SendMessageBody>,
) -> Result<(StatusCode, Json<SendMessageResponse>), ChatError> {
    let message = state
        .store
        .append_message(id, &user.id, &body.content, body.message_type, None)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(SendMessageResponse {
            success: true,
            message: "Message sent successfully".to_string(),
            new_message: message,
        }),
    ))
}

#[derive(Deserialize)]
struct EditMessageBody {
    content: String,
}

/// PUT /api/conversations/{id}/messages/{message_id}
async fn edit_message(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path((id, message_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<EditMessageBody>,
) -> Result<Json<EditMessageResponse>, ChatError> {
    let message = state
        .store
        .edit_message(id, message_id, &user.id, &body.content)
        .await?;

    Ok(Json(EditMessageResponse {
        success: true,
        message: "Message updated successfully".to_string(),
        updated_message: message,
    }))
}

/// DELETE /api/conversations/{id}/messages/{message_id}
async fn delete_message(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path((id, message_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<BasicResponse>, ChatError> {
    state
        .store
        .soft_delete_message(id, message_id, &user.id)
        .await?;

    Ok(Json(BasicResponse {
        success: true,
        message: "Message deleted successfully".to_string(),
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarkReadBody {
    #[serde(default)]
    message_ids: Vec<Uuid>,
}

/// PUT /api/conversations/{id}/read
async fn mark_read(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(body): Json<MarkReadBody>,
) -> Result<Json<BasicResponse>, ChatError> {
    state.store.mark_read(id, &user.id, &body.message_ids).await?;

    Ok(Json(BasicResponse {
        success: true,
        message: "Messages marked as read".to_string(),
    }))
}
