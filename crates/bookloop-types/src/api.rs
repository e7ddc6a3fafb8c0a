use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Book, BookStatus, Conversation, Exchange, Message, User};

// -- JWT Claims --

/// JWT claims shared by the REST middleware and the realtime gateway.
/// The token only identifies a user id; display data is looked up per request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SignupRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

/// User as exposed over the API. Never carries the password hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub bio: String,
    pub created_at: DateTime<Utc>,
}

impl From<User> for PublicUser {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            name: user.name,
            email: user.email,
            bio: user.bio,
            created_at: user.created_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: PublicUser,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    pub name: Option<String>,
    pub bio: Option<String>,
}

// -- Favorites --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleFavoriteRequest {
    pub book_id: Option<Uuid>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FavoritesResponse {
    pub favorites: Vec<Uuid>,
}

// -- Presence --

#[derive(Debug, Serialize, Deserialize)]
pub struct OnlineUsersResponse {
    pub online: Vec<Uuid>,
}

// -- Books --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBookRequest {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub author: String,
    pub genre: Option<String>,
    pub condition: Option<String>,
    pub location: Option<String>,
    pub image_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateBookRequest {
    pub title: Option<String>,
    pub author: Option<String>,
    pub genre: Option<String>,
    pub condition: Option<String>,
    pub location: Option<String>,
    pub image_url: Option<String>,
    pub status: Option<BookStatus>,
}

impl UpdateBookRequest {
    /// Apply the present fields onto `book`. Ownership is not editable.
    pub fn apply(self, book: &mut Book) {
        if let Some(title) = self.title {
            book.title = title;
        }
        if let Some(author) = self.author {
            book.author = author;
        }
        if let Some(genre) = self.genre {
            book.genre = genre;
        }
        if let Some(condition) = self.condition {
            book.condition = condition;
        }
        if let Some(location) = self.location {
            book.location = location;
        }
        if let Some(image_url) = self.image_url {
            book.image_url = image_url;
        }
        if let Some(status) = self.status {
            book.status = status;
        }
    }
}

// -- Exchanges --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateExchangeRequest {
    pub book_id: Option<Uuid>,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateExchangeResponse {
    pub exchange: Exchange,
    pub conversation: Conversation,
}

// -- Conversations --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateConversationRequest {
    pub other_user_id: Option<Uuid>,
    pub book_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantInfo {
    pub id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// A conversation as listed for one participant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub last_message: Option<Message>,
    pub unread_count: u32,
    pub participants_info: Vec<ParticipantInfo>,
}

// -- Messages --

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub success: bool,
}

impl SuccessResponse {
    pub fn ok() -> Self {
        Self { success: true }
    }
}

// -- Assistant --

#[derive(Debug, Deserialize)]
pub struct AiHelpRequest {
    #[serde(default)]
    pub question: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AiHelpResponse {
    pub answer: String,
}

/// Generic error body returned by every failing endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
