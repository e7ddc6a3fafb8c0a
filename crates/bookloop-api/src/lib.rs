pub mod assistant;
pub mod auth;
pub mod books;
pub mod conversations;
pub mod error;
pub mod exchanges;
pub mod favorites;
pub mod middleware;
pub mod realtime;
pub mod state;

use axum::{
    Router,
    routing::{get, post, put},
};

pub use assistant::{Assistant, AssistantConfig};
pub use error::ApiError;
pub use state::{AppState, AppStateInner};

use crate::middleware::require_auth;

/// HTTP routes under `/api` plus the realtime upgrade at `/gateway`.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/signup", post(auth::signup))
        .route("/login", post(auth::login))
        .route("/users", get(auth::list_users))
        .route("/books", get(books::list_books))
        .route("/ai-help", post(assistant::ai_help));

    let protected_routes = Router::new()
        .route("/me", get(auth::me))
        .route("/users/favorite", post(favorites::toggle_favorite))
        .route("/users/favorites", get(favorites::list_favorites))
        .route("/users/online", get(realtime::online_users))
        .route("/users/{id}", put(auth::update_profile))
        .route("/books", post(books::create_book))
        .route("/books/{id}", put(books::update_book).delete(books::delete_book))
        .route("/exchanges", get(exchanges::list_exchanges).post(exchanges::create_exchange))
        .route("/exchanges/{id}/accept", put(exchanges::accept_exchange))
        .route("/exchanges/{id}/decline", put(exchanges::decline_exchange))
        .route(
            "/conversations",
            get(conversations::list_conversations).post(conversations::create_conversation),
        )
        .route(
            "/conversations/{id}/messages",
            get(conversations::get_messages).post(conversations::send_message),
        )
        .route("/conversations/{id}/read", put(conversations::mark_read))
        .route_layer(axum::middleware::from_fn_with_state(state.clone(), require_auth));

    let api = public_routes.merge(protected_routes).fallback(api_not_found);

    Router::new()
        .nest("/api", api)
        .route("/gateway", get(realtime::ws_upgrade))
        .with_state(state)
}

async fn api_not_found() -> ApiError {
    ApiError::NotFound("Not found".into())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode, header};
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use bookloop_core::IdentityResolver;
    use bookloop_db::Database;

    use super::*;

    fn state() -> AppState {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let assistant = Assistant::new(AssistantConfig::default()).unwrap();
        AppStateInner::new(db, IdentityResolver::new("router-test", 7), assistant, false)
    }

    fn app() -> Router {
        router(state())
    }

    async fn call(
        app: &Router,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    /// Returns (token, user id).
    async fn signup(app: &Router, name: &str) -> (String, String) {
        let (status, body) = call(
            app,
            Method::POST,
            "/api/signup",
            None,
            Some(json!({
                "name": name,
                "email": format!("{}@example.com", name.to_lowercase()),
                "password": "correct horse",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        (
            body["token"].as_str().unwrap().to_string(),
            body["user"]["id"].as_str().unwrap().to_string(),
        )
    }

    async fn list_book(app: &Router, token: &str, title: &str) -> String {
        let (status, body) = call(
            app,
            Method::POST,
            "/api/books",
            Some(token),
            Some(json!({ "title": title, "author": "Someone" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn accounts_signup_login_and_me() {
        let app = app();
        let (token, id) = signup(&app, "Ada").await;

        let (status, me) = call(&app, Method::GET, "/api/me", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(me["id"], id.as_str());
        assert_eq!(me["email"], "ada@example.com");
        assert!(me.get("password").is_none());

        let (status, _) = call(
            &app,
            Method::POST,
            "/api/signup",
            None,
            Some(json!({ "name": "Ada 2", "email": "ADA@example.com", "password": "x" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, body) = call(
            &app,
            Method::POST,
            "/api/login",
            None,
            Some(json!({ "email": "ada@example.com", "password": "wrong" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Invalid credentials");

        let (status, body) = call(
            &app,
            Method::POST,
            "/api/login",
            None,
            Some(json!({ "email": "ada@example.com", "password": "correct horse" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"]["name"], "Ada");

        let (status, _) = call(&app, Method::POST, "/api/signup", None, Some(json!({ "name": "x" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(&app, Method::GET, "/api/me", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _) = call(&app, Method::GET, "/api/me", Some("forged"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn profile_edits_are_self_only() {
        let app = app();
        let (ada, ada_id) = signup(&app, "Ada").await;
        let (_, bob_id) = signup(&app, "Bob").await;

        let (status, body) = call(
            &app,
            Method::PUT,
            &format!("/api/users/{ada_id}"),
            Some(&ada),
            Some(json!({ "bio": "Reads a lot" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["bio"], "Reads a lot");
        assert_eq!(body["name"], "Ada");

        let (status, _) = call(
            &app,
            Method::PUT,
            &format!("/api/users/{bob_id}"),
            Some(&ada),
            Some(json!({ "name": "Mallory" })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, users) = call(&app, Method::GET, "/api/users", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(users.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn books_are_owned_by_their_lister() {
        let app = app();
        let (ada, ada_id) = signup(&app, "Ada").await;
        let (bob, _) = signup(&app, "Bob").await;

        let (status, _) = call(
            &app,
            Method::POST,
            "/api/books",
            Some(&ada),
            Some(json!({ "title": "Dune" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let first = list_book(&app, &ada, "Dune").await;
        let second = list_book(&app, &ada, "Emma").await;

        let (status, books) = call(&app, Method::GET, "/api/books", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(books[0]["id"], second.as_str());
        assert_eq!(books[1]["id"], first.as_str());
        assert_eq!(books[1]["ownerId"], ada_id.as_str());
        assert_eq!(books[1]["genre"], "General");
        assert_eq!(books[1]["status"], "available");

        let (_, found) = call(&app, Method::GET, "/api/books?q=dun", None, None).await;
        assert_eq!(found.as_array().unwrap().len(), 1);

        let path = format!("/api/books/{first}");
        let (status, _) = call(&app, Method::PUT, &path, Some(&bob), Some(json!({ "title": "Mine" }))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = call(&app, Method::DELETE, &path, Some(&bob), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = call(&app, Method::PUT, &path, Some(&ada), Some(json!({ "location": "Lyon" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["location"], "Lyon");
        assert_eq!(body["title"], "Dune");

        let (status, body) = call(&app, Method::DELETE, &path, Some(&ada), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        let (status, _) = call(&app, Method::DELETE, &path, Some(&ada), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn favorites_toggle_on_and_off() {
        let app = app();
        let (ada, _) = signup(&app, "Ada").await;
        let book = list_book(&app, &ada, "Dune").await;

        let toggle = json!({ "bookId": book });
        let (_, body) = call(&app, Method::POST, "/api/users/favorite", Some(&ada), Some(toggle.clone())).await;
        assert_eq!(body["favorites"], json!([book]));

        let (_, books) = call(&app, Method::GET, "/api/users/favorites", Some(&ada), None).await;
        assert_eq!(books[0]["title"], "Dune");

        let (_, body) = call(&app, Method::POST, "/api/users/favorite", Some(&ada), Some(toggle)).await;
        assert_eq!(body["favorites"], json!([]));

        let (status, _) = call(&app, Method::POST, "/api/users/favorite", Some(&ada), Some(json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn exchange_then_chat_over_http() {
        let app = app();
        let (u1, u1_id) = signup(&app, "Owner").await;
        let (u2, _) = signup(&app, "Requester").await;
        let book = list_book(&app, &u1, "Dune").await;

        let (status, _) = call(
            &app,
            Method::POST,
            "/api/exchanges",
            Some(&u1),
            Some(json!({ "bookId": book })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, created) = call(
            &app,
            Method::POST,
            "/api/exchanges",
            Some(&u2),
            Some(json!({ "bookId": book, "message": "hi" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["exchange"]["status"], "requested");
        assert_eq!(created["exchange"]["ownerId"], u1_id.as_str());
        let exchange_id = created["exchange"]["id"].as_str().unwrap().to_string();
        let conversation_id = created["conversation"]["id"].as_str().unwrap().to_string();
        let messages = format!("/api/conversations/{conversation_id}/messages");

        let (status, _) = call(&app, Method::POST, &messages, Some(&u2), Some(json!({ "text": "" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(
            &app,
            Method::PUT,
            &format!("/api/exchanges/{exchange_id}/accept"),
            Some(&u2),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, accepted) = call(
            &app,
            Method::PUT,
            &format!("/api/exchanges/{exchange_id}/accept"),
            Some(&u1),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(accepted["status"], "accepted");
        assert!(accepted["acceptedAt"].is_string());

        let (status, _) = call(
            &app,
            Method::PUT,
            &format!("/api/exchanges/{exchange_id}/decline"),
            Some(&u1),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, books) = call(&app, Method::GET, "/api/books", None, None).await;
        assert_eq!(books[0]["status"], "reserved");

        let (status, sent) = call(&app, Method::POST, &messages, Some(&u2), Some(json!({ "text": "thanks!" }))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(sent["senderName"], "Requester");

        let (_, listed) = call(&app, Method::GET, "/api/conversations", Some(&u1), None).await;
        assert_eq!(listed[0]["id"], conversation_id.as_str());
        assert_eq!(listed[0]["unreadCount"], 1);
        assert_eq!(listed[0]["lastMessage"]["text"], "thanks!");
        assert_eq!(listed[0]["participantsInfo"].as_array().unwrap().len(), 2);

        let (status, body) = call(
            &app,
            Method::PUT,
            &format!("/api/conversations/{conversation_id}/read"),
            Some(&u1),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);

        let (_, listed) = call(&app, Method::GET, "/api/conversations", Some(&u1), None).await;
        assert_eq!(listed[0]["unreadCount"], 0);

        let (_, history) = call(&app, Method::GET, &messages, Some(&u1), None).await;
        assert_eq!(history.as_array().unwrap().len(), 1);

        let (_, exchanges) = call(&app, Method::GET, "/api/exchanges", Some(&u2), None).await;
        assert_eq!(exchanges.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn strangers_cannot_open_or_read_conversations() {
        let app = app();
        let (u1, u1_id) = signup(&app, "Owner").await;
        let (u2, _) = signup(&app, "Requester").await;
        let (u3, _) = signup(&app, "Stranger").await;
        let book = list_book(&app, &u1, "Dune").await;

        let (_, created) = call(
            &app,
            Method::POST,
            "/api/exchanges",
            Some(&u2),
            Some(json!({ "bookId": book })),
        )
        .await;
        let conversation_id = created["conversation"]["id"].as_str().unwrap().to_string();

        let (status, body) = call(
            &app,
            Method::POST,
            "/api/conversations",
            Some(&u3),
            Some(json!({ "otherUserId": u1_id, "bookId": book })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "Start an exchange for this book to open a private chat.");

        let (status, _) = call(&app, Method::POST, "/api/conversations", Some(&u3), Some(json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let hidden = call(
            &app,
            Method::GET,
            &format!("/api/conversations/{conversation_id}/messages"),
            Some(&u3),
            None,
        )
        .await;
        let missing = call(
            &app,
            Method::GET,
            &format!("/api/conversations/{}/messages", uuid::Uuid::new_v4()),
            Some(&u3),
            None,
        )
        .await;
        assert_eq!(hidden.0, StatusCode::NOT_FOUND);
        assert_eq!(hidden, missing);

        let (status, _) = call(
            &app,
            Method::POST,
            &format!("/api/conversations/{conversation_id}/messages"),
            Some(&u3),
            Some(json!({ "text": "let me in" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(
            &app,
            Method::PUT,
            &format!("/api/conversations/{conversation_id}/read"),
            Some(&u3),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        // The requester reaches the same conversation through the explicit route.
        let (status, reopened) = call(
            &app,
            Method::POST,
            "/api/conversations",
            Some(&u2),
            Some(json!({ "otherUserId": u1_id, "bookId": book })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(reopened["id"], conversation_id.as_str());
    }

    #[tokio::test]
    async fn online_users_reflect_identified_connections() {
        let state = state();
        let app = router(state.clone());
        let (token, user_id) = signup(&app, "Watcher").await;

        let (status, _) = call(&app, Method::GET, "/api/users/online", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = call(&app, Method::GET, "/api/users/online", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["online"], json!([]));

        let (conn, _rx) = state.dispatcher.register();
        state.dispatcher.identify(conn, user_id.parse().unwrap());
        let (_, body) = call(&app, Method::GET, "/api/users/online", Some(&token), None).await;
        assert_eq!(body["online"], json!([user_id]));

        state.dispatcher.disconnect(conn);
        let (_, body) = call(&app, Method::GET, "/api/users/online", Some(&token), None).await;
        assert_eq!(body["online"], json!([]));
    }

    #[tokio::test]
    async fn malformed_ids_read_as_not_found() {
        let app = app();
        let (token, _) = signup(&app, "Reader").await;

        let malformed = call(&app, Method::GET, "/api/conversations/abc123/messages", Some(&token), None).await;
        let unknown = call(
            &app,
            Method::GET,
            &format!("/api/conversations/{}/messages", uuid::Uuid::new_v4()),
            Some(&token),
            None,
        )
        .await;
        assert_eq!(malformed.0, StatusCode::NOT_FOUND);
        assert_eq!(malformed, unknown);

        let (status, body) = call(
            &app,
            Method::POST,
            "/api/conversations/abc123/messages",
            Some(&token),
            Some(json!({ "text": "hello?" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Conversation not found");

        let (status, body) = call(&app, Method::PUT, "/api/exchanges/abc123/accept", Some(&token), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Exchange not found");

        let (status, body) = call(&app, Method::DELETE, "/api/books/not-a-uuid", Some(&token), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Book not found");
    }

    #[tokio::test]
    async fn assistant_and_unknown_api_paths() {
        let app = app();

        let (status, _) = call(&app, Method::POST, "/api/ai-help", None, Some(json!({ "question": " " }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = call(
            &app,
            Method::POST,
            "/api/ai-help",
            None,
            Some(json!({ "question": "How do I register?" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["answer"].as_str().unwrap().starts_with("To create an account"));

        let (status, body) = call(&app, Method::GET, "/api/nope", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Not found");
    }
}
