// Router assembly. Mirrors `auth_server::interface_adapters::routes`'s flat
// `Router::new().route(...).with_state(state)` shape.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use crate::interface_adapters::{http, socket_hub, state::AppState};

pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/matchmaking/requests", post(http::submit_match_request))
        .route("/matchmaking/requests/current", get(http::get_current_match_request))
        .route("/matchmaking/requests/{id}", axum::routing::delete(http::cancel_match_request))
        .route("/matchmaking/history", get(http::get_match_history))
        .route("/lobbies/{id}", get(http::get_lobby))
        .route("/lobbies/{id}/join", post(http::join_lobby))
        .route("/lobbies/{id}/leave", post(http::leave_lobby))
        .route("/lobbies/{id}/ready", post(http::set_ready))
        .route("/lobbies/{id}/close", post(http::close_lobby))
        .route(
            "/chat/lobby/{id}/messages",
            get(http::get_messages).post(http::send_message),
        )
        .route("/ws", get(socket_hub::ws_handler))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::criteria::{GameMode, Region};
    use crate::domain::user::{User, UserStatus};
    use crate::frameworks::config::Config;
    use crate::frameworks::persistence::memory::MemoryPersistence;
    use crate::interface_adapters::socket_hub::SocketHub;
    use crate::use_cases::lobby_engine::LobbyEngine;
    use crate::use_cases::lock_manager::LockManager;
    use crate::use_cases::matchmaking_service::{MatchmakingConfig, MatchmakingService};
    use crate::use_cases::notification_trigger::LoggingNotificationSink;
    use crate::use_cases::queue_manager::QueueManager;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use tower::ServiceExt;
    use uuid::Uuid;

    struct FixedClock(AtomicU64);
    impl crate::domain::ports::Clock for FixedClock {
        fn now_ms(&self) -> u64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    async fn build_test_app() -> (Router, Arc<MemoryPersistence>, Uuid) {
        let persistence = Arc::new(MemoryPersistence::new());
        let clock: Arc<dyn crate::domain::ports::Clock> = Arc::new(FixedClock(AtomicU64::new(1_000)));

        let user_id = Uuid::new_v4();
        persistence
            .seed_user(User {
                id: user_id,
                username: "pilot".to_string(),
                status: UserStatus::Active,
                game_profiles: vec![],
                last_active: 0,
            })
            .await;

        let queue = Arc::new(QueueManager::new());
        let locks = Arc::new(LockManager::new());
        let lobby_engine = LobbyEngine::new(
            persistence.lobbies_arc(),
            persistence.chats_arc(),
            Arc::clone(&clock),
        );
        let lobby_engine = Arc::new(lobby_engine);
        let socket_hub = SocketHub::new(
            persistence.clone() as Arc<dyn crate::domain::ports::Persistence>,
            Arc::clone(&lobby_engine),
            Arc::clone(&clock),
        );
        socket_hub.spawn_lobby_event_bridge(&lobby_engine);

        let matchmaking = MatchmakingService::new(
            queue,
            locks,
            Arc::clone(&lobby_engine),
            persistence.clone() as Arc<dyn crate::domain::ports::Persistence>,
            Arc::new(LoggingNotificationSink),
            socket_hub.clone() as Arc<dyn crate::domain::ports::RealtimeEmitter>,
            clock,
            MatchmakingConfig::default(),
        );

        let state = Arc::new(AppState {
            matchmaking,
            lobby_engine,
            persistence: persistence.clone() as Arc<dyn crate::domain::ports::Persistence>,
            socket_hub,
            config: Config::for_tests(),
        });

        (app(state), persistence, user_id)
    }

    #[tokio::test]
    async fn submit_match_request_without_auth_header_returns_401() {
        let (app, _persistence, _user_id) = build_test_app().await;

        let request = Request::builder()
            .method("POST")
            .uri("/matchmaking/requests")
            .header("content-type", "application/json")
            .body(Body::from(
                r#"{"criteria":{"games":[],"game_mode":"casual","group_size":{"min":2,"max":2},"regions":["NA"],"region_preference":"strict","languages":["en"],"language_preference":"strict","skill_preference":"any","scheduled_time":null}}"#,
            ))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn submit_match_request_with_empty_games_returns_400() {
        let (app, _persistence, user_id) = build_test_app().await;

        let body = format!(
            r#"{{"criteria":{{"games":[],"game_mode":"{mode}","group_size":{{"min":2,"max":2}},"regions":["NA"],"region_preference":"strict","languages":["en"],"language_preference":"strict","skill_preference":"any","scheduled_time":null}}}}"#,
            mode = "casual"
        );

        let request = Request::builder()
            .method("POST")
            .uri("/matchmaking/requests")
            .header("content-type", "application/json")
            .header("x-user-id", user_id.to_string())
            .body(Body::from(body))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let payload: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(payload["message"], "at least one game must be specified");
    }

    #[tokio::test]
    async fn get_lobby_returns_404_for_unknown_id() {
        let (app, _persistence, _user_id) = build_test_app().await;

        let request = Request::builder()
            .method("GET")
            .uri(format!("/lobbies/{}", Uuid::new_v4()))
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let (app, ..) = build_test_app().await;

        let request = Request::builder()
            .method("GET")
            .uri("/does-not-exist")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    // Keep an explicit reference to GameMode/Region so the imports above
    // stay meaningful if the criteria JSON literals above are reworked.
    #[allow(dead_code)]
    fn _unused(_: GameMode, _: Region) {}
}
