mod support;

#[tokio::test]
async fn unknown_route_returns_404() {
    let base_url = support::ensure_server();
    let client = reqwest::Client::new();

    let res = client
        .get(format!("{base_url}/does-not-exist"))
        .send()
        .await
        .expect("request should succeed");

    assert_eq!(res.status(), reqwest::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn submit_match_request_without_auth_header_returns_401() {
    let base_url = support::ensure_server();
    let client = reqwest::Client::new();

    let payload = serde_json::json!({
        "criteria": {
            "games": [{ "game_id": uuid::Uuid::new_v4(), "weight": 10 }],
            "game_mode": "casual",
            "group_size": { "min": 2, "max": 4 },
            "regions": ["NA"],
            "region_preference": "strict",
            "languages": ["en"],
            "language_preference": "strict",
            "skill_preference": "any",
            "scheduled_time": null,
        }
    });

    let res = client
        .post(format!("{base_url}/matchmaking/requests"))
        .json(&payload)
        .send()
        .await
        .expect("request should succeed");

    assert_eq!(res.status(), reqwest::StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn get_lobby_returns_404_for_unknown_id() {
    let base_url = support::ensure_server();
    let client = reqwest::Client::new();

    let res = client
        .get(format!("{base_url}/lobbies/{}", uuid::Uuid::new_v4()))
        .send()
        .await
        .expect("request should succeed");

    assert_eq!(res.status(), reqwest::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn websocket_upgrade_without_token_is_rejected() {
    let base_url = support::ensure_server();
    let ws_url = base_url.replacen("http://", "ws://", 1);
    let err = tokio_tungstenite::connect_async(format!("{ws_url}/ws"))
        .await
        .expect_err("connect without a token query param should be rejected");
    let _ = err;
}
