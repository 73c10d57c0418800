//! API parity tests — validates that response shapes match what the
//! original HTTP surface served to its clients.

/// `GET /status` returns `{ authenticated, message }`.
#[test]
fn test_status_response_shape() {
    let status = serde_json::json!({
        "authenticated": false,
        "message": "Browser not initialized",
    });

    assert!(status["authenticated"].is_boolean());
    assert!(status["message"].is_string());
}

/// `GET /models` returns `{ models: [{ id, name, description }] }`.
#[test]
fn test_models_response_shape() {
    let models = serde_json::json!({
        "models": [
            { "id": "qwen-max-latest", "name": "qwen-max-latest", "description": "Model qwen-max-latest" }
        ]
    });

    assert!(models["models"].is_array());
    let entry = &models["models"][0];
    assert!(entry["id"].is_string());
    assert!(entry["name"].is_string());
    assert!(entry["description"].is_string());
}

/// `POST /chat` failure payloads carry `{ error, chatId }` with an optional
/// `details` and, for session poisoning only, `verification: true`.
#[test]
fn test_chat_failure_shape() {
    let failure = serde_json::json!({
        "error": "Browser not initialized",
        "chatId": "b7e4c9d2",
    });
    assert!(failure["error"].is_string());
    assert!(failure["chatId"].is_string());
    assert!(failure.get("verification").is_none());

    let poisoned = serde_json::json!({
        "error": "Verification required. The browser was relaunched in visible mode.",
        "verification": true,
        "chatId": "b7e4c9d2",
    });
    assert_eq!(poisoned["verification"], true);
}

/// `POST /chat` success payloads carry `{ content, usage, chatId }`.
#[test]
fn test_chat_completion_shape() {
    let completion = serde_json::json!({
        "content": "Hello there",
        "usage": { "total_tokens": 12 },
        "chatId": "b7e4c9d2",
    });

    assert!(completion["content"].is_string());
    assert!(completion["usage"].is_object());
    assert!(completion["chatId"].is_string());
}

/// `GET /chats` entries use camelCase count fields.
#[test]
fn test_chat_list_shape() {
    let listing = serde_json::json!({
        "chats": [
            {
                "id": "b7e4c9d2",
                "name": "New chat 2026-08-30 12:00:00",
                "created": 1756560000000i64,
                "messageCount": 4,
                "userMessageCount": 2,
            }
        ]
    });

    assert!(listing["chats"].is_array());
    let chat = &listing["chats"][0];
    assert!(chat["id"].is_string());
    assert!(chat["name"].is_string());
    assert!(chat["created"].is_number());
    assert!(chat["messageCount"].is_number());
    assert!(chat["userMessageCount"].is_number());
}

/// `GET /chats/:chatId` wraps the full record under `history`.
#[test]
fn test_chat_history_shape() {
    let response = serde_json::json!({
        "chatId": "b7e4c9d2",
        "history": {
            "id": "b7e4c9d2",
            "name": "New chat 2026-08-30 12:00:00",
            "created": 1756560000000i64,
            "messages": [
                { "id": "m1", "role": "user", "content": "hi", "timestamp": 1756560000i64, "chat_type": "t2t" }
            ],
        },
    });

    assert!(response["history"]["messages"].is_array());
    let message = &response["history"]["messages"][0];
    assert!(message["role"].is_string());
    assert!(message["content"].is_string());
    assert!(message["timestamp"].is_number());
}

/// `POST /chats/cleanup` returns `{ success, deletedCount, deletedChats }`.
#[test]
fn test_cleanup_response_shape() {
    let result = serde_json::json!({
        "success": true,
        "deletedCount": 2,
        "deletedChats": ["a1", "b2"],
    });

    assert!(result["success"].is_boolean());
    assert!(result["deletedCount"].is_number());
    assert!(result["deletedChats"].is_array());
}

/// `PUT /chats/:chatId/rename` echoes the trimmed name back.
#[test]
fn test_rename_response_shape() {
    let response = serde_json::json!({
        "success": true,
        "chatId": "b7e4c9d2",
        "name": "Renamed chat",
    });

    assert!(response["success"].is_boolean());
    assert!(response["chatId"].is_string());
    assert!(response["name"].is_string());
}
