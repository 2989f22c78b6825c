//! WebSocket 消息流程的端到端测试。

mod support;

use serde_json::json;
use tokio_tungstenite::tungstenite::Message;

use support::{
    connect_ws, next_event, open_conversation, register, send_ws, spawn_app, wait_for_event,
};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn message_reaches_recipient_and_sender_gets_ack() {
    let app = spawn_app().await;
    let (alice_token, alice_id) = register(&app, "alice").await;
    let (bob_token, bob_id) = register(&app, "bob").await;
    let conversation_id = open_conversation(&app, &alice_token, &bob_id).await;

    let mut alice = connect_ws(&app, &alice_token).await;
    let mut bob = connect_ws(&app, &bob_token).await;

    send_ws(
        &mut alice,
        json!({
            "type": "send_message",
            "conversation_id": conversation_id,
            "client_msg_id": "tmp-1",
            "content": "你好 bob",
        }),
    )
    .await;

    // 对方收到完整消息
    let received = wait_for_event(&mut bob, "message_received").await;
    assert_eq!(received["message"]["content"], "你好 bob");
    assert_eq!(received["message"]["sender_id"], alice_id.as_str());
    assert_eq!(
        received["message"]["conversation_id"],
        conversation_id.as_str()
    );

    // 发送方只拿到确认，用 client_msg_id 对账
    let accepted = wait_for_event(&mut alice, "message_accepted").await;
    assert_eq!(accepted["client_msg_id"], "tmp-1");
    assert!(accepted["message_id"].as_str().is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn duplicate_resend_acks_same_message_without_second_delivery() {
    let app = spawn_app().await;
    let (alice_token, _) = register(&app, "alice").await;
    let (bob_token, bob_id) = register(&app, "bob").await;
    let conversation_id = open_conversation(&app, &alice_token, &bob_id).await;

    let mut alice = connect_ws(&app, &alice_token).await;
    let mut bob = connect_ws(&app, &bob_token).await;

    let send = json!({
        "type": "send_message",
        "conversation_id": conversation_id,
        "client_msg_id": "tmp-1",
        "content": "第一条",
    });
    send_ws(&mut alice, send.clone()).await;
    let first = wait_for_event(&mut alice, "message_accepted").await;

    // 模拟确认丢失后的重发
    send_ws(&mut alice, send).await;
    let second = wait_for_event(&mut alice, "message_accepted").await;
    assert_eq!(first["message_id"], second["message_id"]);

    send_ws(
        &mut alice,
        json!({
            "type": "send_message",
            "conversation_id": conversation_id,
            "client_msg_id": "tmp-2",
            "content": "第二条",
        }),
    )
    .await;

    // bob 按顺序收到两条不同的消息，重发没有产生第二次投递
    let received = wait_for_event(&mut bob, "message_received").await;
    assert_eq!(received["message"]["content"], "第一条");
    let received = wait_for_event(&mut bob, "message_received").await;
    assert_eq!(received["message"]["content"], "第二条");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn typing_relays_only_to_joined_connections() {
    let app = spawn_app().await;
    let (alice_token, alice_id) = register(&app, "alice").await;
    let (bob_token, bob_id) = register(&app, "bob").await;
    let conversation_id = open_conversation(&app, &alice_token, &bob_id).await;

    let mut alice = connect_ws(&app, &alice_token).await;
    let mut bob = connect_ws(&app, &bob_token).await;

    send_ws(
        &mut bob,
        json!({ "type": "join", "conversation_id": conversation_id }),
    )
    .await;
    // join 没有回执，用 ping 确认已处理完
    send_ws(&mut bob, json!({ "type": "ping" })).await;
    wait_for_event(&mut bob, "pong").await;

    send_ws(
        &mut alice,
        json!({
            "type": "typing",
            "conversation_id": conversation_id,
            "is_typing": true,
        }),
    )
    .await;

    let typing = wait_for_event(&mut bob, "typing").await;
    assert_eq!(typing["user_id"], alice_id.as_str());
    assert_eq!(typing["is_typing"], true);

    // 发起连接自己收不到 typing：后发一个 ping，先到的必须是 pong
    send_ws(&mut alice, json!({ "type": "ping" })).await;
    let next = next_event(&mut alice).await;
    assert_eq!(next["type"], "pong");

    // 离开会话后不再收到 typing
    send_ws(
        &mut bob,
        json!({ "type": "leave", "conversation_id": conversation_id }),
    )
    .await;
    send_ws(&mut bob, json!({ "type": "ping" })).await;
    wait_for_event(&mut bob, "pong").await;

    send_ws(
        &mut alice,
        json!({
            "type": "typing",
            "conversation_id": conversation_id,
            "is_typing": false,
        }),
    )
    .await;
    send_ws(&mut bob, json!({ "type": "ping" })).await;
    let next = next_event(&mut bob).await;
    assert_eq!(next["type"], "pong");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn malformed_event_returns_error_and_keeps_connection() {
    let app = spawn_app().await;
    let (token, _) = register(&app, "alice").await;
    let mut ws = connect_ws(&app, &token).await;

    use futures_util::SinkExt;
    ws.send(Message::Text("这不是 JSON".into()))
        .await
        .expect("send");

    let error = wait_for_event(&mut ws, "error").await;
    assert_eq!(error["code"], "BAD_EVENT");

    // 连接还活着
    send_ws(&mut ws, json!({ "type": "ping" })).await;
    wait_for_event(&mut ws, "pong").await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn join_is_rejected_for_non_participant() {
    let app = spawn_app().await;
    let (alice_token, _) = register(&app, "alice").await;
    let (_, bob_id) = register(&app, "bob").await;
    let (charlie_token, _) = register(&app, "charlie").await;
    let conversation_id = open_conversation(&app, &alice_token, &bob_id).await;

    let mut charlie = connect_ws(&app, &charlie_token).await;
    send_ws(
        &mut charlie,
        json!({ "type": "join", "conversation_id": conversation_id }),
    )
    .await;

    let error = wait_for_event(&mut charlie, "error").await;
    assert_eq!(error["code"], "JOIN_REJECTED");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn upgrade_requires_valid_token() {
    let app = spawn_app().await;

    let url = format!("{}/api/ws?token=bogus", app.ws_base);
    assert!(tokio_tungstenite::connect_async(url).await.is_err());

    let url = format!("{}/api/ws?token=", app.ws_base);
    assert!(tokio_tungstenite::connect_async(url).await.is_err());
}
