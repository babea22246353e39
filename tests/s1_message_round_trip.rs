mod support;

use lime_channel_core::Message;
use support::{paired_channels, test_builder};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn message_round_trip() {
    let (client, server) = paired_channels(test_builder(), test_builder()).await;
    let cancel = CancellationToken::new();

    client
        .send_message(Message::new(serde_json::json!("hi")).with_id("m1"), &cancel)
        .await
        .unwrap();

    let received = server.receive_message(&cancel).await.unwrap();
    assert_eq!(received.header.id.as_deref(), Some("m1"));
    assert_eq!(received.content, serde_json::json!("hi"));
}
