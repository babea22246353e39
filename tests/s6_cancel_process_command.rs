mod support;

use lime_channel_core::{ChannelError, Command, CommandMethod};
use support::{paired_channels, test_builder};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn canceled_process_command_ignores_a_late_response() {
    let (client, server) = paired_channels(test_builder(), test_builder()).await;
    let cancel = CancellationToken::new();

    let request = Command::request(CommandMethod::Get, "/account").with_id("c3");
    let call = {
        let client = client.clone();
        let request = request.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { client.process_command(request, &cancel).await })
    };
    tokio::task::yield_now().await;
    cancel.cancel();

    let err = call.await.unwrap().unwrap_err();
    assert!(matches!(err, ChannelError::Canceled));

    // A response arriving after cancellation is silently dropped.
    let seen = server
        .receive_command(&CancellationToken::new())
        .await
        .unwrap();
    let send_cancel = CancellationToken::new();
    server
        .send_command(seen.success_response(None), &send_cancel)
        .await
        .unwrap();

    let read_cancel = CancellationToken::new();
    tokio::spawn({
        let token = read_cancel.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            token.cancel();
        }
    });
    let late = client.receive_command(&read_cancel).await;
    assert!(late.is_err(), "late response must not reach ReceiveCommand");
}
