//! Shared integration-test harness: wires two channels over one
//! in-memory transport pair and drives both through the session
//! handshake, analogous to the teacher's `BenchmarkRunner::run` harness.

use std::sync::Arc;
use std::time::Duration;

use lime_channel_core::envelope::{Session, SessionState};
use lime_channel_core::transport::memory;
use lime_channel_core::{Channel, ChannelBuilder};
use tokio_util::sync::CancellationToken;

pub fn test_builder() -> ChannelBuilder {
    ChannelBuilder {
        send_timeout: Duration::from_secs(2),
        consume_timeout: Duration::from_secs(2),
        close_timeout: Duration::from_secs(1),
        ..ChannelBuilder::default()
    }
}

/// Builds two channels over a loopback transport pair and drives both
/// through `new -> negotiating -> authenticating -> established`.
pub async fn paired_channels(
    client_builder: ChannelBuilder,
    server_builder: ChannelBuilder,
) -> (Arc<Channel>, Arc<Channel>) {
    let (client_transport, server_transport) = memory::pair();
    let client = client_builder.build(Arc::new(client_transport)).unwrap();
    let server = server_builder.build(Arc::new(server_transport)).unwrap();

    let cancel = CancellationToken::new();
    for state in [
        SessionState::Negotiating,
        SessionState::Authenticating,
        SessionState::Established,
    ] {
        client
            .send_session(Session::new(state), &cancel)
            .await
            .unwrap();
        server
            .send_session(Session::new(state), &cancel)
            .await
            .unwrap();
    }

    (client, server)
}
