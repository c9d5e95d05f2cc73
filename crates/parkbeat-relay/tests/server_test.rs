use axum_test::TestServer;
use clap::Parser;
use parkbeat_relay::configure_server;
use parkbeat_relay_cli::CliArgs;
use parkbeat_relay_types::events::{ServerEvent, decode_server_frame};
use pretty_assertions::assert_eq;

fn memory_args() -> CliArgs {
    CliArgs::parse_from(["parkbeat-relay", "--memory"])
}

#[tokio::test]
async fn rest_surface_is_wired() {
    let (router, _state) = configure_server(&memory_args()).unwrap();
    let server = TestServer::new(router);

    let missing = server
        .get("/api/tree/getProject")
        .add_query_param("id", "nope")
        .await;
    missing.assert_status(axum::http::StatusCode::NOT_FOUND);

    let killed = server
        .post("/api/tree/killActiveSockets")
        .json(&serde_json::json!({"socketId": "never-connected"}))
        .await;
    killed.assert_status_ok();

    let metrics = server.get("/internal-backstage/metrics").await;
    metrics.assert_status_ok();
}

#[tokio::test]
async fn socket_handshake_ping_and_snapshot_flow() {
    let (router, _state) = configure_server(&memory_args()).unwrap();
    let server = TestServer::builder().http_transport().build(router);

    let mut socket = server
        .get_websocket("/api/socket")
        .await
        .into_websocket()
        .await;

    // the server speaks first
    let hello = decode_server_frame(&socket.receive_text().await).unwrap();
    let socket_id = match hello {
        ServerEvent::ProvideSocketId(id) => id,
        other => panic!("expected provideSocketId, got {other:?}"),
    };
    assert!(!socket_id.as_str().is_empty());

    socket.send_text(r#"{"event":"ping"}"#).await;
    let pong = decode_server_frame(&socket.receive_text().await).unwrap();
    assert_eq!(pong, ServerEvent::Pong);

    socket
        .send_text(r#"{"event":"subscribe","data":{"geohash":"dr5rs","shouldSubscribe":true}}"#)
        .await;
    let snapshot = decode_server_frame(&socket.receive_text().await).unwrap();
    match snapshot {
        ServerEvent::Subscribe(tuple) => {
            assert_eq!(tuple.0.geohash, "dr5rs");
            assert!(tuple.1.is_empty());
            assert!(tuple.2.is_empty());
        }
        other => panic!("expected subscribe snapshot, got {other:?}"),
    }
}
