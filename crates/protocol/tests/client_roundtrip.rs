#![cfg(unix)]

use gcq_protocol::{
    ClientError, Command, DaemonClient, Endpoint, ErrorKind, NotifyResult, Request, Response,
    WireError,
};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;

async fn serve_one_connection(listener: UnixListener) {
    let (stream, _) = listener.accept().await.expect("accept");
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();
    while let Some(line) = lines.next_line().await.expect("read") {
        let request: Request = serde_json::from_str(&line).expect("request json");
        let response = match request.kind.as_str() {
            "notify" => Response::ok(request.id, json!({"accepted": 2})),
            _ => Response::err(
                request.id,
                WireError::new(ErrorKind::UnknownCommand, "nope"),
            ),
        };
        let out = serde_json::to_string(&response).expect("encode") + "\n";
        write_half.write_all(out.as_bytes()).await.expect("write");
    }
}

#[tokio::test]
async fn client_reuses_connection_and_surfaces_remote_errors() {
    let dir = tempfile::tempdir().expect("tempdir");
    let socket = dir.path().join("d.sock");
    let listener = UnixListener::bind(&socket).expect("bind");
    let server = tokio::spawn(serve_one_connection(listener));

    let mut client = DaemonClient::connect(&Endpoint::Unix(socket))
        .await
        .expect("connect");
    let accepted: NotifyResult = client
        .call_typed(Command::Notify, json!({"paths": ["a", "b"]}))
        .await
        .expect("notify");
    assert_eq!(accepted.accepted, 2);

    let err = client
        .call(Command::Status, json!({}))
        .await
        .expect_err("server rejects status");
    match err {
        ClientError::Remote(wire) => assert_eq!(wire.kind, ErrorKind::UnknownCommand),
        other => panic!("unexpected error: {other}"),
    }

    drop(client);
    server.await.expect("server task");
}

#[tokio::test]
async fn connect_to_missing_socket_fails() {
    let dir = tempfile::tempdir().expect("tempdir");
    let result = DaemonClient::connect(&Endpoint::Unix(dir.path().join("absent.sock"))).await;
    assert!(matches!(result, Err(ClientError::Connect { .. })));
}
