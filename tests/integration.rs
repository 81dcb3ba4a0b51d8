//! Integration tests for linerpc.
//!
//! Each test wires a real [`RpcServer`] and [`RpcClient`] back to back
//! over an in-memory duplex stream and exercises the full path: framing,
//! dispatch, correlation, and teardown.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use linerpc::{
    DispatchTable, Request, RpcClient, RpcError, RpcServer, ServerConnection, ServerHook,
};
use serde_json::json;

fn demo_table() -> DispatchTable {
    let mut table = DispatchTable::new();
    table
        .bind("add", |(a, b): (i64, i64)| async move { Ok(a + b) })
        .unwrap();
    table
        .bind("echo", |(s,): (String,)| async move { Ok(s) })
        .unwrap();
    table.bind("ping", |_: ()| async move { Ok(()) }).unwrap();
    table
        .bind("boom", |_: ()| async move {
            Err::<(), _>(RpcError::Protocol("deliberate failure".into()))
        })
        .unwrap();
    table
        .bind("stall", |_: ()| async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok("finally")
        })
        .unwrap();
    table
}

fn connect(server: &RpcServer) -> RpcClient {
    let (server_io, client_io) = tokio::io::duplex(16 * 1024);
    server.attach(server_io, "mem");
    RpcClient::connect(client_io)
}

#[tokio::test]
async fn test_invoke_round_trip() {
    let server = RpcServer::new(demo_table());
    let client = connect(&server);

    let sum: i64 = client.invoke("add", vec![json!(2), json!(3)]).await.unwrap();
    assert_eq!(sum, 5);

    let echoed: String = client.invoke("echo", vec![json!("hello")]).await.unwrap();
    assert_eq!(echoed, "hello");

    // Void success carries no result field and decodes into ().
    client.invoke_unit("ping", vec![]).await.unwrap();

    assert_eq!(client.pending_count(), 0);
}

#[tokio::test]
async fn test_unknown_method_surfaces_remote_error() {
    let server = RpcServer::new(demo_table());
    let client = connect(&server);

    let result: Result<i64, _> = client.invoke("no_such_method", vec![]).await;
    match result {
        Err(RpcError::Remote { code, message }) => {
            assert_eq!(code, -32601);
            assert!(message.contains("no_such_method"));
        }
        other => panic!("expected remote error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_handler_failure_surfaces_remote_error() {
    let server = RpcServer::new(demo_table());
    let client = connect(&server);

    let result = client.invoke_unit("boom", vec![]).await;
    match result {
        Err(RpcError::Remote { code, message }) => {
            assert_eq!(code, -1);
            assert!(message.contains("Handler 'boom' failed"));
            assert!(message.contains("deliberate failure"));
        }
        other => panic!("expected remote error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_notifications_are_delivered_and_silent() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut table = demo_table();
    {
        let seen = Arc::clone(&seen);
        table
            .bind("record", move |(v,): (i64,)| {
                let seen = Arc::clone(&seen);
                async move {
                    seen.lock().unwrap().push(v);
                    Ok(())
                }
            })
            .unwrap();
    }

    let server = RpcServer::new(table);
    let client = connect(&server);

    client.notify("record", vec![json!(7)]).await.unwrap();
    // A failing notification produces no response line either; the next
    // invoke must correlate cleanly, proving nothing stray was written.
    client.notify("boom", vec![]).await.unwrap();

    let sum: i64 = client.invoke("add", vec![json!(1), json!(1)]).await.unwrap();
    assert_eq!(sum, 2);
    assert_eq!(*seen.lock().unwrap(), vec![7]);
}

#[tokio::test]
async fn test_concurrent_invokes_correlate_independently() {
    // Records the id of every inbound call as the server sees it.
    #[derive(Clone)]
    struct IdCapture(Arc<Mutex<Vec<u64>>>);
    impl ServerHook for IdCapture {
        fn on_message(&self, _client: &ServerConnection, frame: &[u8]) {
            if let Ok(request) = serde_json::from_slice::<Request>(frame) {
                if let Some(id) = request.id {
                    self.0.lock().unwrap().push(id);
                }
            }
        }
    }

    let seen_ids = Arc::new(Mutex::new(Vec::new()));
    let server = RpcServer::new(demo_table()).with_hook(IdCapture(Arc::clone(&seen_ids)));
    let client = Arc::new(connect(&server));

    let tasks: Vec<_> = (0..16i64)
        .map(|i| {
            let client = Arc::clone(&client);
            tokio::spawn(async move {
                let sum: i64 = client
                    .invoke("add", vec![json!(i), json!(1000)])
                    .await
                    .unwrap();
                assert_eq!(sum, i + 1000);
            })
        })
        .collect();

    for task in tasks {
        task.await.unwrap();
    }
    assert_eq!(client.pending_count(), 0);

    // Every issued id was distinct on the wire.
    let seen = seen_ids.lock().unwrap();
    assert_eq!(seen.len(), 16);
    assert_eq!(seen.iter().copied().collect::<HashSet<_>>().len(), 16);
}

#[tokio::test]
async fn test_timeout_cleans_up_and_connection_survives() {
    let server = RpcServer::new(demo_table());
    let (server_io, client_io) = tokio::io::duplex(16 * 1024);
    server.attach(server_io, "mem");
    let client = RpcClient::builder()
        .invoke_timeout(Duration::from_millis(50))
        .connect(client_io);

    let result = client.invoke::<String>("stall", vec![]).await;
    assert!(matches!(result, Err(RpcError::Timeout)));
    assert_eq!(client.pending_count(), 0);

    // The stalled handler eventually answers; the late response finds no
    // pending slot and is dropped without disturbing later calls.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let sum: i64 = client.invoke("add", vec![json!(4), json!(4)]).await.unwrap();
    assert_eq!(sum, 8);
    assert_eq!(client.pool().outstanding(), 0);
}

#[tokio::test]
async fn test_client_drop_detaches_server_connection() {
    let server = RpcServer::new(demo_table());
    let client = connect(&server);
    assert_eq!(server.connection_count(), 1);

    let sum: i64 = client.invoke("add", vec![json!(1), json!(2)]).await.unwrap();
    assert_eq!(sum, 3);

    drop(client);
    for _ in 0..200 {
        if server.connection_count() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(server.connection_count(), 0);
}

#[tokio::test]
async fn test_close_fails_every_pending_call() {
    let mut table = DispatchTable::new();
    table
        .bind("never", |_: ()| async move {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        })
        .unwrap();

    let server = RpcServer::new(table);
    let (server_io, client_io) = tokio::io::duplex(16 * 1024);
    server.attach(server_io, "mem");
    let client = Arc::new(
        RpcClient::builder()
            .invoke_timeout(Duration::from_secs(60))
            .connect(client_io),
    );

    let calls: Vec<_> = (0..4)
        .map(|_| {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.invoke_unit("never", vec![]).await })
        })
        .collect();

    while client.pending_count() < 4 {
        tokio::task::yield_now().await;
    }
    client.close();

    for call in calls {
        assert!(matches!(call.await.unwrap(), Err(RpcError::ConnectionClosed)));
    }
    assert!(!client.is_connected());
}

#[tokio::test]
async fn test_server_shutdown_disconnects_clients() {
    let server = RpcServer::new(demo_table());
    let (server_io, client_io) = tokio::io::duplex(16 * 1024);
    // Drop our handle so the registry holds the only reference; once the
    // server lets go, the transport closes and the client sees EOF.
    drop(server.attach(server_io, "mem"));

    let client = Arc::new(
        RpcClient::builder()
            .invoke_timeout(Duration::from_secs(60))
            .connect(client_io),
    );

    let call = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.invoke_unit("stall", vec![]).await })
    };
    while client.pending_count() < 1 {
        tokio::task::yield_now().await;
    }

    server.shutdown();

    assert!(matches!(call.await.unwrap(), Err(RpcError::ConnectionClosed)));
    client.closed().await;
    assert!(!client.is_connected());

    for _ in 0..200 {
        if server.connection_count() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(server.connection_count(), 0);
}

#[tokio::test]
async fn test_pools_drain_after_burst() {
    let server = RpcServer::new(demo_table());
    let client = connect(&server);

    for i in 0..50i64 {
        let sum: i64 = client.invoke("add", vec![json!(i), json!(i)]).await.unwrap();
        assert_eq!(sum, 2 * i);
    }

    // Every frame buffer rented on either side has been released.
    assert_eq!(client.pool().outstanding(), 0);
    assert_eq!(server.pool().outstanding(), 0);
}

#[tokio::test]
async fn test_raw_garbage_does_not_poison_the_session() {
    use tokio::io::AsyncWriteExt;

    let server = RpcServer::new(demo_table());
    let (server_io, client_io) = tokio::io::duplex(16 * 1024);
    server.attach(server_io, "mem");

    // Split the client side so we can inject malformed lines alongside a
    // real client session's traffic.
    let (read_half, mut write_half) = tokio::io::split(client_io);
    write_half.write_all(b"not json at all\n\n").await.unwrap();
    write_half
        .write_all(b"{\"jsonrpc\":\"2.0\",\"method\":\"add\",\"params\":[20,22],\"id\":9}\n")
        .await
        .unwrap();

    use tokio::io::AsyncBufReadExt;
    let mut lines = tokio::io::BufReader::new(read_half).lines();
    let line = lines.next_line().await.unwrap().unwrap();
    assert_eq!(line, r#"{"jsonrpc":"2.0","id":9,"result":42}"#);
    assert_eq!(server.connection_count(), 1);
}
