//! Elasticsearch sink against an in-process HTTP stub.
#![cfg(feature = "elasticsearch")]

use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use chainsink_core::alloy_primitives::B256;
use chainsink_core::{CancellationToken, Event, FlushPolicy, Sink, SinkError, TxStatus};
use chainsink_sinks::elasticsearch::{self, ElasticsearchConfig};

#[derive(Debug, Clone)]
struct Request {
    method: String,
    path: String,
    body: String,
}

type Log = Arc<Mutex<Vec<Request>>>;

/// Serve canned cluster responses; `/_bulk` answers with `bulk_response`.
async fn stub_cluster(bulk_response: &'static str) -> (String, Log) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    let log: Log = Arc::default();
    let seen = Arc::clone(&log);

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else { return };
            let seen = Arc::clone(&seen);
            tokio::spawn(async move {
                let _ = serve(stream, seen, bulk_response).await;
            });
        }
    });
    (url, log)
}

async fn serve(mut stream: TcpStream, seen: Log, bulk_response: &str) -> std::io::Result<()> {
    let mut raw = Vec::new();
    let mut buf = [0u8; 4096];
    let header_end = loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        raw.extend_from_slice(&buf[..n]);
        if let Some(pos) = raw.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&raw[..header_end]).to_string();
    let content_length = head
        .lines()
        .filter_map(|l| l.split_once(':'))
        .find(|(k, _)| k.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.trim().parse::<usize>().ok())
        .unwrap_or(0);
    while raw.len() < header_end + content_length {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        raw.extend_from_slice(&buf[..n]);
    }

    let mut request_line = head.lines().next().unwrap_or_default().split_whitespace();
    let method = request_line.next().unwrap_or_default().to_string();
    let path = request_line.next().unwrap_or_default().to_string();
    let body = String::from_utf8_lossy(&raw[header_end..]).to_string();

    let response = if path.starts_with("/_bulk") {
        bulk_response
    } else if path.starts_with("/_index_template") {
        r#"{"acknowledged":true}"#
    } else {
        r#"{"version":{"number":"8.11.0"}}"#
    };
    seen.lock().unwrap().push(Request { method, path, body });

    let reply = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        response.len(),
        response
    );
    stream.write_all(reply.as_bytes()).await?;
    stream.shutdown().await
}

fn event(i: u8) -> Event {
    Event {
        block_number: 1_000 + i as u64,
        tx_hash: B256::repeat_byte(i),
        tx_index: i as u64,
        status: TxStatus::Success,
        gas_used: 30_000,
        logs: vec![],
    }
}

fn config(url: String) -> ElasticsearchConfig {
    ElasticsearchConfig::new([url])
        .with_network("sepolia")
        .with_flush_policy(FlushPolicy::default().with_batch_size(2))
}

#[tokio::test]
async fn batch_is_sent_as_one_bulk_request() {
    let (url, log) = stub_cluster(r#"{"errors":false,"items":[]}"#).await;
    let mut sink = elasticsearch::sink(config(url));
    sink.initialize().await.unwrap();

    sink.write(&[event(1), event(2), event(3)], &CancellationToken::new())
        .await
        .unwrap();
    sink.close().await.unwrap();

    let requests = log.lock().unwrap().clone();
    assert_eq!(requests[0].method, "GET");
    assert_eq!(requests[1].method, "PUT");
    assert_eq!(requests[1].path, "/_index_template/usdc-events-template");

    let bulks: Vec<&Request> = requests.iter().filter(|r| r.path == "/_bulk").collect();
    assert_eq!(bulks.len(), 1);
    let lines: Vec<&str> = bulks[0].body.lines().collect();
    assert_eq!(lines.len(), 6);

    let action: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
    assert!(action["index"]["_index"]
        .as_str()
        .unwrap()
        .starts_with("usdc-events-"));
    let doc: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
    assert_eq!(doc["network"], "sepolia");
    assert_eq!(doc["block_number"], 1_001);

    assert_eq!(sink.statistics().total_events, 3);
    assert_eq!(sink.statistics().total_batches, 1);
}

#[tokio::test]
async fn rejected_items_fail_the_flush() {
    let (url, _log) = stub_cluster(
        r#"{"errors":true,"items":[{"index":{"status":429,"error":{"type":"es_rejected_execution_exception","reason":"queue full"}}}]}"#,
    )
    .await;
    let mut sink = elasticsearch::sink(config(url));
    sink.initialize().await.unwrap();

    let err = sink
        .write(&[event(1), event(2)], &CancellationToken::new())
        .await
        .unwrap_err();
    match err {
        SinkError::Flush { records, reason, .. } => {
            assert_eq!(records, 2);
            assert!(reason.contains("queue full"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(sink.statistics().errors, 1);
    assert_eq!(sink.statistics().pending, 2);

    // The retained batch is retried (and rejected again) on close.
    assert!(sink.close().await.is_err());
}

#[tokio::test]
async fn unreachable_cluster_fails_initialize() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let mut sink = elasticsearch::sink(config(url));
    let err = sink.initialize().await.unwrap_err();
    assert!(err.is_init());
    sink.close().await.unwrap();
}
