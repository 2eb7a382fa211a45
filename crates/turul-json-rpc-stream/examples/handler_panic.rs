//! A handler that panics is answered with Internal Error and the session
//! keeps serving. Build with `--release` to check the release profile keeps
//! unwinding enabled; the process exits non-zero if isolation fails.
//!
//! ```text
//! cargo run --release --example handler-panic
//! ```

use anyhow::{Context, ensure};
use serde_json::Value;
use tokio::io::{AsyncWriteExt, duplex, split};
use tracing::info;
use turul_json_rpc_stream::framing::FrameReader;
use turul_json_rpc_stream::prelude::*;

fn explode() -> Result<(), HandlerError> {
    panic!("handler bug")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let handler = Handler::builder()
        .method("boom", |_cx| async { explode() })
        .method("ping", |_cx| async { Ok("pong") })
        .build();

    let (local, remote) = duplex(64 * 1024);
    let (reader, writer) = split(local);
    let session = SessionBuilder::new(reader, writer)
        .with_server(handler)
        .build()?;
    let driver = tokio::spawn(session.run());

    let (peer_reader, mut peer_writer) = split(remote);
    peer_writer
        .write_all(b"{\"jsonrpc\":\"2.0\",\"method\":\"boom\",\"id\":1}\n")
        .await?;
    peer_writer
        .write_all(b"{\"jsonrpc\":\"2.0\",\"method\":\"ping\",\"id\":2}\n")
        .await?;
    peer_writer.shutdown().await?;

    let mut reader = FrameReader::new(peer_reader);
    let mut replies = Vec::new();
    let mut buf = Vec::new();
    while reader.read_frame(&mut buf).await? {
        let reply: Value = serde_json::from_slice(&buf)?;
        info!(reply = %reply, "Received reply");
        replies.push(reply);
    }
    driver.await?.context("session failed")?;

    let boom = replies
        .iter()
        .find(|reply| reply["id"] == 1)
        .context("no reply for the panicking call")?;
    ensure!(boom["error"]["code"] == -32603, "unexpected reply {boom}");
    ensure!(
        replies.iter().any(|reply| reply["result"] == "pong"),
        "session stopped serving after the panic"
    );

    println!("panic isolated: {boom}");
    Ok(())
}
