//! TCP peer: serves a few methods on every accepted connection, or connects
//! to a running peer and makes one call.
//!
//! ```text
//! cargo run --example tcp-peer -- serve 127.0.0.1:9650
//! cargo run --example tcp-peer -- call 127.0.0.1:9650 add '[2, 3]'
//! ```
//!
//! Connections are duplex: while serving, each connection can also call
//! back into the peer that opened it.

use std::time::Duration;

use anyhow::{Context, bail};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};
use turul_json_rpc_stream::prelude::*;

const DEFAULT_ADDR: &str = "127.0.0.1:9650";

fn handler() -> Handler {
    Handler::builder()
        .method("ping", |_cx| async { Ok("pong") })
        .method("add", |cx| async move {
            let (a, b): (f64, f64) = cx.params()?;
            Ok::<_, HandlerError>(a + b)
        })
        .method("echo", |cx| async move { cx.params::<Value>() })
        .build()
}

async fn serve(addr: &str) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    let handler = handler();
    info!(addr = %addr, methods = ?handler.methods(), "Listening");

    loop {
        let (stream, peer) = listener.accept().await?;
        let handler = handler.clone();
        tokio::spawn(async move {
            info!(peer = %peer, "Connection opened");
            let (reader, writer) = stream.into_split();
            let session = match SessionBuilder::new(reader, writer)
                .with_client()
                .with_server(handler)
                .build()
            {
                Ok(session) => session,
                Err(err) => {
                    warn!(peer = %peer, error = %err, "Failed to start session");
                    return;
                }
            };
            match session.run().await {
                Ok(()) => info!(peer = %peer, "Connection closed"),
                Err(err) => warn!(peer = %peer, error = %err, "Connection failed"),
            }
        });
    }
}

async fn call(addr: &str, method: &str, params: Option<&str>) -> anyhow::Result<()> {
    let params: Value = match params {
        Some(raw) => serde_json::from_str(raw).context("params must be JSON")?,
        None => Value::Null,
    };

    let stream = TcpStream::connect(addr)
        .await
        .with_context(|| format!("failed to connect to {addr}"))?;
    let (reader, writer) = stream.into_split();
    let session = SessionBuilder::new(reader, writer)
        .with_client()
        .with_server(handler())
        .build()?;
    let Some(client) = session.client() else {
        bail!("session has no client role");
    };
    let driver = tokio::spawn(session.run());

    let cx = CallContext::with_timeout(Duration::from_secs(5));
    let result: Value = client.call(&cx, method, &params).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);

    driver.abort();
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        None | Some("serve") => serve(args.get(1).map_or(DEFAULT_ADDR, String::as_str)).await,
        Some("call") => {
            let addr = args.get(1).map_or(DEFAULT_ADDR, String::as_str);
            let Some(method) = args.get(2) else {
                bail!("usage: tcp-peer call <addr> <method> [params]");
            };
            call(addr, method, args.get(3).map(String::as_str)).await
        }
        Some(other) => bail!("unknown command {other:?}; expected `serve` or `call`"),
    }
}
