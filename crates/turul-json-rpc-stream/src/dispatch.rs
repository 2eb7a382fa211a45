//! Routing of inbound frames to the active role(s) of a session.

use std::sync::Arc;

use tracing::debug;

use crate::client::ClientCore;
use crate::error::ProtocolError;
use crate::message::{Incoming, Message, is_malformed};
use crate::server::ServerCore;

/// Which engine(s) receive inbound frames.
///
/// Single-role sessions hand the raw frame straight to their engine; only a
/// duplex session pays for decoding the superset envelope to classify it.
pub(crate) enum Dispatcher {
    Client(Arc<ClientCore>),
    Server(ServerCore),
    Duplex {
        client: Arc<ClientCore>,
        server: ServerCore,
    },
}

impl Dispatcher {
    pub(crate) async fn dispatch(&self, frame: &[u8]) -> Result<(), ProtocolError> {
        match self {
            Self::Client(client) => client.resolve(Incoming::Raw(frame)),
            Self::Server(server) => server.request(Incoming::Raw(frame)).await,
            Self::Duplex { client, server } => {
                let message: Message = match serde_json::from_slice(frame) {
                    Ok(message) => message,
                    Err(err) if is_malformed(&err) => return Err(ProtocolError(err)),
                    Err(err) => {
                        debug!(error = %err, "Discarding undecodable frame");
                        return Ok(());
                    }
                };
                if message.is_request() {
                    server.request(Incoming::Decoded(message.into_request())).await
                } else {
                    client.resolve(Incoming::Decoded(message.into_response()))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancellation::CallContext;
    use crate::framing::{FrameReader, FrameWriter};
    use crate::handler::Handler;
    use crate::message::{Request, Response};
    use crate::test_support::Recorder;
    use crate::validation::noop;
    use serde_json::{Value, json};
    use tokio::io::duplex;

    fn echo_handler() -> Handler {
        Handler::builder()
            .method("echo", |cx| async move { cx.params::<Value>() })
            .build()
    }

    #[tokio::test]
    async fn test_duplex_routes_requests_to_server() {
        let recorder = Recorder::default();
        let writer = Arc::new(FrameWriter::new(recorder.clone()));
        let dispatcher = Dispatcher::Duplex {
            client: Arc::new(ClientCore::new(writer.clone(), noop())),
            server: ServerCore::new(writer, echo_handler(), noop()),
        };

        dispatcher
            .dispatch(br#"{"jsonrpc":"2.0","method":"echo","params":[1],"id":"x"}"#)
            .await
            .unwrap();

        let response: Response =
            serde_json::from_slice(recorder.contents().trim_ascii_end()).unwrap();
        assert_eq!(response.result, Some(json!([1])));
        assert_eq!(response.id, json!("x"));
    }

    #[tokio::test]
    async fn test_duplex_routes_responses_to_client() {
        let (local, remote) = duplex(64 * 1024);
        let writer = Arc::new(FrameWriter::new(local));
        let client = Arc::new(ClientCore::new(writer.clone(), noop()));
        let dispatcher = Arc::new(Dispatcher::Duplex {
            client: client.clone(),
            server: ServerCore::new(writer, echo_handler(), noop()),
        });

        let call = tokio::spawn({
            let client = client.clone();
            async move {
                client
                    .call::<_, String>(&CallContext::new(), "remote", &())
                    .await
            }
        });

        let mut peer = FrameReader::new(remote);
        let mut buf = Vec::new();
        assert!(peer.read_frame(&mut buf).await.unwrap());
        let request: Request = serde_json::from_slice(&buf).unwrap();

        let reply = serde_json::to_vec(&Response::success(request.id.unwrap(), json!("done")))
            .unwrap();
        dispatcher.dispatch(&reply).await.unwrap();

        assert_eq!(call.await.unwrap().unwrap(), "done");
    }

    #[tokio::test]
    async fn test_duplex_malformed_is_fatal_and_wrong_shape_ignored() {
        let recorder = Recorder::default();
        let writer = Arc::new(FrameWriter::new(recorder.clone()));
        let dispatcher = Dispatcher::Duplex {
            client: Arc::new(ClientCore::new(writer.clone(), noop())),
            server: ServerCore::new(writer, echo_handler(), noop()),
        };

        assert!(dispatcher.dispatch(b"{\"jsonrpc\":").await.is_err());
        dispatcher.dispatch(b"42").await.unwrap();
        dispatcher.dispatch(br#"{"method":7}"#).await.unwrap();
        assert!(recorder.contents().is_empty());
    }

    #[tokio::test]
    async fn test_client_only_forwards_raw_frames() {
        let recorder = Recorder::default();
        let writer = Arc::new(FrameWriter::new(recorder));
        let dispatcher = Dispatcher::Client(Arc::new(ClientCore::new(writer, noop())));

        dispatcher
            .dispatch(br#"{"jsonrpc":"2.0","result":1,"id":"000001"}"#)
            .await
            .unwrap();
        assert!(dispatcher.dispatch(b"}{").await.is_err());
    }
}
