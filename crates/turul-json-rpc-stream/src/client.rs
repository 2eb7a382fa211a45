//! Outbound calls and response correlation.
//!
//! Every call is registered as a pending call under a fresh correlation id
//! before its frame is written. The read side resolves pending calls as
//! responses arrive, in whatever order the peer sends them.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::JSONRPC_VERSION;
use crate::cancellation::CallContext;
use crate::error::{ClientError, ProtocolError};
use crate::framing::FrameWriter;
use crate::message::{Incoming, Request, Response, is_malformed};
use crate::validation::{SharedValidator, validate_composite};

/// Width of generated correlation ids
pub const ID_WIDTH: usize = 6;

const BASE36_DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

#[derive(Default)]
struct PendingCalls {
    calls: HashMap<String, oneshot::Sender<Response>>,
    closed: bool,
}

/// Removes its pending call when dropped, whichever way `call` exits
struct PendingGuard<'a> {
    core: &'a ClientCore,
    id: String,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.core.pending.lock().calls.remove(&self.id);
    }
}

/// Client half of a connection: issues calls and resolves their responses
pub struct ClientCore {
    writer: Arc<FrameWriter>,
    validator: SharedValidator,
    counter: AtomicU64,
    pending: Mutex<PendingCalls>,
}

impl ClientCore {
    pub fn new(writer: Arc<FrameWriter>, validator: SharedValidator) -> Self {
        Self {
            writer,
            validator,
            counter: AtomicU64::new(0),
            pending: Mutex::new(PendingCalls::default()),
        }
    }

    /// Next correlation id: a counter in base 36, zero-padded to [`ID_WIDTH`]
    fn next_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{:0>width$}", encode_base36(n), width = ID_WIDTH)
    }

    fn register(&self, id: &str) -> Result<oneshot::Receiver<Response>, ClientError> {
        let mut pending = self.pending.lock();
        if pending.closed {
            return Err(ClientError::Closed);
        }
        if pending.calls.contains_key(id) {
            return Err(ClientError::DuplicateRequest(id.to_string()));
        }
        let (tx, rx) = oneshot::channel();
        pending.calls.insert(id.to_string(), tx);
        Ok(rx)
    }

    /// Register `id` and write `request`.
    ///
    /// Registration happens first, so a colliding id fails without I/O.
    async fn request_send(
        &self,
        id: &str,
        request: &Request,
    ) -> Result<(PendingGuard<'_>, oneshot::Receiver<Response>), ClientError> {
        let rx = self.register(id)?;
        let guard = PendingGuard {
            core: self,
            id: id.to_string(),
        };
        let frame = serde_json::to_vec(request)?;
        self.send_frame(frame).await?;
        Ok((guard, rx))
    }

    /// Write from a detached task so an abandoned call never leaves a torn
    /// frame on the stream
    async fn send_frame(&self, frame: Vec<u8>) -> io::Result<()> {
        let writer = Arc::clone(&self.writer);
        tokio::spawn(async move { writer.write_frame(&frame).await })
            .await
            .map_err(io::Error::other)?
    }

    fn encode_params<P>(&self, params: &P) -> Result<Option<Value>, ClientError>
    where
        P: Serialize + ?Sized,
    {
        let params = serde_json::to_value(params)?;
        validate_composite(self.validator.as_ref(), &params)?;
        Ok((!params.is_null()).then_some(params))
    }

    pub async fn call<P, R>(
        &self,
        cx: &CallContext,
        method: &str,
        params: &P,
    ) -> Result<R, ClientError>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        cx.check()?;
        let params = self.encode_params(params)?;
        let id = self.next_id();
        let request = Request::new(method, params, Some(Value::String(id.clone())));

        debug!(method = %method, id = %id, "Sending request");
        let (_guard, rx) = self.request_send(&id, &request).await?;

        let response = tokio::select! {
            biased;
            response = rx => response.map_err(|_| ClientError::Closed)?,
            err = cx.done() => {
                debug!(method = %method, id = %id, error = %err, "Call abandoned");
                return Err(err);
            }
        };

        if let Some(error) = response.error {
            return Err(ClientError::Rpc(error));
        }
        let result = response.result.unwrap_or(Value::Null);
        validate_composite(self.validator.as_ref(), &result)
            .map_err(ClientError::InvalidResponse)?;
        Ok(serde_json::from_value(result)?)
    }

    pub async fn notify<P>(&self, method: &str, params: &P) -> Result<(), ClientError>
    where
        P: Serialize + ?Sized,
    {
        if self.pending.lock().closed {
            return Err(ClientError::Closed);
        }
        let params = self.encode_params(params)?;
        let frame = serde_json::to_vec(&Request::new(method, params, None))?;
        debug!(method = %method, "Sending notification");
        self.send_frame(frame).await?;
        Ok(())
    }

    /// Deliver a response to its pending call.
    ///
    /// Only malformed JSON is an error. Responses of the wrong shape, with
    /// a foreign id or for a call that already finished are dropped; a
    /// second response for the same id therefore never reaches the caller.
    pub fn resolve(&self, incoming: Incoming<'_, Response>) -> Result<(), ProtocolError> {
        let response = match incoming.decode() {
            Ok(response) => response,
            Err(err) if is_malformed(&err) => return Err(ProtocolError(err)),
            Err(err) => {
                debug!(error = %err, "Discarding undecodable response");
                return Ok(());
            }
        };

        if response.jsonrpc != JSONRPC_VERSION {
            debug!(version = %response.jsonrpc, "Discarding response with unsupported version");
            return Ok(());
        }
        let Some(id) = response.id.as_str().map(str::to_owned) else {
            debug!(id = %response.id, "Discarding response with non-string id");
            return Ok(());
        };

        let sender = self.pending.lock().calls.remove(&id);
        match sender {
            Some(tx) => {
                if tx.send(response).is_err() {
                    debug!(id = %id, "Caller stopped waiting before the response arrived");
                }
            }
            None => debug!(id = %id, "Discarding response with unmatched id"),
        }
        Ok(())
    }

    /// Fail every pending call with [`ClientError::Closed`] and refuse new ones
    pub(crate) fn close(&self) {
        let mut pending = self.pending.lock();
        pending.closed = true;
        if !pending.calls.is_empty() {
            warn!(count = pending.calls.len(), "Closing with calls still pending");
        }
        pending.calls.clear();
    }

    /// Number of calls awaiting a response
    pub fn pending_count(&self) -> usize {
        self.pending.lock().calls.len()
    }
}

fn encode_base36(mut n: u64) -> String {
    if n == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while n > 0 {
        digits.push(BASE36_DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    digits.reverse();
    String::from_utf8(digits).unwrap_or_default()
}

/// Handle for issuing calls over a session. Cheap to clone.
#[derive(Clone)]
pub struct Client {
    core: Arc<ClientCore>,
}

impl Client {
    pub(crate) fn new(core: Arc<ClientCore>) -> Self {
        Self { core }
    }

    /// Call `method` and decode its result.
    ///
    /// Resolves with the peer's result, the peer's error object as
    /// [`ClientError::Rpc`], or whatever ends the wait first: cancellation,
    /// deadline or session closure.
    pub async fn call<P, R>(
        &self,
        cx: &CallContext,
        method: &str,
        params: &P,
    ) -> Result<R, ClientError>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.core.call(cx, method, params).await
    }

    /// Send a notification; no response is expected
    pub async fn notify<P>(&self, method: &str, params: &P) -> Result<(), ClientError>
    where
        P: Serialize + ?Sized,
    {
        self.core.notify(method, params).await
    }

    pub fn pending_count(&self) -> usize {
        self.core.pending_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancellation::CancellationHandle;
    use crate::error::JsonRpcErrorObject;
    use crate::framing::FrameReader;
    use crate::test_support::{Broken, Recorder};
    use crate::validation::{ValidationError, noop};
    use serde_json::json;
    use std::time::Duration;
    use tokio::io::{DuplexStream, duplex};

    fn core_with_recorder() -> (Arc<ClientCore>, Recorder) {
        let recorder = Recorder::default();
        let writer = Arc::new(FrameWriter::new(recorder.clone()));
        (Arc::new(ClientCore::new(writer, noop())), recorder)
    }

    fn core_with_peer() -> (Arc<ClientCore>, FrameReader<DuplexStream>) {
        let (local, remote) = duplex(64 * 1024);
        let writer = Arc::new(FrameWriter::new(local));
        (
            Arc::new(ClientCore::new(writer, noop())),
            FrameReader::new(remote),
        )
    }

    async fn next_request(peer: &mut FrameReader<DuplexStream>) -> Request {
        let mut buf = Vec::new();
        assert!(peer.read_frame(&mut buf).await.unwrap());
        serde_json::from_slice(&buf).unwrap()
    }

    #[test]
    fn test_ids_are_padded_base36() {
        let (core, _) = core_with_recorder();
        assert_eq!(core.next_id(), "000001");
        for _ in 2..10 {
            core.next_id();
        }
        assert_eq!(core.next_id(), "00000a");
        for _ in 11..36 {
            core.next_id();
        }
        assert_eq!(core.next_id(), "000010");
    }

    #[tokio::test]
    async fn test_request_send_writes_and_registers() {
        let (core, recorder) = core_with_recorder();
        let request = Request::new("foo", None, Some(json!("testid")));

        let (guard, _rx) = core.request_send("testid", &request).await.unwrap();

        let sent: Request = serde_json::from_slice(recorder.contents().trim_ascii_end()).unwrap();
        assert_eq!(sent, request);
        assert_eq!(core.pending_count(), 1);

        drop(guard);
        assert_eq!(core.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_id_fails_without_io() {
        let (core, recorder) = core_with_recorder();
        let _existing = core.register("dupe").unwrap();

        let request = Request::new("m", None, Some(json!("dupe")));
        let err = core.request_send("dupe", &request).await.err().unwrap();

        assert!(err.to_string().contains("request dupe is already sent"));
        assert!(recorder.contents().is_empty());
        assert_eq!(core.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_resolve_delivers_to_pending_call() {
        let (core, _) = core_with_recorder();
        let rx = core.register("resp").unwrap();

        let response = Response::success(json!("resp"), json!("ok"));
        core.resolve(Incoming::Decoded(response.clone())).unwrap();

        assert_eq!(rx.await.unwrap(), response);
        assert_eq!(core.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_resolve_ignores_unmatched_and_foreign_ids() {
        let (core, _) = core_with_recorder();
        let mut rx = core.register("000001").unwrap();

        core.resolve(Incoming::Raw(br#"{"jsonrpc":"2.0","result":1,"id":123}"#))
            .unwrap();
        core.resolve(Incoming::Raw(br#"{"jsonrpc":"2.0","result":1,"id":"zzz"}"#))
            .unwrap();
        core.resolve(Incoming::Raw(br#"{"jsonrpc":"1.0","result":1,"id":"000001"}"#))
            .unwrap();
        core.resolve(Incoming::Raw(br#"[1,2,3]"#)).unwrap();

        assert!(rx.try_recv().is_err());
        assert_eq!(core.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_resolve_reports_malformed_json() {
        let (core, _) = core_with_recorder();
        let err = core.resolve(Incoming::Raw(b"bad")).unwrap_err();
        assert!(err.0.is_syntax());
    }

    #[tokio::test]
    async fn test_call_encode_error() {
        let (core, recorder) = core_with_recorder();
        let mut params = HashMap::new();
        params.insert((1, 2), 3);

        let err = core
            .call::<_, Value>(&CallContext::new(), "m", &params)
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::Json(_)));
        assert!(recorder.contents().is_empty());
    }

    #[tokio::test]
    async fn test_call_with_cancelled_context() {
        let (core, recorder) = core_with_recorder();
        let handle = CancellationHandle::new();
        handle.cancel_with("gave up");

        let err = core
            .call::<_, Value>(&CallContext::with_cancellation(handle), "m", &())
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::Cancelled(ref cause) if cause == "gave up"));
        assert!(recorder.contents().is_empty());
        assert_eq!(core.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_call_returns_result() {
        let (core, mut peer) = core_with_peer();

        let caller = {
            let core = Arc::clone(&core);
            tokio::spawn(async move {
                core.call::<_, String>(&CallContext::new(), "echo", &json!({"text": "hi"}))
                    .await
            })
        };

        let request = next_request(&mut peer).await;
        assert_eq!(request.method, "echo");
        assert_eq!(request.params, Some(json!({"text": "hi"})));
        let id = request.id.unwrap();
        core.resolve(Incoming::Decoded(Response::success(id, json!("hi"))))
            .unwrap();

        assert_eq!(caller.await.unwrap().unwrap(), "hi");
        assert_eq!(core.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_calls_receive_their_own_responses() {
        let (core, mut peer) = core_with_peer();

        let call_a = {
            let core = Arc::clone(&core);
            tokio::spawn(async move { core.call::<_, String>(&CallContext::new(), "a", &()).await })
        };
        let first = next_request(&mut peer).await;
        let call_b = {
            let core = Arc::clone(&core);
            tokio::spawn(async move { core.call::<_, String>(&CallContext::new(), "b", &()).await })
        };
        let second = next_request(&mut peer).await;
        assert_ne!(first.id, second.id);

        // Answer in reverse order
        for request in [second, first] {
            let result = json!(format!("result-{}", request.method));
            core.resolve(Incoming::Decoded(Response::success(
                request.id.unwrap(),
                result,
            )))
            .unwrap();
        }

        assert_eq!(call_a.await.unwrap().unwrap(), "result-a");
        assert_eq!(call_b.await.unwrap().unwrap(), "result-b");
    }

    #[tokio::test]
    async fn test_error_response_becomes_rpc_error() {
        let (core, mut peer) = core_with_peer();

        let caller = {
            let core = Arc::clone(&core);
            tokio::spawn(async move { core.call::<_, Value>(&CallContext::new(), "x", &()).await })
        };
        let request = next_request(&mut peer).await;
        core.resolve(Incoming::Decoded(Response::error(
            request.id.unwrap(),
            JsonRpcErrorObject::application(-32000, "Custom application error", None),
        )))
        .unwrap();

        let err = caller.await.unwrap().unwrap_err();
        assert_eq!(err.to_string(), "RPC error -32000: Custom application error");
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_abandons_call_and_drops_late_reply() {
        let (core, mut peer) = core_with_peer();

        let caller = {
            let core = Arc::clone(&core);
            tokio::spawn(async move {
                core.call::<_, Value>(
                    &CallContext::with_timeout(Duration::from_secs(1)),
                    "slow",
                    &(),
                )
                .await
            })
        };
        let request = next_request(&mut peer).await;

        let err = caller.await.unwrap().unwrap_err();
        assert!(matches!(err, ClientError::DeadlineExceeded));
        assert_eq!(core.pending_count(), 0);

        // A late reply is harmless
        core.resolve(Incoming::Decoded(Response::success(
            request.id.unwrap(),
            json!(1),
        )))
        .unwrap();
    }

    #[tokio::test]
    async fn test_close_fails_pending_and_future_calls() {
        let (core, mut peer) = core_with_peer();

        let caller = {
            let core = Arc::clone(&core);
            tokio::spawn(async move { core.call::<_, Value>(&CallContext::new(), "m", &()).await })
        };
        next_request(&mut peer).await;
        core.close();

        assert!(matches!(caller.await.unwrap(), Err(ClientError::Closed)));
        let err = core
            .call::<_, Value>(&CallContext::new(), "m", &())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Closed));
        assert!(matches!(core.notify("n", &()).await, Err(ClientError::Closed)));
    }

    #[tokio::test]
    async fn test_write_failure_fails_call_and_clears_pending() {
        let writer = Arc::new(FrameWriter::new(Broken));
        let core = ClientCore::new(writer, noop());

        let err = core
            .call::<_, Value>(&CallContext::new(), "m", &json!([1]))
            .await
            .unwrap_err();

        match err {
            ClientError::Io(io) => assert_eq!(io.kind(), std::io::ErrorKind::BrokenPipe),
            other => panic!("expected IO error, got {other:?}"),
        }
        assert_eq!(core.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_request_validation_happens_before_io() {
        let recorder = Recorder::default();
        let writer = Arc::new(FrameWriter::new(recorder.clone()));
        let validator: SharedValidator = Arc::new(|value: &Value| {
            if value.get("name").is_some() {
                Ok(())
            } else {
                Err(ValidationError::new("name is required"))
            }
        });
        let core = ClientCore::new(writer, validator);

        let err = core
            .call::<_, Value>(&CallContext::new(), "greet", &json!({"age": 30}))
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::Validation(_)));
        assert!(recorder.contents().is_empty());
        assert_eq!(core.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_result_is_reported() {
        let (local, remote) = duplex(64 * 1024);
        let validator: SharedValidator = Arc::new(|value: &Value| {
            if value.get("ok").is_some() {
                Ok(())
            } else {
                Err(ValidationError::new("ok is required"))
            }
        });
        let core = Arc::new(ClientCore::new(
            Arc::new(FrameWriter::new(local)),
            validator,
        ));
        let mut peer = FrameReader::new(remote);

        let caller = {
            let core = Arc::clone(&core);
            tokio::spawn(async move { core.call::<_, Value>(&CallContext::new(), "m", &()).await })
        };
        let request = next_request(&mut peer).await;
        core.resolve(Incoming::Decoded(Response::success(
            request.id.unwrap(),
            json!({"unexpected": true}),
        )))
        .unwrap();

        let err = caller.await.unwrap().unwrap_err();
        assert!(matches!(err, ClientError::InvalidResponse(_)));
        assert!(err.to_string().starts_with("invalid response from server"));
    }

    #[tokio::test]
    async fn test_notify_writes_request_without_id() {
        let (core, recorder) = core_with_recorder();
        core.notify("log", &json!({"level": "info"})).await.unwrap();

        let sent: Request = serde_json::from_slice(recorder.contents().trim_ascii_end()).unwrap();
        assert!(sent.is_notification());
        assert_eq!(sent.method, "log");
        assert_eq!(core.pending_count(), 0);
    }
}
