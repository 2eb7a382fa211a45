//! Session driver: one sequential read loop per connection, with every
//! frame dispatched on its own task.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, warn};

use crate::client::{Client, ClientCore};
use crate::config::SessionConfig;
use crate::dispatch::Dispatcher;
use crate::error::{ProtocolError, SessionError};
use crate::framing::{FrameReader, FrameWriter};
use crate::handler::Handler;
use crate::pool::BufferPool;
use crate::server::ServerCore;
use crate::validation::{SharedValidator, Validator, noop};

/// Builder for a [`Session`]
pub struct SessionBuilder<R> {
    reader: R,
    writer: Arc<FrameWriter>,
    config: SessionConfig,
    validator: SharedValidator,
    handler: Option<Handler>,
    client: bool,
}

impl<R> SessionBuilder<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    pub fn new<W>(reader: R, writer: W) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self {
            reader,
            writer: Arc::new(FrameWriter::new(writer)),
            config: SessionConfig::default(),
            validator: noop(),
            handler: None,
            client: false,
        }
    }

    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Structural validation applied to outbound params, inbound results
    /// and decoded handler params
    pub fn with_validator<V>(mut self, validator: V) -> Self
    where
        V: Validator + 'static,
    {
        self.validator = Arc::new(validator);
        self
    }

    /// Answer inbound requests with `handler`
    pub fn with_server(mut self, handler: Handler) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Issue outbound calls; see [`Session::client`]
    pub fn with_client(mut self) -> Self {
        self.client = true;
        self
    }

    pub fn build(self) -> Result<Session<R>, SessionError> {
        let client = self
            .client
            .then(|| Arc::new(ClientCore::new(self.writer.clone(), self.validator.clone())));
        let server = self
            .handler
            .map(|handler| ServerCore::new(self.writer.clone(), handler, self.validator.clone()));

        let dispatcher = match (client.clone(), server) {
            (Some(client), Some(server)) => Dispatcher::Duplex { client, server },
            (Some(client), None) => Dispatcher::Client(client),
            (None, Some(server)) => Dispatcher::Server(server),
            (None, None) => return Err(SessionError::NoRole),
        };

        Ok(Session {
            reader: FrameReader::new(self.reader),
            client,
            dispatcher: Arc::new(dispatcher),
            pool: Arc::new(BufferPool::new(self.config.request_size)),
            admission: self
                .config
                .max_in_flight
                .map(|limit| Arc::new(Semaphore::new(limit.max(1)))),
        })
    }
}

/// One connection acting as client, server or both.
///
/// Obtain the [`Client`] handle before calling [`Session::run`], which
/// consumes the session and drives it until the stream ends.
pub struct Session<R> {
    reader: FrameReader<R>,
    client: Option<Arc<ClientCore>>,
    dispatcher: Arc<Dispatcher>,
    pool: Arc<BufferPool>,
    admission: Option<Arc<Semaphore>>,
}

impl<R> Session<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    /// Handle for outbound calls, if the session has a client role
    pub fn client(&self) -> Option<Client> {
        self.client.clone().map(Client::new)
    }

    /// Read and dispatch frames until the stream ends.
    ///
    /// Returns `Ok(())` on a clean end of stream. A read error or a
    /// malformed frame stops the loop and is returned. Either way the client
    /// role is closed, failing its pending calls, and every dispatch task
    /// has finished before this returns.
    pub async fn run(mut self) -> Result<(), SessionError> {
        let (fatal_tx, mut fatal_rx) = mpsc::unbounded_channel();
        let mut tasks = JoinSet::new();

        let outcome = self.read_loop(&mut tasks, fatal_tx, &mut fatal_rx).await;

        // Nothing can resolve pending calls any more. Close before joining so
        // handlers waiting on their own outbound calls can finish.
        if let Some(client) = &self.client {
            client.close();
        }
        while let Some(joined) = tasks.join_next().await {
            report(joined);
        }

        let outcome = match (outcome, fatal_rx.try_recv()) {
            (Ok(()), Ok(err)) => Err(err.into()),
            (outcome, _) => outcome,
        };
        match &outcome {
            Ok(()) => debug!("Session ended at end of stream"),
            Err(err) => warn!(error = %err, "Session ended with error"),
        }
        outcome
    }

    async fn read_loop(
        &mut self,
        tasks: &mut JoinSet<()>,
        fatal_tx: mpsc::UnboundedSender<ProtocolError>,
        fatal_rx: &mut mpsc::UnboundedReceiver<ProtocolError>,
    ) -> Result<(), SessionError> {
        loop {
            let permit = match &self.admission {
                Some(admission) => tokio::select! {
                    permit = admission.clone().acquire_owned() => match permit {
                        Ok(permit) => Some(permit),
                        Err(_) => return Ok(()),
                    },
                    Some(err) = fatal_rx.recv() => return Err(err.into()),
                },
                None => None,
            };

            let mut buf = self.pool.acquire();
            let read = tokio::select! {
                read = self.reader.read_frame(&mut buf) => read.map_err(SessionError::Io),
                Some(err) = fatal_rx.recv() => Err(err.into()),
            };
            match read {
                Ok(true) => {}
                outcome => {
                    self.pool.release(buf);
                    return outcome.map(|_| ());
                }
            }

            tasks.spawn(dispatch(
                self.dispatcher.clone(),
                self.pool.clone(),
                buf,
                permit,
                fatal_tx.clone(),
            ));
            while let Some(joined) = tasks.try_join_next() {
                report(joined);
            }
        }
    }
}

async fn dispatch(
    dispatcher: Arc<Dispatcher>,
    pool: Arc<BufferPool>,
    frame: Vec<u8>,
    _permit: Option<OwnedSemaphorePermit>,
    fatal: mpsc::UnboundedSender<ProtocolError>,
) {
    if let Err(err) = dispatcher.dispatch(&frame).await {
        error!(error = %err, "Malformed frame, stopping session");
        // The receiver is gone only once the session is finishing anyway
        let _ = fatal.send(err);
    }
    pool.release(frame);
}

fn report(joined: Result<(), JoinError>) {
    if let Err(err) = joined {
        error!(error = %err, "Dispatch task failed");
    }
}
