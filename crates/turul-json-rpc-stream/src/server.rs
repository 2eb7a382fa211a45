//! Server half of a connection: decodes inbound requests, evaluates them
//! against the handler table and writes replies.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error, warn};

use crate::error::{JsonRpcErrorObject, ProtocolError};
use crate::framing::FrameWriter;
use crate::handler::Handler;
use crate::message::{Incoming, Request, Response, is_malformed};
use crate::validation::SharedValidator;

pub struct ServerCore {
    writer: Arc<FrameWriter>,
    handler: Handler,
    validator: SharedValidator,
}

impl ServerCore {
    pub fn new(writer: Arc<FrameWriter>, handler: Handler, validator: SharedValidator) -> Self {
        Self {
            writer,
            handler,
            validator,
        }
    }

    /// Handle one inbound request, writing at most one reply.
    ///
    /// Malformed JSON is answered with a Parse Error and then reported as a
    /// [`ProtocolError`]. Valid JSON that is not a request object is dropped
    /// without a reply.
    pub async fn request(&self, incoming: Incoming<'_, Request>) -> Result<(), ProtocolError> {
        let request = match incoming.decode() {
            Ok(request) => request,
            Err(err) if is_malformed(&err) => {
                self.reply(&Response::error(Value::Null, JsonRpcErrorObject::parse_error()))
                    .await;
                return Err(ProtocolError(err));
            }
            Err(err) => {
                debug!(error = %err, "Discarding undecodable request");
                return Ok(());
            }
        };

        if let Some(response) = self.handler.handle_with(request, &self.validator).await {
            self.reply(&response).await;
        }
        Ok(())
    }

    /// Reply write failures mean the connection is already broken; the read
    /// side will observe that on its own.
    async fn reply(&self, response: &Response) {
        let frame = match serde_json::to_vec(response) {
            Ok(frame) => frame,
            Err(err) => {
                error!(error = %err, "Failed to encode response");
                return;
            }
        };
        if let Err(err) = self.writer.write_frame(&frame).await {
            warn!(id = %response.id, error = %err, "Dropping response, write failed");
        }
    }
}
