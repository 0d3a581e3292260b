//! Per-connection pipeline
//!
//! Composes socket-read -> frame-decode -> protocol-decode -> handler ->
//! protocol-encode -> frame-encode -> socket-write for one TCP
//! connection. The loop does not read the next frame until the previous
//! response is fully written, so each stage naturally pushes back on the
//! one before it.
//!
//! Responses are therefore emitted in request order. This serialization
//! per connection is a deliberate, documented choice; clients correlate
//! by id either way, and requests on one connection are observed by the
//! handler in arrival order.
//!
//! Error disposition:
//! - frame or payload decode errors close the connection (write side is
//!   half-closed first so the peer sees a clean EOF);
//! - domain errors (unknown method, unknown bucket type, validation,
//!   store trouble) are answered on the wire and the connection stays;
//! - socket errors and peer disconnects tear down silently at debug.

use crate::handler::Handler;
use crate::protocol::{Codec, Decoded, FrameCodec, ProtocolError};
use crate::types::Response;
use bytes::BytesMut;
use socket2::SockRef;
use std::io;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;

const READ_BUFFER_SIZE: usize = 4096;
const WRITE_BUFFER_SIZE: usize = 512;

/// Why a pipeline ended, when it did not end cleanly
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The peer broke the wire contract; the connection was closed
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    /// The socket failed underneath us
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Drive one connection to completion
///
/// Returns `Ok(())` on clean peer close or drain; the caller decides
/// log severity from the error variant otherwise.
pub async fn run(
    mut socket: TcpStream,
    handler: Arc<Handler>,
    codec: Codec,
    frames: FrameCodec,
    shutdown: watch::Receiver<bool>,
) -> Result<(), PipelineError> {
    // Low latency: write each response frame immediately
    socket.set_nodelay(true)?;
    SockRef::from(&socket).set_keepalive(true)?;

    let result = connection_loop(&mut socket, &handler, codec, frames, shutdown).await;

    if let Err(PipelineError::Protocol(_)) = &result {
        // Half-close the write side so the peer observes EOF before we
        // drop the socket
        let _ = socket.shutdown().await;
    }
    result
}

async fn connection_loop(
    socket: &mut TcpStream,
    handler: &Handler,
    codec: Codec,
    frames: FrameCodec,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), PipelineError> {
    let mut inbuf = BytesMut::with_capacity(READ_BUFFER_SIZE);
    let mut outbuf = BytesMut::with_capacity(WRITE_BUFFER_SIZE);
    // The signal may predate this task; start draining if it does
    let mut draining = *shutdown.borrow();

    loop {
        match frames.decode(&mut inbuf)? {
            Some(payload) => {
                let response = match codec.decode_request(&payload)? {
                    Decoded::Request(request) => handler.handle(request).await,
                    Decoded::Malformed { id, kind, message } => {
                        tracing::info!(id, "{message}");
                        Response::error(id, kind, message)
                    }
                };

                let body = codec.encode_response(&response)?;
                outbuf.clear();
                frames.encode(&body, &mut outbuf)?;
                socket.write_all(&outbuf).await?;
                socket.flush().await?;
            }
            None => {
                // Buffer drained of complete frames; on drain we stop
                // reading and let the connection end here
                if draining {
                    return Ok(());
                }

                tokio::select! {
                    read = socket.read_buf(&mut inbuf) => {
                        if read? == 0 {
                            if inbuf.is_empty() {
                                return Ok(()); // clean peer close
                            }
                            return Err(ProtocolError::Truncated.into());
                        }
                    }
                    _ = shutdown.changed() => {
                        draining = true;
                    }
                }
            }
        }
    }
}
