//! Per-connection task: key exchange, then a receive loop that
//! decrypts frames, hands them to the router, and encrypts replies.
//! Send and receive are serialized independently — reads happen on
//! this task, writes happen on a dedicated writer task drained from
//! the session's `SessionSink`, so a slow write never blocks the next
//! inbound frame's decode.

use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use noted_proto::SessionId;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tracing::{info, info_span, warn, Instrument};

use crate::crypto::{AesKey, ServerKeyPair};
use crate::error::{Result, ServerError};
use crate::frame::{self, decode_envelope, encode_envelope};
use crate::router::{Router, RouterContext};
use crate::wire_convert;

/// Runs one client connection end to end. Returns once the socket
/// closes or the client sends `EXIT`.
pub async fn handle_connection<S>(
    mut socket: S,
    server_key: Arc<ServerKeyPair>,
    ctx: Arc<RouterContext>,
    session_id: SessionId,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let span = info_span!("session", ?session_id);
    async move {
        frame::write_frame(
            &mut socket,
            encode_envelope("KEY", &[server_key.public_key_b64().to_string()]).as_bytes(),
        )
        .await?;

        let client_frame = frame::read_frame(&mut socket).await?;
        let client_msg = String::from_utf8(client_frame)
            .map_err(|_| ServerError::BadInput("key exchange frame was not utf-8".into()))?;
        let (code, params) = decode_envelope(&client_msg);
        if code != "KEY" {
            return Err(ServerError::BadInput(format!("expected KEY, got {code}")));
        }
        let [wrapped_key] = params.as_slice() else {
            return Err(ServerError::BadInput("KEY frame needs exactly one param".into()));
        };
        let wrapped = BASE64
            .decode(wrapped_key)
            .map_err(|e| ServerError::BadInput(format!("bad base64 key: {e}")))?;
        let aes_key = server_key.decrypt_aes_key(&wrapped)?;
        info!("key exchange complete");

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
        ctx.sessions.register(session_id, outbound_tx);

        let client_id = uuid_like(session_id);
        let mut router = Router::new(ctx.clone(), session_id, client_id.clone());

        let (mut reader, mut writer) = tokio::io::split(socket);
        let write_key = aes_key.clone();
        let writer_task = tokio::spawn(async move {
            while let Some(payload) = outbound_rx.recv().await {
                if let Err(err) = send_response(&mut writer, &write_key, &payload).await {
                    warn!(%err, "failed to deliver broadcast frame");
                }
            }
        });

        let result = receive_loop(&mut reader, &aes_key, &mut router, session_id, &ctx).await;

        writer_task.abort();
        ctx.sessions.unregister(session_id);
        ctx.doc_engine.session_lost(session_id);
        result
    }
    .instrument(span)
    .await
}

async fn receive_loop<R: AsyncRead + Unpin>(
    reader: &mut R,
    aes_key: &AesKey,
    router: &mut Router,
    session_id: SessionId,
    ctx: &Arc<RouterContext>,
) -> Result<()> {
    loop {
        let raw = match frame::read_frame(reader).await {
            Ok(raw) => raw,
            Err(ServerError::TransportFailure(_)) => return Ok(()),
            Err(err) => return Err(err),
        };
        let text = String::from_utf8(raw).map_err(|_| ServerError::BadInput("frame was not utf-8".into()))?;
        let (ciphertext, iv_vec) = match frame::unwrap_encoded(&text) {
            Ok(v) => v,
            Err(err) => {
                warn!(%err, "dropping malformed frame");
                continue;
            }
        };
        let iv: [u8; 16] = match iv_vec.try_into() {
            Ok(iv) => iv,
            Err(_) => {
                warn!("iv was not 16 bytes");
                continue;
            }
        };
        let plain = match aes_key.open(&ciphertext, &iv) {
            Ok(p) => p,
            Err(err) => {
                warn!(%err, "dropping frame with bad padding");
                continue;
            }
        };
        let inner = String::from_utf8(plain).map_err(|_| ServerError::BadInput("decrypted frame was not utf-8".into()))?;
        let (code, params) = decode_envelope(&inner);

        let response = match wire_convert::decode_request(code, &params) {
            Ok(req) => {
                let is_exit = matches!(req, noted_proto::RequestPayload::Exit);
                let result = router.dispatch(req).await;
                if is_exit {
                    let _ = ctx
                        .sessions
                        .send(session_id, noted_proto::Response { payload: Ok(noted_proto::ResponsePayload::Closed) })
                        .await;
                    return Ok(());
                }
                result
            }
            Err(err) => Err((&err).into()),
        };

        let _ = ctx.sessions.send(session_id, noted_proto::Response { payload: response }).await;
    }
}

async fn send_response<W: AsyncWrite + Unpin>(
    writer: &mut W,
    aes_key: &AesKey,
    response: &noted_proto::Response,
) -> Result<()> {
    let (code, params) = match &response.payload {
        Ok(payload) => wire_convert::encode_response(payload)?,
        Err(error_code) => ("ERROR".to_string(), vec![error_code.to_string()]),
    };
    let inner = encode_envelope(&code, &params);
    let (ciphertext, iv) = aes_key.seal(inner.as_bytes());
    let outer = frame::wrap_encoded(&ciphertext, &iv);
    frame::write_frame(writer, outer.as_bytes()).await
}

/// A short per-connection client identifier, used as the OT tie-break
/// key. Derived from the session id rather than a fresh UUID so tests
/// can predict it.
fn uuid_like(session_id: SessionId) -> String {
    format!("session-{}", session_id.0)
}
