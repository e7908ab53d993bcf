//! Wire framing: a ten-ASCII-digit length prefix around a
//! `CODE~param1~param2~…` envelope, and the `ENCODED~<ct>~<iv>` outer
//! wrapper every post-handshake frame uses.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Result, ServerError};

const LENGTH_PREFIX_WIDTH: usize = 10;

/// Reads exactly one length-prefixed frame's payload bytes.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>> {
    let mut len_buf = [0u8; LENGTH_PREFIX_WIDTH];
    reader.read_exact(&mut len_buf).await?;
    let len_str = std::str::from_utf8(&len_buf)
        .map_err(|_| ServerError::TransportFailure(std::io::Error::other("non-utf8 length prefix")))?;
    let len: usize = len_str
        .trim()
        .parse()
        .map_err(|_| ServerError::TransportFailure(std::io::Error::other("bad length prefix")))?;
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}

/// Writes `payload` behind a ten-ASCII-digit, space-padded length
/// prefix.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8]) -> Result<()> {
    let prefix = format!("{:>width$}", payload.len(), width = LENGTH_PREFIX_WIDTH);
    writer.write_all(prefix.as_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Joins a code and its parameters into a `CODE~p1~p2~…` envelope.
#[must_use]
pub fn encode_envelope(code: &str, params: &[String]) -> String {
    let mut out = String::from(code);
    for p in params {
        out.push('~');
        out.push_str(p);
    }
    out
}

/// Splits a `CODE~p1~p2~…` envelope into its code and parameters.
#[must_use]
pub fn decode_envelope(raw: &str) -> (&str, Vec<&str>) {
    let mut parts = raw.split('~');
    let code = parts.next().unwrap_or("");
    (code, parts.collect())
}

/// Wraps an AES-CBC ciphertext and IV as the outer `ENCODED~ct~iv`
/// envelope (both fields base64).
#[must_use]
pub fn wrap_encoded(ciphertext: &[u8], iv: &[u8]) -> String {
    encode_envelope("ENCODED", &[BASE64.encode(ciphertext), BASE64.encode(iv)])
}

/// Parses an `ENCODED~ct~iv` envelope back into raw ciphertext and IV
/// bytes.
pub fn unwrap_encoded(raw: &str) -> Result<(Vec<u8>, Vec<u8>)> {
    let (code, params) = decode_envelope(raw);
    if code != "ENCODED" {
        return Err(ServerError::BadInput(format!("expected ENCODED envelope, got {code}")));
    }
    let [ct_b64, iv_b64] = params.as_slice() else {
        return Err(ServerError::BadInput("ENCODED envelope needs exactly two params".into()));
    };
    let ct = BASE64
        .decode(ct_b64)
        .map_err(|e| ServerError::BadInput(format!("bad base64 ciphertext: {e}")))?;
    let iv = BASE64
        .decode(iv_b64)
        .map_err(|e| ServerError::BadInput(format!("bad base64 iv: {e}")))?;
    Ok((ct, iv))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frame_round_trips_through_a_cursor() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"hello").await.unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        let payload = read_frame(&mut cursor).await.unwrap();
        assert_eq!(payload, b"hello");
    }

    #[test]
    fn envelope_round_trips() {
        let env = encode_envelope("LOGIN", &["alice".into(), "pw".into()]);
        assert_eq!(env, "LOGIN~alice~pw");
        let (code, params) = decode_envelope(&env);
        assert_eq!(code, "LOGIN");
        assert_eq!(params, vec!["alice", "pw"]);
    }

    #[test]
    fn encoded_envelope_round_trips() {
        let ct = b"ciphertext-bytes";
        let iv = b"0123456789abcdef";
        let wrapped = wrap_encoded(ct, iv);
        let (parsed_ct, parsed_iv) = unwrap_encoded(&wrapped).unwrap();
        assert_eq!(parsed_ct, ct);
        assert_eq!(parsed_iv, iv);
    }
}
