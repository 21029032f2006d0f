//! Length-prefixed framing: a zero-padded ASCII decimal header of
//! [`SIZE_SPEC`] bytes followed by that many bytes of UTF-8 payload.

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const SIZE_SPEC: usize = 5;
pub const MAX_PAYLOAD: usize = 99_999;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("payload of {0} bytes exceeds the frame limit")]
    TooLarge(usize),
    #[error("invalid frame header {0:?}")]
    BadHeader(String),
    #[error("connection closed mid-frame")]
    Truncated,
    #[error("payload is not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Encodes one payload as a complete frame.
pub fn encode_frame(payload: &str) -> Result<Vec<u8>, FrameError> {
    let len = payload.len();
    if len > MAX_PAYLOAD {
        return Err(FrameError::TooLarge(len));
    }
    let mut frame = Vec::with_capacity(SIZE_SPEC + len);
    frame.extend_from_slice(format!("{:0width$}", len, width = SIZE_SPEC).as_bytes());
    frame.extend_from_slice(payload.as_bytes());
    Ok(frame)
}

/// Writes the whole frame or fails; a partial frame is never reported as sent.
pub async fn write_frame<W>(writer: &mut W, payload: &str) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(payload)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one complete payload.
///
/// Returns `Ok(None)` when the peer closes the stream cleanly between frames.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<String>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; SIZE_SPEC];
    let mut filled = 0;
    while filled < SIZE_SPEC {
        let n = reader.read(&mut header[filled..]).await?;
        if n == 0 {
            return if filled == 0 {
                Ok(None)
            } else {
                Err(FrameError::Truncated)
            };
        }
        filled += n;
    }

    let text = String::from_utf8_lossy(&header).into_owned();
    let len: usize = text
        .trim()
        .parse()
        .map_err(|_| FrameError::BadHeader(text.clone()))?;

    let mut body = vec![0u8; len];
    match reader.read_exact(&mut body).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(FrameError::Truncated)
        }
        Err(e) => return Err(e.into()),
    }
    Ok(Some(String::from_utf8(body)?))
}
