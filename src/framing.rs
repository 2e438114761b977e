//! Content-Length framing over byte streams.
//!
//! Each frame is a header block terminated by `\r\n\r\n` followed by
//! exactly `Content-Length` bytes of UTF-8 JSON:
//!
//! ```text
//! Content-Length: 52\r\n
//! \r\n
//! {"jsonrpc":"2.0","id":1,"method":"request", ... }
//! ```
//!
//! The reader yields one [`Message`] per call. Malformed framing is
//! reported once as a `ParseError` issue; afterwards the reader discards
//! input until the next `Content-Length:` header.

use futures::io::BufReader;
use futures::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::RpcError;
use crate::message::{Message, ResponseErrorCode};

const CONTENT_LENGTH: &str = "Content-Length:";
const CONTENT_TYPE: &str = "Content-Type:";

pub struct FrameReader<R> {
    input: BufReader<R>,
    /// Set after a framing error; headers other than `Content-Length`
    /// are silently discarded until the stream is back in sync.
    resync: bool,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(input: R) -> Self {
        Self {
            input: BufReader::new(input),
            resync: false,
        }
    }

    /// Read the next message.
    ///
    /// Returns `Ok(None)` on EOF at a frame boundary. Framing and JSON
    /// errors are `RpcError::Issues` and leave the reader usable; stream
    /// failures (including EOF inside a frame) are `RpcError::Transport`.
    pub async fn next_message(&mut self) -> Result<Option<Message>, RpcError> {
        let Some(length) = self.read_headers().await? else {
            return Ok(None);
        };

        let mut body = vec![0u8; length];
        self.input.read_exact(&mut body).await?;
        let text = String::from_utf8(body).map_err(|_| {
            RpcError::issue(
                ResponseErrorCode::ParseError,
                "message body is not valid UTF-8",
                None,
            )
        })?;
        tracing::trace!(message = %text, "recv");

        let value: serde_json::Value = serde_json::from_str(&text).map_err(|error| {
            RpcError::issue(
                ResponseErrorCode::ParseError,
                format!("invalid JSON payload: {error}"),
                Some(text.clone()),
            )
        })?;
        Message::from_json(value).map(Some)
    }

    /// Parse the header block; returns the announced body length, or
    /// `None` on clean EOF.
    async fn read_headers(&mut self) -> Result<Option<usize>, RpcError> {
        let mut content_length: Option<usize> = None;
        let mut line = String::new();
        loop {
            line.clear();
            let read = self.input.read_line(&mut line).await?;
            if read == 0 {
                if content_length.is_none() {
                    return Ok(None);
                }
                return Err(RpcError::Transport(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "stream closed inside a frame header",
                )));
            }

            let header = line.trim_end_matches(['\r', '\n']);
            if header.is_empty() {
                match content_length {
                    Some(length) => return Ok(Some(length)),
                    // Stray blank line between frames; keep scanning.
                    None => continue,
                }
            }

            if let Some(rest) = header.strip_prefix(CONTENT_LENGTH) {
                match rest.trim().parse::<usize>() {
                    Ok(length) => {
                        self.resync = false;
                        content_length = Some(length);
                    }
                    Err(_) => {
                        self.resync = true;
                        return Err(RpcError::issue(
                            ResponseErrorCode::ParseError,
                            format!("invalid Content-Length header: {header}"),
                            None,
                        ));
                    }
                }
            } else if header.strip_prefix(CONTENT_TYPE).is_some() {
                // Accepted and ignored.
            } else if self.resync && content_length.is_none() {
                // Discarding until the next Content-Length header.
            } else {
                self.resync = true;
                return Err(RpcError::issue(
                    ResponseErrorCode::ParseError,
                    format!("unexpected header: {header}"),
                    None,
                ));
            }
        }
    }
}

pub struct FrameWriter<W> {
    output: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(output: W) -> Self {
        Self { output }
    }

    /// Serialize one message and write header plus body. Callers must
    /// serialize concurrent writes per message; see the writer actor in
    /// [`crate::connection`].
    pub async fn write_message(&mut self, message: &Message) -> Result<(), RpcError> {
        let body = serde_json::to_string(&message.to_json())?;
        tracing::trace!(message = %body, "send");
        let header = format!("Content-Length: {}\r\n\r\n", body.len());
        self.output.write_all(header.as_bytes()).await?;
        self.output.write_all(body.as_bytes()).await?;
        self.output.flush().await?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.output
    }
}
