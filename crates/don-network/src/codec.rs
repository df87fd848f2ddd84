//! Streaming JSON framing for OVSDB connections
//!
//! ovsdb-server writes JSON-RPC messages back to back without a delimiter,
//! so a single read may carry half a message or several of them.

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::ovs_error::OvsError;

const READ_CHUNK: usize = 8192;

/// Reads complete JSON values off a byte stream
pub struct JsonReader<R> {
    inner: R,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> JsonReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: Vec::new(),
        }
    }

    /// Next complete message, or `None` on a clean end of stream
    pub async fn next_message(&mut self) -> Result<Option<Value>, OvsError> {
        loop {
            if let Some(value) = self.try_decode()? {
                return Ok(Some(value));
            }

            let mut chunk = [0u8; READ_CHUNK];
            let read = self.inner.read(&mut chunk).await?;
            if read == 0 {
                if self.buf.iter().all(u8::is_ascii_whitespace) {
                    return Ok(None);
                }
                return Err(OvsError::ConnectionClosed);
            }
            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    fn try_decode(&mut self) -> Result<Option<Value>, OvsError> {
        let (value, consumed) = {
            let mut stream = serde_json::Deserializer::from_slice(&self.buf).into_iter::<Value>();
            match stream.next() {
                Some(Ok(value)) => (value, stream.byte_offset()),
                Some(Err(e)) if e.is_eof() => return Ok(None),
                Some(Err(e)) => return Err(OvsError::Protocol(e.to_string())),
                None => {
                    self.buf.clear();
                    return Ok(None);
                }
            }
        };
        self.buf.drain(..consumed);
        Ok(Some(value))
    }
}
