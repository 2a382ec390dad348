//! Newline framing for the inbound half of a session stream.
//!
//! Like `AsyncBufReadExt::lines`, but a line may not grow past a fixed
//! limit: a host that never sends `\n` is cut off instead of filling memory.
//! Partial lines are kept inside the reader, so `next_line` is cancel safe
//! and can sit in a `select!`.

use rcpc_core::ProtocolError;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

use super::ConnectionError;

pub(crate) struct EnvelopeLines<R> {
    reader: BufReader<R>,
    pending: Vec<u8>,
    limit: usize,
}

impl<R> EnvelopeLines<R>
where
    R: AsyncRead + Unpin,
{
    pub(crate) fn new(inner: R, limit: usize) -> Self {
        Self {
            reader: BufReader::new(inner),
            pending: Vec::new(),
            limit,
        }
    }

    /// Next line without its terminator, or `None` at end of stream.
    ///
    /// I/O failures and invalid UTF-8 map to [`ConnectionError::Transport`];
    /// an over-long line maps to [`ProtocolError::TooLong`].
    pub(crate) async fn next_line(&mut self) -> Result<Option<String>, ConnectionError> {
        loop {
            let available = self
                .reader
                .fill_buf()
                .await
                .map_err(ConnectionError::Transport)?;

            if available.is_empty() {
                if self.pending.is_empty() {
                    return Ok(None);
                }
                return self.take_line().map(Some);
            }

            match available.iter().position(|b| *b == b'\n') {
                Some(end) => {
                    self.pending.extend_from_slice(&available[..end]);
                    self.reader.consume(end + 1);
                    self.check_limit()?;
                    return self.take_line().map(Some);
                }
                None => {
                    let read = available.len();
                    self.pending.extend_from_slice(available);
                    self.reader.consume(read);
                    self.check_limit()?;
                }
            }
        }
    }

    pub(crate) fn into_inner(self) -> R {
        self.reader.into_inner()
    }

    fn check_limit(&mut self) -> Result<(), ConnectionError> {
        if self.pending.len() > self.limit {
            self.pending.clear();
            return Err(ProtocolError::TooLong { limit: self.limit }.into());
        }
        Ok(())
    }

    fn take_line(&mut self) -> Result<String, ConnectionError> {
        let mut bytes = std::mem::take(&mut self.pending);
        if bytes.last() == Some(&b'\r') {
            bytes.pop();
        }
        String::from_utf8(bytes).map_err(|e| {
            ConnectionError::Transport(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })
    }
}
