//! Newline-delimited transport.
//!
//! Reads one UTF-8 line at a time from the input stream and writes
//! newline-terminated responses to the output stream. EOF is a clean
//! shutdown signal; any other read/write error is fatal. Diagnostics go
//! through `tracing` (stderr) and never touch the response stream.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Stdin, Stdout};

use palisade_types::errors::PalisadeError;

/// Line-delimited message transport over a reader/writer pair.
pub struct Transport<R, W> {
    reader: R,
    writer: W,
}

/// Transport over the process stdin/stdout, the MCP stdio convention.
pub type StdioTransport = Transport<BufReader<Stdin>, Stdout>;

impl StdioTransport {
    pub fn stdio() -> StdioTransport {
        Transport {
            reader: BufReader::new(tokio::io::stdin()),
            writer: tokio::io::stdout(),
        }
    }
}

impl<R, W> Transport<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Construct over arbitrary streams (tests use in-memory buffers).
    pub fn new(reader: R, writer: W) -> Transport<R, W> {
        Transport { reader, writer }
    }

    /// Read the next non-empty line. Returns `None` on EOF.
    ///
    /// Invalid UTF-8 surfaces as an I/O error, which is fatal per the
    /// transport contract.
    pub async fn read_message(&mut self) -> Result<Option<String>, PalisadeError> {
        loop {
            let mut line = String::new();
            let n = self.reader.read_line(&mut line).await?;
            if n == 0 {
                return Ok(None);
            }
            let trimmed = line.trim();
            if !trimmed.is_empty() {
                return Ok(Some(trimmed.to_string()));
            }
        }
    }

    /// Write one message followed by a newline and flush.
    pub async fn write_message(&mut self, message: &str) -> Result<(), PalisadeError> {
        self.writer.write_all(message.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }
}
