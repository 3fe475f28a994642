// External crates
use std::io;
use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::instrument;

/// Which child stream a chunk came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// Child stdout.
    Stdout,
    /// Child stderr.
    Stderr,
}

/// Longest chunk forwarded while no newline has arrived, so output that
/// never ends a line (progress bars redrawn with `\r`) is still captured.
pub const MAX_CHUNK_BYTES: usize = 64 * 1024;

/// One line, a slice of an overlong line, or the trailing partial line of
/// child output.
#[derive(Debug)]
pub struct Chunk {
    /// Origin stream.
    pub stream: StreamKind,
    /// Raw bytes, newline included when present.
    pub bytes: Vec<u8>,
}

/// Read `reader` line by line and forward each line to the tee.
///
/// Lines are forwarded byte-exact. Lines longer than [`MAX_CHUNK_BYTES`]
/// are forwarded in slices of that size, and a final line without a newline
/// is forwarded as is when the stream ends. Returns the number of bytes read.
pub fn spawn_pump<R>(reader: R, stream: StreamKind, tx: mpsc::Sender<Chunk>) -> JoinHandle<io::Result<u64>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    spawn_pump_with_limit(reader, stream, tx, MAX_CHUNK_BYTES)
}

fn spawn_pump_with_limit<R>(
    reader: R,
    stream: StreamKind,
    tx: mpsc::Sender<Chunk>,
    limit: usize,
) -> JoinHandle<io::Result<u64>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let limit = limit.max(1);
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut total = 0u64;
        let mut buf = Vec::new();

        loop {
            let n = read_chunk(&mut reader, &mut buf, limit).await?;
            if n == 0 {
                break;
            }
            total += n as u64;

            let chunk = Chunk {
                stream,
                bytes: std::mem::take(&mut buf),
            };
            if tx.send(chunk).await.is_err() {
                // Writer is gone; keep draining so the child never blocks on
                // a full pipe.
                tracing::warn!(?stream, "Output tee closed, discarding remaining child output");
                let mut sink = tokio::io::sink();
                total += tokio::io::copy(&mut reader, &mut sink).await?;
                break;
            }
        }

        Ok(total)
    })
}

/// Append bytes to `buf` up to and including the next newline, stopping
/// early once `buf` holds `limit` bytes. Returns the bytes read; 0 at EOF.
async fn read_chunk<R>(reader: &mut R, buf: &mut Vec<u8>, limit: usize) -> io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut read = 0;
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(read);
        }

        let room = limit.saturating_sub(buf.len());
        let window = &available[..available.len().min(room)];
        let (used, done) = match window.iter().position(|b| *b == b'\n') {
            Some(i) => (i + 1, true),
            None => (window.len(), buf.len() + window.len() >= limit),
        };

        buf.extend_from_slice(&window[..used]);
        reader.consume(used);
        read += used;
        if done {
            return Ok(read);
        }
    }
}

/// Merges child output into the capture file and, optionally, the console.
#[derive(Debug)]
pub struct OutputTee<W> {
    file: File,
    console: Option<W>,
    written: u64,
}

impl OutputTee<tokio::io::Stdout> {
    /// Tee into `file`, echoing to the wrapper's stdout when `echo` is set.
    #[must_use]
    pub fn new(file: File, echo: bool) -> Self {
        Self::with_console(file, echo.then(tokio::io::stdout))
    }
}

impl<W> OutputTee<W>
where
    W: AsyncWrite + Unpin + Send,
{
    /// Tee into `file` and an arbitrary console writer.
    pub fn with_console(file: File, console: Option<W>) -> Self {
        Self {
            file,
            console,
            written: 0,
        }
    }

    /// Write one chunk to the file (flushed immediately) and the console.
    ///
    /// Console failures (for example a closed stdout under a service
    /// manager) disable the echo instead of failing the capture.
    pub async fn write_chunk(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.file.write_all(bytes).await?;
        self.file.flush().await?;
        self.written += bytes.len() as u64;

        if let Some(console) = self.console.as_mut() {
            let echoed = async {
                console.write_all(bytes).await?;
                console.flush().await
            }
            .await;
            if let Err(e) = echoed {
                tracing::warn!(error = %e, "Console echo failed, continuing with file capture only");
                self.console = None;
            }
        }

        Ok(())
    }

    /// Drain `rx` until every pump has finished, then sync the file to disk.
    /// Returns the number of bytes written to the file.
    #[instrument(name = "wrapper_output_tee", target = "launcher::tee", level = "debug", skip_all)]
    pub async fn run(mut self, mut rx: mpsc::Receiver<Chunk>) -> io::Result<u64> {
        let mut first_error: Option<io::Error> = None;

        while let Some(chunk) = rx.recv().await {
            if first_error.is_some() {
                continue;
            }
            if let Err(e) = self.write_chunk(&chunk.bytes).await {
                tracing::error!(error = %e, "Failed to write child output to capture file");
                first_error = Some(e);
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }

        self.file.sync_all().await?;
        tracing::debug!(bytes = self.written, "Child output capture complete");
        Ok(self.written)
    }
}
