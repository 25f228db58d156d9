//! Module `file_ops`
//!
//! Streams file contents and listings over an established data connection.
//! Each transfer runs as its own task so the owning session can keep
//! answering ABOR and STAT on the control channel while bytes flow.

use log::{debug, info, warn};
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::error::TransferError;
use crate::transfer::modes::{AsciiDecoder, AsciiEncoder, TransferType};
use crate::transfer::results::TransferOutcome;

/// What a transfer moves across the data connection.
#[derive(Debug)]
pub enum TransferJob {
    /// RETR: file contents to the client, starting at the file's current position.
    Send { file: File, transfer_type: TransferType },
    /// STOR/APPE: client bytes into the file at its current position.
    Receive { file: File, transfer_type: TransferType },
    /// LIST/NLST: a listing rendered before the data connection opened.
    Listing { data: Vec<u8> },
}

/// A transfer whose data connection is already established.
#[derive(Debug)]
pub struct PreparedTransfer {
    pub job: TransferJob,
    pub stream: TcpStream,
    /// Human-readable description, e.g. `RETR /pub/file.bin`.
    pub label: String,
}

/// Per-transfer limits taken from the server configuration.
#[derive(Debug, Clone, Copy)]
pub struct TransferSettings {
    pub buffer_size: usize,
    pub io_timeout: Duration,
}

/// Session-side handle on a running transfer task.
#[derive(Debug)]
pub struct TransferHandle {
    label: String,
    progress: Arc<AtomicU64>,
    cancel: Option<oneshot::Sender<()>>,
    task: JoinHandle<TransferOutcome>,
}

impl TransferHandle {
    pub fn spawn(prepared: PreparedTransfer, settings: TransferSettings) -> Self {
        let PreparedTransfer { job, stream, label } = prepared;
        let progress = Arc::new(AtomicU64::new(0));
        let (cancel_tx, cancel_rx) = oneshot::channel();

        info!("Transfer started: {label}");
        let task = tokio::spawn(run_transfer(
            job,
            stream,
            cancel_rx,
            Arc::clone(&progress),
            settings,
        ));

        Self {
            label,
            progress,
            cancel: Some(cancel_tx),
            task,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Bytes moved over the data connection so far.
    pub fn bytes_transferred(&self) -> u64 {
        self.progress.load(Ordering::Relaxed)
    }

    /// Asks the transfer to stop. The task reports `Aborted` once it has
    /// released the data connection.
    pub fn cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
    }

    /// Waits for the transfer task to finish.
    ///
    /// Must not be polled again after it has returned.
    pub async fn wait(&mut self) -> TransferOutcome {
        match (&mut self.task).await {
            Ok(outcome) => outcome,
            Err(e) => TransferOutcome::Failed(TransferError::LocalFile(io::Error::other(e))),
        }
    }

    /// Tears the task down without waiting for it, e.g. when the control
    /// connection goes away mid-transfer.
    pub fn kill(self) {
        self.task.abort();
    }
}

async fn run_transfer(
    job: TransferJob,
    stream: TcpStream,
    mut cancel: oneshot::Receiver<()>,
    progress: Arc<AtomicU64>,
    settings: TransferSettings,
) -> TransferOutcome {
    let copy = async {
        match job {
            TransferJob::Send {
                file,
                transfer_type,
            } => send_file(file, stream, transfer_type, &progress, settings).await,
            TransferJob::Receive {
                file,
                transfer_type,
            } => receive_file(stream, file, transfer_type, &progress, settings).await,
            TransferJob::Listing { data } => send_listing(&data, stream, &progress, settings).await,
        }
    };

    // Dropping the copy future closes the data connection and the file.
    let outcome = tokio::select! {
        biased;
        _ = &mut cancel => TransferOutcome::Aborted { bytes: progress.load(Ordering::Relaxed) },
        result = copy => match result {
            Ok(bytes) => TransferOutcome::Completed { bytes },
            Err(e) => TransferOutcome::Failed(e),
        },
    };

    match &outcome {
        TransferOutcome::Completed { bytes } => debug!("Transfer task finished: {bytes} bytes"),
        TransferOutcome::Aborted { bytes } => warn!("Transfer aborted after {bytes} bytes"),
        TransferOutcome::Failed(e) => warn!("Transfer failed: {e}"),
    }
    outcome
}

async fn write_chunk<W: AsyncWrite + Unpin>(
    writer: &mut W,
    chunk: &[u8],
    limit: Duration,
) -> Result<(), TransferError> {
    match timeout(limit, writer.write_all(chunk)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(TransferError::Network(e)),
        Err(_) => Err(TransferError::Timeout),
    }
}

async fn read_chunk<R: AsyncRead + Unpin>(
    reader: &mut R,
    buffer: &mut [u8],
    limit: Duration,
) -> Result<usize, TransferError> {
    match timeout(limit, reader.read(buffer)).await {
        Ok(Ok(n)) => Ok(n),
        Ok(Err(e)) => Err(TransferError::Network(e)),
        Err(_) => Err(TransferError::Timeout),
    }
}

async fn close_stream(mut stream: TcpStream, limit: Duration) -> Result<(), TransferError> {
    match timeout(limit, stream.shutdown()).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(TransferError::Network(e)),
        Err(_) => Err(TransferError::Timeout),
    }
}

async fn send_file(
    mut file: File,
    mut stream: TcpStream,
    transfer_type: TransferType,
    progress: &AtomicU64,
    settings: TransferSettings,
) -> Result<u64, TransferError> {
    let mut buffer = vec![0u8; settings.buffer_size];
    let mut encoded = Vec::new();
    let mut encoder = AsciiEncoder::default();
    let mut total = 0u64;

    loop {
        let n = file
            .read(&mut buffer)
            .await
            .map_err(TransferError::LocalFile)?;
        if n == 0 {
            break;
        }

        let chunk = match transfer_type {
            TransferType::Binary => &buffer[..n],
            TransferType::Ascii => {
                encoded.clear();
                encoder.encode(&buffer[..n], &mut encoded);
                &encoded[..]
            }
        };

        write_chunk(&mut stream, chunk, settings.io_timeout).await?;
        total += chunk.len() as u64;
        progress.store(total, Ordering::Relaxed);
    }

    close_stream(stream, settings.io_timeout).await?;
    Ok(total)
}

async fn receive_file(
    mut stream: TcpStream,
    mut file: File,
    transfer_type: TransferType,
    progress: &AtomicU64,
    settings: TransferSettings,
) -> Result<u64, TransferError> {
    let mut buffer = vec![0u8; settings.buffer_size];
    let mut decoded = Vec::new();
    let mut decoder = AsciiDecoder::default();
    let mut total = 0u64;

    loop {
        let n = read_chunk(&mut stream, &mut buffer, settings.io_timeout).await?;
        if n == 0 {
            break;
        }
        total += n as u64;
        progress.store(total, Ordering::Relaxed);

        let chunk = match transfer_type {
            TransferType::Binary => &buffer[..n],
            TransferType::Ascii => {
                decoded.clear();
                decoder.decode(&buffer[..n], &mut decoded);
                &decoded[..]
            }
        };
        file.write_all(chunk)
            .await
            .map_err(TransferError::LocalFile)?;
    }

    decoded.clear();
    decoder.finish(&mut decoded);
    file.write_all(&decoded)
        .await
        .map_err(TransferError::LocalFile)?;
    // tokio buffers file writes; make sure they landed before reporting 226
    file.flush().await.map_err(TransferError::LocalFile)?;
    Ok(total)
}

async fn send_listing(
    data: &[u8],
    mut stream: TcpStream,
    progress: &AtomicU64,
    settings: TransferSettings,
) -> Result<u64, TransferError> {
    for chunk in data.chunks(settings.buffer_size) {
        write_chunk(&mut stream, chunk, settings.io_timeout).await?;
        progress.fetch_add(chunk.len() as u64, Ordering::Relaxed);
    }
    close_stream(stream, settings.io_timeout).await?;
    Ok(data.len() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    const SETTINGS: TransferSettings = TransferSettings {
        buffer_size: 1024,
        io_timeout: Duration::from_secs(5),
    };

    /// Returns (server side, client side) of a loopback connection.
    async fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (server, client)
    }

    #[tokio::test]
    async fn sends_file_with_ascii_translation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"a\nb\r\nc\n").unwrap();

        let (server, mut client) = socket_pair().await;
        let file = File::open(&path).await.unwrap();
        let mut handle = TransferHandle::spawn(
            PreparedTransfer {
                job: TransferJob::Send {
                    file,
                    transfer_type: TransferType::Ascii,
                },
                stream: server,
                label: "RETR /notes.txt".into(),
            },
            SETTINGS,
        );

        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"a\r\nb\r\nc\r\n");
        assert!(matches!(handle.wait().await, TransferOutcome::Completed { bytes: 9 }));
        assert_eq!(handle.bytes_transferred(), 9);
    }

    #[tokio::test]
    async fn receives_file_in_binary_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upload.bin");
        let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();

        let (server, mut client) = socket_pair().await;
        let file = File::create(&path).await.unwrap();
        let mut handle = TransferHandle::spawn(
            PreparedTransfer {
                job: TransferJob::Receive {
                    file,
                    transfer_type: TransferType::Binary,
                },
                stream: server,
                label: "STOR /upload.bin".into(),
            },
            SETTINGS,
        );

        client.write_all(&payload).await.unwrap();
        client.shutdown().await.unwrap();
        drop(client);

        assert!(matches!(handle.wait().await, TransferOutcome::Completed { bytes: 10_000 }));
        assert_eq!(std::fs::read(&path).unwrap(), payload);
    }

    #[tokio::test]
    async fn cancel_stops_a_stalled_upload() {
        let dir = tempfile::tempdir().unwrap();
        let file = File::create(dir.path().join("stalled")).await.unwrap();
        let (server, _client) = socket_pair().await;

        let mut handle = TransferHandle::spawn(
            PreparedTransfer {
                job: TransferJob::Receive {
                    file,
                    transfer_type: TransferType::Binary,
                },
                stream: server,
                label: "STOR /stalled".into(),
            },
            SETTINGS,
        );
        assert_eq!(handle.label(), "STOR /stalled");

        handle.cancel();
        assert!(matches!(handle.wait().await, TransferOutcome::Aborted { bytes: 0 }));
    }

    #[tokio::test]
    async fn read_timeout_fails_the_transfer() {
        let dir = tempfile::tempdir().unwrap();
        let file = File::create(dir.path().join("slow")).await.unwrap();
        let (server, _client) = socket_pair().await;

        let mut handle = TransferHandle::spawn(
            PreparedTransfer {
                job: TransferJob::Receive {
                    file,
                    transfer_type: TransferType::Binary,
                },
                stream: server,
                label: "STOR /slow".into(),
            },
            TransferSettings {
                buffer_size: 1024,
                io_timeout: Duration::from_millis(50),
            },
        );

        assert!(matches!(
            handle.wait().await,
            TransferOutcome::Failed(TransferError::Timeout)
        ));
    }
}
