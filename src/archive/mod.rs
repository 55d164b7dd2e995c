use std::path::{Path, PathBuf};

use anyhow::Context;
use async_zip::tokio::write::ZipFileWriter;
use async_zip::{Compression, ZipDateTime, ZipEntryBuilder};
use bytes::Bytes;
use futures_util::AsyncWriteExt as _;
use tokio::io::{AsyncWrite, AsyncWriteExt as _};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::download::{cancellable, ensure_success, get_response, unique_output_path};
use crate::error::{is_cancelled, ArchiveError};
use crate::progress::ProgressTracker;
use crate::utils::remove_file_ignore_not_exists;

/// Chunks waiting for the writer. Bounds the memory of one assembly.
const CHANNEL_CAPACITY: usize = 64;

/// One archive entry: where its bytes come from and what it is called.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveItem {
    /// Episode number as shown in progress labels.
    pub episode: String,
    pub file_name: String,
    pub url: String,
}

/// Destination of a finished archive, opened once per job.
pub trait SaveTarget {
    type Sink: AsyncWrite + Unpin;

    /// Rejects an unusable target before any network call is made.
    fn validate(&self) -> Result<(), anyhow::Error>;

    async fn open(&mut self, file_name: &str) -> Result<Self::Sink, anyhow::Error>;

    /// Removes whatever [`SaveTarget::open`] created.
    async fn discard(&mut self) -> Result<(), anyhow::Error>;
}

/// Saves into a new file inside a directory, never overwriting existing files.
#[derive(Debug, Clone)]
pub struct DirectorySaveTarget {
    directory: PathBuf,
    opened: Option<PathBuf>,
}

impl DirectorySaveTarget {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        DirectorySaveTarget {
            directory: directory.into(),
            opened: None,
        }
    }

    /// Path of the file created by the last `open`.
    pub fn opened_path(&self) -> Option<&Path> {
        self.opened.as_deref()
    }
}

impl SaveTarget for DirectorySaveTarget {
    type Sink = tokio::io::BufWriter<tokio::fs::File>;

    fn validate(&self) -> Result<(), anyhow::Error> {
        let metadata = std::fs::metadata(&self.directory)
            .with_context(|| format!("output directory {} is not accessible", self.directory.display()))?;

        if !metadata.is_dir() {
            anyhow::bail!("output path {} is not a directory", self.directory.display());
        }

        if metadata.permissions().readonly() {
            anyhow::bail!("output directory {} is read-only", self.directory.display());
        }

        Ok(())
    }

    async fn open(&mut self, file_name: &str) -> Result<Self::Sink, anyhow::Error> {
        let path = unique_output_path(&self.directory, file_name)?;
        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .with_context(|| format!("failed to create {}", path.display()))?;

        log::debug!("Writing archive to {}", path.display());
        self.opened = Some(path);

        Ok(tokio::io::BufWriter::new(file))
    }

    async fn discard(&mut self) -> Result<(), anyhow::Error> {
        if let Some(path) = self.opened.take() {
            remove_file_ignore_not_exists(&path)
                .await
                .with_context(|| format!("failed to remove incomplete archive {}", path.display()))?;
        }

        Ok(())
    }
}

/// What the downloading side hands to the archive writer.
#[derive(Debug)]
enum ArchiveChunk {
    Entry(String),
    Data(Bytes),
    EntryEnd,
    Finish,
}

/// Streams every item, in order, into one ZIP archive written to `sink`.
///
/// Downloads push their chunks through a bounded channel to a single writer
/// that owns the ZIP encoder, so at most a few chunks are held in memory.
/// Entries are stored uncompressed with data descriptors, which lets the
/// archive go to a sink that cannot seek. The sink is flushed and shut down
/// once, whether the assembly succeeds or not. On error the sink content is
/// incomplete and must be discarded.
pub async fn assemble<W>(
    items: &[ArchiveItem],
    sink: W,
    client: Option<&reqwest::Client>,
    progress: &ProgressTracker,
    token: &CancellationToken,
) -> Result<(), anyhow::Error>
where
    W: AsyncWrite + Unpin,
{
    let (sender, receiver) = mpsc::channel(CHANNEL_CAPACITY);

    let (produced, written) = tokio::join!(
        produce_archive(items, sender, client, progress, token),
        write_archive(receiver, sink)
    );

    match (produced, written) {
        (Ok(()), Ok(())) => Ok(()),
        (Err(err), Ok(())) => Err(err),
        // The writer only stopped because the producer did
        (Err(err), Err(writer_err)) if !is_writer_closed(&err) => {
            log::debug!("Archive writer stopped after producer failure: {:#}", writer_err);
            Err(err)
        }
        (produced, Err(err)) => {
            if let Err(produce_err) = produced {
                log::debug!("Archive producer stopped after writer failure: {:#}", produce_err);
            }

            Err(err)
        }
    }
}

fn is_writer_closed(err: &anyhow::Error) -> bool {
    err.downcast_ref::<ArchiveError>() == Some(&ArchiveError::WriterClosed)
}

async fn produce_archive(
    items: &[ArchiveItem],
    sender: mpsc::Sender<ArchiveChunk>,
    client: Option<&reqwest::Client>,
    progress: &ProgressTracker,
    token: &CancellationToken,
) -> Result<(), anyhow::Error> {
    for (index, item) in items.iter().enumerate() {
        progress.set(format!("Downloading: EP {}", item.episode), index as u64);

        let mut response = get_response(client, &item.url, None, None, token)
            .await
            .and_then(ensure_success)
            .with_context(|| format!("failed to download EP {}", item.episode))?;
        let byte_bar = progress.start_bytes(item.file_name.clone(), response.content_length());

        send_chunk(&sender, ArchiveChunk::Entry(item.file_name.clone()), token).await?;

        let mut downloaded = 0u64;

        loop {
            let chunk = cancellable(token, async { response.chunk().await.context("failed download") })
                .await
                .with_context(|| format!("failed to download EP {}", item.episode));

            let chunk = match chunk {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(err) => {
                    byte_bar.abandon();
                    return Err(err);
                }
            };

            if chunk.is_empty() {
                continue;
            }

            downloaded += chunk.len() as u64;
            send_chunk(&sender, ArchiveChunk::Data(chunk), token).await?;
            byte_bar.set_position(downloaded);
        }

        send_chunk(&sender, ArchiveChunk::EntryEnd, token).await?;
        byte_bar.finish_and_clear();

        log::debug!("Added {} ({} bytes)", item.file_name, downloaded);
        progress.set(format!("Added EP {}", item.episode), index as u64 + 1);
    }

    send_chunk(&sender, ArchiveChunk::Finish, token).await
}

async fn send_chunk(
    sender: &mpsc::Sender<ArchiveChunk>,
    chunk: ArchiveChunk,
    token: &CancellationToken,
) -> Result<(), anyhow::Error> {
    cancellable(token, async {
        sender
            .send(chunk)
            .await
            .map_err(|_| ArchiveError::WriterClosed.into())
    })
    .await
}

async fn write_archive<W>(mut receiver: mpsc::Receiver<ArchiveChunk>, mut sink: W) -> Result<(), anyhow::Error>
where
    W: AsyncWrite + Unpin,
{
    let result = encode_entries(&mut receiver, &mut sink).await;

    // Producer sends fail from here on
    receiver.close();

    let closed = async {
        sink.flush().await?;
        sink.shutdown().await
    }
    .await
    .context("failed to close archive");

    result?;
    closed?;

    Ok(())
}

async fn encode_entries<W>(receiver: &mut mpsc::Receiver<ArchiveChunk>, sink: W) -> Result<(), anyhow::Error>
where
    W: AsyncWrite + Unpin,
{
    let mut writer = ZipFileWriter::with_tokio(sink);

    loop {
        let file_name = match receiver.recv().await {
            Some(ArchiveChunk::Entry(file_name)) => file_name,
            Some(ArchiveChunk::Finish) => break,
            Some(ArchiveChunk::Data(_) | ArchiveChunk::EntryEnd) => return Err(ArchiveError::NoEntryOpen.into()),
            None => return Err(ArchiveError::Unfinished.into()),
        };

        let entry = ZipEntryBuilder::new(file_name.clone().into(), Compression::Stored)
            .last_modification_date(ZipDateTime::from_chrono(&chrono::Utc::now()));
        let mut entry_writer = writer
            .write_entry_stream(entry)
            .await
            .with_context(|| format!("failed to start archive entry {file_name}"))?;

        loop {
            match receiver.recv().await {
                Some(ArchiveChunk::Data(data)) => entry_writer
                    .write_all(&data)
                    .await
                    .context("failed to write archive")?,
                Some(ArchiveChunk::EntryEnd) => break,
                Some(ArchiveChunk::Entry(_) | ArchiveChunk::Finish) => {
                    return Err(ArchiveError::EntryOpen(file_name).into());
                }
                None => return Err(ArchiveError::Unfinished.into()),
            }
        }

        entry_writer
            .close()
            .await
            .with_context(|| format!("failed to finish archive entry {file_name}"))?;
    }

    writer.close().await.context("failed to write archive directory")?;

    Ok(())
}
