use bytes::{Bytes, BytesMut};
use std::io;
use std::process::Stdio;
use std::sync::Arc;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, ChildStdout, Command};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::resource::{AudioResource, Container, DecodeHandle, StreamReader};
use crate::cache::StreamCache;
use crate::config::DecoderSettings;
use crate::error::DecodeError;
use crate::library::Listing;
use crate::sources::Track;

const CHUNK_SIZE: usize = 16 * 1024;
/// Chunks the decoder may run ahead of playback before it is paused.
const PLAY_LANE_CHUNKS: usize = 64;

type ChunkSender = flume::Sender<io::Result<Bytes>>;

/// Turns tracks into playable [`AudioResource`]s.
///
/// Local files are opened as-is. Remote tracks come from the stream cache when
/// present; otherwise the decoder process is spawned and its stdout is teed
/// into both the playback reader and a cache write. The playback lane is
/// bounded, so a stalled reader pauses the decoder instead of buffering the
/// whole stream in memory.
pub struct AudioPipeline {
    settings: DecoderSettings,
    cache: Option<Arc<StreamCache>>,
}

impl AudioPipeline {
    pub fn new(settings: DecoderSettings, cache: Option<Arc<StreamCache>>) -> Self {
        Self { settings, cache }
    }

    pub async fn materialize(&self, track: &Track) -> Result<AudioResource, DecodeError> {
        match track {
            Track::Local { listing, .. } => {
                let path = listing
                    .path()
                    .ok_or_else(|| DecodeError::MissingFile(listing.id.clone().into()))?
                    .to_path_buf();
                if !fs::try_exists(&path).await? {
                    return Err(DecodeError::MissingFile(path));
                }
                debug!("📁 Playing local file {}", path.display());
                Ok(AudioResource::file(track.clone(), path, false))
            }
            Track::Remote { listing, .. } => {
                if let Some(cache) = &self.cache {
                    if let Some(path) = cache.get(&listing.id).await {
                        info!("💽 Playing {} from cache", listing.id);
                        return Ok(AudioResource::file(track.clone(), path, true));
                    }
                }
                self.stream(track, listing).await
            }
        }
    }

    fn command_args(&self, url: &str) -> Vec<String> {
        self.settings
            .args
            .iter()
            .map(|arg| arg.replace("{url}", url).replace("{rate}", &self.settings.rate_limit))
            .collect()
    }

    async fn stream(&self, track: &Track, listing: &Listing) -> Result<AudioResource, DecodeError> {
        let url = listing
            .url()
            .ok_or_else(|| DecodeError::MissingUrl(listing.id.clone()))?;

        info!("🎵 Decoding {} via {}", listing.id, self.settings.program);
        let mut child = Command::new(&self.settings.program)
            .args(self.command_args(url))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| DecodeError::Spawn {
                program: self.settings.program.clone(),
                source,
            })?;

        let Some(mut stdout) = child.stdout.take() else {
            let _ = child.kill().await;
            return Err(DecodeError::EmptyStream);
        };

        let mut head = BytesMut::with_capacity(CHUNK_SIZE);
        match timeout(self.settings.first_byte_timeout, stdout.read_buf(&mut head)).await {
            Err(_) => {
                let _ = child.kill().await;
                return Err(DecodeError::FirstByteTimeout(self.settings.first_byte_timeout));
            }
            Ok(Err(e)) => {
                let _ = child.kill().await;
                return Err(e.into());
            }
            Ok(Ok(0)) => return Err(Self::failure_or_empty(&mut child).await),
            Ok(Ok(_)) => {}
        }

        let head = head.freeze();
        let container = Container::sniff(&head);
        debug!("🔎 {} looks like {:?}", listing.id, container);

        let (play_tx, play_rx) = flume::bounded(PLAY_LANE_CHUNKS);
        let (cache_tx, cache_handle) = match &self.cache {
            Some(cache) => {
                let (tx, rx) = flume::unbounded();
                let handle = cache.save(listing, Box::pin(rx.into_stream()));
                (Some(tx), Some(handle))
            }
            None => (None, None),
        };

        let token = CancellationToken::new();
        tokio::spawn(pump(
            listing.id.clone(),
            child,
            stdout,
            head,
            Tee {
                play: Some(play_tx),
                cache: cache_tx,
            },
            token.clone(),
        ));

        Ok(AudioResource::stream(
            track.clone(),
            StreamReader::new(play_rx),
            container,
            DecodeHandle::new(token, cache_handle),
        ))
    }

    async fn failure_or_empty(child: &mut Child) -> DecodeError {
        let stderr = read_stderr(child).await;
        match child.wait().await {
            Ok(status) if !status.success() => DecodeError::ProcessFailed {
                status: status.to_string(),
                stderr,
            },
            Ok(_) => DecodeError::EmptyStream,
            Err(e) => DecodeError::Io(e),
        }
    }
}

async fn read_stderr(child: &mut Child) -> String {
    let mut stderr = String::new();
    if let Some(mut pipe) = child.stderr.take() {
        let _ = pipe.read_to_string(&mut stderr).await;
    }
    stderr.trim().to_string()
}

/// Fans decoder output out to playback and the cache write.
struct Tee {
    play: Option<ChunkSender>,
    cache: Option<ChunkSender>,
}

impl Tee {
    /// Waits while the playback lane is full.
    async fn send(&mut self, chunk: Bytes) {
        if let Some(cache) = &self.cache {
            if cache.send(Ok(chunk.clone())).is_err() {
                self.cache = None;
            }
        }
        // A dropped playback reader must not stall the cache write.
        if let Some(play) = &self.play {
            if play.send_async(Ok(chunk)).await.is_err() {
                debug!("Playback reader gone, draining into cache only");
                self.play = None;
            }
        }
    }

    /// Never blocks: a full playback lane just misses the error and sees the
    /// channel close instead.
    fn fail(&mut self, kind: io::ErrorKind, message: &str) {
        if let Some(play) = self.play.take() {
            let _ = play.try_send(Err(io::Error::new(kind, message.to_string())));
        }
        if let Some(cache) = self.cache.take() {
            let _ = cache.send(Err(io::Error::new(kind, message.to_string())));
        }
    }

    fn is_closed(&self) -> bool {
        self.play.is_none() && self.cache.is_none()
    }
}

async fn pump(
    id: String,
    mut child: Child,
    mut stdout: ChildStdout,
    head: Bytes,
    mut tee: Tee,
    token: CancellationToken,
) {
    let stderr = child.stderr.take();
    let stderr_task = tokio::spawn(async move {
        let mut out = String::new();
        if let Some(mut pipe) = stderr {
            let _ = pipe.read_to_string(&mut out).await;
        }
        out
    });

    let read_result = copy_chunks(head, &mut stdout, &mut tee, &token).await;

    if token.is_cancelled() {
        let _ = child.kill().await;
        tee.fail(io::ErrorKind::Interrupted, "decode aborted");
        debug!("⏹️ Decode of {} aborted", id);
        return;
    }

    if tee.is_closed() {
        let _ = child.kill().await;
        debug!("Nobody is reading {} anymore, decoder stopped", id);
        return;
    }

    if let Err(e) = read_result {
        let _ = child.kill().await;
        error!("❌ Reading decoder output for {} failed: {}", id, e);
        tee.fail(e.kind(), &e.to_string());
        return;
    }

    let status = child.wait().await;
    let stderr = stderr_task.await.unwrap_or_default();
    match status {
        Ok(status) if status.success() => {
            debug!("✅ Decoder finished for {}", id);
        }
        Ok(status) => {
            warn!("❌ Decoder for {} exited with {}: {}", id, status, stderr.trim());
            tee.fail(io::ErrorKind::Other, &format!("decoder exited with {status}"));
        }
        Err(e) => {
            warn!("❌ Waiting on decoder for {} failed: {}", id, e);
            tee.fail(e.kind(), &e.to_string());
        }
    }
}

async fn copy_chunks<R>(head: Bytes, reader: &mut R, tee: &mut Tee, token: &CancellationToken) -> io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut chunk = head;
    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => return Ok(()),
            _ = tee.send(chunk) => {}
        }
        if tee.is_closed() {
            return Ok(());
        }

        let mut buf = BytesMut::with_capacity(CHUNK_SIZE);
        let read = tokio::select! {
            biased;
            _ = token.cancelled() => return Ok(()),
            read = reader.read_buf(&mut buf) => read?,
        };
        if read == 0 {
            return Ok(());
        }
        chunk = buf.freeze();
    }
}
