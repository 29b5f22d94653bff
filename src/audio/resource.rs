use bytes::{Buf, Bytes};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use crate::cache::CancelHandle;
use crate::sources::Track;

/// Container format guessed from the first bytes of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    WebM,
    Ogg,
    Mp4,
    Mp3,
    Flac,
    Wav,
    Unknown,
}

impl Container {
    pub fn sniff(head: &[u8]) -> Self {
        match head {
            [0x1A, 0x45, 0xDF, 0xA3, ..] => Self::WebM,
            [b'O', b'g', b'g', b'S', ..] => Self::Ogg,
            [_, _, _, _, b'f', b't', b'y', b'p', ..] => Self::Mp4,
            [b'I', b'D', b'3', ..] => Self::Mp3,
            [0xFF, second, ..] if second & 0xE0 == 0xE0 => Self::Mp3,
            [b'f', b'L', b'a', b'C', ..] => Self::Flac,
            [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'A', b'V', b'E', ..] => Self::Wav,
            _ => Self::Unknown,
        }
    }

    /// File extension handed to the demuxer as a probe hint.
    pub fn extension(&self) -> Option<&'static str> {
        match self {
            Self::WebM => Some("webm"),
            Self::Ogg => Some("ogg"),
            Self::Mp4 => Some("m4a"),
            Self::Mp3 => Some("mp3"),
            Self::Flac => Some("flac"),
            Self::Wav => Some("wav"),
            Self::Unknown => None,
        }
    }
}

/// Blocking reader over the chunks a decoder pump sends.
///
/// A closed channel is end of stream; an `Err` chunk surfaces as a read error.
pub struct StreamReader {
    rx: flume::Receiver<io::Result<Bytes>>,
    pending: Bytes,
}

impl StreamReader {
    pub fn new(rx: flume::Receiver<io::Result<Bytes>>) -> Self {
        Self {
            rx,
            pending: Bytes::new(),
        }
    }

    /// Chunks queued by the decoder and not yet read.
    pub fn buffered(&self) -> usize {
        self.rx.len()
    }
}

impl Read for StreamReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.pending.is_empty() {
            match self.rx.recv() {
                Ok(Ok(chunk)) => self.pending = chunk,
                Ok(Err(e)) => return Err(e),
                Err(flume::RecvError::Disconnected) => return Ok(0),
            }
        }

        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.advance(n);
        Ok(n)
    }
}

impl Seek for StreamReader {
    fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "live decoder stream is not seekable"))
    }
}

impl std::fmt::Debug for StreamReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamReader")
            .field("pending", &self.pending.len())
            .finish()
    }
}

#[derive(Debug)]
pub enum ResourceInput {
    /// Local file or cached blob.
    File(PathBuf),
    /// Live decoder output.
    Stream { reader: StreamReader, container: Container },
}

/// Aborts a live decode: kills the decoder and cancels its cache write.
#[derive(Debug)]
pub struct DecodeHandle {
    token: CancellationToken,
    cache: Option<CancelHandle>,
}

impl DecodeHandle {
    pub fn new(token: CancellationToken, cache: Option<CancelHandle>) -> Self {
        Self { token, cache }
    }

    pub fn abort(&self) {
        self.token.cancel();
        if let Some(cache) = &self.cache {
            cache.cancel();
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn take_cache_handle(&mut self) -> Option<CancelHandle> {
        self.cache.take()
    }
}

/// A track turned into something the audio sink can play.
#[derive(Debug)]
pub struct AudioResource {
    pub track: Track,
    pub input: ResourceInput,
    pub from_cache: bool,
    decode: Option<DecodeHandle>,
}

impl AudioResource {
    pub fn file(track: Track, path: PathBuf, from_cache: bool) -> Self {
        Self {
            track,
            input: ResourceInput::File(path),
            from_cache,
            decode: None,
        }
    }

    pub fn stream(track: Track, reader: StreamReader, container: Container, decode: DecodeHandle) -> Self {
        Self {
            track,
            input: ResourceInput::Stream { reader, container },
            from_cache: false,
            decode: Some(decode),
        }
    }

    pub fn take_decode_handle(&mut self) -> Option<DecodeHandle> {
        self.decode.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn sniffs_common_containers() {
        assert_eq!(Container::sniff(&[0x1A, 0x45, 0xDF, 0xA3, 0x01]), Container::WebM);
        assert_eq!(Container::sniff(b"OggS\0\x02"), Container::Ogg);
        assert_eq!(Container::sniff(b"\0\0\0\x20ftypM4A "), Container::Mp4);
        assert_eq!(Container::sniff(b"ID3\x04"), Container::Mp3);
        assert_eq!(Container::sniff(&[0xFF, 0xFB, 0x90]), Container::Mp3);
        assert_eq!(Container::sniff(b"fLaC\0"), Container::Flac);
        assert_eq!(Container::sniff(b"RIFF\x24\0\0\0WAVEfmt "), Container::Wav);
        assert_eq!(Container::sniff(b"<html>"), Container::Unknown);
        assert_eq!(Container::sniff(&[]), Container::Unknown);
    }

    #[test]
    fn reader_concatenates_chunks_until_close() {
        let (tx, rx) = flume::unbounded();
        tx.send(Ok(Bytes::from_static(b"hello "))).unwrap();
        tx.send(Ok(Bytes::from_static(b"world"))).unwrap();
        drop(tx);

        let mut out = String::new();
        StreamReader::new(rx).read_to_string(&mut out).unwrap();

        assert_eq!(out, "hello world");
    }

    #[test]
    fn reader_surfaces_stream_errors() {
        let (tx, rx) = flume::unbounded();
        tx.send(Ok(Bytes::from_static(b"abc"))).unwrap();
        tx.send(Err(io::Error::new(io::ErrorKind::BrokenPipe, "decoder died"))).unwrap();

        let mut reader = StreamReader::new(rx);
        let mut buf = [0u8; 2];
        assert_eq!(reader.read(&mut buf).unwrap(), 2);
        assert_eq!(reader.read(&mut buf).unwrap(), 1);
        assert_eq!(reader.read(&mut buf).unwrap_err().kind(), io::ErrorKind::BrokenPipe);
    }
}
