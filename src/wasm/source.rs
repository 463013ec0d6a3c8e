//! Module sources: where the bytes come from.
//!
//! Files are read whole, synchronously. URLs are fetched chunk by chunk and
//! every chunk is pushed through an incremental decoder as soon as it
//! arrives, so a broken module is rejected mid-download instead of after
//! the whole body has landed.

use std::fmt;
use std::path::{Path, PathBuf};

use reqwest::Client;
use wasmparser::{Chunk, Encoding, Parser, Payload};

use super::error::WasmError;

/// A module location: local file or network resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleSource {
    Path(PathBuf),
    Url(String),
}

impl ModuleSource {
    /// `http://` and `https://` strings are URLs; anything else is a path.
    pub fn parse(source: &str) -> Self {
        let lower = source.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            ModuleSource::Url(source.to_string())
        } else {
            ModuleSource::Path(PathBuf::from(source))
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, ModuleSource::Url(_))
    }
}

impl fmt::Display for ModuleSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleSource::Path(p) => write!(f, "{}", p.display()),
            ModuleSource::Url(u) => f.write_str(u),
        }
    }
}

impl From<&str> for ModuleSource {
    fn from(s: &str) -> Self {
        Self::parse(s)
    }
}

impl From<PathBuf> for ModuleSource {
    fn from(p: PathBuf) -> Self {
        ModuleSource::Path(p)
    }
}

/// Read a module file in one go.
pub fn read_file(path: &Path) -> Result<Vec<u8>, WasmError> {
    let bytes = std::fs::read(path)
        .map_err(|e| WasmError::Load(format!("{}: {e}", path.display())))?;
    tracing::debug!(path = %path.display(), bytes = bytes.len(), "read module file");
    Ok(bytes)
}

/// Fetch a module over HTTP, decoding the body as it streams in.
///
/// Transport failures, non-success statuses and bodies over `max_bytes`
/// are load errors. Anything the decoder rejects is a compilation error.
pub async fn fetch_streaming(
    client: &Client,
    url: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, WasmError> {
    let mut response = client
        .get(url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| WasmError::Load(format!("{url}: {e}")))?;

    if let Some(len) = response.content_length() {
        if len > max_bytes {
            return Err(WasmError::Load(format!(
                "{url}: content length {len} exceeds limit of {max_bytes} bytes"
            )));
        }
    }

    let mut decoder = StreamingDecoder::new();
    let mut chunks = 0usize;
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| WasmError::Load(format!("{url}: {e}")))?
    {
        chunks += 1;
        if decoder.received() as u64 + chunk.len() as u64 > max_bytes {
            return Err(WasmError::Load(format!(
                "{url}: body exceeds limit of {max_bytes} bytes"
            )));
        }
        decoder.push(&chunk)?;
    }

    let bytes = decoder.finish()?;
    tracing::debug!(url, chunks, bytes = bytes.len(), "fetched module");
    Ok(bytes)
}

/// Incremental structural decoder for a core module arriving in pieces.
///
/// Keeps every byte received (the engine compiles the full buffer at the
/// end) and advances a `wasmparser::Parser` as far as the data allows.
pub struct StreamingDecoder {
    parser: Parser,
    bytes: Vec<u8>,
    offset: usize,
    functions: usize,
    finished: bool,
}

impl fmt::Debug for StreamingDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamingDecoder")
            .field("received", &self.bytes.len())
            .field("decoded", &self.offset)
            .field("functions", &self.functions)
            .field("finished", &self.finished)
            .finish()
    }
}

impl Default for StreamingDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamingDecoder {
    pub fn new() -> Self {
        Self {
            parser: Parser::new(0),
            bytes: Vec::new(),
            offset: 0,
            functions: 0,
            finished: false,
        }
    }

    /// Bytes received so far.
    pub fn received(&self) -> usize {
        self.bytes.len()
    }

    /// Function bodies decoded so far.
    pub fn functions(&self) -> usize {
        self.functions
    }

    /// Feed the next chunk of the body.
    pub fn push(&mut self, chunk: &[u8]) -> Result<(), WasmError> {
        if self.finished {
            return Err(WasmError::Compilation(format!(
                "trailing bytes after end of module at offset {}",
                self.offset
            )));
        }
        self.bytes.extend_from_slice(chunk);
        self.advance(false)
    }

    /// Signal end of body; returns the complete module bytes.
    pub fn finish(mut self) -> Result<Vec<u8>, WasmError> {
        self.advance(true)?;
        if !self.finished {
            return Err(WasmError::Compilation(format!(
                "module truncated after {} bytes",
                self.bytes.len()
            )));
        }
        Ok(self.bytes)
    }

    fn advance(&mut self, eof: bool) -> Result<(), WasmError> {
        while !self.finished {
            let chunk = self
                .parser
                .parse(&self.bytes[self.offset..], eof)
                .map_err(|e| WasmError::Compilation(e.to_string()))?;

            let (consumed, payload) = match chunk {
                Chunk::NeedMoreData(_) => return Ok(()),
                Chunk::Parsed { consumed, payload } => (consumed, payload),
            };

            match payload {
                Payload::Version { encoding, .. } if encoding != Encoding::Module => {
                    return Err(WasmError::Compilation(
                        "expected a core module, found a component".into(),
                    ));
                }
                Payload::CodeSectionEntry(_) => self.functions += 1,
                Payload::End(_) => self.finished = true,
                _ => {}
            }
            self.offset += consumed;
        }
        Ok(())
    }
}
