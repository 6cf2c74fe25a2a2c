//! Host stream abstraction
//!
//! Log persistence never touches the filesystem directly: the embedding
//! host supplies a `StreamProvider` that opens byte streams by URI. A
//! filesystem-backed provider ships here for the CLI, and an in-memory
//! provider backs tests.

use crate::EngineResult;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Arc;

/// A writable stream that must be explicitly flushed and closed
pub trait StreamWriter: Write + Send {
    /// Flush buffered bytes and close the stream
    fn flush_and_close(self: Box<Self>) -> std::io::Result<()>;
}

/// Opens byte streams by URI on behalf of the engine
pub trait StreamProvider: Send + Sync {
    /// Open a stream for reading
    fn open_read(&self, uri: &str) -> EngineResult<Box<dyn Read + Send>>;
    /// Open (and truncate) a stream for writing
    fn open_write(&self, uri: &str) -> EngineResult<Box<dyn StreamWriter>>;
}

/// Filesystem-backed provider: URIs are paths relative to a root directory
#[derive(Debug, Clone)]
pub struct FileStreamProvider {
    root: PathBuf,
}

impl FileStreamProvider {
    /// Provider rooted at the given directory
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, uri: &str) -> PathBuf {
        self.root.join(uri)
    }
}

struct FileWriter(std::io::BufWriter<std::fs::File>);

impl Write for FileWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.write(buf)
    }
    fn flush(&mut self) -> std::io::Result<()> {
        self.0.flush()
    }
}

impl StreamWriter for FileWriter {
    fn flush_and_close(mut self: Box<Self>) -> std::io::Result<()> {
        self.0.flush()?;
        self.0.into_inner().map_err(|e| e.into_error())?.sync_all()
    }
}

impl StreamProvider for FileStreamProvider {
    fn open_read(&self, uri: &str) -> EngineResult<Box<dyn Read + Send>> {
        let file = std::fs::File::open(self.resolve(uri))?;
        Ok(Box::new(std::io::BufReader::new(file)))
    }

    fn open_write(&self, uri: &str) -> EngineResult<Box<dyn StreamWriter>> {
        let path = self.resolve(uri);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::File::create(path)?;
        Ok(Box::new(FileWriter(std::io::BufWriter::new(file))))
    }
}

/// In-memory provider for tests: streams are entries in a shared map
#[derive(Debug, Clone, Default)]
pub struct MemoryStreamProvider {
    files: Arc<Mutex<FxHashMap<String, Vec<u8>>>>,
}

impl MemoryStreamProvider {
    /// Empty provider
    pub fn new() -> Self {
        Self::default()
    }

    /// Current contents of a stream, if it was ever written
    pub fn contents(&self, uri: &str) -> Option<Vec<u8>> {
        self.files.lock().get(uri).cloned()
    }

    /// URIs of all written streams
    pub fn uris(&self) -> Vec<String> {
        let mut uris: Vec<String> = self.files.lock().keys().cloned().collect();
        uris.sort();
        uris
    }
}

struct MemoryWriter {
    uri: String,
    buf: Vec<u8>,
    files: Arc<Mutex<FxHashMap<String, Vec<u8>>>>,
}

impl Write for MemoryWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        self.files.lock().insert(self.uri.clone(), self.buf.clone());
        Ok(())
    }
}

impl StreamWriter for MemoryWriter {
    fn flush_and_close(self: Box<Self>) -> std::io::Result<()> {
        self.files.lock().insert(self.uri, self.buf);
        Ok(())
    }
}

impl StreamProvider for MemoryStreamProvider {
    fn open_read(&self, uri: &str) -> EngineResult<Box<dyn Read + Send>> {
        let bytes = self.files.lock().get(uri).cloned().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, format!("no stream: {}", uri))
        })?;
        Ok(Box::new(std::io::Cursor::new(bytes)))
    }

    fn open_write(&self, uri: &str) -> EngineResult<Box<dyn StreamWriter>> {
        Ok(Box::new(MemoryWriter {
            uri: uri.to_string(),
            buf: Vec::new(),
            files: Arc::clone(&self.files),
        }))
    }
}

/// Line-oriented diagnostics writer used by the TTD log. Writes through a
/// host stream so diagnostics follow the log, not stderr.
pub struct TraceLogger {
    sink: Option<Box<dyn StreamWriter>>,
    indent: usize,
}

impl TraceLogger {
    /// Logger writing to the given sink
    pub fn new(sink: Box<dyn StreamWriter>) -> Self {
        Self {
            sink: Some(sink),
            indent: 0,
        }
    }

    /// Disabled logger; all writes are dropped
    pub fn disabled() -> Self {
        Self {
            sink: None,
            indent: 0,
        }
    }

    /// True when a sink is attached
    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    /// Increase nesting for subsequent lines
    pub fn push_indent(&mut self) {
        self.indent += 1;
    }

    /// Decrease nesting
    pub fn pop_indent(&mut self) {
        self.indent = self.indent.saturating_sub(1);
    }

    /// Write one line at the current indent
    pub fn write_line(&mut self, line: &str) {
        if let Some(sink) = self.sink.as_mut() {
            let _ = writeln!(sink, "{:indent$}{}", "", line, indent = self.indent * 2);
        }
    }

    /// Flush and close the sink; the logger becomes disabled
    pub fn close(&mut self) {
        if let Some(sink) = self.sink.take() {
            let _ = sink.flush_and_close();
        }
    }
}

impl std::fmt::Debug for TraceLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceLogger")
            .field("enabled", &self.is_enabled())
            .field("indent", &self.indent)
            .finish()
    }
}
