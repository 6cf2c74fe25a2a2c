//! Client transports
//!
//! The client speaks `Request`/`Response` over a transport seam. The
//! socket transport frames messages to a remote server process; the
//! local transport drives a `JitService` in-process, which is how the
//! engine runs when process isolation is disabled and how most tests
//! exercise the full RPC surface without sockets.

use std::io::{BufReader, BufWriter};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;

use vireo_jit_proto::framing::{read_frame, write_frame, TransportError};
use vireo_jit_proto::messages::{Request, Response};
use vireo_jit_server::JitService;

/// One synchronous request/response exchange
pub trait JitTransport: Send {
    /// Send the request and wait for its response
    fn call(&mut self, request: Request) -> Result<Response, TransportError>;
}

/// Framed TCP transport to a server process
pub struct SocketTransport {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
}

impl SocketTransport {
    /// Connect to a listening JIT server
    pub fn connect(addr: impl ToSocketAddrs) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr)?;
        let reader = BufReader::new(stream.try_clone()?);
        let writer = BufWriter::new(stream);
        Ok(Self { reader, writer })
    }
}

impl JitTransport for SocketTransport {
    fn call(&mut self, request: Request) -> Result<Response, TransportError> {
        write_frame(&mut self.writer, &request)?;
        read_frame(&mut self.reader)
    }
}

/// In-process transport driving a shared `JitService` directly
pub struct LocalTransport {
    service: Arc<JitService>,
}

impl LocalTransport {
    /// Wrap a service instance
    pub fn new(service: Arc<JitService>) -> Self {
        Self { service }
    }

    /// The wrapped service
    pub fn service(&self) -> &Arc<JitService> {
        &self.service
    }
}

impl JitTransport for LocalTransport {
    fn call(&mut self, request: Request) -> Result<Response, TransportError> {
        Ok(self.service.handle(request))
    }
}
