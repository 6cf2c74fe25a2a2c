//! Socket server loop
//!
//! One listener thread accepts connections; each connection gets its own
//! thread running a read-dispatch-write loop over length-prefixed frames.
//! The connection tracks every thread context initialized through it and
//! runs them down when the socket drops, so a client that dies without
//! calling `CleanupThreadContext` leaks nothing.

use std::io::{BufReader, BufWriter};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::thread;

use crate::service::JitService;
use vireo_jit_proto::framing::{read_frame, write_frame, TransportError};
use vireo_jit_proto::handle::ThreadContextHandle;
use vireo_jit_proto::messages::{Request, Response};

/// TCP front end over a `JitService`
pub struct JitServer {
    listener: TcpListener,
    service: Arc<JitService>,
}

impl JitServer {
    /// Bind the listener; the service starts accepting once `run` is called
    pub fn bind(addr: impl ToSocketAddrs, service: Arc<JitService>) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        Ok(Self { listener, service })
    }

    /// The bound address (port 0 binds resolve here)
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until a `Shutdown` request arrives.
    ///
    /// The connection that carries the shutdown pokes the listener with a
    /// throwaway connect so this loop observes the flag instead of
    /// blocking in `accept` forever.
    pub fn run(self) -> std::io::Result<()> {
        let addr = self.listener.local_addr()?;
        let mut connections = Vec::new();

        loop {
            let (stream, _peer) = self.listener.accept()?;
            if self.service.is_shut_down() {
                break;
            }
            let service = Arc::clone(&self.service);
            connections.push(thread::spawn(move || {
                serve_connection(service, stream, addr);
            }));
        }

        for conn in connections {
            let _ = conn.join();
        }
        Ok(())
    }

    /// Run the accept loop on its own thread
    pub fn spawn(self) -> thread::JoinHandle<std::io::Result<()>> {
        thread::spawn(move || self.run())
    }
}

fn serve_connection(service: Arc<JitService>, stream: TcpStream, server_addr: SocketAddr) {
    let reader_stream = match stream.try_clone() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("jit server: failed to clone connection: {}", e);
            return;
        }
    };
    let mut reader = BufReader::new(reader_stream);
    let mut writer = BufWriter::new(stream);
    let mut owned: Vec<ThreadContextHandle> = Vec::new();

    loop {
        let request: Request = match read_frame(&mut reader) {
            Ok(req) => req,
            Err(TransportError::Closed) => break,
            Err(e) => {
                eprintln!("jit server: dropping connection: {}", e);
                break;
            }
        };

        let shutting_down = matches!(&request, Request::Shutdown);
        let cleaned_up = match &request {
            Request::CleanupThreadContext { handle } => Some(*handle),
            _ => None,
        };

        let response = service.handle(request);

        match &response {
            Response::ThreadContextInitialized {
                handle: Some(h), ..
            } => owned.push(*h),
            Response::Ack { status } if status.is_success() => {
                if let Some(h) = cleaned_up {
                    owned.retain(|o| *o != h);
                }
            }
            _ => {}
        }

        if let Err(e) = write_frame(&mut writer, &response) {
            eprintln!("jit server: write failed: {}", e);
            break;
        }

        if shutting_down {
            // wake the acceptor so it can observe the flag
            let _ = TcpStream::connect(server_addr);
            break;
        }
    }

    // connection rundown: contexts the client never cleaned up
    for handle in owned {
        service.cleanup_thread_handle(handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vireo_jit_proto::workitem::ThreadContextData;

    fn roundtrip(
        stream: &mut (impl std::io::Read + std::io::Write),
        req: &Request,
    ) -> Response {
        write_frame(stream, req).unwrap();
        read_frame(stream).unwrap()
    }

    #[test]
    fn test_serve_and_shutdown() {
        let service = Arc::new(JitService::new());
        let server = JitServer::bind("127.0.0.1:0", Arc::clone(&service)).unwrap();
        let addr = server.local_addr().unwrap();
        let join = server.spawn();

        let mut conn = TcpStream::connect(addr).unwrap();
        let resp = roundtrip(
            &mut conn,
            &Request::InitializeThreadContext {
                data: ThreadContextData {
                    process_id: std::process::id(),
                    client_base_addr: 0,
                },
            },
        );
        assert!(resp.status().is_success());
        assert_eq!(service.registry().thread_count(), 1);

        let resp = roundtrip(&mut conn, &Request::Shutdown);
        assert!(resp.status().is_success());
        join.join().unwrap().unwrap();
    }

    #[test]
    fn test_dropped_connection_runs_down_contexts() {
        let service = Arc::new(JitService::new());
        let server = JitServer::bind("127.0.0.1:0", Arc::clone(&service)).unwrap();
        let addr = server.local_addr().unwrap();
        let join = server.spawn();

        {
            let mut conn = TcpStream::connect(addr).unwrap();
            let resp = roundtrip(
                &mut conn,
                &Request::InitializeThreadContext {
                    data: ThreadContextData {
                        process_id: std::process::id(),
                        client_base_addr: 0,
                    },
                },
            );
            assert!(resp.status().is_success());
            // dropping the stream without cleanup
        }

        // rundown happens on the connection thread after EOF
        for _ in 0..200 {
            if service.registry().thread_count() == 0 {
                break;
            }
            thread::sleep(std::time::Duration::from_millis(5));
        }
        assert_eq!(service.registry().thread_count(), 0);

        let mut conn = TcpStream::connect(addr).unwrap();
        let resp = roundtrip(&mut conn, &Request::Shutdown);
        assert!(resp.status().is_success());
        join.join().unwrap().unwrap();
    }
}
