//! `vireo jit-server` - run the out-of-process JIT compilation server.

use std::sync::Arc;

use vireo_jit_server::{JitServer, JitService};

/// Bind the service and run the accept loop until a client sends Shutdown.
pub fn serve(addr: &str) -> anyhow::Result<()> {
    let service = Arc::new(JitService::new());
    let server = JitServer::bind(addr, service)?;
    println!("vireo jit-server v{}", env!("CARGO_PKG_VERSION"));
    println!("Listening on {}", server.local_addr()?);
    server.run()?;
    println!("Shutdown complete.");
    Ok(())
}
