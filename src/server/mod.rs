/// Server process management for KV Runner.
///
/// This module covers everything that touches the OS on behalf of an
/// instance: handing out ports, launching the server binary, finding the
/// process that holds a port, probing it and terminating it.
///
/// # Components
///
/// * `port` - Port allocation over the configured range
/// * `locator` - Port to process lookup in the OS process table
/// * `process` - Launching the server binary
/// * `probe` - Liveness probe over the server's text protocol
/// * `control` - Liveness checks and graceful/forced termination
///
/// # Examples
///
/// Allocating a port:
///
/// ```no_run
/// use kv_runner::server::PortAllocator;
/// use std::collections::HashSet;
///
/// let allocator = PortAllocator::new(5000, 5999);
/// let recorded: HashSet<u16> = [5000, 5001].into_iter().collect();
/// let port = allocator.allocate(&recorded).unwrap();
/// assert!(port >= 5002);
/// ```
///
/// Finding the server holding a port:
///
/// ```no_run
/// use kv_runner::server::{ProcessLocator, SystemProcessLocator};
///
/// let locator = SystemProcessLocator::new("redis-server");
/// if let Some(process) = locator.find_process_on_port(5000) {
///     println!("port 5000 is served by PID {}", process.pid);
/// }
/// ```
pub mod control;
pub mod locator;
pub mod port;
pub mod probe;
mod process;

pub use control::Termination;
pub use locator::{ProcessHandle, ProcessLocator, SystemProcessLocator};
pub use port::{PortAllocator, is_port_free};
pub use probe::ProbeError;
pub use process::{ServerCommand, ServerProcess};
