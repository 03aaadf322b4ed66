//! scene-relay: remote control for a single-threaded scene host
//!
//! Clients connect over TCP and send one JSON command per connection. The
//! host application only allows its state to be changed from its own main
//! loop, so commands are not executed on the network side:
//! - `server` accepts connections and spawns a task per connection
//! - `connection` reads one request, queues it and waits for the reply
//! - `handoff` is the queue between network tasks and the host thread
//! - `drain` runs on the host's scheduler, executing queued commands
//! - `scene` is the in-memory scene the commands act on
//!
//! Features:
//! - JSON wire protocol, self-delimiting or length-prefixed
//! - Bounded request size, read deadline and queue depth
//! - Executor faults become error responses, never host crashes
//! - Configuration via CLI arguments or TOML file

pub mod client;
pub mod config;
pub mod connection;
pub mod drain;
pub mod executor;
pub mod handoff;
pub mod host;
pub mod protocol;
pub mod scene;
pub mod server;
