//! scene-relay binary.
//!
//! `serve` (the default) binds the listener, then turns the main thread into
//! the host loop that drains and executes queued commands. `send` is a
//! one-shot client for a running relay.

use scene_relay::client;
use scene_relay::config::{Config, Mode};
use scene_relay::drain::DrainLoop;
use scene_relay::handoff::HandoffQueue;
use scene_relay::host::{HostScheduler, MainLoop};
use scene_relay::protocol::Command;
use scene_relay::scene::SceneExecutor;
use scene_relay::server::{BindError, Server};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// How long `send` waits for the relay to answer
const SEND_TIMEOUT: Duration = Duration::from_secs(30);

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let (config, mode) = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match mode {
        Mode::Serve => serve(config),
        Mode::Send { request } => send(&config, &request),
    }
}

fn serve(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    info!(
        listen = %config.listen,
        framing = ?config.framing,
        tick_interval_ms = config.tick_interval.as_millis() as u64,
        max_queue_depth = config.max_queue_depth,
        "Starting scene-relay"
    );

    let queue = Arc::new(HandoffQueue::new(config.max_queue_depth));
    debug!(capacity = queue.capacity(), "Command queue ready");

    // Bind failure is fatal and reported before anything else starts
    let server = Server::bind(&config, Arc::clone(&queue))?;
    let interrupt = Arc::new(AtomicBool::new(false));
    let mut server = server.spawn(Some(Arc::clone(&interrupt)))?;

    let mut main_loop = MainLoop::new();
    main_loop.register(Box::new(DrainLoop::new(
        Arc::clone(&queue),
        SceneExecutor::new(config.render_dir.clone()),
        config.tick_interval,
    )));

    main_loop.run_until(&interrupt);
    let acceptor_failed = server.exited_early();

    // Keep answering in-flight connections until the acceptor is done
    server.stop();
    main_loop.run_until(server.finished());
    server.join();

    // Final tick for anything queued while the acceptor wound down
    main_loop.turn(Instant::now() + config.tick_interval);

    if acceptor_failed {
        return Err(BindError::AcceptorExited.into());
    }
    info!("scene-relay stopped");
    Ok(())
}

fn send(config: &Config, request: &str) -> Result<(), Box<dyn std::error::Error>> {
    let command: Command = serde_json::from_str(request)?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let response = runtime.block_on(client::send(
        &config.listen,
        &command,
        config.framing,
        SEND_TIMEOUT,
    ))?;

    let line = serde_json::to_string(&response)?;
    std::io::Write::write_all(&mut std::io::stdout(), format!("{line}\n").as_bytes())?;
    Ok(())
}
