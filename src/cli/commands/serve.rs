//! The serve command: control plane, reconciler, and in-process agents.
//!
//! The network binding that would carry agent streams between machines is an
//! external concern; `serve` wires agents to the engine through the same
//! stream seam that binding would use, giving a complete working system in
//! one process. With `--agents 0` only the control plane and reconciler run,
//! leaving the stream seam to an external binding.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::info;

use crate::agent::{AgentRuntime, PluginRegistry};
use crate::domain::models::stream_pair;
use crate::services::{Config, Reconciler, Session, TaskServer};

pub async fn handle_serve(server: Arc<TaskServer>, config: Config, agents: usize) -> Result<()> {
    let shutdown = server.shutdown_token().clone();

    let reconciler = Reconciler::new(server.clone(), config.reconcile.clone());
    let reconciler_handle = {
        let cancel = shutdown.clone();
        tokio::spawn(async move { reconciler.run(cancel).await })
    };

    let registry = Arc::new(PluginRegistry::builtin(&config.worker));
    let mut agent_handles = Vec::new();
    for n in 0..agents {
        let server = server.clone();
        let config = config.clone();
        let registry = registry.clone();
        let shutdown = shutdown.clone();
        agent_handles.push(tokio::spawn(async move {
            let runtime = AgentRuntime::new(registry, config.worker.clone());
            // Re-open the stream when it drops, like a remote agent would
            // reconnect to the control plane.
            loop {
                let (server_stream, agent_stream) =
                    stream_pair(config.dispatch.outbound_capacity);
                let session =
                    Session::spawn(server.clone(), server_stream, config.dispatch.clone());
                info!(agent = n, session_id = %session.id(), "Agent connected");

                runtime.run(agent_stream, shutdown.clone()).await;
                session.shutdown().await;

                if shutdown.is_cancelled() {
                    break;
                }
                tokio::time::sleep(Duration::from_secs(
                    config.worker.reconnect_delay_secs,
                ))
                .await;
            }
        }));
    }

    info!(
        agents,
        port = config.server.port,
        endpoint = %config.server.endpoint,
        "taskherd serving; press Ctrl-C to stop"
    );
    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    shutdown.cancel();

    for handle in agent_handles {
        let _ = handle.await;
    }
    let _ = reconciler_handle.await;
    Ok(())
}
