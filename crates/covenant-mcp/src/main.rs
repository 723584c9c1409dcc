//! A persistent, project-scoped memory server for AI coding agents, speaking
//! the Model Context Protocol over stdio.
//!
//! Every mutating tool is gated by the covenant middleware (a session must be
//! briefed, and destructive actions need a recent `context_check`) and by the
//! phase tracker (tools are only visible in the ritual phase that follows
//! from the tool dispatch facade's workflow grouping). While the client is
//! idle past `idle_timeout`, a background scheduler re-evaluates past
//! decisions and looks for new connections between memories.

mod covenant;
mod dispatch;
mod dream;
mod phase;
mod protocol;
mod server;
mod tasks;

use std::io;
use std::sync::Arc;

use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

use covenant_core::{Config, Manager, Storage};

use crate::dream::DreamScheduler;
use crate::protocol::stdio::StdioTransport;
use crate::server::McpServer;
use crate::tasks::TaskManager;

/// Project root (§6): `CLAUDE_PROJECT_DIR`, then `DAEM0NMCP_PROJECT_ROOT`,
/// then the current working directory.
fn project_root() -> String {
    std::env::var("CLAUDE_PROJECT_DIR")
        .or_else(|_| std::env::var("DAEM0NMCP_PROJECT_ROOT"))
        .unwrap_or_else(|_| {
            std::env::current_dir()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_else(|_| ".".to_string())
        })
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with_writer(io::stderr)
        .with_target(false)
        .with_ansi(false)
        .init();

    info!("covenant-mcp v{} starting...", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env();
    let project = project_root();

    let storage = match Storage::open(Some(config.db_path()), project.clone()) {
        Ok(s) => s,
        Err(e) => {
            error!("failed to open storage: {}", e);
            std::process::exit(1);
        }
    };

    let manager = match Manager::new(storage, config.clone()) {
        Ok(m) => Arc::new(m),
        Err(e) => {
            error!("failed to initialize memory manager: {}", e);
            std::process::exit(1);
        }
    };
    info!(project = %project, "memory manager ready");

    let task_storage = Arc::new(Storage::open(Some(config.db_path()), project.clone()).unwrap_or_else(|e| {
        error!("failed to open task storage: {}", e);
        std::process::exit(1);
    }));
    let tasks = TaskManager::new(task_storage);

    let dream = DreamScheduler::new(Arc::clone(&manager), project.clone(), config.dream.clone());
    {
        let dream_loop = Arc::clone(&dream);
        tokio::spawn(async move {
            dream_loop.run().await;
        });
    }

    let server = McpServer::new(manager, dream, tasks, config.counsel_ttl);
    let transport = StdioTransport::new();

    info!("listening on stdio");
    if let Err(e) = transport.run(server).await {
        error!("server error: {}", e);
        std::process::exit(1);
    }

    info!("covenant-mcp shutting down");
}
