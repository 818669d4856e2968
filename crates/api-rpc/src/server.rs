//! JSON-RPC Server
//!
//! Serves the job store methods over TCP on localhost.

use crate::handler::RpcHandler;
use crate::types::{
    AddChunkRequest, AddJobRequest, JobRequest, PollRequest, QueueStatusRequest, RerunJobRequest,
};
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::RpcModule;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

const DEFAULT_RPC_HOST: &str = "127.0.0.1";
const DEFAULT_RPC_PORT: u16 = 9627;

/// RPC Server Configuration
#[derive(Debug, Clone)]
pub struct RpcServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for RpcServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_RPC_HOST.to_string(),
            port: DEFAULT_RPC_PORT,
        }
    }
}

/// RPC Server
pub struct RpcServer {
    config: RpcServerConfig,
    handler: Arc<RpcHandler>,
}

impl RpcServer {
    pub fn new(config: RpcServerConfig, handler: Arc<RpcHandler>) -> Self {
        Self { config, handler }
    }

    /// Start the JSON-RPC server, returning its handle and bound address
    pub async fn start(self) -> Result<(ServerHandle, SocketAddr), String> {
        let addr = format!("{}:{}", self.config.host, self.config.port);

        info!(
            host = %self.config.host,
            port = %self.config.port,
            "Starting JSON-RPC server on TCP"
        );

        let server = Server::builder()
            .build(&addr)
            .await
            .map_err(|e| format!("Failed to build server on {}: {}", addr, e))?;
        let local_addr = server
            .local_addr()
            .map_err(|e| format!("Failed to read bound address: {}", e))?;

        let mut module = RpcModule::new(());

        // Register methods
        let handler = self.handler.clone();
        module
            .register_async_method("jobstore.addJob.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: AddJobRequest = params.parse()?;
                    handler.add_job(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        let handler = self.handler.clone();
        module
            .register_async_method("jobstore.addChunk.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: AddChunkRequest = params.parse()?;
                    handler.add_chunk(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        let handler = self.handler.clone();
        module
            .register_async_method("jobstore.abortJob.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: JobRequest = params.parse()?;
                    handler.abort_job(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        let handler = self.handler.clone();
        module
            .register_async_method("jobstore.getJob.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: JobRequest = params.parse()?;
                    handler.get_job(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        let handler = self.handler.clone();
        module
            .register_async_method("jobstore.rerunJob.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: RerunJobRequest = params.parse()?;
                    handler.rerun_job(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        // Admin & broker APIs
        let handler = self.handler.clone();
        module
            .register_async_method("admin.queueStatus.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: QueueStatusRequest =
                        params.parse().unwrap_or_else(|_| QueueStatusRequest::default());
                    handler.queue_status(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        let handler = self.handler.clone();
        module
            .register_async_method("broker.poll.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: PollRequest = params.parse()?;
                    handler.poll(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        info!(addr = %local_addr, "JSON-RPC server started successfully");

        let handle = server.start(module);
        Ok((handle, local_addr))
    }
}
