use anyhow::Result;
use tracing::info;

use crate::config::Config;
use crate::mcp::McpServer;
use crate::pipeline::Pipeline;

/// Start the MCP server on the configured transport
pub async fn serve(project: &str, config: &Config) -> Result<()> {
    info!("MCP server for project: {}", project);
    info!(
        "Config: {}",
        if config.project.name != "unnamed-project" { "loaded" } else { "default" }
    );

    match config.server.transport.as_str() {
        "stdio" => {
            info!("Using stdio transport, at most {} sessions", config.server.max_sessions);
            // stdout carries protocol messages only
            let server = McpServer::new(Pipeline::new(config), &config.server);
            server.run().await
        }
        other => Err(anyhow::anyhow!("Unsupported server transport: {}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_transport_refused() {
        let mut config = Config::default();
        config.server.transport = "http".to_string();
        let err = serve(".", &config).await.unwrap_err();
        assert!(err.to_string().contains("http"));
    }
}
