// Stdio JSON-RPC server exposing the pipeline as MCP tools

pub mod server;
pub mod tools;

pub use server::McpServer;
