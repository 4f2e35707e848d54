//! Frontend server loop.
//!
//! Reads JSONL JSON-RPC from the transport, dispatches each request on
//! its own task (inbound RPCs run in parallel; there is no cross-request
//! ordering), and serializes responses back through one writer. Parse
//! errors are answered and do not kill the loop; EOF is a clean
//! shutdown.

use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncWrite, BufReader};
use tokio::sync::mpsc;

use finhub_rpc::{error, JsonlTransport, RpcResponse, TransportError};

use crate::frontend::HubFrontend;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// JSON-RPC server over async reader/writer streams.
pub struct HubServer<R, W> {
    transport: JsonlTransport<R, W>,
    frontend: Arc<HubFrontend>,
}

impl<R: AsyncBufRead + Unpin, W: AsyncWrite + Unpin> HubServer<R, W> {
    pub fn new(reader: R, writer: W, frontend: Arc<HubFrontend>) -> Self {
        Self {
            transport: JsonlTransport::new(reader, writer),
            frontend,
        }
    }

    /// Run until EOF or a fatal I/O error.
    pub async fn run(&mut self) -> Result<(), ServerError> {
        let (response_tx, mut response_rx) = mpsc::channel::<RpcResponse>(64);

        loop {
            tokio::select! {
                biased;

                msg = self.transport.read_message() => {
                    match msg {
                        Ok(Some(request)) => {
                            let frontend = Arc::clone(&self.frontend);
                            let response_tx = response_tx.clone();
                            tokio::spawn(async move {
                                if let Some(response) = frontend.dispatch(request).await {
                                    // Best-effort: the loop may be gone.
                                    let _ = response_tx.send(response).await;
                                }
                            });
                        }
                        Ok(None) => break,
                        Err(TransportError::Parse(err)) => {
                            let response = RpcResponse::error(
                                None,
                                error::PARSE_ERROR,
                                format!("Parse error: {err}"),
                            );
                            self.transport.write_response(&response).await?;
                        }
                        Err(TransportError::Io(err)) => {
                            return Err(ServerError::Io(err));
                        }
                    }
                }

                Some(response) = response_rx.recv() => {
                    self.transport.write_response(&response).await?;
                }
            }
        }

        // EOF: flush responses for requests already in flight.
        drop(response_tx);
        while let Some(response) = response_rx.recv().await {
            self.transport.write_response(&response).await?;
        }
        Ok(())
    }
}

/// Serve the frontend on stdin/stdout. Main entry point for the hub
/// binary.
pub async fn serve_stdio(frontend: Arc<HubFrontend>) -> Result<(), ServerError> {
    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();
    let mut server = HubServer::new(BufReader::new(stdin), stdout, frontend);
    server.run().await
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use finhub_core::{HubConfig, RegistryConfig};
    use finhub_registry::ServiceRegistry;
    use finhub_router::{HttpSpokeInvoker, ToolRouter};

    fn test_frontend() -> Arc<HubFrontend> {
        let registry = Arc::new(ServiceRegistry::new(RegistryConfig::default()));
        let router = Arc::new(ToolRouter::new(
            Arc::clone(&registry),
            Arc::new(HttpSpokeInvoker::new()),
            HubConfig::default().router,
        ));
        Arc::new(HubFrontend::new(registry, router, HubConfig::default()))
    }

    async fn run_session(input: &str) -> Vec<serde_json::Value> {
        let reader = BufReader::new(std::io::Cursor::new(input.as_bytes().to_vec()));
        let writer = Vec::<u8>::new();
        let mut server = HubServer::new(reader, writer, test_frontend());
        server.run().await.unwrap();

        let output = String::from_utf8(server.transport.writer_ref().clone()).unwrap();
        output
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn initialize_then_ping_session() {
        let input = concat!(
            "{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"initialize\"}\n",
            "{\"jsonrpc\":\"2.0\",\"id\":2,\"method\":\"ping\"}\n",
        );
        let responses = run_session(input).await;
        assert_eq!(responses.len(), 2);

        let init = responses
            .iter()
            .find(|r| r["id"] == 1)
            .expect("initialize response");
        assert_eq!(init["result"]["protocolVersion"], "2024-11-05");
        assert!(responses.iter().any(|r| r["id"] == 2));
    }

    #[tokio::test]
    async fn parse_error_does_not_end_the_session() {
        let input = concat!(
            "this is not json\n",
            "{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\n",
        );
        let responses = run_session(input).await;
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0]["error"]["code"], -32700);
        assert_eq!(responses[1]["id"], 1);
    }

    #[tokio::test]
    async fn notifications_produce_no_output() {
        let input = "{\"jsonrpc\":\"2.0\",\"method\":\"initialized\"}\n";
        let responses = run_session(input).await;
        assert!(responses.is_empty());
    }

    #[tokio::test]
    async fn empty_tools_list_before_any_registration() {
        let input = "{\"jsonrpc\":\"2.0\",\"id\":9,\"method\":\"tools/list\"}\n";
        let responses = run_session(input).await;
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0]["result"]["tools"], serde_json::json!([]));
    }
}
