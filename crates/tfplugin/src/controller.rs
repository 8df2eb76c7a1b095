//! go-plugin controller service.

use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status};
use tracing::info;

use crate::proto::plugin::{Empty, grpc_controller_server::GrpcController};

/// Answers `plugin.GRPCController/Shutdown` by cancelling the server's
/// shutdown token.
#[derive(Debug, Clone)]
pub struct Controller {
    shutdown: CancellationToken,
}

impl Controller {
    /// Creates a controller that cancels `shutdown` when asked to stop.
    #[must_use]
    pub const fn new(shutdown: CancellationToken) -> Self {
        Self { shutdown }
    }
}

#[tonic::async_trait]
impl GrpcController for Controller {
    async fn shutdown(&self, _request: Request<Empty>) -> Result<Response<Empty>, Status> {
        info!("Terraform requested plugin shutdown");
        self.shutdown.cancel();
        Ok(Response::new(Empty {}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_cancels_token() {
        let token = CancellationToken::new();
        let controller = Controller::new(token.clone());
        assert!(!token.is_cancelled());

        controller.shutdown(Request::new(Empty {})).await.unwrap();
        assert!(token.is_cancelled());
    }
}
