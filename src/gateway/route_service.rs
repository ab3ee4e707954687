use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use super::{load_balancer::LoadBalancer, registry::ServiceRegistry};
use crate::errors::{ErrorCode, ErrorResponse};
use crate::shared_types::ServiceInstance;
use crate::upstream::{UpstreamError, UpstreamPool};
use crate::wire_protocol::GatewayMessage;

// -----------------------------------------------------------------------------
// ----- RouteError ------------------------------------------------------------

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("message has no bizType")]
    MissingBizType,

    #[error("no service registered for bizType {0}")]
    ServiceNotFound(String),

    #[error("no healthy instance for bizType {0}")]
    NoHealthyInstance(String),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

impl RouteError {
    pub fn to_error_response(&self) -> ErrorResponse {
        match self {
            RouteError::MissingBizType => ErrorResponse::bad_request(self.to_string()),
            RouteError::ServiceNotFound(_) | RouteError::NoHealthyInstance(_) => {
                ErrorResponse::new(ErrorCode::ServiceNotFound, self.to_string())
            }
            RouteError::Upstream(e) => e.to_error_response(),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- RouteService ----------------------------------------------------------

/// registry lookup -> health filter -> balance -> pooled send.
pub struct RouteService {
    registry: Arc<dyn ServiceRegistry>,
    balancer: Arc<dyn LoadBalancer>,
    pool: Arc<UpstreamPool>,
}

impl RouteService {
    pub fn new(
        registry: Arc<dyn ServiceRegistry>,
        balancer: Arc<dyn LoadBalancer>,
        pool: Arc<UpstreamPool>,
    ) -> Self {
        Self {
            registry,
            balancer,
            pool,
        }
    }

    pub async fn route(&self, message: &GatewayMessage) -> Result<GatewayMessage, RouteError> {
        let biz_type = message.biz_type.as_str();
        if biz_type.is_empty() {
            return Err(RouteError::MissingBizType);
        }

        let candidates = self.registry.get_services(biz_type).await;
        if candidates.is_empty() {
            return Err(RouteError::ServiceNotFound(biz_type.to_owned()));
        }

        let available: Vec<ServiceInstance> = candidates
            .iter()
            .filter(|i| i.is_available())
            .cloned()
            .collect();

        let instance = self
            .balancer
            .select(biz_type, &available)
            .ok_or_else(|| RouteError::NoHealthyInstance(biz_type.to_owned()))?;

        debug!(
            request_id = message.request_id,
            biz_type,
            instance = %instance,
            "routing"
        );

        let conn = self.pool.get_connection(&instance).await?;
        Ok(conn.send(message).await?)
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
