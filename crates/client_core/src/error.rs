use shared::domain::DistroId;
use thiserror::Error;

use crate::gateway::GatewayError;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("distribution catalog has not been loaded yet")]
    CatalogNotLoaded,
    #[error("unknown distribution `{0}`")]
    UnknownDistribution(DistroId),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}
