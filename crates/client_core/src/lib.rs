//! Client-side orchestration for installing Linux distributions through an
//! external installer backend.
//!
//! Every outbound request goes through [`CommandGateway`]; install progress
//! arrives only on the progress channel managed by [`SubscriptionManager`].
//! A [`Session`] routes both sources into one inbox folded by
//! [`SessionState::apply`], which is where stale version responses are
//! dropped and the last progress event wins.

pub mod catalog;
pub mod error;
pub mod gateway;
pub mod install;
pub mod notice;
pub mod selection;
pub mod session;
pub mod state;
pub mod subscription;
pub mod transport;

pub use catalog::{filter, CatalogSnapshot, CatalogStore, VersionList};
pub use error::SessionError;
pub use gateway::{CommandGateway, CommandTransport, GatewayError};
pub use install::{
    validate_install, ActiveInstall, InstallOrchestrator, InstallProjection, ProgressOutcome,
};
pub use notice::{ErrorNotice, NoticeCategory, NoticeContext};
pub use selection::{SelectionChange, SelectionController, VersionsOutcome};
pub use session::{Session, SessionConfig};
pub use state::{Inbound, SessionState, SessionView, Update};
pub use subscription::{FrameStream, ProgressSource, SubscriptionHandle, SubscriptionManager};
pub use transport::{
    parse_backend_url, HttpCommandTransport, TransportError, WebSocketProgressSource,
};

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;
