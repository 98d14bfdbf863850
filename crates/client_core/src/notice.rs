//! User-facing error notices derived from gateway failures.

use std::fmt;

use shared::error::ErrorCode;
use tracing::error;

use crate::gateway::GatewayError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeCategory {
    Unreachable,
    Rejected,
    Defect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeContext {
    LoadCatalog,
    LoadVersions,
    Install,
    OpenSettings,
    Subscribe,
}

impl fmt::Display for NoticeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NoticeContext::LoadCatalog => "loading distributions",
            NoticeContext::LoadVersions => "loading versions",
            NoticeContext::Install => "starting the install",
            NoticeContext::OpenSettings => "opening settings",
            NoticeContext::Subscribe => "subscribing to install progress",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorNotice {
    category: NoticeCategory,
    context: NoticeContext,
    message: String,
}

impl ErrorNotice {
    pub fn from_gateway(context: NoticeContext, err: &GatewayError) -> Self {
        let (category, message) = match err {
            GatewayError::Unreachable(_) => (
                NoticeCategory::Unreachable,
                format!("Installer backend unreachable while {context}; check that it is running and retry."),
            ),
            GatewayError::Rejected(api) => {
                let message = match (context, api.code) {
                    (NoticeContext::Install, ErrorCode::NotFound) => {
                        format!("Version no longer available: {}", api.message)
                    }
                    (NoticeContext::LoadVersions, ErrorCode::NotFound) => {
                        format!("Distribution no longer available: {}", api.message)
                    }
                    _ => format!("Refused while {context}: {}", api.message),
                };
                (NoticeCategory::Rejected, message)
            }
            GatewayError::Malformed { command, reason } => {
                error!(%command, %reason, %context, "contract violation surfaced to user");
                (
                    NoticeCategory::Defect,
                    format!("Unexpected response from the installer backend while {context}."),
                )
            }
        };
        Self {
            category,
            context,
            message,
        }
    }

    /// Unreachable backends block the user until they retry.
    pub fn is_blocking(&self) -> bool {
        self.category == NoticeCategory::Unreachable
    }

    pub fn category(&self) -> NoticeCategory {
        self.category
    }

    pub fn context(&self) -> NoticeContext {
        self.context
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for ErrorNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

#[cfg(test)]
mod tests {
    use shared::{error::ApiError, protocol::CommandName};

    use super::*;

    #[test]
    fn unreachable_is_blocking() {
        let notice = ErrorNotice::from_gateway(
            NoticeContext::LoadCatalog,
            &GatewayError::Unreachable("connection refused".into()),
        );
        assert!(notice.is_blocking());
        assert_eq!(notice.category(), NoticeCategory::Unreachable);
        assert!(notice.message().contains("loading distributions"));
    }

    #[test]
    fn install_not_found_is_actionable() {
        let notice = ErrorNotice::from_gateway(
            NoticeContext::Install,
            &GatewayError::Rejected(ApiError::not_found("version not found")),
        );
        assert!(!notice.is_blocking());
        assert_eq!(notice.category(), NoticeCategory::Rejected);
        assert_eq!(notice.message(), "Version no longer available: version not found");
    }

    #[test]
    fn malformed_is_reported_generically() {
        let notice = ErrorNotice::from_gateway(
            NoticeContext::LoadVersions,
            &GatewayError::Malformed {
                command: CommandName::ListVersions,
                reason: "expected a sequence".into(),
            },
        );
        assert_eq!(notice.category(), NoticeCategory::Defect);
        assert!(!notice.message().contains("expected a sequence"));
    }
}
