//! Client version negotiation with the ingestion service.

use seqdrop_types::VersionResponse;
use std::cmp::Ordering;

/// Which front end is asking; each has its own route on the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientKind {
    Cli,
    Gui,
}

impl ClientKind {
    pub fn route(self) -> &'static str {
        match self {
            ClientKind::Cli => "api/v0/check_for_cli_update",
            ClientKind::Gui => "api/v0/check_upload_app_version",
        }
    }

    fn download_hint(self, download_url: &str) -> String {
        match self {
            ClientKind::Cli => format!(" from {}", download_url),
            ClientKind::Gui => format!(" from the <a href=\"{}\">uploader website</a>", download_url),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionCheck {
    /// The client is below the minimum supported version and must not be used.
    pub must_upgrade: bool,
    /// Message to show the user, if any.
    pub message: Option<String>,
}

impl VersionCheck {
    pub(crate) fn unreachable() -> Self {
        Self {
            must_upgrade: false,
            message: Some("Error connecting to server".to_string()),
        }
    }
}

/// Decide what to tell a client at `version` given the service's reply.
pub fn evaluate(
    version: &str,
    kind: ClientKind,
    response: &VersionResponse,
    download_url: &str,
) -> VersionCheck {
    let latest = &response.latest_version;
    let upgrade = format!(
        "Please upgrade your client to the latest version (v{}){}",
        latest,
        kind.download_hint(download_url)
    );

    if let Some(minimum) = &response.min_supported_version {
        if version_inadequate(version, minimum) {
            return VersionCheck {
                must_upgrade: true,
                message: Some(format!(
                    "{}; this version (v{}) is no longer supported.",
                    upgrade, version
                )),
            };
        }
    }

    if version_inadequate(version, latest) {
        return VersionCheck {
            must_upgrade: false,
            message: Some(upgrade),
        };
    }

    VersionCheck {
        must_upgrade: false,
        message: None,
    }
}

/// `true` if `client` sorts strictly before `server`.
///
/// Dotted components compare numerically when both are numbers and as text
/// otherwise; a version that is a prefix of another sorts first.
pub fn version_inadequate(client: &str, server: &str) -> bool {
    compare_versions(client, server) == Ordering::Less
}

fn compare_versions(a: &str, b: &str) -> Ordering {
    let mut left = a.trim().split('.');
    let mut right = b.trim().split('.');
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => {
                let ordering = match (x.parse::<u64>(), y.parse::<u64>()) {
                    (Ok(x), Ok(y)) => x.cmp(&y),
                    _ => x.cmp(y),
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
        }
    }
}
