//! Shared User-Agent strings for media hosts and release downloads.
//!
//! Media CDNs frequently reject non-browser agents, so stream and fragment
//! transfers (and the extractor subprocess) present a browser User-Agent.
//! Binary bootstrap traffic identifies the tool instead.

/// Project URL for User-Agent identification on bootstrap downloads.
const PROJECT_UA_URL: &str = "https://github.com/fierce/unidl";

/// Browser User-Agent used for extraction and media transfers.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// User-Agent for media requests.
#[must_use]
pub fn media_user_agent() -> &'static str {
    BROWSER_USER_AGENT
}

/// User-Agent for dependency release downloads (identifies the tool).
#[must_use]
pub(crate) fn bootstrap_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("unidl/{version} (+{PROJECT_UA_URL})")
}
