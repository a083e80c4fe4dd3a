//! Stream connection strings.
//!
//! Dahua/Amcrest-style cameras expose the same feed as `subtype=0` (main,
//! full resolution) and `subtype=1` (sub, low resolution). Detection runs on
//! the sub stream; snapshots come from the main stream.

use anyhow::{anyhow, Context, Result};
use url::Url;

const MAIN_SUBTYPE: &str = "subtype=0";
const SUB_SUBTYPE: &str = "subtype=1";

/// Where the camera lives, as configured.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StreamSettings {
    /// Complete URL. Takes precedence over the host/path parts.
    pub url: Option<String>,
    pub host: String,
    pub path: String,
    pub user: Option<String>,
    pub password: Option<String>,
    /// Use the low-resolution sub stream for detection.
    pub use_substream: bool,
}

/// The two connection strings of one camera.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamEndpoints {
    /// Low-resolution stream fed to the detector.
    pub detection: String,
    /// Full-resolution stream used for snapshots.
    pub snapshot: String,
}

impl StreamEndpoints {
    pub fn from_settings(settings: &StreamSettings) -> Result<Self> {
        let base = match settings.url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => url.to_string(),
            _ => assemble_url(settings)?,
        };
        let detection = if settings.use_substream {
            base.replace(MAIN_SUBTYPE, SUB_SUBTYPE)
        } else {
            base.clone()
        };
        let snapshot = base.replace(SUB_SUBTYPE, MAIN_SUBTYPE);
        Ok(Self {
            detection,
            snapshot,
        })
    }
}

fn assemble_url(settings: &StreamSettings) -> Result<String> {
    let host = settings.host.trim();
    if host.is_empty() {
        return Err(anyhow!("stream host is empty and no stream url is set"));
    }
    let path = settings.path.trim();
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    };
    let mut url = Url::parse(&format!("rtsp://{}{}", host, path))
        .with_context(|| format!("invalid stream host/path {}{}", host, path))?;
    let user = settings.user.as_deref().unwrap_or("");
    let password = settings.password.as_deref().unwrap_or("");
    if !user.is_empty() || !password.is_empty() {
        url.set_username(user)
            .map_err(|_| anyhow!("stream url cannot carry a username"))?;
        url.set_password(Some(password))
            .map_err(|_| anyhow!("stream url cannot carry a password"))?;
    }
    Ok(url.to_string())
}

/// Strip credentials from a connection string for logging.
pub fn redact(url: &str) -> String {
    match Url::parse(url) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("***"));
            }
            parsed.to_string()
        }
        Err(_) => "<unparseable stream url>".to_string(),
    }
}
