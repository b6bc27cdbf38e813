//! Minimal client for the snapd REST API.
//!
//! snapd listens on a local unix socket and speaks HTTP. Every response is
//! wrapped in a JSON envelope `{type, status-code, status, result}`; the
//! envelope's `status-code`, not the HTTP status line, decides the outcome.
//!
//! The client distinguishes two benign "absent" outcomes from real failures:
//! - [`ConciergeError::SnapNotInstalled`] when `/v2/snaps/{name}` answers 404
//! - [`ConciergeError::SnapNotFound`] when `/v2/find?name={name}` answers 404
//!   or an empty result list

mod http;

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ConciergeError;

/// Default location of the snapd socket.
pub const DEFAULT_SOCKET: &str = "/run/snapd.socket";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Risk levels a bare channel name can refer to.
const RISKS: [&str; 4] = ["stable", "candidate", "beta", "edge"];

/// Common envelope of snapd API responses.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SnapdResponse {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(rename = "status-code")]
    pub status_code: u16,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub result: serde_json::Value,
}

/// A snap as reported by snapd, either installed or from the store.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SnapdSnap {
    pub id: String,
    pub name: String,
    pub status: String,
    pub version: String,
    pub revision: String,
    pub channel: String,
    pub tracking_channel: String,
    pub confinement: String,
    pub channels: BTreeMap<String, ChannelInfo>,
}

/// Channel-specific information for a snap in the store.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ChannelInfo {
    pub revision: String,
    pub confinement: String,
    pub version: String,
    pub channel: String,
}

/// Queried state of a snap. Never persisted; re-query before relying on it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapInfo {
    pub installed: bool,
    /// Normalised channel the installed snap tracks.
    pub tracking_channel: Option<String>,
    /// Whether the snap (at the desired channel) uses classic confinement.
    pub classic: bool,
}

#[derive(Debug, Deserialize)]
struct ConnectionsResult {
    #[serde(default)]
    established: Vec<Connection>,
}

#[derive(Debug, Deserialize)]
struct Connection {
    plug: PlugRef,
}

#[derive(Debug, Deserialize)]
struct PlugRef {
    snap: String,
    plug: String,
}

/// Normalises a channel name to `track/risk` form.
///
/// `stable` becomes `latest/stable`, `3.6` becomes `3.6/stable`; anything
/// already containing a `/` is returned unchanged.
pub fn normalize_channel(channel: &str) -> String {
    if channel.contains('/') {
        channel.to_string()
    } else if RISKS.contains(&channel) {
        format!("latest/{}", channel)
    } else {
        format!("{}/stable", channel)
    }
}

/// Client for the snapd REST API.
#[derive(Debug, Clone)]
pub struct SnapdClient {
    socket_path: Utf8PathBuf,
    timeout: Duration,
}

impl Default for SnapdClient {
    fn default() -> Self {
        Self::new(DEFAULT_SOCKET)
    }
}

impl SnapdClient {
    pub fn new(socket_path: impl Into<Utf8PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn socket_path(&self) -> &Utf8Path {
        &self.socket_path
    }

    /// Queries an installed snap (`GET /v2/snaps/{name}`).
    pub fn get_snap(&self, name: &str) -> Result<SnapdSnap, ConciergeError> {
        let mut url = base_url()?;
        url.path_segments_mut()
            .map_err(|()| ConciergeError::Snapd("cannot build snap URL".to_string()))?
            .pop_if_empty()
            .extend(["v2", "snaps", name]);

        let response = self.get(&url)?;
        match response.status_code {
            200 => {}
            404 => {
                return Err(ConciergeError::SnapNotInstalled {
                    name: name.to_string(),
                });
            }
            code => return Err(unexpected_status(code, &response)),
        }

        serde_json::from_value(response.result)
            .map_err(|e| ConciergeError::Snapd(format!("failed to parse snap info: {}", e)))
    }

    /// Searches the store for a snap by exact name (`GET /v2/find?name={name}`)
    /// and returns the first match.
    pub fn find_one(&self, name: &str) -> Result<SnapdSnap, ConciergeError> {
        let mut url = base_url()?;
        url.set_path("/v2/find");
        url.query_pairs_mut().append_pair("name", name);

        let response = self.get(&url)?;
        match response.status_code {
            200 => {}
            404 => {
                return Err(ConciergeError::SnapNotFound {
                    name: name.to_string(),
                });
            }
            code => return Err(unexpected_status(code, &response)),
        }

        let snaps: Vec<SnapdSnap> = serde_json::from_value(response.result)
            .map_err(|e| ConciergeError::Snapd(format!("failed to parse snap list: {}", e)))?;

        snaps.into_iter().next().ok_or_else(|| ConciergeError::SnapNotFound {
            name: name.to_string(),
        })
    }

    /// Lists the plugs of `name` that are currently connected, as
    /// `snap:plug` strings (`GET /v2/connections?snap={name}`).
    pub fn connections(&self, name: &str) -> Result<HashSet<String>, ConciergeError> {
        let mut url = base_url()?;
        url.set_path("/v2/connections");
        url.query_pairs_mut().append_pair("snap", name);

        let response = self.get(&url)?;
        if response.status_code != 200 {
            return Err(unexpected_status(response.status_code, &response));
        }

        let result: ConnectionsResult = serde_json::from_value(response.result)
            .map_err(|e| ConciergeError::Snapd(format!("failed to parse connections: {}", e)))?;

        Ok(result
            .established
            .into_iter()
            .map(|c| format!("{}:{}", c.plug.snap, c.plug.plug))
            .collect())
    }

    /// Combines the installed and store views of a snap.
    ///
    /// Confinement is taken from the installed snap when it already tracks
    /// the desired channel, otherwise from the store's channel map. A store
    /// lookup failure is not fatal: it only leaves `classic` unset, and the
    /// subsequent `snap install` reports the real problem.
    pub fn snap_info(&self, name: &str, channel: &str) -> Result<SnapInfo, ConciergeError> {
        let desired = (!channel.is_empty()).then(|| normalize_channel(channel));

        let installed = match self.get_snap(name) {
            Ok(snap) => Some(snap),
            Err(ConciergeError::SnapNotInstalled { .. }) => None,
            Err(e) => return Err(e),
        };

        let tracking_channel = installed
            .as_ref()
            .map(|snap| snap.tracking_channel.as_str())
            .filter(|c| !c.is_empty())
            .map(normalize_channel);

        if let Some(snap) = &installed
            && (desired.is_none() || desired == tracking_channel)
        {
            return Ok(SnapInfo {
                installed: true,
                tracking_channel,
                classic: snap.confinement == "classic",
            });
        }

        let lookup = desired.unwrap_or_else(|| "latest/stable".to_string());
        let classic = match self.find_one(name) {
            Ok(found) => found
                .channels
                .get(&lookup)
                .map_or(found.confinement == "classic", |c| c.confinement == "classic"),
            Err(ConciergeError::SnapNotFound { .. }) => {
                tracing::debug!(snap = name, "snap not found in store");
                false
            }
            Err(e) => {
                tracing::warn!(snap = name, "failed to look up snap in store: {}", e);
                false
            }
        };

        Ok(SnapInfo {
            installed: installed.is_some(),
            tracking_channel,
            classic,
        })
    }

    /// Lists the store channels available for a snap, sorted.
    pub fn snap_channels(&self, name: &str) -> Result<Vec<String>, ConciergeError> {
        let snap = self.find_one(name)?;
        Ok(snap.channels.into_keys().collect())
    }

    fn get(&self, url: &Url) -> Result<SnapdResponse, ConciergeError> {
        let target = &url[url::Position::BeforePath..];
        tracing::trace!(socket = %self.socket_path, "GET {}", target);

        let body = http::get(&self.socket_path, target, self.timeout)?;
        serde_json::from_slice(&body)
            .map_err(|e| ConciergeError::Snapd(format!("failed to parse response: {}", e)))
    }
}

fn base_url() -> Result<Url, ConciergeError> {
    Url::parse("http://localhost/")
        .map_err(|e| ConciergeError::Snapd(format!("invalid base URL: {}", e)))
}

fn unexpected_status(code: u16, response: &SnapdResponse) -> ConciergeError {
    ConciergeError::Snapd(format!("unexpected status code: {} ({})", code, response.status))
}
