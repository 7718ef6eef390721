//! Minimal fleet v1 API client over HTTP/1.1.

use std::time::Duration;

use bytes::Bytes;
use http::{Method, StatusCode, Uri};
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::options::UnitOption;
use crate::error::{SchedulerError, SchedulerResult};
use crate::retry::RetryPolicy;

const API_PREFIX: &str = "/fleet/v1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A unit as stored by fleet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetUnit {
    pub name: String,
    #[serde(default)]
    pub options: Vec<UnitOption>,
    #[serde(default)]
    pub desired_state: String,
    #[serde(default)]
    pub current_state: String,
    #[serde(default, rename = "machineID")]
    pub machine_id: String,
}

/// Systemd state of a unit on the machine it runs on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetUnitState {
    pub name: String,
    #[serde(default)]
    pub hash: String,
    #[serde(default, rename = "machineID")]
    pub machine_id: String,
    #[serde(default)]
    pub systemd_load_state: String,
    #[serde(default)]
    pub systemd_active_state: String,
    #[serde(default)]
    pub systemd_sub_state: String,
}

impl FleetUnitState {
    pub fn is_failed(&self) -> bool {
        self.systemd_active_state == "failed"
    }

    pub fn is_running(&self) -> bool {
        self.systemd_active_state == "active" && self.systemd_sub_state == "running"
    }

    pub fn is_active(&self) -> bool {
        self.systemd_active_state == "active"
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FleetMachine {
    pub id: String,
    #[serde(default, rename = "primaryIP")]
    pub primary_ip: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UnitPage {
    #[serde(default)]
    units: Vec<FleetUnit>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatePage {
    #[serde(default)]
    states: Vec<FleetUnitState>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MachinePage {
    #[serde(default)]
    machines: Vec<FleetMachine>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UnitUpdate<'a> {
    desired_state: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<&'a [UnitOption]>,
}

/// Desired states understood by fleet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DesiredState {
    Inactive,
    Loaded,
    Launched,
}

impl DesiredState {
    fn as_str(self) -> &'static str {
        match self {
            Self::Inactive => "inactive",
            Self::Loaded => "loaded",
            Self::Launched => "launched",
        }
    }
}

/// Stateless fleet client. Each request opens a fresh connection.
#[derive(Debug, Clone)]
pub struct FleetClient {
    /// `host:port` to connect to.
    address: String,
    retry: RetryPolicy,
}

impl FleetClient {
    /// Create a client for an `http://host[:port]` endpoint.
    pub fn new(endpoint: &str, retry: RetryPolicy) -> SchedulerResult<Self> {
        let uri: Uri = endpoint
            .parse()
            .map_err(|e| SchedulerError::Config(format!("invalid endpoint {endpoint:?}: {e}")))?;
        if uri.scheme_str() != Some("http") {
            return Err(SchedulerError::Config(format!(
                "endpoint {endpoint:?} must use http://"
            )));
        }
        let host = uri
            .host()
            .ok_or_else(|| SchedulerError::Config(format!("endpoint {endpoint:?} has no host")))?;
        let port = uri.port_u16().unwrap_or(80);
        Ok(Self {
            address: format!("{host}:{port}"),
            retry,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub async fn machines(&self) -> SchedulerResult<Vec<FleetMachine>> {
        let mut machines = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page: MachinePage = self.get_json(&page_path("/machines", token.as_deref())).await?;
            machines.extend(page.machines);
            match page.next_page_token {
                Some(next) if !next.is_empty() => token = Some(next),
                _ => return Ok(machines),
            }
        }
    }

    pub async fn units(&self) -> SchedulerResult<Vec<FleetUnit>> {
        let mut units = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page: UnitPage = self.get_json(&page_path("/units", token.as_deref())).await?;
            units.extend(page.units);
            match page.next_page_token {
                Some(next) if !next.is_empty() => token = Some(next),
                _ => return Ok(units),
            }
        }
    }

    /// States of all units, or only of `unit` when given.
    pub async fn states(&self, unit: Option<&str>) -> SchedulerResult<Vec<FleetUnitState>> {
        let mut states = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let mut path = page_path("/state", token.as_deref());
            if let Some(unit) = unit {
                path.push(if path.contains('?') { '&' } else { '?' });
                path.push_str("unitName=");
                path.push_str(unit);
            }
            let page: StatePage = self.get_json(&path).await?;
            states.extend(page.states);
            match page.next_page_token {
                Some(next) if !next.is_empty() => token = Some(next),
                _ => return Ok(states),
            }
        }
    }

    pub async fn unit(&self, name: &str) -> SchedulerResult<FleetUnit> {
        self.get_json(&format!("/units/{name}")).await
    }

    /// Create a unit with `options`, or update the desired state of an
    /// existing one when `options` is `None`.
    pub async fn put_unit(
        &self,
        name: &str,
        state: DesiredState,
        options: Option<&[UnitOption]>,
    ) -> SchedulerResult<()> {
        let body = serde_json::to_vec(&UnitUpdate {
            desired_state: state.as_str(),
            options,
        })
        .map_err(|e| SchedulerError::InvalidUnit {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
        let body = Bytes::from(body);
        let path = format!("/units/{name}");
        self.retry
            .run("put unit", || self.send(Method::PUT, &path, body.clone()))
            .await
            .map(|_| ())
    }

    pub async fn delete_unit(&self, name: &str) -> SchedulerResult<()> {
        let path = format!("/units/{name}");
        self.retry
            .run("delete unit", || self.send(Method::DELETE, &path, Bytes::new()))
            .await
            .map(|_| ())
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> SchedulerResult<T> {
        let body = self
            .retry
            .run("get", || self.send(Method::GET, path, Bytes::new()))
            .await?;
        serde_json::from_slice(&body).map_err(|e| {
            SchedulerError::Transient(format!("malformed response for {path}: {e}"))
        })
    }

    /// One request, with the response status mapped onto scheduler errors.
    async fn send(&self, method: Method, path: &str, body: Bytes) -> SchedulerResult<Bytes> {
        let uri = format!("http://{}{API_PREFIX}{path}", self.address);
        let (status, bytes) = tokio::time::timeout(REQUEST_TIMEOUT, self.exchange(&method, &uri, body))
            .await
            .map_err(|_| SchedulerError::Transient(format!("{method} {uri} timed out")))??;
        debug!(%method, %uri, %status, "fleet request");

        if status.is_success() {
            return Ok(bytes);
        }
        let message = String::from_utf8_lossy(&bytes).trim().to_string();
        Err(if status == StatusCode::NOT_FOUND {
            SchedulerError::NotFound(path.trim_start_matches('/').to_string())
        } else if status.is_server_error() {
            SchedulerError::Transient(format!("{method} {uri}: {status} {message}"))
        } else {
            SchedulerError::Rejected {
                status: status.as_u16(),
                message,
            }
        })
    }

    async fn exchange(&self, method: &Method, uri: &str, body: Bytes) -> SchedulerResult<(StatusCode, Bytes)> {
        let stream = tokio::net::TcpStream::connect(&self.address)
            .await
            .map_err(|e| transient(method, uri, e))?;
        let io = TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| transient(method, uri, e))?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let mut request = http::Request::builder()
            .method(method.clone())
            .uri(uri)
            .header(http::header::HOST, &self.address)
            .header(http::header::USER_AGENT, "convoy/0.1");
        if !body.is_empty() {
            request = request.header(http::header::CONTENT_TYPE, "application/json");
        }
        let request = request
            .body(Full::new(body))
            .map_err(|e| SchedulerError::Config(e.to_string()))?;

        let response = sender.send_request(request).await.map_err(|e| transient(method, uri, e))?;
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .map_err(|e| transient(method, uri, e))?
            .to_bytes();
        Ok((status, bytes))
    }
}

fn transient(method: &Method, uri: &str, error: impl std::fmt::Display) -> SchedulerError {
    SchedulerError::Transient(format!("{method} {uri}: {error}"))
}

fn page_path(base: &str, token: Option<&str>) -> String {
    match token {
        Some(token) => format!("{base}?nextPageToken={token}"),
        None => base.to_string(),
    }
}

/// `name@instance.ext` to `name@.ext`, for instance units.
pub fn template_name(unit: &str) -> Option<String> {
    let (prefix, rest) = unit.split_once('@')?;
    let (instance, ext) = rest.rsplit_once('.')?;
    if instance.is_empty() {
        return None;
    }
    Some(format!("{prefix}@.{ext}"))
}
