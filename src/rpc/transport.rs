//! HTTP transport for the supervisord XML-RPC endpoint.
//!
//! Each call opens a fresh connection (TCP or Unix socket), sends one
//! HTTP/1.0 `POST /RPC2` and reads until the server closes the stream.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::TcpStream;
#[cfg(unix)]
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use super::xmlrpc::{self, Value};
use super::{ProcessInfo, RpcConnector, SupervisorRpc};
use crate::core::errors::{CheckError, Result};

/// Environment key holding the control-plane URL.
pub const ENV_SERVER_URL: &str = "SUPERVISOR_SERVER_URL";
/// Environment key holding the basic-auth user.
pub const ENV_USERNAME: &str = "SUPERVISOR_USERNAME";
/// Environment key holding the basic-auth password.
pub const ENV_PASSWORD: &str = "SUPERVISOR_PASSWORD";

const RPC_PATH: &str = "/RPC2";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_RESPONSE_HEADERS: usize = 32;

/// Where the control plane listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// `http://host:port`
    Tcp { host: String, port: u16 },
    /// `unix:///path/to/supervisor.sock`
    Unix { path: PathBuf },
}

impl Endpoint {
    /// Parse a `SUPERVISOR_SERVER_URL` value.
    pub fn parse(url: &str) -> Result<Self> {
        if let Some(path) = url.strip_prefix("unix://") {
            if path.is_empty() {
                return Err(invalid_url(url, "empty socket path"));
            }
            return Ok(Self::Unix {
                path: PathBuf::from(path),
            });
        }
        if let Some(rest) = url.strip_prefix("http://") {
            let authority = rest.split('/').next().unwrap_or_default();
            let (host, port) = match authority.rsplit_once(':') {
                Some((host, port)) => {
                    let port = port
                        .parse::<u16>()
                        .map_err(|e| invalid_url(url, &format!("bad port: {e}")))?;
                    (host, port)
                }
                None => (authority, 80),
            };
            if host.is_empty() {
                return Err(invalid_url(url, "empty host"));
            }
            return Ok(Self::Tcp {
                host: host.to_string(),
                port,
            });
        }
        Err(invalid_url(url, "expected unix:// or http:// scheme"))
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tcp { host, port } => write!(f, "http://{host}:{port}"),
            Self::Unix { path } => write!(f, "unix://{}", path.display()),
        }
    }
}

fn invalid_url(url: &str, why: &str) -> CheckError {
    CheckError::InvalidConfig {
        details: format!("{ENV_SERVER_URL}={url:?}: {why}"),
    }
}

/// Builds [`XmlRpcClient`]s from a fixed endpoint and credentials.
#[derive(Debug, Clone)]
pub struct XmlRpcConnector {
    endpoint: Endpoint,
    credentials: Option<(String, String)>,
    timeout: Duration,
}

impl XmlRpcConnector {
    #[must_use]
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            credentials: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_credentials(mut self, username: String, password: String) -> Self {
        self.credentials = Some((username, password));
        self
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Resolve endpoint and credentials from an environment mapping.
    pub fn from_env(env: &HashMap<String, String>) -> Result<Self> {
        let url = env
            .get(ENV_SERVER_URL)
            .ok_or_else(|| CheckError::InvalidConfig {
                details: format!("{ENV_SERVER_URL} is not set; is this running under supervisord?"),
            })?;
        let mut connector = Self::new(Endpoint::parse(url)?);
        let username = env.get(ENV_USERNAME).cloned().unwrap_or_default();
        if !username.is_empty() {
            let password = env.get(ENV_PASSWORD).cloned().unwrap_or_default();
            connector = connector.with_credentials(username, password);
        }
        Ok(connector)
    }

    #[must_use]
    pub const fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    #[must_use]
    pub fn client(&self) -> XmlRpcClient {
        XmlRpcClient {
            connector: self.clone(),
        }
    }
}

impl RpcConnector for XmlRpcConnector {
    fn connect(&self) -> Result<Box<dyn SupervisorRpc>> {
        Ok(Box::new(self.client()))
    }
}

/// Synchronous supervisord XML-RPC client.
#[derive(Debug, Clone)]
pub struct XmlRpcClient {
    connector: XmlRpcConnector,
}

impl XmlRpcClient {
    /// Invoke `method` and decode its result.
    pub fn call(&self, method: &str, params: &[Value]) -> Result<Value> {
        let body = xmlrpc::encode_call(method, params);
        let request = self.render_request(&body);
        let raw = self.round_trip(request.as_bytes())?;
        let response = parse_http_response(&raw).map_err(|details| self.transport_err(details))?;
        xmlrpc::decode_response(&response)
    }

    fn render_request(&self, body: &str) -> String {
        let mut request = format!(
            "POST {RPC_PATH} HTTP/1.0\r\nHost: localhost\r\nUser-Agent: supervisor_checks\r\n\
             Content-Type: text/xml\r\nContent-Length: {}\r\n",
            body.len()
        );
        if let Some((user, password)) = &self.connector.credentials {
            request.push_str("Authorization: Basic ");
            request.push_str(&STANDARD.encode(format!("{user}:{password}")));
            request.push_str("\r\n");
        }
        request.push_str("\r\n");
        request.push_str(body);
        request
    }

    fn round_trip(&self, request: &[u8]) -> Result<Vec<u8>> {
        let timeout = Some(self.connector.timeout);
        let mut response = Vec::new();
        match &self.connector.endpoint {
            Endpoint::Tcp { host, port } => {
                let mut stream = TcpStream::connect((host.as_str(), *port))
                    .map_err(|e| self.transport_err(e))?;
                stream
                    .set_read_timeout(timeout)
                    .and_then(|()| stream.set_write_timeout(timeout))
                    .map_err(|e| self.transport_err(e))?;
                exchange(&mut stream, request, &mut response).map_err(|e| self.transport_err(e))?;
            }
            #[cfg(unix)]
            Endpoint::Unix { path } => {
                let mut stream = UnixStream::connect(path).map_err(|e| self.transport_err(e))?;
                stream
                    .set_read_timeout(timeout)
                    .and_then(|()| stream.set_write_timeout(timeout))
                    .map_err(|e| self.transport_err(e))?;
                exchange(&mut stream, request, &mut response).map_err(|e| self.transport_err(e))?;
            }
            #[cfg(not(unix))]
            Endpoint::Unix { .. } => {
                return Err(self.transport_err("unix sockets are not supported on this platform"));
            }
        }
        Ok(response)
    }

    fn transport_err(&self, details: impl ToString) -> CheckError {
        CheckError::RpcTransport {
            endpoint: self.connector.endpoint.to_string(),
            details: details.to_string(),
        }
    }
}

fn exchange(stream: &mut (impl Read + Write), request: &[u8], out: &mut Vec<u8>) -> std::io::Result<()> {
    stream.write_all(request)?;
    stream.flush()?;
    stream.read_to_end(out)?;
    Ok(())
}

/// Extract the body of a raw HTTP response, rejecting non-200 statuses and
/// bodies shorter than their declared `Content-Length`.
fn parse_http_response(raw: &[u8]) -> std::result::Result<String, String> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_RESPONSE_HEADERS];
    let mut response = httparse::Response::new(&mut headers);
    let head_len = match response
        .parse(raw)
        .map_err(|e| format!("malformed HTTP response: {e}"))?
    {
        httparse::Status::Complete(len) => len,
        httparse::Status::Partial => return Err("truncated HTTP response head".to_string()),
    };
    let code = response.code.unwrap_or_default();
    if code != 200 {
        return Err(format!(
            "unexpected HTTP status: {code} {}",
            response.reason.unwrap_or_default()
        ));
    }

    let body = &raw[head_len..];
    let declared = response
        .headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case("content-length"))
        .map(|h| {
            std::str::from_utf8(h.value)
                .ok()
                .and_then(|v| v.trim().parse::<usize>().ok())
                .ok_or_else(|| "bad Content-Length header".to_string())
        })
        .transpose()?;
    let body = match declared {
        Some(len) if len > body.len() => {
            return Err(format!(
                "truncated HTTP body: Content-Length {len}, received {}",
                body.len()
            ));
        }
        Some(len) => &body[..len],
        None => body,
    };
    String::from_utf8(body.to_vec()).map_err(|e| format!("HTTP body is not UTF-8: {e}"))
}

impl SupervisorRpc for XmlRpcClient {
    fn all_process_info(&self) -> Result<Vec<ProcessInfo>> {
        let value = self.call("supervisor.getAllProcessInfo", &[])?;
        xmlrpc::process_list_from_value(&value)
    }

    fn process_info(&self, qualified_name: &str) -> Result<ProcessInfo> {
        let value = self.call("supervisor.getProcessInfo", &[Value::from(qualified_name)])?;
        xmlrpc::process_info_from_value(&value)
    }

    fn stop_process(&self, qualified_name: &str, wait: bool) -> Result<()> {
        self.call(
            "supervisor.stopProcess",
            &[Value::from(qualified_name), Value::from(wait)],
        )
        .map(drop)
    }

    fn start_process(&self, qualified_name: &str, wait: bool) -> Result<()> {
        self.call(
            "supervisor.startProcess",
            &[Value::from(qualified_name), Value::from(wait)],
        )
        .map(drop)
    }
}
