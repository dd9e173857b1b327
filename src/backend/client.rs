//! HTTP client for a Vault-compatible secret backend
//!
//! One `VaultClient` is shared by every tree worker; `reqwest`'s blocking
//! client pools connections internally and is safe to use from several
//! threads. KV v2 paths are routed to their `data/` and `metadata/`
//! endpoints using a cache of mount prefixes, so each mount is described
//! only once per client.

use super::types::{KvVersion, MountInfo, MountKind, SecretData, VersionMeta};
use super::Backend;
use crate::error::{BackendError, BackendResult};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::StatusCode;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::{debug, trace};

/// Header carrying the authentication token
const TOKEN_HEADER: &str = "X-Vault-Token";

/// Connection settings for a backend target
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base address, e.g. `https://vault.example.com:8200`
    pub addr: String,

    /// Authentication token
    pub token: String,

    /// Per-request timeout
    pub timeout: Duration,

    /// Skip TLS certificate verification
    pub skip_verify: bool,
}

/// Blocking HTTP backend client
pub struct VaultClient {
    client: Client,
    config: ClientConfig,
    mounts: RwLock<Vec<MountInfo>>,
}

impl VaultClient {
    /// Build a client for the given target
    pub fn new(config: ClientConfig) -> BackendResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .danger_accept_invalid_certs(config.skip_verify)
            .build()
            .map_err(|e| BackendError::Init(e.to_string()))?;

        Ok(Self {
            client,
            config,
            mounts: RwLock::new(Vec::new()),
        })
    }

    /// Base address of the target
    pub fn addr(&self) -> &str {
        &self.config.addr
    }

    fn url(&self, api_path: &str) -> String {
        format!(
            "{}/v1/{}",
            self.config.addr.trim_end_matches('/'),
            api_path.trim_start_matches('/')
        )
    }

    /// Send a request and map non-success statuses to backend errors
    fn send(&self, path: &str, request: RequestBuilder) -> BackendResult<Response> {
        let response = request
            .header(TOKEN_HEADER, &self.config.token)
            .send()
            .map_err(|e| BackendError::Transport {
                path: path.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        trace!(path = %path, status = status.as_u16(), "Backend response");

        if status.is_success() {
            return Ok(response);
        }

        match status {
            StatusCode::NOT_FOUND => Err(BackendError::NotFound {
                path: path.to_string(),
            }),
            StatusCode::FORBIDDEN => Err(BackendError::PermissionDenied {
                path: path.to_string(),
            }),
            _ => {
                let body = response.text().unwrap_or_default();
                Err(BackendError::Status {
                    path: path.to_string(),
                    code: status.as_u16(),
                    message: error_message(&body, status),
                })
            }
        }
    }

    fn get_json(&self, path: &str, api_path: &str, query: &[(&str, String)]) -> BackendResult<Value> {
        let url = self.url(api_path);
        debug!("GET {}", url);

        let response = self.send(path, self.client.get(&url).query(query))?;
        response.json::<Value>().map_err(|e| BackendError::Malformed {
            path: path.to_string(),
            reason: e.to_string(),
        })
    }

    fn post_json(&self, path: &str, api_path: &str, body: &Value) -> BackendResult<()> {
        let url = self.url(api_path);
        debug!("POST {}", url);

        self.send(path, self.client.post(&url).json(body))?;
        Ok(())
    }

    fn delete_request(&self, path: &str, api_path: &str) -> BackendResult<()> {
        let url = self.url(api_path);
        debug!("DELETE {}", url);

        self.send(path, self.client.delete(&url))?;
        Ok(())
    }

    /// Resolve the API path for `path`, inserting `segment` after the mount
    /// on KV v2
    fn route(&self, path: &str, segment: &str) -> BackendResult<(MountInfo, String)> {
        let mount = self.mount(path)?;
        let api_path = if mount.version.is_versioned() {
            format!("{}{}/{}", mount.path, segment, mount.relative(path))
        } else {
            path.trim_matches('/').to_string()
        };
        Ok((mount, api_path))
    }

    fn cached_mount(&self, path: &str) -> Option<MountInfo> {
        self.mounts
            .read()
            .iter()
            .filter(|m| m.contains(path))
            .max_by_key(|m| m.path.len())
            .cloned()
    }

    fn remember_mount(&self, mount: MountInfo) {
        let mut mounts = self.mounts.write();
        if !mounts.iter().any(|m| m.path == mount.path) {
            mounts.push(mount);
        }
    }
}

impl Backend for VaultClient {
    fn list(&self, path: &str) -> BackendResult<Vec<String>> {
        let (_, api_path) = self.route(path, "metadata")?;
        let body = self.get_json(path, &api_path, &[("list", "true".to_string())])?;
        parse_list(path, &body)
    }

    fn read(&self, path: &str, version: Option<u32>) -> BackendResult<SecretData> {
        let (mount, api_path) = self.route(path, "data")?;
        let query: Vec<(&str, String)> = match version {
            Some(v) if mount.version.is_versioned() => vec![("version", v.to_string())],
            _ => Vec::new(),
        };
        let body = self.get_json(path, &api_path, &query)?;
        parse_secret_data(path, &body, mount.version)
    }

    fn versions(&self, path: &str) -> BackendResult<Vec<VersionMeta>> {
        let (mount, api_path) = self.route(path, "metadata")?;
        if !mount.version.is_versioned() {
            // Flat secrets have exactly one version when they exist at all
            self.read(path, None)?;
            return Ok(vec![VersionMeta::alive(1)]);
        }
        let body = self.get_json(path, &api_path, &[])?;
        parse_versions(path, &body)
    }

    fn mounts(&self, kind: MountKind) -> BackendResult<Vec<String>> {
        let body = self.get_json("sys/mounts", "sys/mounts", &[])?;
        let mounts = parse_mounts(&body);

        let mut names = Vec::new();
        for mount in mounts {
            if mount.kind == kind {
                names.push(mount.path.trim_end_matches('/').to_string());
            }
            self.remember_mount(mount);
        }
        Ok(names)
    }

    fn mount(&self, path: &str) -> BackendResult<MountInfo> {
        if let Some(mount) = self.cached_mount(path) {
            return Ok(mount);
        }

        let api_path = format!("sys/internal/ui/mounts/{}", path.trim_matches('/'));
        let body = self.get_json(path, &api_path, &[])?;
        let mount = parse_mount_description(path, &body)?;
        debug!(mount = %mount.path, version = %mount.version, "Discovered mount");
        self.remember_mount(mount.clone());
        Ok(mount)
    }

    fn undelete(&self, path: &str, version: u32) -> BackendResult<()> {
        let (mount, api_path) = self.route(path, "undelete")?;
        if !mount.version.is_versioned() {
            return Err(BackendError::Unsupported {
                path: path.to_string(),
                operation: "undelete".into(),
            });
        }
        self.post_json(path, &api_path, &json!({ "versions": [version] }))
    }

    fn delete(&self, path: &str, version: Option<u32>) -> BackendResult<()> {
        match version {
            Some(v) => {
                let (mount, api_path) = self.route(path, "delete")?;
                if mount.version.is_versioned() {
                    self.post_json(path, &api_path, &json!({ "versions": [v] }))
                } else {
                    self.delete_request(path, &api_path)
                }
            }
            None => {
                let (_, api_path) = self.route(path, "data")?;
                self.delete_request(path, &api_path)
            }
        }
    }

    fn destroy(&self, path: &str, version: u32) -> BackendResult<()> {
        let (mount, api_path) = self.route(path, "destroy")?;
        if !mount.version.is_versioned() {
            return Err(BackendError::Unsupported {
                path: path.to_string(),
                operation: "destroy".into(),
            });
        }
        self.post_json(path, &api_path, &json!({ "versions": [version] }))
    }

    fn write(&self, path: &str, data: &SecretData) -> BackendResult<()> {
        let (mount, api_path) = self.route(path, "data")?;
        let body = if mount.version.is_versioned() {
            json!({ "data": data })
        } else {
            json!(data)
        };
        self.post_json(path, &api_path, &body)
    }
}

/// Extract a human-readable message from an error response body
fn error_message(body: &str, status: StatusCode) -> String {
    let parsed: Option<Vec<String>> = serde_json::from_str::<Value>(body).ok().and_then(|v| {
        v.get("errors").and_then(Value::as_array).map(|errors| {
            errors
                .iter()
                .filter_map(|e| e.as_str().map(str::to_string))
                .collect()
        })
    });

    match parsed {
        Some(errors) if !errors.is_empty() => errors.join("; "),
        _ => status
            .canonical_reason()
            .unwrap_or("unexpected status")
            .to_string(),
    }
}

fn malformed(path: &str, reason: &str) -> BackendError {
    BackendError::Malformed {
        path: path.to_string(),
        reason: reason.to_string(),
    }
}

/// Parse a `list` response: `{"data": {"keys": [...]}}`
fn parse_list(path: &str, body: &Value) -> BackendResult<Vec<String>> {
    let keys = body
        .pointer("/data/keys")
        .and_then(Value::as_array)
        .ok_or_else(|| malformed(path, "missing data.keys"))?;

    keys.iter()
        .map(|k| {
            k.as_str()
                .map(str::to_string)
                .ok_or_else(|| malformed(path, "non-string entry in data.keys"))
        })
        .collect()
}

/// Parse a secret read; KV v2 nests the data one level deeper and reports
/// deleted versions with `data: null`
fn parse_secret_data(path: &str, body: &Value, version: KvVersion) -> BackendResult<SecretData> {
    let pointer = if version.is_versioned() { "/data/data" } else { "/data" };

    let object = match body.pointer(pointer) {
        Some(Value::Object(map)) => map,
        Some(Value::Null) if version.is_versioned() => {
            return Err(BackendError::NotFound {
                path: path.to_string(),
            })
        }
        _ => return Err(malformed(path, "missing secret data")),
    };

    let mut data = SecretData::new();
    for (key, value) in object {
        let value = match value {
            Value::String(s) => s.clone(),
            other => serde_json::to_string(other).map_err(|e| malformed(path, &e.to_string()))?,
        };
        data.insert(key.clone(), value);
    }
    Ok(data)
}

/// Parse KV v2 metadata: `{"data": {"versions": {"1": {...}, ...}}}`
fn parse_versions(path: &str, body: &Value) -> BackendResult<Vec<VersionMeta>> {
    let versions = body
        .pointer("/data/versions")
        .and_then(Value::as_object)
        .ok_or_else(|| malformed(path, "missing data.versions"))?;

    let mut out = Vec::with_capacity(versions.len());
    for (number, meta) in versions {
        let number = number
            .parse::<u32>()
            .map_err(|_| malformed(path, &format!("bad version number '{}'", number)))?;

        let deletion_time = meta.get("deletion_time").and_then(Value::as_str).unwrap_or("");
        let created_at = meta
            .get("created_time")
            .and_then(Value::as_str)
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&Utc));

        out.push(VersionMeta {
            number,
            deleted: !deletion_time.is_empty(),
            destroyed: meta.get("destroyed").and_then(Value::as_bool).unwrap_or(false),
            created_at,
        });
    }

    out.sort_by_key(|v| v.number);
    Ok(out)
}

/// Parse `sys/mounts`; newer servers duplicate the table under `data`
fn parse_mounts(body: &Value) -> Vec<MountInfo> {
    let table: &Map<String, Value> = match body.get("data").and_then(Value::as_object) {
        Some(data) => data,
        None => match body.as_object() {
            Some(top) => top,
            None => return Vec::new(),
        },
    };

    let mut mounts: Vec<MountInfo> = table
        .iter()
        .filter_map(|(path, desc)| {
            let kind = MountKind::from_type(desc.get("type")?.as_str()?)?;
            let version = KvVersion::from_option(desc.pointer("/options/version").and_then(Value::as_str));
            Some(MountInfo::new(path, kind, version))
        })
        .collect();

    mounts.sort_by(|a, b| a.path.cmp(&b.path));
    mounts
}

/// Parse `sys/internal/ui/mounts/<path>`
///
/// Engines other than `kv`/`generic` are treated as flat v1 stores.
fn parse_mount_description(path: &str, body: &Value) -> BackendResult<MountInfo> {
    let data = body
        .get("data")
        .and_then(Value::as_object)
        .ok_or_else(|| malformed(path, "missing mount description"))?;

    let mount_path = data
        .get("path")
        .and_then(Value::as_str)
        .ok_or_else(|| malformed(path, "missing mount path"))?;

    let kind = data
        .get("type")
        .and_then(Value::as_str)
        .and_then(MountKind::from_type)
        .unwrap_or(MountKind::Generic);

    let version = match kind {
        MountKind::Kv => KvVersion::from_option(data.get("options").and_then(|o| o.get("version")).and_then(Value::as_str)),
        MountKind::Generic => KvVersion::V1,
    };

    Ok(MountInfo::new(mount_path, kind, version))
}
