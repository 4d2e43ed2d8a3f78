use crate::operation::API_PREFIX;
use crate::{
    ContainerInfo, Endpoint, LocalCopyRequest, MigrationRequest, Operation, OperationHandle,
    RemoteConfig, RemoteError,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::io::Read;

/// HTTP-based endpoint client.
///
/// Speaks the REST API under `/1.0`:
/// - `GET    /1.0`                                — server info, `environment.addresses`
/// - `GET    /1.0/profiles`                       — profile URLs
/// - `GET    /1.0/containers/<name>`              — container metadata
/// - `GET    /1.0/containers/<c>/snapshots/<s>`   — snapshot metadata
/// - `POST   /1.0/containers`                     — create (local copy or migration pull)
/// - `POST   /1.0/containers/<name>`              — rename, or open a migration source
/// - `DELETE /1.0/containers/<name>`              — delete
/// - `GET    /1.0/operations/<id>[/wait]`         — operation status
///
/// Every response is wrapped in `{type, status_code, operation, error_code, error, metadata}`.
pub struct HttpEndpoint {
    name: String,
    config: RemoteConfig,
    certificate: String,
    agent: ureq::Agent,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    error_code: u16,
    #[serde(default)]
    error: String,
    #[serde(default)]
    metadata: Value,
}

#[derive(Debug, Deserialize)]
struct ServerInfo {
    #[serde(default)]
    environment: ServerEnvironment,
}

#[derive(Debug, Default, Deserialize)]
struct ServerEnvironment {
    #[serde(default)]
    addresses: Vec<String>,
}

type HttpResult = Result<ureq::http::Response<ureq::Body>, ureq::Error>;

impl HttpEndpoint {
    pub fn new(name: &str, config: RemoteConfig) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .build()
            .into();
        Self {
            name: name.to_owned(),
            config,
            certificate: String::new(),
            agent,
        }
    }

    /// Like [`HttpEndpoint::new`], reading the configured certificate file.
    pub fn connect(name: &str, config: RemoteConfig) -> Result<Self, RemoteError> {
        let certificate = match &config.certificate {
            Some(path) => std::fs::read_to_string(path).map_err(|e| {
                RemoteError::Config(format!("cannot read certificate {}: {e}", path.display()))
            })?,
            None => String::new(),
        };
        let mut endpoint = Self::new(name, config);
        endpoint.certificate = certificate;
        Ok(endpoint)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{API_PREFIX}{path}", self.config.url)
    }

    /// `containers/<c>` or `containers/<c>/snapshots/<s>`.
    fn entity_path(name: &str) -> String {
        match name.split_once(crate::entity::SNAPSHOT_DELIMITER) {
            Some((container, snapshot)) => format!("/containers/{container}/snapshots/{snapshot}"),
            None => format!("/containers/{name}"),
        }
    }

    fn do_get(&self, url: &str) -> Result<Value, RemoteError> {
        let mut req = self
            .agent
            .get(url)
            .header("X-Ferry-Protocol", &crate::PROTOCOL_VERSION.to_string());
        if let Some(ref token) = self.config.auth_token {
            req = req.header("Authorization", &format!("Bearer {token}"));
        }
        Self::read_envelope(url, req.call())
    }

    fn do_post(&self, url: &str, body: &Value) -> Result<Value, RemoteError> {
        let data =
            serde_json::to_vec(body).map_err(|e| RemoteError::Serialization(e.to_string()))?;
        let mut req = self
            .agent
            .post(url)
            .header("Content-Type", "application/json")
            .header("X-Ferry-Protocol", &crate::PROTOCOL_VERSION.to_string());
        if let Some(ref token) = self.config.auth_token {
            req = req.header("Authorization", &format!("Bearer {token}"));
        }
        Self::read_envelope(url, req.send(&data[..]))
    }

    fn do_delete(&self, url: &str) -> Result<Value, RemoteError> {
        let mut req = self
            .agent
            .delete(url)
            .header("X-Ferry-Protocol", &crate::PROTOCOL_VERSION.to_string());
        if let Some(ref token) = self.config.auth_token {
            req = req.header("Authorization", &format!("Bearer {token}"));
        }
        Self::read_envelope(url, req.call())
    }

    fn read_envelope(url: &str, result: HttpResult) -> Result<Value, RemoteError> {
        let resp = match result {
            Ok(r) => r,
            Err(ureq::Error::StatusCode(404)) => {
                return Err(RemoteError::NotFound(url.to_owned()));
            }
            Err(ureq::Error::StatusCode(code)) => {
                return Err(RemoteError::Http(format!("HTTP {code} for {url}")));
            }
            Err(e) => {
                return Err(RemoteError::Http(e.to_string()));
            }
        };

        let code = resp.status().as_u16();
        let mut reader = resp.into_body().into_reader();
        let mut body = Vec::new();
        reader
            .read_to_end(&mut body)
            .map_err(|e| RemoteError::Http(e.to_string()))?;

        let envelope: Envelope = match serde_json::from_slice(&body) {
            Ok(envelope) => envelope,
            Err(_) if code == 404 => return Err(RemoteError::NotFound(url.to_owned())),
            Err(_) if code >= 400 => {
                return Err(RemoteError::Http(format!("HTTP {code} for {url}")));
            }
            Err(e) => {
                return Err(RemoteError::Serialization(format!(
                    "invalid response from {url}: {e}"
                )));
            }
        };

        if code >= 400 || envelope.kind == "error" {
            let reason = if envelope.error.is_empty() {
                format!("HTTP {code} for {url}")
            } else {
                envelope.error
            };
            if code == 404 || envelope.error_code == 404 {
                return Err(RemoteError::NotFound(reason));
            }
            return Err(RemoteError::Http(reason));
        }
        Ok(envelope.metadata)
    }

    fn decode<T: DeserializeOwned>(url: &str, metadata: Value) -> Result<T, RemoteError> {
        serde_json::from_value(metadata)
            .map_err(|e| RemoteError::Decode(format!("unexpected metadata from {url}: {e}")))
    }

    fn get_as<T: DeserializeOwned>(&self, path: &str) -> Result<T, RemoteError> {
        let url = self.url(path);
        tracing::debug!("GET {url}");
        let metadata = self.do_get(&url)?;
        Self::decode(&url, metadata)
    }

    fn post_operation(&self, path: &str, body: &Value) -> Result<Operation, RemoteError> {
        let url = self.url(path);
        tracing::debug!("POST {url}");
        let metadata = self.do_post(&url, body)?;
        Self::decode(&url, metadata)
    }
}

impl Endpoint for HttpEndpoint {
    fn name(&self) -> &str {
        &self.name
    }

    fn container(&self, name: &str) -> Result<ContainerInfo, RemoteError> {
        self.get_as(&format!("/containers/{name}"))
    }

    fn snapshot(&self, name: &str) -> Result<ContainerInfo, RemoteError> {
        self.get_as(&Self::entity_path(name))
    }

    fn profiles(&self) -> Result<Vec<String>, RemoteError> {
        let urls: Vec<String> = self.get_as("/profiles")?;
        Ok(urls
            .iter()
            .map(|u| u.rsplit('/').next().unwrap_or(u).to_owned())
            .collect())
    }

    fn local_copy(&self, request: &LocalCopyRequest) -> Result<Operation, RemoteError> {
        let mut body = json!({
            "config": request.config,
            "profiles": request.profiles,
            "ephemeral": request.ephemeral,
            "source": {
                "type": "copy",
                "source": request.source,
                "container_only": request.container_only,
            },
        });
        if let Some(name) = &request.name {
            body["name"] = Value::from(name.as_str());
        }
        self.post_operation("/containers", &body)
    }

    fn migration_source(
        &self,
        name: &str,
        live: bool,
        container_only: bool,
    ) -> Result<Operation, RemoteError> {
        let body = json!({
            "migration": true,
            "live": live,
            "container_only": container_only,
        });
        self.post_operation(&Self::entity_path(name), &body)
    }

    fn addresses(&self) -> Result<Vec<String>, RemoteError> {
        let info: ServerInfo = self.get_as("")?;
        Ok(info.environment.addresses)
    }

    fn migrate_from(&self, request: &MigrationRequest) -> Result<Operation, RemoteError> {
        let mut body = json!({
            "architecture": request.state.architecture,
            "config": request.state.config,
            "devices": request.state.devices,
            "profiles": request.state.profiles,
            "ephemeral": request.ephemeral,
            "source": {
                "type": "migration",
                "mode": "pull",
                "operation": request.operation_url,
                "certificate": request.certificate,
                "secrets": request.secrets,
                "live": request.live,
                "container_only": request.container_only,
            },
        });
        if let Some(name) = &request.name {
            body["name"] = Value::from(name.as_str());
        }
        if let Some(base_image) = &request.base_image {
            body["source"]["base-image"] = Value::from(base_image.as_str());
        }
        self.post_operation("/containers", &body)
    }

    fn wait(&self, handle: &OperationHandle) -> Result<Operation, RemoteError> {
        let url = format!("{}{handle}/wait", self.config.url);
        tracing::debug!("GET {url}");
        let metadata = self.do_get(&url)?;
        let op: Operation = Self::decode(&url, metadata)?;
        op.into_result()
    }

    fn operation(&self, handle: &OperationHandle) -> Result<Operation, RemoteError> {
        let url = format!("{}{handle}", self.config.url);
        tracing::debug!("GET {url}");
        let metadata = self.do_get(&url)?;
        Self::decode(&url, metadata)
    }

    fn certificate(&self) -> &str {
        &self.certificate
    }

    fn rename(&self, name: &str, new_name: &str) -> Result<Operation, RemoteError> {
        self.post_operation(&format!("/containers/{name}"), &json!({ "name": new_name }))
    }

    fn delete(&self, name: &str) -> Result<Operation, RemoteError> {
        let url = self.url(&format!("/containers/{name}"));
        tracing::debug!("DELETE {url}");
        let metadata = self.do_delete(&url)?;
        Self::decode(&url, metadata)
    }
}
