//! Scaleway implementation of the provider capability, over the instance and
//! block-storage HTTP APIs.
//!
//! The capability is modeled on providers with first-class key/value tags,
//! device paths and shutdown behaviors; where Scaleway has no equivalent this
//! adapter translates:
//!
//! - the `Name` tag maps to the server/volume `name` field, remaining tags
//!   are encoded as `key=value` tag strings;
//! - native states are normalized to the canonical [`crate::state`] strings;
//! - shutdown behavior `terminate` is emulated: servers created with it are
//!   tracked, deleted once observed stopped, and read back as `terminated`
//!   after deletion;
//! - subnet, key-pair, EBS-optimization and termination-protection fields
//!   have no equivalent and are ignored with a debug log.
//!
//! The handle is bound to one region; per-request availability zones select
//! the Scaleway zone (`<region>-1` when unset).

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};

use machineup_common::tags::{self, Tag};

use crate::{
    codes, state, CloudProvider, CreateInstanceRequest, CreateVolumeRequest, InstanceInfo,
    ProviderError, VolumeInfo,
};

const API_BASE: &str = "https://api.scaleway.com";
const GIB: i64 = 1 << 30;

pub struct ScalewayProvider {
    client: Client,
    project_id: String,
    secret_key: String,
    region: String,
    default_zone: String,
    /// Zone each resource created through this handle lives in.
    zones: Mutex<HashMap<String, String>>,
    /// Servers created with shutdown behavior `terminate`.
    terminate_on_stop: Mutex<HashSet<String>>,
}

impl ScalewayProvider {
    pub fn new(project_id: String, secret_key: String, region: String) -> Self {
        // Without an overall timeout a stalled API call would hang the whole
        // provisioning pass.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(20))
            .build()
            .unwrap();
        let default_zone = format!("{region}-1");
        Self {
            client,
            project_id: project_id.trim().to_string(),
            secret_key: secret_key.trim().to_string(),
            region,
            default_zone,
            zones: Mutex::new(HashMap::new()),
            terminate_on_stop: Mutex::new(HashSet::new()),
        }
    }

    fn headers(&self) -> reqwest::header::HeaderMap {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "X-Auth-Token",
            reqwest::header::HeaderValue::from_str(&self.secret_key).unwrap(),
        );
        headers.insert(
            reqwest::header::CONTENT_TYPE,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        headers
    }

    fn zone_for_request<'a>(&'a self, requested: &'a str) -> &'a str {
        if requested.is_empty() {
            &self.default_zone
        } else {
            requested
        }
    }

    fn zone_of(&self, resource_id: &str) -> String {
        self.zones
            .lock()
            .unwrap()
            .get(resource_id)
            .cloned()
            .unwrap_or_else(|| self.default_zone.clone())
    }

    fn remember_zone(&self, resource_id: &str, zone: &str) {
        self.zones
            .lock()
            .unwrap()
            .insert(resource_id.to_string(), zone.to_string());
    }

    async fn api_error(resp: reqwest::Response) -> ProviderError {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        let parsed: Value = serde_json::from_str(&body).unwrap_or(Value::Null);
        let message = parsed["message"]
            .as_str()
            .map(str::to_string)
            .unwrap_or(body);
        let code = if is_already_attached(&message) {
            codes::VOLUME_IN_USE.to_string()
        } else {
            parsed["type"]
                .as_str()
                .or_else(|| parsed["class"].as_str())
                .unwrap_or_default()
                .to_string()
        };
        ProviderError::Api {
            code,
            message: format!("status {status}: {message}"),
        }
    }

    async fn get_json(&self, url: &str) -> Result<Option<Value>, ProviderError> {
        let resp = self.client.get(url).headers(self.headers()).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(Self::api_error(resp).await);
        }
        Ok(Some(resp.json().await?))
    }

    async fn post_json(&self, url: &str, body: &Value) -> Result<Value, ProviderError> {
        let resp = self
            .client
            .post(url)
            .headers(self.headers())
            .json(body)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Self::api_error(resp).await);
        }
        Ok(resp.json().await?)
    }

    async fn server_action(
        &self,
        zone: &str,
        server_id: &str,
        action: &str,
    ) -> Result<(), ProviderError> {
        let url = format!("{API_BASE}/instance/v1/zones/{zone}/servers/{server_id}/action");
        tracing::debug!(%server_id, %action, "server action");
        let resp = self
            .client
            .post(&url)
            .headers(self.headers())
            .json(&json!({ "action": action }))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Self::api_error(resp).await);
        }
        Ok(())
    }

    fn parse_volume(&self, value: &Value) -> VolumeInfo {
        VolumeInfo {
            id: value["id"].as_str().unwrap_or_default().to_string(),
            volume_type: value["type"]
                .as_str()
                .or_else(|| value["volume_type"].as_str())
                .unwrap_or_default()
                .to_string(),
            size_gib: value["size"].as_i64().unwrap_or(0) / GIB,
            iops: value["specs"]["perf_iops"]
                .as_i64()
                .or_else(|| value["perf_iops"].as_i64())
                .unwrap_or(0),
            availability_zone: value["zone"].as_str().unwrap_or_default().to_string(),
            snapshot_id: value["parent_snapshot_id"]
                .as_str()
                .unwrap_or_default()
                .to_string(),
            status: volume_state(value["status"].as_str().unwrap_or_default()),
            tags: tags_from(value),
        }
    }

    fn parse_server(&self, value: &Value) -> InstanceInfo {
        InstanceInfo {
            id: value["id"].as_str().unwrap_or_default().to_string(),
            instance_type: value["commercial_type"]
                .as_str()
                .unwrap_or_default()
                .to_string(),
            image_id: value["image"]["id"].as_str().unwrap_or_default().to_string(),
            key_name: String::new(),
            security_group_ids: value["security_group"]["id"]
                .as_str()
                .map(|id| vec![id.to_string()])
                .unwrap_or_default(),
            subnet_id: String::new(),
            availability_zone: value["zone"].as_str().unwrap_or_default().to_string(),
            ebs_optimized: false,
            state: server_state(value["state"].as_str().unwrap_or_default()),
            private_ip: value["private_ip"].as_str().unwrap_or_default().to_string(),
            public_ip: value["public_ip"]["address"]
                .as_str()
                .unwrap_or_default()
                .to_string(),
            tags: tags_from(value),
        }
    }
}

#[async_trait]
impl CloudProvider for ScalewayProvider {
    fn region(&self) -> &str {
        &self.region
    }

    async fn create_volume(
        &self,
        request: &CreateVolumeRequest,
    ) -> Result<VolumeInfo, ProviderError> {
        let zone = self.zone_for_request(&request.availability_zone).to_string();
        let url = format!("{API_BASE}/block/v1/zones/{zone}/volumes");
        let name = format!("machineup-{}", uuid::Uuid::new_v4());

        // Block-storage classes are selected by perf_iops, not by a type
        // string; the requested type only survives in the descriptor.
        let mut body = json!({ "name": name, "project_id": self.project_id });
        if let Some(iops) = request.iops {
            body["perf_iops"] = json!(iops);
        }
        match &request.snapshot_id {
            Some(snapshot) => {
                let mut from = json!({ "snapshot_id": snapshot });
                if let Some(size) = request.size_gib {
                    from["size"] = json!(size * GIB);
                }
                body["from_snapshot"] = from;
            }
            None => {
                body["from_empty"] = json!({ "size": request.size_gib.unwrap_or(1) * GIB });
            }
        }

        tracing::debug!(%zone, volume_type = %request.volume_type, "creating block volume");
        let value = self.post_json(&url, &body).await?;
        let volume = value.get("volume").cloned().unwrap_or(value);
        let info = self.parse_volume(&volume);
        if info.id.is_empty() {
            return Err(ProviderError::InvalidResponse(
                "no volume id in create response".into(),
            ));
        }
        self.remember_zone(&info.id, &zone);
        Ok(info)
    }

    async fn describe_volume(&self, volume_id: &str) -> Result<Option<VolumeInfo>, ProviderError> {
        let zone = self.zone_of(volume_id);
        let url = format!("{API_BASE}/block/v1/zones/{zone}/volumes/{volume_id}");
        let Some(value) = self.get_json(&url).await? else {
            return Ok(None);
        };
        let volume = value.get("volume").cloned().unwrap_or(value);
        Ok(Some(self.parse_volume(&volume)))
    }

    async fn create_instance(
        &self,
        request: &CreateInstanceRequest,
    ) -> Result<InstanceInfo, ProviderError> {
        let zone = self.zone_for_request(&request.availability_zone).to_string();
        let url = format!("{API_BASE}/instance/v1/zones/{zone}/servers");
        let name = format!("machineup-{}", uuid::Uuid::new_v4());

        let mut body = json!({
            "name": name,
            "commercial_type": request.instance_type,
            "image": request.image_id,
            "project": self.project_id,
            "dynamic_ip_required": true,
        });
        if let Some(group) = request.security_group_ids.first() {
            body["security_group"] = json!(group);
        }
        if let Some(group) = &request.placement_group {
            body["placement_group"] = json!(group);
        }
        if !request.subnet_id.is_empty()
            || !request.key_name.is_empty()
            || request.ebs_optimized
            || request.disable_api_termination
        {
            tracing::debug!(
                "subnet, key pair, EBS optimization and termination protection \
                 have no Scaleway equivalent; ignored"
            );
        }

        let created = self.post_json(&url, &body).await?;
        let server_id = created["server"]["id"]
            .as_str()
            .ok_or_else(|| ProviderError::InvalidResponse("no server id in create response".into()))?
            .to_string();
        self.remember_zone(&server_id, &zone);

        if let Some(user_data) = &request.user_data {
            let url =
                format!("{API_BASE}/instance/v1/zones/{zone}/servers/{server_id}/user_data/cloud-init");
            let resp = self
                .client
                .put(&url)
                .headers(self.headers())
                .body(user_data.clone())
                .send()
                .await?;
            if !resp.status().is_success() {
                return Err(Self::api_error(resp).await);
            }
        }

        if request.shutdown_behavior.as_deref() == Some("terminate") {
            self.terminate_on_stop
                .lock()
                .unwrap()
                .insert(server_id.clone());
        }

        self.server_action(&zone, &server_id, "poweron").await?;

        match self.describe_instance(&server_id).await? {
            Some(info) => Ok(info),
            None => Err(ProviderError::InvalidResponse(format!(
                "server <{server_id}> vanished right after creation"
            ))),
        }
    }

    async fn describe_instance(
        &self,
        instance_id: &str,
    ) -> Result<Option<InstanceInfo>, ProviderError> {
        let zone = self.zone_of(instance_id);
        let url = format!("{API_BASE}/instance/v1/zones/{zone}/servers/{instance_id}");
        let Some(value) = self.get_json(&url).await? else {
            // A deleted tracked server reads back as terminated so the
            // self-termination wait can settle.
            let tracked = self
                .terminate_on_stop
                .lock()
                .unwrap()
                .contains(instance_id);
            if tracked {
                return Ok(Some(InstanceInfo {
                    id: instance_id.to_string(),
                    state: state::INSTANCE_TERMINATED.to_string(),
                    ..InstanceInfo::default()
                }));
            }
            return Ok(None);
        };

        let mut info = self.parse_server(&value["server"]);
        if info.state == state::INSTANCE_STOPPED {
            let tracked = self
                .terminate_on_stop
                .lock()
                .unwrap()
                .contains(instance_id);
            if tracked {
                tracing::debug!(%instance_id, "stopped with shutdown behavior terminate, deleting");
                let resp = self
                    .client
                    .delete(&url)
                    .headers(self.headers())
                    .send()
                    .await;
                if let Err(err) = resp {
                    tracing::warn!(%instance_id, %err, "deleting stopped server failed");
                }
                info.state = state::INSTANCE_SHUTTING_DOWN.to_string();
            }
        }
        Ok(Some(info))
    }

    async fn create_tags(&self, resource_id: &str, tag_set: &[Tag]) -> Result<(), ProviderError> {
        let zone = self.zone_of(resource_id);
        let (name, rest) = tags::split_name(tag_set);
        let mut body = json!({ "tags": encode_tags(&rest) });
        if let Some(name) = name {
            body["name"] = json!(name);
        }

        // Scaleway ids do not encode the resource kind; try the server
        // endpoint first, then fall back to block storage.
        let server_url = format!("{API_BASE}/instance/v1/zones/{zone}/servers/{resource_id}");
        let resp = self
            .client
            .patch(&server_url)
            .headers(self.headers())
            .json(&body)
            .send()
            .await?;
        if resp.status().is_success() {
            return Ok(());
        }
        if resp.status() != StatusCode::NOT_FOUND {
            return Err(Self::api_error(resp).await);
        }

        let volume_url = format!("{API_BASE}/block/v1/zones/{zone}/volumes/{resource_id}");
        let resp = self
            .client
            .patch(&volume_url)
            .headers(self.headers())
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Self::api_error(resp).await);
        }
        Ok(())
    }

    async fn attach_volume(
        &self,
        volume_id: &str,
        instance_id: &str,
        device: &str,
    ) -> Result<(), ProviderError> {
        if !device.is_empty() {
            tracing::debug!(%device, "Scaleway assigns device paths itself; requested path ignored");
        }
        let zone = self.zone_of(instance_id);
        let url = format!("{API_BASE}/instance/v1/zones/{zone}/servers/{instance_id}/attach-volume");
        let resp = self
            .client
            .post(&url)
            .headers(self.headers())
            .json(&json!({ "volume_id": volume_id }))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Self::api_error(resp).await);
        }
        Ok(())
    }

    async fn reboot_instance(&self, instance_id: &str) -> Result<(), ProviderError> {
        let zone = self.zone_of(instance_id);
        self.server_action(&zone, instance_id, "reboot").await
    }

    async fn terminate_instance(&self, instance_id: &str) -> Result<(), ProviderError> {
        let zone = self.zone_of(instance_id);
        self.server_action(&zone, instance_id, "terminate").await
    }
}

fn is_already_attached(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("already attached") || message.contains("already in use")
}

fn volume_state(native: &str) -> String {
    match native {
        "in_use" => state::VOLUME_IN_USE.to_string(),
        other => other.to_string(),
    }
}

fn server_state(native: &str) -> String {
    match native {
        "starting" | "provisioning" | "allocating" => state::INSTANCE_PENDING.to_string(),
        "stopping" => state::INSTANCE_SHUTTING_DOWN.to_string(),
        "stopped" | "stopped in place" => state::INSTANCE_STOPPED.to_string(),
        other => other.to_string(),
    }
}

fn encode_tags(tag_set: &[Tag]) -> Vec<String> {
    tag_set
        .iter()
        .map(|tag| format!("{}={}", tag.key, tag.value))
        .collect()
}

fn decode_tags(raw: &[String]) -> Vec<Tag> {
    raw.iter()
        .map(|entry| match entry.split_once('=') {
            Some((key, value)) => Tag::new(key, value),
            None => Tag::new(entry.as_str(), ""),
        })
        .collect()
}

fn tags_from(value: &Value) -> Vec<Tag> {
    let raw: Vec<String> = value["tags"]
        .as_array()
        .map(|entries| {
            entries
                .iter()
                .filter_map(|t| t.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();
    let mut tag_set = decode_tags(&raw);
    if let Some(name) = value["name"].as_str() {
        if !name.is_empty() {
            tag_set.insert(0, Tag::new(tags::NAME_KEY, name));
        }
    }
    tag_set
}
