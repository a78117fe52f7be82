//! In-memory provider used by the test suite and for dry runs.
//!
//! Asynchronous provider behavior is emulated deterministically: resources
//! advance one lifecycle step per describe call, and an instance created with
//! shutdown behavior `terminate` walks to `terminated` after a reboot, the
//! way a self-terminating bootstrap instance does. Every call is recorded so
//! tests can assert exact call sequences.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use machineup_common::tags::Tag;

use crate::{
    codes, state, CloudProvider, CreateInstanceRequest, CreateVolumeRequest, InstanceInfo,
    ProviderError, VolumeInfo,
};

#[derive(Default)]
struct MockVolume {
    info: VolumeInfo,
    /// Statuses still to be reported, one per describe.
    pending: VecDeque<String>,
    attached_to: Option<String>,
}

#[derive(Default)]
struct MockInstance {
    info: InstanceInfo,
    pending: VecDeque<String>,
    terminate_on_shutdown: bool,
}

#[derive(Default)]
struct State {
    counter: u64,
    volumes: HashMap<String, MockVolume>,
    instances: HashMap<String, MockInstance>,
    calls: Vec<String>,
    volume_requests: Vec<CreateVolumeRequest>,
    instance_requests: Vec<CreateInstanceRequest>,
    /// operation name -> (code, message), consumed by the next matching call.
    failures: HashMap<String, (String, String)>,
}

pub struct MockProvider {
    region: String,
    state: Mutex<State>,
}

impl MockProvider {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            state: Mutex::new(State::default()),
        }
    }

    /// Every provider call made so far, in order, as `"<Operation> <ids...>"`.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn volume_requests(&self) -> Vec<CreateVolumeRequest> {
        self.state.lock().unwrap().volume_requests.clone()
    }

    pub fn instance_requests(&self) -> Vec<CreateInstanceRequest> {
        self.state.lock().unwrap().instance_requests.clone()
    }

    /// Make the next call of `operation` fail with the given code/message.
    pub fn fail_next(&self, operation: &str, code: &str, message: &str) {
        self.state
            .lock()
            .unwrap()
            .failures
            .insert(operation.to_string(), (code.to_string(), message.to_string()));
    }

    fn next_id(state: &mut State, prefix: &str) -> String {
        state.counter += 1;
        format!("{prefix}-{:08x}", state.counter)
    }

    fn take_failure(state: &mut State, operation: &str) -> Result<(), ProviderError> {
        if let Some((code, message)) = state.failures.remove(operation) {
            return Err(ProviderError::Api { code, message });
        }
        Ok(())
    }

    /// Volumes attached to a terminated instance become available again.
    fn release_attachments(state: &mut State, instance_id: &str) {
        for volume in state.volumes.values_mut() {
            if volume.attached_to.as_deref() == Some(instance_id) {
                volume.attached_to = None;
                volume.info.status = state::VOLUME_AVAILABLE.to_string();
            }
        }
    }
}

#[async_trait]
impl CloudProvider for MockProvider {
    fn region(&self) -> &str {
        &self.region
    }

    async fn create_volume(
        &self,
        request: &CreateVolumeRequest,
    ) -> Result<VolumeInfo, ProviderError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("CreateVolume".to_string());
        Self::take_failure(&mut state, "CreateVolume")?;
        state.volume_requests.push(request.clone());

        let id = Self::next_id(&mut state, "vol");
        let info = VolumeInfo {
            id: id.clone(),
            volume_type: request.volume_type.clone(),
            size_gib: request.size_gib.unwrap_or(8),
            iops: request.iops.unwrap_or(0),
            availability_zone: request.availability_zone.clone(),
            snapshot_id: request.snapshot_id.clone().unwrap_or_default(),
            status: state::VOLUME_CREATING.to_string(),
            tags: Vec::new(),
        };
        state.volumes.insert(
            id,
            MockVolume {
                info: info.clone(),
                pending: VecDeque::from([state::VOLUME_AVAILABLE.to_string()]),
                attached_to: None,
            },
        );
        Ok(info)
    }

    async fn describe_volume(&self, volume_id: &str) -> Result<Option<VolumeInfo>, ProviderError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("DescribeVolume {volume_id}"));
        Self::take_failure(&mut state, "DescribeVolume")?;

        let Some(volume) = state.volumes.get_mut(volume_id) else {
            return Ok(None);
        };
        if let Some(next) = volume.pending.pop_front() {
            volume.info.status = next;
        }
        Ok(Some(volume.info.clone()))
    }

    async fn create_instance(
        &self,
        request: &CreateInstanceRequest,
    ) -> Result<InstanceInfo, ProviderError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("CreateInstance".to_string());
        Self::take_failure(&mut state, "CreateInstance")?;
        state.instance_requests.push(request.clone());

        let id = Self::next_id(&mut state, "i");
        let n = state.counter;
        let info = InstanceInfo {
            id: id.clone(),
            instance_type: request.instance_type.clone(),
            image_id: request.image_id.clone(),
            key_name: request.key_name.clone(),
            security_group_ids: request.security_group_ids.clone(),
            subnet_id: request.subnet_id.clone(),
            availability_zone: if request.availability_zone.is_empty() {
                format!("{}a", self.region)
            } else {
                request.availability_zone.clone()
            },
            ebs_optimized: request.ebs_optimized,
            state: state::INSTANCE_PENDING.to_string(),
            private_ip: format!("10.0.0.{}", n % 250 + 1),
            public_ip: format!("198.51.100.{}", n % 250 + 1),
            tags: Vec::new(),
        };
        state.instances.insert(
            id,
            MockInstance {
                info: info.clone(),
                pending: VecDeque::from([state::INSTANCE_RUNNING.to_string()]),
                terminate_on_shutdown: request.shutdown_behavior.as_deref() == Some("terminate"),
            },
        );
        Ok(info)
    }

    async fn describe_instance(
        &self,
        instance_id: &str,
    ) -> Result<Option<InstanceInfo>, ProviderError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("DescribeInstance {instance_id}"));
        Self::take_failure(&mut state, "DescribeInstance")?;

        let Some(instance) = state.instances.get_mut(instance_id) else {
            return Ok(None);
        };
        if let Some(next) = instance.pending.pop_front() {
            instance.info.state = next;
        }
        let info = instance.info.clone();
        if info.state == state::INSTANCE_TERMINATED {
            Self::release_attachments(&mut state, instance_id);
        }
        Ok(Some(info))
    }

    async fn create_tags(&self, resource_id: &str, tags: &[Tag]) -> Result<(), ProviderError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("CreateTags {resource_id}"));
        Self::take_failure(&mut state, "CreateTags")?;

        let existing = if let Some(volume) = state.volumes.get_mut(resource_id) {
            &mut volume.info.tags
        } else if let Some(instance) = state.instances.get_mut(resource_id) {
            &mut instance.info.tags
        } else {
            return Err(ProviderError::api(
                "InvalidId",
                format!("no resource with id <{resource_id}>"),
            ));
        };
        for tag in tags {
            match existing.iter_mut().find(|t| t.key == tag.key) {
                Some(t) => t.value = tag.value.clone(),
                None => existing.push(tag.clone()),
            }
        }
        Ok(())
    }

    async fn attach_volume(
        &self,
        volume_id: &str,
        instance_id: &str,
        _device: &str,
    ) -> Result<(), ProviderError> {
        let mut state = self.state.lock().unwrap();
        state
            .calls
            .push(format!("AttachVolume {volume_id} {instance_id}"));
        Self::take_failure(&mut state, "AttachVolume")?;

        if !state.instances.contains_key(instance_id) {
            return Err(ProviderError::api(
                "InvalidId",
                format!("no instance with id <{instance_id}>"),
            ));
        }
        let Some(volume) = state.volumes.get_mut(volume_id) else {
            return Err(ProviderError::api(
                "InvalidId",
                format!("no volume with id <{volume_id}>"),
            ));
        };
        if volume.attached_to.is_some() {
            return Err(ProviderError::api(
                codes::VOLUME_IN_USE,
                format!("volume <{volume_id}> is already attached"),
            ));
        }
        volume.attached_to = Some(instance_id.to_string());
        volume.info.status = state::VOLUME_IN_USE.to_string();
        Ok(())
    }

    async fn reboot_instance(&self, instance_id: &str) -> Result<(), ProviderError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("RebootInstance {instance_id}"));
        Self::take_failure(&mut state, "RebootInstance")?;

        let Some(instance) = state.instances.get_mut(instance_id) else {
            return Err(ProviderError::api(
                "InvalidId",
                format!("no instance with id <{instance_id}>"),
            ));
        };
        if instance.terminate_on_shutdown {
            instance.pending = VecDeque::from([
                state::INSTANCE_SHUTTING_DOWN.to_string(),
                state::INSTANCE_TERMINATED.to_string(),
            ]);
        }
        Ok(())
    }

    async fn terminate_instance(&self, instance_id: &str) -> Result<(), ProviderError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("TerminateInstance {instance_id}"));
        Self::take_failure(&mut state, "TerminateInstance")?;

        let Some(instance) = state.instances.get_mut(instance_id) else {
            return Err(ProviderError::api(
                "InvalidId",
                format!("no instance with id <{instance_id}>"),
            ));
        };
        instance.pending = VecDeque::from([
            state::INSTANCE_SHUTTING_DOWN.to_string(),
            state::INSTANCE_TERMINATED.to_string(),
        ]);
        Ok(())
    }
}
