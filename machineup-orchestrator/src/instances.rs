//! Instance resolution: load an existing instance by id, or create one
//! (rendering its user-data template), tag it and wait for `running`.

use std::fs;

use async_trait::async_trait;

use machineup_common::descriptor::Instance;
use machineup_common::tags::{self, Tag};
use machineup_providers::{state, CloudProvider, CreateInstanceRequest, InstanceInfo};

use crate::error::ProvisionError;
use crate::report::Report;
use crate::settle::{converge, Refresh, Settle};

/// Get-or-create, mirroring the volume resolver.
pub async fn resolve(
    provider: &dyn CloudProvider,
    report: &dyn Report,
    settle: &Settle,
    instance: &mut Instance,
) -> Result<(), ProvisionError> {
    if instance.id.is_empty() {
        report.line("Creating new instance...");
        create(provider, report, settle, instance).await?;
        report.line("--------- NEW INSTANCE ---------");
    } else {
        report.line(&format!("Loading instance Id <{}>...", instance.id));
        load(provider, instance).await?;
        report.line("--------- LOADING INSTANCE ---------");
    }
    dump(report, instance);
    Ok(())
}

async fn create(
    provider: &dyn CloudProvider,
    report: &dyn Report,
    settle: &Settle,
    instance: &mut Instance,
) -> Result<(), ProvisionError> {
    // An unreadable or broken template is an unrecoverable configuration
    // error; fail before touching the provider.
    let user_data = rendered_user_data(instance)?;

    let request = CreateInstanceRequest {
        image_id: instance.image_id.clone(),
        instance_type: instance.instance_type.clone(),
        key_name: instance.key_name.clone(),
        security_group_ids: instance.security_groups.clone(),
        subnet_id: instance.subnet_id.clone(),
        availability_zone: instance.availability_zone.clone(),
        ebs_optimized: instance.ebs_optimized,
        disable_api_termination: !instance.enable_api_termination,
        shutdown_behavior: (!instance.shutdown_behavior.is_empty())
            .then(|| instance.shutdown_behavior.clone()),
        placement_group: (!instance.placement_group.is_empty())
            .then(|| instance.placement_group.clone()),
        user_data,
    };
    let info = provider.create_instance(&request).await?;

    let mut wanted = vec![Tag::new(tags::NAME_KEY, &instance.name)];
    wanted.extend(instance.tags.iter().cloned());
    if let Err(source) = provider.create_tags(&info.id, &wanted).await {
        return Err(ProvisionError::PartialState {
            resource: "instance",
            id: info.id,
            step: "tagging",
            source,
        });
    }

    absorb(instance, provider.region(), &info);
    converge(
        settle,
        report,
        &mut InstanceWatch { provider, instance },
        state::INSTANCE_RUNNING,
    )
    .await
}

pub(crate) async fn load(
    provider: &dyn CloudProvider,
    instance: &mut Instance,
) -> Result<(), ProvisionError> {
    if instance.id.is_empty() {
        return Err(ProvisionError::Configuration(
            "cannot load an instance without an id".into(),
        ));
    }
    match provider.describe_instance(&instance.id).await? {
        Some(info) => {
            absorb(instance, provider.region(), &info);
            Ok(())
        }
        None => Err(ProvisionError::NotFound {
            kind: "instance",
            id: instance.id.clone(),
        }),
    }
}

/// Reboot so boot-time units and newly configured mounts take effect.
pub async fn reboot(
    provider: &dyn CloudProvider,
    report: &dyn Report,
    instance_id: &str,
) -> Result<(), ProvisionError> {
    report.line(&format!("Rebooting instance {instance_id}"));
    provider
        .reboot_instance(instance_id)
        .await
        .map_err(|source| ProvisionError::PartialState {
            resource: "instance",
            id: instance_id.to_string(),
            step: "reboot",
            source,
        })
}

/// Merge observed state onto the descriptor. Provider-returned fields win
/// where the provider reports them; security-group references come back as
/// plain id strings; the provider's region becomes definitive.
fn absorb(instance: &mut Instance, region: &str, info: &InstanceInfo) {
    instance.id = info.id.clone();
    instance.state = info.state.clone();
    instance.private_ip = info.private_ip.clone();
    instance.public_ip = info.public_ip.clone();
    instance.ebs_optimized = info.ebs_optimized;
    if !info.instance_type.is_empty() {
        instance.instance_type = info.instance_type.clone();
    }
    if !info.image_id.is_empty() {
        instance.image_id = info.image_id.clone();
    }
    if !info.key_name.is_empty() {
        instance.key_name = info.key_name.clone();
    }
    if !info.subnet_id.is_empty() {
        instance.subnet_id = info.subnet_id.clone();
    }
    if !info.availability_zone.is_empty() {
        instance.availability_zone = info.availability_zone.clone();
    }
    if !info.security_group_ids.is_empty() {
        instance.security_groups = info.security_group_ids.clone();
    }
    if !region.is_empty() {
        instance.region = region.to_string();
    }
    if !info.tags.is_empty() {
        let (name, rest) = tags::split_name(&info.tags);
        if let Some(name) = name {
            instance.name = name;
        }
        instance.tags = rest;
    }
}

/// Read and render the instance's user-data template, substituting
/// `{{field}}` placeholders with descriptor fields.
fn rendered_user_data(instance: &Instance) -> Result<Option<String>, ProvisionError> {
    if instance.cloud_config.is_empty() {
        return Ok(None);
    }
    let template = fs::read_to_string(&instance.cloud_config).map_err(|err| {
        ProvisionError::Configuration(format!(
            "reading user-data template <{}>: {err}",
            instance.cloud_config
        ))
    })?;
    render_user_data(&template, instance).map(Some)
}

/// Substitute `{{field}}` placeholders. Supported variables are the
/// descriptor's string fields: name, id, region, availability_zone, type,
/// image_id, key_name, subnet_id. An unknown placeholder is fatal.
pub fn render_user_data(template: &str, instance: &Instance) -> Result<String, ProvisionError> {
    let fields: [(&str, &str); 8] = [
        ("name", &instance.name),
        ("id", &instance.id),
        ("region", &instance.region),
        ("availability_zone", &instance.availability_zone),
        ("type", &instance.instance_type),
        ("image_id", &instance.image_id),
        ("key_name", &instance.key_name),
        ("subnet_id", &instance.subnet_id),
    ];
    let mut rendered = template.to_string();
    for (field, value) in fields {
        rendered = rendered.replace(&format!("{{{{{field}}}}}"), value);
    }
    if let Some(start) = rendered.find("{{") {
        let tail = &rendered[start..];
        let token = tail
            .find("}}")
            .map(|end| &tail[..end + 2])
            .unwrap_or(tail.lines().next().unwrap_or(tail));
        return Err(ProvisionError::Configuration(format!(
            "user-data template references unknown variable {token}"
        )));
    }
    Ok(rendered)
}

pub(crate) struct InstanceWatch<'a> {
    pub provider: &'a dyn CloudProvider,
    pub instance: &'a mut Instance,
}

#[async_trait]
impl Refresh for InstanceWatch<'_> {
    fn label(&self) -> String {
        "Instance state".to_string()
    }

    fn last(&self) -> &str {
        &self.instance.state
    }

    async fn refresh(&mut self) -> Result<(), ProvisionError> {
        load(self.provider, self.instance).await
    }
}

fn dump(report: &dyn Report, instance: &Instance) {
    report.line(&format!("    Id: {}", instance.id));
    report.line(&format!("    Name: {}", instance.name));
    report.line(&format!("    Type: {}", instance.instance_type));
    report.line(&format!("    Image Id: {}", instance.image_id));
    report.line(&format!("    Availability Zone: {}", instance.availability_zone));
    report.line(&format!("    Key Name: {}", instance.key_name));
    report.line(&format!("    Security Groups: {:?}", instance.security_groups));
    report.line(&format!("    Placement Group: {}", instance.placement_group));
    report.line(&format!("    Subnet Id: {}", instance.subnet_id));
    report.line(&format!("    EBS Optimized: {}", instance.ebs_optimized));
    report.line("----------------------------------");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::SilentReport;
    use machineup_providers::mock::MockProvider;
    use std::path::PathBuf;
    use std::time::Duration;

    fn fast() -> Settle {
        Settle::bounded(Duration::from_millis(1), Duration::from_secs(1))
    }

    fn new_instance() -> Instance {
        Instance {
            name: "db-1".into(),
            instance_type: "m4.large".into(),
            image_id: "img-1234".into(),
            key_name: "db-key".into(),
            security_groups: vec!["sg-1".into()],
            subnet_id: "subnet-1".into(),
            availability_zone: "us-west-2a".into(),
            tags: vec![Tag::new("env", "prod")],
            ..Instance::default()
        }
    }

    #[tokio::test]
    async fn empty_id_creates_tags_and_settles_running() {
        let provider = MockProvider::new("us-west-2");
        let mut instance = new_instance();

        resolve(&provider, &SilentReport, &fast(), &mut instance)
            .await
            .unwrap();

        let calls = provider.calls();
        assert_eq!(calls[0], "CreateInstance");
        assert!(calls[1].starts_with("CreateTags i-"));
        assert!(calls[2].starts_with("DescribeInstance i-"));
        assert_eq!(instance.state, state::INSTANCE_RUNNING);
        assert_eq!(instance.region, "us-west-2");
        assert_eq!(instance.name, "db-1");
        assert_eq!(instance.tags, vec![Tag::new("env", "prod")]);
        assert!(!instance.private_ip.is_empty());
    }

    #[tokio::test]
    async fn existing_id_loads_and_never_creates() {
        let provider = MockProvider::new("us-west-2");
        let mut seed = new_instance();
        resolve(&provider, &SilentReport, &fast(), &mut seed)
            .await
            .unwrap();

        let mut instance = Instance {
            id: seed.id.clone(),
            ..Instance::default()
        };
        let before = provider.calls().len();
        resolve(&provider, &SilentReport, &fast(), &mut instance)
            .await
            .unwrap();

        let calls = provider.calls()[before..].to_vec();
        assert_eq!(calls, vec![format!("DescribeInstance {}", seed.id)]);
        assert_eq!(instance.name, "db-1");
        assert_eq!(instance.security_groups, vec!["sg-1".to_string()]);
        assert_eq!(instance.subnet_id, "subnet-1");
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        let provider = MockProvider::new("us-west-2");
        let mut instance = Instance {
            id: "i-deadbeef".into(),
            ..Instance::default()
        };
        let err = resolve(&provider, &SilentReport, &fast(), &mut instance)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProvisionError::NotFound {
                kind: "instance",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn missing_template_fails_before_any_provider_call() {
        let provider = MockProvider::new("us-west-2");
        let mut instance = new_instance();
        instance.cloud_config = "/nonexistent/user-data.yml".into();

        let err = resolve(&provider, &SilentReport, &fast(), &mut instance)
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::Configuration(_)));
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn template_renders_descriptor_fields() {
        let provider = MockProvider::new("us-west-2");
        let dir = std::env::temp_dir().join(format!("machineup-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path: PathBuf = dir.join("user-data.yml");
        std::fs::write(&path, "#cloud-config\nhostname: {{name}}\nzone: {{availability_zone}}\n")
            .unwrap();

        let mut instance = new_instance();
        instance.cloud_config = path.to_string_lossy().into_owned();
        resolve(&provider, &SilentReport, &fast(), &mut instance)
            .await
            .unwrap();

        let requests = provider.instance_requests();
        assert_eq!(
            requests[0].user_data.as_deref(),
            Some("#cloud-config\nhostname: db-1\nzone: us-west-2a\n")
        );
    }

    #[test]
    fn unknown_placeholder_is_a_configuration_error() {
        let err = render_user_data("hello {{nope}}", &Instance::default()).unwrap_err();
        assert!(err.to_string().contains("{{nope}}"));
    }

    #[tokio::test]
    async fn create_request_maps_flags() {
        let provider = MockProvider::new("us-west-2");
        let mut instance = new_instance();
        instance.shutdown_behavior = "terminate".into();
        instance.enable_api_termination = true;
        instance.placement_group = "perf".into();
        resolve(&provider, &SilentReport, &fast(), &mut instance)
            .await
            .unwrap();

        let request = &provider.instance_requests()[0];
        assert_eq!(request.shutdown_behavior.as_deref(), Some("terminate"));
        assert!(!request.disable_api_termination);
        assert_eq!(request.placement_group.as_deref(), Some("perf"));
    }
}
