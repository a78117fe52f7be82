//! Volume resolution: load an existing volume by id, or create, tag and wait
//! for it to become available.

use async_trait::async_trait;

use machineup_common::descriptor::Volume;
use machineup_common::tags::{self, Tag};
use machineup_providers::{state, CloudProvider, CreateVolumeRequest, VolumeInfo};

use crate::error::ProvisionError;
use crate::report::Report;
use crate::settle::{converge, Refresh, Settle};

/// Zone used when neither the volume nor its machine pins one.
pub const FALLBACK_AVAILABILITY_ZONE: &str = "us-west-2a";

fn requires_provisioned_iops(volume_type: &str) -> bool {
    matches!(volume_type, "io1" | "io2")
}

/// Get-or-create: an empty id creates a new volume, a non-empty id loads the
/// existing one. Provider-observed fields are merged onto the descriptor
/// either way.
pub async fn resolve(
    provider: &dyn CloudProvider,
    report: &dyn Report,
    settle: &Settle,
    volume: &mut Volume,
) -> Result<(), ProvisionError> {
    if volume.id.is_empty() {
        report.line("Creating new volume...");
        create(provider, report, settle, volume).await?;
        report.line("--------- NEW VOLUME ---------");
    } else {
        report.line(&format!("Loading volume id <{}>...", volume.id));
        load(provider, volume).await?;
        report.line("--------- LOADING VOLUME ---------");
    }
    dump(report, volume);
    Ok(())
}

async fn create(
    provider: &dyn CloudProvider,
    report: &dyn Report,
    settle: &Settle,
    volume: &mut Volume,
) -> Result<(), ProvisionError> {
    let request = CreateVolumeRequest {
        volume_type: volume.volume_type.clone(),
        size_gib: (volume.size > 0).then_some(volume.size),
        availability_zone: if volume.availability_zone.is_empty() {
            FALLBACK_AVAILABILITY_ZONE.to_string()
        } else {
            volume.availability_zone.clone()
        },
        snapshot_id: (!volume.snapshot_id.is_empty()).then(|| volume.snapshot_id.clone()),
        iops: requires_provisioned_iops(&volume.volume_type).then_some(volume.iops),
    };
    let info = provider.create_volume(&request).await?;

    let mut wanted = vec![Tag::new(tags::NAME_KEY, &volume.name)];
    wanted.extend(volume.tags.iter().cloned());
    if let Err(source) = provider.create_tags(&info.id, &wanted).await {
        // The volume now exists remotely but untagged; nothing deletes it.
        return Err(ProvisionError::PartialState {
            resource: "volume",
            id: info.id,
            step: "tagging",
            source,
        });
    }

    absorb(volume, &info);
    converge(
        settle,
        report,
        &mut VolumeWatch { provider, volume },
        state::VOLUME_AVAILABLE,
    )
    .await
}

pub(crate) async fn load(
    provider: &dyn CloudProvider,
    volume: &mut Volume,
) -> Result<(), ProvisionError> {
    if volume.id.is_empty() {
        return Err(ProvisionError::Configuration(
            "cannot load a volume without an id".into(),
        ));
    }
    match provider.describe_volume(&volume.id).await? {
        Some(info) => {
            absorb(volume, &info);
            Ok(())
        }
        None => Err(ProvisionError::NotFound {
            kind: "volume",
            id: volume.id.clone(),
        }),
    }
}

/// Merge observed state onto the descriptor: provider-returned fields win
/// where the provider reports them, the `Name` tag moves into the dedicated
/// name field and all other tags are preserved verbatim.
fn absorb(volume: &mut Volume, info: &VolumeInfo) {
    volume.id = info.id.clone();
    volume.status = info.status.clone();
    if !info.volume_type.is_empty() {
        volume.volume_type = info.volume_type.clone();
    }
    if info.size_gib > 0 {
        volume.size = info.size_gib;
    }
    if info.iops > 0 {
        volume.iops = info.iops;
    }
    if !info.availability_zone.is_empty() {
        volume.availability_zone = info.availability_zone.clone();
    }
    if !info.tags.is_empty() {
        let (name, rest) = tags::split_name(&info.tags);
        if let Some(name) = name {
            volume.name = name;
        }
        volume.tags = rest;
    }
}

pub(crate) struct VolumeWatch<'a> {
    pub provider: &'a dyn CloudProvider,
    pub volume: &'a mut Volume,
}

#[async_trait]
impl Refresh for VolumeWatch<'_> {
    fn label(&self) -> String {
        "Volume status".to_string()
    }

    fn last(&self) -> &str {
        &self.volume.status
    }

    async fn refresh(&mut self) -> Result<(), ProvisionError> {
        load(self.provider, self.volume).await
    }
}

fn dump(report: &dyn Report, volume: &Volume) {
    report.line(&format!("    Id: {}", volume.id));
    report.line(&format!("    Name: {}", volume.name));
    report.line(&format!("    Type: {}", volume.volume_type));
    report.line(&format!("    Size: {}", volume.size));
    if volume.iops > 0 {
        report.line(&format!("    IOPS: {}", volume.iops));
    }
    report.line(&format!("    Availability Zone: {}", volume.availability_zone));
    report.line(&format!("    Device: {}", volume.device));
    report.line(&format!("    Mount: {}", volume.mount));
    report.line(&format!("    File System: {}", volume.file_system));
    report.line("----------------------------------");
}
