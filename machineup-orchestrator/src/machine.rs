//! Per-machine orchestration: the ordered reconciliation sequence for one
//! instance and its volumes.

use std::fs;
use std::path::Path;

use machineup_common::descriptor::{Machine, Volume};
use machineup_providers::{codes, CloudProvider};

use crate::error::ProvisionError;
use crate::format;
use crate::instances;
use crate::report::Report;
use crate::settle::Settle;
use crate::volumes;

/// Bring one machine into conformance. Strictly ordered: resolve volumes
/// (zones forced to the instance's), format the new ones through a bootstrap
/// instance, resolve the instance, attach all volumes, reboot. Realized ids
/// and addresses are merged into the passed descriptors.
pub async fn converge(
    provider: &dyn CloudProvider,
    report: &dyn Report,
    settle: &Settle,
    machine: &mut Machine,
    workdir: &Path,
) -> Result<(), ProvisionError> {
    // Fail on a missing user-data template before any provider call.
    if !machine.instance.cloud_config.is_empty() {
        fs::metadata(&machine.instance.cloud_config).map_err(|err| {
            ProvisionError::Configuration(format!(
                "user-data template <{}>: {err}",
                machine.instance.cloud_config
            ))
        })?;
    }

    let mut to_format: Vec<Volume> = Vec::new();
    for volume in &mut machine.volumes {
        volume.availability_zone = machine.instance.availability_zone.clone();
        let fresh = volume.needs_format();
        volumes::resolve(provider, report, settle, volume).await?;
        if fresh {
            to_format.push(volume.clone());
        }
    }

    if !to_format.is_empty() {
        format::format_volumes(provider, report, settle, &machine.instance, &to_format, workdir)
            .await?;
    }

    instances::resolve(provider, report, settle, &mut machine.instance).await?;
    attach_volumes(provider, &machine.instance.id, &machine.volumes).await?;

    // Mounts configured in the machine's own user data take effect on reboot.
    instances::reboot(provider, report, &machine.instance.id).await?;

    report.line(&format!(
        "The instance Id <{}> with IP Address <{}> is running with {} volume(s)!",
        machine.instance.id,
        machine.instance.private_ip,
        machine.volumes.len()
    ));
    Ok(())
}

/// Attach every volume at its configured device path. A provider error coded
/// `VolumeInUse` means the volume is already attached and is skipped; any
/// other error aborts.
pub async fn attach_volumes(
    provider: &dyn CloudProvider,
    instance_id: &str,
    volumes: &[Volume],
) -> Result<(), ProvisionError> {
    for volume in volumes {
        if let Err(err) = provider
            .attach_volume(&volume.id, instance_id, &volume.device)
            .await
        {
            if err.code() == Some(codes::VOLUME_IN_USE) {
                tracing::debug!(
                    volume = %volume.id,
                    instance = %instance_id,
                    "volume already attached"
                );
                continue;
            }
            return Err(ProvisionError::PartialState {
                resource: "volume",
                id: volume.id.clone(),
                step: "attach",
                source: err,
            });
        }
    }
    Ok(())
}
