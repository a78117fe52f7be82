//! Volume formatting workflow.
//!
//! New block devices come unformatted. Before the real instance can mount
//! them, a disposable bootstrap instance is launched whose generated boot
//! configuration formats and mounts each new volume, powers the instance off
//! once done, and — because the bootstrap is created with shutdown behavior
//! `terminate` — self-terminates. The generated document layout is consumed
//! by existing boot images and must stay byte-compatible.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use machineup_common::descriptor::{Instance, Volume};
use machineup_providers::{state, CloudProvider};

use crate::error::ProvisionError;
use crate::instances::{self, InstanceWatch};
use crate::machine;
use crate::report::Report;
use crate::settle::{converge, Settle};

/// Image and size of the disposable bootstrap instance.
pub const FORMAT_INSTANCE_IMAGE_ID: &str = "ami-ed8b90dd";
pub const FORMAT_INSTANCE_TYPE: &str = "t2.micro";

/// Format the given volumes through a bootstrap instance inheriting the
/// target machine's networking. Any failure aborts the whole machine: an
/// unformatted volume must never reach the real instance.
pub async fn format_volumes(
    provider: &dyn CloudProvider,
    report: &dyn Report,
    settle: &Settle,
    target: &Instance,
    volumes: &[Volume],
    workdir: &Path,
) -> Result<(), ProvisionError> {
    let name = format!("{}-format-volumes", target.name);
    let config_path = write_format_config(workdir, &name, volumes)?;

    let mut bootstrap = Instance {
        name,
        cloud_config: config_path.to_string_lossy().into_owned(),
        image_id: FORMAT_INSTANCE_IMAGE_ID.to_string(),
        instance_type: FORMAT_INSTANCE_TYPE.to_string(),
        key_name: target.key_name.clone(),
        security_groups: target.security_groups.clone(),
        subnet_id: target.subnet_id.clone(),
        availability_zone: target.availability_zone.clone(),
        shutdown_behavior: "terminate".to_string(),
        ..Instance::default()
    };
    instances::resolve(provider, report, settle, &mut bootstrap).await?;
    machine::attach_volumes(provider, &bootstrap.id, volumes).await?;

    // The boot configuration only runs its formatting units on (re)boot.
    instances::reboot(provider, report, &bootstrap.id).await?;

    report.line(&format!(
        "Waiting while {} volume(s) are formatted...",
        volumes.len()
    ));
    converge(
        settle,
        report,
        &mut InstanceWatch {
            provider,
            instance: &mut bootstrap,
        },
        state::INSTANCE_TERMINATED,
    )
    .await
}

/// Persist the generated boot configuration under a deterministic name
/// derived from the bootstrap instance's name. The directory is created on
/// demand; failure to create or write is a configuration error.
pub(crate) fn write_format_config(
    workdir: &Path,
    instance_name: &str,
    volumes: &[Volume],
) -> Result<PathBuf, ProvisionError> {
    match fs::create_dir(workdir) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {}
        Err(err) => {
            return Err(ProvisionError::Configuration(format!(
                "creating boot-config directory <{}>: {err}",
                workdir.display()
            )))
        }
    }

    let mut units = String::new();
    for volume in volumes {
        units.push_str(&format_and_mount_unit(volume));
    }

    let path = workdir.join(format!("{instance_name}.yml"));
    fs::write(&path, format_cloud_config(&units)).map_err(|err| {
        ProvisionError::Configuration(format!(
            "writing boot configuration <{}>: {err}",
            path.display()
        ))
    })?;
    Ok(path)
}

/// One-shot formatting service plus a mount unit that depends on it and
/// mounts the device before system shutdown.
fn format_and_mount_unit(volume: &Volume) -> String {
    let mount_unit = volume.mount.trim_matches('/').replace('/', "-");
    format!(
        r#"
    - name: format-{name}.service
      command: start
      content: |
        [Unit]
        Description=Formats {name} drive
        [Service]
        Type=oneshot
        RemainAfterExit=yes
        ExecStart=/usr/sbin/wipefs -f {device}
        ExecStart=/usr/sbin/mkfs.{file_system} {device}
    - name: {mount_unit}.mount
      command: start
      content: |
        [Unit]
        Description=Mount {name} drive to {mount}
        Requires=format-{name}.service
        Before=shutdown.service
        After=format-{name}.service
        [Mount]
        What={device}
        Where={mount}
        Type={file_system}
        Options=defaults,noatime,noexec,nobarrier"#,
        name = volume.name,
        device = volume.device,
        file_system = volume.file_system,
        mount = volume.mount,
        mount_unit = mount_unit,
    )
}

/// Full boot-configuration document: the per-volume units, a final shutdown
/// service, and masks for the cluster-coordination services this disposable
/// node must not join.
fn format_cloud_config(units: &str) -> String {
    format!(
        r#"#cloud-config

coreos:
  units:{units}
    - name: shutdown.service
      command: start
      content: |
        [Unit]
        Description=Shutdown instance after format and mount all volumes
        [Service]
        Type=oneshot
        ExecStart=/usr/sbin/shutdown -h now
    - name: etcd.service
      mask: true
    - name: fleet.service
      mask: true
    - name: docker.service
      mask: true
  update:
      group: stable
      reboot-strategy: off"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_volume() -> Volume {
        Volume {
            name: "db-data".into(),
            device: "/dev/xvdf".into(),
            mount: "/var/lib/db".into(),
            file_system: "ext4".into(),
            ..Volume::default()
        }
    }

    #[test]
    fn unit_text_is_byte_stable() {
        let expected = "\n    - name: format-db-data.service\n      command: start\n      content: |\n        [Unit]\n        Description=Formats db-data drive\n        [Service]\n        Type=oneshot\n        RemainAfterExit=yes\n        ExecStart=/usr/sbin/wipefs -f /dev/xvdf\n        ExecStart=/usr/sbin/mkfs.ext4 /dev/xvdf\n    - name: var-lib-db.mount\n      command: start\n      content: |\n        [Unit]\n        Description=Mount db-data drive to /var/lib/db\n        Requires=format-db-data.service\n        Before=shutdown.service\n        After=format-db-data.service\n        [Mount]\n        What=/dev/xvdf\n        Where=/var/lib/db\n        Type=ext4\n        Options=defaults,noatime,noexec,nobarrier";
        assert_eq!(format_and_mount_unit(&data_volume()), expected);
    }

    #[test]
    fn document_embeds_units_shutdown_and_masks() {
        let doc = format_cloud_config(&format_and_mount_unit(&data_volume()));
        assert!(doc.starts_with("#cloud-config\n\ncoreos:\n  units:\n    - name: format-db-data.service\n"));
        assert!(doc.contains("ExecStart=/usr/sbin/shutdown -h now"));
        assert!(doc.contains("    - name: etcd.service\n      mask: true\n"));
        assert!(doc.contains("    - name: fleet.service\n      mask: true\n"));
        assert!(doc.contains("    - name: docker.service\n      mask: true\n"));
        assert!(doc.ends_with("  update:\n      group: stable\n      reboot-strategy: off"));
    }

    #[test]
    fn config_file_gets_a_deterministic_name() {
        let dir = std::env::temp_dir().join(format!("machineup-{}", uuid::Uuid::new_v4()));
        let path = write_format_config(&dir, "db-1-format-volumes", &[data_volume()]).unwrap();
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "db-1-format-volumes.yml"
        );
        let written = fs::read_to_string(&path).unwrap();
        assert!(written.contains("format-db-data.service"));

        // Re-running with the directory already present is fine.
        write_format_config(&dir, "db-1-format-volumes", &[data_volume()]).unwrap();
    }
}
