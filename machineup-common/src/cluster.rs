//! Default cascade and node expansion for cluster provisioning.

use crate::descriptor::{Defaults, Machine};
use crate::tags;

/// Fill every unset machine-level field from the cluster defaults and
/// propagate default tags down to the instance and each volume. Existing
/// values always win; applying the same defaults twice is a no-op.
pub fn apply_defaults(machine: &mut Machine, defaults: &Defaults) {
    let instance = &mut machine.instance;
    if instance.image_id.is_empty() {
        instance.image_id = defaults.image_id.clone();
    }
    if instance.region.is_empty() {
        instance.region = defaults.region.clone();
    }
    if instance.key_name.is_empty() {
        instance.key_name = defaults.key_name.clone();
    }
    if instance.security_groups.is_empty() {
        instance.security_groups = defaults.security_groups.clone();
    }
    if instance.subnet_id.is_empty() {
        instance.subnet_id = defaults.subnet_id.clone();
    }
    if instance.availability_zone.is_empty() {
        instance.availability_zone = defaults.availability_zone.clone();
    }
    tags::inherit(&mut instance.tags, &defaults.tags);
    for volume in &mut machine.volumes {
        tags::inherit(&mut volume.tags, &defaults.tags);
    }
}

/// Clone the template for node `node`, appending `-<node>` to the instance
/// name and to every volume name. The template itself is never mutated.
pub fn expand_node(template: &Machine, node: u32) -> Machine {
    let mut machine = template.clone();
    machine.instance.name = format!("{}-{}", machine.instance.name, node);
    for volume in &mut machine.volumes {
        volume.name = format!("{}-{}", volume.name, node);
    }
    machine
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{Instance, Volume};
    use crate::tags::Tag;

    fn template() -> Machine {
        Machine {
            instance: Instance {
                name: "db".into(),
                instance_type: "m4.large".into(),
                key_name: "db-key".into(),
                tags: vec![Tag::new("Role", "database")],
                ..Instance::default()
            },
            volumes: vec![Volume {
                name: "db-data".into(),
                device: "/dev/xvdf".into(),
                ..Volume::default()
            }],
        }
    }

    fn defaults() -> Defaults {
        Defaults {
            image_id: "img-default".into(),
            region: "us-west-2".into(),
            key_name: "cluster-key".into(),
            security_groups: vec!["sg-1".into()],
            subnet_id: "subnet-1".into(),
            availability_zone: "us-west-2a".into(),
            tags: vec![Tag::new("env", "prod"), Tag::new("role", "ignored")],
        }
    }

    #[test]
    fn cascade_fills_only_unset_fields() {
        let mut machine = template();
        apply_defaults(&mut machine, &defaults());

        assert_eq!(machine.instance.image_id, "img-default");
        assert_eq!(machine.instance.region, "us-west-2");
        // Set in the template, must survive.
        assert_eq!(machine.instance.key_name, "db-key");
        assert_eq!(machine.instance.security_groups, vec!["sg-1".to_string()]);
        assert_eq!(machine.instance.availability_zone, "us-west-2a");
    }

    #[test]
    fn cascade_inherits_tags_without_overwriting() {
        let mut machine = template();
        apply_defaults(&mut machine, &defaults());

        // "role" clashes with the template's "Role" (case-insensitive).
        assert_eq!(
            machine.instance.tags,
            vec![Tag::new("Role", "database"), Tag::new("env", "prod")]
        );
        assert_eq!(
            machine.volumes[0].tags,
            vec![Tag::new("env", "prod"), Tag::new("role", "ignored")]
        );
    }

    #[test]
    fn cascade_is_idempotent() {
        let mut machine = template();
        apply_defaults(&mut machine, &defaults());
        let once = format!("{machine:?}");
        apply_defaults(&mut machine, &defaults());
        assert_eq!(format!("{machine:?}"), once);
    }

    #[test]
    fn expansion_suffixes_names_and_keeps_template() {
        let template = template();
        let nodes: Vec<Machine> = (1..=3).map(|i| expand_node(&template, i)).collect();

        assert_eq!(nodes.len(), 3);
        assert_eq!(nodes[0].instance.name, "db-1");
        assert_eq!(nodes[1].instance.name, "db-2");
        assert_eq!(nodes[2].instance.name, "db-3");
        assert_eq!(nodes[2].volumes[0].name, "db-data-3");

        assert_eq!(template.instance.name, "db");
        assert_eq!(template.volumes[0].name, "db-data");
    }
}
