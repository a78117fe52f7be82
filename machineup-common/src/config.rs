//! YAML descriptor file loading.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::descriptor::{ClusterFile, Machine};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}

pub fn parse_machine(input: &str) -> Result<Machine, serde_yaml::Error> {
    serde_yaml::from_str(input)
}

pub fn parse_cluster(input: &str) -> Result<ClusterFile, serde_yaml::Error> {
    serde_yaml::from_str(input)
}

pub fn load_machine(path: &Path) -> Result<Machine, ConfigError> {
    let raw = read(path)?;
    parse_machine(&raw).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}

pub fn load_cluster(path: &Path) -> Result<ClusterFile, ConfigError> {
    let raw = read(path)?;
    parse_cluster(&raw).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}

fn read(path: &Path) -> Result<String, ConfigError> {
    fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn machine_yaml_decodes_sparsely() {
        let machine = parse_machine(
            r#"
instance:
  name: db
  type: m4.large
  image_id: img-1234
  availability_zone: us-west-2a
  security_groups: [sg-1, sg-2]
volumes:
  - name: db-data
    type: gp2
    size: 100
    device: /dev/xvdf
    mount: /data
    file_system: ext4
  - name: db-logs
    type: io1
    iops: 2000
    size: 50
    device: /dev/xvdg
    mount: /var/log/db
    file_system: xfs
"#,
        )
        .unwrap();

        assert_eq!(machine.instance.name, "db");
        assert_eq!(machine.instance.instance_type, "m4.large");
        assert_eq!(machine.instance.security_groups.len(), 2);
        assert!(machine.instance.id.is_empty());
        assert_eq!(machine.volumes.len(), 2);
        assert_eq!(machine.volumes[0].volume_type, "gp2");
        assert_eq!(machine.volumes[1].iops, 2000);
        assert!(machine.volumes[0].needs_format());
    }

    #[test]
    fn cluster_yaml_decodes_defaults_and_entries() {
        let cluster = parse_cluster(
            r#"
default:
  image_id: img-1234
  region: us-west-2
  availability_zone: us-west-2a
  tags:
    - key: env
      value: prod
clusters:
  - machine: machines/db.yml
    nodes: 3
  - machine: machines/web.yml
    nodes: 2
"#,
        )
        .unwrap();

        assert_eq!(cluster.default.region, "us-west-2");
        assert_eq!(cluster.default.tags[0].key, "env");
        assert_eq!(cluster.clusters.len(), 2);
        assert_eq!(cluster.clusters[0].nodes, 3);
        assert_eq!(cluster.clusters[1].machine, "machines/web.yml");
    }

    #[test]
    fn load_reports_missing_file_with_path() {
        let err = load_machine(Path::new("/nonexistent/machine.yml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/machine.yml"));
    }
}
