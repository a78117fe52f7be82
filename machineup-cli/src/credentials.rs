//! Credential resolution: explicit flags, then environment, then a local
//! credentials file. The pair is opaque to the orchestrator; the selected
//! provider decides what the keys mean.

use std::env;
use std::fs;

use anyhow::{bail, Result};

pub const ACCESS_KEY_VAR: &str = "MACHINEUP_ACCESS_KEY";
pub const SECRET_KEY_VAR: &str = "MACHINEUP_SECRET_KEY";
const CREDENTIALS_FILE: &str = ".machineup/credentials";

#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub access_key: String,
    pub secret_key: String,
}

pub fn resolve(flag_access: Option<&str>, flag_secret: Option<&str>) -> Result<Credentials> {
    if let (Some(access), Some(secret)) = (flag_access, flag_secret) {
        return Ok(Credentials {
            access_key: access.to_string(),
            secret_key: secret.to_string(),
        });
    }

    if let (Ok(access), Ok(secret)) = (env::var(ACCESS_KEY_VAR), env::var(SECRET_KEY_VAR)) {
        if !access.is_empty() && !secret.is_empty() {
            return Ok(Credentials {
                access_key: access,
                secret_key: secret,
            });
        }
    }

    let Some(base) = directories::BaseDirs::new() else {
        bail!("home directory not found");
    };
    let path = base.home_dir().join(CREDENTIALS_FILE);
    match fs::read_to_string(&path) {
        Ok(raw) => parse(&raw).ok_or_else(|| {
            anyhow::anyhow!(
                "credentials file {} is missing access_key or secret_key",
                path.display()
            )
        }),
        Err(_) => bail!(
            "no credentials: pass --access-key/--secret-key, set {ACCESS_KEY_VAR}/{SECRET_KEY_VAR}, \
             or create ~/{CREDENTIALS_FILE}"
        ),
    }
}

/// Parse `key = value` lines; `#` comments and `[section]` headers are
/// ignored.
pub fn parse(input: &str) -> Option<Credentials> {
    let mut credentials = Credentials::default();
    for line in input.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('[') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        match key.trim() {
            "access_key" => credentials.access_key = value.trim().to_string(),
            "secret_key" => credentials.secret_key = value.trim().to_string(),
            _ => {}
        }
    }
    (!credentials.access_key.is_empty() && !credentials.secret_key.is_empty())
        .then_some(credentials)
}
