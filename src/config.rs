// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interfaces for parsing the daemon's configuration file and working with
//! deployment-wide settings

use dropshot::ConfigDropshot;
use dropshot::ConfigLogging;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::env;
use std::path::Path;

use crate::provision::LaunchTemplate;
use crate::provision::SimMode;

/// Configuration for the control-plane daemon
#[derive(Debug, Deserialize)]
pub struct Config {
    /// how the simulated provisioning backend fulfills capacity requests
    pub sim_mode: SimMode,
    /// fixed launch parameters for game-server instances
    pub launch: LaunchTemplate,
    /// deployment-wide settings shared with provisioned instances
    pub infra: InfraConfig,
    /// dropshot server configuration
    pub dropshot: ConfigDropshot,
    /// server-wide logging configuration
    pub log: ConfigLogging,
}

impl Config {
    /// Load a `Config` from the given TOML file.  This config object can then
    /// be used to create a new control server.
    pub fn from_file(path: &Path) -> Result<Config, String> {
        let file_read = std::fs::read_to_string(path);
        let file_contents = file_read.map_err(|error| {
            format!("read \"{}\": {}", path.display(), error)
        })?;
        let config_parsed: Config = toml::from_str(&file_contents)
            .map_err(|error| {
                format!("parse \"{}\": {}", path.display(), error)
            })?;
        Ok(config_parsed)
    }
}

/// Names a single deployment-wide setting
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InfraSetting {
    /// cloud region the deployment lives in
    Region,
    /// name of the table holding server records
    ServerTable,
    /// name of the bucket holding deployment resources (startup scripts,
    /// world backups)
    ResourceBucket,
}

/// Supplies named deployment settings and their environment-variable
/// rendering
///
/// Consumers run in several places (the daemon itself, provisioned game
/// servers reading their environment), so this is a trait: the daemon backs
/// it with [`InfraConfig`], and tests can substitute their own values.
pub trait InfraSettings: Send + Sync {
    /// Returns the value of one named deployment setting.
    fn value(&self, setting: InfraSetting) -> String;

    /// Renders all settings as an ordered mapping of environment variable
    /// names to values.
    fn environment(&self) -> BTreeMap<String, String>;
}

const ENV_REGION: &str = "SPOTCRAFT_REGION";
const ENV_SERVER_TABLE: &str = "SPOTCRAFT_SERVER_TABLE";
const ENV_RESOURCE_BUCKET: &str = "SPOTCRAFT_RESOURCE_BUCKET";

/// Deployment-wide settings as loaded from the daemon's config file or from
/// the process environment
#[derive(Clone, Debug, Deserialize)]
pub struct InfraConfig {
    pub region: String,
    pub server_table: String,
    pub resource_bucket: String,
}

impl InfraConfig {
    /// Reconstructs an `InfraConfig` from the environment variables emitted
    /// by [`InfraSettings::environment`].  This is how short-lived processes
    /// (and provisioned instances) receive their deployment context.
    pub fn from_environment() -> Result<InfraConfig, String> {
        let read = |name: &str| {
            env::var(name).map_err(|_| format!("missing or invalid {}", name))
        };
        Ok(InfraConfig {
            region: read(ENV_REGION)?,
            server_table: read(ENV_SERVER_TABLE)?,
            resource_bucket: read(ENV_RESOURCE_BUCKET)?,
        })
    }
}

impl InfraSettings for InfraConfig {
    fn value(&self, setting: InfraSetting) -> String {
        match setting {
            InfraSetting::Region => self.region.clone(),
            InfraSetting::ServerTable => self.server_table.clone(),
            InfraSetting::ResourceBucket => self.resource_bucket.clone(),
        }
    }

    fn environment(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        map.insert(String::from(ENV_REGION), self.region.clone());
        map.insert(String::from(ENV_SERVER_TABLE), self.server_table.clone());
        map.insert(
            String::from(ENV_RESOURCE_BUCKET),
            self.resource_bucket.clone(),
        );
        map
    }
}

#[cfg(test)]
mod test {
    use super::Config;
    use super::InfraSetting;
    use super::InfraSettings;
    use std::fs;
    use std::path::Path;

    /*
     * Chunks of valid config file.  These are put together with invalid
     * chunks in the test suite to construct complete config files that will
     * only fail on the known invalid chunk.
     */
    const CONFIG_VALID_LAUNCH: &str = r##"
            sim_mode = "explicit"
            [launch]
            instance_type = "m5.large"
            image_id = "ami-0233c2d874b811deb"
            subnet_id = "subnet-0f00ba11"
            instance_profile_arn = "arn:aws:iam::123456789012:instance-profile/game-server"
            security_group_id = "sg-0c0ffee0"
            [infra]
            region = "us-east-2"
            server_table = "spotcraft-servers"
            resource_bucket = "spotcraft-resources"
            [dropshot]
            bind_address = "127.0.0.1:12220"
        "##;
    const CONFIG_VALID_LOG: &str = r##"
            [log]
            level = "info"
            mode = "stderr-terminal"
        "##;

    fn read_config(label: &str, contents: &str) -> Result<Config, String> {
        let pathbuf =
            std::env::temp_dir().join(format!("spotcraft-config.{}", label));
        let path = pathbuf.as_path();
        eprintln!("writing test config {}", path.display());
        fs::write(path, contents).expect("write to tempfile failed");

        let result = Config::from_file(path);
        fs::remove_file(path).expect("failed to remove temporary file");
        eprintln!("{:?}", result);
        result
    }

    #[test]
    fn test_config_nonexistent() {
        let error = Config::from_file(Path::new("/nonexistent"))
            .expect_err("expected config to fail from /nonexistent");
        assert!(error
            .starts_with("read \"/nonexistent\": No such file or directory"));
    }

    #[test]
    fn test_config_bad_toml() {
        let error =
            read_config("bad_toml", "foo =").expect_err("expected failure");
        assert!(error.starts_with("parse \""));
    }

    #[test]
    fn test_config_empty() {
        let error = read_config("empty", "").expect_err("expected failure");
        assert!(error.starts_with("parse \""));
        assert!(error.contains("missing field"));
    }

    #[test]
    fn test_config_missing_log() {
        let error = read_config("missing_log", CONFIG_VALID_LAUNCH)
            .expect_err("expected failure");
        assert!(error.contains("missing field `log`"));
    }

    #[test]
    fn test_config_valid() {
        let contents =
            format!("{}{}", CONFIG_VALID_LAUNCH, CONFIG_VALID_LOG);
        let config = read_config("valid", &contents).expect("expected success");
        assert_eq!(config.launch.instance_type, "m5.large");
        assert_eq!(config.infra.region, "us-east-2");
        assert_eq!(config.dropshot.bind_address.port(), 12220);
        config.log.to_logger("test-config").expect("expected logger");
    }

    #[test]
    fn test_infra_from_environment() {
        std::env::set_var("SPOTCRAFT_REGION", "eu-west-1");
        std::env::set_var("SPOTCRAFT_SERVER_TABLE", "servers-test");
        std::env::set_var("SPOTCRAFT_RESOURCE_BUCKET", "resources-test");
        let infra = super::InfraConfig::from_environment()
            .expect("expected settings from environment");
        assert_eq!(infra.region, "eu-west-1");
        assert_eq!(infra.server_table, "servers-test");
        assert_eq!(infra.resource_bucket, "resources-test");

        std::env::remove_var("SPOTCRAFT_RESOURCE_BUCKET");
        let error = super::InfraConfig::from_environment()
            .expect_err("expected failure");
        assert_eq!(error, "missing or invalid SPOTCRAFT_RESOURCE_BUCKET");
    }

    #[test]
    fn test_infra_environment_rendering() {
        let contents =
            format!("{}{}", CONFIG_VALID_LAUNCH, CONFIG_VALID_LOG);
        let config = read_config("environment", &contents).unwrap();
        let environment = config.infra.environment();
        assert_eq!(
            environment.get("SPOTCRAFT_REGION").map(String::as_str),
            Some("us-east-2")
        );
        assert_eq!(
            environment.get("SPOTCRAFT_RESOURCE_BUCKET").map(String::as_str),
            Some("spotcraft-resources")
        );
        assert_eq!(
            config.infra.value(InfraSetting::ServerTable),
            "spotcraft-servers"
        );
    }
}
