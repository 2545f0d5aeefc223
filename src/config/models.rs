use crate::humanize::HumanDuration;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub inbound: InboundConfig,
    #[serde(default)]
    pub outbound: OutboundConfig,
    #[serde(default)]
    pub destination: DestinationConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub normalizer: NormalizerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Inbound (consumed) queue
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InboundConfig {
    /// AMQP URI; may instead come from `AMQP_URL`
    pub url: Option<String>,
    #[serde(default = "default_inbound_queue")]
    pub queue: String,
    #[serde(default = "default_consumer_tag")]
    pub consumer_tag: String,
}

impl Default for InboundConfig {
    fn default() -> Self {
        Self {
            url: None,
            queue: default_inbound_queue(),
            consumer_tag: default_consumer_tag(),
        }
    }
}

fn default_inbound_queue() -> String {
    "downloads".to_string()
}

fn default_consumer_tag() -> String {
    "relaybox".to_string()
}

/// Outbound exchange/queue receiving completion notices
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutboundConfig {
    /// Separate broker URI; the inbound connection is reused when absent
    pub url: Option<String>,
    #[serde(default = "default_outbound_exchange")]
    pub exchange: String,
    #[serde(default = "default_outbound_queue")]
    pub queue: String,
    #[serde(default = "default_routing_key")]
    pub routing_key: String,
}

impl Default for OutboundConfig {
    fn default() -> Self {
        Self {
            url: None,
            exchange: default_outbound_exchange(),
            queue: default_outbound_queue(),
            routing_key: default_routing_key(),
        }
    }
}

fn default_outbound_exchange() -> String {
    "uploads".to_string()
}

fn default_outbound_queue() -> String {
    "uploaded".to_string()
}

fn default_routing_key() -> String {
    "uploaded".to_string()
}

/// Destination store layout: `<root><collection>/<show>`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DestinationConfig {
    #[serde(default = "default_destination_root")]
    pub root: String,
    #[serde(default = "default_collection")]
    pub collection: String,
}

impl Default for DestinationConfig {
    fn default() -> Self {
        Self {
            root: default_destination_root(),
            collection: default_collection(),
        }
    }
}

impl DestinationConfig {
    /// Destination path for a show. Roots ending in `:` (rclone remotes) or `/`
    /// are joined without an extra separator.
    pub fn path_for(&self, show: &str) -> String {
        let collection = self.collection.trim_matches('/');
        let separator = if self.root.ends_with(':') || self.root.ends_with('/') {
            ""
        } else {
            "/"
        };

        if collection.is_empty() {
            format!("{}{}{}", self.root, separator, show)
        } else {
            format!("{}{}{}/{}", self.root, separator, collection, show)
        }
    }
}

fn default_destination_root() -> String {
    "remote:".to_string()
}

fn default_collection() -> String {
    "Airing".to_string()
}

/// External programs driving the fetch and publish steps
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ToolsConfig {
    #[serde(default = "default_fetch_program")]
    pub fetch_program: PathBuf,
    #[serde(default = "default_publish_program")]
    pub publish_program: PathBuf,
    #[serde(default = "default_publish_config")]
    pub publish_config: PathBuf,
    /// Fetch exit status meaning "file already exists" (aria2c: 13)
    #[serde(default = "default_already_exists_exit_code")]
    pub already_exists_exit_code: i32,
    /// Run `mkdir` on the destination before copying
    #[serde(default)]
    pub ensure_destination: bool,
    /// Per-invocation deadline; no limit when absent
    pub timeout: Option<HumanDuration>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            fetch_program: default_fetch_program(),
            publish_program: default_publish_program(),
            publish_config: default_publish_config(),
            already_exists_exit_code: default_already_exists_exit_code(),
            ensure_destination: false,
            timeout: None,
        }
    }
}

fn default_fetch_program() -> PathBuf {
    PathBuf::from("bin/aria2c")
}

fn default_publish_program() -> PathBuf {
    PathBuf::from("bin/rclone")
}

fn default_publish_config() -> PathBuf {
    PathBuf::from("config/rclone.conf")
}

fn default_already_exists_exit_code() -> i32 {
    13
}

/// Staging area shared by fetch and publish
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkspaceConfig {
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            staging_dir: default_staging_dir(),
        }
    }
}

fn default_staging_dir() -> PathBuf {
    PathBuf::from("temp")
}

/// Release-name patterns used when a bare magnet link arrives
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NormalizerConfig {
    #[serde(default = "default_release_group_pattern")]
    pub release_group_pattern: String,
    #[serde(default = "default_suffix_pattern")]
    pub suffix_pattern: String,
    /// Must contain one capture group holding the digits
    #[serde(default = "default_resolution_pattern")]
    pub resolution_pattern: String,
    #[serde(default = "default_episode_pattern")]
    pub episode_pattern: String,
    /// Fill an empty `title`/`show` of a structured record from its link/title
    #[serde(default = "default_derive_missing_fields")]
    pub derive_missing_fields: bool,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            release_group_pattern: default_release_group_pattern(),
            suffix_pattern: default_suffix_pattern(),
            resolution_pattern: default_resolution_pattern(),
            episode_pattern: default_episode_pattern(),
            derive_missing_fields: default_derive_missing_fields(),
        }
    }
}

fn default_release_group_pattern() -> String {
    r"^\s*\[[^\]]*\]\s*".to_string()
}

fn default_suffix_pattern() -> String {
    r"\s*\(\d+p\)\s*\[[^\]]*\]\.(?i:mkv)$".to_string()
}

fn default_resolution_pattern() -> String {
    r"\((\d+)p\)".to_string()
}

fn default_episode_pattern() -> String {
    r"\s+-\s+\d+(?:\.\d+)?$".to_string()
}

fn default_derive_missing_fields() -> bool {
    true
}

/// Nack requeue decisions per failure class
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct RetryConfig {
    #[serde(default = "default_requeue_transfer_failures")]
    pub requeue_transfer_failures: bool,
    #[serde(default)]
    pub requeue_parse_failures: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            requeue_transfer_failures: default_requeue_transfer_failures(),
            requeue_parse_failures: false,
        }
    }
}

fn default_requeue_transfer_failures() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.inbound.queue, "downloads");
        assert!(config.inbound.url.is_none());
        assert_eq!(config.outbound.routing_key, "uploaded");
        assert_eq!(config.tools.already_exists_exit_code, 13);
        assert!(!config.tools.ensure_destination);
        assert_eq!(config.workspace.staging_dir, PathBuf::from("temp"));
        assert!(config.retry.requeue_transfer_failures);
        assert!(!config.retry.requeue_parse_failures);
    }

    #[test]
    fn test_destination_path_for_remote_root() {
        let destination = DestinationConfig {
            root: "gdrive:".to_string(),
            collection: "Airing".to_string(),
        };
        assert_eq!(destination.path_for("Show - 1080p"), "gdrive:Airing/Show - 1080p");
    }

    #[test]
    fn test_destination_path_for_directory_root() {
        let destination = DestinationConfig {
            root: "/srv/media".to_string(),
            collection: "/Airing/".to_string(),
        };
        assert_eq!(destination.path_for("Show - 720p"), "/srv/media/Airing/Show - 720p");

        let bare = DestinationConfig {
            root: "/srv/media/".to_string(),
            collection: String::new(),
        };
        assert_eq!(bare.path_for("Show - 720p"), "/srv/media/Show - 720p");
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
[inbound]
url = "amqp://localhost"

[tools]
timeout = "2h"
            "#,
        )
        .unwrap();

        assert_eq!(config.inbound.url.as_deref(), Some("amqp://localhost"));
        assert_eq!(config.inbound.consumer_tag, "relaybox");
        assert_eq!(
            config.tools.timeout,
            Some(HumanDuration::from_secs(2 * 3_600))
        );
        assert_eq!(config.tools.fetch_program, PathBuf::from("bin/aria2c"));
    }
}
