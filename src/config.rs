use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::adapters::command::{parse_size, AnnexFilter, SshSettings};

/// Name of the configuration file, both globally and at a repository root
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Environment variable that overrides the configuration directory
pub const CONFIG_DIR_ENV: &str = "GIN_CONFIG_DIR";

const KNOWN_HOSTS_FILE: &str = "known_hosts";

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(default)]
pub struct Config {
    pub bin: BinConfig,
    pub annex: AnnexConfig,
    pub servers: BTreeMap<String, ServerConfig>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(default)]
pub struct BinConfig {
    pub git: PathBuf,
    pub git_annex: PathBuf,
    pub ssh: PathBuf,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(default)]
pub struct AnnexConfig {
    /// Files at or above this size go to the annex
    pub min_size: String,
    /// Glob patterns that are always kept in git
    pub exclude: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct ServerConfig {
    pub git: GitServerConfig,
    pub web: WebServerConfig,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct GitServerConfig {
    pub user: String,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub host_key: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct WebServerConfig {
    pub protocol: String,
    pub host: String,
    pub port: u16,
}

/// Repository-local overrides; only the annex section is honoured.
#[derive(Debug, Default, Deserialize)]
struct RepoConfig {
    annex: Option<RepoAnnexConfig>,
}

#[derive(Debug, Default, Deserialize)]
struct RepoAnnexConfig {
    min_size: Option<String>,
    exclude: Option<Vec<String>>,
}

impl Default for Config {
    fn default() -> Self {
        let mut servers = BTreeMap::new();
        servers.insert("gin".to_string(), ServerConfig::gin());
        Self {
            bin: BinConfig::default(),
            annex: AnnexConfig::default(),
            servers,
        }
    }
}

impl Default for BinConfig {
    fn default() -> Self {
        Self {
            git: PathBuf::from("git"),
            git_annex: PathBuf::from("git-annex"),
            ssh: PathBuf::from("ssh"),
        }
    }
}

impl Default for AnnexConfig {
    fn default() -> Self {
        Self {
            min_size: "10M".to_string(),
            exclude: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// The public G-Node server, always available unless overridden by name.
    pub fn gin() -> Self {
        Self {
            git: GitServerConfig {
                user: "git".to_string(),
                host: "gin.g-node.org".to_string(),
                port: 22,
                host_key: "gin.g-node.org,141.84.41.216 ecdsa-sha2-nistp256 AAAAE2VjZHNhLXNoYTItbmlzdHAyNTYAAAAIbmlzdHAyNTYAAABBBE5IBgKP3nUryEFaACwY4N3jlqDx8Qw1xAxU2Xpt5V0p9RNefNnedVmnIBV6lA3n+9kT1OSbyqA/+SgsQ57nHo0=".to_string(),
            },
            web: WebServerConfig {
                protocol: "https".to_string(),
                host: "web.gin.g-node.org".to_string(),
                port: 443,
            },
        }
    }
}

impl GitServerConfig {
    /// `ssh://user@host:port`
    pub fn address(&self) -> String {
        format!("ssh://{}@{}:{}", self.user, self.host, self.port)
    }
}

impl WebServerConfig {
    pub fn address(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.host, self.port)
    }
}

/// Directory holding the global configuration, keys and known hosts.
pub fn config_dir() -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os(CONFIG_DIR_ENV).filter(|d| !d.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    let proj_dirs = ProjectDirs::from("org", "g-node", "gin")
        .context("Failed to determine project directories")?;
    Ok(proj_dirs.config_dir().to_path_buf())
}

pub fn get_default_config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Expands a leading `~/` to the home directory.
fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}

impl Config {
    /// Loads the global file, falling back to defaults when it does not exist.
    pub fn load(config_path: Option<PathBuf>) -> Result<Self> {
        let path = match config_path {
            Some(p) => p,
            None => get_default_config_path()?,
        };

        if !path.exists() {
            debug!("No config file at {}, using defaults", path.display());
            return Ok(Config::default());
        }

        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        debug!("Loaded config file {}", path.display());

        // User entries override the built-in server by alias, never remove it
        config
            .servers
            .entry("gin".to_string())
            .or_insert_with(ServerConfig::gin);
        config.bin.git = expand_home(&config.bin.git);
        config.bin.git_annex = expand_home(&config.bin.git_annex);
        config.bin.ssh = expand_home(&config.bin.ssh);
        Ok(config)
    }

    /// Merges the annex section of `<repo_root>/config.toml` over this configuration.
    pub fn merge_repo_config(&mut self, repo_root: &Path) -> Result<()> {
        let path = repo_root.join(CONFIG_FILE_NAME);
        if !path.is_file() {
            return Ok(());
        }
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let repo: RepoConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        debug!("Merging repository config {}", path.display());
        if let Some(annex) = repo.annex {
            if let Some(min_size) = annex.min_size {
                self.annex.min_size = min_size;
            }
            if let Some(exclude) = annex.exclude {
                self.annex.exclude = exclude;
            }
        }
        Ok(())
    }

    /// Content filter built from the annex section.
    pub fn annex_filter(&self) -> Result<AnnexFilter> {
        let min_size = if self.annex.min_size.trim().is_empty() {
            0
        } else {
            parse_size(&self.annex.min_size).with_context(|| {
                format!("Invalid annex.min_size value '{}'", self.annex.min_size)
            })?
        };
        Ok(AnnexFilter::new(min_size, self.annex.exclude.clone()))
    }

    /// SSH identity settings: one `<alias>.key` per configured server found in
    /// `dir`, plus the managed known hosts file when present.
    pub fn ssh_settings(&self, dir: &Path) -> SshSettings {
        let keys = self
            .servers
            .keys()
            .map(|alias| dir.join(format!("{alias}.key")))
            .filter(|path| path.is_file())
            .collect();
        let known_hosts = dir.join(KNOWN_HOSTS_FILE);
        let known_hosts = if known_hosts.is_file() {
            Some(known_hosts)
        } else {
            warn!("No known hosts file in {}", dir.display());
            None
        };
        SshSettings {
            ssh_bin: self.bin.ssh.clone(),
            keys,
            known_hosts,
        }
    }

    pub fn server(&self, alias: &str) -> Option<&ServerConfig> {
        self.servers.get(alias)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.bin.git, PathBuf::from("git"));
        assert_eq!(config.bin.git_annex, PathBuf::from("git-annex"));
        assert_eq!(config.annex.min_size, "10M");
        assert!(config.annex.exclude.is_empty());
        assert!(config.servers.contains_key("gin"));
    }

    #[test]
    fn test_config_load_nonexistent_is_default_and_not_created() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let config_path = temp_dir.path().join("nonexistent.toml");

        let config = Config::load(Some(config_path.clone()))?;
        assert_eq!(config, Config::default());
        assert!(!config_path.exists());
        Ok(())
    }

    #[test]
    fn test_config_partial_file_keeps_defaults() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let config_path = temp_dir.path().join(CONFIG_FILE_NAME);
        fs::write(
            &config_path,
            r#"
[annex]
min_size = "50MiB"
exclude = ["*.md", "*.py"]

[servers.lab.git]
user = "git"
host = "git.lab.example"
port = 2222

[servers.lab.web]
protocol = "http"
host = "lab.example"
port = 3000
"#,
        )?;

        let config = Config::load(Some(config_path))?;
        assert_eq!(config.bin.git, PathBuf::from("git"));
        assert_eq!(config.annex.min_size, "50MiB");
        assert_eq!(config.annex.exclude, vec!["*.md", "*.py"]);
        assert!(config.servers.contains_key("gin"));
        let lab = config.server("lab").map(|s| s.git.address());
        assert_eq!(lab.as_deref(), Some("ssh://git@git.lab.example:2222"));
        Ok(())
    }

    #[test]
    fn test_repo_config_overrides_annex_only() -> Result<()> {
        let repo = TempDir::new()?;
        fs::write(
            repo.path().join(CONFIG_FILE_NAME),
            "[annex]\nmin_size = \"1k\"\n",
        )?;

        let mut config = Config::default();
        config.annex.exclude.push("*.txt".to_string());
        config.merge_repo_config(repo.path())?;
        assert_eq!(config.annex.min_size, "1k");
        assert_eq!(config.annex.exclude, vec!["*.txt"]);

        let filter = config.annex_filter()?;
        assert_eq!(filter.min_size(), 1000);
        Ok(())
    }

    #[test]
    fn test_ssh_settings_pick_up_server_keys() -> Result<()> {
        let dir = TempDir::new()?;
        fs::write(dir.path().join("gin.key"), "key")?;
        fs::write(dir.path().join("known_hosts"), "hosts")?;

        let settings = Config::default().ssh_settings(dir.path());
        assert_eq!(settings.keys, vec![dir.path().join("gin.key")]);
        assert_eq!(settings.known_hosts, Some(dir.path().join("known_hosts")));
        Ok(())
    }

    #[test]
    fn test_expand_home_leaves_plain_paths() {
        assert_eq!(expand_home(Path::new("git")), PathBuf::from("git"));
        assert_eq!(
            expand_home(Path::new("/usr/bin/git")),
            PathBuf::from("/usr/bin/git")
        );
    }
}
