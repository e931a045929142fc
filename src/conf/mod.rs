use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Configuration file looked up when the user does not pass one explicitly.
const DEFAULT_CONFIG_PATH: &str = "/etc/shipwright/shipwright.toml";

/// Process-wide settings, resolved once at startup and immutable afterwards.
/// Resolution order: compiled-in defaults, then the TOML file, then
/// `SHIPWRIGHT_`-prefixed environment variables (`__` separates nesting, so
/// `SHIPWRIGHT_REGISTRY__PROJECT` sets `registry.project`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub general: General,
    pub server: Server,
    pub registry: Registry,
    pub object_store: ObjectStore,
    pub build: Build,
}

impl Config {
    /// The staging bucket, falling back to the provider's conventional
    /// `{project}_cloudbuild` bucket when none is configured.
    pub fn storage_bucket(&self) -> String {
        if self.object_store.bucket.is_empty() {
            format!("{}_cloudbuild", self.registry.project)
        } else {
            self.object_store.bucket.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct General {
    pub log_level: String,

    /// Emit logs as structured json instead of human readable lines.
    pub log_json: bool,
}

impl Default for General {
    fn default() -> Self {
        General {
            log_level: "info".into(),
            log_json: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    pub bind_address: String,

    /// Location of the sqlite status ledger.
    pub storage_path: String,

    /// Scratch space for per-request working directories and archives.
    pub build_dir: String,
}

impl Default for Server {
    fn default() -> Self {
        Server {
            bind_address: "127.0.0.1:8080".into(),
            storage_path: "/tmp/shipwright.db".into(),
            build_dir: "/tmp/shipwright_builds".into(),
        }
    }
}

/// Where built images land. These have no sensible defaults; every
/// deployment of shipwright must set them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registry {
    pub project: String,
    pub region: String,
    pub repository: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectStore {
    pub engine: crate::object_store::Engine,

    /// Bucket for staged source archives; empty means derive it from the
    /// registry project.
    pub bucket: String,

    pub filesystem: Option<FilesystemObjectStore>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilesystemObjectStore {
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Build {
    pub engine: crate::build::Engine,
    pub cloud_build: Option<CloudBuild>,
}

impl Default for Build {
    fn default() -> Self {
        Build {
            engine: crate::build::Engine::default(),
            cloud_build: Some(CloudBuild::default()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudBuild {
    pub api_endpoint: String,

    /// Bearer token presented to the build service. Empty means the request
    /// goes out unauthenticated; sourcing real credentials is left to the
    /// environment this runs in.
    pub auth_token: String,

    /// Seconds between polls while waiting on a remote build.
    pub poll_interval: u64,
}

impl Default for CloudBuild {
    fn default() -> Self {
        CloudBuild {
            api_endpoint: "https://cloudbuild.googleapis.com".into(),
            auth_token: String::new(),
            poll_interval: 5,
        }
    }
}

/// Returns a fully resolved config from defaults, the configuration file, and
/// the environment. A missing file is fine; missing env vars are fine; the
/// defaults always apply underneath.
pub fn load(path_override: &Option<String>) -> Result<Config, figment::Error> {
    let path = path_override
        .clone()
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    Figment::from(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("SHIPWRIGHT_").split("__"))
        .extract()
}
