pub mod cloud_build;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::{fmt::Debug, sync::Arc};
use strum::{Display, EnumString};

/// Host component of artifact registry image paths.
pub const REGISTRY_HOST: &str = "docker.pkg.dev";

/// Builder image used for the default docker build/push step pair.
pub const DOCKER_BUILDER_IMAGE: &str = "gcr.io/cloud-builders/docker";

/// Represents different build service failure possibilities.
#[derive(thiserror::Error, Debug)]
pub enum BuildError {
    /// Failed to start due to misconfigured settings, usually from a misconfigured settings file.
    #[error("could not init build service; {0}")]
    FailedPrecondition(String),

    /// Failed to communicate with the build service due to network error or other.
    #[error("could not connect to build service; {0}")]
    Connection(String),

    /// The build service accepted the connection but refused the request.
    #[error("build service rejected request; {0}")]
    Rejected(String),

    /// An unexpected and unknown error has occurred.
    #[error("unexpected build service error occurred; {0}")]
    Unknown(String),
}

/// A single remote build step. The contents are passed through to the build
/// service untouched; shipwright never interprets them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct BuildStep {
    /// The builder image that runs this step.
    pub name: String,

    /// Arguments handed to the builder image.
    pub args: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SubmitBuildRequest {
    /// Bucket holding the staged source archive.
    pub bucket: String,

    /// Object path of the staged source archive within the bucket.
    pub object: String,

    /// Ordered, opaque step sequence the remote build executes.
    pub steps: Vec<BuildStep>,

    /// Images the build is expected to produce.
    pub images: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SubmittedBuild {
    /// The build service's identifier for the submitted build.
    pub build_id: String,

    /// Where a human can read the remote build logs, if the service told us.
    pub log_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[strum(ascii_case_insensitive)]
pub enum BuildState {
    /// The build service has not told us anything useful yet.
    #[default]
    Unknown,

    Pending,

    Queued,

    Working,

    Success,

    Failure,

    InternalError,

    Timeout,

    Cancelled,

    Expired,
}

impl BuildState {
    /// True once the remote build can no longer change state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BuildState::Success
                | BuildState::Failure
                | BuildState::InternalError
                | BuildState::Timeout
                | BuildState::Cancelled
                | BuildState::Expired
        )
    }
}

/// The interface between shipwright and a remote container build service.
#[async_trait]
pub trait BuildService: Debug + Send + Sync + 'static {
    /// Submit a build specification referencing a staged source archive.
    async fn submit(&self, req: SubmitBuildRequest) -> Result<SubmittedBuild, BuildError>;

    /// Block until the remote build reaches a terminal state and report it.
    /// Deliberately blocking so the caller can reclaim the staged archive
    /// immediately afterwards instead of needing a separate watcher.
    async fn wait_for_completion(&self, build_id: &str) -> Result<BuildState, BuildError>;
}

/// The fully qualified image tag a deployment request publishes to:
/// `{region}-docker.pkg.dev/{project}/{repository}/{repo_base}:{request_id}`.
pub fn image_tag(registry: &crate::conf::Registry, repo_base: &str, request_id: &str) -> String {
    format!(
        "{}-{}/{}/{}/{}:{}",
        registry.region, REGISTRY_HOST, registry.project, registry.repository, repo_base, request_id
    )
}

/// The step pair used when the caller does not supply their own:
/// `docker build -t {image_tag} .` followed by `docker push {image_tag}`.
pub fn default_build_steps(image_tag: &str) -> Vec<BuildStep> {
    vec![
        BuildStep {
            name: DOCKER_BUILDER_IMAGE.into(),
            args: vec![
                "build".into(),
                "-t".into(),
                image_tag.into(),
                ".".into(),
            ],
        },
        BuildStep {
            name: DOCKER_BUILDER_IMAGE.into(),
            args: vec!["push".into(), image_tag.into()],
        },
    ]
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")] // This handles case insensitivity during deserialization
pub enum Engine {
    #[default]
    CloudBuild,
}

pub fn init_build_service(
    config: &crate::conf::Build,
    registry: &crate::conf::Registry,
) -> Result<Arc<dyn BuildService>, BuildError> {
    #[allow(clippy::match_single_binding)]
    match config.engine {
        Engine::CloudBuild => {
            let Some(config) = &config.cloud_build else {
                return Err(BuildError::FailedPrecondition(
                    "cloud build engine settings not found in config".into(),
                ));
            };

            let engine = cloud_build::Engine::new(config, &registry.project)?;
            Ok(Arc::new(engine))
        }
    }
}
