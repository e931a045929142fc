use crate::api::{
    deployments::{Deployment, Status},
    epoch_milli, ApiState,
};
use crate::build::{BuildError, BuildState, BuildStep, SubmitBuildRequest};
use crate::object_store::ObjectStoreError;
use crate::repo::FetchError;
use crate::{archive, build, repo, storage};
use bytes::Bytes;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// The file the fetched repository must carry at its root for the default
/// docker build steps to work at all.
pub const BUILD_DESCRIPTOR: &str = "Dockerfile";

#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("No Dockerfile found")]
    MissingBuildDescriptor,

    #[error("could not fetch repository; {0}")]
    Fetch(#[from] FetchError),

    #[error("could not archive repository; {0}")]
    Archive(#[from] std::io::Error),

    #[error("could not stage source archive; {0}")]
    Stage(#[from] ObjectStoreError),

    #[error("could not submit remote build; {0}")]
    Submit(#[source] BuildError),

    #[error("lost track of remote build '{build_id}'; {source}")]
    AwaitBuild { build_id: String, source: BuildError },
}

/// Where a deployment's source archive lives in the bucket while the remote
/// build pulls it.
pub fn staged_object_key(request_id: &str) -> String {
    format!("source/{}.tar.gz", request_id)
}

/// What a remote build run ended with.
struct BuildOutcome {
    build_id: String,
    state: BuildState,
    image_tag: String,
}

/// Runs a single accepted deployment through fetch, archive, stage, submit,
/// and wait, recording lifecycle transitions in the ledger as it goes. One
/// deployer per request; it owns its scratch space and cleans it up when the
/// run ends either way.
pub struct Deployer {
    api_state: Arc<ApiState>,
    deployment: Deployment,
    steps_override: Option<Vec<BuildStep>>,
    workdir: PathBuf,
    archive_path: PathBuf,
}

impl Deployer {
    pub fn new(
        api_state: Arc<ApiState>,
        deployment: Deployment,
        steps_override: Option<Vec<BuildStep>>,
    ) -> Self {
        let build_dir = Path::new(&api_state.config.server.build_dir).to_path_buf();
        let workdir = build_dir.join(&deployment.request_id);
        let archive_path = build_dir.join(format!("{}.tar.gz", deployment.request_id));

        Deployer {
            api_state,
            deployment,
            steps_override,
            workdir,
            archive_path,
        }
    }

    /// Drive the deployment to a terminal status. Never returns an error;
    /// every failure is recorded in the ledger instead so the caller's poll
    /// loop sees it.
    pub async fn run(self) {
        info!(
            request_id = %self.deployment.request_id,
            source_url = %self.deployment.source_url,
            "Starting deployment"
        );

        self.record(Status::InProgress, HashMap::new()).await;

        let result = self.execute().await;

        self.cleanup_local().await;

        match result {
            Ok(outcome) => match outcome.state {
                BuildState::Success => {
                    info!(
                        request_id = %self.deployment.request_id,
                        build_id = %outcome.build_id,
                        image_tag = %outcome.image_tag,
                        "Deployment succeeded"
                    );

                    self.record(
                        Status::Success,
                        HashMap::from([
                            ("build_id".to_string(), outcome.build_id),
                            ("image_tag".to_string(), outcome.image_tag),
                        ]),
                    )
                    .await;
                }
                state => {
                    warn!(
                        request_id = %self.deployment.request_id,
                        build_id = %outcome.build_id,
                        build_state = %state,
                        "Remote build did not succeed"
                    );

                    self.record(
                        Status::Failure,
                        HashMap::from([
                            ("build_id".to_string(), outcome.build_id),
                            (
                                "error".to_string(),
                                format!("remote build finished with status {}", state),
                            ),
                        ]),
                    )
                    .await;
                }
            },
            Err(e) => {
                error!(
                    request_id = %self.deployment.request_id,
                    error = %e,
                    "Deployment failed"
                );

                self.record(
                    Status::Failure,
                    HashMap::from([("error".to_string(), e.to_string())]),
                )
                .await;
            }
        }
    }

    async fn execute(&self) -> Result<BuildOutcome, DeployError> {
        let request_id = &self.deployment.request_id;

        tokio::fs::create_dir_all(&self.api_state.config.server.build_dir).await?;

        self.api_state
            .fetcher
            .fetch(&self.deployment.source_url, &self.workdir)
            .await?;

        if !self.workdir.join(BUILD_DESCRIPTOR).is_file() {
            return Err(DeployError::MissingBuildDescriptor);
        }

        archive::archive(&self.workdir, &self.archive_path).await?;

        let contents = tokio::fs::read(&self.archive_path).await?;
        let object_key = staged_object_key(request_id);

        self.api_state
            .object_store
            .put(&object_key, Bytes::from(contents), true)
            .await?;

        let repo_base = repo::repo_base_name(&self.deployment.source_url);
        let image_tag = build::image_tag(&self.api_state.config.registry, &repo_base, request_id);

        let steps = self
            .steps_override
            .clone()
            .unwrap_or_else(|| build::default_build_steps(&image_tag));

        let submitted = self
            .api_state
            .build_service
            .submit(SubmitBuildRequest {
                bucket: self.api_state.config.storage_bucket(),
                object: object_key.clone(),
                steps,
                images: vec![image_tag.clone()],
            })
            .await
            .map_err(DeployError::Submit)?;

        let mut metadata = HashMap::from([("build_id".to_string(), submitted.build_id.clone())]);
        if let Some(log_url) = &submitted.log_url {
            metadata.insert("log_url".to_string(), log_url.clone());
        }
        self.record(Status::InProgress, metadata).await;

        let state = self
            .api_state
            .build_service
            .wait_for_completion(&submitted.build_id)
            .await
            .map_err(|source| DeployError::AwaitBuild {
                build_id: submitted.build_id.clone(),
                source,
            })?;

        // The staged archive has served its purpose once the remote build is
        // terminal. Losing this delete costs bucket space, not correctness.
        if let Err(e) = self.api_state.object_store.delete(&object_key).await {
            warn!(
                request_id = %request_id,
                object_key = %object_key,
                error = %e,
                "Could not remove staged source archive"
            );
        }

        Ok(BuildOutcome {
            build_id: submitted.build_id,
            state,
            image_tag,
        })
    }

    /// Best-effort ledger write. Re-reads the row first so a status that
    /// already went terminal stays put; failures are logged and swallowed
    /// since the pipeline outcome itself does not depend on the ledger.
    async fn record(&self, status: Status, metadata_updates: HashMap<String, String>) {
        if let Err(e) = self.try_record(status, metadata_updates).await {
            error!(
                request_id = %self.deployment.request_id,
                error = %e,
                "Could not record deployment status"
            );
        }
    }

    async fn try_record(
        &self,
        status: Status,
        metadata_updates: HashMap<String, String>,
    ) -> anyhow::Result<()> {
        let mut conn = self.api_state.storage.conn().await?;

        let current: Deployment =
            storage::deployments::get(&mut conn, &self.deployment.request_id)
                .await?
                .try_into()?;

        if current.status.is_terminal() {
            debug!(
                request_id = %self.deployment.request_id,
                status = %current.status,
                "Skipping status update; deployment already terminal"
            );
            return Ok(());
        }

        let mut metadata = current.metadata;
        metadata.extend(metadata_updates);

        storage::deployments::update(
            &mut conn,
            &self.deployment.request_id,
            storage::deployments::UpdatableFields {
                status: Some(status.to_string()),
                metadata: Some(serde_json::to_string(&metadata)?),
                modified: Some(epoch_milli().to_string()),
            },
        )
        .await?;

        Ok(())
    }

    /// Scratch space removal; runs whether the pipeline succeeded or not.
    async fn cleanup_local(&self) {
        if let Err(e) = tokio::fs::remove_dir_all(&self.workdir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(
                    request_id = %self.deployment.request_id,
                    error = %e,
                    "Could not remove deployment working directory"
                );
            }
        }

        if let Err(e) = tokio::fs::remove_file(&self.archive_path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(
                    request_id = %self.deployment.request_id,
                    error = %e,
                    "Could not remove deployment archive"
                );
            }
        }
    }
}
