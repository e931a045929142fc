use crate::api::{epoch_milli, orchestrator, ApiState};
use crate::{build::BuildStep, http_error, storage};
use anyhow::{Context, Result};
use dropshot::{
    endpoint, HttpError, HttpResponseCreated, HttpResponseOk, Path, RequestContext, TypedBody,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

/// Used when the caller does not name the workflow a deployment belongs to.
pub const DEFAULT_WORKFLOW_NAME: &str = "unnamed";

/// Used when the caller does not identify themselves.
pub const DEFAULT_USER_ID: &str = "anonymous";

#[derive(
    Debug,
    Clone,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    JsonSchema,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[schemars(rename = "deployment_status")]
pub enum Status {
    /// The deployment has been accepted but work on it has not started yet.
    #[default]
    Pending,

    /// The deployment pipeline is running.
    InProgress,

    /// The remote build finished and the image was published.
    Success,

    /// The pipeline stopped; the `error` metadata key carries the reason.
    Failure,
}

impl Status {
    /// Terminal statuses never change again, no matter what the pipeline
    /// reports afterwards.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Success | Status::Failure)
    }
}

/// A single tracked run of the deploy pipeline for one source repository.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Deployment {
    /// Unique identifier for this deployment; callers use it to poll status.
    pub request_id: String,

    /// The repository URL the deployment was requested for.
    pub source_url: String,

    /// Human-readable workflow grouping for the deployment.
    pub workflow_name: String,

    /// Who requested the deployment.
    pub user_id: String,

    /// Where the deployment currently is in its lifecycle.
    pub status: Status,

    /// Freeform facts recorded as the pipeline progresses (build id, log
    /// url, image tag, error reason).
    pub metadata: HashMap<String, String>,

    /// Time the deployment was accepted, in epoch milliseconds.
    pub started: u64,

    /// Time the deployment record last changed, in epoch milliseconds.
    pub modified: u64,
}

impl Deployment {
    pub fn new(source_url: &str, workflow_name: &str, user_id: &str) -> Self {
        Deployment {
            request_id: Uuid::now_v7().simple().to_string(),
            source_url: source_url.into(),
            workflow_name: workflow_name.into(),
            user_id: user_id.into(),
            status: Status::Pending,
            metadata: HashMap::new(),
            started: epoch_milli(),
            modified: epoch_milli(),
        }
    }
}

impl TryFrom<storage::deployments::Deployment> for Deployment {
    type Error = anyhow::Error;

    fn try_from(value: storage::deployments::Deployment) -> Result<Self> {
        let started = value.started.parse::<u64>().with_context(|| {
            format!(
                "Could not parse field 'started' from storage value '{}'",
                value.started
            )
        })?;

        let modified = value.modified.parse::<u64>().with_context(|| {
            format!(
                "Could not parse field 'modified' from storage value '{}'",
                value.modified
            )
        })?;

        let status = Status::from_str(&value.status).with_context(|| {
            format!(
                "Could not parse field 'status' from storage value '{}'",
                value.status
            )
        })?;

        let metadata = serde_json::from_str(&value.metadata).with_context(|| {
            format!(
                "Could not parse field 'metadata' from storage value '{}'",
                value.metadata
            )
        })?;

        Ok(Deployment {
            request_id: value.request_id,
            source_url: value.source_url,
            workflow_name: value.workflow_name,
            user_id: value.user_id,
            status,
            metadata,
            started,
            modified,
        })
    }
}

impl TryFrom<Deployment> for storage::deployments::Deployment {
    type Error = anyhow::Error;

    fn try_from(value: Deployment) -> Result<Self> {
        let metadata = serde_json::to_string(&value.metadata).with_context(|| {
            format!(
                "Could not serialize field 'metadata' for deployment '{}'",
                value.request_id
            )
        })?;

        Ok(Self {
            request_id: value.request_id,
            source_url: value.source_url,
            workflow_name: value.workflow_name,
            user_id: value.user_id,
            status: value.status.to_string(),
            metadata,
            started: value.started.to_string(),
            modified: value.modified.to_string(),
        })
    }
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SubmitDeploymentRequest {
    /// The git URL of the repository to deploy. Required.
    pub source_url: String,

    /// Optional workflow grouping; defaults to "unnamed".
    pub workflow_name: Option<String>,

    /// Optional requesting user; defaults to "anonymous".
    pub user_id: Option<String>,

    /// Optional replacement for the default build-and-push steps.
    pub build_steps: Option<Vec<BuildStep>>,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct SubmitDeploymentResponse {
    /// The freshly accepted deployment, in PENDING status.
    pub deployment: Deployment,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct DeploymentPathArgs {
    /// The unique identifier for the target deployment.
    pub request_id: String,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct GetDeploymentResponse {
    /// The target deployment.
    pub deployment: Deployment,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ListDeploymentsResponse {
    /// All tracked deployments.
    pub deployments: Vec<Deployment>,
}

/// Accept a new deployment.
///
/// Records the request as PENDING and runs the deploy pipeline in the
/// background; the response returns immediately with the request id the
/// caller polls for status.
#[endpoint(
    method = POST,
    path = "/api/deployments",
)]
pub async fn submit_deployment(
    rqctx: RequestContext<Arc<ApiState>>,
    body: TypedBody<SubmitDeploymentRequest>,
) -> Result<HttpResponseCreated<SubmitDeploymentResponse>, HttpError> {
    let api_state = rqctx.context();
    let body = body.into_inner();

    if let Err(e) = reqwest::Url::parse(&body.source_url) {
        return Err(HttpError::for_bad_request(
            None,
            format!("'{}' is not a valid repository url; {}", body.source_url, e),
        ));
    }

    let deployment = Deployment::new(
        &body.source_url,
        body.workflow_name.as_deref().unwrap_or(DEFAULT_WORKFLOW_NAME),
        body.user_id.as_deref().unwrap_or(DEFAULT_USER_ID),
    );

    let storage_deployment = match deployment.clone().try_into() {
        Ok(deployment) => deployment,
        Err(e) => {
            return Err(http_error!(
                "Could not serialize deployment for storage",
                rqctx.request_id.clone(),
                e
            ));
        }
    };

    let mut conn = match api_state.storage.conn().await {
        Ok(conn) => conn,
        Err(e) => {
            return Err(http_error!(
                "Could not open connection to database",
                rqctx.request_id.clone(),
                e
            ));
        }
    };

    if let Err(e) = storage::deployments::insert(&mut conn, &storage_deployment).await {
        return Err(http_error!(
            "Could not insert deployment into database",
            rqctx.request_id.clone(),
            e
        ));
    }

    let deployer = orchestrator::Deployer::new(
        api_state.clone(),
        deployment.clone(),
        body.build_steps,
    );

    tokio::spawn(deployer.run());

    Ok(HttpResponseCreated(SubmitDeploymentResponse { deployment }))
}

/// Get the current state of a single deployment.
#[endpoint(
    method = GET,
    path = "/api/deployments/{request_id}",
)]
pub async fn get_deployment(
    rqctx: RequestContext<Arc<ApiState>>,
    path_params: Path<DeploymentPathArgs>,
) -> Result<HttpResponseOk<GetDeploymentResponse>, HttpError> {
    let api_state = rqctx.context();
    let path = path_params.into_inner();

    let mut conn = match api_state.storage.conn().await {
        Ok(conn) => conn,
        Err(e) => {
            return Err(http_error!(
                "Could not open connection to database",
                rqctx.request_id.clone(),
                e
            ));
        }
    };

    let storage_deployment = match storage::deployments::get(&mut conn, &path.request_id).await {
        Ok(deployment) => deployment,
        Err(e) => match e {
            storage::StorageError::NotFound => {
                return Err(HttpError::for_not_found(
                    None,
                    format!("deployment '{}' does not exist", path.request_id),
                ));
            }
            _ => {
                return Err(http_error!(
                    "Could not get deployment from database",
                    rqctx.request_id.clone(),
                    e
                ));
            }
        },
    };

    let deployment = match Deployment::try_from(storage_deployment) {
        Ok(deployment) => deployment,
        Err(e) => {
            return Err(http_error!(
                "Could not parse deployment from database",
                rqctx.request_id.clone(),
                e
            ));
        }
    };

    Ok(HttpResponseOk(GetDeploymentResponse { deployment }))
}

/// List all tracked deployments.
#[endpoint(
    method = GET,
    path = "/api/deployments",
)]
pub async fn list_deployments(
    rqctx: RequestContext<Arc<ApiState>>,
) -> Result<HttpResponseOk<ListDeploymentsResponse>, HttpError> {
    let api_state = rqctx.context();

    let mut conn = match api_state.storage.conn().await {
        Ok(conn) => conn,
        Err(e) => {
            return Err(http_error!(
                "Could not open connection to database",
                rqctx.request_id.clone(),
                e
            ));
        }
    };

    let storage_deployments = match storage::deployments::list(&mut conn, 0, 0).await {
        Ok(deployments) => deployments,
        Err(e) => {
            return Err(http_error!(
                "Could not list deployments from database",
                rqctx.request_id.clone(),
                e
            ));
        }
    };

    let mut deployments = Vec::with_capacity(storage_deployments.len());
    for storage_deployment in storage_deployments {
        let deployment = match Deployment::try_from(storage_deployment) {
            Ok(deployment) => deployment,
            Err(e) => {
                return Err(http_error!(
                    "Could not parse deployment from database",
                    rqctx.request_id.clone(),
                    e
                ));
            }
        };

        deployments.push(deployment);
    }

    Ok(HttpResponseOk(ListDeploymentsResponse { deployments }))
}
