pub mod deployments;
pub mod orchestrator;

use crate::{build, conf, object_store, repo, storage};
use anyhow::{anyhow, Context, Result};
use dropshot::{ApiDescription, ConfigDropshot, ConfigLogging, ConfigLoggingLevel, ServerBuilder};
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::info;

pub fn epoch_milli() -> u64 {
    let current_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis();

    u64::try_from(current_epoch).unwrap()
}

/// Logs the underlying error server-side and hands the caller an opaque
/// internal error carrying the request id so the two can be correlated.
#[macro_export]
macro_rules! http_error {
    ($message:expr, $request_id:expr, $err:expr) => {{
        tracing::error!(message = $message, request_id = %$request_id, error = ?$err);
        dropshot::HttpError::for_internal_error(format!(
            "{}; request_id: {}",
            $message, $request_id
        ))
    }};
}

/// Everything the request handlers and deployment tasks need, wired up once
/// at startup. The fetcher, object store, and build service sit behind
/// traits so tests can swap in fakes.
pub struct ApiState {
    /// Various configurations needed by the api.
    pub config: conf::Config,

    /// The status ledger. Shipwright records every deployment lifecycle
    /// transition here for callers to poll.
    pub storage: storage::Db,

    /// Durable storage for staged source archives.
    pub object_store: Arc<dyn object_store::ObjectStore>,

    /// The remote service that turns staged archives into container images.
    pub build_service: Arc<dyn build::BuildService>,

    /// The mechanism used to materialize source repositories locally.
    pub fetcher: Arc<dyn repo::RepoFetcher>,
}

pub struct Api;

impl Api {
    /// Create a new instance of the API with all services started.
    pub async fn start(config: conf::Config) -> Result<()> {
        let storage = storage::Db::new(&config.server.storage_path)
            .await
            .context("could not open status ledger")?;

        let bucket = config.storage_bucket();
        let object_store = object_store::new(&config.object_store, &bucket)
            .await
            .context("could not init object store")?;

        let build_service = build::init_build_service(&config.build, &config.registry)
            .context("could not init build service")?;

        let api_state = Arc::new(ApiState {
            config: config.clone(),
            storage,
            object_store,
            build_service,
            fetcher: Arc::new(repo::GitFetcher::default()),
        });

        start_web_service(config, api_state).await
    }
}

pub async fn start_web_service(conf: conf::Config, api_state: Arc<ApiState>) -> Result<()> {
    let bind_address = SocketAddr::from_str(&conf.server.bind_address).with_context(|| {
        format!(
            "Could not parse url '{}' while trying to bind binary to port; \
    should be in format '<ip>:<port>'; Please be sure to use an ip instead of something like 'localhost', \
    when attempting to bind",
            &conf.server.bind_address
        )
    })?;

    let dropshot_conf = ConfigDropshot {
        bind_address,
        ..Default::default()
    };

    let mut api = ApiDescription::new();

    api.register(deployments::submit_deployment)
        .map_err(|e| anyhow!("failed to register endpoint: {}", e))?;
    api.register(deployments::get_deployment)
        .map_err(|e| anyhow!("failed to register endpoint: {}", e))?;
    api.register(deployments::list_deployments)
        .map_err(|e| anyhow!("failed to register endpoint: {}", e))?;

    // Application logging goes through tracing; dropshot's own logger only
    // gets to report server-level errors.
    let log = ConfigLogging::StderrTerminal {
        level: ConfigLoggingLevel::Error,
    }
    .to_logger("shipwright")
    .context("could not build server logger")?;

    let server = ServerBuilder::new(api, api_state, log)
        .config(dropshot_conf)
        .start()
        .map_err(|error| anyhow!("failed to create server: {}", error))?;

    info!(
        message = "Started shipwright http service",
        host = %bind_address.ip(),
        port = %bind_address.port(),
    );

    server
        .await
        .map_err(|error| anyhow!("Server encountered errors while running; {:#?}", error))
}
