use std::process::ExitCode;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use git_deployer::config::{DeployConfig, DeployRequest};
use git_deployer::deploy::{DeployPorts, Deployer};
use git_deployer::git::{CliWorkspaceFactory, DEFAULT_GIT_TIMEOUT};
use git_deployer::hydrate::HydrateCli;
use git_deployer::provider::HostedProviderFactory;
use git_deployer::report::{LocalResultStore, build_commit};
use git_deployer::secrets::FileSecretSource;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "git_deployer=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let (config, request) = match DeployConfig::from_env().and_then(|config| {
        DeployRequest::from_env().map(|request| (config, request))
    }) {
        Ok(loaded) => loaded,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            return ExitCode::from(2);
        }
    };

    tracing::info!(
        commit = build_commit(),
        rollout = %request.rollout,
        source = %config.source_repo,
        output = %config.output_repo,
        "starting deploy"
    );

    let ports = DeployPorts {
        secrets: FileSecretSource::new(&config.secrets_dir),
        workspaces: CliWorkspaceFactory {
            workdir: config.workdir.clone(),
            timeout: DEFAULT_GIT_TIMEOUT,
        },
        renderer: HydrateCli::new(&config.hydrate_bin),
        providers: HostedProviderFactory::default(),
        results: LocalResultStore::new(&config.results_dir),
    };

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling deploy");
            on_signal.cancel();
        }
    });

    let deployer = Deployer::new(config, request, ports, shutdown);
    match deployer.process().await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "deploy did not succeed");
            ExitCode::FAILURE
        }
    }
}
