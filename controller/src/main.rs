use std::sync::mpsc;
use std::sync::Arc;

use log::{error, info, warn};
use tracing_subscriber::EnvFilter;

use syncwarden::auth::SYSTEM_SUBJECT;
use syncwarden::gitops::{ApplicationChangeEvent, ChangeType};
use syncwarden::{
    config, AllowAll, ApplicationController, ApplicationLoader, ApplicationWatcher, Authorizer,
    CachingRenderer, ClusterCache, ControllerConfig, ControllerDeps, ControllerRuntime,
    ControllerSettings, DirectoryRenderer, InMemoryCluster, InMemoryStatusStore, PolicyAuthorizer,
};

const LOG_FORMAT_ENV_VAR: &str = "SYNCWARDEN_LOG_FORMAT";

fn init_logging() {
    if let Err(e) = tracing_log::LogTracer::init() {
        eprintln!("Failed to bridge log records: {}", e);
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var(LOG_FORMAT_ENV_VAR)
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let result = if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .try_init()
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).try_init()
    };
    if let Err(e) = result {
        eprintln!("Failed to initialize logging: {}", e);
    }
}

fn build_authorizer(config: &ControllerConfig) -> Result<Arc<dyn Authorizer>, String> {
    if config.rbac.policies.is_empty() {
        info!("No RBAC policies configured, allowing all requests");
        return Ok(Arc::new(AllowAll));
    }
    PolicyAuthorizer::new(&config.rbac.policies)
        .map(|a| Arc::new(a) as Arc<dyn Authorizer>)
        .map_err(|e| format!("invalid RBAC policy pattern: {}", e))
}

async fn handle_change(controller: &ApplicationController, event: ApplicationChangeEvent) {
    match event.change_type {
        ChangeType::Applied => {
            let Some(application) = event.application else {
                return;
            };
            match controller.apply_application(SYSTEM_SUBJECT, application) {
                Ok(app) => info!("Applied application {} from {:?}", app.key(), event.path),
                Err(e) => warn!("Failed to apply application from {:?}: {}", event.path, e),
            }
        }
        ChangeType::Deleted => {
            match controller
                .delete_application(SYSTEM_SUBJECT, &event.app, false)
                .await
            {
                Ok(()) => info!("Removed application {}", event.app),
                Err(e) => warn!("Failed to remove application {}: {}", event.app, e),
            }
        }
    }
}

fn main() {
    init_logging();

    info!(
        "Starting syncwarden controller v{}",
        env!("CARGO_PKG_VERSION")
    );

    let cli_arg = std::env::args().nth(1);
    let config = match config::load_or_default(cli_arg.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start async runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run(config)) {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(config: ControllerConfig) -> Result<(), String> {
    let authorizer = build_authorizer(&config)?;

    let cluster = Arc::new(InMemoryCluster::new());
    let cache = Arc::new(ClusterCache::new());
    cluster.watch(cache.clone());

    let renderer = Arc::new(CachingRenderer::new(Arc::new(DirectoryRenderer::new(
        &config.repositories_root,
    ))));
    let store = Arc::new(InMemoryStatusStore::new(config.sync.history_limit));

    let deps = ControllerDeps {
        renderer,
        cluster,
        cache,
        store,
        authorizer,
    };
    let controller = ApplicationController::new(deps, ControllerSettings::from(&config))
        .map(Arc::new)
        .map_err(|e| format!("invalid controller configuration: {}", e))?;

    let loader = ApplicationLoader::new(&config.applications_dir);
    let loaded = match loader.load() {
        Ok(loaded) => loaded,
        Err(e) => {
            warn!(
                "Failed to load applications from {:?}: {}",
                config.applications_dir, e
            );
            Vec::new()
        }
    };
    for entry in &loaded {
        if let Err(e) = controller.apply_application(SYSTEM_SUBJECT, entry.application.clone()) {
            warn!("Skipping application from {:?}: {}", entry.path, e);
        }
    }
    info!("Loaded {} application(s)", loaded.len());

    let watcher = Arc::new(ApplicationWatcher::new(&config.applications_dir));
    watcher.track(&loaded);
    let mut changes = watcher.subscribe();
    let watcher_thread = if config.applications_dir.is_dir() {
        Some(watcher.start())
    } else {
        warn!(
            "Applications directory {:?} does not exist, not watching",
            config.applications_dir
        );
        None
    };

    let controller_runtime = ControllerRuntime::start(
        Arc::clone(&controller),
        tokio::runtime::Handle::current(),
        config.reconciliation.workers,
        config.reconcile_interval(),
    );

    let (stop_tx, stop_rx) = mpsc::channel::<()>();
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = stop_tx.send(());
    }) {
        warn!("Failed to install signal handler: {}", e);
    }
    let mut stop = tokio::task::spawn_blocking(move || {
        let _ = stop_rx.recv();
    });

    let mut watcher_closed = false;
    loop {
        tokio::select! {
            _ = &mut stop => break,
            event = changes.recv() => match event {
                Ok(event) => handle_change(&controller, event).await,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Dropped {} application change event(s), refreshing", n);
                    controller_runtime.trigger_refresh();
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                    watcher_closed = true;
                    break;
                }
            },
        }
    }
    if watcher_closed {
        info!("Application watcher closed, waiting for shutdown signal");
        let _ = stop.await;
    }

    info!("Shutting down");
    watcher.stop();
    controller_runtime.shutdown().await;
    if let Some(handle) = watcher_thread {
        match tokio::task::spawn_blocking(move || handle.join()).await {
            Ok(Ok(Err(e))) => warn!("Application watcher stopped with error: {}", e),
            Ok(Err(_)) => warn!("Application watcher thread panicked"),
            _ => {}
        }
    }
    info!("Syncwarden controller stopped");
    Ok(())
}
