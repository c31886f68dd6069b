use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use axum::extract::State as AxumState;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use clap::{Parser, crate_authors, crate_description, crate_version};
use k8s_openapi::api::core::v1::{Namespace, Pod};
use k8s_openapi::api::networking::v1::NetworkPolicy;
use kube::Config;
use kube::api::{Api, ListParams};
use kube::config::KubeConfigOptions;
use kube::runtime::reflector;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use prometheus::{Encoder, TextEncoder};
use tokio::signal::unix::{SignalKind, signal};
use tracing::{error, info};

use kubenp_cache::Cache;
use kubenp_ipset::IpsetEngine;
use kubenp_k8s_util::client::new_client;
use kubenp_operator::bootstrap::{self, SnapshotPaths};
use kubenp_operator::context::{Engines, NamespacedName, PodKey, State};
use kubenp_operator::metrics::{Metrics, NAMESPACE_CONTROLLER, NETWORKPOLICY_CONTROLLER, POD_CONTROLLER};
use kubenp_operator::queue::{BackoffTable, WorkQueue};
use kubenp_operator::telemetry::{self, LogFormat};
use kubenp_operator::{controllers, debug};
use kubenp_ruleengine::RuleEngine;

#[derive(Parser, Debug)]
#[command(
    name = "npmd",
    about = crate_description!(),
    version = crate_version!(),
    author = crate_authors!("\n"),
)]
struct Args {
    /// Name of the node this process runs on, used for the `/debug` payload and as
    /// the fallback `--hostname-override` value.
    #[arg(long, env = "NODE_NAME")]
    node_name: String,

    /// Override the hostname reported to Kubernetes Events' `reportingInstance`.
    #[arg(long, env)]
    hostname_override: Option<String>,

    /// Path to a kubeconfig file. When unset, falls back to in-cluster config or the
    /// default kubeconfig location, per `kube::Config::infer`.
    #[arg(long, env = "KUBECONFIG")]
    kubeconfig: Option<PathBuf>,

    /// kubeconfig context to use.
    #[arg(long, env)]
    context: Option<String>,

    /// Listen on given port for `/metrics`, `/healthz`, `/debug`.
    #[arg(short, long, default_value_t = 8080, env)]
    port: u16,

    /// Directory holding the cache/ipset/ruleengine snapshot files (§4.5, §7).
    #[arg(long, default_value = "/var/lib/npmd", env)]
    snapshot_dir: PathBuf,

    /// How often to persist the cache snapshot to disk.
    #[arg(long, default_value_t = 60, env)]
    snapshot_period_secs: u64,

    /// Whether to manage IPv6 rules/sets in addition to IPv4.
    #[arg(long, env)]
    ipv6: bool,

    /// Set logging filter directive for `tracing_subscriber::filter::EnvFilter`.
    /// Example: "info,kube=debug,npmd=debug"
    #[arg(long, default_value = "info", env)]
    log_filter: String,

    /// Set log format.
    #[arg(long, value_enum, default_value_t = LogFormat::Text, env)]
    log_format: LogFormat,

    /// URL for the OpenTelemetry tracing endpoint. Tracing is local-only if unset.
    #[arg(short, long, env = "OPENTELEMETRY_ENDPOINT_URL")]
    tracing_url: Option<String>,

    /// Sampling ratio for tracing.
    #[arg(short, long, default_value_t = 0.1, env)]
    sample_ratio: f64,
}

#[derive(Clone)]
struct AppState {
    state: State,
    registry: prometheus::Registry,
}

async fn metrics_handler(AxumState(app): AxumState<AppState>) -> impl IntoResponse {
    let families = app.registry.gather();
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    match encoder.encode(&families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", encoder.format_type().to_string())],
            buffer,
        )
            .into_response(),
        Err(err) => {
            error!(msg = "failed to encode metrics", %err);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn healthz() -> impl IntoResponse {
    Json("healthy")
}

async fn debug_handler(AxumState(app): AxumState<AppState>) -> impl IntoResponse {
    Json(debug::snapshot(&app.state.node_name, &app.state.engines).await)
}

async fn check_api_queryable<K>(client: kube::Client) -> Api<K>
where
    K: kube::Resource + Clone + serde::de::DeserializeOwned + std::fmt::Debug,
    <K as kube::Resource>::DynamicType: Default,
{
    let api = Api::<K>::all(client);
    if let Err(err) = api.list(&ListParams::default().limit(1)).await {
        error!(msg = "resource is not queryable; check RBAC permissions", %err);
        std::process::exit(1);
    }
    api
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    telemetry::init(&args.log_filter, args.log_format, args.tracing_url.as_deref(), args.sample_ratio).await?;

    let registry = prometheus::Registry::new();
    let exporter = opentelemetry_prometheus::exporter()
        .with_registry(registry.clone())
        .build()?;
    let meter_provider = SdkMeterProvider::builder().with_reader(exporter).build();
    opentelemetry::global::set_meter_provider(meter_provider.clone());
    let meter = opentelemetry::global::meter("npmd");

    let kubeconfig_options = KubeConfigOptions {
        context: args.context.clone(),
        ..Default::default()
    };
    let config = match &args.kubeconfig {
        Some(path) => {
            let kubeconfig = kube::config::Kubeconfig::read_from(path)?;
            Config::from_custom_kubeconfig(kubeconfig, &kubeconfig_options).await?
        }
        None if args.context.is_some() => Config::from_kubeconfig(&kubeconfig_options).await?,
        None => Config::infer().await?,
    };
    let client = new_client(config).await?;

    let node_name = args.node_name.clone();
    let reporter_instance = args.hostname_override.clone().unwrap_or_else(|| node_name.clone());

    let pod_api = check_api_queryable::<Pod>(client.clone()).await;
    let namespace_api = check_api_queryable::<Namespace>(client.clone()).await;
    let networkpolicy_api = check_api_queryable::<NetworkPolicy>(client.clone()).await;

    let (pod_store, pod_writer) = reflector::store::<Pod>();
    let (namespace_store, namespace_writer) = reflector::store::<Namespace>();
    let (networkpolicy_store, networkpolicy_writer) = reflector::store::<NetworkPolicy>();

    let controller_names = [POD_CONTROLLER, NAMESPACE_CONTROLLER, NETWORKPOLICY_CONTROLLER];
    let metrics = Arc::new(Metrics::new(&meter, &controller_names));

    let ipset = Arc::new(IpsetEngine::new());
    let ruleengine = Arc::new(RuleEngine::new(args.ipv6)?);
    let cache = Arc::new(Cache::new());
    let engines = Arc::new(Engines { ipset, ruleengine, cache });

    let snapshots = SnapshotPaths::under(&args.snapshot_dir);
    tokio::fs::create_dir_all(&args.snapshot_dir).await?;
    bootstrap::restore_state(&engines, &snapshots).await?;
    bootstrap::ensure_all_namespaces_bookkeeping(&engines).await?;
    bootstrap::replay_owner_maps(&engines).await?;

    let state = State::new(
        client,
        engines.clone(),
        metrics.clone(),
        node_name.clone(),
        pod_store.clone(),
        namespace_store.clone(),
        networkpolicy_store.clone(),
    );

    let pod_ctx = state.to_context(POD_CONTROLLER, Some(&reporter_instance));
    let namespace_ctx = state.to_context(NAMESPACE_CONTROLLER, Some(&reporter_instance));
    let networkpolicy_ctx = state.to_context(NETWORKPOLICY_CONTROLLER, Some(&reporter_instance));

    let pod_queue: Arc<WorkQueue<PodKey>> = WorkQueue::new();
    let namespace_queue: Arc<WorkQueue<NamespacedName>> = WorkQueue::new();
    let networkpolicy_queue: Arc<WorkQueue<NamespacedName>> = WorkQueue::new();

    let pod_backoff: Arc<BackoffTable<PodKey>> = Arc::new(BackoffTable::new());
    let namespace_backoff: Arc<BackoffTable<NamespacedName>> = Arc::new(BackoffTable::new());
    let networkpolicy_backoff: Arc<BackoffTable<NamespacedName>> = Arc::new(BackoffTable::new());

    // Watch streams must be polled before the stores they feed will ever become
    // ready, so spawn them before waiting on `wait_until_ready` below.
    tokio::spawn(controllers::watch_pods(pod_api, pod_writer, pod_ctx.clone(), pod_queue.clone()));
    tokio::spawn(controllers::watch_namespaces(
        namespace_api,
        namespace_writer,
        namespace_ctx.clone(),
        namespace_queue.clone(),
    ));
    tokio::spawn(controllers::watch_networkpolicies(
        networkpolicy_api,
        networkpolicy_writer,
        networkpolicy_ctx.clone(),
        networkpolicy_queue.clone(),
    ));

    info!(msg = "waiting for informer sync");
    pod_store.wait_until_ready().await?;
    namespace_store.wait_until_ready().await?;
    networkpolicy_store.wait_until_ready().await?;

    tokio::spawn(controllers::run_pod_worker(pod_ctx, pod_queue, pod_backoff));
    tokio::spawn(controllers::run_namespace_worker(namespace_ctx, namespace_queue, namespace_backoff));
    tokio::spawn(controllers::run_networkpolicy_worker(
        networkpolicy_ctx,
        networkpolicy_queue,
        networkpolicy_backoff,
    ));

    let save_task = bootstrap::spawn_periodic_save(
        engines.clone(),
        snapshots.cache.clone(),
        tokio::time::Duration::from_secs(args.snapshot_period_secs),
    );

    metrics.ready_set(true);
    info!(msg = "npmd ready", node = %node_name);

    let app_state = AppState { state, registry };
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz))
        .route("/debug", get(debug_handler))
        .with_state(app_state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", args.port)).await?;
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    save_task.abort();
    bootstrap::save_on_shutdown(&engines, &snapshots).await;
    Ok(())
}

async fn shutdown_signal() {
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM signal handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = sigterm.recv() => {},
    }
}
