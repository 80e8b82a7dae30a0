//! Main controller implementation.
//!
//! `Controller` wires the Kubernetes watchers, the reconciler workers, the
//! fabric subscriber and the metrics server together and owns their
//! lifecycle. Startup order matters: caches are synced and address state is
//! recovered before any worker runs.

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::metrics::{self, Metrics, ResyncFn};
use crate::queue::{QueueKind, run_worker};
use crate::reconciler::fabric_path::OPFLEX_DEVICE_CLASS;
use crate::reconciler::{Reconciler, Stores};
use crate::service_writer::KubeServiceWriter;
use crate::watcher::{WatchedResource, watch_resource};
use apic_client::{ApicClient, ApicClientTrait, ApicSubscriber, Subscription};
use crds::{NetflowPolicy, SnatPolicy};
use k8s_openapi::api::core::v1::{Endpoints, Service};
use kube::{Api, Client};
use kube_runtime::reflector;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const SUBSCRIPTION_BUFFER: usize = 64;

/// Main controller for the forward pipeline
pub struct Controller {
    config: ControllerConfig,
    reconciler: Arc<Reconciler>,
    apic: Arc<dyn ApicClientTrait>,
    watchers: JoinSet<Result<(), ControllerError>>,
    token: CancellationToken,
}

impl Controller {
    /// Build every collaborator and start the resource watchers
    pub async fn new(config: ControllerConfig) -> Result<Self, ControllerError> {
        info!("Initializing ACI Controller");

        let kube_client = Client::try_default().await?;

        let apic: Arc<dyn ApicClientTrait> = Arc::new(ApicClient::new(
            config.apic_hosts.clone(),
            config.apic_username.clone(),
            config.apic_password.clone(),
            config.apic_insecure,
        )?);

        let service_api: Api<Service> = Api::all(kube_client.clone());
        let endpoints_api: Api<Endpoints> = Api::all(kube_client.clone());
        let snat_api: Api<SnatPolicy> = Api::all(kube_client.clone());
        let netflow_api: Api<NetflowPolicy> = Api::all(kube_client.clone());

        let (services, services_writer) = reflector::store();
        let (endpoints, endpoints_writer) = reflector::store();
        let (snat_policies, snat_writer) = reflector::store();
        let (netflow_policies, netflow_writer) = reflector::store();
        let stores = Stores {
            services,
            endpoints,
            snat_policies,
            netflow_policies,
        };

        let metrics = Metrics::new()
            .map_err(|e| ControllerError::InvalidConfig(format!("metrics registry: {}", e)))?;

        let reconciler = Arc::new(Reconciler::new(
            config.clone(),
            apic.clone(),
            Arc::new(KubeServiceWriter::new(kube_client)),
            stores,
            metrics,
        )?);

        let token = CancellationToken::new();
        let mut watchers = JoinSet::new();
        watchers.spawn(watch_resource(
            service_api,
            services_writer,
            reconciler.clone(),
            WatchedResource::Service,
            token.clone(),
            "Service",
        ));
        watchers.spawn(watch_resource(
            endpoints_api,
            endpoints_writer,
            reconciler.clone(),
            WatchedResource::Endpoints,
            token.clone(),
            "Endpoints",
        ));
        watchers.spawn(watch_resource(
            snat_api,
            snat_writer,
            reconciler.clone(),
            WatchedResource::SnatPolicy,
            token.clone(),
            "SnatPolicy",
        ));
        watchers.spawn(watch_resource(
            netflow_api,
            netflow_writer,
            reconciler.clone(),
            WatchedResource::NetflowPolicy,
            token.clone(),
            "NetflowPolicy",
        ));

        Ok(Self {
            config,
            reconciler,
            apic,
            watchers,
            token,
        })
    }

    /// Run until a shutdown signal arrives or a watcher fails
    pub async fn run(self) -> Result<(), ControllerError> {
        let Self {
            config,
            reconciler,
            apic,
            mut watchers,
            token,
        } = self;

        info!("Waiting for resource caches to sync");
        tokio::select! {
            result = wait_for_caches(&reconciler.stores) => result?,
            () = shutdown_signal() => {
                info!("Shutdown requested before caches synced");
                token.cancel();
                watchers.shutdown().await;
                return Ok(());
            }
        }

        reconciler.recover();
        if let Err(e) = reconciler.write_static_objects().await {
            error!("Failed to write static service objects: {}", e);
        }
        reconciler.full_sync();

        let mut workers = Vec::with_capacity(config.service_workers + 2);
        for _ in 0..config.service_workers.max(1) {
            workers.push(spawn_worker(&reconciler, QueueKind::Service));
        }
        workers.push(spawn_worker(&reconciler, QueueKind::Snat));
        workers.push(spawn_worker(&reconciler, QueueKind::Netflow));
        info!("Started {} worker(s)", workers.len());

        let (tx, mut rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let subscriber = ApicSubscriber::new(apic, Duration::from_secs(config.apic_refresh_seconds))
            .subscribe(Subscription::class(OPFLEX_DEVICE_CLASS));
        let subscriber_handle = tokio::spawn(subscriber.run(tx, token.clone()));
        let consumer_handle = {
            let reconciler = reconciler.clone();
            tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    reconciler.handle_subscription_event(event).await;
                }
            })
        };

        let resync: ResyncFn = {
            let reconciler = reconciler.clone();
            Arc::new(move || reconciler.full_sync())
        };
        let app = metrics::router(reconciler.metrics.clone(), resync);
        let server_handle = tokio::spawn(metrics::serve(config.metrics_addr, app, token.clone()));

        info!("ACI Controller running");
        let outcome = tokio::select! {
            () = shutdown_signal() => {
                info!("Shutdown signal received");
                Ok(())
            }
            Some(result) = watchers.join_next() => match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e),
                Err(e) => Err(ControllerError::Watch(format!("watcher task failed: {}", e))),
            },
        };

        token.cancel();
        reconciler.queues.shutdown_all();
        for worker in workers {
            if let Err(e) = worker.await {
                warn!("Worker task failed: {}", e);
            }
        }
        watchers.shutdown().await;
        if let Err(e) = subscriber_handle.await {
            warn!("Subscriber task failed: {}", e);
        }
        if let Err(e) = consumer_handle.await {
            warn!("Subscription consumer failed: {}", e);
        }
        match server_handle.await {
            Ok(Err(e)) => warn!("Metrics server error: {}", e),
            Err(e) => warn!("Metrics server task failed: {}", e),
            Ok(Ok(())) => {}
        }

        info!("ACI Controller stopped");
        outcome
    }
}

fn spawn_worker(reconciler: &Arc<Reconciler>, kind: QueueKind) -> JoinHandle<()> {
    let queue = reconciler.queues.for_kind(kind).clone();
    let reconciler = reconciler.clone();
    tokio::spawn(run_worker(queue, move |key| {
        let reconciler = reconciler.clone();
        async move { reconciler.process(kind, &key).await }
    }))
}

async fn wait_for_caches(stores: &Stores) -> Result<(), ControllerError> {
    let synced = |e: reflector::store::WriterDropped| ControllerError::Watch(e.to_string());
    stores.services.wait_until_ready().await.map_err(synced)?;
    stores.endpoints.wait_until_ready().await.map_err(synced)?;
    stores.snat_policies.wait_until_ready().await.map_err(synced)?;
    stores.netflow_policies.wait_until_ready().await.map_err(synced)?;
    info!("Resource caches synced");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
