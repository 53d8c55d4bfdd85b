//! Main controller implementation.
//!
//! This module contains the `Controller` struct that wires the Kubernetes
//! client, the Aria Automation client, the reconciler, the watcher and the
//! probe server together.

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use crate::server::{self, ProbeState};
use crate::store::KubeStore;
use crate::watcher::{Context, Watcher};
use crds::{KindRegistry, VirtualMachine};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::{Api, Client};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use vra_client::{VraClient, VraClientTrait};

/// Main controller for VirtualMachine resources.
pub struct Controller {
    watcher: JoinHandle<Result<(), ControllerError>>,
    probe_server: JoinHandle<Result<(), ControllerError>>,
}

impl Controller {
    /// Creates a new controller instance and starts its tasks.
    pub async fn new(config: ControllerConfig, registry: KindRegistry) -> Result<Self, ControllerError> {
        info!("Initializing VirtualMachine Controller");

        let kube_client = Client::try_default().await?;
        check_crds_installed(&kube_client, &registry).await?;

        let vra_client = VraClient::new(
            config.vra_url.clone(),
            config.refresh_token.clone(),
            config.insecure,
        )?;
        info!("Validating Aria Automation token and connectivity...");
        vra_client.validate_token().await.map_err(|e| {
            error!("Failed to log in to Aria Automation: {}", e);
            error!("Please ensure:");
            error!("  1. VRA_REFRESH_TOKEN is set to a valid refresh token");
            error!("  2. Aria Automation is reachable at {}", config.vra_url);
            ControllerError::VraClient(e)
        })?;
        info!("Aria Automation token validated");

        let api: Api<VirtualMachine> = match config.watch_namespace.as_deref() {
            Some(ns) => Api::namespaced(kube_client.clone(), ns),
            None => Api::all(kube_client.clone()),
        };

        let reconciler = Reconciler::new(
            Box::new(vra_client),
            Box::new(KubeStore::new(kube_client)),
            config.requeue,
            config.max_requeue,
        );
        let context = Arc::new(Context {
            reconciler,
            resync: config.resync,
        });

        let ready = Arc::new(AtomicBool::new(false));
        let watcher = Watcher::new(
            api,
            context,
            Arc::new(registry),
            config.concurrency,
            ready.clone(),
        );

        let watcher = tokio::spawn(watcher.run());
        let probe_server = tokio::spawn(server::serve(config.probe_port, ProbeState { ready }));

        Ok(Self {
            watcher,
            probe_server,
        })
    }

    /// Run until a task fails or the process is interrupted.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("VirtualMachine Controller running");

        tokio::select! {
            result = &mut self.watcher => {
                result.map_err(|e| ControllerError::Watch(format!("VirtualMachine watcher panicked: {}", e)))??;
            }
            result = &mut self.probe_server => {
                result.map_err(|e| ControllerError::Server(format!("probe server panicked: {}", e)))??;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
            }
        }

        self.watcher.abort();
        self.probe_server.abort();
        Ok(())
    }
}

/// Fail fast when a registered CRD is missing from the cluster
async fn check_crds_installed(client: &Client, registry: &KindRegistry) -> Result<(), ControllerError> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    for kind in registry.kinds() {
        match crds.get_opt(&kind.crd_name).await {
            Ok(Some(_)) => info!("CRD {} is installed", kind.crd_name),
            Ok(None) => {
                return Err(ControllerError::InvalidConfig(format!(
                    "CRD {} is not installed (generate it with `crdgen`)",
                    kind.crd_name
                )));
            }
            Err(e) => {
                // RBAC may not allow reading CRDs; the watch will fail loudly if it is really missing
                warn!("Could not verify CRD {}: {}", kind.crd_name, e);
            }
        }
    }
    Ok(())
}
