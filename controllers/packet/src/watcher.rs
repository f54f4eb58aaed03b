//! Kubernetes resource watchers.
//!
//! Each watcher drives a kube_runtime::Controller for one infrastructure kind
//! and maps changes of the cluster-api objects it depends on back to it.
//!
//! Both watchers share the generic `watch_resource()` helper, which wires the
//! per-resource backoff kept by the `Reconciler` into the error policy.

use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use crds::{Cluster, Machine, PacketCluster, PacketMachine, CLUSTER_NAME_LABEL};
use futures::StreamExt;
use kube::{Api, Client, Resource, ResourceExt};
use kube_runtime::controller::{Action, Config as RuntimeConfig};
use kube_runtime::reflector::ObjectRef;
use kube_runtime::{watcher, Controller};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

type ReconcileFuture = Pin<Box<dyn Future<Output = Result<Action, ControllerError>> + Send>>;

fn resource_key<K: Resource>(kind: &str, obj: &K) -> String {
    format!("{}/{}/{}", kind, obj.namespace().unwrap_or_default(), obj.name_any())
}

/// Run a prepared controller until its watch stream ends.
///
/// Successful reconciles reset the resource's backoff; failures requeue after
/// the next Fibonacci delay for that resource.
async fn watch_resource<K, F>(
    controller: Controller<K>,
    reconciler: Arc<Reconciler>,
    reconcile_fn: F,
    resource_name: &'static str,
    concurrency: u16,
) -> Result<(), ControllerError>
where
    K: Resource + Clone + Send + Sync + 'static + std::fmt::Debug + serde::de::DeserializeOwned,
    K::DynamicType: Default + std::cmp::Eq + std::hash::Hash + Clone + std::fmt::Debug + Unpin,
    F: Fn(Arc<Reconciler>, String, String) -> ReconcileFuture + Send + Sync + Clone + 'static,
{
    info!("Starting {} watcher (concurrency {})", resource_name, concurrency);

    let error_policy = move |obj: Arc<K>, error: &ControllerError, ctx: Arc<Reconciler>| {
        let key = resource_key(resource_name, obj.as_ref());
        let delay = ctx.record_error(&key);
        if error.is_conflict() {
            info!("{} was modified concurrently, retrying in {:?}", key, delay);
        } else {
            error!("Reconciliation error for {}: {} (retrying in {:?})", key, error, delay);
        }
        Action::requeue(delay)
    };

    let reconcile = move |obj: Arc<K>, ctx: Arc<Reconciler>| {
        let reconcile_fn = reconcile_fn.clone();
        async move {
            let key = resource_key(resource_name, obj.as_ref());
            let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());
            let action = reconcile_fn(ctx.clone(), namespace, obj.name_any()).await?;
            ctx.reset_error(&key);
            Ok::<Action, ControllerError>(action)
        }
    };

    let runtime_config = RuntimeConfig::default()
        .debounce(Duration::from_secs(1))
        .concurrency(concurrency);

    controller
        .with_config(runtime_config)
        .run(reconcile, error_policy, reconciler)
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => debug!("Reconciled {} {}", resource_name, obj),
                Err(e) => error!("Controller error for {}: {}", resource_name, e),
            }
        })
        .await;

    Ok(())
}

/// Watches PacketCluster and PacketMachine resources.
pub struct Watcher {
    reconciler: Arc<Reconciler>,
    client: Client,
    namespace: Option<String>,
    cluster_concurrency: u16,
    machine_concurrency: u16,
}

impl Watcher {
    pub fn new(
        reconciler: Arc<Reconciler>,
        client: Client,
        namespace: Option<String>,
        cluster_concurrency: u16,
        machine_concurrency: u16,
    ) -> Self {
        Self {
            reconciler,
            client,
            namespace,
            cluster_concurrency,
            machine_concurrency,
        }
    }

    fn api<K>(&self) -> Api<K>
    where
        K: Resource<Scope = kube::core::NamespaceResourceScope>,
        K::DynamicType: Default,
    {
        match self.namespace.as_deref() {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }

    /// Starts watching PacketCluster resources and their owning Clusters.
    pub async fn watch_packet_clusters(&self) -> Result<(), ControllerError> {
        let controller = Controller::new(self.api::<PacketCluster>(), watcher::Config::default()).watches(
            self.api::<Cluster>(),
            watcher::Config::default(),
            cluster_to_packet_cluster,
        );

        watch_resource(
            controller,
            self.reconciler.clone(),
            |reconciler, namespace, name| {
                Box::pin(async move { reconciler.reconcile_packet_cluster(&namespace, &name).await })
            },
            "PacketCluster",
            self.cluster_concurrency,
        )
        .await
    }

    /// Starts watching PacketMachine resources, their Machines and Clusters.
    pub async fn watch_packet_machines(&self) -> Result<(), ControllerError> {
        let controller = Controller::new(self.api::<PacketMachine>(), watcher::Config::default());
        let packet_machines = controller.store();
        let controller = controller
            .watches(self.api::<Machine>(), watcher::Config::default(), machine_to_packet_machine)
            .watches(self.api::<Cluster>(), watcher::Config::default(), move |cluster: Cluster| {
                let namespace = cluster.namespace();
                let cluster_name = cluster.name_any();
                packet_machines
                    .state()
                    .into_iter()
                    .filter(|pm| pm.namespace() == namespace)
                    .filter(|pm| pm.labels().get(CLUSTER_NAME_LABEL) == Some(&cluster_name))
                    .map(|pm| ObjectRef::from_obj(pm.as_ref()))
                    .collect::<Vec<_>>()
            });

        watch_resource(
            controller,
            self.reconciler.clone(),
            |reconciler, namespace, name| {
                Box::pin(async move { reconciler.reconcile_packet_machine(&namespace, &name).await })
            },
            "PacketMachine",
            self.machine_concurrency,
        )
        .await
    }
}

/// The PacketCluster a Cluster's infrastructureRef points at
pub fn cluster_to_packet_cluster(cluster: Cluster) -> Option<ObjectRef<PacketCluster>> {
    let reference = cluster.spec.infrastructure_ref.as_ref()?;
    if reference.kind != PacketCluster::kind(&()) {
        return None;
    }
    let namespace = reference.namespace.clone().or_else(|| cluster.namespace())?;
    Some(ObjectRef::new(&reference.name).within(&namespace))
}

/// The PacketMachine a Machine's infrastructureRef points at
pub fn machine_to_packet_machine(machine: Machine) -> Option<ObjectRef<PacketMachine>> {
    let reference = machine.spec.infrastructure_ref.as_ref()?;
    if reference.kind != PacketMachine::kind(&()) {
        return None;
    }
    let namespace = reference.namespace.clone().or_else(|| machine.namespace())?;
    Some(ObjectRef::new(&reference.name).within(&namespace))
}
