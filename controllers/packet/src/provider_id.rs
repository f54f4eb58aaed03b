//! ProviderID prefix resolution.
//!
//! A machine's providerID is `<prefix><device-id>`. The prefix depends on
//! which cloud controller runs in the workload cluster, so it is resolved in
//! order from:
//!
//! 1. the scheme of a providerID already set on the PacketMachine,
//! 2. the cloud controller deployed in the workload cluster,
//! 3. the Machine's KubeadmConfig (`provider-id` kubelet argument, then the
//!    cloud controller install commands in `postKubeadmCommands`),
//! 4. `equinixmetal://`.
//!
//! Once a providerID is set its prefix never changes.

use crate::error::ControllerError;
use crate::kube_store::KubeStore;
use crate::workload::{CloudProviderDeployment, WorkloadClusterProbe};
use crds::{Cluster, KubeadmConfigSpec, Machine, PacketMachine, KUBEADM_CONFIG_KIND};
use tracing::{debug, warn};

pub const EQUINIX_METAL_PREFIX: &str = "equinixmetal://";
pub const PACKET_PREFIX: &str = "packet://";
pub const DEFAULT_PREFIX: &str = EQUINIX_METAL_PREFIX;

const PROVIDER_ID_KUBELET_ARG: &str = "provider-id";
const EQUINIX_METAL_CCM_RELEASES: &str = "github.com/equinix/cloud-provider-equinix-metal/releases";
const PACKET_CCM_RELEASES: &str = "github.com/packethost/packet-ccm/releases";

/// `"<scheme>://"` of a providerID-like URI, if it has a valid scheme
pub fn prefix_of(uri: &str) -> Option<String> {
    let (scheme, _) = uri.split_once("://")?;
    let mut chars = scheme.chars();
    let valid = chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    valid.then(|| format!("{}://", scheme.to_ascii_lowercase()))
}

/// Device ID embedded in a providerID
pub fn device_id(provider_id: &str) -> Result<String, ControllerError> {
    let prefix = prefix_of(provider_id)
        .ok_or_else(|| ControllerError::ProviderId(format!("{:?} has no scheme", provider_id)))?;
    let id = provider_id[prefix.len()..].trim_matches('/');
    if id.is_empty() {
        return Err(ControllerError::ProviderId(format!("{:?} has no device ID", provider_id)));
    }
    Ok(id.to_string())
}

/// Prefix implied by a KubeadmConfig, if any
///
/// An explicit `provider-id` kubelet argument wins (init configuration before
/// join configuration); otherwise the cloud controller install commands are
/// recognised by their release URLs.
pub fn prefix_from_kubeadm_config(spec: &KubeadmConfigSpec) -> Option<String> {
    let explicit = [&spec.init_configuration, &spec.join_configuration]
        .into_iter()
        .flatten()
        .find_map(|c| c.node_registration.kubelet_extra_args.get(PROVIDER_ID_KUBELET_ARG))
        .and_then(|arg| prefix_of(arg));
    if explicit.is_some() {
        return explicit;
    }

    spec.post_kubeadm_commands.iter().find_map(|command| {
        if command.contains(EQUINIX_METAL_CCM_RELEASES) {
            Some(EQUINIX_METAL_PREFIX.to_string())
        } else if command.contains(PACKET_CCM_RELEASES) {
            Some(PACKET_PREFIX.to_string())
        } else {
            None
        }
    })
}

/// Resolves the providerID prefix for one machine
pub struct ProviderIdResolver<'a> {
    store: &'a dyn KubeStore,
    workload: &'a dyn WorkloadClusterProbe,
}

impl<'a> ProviderIdResolver<'a> {
    pub fn new(store: &'a dyn KubeStore, workload: &'a dyn WorkloadClusterProbe) -> Self {
        Self { store, workload }
    }

    pub async fn resolve(
        &self,
        packet_machine: &PacketMachine,
        machine: &Machine,
        cluster: &Cluster,
    ) -> Result<String, ControllerError> {
        if let Some(existing) = packet_machine.spec.provider_id.as_deref().filter(|id| !id.is_empty()) {
            match prefix_of(existing) {
                Some(prefix) => return Ok(prefix),
                None => warn!("Ignoring providerID {:?} without a scheme while resolving the prefix", existing),
            }
        }

        let namespace = cluster.metadata.namespace.as_deref().unwrap_or("default");
        let cluster_name = cluster.metadata.name.as_deref().unwrap_or_default();

        match self.workload.cloud_provider(namespace, cluster_name).await? {
            CloudProviderDeployment::EquinixMetal => return Ok(EQUINIX_METAL_PREFIX.to_string()),
            CloudProviderDeployment::Packet => return Ok(PACKET_PREFIX.to_string()),
            inconclusive => debug!("Workload cluster {}/{}: {:?}", namespace, cluster_name, inconclusive),
        }

        if let Some(prefix) = self.from_bootstrap_config(machine).await? {
            return Ok(prefix);
        }

        Ok(DEFAULT_PREFIX.to_string())
    }

    async fn from_bootstrap_config(&self, machine: &Machine) -> Result<Option<String>, ControllerError> {
        let Some(config_ref) = machine.spec.bootstrap.config_ref.as_ref() else {
            return Ok(None);
        };
        if config_ref.kind != KUBEADM_CONFIG_KIND {
            return Ok(None);
        }

        let namespace = config_ref
            .namespace
            .as_deref()
            .or(machine.metadata.namespace.as_deref())
            .unwrap_or("default");
        let Some(config) = self.store.get_kubeadm_config(namespace, &config_ref.name).await? else {
            return Ok(None);
        };

        Ok(prefix_from_kubeadm_config(&config.spec))
    }
}
