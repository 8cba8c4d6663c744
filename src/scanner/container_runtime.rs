//! Container-runtime metadata lookup: resolves a container ID to the Pod
//! name, namespace, and labels that own it. Concrete CRI/containerd wire
//! format is out of scope — only the functional contract matters.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::models::ContainerId;

#[derive(Debug, Clone, PartialEq)]
pub struct ContainerMetadata {
    pub pod_name: String,
    pub namespace: String,
    pub labels: BTreeMap<String, String>,
}

#[async_trait]
pub trait ContainerRuntimeClient: Send + Sync {
    async fn inspect(&self, container_id: &ContainerId) -> anyhow::Result<ContainerMetadata>;
}

/// In-memory double keyed by container ID, used by scanner tests.
#[derive(Default)]
pub struct FakeContainerRuntimeClient {
    pub entries: Mutex<BTreeMap<String, ContainerMetadata>>,
}

impl FakeContainerRuntimeClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, container_id: &str, metadata: ContainerMetadata) {
        self.entries.lock().unwrap().insert(container_id.to_string(), metadata);
    }
}

#[async_trait]
impl ContainerRuntimeClient for FakeContainerRuntimeClient {
    async fn inspect(&self, container_id: &ContainerId) -> anyhow::Result<ContainerMetadata> {
        self.entries
            .lock()
            .unwrap()
            .get(container_id.as_str())
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no container metadata for {container_id}"))
    }
}
