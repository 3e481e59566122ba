//! Kubernetes orchestrator: one Deployment per node.
//!
//! Each node hosts a Deployment named `{deployment_base}-{node}` (dots in
//! the node name become dashes) whose pods are pinned to that node through
//! a required node affinity. All Deployments share the configured labels
//! so a single Service can target every replica. Replica counts are read
//! from the Deployment spec and changed through the scale subresource.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Affinity, Container, ContainerPort, NodeAffinity, NodeSelector, NodeSelectorRequirement,
    NodeSelectorTerm, PodSpec, PodTemplateSpec, ResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::api::{Api, DeleteParams, ObjectMeta, Patch, PatchParams, PostParams};
use kube::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use marla_state::NodeId;

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::orchestrator::{Orchestrator, OrchestratorFuture};

/// Label carrying the node a Deployment's pods are pinned to.
const NODE_LABEL: &str = "marla.io/node";
const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
const MANAGER: &str = "marla";

/// Cluster and workload configuration (the `[cluster]` config section).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterSettings {
    /// Worker nodes, in placement search order.
    pub nodes: Vec<NodeId>,
    pub namespace: String,
    pub deployment_base: String,
    pub image: String,
    pub container_port: i32,
    /// Node label matched by the per-node affinity.
    pub node_label_key: String,
    /// Labels shared by every replica (Service selector).
    pub labels: BTreeMap<String, String>,
    pub cpu: String,
    pub memory: String,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            namespace: "default".to_string(),
            deployment_base: "my-nginx".to_string(),
            image: "nginx:1.21-alpine".to_string(),
            container_port: 80,
            node_label_key: "kubernetes.io/hostname".to_string(),
            labels: BTreeMap::from([("app".to_string(), "my-nginx".to_string())]),
            cpu: "500m".to_string(),
            memory: "512Mi".to_string(),
        }
    }
}

impl ClusterSettings {
    /// Name of the Deployment hosting the service on `node`.
    pub fn deployment_name(&self, node: &str) -> String {
        format!("{}-{}", self.deployment_base, node.replace('.', "-"))
    }

    /// The Deployment object for `node` with `replicas` replicas.
    pub fn build_deployment(&self, node: &str, replicas: u32) -> Deployment {
        let name = self.deployment_name(node);

        let mut selector = BTreeMap::new();
        selector.insert(NODE_LABEL.to_string(), node.replace('.', "-"));
        for (key, value) in &self.labels {
            selector.insert(key.clone(), value.clone());
        }

        let mut metadata_labels = selector.clone();
        metadata_labels.insert(MANAGED_BY_LABEL.to_string(), MANAGER.to_string());

        let resources = BTreeMap::from([
            ("cpu".to_string(), Quantity(self.cpu.clone())),
            ("memory".to_string(), Quantity(self.memory.clone())),
        ]);

        let affinity = Affinity {
            node_affinity: Some(NodeAffinity {
                required_during_scheduling_ignored_during_execution: Some(NodeSelector {
                    node_selector_terms: vec![NodeSelectorTerm {
                        match_expressions: Some(vec![NodeSelectorRequirement {
                            key: self.node_label_key.clone(),
                            operator: "In".to_string(),
                            values: Some(vec![node.to_string()]),
                        }]),
                        ..Default::default()
                    }],
                }),
                ..Default::default()
            }),
            ..Default::default()
        };

        Deployment {
            metadata: ObjectMeta {
                name: Some(name),
                namespace: Some(self.namespace.clone()),
                labels: Some(metadata_labels),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                replicas: Some(i32::try_from(replicas).unwrap_or(i32::MAX)),
                selector: LabelSelector {
                    match_labels: Some(selector.clone()),
                    ..Default::default()
                },
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(selector),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        affinity: Some(affinity),
                        containers: vec![Container {
                            name: self.deployment_base.clone(),
                            image: Some(self.image.clone()),
                            ports: Some(vec![ContainerPort {
                                container_port: self.container_port,
                                ..Default::default()
                            }]),
                            resources: Some(ResourceRequirements {
                                requests: Some(resources.clone()),
                                limits: Some(resources),
                                ..Default::default()
                            }),
                            ..Default::default()
                        }],
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

/// Orchestrator backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeOrchestrator {
    client: Client,
    settings: ClusterSettings,
}

impl KubeOrchestrator {
    /// Connect using the ambient kubeconfig or in-cluster service account.
    pub async fn connect(settings: ClusterSettings) -> OrchestratorResult<Self> {
        let client = Client::try_default()
            .await
            .map_err(|e| OrchestratorError::Client(e.to_string()))?;
        info!(namespace = %settings.namespace, nodes = settings.nodes.len(), "kubernetes client ready");
        Ok(Self::new(client, settings))
    }

    pub fn new(client: Client, settings: ClusterSettings) -> Self {
        Self { client, settings }
    }

    fn api(&self) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), &self.settings.namespace)
    }

    async fn get(&self, node: &str) -> OrchestratorResult<Option<u32>> {
        let name = self.settings.deployment_name(node);
        let deployment = self
            .api()
            .get_opt(&name)
            .await
            .map_err(|e| map_kube_error(node, e))?;
        // An unset replica count defaults to 1 on the API server.
        Ok(deployment.map(|d| {
            d.spec
                .and_then(|spec| spec.replicas)
                .map(|r| u32::try_from(r).unwrap_or(0))
                .unwrap_or(1)
        }))
    }

    async fn scale(&self, node: &str, replicas: u32) -> OrchestratorResult<()> {
        let name = self.settings.deployment_name(node);
        let patch = serde_json::json!({ "spec": { "replicas": replicas } });
        self.api()
            .patch_scale(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| map_kube_error(node, e))?;
        debug!(deployment = %name, replicas, "deployment scaled");
        Ok(())
    }

    async fn create(&self, node: &str, replicas: u32) -> OrchestratorResult<()> {
        let deployment = self.settings.build_deployment(node, replicas);
        self.api()
            .create(&PostParams::default(), &deployment)
            .await
            .map_err(|e| map_kube_error(node, e))?;
        info!(deployment = %self.settings.deployment_name(node), replicas, "deployment created");
        Ok(())
    }

    async fn delete(&self, node: &str) -> OrchestratorResult<()> {
        let name = self.settings.deployment_name(node);
        match self.api().delete(&name, &DeleteParams::default()).await {
            Ok(_) => {
                info!(deployment = %name, "deployment deleted");
                Ok(())
            }
            Err(e) => match map_kube_error(node, e) {
                OrchestratorError::NotFound(_) => Ok(()),
                other => Err(other),
            },
        }
    }
}

impl Orchestrator for KubeOrchestrator {
    fn get_replica_count<'a>(&'a self, node: &'a str) -> OrchestratorFuture<'a, Option<u32>> {
        Box::pin(self.get(node))
    }

    fn set_replica_count<'a>(&'a self, node: &'a str, replicas: u32) -> OrchestratorFuture<'a, ()> {
        Box::pin(self.scale(node, replicas))
    }

    fn create_workload<'a>(&'a self, node: &'a str, replicas: u32) -> OrchestratorFuture<'a, ()> {
        Box::pin(self.create(node, replicas))
    }

    fn delete_workload<'a>(&'a self, node: &'a str) -> OrchestratorFuture<'a, ()> {
        Box::pin(self.delete(node))
    }
}

fn map_kube_error(node: &str, err: kube::Error) -> OrchestratorError {
    match err {
        kube::Error::Api(resp) if resp.code == 404 => OrchestratorError::NotFound(node.to_string()),
        kube::Error::Api(resp) if resp.code == 409 => OrchestratorError::AlreadyExists(node.to_string()),
        other => OrchestratorError::Api(other.to_string()),
    }
}
