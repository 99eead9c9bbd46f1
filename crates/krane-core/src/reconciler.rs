//! The reconciler — turns desired state (configs) into runtime state.
//!
//! Exposes the five deployment actions. Each validates its preconditions
//! synchronously, enqueues exactly one job, and returns the job ID as the
//! correlation handle; everything else is observable on the job record.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error};

use krane_runtime::Runtime;
use krane_store::Store;

use crate::config::DeploymentConfig;
use crate::container::{self, KraneContainer, HEALTH_CHECK_RETRIES};
use crate::error::{Error, Result};
use crate::job::{self, Job, JobArgs};
use crate::queue::JobQueue;
use crate::secrets;
use crate::worker::JobExecutor;
use crate::KRANE_NETWORK;

/// Composes and executes deployment jobs.
pub struct Reconciler {
    store: Arc<dyn Store>,
    runtime: Arc<dyn Runtime>,
    queue: Arc<JobQueue>,
    /// Default run attempts per job, including the first.
    retry_policy: u32,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn Store>,
        runtime: Arc<dyn Runtime>,
        queue: Arc<JobQueue>,
        retry_policy: u32,
    ) -> Self {
        Self {
            store,
            runtime,
            queue,
            retry_policy,
        }
    }

    /// Deploy the stored config: pull, roll out a new generation, retire
    /// the old one.
    pub fn run(&self, name: &str) -> Result<String> {
        let config = DeploymentConfig::load(self.store.as_ref(), name)?;
        self.enqueue(Job::new(
            JobArgs::Run {
                config,
                containers_to_remove: Vec::new(),
            },
            self.retry_policy,
        ))
    }

    /// Remove the deployment's containers, collections, and config.
    pub fn delete(&self, name: &str) -> Result<String> {
        DeploymentConfig::load(self.store.as_ref(), name)?;
        self.enqueue(Job::new(
            JobArgs::Delete {
                deployment: name.to_string(),
            },
            self.retry_policy,
        ))
    }

    /// Start the deployment's existing containers.
    pub fn start(&self, name: &str) -> Result<String> {
        DeploymentConfig::load(self.store.as_ref(), name)?;
        self.enqueue(Job::new(
            JobArgs::Start {
                deployment: name.to_string(),
            },
            self.retry_policy,
        ))
    }

    /// Stop the deployment's existing containers.
    pub fn stop(&self, name: &str) -> Result<String> {
        DeploymentConfig::load(self.store.as_ref(), name)?;
        self.enqueue(Job::new(
            JobArgs::Stop {
                deployment: name.to_string(),
            },
            self.retry_policy,
        ))
    }

    /// Replace the deployment's containers with a fresh generation of the
    /// stored config, without re-pulling the image.
    pub fn restart(&self, name: &str) -> Result<String> {
        let config = DeploymentConfig::load(self.store.as_ref(), name)?;
        self.enqueue(Job::new(
            JobArgs::Restart {
                config,
                containers_to_remove: Vec::new(),
            },
            self.retry_policy,
        ))
    }

    /// Current containers of a deployment (precondition: config exists).
    pub async fn containers(&self, name: &str) -> Result<Vec<KraneContainer>> {
        DeploymentConfig::load(self.store.as_ref(), name)?;
        container::by_deployment(self.runtime.as_ref(), name).await
    }

    fn enqueue(&self, job: Job) -> Result<String> {
        let id = job.id.clone();
        let deployment = job.deployment.clone();
        let kind = job.kind;
        self.queue.enqueue(job)?;
        debug!(%deployment, job = %id, %kind, "job queued for processing");
        Ok(id)
    }

    /// Create, start, and health-check `scale` containers for the config.
    async fn roll_out(&self, config: &DeploymentConfig) -> Result<()> {
        let mut created = Vec::with_capacity(config.scale as usize);
        for _ in 0..config.scale {
            created.push(
                KraneContainer::create(self.runtime.as_ref(), self.store.as_ref(), config)
                    .await?,
            );
        }
        debug!(deployment = %config.name, count = created.len(), "containers created");

        for container in &created {
            container.start(self.runtime.as_ref()).await?;
        }
        debug!(deployment = %config.name, count = created.len(), "containers started");

        container::retriable_health_check(self.runtime.as_ref(), &created, HEALTH_CHECK_RETRIES)
            .await
    }

    /// Stop-then-remove a set of containers.
    async fn remove_all(&self, containers: &[KraneContainer]) -> Result<()> {
        for container in containers {
            container.remove(self.runtime.as_ref()).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl JobExecutor for Reconciler {
    async fn setup(&self, job: &mut Job) -> Result<()> {
        match &mut job.args {
            JobArgs::Run {
                config,
                containers_to_remove,
            } => {
                // First run creates the deployment's sibling collections.
                secrets::create_collection(self.store.as_ref(), &config.name)?;
                self.store.create_collection(&job::collection(&config.name))?;
                *containers_to_remove =
                    container::by_deployment(self.runtime.as_ref(), &config.name).await?;
                Ok(())
            }
            JobArgs::Restart {
                config,
                containers_to_remove,
            } => {
                *containers_to_remove =
                    container::by_deployment(self.runtime.as_ref(), &config.name).await?;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    async fn run(&self, job: &mut Job) -> Result<()> {
        match &job.args {
            JobArgs::Run { config, .. } => {
                self.runtime.ensure_network(KRANE_NETWORK).await?;
                self.runtime
                    .pull_image(config.registry.as_deref(), &config.image, &config.tag)
                    .await?;
                self.roll_out(config).await
            }
            JobArgs::Restart { config, .. } => self.roll_out(config).await,
            JobArgs::Delete { deployment } => {
                let containers =
                    container::by_deployment(self.runtime.as_ref(), deployment).await?;
                self.remove_all(&containers).await
            }
            JobArgs::Start { deployment } => {
                let containers =
                    container::by_deployment(self.runtime.as_ref(), deployment).await?;
                if containers.is_empty() {
                    return Err(Error::NoContainers(deployment.clone()));
                }
                for container in &containers {
                    container.start(self.runtime.as_ref()).await?;
                }
                Ok(())
            }
            JobArgs::Stop { deployment } => {
                let containers =
                    container::by_deployment(self.runtime.as_ref(), deployment).await?;
                if containers.is_empty() {
                    return Err(Error::NoContainers(deployment.clone()));
                }
                for container in &containers {
                    container.stop(self.runtime.as_ref()).await?;
                }
                Ok(())
            }
        }
    }

    async fn finalize(&self, job: &mut Job) -> Result<()> {
        match &job.args {
            // Retire the generation snapshotted during setup.
            JobArgs::Run {
                containers_to_remove,
                ..
            }
            | JobArgs::Restart {
                containers_to_remove,
                ..
            } => self.remove_all(containers_to_remove).await,

            // Teardown in dependency order: secrets, jobs, then the config
            // last and only once its dependents are gone. Each step is
            // attempted even if an earlier one failed.
            JobArgs::Delete { deployment } => {
                let mut first_err = None;
                if let Err(e) = secrets::delete_collection(self.store.as_ref(), deployment) {
                    error!(%deployment, error = %e, "failed to delete secrets collection");
                    first_err.get_or_insert(e);
                }
                if let Err(e) = self.store.delete_collection(&job::collection(deployment)) {
                    error!(%deployment, error = %e, "failed to delete jobs collection");
                    first_err.get_or_insert(Error::Store(e));
                }
                if first_err.is_none() {
                    if let Err(e) = DeploymentConfig::delete(self.store.as_ref(), deployment) {
                        error!(%deployment, error = %e, "failed to delete config");
                        first_err.get_or_insert(e);
                    }
                }
                match first_err {
                    None => Ok(()),
                    Some(e) => Err(e),
                }
            }

            JobArgs::Start { .. } | JobArgs::Stop { .. } => Ok(()),
        }
    }
}
