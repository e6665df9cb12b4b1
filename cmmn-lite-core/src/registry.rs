//! Definition cache and deployment management.
//!
//! The registry sits between the deployer and the runtime: it runs deploys,
//! keeps a (definition id → definition + model) cache, and answers the two
//! lookups the runtime needs — by id and latest-by-key. Cache reads and
//! cache-filling loads are separate operations: `lookup` never writes,
//! `ensure_loaded` is the one that may re-deploy.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, info};

use crate::deploy::{CaseDefinitionCacheEntry, CmmnDeployer, DeployOutcome, DeploySettings};
use crate::error::CmmnError;
use crate::store::CommandContext;
use crate::store_memory::MemoryDataManager;
use crate::types::{tenant_or_default, CaseDefinition, CaseDeployment};

pub struct DefinitionRegistry {
    cache: RwLock<HashMap<String, Arc<CaseDefinitionCacheEntry>>>,
    deployer: CmmnDeployer,
    deployments: MemoryDataManager<CaseDeployment>,
    definitions: MemoryDataManager<CaseDefinition>,
}

impl DefinitionRegistry {
    pub fn new(
        deployer: CmmnDeployer,
        deployments: MemoryDataManager<CaseDeployment>,
        definitions: MemoryDataManager<CaseDefinition>,
    ) -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
            deployer,
            deployments,
            definitions,
        }
    }

    /// Runs the deployer and caches everything it produced.
    pub fn deploy(
        &self,
        ctx: &CommandContext,
        deployment: CaseDeployment,
        settings: &DeploySettings,
    ) -> Result<DeployOutcome, CmmnError> {
        let outcome = self.deployer.deploy(ctx, deployment, settings)?;
        self.populate(&outcome.entries);
        Ok(outcome)
    }

    /// Pure cache read. Never loads, never deploys.
    pub fn lookup(&self, definition_id: &str) -> Option<Arc<CaseDefinitionCacheEntry>> {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(definition_id)
            .cloned()
    }

    /// Cache read that repopulates on a miss.
    ///
    /// A miss loads the persisted definition (`ObjectNotFound` when there is
    /// none) and re-deploys its deployment with `is_new = false` to rebuild
    /// the cache entries. If the entry is still missing afterwards the store
    /// and cache disagree about what that deployment contains, which is an
    /// internal consistency failure, not a plain miss.
    pub fn ensure_loaded(
        &self,
        ctx: &CommandContext,
        definition_id: &str,
    ) -> Result<Arc<CaseDefinitionCacheEntry>, CmmnError> {
        if let Some(entry) = self.lookup(definition_id) {
            return Ok(entry);
        }
        let definition = self.definitions.get_by_id(ctx, definition_id)?;
        if definition.deployment_id.is_empty() {
            return Err(CmmnError::IllegalState(format!(
                "case definition '{definition_id}' has no deployment id to load from"
            )));
        }
        let mut deployment = self.deployments.get_by_id(ctx, &definition.deployment_id)?;
        deployment.is_new = false;
        debug!(
            definition_id = %definition_id,
            deployment_id = %deployment.id,
            "definition cache miss, re-deploying"
        );
        self.deploy(ctx, deployment, &DeploySettings::default())?;
        self.lookup(definition_id).ok_or_else(|| {
            CmmnError::IllegalState(format!(
                "deployment '{}' did not load case definition '{definition_id}' into the cache",
                definition.deployment_id
            ))
        })
    }

    /// Highest version for a key within one tenant (`None` and the empty
    /// tenant are the same bucket).
    pub fn find_latest_by_key(
        &self,
        key: &str,
        tenant_id: Option<&str>,
    ) -> Result<CaseDefinition, CmmnError> {
        let tenant = tenant_or_default(tenant_id);
        self.definitions
            .find_by(|d| d.key == key && d.tenant_id == tenant)
            .into_iter()
            .max_by_key(|d| d.version)
            .ok_or_else(|| {
                CmmnError::not_found("case definition", format!("key '{key}' (tenant '{tenant}')"))
            })
    }

    pub fn evict_definition(&self, definition_id: &str) {
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(definition_id);
    }

    /// Drops every cache entry belonging to a deployment. The persisted
    /// records stay; the next `ensure_loaded` rebuilds the entries.
    pub fn evict_deployment(&self, deployment_id: &str) {
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|_, entry| entry.definition.deployment_id != deployment_id);
    }

    /// Deletes a deployment and cascades: its definitions go from the store,
    /// its entries from the cache.
    pub fn remove_deployment(
        &self,
        ctx: &CommandContext,
        deployment_id: &str,
    ) -> Result<(), CmmnError> {
        let deployment = self.deployments.get_by_id(ctx, deployment_id)?;
        for definition in self.definitions.find_by(|d| d.deployment_id == deployment.id) {
            self.definitions.delete(ctx, &definition.id)?;
        }
        self.deployments.delete(ctx, deployment_id)?;
        self.evict_deployment(deployment_id);
        info!(deployment_id = %deployment_id, "deployment removed");
        Ok(())
    }

    fn populate(&self, entries: &[Arc<CaseDefinitionCacheEntry>]) {
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        for entry in entries {
            cache.insert(entry.definition.id.clone(), entry.clone());
        }
    }
}
