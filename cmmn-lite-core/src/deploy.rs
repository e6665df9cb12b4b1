//! Deployment: resource bundles in, versioned case definitions out.
//!
//! A deployment is a named batch of resources. The deployer parses every
//! resource with a case-model suffix, validates it, assigns versions per
//! (key, tenant), persists deployment and definitions in one command, and
//! hands back cache-ready (definition, model) pairs. Re-deploying unchanged
//! content reuses the persisted deployment instead of minting a new version.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::authoring::diagram::model_to_svg;
use crate::authoring::dto_to_model::dto_to_model;
use crate::authoring::validate::validate_dto;
use crate::authoring::yaml::parse_case_yaml;
use crate::error::CmmnError;
use crate::model::CaseModel;
use crate::store::CommandContext;
use crate::store_memory::MemoryDataManager;
use crate::types::{tenant_or_default, CaseDefinition, CaseDeployment};

// ─── Resource naming ──────────────────────────────────────────

/// Resource name suffixes the deployer parses as case models. Anything else
/// in the batch is carried along untouched.
pub const CMMN_RESOURCE_SUFFIXES: [&str; 2] = [".cmmn.yaml", ".cmmn.yml"];

pub fn is_cmmn_resource(name: &str) -> bool {
    CMMN_RESOURCE_SUFFIXES.iter().any(|s| name.ends_with(s))
}

/// `claims.cmmn.yaml` → `claims.svg`.
fn diagram_resource_name(resource_name: &str) -> String {
    for suffix in CMMN_RESOURCE_SUFFIXES {
        if let Some(stem) = resource_name.strip_suffix(suffix) {
            return format!("{stem}.svg");
        }
    }
    format!("{resource_name}.svg")
}

/// SHA-256 over the name-sorted resource list, names and contents
/// length-delimited. Computed when the builder finishes, before any diagram
/// resources are synthesized, so source bundles compare by source alone.
fn content_hash(resources: &BTreeMap<String, String>) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for (name, text) in resources {
        hasher.update((name.len() as u64).to_be_bytes());
        hasher.update(name.as_bytes());
        hasher.update((text.len() as u64).to_be_bytes());
        hasher.update(text.as_bytes());
    }
    hasher.finalize().into()
}

// ─── Builder and settings ─────────────────────────────────────

/// Per-deploy switches.
#[derive(Clone, Debug)]
pub struct DeploySettings {
    pub generate_diagrams: bool,
}

impl Default for DeploySettings {
    fn default() -> Self {
        Self {
            generate_diagrams: true,
        }
    }
}

/// Collects resources for one deployment batch.
#[derive(Clone, Debug, Default)]
pub struct DeploymentBuilder {
    name: String,
    tenant_id: Option<String>,
    resources: BTreeMap<String, String>,
    disable_diagrams: bool,
}

impl DeploymentBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn tenant_id(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn add_resource(mut self, name: impl Into<String>, text: impl Into<String>) -> Self {
        self.resources.insert(name.into(), text.into());
        self
    }

    /// Adds a resource from disk, named after the file.
    pub fn add_file(self, path: impl AsRef<Path>) -> Result<Self, CmmnError> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                CmmnError::IllegalArgument(format!(
                    "resource path '{}' has no usable file name",
                    path.display()
                ))
            })?
            .to_string();
        let text = std::fs::read_to_string(path).map_err(|e| {
            CmmnError::IllegalArgument(format!("cannot read resource '{}': {e}", path.display()))
        })?;
        Ok(self.add_resource(name, text))
    }

    pub fn disable_diagram_generation(mut self) -> Self {
        self.disable_diagrams = true;
        self
    }

    pub(crate) fn build(self) -> (CaseDeployment, DeploySettings) {
        let deployment = CaseDeployment {
            id: String::new(),
            name: self.name,
            tenant_id: tenant_or_default(self.tenant_id.as_deref()),
            content_hash: content_hash(&self.resources),
            resources: self.resources,
            definition_ids: Vec::new(),
            deploy_time: Utc::now(),
            is_new: true,
            deleted: false,
        };
        let settings = DeploySettings {
            generate_diagrams: !self.disable_diagrams,
        };
        (deployment, settings)
    }
}

// ─── Deployer ─────────────────────────────────────────────────

/// What the definition cache stores per definition id.
#[derive(Clone, Debug)]
pub struct CaseDefinitionCacheEntry {
    pub definition: CaseDefinition,
    pub model: CaseModel,
}

/// Result of one deploy: the persisted (or reused) deployment plus
/// cache-ready entries for every definition in it.
#[derive(Debug)]
pub struct DeployOutcome {
    pub deployment: CaseDeployment,
    pub entries: Vec<Arc<CaseDefinitionCacheEntry>>,
}

struct ParsedResource {
    definition: CaseDefinition,
    model: CaseModel,
}

#[derive(Clone)]
pub struct CmmnDeployer {
    deployments: MemoryDataManager<CaseDeployment>,
    definitions: MemoryDataManager<CaseDefinition>,
}

impl CmmnDeployer {
    pub fn new(
        deployments: MemoryDataManager<CaseDeployment>,
        definitions: MemoryDataManager<CaseDefinition>,
    ) -> Self {
        Self {
            deployments,
            definitions,
        }
    }

    /// Deploys one batch inside the caller's command.
    ///
    /// New deployments parse, version and persist; re-resolved deployments
    /// (`is_new == false`) parse but reuse the persisted definition records
    /// wholesale — ids and versions are never minted twice for the same
    /// content.
    pub fn deploy(
        &self,
        ctx: &CommandContext,
        deployment: CaseDeployment,
        settings: &DeploySettings,
    ) -> Result<DeployOutcome, CmmnError> {
        if deployment.is_new {
            if let Some(existing) = self.find_unchanged(&deployment) {
                info!(
                    deployment_id = %existing.id,
                    name = %existing.name,
                    "content unchanged, reusing existing deployment"
                );
                return self.deploy(ctx, existing, settings);
            }
        }
        let parsed = self.parse_resources(&deployment)?;
        if deployment.is_new {
            self.persist_new(ctx, deployment, parsed, settings)
        } else {
            self.resolve_existing(deployment, parsed)
        }
    }

    /// Latest persisted deployment with the same name and tenant, if its
    /// content hash matches the incoming one.
    fn find_unchanged(&self, deployment: &CaseDeployment) -> Option<CaseDeployment> {
        self.deployments
            .find_by(|d| d.name == deployment.name && d.tenant_id == deployment.tenant_id)
            .into_iter()
            .max_by_key(|d| (d.deploy_time, d.id.clone()))
            .filter(|latest| latest.content_hash == deployment.content_hash)
    }

    fn parse_resources(&self, deployment: &CaseDeployment) -> Result<Vec<ParsedResource>, CmmnError> {
        let mut parsed = Vec::new();
        let mut seen_keys = HashSet::new();
        for (name, text) in &deployment.resources {
            if !is_cmmn_resource(name) {
                continue;
            }
            let dto = parse_case_yaml(text).map_err(|e| CmmnError::ResourceParse {
                resource: name.clone(),
                message: e.to_string(),
            })?;
            let errors = validate_dto(&dto);
            if !errors.is_empty() {
                return Err(CmmnError::ModelValidation {
                    resource: name.clone(),
                    errors,
                });
            }
            let model = dto_to_model(&dto);
            if !seen_keys.insert(model.key.clone()) {
                return Err(CmmnError::DuplicateDefinitionKey {
                    key: model.key.clone(),
                });
            }
            let definition = CaseDefinition {
                id: String::new(),
                key: model.key.clone(),
                version: 0,
                name: model.name.clone(),
                deployment_id: String::new(),
                resource_name: name.clone(),
                diagram_resource_name: None,
                tenant_id: deployment.tenant_id.clone(),
                has_start_form_key: model.start_form_key.is_some(),
                has_graphical_notation: false,
                create_time: Utc::now(),
                deleted: false,
            };
            parsed.push(ParsedResource { definition, model });
        }
        Ok(parsed)
    }

    fn persist_new(
        &self,
        ctx: &CommandContext,
        deployment: CaseDeployment,
        parsed: Vec<ParsedResource>,
        settings: &DeploySettings,
    ) -> Result<DeployOutcome, CmmnError> {
        let mut deployment = self.deployments.insert(ctx, deployment)?;
        let mut entries = Vec::with_capacity(parsed.len());
        let mut definition_ids = Vec::with_capacity(parsed.len());
        for ParsedResource {
            mut definition,
            model,
        } in parsed
        {
            definition.deployment_id = deployment.id.clone();
            definition.version = self.next_version(&definition.key, &definition.tenant_id);
            if settings.generate_diagrams {
                self.attach_diagram(&mut deployment, &mut definition, &model)?;
            }
            let definition = self.definitions.insert(ctx, definition)?;
            definition_ids.push(definition.id.clone());
            entries.push(Arc::new(CaseDefinitionCacheEntry { definition, model }));
        }
        deployment.definition_ids = definition_ids;
        // Persisted record is no longer "new": later re-deploys of this
        // object must take the re-resolution path.
        deployment.is_new = false;
        let deployment = self.deployments.update(ctx, deployment)?;
        info!(
            deployment_id = %deployment.id,
            name = %deployment.name,
            definitions = entries.len(),
            "deployment persisted"
        );
        Ok(DeployOutcome {
            deployment,
            entries,
        })
    }

    /// Re-resolution path: the batch was persisted earlier, so every parsed
    /// model pairs with its stored definition record (same id, version and
    /// diagram flags).
    fn resolve_existing(
        &self,
        deployment: CaseDeployment,
        parsed: Vec<ParsedResource>,
    ) -> Result<DeployOutcome, CmmnError> {
        let persisted = self.definitions.find_by(|d| d.deployment_id == deployment.id);
        let mut entries = Vec::with_capacity(parsed.len());
        for ParsedResource {
            definition: draft,
            model,
        } in parsed
        {
            let stored = persisted
                .iter()
                .find(|d| d.key == draft.key)
                .cloned()
                .ok_or_else(|| {
                    CmmnError::not_found(
                        "case definition",
                        format!("key '{}' in deployment '{}'", draft.key, deployment.id),
                    )
                })?;
            entries.push(Arc::new(CaseDefinitionCacheEntry {
                definition: stored,
                model,
            }));
        }
        debug!(
            deployment_id = %deployment.id,
            definitions = entries.len(),
            "re-resolved deployment"
        );
        Ok(DeployOutcome {
            deployment,
            entries,
        })
    }

    fn next_version(&self, key: &str, tenant_id: &str) -> i32 {
        self.definitions
            .find_by(|d| d.key == key && d.tenant_id == tenant_id)
            .into_iter()
            .map(|d| d.version)
            .max()
            .unwrap_or(0)
            + 1
    }

    /// Best-effort diagram synthesis. Missing key or resource name is an
    /// error before generation even starts; a generation failure is logged
    /// and the deployment continues without graphical notation.
    fn attach_diagram(
        &self,
        deployment: &mut CaseDeployment,
        definition: &mut CaseDefinition,
        model: &CaseModel,
    ) -> Result<(), CmmnError> {
        if definition.key.is_empty() || definition.resource_name.is_empty() {
            return Err(CmmnError::IllegalArgument(
                "diagram generation needs a definition key and resource name".into(),
            ));
        }
        match model_to_svg(model) {
            Ok(svg) => {
                let name = diagram_resource_name(&definition.resource_name);
                deployment.resources.insert(name.clone(), svg);
                definition.diagram_resource_name = Some(name);
                definition.has_graphical_notation = true;
            }
            Err(e) => {
                warn!(
                    resource = %definition.resource_name,
                    error = %e,
                    "diagram generation failed, deploying without one"
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{CommandExecutor, IdGenerator, UuidV7IdGenerator};
    use crate::types::NO_TENANT_ID;

    const CLAIMS_YAML: &str = r#"
key: claims
name: Claims handling
plan_items:
  - kind: HumanTask
    id: review
    name: Review claim
"#;

    const CLAIMS_YAML_V2: &str = r#"
key: claims
name: Claims handling
plan_items:
  - kind: HumanTask
    id: review
    name: Review claim
  - kind: HumanTask
    id: approve
    name: Approve claim
"#;

    const ONBOARDING_YAML: &str = r#"
key: onboarding
plan_items:
  - kind: Milestone
    id: accountReady
"#;

    fn deployer() -> CmmnDeployer {
        let ids: Arc<dyn IdGenerator> = Arc::new(UuidV7IdGenerator);
        CmmnDeployer::new(
            MemoryDataManager::new("case deployment", ids.clone()),
            MemoryDataManager::new("case definition", ids),
        )
    }

    fn deploy_yaml(deployer: &CmmnDeployer, resource: &str, yaml: &str) -> DeployOutcome {
        let (deployment, settings) = DeploymentBuilder::new("test-app")
            .add_resource(resource, yaml)
            .build();
        CommandExecutor::new()
            .execute(|ctx| deployer.deploy(ctx, deployment, &settings))
            .unwrap()
    }

    /// T-DEP-1: only the two known suffixes are parsed as case models.
    #[test]
    fn t_dep_1_resource_suffixes() {
        assert!(is_cmmn_resource("claims.cmmn.yaml"));
        assert!(is_cmmn_resource("claims.cmmn.yml"));
        assert!(!is_cmmn_resource("claims.yaml"));
        assert!(!is_cmmn_resource("claims.cmmn"));
        assert!(!is_cmmn_resource("claims.svg"));
        assert_eq!(diagram_resource_name("claims.cmmn.yaml"), "claims.svg");
    }

    /// T-DEP-2: the content hash ignores insertion order and reacts to any
    /// content change.
    #[test]
    fn t_dep_2_content_hash() {
        let a = DeploymentBuilder::new("app")
            .add_resource("a.cmmn.yaml", "one")
            .add_resource("b.cmmn.yaml", "two")
            .build()
            .0;
        let b = DeploymentBuilder::new("app")
            .add_resource("b.cmmn.yaml", "two")
            .add_resource("a.cmmn.yaml", "one")
            .build()
            .0;
        assert_eq!(a.content_hash, b.content_hash);

        let c = DeploymentBuilder::new("app")
            .add_resource("a.cmmn.yaml", "one!")
            .add_resource("b.cmmn.yaml", "two")
            .build()
            .0;
        assert_ne!(a.content_hash, c.content_hash);
    }

    /// T-DEP-3: versions count up per key and tenant, starting at 1.
    #[test]
    fn t_dep_3_version_assignment() {
        let d = deployer();
        let v1 = deploy_yaml(&d, "claims.cmmn.yaml", CLAIMS_YAML);
        assert_eq!(v1.entries[0].definition.version, 1);

        let v2 = deploy_yaml(&d, "claims.cmmn.yaml", CLAIMS_YAML_V2);
        assert_eq!(v2.entries[0].definition.version, 2);
        assert_ne!(v1.entries[0].definition.id, v2.entries[0].definition.id);

        // A different key starts its own sequence.
        let other = deploy_yaml(&d, "onboarding.cmmn.yaml", ONBOARDING_YAML);
        assert_eq!(other.entries[0].definition.version, 1);
    }

    /// T-DEP-4: duplicate keys in one batch are fatal and nothing persists.
    #[test]
    fn t_dep_4_duplicate_key_fatal() {
        let d = deployer();
        let (deployment, settings) = DeploymentBuilder::new("dupes")
            .add_resource("a.cmmn.yaml", CLAIMS_YAML)
            .add_resource("b.cmmn.yaml", CLAIMS_YAML_V2)
            .build();
        let err = CommandExecutor::new()
            .execute(|ctx| d.deploy(ctx, deployment, &settings))
            .unwrap_err();
        match err {
            CmmnError::DuplicateDefinitionKey { key } => assert_eq!(key, "claims"),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(d.deployments.count(), 0);
        assert_eq!(d.definitions.count(), 0);
    }

    /// T-DEP-5: deploying byte-identical content twice reuses the first
    /// deployment — no new deployment, no new versions.
    #[test]
    fn t_dep_5_unchanged_content_reuses_deployment() {
        let d = deployer();
        let first = deploy_yaml(&d, "claims.cmmn.yaml", CLAIMS_YAML);
        let second = deploy_yaml(&d, "claims.cmmn.yaml", CLAIMS_YAML);

        assert_eq!(first.deployment.id, second.deployment.id);
        assert_eq!(
            first.entries[0].definition.id,
            second.entries[0].definition.id
        );
        assert_eq!(second.entries[0].definition.version, 1);
        assert_eq!(d.deployments.count(), 1);
        assert_eq!(d.definitions.count(), 1);
    }

    /// T-DEP-6: a parse failure names the resource; a validation failure
    /// carries the rule violations.
    #[test]
    fn t_dep_6_parse_and_validation_failures() {
        let d = deployer();
        let (deployment, settings) = DeploymentBuilder::new("broken")
            .add_resource("bad.cmmn.yaml", "key: [unclosed")
            .build();
        let err = CommandExecutor::new()
            .execute(|ctx| d.deploy(ctx, deployment, &settings))
            .unwrap_err();
        match err {
            CmmnError::ResourceParse { resource, .. } => assert_eq!(resource, "bad.cmmn.yaml"),
            other => panic!("unexpected error: {other}"),
        }

        // Self-referencing sentry trips validation.
        let invalid = r#"
key: loopy
plan_items:
  - kind: HumanTask
    id: a
    entry:
      - on:
          - plan_item: a
"#;
        let (deployment, settings) = DeploymentBuilder::new("broken")
            .add_resource("loopy.cmmn.yaml", invalid)
            .build();
        let err = CommandExecutor::new()
            .execute(|ctx| d.deploy(ctx, deployment, &settings))
            .unwrap_err();
        assert!(matches!(err, CmmnError::ModelValidation { .. }));
        assert_eq!(d.deployments.count(), 0);
    }

    /// T-DEP-7: diagrams are synthesized by default and attached to both the
    /// deployment resources and the definition; disabling skips all of it.
    #[test]
    fn t_dep_7_diagram_generation_toggle() {
        let d = deployer();
        let outcome = deploy_yaml(&d, "claims.cmmn.yaml", CLAIMS_YAML);
        let definition = &outcome.entries[0].definition;
        assert!(definition.has_graphical_notation);
        assert_eq!(definition.diagram_resource_name.as_deref(), Some("claims.svg"));
        assert!(outcome.deployment.resources.contains_key("claims.svg"));

        let (deployment, settings) = DeploymentBuilder::new("plain")
            .add_resource("onboarding.cmmn.yaml", ONBOARDING_YAML)
            .disable_diagram_generation()
            .build();
        let outcome = CommandExecutor::new()
            .execute(|ctx| d.deploy(ctx, deployment, &settings))
            .unwrap();
        let definition = &outcome.entries[0].definition;
        assert!(!definition.has_graphical_notation);
        assert!(definition.diagram_resource_name.is_none());
        assert!(!outcome.deployment.resources.contains_key("onboarding.svg"));
    }

    /// T-DEP-8: the deployment tenant lands on every definition; absent
    /// tenant collapses onto the sentinel.
    #[test]
    fn t_dep_8_tenant_propagation() {
        let d = deployer();
        let (deployment, settings) = DeploymentBuilder::new("tenanted")
            .tenant_id("acme")
            .add_resource("claims.cmmn.yaml", CLAIMS_YAML)
            .build();
        let outcome = CommandExecutor::new()
            .execute(|ctx| d.deploy(ctx, deployment, &settings))
            .unwrap();
        assert_eq!(outcome.deployment.tenant_id, "acme");
        assert_eq!(outcome.entries[0].definition.tenant_id, "acme");

        let plain = deploy_yaml(&d, "onboarding.cmmn.yaml", ONBOARDING_YAML);
        assert_eq!(plain.deployment.tenant_id, NO_TENANT_ID);
        assert_eq!(plain.entries[0].definition.tenant_id, NO_TENANT_ID);

        // Same key under different tenants versions independently.
        let (deployment, settings) = DeploymentBuilder::new("tenanted-2")
            .tenant_id("globex")
            .add_resource("claims.cmmn.yaml", CLAIMS_YAML)
            .build();
        let globex = CommandExecutor::new()
            .execute(|ctx| d.deploy(ctx, deployment, &settings))
            .unwrap();
        assert_eq!(globex.entries[0].definition.version, 1);
    }

    /// T-DEP-9: re-resolving a persisted deployment copies ids, versions and
    /// diagram flags instead of minting new records.
    #[test]
    fn t_dep_9_reresolve_copies_persisted_records() {
        let d = deployer();
        let first = deploy_yaml(&d, "claims.cmmn.yaml", CLAIMS_YAML);
        let persisted = first.deployment.clone();
        assert!(!persisted.is_new);

        let outcome = CommandExecutor::new()
            .execute(|ctx| d.deploy(ctx, persisted, &DeploySettings::default()))
            .unwrap();
        assert_eq!(outcome.deployment.id, first.deployment.id);
        let redone = &outcome.entries[0].definition;
        let original = &first.entries[0].definition;
        assert_eq!(redone.id, original.id);
        assert_eq!(redone.version, original.version);
        assert_eq!(redone.diagram_resource_name, original.diagram_resource_name);
        assert_eq!(d.definitions.count(), 1);
    }
}
