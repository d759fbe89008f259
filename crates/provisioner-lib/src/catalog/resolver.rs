//! Allow-policy resolution over catalog and preference snapshots
//!
//! `CatalogResolver` owns the current snapshots and swaps them atomically on
//! refresh. Queries run against a `ResolverView`, which pins one catalog
//! generation and one preference set for as long as the caller holds it.

use super::pattern::AllowList;
use super::preferences::{scope_chain, PolicyDimension, PreferenceScope, PreferenceSnapshot};
use super::snapshot::CatalogSnapshot;
use crate::error::{ProvisionError, Result};
use crate::models::{InstanceOffering, PriceModel};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info};

/// Resolved allow decision for one (tool, region) context
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AllowPolicy {
    pub region: String,
    /// General instance-type list; empty when nothing resolved
    pub instance_types: AllowList,
    pub instance_types_scope: Option<PreferenceScope>,
    /// Tool-scoped list; `None` when no docker-level value applies
    pub docker_instance_types: Option<AllowList>,
    pub docker_instance_types_scope: Option<PreferenceScope>,
    pub price_types: BTreeSet<PriceModel>,
    pub price_types_scope: Option<PreferenceScope>,
}

impl AllowPolicy {
    /// Both instance-type dimensions must admit the type
    pub fn admits_instance(&self, instance_type: &str) -> bool {
        self.instance_types.matches(instance_type)
            && self
                .docker_instance_types
                .as_ref()
                .map_or(true, |docker| docker.matches(instance_type))
    }

    pub fn admits_price_model(&self, price_model: PriceModel) -> bool {
        self.price_types.contains(&price_model)
    }
}

/// Allowed instance and price types for management callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AllowedInstanceTypes {
    pub region: String,
    pub catalog_generation: u64,
    pub instance_types: Vec<String>,
    pub docker_instance_types: Vec<String>,
    pub price_types: Vec<PriceModel>,
}

/// Pinned catalog and preference snapshots
#[derive(Debug, Clone)]
pub struct ResolverView {
    catalog: Arc<CatalogSnapshot>,
    preferences: Arc<PreferenceSnapshot>,
    default_region: Arc<str>,
}

impl ResolverView {
    pub fn new(
        catalog: Arc<CatalogSnapshot>,
        preferences: Arc<PreferenceSnapshot>,
        default_region: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            catalog,
            preferences,
            default_region: default_region.into(),
        }
    }

    pub fn catalog(&self) -> &CatalogSnapshot {
        &self.catalog
    }

    pub fn preferences(&self) -> &PreferenceSnapshot {
        &self.preferences
    }

    pub fn default_region(&self) -> &str {
        &self.default_region
    }

    /// Requested region, or the platform default when absent
    pub fn resolve_region<'a>(&'a self, region_id: Option<&'a str>) -> &'a str {
        region_id
            .filter(|r| !r.trim().is_empty())
            .unwrap_or(self.default_region.as_ref())
    }

    /// Resolve every policy dimension for a context
    pub fn resolve_policy(&self, tool_id: Option<&str>, region_id: Option<&str>) -> AllowPolicy {
        let region = self.resolve_region(region_id);
        let general_chain = scope_chain(None, region);

        let (instance_types_scope, instance_types) = match self
            .preferences
            .resolve_patterns(PolicyDimension::InstanceTypes, &general_chain)
        {
            Some((scope, list)) => (Some(scope), list),
            None => (None, AllowList::default()),
        };

        let (docker_instance_types_scope, docker_instance_types) = match tool_id {
            Some(tool) => {
                let tool_chain = scope_chain(Some(tool), region);
                match self
                    .preferences
                    .resolve_patterns(PolicyDimension::DockerInstanceTypes, &tool_chain)
                {
                    Some((scope, list)) => (Some(scope), Some(list)),
                    None => (None, None),
                }
            }
            None => (None, None),
        };

        let price_chain = scope_chain(tool_id, region);
        let (price_types_scope, price_types) =
            match self.preferences.resolve_price_models(&price_chain) {
                Some((scope, models)) => (Some(scope), models),
                None => (None, BTreeSet::new()),
            };

        AllowPolicy {
            region: region.to_string(),
            instance_types,
            instance_types_scope,
            docker_instance_types,
            docker_instance_types_scope,
            price_types,
            price_types_scope,
        }
    }

    /// Classified instance check: catalog first, then policy
    pub fn check_instance(
        &self,
        instance_type: &str,
        region_id: Option<&str>,
        tool_id: Option<&str>,
    ) -> Result<()> {
        let region = self.resolve_region(region_id);
        if !self.catalog.contains(region, instance_type) {
            return Err(ProvisionError::CatalogMiss {
                instance_type: instance_type.to_string(),
                region: region.to_string(),
            });
        }

        let policy = self.resolve_policy(tool_id, Some(region));
        if !policy.instance_types.matches(instance_type) {
            return Err(ProvisionError::PolicyDenied {
                instance_type: instance_type.to_string(),
                reason: format!("not in instance type allow-list '{}'", policy.instance_types),
            });
        }
        if let Some(docker) = &policy.docker_instance_types {
            if !docker.matches(instance_type) {
                return Err(ProvisionError::PolicyDenied {
                    instance_type: instance_type.to_string(),
                    reason: format!("not in tool allow-list '{}'", docker),
                });
            }
        }

        Ok(())
    }

    /// True iff the type is in the catalog for the region and admitted by policy
    pub fn is_instance_allowed(
        &self,
        instance_type: &str,
        region_id: Option<&str>,
        tool_id: Option<&str>,
    ) -> bool {
        self.check_instance(instance_type, region_id, tool_id).is_ok()
    }

    pub fn is_price_type_allowed(
        &self,
        price_model: PriceModel,
        tool_id: Option<&str>,
        region_id: Option<&str>,
    ) -> bool {
        let region = self.resolve_region(region_id);
        self.preferences
            .resolve_price_models(&scope_chain(tool_id, region))
            .is_some_and(|(_, models)| models.contains(&price_model))
    }

    /// Snapshot of what a (tool, region) context may request
    pub fn allowed_instance_and_price_types(
        &self,
        tool_id: Option<&str>,
        region_id: Option<&str>,
        return_all: bool,
    ) -> AllowedInstanceTypes {
        let policy = self.resolve_policy(tool_id, region_id);
        let catalog_types = self.catalog.instance_types(&policy.region);

        let (instance_types, docker_instance_types) = if return_all {
            let all: Vec<String> = catalog_types.iter().map(|t| t.to_string()).collect();
            (all.clone(), all)
        } else {
            let general: Vec<String> = catalog_types
                .iter()
                .filter(|t| policy.instance_types.matches(t))
                .map(|t| t.to_string())
                .collect();
            let docker: Vec<String> = general
                .iter()
                .filter(|t| policy.admits_instance(t))
                .cloned()
                .collect();
            (general, docker)
        };

        AllowedInstanceTypes {
            region: policy.region,
            catalog_generation: self.catalog.generation(),
            instance_types,
            docker_instance_types,
            price_types: policy.price_types.into_iter().collect(),
        }
    }

    /// Catalog row for a resolved type, preferring the requested price model
    pub fn offering(
        &self,
        instance_type: &str,
        region_id: Option<&str>,
        price_model: PriceModel,
    ) -> Option<&InstanceOffering> {
        let region = self.resolve_region(region_id);
        self.catalog.offering(region, instance_type, price_model)
    }
}

/// Owner of the current catalog and preference snapshots
pub struct CatalogResolver {
    catalog: RwLock<Arc<CatalogSnapshot>>,
    preferences: RwLock<Arc<PreferenceSnapshot>>,
    default_region: Arc<str>,
    generation: AtomicU64,
}

impl CatalogResolver {
    /// Create a resolver with an empty catalog and platform-default preferences
    pub fn new(default_region: impl Into<String>) -> Self {
        let default_region: String = default_region.into();
        Self {
            catalog: RwLock::new(Arc::new(CatalogSnapshot::empty())),
            preferences: RwLock::new(Arc::new(PreferenceSnapshot::default())),
            default_region: Arc::from(default_region),
            generation: AtomicU64::new(0),
        }
    }

    pub fn with_preferences(self, preferences: PreferenceSnapshot) -> Self {
        self.refresh_preferences(preferences);
        self
    }

    pub fn default_region(&self) -> &str {
        &self.default_region
    }

    /// Replace the whole catalog; returns the new generation
    pub fn refresh_catalog(&self, offerings: Vec<InstanceOffering>) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let snapshot = Arc::new(CatalogSnapshot::build(generation, offerings));

        info!(
            generation = generation,
            offerings = snapshot.len(),
            regions = snapshot.regions().len(),
            fingerprint = %snapshot.fingerprint(),
            "Instance catalog refreshed"
        );

        let mut current = self.catalog.write().unwrap_or_else(PoisonError::into_inner);
        *current = snapshot;
        generation
    }

    /// Replace all allow-list preferences
    pub fn refresh_preferences(&self, preferences: PreferenceSnapshot) {
        debug!(
            regions = preferences.regions.len(),
            tools = preferences.tools.len(),
            "Allow-list preferences refreshed"
        );
        let mut current = self
            .preferences
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *current = Arc::new(preferences);
    }

    /// Pin the current snapshots
    pub fn view(&self) -> ResolverView {
        let catalog = self
            .catalog
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let preferences = self
            .preferences
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        ResolverView::new(catalog, preferences, self.default_region.clone())
    }

    pub fn is_instance_allowed(
        &self,
        instance_type: &str,
        region_id: Option<&str>,
        tool_id: Option<&str>,
    ) -> bool {
        self.view()
            .is_instance_allowed(instance_type, region_id, tool_id)
    }

    pub fn is_price_type_allowed(
        &self,
        price_model: PriceModel,
        tool_id: Option<&str>,
        region_id: Option<&str>,
    ) -> bool {
        self.view()
            .is_price_type_allowed(price_model, tool_id, region_id)
    }

    pub fn allowed_instance_and_price_types(
        &self,
        tool_id: Option<&str>,
        region_id: Option<&str>,
        return_all: bool,
    ) -> AllowedInstanceTypes {
        self.view()
            .allowed_instance_and_price_types(tool_id, region_id, return_all)
    }
}
