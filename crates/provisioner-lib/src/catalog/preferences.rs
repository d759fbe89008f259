//! Scoped allow-list preferences
//!
//! Preferences are kept per scope (tool within a region, tool, region,
//! global). A lookup walks the scope chain from most to least specific and
//! the first non-empty value wins; values are never merged across scopes.

use super::pattern::AllowList;
use crate::models::PriceModel;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::warn;

/// Independent policy dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyDimension {
    /// Instance types allowed for any run
    InstanceTypes,
    /// Instance types allowed for runs of a particular docker tool
    DockerInstanceTypes,
    /// Allowed price models
    PriceTypes,
}

/// Preference values attached to one scope
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopePreferences {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_types: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker_instance_types: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_types: Option<String>,
}

impl ScopePreferences {
    /// Values shipped with the platform
    pub fn platform_default() -> Self {
        Self {
            instance_types: Some("*".to_string()),
            docker_instance_types: None,
            price_types: Some("spot,on_demand".to_string()),
        }
    }

    /// Non-blank value for a dimension
    pub fn get(&self, dimension: PolicyDimension) -> Option<&str> {
        let value = match dimension {
            PolicyDimension::InstanceTypes => self.instance_types.as_deref(),
            PolicyDimension::DockerInstanceTypes => self.docker_instance_types.as_deref(),
            PolicyDimension::PriceTypes => self.price_types.as_deref(),
        };
        value.filter(|v| !v.trim().is_empty())
    }
}

/// Tool-level preferences with optional per-region overrides
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolPreferences {
    #[serde(flatten)]
    pub defaults: ScopePreferences,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub regions: BTreeMap<String, ScopePreferences>,
}

/// One step in the scope chain
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum PreferenceScope {
    ToolRegion { tool: String, region: String },
    Tool { tool: String },
    Region { region: String },
    Global,
}

impl fmt::Display for PreferenceScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PreferenceScope::ToolRegion { tool, region } => write!(f, "tool:{}@{}", tool, region),
            PreferenceScope::Tool { tool } => write!(f, "tool:{}", tool),
            PreferenceScope::Region { region } => write!(f, "region:{}", region),
            PreferenceScope::Global => f.write_str("global"),
        }
    }
}

/// Ordered scopes to try, most specific first
pub fn scope_chain(tool_id: Option<&str>, region: &str) -> Vec<PreferenceScope> {
    let mut chain = Vec::with_capacity(4);
    if let Some(tool) = tool_id {
        chain.push(PreferenceScope::ToolRegion {
            tool: tool.to_string(),
            region: region.to_string(),
        });
        chain.push(PreferenceScope::Tool {
            tool: tool.to_string(),
        });
    }
    chain.push(PreferenceScope::Region {
        region: region.to_string(),
    });
    chain.push(PreferenceScope::Global);
    chain
}

/// A preference value together with the scope it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPreference<'a> {
    pub scope: PreferenceScope,
    pub value: &'a str,
}

/// Immutable set of all scoped preferences
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferenceSnapshot {
    #[serde(default = "ScopePreferences::platform_default")]
    pub global: ScopePreferences,
    #[serde(default)]
    pub regions: BTreeMap<String, ScopePreferences>,
    #[serde(default)]
    pub tools: BTreeMap<String, ToolPreferences>,
}

impl Default for PreferenceSnapshot {
    fn default() -> Self {
        Self {
            global: ScopePreferences::platform_default(),
            regions: BTreeMap::new(),
            tools: BTreeMap::new(),
        }
    }
}

impl PreferenceSnapshot {
    /// Value stored directly at a scope, without fallback
    pub fn lookup(&self, scope: &PreferenceScope, dimension: PolicyDimension) -> Option<&str> {
        match scope {
            PreferenceScope::ToolRegion { tool, region } => self
                .tools
                .get(tool)
                .and_then(|t| t.regions.get(region))
                .and_then(|p| p.get(dimension)),
            PreferenceScope::Tool { tool } => {
                self.tools.get(tool).and_then(|t| t.defaults.get(dimension))
            }
            PreferenceScope::Region { region } => {
                self.regions.get(region).and_then(|p| p.get(dimension))
            }
            PreferenceScope::Global => self.global.get(dimension),
        }
    }

    /// First non-empty value along the chain
    pub fn resolve(
        &self,
        dimension: PolicyDimension,
        chain: &[PreferenceScope],
    ) -> Option<ResolvedPreference<'_>> {
        chain.iter().find_map(|scope| {
            self.lookup(scope, dimension).map(|value| ResolvedPreference {
                scope: scope.clone(),
                value,
            })
        })
    }

    /// Resolve an instance-type dimension into a pattern list
    pub fn resolve_patterns(
        &self,
        dimension: PolicyDimension,
        chain: &[PreferenceScope],
    ) -> Option<(PreferenceScope, AllowList)> {
        self.resolve(dimension, chain)
            .map(|resolved| (resolved.scope, AllowList::parse(resolved.value)))
    }

    /// Resolve the price-type dimension into a set of price models
    pub fn resolve_price_models(
        &self,
        chain: &[PreferenceScope],
    ) -> Option<(PreferenceScope, BTreeSet<PriceModel>)> {
        self.resolve(PolicyDimension::PriceTypes, chain)
            .map(|resolved| (resolved.scope, parse_price_models(resolved.value)))
    }
}

/// Parse `"spot,on_demand"`; `*` admits every model, unknown tokens are ignored
pub fn parse_price_models(raw: &str) -> BTreeSet<PriceModel> {
    let mut models = BTreeSet::new();
    for token in raw.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        if token == "*" {
            models.insert(PriceModel::Spot);
            models.insert(PriceModel::OnDemand);
            continue;
        }
        match token.parse::<PriceModel>() {
            Ok(model) => {
                models.insert(model);
            }
            Err(e) => warn!(token = %token, error = %e, "Ignoring unknown price type"),
        }
    }
    models
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> PreferenceSnapshot {
        let mut prefs = PreferenceSnapshot::default();
        prefs.regions.insert(
            "eu-west-1".into(),
            ScopePreferences {
                instance_types: Some("m5.*".into()),
                ..Default::default()
            },
        );
        let mut tool = ToolPreferences {
            defaults: ScopePreferences {
                docker_instance_types: Some("c5.*".into()),
                price_types: Some("on_demand".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        tool.regions.insert(
            "eu-west-1".into(),
            ScopePreferences {
                docker_instance_types: Some("c5.xlarge".into()),
                ..Default::default()
            },
        );
        prefs.tools.insert("42".into(), tool);
        prefs
    }

    #[test]
    fn test_scope_chain_order() {
        let chain = scope_chain(Some("42"), "us-east-1");
        assert_eq!(chain.len(), 4);
        assert!(matches!(chain[0], PreferenceScope::ToolRegion { .. }));
        assert_eq!(chain[3], PreferenceScope::Global);

        assert_eq!(scope_chain(None, "us-east-1").len(), 2);
    }

    #[test]
    fn test_most_specific_scope_wins() {
        let prefs = snapshot();
        let chain = scope_chain(Some("42"), "eu-west-1");

        let resolved = prefs
            .resolve(PolicyDimension::DockerInstanceTypes, &chain)
            .unwrap();
        assert_eq!(resolved.value, "c5.xlarge");

        let resolved = prefs
            .resolve(PolicyDimension::InstanceTypes, &chain)
            .unwrap();
        assert_eq!(resolved.value, "m5.*");
        assert_eq!(
            resolved.scope,
            PreferenceScope::Region {
                region: "eu-west-1".into()
            }
        );
    }

    #[test]
    fn test_falls_through_to_global() {
        let prefs = snapshot();
        let chain = scope_chain(None, "us-east-1");
        let resolved = prefs
            .resolve(PolicyDimension::InstanceTypes, &chain)
            .unwrap();
        assert_eq!(resolved.scope, PreferenceScope::Global);
        assert_eq!(resolved.value, "*");
    }

    #[test]
    fn test_blank_value_is_skipped() {
        let mut prefs = snapshot();
        prefs.regions.insert(
            "us-west-2".into(),
            ScopePreferences {
                instance_types: Some("   ".into()),
                ..Default::default()
            },
        );
        let chain = scope_chain(None, "us-west-2");
        let resolved = prefs
            .resolve(PolicyDimension::InstanceTypes, &chain)
            .unwrap();
        assert_eq!(resolved.scope, PreferenceScope::Global);
    }

    #[test]
    fn test_parse_price_models() {
        let models = parse_price_models("SPOT, on-demand");
        assert_eq!(models.len(), 2);

        let models = parse_price_models("on_demand,reserved");
        assert_eq!(models.len(), 1);
        assert!(models.contains(&PriceModel::OnDemand));

        assert_eq!(parse_price_models("*").len(), 2);
        assert!(parse_price_models("").is_empty());
    }

    #[test]
    fn test_snapshot_json_defaults_global() {
        let prefs: PreferenceSnapshot =
            serde_json::from_str(r#"{"regions": {"us-east-1": {"instanceTypes": "m4.*"}}}"#)
                .unwrap();
        assert_eq!(prefs.global, ScopePreferences::platform_default());
        assert_eq!(
            prefs.lookup(
                &PreferenceScope::Region {
                    region: "us-east-1".into()
                },
                PolicyDimension::InstanceTypes
            ),
            Some("m4.*")
        );
    }

    #[test]
    fn test_tool_json_flattened() {
        let prefs: PreferenceSnapshot = serde_json::from_str(
            r#"{"tools": {"7": {"dockerInstanceTypes": "g4dn.*", "regions": {"us-east-1": {"priceTypes": "spot"}}}}}"#,
        )
        .unwrap();
        let tool = &prefs.tools["7"];
        assert_eq!(tool.defaults.docker_instance_types.as_deref(), Some("g4dn.*"));
        assert_eq!(
            tool.regions["us-east-1"].price_types.as_deref(),
            Some("spot")
        );
    }
}
