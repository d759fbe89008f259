//! Immutable instance catalog snapshot

use crate::models::{InstanceOffering, PriceModel};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};

/// One generation of the instance catalog, indexed by region and type
#[derive(Debug, Clone, Default)]
pub struct CatalogSnapshot {
    generation: u64,
    fingerprint: String,
    offerings: Vec<InstanceOffering>,
    /// region -> instance type -> indices into `offerings`
    index: HashMap<String, BTreeMap<String, Vec<usize>>>,
}

impl CatalogSnapshot {
    /// Empty catalog; every instance lookup misses
    pub fn empty() -> Self {
        Self::build(0, Vec::new())
    }

    /// Index a full set of offerings
    pub fn build(generation: u64, offerings: Vec<InstanceOffering>) -> Self {
        let mut index: HashMap<String, BTreeMap<String, Vec<usize>>> = HashMap::new();
        for (i, offering) in offerings.iter().enumerate() {
            index
                .entry(offering.region.clone())
                .or_default()
                .entry(offering.instance_type.clone())
                .or_default()
                .push(i);
        }

        let fingerprint = fingerprint(&offerings);

        Self {
            generation,
            fingerprint,
            offerings,
            index,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// SHA-256 over the canonicalized rows, stable across row order
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn len(&self) -> usize {
        self.offerings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offerings.is_empty()
    }

    pub fn offerings(&self) -> &[InstanceOffering] {
        &self.offerings
    }

    /// Whether the type is offered in the region under any price model
    pub fn contains(&self, region: &str, instance_type: &str) -> bool {
        self.index
            .get(region)
            .is_some_and(|types| types.contains_key(instance_type))
    }

    /// All offerings for a type in a region
    pub fn offerings_for<'a>(
        &'a self,
        region: &str,
        instance_type: &str,
    ) -> impl Iterator<Item = &'a InstanceOffering> + 'a {
        self.index
            .get(region)
            .and_then(|types| types.get(instance_type))
            .into_iter()
            .flatten()
            .map(move |&i| &self.offerings[i])
    }

    /// Offering for a type, preferring the requested price model
    pub fn offering(
        &self,
        region: &str,
        instance_type: &str,
        price_model: PriceModel,
    ) -> Option<&InstanceOffering> {
        let mut fallback = None;
        for offering in self.offerings_for(region, instance_type) {
            if offering.price_model == price_model {
                return Some(offering);
            }
            fallback.get_or_insert(offering);
        }
        fallback
    }

    /// Distinct instance types offered in a region, sorted
    pub fn instance_types(&self, region: &str) -> Vec<&str> {
        self.index
            .get(region)
            .map(|types| types.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Regions present in the catalog, sorted
    pub fn regions(&self) -> Vec<&str> {
        let mut regions: Vec<&str> = self.index.keys().map(String::as_str).collect();
        regions.sort_unstable();
        regions
    }
}

fn fingerprint(offerings: &[InstanceOffering]) -> String {
    let mut rows: Vec<String> = offerings
        .iter()
        .map(|o| {
            format!(
                "{}|{}|{}|{}|{}|{}|{}|{}|{}",
                o.region,
                o.instance_type,
                o.price_model,
                o.vcpu,
                o.memory_gb,
                o.gpu_count,
                o.price_per_unit,
                o.sku,
                o.published_at.timestamp()
            )
        })
        .collect();
    rows.sort_unstable();

    let mut hasher = Sha256::new();
    for row in &rows {
        hasher.update(row.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn offering(instance_type: &str, region: &str, price_model: PriceModel) -> InstanceOffering {
        InstanceOffering {
            instance_type: instance_type.to_string(),
            region: region.to_string(),
            price_model,
            vcpu: 2,
            memory_gb: 8.0,
            gpu_count: 0,
            price_per_unit: 0.1,
            sku: format!("{}-{}", instance_type, price_model),
            published_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_index_by_region() {
        let snapshot = CatalogSnapshot::build(
            1,
            vec![
                offering("m4.large", "us-east-1", PriceModel::OnDemand),
                offering("m5.large", "us-east-1", PriceModel::OnDemand),
                offering("m5.large", "eu-west-1", PriceModel::Spot),
            ],
        );

        assert!(snapshot.contains("us-east-1", "m4.large"));
        assert!(!snapshot.contains("eu-west-1", "m4.large"));
        assert!(!snapshot.contains("ap-south-1", "m5.large"));
        assert_eq!(snapshot.instance_types("us-east-1"), vec!["m4.large", "m5.large"]);
        assert_eq!(snapshot.regions(), vec!["eu-west-1", "us-east-1"]);
        assert_eq!(snapshot.len(), 3);
    }

    #[test]
    fn test_offering_prefers_price_model() {
        let snapshot = CatalogSnapshot::build(
            1,
            vec![
                offering("m5.large", "us-east-1", PriceModel::OnDemand),
                offering("m5.large", "us-east-1", PriceModel::Spot),
            ],
        );

        let spot = snapshot
            .offering("us-east-1", "m5.large", PriceModel::Spot)
            .unwrap();
        assert_eq!(spot.price_model, PriceModel::Spot);

        let only_on_demand = CatalogSnapshot::build(
            2,
            vec![offering("m5.large", "us-east-1", PriceModel::OnDemand)],
        );
        let fallback = only_on_demand
            .offering("us-east-1", "m5.large", PriceModel::Spot)
            .unwrap();
        assert_eq!(fallback.price_model, PriceModel::OnDemand);
    }

    #[test]
    fn test_fingerprint_ignores_row_order() {
        let a = offering("m4.large", "us-east-1", PriceModel::OnDemand);
        let b = offering("m5.large", "us-east-1", PriceModel::OnDemand);

        let first = CatalogSnapshot::build(1, vec![a.clone(), b.clone()]);
        let second = CatalogSnapshot::build(2, vec![b, a]);
        assert_eq!(first.fingerprint(), second.fingerprint());
        assert_eq!(first.fingerprint().len(), 64);

        let empty = CatalogSnapshot::empty();
        assert_ne!(empty.fingerprint(), first.fingerprint());
    }
}
