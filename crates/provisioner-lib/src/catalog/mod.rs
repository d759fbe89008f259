//! Compute catalog and allow-policy resolution
//!
//! The catalog lists which instance types are offered per region and under
//! which price models. Preferences restrict what a run may request, scoped by
//! tool and region. Both are held as immutable snapshots that are replaced
//! wholesale on refresh, so every query sees one consistent generation.

mod pattern;
mod preferences;
mod resolver;
mod snapshot;
pub mod source;


pub use pattern::{AllowList, AllowPattern};
pub use preferences::{
    parse_price_models, scope_chain, PolicyDimension, PreferenceScope, PreferenceSnapshot,
    ResolvedPreference, ScopePreferences, ToolPreferences,
};
pub use resolver::{AllowPolicy, AllowedInstanceTypes, CatalogResolver, ResolverView};
pub use snapshot::CatalogSnapshot;
pub use source::{load_catalog_file, load_preferences_file, CatalogWatcher, SourceWatcherHandle};
