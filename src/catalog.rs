//! Backend catalog
//!
//! Holds the immutable list of backend descriptors the user can pick from and
//! defines the stable display order used everywhere results are listed.

use crate::config::BackendConfig;
use crate::error::{CoroError, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Fixed display priority. Ids not listed here sort lexicographically after these.
pub const DISPLAY_PRIORITY: &[&str] = &[
    "gemini",
    "llama-70b",
    "llama-8b",
    "mixtral",
    "deepseek",
    "on-device",
];

/// Pricing tier advertised for a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CostTier {
    /// No charge to the user
    #[default]
    Free,
    /// Metered by the provider
    Paid,
    /// Low-latency tier
    Fast,
}

impl std::fmt::Display for CostTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Free => write!(f, "free"),
            Self::Paid => write!(f, "paid"),
            Self::Fast => write!(f, "fast"),
        }
    }
}

/// Description of one selectable backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendDescriptor {
    /// Stable identifier (e.g. "llama-70b")
    pub id: String,
    /// Human-readable name
    pub display_name: String,
    /// Provider family (e.g. "groq")
    pub provider: String,
    /// Pricing tier
    pub cost_tier: CostTier,
    /// Runs on the local inference engine rather than a cloud API
    pub is_on_device: bool,
}

impl From<&BackendConfig> for BackendDescriptor {
    fn from(config: &BackendConfig) -> Self {
        Self {
            id: config.id.clone(),
            display_name: config.display_name.clone(),
            provider: config.provider.clone(),
            cost_tier: config.cost_tier,
            is_on_device: config.on_device,
        }
    }
}

/// Compare two backend ids by display order
///
/// Known ids follow [`DISPLAY_PRIORITY`]; unknown ids come after every known
/// id and are ordered lexicographically among themselves.
///
/// # Examples
///
/// ```
/// use coro::catalog::display_order;
/// use std::cmp::Ordering;
///
/// assert_eq!(display_order("gemini", "deepseek"), Ordering::Less);
/// assert_eq!(display_order("zeta", "deepseek"), Ordering::Greater);
/// assert_eq!(display_order("alpha", "beta"), Ordering::Less);
/// ```
pub fn display_order(a: &str, b: &str) -> Ordering {
    let rank = |id: &str| DISPLAY_PRIORITY.iter().position(|known| *known == id);
    match (rank(a), rank(b)) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}

/// Sort a list of backend ids into display order in place
pub fn sort_ids(ids: &mut [String]) {
    ids.sort_by(|a, b| display_order(a, b));
}

/// Immutable set of backend descriptors, kept in display order
#[derive(Debug, Clone, Default)]
pub struct BackendCatalog {
    descriptors: Vec<BackendDescriptor>,
    index: HashMap<String, usize>,
}

impl BackendCatalog {
    /// Build a catalog from descriptors, rejecting duplicate ids
    ///
    /// # Errors
    ///
    /// Returns `CoroError::Config` if two descriptors share an id
    pub fn new(mut descriptors: Vec<BackendDescriptor>) -> Result<Self> {
        descriptors.sort_by(|a, b| display_order(&a.id, &b.id));

        let mut index = HashMap::with_capacity(descriptors.len());
        for (pos, descriptor) in descriptors.iter().enumerate() {
            if index.insert(descriptor.id.clone(), pos).is_some() {
                return Err(CoroError::Config(format!(
                    "Duplicate backend id in catalog: {}",
                    descriptor.id
                ))
                .into());
            }
        }

        Ok(Self { descriptors, index })
    }

    /// Build a catalog from the configured backend list
    pub fn from_config(backends: &[BackendConfig]) -> Result<Self> {
        Self::new(backends.iter().map(BackendDescriptor::from).collect())
    }

    /// Look up a descriptor by id
    pub fn get(&self, id: &str) -> Option<&BackendDescriptor> {
        self.index.get(id).map(|pos| &self.descriptors[*pos])
    }

    /// Whether the catalog contains `id`
    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Whether `id` is routed to the on-device client
    pub fn is_on_device(&self, id: &str) -> bool {
        self.get(id).map(|d| d.is_on_device).unwrap_or(false)
    }

    /// Display name for `id`, falling back to the id itself
    pub fn display_name<'a>(&'a self, id: &'a str) -> &'a str {
        self.get(id).map(|d| d.display_name.as_str()).unwrap_or(id)
    }

    /// All descriptors in display order
    pub fn descriptors(&self) -> &[BackendDescriptor] {
        &self.descriptors
    }

    /// All ids in display order
    pub fn ids(&self) -> Vec<String> {
        self.descriptors.iter().map(|d| d.id.clone()).collect()
    }

    /// Number of backends
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Whether the catalog is empty
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}
