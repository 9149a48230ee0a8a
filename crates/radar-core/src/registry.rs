use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::types::ProductProfile;
use crate::ConfigError;

/// One product entry under a tenant in `registry.yaml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductConfig {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub pain_keywords: Vec<String>,
    #[serde(default)]
    pub intent_keywords: Vec<String>,
    /// Categories this product is scored against. Empty means every category.
    #[serde(default)]
    pub categories: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantConfig {
    pub id: String,
    #[serde(default)]
    pub products: Vec<ProductConfig>,
}

impl TenantConfig {
    /// Product profiles owned by this tenant, in registry order.
    #[must_use]
    pub fn profiles(&self) -> Vec<ProductProfile> {
        self.products
            .iter()
            .map(|p| ProductProfile {
                tenant_id: self.id.clone(),
                product_id: p.id.clone(),
                name: p.name.clone(),
                description: p.description.clone(),
                pain_keywords: p.pain_keywords.clone(),
                intent_keywords: p.intent_keywords.clone(),
                categories: p.categories.clone(),
            })
            .collect()
    }

    /// Union of the categories targeted by this tenant's products.
    ///
    /// Returns `None` if any product targets every category.
    #[must_use]
    pub fn target_categories(&self) -> Option<Vec<String>> {
        let mut out: Vec<String> = Vec::new();
        for product in &self.products {
            if product.categories.is_empty() {
                return None;
            }
            for category in &product.categories {
                if !out.iter().any(|c| c.eq_ignore_ascii_case(category)) {
                    out.push(category.clone());
                }
            }
        }
        Some(out)
    }
}

/// A general intent category detected by phrase matching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentRule {
    pub name: String,
    pub weight: f64,
    pub phrases: Vec<String>,
}

fn default_intents() -> Vec<IntentRule> {
    let rule = |name: &str, weight: f64, phrases: &[&str]| IntentRule {
        name: name.to_string(),
        weight,
        phrases: phrases.iter().map(|p| (*p).to_string()).collect(),
    };
    vec![
        rule(
            "seeking_tool",
            5.0,
            &[
                "looking for",
                "is there a tool",
                "recommend",
                "best app for",
                "any tool",
                "how can i",
                "app to",
            ],
        ),
        rule(
            "complaint",
            3.0,
            &[
                "frustrated",
                "hate",
                "why is it so hard",
                "horrible experience",
                "pain in the",
                "problem with",
                "issue",
                "scam",
                "wrong",
            ],
        ),
        rule(
            "comparison",
            2.0,
            &[
                "vs",
                "alternative to",
                "switched from",
                "better than",
                "instead of",
            ],
        ),
    ]
}

fn default_min_relevance() -> f64 {
    10.0
}

fn default_min_fit() -> f64 {
    0.35
}

/// Scoring weights and enrichment gate thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringConfig {
    #[serde(default = "default_intents")]
    pub intents: Vec<IntentRule>,
    #[serde(default = "default_min_relevance")]
    pub min_relevance: f64,
    #[serde(default = "default_min_fit")]
    pub min_fit: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            intents: default_intents(),
            min_relevance: default_min_relevance(),
            min_fit: default_min_fit(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryFile {
    pub categories: Vec<String>,
    #[serde(default)]
    pub tenants: Vec<TenantConfig>,
    #[serde(default)]
    pub scoring: ScoringConfig,
}

impl RegistryFile {
    #[must_use]
    pub fn tenant(&self, id: &str) -> Option<&TenantConfig> {
        self.tenants.iter().find(|t| t.id == id)
    }
}

/// Load and validate the registry from a YAML file.
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read, parsed, or fails validation.
pub fn load_registry(path: &Path) -> Result<RegistryFile, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::RegistryFileIo {
        path: path.display().to_string(),
        source: e,
    })?;

    parse_registry(&content)
}

/// Parse and validate registry YAML already in memory.
///
/// # Errors
///
/// Returns `ConfigError` if the YAML is malformed or fails validation.
pub fn parse_registry(content: &str) -> Result<RegistryFile, ConfigError> {
    let registry: RegistryFile =
        serde_yaml::from_str(content).map_err(ConfigError::RegistryFileParse)?;
    validate_registry(&registry)?;
    Ok(registry)
}

fn validate_registry(registry: &RegistryFile) -> Result<(), ConfigError> {
    let mut seen_categories = HashSet::new();
    for category in &registry.categories {
        if category.trim().is_empty() {
            return Err(ConfigError::Validation(
                "category name must be non-empty".to_string(),
            ));
        }
        if !seen_categories.insert(category.to_lowercase()) {
            return Err(ConfigError::Validation(format!(
                "duplicate category: '{category}'"
            )));
        }
    }

    let mut seen_tenants = HashSet::new();
    for tenant in &registry.tenants {
        if tenant.id.trim().is_empty() {
            return Err(ConfigError::Validation(
                "tenant id must be non-empty".to_string(),
            ));
        }
        if !seen_tenants.insert(tenant.id.as_str()) {
            return Err(ConfigError::Validation(format!(
                "duplicate tenant id: '{}'",
                tenant.id
            )));
        }

        let mut seen_products = HashSet::new();
        for product in &tenant.products {
            if product.id.trim().is_empty() || product.name.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "tenant '{}' has a product with an empty id or name",
                    tenant.id
                )));
            }
            if !seen_products.insert(product.id.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "duplicate product id '{}' for tenant '{}'",
                    product.id, tenant.id
                )));
            }
        }
    }

    let scoring = &registry.scoring;
    if !scoring.min_relevance.is_finite() {
        return Err(ConfigError::Validation(
            "scoring.min_relevance must be finite".to_string(),
        ));
    }
    if !(-1.0..=1.0).contains(&scoring.min_fit) {
        return Err(ConfigError::Validation(format!(
            "scoring.min_fit {} must be within [-1, 1]",
            scoring.min_fit
        )));
    }

    let mut seen_intents = HashSet::new();
    for rule in &scoring.intents {
        if !seen_intents.insert(rule.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "duplicate intent category: '{}'",
                rule.name
            )));
        }
        if !rule.weight.is_finite() {
            return Err(ConfigError::Validation(format!(
                "intent '{}' has a non-finite weight",
                rule.name
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r"
categories: [shopify, ecommerce]
tenants:
  - id: acme
    products:
      - id: profit
        name: ProfitDoctor
        description: Profit tracking for merchants
        pain_keywords: [losing money, margins]
        intent_keywords: [profit tracker]
        categories: [shopify]
      - id: ship
        name: ShipFast
        categories: [ecommerce, Shopify]
";

    #[test]
    fn parses_sample_with_default_scoring() {
        let registry = parse_registry(SAMPLE).unwrap();
        assert_eq!(registry.categories, vec!["shopify", "ecommerce"]);
        assert_eq!(registry.scoring, ScoringConfig::default());
        assert!((registry.scoring.min_relevance - 10.0).abs() < f64::EPSILON);
        assert!((registry.scoring.min_fit - 0.35).abs() < f64::EPSILON);

        let weights: Vec<(&str, f64)> = registry
            .scoring
            .intents
            .iter()
            .map(|r| (r.name.as_str(), r.weight))
            .collect();
        assert_eq!(
            weights,
            vec![("seeking_tool", 5.0), ("complaint", 3.0), ("comparison", 2.0)]
        );
    }

    #[test]
    fn tenant_profiles_carry_tenant_id() {
        let registry = parse_registry(SAMPLE).unwrap();
        let profiles = registry.tenant("acme").unwrap().profiles();
        assert_eq!(profiles.len(), 2);
        assert!(profiles.iter().all(|p| p.tenant_id == "acme"));
        assert_eq!(profiles[0].pain_keywords, vec!["losing money", "margins"]);
        assert!(profiles[1].description.is_empty());
    }

    #[test]
    fn target_categories_deduplicates_case_insensitively() {
        let registry = parse_registry(SAMPLE).unwrap();
        let cats = registry.tenant("acme").unwrap().target_categories().unwrap();
        assert_eq!(cats, vec!["shopify", "ecommerce"]);
    }

    #[test]
    fn target_categories_none_when_a_product_targets_all() {
        let tenant = TenantConfig {
            id: "acme".to_string(),
            products: vec![ProductConfig {
                id: "p".to_string(),
                name: "P".to_string(),
                description: String::new(),
                pain_keywords: vec![],
                intent_keywords: vec![],
                categories: vec![],
            }],
        };
        assert!(tenant.target_categories().is_none());
    }

    #[test]
    fn scoring_overrides_are_applied() {
        let yaml = r"
categories: [saas]
scoring:
  min_relevance: 12.5
  min_fit: 0.5
  intents:
    - name: seeking_tool
      weight: 7.0
      phrases: [need a tool]
";
        let registry = parse_registry(yaml).unwrap();
        assert!((registry.scoring.min_relevance - 12.5).abs() < f64::EPSILON);
        assert_eq!(registry.scoring.intents.len(), 1);
        assert_eq!(registry.scoring.intents[0].phrases, vec!["need a tool"]);
    }

    #[test]
    fn rejects_duplicate_product_ids() {
        let yaml = r"
categories: [saas]
tenants:
  - id: acme
    products:
      - id: p
        name: One
      - id: p
        name: Two
";
        let err = parse_registry(yaml).unwrap_err();
        assert!(err.to_string().contains("duplicate product id 'p'"));
    }

    #[test]
    fn rejects_fit_floor_outside_cosine_range() {
        let yaml = r"
categories: [saas]
scoring:
  min_fit: 1.5
";
        let err = parse_registry(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn rejects_duplicate_categories() {
        let err = parse_registry("categories: [SaaS, saas]").unwrap_err();
        assert!(err.to_string().contains("duplicate category"));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = load_registry(Path::new("/nonexistent/registry.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::RegistryFileIo { .. }));
    }

    #[test]
    fn bundled_registry_is_valid() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../config/registry.yaml");
        let registry = load_registry(&path).unwrap();
        assert!(!registry.categories.is_empty());
        assert!(!registry.tenants.is_empty());
    }
}
