//! Named minimum resource specs ("tiers") that requests are routed against.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A named minimum resource specification. See spec §3 "Tier".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tier {
    #[serde(default)]
    pub name: String,
    pub vcpu: u32,
    pub memory_gb: f64,
    pub storage_gb: f64,
    #[serde(default)]
    pub gpu: u32,
    #[serde(default)]
    pub gpu_memory_gb: f64,
}

impl Tier {
    pub fn validate(&self) -> Result<(), String> {
        if self.memory_gb < 0.0 || self.storage_gb < 0.0 || self.gpu_memory_gb < 0.0 {
            return Err(format!("tier {} has a negative resource field", self.name));
        }
        Ok(())
    }
}

/// The set of tiers a router instance understands, keyed by name.
#[derive(Debug, Clone)]
pub struct TierCatalog {
    tiers: HashMap<String, Tier>,
    default_tier: String,
}

impl TierCatalog {
    pub fn new(mut tiers: HashMap<String, Tier>, default_tier: String) -> Result<Self, String> {
        for (name, tier) in tiers.iter_mut() {
            tier.name = name.clone();
            tier.validate()?;
        }
        if tiers.is_empty() {
            return Err("tier catalog must not be empty".to_string());
        }
        if !tiers.contains_key(&default_tier) {
            return Err(format!(
                "default tier '{default_tier}' is not present in the tier catalog"
            ));
        }
        Ok(Self {
            tiers,
            default_tier,
        })
    }

    pub fn get(&self, name: &str) -> Option<&Tier> {
        self.tiers.get(name)
    }

    pub fn default_tier_name(&self) -> &str {
        &self.default_tier
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiers() -> HashMap<String, Tier> {
        let mut m = HashMap::new();
        m.insert(
            "lite".to_string(),
            Tier {
                name: "lite".to_string(),
                vcpu: 1,
                memory_gb: 1.0,
                storage_gb: 5.0,
                gpu: 0,
                gpu_memory_gb: 0.0,
            },
        );
        m
    }

    #[test]
    fn rejects_unknown_default_tier() {
        assert!(TierCatalog::new(tiers(), "medium".to_string()).is_err());
    }

    #[test]
    fn rejects_empty_catalog() {
        assert!(TierCatalog::new(HashMap::new(), "lite".to_string()).is_err());
    }

    #[test]
    fn accepts_known_default() {
        let catalog = TierCatalog::new(tiers(), "lite".to_string()).unwrap();
        assert_eq!(catalog.default_tier_name(), "lite");
        assert!(catalog.get("lite").is_some());
    }
}
