use std::fmt;

use indexmap::IndexMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Chat,
    Image,
    Outpaint,
}

impl Capability {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Image => "image",
            Self::Outpaint => "outpaint",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: String,
    pub provider: String,
    pub capabilities: Vec<Capability>,
    pub default_size: Option<String>,
}

impl ModelSpec {
    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    pub fn is_dryrun(&self) -> bool {
        self.provider == "dryrun"
    }
}

/// Known models in preference order. The first model listed for a
/// capability is that capability's default.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: IndexMap<String, ModelSpec>,
}

impl ModelRegistry {
    pub fn new(models: Option<IndexMap<String, ModelSpec>>) -> Self {
        Self {
            models: models.unwrap_or_else(default_models),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ModelSpec> {
        self.models.get(name)
    }

    pub fn list(&self) -> impl Iterator<Item = &ModelSpec> {
        self.models.values()
    }

    pub fn by_capability(&self, capability: Capability) -> Vec<ModelSpec> {
        self.models
            .values()
            .filter(|model| model.supports(capability))
            .cloned()
            .collect()
    }

    pub fn ensure(&self, name: &str, capability: Capability) -> Option<ModelSpec> {
        let model = self.get(name)?;
        if model.supports(capability) {
            return Some(model.clone());
        }
        None
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new(None)
    }
}

fn default_models() -> IndexMap<String, ModelSpec> {
    let mut map = IndexMap::new();

    let mut insert = |name: &str,
                      provider: &str,
                      capabilities: &[Capability],
                      default_size: Option<&str>| {
        map.insert(
            name.to_string(),
            ModelSpec {
                name: name.to_string(),
                provider: provider.to_string(),
                capabilities: capabilities.to_vec(),
                default_size: default_size.map(str::to_string),
            },
        );
    };

    insert("deepseek-chat", "deepseek", &[Capability::Chat], None);
    insert(
        "wanx2.1-t2i-turbo",
        "dashscope",
        &[Capability::Image],
        Some("1024*1024"),
    );
    insert(
        "wanx2.1-t2i-plus",
        "dashscope",
        &[Capability::Image],
        Some("1024*1024"),
    );
    insert(
        "wanx2.0-t2i-turbo",
        "dashscope",
        &[Capability::Image],
        Some("1024*1024"),
    );
    insert(
        "wanx2.1-imageedit",
        "dashscope",
        &[Capability::Outpaint],
        None,
    );
    insert(
        "dryrun-image-1",
        "dryrun",
        &[Capability::Image, Capability::Outpaint],
        Some("512*512"),
    );

    map
}

#[cfg(test)]
mod tests {
    use super::{Capability, ModelRegistry};

    #[test]
    fn defaults_list_hosted_models_before_dryrun() {
        let registry = ModelRegistry::default();
        let image: Vec<String> = registry
            .by_capability(Capability::Image)
            .into_iter()
            .map(|model| model.name)
            .collect();
        assert_eq!(
            image,
            vec![
                "wanx2.1-t2i-turbo",
                "wanx2.1-t2i-plus",
                "wanx2.0-t2i-turbo",
                "dryrun-image-1"
            ]
        );
        assert_eq!(
            registry.by_capability(Capability::Outpaint)[0].name,
            "wanx2.1-imageedit"
        );
    }

    #[test]
    fn ensure_checks_capability() {
        let registry = ModelRegistry::default();
        assert!(registry.ensure("deepseek-chat", Capability::Chat).is_some());
        assert!(registry.ensure("deepseek-chat", Capability::Image).is_none());
        assert!(registry.ensure("missing", Capability::Image).is_none());
        assert!(registry
            .get("dryrun-image-1")
            .map(|model| model.is_dryrun())
            .unwrap_or(false));
    }
}
