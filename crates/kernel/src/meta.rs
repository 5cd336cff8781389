//! Plugin metadata.

use std::fmt;

/// A service tag a plugin can provide. Consumers look up a single primary
/// provider per tag via [`crate::Kernel::get_by_capability`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Llm,
    Tools,
    Communication,
    Wallet,
    Pairing,
    Logging,
    Security,
    Compaction,
    Lurker,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Capability::Llm => "llm",
            Capability::Tools => "tools",
            Capability::Communication => "communication",
            Capability::Wallet => "wallet",
            Capability::Pairing => "pairing",
            Capability::Logging => "logging",
            Capability::Security => "security",
            Capability::Compaction => "compaction",
            Capability::Lurker => "lurker",
        };
        f.write_str(s)
    }
}

/// Immutable descriptor attached to each plugin.
///
/// `implements` names the extension points this plugin provides; callers
/// reach the implementation through the plugin's typed facet accessor
/// ([`crate::Plugin::as_channel`] and friends), not by method name.
#[derive(Debug, Clone)]
pub struct PluginMeta {
    /// Unique, non-empty id.
    pub id: &'static str,
    pub version: &'static str,
    pub capabilities: &'static [Capability],
    /// Plugin ids that must be started first.
    pub dependencies: &'static [&'static str],
    /// Load order weight; lower starts earlier, ties broken by id.
    pub priority: i32,
    /// Extension points this plugin *defines*.
    pub extension_points: &'static [&'static str],
    /// Extension points this plugin *implements*.
    pub implements: &'static [&'static str],
}

impl PluginMeta {
    pub const fn new(id: &'static str, version: &'static str) -> Self {
        Self {
            id,
            version,
            capabilities: &[],
            dependencies: &[],
            priority: 50,
            extension_points: &[],
            implements: &[],
        }
    }

    pub const fn with_capabilities(mut self, capabilities: &'static [Capability]) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub const fn with_dependencies(mut self, dependencies: &'static [&'static str]) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub const fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub const fn with_extension_points(mut self, points: &'static [&'static str]) -> Self {
        self.extension_points = points;
        self
    }

    pub const fn with_implements(mut self, points: &'static [&'static str]) -> Self {
        self.implements = points;
        self
    }

    pub fn has_capability(&self, tag: Capability) -> bool {
        self.capabilities.contains(&tag)
    }

    pub fn implements_point(&self, point: &str) -> bool {
        self.implements.contains(&point)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_fields() {
        const META: PluginMeta = PluginMeta::new("test", "1.0.0")
            .with_capabilities(&[Capability::Llm])
            .with_dependencies(&["config"])
            .with_priority(20)
            .with_implements(&["session.receive"]);
        assert_eq!(META.id, "test");
        assert!(META.has_capability(Capability::Llm));
        assert!(!META.has_capability(Capability::Tools));
        assert!(META.implements_point("session.receive"));
        assert_eq!(META.priority, 20);
    }
}
