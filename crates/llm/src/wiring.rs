//! Tool wiring — the provider tool list derived from a tenant's tool flags
//! plus the enabled function tools in the registry.  Pure with respect to
//! its inputs: the same config and registry state always yield a
//! bit-identical list, in a fixed order (retrieval, web search, registry
//! function tools in registration order, then any user-declared entries
//! verbatim).

use serde_json::{json, Value};

use lexgate_instance::ToolSettings;
use lexgate_tools::{to_function_tools, ToolRegistry};

#[derive(Debug, Clone, PartialEq)]
pub struct DerivedTools {
    pub tools: Vec<Value>,
    /// Ask the provider to include retrieval result bodies in the stream so
    /// the URL validator has evidence to work with.
    pub include_retrieval_results: bool,
}

pub fn build_tools(settings: &ToolSettings, registry: &ToolRegistry) -> DerivedTools {
    let mut tools = Vec::new();

    if settings.retrieval_enabled {
        if settings.vector_store_ids.is_empty() {
            tools.push(json!({ "type": "file_search" }));
        } else {
            tools.push(json!({
                "type": "file_search",
                "vector_store_ids": settings.vector_store_ids,
            }));
        }
    }

    if settings.web_search_enabled {
        tools.push(json!({ "type": "web_search" }));
    }

    tools.extend(to_function_tools(&registry.enabled_specs()));

    for extra in &settings.extra_tools {
        tools.push(extra.clone());
    }

    DerivedTools {
        tools,
        include_retrieval_results: settings.retrieval_enabled && settings.url_validation_enabled,
    }
}

/// Directive prepended to the input when search tools are active: allowed
/// source domains plus, under citation enforcement, an attribution demand.
pub fn policy_prefix(settings: &ToolSettings) -> Option<String> {
    if !settings.web_search_enabled && !settings.retrieval_enabled {
        return None;
    }

    let mut lines = Vec::new();
    if !settings.allowed_domains.is_empty() {
        lines.push(format!(
            "Usa exclusivamente fuentes de los siguientes dominios: {}.",
            settings.allowed_domains.join(", ")
        ));
    }
    if settings.citation_enforcement {
        lines.push(
            "Toda afirmación basada en una fuente debe citarla explícitamente \
             en la respuesta."
                .to_string(),
        );
    }
    if lines.is_empty() {
        return None;
    }
    Some(lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use lexgate_instance::WebNavigationSettings;
    use lexgate_tools::NavigateWebTool;

    fn settings() -> ToolSettings {
        ToolSettings {
            retrieval_enabled: true,
            web_search_enabled: true,
            url_validation_enabled: true,
            citation_enforcement: true,
            vector_store_ids: vec!["vs_1".to_string()],
            allowed_domains: vec!["bcn.cl".to_string()],
            web_navigation: WebNavigationSettings { enabled: true, ..Default::default() },
            extra_tools: vec![json!({ "type": "custom", "name": "extra" })],
        }
    }

    fn registry(navigate_enabled: bool) -> ToolRegistry {
        let mut registry = ToolRegistry::default();
        let tool = NavigateWebTool::new(WebNavigationSettings::default()).unwrap();
        registry.register(Box::new(tool));
        registry.set_enabled("navigate_web", navigate_enabled);
        registry
    }

    #[test]
    fn derivation_is_deterministic() {
        let settings = settings();
        assert_eq!(
            build_tools(&settings, &registry(true)),
            build_tools(&settings, &registry(true))
        );
    }

    #[test]
    fn fixed_order_with_extras_last() {
        let derived = build_tools(&settings(), &registry(true));
        let kinds: Vec<&str> = derived
            .tools
            .iter()
            .map(|t| t["type"].as_str().unwrap())
            .collect();
        assert_eq!(kinds, vec!["file_search", "web_search", "function", "custom"]);
        assert_eq!(derived.tools[2]["name"], "navigate_web");
        assert_eq!(derived.tools[2]["parameters"]["required"][0], "url");
    }

    #[test]
    fn function_tools_follow_registry_enablement() {
        let derived = build_tools(&settings(), &registry(false));
        assert!(derived
            .tools
            .iter()
            .all(|t| t.get("name").map_or(true, |n| n != "navigate_web")));
    }

    #[test]
    fn retrieval_without_store_ids_omits_restriction() {
        let mut s = settings();
        s.vector_store_ids.clear();
        let derived = build_tools(&s, &registry(true));
        assert!(derived.tools[0].get("vector_store_ids").is_none());
    }

    #[test]
    fn include_flag_requires_both_retrieval_and_validation() {
        let mut s = settings();
        assert!(build_tools(&s, &registry(false)).include_retrieval_results);
        s.url_validation_enabled = false;
        assert!(!build_tools(&s, &registry(false)).include_retrieval_results);
        s.url_validation_enabled = true;
        s.retrieval_enabled = false;
        assert!(!build_tools(&s, &registry(false)).include_retrieval_results);
    }

    #[test]
    fn no_tools_enabled_yields_empty_list() {
        let derived = build_tools(&ToolSettings::default(), &ToolRegistry::default());
        assert!(derived.tools.is_empty());
        assert!(!derived.include_retrieval_results);
    }

    #[test]
    fn policy_prefix_lists_domains_and_enforcement() {
        let prefix = policy_prefix(&settings()).unwrap();
        assert!(prefix.contains("bcn.cl"));
        assert!(prefix.contains("citarla explícitamente"));
    }

    #[test]
    fn policy_prefix_absent_without_search_tools() {
        assert!(policy_prefix(&ToolSettings::default()).is_none());
    }
}
