//! `navigate_web` — restricted breadth-first crawl of a URL within a
//! tenant-configured domain boundary.  Pages come back as
//! `{url, title, excerpt}` entries with the HTML stripped.

use std::collections::{HashSet, VecDeque};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use scraper::{Html, Selector};
use serde_json::{json, Value};
use tracing::{debug, warn};
use url::Url;

use lexgate_instance::WebNavigationSettings;

use crate::{Tool, ToolOutput, ToolSpec};

/// Characters kept per crawled page.
const MAX_PAGE_CHARS: usize = 4_000;

pub struct NavigateWebTool {
    settings: WebNavigationSettings,
    client: reqwest::Client,
}

impl NavigateWebTool {
    pub fn new(settings: WebNavigationSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs.max(1)))
            .user_agent(settings.user_agent.clone())
            .build()?;
        Ok(Self { settings, client })
    }
}

#[async_trait]
impl Tool for NavigateWebTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "navigate_web".to_string(),
            description: "Navega una URL permitida y devuelve el contenido \
                textual de hasta unas pocas páginas enlazadas dentro del \
                mismo dominio."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "url": {
                        "type": "string",
                        "description": "URL completa a visitar (https://...)"
                    }
                },
                "required": ["url"]
            }),
        }
    }

    async fn run(&self, args: &Value) -> Result<ToolOutput> {
        if !self.settings.enabled {
            return Ok(ToolOutput::error("disabled"));
        }

        let Some(start) = args.get("url").and_then(|u| u.as_str()).filter(|u| !u.is_empty())
        else {
            return Ok(ToolOutput::error("missing required param: url"));
        };

        let Ok(start_url) = Url::parse(start) else {
            return Ok(ToolOutput::error(format!("invalid url: {start}")));
        };
        if !self.admits(&start_url) {
            return Ok(ToolOutput::error(format!(
                "url not permitted by domain policy: {start}"
            )));
        }

        let pages = self.crawl(start_url).await;
        if pages.is_empty() {
            return Ok(ToolOutput::error("no pages could be retrieved"));
        }
        Ok(ToolOutput { success: true, output: json!({ "pages": pages }) })
    }
}

impl NavigateWebTool {
    /// Admission: under allowlist mode the hostname or a parent domain must
    /// be listed; under denylist mode it must not be.
    fn admits(&self, url: &Url) -> bool {
        let Some(host) = url.host_str() else {
            return false;
        };
        if self.settings.mode.eq_ignore_ascii_case("denylist") {
            !domain_listed(host, &self.settings.deny_domains)
        } else {
            domain_listed(host, &self.settings.allow_domains)
        }
    }

    /// BFS by depth over same-policy links, deduplicating visited URLs.
    async fn crawl(&self, start: Url) -> Vec<Value> {
        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<(Url, usize)> = VecDeque::new();
        let mut pages: Vec<Value> = Vec::new();

        visited.insert(start.as_str().to_string());
        queue.push_back((start, 0));

        while let Some((url, depth)) = queue.pop_front() {
            if pages.len() >= self.settings.max_pages {
                break;
            }

            let html = match self.fetch(&url).await {
                Ok(html) => html,
                Err(err) => {
                    warn!(%url, %err, "page fetch failed");
                    continue;
                }
            };

            let title = extract_title(&html);
            let excerpt = strip_html(&html, MAX_PAGE_CHARS);
            debug!(%url, depth, chars = excerpt.len(), "page crawled");
            pages.push(json!({
                "url": url.as_str(),
                "title": title,
                "excerpt": excerpt,
            }));

            if depth >= self.settings.max_depth {
                continue;
            }
            for link in extract_links(&html, &url) {
                if !self.admits(&link) {
                    continue;
                }
                if visited.insert(link.as_str().to_string()) {
                    queue.push_back((link, depth + 1));
                }
            }
        }

        pages
    }

    async fn fetch(&self, url: &Url) -> Result<String> {
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("HTTP {status}");
        }
        Ok(response.text().await?)
    }
}

fn domain_listed(host: &str, domains: &[String]) -> bool {
    let host = host.to_lowercase();
    domains.iter().any(|domain| {
        let domain = domain.to_lowercase();
        host == domain || host.ends_with(&format!(".{domain}"))
    })
}

fn script_style() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)<(script|style)[^>]*>.*?</(script|style)>").expect("script/style regex")
    })
}

fn any_tag() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<[^>]+>").expect("tag regex"))
}

/// Remove `<script>`/`<style>` blocks, then all tags, collapse whitespace,
/// and truncate to the page budget.
fn strip_html(html: &str, max_chars: usize) -> String {
    let without_blocks = script_style().replace_all(html, " ");
    let without_tags = any_tag().replace_all(&without_blocks, " ");
    let collapsed = without_tags.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max_chars {
        collapsed
    } else {
        collapsed.chars().take(max_chars).collect()
    }
}

fn extract_title(html: &str) -> String {
    let doc = Html::parse_document(html);
    let Ok(selector) = Selector::parse("title") else {
        return String::new();
    };
    doc.select(&selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .unwrap_or_default()
}

fn extract_links(html: &str, base: &Url) -> Vec<Url> {
    let doc = Html::parse_document(html);
    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };
    doc.select(&selector)
        .filter_map(|el| el.value().attr("href"))
        .filter_map(|href| base.join(href).ok())
        .filter(|url| matches!(url.scheme(), "http" | "https"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(mode: &str) -> WebNavigationSettings {
        WebNavigationSettings {
            enabled: true,
            mode: mode.to_string(),
            allow_domains: vec!["bcn.cl".to_string()],
            deny_domains: vec!["bloqueado.cl".to_string()],
            max_pages: 3,
            max_depth: 1,
            timeout_secs: 5,
            user_agent: "lexgate-test/0.1".to_string(),
        }
    }

    #[test]
    fn allowlist_admits_domain_and_subdomains() {
        let tool = NavigateWebTool::new(settings("allowlist")).unwrap();
        assert!(tool.admits(&Url::parse("https://bcn.cl/ley").unwrap()));
        assert!(tool.admits(&Url::parse("https://www.bcn.cl/ley").unwrap()));
        assert!(!tool.admits(&Url::parse("https://otro.cl/").unwrap()));
        // Suffix tricks are not parent domains.
        assert!(!tool.admits(&Url::parse("https://notbcn.cl/").unwrap()));
    }

    #[test]
    fn denylist_rejects_listed_domains_only() {
        let tool = NavigateWebTool::new(settings("denylist")).unwrap();
        assert!(!tool.admits(&Url::parse("https://bloqueado.cl/x").unwrap()));
        assert!(!tool.admits(&Url::parse("https://sub.bloqueado.cl/x").unwrap()));
        assert!(tool.admits(&Url::parse("https://cualquiera.cl/").unwrap()));
    }

    #[tokio::test]
    async fn disabled_tool_reports_disabled() {
        let mut off = settings("allowlist");
        off.enabled = false;
        let tool = NavigateWebTool::new(off).unwrap();
        let output = tool.run(&json!({ "url": "https://bcn.cl" })).await.unwrap();
        assert!(!output.success);
        assert_eq!(output.output["error"], "disabled");
    }

    #[tokio::test]
    async fn missing_url_is_an_error_output() {
        let tool = NavigateWebTool::new(settings("allowlist")).unwrap();
        let output = tool.run(&json!({})).await.unwrap();
        assert!(!output.success);
    }

    #[tokio::test]
    async fn out_of_policy_url_is_rejected() {
        let tool = NavigateWebTool::new(settings("allowlist")).unwrap();
        let output = tool.run(&json!({ "url": "https://otro.cl/x" })).await.unwrap();
        assert!(!output.success);
        assert!(output.output["error"].as_str().unwrap().contains("not permitted"));
    }

    #[test]
    fn strip_html_removes_scripts_and_tags() {
        let html = "<html><head><style>body{color:red}</style>\
            <script>alert('x')</script></head>\
            <body><h1>Ley 20.190</h1><p>Texto  de   la norma.</p></body></html>";
        let text = strip_html(html, 4_000);
        assert_eq!(text, "Ley 20.190 Texto de la norma.");
        assert!(!text.contains("alert"));
        assert!(!text.contains("color"));
    }

    #[test]
    fn strip_html_truncates_to_budget() {
        let html = format!("<p>{}</p>", "palabra ".repeat(2_000));
        let text = strip_html(&html, 4_000);
        assert_eq!(text.chars().count(), 4_000);
    }

    #[test]
    fn extracts_links_resolved_against_base() {
        let html = r#"<a href="/ley/123">ley</a> <a href="https://otro.cl/x">externo</a>"#;
        let base = Url::parse("https://bcn.cl/inicio").unwrap();
        let links = extract_links(html, &base);
        assert_eq!(links[0].as_str(), "https://bcn.cl/ley/123");
        assert_eq!(links[1].as_str(), "https://otro.cl/x");
    }

    #[test]
    fn schema_requires_url() {
        let tool = NavigateWebTool::new(settings("allowlist")).unwrap();
        let spec = tool.spec();
        assert_eq!(spec.name, "navigate_web");
        assert_eq!(spec.parameters["required"][0], "url");
    }

    #[tokio::test]
    #[ignore] // network — run with `cargo test -- --ignored`
    async fn crawl_real_site() {
        let mut online = settings("allowlist");
        online.allow_domains = vec!["example.com".to_string()];
        let tool = NavigateWebTool::new(online).unwrap();
        let output = tool.run(&json!({ "url": "https://example.com" })).await.unwrap();
        assert!(output.success, "output: {}", output.output);
    }
}
