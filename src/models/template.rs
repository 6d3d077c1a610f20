//! Scrape templates.
//!
//! A template groups pages that share a layout (say, every subreddit
//! listing) and defines where to find the repeated items and their
//! fields inside the HTML. Field locations are declarative rules
//! (selector + attribute/text + optional regex), not executable
//! scripts, so templates stay operator-authorable without arbitrary
//! code execution.

use serde::{Deserialize, Serialize};

/// Declarative rule for extracting one field from an item node.
///
/// Evaluation: optionally narrow to the first descendant matching
/// `selector` (the item node itself when absent), read `attr` or the
/// node's text, then apply `pattern` and take capture group 1 (or the
/// whole match) when present. Empty results omit the field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldRule {
    /// CSS selector relative to the item node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    /// Attribute to read; the node text when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attr: Option<String>,
    /// Regex applied to the raw value; capture group 1 wins.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

impl FieldRule {
    /// Rule that reads the text of the first `selector` match.
    pub fn text(selector: &str) -> Self {
        Self {
            selector: Some(selector.to_string()),
            attr: None,
            pattern: None,
        }
    }

    /// Rule that reads an attribute of the first `selector` match.
    pub fn attr(selector: &str, attr: &str) -> Self {
        Self {
            selector: Some(selector.to_string()),
            attr: Some(attr.to_string()),
            pattern: None,
        }
    }
}

/// Where to find the repeated items and their fields in the HTML.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Selectors {
    /// Selector matching the repeated item nodes, newest first.
    pub list: String,
    /// Readiness selector for dynamic pages (browser fetch waits on it).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_for: Option<String>,
    // Required fields; items missing any of these are skipped.
    pub id: FieldRule,
    pub url: FieldRule,
    pub title: FieldRule,
    // Optional fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<FieldRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<FieldRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<FieldRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<FieldRule>,
}

/// A scrape template, shared by every page with the same layout.
///
/// Created and edited by operators; read-only to the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub id: String,
    pub name: String,
    /// Dynamic templates need a headless browser; the rest use plain HTTP.
    #[serde(default)]
    pub dynamic: bool,
    /// Minimum hours between scrapes of a page using this template.
    #[serde(default = "default_update_interval")]
    pub update_interval: u32,
    /// Example URLs shown when registering a page.
    #[serde(default)]
    pub sample_urls: Vec<String>,
    /// Regex that page URLs must match to use this template.
    pub url_pattern: String,
    pub selectors: Selectors,
}

fn default_update_interval() -> u32 {
    4
}

impl Template {
    /// Check whether a page URL belongs to this template. The URL must
    /// be a well-formed absolute URL on top of matching the pattern.
    pub fn matches_url(&self, url: &str) -> bool {
        if url::Url::parse(url).is_err() {
            return false;
        }
        regex::Regex::new(&self.url_pattern)
            .map(|re| re.is_match(url))
            .unwrap_or(false)
    }
}
