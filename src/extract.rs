//! Template-driven HTML extraction.
//!
//! Pure function of (selectors, filters, cursor, html): locate the
//! repeated item nodes, evaluate each field rule against them in
//! source order, and stop at the cursor. Source order must be newest
//! first for the cursor boundary to mean anything, so callers get
//! back only links that are new since the last scrape.

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::{error, warn};

use crate::models::{now_ms, FieldRule, Filters, Link, Selectors};

/// Evaluate one field rule against an item node.
///
/// Returns None for missing selector matches, missing attributes,
/// unmatched patterns, and whitespace-only results.
fn eval_rule(item: ElementRef<'_>, rule: &FieldRule) -> Option<String> {
    let node = match &rule.selector {
        Some(sel) => {
            let parsed = match Selector::parse(sel) {
                Ok(p) => p,
                Err(_) => {
                    error!("eval_rule: invalid selector {:?}", sel);
                    return None;
                }
            };
            item.select(&parsed).next()?
        }
        None => item,
    };

    let raw = match &rule.attr {
        Some(attr) => node.value().attr(attr)?.to_string(),
        None => node.text().collect::<String>(),
    };

    let value = match &rule.pattern {
        Some(pattern) => {
            let re = match Regex::new(pattern) {
                Ok(re) => re,
                Err(_) => {
                    error!("eval_rule: invalid pattern {:?}", pattern);
                    return None;
                }
            };
            let caps = re.captures(&raw)?;
            caps.get(1)
                .or_else(|| caps.get(0))
                .map(|m| m.as_str().to_string())?
        }
        None => raw,
    };

    let value = value.trim().to_string();
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

/// An item's fields before validation.
#[derive(Default)]
struct Candidate {
    id: Option<String>,
    url: Option<String>,
    title: Option<String>,
    content: Option<String>,
    image: Option<String>,
    author: Option<String>,
}

impl Candidate {
    fn from_item(item: ElementRef<'_>, selectors: &Selectors) -> Self {
        let opt = |rule: &Option<FieldRule>| rule.as_ref().and_then(|r| eval_rule(item, r));
        Self {
            id: eval_rule(item, &selectors.id),
            url: eval_rule(item, &selectors.url),
            title: eval_rule(item, &selectors.title),
            content: opt(&selectors.content),
            image: opt(&selectors.image),
            author: opt(&selectors.author),
        }
    }

    /// Required fields present and the title filter satisfied?
    fn valid(&self, filters: &Filters) -> bool {
        if self.id.is_none() || self.url.is_none() {
            return false;
        }
        let title = match &self.title {
            Some(t) => t,
            None => return false,
        };
        match &filters.contains {
            Some(needle) => title.contains(needle.as_str()),
            None => true,
        }
    }

    /// Normalize into a link, stamping the scrape time. The template
    /// may define a `date` rule but the stored date is always ours.
    fn into_link(self, squeeze: &Regex, now: i64) -> Link {
        Link {
            id: self.id.unwrap_or_default(),
            url: self.url.unwrap_or_default(),
            title: self.title.map(|t| t.trim().to_string()).unwrap_or_default(),
            content: self
                .content
                .map(|c| squeeze.replace_all(c.trim(), "").to_string()),
            image: self.image,
            author: self.author,
            date: now,
        }
    }
}

/// Extract new links from a page's HTML.
///
/// Scans the `list` matches newest-first and short-circuits on the
/// item whose id equals `cursor`; everything past that point is
/// already known. Items missing required fields or failing the
/// `contains` filter are skipped but scanning continues.
pub fn extract(
    selectors: &Selectors,
    filters: &Filters,
    cursor: Option<&str>,
    html: &str,
    url: &str,
) -> Vec<Link> {
    if html.is_empty() {
        return Vec::new();
    }

    let list = match Selector::parse(&selectors.list) {
        Ok(list) => list,
        Err(_) => {
            error!("extract: invalid list selector {:?}", selectors.list);
            return Vec::new();
        }
    };

    // Tabs, newlines, and runs of whitespace are stripped from content.
    let squeeze = Regex::new(r"\t|\n|\s{2,}").expect("static regex");
    let now = now_ms();

    let doc = Html::parse_document(html);
    let mut links = Vec::new();
    let mut exist = false;

    for item in doc.select(&list) {
        exist = true;
        let candidate = Candidate::from_item(item, selectors);

        // The cursor boundary applies before validation: reaching the
        // most recent known id ends the scan outright.
        if let (Some(cursor), Some(id)) = (cursor, candidate.id.as_deref()) {
            if cursor == id {
                break;
            }
        }
        if !candidate.valid(filters) {
            continue;
        }

        links.push(candidate.into_link(&squeeze, now));
    }

    // Zero matches usually means the site's markup drifted away from
    // the template.
    if !exist {
        warn!("extract: list selector matched nothing for {}", url);
    }

    links
}
