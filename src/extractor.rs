//! Schema-driven record extraction.
//!
//! Every node matching the schema's container selector becomes exactly one
//! [`Record`], in document order. Inside each container the first match of
//! each field selector supplies the field: text content for title,
//! description and time, the `src` attribute for the image and the `href`
//! attribute for the link. Values are kept verbatim, whitespace included.
//! Nothing is filtered, deduplicated or reordered.
//!
//! Relative image/link values are resolved against the host of the source
//! URL: `img/a.png` scraped from `https://example.com/news` becomes
//! `https://example.com/img/a.png`.

use scraper::{ElementRef, Html, Selector};
use tracing::{debug, instrument};

use crate::errors::ParseError;
use crate::models::{RawDocument, Record, SelectorSchema, Source};
use crate::utils::truncate_for_log;

/// Parse a fetched document and extract its records with the source's schema.
///
/// An empty (or blank) document yields no records. A body that is not markup
/// at all, such as a JSON error payload, fails with [`ParseError`].
#[instrument(level = "debug", skip_all, fields(source = %source.id))]
pub fn extract_records(raw: &RawDocument, source: &Source) -> Result<Vec<Record>, ParseError> {
    if raw.is_empty() {
        debug!("empty document, nothing to extract");
        return Ok(Vec::new());
    }
    let document = parse_document(raw)?;
    Ok(extract(&document, &source.schema, &source.url))
}

/// Parse document text into a queryable tree.
pub fn parse_document(raw: &RawDocument) -> Result<Html, ParseError> {
    let text = raw.as_str().trim_start_matches('\u{feff}').trim_start();
    if !text.starts_with('<') {
        return Err(ParseError::NotMarkup {
            preview: truncate_for_log(text, 40),
        });
    }
    Ok(Html::parse_document(text))
}

/// Extract one record per container match, in document order.
///
/// # Arguments
///
/// * `document` - Parsed page, see [`parse_document`]
/// * `schema` - Selector set of the source
/// * `origin_url` - Source URL; its host resolves relative image/link values
///
/// # Returns
///
/// One [`Record`] per container. A field whose selector matches nothing is
/// an empty string; a container where nothing matches still yields an
/// all-empty record.
///
/// # Examples
///
/// ```ignore
/// let schema = SelectorSchema::new("div.card", "h3", "p", "img", "time", "a")?;
/// let doc = Html::parse_document(r#"<div class="card"><h3>Hi</h3><a href="x">go</a></div>"#);
/// let records = extract(&doc, &schema, "https://example.com/news");
/// assert_eq!(records[0].article_url, "https://example.com/x");
/// ```
pub fn extract(document: &Html, schema: &SelectorSchema, origin_url: &str) -> Vec<Record> {
    let host = origin_host(origin_url);
    let records: Vec<Record> = document
        .select(&schema.container)
        .map(|container| Record {
            title: first_text(container, &schema.title),
            description: first_text(container, &schema.description),
            image_url: first_attr(container, &schema.image, "src")
                .map(|v| absolutize(&v, host))
                .unwrap_or_default(),
            published_label: first_text(container, &schema.time),
            article_url: first_attr(container, &schema.link, "href")
                .map(|v| absolutize(&v, host))
                .unwrap_or_default(),
        })
        .collect();

    debug!(count = records.len(), host, "extracted records");
    records
}

fn first_text(container: ElementRef<'_>, selector: &Selector) -> String {
    container
        .select(selector)
        .next()
        .map(|el| el.text().collect::<String>())
        .unwrap_or_default()
}

fn first_attr(container: ElementRef<'_>, selector: &Selector, attr: &str) -> Option<String> {
    container
        .select(selector)
        .next()
        .and_then(|el| el.value().attr(attr))
        .map(str::to_string)
}

/// Host part of a source URL: the first segment after `://`.
pub fn origin_host(origin_url: &str) -> &str {
    let rest = origin_url
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(origin_url);
    rest.split(['/', '?', '#']).next().unwrap_or(rest)
}

/// Make an attribute value absolute against `host`.
///
/// # Arguments
///
/// * `value` - Raw `src`/`href` attribute value
/// * `host` - Host of the source URL, see [`origin_host`]
///
/// # Returns
///
/// Values that already carry a scheme (`https://...`, `data:`, `mailto:`,
/// `tel:`, `javascript:`) and empty values are returned unchanged.
/// Protocol-relative values get `https:`; anything else is joined to
/// `https://{host}/`.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(absolutize("img/a.png", "example.com"), "https://example.com/img/a.png");
/// assert_eq!(absolutize("mailto:tips@example.com", "example.com"), "mailto:tips@example.com");
/// ```
pub fn absolutize(value: &str, host: &str) -> String {
    if value.is_empty() || value.contains("://") || has_opaque_scheme(value) {
        return value.to_string();
    }
    let value = value.trim();
    if let Some(rest) = value.strip_prefix("//") {
        return format!("https://{}", rest);
    }
    format!("https://{}/{}", host, value.trim_start_matches('/'))
}

fn has_opaque_scheme(value: &str) -> bool {
    const SCHEMES: [&str; 4] = ["data:", "mailto:", "tel:", "javascript:"];
    let head = value.trim_start();
    SCHEMES.iter().any(|scheme| {
        head.get(..scheme.len())
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(scheme))
    })
}
