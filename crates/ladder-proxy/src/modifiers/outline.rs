//! Reader view: turns an HTML page into a JSON outline of its main content.

use crate::proxychain::{response_modifier, ModifierError, ProxyChain, ResponseModifier};
use hyper::header::{HeaderValue, CONTENT_ENCODING, CONTENT_TYPE};
use scraper::{ElementRef, Html, Node, Selector};
use serde::Serialize;
use tracing::debug;

#[derive(Debug, Default, Serialize)]
pub struct OutlineDocument {
    pub success: bool,
    pub error: OutlineError,
    pub metadata: OutlineMetadata,
    pub content: Vec<ContentItem>,
    pub comments: String,
}

#[derive(Debug, Default, Serialize)]
pub struct OutlineError {
    pub message: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub cause: String,
}

#[derive(Debug, Default, Serialize)]
pub struct OutlineMetadata {
    pub title: String,
    pub author: String,
    pub url: String,
    pub hostname: String,
    pub description: String,
    pub sitename: String,
    pub date: String,
    pub categories: Vec<String>,
    pub tags: Vec<String>,
    pub license: String,
}

/// One block of the main content, in document order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentItem {
    Img {
        url: String,
        alt: String,
        caption: String,
    },
    A {
        href: String,
        data: String,
    },
    H1 {
        data: String,
    },
    H2 {
        data: String,
    },
    H3 {
        data: String,
    },
    P {
        data: String,
    },
}

/// Replace the HTML body with its [`OutlineDocument`] as JSON.
pub fn outline() -> ResponseModifier {
    response_modifier(|chain| {
        let html = String::from_utf8_lossy(chain.body()).into_owned();
        let document = Html::parse_document(&html);
        let outline = build_outline(chain, &document)?;
        debug!(
            "Outlined {} content blocks from {}",
            outline.content.len(),
            outline.metadata.url
        );
        let json = serde_json::to_vec_pretty(&outline)?;

        let headers = &mut chain.response_mut()?.headers;
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.remove(CONTENT_ENCODING);
        chain.set_body(json);
        Ok(())
    })
}

fn selector(css: &str) -> Result<Selector, ModifierError> {
    Selector::parse(css).map_err(|e| ModifierError::custom(format!("bad selector '{css}': {e:?}")))
}

fn build_outline(chain: &ProxyChain, document: &Html) -> Result<OutlineDocument, ModifierError> {
    let url = chain.url();
    let meta = |names: &[&str]| -> Result<String, ModifierError> {
        for name in names {
            let css = format!("meta[name=\"{name}\"], meta[property=\"{name}\"]");
            if let Some(content) = first_attr(document, &css, "content")? {
                return Ok(content);
            }
        }
        Ok(String::new())
    };

    let title = match first_text(document, "title")? {
        Some(title) => title,
        None => meta(&["og:title"])?,
    };
    let date = meta(&["article:published_time", "date"])?
        .chars()
        .take(10)
        .collect();
    let tags = meta(&["article:tag", "keywords"])?
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect();
    let categories = match meta(&["article:section"])? {
        section if section.is_empty() => Vec::new(),
        section => vec![section],
    };

    let metadata = OutlineMetadata {
        title,
        author: meta(&["author", "article:author"])?,
        url: url.map(|u| u.to_string()).unwrap_or_default(),
        hostname: url
            .and_then(|u| u.host_str())
            .unwrap_or_default()
            .to_string(),
        description: meta(&["description", "og:description"])?,
        sitename: meta(&["og:site_name"])?,
        date,
        categories,
        tags,
        license: first_attr(document, "link[rel=\"license\"]", "href")?.unwrap_or_default(),
    };

    let mut content = Vec::new();
    if let Some(root) = main_content(document)? {
        content = parse_content(root);
    }

    let comments = match document
        .select(&selector("#comments, .comments")?)
        .next()
    {
        Some(node) => node.html(),
        None => String::new(),
    };

    Ok(OutlineDocument {
        success: true,
        error: OutlineError::default(),
        metadata,
        content,
        comments,
    })
}

fn main_content(document: &Html) -> Result<Option<ElementRef<'_>>, ModifierError> {
    for css in ["article", "main", "body"] {
        if let Some(node) = document.select(&selector(css)?).next() {
            return Ok(Some(node));
        }
    }
    Ok(None)
}

fn first_attr(document: &Html, css: &str, attr: &str) -> Result<Option<String>, ModifierError> {
    Ok(document
        .select(&selector(css)?)
        .filter_map(|el| el.value().attr(attr))
        .map(str::trim)
        .find(|v| !v.is_empty())
        .map(str::to_string))
}

fn first_text(document: &Html, css: &str) -> Result<Option<String>, ModifierError> {
    Ok(document
        .select(&selector(css)?)
        .map(inner_text)
        .find(|t| !t.is_empty()))
}

/// Text of `element` with whitespace runs collapsed.
fn inner_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn parse_content(root: ElementRef<'_>) -> Vec<ContentItem> {
    let mut content = Vec::new();
    for child in root.children() {
        let item = match child.value() {
            Node::Element(_) => {
                let Some(element) = ElementRef::wrap(child) else {
                    continue;
                };
                let attr = |name: &str| element.value().attr(name).unwrap_or_default().to_string();
                match element.value().name() {
                    "img" => ContentItem::Img {
                        url: attr("src"),
                        alt: attr("alt"),
                        caption: attr("caption"),
                    },
                    "a" => ContentItem::A {
                        href: attr("href"),
                        data: inner_text(element),
                    },
                    "h1" => ContentItem::H1 {
                        data: inner_text(element),
                    },
                    "h2" => ContentItem::H2 {
                        data: inner_text(element),
                    },
                    "h3" => ContentItem::H3 {
                        data: inner_text(element),
                    },
                    "script" | "style" | "noscript" | "template" => continue,
                    _ => ContentItem::P {
                        data: inner_text(element),
                    },
                }
            }
            Node::Text(text) => ContentItem::P {
                data: text.split_whitespace().collect::<Vec<_>>().join(" "),
            },
            _ => continue,
        };
        if let ContentItem::P { data } = &item {
            if data.is_empty() {
                continue;
            }
        }
        content.push(item);
    }
    content
}
