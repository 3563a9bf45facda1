use std::sync::Arc;

use herald_core::error::AppError;
use herald_core::traits::TextExtractor;
use scraper::{ElementRef, Html, Selector};

/// Containers tried in order; the first one holding any text wins.
const ROOT_SELECTORS: &[&str] = &[
    "article",
    "[itemprop='articleBody']",
    ".article-content",
    ".post-content",
    ".entry-content",
    "main",
    "body",
];

const BLOCK_SELECTOR: &str = "p, h1, h2, h3, h4, h5, h6, li, blockquote, pre";

const BLOCK_TAGS: &[&str] = &["p", "h1", "h2", "h3", "h4", "h5", "h6", "li", "blockquote", "pre"];

/// Subtrees that never contain article prose.
const SKIP_TAGS: &[&str] = &[
    "nav", "header", "footer", "aside", "form", "script", "style", "noscript", "table", "figure",
    "button", "select",
];

/// Class fragments marking comment threads, share bars and the like.
const SKIP_CLASS_HINTS: &[&str] = &[
    "comment",
    "share",
    "social",
    "related",
    "newsletter",
    "advert",
    "promo",
    "cookie",
    "sidebar",
];

struct Selectors {
    roots: Vec<Selector>,
    blocks: Selector,
}

/// Extracts article prose from HTML using CSS selectors.
///
/// Text blocks (paragraphs, headings, list items, quotes) are collected from
/// the first matching content container. Navigation, comments, tables and
/// similar boilerplate are skipped. Blocks are joined with blank lines.
#[derive(Clone)]
pub struct ArticleExtractor {
    selectors: Arc<Selectors>,
}

impl ArticleExtractor {
    pub fn new() -> Result<Self, AppError> {
        let parse = |s: &str| {
            Selector::parse(s)
                .map_err(|e| AppError::ExtractionError(format!("Invalid selector '{s}': {e}")))
        };
        let roots = ROOT_SELECTORS
            .iter()
            .map(|s| parse(s))
            .collect::<Result<Vec<_>, _>>()?;
        let blocks = parse(BLOCK_SELECTOR)?;
        Ok(Self {
            selectors: Arc::new(Selectors { roots, blocks }),
        })
    }

    fn blocks_in(&self, root: ElementRef<'_>) -> Vec<String> {
        root.select(&self.selectors.blocks)
            .filter(|block| !is_boilerplate(*block, root))
            .map(|block| collapse_whitespace(block.text()))
            .filter(|text| !text.is_empty())
            .collect()
    }
}

impl TextExtractor for ArticleExtractor {
    fn extract(&self, html: &str) -> Result<Option<String>, AppError> {
        let document = Html::parse_document(html);

        for selector in &self.selectors.roots {
            for root in document.select(selector) {
                let blocks = self.blocks_in(root);
                if !blocks.is_empty() {
                    tracing::debug!(blocks = blocks.len(), "Extracted article blocks");
                    return Ok(Some(blocks.join("\n\n")));
                }
            }
        }

        // No block-level markup: fall back to the visible text of the page.
        let text = visible_text(&document);
        Ok((!text.is_empty()).then_some(text))
    }
}

/// Text nodes outside `<head>`, `<template>` and the skipped subtrees.
/// Script, style and noscript content never counts as prose.
fn visible_text(document: &Html) -> String {
    let texts = document.root_element().descendants().filter_map(|node| {
        let text = node.value().as_text()?;
        let hidden = node.ancestors().filter_map(ElementRef::wrap).any(|element| {
            let name = element.value().name();
            matches!(name, "head" | "template") || SKIP_TAGS.contains(&name)
        });
        (!hidden).then_some(&**text)
    });
    collapse_whitespace(texts)
}

/// True when `block` sits inside a skipped subtree or inside another text
/// block (whose text already includes it), looking no higher than `root`.
fn is_boilerplate(block: ElementRef<'_>, root: ElementRef<'_>) -> bool {
    if has_skip_class(block) {
        return true;
    }
    for node in block.ancestors() {
        if node.id() == root.id() {
            break;
        }
        let Some(element) = ElementRef::wrap(node) else {
            continue;
        };
        let name = element.value().name();
        if SKIP_TAGS.contains(&name) || BLOCK_TAGS.contains(&name) || has_skip_class(element) {
            return true;
        }
    }
    false
}

fn has_skip_class(element: ElementRef<'_>) -> bool {
    element.value().classes().any(|class| {
        let class = class.to_ascii_lowercase();
        SKIP_CLASS_HINTS.iter().any(|hint| class.contains(hint))
    })
}

fn collapse_whitespace<'a>(parts: impl Iterator<Item = &'a str>) -> String {
    let mut out = String::new();
    for word in parts.flat_map(str::split_whitespace) {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }
    out
}
