// src/services/cleaner.rs

//! HTML cleaning stage collaborator.
//!
//! Reduces a detail page to the markup that carries material data: the page
//! chrome before the breadcrumb row, the trailing disclaimer row and
//! everything after it, scripts, styles, comments, supplier blocks and all
//! attributes except `charset` are removed.

use std::collections::HashSet;

use ego_tree::{NodeId, NodeRef};
use regex::Regex;
use scraper::node::Node;
use scraper::{Html, Selector};

use crate::error::{AppError, Result};
use crate::models::CleanerConfig;
use crate::utils::escape_html;

/// Elements serialized without a closing tag.
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

/// Pure raw-HTML to cleaned-HTML transform.
pub trait Cleaner: Send + Sync {
    fn clean(&self, raw_html: &str) -> Result<String>;
}

/// DOM-based cleaner driven by [`CleanerConfig`].
pub struct HtmlCleaner {
    config: CleanerConfig,
    breadcrumb: Selector,
    font: Selector,
    drop_tags: HashSet<String>,
    blank_lines: Regex,
    between_tags: Regex,
}

impl HtmlCleaner {
    pub fn new(config: CleanerConfig) -> Result<Self> {
        let breadcrumb = parse_selector(&config.breadcrumb_selector)?;
        let font = parse_selector("font")?;
        let drop_tags = config
            .drop_tags
            .iter()
            .map(|t| t.to_ascii_lowercase())
            .collect();
        let blank_lines =
            Regex::new(r"\n\s*\n").map_err(|e| AppError::config(e.to_string()))?;
        let between_tags = Regex::new(r">\s+<").map_err(|e| AppError::config(e.to_string()))?;

        Ok(Self {
            config,
            breadcrumb,
            font,
            drop_tags,
            blank_lines,
            between_tags,
        })
    }

    /// Nodes removed together with their subtree.
    fn collect_dropped(&self, document: &Html) -> HashSet<NodeId> {
        let mut dropped = HashSet::new();

        // Page chrome: everything before the row holding the breadcrumb.
        if let Some(row) = document
            .select(&self.breadcrumb)
            .next()
            .and_then(|crumb| self.enclosing_row(*crumb))
        {
            dropped.extend(row.prev_siblings().map(|n| n.id()));
        }

        // Disclaimer row and everything after it.
        let note = document.select(&self.font).find(|font| {
            font.text()
                .collect::<String>()
                .contains(&self.config.note_marker)
        });
        if let Some(row) = note.and_then(|font| self.enclosing_row(*font)) {
            dropped.insert(row.id());
            dropped.extend(row.next_siblings().map(|n| n.id()));
        }

        self.collect_comment_blocks(document, &mut dropped);
        dropped
    }

    /// Comments, and everything between a block start and end comment.
    ///
    /// An unterminated block only loses its opening comment.
    fn collect_comment_blocks(&self, document: &Html, dropped: &mut HashSet<NodeId>) {
        let start = &self.config.block_start_marker;
        let end = &self.config.block_end_marker;
        let mut pending: Option<Vec<NodeId>> = None;

        for node in document.tree.root().descendants() {
            if let Node::Comment(comment) = node.value() {
                dropped.insert(node.id());
                let text: &str = comment;
                if text.contains(end.as_str()) {
                    if let Some(block) = pending.take() {
                        dropped.extend(block);
                    }
                } else if text.contains(start.as_str()) && pending.is_none() {
                    pending = Some(Vec::new());
                }
                continue;
            }
            if let Some(block) = pending.as_mut() {
                block.push(node.id());
            }
        }
    }

    fn enclosing_row<'a>(&self, node: NodeRef<'a, Node>) -> Option<NodeRef<'a, Node>> {
        node.ancestors().find(|ancestor| {
            ancestor.value().as_element().is_some_and(|el| {
                el.name() == "div" && el.classes().any(|c| c == self.config.row_class)
            })
        })
    }

    fn serialize(&self, node: NodeRef<'_, Node>, dropped: &HashSet<NodeId>, out: &mut String) {
        if dropped.contains(&node.id()) {
            return;
        }
        match node.value() {
            Node::Doctype(doctype) => {
                out.push_str("<!DOCTYPE ");
                out.push_str(doctype.name());
                out.push('>');
            }
            Node::Text(text) => out.push_str(&escape_text(text)),
            Node::Element(element) => {
                let name = element.name();
                if self.drop_tags.contains(name) {
                    return;
                }
                let charset = element.attr("charset");
                if name == "meta" && charset.is_none() {
                    return;
                }

                out.push('<');
                out.push_str(name);
                if let Some(charset) = charset {
                    out.push_str(" charset=\"");
                    out.push_str(&escape_html(charset));
                    out.push('"');
                }
                out.push('>');

                if VOID_ELEMENTS.contains(&name) {
                    return;
                }
                for child in node.children() {
                    self.serialize(child, dropped, out);
                }
                out.push_str("</");
                out.push_str(name);
                out.push('>');
            }
            Node::Document | Node::Fragment => {
                for child in node.children() {
                    self.serialize(child, dropped, out);
                }
            }
            _ => {}
        }
    }
}

impl Cleaner for HtmlCleaner {
    fn clean(&self, raw_html: &str) -> Result<String> {
        let document = Html::parse_document(raw_html);
        let dropped = self.collect_dropped(&document);

        let mut out = String::with_capacity(raw_html.len());
        self.serialize(document.tree.root(), &dropped, &mut out);

        let out = self.blank_lines.replace_all(&out, "\n");
        let out = self.between_tags.replace_all(&out, ">\n<");
        Ok(out.into_owned())
    }
}

fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn parse_selector(s: &str) -> Result<Selector> {
    Selector::parse(s).map_err(|e| AppError::selector(s, format!("{e:?}")))
}
