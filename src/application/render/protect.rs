//! Protected diagram blocks.
//!
//! Diagram markup carries structure the sanitizer would mangle, so each block
//! is lifted out before conversion, replaced by an opaque token, and spliced
//! back verbatim afterwards. Blocks are located with an HTML-aware walk and
//! their extent is taken from a balanced-depth tag scan, so wrapper elements
//! and sibling controls nested inside the marked element travel with it. When
//! the HTML walk fails the regex extractor takes over for top-level blocks.

use std::cell::RefCell;
use std::rc::Rc;

use lol_html::{RewriteStrSettings, element, rewrite_str};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;
use uuid::Uuid;

use super::sanitizer::build_url_gate;
use super::types::RenderError;

/// Class that marks an element as a diagram container.
pub const DIAGRAM_MARKER_CLASS: &str = "mermaid-container";

const VOID_ELEMENTS: [&str; 14] = [
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];
const RAW_TEXT_ELEMENTS: [&str; 4] = ["script", "style", "textarea", "title"];
const EXECUTABLE_ELEMENTS: [&str; 12] = [
    "script", "iframe", "frame", "frameset", "object", "embed", "base", "meta", "link", "form",
    "animate", "set",
];

static CLASS_ATTR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)(?:^|\s)class\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'=<>`]+))"#)
        .expect("class attribute pattern is valid")
});

static EVENT_HANDLER_ATTR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:^|[\s/])on[a-z]+\s*=").expect("event handler pattern is valid")
});

static URL_ATTR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?is)(?:^|[\s/])(?:href|xlink:href|src|action|formaction|poster|background|cite|data)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'=<>`]+))"#,
    )
    .expect("url attribute pattern is valid")
});

static URL_GATE: Lazy<ammonia::Builder<'static>> = Lazy::new(build_url_gate);

static FALLBACK_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r#"(?is)<div\b[^>]*\bclass\s*=\s*["'][^"']*\b{}\b[^"']*["'][^>]*>.*?</div>"#,
        regex::escape(DIAGRAM_MARKER_CLASS)
    ))
    .expect("fallback block pattern is valid")
});

/// How placeholders are embedded in the document being processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PlaceholderStyle {
    /// Markdown source: the token stands alone as its own paragraph.
    Markdown,
    /// Already-rendered HTML: the token replaces the block inline.
    Html,
}

#[derive(Debug, Clone)]
struct ProtectedFragment {
    token: String,
    html: String,
}

/// Blocks lifted out of a document, ready to be restored.
#[derive(Debug, Clone, Default)]
pub(crate) struct ProtectedBlocks {
    fragments: Vec<ProtectedFragment>,
}

impl ProtectedBlocks {
    pub(crate) fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.fragments.len()
    }

    /// Splice every protected block back in place of its token.
    pub(crate) fn restore(&self, html: String) -> String {
        self.fragments.iter().fold(html, |acc, fragment| {
            let wrapped = format!("<p>{}</p>", fragment.token);
            if acc.contains(&wrapped) {
                acc.replace(&wrapped, &fragment.html)
            } else {
                acc.replace(&fragment.token, &fragment.html)
            }
        })
    }
}

/// Replace every diagram block in `input` with a token.
pub(crate) fn protect(input: &str, style: PlaceholderStyle) -> (String, ProtectedBlocks) {
    if !input.contains(DIAGRAM_MARKER_CLASS) {
        return (input.to_string(), ProtectedBlocks::default());
    }

    let spans = match locate_with_parser(input) {
        Ok(spans) => spans,
        Err(err) => {
            debug!(
                target = "application::render::protect",
                op = "protect",
                result = "regex_fallback",
                error = %err,
                "HTML walk unavailable; using regex extraction"
            );
            locate_with_regex(input)
        }
    };

    splice(input, &spans, style)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    start: usize,
    end: usize,
}

fn splice(input: &str, spans: &[Span], style: PlaceholderStyle) -> (String, ProtectedBlocks) {
    let nonce = Uuid::new_v4().simple().to_string();
    let mut output = String::with_capacity(input.len());
    let mut blocks = ProtectedBlocks::default();
    let mut cursor = 0;

    for (index, span) in spans.iter().enumerate() {
        let html = &input[span.start..span.end];
        if !is_safe_to_protect(html) {
            continue;
        }

        let token = format!("PROTECTEDBLOCK{nonce}X{index}END");
        output.push_str(&input[cursor..span.start]);
        match style {
            PlaceholderStyle::Markdown => {
                output.push_str("\n\n");
                output.push_str(&token);
                output.push_str("\n\n");
            }
            PlaceholderStyle::Html => output.push_str(&token),
        }
        blocks.fragments.push(ProtectedFragment {
            token,
            html: html.to_string(),
        });
        cursor = span.end;
    }

    output.push_str(&input[cursor..]);
    (output, blocks)
}

/// Blocks carrying executable markup go through the sanitizer instead.
fn is_safe_to_protect(html: &str) -> bool {
    let lower = html.to_ascii_lowercase();
    if lower.contains("<script") || lower.contains("javascript:") || lower.contains("<iframe") {
        return false;
    }

    !scan_tags(html).iter().any(|tag| {
        matches!(tag.kind, TagKind::Start { .. })
            && (EXECUTABLE_ELEMENTS.contains(&tag.name.as_str())
                || EVENT_HANDLER_ATTR.is_match(tag.attributes)
                || URL_ATTR
                    .captures_iter(tag.attributes)
                    .filter_map(|caps| caps.get(1).or(caps.get(2)).or(caps.get(3)))
                    .any(|url| !is_allowed_url(url.as_str())))
    })
}

/// Character references in attribute values are decoded by the browser, so the
/// scheme check runs on the parsed value.
fn is_allowed_url(raw: &str) -> bool {
    let anchor = format!(r#"<a href="{}">x</a>"#, raw.replace('"', "&quot;"));
    URL_GATE.clean(&anchor).to_string().contains("href=")
}

/// Walk the document with the HTML rewriter to learn which elements carry the
/// marker, then take each element's full extent from the balanced scan.
fn locate_with_parser(input: &str) -> Result<Vec<Span>, RenderError> {
    let marked_tags: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));

    rewrite_str(
        input,
        RewriteStrSettings {
            element_content_handlers: vec![element!(
                format!(".{DIAGRAM_MARKER_CLASS}"),
                {
                    let marked_tags = Rc::clone(&marked_tags);
                    move |el| {
                        marked_tags.borrow_mut().push(el.tag_name().to_ascii_lowercase());
                        Ok(())
                    }
                }
            )],
            ..RewriteStrSettings::default()
        },
    )
    .map_err(|err| RenderError::document(err.to_string()))?;

    let marked_tags = marked_tags.borrow();
    let tags = scan_tags(input);
    let marker_starts: Vec<usize> = tags
        .iter()
        .enumerate()
        .filter(|(_, tag)| match &tag.kind {
            TagKind::Start { .. } => has_marker_class(tag.attributes),
            TagKind::End => false,
        })
        .map(|(index, _)| index)
        .collect();

    let scanned_names: Vec<&str> = marker_starts.iter().map(|&i| tags[i].name.as_str()).collect();
    if scanned_names != marked_tags.iter().map(String::as_str).collect::<Vec<_>>() {
        return Err(RenderError::document(format!(
            "tag scan found {} marked elements, parser found {}",
            scanned_names.len(),
            marked_tags.len()
        )));
    }

    let mut spans: Vec<Span> = Vec::new();
    for index in marker_starts {
        let start = tags[index].start;
        if spans.last().is_some_and(|outer| start < outer.end) {
            // nested inside a block that is already protected
            continue;
        }
        let end = balanced_end(&tags, index).ok_or_else(|| {
            RenderError::document(format!(
                "unbalanced <{}> diagram block at byte {start}",
                tags[index].name
            ))
        })?;
        spans.push(Span { start, end });
    }

    Ok(spans)
}

fn locate_with_regex(input: &str) -> Vec<Span> {
    FALLBACK_BLOCK
        .find_iter(input)
        .map(|found| Span {
            start: found.start(),
            end: found.end(),
        })
        .collect()
}

/// Byte offset just past the closing tag matching `tags[open]`.
fn balanced_end(tags: &[Tag<'_>], open: usize) -> Option<usize> {
    let opening = &tags[open];
    if let TagKind::Start { self_closing: true } = opening.kind {
        return Some(opening.end);
    }
    if VOID_ELEMENTS.contains(&opening.name.as_str()) {
        return Some(opening.end);
    }

    let mut depth = 0usize;
    for tag in &tags[open..] {
        if tag.name != opening.name {
            continue;
        }
        match tag.kind {
            TagKind::Start { self_closing: true } => {}
            TagKind::Start { self_closing: false } => depth += 1,
            TagKind::End => {
                depth -= 1;
                if depth == 0 {
                    return Some(tag.end);
                }
            }
        }
    }
    None
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TagKind {
    Start { self_closing: bool },
    End,
}

#[derive(Debug, Clone)]
struct Tag<'a> {
    name: String,
    kind: TagKind,
    start: usize,
    end: usize,
    attributes: &'a str,
}

fn has_marker_class(attributes: &str) -> bool {
    CLASS_ATTR.captures_iter(attributes).any(|captures| {
        let value = captures
            .get(1)
            .or_else(|| captures.get(2))
            .or_else(|| captures.get(3))
            .map(|m| m.as_str())
            .unwrap_or_default();
        value
            .split_ascii_whitespace()
            .any(|class| class == DIAGRAM_MARKER_CLASS)
    })
}

/// Minimal tokenizer: start and end tags with byte ranges. Comments,
/// doctypes, and raw-text element bodies are skipped.
fn scan_tags(input: &str) -> Vec<Tag<'_>> {
    let bytes = input.as_bytes();
    let mut tags = Vec::new();
    let mut pos = 0;

    while let Some(offset) = input[pos..].find('<') {
        let start = pos + offset;
        let rest = &input[start..];

        if rest.starts_with("<!--") {
            pos = match rest.find("-->") {
                Some(close) => start + close + 3,
                None => input.len(),
            };
            continue;
        }
        if rest.starts_with("<!") || rest.starts_with("<?") {
            pos = match rest.find('>') {
                Some(close) => start + close + 1,
                None => input.len(),
            };
            continue;
        }

        let is_end = rest.starts_with("</");
        let name_start = start + if is_end { 2 } else { 1 };
        let name_len = input[name_start..]
            .bytes()
            .take_while(|b| b.is_ascii_alphanumeric() || *b == b'-' || *b == b':')
            .count();
        if name_len == 0 || !bytes[name_start].is_ascii_alphabetic() {
            pos = start + 1;
            continue;
        }
        let name_end = name_start + name_len;
        let Some(tag_end) = find_tag_close(input, name_end) else {
            break;
        };

        let name = input[name_start..name_end].to_ascii_lowercase();
        let inner = &input[name_end..tag_end - 1];
        let kind = if is_end {
            TagKind::End
        } else {
            TagKind::Start {
                self_closing: inner.trim_end().ends_with('/'),
            }
        };

        pos = tag_end;
        if kind == (TagKind::Start { self_closing: false })
            && RAW_TEXT_ELEMENTS.contains(&name.as_str())
        {
            let closing = format!("</{name}");
            let lower_rest = input[tag_end..].to_ascii_lowercase();
            pos = match lower_rest.find(&closing) {
                Some(found) => tag_end + found,
                None => input.len(),
            };
        }

        tags.push(Tag {
            name,
            kind,
            start,
            end: tag_end,
            attributes: inner,
        });
    }

    tags
}

/// Position just past the `>` that closes a tag, honouring quoted values.
fn find_tag_close(input: &str, from: usize) -> Option<usize> {
    let mut quote: Option<u8> = None;
    for (offset, byte) in input.as_bytes()[from..].iter().enumerate() {
        match (quote, *byte) {
            (Some(q), b) if b == q => quote = None,
            (Some(_), _) => {}
            (None, b'"') | (None, b'\'') => quote = Some(*byte),
            (None, b'>') => return Some(from + offset + 1),
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIAGRAM: &str = r#"<div class="mermaid-container" data-theme="dark"><pre class="mermaid">graph TD
  A--&gt;B</pre><div class="mermaid-actions"><button type="button" data-action="zoom">+</button></div></div>"#;

    #[test]
    fn html_blocks_round_trip_byte_for_byte() {
        let input = format!("<p>before</p>{DIAGRAM}<p>after</p>");
        let (protected, blocks) = protect(&input, PlaceholderStyle::Html);

        assert_eq!(blocks.len(), 1);
        assert!(!protected.contains("mermaid-container"));
        assert!(protected.starts_with("<p>before</p>PROTECTEDBLOCK"));
        assert_eq!(blocks.restore(protected), input);
    }

    #[test]
    fn nested_wrapper_is_extracted_whole() {
        let wrapped = format!(
            r#"<div class="mermaid-container"><div class="inner">{DIAGRAM}</div><span>controls</span></div>"#
        );
        let input = format!("{wrapped}<p>tail</p>");
        let (protected, blocks) = protect(&input, PlaceholderStyle::Html);

        assert_eq!(blocks.len(), 1);
        assert!(protected.ends_with("<p>tail</p>"));
        assert_eq!(blocks.fragments[0].html, wrapped);
    }

    #[test]
    fn markdown_placeholder_sits_in_its_own_paragraph() {
        let input = format!("intro\n{DIAGRAM}\noutro");
        let (protected, blocks) = protect(&input, PlaceholderStyle::Markdown);

        assert_eq!(blocks.len(), 1);
        let token = &blocks.fragments[0].token;
        assert!(protected.contains(&format!("\n\n{token}\n\n")));

        let rendered = format!("<p>intro</p>\n<p>{token}</p>\n<p>outro</p>");
        assert_eq!(
            blocks.restore(rendered),
            format!("<p>intro</p>\n{DIAGRAM}\n<p>outro</p>")
        );
    }

    #[test]
    fn blocks_with_scripts_are_left_for_the_sanitizer() {
        let input = r#"<div class="mermaid-container"><script>alert(1)</script></div>"#;
        let (protected, blocks) = protect(input, PlaceholderStyle::Html);
        assert!(blocks.is_empty());
        assert_eq!(protected, input);

        let handler = r#"<div class="mermaid-container"><svg onload="x()"></svg></div>"#;
        let (_, blocks) = protect(handler, PlaceholderStyle::Html);
        assert!(blocks.is_empty());
    }

    #[test]
    fn encoded_script_urls_are_left_for_the_sanitizer() {
        for href in [
            "jav&#x61;script:alert(document.cookie)",
            "&#106;avascript:alert(1)",
            "java&#x09;script:alert(1)",
            "data:text/html;base64,PHNjcmlwdD4=",
        ] {
            let input = format!(r#"<div class="mermaid-container"><a href="{href}">click</a></div>"#);
            let (protected, blocks) = protect(&input, PlaceholderStyle::Html);
            assert!(blocks.is_empty(), "{href} was protected");
            assert_eq!(protected, input);
        }

        let svg = r#"<div class="mermaid-container"><svg><a xlink:href='jav&#x61;script:x'><text>t</text></a></svg></div>"#;
        assert!(protect(svg, PlaceholderStyle::Html).1.is_empty());

        let embed = r#"<div class="mermaid-container"><object data="x.swf"></object></div>"#;
        assert!(protect(embed, PlaceholderStyle::Html).1.is_empty());
    }

    #[test]
    fn blocks_with_ordinary_links_are_still_protected() {
        let input = r##"<div class="mermaid-container"><a href="https://example.com/?a=1&amp;b=2">docs</a><a href="/local">x</a><a href="#n1">y</a></div>"##;
        let (_, blocks) = protect(input, PlaceholderStyle::Html);
        assert_eq!(blocks.len(), 1);
    }

    #[test]
    fn documents_without_marker_are_untouched() {
        let (protected, blocks) = protect("<p>plain</p>", PlaceholderStyle::Html);
        assert!(blocks.is_empty());
        assert_eq!(protected, "<p>plain</p>");
    }

    #[test]
    fn regex_fallback_finds_top_level_blocks() {
        let input = r#"<p>x</p><div class="note mermaid-container">graph</div>"#;
        let spans = locate_with_regex(input);
        assert_eq!(spans.len(), 1);
        assert_eq!(&input[spans[0].start..spans[0].end], &input[8..]);
    }

    #[test]
    fn balanced_scan_ignores_other_elements_and_comments() {
        let input = r#"<div class="mermaid-container"><!-- </div> --><span><div></div></span></div>rest"#;
        let tags = scan_tags(input);
        let end = balanced_end(&tags, 0).unwrap();
        assert_eq!(&input[end..], "rest");
    }

    #[test]
    fn class_matching_is_exact_per_token() {
        assert!(has_marker_class(r#" class="a mermaid-container b""#));
        assert!(has_marker_class(" class=mermaid-container"));
        assert!(!has_marker_class(r#" class="mermaid-container-old""#));
        assert!(!has_marker_class(r#" data-class="mermaid-container""#));
    }
}
