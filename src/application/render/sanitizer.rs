use std::collections::HashSet;

use ammonia::Builder as AmmoniaBuilder;
use comrak::options::Options;

/// Scheme used for internal object references such as uploaded files.
pub const INTERNAL_SCHEME: &str = "anzhiyu";

const URL_SCHEMES: [&str; 5] = ["http", "https", "mailto", "tel", INTERNAL_SCHEME];

pub(crate) fn default_options() -> Options<'static> {
    let mut options = Options::default();

    let ext = &mut options.extension;
    ext.strikethrough = true;
    ext.tagfilter = false;
    ext.table = true;
    ext.autolink = true;
    ext.tasklist = true;
    ext.superscript = false;
    ext.footnotes = true;
    ext.math_dollars = true;
    ext.math_code = true;
    ext.underline = true;
    ext.spoiler = true;
    ext.cjk_friendly_emphasis = true;

    let render = &mut options.render;
    render.hardbreaks = true;
    render.github_pre_lang = true;
    render.r#unsafe = true;
    render.sourcepos = false;

    options
}

pub(crate) fn build_comment_sanitizer() -> AmmoniaBuilder<'static> {
    let mut builder = AmmoniaBuilder::default();

    let tags: HashSet<&'static str> = HashSet::from([
        "a",
        "abbr",
        "audio",
        "b",
        "blockquote",
        "br",
        "code",
        "del",
        "details",
        "div",
        "em",
        "figcaption",
        "figure",
        "h1",
        "h2",
        "h3",
        "h4",
        "h5",
        "h6",
        "hr",
        "i",
        "img",
        "input",
        "ins",
        "kbd",
        "li",
        "mark",
        "ol",
        "p",
        "pre",
        "s",
        "section",
        "source",
        "span",
        "strong",
        "sub",
        "summary",
        "sup",
        "table",
        "tbody",
        "td",
        "tfoot",
        "th",
        "thead",
        "tr",
        "u",
        "ul",
        "video",
        // math markup
        "math",
        "semantics",
        "annotation",
        "mrow",
        "mi",
        "mn",
        "mo",
        "ms",
        "mtext",
        "mspace",
        "msup",
        "msub",
        "msubsup",
        "mfrac",
        "msqrt",
        "mroot",
        "mover",
        "munder",
        "munderover",
        "mtable",
        "mtr",
        "mtd",
        "mstyle",
    ]);
    builder.tags(tags);

    let generic: HashSet<&'static str> = HashSet::from([
        "class",
        "id",
        "title",
        "lang",
        "dir",
        "aria-hidden",
        "aria-label",
        "role",
        "data-footnote-ref",
        "data-footnotes",
        "data-footnote-backref",
        "data-math-style",
        // rich interactive content blocks
        "data-type",
        "data-id",
        "data-title",
        "data-content",
        "data-src",
    ]);
    builder.generic_attributes(generic);

    builder.add_tag_attributes("a", &["target"]);
    builder.add_tag_attributes(
        "img",
        &["title", "width", "height", "alt", "loading", "decoding"],
    );
    builder.add_tag_attributes("code", &["data-language", "class", "data-math-style"]);
    builder.add_tag_attributes("pre", &["class", "data-language"]);
    builder.add_tag_attributes("th", &["align", "colspan", "rowspan", "scope"]);
    builder.add_tag_attributes("td", &["align", "colspan", "rowspan"]);
    builder.add_tag_attributes("input", &["type", "checked", "disabled"]);
    builder.add_tag_attributes("details", &["open"]);
    builder.add_tag_attributes(
        "video",
        &[
            "src", "poster", "controls", "width", "height", "preload", "loop", "muted",
        ],
    );
    builder.add_tag_attributes("audio", &["src", "controls", "preload", "loop"]);
    builder.add_tag_attributes("source", &["src", "type"]);
    builder.add_tag_attributes("math", &["display", "xmlns"]);
    builder.add_tag_attributes("annotation", &["encoding"]);

    builder.add_url_schemes(URL_SCHEMES.iter().copied());

    builder
}

/// A single-link cleaner: `<a href="...">` keeps its `href` only when the
/// entity-decoded URL uses one of the comment URL schemes.
pub(crate) fn build_url_gate() -> AmmoniaBuilder<'static> {
    let mut builder = AmmoniaBuilder::default();
    builder
        .tags(HashSet::from(["a"]))
        .url_schemes(URL_SCHEMES.iter().copied().collect())
        .link_rel(None);
    builder
}
