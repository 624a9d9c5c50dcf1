//! Markdown normalizer — strips markup from the final answer so clients that
//! render plain text do not show symbol noise.  Specified purely by the
//! substitution table below; applied in order.

use std::sync::OnceLock;

use regex::Regex;

macro_rules! re {
    ($name:ident, $pattern:expr) => {
        fn $name() -> &'static Regex {
            static RE: OnceLock<Regex> = OnceLock::new();
            RE.get_or_init(|| Regex::new($pattern).expect(stringify!($name)))
        }
    };
}

// Fenced code blocks: keep the body, drop the fences and info string.
re!(code_fence, r"(?s)```[^\n]*\n(.*?)```\n?");
// Inline code.
re!(inline_code, r"`([^`\n]+)`");
// Images: keep the alt text.
re!(image, r"!\[([^\]]*)\]\(([^)]+)\)");
// Links: keep text and target.
re!(link, r"\[([^\]]+)\]\(([^)]+)\)");
// ATX headers.
re!(header, r"(?m)^#{1,6}\s+");
// Horizontal rules.
re!(horizontal_rule, r"(?m)^[ \t]*(?:-{3,}|\*{3,}|_{3,})[ \t]*$");
// Blockquote prefixes.
re!(blockquote, r"(?m)^>[ \t]?");
// List bullets written with `*`.
re!(star_bullet, r"(?m)^([ \t]*)\*[ \t]+");
// Bold markers.
re!(bold_star, r"\*\*([^*]+)\*\*");
re!(bold_under, r"__([^_]+)__");
// Italic markers.
re!(italic_star, r"\*([^*\n]+)\*");
re!(italic_under, r"\b_([^_\n]+)_\b");
// Three or more consecutive blank lines.
re!(blank_run, r"\n{4,}");

/// Strip markdown markup from `text`, keeping all content.
pub fn normalize_markdown(text: &str) -> String {
    let text = code_fence().replace_all(text, "$1");
    let text = inline_code().replace_all(&text, "$1");
    let text = image().replace_all(&text, "$1");
    let text = link().replace_all(&text, "$1 ($2)");
    let text = header().replace_all(&text, "");
    let text = horizontal_rule().replace_all(&text, "");
    let text = blockquote().replace_all(&text, "");
    let text = star_bullet().replace_all(&text, "${1}- ");
    let text = bold_star().replace_all(&text, "$1");
    let text = bold_under().replace_all(&text, "$1");
    let text = italic_star().replace_all(&text, "$1");
    let text = italic_under().replace_all(&text, "$1");
    let text = blank_run().replace_all(&text, "\n\n\n");
    text.into_owned()
}
