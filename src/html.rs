//! Error-tolerant HTML fragment parsing and serialization.
//!
//! The parser mirrors what a browser does with malformed playground markup:
//! unclosed tags are auto-closed, stray closing tags are ignored, void
//! elements never take children, and `script`/`style` bodies are raw text.
//! It never fails; anything it had to repair is reported as a warning so the
//! standalone HTML validator can surface it.

use crate::dom::{Document, NodeId, NodeKind};
use once_cell::sync::Lazy;
use regex::Regex;
use std::borrow::Cow;

/// `<script>...</script>` blocks, case-insensitive, non-greedy. Stripping
/// these before injection is the HTML executor's only isolation control.
static SCRIPT_ELEMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>").unwrap());

pub(crate) fn strip_script_elements(html: &str) -> Cow<'_, str> {
    SCRIPT_ELEMENT.replace_all(html, "")
}

/// Elements that never have children or a closing tag.
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

/// Elements whose content is raw text rather than markup.
const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style"];

fn is_void(tag: &str) -> bool {
    VOID_ELEMENTS.contains(&tag)
}

fn is_raw_text(tag: &str) -> bool {
    RAW_TEXT_ELEMENTS.contains(&tag)
}

pub(crate) struct ParsedFragment {
    /// Detached top-level nodes, ready for [`Document::adopt_children`].
    pub children: Vec<NodeId>,
    /// Human-readable notes about everything the parser repaired.
    pub warnings: Vec<String>,
}

/// Parse `html` into detached nodes inside `doc`. Never fails.
pub(crate) fn parse_fragment(doc: &mut Document, html: &str) -> ParsedFragment {
    let mut warnings = Vec::new();
    let root = doc.create_fragment();
    // (node, tag) pairs; index 0 is the fragment root.
    let mut open: Vec<(NodeId, String)> = vec![(root, String::new())];

    let bytes = html.as_bytes();
    let mut i = 0usize;

    while i < bytes.len() {
        if starts_with_at(bytes, i, b"<!--") {
            match find_subslice(bytes, i + 4, b"-->") {
                Some(end) => i = end + 3,
                None => {
                    warnings.push("unclosed HTML comment".to_string());
                    i = bytes.len();
                }
            }
            continue;
        }

        if starts_with_at(bytes, i, b"<!") {
            // Doctype or other declaration; skip through '>'.
            i = match bytes[i..].iter().position(|b| *b == b'>') {
                Some(offset) => i + offset + 1,
                None => bytes.len(),
            };
            continue;
        }

        if starts_with_at(bytes, i, b"</") {
            match parse_end_tag(html, i) {
                Some((tag, next)) => {
                    i = next;
                    close_open_element(&mut open, &tag, &mut warnings);
                }
                None => {
                    warnings.push("unterminated closing tag".to_string());
                    i = bytes.len();
                }
            }
            continue;
        }

        if bytes[i] == b'<' && i + 1 < bytes.len() && bytes[i + 1].is_ascii_alphabetic() {
            match parse_start_tag(html, i) {
                Some(start) => {
                    i = start.next;
                    let parent = open.last().map(|(node, _)| *node).unwrap_or(root);
                    let node = doc.create_element(&start.tag);
                    for (name, value) in &start.attrs {
                        let _ = doc.set_attr(node, name, value);
                    }
                    doc.attach_raw(parent, node);

                    if is_raw_text(&start.tag) {
                        i = consume_raw_text(doc, html, i, node, &start.tag, &mut warnings);
                        continue;
                    }
                    if !start.self_closing && !is_void(&start.tag) {
                        open.push((node, start.tag));
                    }
                }
                None => {
                    warnings.push("unterminated start tag".to_string());
                    i = bytes.len();
                }
            }
            continue;
        }

        // Plain text, including a lone '<' followed by a non-letter.
        let mut end = i + 1;
        while end < bytes.len() && bytes[end] != b'<' {
            end += 1;
        }
        let text = &html[i..end];
        if !text.is_empty() {
            let parent = open.last().map(|(node, _)| *node).unwrap_or(root);
            let node = doc.create_text(&decode_entities(text));
            doc.attach_raw(parent, node);
        }
        i = end;
    }

    for (_, tag) in open.iter().skip(1) {
        warnings.push(format!("unclosed <{}> auto-closed at end of input", tag));
    }

    ParsedFragment {
        children: doc.take_children(root),
        warnings,
    }
}

fn close_open_element(open: &mut Vec<(NodeId, String)>, tag: &str, warnings: &mut Vec<String>) {
    let Some(position) = open
        .iter()
        .skip(1)
        .rposition(|(_, open_tag)| open_tag.eq_ignore_ascii_case(tag))
        .map(|p| p + 1)
    else {
        warnings.push(format!("stray closing tag </{}> ignored", tag));
        return;
    };
    while open.len() > position + 1 {
        let (_, unclosed) = open.pop().unwrap_or((0, String::new()));
        warnings.push(format!("unclosed <{}> auto-closed by </{}>", unclosed, tag));
    }
    open.pop();
}

/// Capture a raw-text element body up to its matching end tag (or EOF).
fn consume_raw_text(
    doc: &mut Document,
    html: &str,
    from: usize,
    node: NodeId,
    tag: &str,
    warnings: &mut Vec<String>,
) -> usize {
    let bytes = html.as_bytes();
    let end_pattern = format!("</{}", tag);
    let close = find_subslice_ci(bytes, from, end_pattern.as_bytes());

    match close {
        Some(close) => {
            if close > from {
                let text = doc.create_text(&html[from..close]);
                doc.attach_raw(node, text);
            }
            match parse_end_tag(html, close) {
                Some((_, next)) => next,
                None => {
                    warnings.push(format!("unterminated closing tag for <{}>", tag));
                    bytes.len()
                }
            }
        }
        None => {
            warnings.push(format!("unclosed <{}> consumed rest of input", tag));
            if from < bytes.len() {
                let text = doc.create_text(&html[from..]);
                doc.attach_raw(node, text);
            }
            bytes.len()
        }
    }
}

struct StartTag {
    tag: String,
    attrs: Vec<(String, String)>,
    self_closing: bool,
    next: usize,
}

fn parse_start_tag(html: &str, at: usize) -> Option<StartTag> {
    let bytes = html.as_bytes();
    let mut i = at + 1;

    let tag_start = i;
    while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'-') {
        i += 1;
    }
    let tag = html[tag_start..i].to_ascii_lowercase();

    let mut attrs = Vec::new();
    let mut self_closing = false;

    loop {
        skip_ws(bytes, &mut i);
        if i >= bytes.len() {
            return None;
        }
        if bytes[i] == b'>' {
            i += 1;
            break;
        }
        if bytes[i] == b'/' && bytes.get(i + 1) == Some(&b'>') {
            self_closing = true;
            i += 2;
            break;
        }

        let name_start = i;
        while i < bytes.len() && !bytes[i].is_ascii_whitespace() && !matches!(bytes[i], b'=' | b'>' | b'/' | b'"' | b'\'')
        {
            i += 1;
        }
        let name = html[name_start..i].to_ascii_lowercase();
        if name.is_empty() {
            // Unparseable character inside the tag; skip it.
            i += 1;
            continue;
        }

        skip_ws(bytes, &mut i);
        let value = if i < bytes.len() && bytes[i] == b'=' {
            i += 1;
            skip_ws(bytes, &mut i);
            parse_attr_value(html, bytes, &mut i)?
        } else {
            String::new()
        };
        attrs.push((name, value));
    }

    Some(StartTag {
        tag,
        attrs,
        self_closing,
        next: i,
    })
}

fn parse_attr_value(html: &str, bytes: &[u8], i: &mut usize) -> Option<String> {
    if *i >= bytes.len() {
        return None;
    }
    if bytes[*i] == b'"' || bytes[*i] == b'\'' {
        let quote = bytes[*i];
        *i += 1;
        let start = *i;
        while *i < bytes.len() && bytes[*i] != quote {
            *i += 1;
        }
        if *i >= bytes.len() {
            return None;
        }
        let value = decode_entities(&html[start..*i]);
        *i += 1;
        return Some(value);
    }

    let start = *i;
    while *i < bytes.len() && !bytes[*i].is_ascii_whitespace() && bytes[*i] != b'>' {
        *i += 1;
    }
    Some(decode_entities(&html[start..*i]))
}

fn parse_end_tag(html: &str, at: usize) -> Option<(String, usize)> {
    let bytes = html.as_bytes();
    let mut i = at + 2;
    skip_ws(bytes, &mut i);
    let tag_start = i;
    while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'-') {
        i += 1;
    }
    let tag = html[tag_start..i].to_ascii_lowercase();
    while i < bytes.len() && bytes[i] != b'>' {
        i += 1;
    }
    if i >= bytes.len() {
        return None;
    }
    Some((tag, i + 1))
}

fn skip_ws(bytes: &[u8], i: &mut usize) {
    while *i < bytes.len() && bytes[*i].is_ascii_whitespace() {
        *i += 1;
    }
}

fn starts_with_at(bytes: &[u8], at: usize, needle: &[u8]) -> bool {
    bytes.get(at..at + needle.len()) == Some(needle)
}

fn find_subslice(bytes: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    if from > bytes.len() {
        return None;
    }
    bytes[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|offset| from + offset)
}

fn find_subslice_ci(bytes: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    if from > bytes.len() || needle.is_empty() {
        return None;
    }
    bytes[from..]
        .windows(needle.len())
        .position(|window| window.eq_ignore_ascii_case(needle))
        .map(|offset| from + offset)
}

fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];
        // Entities longer than 10 bytes are not worth chasing.
        let semi = match rest.find(';') {
            Some(semi) if semi <= 10 => semi,
            _ => {
                out.push('&');
                rest = &rest[1..];
                continue;
            }
        };
        let entity = &rest[1..semi];
        let decoded = match entity {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            "nbsp" => Some('\u{a0}'),
            _ => entity
                .strip_prefix("#x")
                .or_else(|| entity.strip_prefix("#X"))
                .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                .or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse().ok()))
                .and_then(char::from_u32),
        };
        match decoded {
            Some(ch) => {
                out.push(ch);
                rest = &rest[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn escape_attr(value: &str) -> String {
    value.replace('&', "&amp;").replace('"', "&quot;")
}

/// One step of the iterative serializer: visit a node, or emit the closing
/// tag of an element whose children have all been visited.
enum SerializeStep {
    Visit(NodeId),
    Close(NodeId),
}

/// Serialize the children of `node` back to normalized, well-formed markup.
///
/// Driven by an explicit work stack; the parser accepts arbitrarily deep
/// nesting, so serialization must not recurse per level.
pub(crate) fn serialize_children(doc: &Document, node: NodeId) -> String {
    let mut out = String::new();
    let mut stack: Vec<SerializeStep> = doc
        .node_unchecked(node)
        .children
        .iter()
        .rev()
        .map(|child| SerializeStep::Visit(*child))
        .collect();

    while let Some(step) = stack.pop() {
        let id = match step {
            SerializeStep::Close(id) => {
                if let NodeKind::Element { tag } = &doc.node_unchecked(id).kind {
                    out.push_str("</");
                    out.push_str(tag);
                    out.push('>');
                }
                continue;
            }
            SerializeStep::Visit(id) => id,
        };

        let node = doc.node_unchecked(id);
        match &node.kind {
            NodeKind::Text(text) => out.push_str(&escape_text(text)),
            NodeKind::Fragment => {
                stack.extend(node.children.iter().rev().map(|c| SerializeStep::Visit(*c)));
            }
            NodeKind::Element { tag } => {
                out.push('<');
                out.push_str(tag);
                for (name, value) in &node.attrs {
                    out.push(' ');
                    out.push_str(name);
                    out.push_str("=\"");
                    out.push_str(&escape_attr(value));
                    out.push('"');
                }
                out.push('>');
                if is_void(tag.as_str()) {
                    continue;
                }
                if is_raw_text(tag.as_str()) {
                    for child in &node.children {
                        if let NodeKind::Text(text) = &doc.node_unchecked(*child).kind {
                            out.push_str(text);
                        }
                    }
                    out.push_str("</");
                    out.push_str(tag);
                    out.push('>');
                    continue;
                }
                stack.push(SerializeStep::Close(id));
                stack.extend(node.children.iter().rev().map(|c| SerializeStep::Visit(*c)));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(html: &str) -> (String, Vec<String>) {
        let mut doc = Document::new();
        let fragment = parse_fragment(&mut doc, html);
        let warnings = fragment.warnings;
        let container = doc.container();
        doc.adopt_children(container, fragment.children);
        (serialize_children(&doc, container), warnings)
    }

    #[test]
    fn test_auto_closes_unclosed_tags() {
        let (markup, warnings) = round_trip("<div><p>unclosed");
        assert_eq!(markup, "<div><p>unclosed</p></div>");
        assert_eq!(warnings.len(), 2);
        assert!(warnings.iter().any(|w| w.contains("<p>")));
    }

    #[test]
    fn test_mismatched_close_pops_through() {
        let (markup, warnings) = round_trip("<div><b>bold</div>");
        assert_eq!(markup, "<div><b>bold</b></div>");
        assert!(warnings.iter().any(|w| w.contains("unclosed <b>")));
    }

    #[test]
    fn test_stray_closing_tag_is_ignored() {
        let (markup, warnings) = round_trip("text</b>more");
        assert_eq!(markup, "textmore");
        assert!(warnings.iter().any(|w| w.contains("stray closing tag")));
    }

    #[test]
    fn test_void_elements_take_no_children() {
        let (markup, warnings) = round_trip("<p>a<br>b<img src=\"x.png\"></p>");
        assert_eq!(markup, "<p>a<br>b<img src=\"x.png\"></p>");
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_attribute_forms() {
        let (markup, _) = round_trip(r#"<input type="text" disabled value=plain>"#);
        assert_eq!(markup, r#"<input type="text" disabled="" value="plain">"#);
    }

    #[test]
    fn test_comments_and_doctype_are_dropped() {
        let (markup, warnings) = round_trip("<!doctype html><!-- hidden --><p>kept</p>");
        assert_eq!(markup, "<p>kept</p>");
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_unclosed_comment_warns() {
        let (markup, warnings) = round_trip("<p>a</p><!-- trailing");
        assert_eq!(markup, "<p>a</p>");
        assert!(warnings.iter().any(|w| w.contains("comment")));
    }

    #[test]
    fn test_entities_decode_and_reescape() {
        let (markup, _) = round_trip("<p>1 &lt; 2 &amp;&amp; 3 &gt; 2</p>");
        assert_eq!(markup, "<p>1 &lt; 2 &amp;&amp; 3 &gt; 2</p>");
        let (markup, _) = round_trip("<p>&#65;&#x42;</p>");
        assert_eq!(markup, "<p>AB</p>");
    }

    #[test]
    fn test_lone_angle_bracket_is_text() {
        let (markup, _) = round_trip("<p>x < y</p>");
        assert_eq!(markup, "<p>x &lt; y</p>");
    }

    #[test]
    fn test_style_body_is_raw_text() {
        let (markup, _) = round_trip("<style>a > b { color: red; }</style>");
        assert_eq!(markup, "<style>a > b { color: red; }</style>");
    }

    #[test]
    fn test_deeply_nested_markup_round_trips() {
        // Deep enough that per-level recursion would blow the thread stack.
        let depth = 100_000;
        let (markup, warnings) = round_trip(&"<div>".repeat(depth));
        assert_eq!(markup.matches("<div>").count(), depth);
        assert_eq!(markup.matches("</div>").count(), depth);
        assert_eq!(warnings.len(), depth);
    }

    #[test]
    fn test_strip_script_elements() {
        let html = r#"before<SCRIPT type="text/javascript">alert(1)</SCRIPT>mid<script>x</script>after"#;
        assert_eq!(strip_script_elements(html), "beforemidafter");
    }

    #[test]
    fn test_strip_is_non_greedy() {
        let html = "<script>a</script><p>keep</p><script>b</script>";
        assert_eq!(strip_script_elements(html), "<p>keep</p>");
    }

    #[test]
    fn test_strip_leaves_scriptless_input_alone() {
        let html = "<div>no scripts here</div>";
        assert_eq!(strip_script_elements(html), html);
    }
}
