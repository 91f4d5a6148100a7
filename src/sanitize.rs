//! HTML sanitization for wiki page bodies.
//!
//! Downstream indexing wants visible text only, so the page collector
//! strips markup into the `body_text` column while leaving the storage
//! and view representations untouched. Script and style subtrees are
//! dropped entirely, everything else contributes its text content, and
//! whitespace is collapsed to single spaces.

use quick_xml::events::Event;
use quick_xml::Reader;

/// Tags whose entire subtree is invisible content.
fn is_dropped_tag(name: &[u8]) -> bool {
    name.eq_ignore_ascii_case(b"script") || name.eq_ignore_ascii_case(b"style")
}

/// Strip markup from an HTML fragment and return the visible text.
///
/// Lenient by design: wiki storage format is XHTML-ish but real pages
/// contain unclosed tags and stray entities. A parse error ends the
/// walk with whatever text was collected so far; if the parse failed
/// before any text was collected the raw input is returned
/// whitespace-collapsed rather than losing the body. A clean parse
/// that yields no text (script-only or markup-only bodies) returns
/// the empty string.
pub fn html_to_text(html: &str) -> String {
    if html.is_empty() {
        return String::new();
    }

    let mut reader = Reader::from_str(html);
    reader.config_mut().check_end_names = false;
    reader.config_mut().trim_text(true);

    let mut out = String::new();
    let mut drop_depth: u32 = 0;
    let mut parse_error = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                if is_dropped_tag(e.local_name().as_ref()) {
                    drop_depth += 1;
                }
            }
            Ok(Event::End(e)) => {
                if is_dropped_tag(e.local_name().as_ref()) {
                    drop_depth = drop_depth.saturating_sub(1);
                }
            }
            Ok(Event::Text(t)) if drop_depth == 0 => {
                let text = t
                    .unescape()
                    .map(|s| s.into_owned())
                    .unwrap_or_else(|_| String::from_utf8_lossy(t.as_ref()).into_owned());
                push_word_separated(&mut out, &text);
            }
            Ok(Event::CData(c)) if drop_depth == 0 => {
                let text = String::from_utf8_lossy(c.as_ref()).into_owned();
                push_word_separated(&mut out, &text);
            }
            Ok(Event::Eof) => break,
            Err(_) => {
                parse_error = true;
                break;
            }
            Ok(_) => {}
        }
        buf.clear();
    }

    if out.is_empty() && parse_error {
        collapse_whitespace(html)
    } else {
        out
    }
}

/// Append `text` with whitespace collapsed, separated from existing
/// content by a single space.
fn push_word_separated(out: &mut String, text: &str) {
    for word in text.split_whitespace() {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }
}

fn collapse_whitespace(text: &str) -> String {
    let mut out = String::new();
    push_word_separated(&mut out, text);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_tags() {
        let html = "<h1>Release notes</h1><p>Shipped <b>v2</b> today.</p>";
        assert_eq!(html_to_text(html), "Release notes Shipped v2 today.");
    }

    #[test]
    fn drops_script_and_style() {
        let html = "<p>visible</p><script>alert('x')</script><style>p { color: red }</style><p>also visible</p>";
        assert_eq!(html_to_text(html), "visible also visible");
    }

    #[test]
    fn nested_script_content_is_dropped() {
        let html = "<div>before<script><span>never</span></script>after</div>";
        assert_eq!(html_to_text(html), "before after");
    }

    #[test]
    fn collapses_whitespace() {
        let html = "<p>one\n\n   two</p>\n<p>\tthree</p>";
        assert_eq!(html_to_text(html), "one two three");
    }

    #[test]
    fn decodes_entities() {
        let html = "<p>a &amp; b &lt;ok&gt;</p>";
        assert_eq!(html_to_text(html), "a & b <ok>");
    }

    #[test]
    fn empty_input() {
        assert_eq!(html_to_text(""), "");
    }

    #[test]
    fn script_only_body_yields_nothing() {
        assert_eq!(html_to_text("<script>alert('x')</script>"), "");
        assert_eq!(html_to_text("<style>p { color: red }</style>"), "");
    }

    #[test]
    fn malformed_markup_falls_back_to_raw() {
        // An unterminated comment fails the parse before any text event.
        assert_eq!(html_to_text("<!--   broken"), "<!-- broken");
    }

    #[test]
    fn plain_text_passes_through() {
        assert_eq!(html_to_text("no markup   here"), "no markup here");
    }
}
