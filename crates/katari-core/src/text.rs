//! Small text helpers for HTML status bodies.

/// Extract plain text from an HTML fragment.
///
/// Statuses arrive as HTML. We only need enough fidelity for token-level
/// parsing (consent replies, admin commands), so this is a small
/// state machine rather than a full parser: tags are dropped, `<br>` and
/// closing `</p>` become whitespace, and the common entities are decoded.
pub fn strip_html(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut chars = html.char_indices().peekable();

    while let Some((index, c)) = chars.next() {
        if c != '<' {
            out.push(c);
            continue;
        }

        // Collect the tag up to '>' (unterminated tag: drop the rest).
        let rest = &html[index..];
        let Some(end) = rest.find('>') else { break };
        let tag = rest[1..end].trim().to_ascii_lowercase();
        if tag.starts_with("br") || tag.starts_with("/p") {
            out.push(' ');
        }
        // Skip to the '>'.
        while let Some((i, _)) = chars.peek() {
            if *i > index + end {
                break;
            }
            chars.next();
        }
    }

    decode_entities(out.trim())
}

fn decode_entities(text: &str) -> String {
    text.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
}

/// 大文字化: 先頭1文字だけ（プロバイダ名の表示用）。
pub fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_simple_markup() {
        let html = "<p><span class=\"h-card\"><a href=\"#\">@katari</a></span> yes</p>";
        assert_eq!(strip_html(html), "@katari yes");
    }

    #[test]
    fn breaks_become_whitespace() {
        assert_eq!(strip_html("<p>line one</p><p>line two</p>"), "line one line two");
        assert_eq!(strip_html("a<br/>b"), "a b");
    }

    #[test]
    fn decodes_common_entities() {
        assert_eq!(strip_html("fish &amp; chips &gt; salad"), "fish & chips > salad");
    }

    #[test]
    fn plain_text_passes_through() {
        assert_eq!(strip_html("unban 12345"), "unban 12345");
    }

    #[test]
    fn title_cases_provider_names() {
        assert_eq!(title_case("gemini"), "Gemini");
        assert_eq!(title_case(""), "");
    }
}
