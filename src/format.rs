use crate::options::OutputFormat;
use std::path::Path;

/// Markdown code-fence language tag: the extension without its dot, empty
/// for extensionless files.
pub fn language_tag(path: &str) -> String {
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_string()
}

/// Per-file header for the chosen framing.
pub fn file_header(format: OutputFormat, path: &str) -> String {
    match format {
        OutputFormat::Markdown => format!("## File: {path}\n\n```{}\n", language_tag(path)),
        OutputFormat::Xml => format!("<file path=\"{path}\">\n<content>\n"),
        OutputFormat::Plain => format!("--- File: {path} ---\n"),
        OutputFormat::Json => String::new(),
    }
}

/// Per-file footer for the chosen framing.
pub fn file_footer(format: OutputFormat) -> &'static str {
    match format {
        OutputFormat::Markdown => "\n```\n\n",
        OutputFormat::Xml => "\n</content>\n</file>\n\n",
        OutputFormat::Plain => "\n\n",
        OutputFormat::Json => "",
    }
}

/// Escape a file body for the chosen framing. The XML escaper is
/// unconditional: pre-existing entities are re-escaped. The JSON framing
/// emits the body as one serializer-escaped JSON string; the caller wraps.
pub fn escape_body(format: OutputFormat, body: &str) -> String {
    match format {
        OutputFormat::Xml => escape_xml(body),
        OutputFormat::Json => serde_json::to_string(body).unwrap_or_default(),
        OutputFormat::Markdown | OutputFormat::Plain => body.to_string(),
    }
}

fn escape_xml(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markdown_framing_uses_extension_tag() {
        assert_eq!(file_header(OutputFormat::Markdown, "a.go"), "## File: a.go\n\n```go\n");
        assert_eq!(file_header(OutputFormat::Markdown, "Makefile"), "## File: Makefile\n\n```\n");
        assert_eq!(file_footer(OutputFormat::Markdown), "\n```\n\n");
    }

    #[test]
    fn xml_escaper_is_unconditional() {
        assert_eq!(escape_body(OutputFormat::Xml, "<div>&amp;</div>"), "&lt;div&gt;&amp;amp;&lt;/div&gt;");
    }

    #[test]
    fn json_framing_is_a_serialized_string() {
        let escaped = escape_body(OutputFormat::Json, "line\n\"quoted\"");
        assert_eq!(escaped, "\"line\\n\\\"quoted\\\"\"");
        assert_eq!(file_header(OutputFormat::Json, "x"), "");
        assert_eq!(file_footer(OutputFormat::Json), "");
    }

    #[test]
    fn plain_framing_delimiters() {
        assert_eq!(file_header(OutputFormat::Plain, "a/b.py"), "--- File: a/b.py ---\n");
        assert_eq!(file_footer(OutputFormat::Plain), "\n\n");
    }
}
