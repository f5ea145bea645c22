use crate::options::BuildOptions;
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

/// Comment syntax family, chosen by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CommentStyle {
    CFamily,
    Hash,
    XmlLike,
    None,
}

fn extension(path: &str) -> String {
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase()
}

fn comment_style(path: &str) -> CommentStyle {
    match extension(path).as_str() {
        "go" | "js" | "ts" | "java" | "c" | "cpp" | "cs" => CommentStyle::CFamily,
        "py" | "sh" => CommentStyle::Hash,
        "html" | "xml" => CommentStyle::XmlLike,
        _ => CommentStyle::None,
    }
}

/// Apply the enabled transformations in their fixed order:
/// skeleton, comments, license, data compaction, whitespace trim, blank-line
/// collapse. Line numbering is separate (`number_lines`) since it runs after
/// everything else and before framing.
pub fn transform_content(path: &str, content: &str, opts: &BuildOptions) -> String {
    let mut text = content.to_string();
    if opts.skeleton_mode {
        text = render_skeleton(&text);
    }
    if opts.strip_comments {
        text = strip_comments(path, &text);
    }
    if opts.strip_license {
        text = strip_license(path, &text);
    }
    if opts.compact_data_files {
        text = compact_data_file(path, &text);
    }
    if opts.trim_whitespace {
        text = trim_trailing_whitespace(&text);
    }
    if opts.collapse_empty_lines {
        text = collapse_empty_lines(&text);
    }
    text
}

// ─────────────────────────────────────────────────────────────────────────────
// Comment stripping
// ─────────────────────────────────────────────────────────────────────────────

pub fn strip_comments(path: &str, content: &str) -> String {
    match comment_style(path) {
        CommentStyle::CFamily => strip_c_comments(content),
        CommentStyle::Hash => strip_hash_comments(content),
        CommentStyle::XmlLike => strip_xml_comments(content),
        CommentStyle::None => content.to_string(),
    }
}

/// Remove `//` line comments and `/* ... */` block comments. Block comments
/// carry across lines; when a terminator shares a line with code, the
/// post-terminator remainder is kept. String and char literals are honored so
/// a `//` inside them survives. Lines that held nothing but comment are
/// dropped entirely rather than left blank.
fn strip_c_comments(src: &str) -> String {
    let mut out = String::with_capacity(src.len());
    let mut in_block = false;

    for raw in src.split_inclusive('\n') {
        let has_nl = raw.ends_with('\n');
        let line = if has_nl { &raw[..raw.len() - 1] } else { raw };

        let mut kept = String::with_capacity(line.len());
        let mut saw_comment = in_block;
        let mut in_str: Option<char> = None;
        let mut escaped = false;
        let mut chars = line.chars().peekable();

        while let Some(c) = chars.next() {
            if in_block {
                if c == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    in_block = false;
                }
                continue;
            }
            if let Some(quote) = in_str {
                kept.push(c);
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == quote {
                    in_str = None;
                }
                continue;
            }
            match c {
                '"' | '\'' => {
                    in_str = Some(c);
                    kept.push(c);
                }
                '/' => match chars.peek() {
                    Some('/') => {
                        saw_comment = true;
                        break;
                    }
                    Some('*') => {
                        chars.next();
                        in_block = true;
                        saw_comment = true;
                    }
                    _ => kept.push('/'),
                },
                _ => kept.push(c),
            }
        }

        if saw_comment && kept.trim().is_empty() {
            continue;
        }
        out.push_str(&kept);
        if has_nl {
            out.push('\n');
        }
    }
    out
}

/// Drop lines whose first non-whitespace character is `#`.
fn strip_hash_comments(src: &str) -> String {
    let mut out = String::with_capacity(src.len());
    for raw in src.split_inclusive('\n') {
        let line = raw.strip_suffix('\n').unwrap_or(raw);
        if line.trim_start().starts_with('#') {
            continue;
        }
        out.push_str(raw);
    }
    out
}

/// Iteratively remove `<!-- ... -->` spans (non-nested). An unterminated
/// opener swallows the rest of the document.
fn strip_xml_comments(src: &str) -> String {
    let mut out = src.to_string();
    loop {
        let Some(start) = out.find("<!--") else {
            break;
        };
        match out[start + 4..].find("-->") {
            Some(rel) => out.replace_range(start..start + 4 + rel + 3, ""),
            None => {
                out.truncate(start);
                break;
            }
        }
    }
    out
}

// ─────────────────────────────────────────────────────────────────────────────
// License stripping
// ─────────────────────────────────────────────────────────────────────────────

const LICENSE_KEYWORDS: [&str; 9] = [
    "copyright",
    "license",
    "licensed",
    "spdx-license",
    "mit license",
    "apache license",
    "bsd license",
    "all rights reserved",
    "permission is hereby granted",
];

/// Excise a leading license header: a block comment or contiguous run of
/// leading line comments whose lowercased text matches a known keyword, plus
/// any blank lines that follow it. Files without a known comment syntax are
/// untouched.
pub fn strip_license(path: &str, content: &str) -> String {
    let style = comment_style(path);
    let Some((header_end, header_text)) = leading_comment_span(style, content) else {
        return content.to_string();
    };

    let lowered = header_text.to_lowercase();
    if !LICENSE_KEYWORDS.iter().any(|kw| lowered.contains(kw)) {
        return content.to_string();
    }

    let mut rest = &content[header_end..];
    loop {
        match rest.find('\n') {
            Some(nl) if rest[..nl].trim().is_empty() => rest = &rest[nl + 1..],
            Some(_) => break,
            None => {
                if rest.trim().is_empty() {
                    rest = "";
                }
                break;
            }
        }
    }
    rest.to_string()
}

/// Locate the leading comment of `content` under the given style, skipping
/// initial blank lines. Returns the byte offset just past the comment and the
/// comment's text.
fn leading_comment_span(style: CommentStyle, content: &str) -> Option<(usize, String)> {
    let start = content
        .char_indices()
        .find(|(_, c)| !c.is_whitespace())
        .map(|(i, _)| i)?;
    let body = &content[start..];

    match style {
        CommentStyle::CFamily => {
            if body.starts_with("/*") {
                let end = body.find("*/")? + 2;
                Some((start + end, body[..end].to_string()))
            } else if body.starts_with("//") {
                Some(line_comment_run(content, start, "//"))
            } else {
                None
            }
        }
        CommentStyle::Hash => {
            if body.starts_with('#') {
                Some(line_comment_run(content, start, "#"))
            } else {
                None
            }
        }
        CommentStyle::XmlLike => {
            if body.starts_with("<!--") {
                let end = body.find("-->")? + 3;
                Some((start + end, body[..end].to_string()))
            } else {
                None
            }
        }
        CommentStyle::None => None,
    }
}

/// Extent of a contiguous run of line comments beginning at `start`.
fn line_comment_run(content: &str, start: usize, marker: &str) -> (usize, String) {
    let mut end = start;
    let mut text = String::new();
    for raw in content[start..].split_inclusive('\n') {
        let line = raw.strip_suffix('\n').unwrap_or(raw);
        if !line.trim_start().starts_with(marker) {
            break;
        }
        text.push_str(line);
        text.push('\n');
        end += raw.len();
    }
    (end, text)
}

// ─────────────────────────────────────────────────────────────────────────────
// Data-file compaction
// ─────────────────────────────────────────────────────────────────────────────

/// Compact structured data files: JSON is re-serialized without whitespace,
/// YAML loses comments and repeated blank lines, Cargo manifests are reduced
/// to their structurally important tables. Anything unparseable is returned
/// untouched.
pub fn compact_data_file(path: &str, content: &str) -> String {
    let basename = Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");
    if basename.eq_ignore_ascii_case("cargo.toml") {
        return compact_cargo_toml(content).unwrap_or_else(|| content.to_string());
    }
    match extension(path).as_str() {
        "json" => compact_json(content).unwrap_or_else(|| content.to_string()),
        "yaml" | "yml" => compact_yaml(content),
        _ => content.to_string(),
    }
}

fn compact_json(content: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(content).ok()?;
    serde_json::to_string(&value).ok()
}

fn compact_yaml(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    let mut blank_run = 0usize;
    for line in content.lines() {
        if line.trim_start().starts_with('#') {
            continue;
        }
        let line = match line.find(" #") {
            Some(pos) => &line[..pos],
            None => line,
        };
        let line = line.trim_end();
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line);
        out.push('\n');
    }
    out
}

/// Top-level manifest sections worth a consumer's tokens: identity, layout,
/// the dependency graph, and feature wiring. Every `*-dependencies` variant
/// shares the suffix, so it is matched as one rather than enumerated.
/// Profiles, lints, badges, and metadata say nothing about the code.
fn is_structural_manifest_key(key: &str) -> bool {
    key.ends_with("dependencies")
        || matches!(key, "package" | "workspace" | "lib" | "bin" | "features")
}

fn compact_cargo_toml(content: &str) -> Option<String> {
    let table: toml::Table = content.parse().ok()?;
    let kept: toml::Table = table
        .into_iter()
        .filter(|(key, _)| is_structural_manifest_key(key))
        .collect();
    if kept.is_empty() {
        return None;
    }
    toml::to_string_pretty(&kept).ok()
}

// ─────────────────────────────────────────────────────────────────────────────
// Whitespace
// ─────────────────────────────────────────────────────────────────────────────

/// Right-trim spaces, tabs, and carriage returns on every line.
pub fn trim_trailing_whitespace(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    for raw in content.split_inclusive('\n') {
        match raw.strip_suffix('\n') {
            Some(line) => {
                out.push_str(line.trim_end_matches([' ', '\t', '\r']));
                out.push('\n');
            }
            None => out.push_str(raw.trim_end_matches([' ', '\t', '\r'])),
        }
    }
    out
}

/// Collapse runs of blank lines to at most two. Skips work when no triple
/// newline is present.
pub fn collapse_empty_lines(content: &str) -> String {
    if !content.contains("\n\n\n") {
        return content.to_string();
    }
    let mut out = String::with_capacity(content.len());
    let mut blanks = 0usize;
    for raw in content.split_inclusive('\n') {
        let line = raw.strip_suffix('\n').unwrap_or(raw);
        if line.is_empty() && raw.ends_with('\n') {
            blanks += 1;
            if blanks > 2 {
                continue;
            }
        } else {
            blanks = 0;
        }
        out.push_str(raw);
    }
    out
}

// ─────────────────────────────────────────────────────────────────────────────
// Line numbering
// ─────────────────────────────────────────────────────────────────────────────

/// Prefix each line with its 1-based number, right-justified to the widest
/// number, followed by ` | `. Numbering is per-file and precedes framing.
pub fn number_lines(content: &str) -> String {
    if content.is_empty() {
        return String::new();
    }
    let ends_with_nl = content.ends_with('\n');
    let body = if ends_with_nl {
        &content[..content.len() - 1]
    } else {
        content
    };
    let lines: Vec<&str> = body.split('\n').collect();
    let width = lines.len().to_string().len();

    let mut out = String::with_capacity(content.len() + lines.len() * (width + 3));
    for (i, line) in lines.iter().enumerate() {
        out.push_str(&format!("{:>width$} | {}", i + 1, line, width = width));
        if i + 1 < lines.len() || ends_with_nl {
            out.push('\n');
        }
    }
    out
}

// ─────────────────────────────────────────────────────────────────────────────
// Test-file exclusion
// ─────────────────────────────────────────────────────────────────────────────

const TEST_DIR_SEGMENTS: [&str; 6] = ["test", "tests", "__tests__", "spec", "e2e", "__mocks__"];

fn test_name_patterns() -> &'static [Regex] {
    static RE: OnceLock<Vec<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        [
            r"_test\.go$",
            r"\.test\.(js|ts|tsx)$",
            r"\.spec\.(js|ts|tsx)$",
            r"_test\.py$",
            r"^test_",
            r"Test\.java$",
            r"Tests\.cs$",
            r"_spec\.rb$",
            r"\.stories\.(js|ts|tsx)$",
        ]
        .iter()
        .map(|p| Regex::new(p).unwrap())
        .collect()
    })
}

/// A path counts as a test when it sits under a test directory segment or its
/// basename matches a conventional test-file naming pattern.
pub fn is_test_path(path: &str) -> bool {
    let norm = path.replace('\\', "/");
    let segments: Vec<&str> = norm.split('/').collect();

    if segments.len() > 1 {
        let dirs = &segments[..segments.len() - 1];
        if dirs.iter().any(|s| {
            let lowered = s.to_ascii_lowercase();
            TEST_DIR_SEGMENTS.iter().any(|d| *d == lowered)
        }) {
            return true;
        }
    }

    let basename = segments.last().copied().unwrap_or("");
    test_name_patterns().iter().any(|re| re.is_match(basename))
}

/// Drop test files from a selection, preserving order.
pub fn filter_test_paths(paths: &[String]) -> Vec<String> {
    paths
        .iter()
        .filter(|p| !is_test_path(p))
        .cloned()
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Skeleton mode
// ─────────────────────────────────────────────────────────────────────────────

/// Words that may sit in front of a declaration keyword. `pub(crate)` and
/// friends count as `pub`.
const DECL_MODIFIERS: [&str; 12] = [
    "pub", "public", "private", "protected", "static", "async", "unsafe", "extern", "export",
    "abstract", "final", "default",
];

/// Keywords that introduce a named declaration across the languages this
/// engine commonly carries.
const DECL_KEYWORDS: [&str; 14] = [
    "fn",
    "func",
    "function",
    "def",
    "class",
    "struct",
    "enum",
    "trait",
    "interface",
    "impl",
    "mod",
    "type",
    "var",
    "val",
];

const SKELETON_LINE_CAP: usize = 600;
const SKELETON_HEAD_FALLBACK_LINES: usize = 50;

/// True when a line opens a named declaration: zero or more modifier words,
/// a declaration keyword, then something identifier-shaped.
fn opens_declaration(line: &str) -> bool {
    let mut words = line.split_whitespace();
    let Some(mut word) = words.next() else {
        return false;
    };

    let mut skipped = 0usize;
    while DECL_MODIFIERS.contains(&word.split('(').next().unwrap_or(word)) {
        // Three modifiers is already unusual; past that it is prose.
        skipped += 1;
        if skipped > 3 {
            return false;
        }
        word = match words.next() {
            Some(w) => w,
            None => return false,
        };
    }

    if !DECL_KEYWORDS.contains(&word) {
        return false;
    }
    match words.next() {
        Some(name) => name
            .chars()
            .next()
            .is_some_and(|c| c.is_alphabetic() || c == '_'),
        None => false,
    }
}

/// Open work markers are worth keeping even in a pruned view.
fn carries_work_marker(line: &str) -> bool {
    let lowered = line.to_ascii_lowercase();
    lowered.contains("todo") || lowered.contains("fixme")
}

/// Reduce a file body to its declaration lines (plus TODO/FIXME carriers),
/// with `...` standing in for the pruned spans. Files with no recognizable
/// structure fall back to a trimmed head snippet.
pub fn render_skeleton(source_text: &str) -> String {
    let all: Vec<&str> = source_text.lines().collect();
    if all.is_empty() {
        return String::new();
    }

    let mut picked: Vec<usize> = all
        .iter()
        .enumerate()
        .filter(|(_, line)| opens_declaration(line) || carries_work_marker(line))
        .map(|(idx, _)| idx)
        .collect();
    let truncated = picked.len() > SKELETON_LINE_CAP;
    picked.truncate(SKELETON_LINE_CAP);

    if picked.is_empty() {
        let head: Vec<&str> = all
            .iter()
            .take(SKELETON_HEAD_FALLBACK_LINES)
            .map(|l| l.trim())
            .collect();
        return format!("{}\n", head.join("\n"));
    }

    let mut out = String::new();
    let mut prev: Option<usize> = None;
    for idx in picked {
        if prev.is_some_and(|p| idx > p + 1) {
            out.push_str("...\n");
        }
        out.push_str(all[idx].trim());
        out.push('\n');
        prev = Some(idx);
    }
    if truncated {
        out.push_str("...\n");
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
    fn c_comments_line_and_block() {
        let src = "package a\n// drop me\nx := 1 // tail\n/* one\ntwo */ y := 2\n";
        let got = strip_c_comments(src);
        assert_eq!(got, "package a\nx := 1 \n y := 2\n");
    }

    #[test]
    fn c_comments_inside_strings_survive() {
        let src = "url := \"http://example.com\"\n";
        assert_eq!(strip_c_comments(src), src);
    }

    #[test]
    fn comment_free_input_is_identity() {
        let src = "fn main() {\n    let a = 1 + 2;\n}\n";
        assert_eq!(strip_comments("m.ts", src), src);
        assert_eq!(strip_comments("m.py", "x = 1\ny = 2\n"), "x = 1\ny = 2\n");
    }

    #[test]
    fn hash_comments_dropped() {
        let src = "#!/bin/sh\nx=1\n  # indented comment\necho $x\n";
        assert_eq!(strip_comments("run.sh", src), "x=1\necho $x\n");
    }

    #[test]
    fn xml_comment_spans_removed() {
        let src = "<a><!-- one --><b/><!-- two\nacross lines --></a>";
        assert_eq!(strip_comments("f.html", src), "<a><b/></a>");
    }

    #[test]
    fn license_block_excised_with_following_blanks() {
        let src = "/* Copyright 2024 Someone\n * All rights reserved. */\n\n\npackage a\n";
        assert_eq!(strip_license("a.go", src), "package a\n");
    }

    #[test]
    fn license_line_run_excised() {
        let src = "# Licensed under the Apache License, Version 2.0\n# See LICENSE.\nimport os\n";
        assert_eq!(strip_license("a.py", src), "import os\n");
    }

    #[test]
    fn non_license_header_kept() {
        let src = "// module doc, nothing legal here\npackage a\n";
        assert_eq!(strip_license("a.go", src), src);
    }

    #[test]
    fn license_noop_for_plain_text() {
        let src = "Copyright 2024\n\nBody text.\n";
        assert_eq!(strip_license("README.txt", src), src);
    }

    #[test]
    fn json_compaction_round_trips() {
        let src = "{\n  \"a\": [1, 2],\n  \"b\": {\"c\": true}\n}\n";
        let compact = compact_data_file("data.json", src);
        assert!(!compact.contains('\n'));
        let orig: serde_json::Value = serde_json::from_str(src).unwrap();
        let back: serde_json::Value = serde_json::from_str(&compact).unwrap();
        assert_eq!(orig, back);
    }

    #[test]
    fn invalid_json_left_untouched() {
        let src = "{not json at all";
        assert_eq!(compact_data_file("broken.json", src), src);
    }

    #[test]
    fn yaml_compaction_drops_comments_and_blanks() {
        let src = "# header\nkey: value # inline\n\n\n\nother: 1\n";
        assert_eq!(compact_data_file("c.yaml", src), "key: value\n\nother: 1\n");
    }

    #[test]
    fn cargo_manifest_keeps_structural_tables() {
        let src = "[package]\nname = \"demo\"\nversion = \"0.1.0\"\n\n[profile.release]\nlto = true\n\n[dependencies]\nserde = \"1\"\n";
        let out = compact_data_file("Cargo.toml", src);
        assert!(out.contains("[package]"));
        assert!(out.contains("[dependencies]"));
        assert!(!out.contains("profile"));
    }

    #[test]
    fn trailing_whitespace_trimmed() {
        assert_eq!(trim_trailing_whitespace("a  \nb\t\nc"), "a\nb\nc");
    }

    #[test]
    fn blank_runs_collapse_to_two() {
        assert_eq!(collapse_empty_lines("a\n\n\n\n\nb\n"), "a\n\n\nb\n");
        // Fast path: nothing to do.
        assert_eq!(collapse_empty_lines("a\n\nb\n"), "a\n\nb\n");
    }

    #[test]
    fn line_numbers_right_justified() {
        let src = (1..=12).map(|i| format!("l{i}\n")).collect::<String>();
        let numbered = number_lines(&src);
        assert!(numbered.starts_with(" 1 | l1\n"));
        assert!(numbered.contains("\n10 | l10\n"));
        assert!(numbered.ends_with("12 | l12\n"));
    }

    #[test]
    fn test_paths_detected() {
        for p in [
            "src/a_test.go",
            "web/button.test.tsx",
            "web/button.spec.ts",
            "pkg/test_helpers.py",
            "pkg/util_test.py",
            "java/FooTest.java",
            "cs/FooTests.cs",
            "ruby/foo_spec.rb",
            "web/button.stories.js",
            "src/__tests__/b.js",
            "e2e/flow.js",
            "spec/models.rb",
        ] {
            assert!(is_test_path(p), "{p} should be classified as a test");
        }
        for p in ["src/a.go", "src/contest.go", "attest/readme.md"] {
            assert!(!is_test_path(p), "{p} should not be classified as a test");
        }
    }

    #[test]
    fn skeleton_keeps_definitions() {
        let src = "use std::fmt;\n\npub fn alpha() {\n    let x = 1;\n}\n\nstruct Beta {\n    field: u8,\n}\n";
        let skel = render_skeleton(src);
        assert!(skel.contains("pub fn alpha()"));
        assert!(skel.contains("struct Beta"));
        assert!(!skel.contains("let x = 1"));
        assert!(skel.contains("...\n"), "pruned span needs a gap marker");
    }

    #[test]
    fn skeleton_keeps_work_markers() {
        let src = "fn run() {\n    // TODO: retry on transient failure\n    step();\n}\n";
        let skel = render_skeleton(src);
        assert!(skel.contains("TODO: retry"));
        assert!(!skel.contains("step();"));
    }

    #[test]
    fn skeleton_falls_back_to_head_snippet() {
        let src = "just prose here\nno declarations at all\nacross three lines\n";
        let skel = render_skeleton(src);
        assert_eq!(skel, "just prose here\nno declarations at all\nacross three lines\n");
    }
}
