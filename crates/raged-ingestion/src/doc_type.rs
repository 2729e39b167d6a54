//! Doc-type classification and tier-1 metadata extraction
//!
//! Classification follows a fixed chain: explicit item field, URL hints,
//! content patterns, file extension, then `text`. Tier-1 metadata is the
//! synchronous, doc-type-specific bag stored opaquely on every chunk.

use serde_json::{Value as JsonValue, json};

/// Coarse classification of source content
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocType {
    Text,
    Markdown,
    Code,
    Html,
    Json,
    Email,
}

impl DocType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Markdown => "markdown",
            Self::Code => "code",
            Self::Html => "html",
            Self::Json => "json",
            Self::Email => "email",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(Self::Text),
            "markdown" => Some(Self::Markdown),
            "code" => Some(Self::Code),
            "html" => Some(Self::Html),
            "json" => Some(Self::Json),
            "email" => Some(Self::Email),
            _ => None,
        }
    }

    /// The mime type recorded on the document when the fetch gave none
    pub const fn default_mime(self) -> &'static str {
        match self {
            Self::Text => "text/plain",
            Self::Markdown => "text/markdown",
            Self::Code => "text/x-source",
            Self::Html => "text/html",
            Self::Json => "application/json",
            Self::Email => "message/rfc822",
        }
    }
}

impl std::fmt::Display for DocType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

const CODE_EXTENSIONS: &[(&str, &str)] = &[
    ("rs", "rust"),
    ("py", "python"),
    ("ts", "typescript"),
    ("tsx", "typescript"),
    ("js", "javascript"),
    ("jsx", "javascript"),
    ("go", "go"),
    ("java", "java"),
    ("c", "c"),
    ("h", "c"),
    ("cpp", "cpp"),
    ("rb", "ruby"),
    ("sh", "shell"),
    ("sql", "sql"),
];

fn extension_of(source: &str) -> Option<&str> {
    let path = source.split(['?', '#']).next().unwrap_or(source);
    let name = path.rsplit('/').next().unwrap_or(path);
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() { None } else { Some(ext) }
}

/// Language for a code source, from its extension
pub fn language_of(source: &str) -> Option<&'static str> {
    let ext = extension_of(source)?.to_ascii_lowercase();
    CODE_EXTENSIONS
        .iter()
        .find(|(e, _)| *e == ext)
        .map(|(_, lang)| *lang)
}

fn classify_by_extension(source: &str) -> Option<DocType> {
    let ext = extension_of(source)?.to_ascii_lowercase();
    match ext.as_str() {
        "md" | "markdown" => Some(DocType::Markdown),
        "html" | "htm" => Some(DocType::Html),
        "json" => Some(DocType::Json),
        "eml" => Some(DocType::Email),
        "txt" => Some(DocType::Text),
        _ if CODE_EXTENSIONS.iter().any(|(e, _)| *e == ext) => Some(DocType::Code),
        _ => None,
    }
}

fn classify_by_content(content: &str) -> Option<DocType> {
    let head = content.trim_start();
    let lower = head.get(..256.min(head.len())).unwrap_or(head).to_ascii_lowercase();

    if lower.starts_with("<!doctype html") || lower.starts_with("<html") {
        return Some(DocType::Html);
    }
    if (head.starts_with('{') || head.starts_with('['))
        && serde_json::from_str::<JsonValue>(content).is_ok()
    {
        return Some(DocType::Json);
    }
    if head.starts_with("From:") && content.contains("\nSubject:") {
        return Some(DocType::Email);
    }
    if head.starts_with('#') || head.contains("\n```") {
        return Some(DocType::Markdown);
    }
    None
}

/// Classify source content
///
/// `explicit` wins when it names a known type; unknown explicit values fall
/// through the rest of the chain.
pub fn classify_doc_type(explicit: Option<&str>, source: &str, content: &str) -> DocType {
    if let Some(doc_type) = explicit.and_then(DocType::parse) {
        return doc_type;
    }
    if source.starts_with("http://") || source.starts_with("https://") {
        if let Some(doc_type) = classify_by_extension(source) {
            return doc_type;
        }
    }
    if let Some(doc_type) = classify_by_content(content) {
        return doc_type;
    }
    if let Some(doc_type) = classify_by_extension(source) {
        return doc_type;
    }
    DocType::Text
}

/// Extract synchronous tier-1 metadata for a classified source
///
/// The bag is opaque to the core; keys vary by doc type.
pub fn extract_tier1(doc_type: DocType, content: &str, source: &str) -> JsonValue {
    let lines = content.lines().count();
    match doc_type {
        DocType::Markdown => {
            let title = content
                .lines()
                .find_map(|l| l.strip_prefix("# "))
                .map(str::trim);
            let headings = content
                .lines()
                .filter(|l| l.starts_with('#'))
                .count();
            json!({"title": title, "headings": headings, "lines": lines})
        }
        DocType::Html => {
            let title = content
                .split("<title>")
                .nth(1)
                .and_then(|rest| rest.split("</title>").next())
                .map(str::trim);
            json!({"title": title, "lines": lines})
        }
        DocType::Code => {
            json!({"language": language_of(source), "lines": lines})
        }
        DocType::Json => {
            let keys = serde_json::from_str::<JsonValue>(content)
                .ok()
                .and_then(|v| v.as_object().map(serde_json::Map::len));
            json!({"topLevelKeys": keys, "lines": lines})
        }
        DocType::Email => {
            let header = |name: &str| {
                content
                    .lines()
                    .find_map(|l| l.strip_prefix(name))
                    .map(str::trim)
                    .map(ToString::to_string)
            };
            json!({
                "from": header("From:"),
                "to": header("To:"),
                "subject": header("Subject:"),
            })
        }
        DocType::Text => {
            json!({"chars": content.chars().count(), "lines": lines})
        }
    }
}
