//! Source records and inline citation blocks.
//!
//! Tool output embeds retrieved content as numbered blocks:
//!
//! ```text
//! <source4 id="f1" order="2" label="guide.pdf" url="content://f1">…</source4>
//! ```
//!
//! The model cites them by ordinal (`[source4]`). Before each completion the
//! blocks are renumbered into one contiguous range across the whole context.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex_lite::Regex;
use serde::{Deserialize, Serialize};

use crate::search::ChunkRecord;

/// Scheme used for synthesized source URLs.
pub const CONTENT_URL_SCHEME: &str = "content://";

static BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<source(\d+)(\s[^>]*)?>(.*?)</source\d+>").expect("valid block regex")
});

static ATTR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"([A-Za-z_][\w-]*)="([^"]*)""#).expect("valid attribute regex"));

/// A citable source: a file, or one chunk of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRecord {
    /// File identifier
    pub id: String,

    /// Chunk identifier; equals `id` for whole-file sources
    #[serde(default, alias = "chunk_id")]
    pub chunk_id: String,

    /// Human-readable label
    #[serde(default, alias = "title")]
    pub key: String,

    #[serde(default)]
    pub url: String,
}

impl SourceRecord {
    pub fn new(
        id: impl Into<String>,
        chunk_id: impl Into<String>,
        key: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            chunk_id: chunk_id.into(),
            key: key.into(),
            url: url.into(),
        }
    }

    /// Source for a retrieved chunk.
    pub fn from_chunk(chunk: &ChunkRecord) -> Self {
        Self {
            id: chunk.file_id.clone(),
            chunk_id: chunk.id.clone(),
            key: chunk.key.clone(),
            url: chunk
                .url
                .clone()
                .unwrap_or_else(|| format!("{CONTENT_URL_SCHEME}{}", chunk.file_id)),
        }
    }

    /// Synthesize a source from the attributes of an inline block.
    ///
    /// `ordinal` is the block's position after renumbering; it only shows up
    /// when the block carries no label of any kind.
    pub fn from_block_attributes(attributes: &HashMap<String, String>, ordinal: usize) -> Self {
        let id = attributes.get("id").cloned().unwrap_or_default();
        let chunk_id = attributes
            .get("chunk_id")
            .cloned()
            .unwrap_or_else(|| id.clone());
        let key = ["label", "display", "key", "title"]
            .iter()
            .find_map(|k| attributes.get(*k).filter(|v| !v.is_empty()).cloned())
            .unwrap_or_else(|| format!("source{ordinal}"));
        let url = attributes
            .get("url")
            .filter(|v| !v.is_empty())
            .cloned()
            .unwrap_or_else(|| format!("{CONTENT_URL_SCHEME}{id}"));
        Self {
            id,
            chunk_id,
            key,
            url,
        }
    }
}

/// One inline block found in a text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceBlock {
    /// Ordinal in the opening tag
    pub tag_index: usize,
    /// Unescaped attributes of the opening tag
    pub attributes: HashMap<String, String>,
    pub body: String,
}

/// Render a retrieved chunk as an inline block tagged `index`.
pub fn render_source_block(index: usize, chunk: &ChunkRecord) -> String {
    let mut attrs = vec![("id", chunk.file_id.clone()), ("chunk_id", chunk.id.clone())];
    if let Some(order) = chunk.order {
        attrs.push(("order", order.to_string()));
    }
    if let Some(start) = chunk.start_page {
        attrs.push(("start_page", start.to_string()));
    }
    attrs.push(("label", chunk.key.clone()));
    if let Some(url) = &chunk.url {
        attrs.push(("url", url.clone()));
    }
    if let Some(end) = chunk.end_page {
        attrs.push(("end_page", end.to_string()));
    }

    let rendered: Vec<String> = attrs
        .into_iter()
        .map(|(k, v)| format!("{k}=\"{}\"", xml_escape(&v)))
        .collect();
    format!(
        "<source{index} {}>{}</source{index}>",
        rendered.join(" "),
        xml_escape(&chunk.content)
    )
}

/// All inline blocks in `text`, in order of appearance.
pub fn source_blocks(text: &str) -> Vec<SourceBlock> {
    BLOCK_RE
        .captures_iter(text)
        .map(|caps| SourceBlock {
            tag_index: caps
                .get(1)
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or_default(),
            attributes: caps
                .get(2)
                .map(|m| parse_attributes(m.as_str()))
                .unwrap_or_default(),
            body: caps.get(3).map(|m| m.as_str().to_string()).unwrap_or_default(),
        })
        .collect()
}

/// Renumber every block in `text`, starting at `start`, keeping attributes
/// and bodies intact. Returns the rewritten text and the next free ordinal.
pub fn renumber_source_blocks(text: &str, start: usize) -> (String, usize) {
    let mut next = start;
    let rewritten = BLOCK_RE
        .replace_all(text, |caps: &regex_lite::Captures<'_>| {
            let n = next;
            next += 1;
            let attrs = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            let body = caps.get(3).map(|m| m.as_str()).unwrap_or("");
            format!("<source{n}{attrs}>{body}</source{n}>")
        })
        .into_owned();
    (rewritten, next)
}

/// Number of inline blocks in `text`.
pub fn count_source_blocks(text: &str) -> usize {
    BLOCK_RE.find_iter(text).count()
}

fn parse_attributes(raw: &str) -> HashMap<String, String> {
    ATTR_RE
        .captures_iter(raw)
        .filter_map(|caps| {
            let key = caps.get(1)?.as_str().to_string();
            let value = xml_unescape(caps.get(2)?.as_str());
            Some((key, value))
        })
        .collect()
}

pub fn xml_escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}

pub fn xml_unescape(input: &str) -> String {
    input
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk() -> ChunkRecord {
        ChunkRecord {
            id: "c9".into(),
            file_id: "f1".into(),
            key: "Q3 \"final\" report".into(),
            content: "Revenue < cost".into(),
            order: Some(2),
            start_page: Some(4),
            end_page: Some(5),
            url: None,
        }
    }

    #[test]
    fn rendered_block_parses_back() {
        let text = render_source_block(3, &chunk());
        let blocks = source_blocks(&text);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].tag_index, 3);
        assert_eq!(blocks[0].attributes["label"], "Q3 \"final\" report");
        assert_eq!(blocks[0].attributes["chunk_id"], "c9");
        assert_eq!(blocks[0].body, "Revenue &lt; cost");
    }

    #[test]
    fn renumbering_is_contiguous() {
        let text = "<source4 id=\"4\">First</source4> mid <source10 id=\"10\">Second</source10>\
                    <source2 id=\"2\">Third</source2>";
        let (out, next) = renumber_source_blocks(text, 0);
        assert_eq!(next, 3);
        assert_eq!(
            out,
            "<source0 id=\"4\">First</source0> mid <source1 id=\"10\">Second</source1>\
             <source2 id=\"2\">Third</source2>"
        );
    }

    #[test]
    fn renumbering_spans_newlines() {
        let (out, next) = renumber_source_blocks("<source7>a\nb</source7>", 5);
        assert_eq!(out, "<source5>a\nb</source5>");
        assert_eq!(next, 6);
    }

    #[test]
    fn synthesized_source_falls_back_through_labels() {
        let mut attrs = HashMap::new();
        attrs.insert("id".to_string(), "60".to_string());
        let source = SourceRecord::from_block_attributes(&attrs, 3);
        assert_eq!(source.chunk_id, "60");
        assert_eq!(source.key, "source3");
        assert_eq!(source.url, "content://60");

        attrs.insert("title".to_string(), "Handbook".to_string());
        assert_eq!(SourceRecord::from_block_attributes(&attrs, 3).key, "Handbook");
    }

    #[test]
    fn source_record_accepts_title_alias() {
        let source: SourceRecord =
            serde_json::from_value(serde_json::json!({ "id": "f1", "title": "Doc" })).unwrap();
        assert_eq!(source.key, "Doc");
        assert_eq!(source.chunk_id, "");
    }

    #[test]
    fn escape_roundtrip() {
        let raw = r#"a & <b> "c" 'd'"#;
        assert_eq!(xml_unescape(&xml_escape(raw)), raw);
    }
}
