//! Source-map extraction and position reverse-mapping.
//!
//! Two surfaces: discovering the authored source behind an inline
//! (base64 `data:` URI) map embedded by webpack-style bundlers, and
//! reverse-mapping a generated position in a compiled CSS file to the
//! authored SCSS/SASS/LESS position through a decoded V3 map.

use anyhow::{anyhow, bail, Result};
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use log::debug;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

const INLINE_MARKER: &str = "sourceMappingURL=data:";
const EXTERNAL_MARKER: &str = "sourceMappingURL=";

/// Standard V3 source map, as serialized by bundlers.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSourceMap {
    #[serde(default)]
    version: u32,
    #[serde(default)]
    sources: Vec<String>,
    #[serde(default)]
    source_root: Option<String>,
    #[serde(default)]
    mappings: String,
}

/// One decoded mapping segment, all fields 0-based.
#[derive(Debug, Clone, Copy)]
struct MappingEntry {
    gen_line: u32,
    gen_col: u32,
    source: u32,
    src_line: u32,
    src_col: u32,
}

/// Decoded map held in the per-session cache.
#[derive(Debug)]
pub struct SourceMapConsumer {
    sources: Vec<String>,
    /// Sorted by (gen_line, gen_col).
    mappings: Vec<MappingEntry>,
}

/// Reverse-mapped original position; `line` is 1-based, `column` 0-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginalPosition {
    pub source: PathBuf,
    pub line: u32,
    pub column: u32,
}

impl SourceMapConsumer {
    fn parse(json: &str) -> Result<Self> {
        let raw: RawSourceMap =
            serde_json::from_str(json).map_err(|err| anyhow!("bad source map JSON: {err}"))?;
        if raw.version != 0 && raw.version != 3 {
            bail!("unsupported source map version {}", raw.version);
        }
        let sources = match raw.source_root.as_deref() {
            Some(root) if !root.is_empty() => raw
                .sources
                .iter()
                .map(|src| format!("{}/{}", root.trim_end_matches('/'), src))
                .collect(),
            _ => raw.sources,
        };
        Ok(Self {
            sources,
            mappings: decode_mappings(&raw.mappings)?,
        })
    }

    /// Last mapping at or before the generated position. `line` 1-based.
    pub fn original_position_for(&self, line: u32, column: u32) -> Option<(&str, u32, u32)> {
        let gen_line = line.checked_sub(1)?;
        let at_or_before = self
            .mappings
            .partition_point(|entry| (entry.gen_line, entry.gen_col) <= (gen_line, column));
        let entry = self.mappings.get(at_or_before.checked_sub(1)?)?;
        if entry.gen_line != gen_line {
            return None;
        }
        let source = self.sources.get(entry.source as usize)?;
        Some((source.as_str(), entry.src_line + 1, entry.src_col))
    }
}

/// Base64 VLQ `mappings` string into sorted entries.
fn decode_mappings(mappings: &str) -> Result<Vec<MappingEntry>> {
    let mut out = Vec::new();
    let mut source: i64 = 0;
    let mut src_line: i64 = 0;
    let mut src_col: i64 = 0;

    for (gen_line, line) in mappings.split(';').enumerate() {
        let mut gen_col: i64 = 0;
        for segment in line.split(',') {
            if segment.is_empty() {
                continue;
            }
            let fields = decode_vlq_segment(segment)?;
            gen_col += fields.first().copied().unwrap_or(0);
            if fields.len() >= 4 {
                source += fields[1];
                src_line += fields[2];
                src_col += fields[3];
                if gen_col >= 0 && source >= 0 && src_line >= 0 && src_col >= 0 {
                    out.push(MappingEntry {
                        gen_line: gen_line as u32,
                        gen_col: gen_col as u32,
                        source: source as u32,
                        src_line: src_line as u32,
                        src_col: src_col as u32,
                    });
                }
            }
        }
    }
    out.sort_by_key(|entry| (entry.gen_line, entry.gen_col));
    Ok(out)
}

fn decode_vlq_segment(segment: &str) -> Result<Vec<i64>> {
    let mut fields = Vec::with_capacity(5);
    let mut value: i64 = 0;
    let mut shift = 0u32;
    for ch in segment.chars() {
        let digit = base64_digit(ch)?;
        value |= i64::from(digit & 0x1f) << shift;
        if digit & 0x20 != 0 {
            shift += 5;
            continue;
        }
        let negative = value & 1 != 0;
        let magnitude = value >> 1;
        fields.push(if negative { -magnitude } else { magnitude });
        value = 0;
        shift = 0;
    }
    if shift != 0 {
        bail!("truncated VLQ segment {segment:?}");
    }
    Ok(fields)
}

fn base64_digit(ch: char) -> Result<u32> {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    ALPHABET
        .iter()
        .position(|&b| b as char == ch)
        .map(|idx| idx as u32)
        .ok_or_else(|| anyhow!("invalid VLQ character {ch:?}"))
}

/// Caching resolver for both source-map surfaces.
pub struct SourceMapResolver {
    project_root: PathBuf,
    /// Inline-discovery results keyed by a stylesheet-text prefix.
    inline_cache: HashMap<String, Option<PathBuf>>,
    /// Decoded consumers keyed by compiled CSS path.
    consumers: HashMap<PathBuf, Option<SourceMapConsumer>>,
}

impl SourceMapResolver {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
            inline_cache: HashMap::new(),
            consumers: HashMap::new(),
        }
    }

    /// Find the first existing authored source named by an inline map
    /// embedded in `stylesheet_text`.
    pub fn original_source_from_inline(&mut self, stylesheet_text: &str) -> Option<PathBuf> {
        let key: String = stylesheet_text.chars().take(100).collect::<String>().trim().to_string();
        if let Some(cached) = self.inline_cache.get(&key) {
            return cached.clone();
        }
        let resolved = self.discover_inline(stylesheet_text);
        self.inline_cache.insert(key, resolved.clone());
        resolved
    }

    fn discover_inline(&self, stylesheet_text: &str) -> Option<PathBuf> {
        let json = extract_inline_map_json(stylesheet_text)?;
        let raw: RawSourceMap = match serde_json::from_str(&json) {
            Ok(raw) => raw,
            Err(err) => {
                debug!("inline source map did not parse: {err}");
                return None;
            }
        };
        raw.sources.iter().find_map(|entry| {
            let cleaned = clean_source_entry(entry);
            if cleaned.is_empty() {
                return None;
            }
            let path = PathBuf::from(&cleaned);
            let anchored = if path.is_absolute() {
                path
            } else {
                self.project_root.join(path)
            };
            anchored.is_file().then_some(anchored)
        })
    }

    /// Reverse-map a generated position in `css_path` (1-based line) to the
    /// authored source position. Degrades to `None` on any load failure.
    pub fn original_position_for(
        &mut self,
        css_path: &Path,
        line: u32,
        column: u32,
    ) -> Option<OriginalPosition> {
        if !self.consumers.contains_key(css_path) {
            let consumer = match self.load_consumer(css_path) {
                Ok(consumer) => consumer,
                Err(err) => {
                    debug!("no usable source map for {}: {err}", css_path.display());
                    None
                }
            };
            self.consumers.insert(css_path.to_path_buf(), consumer);
        }
        let consumer = self.consumers.get(css_path)?.as_ref()?;
        let (source, src_line, src_col) = consumer.original_position_for(line, column)?;
        let cleaned = clean_source_entry(source);
        let path = PathBuf::from(&cleaned);
        let resolved = if path.is_absolute() {
            path
        } else {
            css_path.parent()?.join(path)
        };
        Some(OriginalPosition {
            source: resolved,
            line: src_line,
            column: src_col,
        })
    }

    fn load_consumer(&self, css_path: &Path) -> Result<Option<SourceMapConsumer>> {
        let text = fs::read_to_string(css_path)
            .map_err(|err| anyhow!("cannot read {}: {err}", css_path.display()))?;

        if let Some(json) = extract_inline_map_json(&text) {
            return Ok(Some(SourceMapConsumer::parse(&json)?));
        }

        // external map: named in the comment, or the conventional sibling
        let named = extract_external_map_url(&text).map(|rel| {
            css_path
                .parent()
                .map(|dir| dir.join(&rel))
                .unwrap_or_else(|| PathBuf::from(rel))
        });
        let sibling = css_path.with_extension(format!(
            "{}.map",
            css_path.extension().and_then(|ext| ext.to_str()).unwrap_or("css")
        ));
        for candidate in named.into_iter().chain(std::iter::once(sibling)) {
            if candidate.is_file() {
                let json = fs::read_to_string(&candidate)
                    .map_err(|err| anyhow!("cannot read {}: {err}", candidate.display()))?;
                return Ok(Some(SourceMapConsumer::parse(&json)?));
            }
        }
        Ok(None)
    }

    /// Drop every cached consumer; called on shutdown.
    pub fn clear(&mut self) {
        self.inline_cache.clear();
        self.consumers.clear();
    }
}

/// Pull the JSON payload out of an inline `data:` sourceMappingURL comment.
fn extract_inline_map_json(text: &str) -> Option<String> {
    let marker = text.rfind(INLINE_MARKER)?;
    let after = &text[marker..];
    let b64_start = after.find("base64,")? + "base64,".len();
    let payload = &after[b64_start..];
    let end = payload
        .find(|c: char| c.is_whitespace() || c == '*')
        .unwrap_or(payload.len());
    let bytes = BASE64_STANDARD.decode(payload[..end].trim_end()).ok()?;
    String::from_utf8(bytes).ok()
}

/// Relative URL from a non-inline sourceMappingURL comment, if present.
fn extract_external_map_url(text: &str) -> Option<String> {
    let marker = text.rfind(EXTERNAL_MARKER)?;
    let after = &text[marker + EXTERNAL_MARKER.len()..];
    if after.starts_with("data:") {
        return None;
    }
    let end = after
        .find(|c: char| c.is_whitespace() || c == '*')
        .unwrap_or(after.len());
    let url = after[..end].trim();
    (!url.is_empty()).then(|| url.to_string())
}

/// Strip bundler prefixes and query strings from a map `sources[]` entry.
fn clean_source_entry(entry: &str) -> String {
    let mut cleaned = entry;
    if let Some(rest) = cleaned.strip_prefix("webpack://") {
        // the host segment (possibly empty) precedes the real path
        cleaned = rest.find('/').map_or(rest, |idx| &rest[idx + 1..]);
    }
    if let Some(rest) = cleaned.strip_prefix("webpack-internal:///") {
        cleaned = rest;
    }
    cleaned = cleaned.strip_prefix("./").unwrap_or(cleaned);
    cleaned = cleaned.split('?').next().unwrap_or(cleaned);
    cleaned.to_string()
}
