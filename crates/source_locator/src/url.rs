//! Stylesheet URL to local path resolution.
//!
//! Ordered pattern rules turn the URLs a dev server exposes into files inside
//! the project tree. Every rule stops at the first path that actually exists;
//! the only exception is the Next.js compiled-CSS fallback, which returns the
//! `.next/static/css/` path itself so the caller can switch to selector-based
//! resolution.

use log::debug;
use std::path::{Path, PathBuf};
use url::Url;

pub struct UrlResolver {
    project_root: PathBuf,
    /// User-supplied `{url_prefix -> local_prefix}` rules, consulted first.
    mappings: Vec<(String, PathBuf)>,
}

impl UrlResolver {
    pub fn new(project_root: impl Into<PathBuf>, mappings: Vec<(String, PathBuf)>) -> Self {
        Self {
            project_root: project_root.into(),
            mappings,
        }
    }

    /// Resolve a stylesheet URL (absolute, relative, or `file://`) to an
    /// existing local file, or `None`.
    pub fn resolve(&self, raw_url: &str) -> Option<PathBuf> {
        if raw_url.is_empty() {
            return None;
        }

        if let Ok(parsed) = Url::parse(raw_url) {
            if parsed.scheme() == "file" {
                return parsed.to_file_path().ok().filter(|path| path.is_file());
            }
        }

        for (prefix, local) in &self.mappings {
            if let Some(rest) = raw_url.strip_prefix(prefix.as_str()) {
                let candidate = local.join(rest.trim_start_matches('/'));
                if candidate.is_file() {
                    return Some(candidate);
                }
            }
        }

        let pathname = pathname_of(raw_url);
        if let Some(found) = self.builtin_rules(&pathname) {
            return Some(found);
        }

        // last-ditch probes relative to the project root
        let relative = pathname.trim_start_matches('/');
        for base in ["", "src", "public"] {
            let candidate = if base.is_empty() {
                self.project_root.join(relative)
            } else {
                self.project_root.join(base).join(relative)
            };
            if candidate.is_file() {
                return Some(candidate);
            }
        }

        debug!("no local file for stylesheet url {raw_url}");
        None
    }

    fn builtin_rules(&self, pathname: &str) -> Option<PathBuf> {
        // Next.js compiled CSS, with or without a basePath prefix.
        if let Some(idx) = pathname.find("/_next/static/css/") {
            let rest = &pathname[idx + "/_next/static/css/".len()..];
            return Some(self.resolve_next_css(rest));
        }

        if let Some(rest) = pathname.strip_prefix("/src/") {
            if is_style_file(rest) {
                let candidate = self.project_root.join("src").join(rest);
                if candidate.is_file() {
                    return Some(candidate);
                }
            }
        }

        if let Some(rest) = pathname.strip_prefix("/assets/") {
            if is_style_file(rest) {
                for dir in ["assets", "src/assets", "src/styles", "styles", "public/assets"] {
                    let candidate = self.project_root.join(dir).join(rest);
                    if candidate.is_file() {
                        return Some(candidate);
                    }
                }
            }
        }

        for top in ["static", "styles", "css"] {
            let prefix = format!("/{top}/");
            if let Some(rest) = pathname.strip_prefix(prefix.as_str()) {
                let candidate = self.project_root.join(top).join(rest);
                if candidate.is_file() {
                    return Some(candidate);
                }
            }
        }

        // bare `/name.css` is usually served out of public/
        if is_style_file(pathname) {
            let candidate = self
                .project_root
                .join("public")
                .join(pathname.trim_start_matches('/'));
            if candidate.is_file() {
                return Some(candidate);
            }
        }

        None
    }

    /// Map a path under `.next/static/css/` back to an authored stylesheet.
    fn resolve_next_css(&self, rest: &str) -> PathBuf {
        let rest_path = Path::new(rest);
        let dir = rest_path.parent().unwrap_or_else(|| Path::new(""));
        let file = rest_path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("");

        if file.ends_with("layout.css") {
            let dirs = [dir.to_path_buf(), PathBuf::from("app"), PathBuf::from("styles")];
            for base in &dirs {
                for anchored in [self.project_root.join(base), self.project_root.join("src").join(base)] {
                    for name in ["globals", "global"] {
                        for ext in ["css", "scss"] {
                            let candidate = anchored.join(format!("{name}.{ext}"));
                            if candidate.is_file() {
                                return candidate;
                            }
                        }
                    }
                }
            }
        } else if file.ends_with("page.css") {
            for anchored in [self.project_root.join(dir), self.project_root.join("src").join(dir)] {
                for name in ["page.module", "styles.module"] {
                    for ext in ["scss", "css"] {
                        let candidate = anchored.join(format!("{name}.{ext}"));
                        if candidate.is_file() {
                            return candidate;
                        }
                    }
                }
            }
        }

        // nothing authored found: hand back the compiled path so the caller
        // can fall back to selector-based resolution
        self.project_root.join(".next/static/css").join(rest)
    }
}

/// Path component of a URL, query and fragment stripped.
fn pathname_of(raw_url: &str) -> String {
    if let Ok(parsed) = Url::parse(raw_url) {
        return parsed.path().to_string();
    }
    let no_fragment = raw_url.split('#').next().unwrap_or(raw_url);
    let no_query = no_fragment.split('?').next().unwrap_or(no_fragment);
    no_query.to_string()
}

fn is_style_file(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    lower.ends_with(".css") || lower.ends_with(".scss") || lower.ends_with(".sass") || lower.ends_with(".less")
}
