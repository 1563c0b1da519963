//! Compiled CSS-module selector to authored module file resolution.
//!
//! Bundlers scope `.item` in `Menu.module.scss` to something like
//! `.Menu_item__abc123`. This resolver recognizes the common hashed shapes,
//! recovers the component and class names, and finds the owning
//! `*.module.scss` / `*.module.css` file in the project tree.

use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::PathBuf;

/// Directories never worth descending into.
const SKIP_DIRS: &[&str] = &["node_modules", ".next", ".git", "dist", "build"];
const MAX_DEPTH: usize = 10;

/// Hashed-class shapes, most specific first. Swapping the order produces
/// false matches: the path-included forms must win over the simple ones.
static MODULE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        // .Menu-module_item__abc
        r"^\.(?P<comp>[A-Z][A-Za-z0-9]*)-module_(?P<name>[A-Za-z0-9-]+?)__[A-Za-z0-9_-]+$",
        // .components_playground_Menu-module_item__abc
        r"^\.(?:[a-z0-9]+_)+(?P<comp>[A-Z][A-Za-z0-9]*)-module_(?P<name>[A-Za-z0-9-]+?)__[A-Za-z0-9_-]+$",
        // .src-components-Menu-module__item--abc
        r"^\.(?:[a-z0-9]+-)+(?P<comp>[A-Z][A-Za-z0-9]*)-module__(?P<name>[A-Za-z0-9-]+?)--[A-Za-z0-9_]+$",
        // .components_Menu_item__abc
        r"^\.(?:[a-z0-9]+_)+(?P<comp>[A-Z][A-Za-z0-9]*)_(?P<name>[A-Za-z0-9-]+?)__[A-Za-z0-9_-]+$",
        // .Menu_item__abc
        r"^\.(?P<comp>[A-Z][A-Za-z0-9]*)_(?P<name>[A-Za-z0-9-]+?)__[A-Za-z0-9_-]+$",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("static module pattern"))
    .collect()
});

/// Parsed hashed class name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleClass {
    pub component: String,
    pub class_name: String,
}

/// A resolved module source for a compiled selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleMatch {
    pub file: PathBuf,
    pub component: String,
    pub class_name: String,
}

/// Parse the first whitespace-separated segment of a compiled selector into
/// its component and original class name, if it has a recognized shape.
pub fn parse_module_class(selector: &str) -> Option<ModuleClass> {
    let segment = selector.split_whitespace().next()?;
    // pseudo-classes on the segment do not change the hashed identity
    let segment = segment.split(':').next()?;
    for pattern in MODULE_PATTERNS.iter() {
        if let Some(captures) = pattern.captures(segment) {
            return Some(ModuleClass {
                component: captures.name("comp")?.as_str().to_string(),
                class_name: captures.name("name")?.as_str().to_string(),
            });
        }
    }
    None
}

/// Rewrite every recognized hashed segment of a compiled selector back to its
/// authored class, leaving everything else untouched.
pub fn rewrite_compiled_selector(selector: &str) -> String {
    selector
        .split_whitespace()
        .map(|segment| match parse_module_class(segment) {
            Some(class) => format!(".{}", class.class_name),
            None => segment.to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

pub struct SelectorResolver {
    project_root: PathBuf,
    resolved: HashMap<String, Option<ModuleMatch>>,
    contents: HashMap<PathBuf, Option<String>>,
}

impl SelectorResolver {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
            resolved: HashMap::new(),
            contents: HashMap::new(),
        }
    }

    /// Locate the authored module file for a compiled selector.
    pub fn resolve(&mut self, selector: &str) -> Option<ModuleMatch> {
        if let Some(cached) = self.resolved.get(selector) {
            return cached.clone();
        }
        let result = self.resolve_uncached(selector);
        self.resolved.insert(selector.to_string(), result.clone());
        result
    }

    fn resolve_uncached(&mut self, selector: &str) -> Option<ModuleMatch> {
        let class = parse_module_class(selector)?;
        let candidates = self.find_module_files(&class.component);
        if candidates.is_empty() {
            debug!("no module file candidates for component {}", class.component);
            return None;
        }
        let class_pattern = class_usage_pattern(&class.class_name);
        for candidate in candidates {
            let content = self
                .contents
                .entry(candidate.clone())
                .or_insert_with(|| fs::read_to_string(&candidate).ok());
            let Some(content) = content.as_deref() else {
                continue;
            };
            if class_pattern.is_match(content) {
                return Some(ModuleMatch {
                    file: candidate,
                    component: class.component,
                    class_name: class.class_name,
                });
            }
        }
        None
    }

    /// Breadth-first search for `<Comp>.module.{scss,css}`, exact-basename
    /// candidates ranked first.
    fn find_module_files(&self, component: &str) -> Vec<PathBuf> {
        let mut exact = Vec::new();
        let mut loose = Vec::new();
        let mut queue = VecDeque::new();
        queue.push_back((self.project_root.clone(), 0usize));

        while let Some((dir, depth)) = queue.pop_front() {
            let Ok(entries) = fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
                    continue;
                };
                if path.is_dir() {
                    if depth < MAX_DEPTH && !SKIP_DIRS.contains(&name) && !name.starts_with('.') {
                        queue.push_back((path, depth + 1));
                    }
                    continue;
                }
                let Some(stem) = module_stem(name) else {
                    continue;
                };
                if stem.eq_ignore_ascii_case(component) {
                    exact.push(path);
                } else if stem.to_ascii_lowercase().contains(&component.to_ascii_lowercase()) {
                    loose.push(path);
                }
            }
        }
        exact.extend(loose);
        exact
    }

    pub fn clear(&mut self) {
        self.resolved.clear();
        self.contents.clear();
    }
}

/// `Menu.module.scss` -> `Menu`; anything not a module style file -> None.
fn module_stem(file_name: &str) -> Option<&str> {
    file_name
        .strip_suffix(".module.scss")
        .or_else(|| file_name.strip_suffix(".module.css"))
}

/// Usage forms of a class inside its module file: rule openers, `&`
/// compounds, comma lists, and end-of-line references.
fn class_usage_pattern(class_name: &str) -> Regex {
    let escaped = regex::escape(class_name);
    Regex::new(&format!(
        r"(?m)\.{escaped}\s*\{{|&\.{escaped}\s*\{{|\.{escaped}\s*,|\.{escaped}$"
    ))
    .expect("escaped class pattern")
}
