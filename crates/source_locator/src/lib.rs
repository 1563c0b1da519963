//! Mapping live browser stylesheets back to authored source files.
//!
//! Three resolution strategies, tried by the orchestrator in preference
//! order: bundler dev-id attributes carry an absolute path directly, inline
//! source maps name the authored file, and hashed CSS-module class names can
//! be reverse-parsed to their owning `*.module.*` file. URL heuristics cover
//! plain served stylesheets.

pub mod selector;
pub mod sourcemap;
pub mod url;

pub use selector::{parse_module_class, rewrite_compiled_selector, ModuleMatch, SelectorResolver};
pub use sourcemap::{OriginalPosition, SourceMapResolver};
pub use url::UrlResolver;
