//! CSS/SCSS rule-tree scanning, selector flattening, and declaration diffing.
//!
//! The scanner keeps byte spans so `css_patch` can edit a single declaration
//! in place; the differ turns two browser snapshots of a stylesheet into
//! semantic per-declaration changes.

pub mod diff;
pub mod flatten;
pub mod scan;

pub use diff::{diff, ChangeKind, DeclarationChange};
pub use flatten::{flatten_tree, normalize_ws, resolve_selectors, FlatDeclaration};
pub use scan::{scan, split_important, Declaration, Position, Rule, RuleTree, Span};
