pub mod classifier;
pub mod document;
pub mod domain;
pub mod feed;
pub mod models;
pub mod processing;
pub mod repository;

/// arXiv categories scanned on every run: the AI/ML corners of computer
/// science plus statistics ML.
pub const CS_CATEGORIES: &[&str] = &[
    "cs.AI", "cs.CL", "cs.CV", "cs.LG", "cs.NE", "cs.RO", "cs.IR", "cs.HC", "stat.ML",
];
