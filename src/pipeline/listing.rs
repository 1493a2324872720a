//! File-listing derivation for the build stage.
//!
//! Turns the Designer's extracted listing into the ordered build plan:
//! classification, path prefixing, the fixed trailer files, per-file agent
//! selection, and the context message each file gets in the build session.

use crate::agent::AgentRole;
use crate::agent::DesignListing;
use crate::store::FileMetrics;

/// Dependency-manifest trailer, always generated after every listed file.
pub const MANIFEST_FILE: &str = "Cargo.toml";

/// Documentation trailer, always generated last.
pub const DOC_FILE: &str = "README.md";

/// Order the extracted listing for the build stage.
///
/// Non-test source files come first in their original order (prefixed with
/// `src/` when missing), then test files (prefixed with `test/`), then the
/// two fixed trailers. Entries that are not Rust sources are dropped; the
/// extraction schema forbids them but the agent occasionally lists them
/// anyway.
pub fn order_files(listing: &DesignListing) -> Vec<String> {
    let mut ordered = Vec::new();

    for file in &listing.src_files {
        if file.ends_with(".rs") && !file.ends_with("_test.rs") {
            ordered.push(with_prefix(file, "src/"));
        }
    }
    for file in &listing.test_files {
        if file.ends_with(".rs") {
            ordered.push(with_prefix(file, "test/"));
        }
    }

    ordered.push(MANIFEST_FILE.to_string());
    ordered.push(DOC_FILE.to_string());
    ordered
}

fn with_prefix(path: &str, prefix: &str) -> String {
    if path.starts_with(prefix) {
        path.to_string()
    } else {
        format!("{prefix}{path}")
    }
}

/// Select the agent for a file. Tests go to the test-authoring agent, the
/// documentation trailer to the documentation agent, everything else
/// (the dependency manifest included) to the general builder.
pub fn role_for_path(path: &str) -> AgentRole {
    if path.ends_with("_test.rs") {
        AgentRole::TestBuilder
    } else if path.ends_with(".md") {
        AgentRole::Documenter
    } else {
        AgentRole::Builder
    }
}

/// Context message appended to the build session ahead of generating `path`,
/// pointing the agent at what earlier files in the session give it.
pub fn context_message(path: &str) -> String {
    if path.ends_with("_test.rs") {
        "[Context for test generation] The main source files have already been generated in this session. Use them to write appropriate tests.".to_string()
    } else if path.ends_with(".md") {
        "[Context for documentation generation] All source code, tests and the dependency manifest are available in this session. Use them to write comprehensive documentation.".to_string()
    } else if path == MANIFEST_FILE {
        "[Context for file generation] Every source and test file has been generated in this session. Use them to declare the correct dependencies.".to_string()
    } else {
        "[Context for file generation] ".to_string()
    }
}

/// Count generated files by path-prefix classification.
pub fn compute_metrics<'a>(paths: impl IntoIterator<Item = &'a str>) -> FileMetrics {
    let mut metrics = FileMetrics::default();
    for path in paths {
        metrics.total_files += 1;
        if path.starts_with("src/") {
            metrics.source_files += 1;
        } else if path.starts_with("test/") {
            metrics.test_files += 1;
        } else {
            metrics.other_files += 1;
        }
    }
    metrics
}
