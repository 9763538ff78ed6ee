//! Applying suggestion edits to file content.
//!
//! Patch application itself is delegated to `diffy`; this module only
//! rebuilds a complete unified diff from a [`SuggestionEdit`] and collects
//! the results into a [`ChangeSet`].

use std::collections::BTreeMap;

use thiserror::Error;

use crate::suggestion::SuggestionEdit;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PatchError {
    #[error("suggestion for {path} is not a valid unified diff: {message}")]
    Malformed { path: String, message: String },

    #[error("suggestion for {path} does not apply: {message}")]
    Rejected { path: String, message: String },
}

/// Rebuild a full single-file unified diff from an edit's hunk lines.
pub fn reconstruct_patch(file_path: &str, diff_body: &str) -> String {
    format!("--- a/{file_path}\n+++ b/{file_path}\n{diff_body}\n")
}

/// Apply `edit` to `original`, returning the patched content.
pub fn apply_edit(original: &str, edit: &SuggestionEdit) -> Result<String, PatchError> {
    let text = reconstruct_patch(&edit.file_path, &edit.diff_body);

    let patch = diffy::Patch::from_str(&text).map_err(|e| PatchError::Malformed {
        path: edit.file_path.clone(),
        message: e.to_string(),
    })?;

    diffy::apply(original, &patch).map_err(|e| PatchError::Rejected {
        path: edit.file_path.clone(),
        message: e.to_string(),
    })
}

/// New file contents keyed by path.
///
/// Later writes to the same path replace earlier ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    files: BTreeMap<String, String>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, file_path: impl Into<String>, content: impl Into<String>) {
        self.files.insert(file_path.into(), content.into());
    }

    pub fn get(&self, file_path: &str) -> Option<&str> {
        self.files.get(file_path).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.files.iter().map(|(p, c)| (p.as_str(), c.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use insta::assert_snapshot;

    const ORIGINAL: &str = "fn main() {\n    println!(\"hi\");\n}\n";

    fn edit(body: &str) -> SuggestionEdit {
        SuggestionEdit {
            file_path: "src/main.rs".to_string(),
            diff_body: body.to_string(),
        }
    }

    #[test]
    fn test_reconstruct_patch_headers() {
        assert_snapshot!(
            reconstruct_patch("src/main.rs", "@@ -1 +1 @@\n-a\n+b"),
            @r"
        --- a/src/main.rs
        +++ b/src/main.rs
        @@ -1 +1 @@
        -a
        +b
        "
        );
    }

    #[test]
    fn test_apply_edit_replaces_line() {
        let patched = apply_edit(
            ORIGINAL,
            &edit("@@ -1,3 +1,3 @@\n fn main() {\n-    println!(\"hi\");\n+    println!(\"hello\");\n }"),
        )
        .unwrap();

        assert_eq!(patched, "fn main() {\n    println!(\"hello\");\n}\n");
    }

    #[test]
    fn test_apply_edit_with_mismatched_context_is_rejected() {
        let result = apply_edit(
            ORIGINAL,
            &edit("@@ -1,3 +1,3 @@\n fn other() {\n-    println!(\"hi\");\n+    println!(\"hello\");\n }"),
        );

        assert!(matches!(result, Err(PatchError::Rejected { .. })));
    }

    #[test]
    fn test_change_set_last_write_wins() {
        let mut changes = ChangeSet::new();
        assert!(changes.is_empty());

        changes.record("a.txt", "one");
        changes.record("b.txt", "two");
        changes.record("a.txt", "three");

        assert_eq!(changes.len(), 2);
        assert_eq!(changes.get("a.txt"), Some("three"));
        assert_eq!(changes.paths().collect::<Vec<_>>(), vec!["a.txt", "b.txt"]);
    }
}
