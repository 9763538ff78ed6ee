//! Extraction of machine-authored suggestions from review comment text.
//!
//! A suggestion is a fenced code block tagged `diff` whose first two lines are
//! unified-diff file headers:
//!
//! ````text
//! ```diff
//! --- a/src/lib.rs
//! +++ b/src/lib.rs
//! @@ -1,3 +1,3 @@
//!  fn answer() -> u32 {
//! -    41
//! +    42
//!  }
//! ```
//! ````
//!
//! Rules:
//! - A fence opens on a line whose trimmed text starts with at least three
//!   backticks. The block is diff-tagged when the first word of the info
//!   string is `diff` (any case).
//! - The fence closes on the next line made only of backticks, at least as
//!   many as the opener. An unterminated fence runs to the end of the text.
//! - The first line of a diff block must be `--- a/<path>` and the second
//!   `+++ b/<anything>`. Blocks that do not match are ignored.
//! - The body is everything after the headers with leading and trailing
//!   empty lines removed. A block with an empty body yields nothing.
//! - Blocks with any other tag are skipped whole, so a diff nested inside
//!   e.g. a `markdown` block is never picked up.
//!
//! This is purely syntactic: nothing here checks that a diff applies.

/// One proposed edit to one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuggestionEdit {
    /// Repository-relative, forward-slash separated path.
    pub file_path: String,
    /// Hunk lines of the diff, without the `---`/`+++` file headers.
    pub diff_body: String,
}

const OLD_FILE_HEADER: &str = "--- a/";
const NEW_FILE_HEADER: &str = "+++ b/";

struct Fence<'a> {
    ticks: usize,
    info: &'a str,
}

impl<'a> Fence<'a> {
    fn open(line: &'a str) -> Option<Self> {
        let trimmed = line.trim();
        let ticks = trimmed.chars().take_while(|c| *c == '`').count();
        if ticks < 3 {
            return None;
        }
        Some(Self {
            ticks,
            info: trimmed[ticks..].trim(),
        })
    }

    fn closes(&self, line: &str) -> bool {
        let trimmed = line.trim();
        trimmed.len() >= self.ticks && trimmed.chars().all(|c| c == '`')
    }

    fn is_diff(&self) -> bool {
        self.info
            .split_whitespace()
            .next()
            .is_some_and(|lang| lang.eq_ignore_ascii_case("diff"))
    }
}

/// Extract every suggestion in `comment`, in document order.
pub fn parse_suggestions(comment: &str) -> Vec<SuggestionEdit> {
    let mut edits = Vec::new();
    let mut lines = comment.lines();

    while let Some(line) = lines.next() {
        let Some(fence) = Fence::open(line) else {
            continue;
        };

        let mut block = Vec::new();
        for inner in lines.by_ref() {
            if fence.closes(inner) {
                break;
            }
            block.push(inner);
        }

        if fence.is_diff() {
            if let Some(edit) = edit_from_block(&block) {
                edits.push(edit);
            }
        }
    }

    edits
}

fn edit_from_block(block: &[&str]) -> Option<SuggestionEdit> {
    let [old_header, new_header, rest @ ..] = block else {
        return None;
    };

    let file_path = old_header
        .trim_start()
        .strip_prefix(OLD_FILE_HEADER)?
        .trim()
        .to_string();
    if file_path.is_empty() || !new_header.trim_start().starts_with(NEW_FILE_HEADER) {
        return None;
    }

    // Whitespace-only lines are diff context for empty source lines, so only
    // truly empty lines count as padding.
    let is_padding = |line: &&str| line.trim_end_matches('\r').is_empty();
    let start = rest.iter().position(|l| !is_padding(l))?;
    let end = rest.iter().rposition(|l| !is_padding(l))?;

    Some(SuggestionEdit {
        file_path,
        diff_body: rest[start..=end].join("\n"),
    })
}
