pub mod packer;

pub use packer::{pack, PackedDiff};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DiffError {
    #[error("Failed to parse diff: {0}")]
    Malformed(String),
}

/// One file's slice of a unified diff, kept verbatim so it can be re-emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffSegment {
    /// File path (the `b/` side of the header)
    pub path: String,
    /// Raw text, starting at the `diff --git` line, newline-terminated
    pub text: String,
    pub is_new: bool,
    pub is_deleted: bool,
    pub additions: usize,
    pub deletions: usize,
}

/// Split a unified diff into per-file segments in original order.
///
/// Each segment starts at a `diff --git a/{path} b/{path}` line. Text before
/// the first header (mail preamble, stats) is discarded.
pub fn split_diff(raw_diff: &str) -> Result<Vec<DiffSegment>, DiffError> {
    if raw_diff.trim().is_empty() {
        return Ok(Vec::new());
    }

    let mut segments = Vec::new();
    let mut current: Option<DiffSegment> = None;
    let mut in_hunk = false;

    for line in raw_diff.split_inclusive('\n') {
        let bare = line.trim_end_matches(['\n', '\r']);

        if let Some(rest) = bare.strip_prefix("diff --git ") {
            if let Some(done) = current.take() {
                segments.push(done);
            }
            current = Some(DiffSegment {
                path: header_path(rest)?,
                text: String::new(),
                is_new: false,
                is_deleted: false,
                additions: 0,
                deletions: 0,
            });
            in_hunk = false;
        }

        let Some(segment) = current.as_mut() else {
            continue;
        };
        segment.text.push_str(line);
        if !line.ends_with('\n') {
            segment.text.push('\n');
        }

        if bare.starts_with("@@") {
            in_hunk = true;
        } else if !in_hunk && bare == "--- /dev/null" {
            segment.is_new = true;
        } else if !in_hunk && bare == "+++ /dev/null" {
            segment.is_deleted = true;
        } else if let Some(path) = bare.strip_prefix("+++ b/").filter(|_| !in_hunk) {
            segment.path = path.trim_end_matches('\t').to_string();
        } else if in_hunk && bare.starts_with('+') {
            segment.additions += 1;
        } else if in_hunk && bare.starts_with('-') {
            segment.deletions += 1;
        }
    }

    if let Some(done) = current.take() {
        segments.push(done);
    }
    Ok(segments)
}

/// Path from the text after `diff --git `. Paths may contain spaces, so the
/// header is never split on whitespace.
fn header_path(rest: &str) -> Result<String, DiffError> {
    // Unchanged path: "a/{p} b/{p}" splits exactly at the midpoint.
    let mid = rest.len() / 2;
    if rest.len() % 2 == 1 && rest.is_char_boundary(mid) {
        let (a_side, b_side) = rest.split_at(mid);
        if let (Some(a), Some(b)) = (a_side.strip_prefix("a/"), b_side.strip_prefix(" b/")) {
            if a == b && !b.is_empty() {
                return Ok(b.to_string());
            }
        }
    }

    // Rename: take the last " b/" as the separator; a later "+++ b/" line
    // corrects the rare path that itself contains " b/".
    let (a_side, b_path) = rest
        .rsplit_once(" b/")
        .ok_or_else(|| DiffError::Malformed(format!("Missing b/ path in diff header: {rest}")))?;
    if !a_side.starts_with("a/") || b_path.is_empty() {
        return Err(DiffError::Malformed(format!(
            "Missing a/ path in diff header: {rest}"
        )));
    }
    Ok(b_path.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_FILES: &str = r#"diff --git a/src/main.rs b/src/main.rs
index abc1234..def5678 100644
--- a/src/main.rs
+++ b/src/main.rs
@@ -1,3 +1,4 @@
 fn main() {
-    println!("old");
+    println!("new");
+    // --- not a header
 }
diff --git a/new_file.txt b/new_file.txt
new file mode 100644
index 0000000..e69de29
--- /dev/null
+++ b/new_file.txt
@@ -0,0 +1,2 @@
+hello
+world
"#;

    #[test]
    fn test_split_two_files() {
        let segments = split_diff(TWO_FILES).unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].path, "src/main.rs");
        assert_eq!(segments[0].additions, 2);
        assert_eq!(segments[0].deletions, 1);
        assert!(!segments[0].is_new);
        assert_eq!(segments[1].path, "new_file.txt");
        assert!(segments[1].is_new);
        assert_eq!(segments[1].additions, 2);
    }

    #[test]
    fn test_segments_reassemble_to_original() {
        let segments = split_diff(TWO_FILES).unwrap();
        let joined: String = segments.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(joined, TWO_FILES);
    }

    #[test]
    fn test_deleted_file() {
        let diff = "diff --git a/old.txt b/old.txt\ndeleted file mode 100644\n--- a/old.txt\n+++ /dev/null\n@@ -1 +0,0 @@\n-bye";
        let segments = split_diff(diff).unwrap();
        assert!(segments[0].is_deleted);
        assert_eq!(segments[0].deletions, 1);
        assert!(segments[0].text.ends_with("-bye\n"));
    }

    #[test]
    fn test_preamble_dropped_and_empty_diff() {
        assert!(split_diff("").unwrap().is_empty());
        assert!(split_diff("just some text\n").unwrap().is_empty());
    }

    #[test]
    fn test_paths_with_spaces() {
        let diff = "diff --git a/docs/release notes.md b/docs/release notes.md\n\
                    --- a/docs/release notes.md\n\
                    +++ b/docs/release notes.md\n\
                    @@ -1 +1 @@\n\
                    -draft\n\
                    +final\n\
                    diff --git a/old name.txt b/new name.txt\n\
                    similarity index 100%\n\
                    rename from old name.txt\n\
                    rename to new name.txt\n\
                    diff --git a/x b/y.rs b/x b/y.rs\n\
                    --- a/x b/y.rs\n\
                    +++ b/x b/y.rs\n";
        let paths: Vec<String> = split_diff(diff)
            .unwrap()
            .into_iter()
            .map(|s| s.path)
            .collect();
        assert_eq!(paths, vec!["docs/release notes.md", "new name.txt", "x b/y.rs"]);
    }

    #[test]
    fn test_malformed_header() {
        assert!(matches!(
            split_diff("diff --git a/only\n"),
            Err(DiffError::Malformed(_))
        ));
    }
}
