//! Classification of free-text tool failures.
//!
//! The tools report most failures only as prose on stderr. The rule table below
//! maps substrings of that prose to a [`FailureCategory`]; rules are checked in
//! order and the first match wins. The extractors pull affected file names out of
//! the same text for the state-conflict categories.

use crate::error::GinError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureCategory {
    PermissionDenied,
    HostKeyMismatch,
    ConnectionFailed,
    WouldOverwrite,
    MergeConflict,
    RemoteAhead,
    /// No rule matched; reported with the raw tool text
    Unclassified,
}

/// One entry of the classification table.
#[derive(Debug, Clone, Copy)]
pub struct Rule {
    pub needle: &'static str,
    pub category: FailureCategory,
}

/// Ordered classification rules. Credential and host-key failures come first
/// since the transport error that follows them would otherwise match too.
pub const RULES: &[Rule] = &[
    Rule {
        needle: "Permission denied",
        category: FailureCategory::PermissionDenied,
    },
    Rule {
        needle: "Host key verification failed",
        category: FailureCategory::HostKeyMismatch,
    },
    Rule {
        needle: "would be overwritten by merge",
        category: FailureCategory::WouldOverwrite,
    },
    Rule {
        needle: "Merge conflict in",
        category: FailureCategory::MergeConflict,
    },
    Rule {
        needle: "CONFLICT (",
        category: FailureCategory::MergeConflict,
    },
    Rule {
        needle: "rejected",
        category: FailureCategory::RemoteAhead,
    },
    Rule {
        needle: "Could not resolve hostname",
        category: FailureCategory::ConnectionFailed,
    },
    Rule {
        needle: "Connection refused",
        category: FailureCategory::ConnectionFailed,
    },
    Rule {
        needle: "Connection timed out",
        category: FailureCategory::ConnectionFailed,
    },
    Rule {
        needle: "Could not read from remote repository",
        category: FailureCategory::ConnectionFailed,
    },
];

/// Returns the category of the first rule whose needle occurs in `text`.
pub fn classify(text: &str) -> FailureCategory {
    classify_with(RULES, text)
}

pub fn classify_with(rules: &[Rule], text: &str) -> FailureCategory {
    rules
        .iter()
        .find(|rule| text.contains(rule.needle))
        .map(|rule| rule.category)
        .unwrap_or(FailureCategory::Unclassified)
}

/// Builds the hard error for a failed step of `operation` ("upload", "download", ...).
///
/// `origin` names the failing step for the unclassified fallback.
pub fn to_error(category: FailureCategory, operation: &str, origin: &str, text: &str) -> GinError {
    let operation = operation.to_string();
    match category {
        FailureCategory::PermissionDenied => GinError::PermissionDenied { operation },
        FailureCategory::HostKeyMismatch => GinError::HostKeyMismatch { operation },
        FailureCategory::ConnectionFailed => GinError::ConnectionFailed { operation },
        FailureCategory::RemoteAhead => GinError::RemoteAhead { operation },
        FailureCategory::WouldOverwrite => GinError::WouldOverwrite {
            operation,
            files: overwritten_files(text),
        },
        FailureCategory::MergeConflict => GinError::MergeConflict {
            operation,
            files: merge_conflict_files(text),
        },
        FailureCategory::Unclassified => {
            GinError::described(origin, format!("{operation} failed"), text)
        }
    }
}

/// Classifies `text` and builds the matching error in one step.
pub fn classify_error(operation: &str, origin: &str, text: &str) -> GinError {
    to_error(classify(text), operation, origin, text)
}

const OVERWRITE_START: &str = "would be overwritten by merge";
const OVERWRITE_END: &[&str] = &[
    "Please move or remove them",
    "Please commit your changes or stash them",
    "Aborting",
];

/// File names listed between the "would be overwritten" header and its trailer.
///
/// The tool can print more than one such block (untracked and modified files are
/// reported separately); names from every block are collected.
pub fn overwritten_files(text: &str) -> Vec<String> {
    files_between_markers(text, OVERWRITE_START, OVERWRITE_END)
}

/// Collects the trimmed, non-empty lines between a line containing `start` and
/// the next line containing any of `ends`.
pub fn files_between_markers(text: &str, start: &str, ends: &[&str]) -> Vec<String> {
    let mut files = Vec::new();
    let mut inside = false;
    for line in text.lines() {
        if line.contains(start) {
            inside = true;
            continue;
        }
        if !inside {
            continue;
        }
        if ends.iter().any(|end| line.contains(end)) {
            inside = false;
            continue;
        }
        let name = line.trim();
        if !name.is_empty() && !files.iter().any(|f| f == name) {
            files.push(name.to_string());
        }
    }
    files
}

const CONFLICT_MARKER: &str = "Merge conflict in ";

/// Names from `CONFLICT (...): Merge conflict in <name>` lines.
pub fn merge_conflict_files(text: &str) -> Vec<String> {
    let mut files: Vec<String> = Vec::new();
    for line in text.lines() {
        if let Some(pos) = line.find(CONFLICT_MARKER) {
            let name = line[pos + CONFLICT_MARKER.len()..].trim();
            if !name.is_empty() && !files.iter().any(|f| f == name) {
                files.push(name.to_string());
            }
        }
    }
    files
}

const VARIANT_MARKER: &str = ".variant-";

/// Files whose conflicting versions were both kept by the annex merge resolver.
///
/// The resolver renames each side to `<name>.variant-<tag>`; the tag is removed
/// and every affected name is reported once.
pub fn auto_resolved_files(text: &str) -> Vec<String> {
    let mut files: Vec<String> = Vec::new();
    for token in text.split_whitespace() {
        if let Some(name) = strip_variant(token) {
            if !files.contains(&name) {
                files.push(name);
            }
        }
    }
    files
}

fn strip_variant(token: &str) -> Option<String> {
    let pos = token.find(VARIANT_MARKER)?;
    let rest = &token[pos + VARIANT_MARKER.len()..];
    let tag_len = rest
        .find(|c: char| !c.is_ascii_alphanumeric())
        .unwrap_or(rest.len());
    if tag_len == 0 {
        return None;
    }
    let name = format!("{}{}", &token[..pos], &rest[tag_len..]);
    let name = name.trim_matches(|c| c == '\'' || c == '"' || c == ',');
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REJECTED_PUSH: &str = "\
To ssh://git@gin.g-node.org:22/alice/data.git
 ! [rejected]        master -> synced/master (fetch first)
error: failed to push some refs to 'ssh://git@gin.g-node.org:22/alice/data.git'
hint: Updates were rejected because the remote contains work that you do
hint: not have locally.
";

    const DENIED: &str = "\
git@gin.g-node.org: Permission denied (publickey).
fatal: Could not read from remote repository.
";

    const OVERWRITE: &str = "\
error: The following untracked working tree files would be overwritten by merge:
\tresults/table.csv
\tnotes.txt
Please move or remove them before you merge.
Aborting
";

    const CONFLICT: &str = "\
Auto-merging analysis.py
CONFLICT (content): Merge conflict in analysis.py
Auto-merging README.md
CONFLICT (add/add): Merge conflict in README.md
Automatic merge failed; fix conflicts and then commit the result.
";

    #[test]
    fn first_matching_rule_wins() {
        assert_eq!(classify(REJECTED_PUSH), FailureCategory::RemoteAhead);
        assert_eq!(classify(DENIED), FailureCategory::PermissionDenied);
        assert_eq!(
            classify("Host key verification failed.\nfatal: Could not read from remote repository."),
            FailureCategory::HostKeyMismatch
        );
        assert_eq!(
            classify("ssh: Could not resolve hostname example.invalid"),
            FailureCategory::ConnectionFailed
        );
        assert_eq!(classify("git-annex: something odd"), FailureCategory::Unclassified);
    }

    #[test]
    fn rejected_push_tells_user_to_download() {
        let err = classify_error("upload", "Upload", REJECTED_PUSH);
        assert!(err
            .to_string()
            .contains("run 'gin download' to update local copies"));
    }

    #[test]
    fn overwrite_block_lists_every_file() {
        assert_eq!(classify(OVERWRITE), FailureCategory::WouldOverwrite);
        let err = classify_error("download", "Download", OVERWRITE);
        assert_eq!(err.files(), ["results/table.csv", "notes.txt"]);
    }

    #[test]
    fn separate_overwrite_blocks_are_merged() {
        let text = "\
error: Your local changes to the following files would be overwritten by merge:
\ta.txt
Please commit your changes or stash them before you merge.
error: The following untracked working tree files would be overwritten by merge:
\tb.txt
Please move or remove them before you merge.
Aborting
";
        assert_eq!(overwritten_files(text), vec!["a.txt", "b.txt"]);
    }

    #[test]
    fn conflict_lines_yield_file_names() {
        assert_eq!(classify(CONFLICT), FailureCategory::MergeConflict);
        assert_eq!(merge_conflict_files(CONFLICT), vec!["analysis.py", "README.md"]);
    }

    #[test]
    fn variant_names_are_reduced_to_originals() {
        let text = "\
add data.bin.variant-a1b2 ok
add data.bin.variant-ffe0 ok
add scan.variant-0c9d.tif ok
(merging synced/master into master...)
";
        assert_eq!(auto_resolved_files(text), vec!["data.bin", "scan.tif"]);
        assert!(auto_resolved_files("nothing here .variant- at all").is_empty());
    }

    #[test]
    fn unclassified_error_keeps_raw_text() {
        let err = classify_error("download", "Download", "git-annex: weird failure\n");
        match err {
            GinError::Command { stderr, .. } => assert!(stderr.contains("weird failure")),
            other => panic!("unexpected error {other:?}"),
        }
    }
}
