use serde::{Deserialize, Serialize};

/// One revision from the history, enriched with the files it touched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitRecord {
    pub hash: String,
    #[serde(rename = "abbrevhash")]
    pub abbreviated_hash: String,
    #[serde(rename = "authorname")]
    pub author_name: String,
    #[serde(rename = "authoremail")]
    pub author_email: String,
    /// Author date in strict ISO 8601, as reported by the metadata tool
    pub date: String,
    pub subject: String,
    pub body: String,
    #[serde(rename = "filestats")]
    pub file_stats: DiffStat,
}

/// Paths added, modified and deleted by a revision relative to its parent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffStat {
    #[serde(rename = "new")]
    pub new_files: Vec<String>,
    #[serde(rename = "modified")]
    pub modified_files: Vec<String>,
    #[serde(rename = "deleted")]
    pub deleted_files: Vec<String>,
}

impl DiffStat {
    pub fn is_empty(&self) -> bool {
        self.new_files.is_empty() && self.modified_files.is_empty() && self.deleted_files.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    Blob,
    Tree,
    Commit,
}

impl ObjectKind {
    pub fn parse(kind: &str) -> Option<Self> {
        match kind {
            "blob" => Some(ObjectKind::Blob),
            "tree" => Some(ObjectKind::Tree),
            "commit" => Some(ObjectKind::Commit),
            _ => None,
        }
    }
}

/// Git file mode of a symbolic link tree entry
pub const MODE_SYMLINK: &str = "120000";
pub const MODE_FILE: &str = "100644";
pub const MODE_EXECUTABLE: &str = "100755";

/// One entry of a historical tree listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeObject {
    /// Path relative to the repository root
    pub name: String,
    pub hash: String,
    pub kind: ObjectKind,
    pub mode: String,
}

impl TreeObject {
    pub fn is_symlink(&self) -> bool {
        self.mode == MODE_SYMLINK
    }

    pub fn is_regular_file(&self) -> bool {
        self.mode == MODE_FILE || self.mode == MODE_EXECUTABLE
    }
}
