use serde::{Deserialize, Serialize};

/// One repository known to hold (or have held) a piece of annexed content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub uuid: String,
    pub description: String,
    /// True when the location is the repository issuing the query
    pub here: bool,
}

/// Where the content of one annexed path is stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentLocationInfo {
    pub file: String,
    pub key: String,
    pub locations: Vec<Location>,
}

impl ContentLocationInfo {
    pub fn present_here(&self) -> bool {
        self.locations.iter().any(|l| l.here)
    }

    /// Content is here and nowhere else.
    pub fn only_here(&self) -> bool {
        self.present_here() && self.locations.len() == 1
    }
}

/// One entry of the annex status listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeCode {
    Added,
    Modified,
    Deleted,
    TypeChanged,
    Untracked,
}

impl ChangeCode {
    /// Parses the single-letter status code printed by the annex tool.
    pub fn parse(code: &str) -> Option<Self> {
        match code {
            "A" => Some(ChangeCode::Added),
            "M" => Some(ChangeCode::Modified),
            "D" => Some(ChangeCode::Deleted),
            "T" => Some(ChangeCode::TypeChanged),
            "?" => Some(ChangeCode::Untracked),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEntry {
    pub file: String,
    pub code: ChangeCode,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(here: bool) -> Location {
        Location {
            uuid: "u".to_string(),
            description: "d".to_string(),
            here,
        }
    }

    #[test]
    fn presence_checks() {
        let info = ContentLocationInfo {
            file: "a".to_string(),
            key: "k".to_string(),
            locations: vec![loc(true)],
        };
        assert!(info.present_here());
        assert!(info.only_here());

        let info = ContentLocationInfo {
            locations: vec![loc(false), loc(true)],
            ..info
        };
        assert!(info.present_here());
        assert!(!info.only_here());
    }

    #[test]
    fn change_codes() {
        assert_eq!(ChangeCode::parse("T"), Some(ChangeCode::TypeChanged));
        assert_eq!(ChangeCode::parse("?"), Some(ChangeCode::Untracked));
        assert_eq!(ChangeCode::parse("X"), None);
    }
}
