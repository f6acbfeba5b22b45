use crate::error::GinError;
use serde::{Serialize, Serializer};

/// Progress value reported when an item finished successfully.
pub const PROGRESS_COMPLETE: &str = "100%";

/// One progress report for one item of a long-running operation.
///
/// A stream of these is closed once the operation is over. Each item ends with
/// either an event carrying [`PROGRESS_COMPLETE`] or an event carrying an error.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatusEvent {
    #[serde(rename = "filename")]
    pub file_name: String,
    pub state: String,
    /// Percentage string, empty when indeterminate
    pub progress: String,
    /// Human-scaled byte rate, empty when not applicable
    pub rate: String,
    #[serde(rename = "rawinput")]
    pub raw_input: String,
    #[serde(rename = "rawoutput")]
    pub raw_output: String,
    #[serde(rename = "err", serialize_with = "error_text")]
    pub error: Option<GinError>,
}

impl StatusEvent {
    pub fn new(file_name: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            state: state.into(),
            ..Self::default()
        }
    }

    /// An event that carries only an error, used to report a failed step.
    pub fn failure(error: GinError) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }

    pub fn with_progress(mut self, progress: impl Into<String>) -> Self {
        self.progress = progress.into();
        self
    }

    pub fn with_error(mut self, error: GinError) -> Self {
        self.error = Some(error);
        self
    }

    pub fn completed(mut self) -> Self {
        self.progress = PROGRESS_COMPLETE.to_string();
        self
    }

    pub fn is_complete(&self) -> bool {
        self.error.is_none() && self.progress == PROGRESS_COMPLETE
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

fn error_text<S: Serializer>(error: &Option<GinError>, serializer: S) -> Result<S::Ok, S::Error> {
    match error {
        Some(err) => serializer.serialize_str(&err.to_string()),
        None => serializer.serialize_str(""),
    }
}

/// Kind of entry written by a historical version copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CheckoutKind {
    /// Pointer to annexed content, copied from the local content store
    Annex,
    /// Plain symbolic link; the destination holds the link target
    Link,
    /// Regular file tracked by git
    Git,
    /// Directory created at the destination
    Tree,
}

/// Result of copying one tree entry out of a past revision.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutEvent {
    pub file_name: String,
    pub kind: Option<CheckoutKind>,
    pub destination: String,
    pub error: Option<GinError>,
}

impl CheckoutEvent {
    pub fn failure(error: GinError) -> Self {
        Self {
            file_name: String::new(),
            kind: None,
            destination: String::new(),
            error: Some(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completed_event_without_error_is_complete() {
        let event = StatusEvent::new("data.bin", "Adding (annex)").completed();
        assert!(event.is_complete());

        let failed = event.clone().with_error(GinError::Transfer {
            message: "remote storage unavailable".to_string(),
        });
        assert!(!failed.is_complete());
        assert!(failed.is_error());
    }
}
