//! Completion marker detection in worker responses.

/// Phrase a worker must say to declare its task finished.
pub const COMPLETION_MARKER: &str = "TASK COMPLETE";

/// Case-insensitive substring match on the completion marker.
pub fn is_task_complete(text: &str) -> bool {
    text.to_uppercase().contains(COMPLETION_MARKER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_marker_in_any_case_and_position() {
        assert!(is_task_complete("Task complete"));
        assert!(is_task_complete("All tests pass. TASK COMPLETE."));
        assert!(is_task_complete("TASK COMPLETE!"));
        assert!(is_task_complete("done: task Complete"));
    }

    #[test]
    fn rejects_text_without_marker() {
        assert!(!is_task_complete("still working"));
        assert!(!is_task_complete("task is complete"));
        assert!(!is_task_complete(""));
    }
}
