//! Task status aggregation.
//!
//! A task's status is never set on its own once it has subtasks: it is
//! recomputed from the subtasks after every subtask mutation.

use crate::types::TaskStatus;

/// Derive a task status from its subtask statuses.
///
/// - no subtasks: `todo`
/// - all `checked`: `checked`
/// - all `done` or `checked`: `done`
/// - any `in_progress` or `done`: `in_progress`
/// - otherwise: `todo`
pub fn aggregate<I>(statuses: I) -> TaskStatus
where
    I: IntoIterator<Item = TaskStatus>,
{
    let mut any = false;
    let mut all_checked = true;
    let mut all_finished = true;
    let mut any_started = false;

    for status in statuses {
        any = true;
        all_checked &= status == TaskStatus::Checked;
        all_finished &= matches!(status, TaskStatus::Done | TaskStatus::Checked);
        any_started |= matches!(status, TaskStatus::InProgress | TaskStatus::Done);
    }

    if !any {
        TaskStatus::Todo
    } else if all_checked {
        TaskStatus::Checked
    } else if all_finished {
        TaskStatus::Done
    } else if any_started {
        TaskStatus::InProgress
    } else {
        TaskStatus::Todo
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use TaskStatus::*;

    #[test]
    fn empty_is_todo() {
        assert_eq!(aggregate(Vec::<TaskStatus>::new()), Todo);
    }

    #[test]
    fn single_statuses() {
        assert_eq!(aggregate([Todo]), Todo);
        assert_eq!(aggregate([InProgress]), InProgress);
        assert_eq!(aggregate([Done]), Done);
        assert_eq!(aggregate([Checked]), Checked);
    }

    #[test]
    fn done_and_checked_is_done() {
        assert_eq!(aggregate([Done, Checked]), Done);
    }

    #[test]
    fn all_checked_is_checked() {
        assert_eq!(aggregate([Checked, Checked]), Checked);
    }

    #[test]
    fn partial_progress_is_in_progress() {
        assert_eq!(aggregate([Todo, Done]), InProgress);
        assert_eq!(aggregate([Todo, InProgress, Checked]), InProgress);
    }

    #[test]
    fn todo_with_checked_only_stays_todo() {
        // checked without any done/in_progress sibling does not count as started
        assert_eq!(aggregate([Todo, Checked]), Todo);
    }
}
