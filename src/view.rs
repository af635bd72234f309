//! Pure helpers for list consumers. Nothing here is cached; call them on
//! every render.

use crate::model::{Status, Task};
use chrono::NaiveDate;
use std::cmp::Ordering;

/// Completed tasks last; among the rest urgent first; then newest first.
pub fn sort_for_display(tasks: &[Task]) -> Vec<&Task> {
    let mut sorted: Vec<&Task> = tasks.iter().collect();
    sorted.sort_by(|a, b| display_order(a, b));
    sorted
}

fn display_order(a: &Task, b: &Task) -> Ordering {
    a.is_done()
        .cmp(&b.is_done())
        .then_with(|| is_urgent_highlighted(b).cmp(&is_urgent_highlighted(a)))
        .then_with(|| b.created_at.cmp(&a.created_at))
}

/// Urgency is only shown while the task is still open. The stored priority
/// is left alone.
pub fn is_urgent_highlighted(task: &Task) -> bool {
    task.priority.is_urgent() && !task.is_done()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskStats {
    pub total: usize,
    pub todo: usize,
    pub in_progress: usize,
    pub done: usize,
    pub overdue: usize,
    pub urgent_active: usize,
}

impl TaskStats {
    pub fn compute(tasks: &[Task], today: NaiveDate) -> Self {
        let mut stats = Self {
            total: tasks.len(),
            ..Default::default()
        };
        for task in tasks {
            match task.status {
                Status::Todo => stats.todo += 1,
                Status::InProgress => stats.in_progress += 1,
                Status::Done => stats.done += 1,
            }
            if task.is_overdue(today) {
                stats.overdue += 1;
            }
            if is_urgent_highlighted(task) {
                stats.urgent_active += 1;
            }
        }
        stats
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListFilter {
    pub status: Option<Status>,
    pub assignee: Option<String>,
    pub search: Option<String>,
}

impl ListFilter {
    pub fn matches(&self, task: &Task) -> bool {
        if self.status.is_some_and(|s| s != task.status) {
            return false;
        }
        if self
            .assignee
            .as_deref()
            .is_some_and(|a| a != task.assigned_to)
        {
            return false;
        }
        match self.search.as_deref().map(str::trim) {
            Some(q) if !q.is_empty() => {
                let q = q.to_lowercase();
                task.title.to_lowercase().contains(&q)
                    || task
                        .description
                        .as_deref()
                        .is_some_and(|d| d.to_lowercase().contains(&q))
            }
            _ => true,
        }
    }

    pub fn apply<'a>(&self, tasks: &[&'a Task]) -> Vec<&'a Task> {
        tasks.iter().copied().filter(|t| self.matches(t)).collect()
    }
}
