use crate::domain::models::{Location, Task};
use crate::domain::time_order::{classify, LocalCalendar, TimeOrder};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

pub const NO_LOCATION_TITLE: &str = "No location";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ViewKind {
    ByLocation,
    ByDueDate,
    Archived,
}

impl ViewKind {
    pub fn is_reorderable(self) -> bool {
        !matches!(self, Self::Archived)
    }

    pub fn includes(self, task: &Task) -> bool {
        match self {
            Self::ByLocation | Self::ByDueDate => task.is_active(),
            Self::Archived => task.archived && !task.pending_deletion,
        }
    }
}

/// Section identity within a view.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum GroupKey {
    Location(Option<String>),
    DueBucket(TimeOrder),
    Completion(TimeOrder),
}

impl GroupKey {
    pub fn location_id(&self) -> Option<&str> {
        match self {
            Self::Location(location_id) => location_id.as_deref(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IndexPath {
    pub section: usize,
    pub row: usize,
}

impl IndexPath {
    pub fn new(section: usize, row: usize) -> Self {
        Self { section, row }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub key: GroupKey,
    pub title: String,
    pub rows: Vec<Task>,
}

/// Immutable, grouped and sorted snapshot of tasks.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderedListView {
    kind: ViewKind,
    sections: Vec<Section>,
}

impl OrderedListView {
    pub fn build<'a>(
        kind: ViewKind,
        tasks: impl IntoIterator<Item = &'a Task>,
        locations: &HashMap<String, Location>,
        now: DateTime<Utc>,
        calendar: &LocalCalendar,
    ) -> Self {
        let mut grouped: HashMap<GroupKey, Vec<Task>> = HashMap::new();
        for task in tasks.into_iter().filter(|task| kind.includes(task)) {
            let key = group_key_for(kind, task, locations, now, calendar);
            grouped.entry(key).or_default().push(task.clone());
        }

        let mut sections = grouped
            .into_iter()
            .map(|(key, mut rows)| {
                rows.sort_by(|left, right| compare_rows(kind, left, right));
                Section {
                    title: section_title(&key, locations),
                    key,
                    rows,
                }
            })
            .collect::<Vec<_>>();
        sections.sort_by(compare_sections);

        Self { kind, sections }
    }

    pub fn kind(&self) -> ViewKind {
        self.kind
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn section(&self, index: usize) -> Option<&Section> {
        self.sections.get(index)
    }

    pub fn section_index(&self, key: &GroupKey) -> Option<usize> {
        self.sections.iter().position(|section| &section.key == key)
    }

    pub fn task_at(&self, path: IndexPath) -> Option<&Task> {
        self.sections.get(path.section)?.rows.get(path.row)
    }

    pub fn index_path_of(&self, task_id: &str) -> Option<IndexPath> {
        self.sections
            .iter()
            .enumerate()
            .find_map(|(section_index, section)| {
                section
                    .rows
                    .iter()
                    .position(|task| task.id == task_id)
                    .map(|row| IndexPath::new(section_index, row))
            })
    }

    pub fn len(&self) -> usize {
        self.sections.iter().map(|section| section.rows.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.iter().all(|section| section.rows.is_empty())
    }

    /// Rows in display order, paired with their coordinates.
    pub fn iter(&self) -> impl Iterator<Item = (IndexPath, &GroupKey, &Task)> {
        self.sections
            .iter()
            .enumerate()
            .flat_map(|(section_index, section)| {
                section
                    .rows
                    .iter()
                    .enumerate()
                    .map(move |(row, task)| (IndexPath::new(section_index, row), &section.key, task))
            })
    }
}

pub fn group_key_for(
    kind: ViewKind,
    task: &Task,
    locations: &HashMap<String, Location>,
    now: DateTime<Utc>,
    calendar: &LocalCalendar,
) -> GroupKey {
    match kind {
        // A dangling reference behaves like no location at all.
        ViewKind::ByLocation => GroupKey::Location(
            task.location_id
                .as_ref()
                .filter(|location_id| locations.contains_key(*location_id))
                .cloned(),
        ),
        ViewKind::ByDueDate => GroupKey::DueBucket(classify(task.due_at, now, calendar)),
        ViewKind::Archived => GroupKey::Completion(classify(task.completed_at, now, calendar)),
    }
}

/// Composite row order: due date (undated last), title, id. Archived rows
/// are ordered by most recent completion instead.
pub fn compare_rows(kind: ViewKind, left: &Task, right: &Task) -> Ordering {
    let primary = match kind {
        ViewKind::ByLocation | ViewKind::ByDueDate => compare_optional_dates(left.due_at, right.due_at),
        ViewKind::Archived => compare_optional_dates(right.completed_at, left.completed_at),
    };
    primary
        .then_with(|| left.title.to_lowercase().cmp(&right.title.to_lowercase()))
        .then_with(|| left.id.cmp(&right.id))
}

fn compare_optional_dates(left: Option<DateTime<Utc>>, right: Option<DateTime<Utc>>) -> Ordering {
    match (left, right) {
        (Some(left), Some(right)) => left.cmp(&right),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn compare_sections(left: &Section, right: &Section) -> Ordering {
    match (&left.key, &right.key) {
        (GroupKey::Location(Some(left_id)), GroupKey::Location(Some(right_id))) => left
            .title
            .to_lowercase()
            .cmp(&right.title.to_lowercase())
            .then_with(|| left_id.cmp(right_id)),
        (GroupKey::Location(Some(_)), GroupKey::Location(None)) => Ordering::Less,
        (GroupKey::Location(None), GroupKey::Location(Some(_))) => Ordering::Greater,
        (GroupKey::DueBucket(left), GroupKey::DueBucket(right)) => {
            left.ranking().cmp(&right.ranking())
        }
        (GroupKey::Completion(left), GroupKey::Completion(right)) => {
            right.ranking().cmp(&left.ranking())
        }
        _ => Ordering::Equal,
    }
}

fn section_title(key: &GroupKey, locations: &HashMap<String, Location>) -> String {
    match key {
        GroupKey::Location(Some(location_id)) => locations
            .get(location_id)
            .map(|location| location.title.clone())
            .unwrap_or_else(|| NO_LOCATION_TITLE.to_string()),
        GroupKey::Location(None) => NO_LOCATION_TITLE.to_string(),
        GroupKey::DueBucket(order) | GroupKey::Completion(order) => order.label().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn now() -> DateTime<Utc> {
        fixed_time("2026-02-18T12:00:00Z")
    }

    fn location(id: &str, title: &str) -> (String, Location) {
        (
            id.to_string(),
            Location {
                id: id.to_string(),
                title: title.to_string(),
                latitude: 0.0,
                longitude: 0.0,
            },
        )
    }

    fn task(id: &str, title: &str, due: Option<&str>, location_id: Option<&str>) -> Task {
        let mut task = Task::new(id, title, due.map(fixed_time));
        task.location_id = location_id.map(ToOwned::to_owned);
        task
    }

    fn sample_locations() -> HashMap<String, Location> {
        HashMap::from([location("loc-w", "work"), location("loc-h", "Home")])
    }

    fn sample_tasks() -> Vec<Task> {
        vec![
            task("t1", "Pay rent", Some("2026-02-18T09:00:00Z"), Some("loc-h")),
            task("t2", "Water plants", Some("2026-02-17T09:00:00Z"), Some("loc-h")),
            task("t3", "Standup", Some("2026-02-19T09:00:00Z"), Some("loc-w")),
            task("t4", "Someday idea", None, None),
            task("t5", "Review PR", Some("2026-02-19T09:00:00Z"), Some("loc-w")),
            task("t6", "Old errand", Some("2026-02-18T10:00:00Z"), Some("loc-gone")),
        ]
    }

    #[test]
    fn location_view_orders_sections_alphabetically_with_unassigned_last() {
        let view = OrderedListView::build(
            ViewKind::ByLocation,
            &sample_tasks(),
            &sample_locations(),
            now(),
            &LocalCalendar::default(),
        );

        let titles = view.sections().iter().map(|section| section.title.as_str()).collect::<Vec<_>>();
        assert_eq!(titles, vec!["Home", "work", NO_LOCATION_TITLE]);

        let home = view.section(0).expect("home section");
        let ids = home.rows.iter().map(|task| task.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["t2", "t1"]);

        // Same due date falls back to title order.
        let work = view.section(1).expect("work section");
        let ids = work.rows.iter().map(|task| task.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["t5", "t3"]);

        // Dated rows precede undated ones; the dangling location is treated as none.
        let unassigned = view.section(2).expect("unassigned section");
        let ids = unassigned.rows.iter().map(|task| task.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["t6", "t4"]);
    }

    #[test]
    fn due_date_view_orders_sections_by_rank() {
        let view = OrderedListView::build(
            ViewKind::ByDueDate,
            &sample_tasks(),
            &sample_locations(),
            now(),
            &LocalCalendar::default(),
        );

        let keys = view.sections().iter().map(|section| section.key.clone()).collect::<Vec<_>>();
        assert_eq!(
            keys,
            vec![
                GroupKey::DueBucket(TimeOrder::Yesterday),
                GroupKey::DueBucket(TimeOrder::Today),
                GroupKey::DueBucket(TimeOrder::Tomorrow),
                GroupKey::DueBucket(TimeOrder::SometimeInTheFuture),
            ]
        );
        assert_eq!(view.section(1).expect("today").title, "Today");
        assert_eq!(view.len(), 6);
    }

    #[test]
    fn archived_view_lists_most_recent_completion_first() {
        let mut older = task("a1", "Older", None, None);
        older.completed_at = Some(fixed_time("2026-02-10T09:00:00Z"));
        older.archived = true;
        let mut newer = task("a2", "Newer", None, None);
        newer.completed_at = Some(fixed_time("2026-02-17T09:00:00Z"));
        newer.archived = true;
        let mut deleted = task("a3", "Deleted", None, None);
        deleted.completed_at = Some(fixed_time("2026-02-17T10:00:00Z"));
        deleted.archived = true;
        deleted.pending_deletion = true;
        let active = task("a4", "Active", None, None);

        let view = OrderedListView::build(
            ViewKind::Archived,
            &[older, newer, deleted, active],
            &HashMap::new(),
            now(),
            &LocalCalendar::default(),
        );

        let keys = view.sections().iter().map(|section| section.key.clone()).collect::<Vec<_>>();
        assert_eq!(
            keys,
            vec![
                GroupKey::Completion(TimeOrder::Yesterday),
                GroupKey::Completion(TimeOrder::LastWeek),
            ]
        );
        assert_eq!(view.len(), 2);
        assert!(!view.kind().is_reorderable());
    }

    #[test]
    fn soft_deleted_and_archived_tasks_are_hidden_from_active_views() {
        let mut tasks = sample_tasks();
        tasks[0].pending_deletion = true;
        tasks[1].completed_at = Some(fixed_time("2026-02-17T10:00:00Z"));
        tasks[1].archived = true;

        let view = OrderedListView::build(
            ViewKind::ByLocation,
            &tasks,
            &sample_locations(),
            now(),
            &LocalCalendar::default(),
        );

        assert_eq!(view.index_path_of("t1"), None);
        assert_eq!(view.index_path_of("t2"), None);
        assert_eq!(view.index_path_of("t3"), Some(IndexPath::new(0, 1)));
    }

    #[test]
    fn iter_walks_rows_in_display_order() {
        let view = OrderedListView::build(
            ViewKind::ByLocation,
            &sample_tasks(),
            &sample_locations(),
            now(),
            &LocalCalendar::default(),
        );

        let paths = view.iter().map(|(path, _, task)| (path, task.id.clone())).collect::<Vec<_>>();
        assert_eq!(paths[0], (IndexPath::new(0, 0), "t2".to_string()));
        assert_eq!(paths[5], (IndexPath::new(2, 1), "t4".to_string()));
        assert_eq!(view.task_at(IndexPath::new(1, 0)).map(|task| task.id.as_str()), Some("t5"));
    }
}
