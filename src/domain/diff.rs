use crate::domain::list_view::{GroupKey, IndexPath, OrderedListView};
use crate::domain::models::Task;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SectionChange {
    Insert { index: usize, key: GroupKey },
    Delete { index: usize, key: GroupKey },
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RowChange {
    Insert {
        task_id: String,
        new: IndexPath,
    },
    Delete {
        task_id: String,
        old: IndexPath,
    },
    Update {
        task_id: String,
        old: IndexPath,
        new: IndexPath,
    },
    Move {
        task_id: String,
        old: IndexPath,
        new: IndexPath,
    },
}

impl RowChange {
    pub fn task_id(&self) -> &str {
        match self {
            Self::Insert { task_id, .. }
            | Self::Delete { task_id, .. }
            | Self::Update { task_id, .. }
            | Self::Move { task_id, .. } => task_id,
        }
    }
}

/// Changes turning one snapshot of a view into the next. Deletions refer to
/// old coordinates, insertions to new ones.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ListDiff {
    pub sections: Vec<SectionChange>,
    pub rows: Vec<RowChange>,
}

impl ListDiff {
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty() && self.rows.is_empty()
    }

    pub fn moves(&self) -> impl Iterator<Item = &RowChange> {
        self.rows
            .iter()
            .filter(|change| matches!(change, RowChange::Move { .. }))
    }
}

struct RowSlot<'a> {
    path: IndexPath,
    position: usize,
    key: &'a GroupKey,
    task: &'a Task,
}

fn index_rows(view: &OrderedListView) -> HashMap<&str, RowSlot<'_>> {
    view.iter()
        .enumerate()
        .map(|(position, (path, key, task))| {
            (
                task.id.as_str(),
                RowSlot {
                    path,
                    position,
                    key,
                    task,
                },
            )
        })
        .collect()
}

/// Minimal diff between two snapshots of the same view.
///
/// Surviving rows whose relative order is unchanged (the longest increasing
/// run of their new positions) stay put; every other survivor, and any row
/// whose group changed, is reported as a move.
pub fn diff_views(old: &OrderedListView, new: &OrderedListView) -> ListDiff {
    let mut diff = ListDiff::default();

    let old_keys = old.sections().iter().map(|section| &section.key).collect::<HashSet<_>>();
    let new_keys = new.sections().iter().map(|section| &section.key).collect::<HashSet<_>>();
    for (index, section) in old.sections().iter().enumerate() {
        if !new_keys.contains(&section.key) {
            diff.sections.push(SectionChange::Delete {
                index,
                key: section.key.clone(),
            });
        }
    }
    for (index, section) in new.sections().iter().enumerate() {
        if !old_keys.contains(&section.key) {
            diff.sections.push(SectionChange::Insert {
                index,
                key: section.key.clone(),
            });
        }
    }

    let old_rows = index_rows(old);
    let new_rows = index_rows(new);

    let mut deletions = Vec::new();
    let mut survivors = Vec::new();
    for (_, _, task) in old.iter() {
        let old_slot = &old_rows[task.id.as_str()];
        match new_rows.get(task.id.as_str()) {
            Some(new_slot) => survivors.push((old_slot, new_slot)),
            None => deletions.push(RowChange::Delete {
                task_id: task.id.clone(),
                old: old_slot.path,
            }),
        }
    }

    let insertions = new
        .iter()
        .filter(|(_, _, task)| !old_rows.contains_key(task.id.as_str()))
        .map(|(path, _, task)| RowChange::Insert {
            task_id: task.id.clone(),
            new: path,
        })
        .collect::<Vec<_>>();

    let new_positions = survivors
        .iter()
        .map(|(_, new_slot)| new_slot.position)
        .collect::<Vec<_>>();
    let stable = longest_increasing_subsequence(&new_positions)
        .into_iter()
        .collect::<HashSet<_>>();

    let mut moves = Vec::new();
    let mut updates = Vec::new();
    for (index, (old_slot, new_slot)) in survivors.iter().enumerate() {
        let task_id = old_slot.task.id.clone();
        if !stable.contains(&index) || old_slot.key != new_slot.key {
            moves.push(RowChange::Move {
                task_id,
                old: old_slot.path,
                new: new_slot.path,
            });
        } else if row_content_changed(old_slot.task, new_slot.task) {
            updates.push(RowChange::Update {
                task_id,
                old: old_slot.path,
                new: new_slot.path,
            });
        }
    }

    diff.rows.extend(deletions);
    diff.rows.extend(insertions);
    diff.rows.extend(moves);
    diff.rows.extend(updates);
    diff
}

fn row_content_changed(old: &Task, new: &Task) -> bool {
    old.title != new.title
        || old.due_at != new.due_at
        || old.completed_at != new.completed_at
        || old.archived != new.archived
        || old.location_id != new.location_id
}

/// Indices (into `values`) of one longest strictly increasing subsequence.
fn longest_increasing_subsequence(values: &[usize]) -> Vec<usize> {
    // tails[k] holds the index of the smallest tail of an increasing run of length k + 1.
    let mut tails: Vec<usize> = Vec::new();
    let mut predecessors: Vec<Option<usize>> = vec![None; values.len()];

    for (index, value) in values.iter().enumerate() {
        let slot = tails.partition_point(|&tail| values[tail] < *value);
        if slot > 0 {
            predecessors[index] = Some(tails[slot - 1]);
        }
        if slot == tails.len() {
            tails.push(index);
        } else {
            tails[slot] = index;
        }
    }

    let mut sequence = Vec::with_capacity(tails.len());
    let mut cursor = tails.last().copied();
    while let Some(index) = cursor {
        sequence.push(index);
        cursor = predecessors[index];
    }
    sequence.reverse();
    sequence
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::list_view::ViewKind;
    use crate::domain::models::Location;
    use crate::domain::time_order::LocalCalendar;
    use chrono::{DateTime, Duration, Utc};
    use proptest::prelude::*;

    fn fixed_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn now() -> DateTime<Utc> {
        fixed_time("2026-02-18T08:00:00Z")
    }

    fn locations() -> HashMap<String, Location> {
        ["home", "work"]
            .into_iter()
            .map(|id| {
                (
                    id.to_string(),
                    Location {
                        id: id.to_string(),
                        title: id.to_string(),
                        latitude: 0.0,
                        longitude: 0.0,
                    },
                )
            })
            .collect()
    }

    fn task(id: &str, minutes: i64, location_id: &str) -> Task {
        let mut task = Task::new(
            id,
            format!("Task {id}"),
            Some(fixed_time("2026-02-18T09:00:00Z") + Duration::minutes(minutes)),
        );
        task.location_id = Some(location_id.to_string());
        task
    }

    fn view(tasks: &[Task]) -> OrderedListView {
        OrderedListView::build(
            ViewKind::ByLocation,
            tasks,
            &locations(),
            now(),
            &LocalCalendar::default(),
        )
    }

    #[test]
    fn identical_views_produce_empty_diff() {
        let tasks = vec![task("a", 0, "home"), task("b", 10, "home")];
        assert!(diff_views(&view(&tasks), &view(&tasks)).is_empty());
    }

    #[test]
    fn moving_one_row_reports_a_single_move() {
        let before = vec![
            task("a", 0, "home"),
            task("b", 10, "home"),
            task("c", 20, "home"),
            task("d", 30, "home"),
        ];
        let mut after = before.clone();
        after[3].due_at = Some(fixed_time("2026-02-18T09:05:00Z"));

        let diff = diff_views(&view(&before), &view(&after));

        assert_eq!(
            diff.rows,
            vec![RowChange::Move {
                task_id: "d".to_string(),
                old: IndexPath::new(0, 3),
                new: IndexPath::new(0, 1),
            }]
        );
        assert!(diff.sections.is_empty());
    }

    #[test]
    fn group_change_is_a_move_with_section_bookkeeping() {
        let before = vec![task("a", 0, "home"), task("b", 10, "work")];
        let mut after = before.clone();
        after[0].location_id = Some("work".to_string());

        let diff = diff_views(&view(&before), &view(&after));

        assert_eq!(
            diff.sections,
            vec![SectionChange::Delete {
                index: 0,
                key: GroupKey::Location(Some("home".to_string())),
            }]
        );
        assert_eq!(
            diff.rows,
            vec![RowChange::Move {
                task_id: "a".to_string(),
                old: IndexPath::new(0, 0),
                new: IndexPath::new(0, 0),
            }]
        );
    }

    #[test]
    fn inserts_deletes_and_updates_are_classified() {
        let before = vec![task("a", 0, "home"), task("b", 10, "home")];
        let mut after = vec![before[1].clone(), task("c", 20, "home")];
        after[0].title = "Renamed".to_string();

        let diff = diff_views(&view(&before), &view(&after));

        assert_eq!(
            diff.rows,
            vec![
                RowChange::Delete {
                    task_id: "a".to_string(),
                    old: IndexPath::new(0, 0),
                },
                RowChange::Insert {
                    task_id: "c".to_string(),
                    new: IndexPath::new(0, 1),
                },
                RowChange::Update {
                    task_id: "b".to_string(),
                    old: IndexPath::new(0, 1),
                    new: IndexPath::new(0, 0),
                },
            ]
        );
    }

    #[test]
    fn sync_flag_changes_are_not_row_updates() {
        let before = vec![task("a", 0, "home")];
        let mut after = before.clone();
        after[0].needs_sync = false;
        after[0].version += 1;
        assert!(diff_views(&view(&before), &view(&after)).is_empty());
    }

    #[test]
    fn lis_picks_longest_run() {
        assert_eq!(longest_increasing_subsequence(&[]), Vec::<usize>::new());
        assert_eq!(longest_increasing_subsequence(&[0, 1, 2]), vec![0, 1, 2]);
        let picked = longest_increasing_subsequence(&[3, 0, 1, 2]);
        assert_eq!(picked, vec![1, 2, 3]);
        let picked = longest_increasing_subsequence(&[1, 2, 3, 0]);
        assert_eq!(picked, vec![0, 1, 2]);
    }

    type Layout = Vec<(GroupKey, Vec<String>)>;

    fn layout(view: &OrderedListView) -> Layout {
        view.sections()
            .iter()
            .map(|section| {
                (
                    section.key.clone(),
                    section.rows.iter().map(|task| task.id.clone()).collect(),
                )
            })
            .collect()
    }

    /// Replays `diff` on `old` the way a table view applies a batch update:
    /// removals at old coordinates first, then insertions at new coordinates
    /// in ascending order.
    fn apply(old: &OrderedListView, diff: &ListDiff) -> Layout {
        let mut removed_rows = HashSet::new();
        let mut inserted_rows = Vec::new();
        for change in &diff.rows {
            match change {
                RowChange::Delete { old, .. } => {
                    removed_rows.insert(*old);
                }
                RowChange::Insert { task_id, new } => inserted_rows.push((*new, task_id.clone())),
                RowChange::Move { task_id, old, new } => {
                    removed_rows.insert(*old);
                    inserted_rows.push((*new, task_id.clone()));
                }
                RowChange::Update { .. } => {}
            }
        }
        let removed_sections = diff
            .sections
            .iter()
            .filter_map(|change| match change {
                SectionChange::Delete { index, .. } => Some(*index),
                SectionChange::Insert { .. } => None,
            })
            .collect::<HashSet<_>>();
        let mut inserted_sections = diff
            .sections
            .iter()
            .filter_map(|change| match change {
                SectionChange::Insert { index, key } => Some((*index, key.clone())),
                SectionChange::Delete { .. } => None,
            })
            .collect::<Vec<_>>();
        inserted_sections.sort();
        inserted_rows.sort();

        let mut sections = layout(old)
            .into_iter()
            .enumerate()
            .filter(|(index, _)| !removed_sections.contains(index))
            .map(|(section, (key, rows))| {
                let rows = rows
                    .into_iter()
                    .enumerate()
                    .filter(|(row, _)| !removed_rows.contains(&IndexPath::new(section, *row)))
                    .map(|(_, task_id)| task_id)
                    .collect();
                (key, rows)
            })
            .collect::<Layout>();
        for (index, key) in inserted_sections {
            sections.insert(index, (key, Vec::new()));
        }
        for (path, task_id) in inserted_rows {
            sections[path.section].1.insert(path.row, task_id);
        }
        sections
    }

    fn generated_task(index: usize, hours: i64, location: usize) -> Task {
        let mut task = Task::new(
            format!("t{index}"),
            format!("Task {}", index % 3),
            Some(fixed_time("2026-02-18T00:00:00Z") + Duration::hours(hours)),
        );
        task.location_id = match location {
            0 => None,
            1 => Some("home".to_string()),
            _ => Some("work".to_string()),
        };
        task
    }

    fn build(kind: ViewKind, tasks: &[Task]) -> OrderedListView {
        OrderedListView::build(kind, tasks, &locations(), now(), &LocalCalendar::default())
    }

    // Property: replaying the diff on the old view reproduces the new view, and
    // every update points at its row in the new view.
    proptest! {
        #[test]
        fn diff_replays_old_view_into_new_view(
            slots in proptest::collection::vec(
                (
                    proptest::option::of((-120i64..480, 0usize..3)),
                    proptest::option::of((-120i64..480, 0usize..3)),
                ),
                0..12,
            ),
            by_due_date in any::<bool>(),
        ) {
            let kind = if by_due_date { ViewKind::ByDueDate } else { ViewKind::ByLocation };
            let mut before = Vec::new();
            let mut after = Vec::new();
            for (index, (old, new)) in slots.into_iter().enumerate() {
                if let Some((hours, location)) = old {
                    before.push(generated_task(index, hours, location));
                }
                if let Some((hours, location)) = new {
                    after.push(generated_task(index, hours, location));
                }
            }
            let old_view = build(kind, &before);
            let new_view = build(kind, &after);

            let diff = diff_views(&old_view, &new_view);
            let replayed = apply(&old_view, &diff);

            prop_assert_eq!(&replayed, &layout(&new_view));
            for change in &diff.rows {
                if let RowChange::Update { task_id, new, .. } = change {
                    prop_assert_eq!(&replayed[new.section].1[new.row], task_id);
                }
            }
        }
    }
}
