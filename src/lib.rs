pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::commands::{
    AppState, ListViewResponse, MoveTaskResponse, SectionResponse, SnoozeResponse, SyncTasksResponse,
};
pub use application::reorder::{MoveOutcome, ReorderError, ReorderService};
pub use application::store::{ListSubscription, TaskStore};
pub use domain::diff::{diff_views, ListDiff, RowChange, SectionChange};
pub use domain::interpolation::{
    compute_new_due_date, compute_new_due_date_within, DegenerateInterpolation, InterpolationPolicy,
};
pub use domain::list_view::{GroupKey, IndexPath, OrderedListView, Section, ViewKind};
pub use domain::models::{Location, Task, TaskPatch};
pub use domain::time_order::{bucket_window, classify, DueWindow, LocalCalendar, TimeOrder};
pub use infrastructure::error::InfraError;
