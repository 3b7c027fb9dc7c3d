pub mod bootstrap;
pub mod commands;
pub mod housekeeping;
pub mod reminders;
pub mod reorder;
pub mod store;
pub mod sync;
