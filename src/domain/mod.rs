pub mod diff;
pub mod interpolation;
pub mod list_view;
pub mod models;
pub mod time_order;
