pub mod config;
pub mod error;
pub mod reminder_scheduler;
pub mod remote_task_client;
pub mod storage;
pub mod sync_state_repository;
pub mod task_repository;
