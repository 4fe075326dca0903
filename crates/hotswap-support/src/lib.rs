//! Utilities for modules loaded by `hotswap-core`: translation tables and a
//! periodic update task.

pub mod language;
pub mod update_task;

pub use language::{Language, LanguageError, MISSING_TRANSLATION};
pub use update_task::{Tickable, UpdateTask, UpdateTaskHandle};
