pub mod bootstrap;
pub mod change_listener;
pub mod commands;
pub mod recurrence_rules;
pub mod task_note;
pub mod task_state;
