pub mod autosave;
pub mod deadline_timer;
pub mod exam_store;
pub mod session_controller;
pub mod session_registry;
pub mod submission;
