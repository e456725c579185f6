//! Background Tasks Module
//!
//! Contains background tasks that keep a cache tidy while it is in use.
//!
//! # Tasks
//! - Maintenance: prunes expired records and enforces the quota at configured intervals

mod maintenance;

pub use maintenance::spawn_maintenance_task;
