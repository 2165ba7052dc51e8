//! Real-time control core for an autonomous mining-haulage vehicle.
//!
//! A thread-per-task runtime: the sensor filter produces filtered samples
//! into a shared ring buffer; fault monitoring, command logic, navigation,
//! the data logger and the local HMI consume the latest sample on their own
//! periods; a watchdog and a performance monitor watch all of them. The
//! coordinator in `main` fans boundary input and output through the
//! file-based message bridge.

pub mod bridge;
pub mod buffer;
pub mod health;
pub mod logfmt;
pub mod planner;
pub mod tasks;
pub mod types;
