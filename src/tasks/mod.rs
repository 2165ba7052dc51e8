//! Periodic control tasks, one OS thread each.
//!
//! Every task follows the same shape: an `Arc`-shared state block, a
//! `start`/`stop` pair gated on an atomic running flag, and an
//! absolute-deadline loop (`next_wake += period` every iteration, so
//! computation overruns never accumulate drift).

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use spin_sleep::{SpinSleeper, SpinStrategy};
use thread_priority::{ThreadBuilderExt, ThreadPriority, ThreadPriorityValue};

use crate::types::FaultKind;

pub mod command_logic;
pub mod data_logger;
pub mod fault_monitor;
pub mod local_hmi;
pub mod navigation;
pub mod sensor_filter;

/// Sleeper tuned the same way for every periodic loop: spin the final
/// 100 µs, yield while waiting out the bulk of the period.
pub(crate) fn periodic_sleeper() -> SpinSleeper {
    SpinSleeper::new(100_000).with_spin_strategy(SpinStrategy::YieldThread)
}

/// Spawns a named task thread, optionally at an elevated static priority.
/// Failure to elevate is logged and not fatal.
pub(crate) fn spawn_task<F>(name: &'static str, module: &'static str, priority: Option<u8>, body: F) -> JoinHandle<()>
where
    F: FnOnce() + Send + 'static,
{
    let builder = std::thread::Builder::new().name(name.to_string());

    match priority {
        Some(level) => {
            let priority = ThreadPriorityValue::try_from(level)
                .map(ThreadPriority::Crossplatform)
                .unwrap_or(ThreadPriority::Max);
            builder
                .spawn_with_priority(priority, move |elevation| {
                    match elevation {
                        Ok(()) => {
                            log::info!(target: module, "event=start,rt_priority={}", level)
                        }
                        Err(err) => {
                            log::warn!(target: module, "event=start,rt_priority=failed,err={:?}", err)
                        }
                    }
                    body()
                })
                .expect("spawn task thread")
        }
        None => builder.spawn(body).expect("spawn task thread"),
    }
}

/// Lock-free fault-edge mailbox.
///
/// The fault monitor's callbacks run under the callback-list lock; raising
/// an alert must therefore not touch any state lock of lower rank. The
/// mailbox is a single atomic slot holding the latest broadcast
/// classification, drained by its owner task once per iteration.
#[derive(Clone, Default)]
pub struct FaultAlert(Arc<AtomicU8>);

impl FaultAlert {
    pub fn raise(&self, kind: FaultKind) {
        self.0.store(kind.as_u8(), Ordering::Release);
    }

    /// Takes and clears the pending alert.
    pub fn take(&self) -> FaultKind {
        FaultKind::from_u8(self.0.swap(0, Ordering::AcqRel))
    }
}
