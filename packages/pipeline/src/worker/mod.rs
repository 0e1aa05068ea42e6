//! Base worker loop (spec §4.1.1), ported from
//! `talos.workers.base_worker.BaseWorker` and its two subclasses
//! `ProducerWorker` / `ConsumerWorker`.
//!
//! Shaped after the teacher's `Service` trait (`kernel/jobs/worker.rs`):
//! a component implements one pass of work, and a generic loop handles
//! startup sleep, retry, and the producer/consumer scheduling split.

mod component;
mod consumer;
mod producer;

pub use component::Component;
pub use consumer::ConsumerLoop;
pub use producer::ProducerLoop;
