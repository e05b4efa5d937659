//! Unit tests for kafka-offsets-mirror-core.
//!
//! Pipelines are driven through in-memory sources, processors and group
//! connections, so nothing here needs a running cluster.

pub mod dispatcher;
pub mod helpers;
pub mod restore;
pub mod tail;
