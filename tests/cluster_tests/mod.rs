//! Integration tests for bifrost
//!
//! These tests run the desirers against a real cluster (kind) and tell the
//! story of how the control plane's requests become cluster objects.
//!
//! # Test Organization
//!
//! - `lrp_stories`: desiring, scaling, inspecting and stopping long-running
//!   processes, including the disruption budget and pull secret policies
//!
//! - `task_stories`: running and cancelling tasks
//!
//! # Running These Tests
//!
//! ```bash
//! cargo test --test cluster -- --ignored
//! ```

mod helpers;
mod lrp_stories;
mod task_stories;
