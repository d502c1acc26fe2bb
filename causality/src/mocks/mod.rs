//! Mock implementations for testing.

mod dag;
pub use dag::{Dag, TestEvent};
mod store;
pub use store::Faulty;
