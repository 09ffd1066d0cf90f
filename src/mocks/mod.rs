//! Mock implementations for testing.
//!
//! Compiled for unit tests and behind the `mocks` feature for downstream
//! integration tests.

mod clock;
mod services;
mod stores;
mod transport;

pub use clock::ManualClock;
pub use services::{
    sample_children, sample_detail, MockCatalog, MockProcessingClient, ProcessingBehavior,
    RecordingRepository,
};
pub use stores::{FailingCircuitStore, FailingQueue};
pub use transport::{MockResponse, MockTransport, RecordedRequest};
