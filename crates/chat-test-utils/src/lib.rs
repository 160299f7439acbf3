// chat-test-utils: shared test doubles for the messenger suite.
//
// Provides a complete in-memory `Repository` implementation and a recording
// `PushGateway` so hub/pipeline/scheduler behavior can be exercised without
// Postgres or a push provider.

pub mod memory_repo;
pub mod recording_push;

pub use memory_repo::MemoryRepository;
pub use recording_push::{RecordedPush, RecordingPush};
