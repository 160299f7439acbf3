// chat-core: domain model and persistence contract for the messenger.
//
// This crate is runtime-free on purpose: the server wires it to Postgres and
// the test utilities wire it to an in-memory map, both through `Repository`.

pub mod error;
pub mod models;
pub mod push;
pub mod repo;

pub use error::{ChatError, RepoError};
pub use push::PushGateway;
pub use models::{
    Conversation, DeviceToken, GroupRole, Message, MessageStatus, MessageTarget, NewMessage,
    Platform, Reaction, ReadReceipt, User,
};
pub use repo::Repository;
