mod group;
mod message;
mod user;

pub use group::{GroupMember, GroupRole};
pub use message::{
    Conversation, Message, MessageStatus, MessageTarget, NewMessage, Reaction, ReadReceipt,
    valid_disappearing_seconds,
};
pub use user::{DeviceToken, Platform, User};
