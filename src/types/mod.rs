//! Data structures shared by the import pipeline

pub mod channel;
pub mod message;
pub mod run;

pub use channel::{ChannelSyncStatus, MessageChannel, NewChannel, SyncCursor};
pub use message::{Attachment, ImportedMessage, Participant, ParticipantRole, RawMessage};
pub use run::{FailedMessage, RunOutcome, SyncRunReport};
