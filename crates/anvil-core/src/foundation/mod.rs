//! Foundation layer: updates, attachments and backend errors.

pub mod attachment;
pub mod error;
pub mod update;

pub use attachment::{Attachment, AttachmentKind};
pub use error::{BackendError, BackendResult};
pub use update::{Message, RecipientKind, Update, UpdateKind};
