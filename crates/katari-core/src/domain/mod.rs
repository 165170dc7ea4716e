//! Domain model (IDs, stream events, statuses, visibility).

pub mod event;
pub mod ids;
pub mod status;
pub mod visibility;

pub use self::event::{Notification, StreamEvent};
pub use self::ids::{AccountId, StatusId};
pub use self::status::{Account, Attachment, MediaKind, NewStatus, Status};
pub use self::visibility::Visibility;
