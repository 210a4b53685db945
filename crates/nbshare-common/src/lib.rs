pub mod errors;
pub mod events;
pub mod id;
pub mod session;
pub mod uri;

pub use errors::{ConfigError, MirrorError};
pub use events::{Event, EventBus};
pub use id::{new_id, FriendlyId, SessionId};
pub use session::{Role, SessionInfo};
pub use uri::{PrefixUriMapper, UriComponents, UriMapper};

pub type Result<T> = std::result::Result<T, MirrorError>;
