//! tandem-core: Shared protocol library for tandem playback sessions.
//!
//! Provides the JSON event messages exchanged between hosts, clients and the
//! server, the text-frame codec, input validation, connection identities and
//! the error taxonomy.

pub mod codec;
pub mod error;
pub mod identity;
pub mod messages;
pub mod validate;

// Re-export commonly used items at crate root.
pub use codec::{decode_event, encode_event};
pub use error::{TandemError, TandemResult};
pub use identity::{ConnectionId, Role};
pub use messages::{ClientEvent, ServerEvent};
