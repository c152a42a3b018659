//! Auth-domain identifiers, OAuth state nonces, API keys, and token models.

pub mod api_key;
pub mod id;
pub mod state;
pub mod token;

pub use api_key::*;
pub use id::*;
pub use state::*;
pub use token::{record::*, secret::*};
