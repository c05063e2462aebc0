//! Auth-domain building blocks: credentials, derived cache keys, token records, and the
//! expiry policy deciding when a record stops being usable.

pub mod credentials;
pub mod expiry;
pub mod key;
pub mod token;

pub use credentials::*;
pub use expiry::*;
pub use key::*;
pub use token::{record::*, secret::*};
