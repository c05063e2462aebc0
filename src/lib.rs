//! Credential-backed vendor sessions: single-flight token caching, pluggable persistence hooks,
//! and a retrying request pipeline for heterogeneous supplier REST APIs.
//!
//! The crate is organized leaves-first:
//!
//! - [`clock`] and [`auth::ExpiryPolicy`] answer "is this token still usable?".
//! - [`auth::CredentialKey`] derives the opaque cache index from an identity/secret pair.
//! - [`store::TokenCache`] is the only shared mutable state; it also owns the single-flight
//!   coordinator so every [`session::SessionManager`] sharing a cache coordinates logins.
//! - [`executor::RequestExecutor`] wraps each outbound call with token attachment,
//!   classification, bounded backoff, and one re-authentication on expiry.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod auth;
pub mod clock;
pub mod context;
pub mod error;
pub mod executor;
pub mod http;
pub mod obs;
pub mod retry;
pub mod session;
pub mod store;

mod _prelude {
	pub use std::{
		collections::HashMap,
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		sync::Arc,
		time::Duration as StdDuration,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

#[cfg(feature = "reqwest")] pub use reqwest;
pub use url;
#[cfg(test)] use {color_eyre as _, httpmock as _};
