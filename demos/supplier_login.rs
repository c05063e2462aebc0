//! Wires a supplier adapter: JSON login, shared token cache, and the retrying executor.
//!
//! 1. Build one [`TokenCache`] per service and share it between adapters.
//! 2. Describe the vendor's login endpoint with a [`TokenEndpointAuthenticator`].
//! 3. Bind credentials on a [`SessionManager`] and hand it to a [`RequestExecutor`].
//! 4. Issue requests; tokens are fetched, cached, and replaced on expiry automatically.
//!
//! Point `SUPPLIER_BASE_URL`, `SUPPLIER_EMAIL`, and `SUPPLIER_PASSWORD` at a real vendor to run.

// std
use std::{env, sync::Arc, time::Duration};
// crates.io
use color_eyre::{Result, eyre::eyre};
use url::Url;
// self
use vendor_session::{
	context::RequestContext,
	executor::{DefaultVendorStrategy, RequestExecutor, RequestSpec},
	http::ReqwestTransport,
	session::{RefreshStyle, SessionManager, TokenEndpointAuthenticator},
	store::{FilePersistence, TokenCache},
};

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;

	let base = env::var("SUPPLIER_BASE_URL").unwrap_or_else(|_| "https://api.supplier.test/v1/".into());
	let email = env::var("SUPPLIER_EMAIL").map_err(|_| eyre!("SUPPLIER_EMAIL is not set"))?;
	let password =
		env::var("SUPPLIER_PASSWORD").map_err(|_| eyre!("SUPPLIER_PASSWORD is not set"))?;
	let base_url = Url::parse(&base)?;
	let transport = Arc::new(ReqwestTransport::new()?);
	let cache = Arc::new(
		TokenCache::new().with_persistence(Arc::new(FilePersistence::open("tokens.json")?)),
	);
	let authenticator = TokenEndpointAuthenticator::json_login(
		transport.clone(),
		base_url.join("auth/login")?,
		"email",
		"password",
	)
	.with_refresh(base_url.join("auth/refresh")?, RefreshStyle::Json { field: "refresh_token".into() });
	let session = Arc::new(
		SessionManager::new(cache, Arc::new(authenticator)).with_credentials(email, password),
	);
	let executor = RequestExecutor::new(base_url.as_str(), transport)?
		.with_session(session)
		.with_strategy(Arc::new(DefaultVendorStrategy::default().with_expired_marker("token expired")))
		.with_default_header("Accept-Language", "en");
	let ctx = RequestContext::new().with_timeout(Duration::from_secs(60));
	let products = executor
		.execute(&ctx, RequestSpec::get("products/search").query("q", "brake pads").query("limit", 5))
		.await?;

	println!("{products:#}");

	Ok(())
}
