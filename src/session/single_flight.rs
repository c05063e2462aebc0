//! Per-key single-flight coordination for logins and refreshes.
//!
//! The first caller for a key becomes the leader and performs the exchange; later callers get
//! a receiver for the leader's outcome. A leader that is dropped without publishing (its task
//! was cancelled or aborted) closes the channel, which releases every follower with
//! [`Error::Cancelled`].

// crates.io
use tokio::sync::watch;
// self
use crate::{_prelude::*, auth::CredentialKey, auth::TokenRecord};

type Outcome = Option<Result<TokenRecord>>;

#[derive(Default)]
pub(crate) struct SingleFlight {
	flights: Mutex<HashMap<CredentialKey, watch::Receiver<Outcome>>>,
}
impl SingleFlight {
	pub(crate) fn join(&self, key: &CredentialKey) -> Role<'_> {
		let mut flights = self.flights.lock();

		if let Some(rx) = flights.get(key) {
			return Role::Follower(rx.clone());
		}

		let (tx, rx) = watch::channel(None);

		flights.insert(key.clone(), rx.clone());

		Role::Leader(FlightLeader { owner: self, key: key.clone(), tx, rx })
	}

	pub(crate) fn in_flight(&self) -> usize {
		self.flights.lock().len()
	}
}

pub(crate) enum Role<'a> {
	Leader(FlightLeader<'a>),
	Follower(watch::Receiver<Outcome>),
}

/// Publishes the outcome of one exchange; unregisters the flight when dropped.
pub(crate) struct FlightLeader<'a> {
	owner: &'a SingleFlight,
	key: CredentialKey,
	tx: watch::Sender<Outcome>,
	rx: watch::Receiver<Outcome>,
}
impl FlightLeader<'_> {
	pub(crate) fn complete(self, outcome: &Result<TokenRecord>) {
		self.tx.send_replace(Some(outcome.clone()));
	}
}
impl Drop for FlightLeader<'_> {
	fn drop(&mut self) {
		let mut flights = self.owner.flights.lock();

		if flights.get(&self.key).is_some_and(|current| current.same_channel(&self.rx)) {
			flights.remove(&self.key);
		}
	}
}

/// Waits for the leader's outcome.
pub(crate) async fn wait(mut rx: watch::Receiver<Outcome>) -> Result<TokenRecord> {
	let published = match rx.wait_for(Option::is_some).await {
		Ok(outcome) => outcome.clone(),
		Err(_) => None,
	};

	published.unwrap_or(Err(Error::Cancelled))
}
