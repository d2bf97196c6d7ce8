//! The `-pair` flow: PIN display, exchange, and user-facing outcome.

use pistream_control::{PairingChannel, PairingManager};
use pistream_core::{ControlError, PairState};
use pistream_identity::IdentityProvider;
use tracing::{info, warn};

use crate::listener::ConnectionListener;

pub fn pin_prompt(pin: &str) -> String {
    format!("Please enter the following PIN on the target PC: {pin}")
}

/// Pairs with the host behind `channel` using `pin`, reporting every
/// outcome through `listener`. Returns the final pair state.
///
/// A host that is already paired is left alone and reported as such.
pub async fn pair_with_host(
    channel: &dyn PairingChannel,
    identity: &dyn IdentityProvider,
    listener: &dyn ConnectionListener,
    pin: &str,
) -> Result<PairState, ControlError> {
    if let Err(e) = identity.unique_id() {
        listener.display_error("Pair", "Couldn't find a MAC address");
        return Err(e.into());
    }

    let result = match channel.pair_state().await {
        Ok(PairState::Paired) => {
            listener.display_error("pair", "Already paired");
            return Ok(PairState::Paired);
        }
        Ok(_) => {
            info!("Pairing with PIN {}", pin);
            listener.display_message(&pin_prompt(pin));
            PairingManager::new(channel, identity.credentials()).pair(pin).await
        }
        Err(e) => Err(e),
    };
    report(listener, &result);
    result
}

/// Turns the result of an exchange into the message the user sees.
fn report(listener: &dyn ConnectionListener, result: &Result<PairState, ControlError>) {
    match result {
        Ok(PairState::Paired) => listener.display_message("Paired successfully"),
        Ok(PairState::PinWrong) => listener.display_error("pair", "Incorrect PIN"),
        Ok(PairState::Failed | PairState::NotPaired) => {
            listener.display_error("pair", "Pairing failed")
        }
        Err(e) => {
            warn!("Pairing aborted: {}", e);
            listener.display_error("Pair", &e.to_string());
        }
    }
}
