//! PIN pairing: mutual authentication of client and host certificates.
//!
//! Both sides prove knowledge of the PIN by exchanging AES-encrypted
//! challenges keyed on it, and prove ownership of their certificates by
//! signing random secrets. A PIN mismatch shows up as a hash mismatch in the
//! host's challenge response.

use std::time::Duration;

use async_trait::async_trait;
use pistream_core::{ControlError, PairFailure, PairState};
use pistream_identity::{der, IdentityMaterial};
use rand::Rng;
use rustls::pki_types::CertificateDer;
use tracing::{debug, info, warn};

use crate::client::REQUEST_TIMEOUT;
use crate::crypto::{self, AesKey, CHALLENGE_LEN, HASH_LEN, SALT_LEN, SECRET_LEN};
use crate::hex;
use crate::xml::XmlResponse;

/// How long the host may take for the user to type the PIN.
pub const PIN_ENTRY_TIMEOUT: Duration = Duration::from_secs(120);

/// Uniform 4-digit PIN, leading zeros kept.
pub fn generate_pin() -> String {
    format!("{:04}", rand::thread_rng().gen_range(0..10_000u32))
}

/// The requests pairing needs from the host.
#[async_trait]
pub trait PairingChannel: Send + Sync {
    async fn pair_state(&self) -> Result<PairState, ControlError>;

    /// One `pair` phrase; `secure` selects the HTTPS port.
    async fn pair_request(
        &self,
        secure: bool,
        params: &[(&str, String)],
        timeout: Duration,
    ) -> Result<XmlResponse, ControlError>;

    async fn unpair(&self) -> Result<(), ControlError>;
}

/// Exchange state for one `pair()` call.
struct PairingTransaction {
    key: AesKey,
    host_cert: CertificateDer<'static>,
    host_signature: Vec<u8>,
    client_challenge: [u8; CHALLENGE_LEN],
    server_response_hash: [u8; HASH_LEN],
    server_challenge: [u8; CHALLENGE_LEN],
    client_secret: [u8; SECRET_LEN],
}

pub struct PairingManager<'a> {
    channel: &'a dyn PairingChannel,
    material: &'a IdentityMaterial,
}

impl<'a> PairingManager<'a> {
    pub fn new(channel: &'a dyn PairingChannel, material: &'a IdentityMaterial) -> Self {
        Self { channel, material }
    }

    /// Runs the exchange with `pin`. Already-paired hosts are left alone.
    ///
    /// Any outcome other than `Paired` unpairs best-effort so the host does
    /// not keep a half-finished record.
    pub async fn pair(&self, pin: &str) -> Result<PairState, ControlError> {
        if self.channel.pair_state().await? == PairState::Paired {
            info!("Host already paired");
            return Ok(PairState::Paired);
        }

        let outcome = self.exchange(pin).await;
        let state = match outcome {
            Ok(()) => {
                info!("Pairing complete");
                return Ok(PairState::Paired);
            }
            Err(ControlError::Pair(PairFailure::PinWrong)) => PairState::PinWrong,
            Err(ControlError::Pair(failure)) => {
                warn!("Pairing failed: {}", failure);
                PairState::Failed
            }
            Err(e) => {
                self.unpair_quietly().await;
                return Err(e);
            }
        };
        self.unpair_quietly().await;
        Ok(state)
    }

    async fn unpair_quietly(&self) {
        if let Err(e) = self.channel.unpair().await {
            debug!("Best-effort unpair failed: {}", e);
        }
    }

    async fn exchange(&self, pin: &str) -> Result<(), ControlError> {
        let mut tx = self.get_server_cert(pin).await?;
        self.client_challenge(&mut tx).await?;
        let server_secret = self.server_challenge_response(&mut tx).await?;
        self.verify_server(&tx, &server_secret)?;
        self.client_pairing_secret(&tx).await?;

        let doc = self
            .channel
            .pair_request(true, &[("phrase", "pairchallenge".into())], REQUEST_TIMEOUT)
            .await?;
        expect_paired(&doc, "pairchallenge")
    }

    /// Step 1: send salt and certificate, wait for the user to enter the PIN.
    async fn get_server_cert(&self, pin: &str) -> Result<PairingTransaction, ControlError> {
        let salt: [u8; SALT_LEN] = crypto::random_bytes();
        let key = crypto::pin_key(&salt, pin);

        let params = [
            ("phrase", "getservercert".to_owned()),
            ("salt", hex::encode(&salt)),
            ("clientcert", hex::encode(self.material.cert_pem().as_bytes())),
        ];
        // the channel's own timeout must not win the race
        let request =
            self.channel.pair_request(false, &params, PIN_ENTRY_TIMEOUT + REQUEST_TIMEOUT);
        let doc = tokio::time::timeout(PIN_ENTRY_TIMEOUT, request)
            .await
            .map_err(|_| PairFailure::Timeout)??;
        expect_paired(&doc, "getservercert")?;

        let cert_pem = doc
            .tag("plaincert")
            .and_then(|h| hex::decode(&h))
            .ok_or_else(|| {
                // another pairing is already in progress on the host
                warn!("Host sent no certificate");
                PairFailure::Rejected
            })?;
        let host_cert = rustls_pemfile::certs(&mut cert_pem.as_slice())
            .next()
            .and_then(|c| c.ok())
            .ok_or_else(|| ControlError::protocol("host certificate is not PEM"))?;
        let host_signature = der::certificate_signature(&host_cert)
            .ok_or_else(|| ControlError::protocol("host certificate has no signature"))?
            .to_vec();

        Ok(PairingTransaction {
            key,
            host_cert,
            host_signature,
            client_challenge: [0; CHALLENGE_LEN],
            server_response_hash: [0; HASH_LEN],
            server_challenge: [0; CHALLENGE_LEN],
            client_secret: [0; SECRET_LEN],
        })
    }

    /// Step 2: encrypted client challenge; learn the host's hash and challenge.
    async fn client_challenge(&self, tx: &mut PairingTransaction) -> Result<(), ControlError> {
        tx.client_challenge = crypto::random_bytes();
        let sealed = crypto::encrypt_ecb(&tx.key, &tx.client_challenge);
        let doc = self
            .channel
            .pair_request(false, &[("clientchallenge", hex::encode(&sealed))], REQUEST_TIMEOUT)
            .await?;
        expect_paired(&doc, "clientchallenge")?;

        let sealed = doc
            .tag("challengeresponse")
            .and_then(|h| hex::decode(&h))
            .ok_or_else(|| ControlError::protocol("missing challengeresponse"))?;
        let plain = crypto::decrypt_ecb(&tx.key, &sealed);
        if plain.len() < HASH_LEN + CHALLENGE_LEN {
            return Err(ControlError::protocol("challengeresponse too short"));
        }
        tx.server_response_hash.copy_from_slice(&plain[..HASH_LEN]);
        tx.server_challenge.copy_from_slice(&plain[HASH_LEN..HASH_LEN + CHALLENGE_LEN]);
        Ok(())
    }

    /// Step 3: answer the host's challenge; receive its signed secret.
    async fn server_challenge_response(
        &self,
        tx: &mut PairingTransaction,
    ) -> Result<Vec<u8>, ControlError> {
        tx.client_secret = crypto::random_bytes();
        let hash = crypto::sha256(&[
            &tx.server_challenge[..],
            self.material.cert_signature(),
            &tx.client_secret[..],
        ]);
        let sealed = crypto::encrypt_ecb(&tx.key, &hash);
        let doc = self
            .channel
            .pair_request(false, &[("serverchallengeresp", hex::encode(&sealed))], REQUEST_TIMEOUT)
            .await?;
        expect_paired(&doc, "serverchallengeresp")?;

        let secret = doc
            .tag("pairingsecret")
            .and_then(|h| hex::decode(&h))
            .ok_or_else(|| ControlError::protocol("missing pairingsecret"))?;
        if secret.len() <= SECRET_LEN {
            return Err(ControlError::protocol("pairingsecret too short"));
        }
        Ok(secret)
    }

    /// Step 4: the host's signature, then the PIN via the response hash.
    fn verify_server(&self, tx: &PairingTransaction, pairing_secret: &[u8]) -> Result<(), ControlError> {
        let (server_secret, signature) = pairing_secret.split_at(SECRET_LEN);
        if !crypto::verify_host_signature(&tx.host_cert, server_secret, signature) {
            // MITM or a broken host
            warn!("Host signature over its pairing secret is invalid");
            return Err(PairFailure::Rejected.into());
        }

        let expected = crypto::sha256(&[&tx.client_challenge[..], &tx.host_signature[..], server_secret]);
        if expected != tx.server_response_hash {
            info!("Challenge response mismatch, PIN was wrong");
            return Err(PairFailure::PinWrong.into());
        }
        Ok(())
    }

    /// Step 5: reveal our secret, signed.
    async fn client_pairing_secret(&self, tx: &PairingTransaction) -> Result<(), ControlError> {
        let mut payload = tx.client_secret.to_vec();
        payload.extend(self.material.sign(&tx.client_secret)?);
        let doc = self
            .channel
            .pair_request(false, &[("clientpairingsecret", hex::encode(&payload))], REQUEST_TIMEOUT)
            .await?;
        expect_paired(&doc, "clientpairingsecret")
    }
}

fn expect_paired(doc: &XmlResponse, phrase: &str) -> Result<(), ControlError> {
    if doc.tag("paired").as_deref() == Some("1") {
        Ok(())
    } else {
        debug!("{} answered paired != 1", phrase);
        Err(PairFailure::Rejected.into())
    }
}
