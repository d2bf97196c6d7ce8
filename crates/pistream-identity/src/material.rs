//! Client certificate and signing key.

use pistream_core::IdentityError;
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair, PKCS_ECDSA_P256_SHA256};
use ring::rand::SystemRandom;
use ring::signature::{EcdsaKeyPair, ECDSA_P256_SHA256_ASN1_SIGNING};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tracing::info;

use crate::der;

/// Subject common name of generated client certificates.
pub const CLIENT_COMMON_NAME: &str = "NVIDIA GameStream Client";

/// Self-signed client certificate plus its PKCS#8 key.
///
/// The certificate is presented on every HTTPS request and its signature
/// bytes are mixed into the pairing hashes, so it must not change once a
/// host has paired with it.
pub struct IdentityMaterial {
    cert_pem: String,
    key_pem: String,
    cert_der: CertificateDer<'static>,
    key_der: Vec<u8>,
    signature: Vec<u8>,
    signer: EcdsaKeyPair,
    rng: SystemRandom,
}

impl IdentityMaterial {
    /// Fresh ECDSA P-256 key and a 20-year self-signed certificate.
    pub fn generate() -> Result<Self, IdentityError> {
        let key = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256).map_err(crypto)?;

        let mut params = CertificateParams::new(Vec::<String>::new()).map_err(crypto)?;
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, CLIENT_COMMON_NAME);
        params.distinguished_name = dn;
        params.not_before = rcgen::date_time_ymd(2020, 1, 1);
        params.not_after = rcgen::date_time_ymd(2040, 1, 1);

        let cert = params.self_signed(&key).map_err(crypto)?;
        info!("Generated new client certificate");
        Self::from_pem(&cert.pem(), &key.serialize_pem())
    }

    /// Loads previously persisted PEM material.
    pub fn from_pem(cert_pem: &str, key_pem: &str) -> Result<Self, IdentityError> {
        let cert_der = rustls_pemfile::certs(&mut cert_pem.as_bytes())
            .next()
            .ok_or_else(|| IdentityError::Crypto("no certificate in PEM".into()))?
            .map_err(crypto)?;

        let key_der = match rustls_pemfile::private_key(&mut key_pem.as_bytes()).map_err(crypto)? {
            Some(PrivateKeyDer::Pkcs8(key)) => key.secret_pkcs8_der().to_vec(),
            Some(_) => return Err(IdentityError::Crypto("client key is not PKCS#8".into())),
            None => return Err(IdentityError::Crypto("no private key in PEM".into())),
        };

        let signature = der::certificate_signature(&cert_der)
            .ok_or_else(|| IdentityError::Crypto("certificate has no signature".into()))?
            .to_vec();

        let rng = SystemRandom::new();
        let signer = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, &key_der, &rng)
            .map_err(crypto)?;

        Ok(Self {
            cert_pem: cert_pem.to_owned(),
            key_pem: key_pem.to_owned(),
            cert_der,
            key_der,
            signature,
            signer,
            rng,
        })
    }

    pub fn cert_pem(&self) -> &str {
        &self.cert_pem
    }

    pub fn key_pem(&self) -> &str {
        &self.key_pem
    }

    pub fn cert_der(&self) -> &CertificateDer<'static> {
        &self.cert_der
    }

    pub fn key_der(&self) -> PrivateKeyDer<'static> {
        PrivateKeyDer::Pkcs8(self.key_der.clone().into())
    }

    /// Signature bytes of the client certificate itself.
    pub fn cert_signature(&self) -> &[u8] {
        &self.signature
    }

    /// ECDSA P-256 / SHA-256 signature, ASN.1 encoded.
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>, IdentityError> {
        let sig = self.signer.sign(&self.rng, message).map_err(crypto)?;
        Ok(sig.as_ref().to_vec())
    }
}

impl std::fmt::Debug for IdentityMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityMaterial")
            .field("cert_der_len", &self.cert_der.len())
            .finish_non_exhaustive()
    }
}

fn crypto(e: impl std::fmt::Display) -> IdentityError {
    IdentityError::Crypto(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ring::signature::{UnparsedPublicKey, ECDSA_P256_SHA256_ASN1};

    #[test]
    fn signatures_verify_with_the_certificate_key() {
        let material = IdentityMaterial::generate().unwrap();
        let sig = material.sign(b"client secret").unwrap();

        let key = KeyPair::from_pem(material.key_pem()).unwrap();
        let public = UnparsedPublicKey::new(&ECDSA_P256_SHA256_ASN1, key.public_key_raw());
        assert!(public.verify(b"client secret", &sig).is_ok());
        assert!(public.verify(b"other", &sig).is_err());
    }

    #[test]
    fn reload_from_pem_keeps_certificate() {
        let material = IdentityMaterial::generate().unwrap();
        let reloaded = IdentityMaterial::from_pem(material.cert_pem(), material.key_pem()).unwrap();
        assert_eq!(reloaded.cert_der(), material.cert_der());
        assert_eq!(reloaded.cert_signature(), material.cert_signature());
    }

    #[test]
    fn garbage_pem_is_rejected() {
        assert!(matches!(
            IdentityMaterial::from_pem("nope", "nope"),
            Err(IdentityError::Crypto(_))
        ));
    }
}
