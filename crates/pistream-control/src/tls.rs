//! rustls configuration for the HTTPS control port.
//!
//! Hosts serve a self-signed certificate that the pairing exchange, not a CA,
//! vouches for, so any server certificate is accepted at the TLS layer.
//! The client presents its own certificate so a paired host recognises it.

use std::sync::Arc;

use pistream_core::{ControlError, IdentityError};
use pistream_identity::IdentityMaterial;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};

// ── Host certificate verifier ────────────────────────────────────────────────

#[derive(Debug)]
struct HostCertVerifier;

impl ServerCertVerifier for HostCertVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &rustls::crypto::ring::default_provider().signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &rustls::crypto::ring::default_provider().signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Client config presenting `material` and trusting any host certificate.
pub fn client_config(material: &IdentityMaterial) -> Result<rustls::ClientConfig, ControlError> {
    // Install ring crypto provider (ignored if already installed)
    let _ = rustls::crypto::ring::default_provider().install_default();

    rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(HostCertVerifier))
        .with_client_auth_cert(vec![material.cert_der().clone()], material.key_der())
        .map_err(|e| IdentityError::Crypto(format!("client certificate rejected by TLS: {e}")).into())
}
