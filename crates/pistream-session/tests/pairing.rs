//! `pair_with_host` messages against a scripted control channel.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use pistream_control::{PairingChannel, XmlResponse};
use pistream_core::{ControlError, PairState};
use pistream_identity::{IdentityMaterial, LocalIdentity};
use pistream_session::{pair_with_host, ListenerEvent, RecordingListener};

enum Host {
    Paired,
    Refusing,
    Unreachable,
}

struct ScriptedChannel {
    host: Host,
    requests: AtomicUsize,
    unpairs: AtomicUsize,
}

impl ScriptedChannel {
    fn new(host: Host) -> Self {
        Self { host, requests: AtomicUsize::new(0), unpairs: AtomicUsize::new(0) }
    }
}

#[async_trait]
impl PairingChannel for ScriptedChannel {
    async fn pair_state(&self) -> Result<PairState, ControlError> {
        match self.host {
            Host::Paired => Ok(PairState::Paired),
            Host::Refusing => Ok(PairState::NotPaired),
            Host::Unreachable => Err(ControlError::HostUnreachable("10.0.0.5".into())),
        }
    }

    async fn pair_request(
        &self,
        _secure: bool,
        _params: &[(&str, String)],
        _timeout: Duration,
    ) -> Result<XmlResponse, ControlError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        XmlResponse::parse("<root status_code=\"200\"><paired>0</paired></root>")
    }

    async fn unpair(&self) -> Result<(), ControlError> {
        self.unpairs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn identity(unique_id: Option<&str>) -> LocalIdentity {
    LocalIdentity::from_parts(
        "pistream-test",
        unique_id.map(str::to_owned),
        IdentityMaterial::generate().unwrap(),
    )
}

#[tokio::test]
async fn already_paired_is_a_no_op() {
    let channel = ScriptedChannel::new(Host::Paired);
    let listener = RecordingListener::new();

    let state = pair_with_host(&channel, &identity(Some("0123456789ab")), &listener, "1234")
        .await
        .unwrap();

    assert_eq!(state, PairState::Paired);
    assert_eq!(channel.requests.load(Ordering::SeqCst), 0);
    assert_eq!(
        listener.events(),
        vec![ListenerEvent::Error { title: "pair".into(), text: "Already paired".into() }]
    );
}

#[tokio::test]
async fn refusal_shows_the_pin_then_fails() {
    let channel = ScriptedChannel::new(Host::Refusing);
    let listener = RecordingListener::new();

    let state = pair_with_host(&channel, &identity(Some("0123456789ab")), &listener, "1234")
        .await
        .unwrap();

    assert_eq!(state, PairState::Failed);
    assert_eq!(channel.unpairs.load(Ordering::SeqCst), 1);
    assert_eq!(
        listener.events(),
        vec![
            ListenerEvent::Message("Please enter the following PIN on the target PC: 1234".into()),
            ListenerEvent::Error { title: "pair".into(), text: "Pairing failed".into() },
        ]
    );
}

#[tokio::test]
async fn unreachable_host_is_reported() {
    let channel = ScriptedChannel::new(Host::Unreachable);
    let listener = RecordingListener::new();

    let err = pair_with_host(&channel, &identity(Some("0123456789ab")), &listener, "1234")
        .await
        .unwrap_err();

    assert!(matches!(err, ControlError::HostUnreachable(_)));
    assert_eq!(
        listener.errors(),
        vec![("Pair".to_owned(), "Host unreachable: 10.0.0.5".to_owned())]
    );
}

#[tokio::test]
async fn missing_unique_id_stops_before_contacting_the_host() {
    let channel = ScriptedChannel::new(Host::Refusing);
    let listener = RecordingListener::new();

    let err = pair_with_host(&channel, &identity(None), &listener, "1234").await.unwrap_err();

    assert!(matches!(err, ControlError::Identity(_)));
    assert_eq!(channel.requests.load(Ordering::SeqCst), 0);
    assert_eq!(
        listener.errors(),
        vec![("Pair".to_owned(), "Couldn't find a MAC address".to_owned())]
    );
}
