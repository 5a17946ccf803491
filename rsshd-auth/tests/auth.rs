use std::time::{SystemTime, UNIX_EPOCH};

use rsshd::{
    algorithm::{HostKey, Key},
    packet::{
        trans::DisconnectReason,
        userauth::{Banner, Failure, Method, PkOk, Request, Success},
    },
    service, Error,
};
use rsshd_auth::{handler::password::Passwords, Auth, AuthorizedKeys, Method as AuthMethod};
use ssh_key::certificate::{Builder, CertType};

mod common;

fn store(lines: &str) -> AuthorizedKeys {
    lines.parse().unwrap()
}

#[tokio::test]
async fn none_lists_methods_without_counting() {
    let (mut server, mut client) = common::connect().await;
    let key: HostKey = common::keypair().into();
    let auth = Auth::new()
        .max_attempts(0)
        .publickey(store(&key.key.public_key().to_openssh().unwrap()));

    let (principal, ()) = tokio::join!(service::handle(&mut server, auth), async {
        common::request_service(&mut client).await;

        for _ in 0..3 {
            client
                .send(&Request {
                    username: "alice".into(),
                    service_name: "ssh-connection".into(),
                    method: Method::None,
                })
                .await
                .unwrap();

            let failure: Failure = client.recv().await.unwrap().to().unwrap();
            assert_eq!(failure.continue_with.to_string(), "publickey");
            assert!(!failure.partial_success);
        }

        let request = common::publickey(&client, "alice", &key, Key::Ed25519, true);
        client.send(&request).await.unwrap();
        client.recv().await.unwrap().to::<Success>().unwrap();
    });

    let principal = principal.unwrap();
    assert_eq!(principal.user, "alice");
    assert_eq!(principal.method, AuthMethod::Publickey);
}

#[tokio::test]
async fn probe_then_signature_carries_restrictions() {
    let (mut server, mut client) = common::connect().await;
    let key: HostKey = common::keypair().into();
    let auth = Auth::new().banner("Welcome\r\n").publickey(store(&format!(
        "command=\"internal-sftp\",no-pty {}",
        key.key.public_key().to_openssh().unwrap()
    )));

    let (principal, ()) = tokio::join!(service::handle(&mut server, auth), async {
        common::request_service(&mut client).await;

        let banner: Banner = client.recv().await.unwrap().to().unwrap();
        assert_eq!(banner.message, "Welcome\r\n");

        let probe = common::publickey(&client, "bob", &key, Key::Ed25519, false);
        client.send(&probe).await.unwrap();
        let ok: PkOk = client.recv().await.unwrap().to().unwrap();
        assert_eq!(ok.algorithm, "ssh-ed25519");

        let request = common::publickey(&client, "bob", &key, Key::Ed25519, true);
        client.send(&request).await.unwrap();
        client.recv().await.unwrap().to::<Success>().unwrap();
    });

    let principal = principal.unwrap();
    assert_eq!(principal.user, "bob");
    assert_eq!(
        principal.restrictions.command.as_deref(),
        Some("internal-sftp")
    );
    assert!(principal.restrictions.no_pty);
}

#[tokio::test]
async fn exhausted_attempts_disconnect_the_peer() {
    let (mut server, mut client) = common::connect().await;
    let stranger: HostKey = common::keypair().into();
    let auth = Auth::new()
        .max_attempts(5)
        .publickey(store(&common::keypair().public_key().to_openssh().unwrap()));

    let (result, ()) = tokio::join!(service::handle(&mut server, auth), async {
        common::request_service(&mut client).await;

        for _ in 0..5 {
            let request = common::publickey(&client, "mallory", &stranger, Key::Ed25519, true);
            client.send(&request).await.unwrap();
            client.recv().await.unwrap().to::<Failure>().unwrap();
        }

        let request = common::publickey(&client, "mallory", &stranger, Key::Ed25519, true);
        client.send(&request).await.unwrap();

        assert!(matches!(
            client.recv().await,
            Err(Error::Disconnected(
                DisconnectReason::NoMoreAuthMethodsAvailable
            ))
        ));
    });

    assert!(matches!(result, Err(Error::AuthExhausted)));
}

#[tokio::test]
async fn password_is_disabled_by_default() {
    let (mut server, mut client) = common::connect().await;
    let key: HostKey = common::keypair().into();
    let auth = Auth::new()
        .max_attempts(1)
        .publickey(store(&key.key.public_key().to_openssh().unwrap()));

    let (result, ()) = tokio::join!(service::handle(&mut server, auth), async {
        common::request_service(&mut client).await;

        client
            .send(&common::password("alice", "hunter2"))
            .await
            .unwrap();
        let failure: Failure = client.recv().await.unwrap().to().unwrap();
        assert!(!failure.continue_with.contains("password"));

        client
            .send(&common::password("alice", "hunter2"))
            .await
            .unwrap();
        assert!(client.recv().await.is_err());
    });

    assert!(matches!(result, Err(Error::AuthExhausted)));
}

#[tokio::test]
async fn password_authenticates_when_enabled() {
    let (mut server, mut client) = common::connect().await;
    let mut passwords = Passwords::default();
    passwords.insert("alice", "hunter2");
    let auth = Auth::new().password(passwords);

    let (principal, ()) = tokio::join!(service::handle(&mut server, auth), async {
        common::request_service(&mut client).await;

        client
            .send(&common::password("alice", "hunter3"))
            .await
            .unwrap();
        let failure: Failure = client.recv().await.unwrap().to().unwrap();
        assert!(failure.continue_with.contains("password"));

        client
            .send(&common::password("alice", "hunter2"))
            .await
            .unwrap();
        client.recv().await.unwrap().to::<Success>().unwrap();
    });

    let principal = principal.unwrap();
    assert_eq!(principal.method, AuthMethod::Password);
}

#[tokio::test]
async fn certificates_signed_by_an_authority_are_accepted() {
    let (mut server, mut client) = common::connect().await;

    let ca = common::keypair();
    let key = common::keypair();
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs();

    let mut builder = Builder::new_with_random_nonce(
        &mut rand::thread_rng(),
        key.public_key().key_data().clone(),
        now - 60,
        now + 3600,
    )
    .unwrap();
    builder
        .cert_type(CertType::User)
        .unwrap()
        .key_id("carol@example")
        .unwrap()
        .valid_principal("carol")
        .unwrap()
        .critical_option("force-command", "internal-sftp")
        .unwrap();
    let certificate = builder.sign(&ca).unwrap();

    let identity = HostKey::from(key).with_certificate(certificate).unwrap();
    let auth = Auth::new().publickey(store(&format!(
        "cert-authority {}",
        ca.public_key().to_openssh().unwrap()
    )));

    let (principal, ()) = tokio::join!(service::handle(&mut server, auth), async {
        common::request_service(&mut client).await;

        let request = common::publickey(&client, "dave", &identity, Key::Ed25519Cert, true);
        client.send(&request).await.unwrap();
        client.recv().await.unwrap().to::<Failure>().unwrap();

        let request = common::publickey(&client, "carol", &identity, Key::Ed25519Cert, true);
        client.send(&request).await.unwrap();
        client.recv().await.unwrap().to::<Success>().unwrap();
    });

    let principal = principal.unwrap();
    assert_eq!(principal.user, "carol");
    assert_eq!(
        principal.restrictions.command.as_deref(),
        Some("internal-sftp")
    );
    assert!(principal.restrictions.no_pty);
}

#[tokio::test]
async fn unknown_services_are_refused() {
    let (mut server, mut client) = common::connect().await;

    let (result, ()) = tokio::join!(service::handle(&mut server, Auth::new()), async {
        common::request_service(&mut client).await;

        client
            .send(&Request {
                username: "alice".into(),
                service_name: "ssh-unknown".into(),
                method: Method::None,
            })
            .await
            .unwrap();

        assert!(matches!(
            client.recv().await,
            Err(Error::Disconnected(DisconnectReason::ServiceNotAvailable))
        ));
    });

    assert!(matches!(result, Err(Error::UnknownService)));
}
