use clap::Parser;
use domain::{Availability, MemoryStore, Registry, RegistryOptions, UserStatus};
use server::{handle_client, serve, AppState, ClientOptions};
use service::config::Config;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use transport::error::TransportErrorKind;
use transport::{memory_pair, ClientMessage, Connection, ServerMessage, TcpConnection};

const WAIT: Duration = Duration::from_secs(5);

struct Client<C: Connection> {
    conn: C,
}

impl<C: Connection> Client<C> {
    async fn send(&self, message: ClientMessage) {
        self.conn
            .write_message(&message.to_frame().unwrap())
            .await
            .unwrap();
    }

    async fn recv(&self) -> ServerMessage {
        let frame = timeout(WAIT, self.conn.read_message())
            .await
            .expect("timed out waiting for a message")
            .unwrap();
        ServerMessage::try_from(frame).unwrap()
    }

    async fn assert_closed(&self) {
        let result = timeout(WAIT, self.conn.read_message())
            .await
            .expect("timed out waiting for the connection to close");
        match result {
            Err(e) => assert_eq!(e.error_kind, TransportErrorKind::Closed),
            Ok(frame) => panic!("expected the connection to close, got {frame:?}"),
        }
    }

    async fn login(&self, email: &str, password: &str) -> ServerMessage {
        self.send(ClientMessage::Login {
            email: email.into(),
            password: password.into(),
        })
        .await;
        assert_eq!(self.recv().await, ServerMessage::LoginSuccess);
        let full_state = self.recv().await;
        assert!(
            matches!(&full_state, ServerMessage::FullState(state) if state.user.email == email),
            "expected full state, got {full_state:?}"
        );
        full_state
    }
}

fn registry_with(emails: &[&str]) -> Registry {
    let registry = Registry::new(Box::new(MemoryStore::new()), RegistryOptions::default());
    for email in emails {
        registry.register(email, "pw").unwrap();
    }
    registry
}

fn connect(registry: &Registry) -> Client<transport::MemoryConnection> {
    let (server, client) = memory_pair(64);
    tokio::spawn(handle_client(
        Arc::new(server),
        registry.clone(),
        ClientOptions::default(),
    ));
    Client { conn: client }
}

async fn logged_in(registry: &Registry, email: &str) -> Client<transport::MemoryConnection> {
    let client = connect(registry);
    client.login(email, "pw").await;
    client
}

async fn make_buddies(a: &Client<transport::MemoryConnection>, a_email: &str, b: &Client<transport::MemoryConnection>, b_email: &str) {
    a.send(ClientMessage::AddBuddy {
        email: b_email.into(),
    })
    .await;
    assert_eq!(
        b.recv().await,
        ServerMessage::RequestReceived {
            email: a_email.into()
        }
    );
    b.send(ClientMessage::AcceptRequest {
        email: a_email.into(),
    })
    .await;
    assert!(matches!(b.recv().await, ServerMessage::AcceptSent { email, .. } if email == a_email));
    assert!(matches!(a.recv().await, ServerMessage::RequestAccepted { email, .. } if email == b_email));
}

fn away(message: &str) -> ClientMessage {
    ClientMessage::SetStatus(UserStatus {
        availability: Availability::Away,
        message: message.into(),
        ..Default::default()
    })
}

#[tokio::test]
async fn login_failure_keeps_the_connection_usable() {
    let registry = registry_with(&["a@x"]);
    let client = connect(&registry);

    client
        .send(ClientMessage::Login {
            email: "a@x".into(),
            password: "wrong".into(),
        })
        .await;
    assert_eq!(
        client.recv().await,
        ServerMessage::LoginFailure {
            message: "incorrect email or password".into()
        }
    );

    client.login("a@x", "pw").await;
    assert!(registry.is_online("a@x"));
}

#[tokio::test]
async fn account_messages_before_login() {
    let registry = registry_with(&["a@x"]);
    let client = connect(&registry);

    client.send(away("early")).await;
    assert_eq!(
        client.recv().await,
        ServerMessage::LoginFailure {
            message: "not logged in".into()
        }
    );

    client
        .send(ClientMessage::ResetPassword {
            email: "ghost@x".into(),
        })
        .await;
    assert_eq!(client.recv().await, ServerMessage::NoSuchEmail);

    let register = ClientMessage::Register {
        email: "new@x".into(),
        password: "pw".into(),
    };
    client.send(register.clone()).await;
    assert_eq!(client.recv().await, ServerMessage::RegisterSuccess);
    client.send(register).await;
    assert_eq!(
        client.recv().await,
        ServerMessage::RegisterFailure {
            message: "email is already registered".into()
        }
    );

    client
        .send(ClientMessage::RegisterVerify {
            email: "new@x".into(),
            token: "bogus".into(),
        })
        .await;
    assert_eq!(
        client.recv().await,
        ServerMessage::RegisterFailure {
            message: "invalid verification token".into()
        }
    );

    client.login("new@x", "pw").await;
}

#[tokio::test]
async fn malformed_frames_are_ignored() {
    let registry = registry_with(&["a@x"]);
    let client = connect(&registry);

    let bogus: transport::Frame =
        serde_json::from_str(r#"{"type":"teleport","data":{"to":"mars"}}"#).unwrap();
    client.conn.write_message(&bogus).await.unwrap();
    let incomplete: transport::Frame = serde_json::from_str(r#"{"type":"login"}"#).unwrap();
    client.conn.write_message(&incomplete).await.unwrap();

    client.login("a@x", "pw").await;
}

#[tokio::test]
async fn buddy_lifecycle_over_the_wire() {
    let registry = registry_with(&["a@x", "b@x"]);
    let a = logged_in(&registry, "a@x").await;
    let b = logged_in(&registry, "b@x").await;

    make_buddies(&a, "a@x", &b, "b@x").await;

    a.send(away("lunch")).await;
    match b.recv().await {
        ServerMessage::StatusChanged { email, status } => {
            assert_eq!(email, "a@x");
            assert_eq!(status.availability, Availability::Away);
            assert_eq!(status.message, "lunch");
        }
        other => panic!("expected status change, got {other:?}"),
    }

    a.send(ClientMessage::Logout).await;
    a.assert_closed().await;
    assert_eq!(
        b.recv().await,
        ServerMessage::StatusChanged {
            email: "a@x".into(),
            status: UserStatus::offline(),
        }
    );

    b.send(ClientMessage::RemoveBuddy {
        email: "a@x".into(),
    })
    .await;
    assert_eq!(
        b.recv().await,
        ServerMessage::BuddyRemoved {
            email: "a@x".into()
        }
    );
}

#[tokio::test]
async fn failed_operations_are_answered_on_the_control_lane() {
    let registry = registry_with(&["a@x", "b@x"]);
    let a = logged_in(&registry, "a@x").await;

    a.send(ClientMessage::AddBuddy {
        email: "ghost@x".into(),
    })
    .await;
    assert_eq!(a.recv().await, ServerMessage::NoSuchEmail);

    a.send(ClientMessage::AddBuddy {
        email: "b@x".into(),
    })
    .await;
    a.send(ClientMessage::AddBuddy {
        email: "b@x".into(),
    })
    .await;
    assert_eq!(
        a.recv().await,
        ServerMessage::OperationFailure {
            operation: "add_buddy".into(),
            message: "conflicting buddy relationship".into(),
        }
    );

    a.send(ClientMessage::SetStatus(UserStatus::offline())).await;
    assert!(matches!(
        a.recv().await,
        ServerMessage::OperationFailure { operation, .. } if operation == "set_status"
    ));

    a.send(ClientMessage::Login {
        email: "a@x".into(),
        password: "pw".into(),
    })
    .await;
    assert_eq!(
        a.recv().await,
        ServerMessage::OperationFailure {
            operation: "login".into(),
            message: "already logged in".into(),
        }
    );

    a.send(ClientMessage::SetPassword {
        email: "a@x".into(),
        old_password: "wrong".into(),
        new_password: "new".into(),
    })
    .await;
    assert!(matches!(
        a.recv().await,
        ServerMessage::SetPasswordFailure { .. }
    ));
}

#[tokio::test]
async fn logout_other_forces_out_the_other_logins() {
    let registry = registry_with(&["a@x"]);
    let first = logged_in(&registry, "a@x").await;
    let second = logged_in(&registry, "a@x").await;
    assert_eq!(registry.sessions_of("a@x"), 2);

    first.send(ClientMessage::LogoutOther).await;
    assert_eq!(second.recv().await, ServerMessage::ForcedLogout);
    second.assert_closed().await;

    first
        .send(ClientMessage::SetPassword {
            email: "a@x".into(),
            old_password: "pw".into(),
            new_password: "new".into(),
        })
        .await;
    assert_eq!(first.recv().await, ServerMessage::SetPasswordSuccess);
    assert_eq!(registry.sessions_of("a@x"), 1);
}

#[tokio::test]
async fn password_change_without_login_evicts_every_session() {
    let registry = registry_with(&["a@x"]);
    let session = logged_in(&registry, "a@x").await;
    let anonymous = connect(&registry);

    anonymous
        .send(ClientMessage::SetPassword {
            email: "a@x".into(),
            old_password: "pw".into(),
            new_password: "new".into(),
        })
        .await;
    assert_eq!(anonymous.recv().await, ServerMessage::SetPasswordSuccess);

    assert_eq!(session.recv().await, ServerMessage::ForcedLogout);
    session.assert_closed().await;
    assert!(!registry.is_online("a@x"));

    anonymous.login("a@x", "new").await;
}

#[tokio::test]
async fn serves_tcp_clients_until_shutdown() {
    let registry = registry_with(&["a@x"]);
    let app_state = AppState::new(Config::parse_from(["buddy_presence"]), registry.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    let server = tokio::spawn(serve(listener, app_state.clone(), shutdown.clone()));

    let stream = TcpStream::connect(address).await.unwrap();
    let client = Client {
        conn: TcpConnection::new(stream, 64 * 1024).unwrap(),
    };
    client.login("a@x", "pw").await;
    assert_eq!(app_state.live_connections(), 1);

    shutdown.cancel();
    timeout(WAIT, server)
        .await
        .expect("server should stop")
        .unwrap()
        .unwrap();
    client.assert_closed().await;
    assert!(!registry.is_online("a@x"));
}
