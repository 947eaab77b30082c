//! Helpers shared by unit tests.

use std::net::{SocketAddr, TcpListener};
use std::time::{SystemTime, UNIX_EPOCH};

use hmac::{Hmac, Mac};
use jwt::SignWithKey;
use serde_json::json;
use sha2::Sha256;

/// Serve `app` on an ephemeral local port
pub async fn spawn_backend(app: axum::Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind test backend");
    let addr = listener.local_addr().expect("test backend address");

    tokio::spawn(async move {
        axum::Server::from_tcp(listener)
            .expect("test backend listener")
            .serve(app.into_make_service())
            .await
            .expect("test backend crashed");
    });

    addr
}

/// An address nothing listens on
pub fn unused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind unused port");
    listener.local_addr().expect("unused port address")
}

pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Sign an HS256 token the way the identity service does
pub fn sign_token(secret: &str, sub: serde_json::Value, iat: u64, exp: u64) -> String {
    let key: Hmac<Sha256> = Hmac::new_from_slice(secret.as_bytes()).expect("hmac key");
    json!({
        "sub": sub,
        "username": "jdoe",
        "email": "jdoe@example.com",
        "iat": iat,
        "exp": exp,
    })
    .sign_with_key(&key)
    .expect("sign token")
}
