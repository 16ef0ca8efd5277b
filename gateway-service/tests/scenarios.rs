//! End-to-end scenarios over a real loopback socket, driving the wired
//! gateway exactly as `main.rs` does (spec.md §8, scenarios S1-S6).

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

use gateway_core::auth::verifier::TokenClaims;
use gateway_core::auth::Role;
use gateway_core::bus::{Event, EventName};
use gateway_core::config::{Config, EndpointConfig};
use gateway_core::ids::ConnectionId;

use gateway_service::backend::persistent_store::UserRecord;
use gateway_service::backend::service_control::ServiceState;
use gateway_service::wiring::{self, Services};

/// Boots the full gateway on an ephemeral loopback port with a given
/// configuration, minus the background loops (which would only add
/// timing noise to tests that don't exercise them). Tests that need the
/// rate-limit reset or heartbeat sweep loops spawn them explicitly via
/// `wiring::spawn_background_loops`.
async fn start_with_config(config: Config) -> (Services, String) {
    let services = wiring::build_services(config).await;
    let app = wiring::router(&services);

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind ephemeral port");
    let addr: SocketAddr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });

    (services, format!("ws://{addr}"))
}

async fn start() -> (Services, String) {
    start_with_config(Config::default()).await
}

fn token_for(secret: &str, wallet_address: &str, role: Role) -> String {
    let claims = TokenClaims {
        wallet_address: wallet_address.to_string(),
        role: Some(match role {
            Role::User => "user".to_string(),
            Role::Admin => "admin".to_string(),
            Role::SuperAdmin => "superadmin".to_string(),
        }),
        exp: (chrono::Utc::now() + chrono::Duration::hours(1)).timestamp(),
        iat: Some(chrono::Utc::now().timestamp()),
    };
    jsonwebtoken::encode(&jsonwebtoken::Header::default(), &claims, &jsonwebtoken::EncodingKey::from_secret(secret.as_bytes()))
        .expect("encode test token")
}

type Client = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn connect(base_url: &str, path: &str) -> Client {
    let (stream, _response) = tokio_tungstenite::connect_async(format!("{base_url}{path}")).await.expect("ws connect");
    stream
}

async fn send(client: &mut Client, value: Value) {
    client.send(Message::Text(value.to_string().into())).await.expect("send frame");
}

/// Reads text frames until one whose `type` matches `kind`, skipping any
/// others (e.g. the `welcome`/`connection_established` handshake frames).
async fn recv_kind(client: &mut Client, kind: &str) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("frame within timeout")
            .expect("stream still open")
            .expect("no ws error");
        let Message::Text(text) = msg else { continue };
        let value: Value = serde_json::from_str(text.as_str()).expect("valid json frame");
        if value.get("type").and_then(Value::as_str) == Some(kind) {
            return value;
        }
    }
}

#[tokio::test]
async fn s1_public_subscribe_and_price_update() {
    let (services, base_url) = start().await;
    let mut client = connect(&base_url, "/ws/market").await;

    let established = recv_kind(&mut client, "connection_established").await;
    assert_eq!(established["data"]["authenticated"], json!(false));

    send(&mut client, json!({"type": "subscribe", "channel": "public.tokens"})).await;
    let confirmed = recv_kind(&mut client, "subscription_confirmed").await;
    assert_eq!(confirmed["channel"], json!("public.tokens"));

    services.ctx.bus.publish(Event::new(
        EventName::MarketBroadcast,
        json!({"data": [{"symbol": "SOL", "price": 145.23}]}),
    ));

    let update = recv_kind(&mut client, "token_update").await;
    assert_eq!(update["channel"], json!("public.tokens"));
    assert_eq!(update["data"], json!([{"symbol": "SOL", "price": 145.23}]));
}

#[tokio::test]
async fn s2_denied_admin_channel_for_user_role() {
    let (services, base_url) = start().await;
    services.persistent_store.upsert_user(UserRecord {
        wallet_address: "0xuser".to_string(),
        role: Role::User,
    });
    let token = token_for(&services.config.jwt.signing_secret, "0xuser", Role::User);

    let mut client = connect(&base_url, &format!("/ws/monitor?token={token}")).await;
    let established = recv_kind(&mut client, "connection_established").await;
    assert_eq!(established["data"]["authenticated"], json!(true));

    send(&mut client, json!({"type": "subscribe", "channel": "admin.services"})).await;
    let error = recv_kind(&mut client, "error").await;
    assert_eq!(error["code"], json!("subscription_denied"));
    assert_eq!(error["message"], json!("You do not have access to this channel"));
}

#[tokio::test]
async fn s3_heartbeat_exhaustion_closes_connection() {
    let mut config = Config::default();
    config.endpoints.insert(
        "test".to_string(),
        EndpointConfig {
            path: "/ws/test".to_string(),
            heartbeat_interval_secs: Some(0),
            heartbeat_timeout_secs: Some(0),
            ..Default::default()
        },
    );
    let (services, base_url) = start_with_config(config).await;
    wiring::spawn_background_loops(&services);

    let mut client = connect(&base_url, "/ws/test").await;
    let established = recv_kind(&mut client, "connection_established").await;
    let connection_id: ConnectionId = established["data"]["connectionId"]
        .as_str()
        .expect("connectionId is a string")
        .parse()
        .expect("valid connection id");

    // Never read from the socket again, so tokio-tungstenite never sees
    // (and so never auto-answers) the pings the sweep sends. After
    // `missed_tolerance` (default 3) strikes the sweep closes the
    // connection server-side and the registry entry disappears.
    tokio::time::timeout(Duration::from_secs(5), async {
        while services.ctx.clients.get(&connection_id).is_some() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("connection removed from registry after heartbeat timeout");

    assert_eq!(services.ctx.metrics.snapshot().abnormal_closes, 1);
    drop(client);
}

#[tokio::test]
async fn s4_rate_limit_breach_then_close() {
    let mut config = Config::default();
    config.endpoints.insert(
        "test".to_string(),
        EndpointConfig {
            path: "/ws/test".to_string(),
            rate_limit_per_minute: Some(1),
            ..Default::default()
        },
    );
    let (_services, base_url) = start_with_config(config).await;
    let mut client = connect(&base_url, "/ws/test").await;
    recv_kind(&mut client, "connection_established").await;

    // The budget is 1: the first frame is processed normally, the
    // second (N+1-th) triggers `rate_limit_exceeded` then close 1008
    // (spec.md §8 S4).
    send(&mut client, json!({"type": "heartbeat"})).await;
    recv_kind(&mut client, "heartbeat_ack").await;

    send(&mut client, json!({"type": "heartbeat"})).await;
    let error = recv_kind(&mut client, "error").await;
    assert_eq!(error["code"], json!("rate_limit_exceeded"));

    let close = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match client.next().await {
                Some(Ok(Message::Close(frame))) => return frame,
                Some(Ok(_)) => continue,
                Some(Err(e)) => panic!("ws error: {e}"),
                None => panic!("stream ended without a close frame"),
            }
        }
    })
    .await
    .expect("close within timeout");

    assert_eq!(close.map(|f| f.code), Some(1008u16.into()));
}

#[tokio::test]
async fn s5_trade_causes_dependent_broadcasts() {
    let (services, base_url) = start().await;
    services.persistent_store.upsert_user(UserRecord {
        wallet_address: "0xW".to_string(),
        role: Role::User,
    });
    let token = token_for(&services.config.jwt.signing_secret, "0xW", Role::User);

    let mut portfolio = connect(&base_url, &format!("/ws/portfolio?token={token}")).await;
    recv_kind(&mut portfolio, "connection_established").await;
    send(&mut portfolio, json!({"type": "subscribe", "channel": "trades.0xW"})).await;
    recv_kind(&mut portfolio, "subscription_confirmed").await;
    send(&mut portfolio, json!({"type": "subscribe", "channel": "portfolio.0xW"})).await;
    recv_kind(&mut portfolio, "subscription_confirmed").await;

    let mut wallet = connect(&base_url, &format!("/ws/wallet?token={token}")).await;
    recv_kind(&mut wallet, "connection_established").await;
    send(&mut wallet, json!({"type": "subscribe", "channel": "wallet.0xW"})).await;
    recv_kind(&mut wallet, "subscription_confirmed").await;

    services.ctx.bus.publish(Event::new(
        EventName::TradeExecuted,
        json!({"walletId": "0xW", "id": "t1", "symbol": "SOL", "size": 1.0, "price": 145.0}),
    ));
    services.ctx.bus.publish(Event::new(EventName::BalanceUpdated, json!({"walletId": "0xW"})));

    let trade = recv_kind(&mut portfolio, "trade_executed").await;
    assert_eq!(trade["channel"], json!("trades.0xW"));

    let portfolio_update = recv_kind(&mut portfolio, "portfolio_update").await;
    assert_eq!(portfolio_update["channel"], json!("portfolio.0xW"));

    let balance_update = recv_kind(&mut wallet, "balance_update").await;
    assert_eq!(balance_update["channel"], json!("wallet.0xW"));
}

#[tokio::test]
async fn s6_admin_service_command_restarts_and_broadcasts() {
    let (services, base_url) = start().await;
    services.service_control.register("market_data_service");
    services.persistent_store.upsert_user(UserRecord {
        wallet_address: "0xadmin".to_string(),
        role: Role::Admin,
    });
    let token = token_for(&services.config.jwt.signing_secret, "0xadmin", Role::Admin);

    let mut admin = connect(&base_url, &format!("/ws/admin?token={token}")).await;
    recv_kind(&mut admin, "connection_established").await;
    send(&mut admin, json!({"type": "subscribe", "channel": "admin.service.market_data_service"})).await;
    recv_kind(&mut admin, "subscription_confirmed").await;

    send(
        &mut admin,
        json!({"type": "service_command", "serviceName": "market_data_service", "command": "restart"}),
    )
    .await;

    let status_broadcast = recv_kind(&mut admin, "service_status").await;
    assert_eq!(status_broadcast["channel"], json!("admin.service.market_data_service"));
    assert_eq!(status_broadcast["data"]["state"], json!("running"));

    let result = recv_kind(&mut admin, "service_command_result").await;
    assert_eq!(result["data"]["serviceName"], json!("market_data_service"));
    assert_eq!(result["data"]["command"], json!("restart"));
    assert_eq!(result["data"]["result"]["state"], json!("running"));

    let status = services.service_control.get_service("market_data_service").await.expect("service registered");
    assert_eq!(status.state, ServiceState::Running);
}

#[tokio::test]
async fn unauthenticated_connection_to_auth_required_endpoint_is_closed() {
    let (_services, base_url) = start().await;
    let mut client = connect(&base_url, "/ws/wallet").await;

    let msg = tokio::time::timeout(Duration::from_secs(5), client.next())
        .await
        .expect("frame within timeout")
        .expect("stream still open")
        .expect("no ws error");
    match msg {
        Message::Text(text) => {
            let value: Value = serde_json::from_str(text.as_str()).unwrap();
            assert_eq!(value["code"], json!("unauthorized"));
        }
        Message::Close(frame) => {
            assert_eq!(frame.map(|f| f.code), Some(4001u16.into()));
        }
        other => panic!("unexpected first frame: {other:?}"),
    }
}
