// Database notification payload -> listener decode -> hub fan-out -> router
// over a real WebSocket -> reconciler, all in one process.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use changestreams_client::{
    spawn_ui_thread, BoundCollection, EntityFeed, Fetcher, Keyed, RouterSettings, RouterState,
    SubscriptionRouter, TrackedEntity, UiHandle, WsConnector,
};
use changestreams_core::config::{AuthConfig, AuthMode, ChangeStreamsConfig, ClientConfig};
use changestreams_core::EntityName;
use changestreams_hub::{app, hub::SubscriptionHub};
use changestreams_listener::{forward, ListenerStatus};
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq)]
struct Screen {
    id: i32,
    title: String,
}

impl Keyed for Screen {
    type Key = i32;
    fn key(&self) -> i32 {
        self.id
    }
}

impl TrackedEntity for Screen {
    const ENTITY: EntityName = EntityName::Screens;
}

fn screen(id: i32, title: &str) -> Screen {
    Screen {
        id,
        title: title.to_string(),
    }
}

/// Data layer after the UPDATE committed.
struct FreshScreens;

#[async_trait]
impl Fetcher<Screen> for FreshScreens {
    async fn fetch_by_id(&self, id: &i32) -> changestreams_client::Result<Option<Screen>> {
        Ok((*id == 7).then(|| screen(7, "Checkout v2")))
    }
}

struct RunningHub {
    url: String,
    hub: Arc<SubscriptionHub>,
    _status: watch::Sender<ListenerStatus>,
}

async fn start_hub(mode: AuthMode, token: Option<&str>) -> RunningHub {
    let mut config = ChangeStreamsConfig::default();
    config.hub.auth = AuthConfig {
        mode,
        token: token.map(String::from),
    };
    let (status_tx, status_rx) = watch::channel(ListenerStatus::Listening);
    let hub = Arc::new(SubscriptionHub::new());
    let state = Arc::new(app::AppState::new(config, hub.clone(), status_rx));

    let tcp = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = tcp.local_addr().unwrap();
    let router = app::build_router(state);
    tokio::spawn(async move {
        axum::serve(tcp, router).await.unwrap();
    });

    RunningHub {
        url: format!("ws://{}/ws", addr),
        hub,
        _status: status_tx,
    }
}

async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

async fn titles(ui: &UiHandle<BoundCollection<Screen>>) -> Vec<String> {
    ui.query(|c| c.items().iter().map(|s| s.title.clone()).collect())
        .await
        .unwrap()
}

#[tokio::test]
async fn screen_update_is_replaced_in_place() {
    let hub = start_hub(AuthMode::None, None).await;
    let client = ClientConfig {
        url: hub.url.clone(),
        ..ClientConfig::default()
    };
    let router = SubscriptionRouter::spawn(
        WsConnector::new(client.url.clone()),
        RouterSettings::from_config(&client),
    );

    let (ui, _task) = spawn_ui_thread(BoundCollection::from_items([
        screen(3, "Login"),
        screen(7, "Checkout"),
        screen(9, "Settings"),
    ]));
    let binding = EntityFeed::new(ui.clone(), Arc::new(FreshScreens)).attach(&router);

    let registry = hub.hub.clone();
    eventually(|| {
        let registry = registry.clone();
        async move { registry.subscriber_count(EntityName::Screens) == 1 }
    })
    .await;

    // what the trigger publishes for `UPDATE "Screens" ... WHERE "Id" = 7`
    let payload = r#"{"entityName":"Screens","operation":"UPDATE","entityId":"7","changedAt":"2025-05-13T10:15:30Z"}"#;
    assert_eq!(forward(hub.hub.as_ref(), payload), Some(1));

    eventually(|| {
        let ui = ui.clone();
        async move { titles(&ui).await[1] == "Checkout v2" }
    })
    .await;
    assert_eq!(titles(&ui).await, ["Login", "Checkout v2", "Settings"]);

    // dropping the binding is the view disappearing
    drop(binding);
    eventually(|| {
        let registry = registry.clone();
        async move { registry.subscriber_count(EntityName::Screens) == 0 }
    })
    .await;

    router.shutdown();
}

#[tokio::test]
async fn token_auth_round_trip() {
    let hub = start_hub(AuthMode::Token, Some("s3cret")).await;
    let client = ClientConfig {
        url: hub.url.clone(),
        token: Some("s3cret".to_string()),
        ..ClientConfig::default()
    };
    let router = SubscriptionRouter::spawn(
        WsConnector::new(client.url.clone()),
        RouterSettings::from_config(&client),
    );

    let mut state = router.state();
    tokio::time::timeout(
        Duration::from_secs(5),
        state.wait_for(|s| *s == RouterState::Connected),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(hub.hub.connection_count(), 1);

    router.shutdown();
}
