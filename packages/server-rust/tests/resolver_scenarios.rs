//! End-to-end resolution scenarios against the in-memory store and driver.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use serde_json::json;
use tenantry_core::{
    Document, EntityKind, SubscriptionIssue, SubscriptionSnapshot, TenantId, TenantRecord,
};
use tenantry_server::drivers::MemoryConnector;
use tenantry_server::{CallContext, MemoryTenantStore, TenancyError, TenantResolver};
use tokio_util::sync::CancellationToken;

fn tenant(id: &str, domain: &str, uri: &str) -> TenantRecord {
    TenantRecord {
        id: TenantId::new(id),
        domain: domain.to_string(),
        connection_uri: uri.to_string(),
        active: true,
        subscription: SubscriptionSnapshot {
            plan: "standard".to_string(),
            paid: true,
            active: true,
            expires_at_millis: None,
        },
    }
}

fn doc(value: serde_json::Value) -> Document {
    value.as_object().unwrap().clone()
}

fn shop_a() -> (Arc<MemoryTenantStore>, Arc<MemoryConnector>, TenantResolver) {
    let store = Arc::new(MemoryTenantStore::new());
    store.insert(tenant("t-shop-a", "shop-a.example.com", "db://shop-a"));
    store.insert(tenant("t-shop-b", "shop-b.example.com", "db://shop-b"));
    let connector = Arc::new(MemoryConnector::new());
    let resolver = TenantResolver::new(store.clone(), connector.clone());
    (store, connector, resolver)
}

#[tokio::test]
async fn shop_a_walkthrough() {
    let (_store, connector, resolver) = shop_a();

    let customer = resolver
        .get_tenant_model("shop-a.example.com", "Customer")
        .await
        .unwrap();
    assert_eq!(customer.model.entity(), EntityKind::Customer);
    assert_eq!(customer.connection.uri(), "db://shop-a");
    assert_eq!(connector.connect_attempts_for("db://shop-a"), 1);

    let vehicle = resolver
        .get_tenant_model("shop-a.example.com", "Vehicle")
        .await
        .unwrap();
    assert!(Arc::ptr_eq(&customer.connection, &vehicle.connection));
    assert_eq!(
        vehicle.connection.bound_entities(),
        vec![EntityKind::Customer, EntityKind::Vehicle]
    );
    assert_eq!(connector.connect_attempts(), 1);

    let err = resolver
        .get_tenant_model("unknown.example.com", "Customer")
        .await
        .unwrap_err();
    assert!(matches!(err, TenancyError::TenantNotFound { .. }));
    assert_eq!(err.kind(), "TenantNotFound");
    assert_eq!(connector.connect_attempts(), 1);
}

#[tokio::test]
async fn tenants_never_share_connections_or_data() {
    let (_store, connector, resolver) = shop_a();

    let a = resolver
        .get_tenant_model("shop-a.example.com", "Customer")
        .await
        .unwrap();
    let b = resolver
        .get_tenant_model("shop-b.example.com", "Customer")
        .await
        .unwrap();
    assert!(!Arc::ptr_eq(&a.connection, &b.connection));
    assert_eq!(b.connection.tenant_id(), &TenantId::new("t-shop-b"));

    a.model
        .create(doc(json!({ "id": "c1", "name": "Ada" })))
        .await
        .unwrap();
    assert!(b.model.find_by_id("c1").await.unwrap().is_none());
    assert_eq!(connector.store("db://shop-a").unwrap().count("customers"), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_first_requests_share_one_connection() {
    let store = Arc::new(MemoryTenantStore::new());
    store.insert(tenant("t-shop-a", "shop-a.example.com", "db://shop-a"));
    let connector =
        Arc::new(MemoryConnector::new().with_connect_delay(Duration::from_millis(40)));
    let resolver = Arc::new(TenantResolver::new(store, connector.clone()));

    let requests = ["Customer", "Vehicle", "Invoice", "Customer"]
        .into_iter()
        .cycle()
        .take(24)
        .map(|entity| {
            let resolver = Arc::clone(&resolver);
            tokio::spawn(async move {
                resolver
                    .get_tenant_model("shop-a.example.com", entity)
                    .await
            })
        });
    let models: Vec<_> = join_all(requests)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    assert_eq!(connector.connect_attempts(), 1);
    assert!(models
        .iter()
        .all(|m| Arc::ptr_eq(&m.connection, &models[0].connection)));
    assert_eq!(models[0].connection.binding_count(), 3);
}

#[tokio::test]
async fn inactive_tenant_never_connects() {
    let (store, connector, resolver) = shop_a();
    store.set_active("shop-a.example.com", false);

    let err = resolver
        .get_tenant_model("shop-a.example.com", "Customer")
        .await
        .unwrap_err();
    assert!(matches!(err, TenancyError::TenantInactive { ref tenant_id } if tenant_id.as_str() == "t-shop-a"));
    assert_eq!(connector.connect_attempts(), 0);
    assert!(resolver.connections().is_empty());
}

#[tokio::test]
async fn unpaid_tenant_never_connects() {
    let (store, connector, resolver) = shop_a();
    store.update("shop-a.example.com", |record| record.subscription.paid = false);

    let err = resolver
        .get_tenant_model("shop-a.example.com", "Customer")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        TenancyError::SubscriptionInvalid {
            issue: SubscriptionIssue::Unpaid,
            ..
        }
    ));
    assert_eq!(connector.connect_attempts(), 0);
    assert!(resolver.connections().is_empty());
}

#[tokio::test]
async fn binding_from_another_resolver_cannot_join_transaction() {
    let store = Arc::new(MemoryTenantStore::new());
    store.insert(tenant("t-a", "a.example.com", "db://a"));
    store.insert(tenant("t-b", "b.example.com", "db://b"));
    let connector = Arc::new(MemoryConnector::new());
    let first = TenantResolver::new(store.clone(), connector.clone());
    let second = TenantResolver::new(store, connector.clone());

    let customers_a = first
        .get_tenant_model("a.example.com", "Customer")
        .await
        .unwrap()
        .model;

    let result: Result<(), TenancyError> = second
        .with_transaction("b.example.com", &CallContext::new(), move |session| {
            Box::pin(async move {
                customers_a
                    .create_in(session, doc(json!({ "name": "Ada" })))
                    .await?;
                Ok(())
            })
        })
        .await;

    assert!(matches!(result, Err(TenancyError::SessionMismatch { .. })));
    assert_eq!(connector.store("db://a").unwrap().count("customers"), 0);
    assert_eq!(connector.store("db://b").unwrap().count("customers"), 0);
}

#[tokio::test]
async fn unknown_entity_reuses_existing_connection() {
    let (_store, connector, resolver) = shop_a();
    let first = resolver
        .get_tenant_model("shop-a.example.com", "Customer")
        .await
        .unwrap();

    let err = resolver
        .get_tenant_model("shop-a.example.com", "Spaceship")
        .await
        .unwrap_err();
    assert!(matches!(err, TenancyError::UnknownEntity { ref name } if name == "Spaceship"));
    assert_eq!(connector.connect_attempts(), 1);
    assert_eq!(first.connection.binding_count(), 1);
}

#[tokio::test]
async fn failed_transaction_leaves_no_trace() {
    let (_store, connector, resolver) = shop_a();
    let customers = resolver
        .get_tenant_model("shop-a.example.com", "Customer")
        .await
        .unwrap()
        .model;

    let ctx = resolver.transaction_context();
    let result: Result<(), TenancyError> = resolver
        .with_transaction("shop-a.example.com", &ctx, move |session| {
            Box::pin(async move {
                customers
                    .create_in(session, doc(json!({ "id": "c1", "name": "Ada" })))
                    .await?;
                customers
                    .create_in(session, doc(json!({ "id": "c2", "name": "Bob" })))
                    .await?;
                Err(TenancyError::TransactionAborted {
                    reason: "payment declined".to_string(),
                })
            })
        })
        .await;

    assert!(result.is_err());
    assert_eq!(connector.store("db://shop-a").unwrap().count("customers"), 0);
}

#[tokio::test]
async fn commit_refuses_key_created_outside_transaction() {
    let (_store, connector, resolver) = shop_a();
    let customers = resolver
        .get_tenant_model("shop-a.example.com", "Customer")
        .await
        .unwrap()
        .model;

    let ctx = resolver.transaction_context();
    let result: Result<(), TenancyError> = resolver
        .with_transaction("shop-a.example.com", &ctx, move |session| {
            Box::pin(async move {
                customers
                    .create_in(session, doc(json!({ "id": "c1", "name": "Ada" })))
                    .await?;
                customers
                    .create(doc(json!({ "id": "c1", "name": "Bob" })))
                    .await?;
                Ok(())
            })
        })
        .await;

    assert!(matches!(result, Err(TenancyError::CommitFailed(_))));
    let records = connector.store("db://shop-a").unwrap().records("customers");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["name"], "Bob");
}

#[tokio::test]
async fn committed_transaction_survives_reconnect() {
    let (store, connector, resolver) = shop_a();
    let customers = resolver
        .get_tenant_model("shop-a.example.com", "Customer")
        .await
        .unwrap()
        .model;

    let ctx = resolver.transaction_context();
    resolver
        .with_transaction("shop-a.example.com", &ctx, move |session| {
            Box::pin(async move {
                customers
                    .create_in(session, doc(json!({ "id": "c1", "name": "Ada" })))
                    .await?;
                customers
                    .create_in(session, doc(json!({ "id": "c2", "name": "Bob" })))
                    .await?;
                Ok::<_, TenancyError>(())
            })
        })
        .await
        .unwrap();

    let fresh = TenantResolver::new(store, connector.clone());
    let reopened = fresh
        .get_tenant_model("shop-a.example.com", "Customer")
        .await
        .unwrap();
    assert_eq!(reopened.model.find_all().await.unwrap().len(), 2);
    assert_eq!(connector.connect_attempts_for("db://shop-a"), 2);
}

#[tokio::test]
async fn connection_failure_is_retryable_and_not_cached() {
    let (_store, connector, resolver) = shop_a();
    connector.fail_connections("db://shop-a", "connection refused");

    let err = resolver
        .get_tenant_model("shop-a.example.com", "Customer")
        .await
        .unwrap_err();
    assert!(matches!(err, TenancyError::ConnectionFailed { .. }));
    assert!(err.is_retryable());

    connector.clear_failure("db://shop-a");
    assert!(resolver
        .get_tenant_model("shop-a.example.com", "Customer")
        .await
        .is_ok());
    assert_eq!(connector.connect_attempts(), 2);
}

#[tokio::test(start_paused = true)]
async fn cancelled_wait_leaves_attempt_running() {
    let store = Arc::new(MemoryTenantStore::new());
    store.insert(tenant("t-shop-a", "shop-a.example.com", "db://shop-a"));
    let connector =
        Arc::new(MemoryConnector::new().with_connect_delay(Duration::from_millis(100)));
    let resolver = TenantResolver::new(store, connector.clone());

    let token = CancellationToken::new();
    let ctx = CallContext::new().with_cancellation(token.clone());
    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();
    });

    let err = resolver
        .get_tenant_model_with("shop-a.example.com", "Customer", &ctx)
        .await
        .unwrap_err();
    assert!(matches!(err, TenancyError::Cancelled));
    canceller.await.unwrap();

    let model = resolver
        .get_tenant_model("shop-a.example.com", "Customer")
        .await
        .unwrap();
    assert!(Arc::ptr_eq(
        &model.connection,
        &resolver.connections().get(&TenantId::new("t-shop-a")).unwrap()
    ));
    assert_eq!(connector.connect_attempts(), 1);
}

#[tokio::test]
async fn tenants_seeded_from_json_file() {
    let records = vec![
        tenant("t-shop-a", "shop-a.example.com", "db://shop-a"),
        tenant("t-shop-b", "Shop-B.example.com", "db://shop-b"),
    ];
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(serde_json::to_string(&records).unwrap().as_bytes())
        .unwrap();

    let store = MemoryTenantStore::load_json(file.path()).unwrap();
    assert_eq!(store.len(), 2);

    let resolver = TenantResolver::new(Arc::new(store), Arc::new(MemoryConnector::new()));
    let model = resolver
        .get_tenant_model("shop-b.example.com", "invoice")
        .await
        .unwrap();
    assert_eq!(model.tenant.id, TenantId::new("t-shop-b"));
    assert_eq!(model.model.collection(), "invoices");
}
