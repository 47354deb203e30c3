mod common;

use axum::http::StatusCode;
use common::*;
use crud_gateway::plugin::io::{user_group, GLOBAL_GROUP};
use crud_gateway::{FluxEvent, Principal};
use serde_json::json;

#[tokio::test]
async fn creates_reach_every_known_group() {
    let gw = gateway();
    let app = gw.router();
    let io = gw.io().unwrap();
    let mut anonymous = io.connect(None);
    let mut staff = io.connect(Some(&admin()));

    let id = seed_product(&app, "lamp", 10).await;

    let env = anonymous.try_recv().unwrap();
    assert_eq!(env.group, GLOBAL_GROUP);
    assert_eq!(env.event, "create");
    assert_eq!(env.payload["entity"], "product");
    assert_eq!(env.payload["entry"]["_id"], id.as_str());
    assert!(anonymous.try_recv().is_none());

    let mut groups: Vec<_> = std::iter::from_fn(|| staff.try_recv()).map(|e| e.group).collect();
    groups.sort();
    assert_eq!(groups, vec![GLOBAL_GROUP.to_string(), "admin".to_string()]);
}

#[tokio::test]
async fn updates_go_only_to_the_declared_group() {
    let gw = gateway();
    let app = gw.router();
    let id = seed_product(&app, "lamp", 10).await;

    let io = gw.io().unwrap();
    let mut member = io.connect(Some(&alice()));
    let mut staff = io.connect(Some(&admin()));
    let r = patch(&app, &format!("/api/product/{}", id), Some(ADMIN), json!({ "name": "desk lamp" })).await;
    assert_eq!(r.status, StatusCode::OK);

    let env = staff.try_recv().unwrap();
    assert_eq!(env.group, "admin");
    assert_eq!(env.event, FluxEvent::Update.as_str());
    assert_eq!(env.payload["entry"]["name"], "desk lamp");
    assert!(member.try_recv().is_none());
}

#[tokio::test]
async fn no_flux_sentinel_silences_delivery_and_is_not_stored() {
    let gw = gateway();
    let app = gw.router();
    let io = gw.io().unwrap();
    let mut sub = io.connect(None);

    let r = post(&app, "/api/product", Some(ADMIN), json!({ "name": "quiet", "$noFlux": true })).await;
    assert_eq!(r.status, StatusCode::OK, "{}", r.body);
    assert!(r.data().get("$noFlux").is_none());
    assert!(sub.try_recv().is_none());
}

#[tokio::test]
async fn entities_without_rules_deliver_nothing() {
    let gw = gateway();
    let app = gw.router();
    let io = gw.io().unwrap();
    let mut sub = io.connect(Some(&alice()));
    post(&app, "/api/order", Some(ALICE), json!({ "item": "book" })).await;
    assert!(sub.try_recv().is_none());
}

#[tokio::test]
async fn profile_updates_are_sent_to_the_saved_user() {
    let gw = gateway();
    let app = gw.router();
    let r = post(&app, "/api/user", None, json!({ "email": "c@x.io", "name": "Cy" })).await;
    let id = r.data()["_id"].as_str().unwrap().to_string();

    let io = gw.io().unwrap();
    let me = Principal::new(id.clone());
    let mut sub = io.connect(Some(&me));
    let r = patch(&app, &format!("/api/user/{}", id), Some(ADMIN), json!({ "name": "Cyd" })).await;
    assert_eq!(r.status, StatusCode::OK, "{}", r.body);

    let env = sub.try_recv().unwrap();
    assert_eq!(env.group, user_group(&id));
    assert_eq!(env.event, "profile-update");
}
