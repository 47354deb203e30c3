mod common;

use async_trait::async_trait;
use axum::http::{Method as Verb, StatusCode};
use common::*;
use crud_gateway::plugin::{Exchange, Flow, Plugin, PluginApi};
use crud_gateway::record::Record;
use crud_gateway::store::{DocumentStore, Filter, Query};
use crud_gateway::{AppError, GatewayConfig, MemoryStore, StoreError};
use serde_json::json;
use std::sync::{Arc, Mutex};

#[tokio::test]
async fn create_is_admin_only_and_a_refusal_persists_nothing() {
    let app = gateway().router();

    let r = post(&app, "/api/product", None, json!({ "name": "x" })).await;
    assert_eq!(r.status, StatusCode::FORBIDDEN);
    assert_eq!(r.body["statusCode"], 403);
    assert_eq!(r.body["error"], "Forbidden");
    assert_eq!(r.body["message"], "Access to create product was not granted.");

    let r = post(&app, "/api/product", Some(ALICE), json!({ "name": "x" })).await;
    assert_eq!(r.status, StatusCode::FORBIDDEN);
    assert_eq!(get(&app, "/api/product", None).await.data(), &json!([]));

    let r = post(&app, "/api/product", Some(ADMIN), json!({ "name": "x" })).await;
    assert_eq!(r.status, StatusCode::OK);
    assert_eq!(r.body["statusCode"], 200);
    assert_eq!(r.data()["name"], "x");
    assert_eq!(r.data()["tags"], json!([]));
    assert_eq!(get(&app, "/api/product", None).await.data().as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn fields_outside_the_create_grant_are_rejected() {
    let app = gateway().router();
    let r = post(&app, "/api/order", Some(ALICE), json!({ "item": "book", "owner": "bob-1" })).await;
    assert_eq!(r.status, StatusCode::FORBIDDEN);
    assert_eq!(r.body["message"], "Access to owner were not granted.");
    assert_eq!(get(&app, "/api/order", Some(ADMIN)).await.data(), &json!([]));
}

#[tokio::test]
async fn unchanged_fields_do_not_need_the_update_grant() {
    let app = gateway().router();
    let id = seed_product(&app, "lamp", 10).await;
    let uri = format!("/api/product/{}", id);

    for name in ["renamed", "renamed"] {
        let r = patch(&app, &uri, Some(ADMIN), json!({ "name": name, "price": 10 })).await;
        assert_eq!(r.status, StatusCode::OK, "{}", r.body);
        assert_eq!(r.data()["name"], "renamed");
    }

    let r = patch(&app, &uri, Some(ADMIN), json!({ "price": 11 })).await;
    assert_eq!(r.status, StatusCode::FORBIDDEN);
    assert_eq!(get(&app, &uri, None).await.data()["price"], 10);

    let r = patch(&app, &uri, Some(ALICE), json!({ "name": "mine" })).await;
    assert_eq!(r.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn patch_sets_one_sub_path() {
    let app = gateway().router();
    let id = seed_product(&app, "lamp", 10).await;
    let r = patch(&app, &format!("/api/product/{}/name", id), Some(ADMIN), json!("desk lamp")).await;
    assert_eq!(r.status, StatusCode::OK, "{}", r.body);
    assert_eq!(r.data()["name"], "desk lamp");
    assert!(r.data().get("price").is_none());
    assert_eq!(get(&app, &format!("/api/product/{}", id), None).await.data()["price"], 10);
}

#[tokio::test]
async fn mutation_responses_stay_inside_a_field_grant() {
    let app = gateway().router();
    let id = seed_product(&app, "lamp", 10).await;

    let r = patch(&app, &format!("/api/product/{}", id), Some(ADMIN), json!({ "name": "desk lamp" })).await;
    assert_eq!(r.status, StatusCode::OK, "{}", r.body);
    let mut keys: Vec<_> = r.data().as_object().unwrap().keys().cloned().collect();
    keys.sort();
    assert_eq!(keys, vec!["_id", "name", "tags"]);

    let r = post(&app, "/api/order", Some(ALICE), json!({ "item": "book" })).await;
    assert_eq!(r.status, StatusCode::OK, "{}", r.body);
    let mut keys: Vec<_> = r.data().as_object().unwrap().keys().cloned().collect();
    keys.sort();
    assert_eq!(keys, vec!["_id", "item"]);
}

#[tokio::test]
async fn skip_and_limit_page_through_the_declared_order() {
    let app = gateway().router();
    for (name, price) in [("e", 5), ("a", 1), ("d", 4), ("b", 2), ("c", 3)] {
        seed_product(&app, name, price).await;
    }

    let all = get(&app, "/api/product", None).await;
    let prices: Vec<_> = all.data().as_array().unwrap().iter().map(|p| p["price"].clone()).collect();
    assert_eq!(prices, vec![json!(1), json!(2), json!(3), json!(4), json!(5)]);

    let page = get(&app, "/api/product?skip=1&limit=2", None).await;
    let names: Vec<_> = page.data().as_array().unwrap().iter().map(|p| p["name"].clone()).collect();
    assert_eq!(names, vec![json!("b"), json!("c")]);

    let sorted = get(&app, "/api/product?sort=-price&limit=1", None).await;
    assert_eq!(sorted.data()[0]["name"], "e");
}

#[tokio::test]
async fn list_pages_default_to_the_configured_limit_and_are_clamped() {
    let config = GatewayConfig {
        collection_list_limit: 2,
        collection_max_list_limit: 3,
        ..GatewayConfig::default()
    };
    let app = builder().config(config).build().router();
    for (name, price) in [("a", 1), ("b", 2), ("c", 3), ("d", 4), ("e", 5)] {
        seed_product(&app, name, price).await;
    }

    let count = |r: Reply| r.data().as_array().unwrap().len();
    assert_eq!(count(get(&app, "/api/product", None).await), 2);
    assert_eq!(count(get(&app, "/api/product?limit=0", None).await), 2);
    assert_eq!(count(get(&app, "/api/product?limit=1", None).await), 1);
    assert_eq!(count(get(&app, "/api/product?limit=50", None).await), 3);
}

#[tokio::test]
async fn search_and_find_narrow_the_list() {
    let app = gateway().router();
    seed_product(&app, "Desk Lamp", 30).await;
    seed_product(&app, "Chair", 50).await;

    let r = get(&app, "/api/product?search=lamp", None).await;
    assert_eq!(r.data().as_array().unwrap().len(), 1);
    assert_eq!(r.data()[0]["name"], "Desk Lamp");

    let r = get(&app, "/api/product?find[price][$gte]=40", None).await;
    assert_eq!(r.data().as_array().unwrap().len(), 1);
    assert_eq!(r.data()[0]["name"], "Chair");
}

#[tokio::test]
async fn find_cannot_reach_unreadable_fields() {
    let app = gateway().router();
    post(&app, "/api/user", None, json!({ "email": "a@x.io", "password": "hunter2" })).await;

    let r = get(&app, "/api/user?find[password]=hunter2", None).await;
    assert_eq!(r.status, StatusCode::FORBIDDEN);

    let r = get(&app, "/api/user?find[email]=a@x.io", None).await;
    assert_eq!(r.status, StatusCode::OK);
    assert_eq!(r.data().as_array().unwrap().len(), 1);
    assert!(r.data()[0].get("password").is_none());
}

#[tokio::test]
async fn push_then_pull_restores_the_sequence() {
    let app = gateway().router();
    let r = post(&app, "/api/product", Some(ADMIN), json!({ "name": "lamp", "tags": ["a", "b", "c"] })).await;
    let id = r.data()["_id"].as_str().unwrap().to_string();
    let uri = format!("/api/product/{}/tags", id);

    let r = post(&app, &uri, Some(ALICE), json!({ "push": "d" })).await;
    assert_eq!(r.status, StatusCode::OK, "{}", r.body);
    assert_eq!(r.data()["tags"], json!(["a", "b", "c", "d"]));

    let r = post(&app, &uri, Some(ALICE), json!({ "push": ["e", "f"], "multiple": true })).await;
    assert_eq!(r.data()["tags"], json!(["a", "b", "c", "d", "e", "f"]));

    let r = send(&app, Verb::DELETE, &format!("{}?pull[]=d&pull[]=f", uri), Some(ALICE), None).await;
    assert_eq!(r.status, StatusCode::OK, "{}", r.body);
    let r = send(&app, Verb::DELETE, &format!("{}?pull=e", uri), Some(ALICE), None).await;
    assert_eq!(r.data()["tags"], json!(["a", "b", "c"]));

    let r = send(&app, Verb::DELETE, &format!("{}?pull=zz", uri), Some(ALICE), None).await;
    assert_eq!(r.status, StatusCode::NOT_FOUND);
    let r = post(&app, &format!("/api/product/{}/name", id), Some(ALICE), json!({ "push": "x" })).await;
    assert_eq!(r.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn members_list_only_their_own_orders() {
    let app = gateway().router();
    let r = post(&app, "/api/order", Some(ALICE), json!({ "item": "book" })).await;
    assert_eq!(r.status, StatusCode::OK, "{}", r.body);
    post(&app, "/api/order", Some(BOB), json!({ "item": "pen" })).await;

    let mine = get(&app, "/api/order", Some(ALICE)).await;
    assert_eq!(mine.data().as_array().unwrap().len(), 1);
    assert_eq!(mine.data()[0]["item"], "book");
    assert_eq!(mine.data()[0]["owner"], "alice-1");

    let theirs = get(&app, "/api/order", Some(BOB)).await;
    assert_eq!(theirs.data().as_array().unwrap().len(), 1);
    assert_eq!(theirs.data()[0]["item"], "pen");

    assert_eq!(get(&app, "/api/order", Some(ADMIN)).await.data().as_array().unwrap().len(), 2);
    assert_eq!(get(&app, "/api/order", None).await.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn providers_share_the_user_collection_and_its_access() {
    let app = gateway().router();
    let r = post(&app, "/api/user", None, json!({ "email": "u@x.io", "password": "pw" })).await;
    assert_eq!(r.status, StatusCode::OK);
    assert!(r.data().get("password").is_none());

    let r = post(&app, "/api/provider", None, json!({ "email": "p@x.io", "company": "Acme", "password": "pw" })).await;
    assert_eq!(r.status, StatusCode::OK, "{}", r.body);
    assert_eq!(r.data()["__t"], "provider");
    assert_eq!(r.data()["company"], "Acme");
    assert!(r.data().get("password").is_none());

    assert_eq!(get(&app, "/api/user", None).await.data().as_array().unwrap().len(), 2);
    let providers = get(&app, "/api/provider", None).await;
    assert_eq!(providers.data().as_array().unwrap().len(), 1);

    let r = post(&app, "/api/provider", None, json!({ "email": "u@x.io" })).await;
    assert_eq!(r.status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn comma_separated_ids_delete_every_record() {
    let app = gateway().router();
    let mut ids = Vec::new();
    for email in ["a@x.io", "b@x.io", "c@x.io"] {
        let r = post(&app, "/api/user", None, json!({ "email": email })).await;
        ids.push(r.data()["_id"].as_str().unwrap().to_string());
    }

    let r = delete(&app, &format!("/api/user/{},{}", ids[0], ids[1]), Some(ADMIN)).await;
    assert_eq!(r.status, StatusCode::OK, "{}", r.body);
    assert_eq!(r.data()["removed"].as_array().unwrap().len(), 2);
    assert_eq!(r.data()["errors"], json!([]));

    let r = get(&app, &format!("/api/user/{}", ids[0]), None).await;
    assert_eq!(r.status, StatusCode::NOT_FOUND);
    assert_eq!(r.body["statusCode"], 404);
    assert_eq!(get(&app, &format!("/api/user/{}", ids[2]), None).await.status, StatusCode::OK);
}

/// Memory store whose `remove` fails for one chosen id.
struct FailingRemove {
    inner: MemoryStore,
    fail_on: Arc<Mutex<Option<String>>>,
}

#[async_trait]
impl DocumentStore for FailingRemove {
    async fn ensure_collection(&self, collection: &str, text_fields: &[String]) -> Result<(), StoreError> {
        self.inner.ensure_collection(collection, text_fields).await
    }

    async fn insert(&self, collection: &str, record: Record) -> Result<Record, StoreError> {
        self.inner.insert(collection, record).await
    }

    async fn replace(&self, collection: &str, record: Record) -> Result<Option<Record>, StoreError> {
        self.inner.replace(collection, record).await
    }

    async fn remove(&self, collection: &str, id: &str) -> Result<Option<Record>, StoreError> {
        let fail = self.fail_on.lock().unwrap().as_deref() == Some(id);
        if fail {
            return Err(StoreError::Encode("disk full".into()));
        }
        self.inner.remove(collection, id).await
    }

    async fn find(&self, collection: &str, query: &Query) -> Result<Vec<Record>, StoreError> {
        self.inner.find(collection, query).await
    }

    async fn delete_many(&self, collection: &str, filters: &[Filter]) -> Result<u64, StoreError> {
        self.inner.delete_many(collection, filters).await
    }
}

#[tokio::test]
async fn a_failed_removal_is_reported_per_record() {
    let fail_on = Arc::new(Mutex::new(None));
    let store = FailingRemove {
        inner: MemoryStore::new(),
        fail_on: fail_on.clone(),
    };
    let app = builder().store(Arc::new(store)).build().router();
    let mut ids = Vec::new();
    for email in ["a@x.io", "b@x.io", "c@x.io"] {
        let r = post(&app, "/api/user", None, json!({ "email": email })).await;
        ids.push(r.data()["_id"].as_str().unwrap().to_string());
    }
    *fail_on.lock().unwrap() = Some(ids[1].clone());

    let r = delete(&app, &format!("/api/user/{}", ids.join(",")), Some(ADMIN)).await;
    assert_eq!(r.status, StatusCode::OK, "{}", r.body);
    let removed: Vec<_> = r.data()["removed"].as_array().unwrap().iter().map(|u| u["_id"].clone()).collect();
    assert_eq!(removed, vec![json!(ids[0]), json!(ids[2])]);
    assert_eq!(r.data()["errors"], json!([{ "_id": ids[1], "message": "encode: disk full" }]));
    assert_eq!(get(&app, &format!("/api/user/{}", ids[1]), None).await.status, StatusCode::OK);
}

#[tokio::test]
async fn delete_by_filter_and_in_bulk() {
    let app = gateway().router();
    let a = seed_product(&app, "a", 1).await;
    let b = seed_product(&app, "b", 2).await;
    seed_product(&app, "c", 9).await;

    let r = delete(&app, "/api/product?id[price][$gt]=5", Some(ADMIN)).await;
    assert_eq!(r.data()["removed"][0]["name"], "c");

    let r = delete(&app, &format!("/api/product?id[]={}&id[]={}&many=true", a, b), Some(ADMIN)).await;
    assert_eq!(r.status, StatusCode::OK, "{}", r.body);
    assert_eq!(r.data()["result"]["deletedCount"], 2);
    assert_eq!(get(&app, "/api/product", None).await.data(), &json!([]));

    let r = delete(&app, "/api/product", Some(ADMIN)).await;
    assert_eq!(r.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn single_delete_returns_the_removed_record() {
    let app = gateway().router();
    let id = seed_product(&app, "lamp", 3).await;
    let uri = format!("/api/product/{}", id);
    assert_eq!(delete(&app, &uri, None).await.status, StatusCode::FORBIDDEN);
    let r = delete(&app, &uri, Some(ALICE)).await;
    assert_eq!(r.data()["name"], "lamp");
    assert_eq!(delete(&app, &uri, Some(ALICE)).await.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn read_projects_a_sub_path() {
    let app = gateway().router();
    let id = seed_product(&app, "lamp", 3).await;
    let r = get(&app, &format!("/api/product/{}/name", id), None).await;
    assert_eq!(r.data(), &json!("lamp"));
    let r = get(&app, &format!("/api/product/{}/colour", id), None).await;
    assert_eq!(r.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn controllers_receive_params_body_and_user() {
    let app = gateway().router();
    seed_product(&app, "lamp", 3).await;
    let r = get(&app, "/api/product/retrieve-new?since=5", Some(ALICE)).await;
    assert_eq!(r.status, StatusCode::OK, "{}", r.body);
    assert_eq!(r.data(), &json!({ "count": 1, "params": { "since": 5 }, "caller": "alice-1" }));

    let r = get(&app, "/api/product/not-a-thing", None).await;
    assert_eq!(r.status, StatusCode::BAD_REQUEST);
    assert_eq!(r.body["message"], "Invalid entity id or controller");
}

#[tokio::test]
async fn unhandled_requests_get_the_structured_501() {
    let app = gateway().router();
    let r = send(&app, Verb::PUT, "/api/product", None, None).await;
    assert_eq!(r.status, StatusCode::NOT_IMPLEMENTED);
    assert_eq!(
        r.body,
        json!({ "statusCode": 501, "error": "Not Implemented", "message": "Method not implemented" })
    );
}

#[tokio::test]
async fn unknown_entities_and_bad_bodies() {
    let app = gateway().router();
    let r = get(&app, "/api/widget", None).await;
    assert_eq!(r.status, StatusCode::NOT_FOUND);

    let req = axum::http::Request::builder()
        .method(Verb::POST)
        .uri("/api/user")
        .body(axum::body::Body::from("{not json"))
        .unwrap();
    let res = tower::ServiceExt::oneshot(app.clone(), req).await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(res.headers()["cache-control"], "no-cache, no-store, must-revalidate");
    assert!(res.headers().contains_key("x-response-time"));
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["statusCode"], 400);
    assert_eq!(body["error"], "Bad Request");

    let r = get(&app, "/api/user", Some("forged")).await;
    assert_eq!(r.status, StatusCode::FORBIDDEN);
}

struct Hello;

#[async_trait]
impl Plugin for Hello {
    fn name(&self) -> &'static str {
        "hello"
    }

    async fn prepare(&self, ex: &mut Exchange, _api: &PluginApi) -> Result<Flow, AppError> {
        if ex.request.path == "/hello" {
            ex.result = Some(json!("hi"));
        }
        Ok(Flow::Next)
    }
}

#[tokio::test]
async fn paths_that_name_no_entity_fall_through_to_later_plugins() {
    let app = builder().plugin(Arc::new(Hello)).build().router();
    let r = get(&app, "/api/hello", None).await;
    assert_eq!(r.status, StatusCode::OK, "{}", r.body);
    assert_eq!(r.body, json!({ "statusCode": 200, "data": "hi" }));

    let r = get(&app, "/api/widget", None).await;
    assert_eq!(r.status, StatusCode::NOT_FOUND);
    assert_eq!(r.body["message"], "entity widget not found");
    assert_eq!(get(&app, "/api/product", None).await.status, StatusCode::OK);
}

#[tokio::test]
async fn every_response_carries_the_no_cache_headers() {
    let app = gateway().router();
    for r in [get(&app, "/api/product", None).await, get(&app, "/api/widget", None).await] {
        assert_eq!(r.headers["cache-control"], "no-cache, no-store, must-revalidate");
        assert_eq!(r.headers["pragma"], "no-cache");
        assert_eq!(r.headers["expires"], "0");
        assert_eq!(r.headers["x-robots-tag"], "noindex, nofollow");
        assert!(r.headers["x-response-time"].to_str().unwrap().ends_with("ms"));
    }
}

#[tokio::test]
async fn schemas_describe_every_entity() {
    let app = gateway().router();
    let r = get(&app, "/api/entities", None).await;
    assert_eq!(r.status, StatusCode::OK);
    assert_eq!(r.data()["product"]["name"]["instance"], "String");
    assert_eq!(r.data()["product"]["_id"]["instance"], "ObjectId");
    assert_eq!(r.data()["provider"]["company"]["path"], "company");
    assert_eq!(r.data()["provider"]["email"]["options"]["unique"], true);
}

#[tokio::test]
async fn readiness_follows_the_registry() {
    let app = gateway().router();
    assert_eq!(get(&app, "/health", None).await.body, json!({ "status": "ok" }));
    assert_eq!(get(&app, "/ready", None).await.status, StatusCode::SERVICE_UNAVAILABLE);
    get(&app, "/api/product", None).await;
    assert_eq!(get(&app, "/ready", None).await.status, StatusCode::OK);
    assert_eq!(get(&app, "/version", None).await.body["name"], "crud-gateway");
}

#[tokio::test]
async fn schema_listing_honours_its_access_hook() {
    let app = builder()
        .schema_access(|user, entity| entity != "order" || user.is_some_and(|u| u.has_level("admin")))
        .build()
        .router();
    let r = get(&app, "/api/entities", Some(ALICE)).await;
    assert!(r.data().get("order").is_none());
    assert!(r.data().get("product").is_some());
    let r = get(&app, "/api/entities", Some(ADMIN)).await;
    assert!(r.data().get("order").is_some());
}
