//! Shared fixtures: a gateway over the in-memory store with product, user, provider and order
//! entities, three bearer tokens and a request helper.

#![allow(dead_code)]

use axum::body::{to_bytes, Body};
use axum::http::{header, HeaderMap, Method as Verb, Request, StatusCode};
use axum::Router;
use crud_gateway::access::Always;
use crud_gateway::controller::{ControllerFn, ControllerInput};
use crud_gateway::plugin::flux::Delivery;
use crud_gateway::store::{Filter, Model};
use crud_gateway::{
    ApiContext, AppError, BearerTokens, EntityDeclaration, FieldDef, FieldType, FluxEvent, Gateway, GatewayBuilder,
    Grant, LevelOnly, MemoryStore, Method, Principal,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

pub const ADMIN: &str = "admin-token";
pub const ALICE: &str = "alice-token";
pub const BOB: &str = "bob-token";

pub fn admin() -> Principal {
    Principal::new("admin-1").with_level("admin")
}

pub fn alice() -> Principal {
    Principal::new("alice-1").with_level("member")
}

pub fn bob() -> Principal {
    Principal::new("bob-1").with_level("member")
}

pub fn tokens() -> BearerTokens {
    BearerTokens::new().with(ADMIN, admin()).with(ALICE, alice()).with(BOB, bob())
}

/// Admin-only create; admins may update `name` and `tags` but not `price`.
pub fn product() -> EntityDeclaration {
    EntityDeclaration::new("product")
        .field("name", FieldDef::new(FieldType::String).required())
        .field("price", FieldDef::new(FieldType::Number))
        .field("tags", FieldDef::new(FieldType::Array))
        .text_index(["name"])
        .default_sort(json!({ "price": 1 }))
        .access(Method::Create, LevelOnly::new("admin"))
        .access(
            Method::Update,
            LevelOnly {
                level: "admin".into(),
                grant: Grant::fields(["name", "tags"]),
            },
        )
        .flux_access(FluxEvent::Create, |_| Delivery::Everyone)
        .flux_access(FluxEvent::Update, |_| Delivery::Groups(vec!["admin".into()]))
        .controller(
            "retrieveNew",
            ControllerFn(|model: Arc<Model>, input: ControllerInput| async move {
                let newest = model.find(model.query().limit(1)).await?;
                Ok::<_, AppError>(json!({
                    "count": newest.len(),
                    "params": input.params,
                    "caller": input.user.map(|u| u.id),
                }))
            }),
        )
}

/// Open sign-up; the password never leaves the gateway.
pub fn user() -> EntityDeclaration {
    EntityDeclaration::new("user")
        .field("email", FieldDef::new(FieldType::String).required().unique())
        .field("name", FieldDef::new(FieldType::String))
        .field("password", FieldDef::new(FieldType::String))
        .access(Method::Create, Always)
        .access(Method::Read, Grant::fields(["_id", "email", "name", "company", "__t"]))
}

/// A user sub-type sharing the user collection.
pub fn provider() -> EntityDeclaration {
    EntityDeclaration::new("provider")
        .discriminate("user")
        .field("company", FieldDef::new(FieldType::String))
}

/// Orders belong to their creator; members list only their own, admins list all.
pub fn order() -> EntityDeclaration {
    EntityDeclaration::new("order")
        .field("item", FieldDef::new(FieldType::String).required())
        .field("owner", FieldDef::new(FieldType::String))
        .access(Method::Create, |ctx: &mut ApiContext| match ctx.user().map(|u| u.id.clone()) {
            Some(id) => {
                ctx.append("owner", id);
                Grant::fields(["item"])
            }
            None => Grant::Denied,
        })
        .access(Method::List, |ctx: &mut ApiContext| {
            let Some(user) = ctx.user().cloned() else {
                return Grant::Denied;
            };
            if !user.has_level("admin") {
                ctx.query_filter(move |q| q.filter(Filter::eq("owner", user.id.clone())));
            }
            Grant::Unrestricted
        })
}

pub fn builder() -> GatewayBuilder {
    Gateway::builder()
        .store(Arc::new(MemoryStore::new()))
        .authenticator(Arc::new(tokens()))
        .entity(product())
        .entity(user())
        .entity(provider())
        .entity(order())
}

pub fn gateway() -> Arc<Gateway> {
    builder().build()
}

pub struct Reply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl Reply {
    pub fn data(&self) -> &Value {
        &self.body["data"]
    }
}

pub async fn send(app: &Router, verb: Verb, uri: &str, token: Option<&str>, body: Option<Value>) -> Reply {
    let mut req = Request::builder().method(verb).uri(uri);
    if let Some(t) = token {
        req = req.header(header::AUTHORIZATION, format!("Bearer {}", t));
    }
    let req = match body {
        Some(b) => req
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(b.to_string()))
            .unwrap(),
        None => req.body(Body::empty()).unwrap(),
    };
    let res = app.clone().oneshot(req).await.unwrap();
    let status = res.status();
    let headers = res.headers().clone();
    let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    Reply { status, headers, body }
}

pub async fn get(app: &Router, uri: &str, token: Option<&str>) -> Reply {
    send(app, Verb::GET, uri, token, None).await
}

pub async fn post(app: &Router, uri: &str, token: Option<&str>, body: Value) -> Reply {
    send(app, Verb::POST, uri, token, Some(body)).await
}

pub async fn patch(app: &Router, uri: &str, token: Option<&str>, body: Value) -> Reply {
    send(app, Verb::PATCH, uri, token, Some(body)).await
}

pub async fn delete(app: &Router, uri: &str, token: Option<&str>) -> Reply {
    send(app, Verb::DELETE, uri, token, None).await
}

/// Create a product as admin and return its id.
pub async fn seed_product(app: &Router, name: &str, price: i64) -> String {
    let r = post(app, "/api/product", Some(ADMIN), json!({ "name": name, "price": price })).await;
    assert_eq!(r.status, StatusCode::OK, "{}", r.body);
    r.data()["_id"].as_str().unwrap().to_string()
}
