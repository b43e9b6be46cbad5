use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use super::{Harness, GREEN, RED};
use crate::items::ReportState;

const BOUNDARY: &str = "reclaim-test-boundary";

fn app(h: &Harness) -> Router {
    crate::web::router(h.service.clone(), h.uploads.clone(), 20 * 1024 * 1024)
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn post_json(uri: &str, token: Option<&str>, body: &str) -> Request<Body> {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("auth_token", token);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn multipart_body(fields: &[(&str, &str)], image: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!("--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n")
                .as_bytes(),
        );
    }
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"photo.png\"\r\nContent-Type: image/png\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(image);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn upload_request(token: &str, state: &str, image: &[u8]) -> Request<Body> {
    let fields = [
        ("name", "Black backpack"),
        ("state", state),
        ("description", "black backpack"),
        ("timestamp", "1700000000"),
    ];

    Request::builder()
        .method(Method::POST)
        .uri("/upload")
        .header("auth_token", token)
        .header("content-type", format!("multipart/form-data; boundary={BOUNDARY}"))
        .body(Body::from(multipart_body(&fields, image)))
        .unwrap()
}

#[tokio::test]
async fn test_welcome() {
    let h = Harness::new();
    let request = Request::builder().uri("/").body(Body::empty()).unwrap();

    let (status, body) = send(app(&h), request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Welcome to the lost and found API");
}

#[tokio::test]
async fn test_token_handling() {
    let h = Harness::new();
    let a = h.user("a@x").await;

    let (status, _) = send(app(&h), post_json("/getUserItems", None, "{}")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(app(&h), post_json("/getUserItems", Some("forged"), "{}")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let stranger = h.signer.issue(&crate::eid::Eid::new());
    let (status, _) = send(app(&h), post_json("/getUserItems", Some(&stranger), "{}")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(app(&h), post_json("/getUserItems", Some(&h.token(&a)), "{}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(body["items"], json!([]));
}

#[tokio::test]
async fn test_bearer_header_is_accepted() {
    let h = Harness::new();
    let a = h.user("a@x").await;

    let request = Request::builder()
        .method(Method::POST)
        .uri("/getNotifications")
        .header("authorization", format!("Bearer {}", h.token(&a)))
        .body(Body::empty())
        .unwrap();

    let (status, body) = send(app(&h), request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["notifications"], json!([]));
}

#[tokio::test]
async fn test_multipart_upload() {
    let h = Harness::new();
    let a = h.user("a@x").await;
    let image = crate::images::solid_png(16, 16, RED);

    let (status, body) = send(app(&h), upload_request(&h.token(&a), "true", &image)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "item uploaded successfully");

    let id: crate::eid::Eid = body["item_id"].as_str().unwrap().parse().unwrap();
    let stored = h.item(&id).await.unwrap();
    assert_eq!(stored.state, ReportState::Lost);
    assert_eq!(stored.owner_mail, "a@x");
    assert_eq!(stored.created_at, 1_700_000_000);
}

#[tokio::test]
async fn test_upload_rejects_bad_payloads() {
    let h = Harness::new();
    let a = h.user("a@x").await;
    let token = h.token(&a);

    let (status, _) = send(app(&h), upload_request(&token, "true", b"plain text")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let image = crate::images::solid_png(16, 16, RED);
    let (status, _) = send(app(&h), upload_request(&token, "maybe", &image)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert!(h.all_items().await.is_empty());
    assert_eq!(h.stored_objects(), 0);
}

#[tokio::test]
async fn test_delete_by_other_user_is_forbidden() {
    let h = Harness::new();
    let a = h.user("a@x").await;
    let b = h.user("b@x").await;
    let item = h
        .upload(&a, "Keys", ReportState::Found, "keys", GREEN)
        .await
        .unwrap();

    let request = |token: String| {
        Request::builder()
            .method(Method::DELETE)
            .uri(format!("/delete-item/{}", item.id))
            .header("auth_token", token)
            .body(Body::empty())
            .unwrap()
    };

    let (status, _) = send(app(&h), request(h.token(&b))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(app(&h), request(h.token(&a))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Item deleted successfully");

    let (status, _) = send(app(&h), request(h.token(&a))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_malformed_json_is_a_bad_request() {
    let h = Harness::new();
    let a = h.user("a@x").await;

    let (status, body) = send(
        app(&h),
        post_json("/getMatchedItems", Some(&h.token(&a)), "{\"item_id\": "),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_matched_items_and_removal_over_http() {
    let h = Harness::new();
    let a = h.user("a@x").await;
    let b = h.user("b@x").await;
    let lost = h
        .upload(&b, "Backpack", ReportState::Lost, "black backpack", RED)
        .await
        .unwrap();
    let found = h
        .upload(&a, "Backpack", ReportState::Found, "black backpack", RED)
        .await
        .unwrap();
    let token = h.token(&b);

    let (status, body) = send(
        app(&h),
        post_json(
            "/getMatchedItems",
            Some(&token),
            &json!({ "item_id": lost.id }).to_string(),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["matched_items"][0]["id"], found.id.as_str());

    let (status, body) = send(
        app(&h),
        post_json(
            "/deleteMatchedItem",
            Some(&token),
            &json!({ "item_id": lost.id, "matched_item_id": found.id }).to_string(),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Matched item removed successfully");
    assert!(h.item(&lost.id).await.unwrap().matches.is_empty());
}

#[tokio::test]
async fn test_get_items_returns_a_page() {
    let h = Harness::new();
    let a = h.user("a@x").await;
    let b = h.user("b@x").await;
    h.upload(&b, "Keys", ReportState::Found, "keys", GREEN)
        .await
        .unwrap();

    let (status, body) = send(app(&h), post_json("/getItems", Some(&h.token(&a)), "{\"page\": 1}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["owner_mail"], "b@x");
}

#[tokio::test]
async fn test_update_push_token_route() {
    let h = Harness::new();
    let a = h.user("a@x").await;

    let (status, body) = send(
        app(&h),
        post_json(
            "/update-fcm-token",
            Some(&h.token(&a)),
            "{\"token\": \"ExponentPushToken[route]\"}",
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Push token updated successfully");
}
