//! API integration tests
//!
//! Run against a live server seeded with the bootstrap admin (admin/admin).

use reqwest::Client;
use serde_json::{json, Value};

const BASE_URL: &str = "http://localhost:8080/api/v1";

/// Helper to get an admin token
async fn get_auth_token(client: &Client) -> String {
    token_for(client, "admin", "admin").await
}

async fn token_for(client: &Client, username: &str, password: &str) -> String {
    let response = client
        .post(format!("{}/auth/token", BASE_URL))
        .json(&json!({
            "username": username,
            "password": password
        }))
        .send()
        .await
        .expect("Failed to send token request");

    let body: Value = response.json().await.expect("Failed to parse token response");
    body["token"].as_str().expect("No token in response").to_string()
}

/// Suffix keeping usernames and ISBNs unique across runs
fn unique_suffix() -> u128 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos()
        % 10_000_000_000
}

async fn create_user(client: &Client, token: &str, username: &str) -> i64 {
    let response = client
        .post(format!("{}/users", BASE_URL))
        .bearer_auth(token)
        .json(&json!({
            "username": username,
            "password": "reader-pass",
            "first_name": "Test",
            "last_name": "Reader",
            "email": format!("{}@example.org", username)
        }))
        .send()
        .await
        .expect("Failed to create user");
    assert_eq!(response.status(), 201);

    let body: Value = response.json().await.unwrap();
    body["id"].as_i64().unwrap()
}

async fn create_book(client: &Client, token: &str, total_copies: i32) -> i64 {
    let response = client
        .post(format!("{}/books", BASE_URL))
        .bearer_auth(token)
        .json(&json!({
            "title": "The Left Hand of Darkness",
            "author": "Ursula K. Le Guin",
            "isbn": format!("978{:010}", unique_suffix()),
            "total_copies": total_copies
        }))
        .send()
        .await
        .expect("Failed to create book");
    assert_eq!(response.status(), 201);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["available_copies"], total_copies);
    body["id"].as_i64().unwrap()
}

async fn available_copies(client: &Client, token: &str, book_id: i64) -> i64 {
    let body: Value = client
        .get(format!("{}/books/{}", BASE_URL, book_id))
        .bearer_auth(token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    body["available_copies"].as_i64().unwrap()
}

#[tokio::test]
#[ignore] // Run with: cargo test -- --ignored
async fn test_health_check() {
    let client = Client::new();

    let response = client
        .get(format!("{}/health", BASE_URL))
        .send()
        .await
        .expect("Failed to send request");

    assert!(response.status().is_success());

    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
#[ignore]
async fn test_readiness_check() {
    let client = Client::new();

    let response = client
        .get(format!("{}/ready", BASE_URL))
        .send()
        .await
        .expect("Failed to send request");

    assert!(response.status().is_success());
}

#[tokio::test]
#[ignore]
async fn test_obtain_token() {
    let client = Client::new();

    let response = client
        .post(format!("{}/auth/token", BASE_URL))
        .json(&json!({
            "username": "admin",
            "password": "admin"
        }))
        .send()
        .await
        .expect("Failed to send request");

    assert!(response.status().is_success());

    let body: Value = response.json().await.expect("Failed to parse response");
    assert!(body["token"].is_string());
    assert_eq!(body["token_type"], "Bearer");
}

#[tokio::test]
#[ignore]
async fn test_obtain_token_invalid_credentials() {
    let client = Client::new();

    let response = client
        .post(format!("{}/auth/token", BASE_URL))
        .json(&json!({
            "username": "admin",
            "password": "wrong"
        }))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), 401);
}

#[tokio::test]
#[ignore]
async fn test_me() {
    let client = Client::new();
    let token = get_auth_token(&client).await;

    let response = client
        .get(format!("{}/auth/me", BASE_URL))
        .bearer_auth(&token)
        .send()
        .await
        .expect("Failed to send request");

    assert!(response.status().is_success());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["username"], "admin");
    assert_eq!(body["is_staff"], true);
}

#[tokio::test]
#[ignore]
async fn test_list_books_paginated() {
    let client = Client::new();
    let token = get_auth_token(&client).await;

    let response = client
        .get(format!("{}/books?page=1&per_page=5", BASE_URL))
        .bearer_auth(&token)
        .send()
        .await
        .expect("Failed to send request");

    assert!(response.status().is_success());

    let body: Value = response.json().await.unwrap();
    assert!(body["items"].is_array());
    assert!(body["total"].is_number());
    assert_eq!(body["page"], 1);
    assert_eq!(body["per_page"], 5);
}

#[tokio::test]
#[ignore]
async fn test_duplicate_isbn_is_conflict() {
    let client = Client::new();
    let token = get_auth_token(&client).await;
    let isbn = format!("979{:010}", unique_suffix());

    for expected in [201, 409] {
        let response = client
            .post(format!("{}/books", BASE_URL))
            .bearer_auth(&token)
            .json(&json!({
                "title": "Solaris",
                "author": "Stanislaw Lem",
                "isbn": isbn,
                "total_copies": 1
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), expected);
    }
}

#[tokio::test]
#[ignore]
async fn test_two_copy_loan_scenario() {
    let client = Client::new();
    let token = get_auth_token(&client).await;
    let suffix = unique_suffix();

    let book_id = create_book(&client, &token, 2).await;
    let alice = create_user(&client, &token, &format!("alice{}", suffix)).await;
    let bob = create_user(&client, &token, &format!("bob{}", suffix)).await;
    let carol = create_user(&client, &token, &format!("carol{}", suffix)).await;

    let mut loan_ids = Vec::new();
    for (user_id, expected_available) in [(alice, 1), (bob, 0)] {
        let response = client
            .post(format!("{}/loans", BASE_URL))
            .bearer_auth(&token)
            .json(&json!({ "user_id": user_id, "book_id": book_id, "status": "active" }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 201);

        let body: Value = response.json().await.unwrap();
        assert_eq!(body["status"], "active");
        loan_ids.push(body["id"].as_i64().unwrap());
        assert_eq!(available_copies(&client, &token, book_id).await, expected_available);
    }

    // no copy left
    let response = client
        .post(format!("{}/loans", BASE_URL))
        .bearer_auth(&token)
        .json(&json!({ "user_id": carol, "book_id": book_id, "status": "active" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["kind"], "validation");
    assert_eq!(available_copies(&client, &token, book_id).await, 0);

    // returning the first loan frees one copy
    let response = client
        .post(format!("{}/loans/{}/return", BASE_URL, loan_ids[0]))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "returned");
    assert!(body["return_date"].is_string());
    assert_eq!(available_copies(&client, &token, book_id).await, 1);

    // a second return is rejected and changes nothing
    let response = client
        .post(format!("{}/loans/{}/return", BASE_URL, loan_ids[0]))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    assert_eq!(available_copies(&client, &token, book_id).await, 1);
}

#[tokio::test]
#[ignore]
async fn test_concurrent_loans_for_last_copy() {
    let client = Client::new();
    let token = get_auth_token(&client).await;
    let suffix = unique_suffix();

    let book_id = create_book(&client, &token, 1).await;
    let mut user_ids = Vec::new();
    for i in 0..5 {
        user_ids.push(create_user(&client, &token, &format!("racer{}x{}", suffix, i)).await);
    }

    let mut requests = tokio::task::JoinSet::new();
    for user_id in user_ids {
        let client = client.clone();
        let token = token.clone();
        requests.spawn(async move {
            client
                .post(format!("{}/loans", BASE_URL))
                .bearer_auth(&token)
                .json(&json!({ "user_id": user_id, "book_id": book_id, "status": "active" }))
                .send()
                .await
                .unwrap()
                .status()
        });
    }

    let mut created = 0;
    while let Some(status) = requests.join_next().await {
        let status = status.unwrap();
        if status == 201 {
            created += 1;
        } else {
            assert!(status == 400 || status == 409, "unexpected status {}", status);
        }
    }

    assert_eq!(created, 1);
    assert_eq!(available_copies(&client, &token, book_id).await, 0);
}

#[tokio::test]
#[ignore]
async fn test_pending_loan_lifecycle() {
    let client = Client::new();
    let token = get_auth_token(&client).await;
    let suffix = unique_suffix();

    let book_id = create_book(&client, &token, 1).await;
    let username = format!("dana{}", suffix);
    let user_id = create_user(&client, &token, &username).await;

    let response = client
        .post(format!("{}/loans", BASE_URL))
        .bearer_auth(&token)
        .json(&json!({ "user_id": user_id, "book_id": book_id, "notes": "hold at desk" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "pending");
    let loan_id = body["id"].as_i64().unwrap();
    assert_eq!(available_copies(&client, &token, book_id).await, 1);

    // a second open loan of the same book is refused
    let response = client
        .post(format!("{}/loans", BASE_URL))
        .bearer_auth(&token)
        .json(&json!({ "user_id": user_id, "book_id": book_id }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    // pending -> active takes the copy
    let response = client
        .patch(format!("{}/loans/{}", BASE_URL, loan_id))
        .bearer_auth(&token)
        .json(&json!({ "status": "active" }))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());
    assert_eq!(available_copies(&client, &token, book_id).await, 0);

    // renewing only moves the due date
    let before: Value = client
        .get(format!("{}/loans/{}", BASE_URL, loan_id))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let response = client
        .post(format!("{}/loans/{}/renew", BASE_URL, loan_id))
        .bearer_auth(&token)
        .json(&json!({ "extra_days": 7 }))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());
    let after: Value = response.json().await.unwrap();
    assert_ne!(before["due_date"], after["due_date"]);
    assert_eq!(after["status"], "active");
    assert_eq!(available_copies(&client, &token, book_id).await, 0);

    // the reader sees the loan through their own token
    let reader_token = token_for(&client, &username, "reader-pass").await;
    let response = client
        .get(format!("{}/users/{}/loans?status=active", BASE_URL, user_id))
        .bearer_auth(&reader_token)
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());
    let loans: Value = response.json().await.unwrap();
    assert_eq!(loans.as_array().unwrap().len(), 1);

    // the book cannot be deleted while on loan
    let response = client
        .delete(format!("{}/books/{}", BASE_URL, book_id))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    // deleting the active loan releases the copy
    let response = client
        .delete(format!("{}/loans/{}", BASE_URL, loan_id))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 204);
    assert_eq!(available_copies(&client, &token, book_id).await, 1);
}

#[tokio::test]
#[ignore]
async fn test_invalid_transition_rejected() {
    let client = Client::new();
    let token = get_auth_token(&client).await;
    let suffix = unique_suffix();

    let book_id = create_book(&client, &token, 1).await;
    let user_id = create_user(&client, &token, &format!("erin{}", suffix)).await;

    let body: Value = client
        .post(format!("{}/loans", BASE_URL))
        .bearer_auth(&token)
        .json(&json!({ "user_id": user_id, "book_id": book_id, "status": "active" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let loan_id = body["id"].as_i64().unwrap();

    for status in ["pending", "overdue"] {
        let response = client
            .patch(format!("{}/loans/{}", BASE_URL, loan_id))
            .bearer_auth(&token)
            .json(&json!({ "status": status }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 400);
    }
    assert_eq!(available_copies(&client, &token, book_id).await, 0);
}

#[tokio::test]
#[ignore]
async fn test_statistics() {
    let client = Client::new();
    let token = get_auth_token(&client).await;

    let response = client
        .get(format!("{}/loans/statistics", BASE_URL))
        .bearer_auth(&token)
        .send()
        .await
        .expect("Failed to send request");
    assert!(response.status().is_success());
    let body: Value = response.json().await.unwrap();
    assert!(body["total_loans"].is_number());
    assert!(body["active_loans"].is_number());
    assert!(body["overdue_loans"].is_number());

    let response = client
        .get(format!("{}/dashboard/stats", BASE_URL))
        .bearer_auth(&token)
        .send()
        .await
        .expect("Failed to send request");
    assert!(response.status().is_success());
    let body: Value = response.json().await.unwrap();
    assert!(body["totals"]["books"].is_number());
    assert!(body["top_books"].as_array().unwrap().len() <= 5);
    assert!(body["top_users"].as_array().unwrap().len() <= 5);
}

#[tokio::test]
#[ignore]
async fn test_unauthorized_access() {
    let client = Client::new();

    let response = client
        .get(format!("{}/loans", BASE_URL))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), 401);
}
