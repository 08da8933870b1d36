use super::common::{create_test_client, spawn_test_server, test_collab, test_url};

#[tokio::test]
async fn health_endpoint_reports_ok_with_no_open_rooms() {
    let collab = test_collab().await;
    let addr = spawn_test_server(collab).await;
    let client = create_test_client();

    let response = client
        .get(test_url(addr, "/health"))
        .send()
        .await
        .expect("health request should succeed");

    assert!(response.status().is_success());
    let body: serde_json::Value = response.json().await.expect("health body is JSON");
    assert_eq!(body["status"], "ok");
    assert_eq!(body["open_rooms"], 0);
}
