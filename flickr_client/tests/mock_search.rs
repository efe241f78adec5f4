use flickr_client::{FlickrClient, FlickrError};
use mockito::{Matcher, Server};

const OK_BODY: &str = r#"{
    "photos": {
        "page": 1, "pages": 3, "perpage": 21, "total": "60",
        "photo": [
            {"id": "1", "url_m": "https://img.example/1.jpg"},
            {"id": "2", "url_m": "https://img.example/2.jpg"}
        ]
    },
    "stat": "ok"
}"#;

#[tokio::test]
async fn search_extracts_urls_and_page_count() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/")
        .match_query(Matcher::UrlEncoded(
            "method".into(),
            "flickr.photos.search".into(),
        ))
        .with_status(200)
        .with_body(OK_BODY)
        .create_async()
        .await;

    let client = FlickrClient::with_base_url("key".into(), server.url());
    let page = client.search(40.0, -73.0, None).await.unwrap();

    assert_eq!(page.total_pages, 3);
    assert_eq!(
        page.photo_urls,
        vec!["https://img.example/1.jpg", "https://img.example/2.jpg"]
    );
    mock.assert_async().await;
}

#[tokio::test]
async fn search_sends_the_bounding_box() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/")
        .match_query(Matcher::UrlEncoded("bbox".into(), "-74,39,-72,41".into()))
        .with_status(200)
        .with_body(OK_BODY)
        .create_async()
        .await;

    let client = FlickrClient::with_base_url("key".into(), server.url());
    client.search(40.0, -73.0, None).await.unwrap();
    mock.assert_async().await;
}

#[tokio::test]
async fn service_failure_is_surfaced() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("GET", "/")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(r#"{"stat": "fail", "code": 100, "message": "Invalid API Key"}"#)
        .create_async()
        .await;

    let client = FlickrClient::with_base_url("key".into(), server.url());
    let err = client.search(40.0, -73.0, None).await.unwrap_err();
    assert!(matches!(err, FlickrError::ServiceError(_)));
}

#[tokio::test]
async fn http_error_status_is_a_network_error() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("GET", "/")
        .match_query(Matcher::Any)
        .with_status(500)
        .with_body("server down")
        .create_async()
        .await;

    let client = FlickrClient::with_base_url("key".into(), server.url());
    let err = client.search(40.0, -73.0, None).await.unwrap_err();
    assert!(matches!(err, FlickrError::NetworkError(_)));
}

#[tokio::test]
async fn missing_photos_object_is_a_parse_error() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("GET", "/")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(r#"{"stat": "ok"}"#)
        .create_async()
        .await;

    let client = FlickrClient::with_base_url("key".into(), server.url());
    let err = client.search(40.0, -73.0, None).await.unwrap_err();
    assert!(matches!(err, FlickrError::ParseError(_)));
}

#[tokio::test]
async fn random_album_issues_two_requests() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(OK_BODY)
        .expect(2)
        .create_async()
        .await;

    let client = FlickrClient::with_base_url("key".into(), server.url());
    client.seed_rng(0);
    let page = client.random_album(40.0, -73.0).await.unwrap();

    assert_eq!(page.photo_urls.len(), 2);
    mock.assert_async().await;
}

#[tokio::test]
async fn random_album_with_zero_pages_is_empty() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(r#"{"photos": {"page": 1, "pages": 0, "perpage": 21, "total": "0", "photo": []}, "stat": "ok"}"#)
        .expect(1)
        .create_async()
        .await;

    let client = FlickrClient::with_base_url("key".into(), server.url());
    let page = client.random_album(0.0, 0.0).await.unwrap();

    assert!(page.photo_urls.is_empty());
    mock.assert_async().await;
}

#[tokio::test]
async fn download_photo_returns_bytes() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/img/1.jpg")
        .with_status(200)
        .with_body(vec![7u8, 8, 9])
        .expect(1)
        .create_async()
        .await;

    let client = FlickrClient::with_base_url("key".into(), server.url());
    let bytes = client
        .download_photo(&format!("{}/img/1.jpg", server.url()))
        .await
        .unwrap();

    assert_eq!(bytes, vec![7, 8, 9]);
    mock.assert_async().await;
}

#[tokio::test]
async fn download_photo_404_is_a_network_error() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("GET", "/img/gone.jpg")
        .with_status(404)
        .create_async()
        .await;

    let client = FlickrClient::with_base_url("key".into(), server.url());
    let err = client
        .download_photo(&format!("{}/img/gone.jpg", server.url()))
        .await
        .unwrap_err();

    assert!(matches!(err, FlickrError::NetworkError(_)));
}
