//! Chunked upload against a mock drive endpoint

mod common;

use bitable_client::{checksum, ClientError, ParentType};
use common::{client, form_field, mount_token, ok};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const MIB: usize = 1024 * 1024;
const PREPARE: &str = "/drive/v1/medias/upload_prepare";
const PART: &str = "/drive/v1/medias/upload_part";
const FINISH: &str = "/drive/v1/medias/upload_finish";

async fn mount_session(server: &MockServer, block_size: usize, block_num: u32) {
    Mock::given(method("POST"))
        .and(path(PREPARE))
        .respond_with(ok(json!({
            "upload_id": "up-42",
            "block_size": block_size,
            "block_num": block_num
        })))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_ten_mib_file_in_three_parts() {
    let server = MockServer::start().await;
    mount_token(&server, "t-up").await;
    mount_session(&server, 4 * MIB, 3).await;

    Mock::given(method("POST"))
        .and(path(PART))
        .and(header("Authorization", "Bearer t-up"))
        .respond_with(ok(json!({})))
        .expect(3)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path(FINISH))
        .and(body_partial_json(json!({ "upload_id": "up-42", "block_num": 3 })))
        .respond_with(ok(json!({ "file_token": "boxcnDONE" })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("survey.bin");
    let data: Vec<u8> = (0..10 * MIB).map(|i| (i % 253) as u8).collect();
    std::fs::write(&file, &data).unwrap();

    let file_token = client(&server)
        .upload_file(&file, &ParentType::BitableFile, "bascnAPP")
        .await
        .unwrap();
    assert_eq!(file_token, "boxcnDONE");

    let requests = server.received_requests().await.unwrap();
    let prepare: serde_json::Value = serde_json::from_slice(
        &requests.iter().find(|r| r.url.path() == PREPARE).unwrap().body,
    )
    .unwrap();
    assert_eq!(prepare["file_name"], "survey.bin");
    assert_eq!(prepare["size"], 10 * MIB);
    assert_eq!(prepare["parent_type"], "bitable_file");

    let parts: Vec<_> = requests.iter().filter(|r| r.url.path() == PART).collect();
    let expected_sizes = [4 * MIB, 4 * MIB, 2 * MIB];
    let mut offset = 0;
    for (seq, (part, size)) in parts.iter().zip(expected_sizes).enumerate() {
        assert_eq!(form_field(&part.body, "upload_id").as_deref(), Some("up-42"));
        assert_eq!(form_field(&part.body, "seq"), Some(seq.to_string()));
        assert_eq!(form_field(&part.body, "size"), Some(size.to_string()));
        assert_eq!(
            form_field(&part.body, "checksum"),
            Some(checksum(&data[offset..offset + size]).to_string())
        );
        offset += size;
    }
    assert_eq!(offset, data.len());

    assert_eq!(requests.last().unwrap().url.path(), FINISH);
}

#[tokio::test]
async fn test_failed_part_retried_with_same_checksum() {
    let server = MockServer::start().await;
    mount_token(&server, "t-up").await;
    mount_session(&server, 8, 2).await;

    Mock::given(method("POST"))
        .and(path(PART))
        .respond_with(ResponseTemplate::new(502).set_body_string("Bad Gateway"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path(PART))
        .respond_with(ok(json!({})))
        .expect(2)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path(FINISH))
        .respond_with(ok(json!({ "file_token": "boxcnRETRY" })))
        .expect(1)
        .mount(&server)
        .await;

    let file_token = client(&server)
        .upload_bytes(b"0123456789abc".to_vec(), "notes.txt", &ParentType::default(), "bascnAPP")
        .await
        .unwrap();
    assert_eq!(file_token, "boxcnRETRY");

    let requests = server.received_requests().await.unwrap();
    let parts: Vec<_> = requests.iter().filter(|r| r.url.path() == PART).collect();
    assert_eq!(parts.len(), 3);
    assert_eq!(form_field(&parts[0].body, "seq"), form_field(&parts[1].body, "seq"));
    assert_eq!(
        form_field(&parts[0].body, "checksum"),
        form_field(&parts[1].body, "checksum")
    );
    assert_eq!(form_field(&parts[2].body, "size").as_deref(), Some("5"));
}

#[tokio::test]
async fn test_missing_source_sends_nothing() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    let err = client(&server)
        .upload_file(dir.path().join("absent.pdf"), &ParentType::default(), "bascnAPP")
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::Io(_)));
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_part_rejection_is_not_retried() {
    let server = MockServer::start().await;
    mount_token(&server, "t-up").await;
    mount_session(&server, 8, 1).await;

    Mock::given(method("POST"))
        .and(path(PART))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 1061043,
            "msg": "file size beyond limit"
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path(FINISH))
        .respond_with(ok(json!({ "file_token": "never" })))
        .expect(0)
        .mount(&server)
        .await;

    let err = client(&server)
        .upload_bytes(b"tiny".to_vec(), "tiny.txt", &ParentType::default(), "bascnAPP")
        .await
        .unwrap_err();

    assert_eq!(err.api_code(), Some(1061043));
}
