//! End-to-end parse tests against the in-memory storage backend.

use bytes::Bytes;
use formstore::{
    MemoryDriver, MemoryStore, ParserConfig, UploadError, UploadForm, UploadFormOptions,
};
use futures::stream;
use serde_json::json;
use std::io;
use std::sync::Arc;

const BOUNDARY: &str = "---------------------------formstoretest";

enum Part<'a> {
    Field {
        name: &'a str,
        value: &'a str,
    },
    File {
        name: &'a str,
        filename: &'a str,
        content_type: &'a str,
        data: &'a [u8],
    },
}

fn content_type() -> String {
    format!("multipart/form-data; boundary={}", BOUNDARY)
}

fn body(parts: &[Part]) -> Vec<u8> {
    let mut out = Vec::new();
    for part in parts {
        out.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        match part {
            Part::Field { name, value } => {
                out.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name)
                        .as_bytes(),
                );
                out.extend_from_slice(value.as_bytes());
            }
            Part::File {
                name,
                filename,
                content_type,
                data,
            } => {
                out.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                        name, filename
                    )
                    .as_bytes(),
                );
                out.extend_from_slice(format!("Content-Type: {}\r\n\r\n", content_type).as_bytes());
                out.extend_from_slice(data);
            }
        }
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    out
}

fn byte_stream(raw: Vec<u8>, chunk: usize) -> impl futures::Stream<Item = io::Result<Bytes>> {
    let chunks: Vec<io::Result<Bytes>> = raw
        .chunks(chunk)
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect();
    stream::iter(chunks)
}

fn form(store: &MemoryStore) -> UploadForm<MemoryDriver> {
    UploadForm::new(UploadFormOptions {
        db: Some(store.clone()),
        driver: Some(Arc::new(MemoryDriver)),
        ..UploadFormOptions::default()
    })
    .unwrap()
}

#[tokio::test]
async fn parses_text_fields() {
    let store = MemoryStore::new();
    let raw = body(&[
        Part::Field {
            name: "key",
            value: "value",
        },
        Part::Field {
            name: "key2",
            value: "value2",
        },
    ]);

    let outcome = form(&store)
        .parse(&content_type(), byte_stream(raw, 16))
        .await
        .unwrap();

    assert_eq!(outcome.field("key"), Some("value"));
    assert_eq!(outcome.field("key2"), Some("value2"));
    assert_eq!(outcome.fields.len(), 2);
    assert!(outcome.files.is_empty());
    assert!(store.is_empty());
}

#[tokio::test]
async fn repeated_field_names_accumulate() {
    let store = MemoryStore::new();
    let raw = body(&[
        Part::Field {
            name: "tag",
            value: "one",
        },
        Part::Field {
            name: "tag",
            value: "two",
        },
    ]);

    let outcome = form(&store)
        .parse(&content_type(), byte_stream(raw, 32))
        .await
        .unwrap();

    assert_eq!(outcome.fields["tag"], vec!["one", "two"]);
}

#[tokio::test]
async fn stores_a_single_file() {
    let store = MemoryStore::new();
    let payload = b"the quick brown fox".repeat(100);
    let raw = body(&[Part::File {
        name: "file",
        filename: "test.png",
        content_type: "image/png",
        data: &payload,
    }]);

    let outcome = form(&store)
        .parse(&content_type(), byte_stream(raw, 64))
        .await
        .unwrap();

    assert_eq!(outcome.files.len(), 1);
    let stored = &outcome.files[0];
    assert!(!stored.object.id.is_nil());
    assert_eq!(stored.field_name, "file");
    assert_eq!(stored.object.filename, "test.png");
    assert_eq!(stored.object.content_type.as_deref(), Some("image/png"));
    assert_eq!(stored.object.length, payload.len() as i64);

    let blob = store.get(stored.object.id).unwrap();
    assert_eq!(blob.data, payload);
}

#[tokio::test]
async fn same_filename_files_get_distinct_ids() {
    let store = MemoryStore::new();
    let raw = body(&[
        Part::File {
            name: "file",
            filename: "test.png",
            content_type: "image/png",
            data: b"first",
        },
        Part::File {
            name: "file2",
            filename: "test.png",
            content_type: "image/png",
            data: b"second",
        },
        Part::File {
            name: "file3",
            filename: "test.png",
            content_type: "image/png",
            data: b"third",
        },
    ]);

    let outcome = form(&store)
        .parse(&content_type(), byte_stream(raw, 48))
        .await
        .unwrap();

    assert_eq!(outcome.files.len(), 3);
    let mut ids: Vec<_> = outcome.files.iter().map(|f| f.object.id).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 3);
    assert_eq!(store.len(), 3);
    for stored in &outcome.files {
        assert_eq!(stored.object.filename, "test.png");
    }
}

#[tokio::test]
async fn file_begin_hook_records_field_name() {
    let store = MemoryStore::new();
    let raw = body(&[Part::File {
        name: "file",
        filename: "test.png",
        content_type: "image/png",
        data: b"payload",
    }]);

    let mut form = form(&store);
    form.on_file_begin(|name, file| {
        file.metadata = Some(json!({ "name": name }));
    });

    let outcome = form
        .parse(&content_type(), byte_stream(raw, 32))
        .await
        .unwrap();

    let metadata = outcome.files[0].object.metadata.as_ref().unwrap();
    assert_eq!(metadata["name"], "file");
    // the finalized record in storage carries it too
    let blob = store.get(outcome.files[0].object.id).unwrap();
    assert_eq!(blob.object.metadata.unwrap()["name"], "file");
}

#[tokio::test]
async fn combined_fields_and_files_in_submission_order() {
    let store = MemoryStore::new();
    let raw = body(&[
        Part::Field {
            name: "key",
            value: "value",
        },
        Part::File {
            name: "file",
            filename: "test.png",
            content_type: "image/png",
            data: b"a",
        },
        Part::File {
            name: "file1",
            filename: "test.png",
            content_type: "image/png",
            data: b"b",
        },
        Part::File {
            name: "file2",
            filename: "test2.png",
            content_type: "image/png",
            data: b"c",
        },
    ]);

    let mut form = form(&store);
    form.on_file_begin(|name, file| {
        file.metadata = Some(json!({ "name": name }));
    });

    let outcome = form
        .parse(&content_type(), byte_stream(raw, 40))
        .await
        .unwrap();

    assert_eq!(outcome.field("key"), Some("value"));
    assert_eq!(outcome.files.len(), 3);

    let names: Vec<_> = outcome
        .files
        .iter()
        .map(|f| f.field_name.as_str())
        .collect();
    assert_eq!(names, vec!["file", "file1", "file2"]);

    for stored in &outcome.files {
        let metadata = stored.object.metadata.as_ref().unwrap();
        assert_eq!(metadata["name"], stored.field_name.as_str());
    }
    assert_eq!(outcome.files[0].object.filename, "test.png");
    assert_eq!(outcome.files[1].object.filename, "test.png");
    assert_eq!(outcome.files[2].object.filename, "test2.png");

    let mapped = outcome.files_for("file1");
    assert_eq!(mapped.len(), 1);
    assert_eq!(mapped[0].object.filename, "test.png");
}

#[tokio::test]
async fn filename_override_applies_to_next_parse() {
    let store = MemoryStore::new();
    let raw = body(&[Part::File {
        name: "file",
        filename: "original.png",
        content_type: "image/png",
        data: b"bytes",
    }]);

    let mut form = form(&store);
    form.filename = Arc::new(|name: &str| format!("renamed-{}", name));

    let outcome = form
        .parse(&content_type(), byte_stream(raw, 32))
        .await
        .unwrap();

    assert_eq!(outcome.files[0].object.filename, "renamed-original.png");
}

#[tokio::test]
async fn transport_error_leaves_no_partial_files() {
    let store = MemoryStore::new();
    // Full body for one file part, but the transport dies before delivering
    // the second half.
    let raw = body(&[Part::File {
        name: "file",
        filename: "test.png",
        content_type: "image/png",
        data: &b"x".repeat(256),
    }]);
    let half = raw.len() / 2;
    let chunks: Vec<io::Result<Bytes>> = vec![
        Ok(Bytes::copy_from_slice(&raw[..half])),
        Err(io::Error::new(io::ErrorKind::ConnectionReset, "peer reset")),
    ];

    let err = form(&store)
        .parse(&content_type(), stream::iter(chunks))
        .await
        .unwrap_err();

    assert!(matches!(err, UploadError::Transport(_)));
    assert!(store.is_empty());
}

#[tokio::test]
async fn truncated_body_is_malformed() {
    let store = MemoryStore::new();
    let mut raw = body(&[Part::Field {
        name: "key",
        value: "value",
    }]);
    raw.truncate(raw.len() - 10); // lose the closing delimiter

    let err = form(&store)
        .parse(&content_type(), byte_stream(raw, 16))
        .await
        .unwrap_err();

    assert!(matches!(err, UploadError::Malformed(_)));
}

#[tokio::test]
async fn non_multipart_content_type_is_rejected() {
    let store = MemoryStore::new();
    let err = form(&store)
        .parse("application/json", byte_stream(b"{}".to_vec(), 2))
        .await
        .unwrap_err();

    assert!(matches!(err, UploadError::Malformed(_)));
}

#[tokio::test]
async fn parser_limits_pass_through_to_the_parser() {
    let store = MemoryStore::new();
    let big = "x".repeat(256);
    let raw = body(&[Part::Field {
        name: "key",
        value: &big,
    }]);

    let form = UploadForm::new(UploadFormOptions {
        db: Some(store.clone()),
        driver: Some(Arc::new(MemoryDriver)),
        parser: ParserConfig {
            max_field_bytes: 64,
            ..ParserConfig::default()
        },
        ..UploadFormOptions::default()
    })
    .unwrap();

    let err = form
        .parse(&content_type(), byte_stream(raw, 32))
        .await
        .unwrap_err();

    assert!(matches!(err, UploadError::Malformed(_)));
    assert!(store.is_empty());
}
