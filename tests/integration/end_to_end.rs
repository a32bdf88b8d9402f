//! Integration test: full client → proxy → worker pipeline.

use skiff_integration_tests::{StagingCluster, test_data_seeded};
use skiff_net::{Channel, FileOp, OpReply, ReadSpan, TcpChannel, WireRequest};
use skiff_types::{FaultKind, RouteHeaders};
use tempfile::TempDir;

fn path_str(dir: &TempDir, name: &str) -> String {
    dir.path().join(name).to_string_lossy().into_owned()
}

#[tokio::test]
async fn test_write_and_read_through_proxy() {
    let c = StagingCluster::new(3).await;
    let dir = TempDir::new().unwrap();
    let path = path_str(&dir, "roundtrip.dat");
    let data = test_data_seeded(40_000, 7);

    let reply = c
        .call(
            "alice",
            c.worker(1),
            FileOp::WriteFile {
                path: path.clone(),
                data: data.clone(),
                overwrite: false,
            },
        )
        .await
        .unwrap();
    assert_eq!(reply, OpReply::Done);

    let reply = c
        .call(
            "alice",
            c.worker(1),
            FileOp::ReadFile {
                path,
                span: ReadSpan::All,
            },
        )
        .await
        .unwrap();
    assert_eq!(reply, OpReply::Data(data));
}

#[tokio::test]
async fn test_tail_and_head_through_proxy() {
    let c = StagingCluster::new(1).await;
    let dir = TempDir::new().unwrap();
    let path = path_str(&dir, "job.log");
    std::fs::write(&path, b"first\r\nsecond\r\nthird\r\n").unwrap();

    let reply = c
        .call(
            "alice",
            c.worker(0),
            FileOp::ReadFile {
                path: path.clone(),
                span: ReadSpan::Tail(2),
            },
        )
        .await
        .unwrap();
    assert_eq!(reply, OpReply::Data(b"second\r\nthird\r\n".to_vec()));

    let reply = c
        .call(
            "alice",
            c.worker(0),
            FileOp::ReadFile {
                path,
                span: ReadSpan::Head(1),
            },
        )
        .await
        .unwrap();
    assert_eq!(reply, OpReply::Data(b"first\r\n".to_vec()));
}

#[tokio::test]
async fn test_authentication_is_enforced_at_the_proxy() {
    let c = StagingCluster::new(1).await;

    let err = c
        .call("mallory", c.worker(0), FileOp::KeepAlive)
        .await
        .unwrap_err();
    assert_eq!(err.kind, FaultKind::AuthenticationFailed);
}

#[tokio::test]
async fn test_read_only_user_cannot_write_through_proxy() {
    let c = StagingCluster::new(1).await;
    let dir = TempDir::new().unwrap();
    let path = path_str(&dir, "blocked.txt");

    let err = c
        .call(
            "viewer",
            c.worker(0),
            FileOp::WriteFile {
                path: path.clone(),
                data: b"nope".to_vec(),
                overwrite: true,
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind, FaultKind::NotAuthorized);
    assert!(!std::path::Path::new(&path).exists());
}

#[tokio::test]
async fn test_enumerate_and_delete_through_proxy() {
    let c = StagingCluster::new(2).await;
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("out-1.log"), b"x").unwrap();
    std::fs::write(dir.path().join("out-2.log"), b"x").unwrap();
    std::fs::write(dir.path().join("readme.md"), b"x").unwrap();
    let dir_path = dir.path().to_string_lossy().into_owned();

    let reply = c
        .call(
            "bob",
            c.worker(0),
            FileOp::GetFiles {
                path: dir_path.clone(),
                pattern: Some("out-?.log".to_string()),
            },
        )
        .await
        .unwrap();
    let OpReply::Entries(entries) = reply else {
        panic!("expected entries");
    };
    let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["out-1.log", "out-2.log"]);

    c.call(
        "bob",
        c.worker(0),
        FileOp::DeleteFile {
            path: dir.path().join("out-1.log").to_string_lossy().into_owned(),
        },
    )
    .await
    .unwrap();
    assert!(!dir.path().join("out-1.log").exists());
}

/// Stage a file out through one node and back in through another: both
/// workers derive the same container for the same user, so the blob is
/// visible cluster-wide.
#[tokio::test]
async fn test_blob_staging_across_nodes() {
    let c = StagingCluster::new(2).await;
    let dir = TempDir::new().unwrap();
    let src = path_str(&dir, "result.dat");
    let dst = path_str(&dir, "fetched.dat");
    let data = test_data_seeded(10_000, 21);
    std::fs::write(&src, &data).unwrap();

    c.call(
        "alice",
        c.worker(0),
        FileOp::CopyFileToBlob {
            path: src,
            blob: "job-3/result.dat".to_string(),
        },
    )
    .await
    .unwrap();

    c.call(
        "alice",
        c.worker(1),
        FileOp::CopyFileFromBlob {
            path: dst.clone(),
            blob: "job-3/result.dat".to_string(),
        },
    )
    .await
    .unwrap();
    assert_eq!(std::fs::read(&dst).unwrap(), data);
}

/// A request that reaches the wrong worker gets bounced back through the
/// proxy to the right one, transparently to the client.
#[tokio::test]
async fn test_worker_forwards_misrouted_request() {
    let c = StagingCluster::new(2).await;
    let dir = TempDir::new().unwrap();
    let path = path_str(&dir, "hop.txt");
    std::fs::write(&path, b"found me").unwrap();

    // Talk to worker 1 directly, but address the request to worker 0.
    let channel = TcpChannel::connect(c.worker(1), c.worker_addr(1)).await.unwrap();
    let reply = channel
        .call(&WireRequest {
            headers: RouteHeaders::addressed_to(c.worker(0), "alice"),
            op: FileOp::ReadFile {
                path,
                span: ReadSpan::All,
            },
        })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reply, OpReply::Data(b"found me".to_vec()));
    channel.close().await;
}
