#![cfg(feature = "testkit")]

use std::sync::Arc;
use std::time::Duration;

use service::storage::MemoryStore;
use service::testkit::*;
use service::{Engine, EngineHandle};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const BOB_PUB: &str =
    "permissions:\n  - user: alice@x.org\n    access: read\nmetadata:\n  description: genomes\n";

async fn daemon_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/status"))
        .and(header("authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "ok",
            "pid": 4242,
            "mode": "online",
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/sync/events"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(": hello\n\n"),
        )
        .mount(&server)
        .await;
    server
}

fn seed(fixture: &DaemonFixture) -> anyhow::Result<()> {
    fixture.mkdir("alice@x.org/public")?;
    fixture.write_file("alice@x.org/notes.md", "# notes")?;
    fixture.write_file("alice@x.org/syft.pub.yaml", "permissions: []\n")?;
    fixture.write_file("bob@y.org/shared/syft.pub.yaml", BOB_PUB)?;
    fixture.write_file("bob@y.org/shared/genome.vcf", "ACGT")?;
    Ok(())
}

fn spawn(fixture: &DaemonFixture) -> anyhow::Result<(EngineHandle, JoinHandle<()>)> {
    let (engine, handle) = Engine::new(
        test_config(),
        Arc::new(fixture.control_plane()),
        Arc::new(MemoryStore::new()),
    )?;
    Ok((handle, tokio::spawn(engine.run())))
}

/// The startup root listing lands before anything else is loaded
async fn wait_for_roots(handle: &EngineHandle) -> anyhow::Result<()> {
    eventually(Duration::from_secs(2), || async {
        Ok(handle
            .snapshot()
            .await?
            .sections
            .sections
            .iter()
            .any(|s| !s.roots.is_empty()))
    })
    .await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn status_poll_reads_daemon_endpoint() -> anyhow::Result<()> {
    timeout(Duration::from_secs(30), async {
        let server = daemon_server().await;
        let fixture = DaemonFixture::new(&server.uri(), "alice@x.org")?;
        seed(&fixture)?;
        let (handle, task) = spawn(&fixture)?;

        eventually(Duration::from_secs(3), || async {
            let status = handle.snapshot().await?.status;
            Ok(status.running && status.pid == Some(4242))
        })
        .await?;

        let status = handle.latest().status;
        assert_eq!(status.mode.as_deref(), Some("online"));
        assert_eq!(status.email.as_deref(), Some("alice@x.org"));
        assert_eq!(
            status.client_url.as_deref().map(|u| u.trim_end_matches('/')),
            Some(server.uri().trim_end_matches('/'))
        );

        handle.shutdown().await?;
        task.await?;
        Ok::<_, anyhow::Error>(())
    })
    .await
    .map_err(|_| anyhow::anyhow!("test timed out"))?
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn toggle_writes_ignore_file() -> anyhow::Result<()> {
    timeout(Duration::from_secs(30), async {
        let server = daemon_server().await;
        let fixture = DaemonFixture::new(&server.uri(), "alice@x.org")?;
        seed(&fixture)?;
        let (handle, task) = spawn(&fixture)?;
        wait_for_roots(&handle).await?;

        let children = handle.list_dir(Some("alice@x.org".to_string())).await?;
        let names: Vec<&str> = children.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["public", "notes.md", "syft.pub.yaml"]);
        assert!(children[2].is_essential);

        handle.toggle_ignore("alice@x.org/notes.md").await?;
        let contents = fixture.read_ignore_file()?;
        assert!(contents.lines().any(|l| l == "alice@x.org/notes.md"));
        let patterns = handle.ignore_patterns().await?;
        assert_eq!(patterns.custom_patterns, vec!["alice@x.org/notes.md".to_string()]);
        assert_eq!(
            patterns.syftignore_path,
            fixture.data_dir().join(".syftignore").to_string_lossy()
        );

        let children = handle.list_dir(Some("alice@x.org".to_string())).await?;
        assert!(children[1].is_ignored);
        assert!(!children[0].is_ignored);

        handle.toggle_ignore("alice@x.org/notes.md").await?;
        let contents = fixture.read_ignore_file()?;
        assert!(!contents.lines().any(|l| l == "alice@x.org/notes.md"));

        handle.shutdown().await?;
        task.await?;
        Ok::<_, anyhow::Error>(())
    })
    .await
    .map_err(|_| anyhow::anyhow!("test timed out"))?
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shared_folder_subscription_round_trip() -> anyhow::Result<()> {
    timeout(Duration::from_secs(30), async {
        let server = daemon_server().await;
        let fixture = DaemonFixture::new(&server.uri(), "alice@x.org")?;
        seed(&fixture)?;
        let (handle, task) = spawn(&fixture)?;

        let shared = handle.shared_with_me().await?;
        assert_eq!(shared.len(), 1);
        assert_eq!(shared[0].owner, "bob@y.org");
        assert_eq!(shared[0].path, "bob@y.org/shared");
        assert_eq!(shared[0].description.as_deref(), Some("genomes"));
        assert!(!shared[0].is_subscribed);

        handle.subscribe_shared("bob@y.org/shared").await?;
        assert!(fixture.read_ignore_file()?.contains("!bob@y.org/shared"));
        assert!(handle.shared_with_me().await?[0].is_subscribed);

        handle.unsubscribe_shared("bob@y.org/shared").await?;
        assert!(!fixture.read_ignore_file()?.contains("!bob@y.org/shared"));

        let details = handle.details("bob@y.org/shared/genome.vcf").await?;
        assert_eq!(details.size, 4);
        assert!(!details.is_ignored);

        handle.shutdown().await?;
        task.await?;
        Ok::<_, anyhow::Error>(())
    })
    .await
    .map_err(|_| anyhow::anyhow!("test timed out"))?
}
