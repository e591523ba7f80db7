use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::json;
use std::fs::write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::{tempdir, NamedTempFile};
use tracing_subscriber::prelude::*; // needed for .with()
use tracing_subscriber::{layer::Context, Layer, Registry};
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn umbrella_sync() -> Command {
    let mut cmd = Command::cargo_bin("umbrella-sync").expect("Binary exists");
    // The default log file lands in the working directory.
    cmd.env_remove("UMBRELLA_KEY")
        .env_remove("UMBRELLA_SECRET")
        .current_dir(std::env::temp_dir());
    cmd
}

fn config_with(yaml: &str) -> NamedTempFile {
    let config = NamedTempFile::new().expect("Creating temp config file failed");
    write(config.path(), yaml).expect("Writing temp config failed");
    config
}

#[test]
fn config_set_get_and_clear_round_trip() {
    let dir = tempdir().unwrap();
    let config = dir.path().join("config.yaml");

    umbrella_sync()
        .args(["config", "set", "apiversion", "2", "--config"])
        .arg(&config)
        .assert()
        .success();
    umbrella_sync()
        .args(["config", "set", "files", "/srv/feeds/tor.txt", "--config"])
        .arg(&config)
        .assert()
        .success();

    umbrella_sync()
        .args(["config", "get", "apiversion", "--config"])
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::diff("v2\n"));
    umbrella_sync()
        .args(["config", "get", "files", "--config"])
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("/srv/feeds/tor.txt"));

    umbrella_sync()
        .args(["config", "clear", "files", "--config"])
        .arg(&config)
        .assert()
        .success();
    umbrella_sync()
        .args(["config", "get", "files", "--config"])
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::diff("\n"));
}

#[test]
fn config_rejects_unknown_key() {
    let config = config_with("");
    umbrella_sync()
        .args(["config", "get", "nosuchkey", "--config"])
        .arg(config.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid value"));
}

#[test]
fn sync_fails_without_config_file() {
    let dir = tempdir().unwrap();
    umbrella_sync()
        .arg("sync")
        .arg("--config")
        .arg(dir.path().join("absent.yaml"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn sync_fails_without_credentials() {
    let config = config_with("files:\n  - feeds.txt\n");
    umbrella_sync()
        .arg("sync")
        .arg("--config")
        .arg(config.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("API key missing"));
}

fn write_feed(dir: &Path, name: &str, lines: &str) -> PathBuf {
    let path = dir.join(name);
    write(&path, lines).unwrap();
    path
}

#[tokio::test(flavor = "multi_thread")]
async fn sync_cli_happy_flow_against_mock_api() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/v2/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "tok",
            "expires_in": 3600
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/policies/v2/destinationlists"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": {"code": 200, "text": "OK"},
            "meta": {"page": 1, "limit": 100, "total": 1},
            "data": [{"id": 15, "name": "SOC Block feeds", "access": "block", "isGlobal": false}]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/policies/v2/destinationlists/15/destinations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": {"code": 200, "text": "OK"},
            "meta": {"page": 1, "limit": 100, "total": 1},
            "data": [{"id": "9", "destination": "stale.example", "type": "domain"}]
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/policies/v2/destinationlists/15/destinations"))
        .and(body_json(json!([{"destination": "a.com"}, {"destination": "b.com"}])))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": {"code": 200, "text": "OK"},
            "data": {"id": 15, "name": "SOC Block feeds", "meta": {"destinationCount": 3}}
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/policies/v2/destinationlists/15/destinations/remove"))
        .and(body_json(json!([9])))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": {"code": 200, "text": "OK"},
            "data": {"id": 15, "name": "SOC Block feeds", "meta": {"destinationCount": 2}}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    let feed = write_feed(dir.path(), "feeds.txt", "a.com\n1.2.3.4\n\nb.com\n");
    let log = dir.path().join("umbrellasync.log");
    write(&log, "earlier run\n").unwrap();
    let config = dir.path().join("config.yaml");
    write(
        &config,
        format!(
            "apihostname: {}\napiversion: v2\nkey: key\nsecret: secret\npausesecs: 0\nfiles:\n  - {}\n",
            server.uri(),
            feed.display()
        ),
    )
    .unwrap();

    let log_arg = log.clone();
    let output = tokio::task::spawn_blocking(move || {
        umbrella_sync()
            .arg("sync")
            .arg("--config")
            .arg(&config)
            .arg("--log")
            .arg(&log_arg)
            .output()
            .expect("binary runs")
    })
    .await
    .unwrap();

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(output.status.success(), "sync failed: {stderr}");
    assert!(stderr.contains("Synchronisation complete"), "{stderr}");

    let logged = std::fs::read_to_string(&log).unwrap();
    assert!(logged.starts_with("earlier run\n"), "log was truncated: {logged}");
    assert!(logged.contains("[SYNC] Computed delta"), "{logged}");
    assert!(logged.contains("Synchronisation complete"), "{logged}");
    assert!(!logged.contains('\u{1b}'), "log file should carry no ANSI codes");
}

#[test]
fn log_file_is_created_and_receives_events() {
    let dir = tempdir().unwrap();
    let log = dir.path().join("run.log");
    umbrella_sync()
        .arg("sync")
        .arg("--config")
        .arg(dir.path().join("absent.yaml"))
        .arg("--log")
        .arg(&log)
        .assert()
        .failure();

    let logged = std::fs::read_to_string(&log).expect("log file created");
    assert!(logged.contains("trace_initialised"), "{logged}");
    assert!(logged.contains("CLI exited with error"), "{logged}");
}

/// Custom Layer to collect emitted event messages.
struct EventCollector {
    events: Arc<Mutex<Vec<String>>>,
}

impl<S> Layer<S> for EventCollector
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        self.events.lock().unwrap().push(format!("{event:?}"));
    }
}

#[tokio::test]
async fn emits_trace_initialised_event() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let collector = EventCollector {
        events: events.clone(),
    };
    let subscriber = Registry::default().with(collector);
    let _guard = tracing::subscriber::set_default(subscriber);

    use umbrella_sync::cli::{run, Cli, Commands};

    // A config path that does not exist; the run fails after emitting its first event.
    let cli = Cli {
        config: Some(PathBuf::from("dummy.yaml")),
        log: PathBuf::from("umbrellasync.log"),
        command: Commands::Sync,
    };

    let result = run(cli).await;
    assert!(result.is_err());

    let event_msgs = events.lock().unwrap();
    assert!(
        event_msgs.iter().any(|msg| msg.contains("trace_initialised")),
        "Expected a 'trace_initialised' trace event, got: {:?}",
        event_msgs
    );
}
