//! Integration tests for the collectors
//!
//! Container collectors run against a fake runtime listening on a Unix
//! socket in a temp directory, so no real container engine is needed.

mod fake_runtime_tests {
    use crate::collector::frame::encode_frame;
    use crate::collector::{
        Collector, ContainerLogCollector, ContainerLogConfig, ContainerMetricsCollector,
        DockerClient,
    };
    use crate::models::{LogLevel, LogSource};
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::UnixListener;

    const WEB_ID: &str = "aaaaaaaaaaaa1111111111111111111111111111111111111111111111111111";
    const DB_ID: &str = "bbbbbbbbbbbb2222222222222222222222222222222222222222222222222222";

    /// Canned runtime that records every request path it serves
    struct FakeRuntime {
        socket: PathBuf,
        requests: Arc<Mutex<Vec<String>>>,
        _dir: TempDir,
    }

    impl FakeRuntime {
        fn requests(&self) -> Vec<String> {
            self.requests.lock().unwrap().clone()
        }

        fn client(&self) -> Arc<DockerClient> {
            Arc::new(DockerClient::new(&self.socket))
        }
    }

    fn container_list() -> Vec<u8> {
        format!(
            r#"[
                {{"Id":"{}","Names":["/web"],"Image":"nginx:latest","State":"running","Created":1704067200}},
                {{"Id":"{}","Names":["/db"],"Image":"postgres:16","State":"exited","Created":1704067100}}
            ]"#,
            WEB_ID, DB_ID
        )
        .into_bytes()
    }

    fn stats_body() -> Vec<u8> {
        br#"{
            "cpu_stats": {"cpu_usage": {"total_usage": 400}, "system_cpu_usage": 3000},
            "precpu_stats": {"cpu_usage": {"total_usage": 200}, "system_cpu_usage": 2000},
            "memory_stats": {"usage": 512, "limit": 2048}
        }"#
        .to_vec()
    }

    fn logs_body() -> Vec<u8> {
        let mut body = encode_frame(1, b"2024-01-01T12:00:00.000000000Z Server started\n");
        body.extend(encode_frame(
            2,
            b"2024-01-01T12:00:05.000000000Z upstream timed out\n",
        ));
        body.extend(encode_frame(1, b"\n"));
        body
    }

    fn route(path: &str) -> (u16, Vec<u8>) {
        if path.starts_with("/containers/json") {
            (200, container_list())
        } else if path.contains("/stats") && path.contains(WEB_ID) {
            (200, stats_body())
        } else if path.contains("/logs") {
            (200, logs_body())
        } else {
            (404, br#"{"message":"page not found"}"#.to_vec())
        }
    }

    async fn start_fake_runtime() -> FakeRuntime {
        let dir = TempDir::new().unwrap();
        let socket = dir.path().join("docker.sock");
        let listener = UnixListener::bind(&socket).unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));

        let seen = Arc::clone(&requests);
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let seen = Arc::clone(&seen);
                tokio::spawn(async move {
                    let mut head = Vec::new();
                    let mut chunk = [0u8; 1024];
                    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                        match stream.read(&mut chunk).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => head.extend_from_slice(&chunk[..n]),
                        }
                    }

                    let head = String::from_utf8_lossy(&head);
                    let path = head.split_whitespace().nth(1).unwrap_or("/").to_string();
                    seen.lock().unwrap().push(path.clone());

                    let (status, body) = route(&path);
                    let mut response =
                        format!("HTTP/1.0 {} OK\r\nContent-Type: application/json\r\n\r\n", status)
                            .into_bytes();
                    response.extend(body);
                    let _ = stream.write_all(&response).await;
                    let _ = stream.shutdown().await;
                });
            }
        });

        FakeRuntime {
            socket,
            requests,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn test_container_metrics_for_running_containers() {
        let runtime = start_fake_runtime().await;
        let collector = ContainerMetricsCollector::new(runtime.client());

        let report = collector.collect_report().await;

        assert_eq!(report.containers.len(), 2);
        assert_eq!(report.containers[0].container_name, "web");
        assert_eq!(report.containers[1].status, "exited");

        // Only the running container is sampled
        assert_eq!(report.metrics.len(), 2);
        let cpu = report
            .metrics
            .iter()
            .find(|m| m.metric_type == "docker_cpu")
            .unwrap();
        assert!((cpu.value - 20.0).abs() < 1e-9);
        assert_eq!(cpu.metadata["containerName"], "web");

        let memory = report
            .metrics
            .iter()
            .find(|m| m.metric_type == "docker_memory")
            .unwrap();
        assert!((memory.value - 25.0).abs() < 1e-9);
        assert_eq!(memory.metadata["limit"], 2048);

        let requests = runtime.requests();
        assert!(requests.iter().any(|p| p == "/containers/json?all=1"));
        assert!(!requests.iter().any(|p| p.contains(DB_ID)));
    }

    #[tokio::test]
    async fn test_container_logs_advance_high_water_mark() {
        let runtime = start_fake_runtime().await;
        let collector = ContainerLogCollector::new(runtime.client(), ContainerLogConfig::default());

        let records = collector.collect().await;

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].message, "Server started");
        assert_eq!(records[0].level, LogLevel::Info);
        assert_eq!(records[0].source, LogSource::Container);
        assert_eq!(records[0].metadata["containerId"], "aaaaaaaaaaaa");
        assert_eq!(records[1].level, LogLevel::Error);
        assert_eq!(records[1].metadata["streamType"], "stderr");

        // 2024-01-01T12:00:05Z
        assert_eq!(collector.last_seen("aaaaaaaaaaaa"), Some(1704110405));

        collector.collect().await;
        let requests = runtime.requests();
        let log_requests: Vec<&String> = requests.iter().filter(|p| p.contains("/logs")).collect();
        assert_eq!(log_requests.len(), 2);
        assert!(log_requests[0].contains("tail=50"));
        assert!(log_requests[1].contains("since=1704110405"));
    }

    #[tokio::test]
    async fn test_missing_socket_yields_nothing() {
        let dir = TempDir::new().unwrap();
        let docker = Arc::new(DockerClient::new(dir.path().join("absent.sock")));

        assert!(!docker.is_available().await);
        assert!(ContainerMetricsCollector::new(Arc::clone(&docker))
            .collect()
            .await
            .is_empty());
        assert!(
            ContainerLogCollector::new(docker, ContainerLogConfig::default())
                .collect()
                .await
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_runtime_error_status_is_reported() {
        let runtime = start_fake_runtime().await;
        let err = runtime
            .client()
            .container_stats("no-such-container")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("404"));
    }
}

mod host_log_tests {
    use crate::collector::{tail_lines, Collector, HostLogCollector, HostLogConfig};
    use crate::models::{LogLevel, LogSource};
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::fs;

    fn config_without_journal(dir: &TempDir, fallback: Vec<PathBuf>) -> HostLogConfig {
        HostLogConfig {
            window: Duration::from_secs(300),
            max_lines: 3,
            journalctl: dir.path().join("no-such-journalctl"),
            fallback_paths: fallback,
        }
    }

    #[tokio::test]
    async fn test_fallback_tails_first_existing_file() {
        let dir = TempDir::new().unwrap();
        let syslog = dir.path().join("syslog");
        fs::write(
            &syslog,
            "boot ok\nkernel: disk error on sda\n\nservice warn: slow start\nall quiet\n",
        )
        .await
        .unwrap();

        let config =
            config_without_journal(&dir, vec![dir.path().join("missing"), syslog.clone()]);
        let collector = HostLogCollector::new(config);
        let records = collector.collect().await;

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].message, "kernel: disk error on sda");
        assert_eq!(records[0].level, LogLevel::Error);
        assert_eq!(records[1].level, LogLevel::Warning);
        assert_eq!(records[2].level, LogLevel::Info);
        assert!(records.iter().all(|r| r.source == LogSource::System));
    }

    #[tokio::test]
    async fn test_no_log_source_yields_nothing() {
        let dir = TempDir::new().unwrap();
        let config = config_without_journal(&dir, vec![dir.path().join("missing")]);
        let collector = HostLogCollector::new(config);

        assert!(collector.collect().await.is_empty());
        assert!(collector.last_seen().await.is_none());
    }

    /// Stand-in journalctl that records its arguments and always prints
    /// the same two entries, like a `--since` with whole-second resolution
    async fn fake_journalctl(dir: &Path, args_log: &Path) -> PathBuf {
        let script = dir.join("journalctl");
        let body = format!(
            r#"#!/bin/sh
echo "$@" >> "{}"
if [ "$1" = "--version" ]; then
  exit 0
fi
echo '{{"MESSAGE":"first","PRIORITY":"6","__REALTIME_TIMESTAMP":"1704110400000000"}}'
echo '{{"MESSAGE":"second","PRIORITY":"4","__REALTIME_TIMESTAMP":"1704110401500000"}}'
"#,
            args_log.display()
        );
        fs::write(&script, body).await.unwrap();
        fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755))
            .await
            .unwrap();
        script
    }

    #[tokio::test]
    async fn test_journal_mark_bounds_next_query() {
        let dir = TempDir::new().unwrap();
        let args_log = dir.path().join("args.log");
        let config = HostLogConfig {
            window: Duration::from_secs(300),
            max_lines: 100,
            journalctl: fake_journalctl(dir.path(), &args_log).await,
            fallback_paths: Vec::new(),
        };
        let collector = HostLogCollector::new(config);

        let first = collector.collect().await;
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].message, "first");
        assert_eq!(first[1].level, LogLevel::Warning);
        assert!(first.iter().all(|r| r.source == LogSource::System));

        let mark = collector.last_seen().await.unwrap();
        assert_eq!(mark.timestamp_millis(), 1_704_110_401_500);

        // Same entries again; both are at or before the mark
        let second = collector.collect().await;
        assert!(second.is_empty());
        assert_eq!(collector.last_seen().await, Some(mark));

        let args = fs::read_to_string(&args_log).await.unwrap();
        let calls: Vec<&str> = args.lines().collect();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0], "--version");
        assert!(calls[1].starts_with("--since=@"));
        assert!(calls[1].contains("-o json -n 100 --no-pager"));
        assert!(calls[2].starts_with("--since=@1704110401 "));
    }

    #[tokio::test]
    async fn test_tail_lines_large_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("big.log");
        let mut content = String::new();
        for i in 0..20_000 {
            content.push_str(&format!("line number {}\n", i));
        }
        fs::write(&path, content).await.unwrap();

        let lines = tail_lines(&path, 2).await.unwrap();
        assert_eq!(lines, vec!["line number 19998", "line number 19999"]);
    }
}
