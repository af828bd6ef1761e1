use std::collections::HashMap;
use std::time::Duration;

use batch_downloader::downloader::{
    BackendKind, Orchestrator, OrchestratorConfig, OrchestratorEvent, Task, TaskState,
};
use tokio::sync::broadcast;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fallback_config(dir: &std::path::Path, limit: usize) -> OrchestratorConfig {
    let mut config = OrchestratorConfig::new(dir);
    config.concurrency_limit = limit;
    config.poll_interval = Duration::from_millis(20);
    config.resolve_links = false;
    config.probe_sizes = false;
    // 指向一个不存在的 aria2，强制走内置下载器
    config.aria2.rpc_url = "http://127.0.0.1:9/jsonrpc".to_string();
    config.aria2.binary = "/nonexistent/aria2c".to_string();
    config.aria2.launch_attempts = 1;
    config.aria2.launch_interval = Duration::from_millis(10);
    config
}

fn drain(rx: &mut broadcast::Receiver<OrchestratorEvent>) -> Vec<OrchestratorEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn body_of(i: usize) -> Vec<u8> {
    format!("file-{}-", i).repeat(1000).into_bytes()
}

#[tokio::test]
async fn test_fallback_downloads_all_files_within_limit() {
    let server = MockServer::start().await;
    for i in 1..=5 {
        Mock::given(method("GET"))
            .and(path(format!("/files/a{}.bin", i)))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(body_of(i))
                    .set_delay(Duration::from_millis(150)),
            )
            .mount(&server)
            .await;
    }

    let dir = tempfile::tempdir().unwrap();
    let urls: Vec<String> = (1..=5)
        .map(|i| format!("{}/files/a{}.bin", server.uri(), i))
        .collect();

    let orchestrator = Orchestrator::new(fallback_config(dir.path(), 2), Task::from_urls(urls));
    let mut rx = orchestrator.subscribe();
    orchestrator.start().await.unwrap();

    let summary = tokio::time::timeout(Duration::from_secs(10), orchestrator.wait())
        .await
        .expect("下载超时");
    assert_eq!(summary.completed, 5);
    assert_eq!(orchestrator.backend_kind(), Some(BackendKind::Fallback));

    let events = drain(&mut rx);
    let unavailable = events
        .iter()
        .filter(|e| matches!(e, OrchestratorEvent::DaemonUnavailable { .. }))
        .count();
    assert_eq!(unavailable, 1);

    // 根据状态事件回放同时处于 Downloading 的任务数
    let mut downloading: HashMap<usize, bool> = HashMap::new();
    let mut max_active = 0;
    for event in &events {
        if let OrchestratorEvent::StateChanged { task_id, to, .. } = event {
            downloading.insert(*task_id, *to == TaskState::Downloading);
            max_active = max_active.max(downloading.values().filter(|d| **d).count());
        }
    }
    assert!(max_active <= 2, "同时下载数超过上限: {}", max_active);

    for (i, task) in orchestrator.snapshot().await.iter().enumerate() {
        assert_eq!(task.state, TaskState::Completed);
        assert_eq!(task.progress_percent, 100);
        let written = tokio::fs::read(dir.path().join(format!("a{}.bin", i + 1)))
            .await
            .unwrap();
        assert_eq!(written, body_of(i + 1));
    }
}

#[tokio::test]
async fn test_fallback_http_error_marks_task_failed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/files/ok.bin"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ok".to_vec()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/files/missing.bin"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let mut config = fallback_config(dir.path(), 2);
    config.aria2.enabled = false;

    let urls = vec![
        format!("{}/files/missing.bin", server.uri()),
        format!("{}/files/ok.bin", server.uri()),
    ];
    let orchestrator = Orchestrator::new(config, Task::from_urls(urls));
    orchestrator.start().await.unwrap();
    let summary = tokio::time::timeout(Duration::from_secs(10), orchestrator.wait())
        .await
        .expect("下载超时");

    assert_eq!(summary.completed, 1);
    assert_eq!(summary.failed, 1);

    let tasks = orchestrator.snapshot().await;
    assert_eq!(tasks[0].state, TaskState::Error);
    assert!(tasks[0].error.as_deref().unwrap().contains("404"));
    assert_eq!(tasks[1].state, TaskState::Completed);
}

#[tokio::test]
async fn test_stop_all_cancels_running_transfers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(vec![0u8; 1024])
                .set_delay(Duration::from_secs(30)),
        )
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let mut config = fallback_config(dir.path(), 2);
    config.aria2.enabled = false;

    let urls: Vec<String> = (1..=3)
        .map(|i| format!("{}/slow/{}.bin", server.uri(), i))
        .collect();
    let orchestrator = Orchestrator::new(config, Task::from_urls(urls));
    orchestrator.start().await.unwrap();
    assert_eq!(orchestrator.active_count().await, 2);

    orchestrator.stop_all().await;
    let summary = tokio::time::timeout(Duration::from_secs(5), orchestrator.wait())
        .await
        .expect("停止超时");

    assert_eq!(summary.cancelled, 2);
    assert_eq!(summary.queued, 1);
}

#[tokio::test]
async fn test_resolved_link_is_downloaded() {
    let server = MockServer::start().await;
    let target = format!("{}/files/real.bin", server.uri());
    Mock::given(method("GET"))
        .and(path("/landing"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            r#"<html><button onclick='window.open("{}")'>Download</button></html>"#,
            target
        )))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/files/real.bin"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"payload".to_vec()))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let mut config = fallback_config(dir.path(), 1);
    config.aria2.enabled = false;
    config.resolve_links = true;

    let orchestrator = Orchestrator::new(
        config,
        Task::from_urls([format!("{}/landing", server.uri())]),
    );
    let mut rx = orchestrator.subscribe();
    orchestrator.start().await.unwrap();
    let summary = tokio::time::timeout(Duration::from_secs(10), orchestrator.wait())
        .await
        .expect("下载超时");
    assert_eq!(summary.completed, 1);

    let events = drain(&mut rx);
    assert!(events.contains(&OrchestratorEvent::UrlResolved {
        task_id: 0,
        url: target.clone(),
    }));

    let task = orchestrator.snapshot().await.remove(0);
    assert_eq!(task.url, target);
    let written = tokio::fs::read(task.destination_path.unwrap()).await.unwrap();
    assert_eq!(written, b"payload");
}
