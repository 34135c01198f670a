use actix::prelude::*;
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use rangedown::config::Config;
use rangedown::core::{
    AddBatch, AddTask, CancelTaskById, ChunkStatus, DownloadEvent, DownloadRegistry, ErrorKind, EventSink, GetTask,
    ListTasks, PauseTaskById, ResumeTaskById, SetGlobalSpeedLimit, SetProxy, SetTaskSpeedLimit, TaskSnapshot,
    TaskStatus,
};

const WAIT: Duration = Duration::from_secs(20);

/// 按 Range 头返回 206 分段内容；`fail_from` 指定的起始偏移返回 500
struct RangeResponder {
    data: Vec<u8>,
    fail_from: Option<u64>,
}

impl Respond for RangeResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let range = request
            .headers
            .get("range")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("bytes="))
            .and_then(|v| v.split_once('-'))
            .and_then(|(s, e)| Some((s.parse::<u64>().ok()?, e.parse::<u64>().ok()?)));
        match range {
            Some((start, _)) if Some(start) == self.fail_from => ResponseTemplate::new(500),
            Some((start, end)) => {
                let end = end.min(self.data.len() as u64 - 1);
                ResponseTemplate::new(206).set_body_bytes(self.data[start as usize..=end as usize].to_vec())
            }
            None => ResponseTemplate::new(200).set_body_bytes(self.data.clone()),
        }
    }
}

fn sample_data(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

async fn mount_file(server: &MockServer, data: &[u8], ranged: bool, fail_from: Option<u64>) {
    let mut head = ResponseTemplate::new(200).set_body_bytes(data.to_vec());
    if ranged {
        head = head.insert_header("accept-ranges", "bytes");
    }
    Mock::given(method("HEAD")).respond_with(head).mount(server).await;
    Mock::given(method("GET"))
        .respond_with(RangeResponder { data: data.to_vec(), fail_from })
        .mount(server)
        .await;
}

fn test_config(staging: &Path) -> Config {
    Config {
        temp_dir: Some(staging.to_string_lossy().to_string()),
        min_chunk_size: 1024,
        read_unit_size: 1024,
        timeout: 5,
        read_timeout: 5,
        ..Config::default()
    }
}

fn start_registry(config: Config) -> (Addr<DownloadRegistry>, UnboundedReceiver<DownloadEvent>) {
    let (events, rx) = EventSink::channel();
    (DownloadRegistry::new(config, events).start(), rx)
}

/// 收集某个任务的事件，直到 `until` 命中
async fn collect_until(
    rx: &mut UnboundedReceiver<DownloadEvent>,
    task_id: Uuid,
    until: impl Fn(&DownloadEvent) -> bool,
) -> Vec<DownloadEvent> {
    let mut seen = Vec::new();
    let result = tokio::time::timeout(WAIT, async {
        while let Some(event) = rx.recv().await {
            if event.task_id() != task_id {
                continue;
            }
            let done = until(&event);
            seen.push(event);
            if done {
                return;
            }
        }
    })
    .await;
    assert!(result.is_ok(), "等待事件超时，已收到: {:?}", seen);
    seen
}

/// 轮询快照直到任务进入 `status`
async fn wait_for_status(registry: &Addr<DownloadRegistry>, task_id: Uuid, status: TaskStatus) -> TaskSnapshot {
    let result = tokio::time::timeout(WAIT, async {
        loop {
            if let Some(snapshot) = registry.send(GetTask { task_id }).await.unwrap() {
                if snapshot.status == status {
                    return snapshot;
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await;
    result.unwrap_or_else(|_| panic!("任务 {} 未进入 {:?}", task_id, status))
}

async fn downloaded(registry: &Addr<DownloadRegistry>, task_id: Uuid) -> u64 {
    registry.send(GetTask { task_id }).await.unwrap().unwrap().downloaded_size
}

fn is_completed(event: &DownloadEvent) -> bool {
    matches!(event, DownloadEvent::Completed { .. })
}

fn progress_values(events: &[DownloadEvent]) -> Vec<u8> {
    events
        .iter()
        .filter_map(|e| match e {
            DownloadEvent::Progress { percent, .. } => Some(*percent),
            _ => None,
        })
        .collect()
}

#[actix_rt::test]
async fn test_multi_chunk_download_completes() {
    let server = MockServer::start().await;
    let data = sample_data(10 * 1024 + 7);
    mount_file(&server, &data, true, None).await;

    let staging = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let destination = out.path().join("nested").join("file.bin");
    let (registry, mut rx) = start_registry(test_config(staging.path()));

    let task_id = registry
        .send(AddTask { url: format!("{}/file.bin", server.uri()), destination: destination.clone(), thread_count: Some(4) })
        .await
        .unwrap()
        .unwrap();

    let events = collect_until(&mut rx, task_id, is_completed).await;
    assert_eq!(std::fs::read(&destination).unwrap(), data);

    let percents = progress_values(&events);
    assert!(percents.windows(2).all(|w| w[0] <= w[1]), "进度回退: {:?}", percents);
    assert_eq!(percents.last(), Some(&100));
    assert_eq!(percents.iter().filter(|p| **p == 100).count(), 1);

    // 100% 只在所有分块 done 之后出现
    let hundred_at = events
        .iter()
        .position(|e| matches!(e, DownloadEvent::Progress { percent: 100, .. }))
        .unwrap();
    let done_chunks: Vec<usize> = events[..hundred_at]
        .iter()
        .filter_map(|e| match e {
            DownloadEvent::ChunkProgress { chunk_index, status: ChunkStatus::Done, .. } => Some(*chunk_index),
            _ => None,
        })
        .collect();
    assert_eq!(done_chunks.len(), 4);
    assert!(events.iter().any(|e| matches!(e, DownloadEvent::Status { status: TaskStatus::Active, .. })));

    let snapshot = registry.send(GetTask { task_id }).await.unwrap().unwrap();
    assert_eq!(snapshot.status, TaskStatus::Done);
    assert_eq!(snapshot.percent, 100);
    assert_eq!(snapshot.total_size, data.len() as u64);
    assert_eq!(snapshot.downloaded_size, data.len() as u64);
    assert_eq!(snapshot.chunks.len(), 4);
    assert!(!staging.path().join(task_id.to_string()).exists());
}

#[actix_rt::test]
async fn test_zero_length_probe_fails_task() {
    let server = MockServer::start().await;
    mount_file(&server, &[], true, None).await;

    let staging = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let (registry, mut rx) = start_registry(test_config(staging.path()));
    let task_id = registry
        .send(AddTask { url: server.uri(), destination: out.path().join("empty"), thread_count: None })
        .await
        .unwrap()
        .unwrap();

    let events = collect_until(&mut rx, task_id, |e| matches!(e, DownloadEvent::Status { status: TaskStatus::Error, .. }))
        .await;
    let errors: Vec<&DownloadEvent> = events.iter().filter(|e| matches!(e, DownloadEvent::Error { .. })).collect();
    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], DownloadEvent::Error { kind: ErrorKind::Probe, .. }));

    let snapshot = registry.send(GetTask { task_id }).await.unwrap().unwrap();
    assert_eq!(snapshot.status, TaskStatus::Error);
    assert!(snapshot.chunks.is_empty());
    assert!(snapshot.error.unwrap().contains("探测失败"));
    assert!(!out.path().join("empty").exists());
}

#[actix_rt::test]
async fn test_server_without_range_support() {
    let server = MockServer::start().await;
    let data = sample_data(5000);
    mount_file(&server, &data, false, None).await;

    let staging = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let destination = out.path().join("whole.bin");
    let (registry, mut rx) = start_registry(test_config(staging.path()));
    let task_id = registry
        .send(AddTask { url: server.uri(), destination: destination.clone(), thread_count: Some(8) })
        .await
        .unwrap()
        .unwrap();

    collect_until(&mut rx, task_id, is_completed).await;
    assert_eq!(std::fs::read(&destination).unwrap(), data);

    let snapshot = registry.send(GetTask { task_id }).await.unwrap().unwrap();
    assert_eq!(snapshot.thread_count, 1);
    assert_eq!(snapshot.chunks.len(), 1);

    let gets = server.received_requests().await.unwrap();
    assert!(gets.iter().filter(|r| r.method.as_str() == "GET").all(|r| r.headers.get("range").is_none()));
}

#[actix_rt::test]
async fn test_cancel_removes_task_and_staging() {
    let server = MockServer::start().await;
    let data = sample_data(200 * 1024);
    mount_file(&server, &data, true, None).await;

    let staging = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let destination = out.path().join("cancelled.bin");
    let config = Config { speed_limit_kb: 50.0, ..test_config(staging.path()) };
    let (registry, mut rx) = start_registry(config);
    let task_id = registry
        .send(AddTask { url: server.uri(), destination: destination.clone(), thread_count: Some(2) })
        .await
        .unwrap()
        .unwrap();

    collect_until(&mut rx, task_id, |e| matches!(e, DownloadEvent::ChunkProgress { percent, .. } if *percent > 0)).await;
    registry.send(CancelTaskById { task_id }).await.unwrap().unwrap();

    assert_eq!(registry.send(GetTask { task_id }).await.unwrap(), None);
    assert!(registry.send(ListTasks).await.unwrap().is_empty());
    assert!(!staging.path().join(task_id.to_string()).exists());
    assert!(!destination.exists());

    tokio::time::sleep(Duration::from_millis(300)).await;
    let mut tail = Vec::new();
    while let Ok(event) = rx.try_recv() {
        tail.push(event);
    }
    assert!(!tail.iter().any(is_completed), "取消后不应完成: {:?}", tail);
}

#[actix_rt::test]
async fn test_pause_then_resume_completes_without_redownload() {
    let server = MockServer::start().await;
    let data = sample_data(200 * 1024);
    mount_file(&server, &data, true, None).await;

    let staging = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let destination = out.path().join("paused.bin");
    let config = Config { speed_limit_kb: 100.0, ..test_config(staging.path()) };
    let (registry, mut rx) = start_registry(config);
    let task_id = registry
        .send(AddTask { url: server.uri(), destination: destination.clone(), thread_count: Some(2) })
        .await
        .unwrap()
        .unwrap();

    collect_until(&mut rx, task_id, |e| matches!(e, DownloadEvent::Progress { percent, .. } if *percent >= 10)).await;
    registry.send(PauseTaskById { task_id }).await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;

    let paused = registry.send(GetTask { task_id }).await.unwrap().unwrap();
    assert_eq!(paused.status, TaskStatus::Paused);
    assert!(paused.downloaded_size < data.len() as u64);
    tokio::time::sleep(Duration::from_millis(500)).await;
    let still = registry.send(GetTask { task_id }).await.unwrap().unwrap();
    assert_eq!(still.downloaded_size, paused.downloaded_size, "暂停期间不应继续读取");

    registry.send(ResumeTaskById { task_id }).await.unwrap().unwrap();
    let events = collect_until(&mut rx, task_id, is_completed).await;
    assert!(events.iter().any(|e| matches!(e, DownloadEvent::Status { status: TaskStatus::Active, .. })));
    assert_eq!(std::fs::read(&destination).unwrap(), data);

    // 每个分块只请求一次
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.iter().filter(|r| r.method.as_str() == "GET").count(), 2);
}

#[actix_rt::test]
async fn test_chunk_error_fails_task_once() {
    let server = MockServer::start().await;
    let data = sample_data(64 * 1024);
    // 第二块返回 500
    mount_file(&server, &data, true, Some(32 * 1024)).await;

    let staging = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let destination = out.path().join("broken.bin");
    let config = Config { speed_limit_kb: 32.0, ..test_config(staging.path()) };
    let (registry, mut rx) = start_registry(config);
    let task_id = registry
        .send(AddTask { url: server.uri(), destination: destination.clone(), thread_count: Some(2) })
        .await
        .unwrap()
        .unwrap();

    let events = collect_until(&mut rx, task_id, |e| matches!(e, DownloadEvent::Status { status: TaskStatus::Error, .. }))
        .await;
    let errors: Vec<&DownloadEvent> = events.iter().filter(|e| matches!(e, DownloadEvent::Error { .. })).collect();
    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], DownloadEvent::Error { kind: ErrorKind::Transfer, .. }));

    // 查询在清理完成之后才被处理
    let snapshot = registry.send(GetTask { task_id }).await.unwrap().unwrap();
    assert_eq!(snapshot.status, TaskStatus::Error);
    assert!(snapshot.error.is_some());
    assert_eq!(snapshot.chunks[1].status, ChunkStatus::Error);
    assert_eq!(snapshot.chunks[0].status, ChunkStatus::Cancelled);
    assert!(!staging.path().join(task_id.to_string()).exists());
    assert!(!destination.exists());

    tokio::time::sleep(Duration::from_millis(300)).await;
    while let Ok(event) = rx.try_recv() {
        assert!(!matches!(event, DownloadEvent::Error { .. } | DownloadEvent::Completed { .. }));
    }
}

#[actix_rt::test]
async fn test_add_batch_derives_file_names() {
    let server = MockServer::start().await;
    let data = sample_data(3000);
    mount_file(&server, &data, true, None).await;

    let staging = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let (registry, mut rx) = start_registry(test_config(staging.path()));
    let results = registry
        .send(AddBatch {
            urls: vec![format!("{}/a.bin", server.uri()), format!("{}/dir/b%20c.txt", server.uri())],
            destination_dir: out.path().to_path_buf(),
            thread_count: Some(2),
        })
        .await
        .unwrap();
    let ids: Vec<Uuid> = results.into_iter().map(Result::unwrap).collect();
    assert_eq!(ids.len(), 2);

    let mut completed = 0;
    tokio::time::timeout(WAIT, async {
        while let Some(event) = rx.recv().await {
            if is_completed(&event) {
                completed += 1;
                if completed == ids.len() {
                    break;
                }
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(std::fs::read(out.path().join("a.bin")).unwrap(), data);
    assert_eq!(std::fs::read(out.path().join("b c.txt")).unwrap(), data);
}

#[actix_rt::test]
async fn test_speed_limit_change_reaches_running_transfer() {
    let server = MockServer::start().await;
    let data = sample_data(1024 * 1024);
    mount_file(&server, &data, true, None).await;

    let staging = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let destination = out.path().join("limited.bin");
    let config = Config { speed_limit_kb: 400.0, ..test_config(staging.path()) };
    let (registry, mut rx) = start_registry(config);
    let task_id = registry
        .send(AddTask { url: server.uri(), destination: destination.clone(), thread_count: Some(1) })
        .await
        .unwrap()
        .unwrap();

    collect_until(&mut rx, task_id, |e| matches!(e, DownloadEvent::Progress { percent, .. } if *percent >= 5)).await;
    registry.send(SetTaskSpeedLimit { task_id, kbps: 32.0 }).await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    let before = downloaded(&registry, task_id).await;
    tokio::time::sleep(Duration::from_millis(1500)).await;
    let after = downloaded(&registry, task_id).await;
    let kb = (after - before) as f64 / 1024.0;
    assert!(kb > 0.0, "限速后仍应继续下载");
    assert!(kb <= 32.0 * 1.5 * 1.3, "限速 32KB/s 下 1.5 秒读取了 {kb} KB");

    let snapshot = registry.send(GetTask { task_id }).await.unwrap().unwrap();
    assert_eq!(snapshot.speed_limit_kbps, 32.0);
    assert_eq!(snapshot.status, TaskStatus::Active);

    // 全局设置覆盖单任务上限，解除限速后很快完成
    assert_eq!(registry.send(SetGlobalSpeedLimit(0.0)).await.unwrap(), 0.0);
    let started = std::time::Instant::now();
    collect_until(&mut rx, task_id, is_completed).await;
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(std::fs::read(&destination).unwrap(), data);
}

#[actix_rt::test]
async fn test_proxy_change_only_affects_later_tasks() {
    let server = MockServer::start().await;
    let data = sample_data(64 * 1024);
    mount_file(&server, &data, true, None).await;

    let staging = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let first_dest = out.path().join("first.bin");
    let config = Config { speed_limit_kb: 64.0, ..test_config(staging.path()) };
    let (registry, mut rx) = start_registry(config);
    let first = registry
        .send(AddTask { url: server.uri(), destination: first_dest.clone(), thread_count: Some(2) })
        .await
        .unwrap()
        .unwrap();
    collect_until(&mut rx, first, |e| matches!(e, DownloadEvent::Status { status: TaskStatus::Active, .. })).await;

    // 指向一个没有监听的端口，之后的任务无法连接
    registry
        .send(SetProxy { enabled: true, host: "127.0.0.1".into(), port: 9, username: None, password: None })
        .await
        .unwrap();

    let second = registry
        .send(AddTask { url: server.uri(), destination: out.path().join("second.bin"), thread_count: Some(2) })
        .await
        .unwrap()
        .unwrap();
    let events = collect_until(&mut rx, second, |e| matches!(e, DownloadEvent::Status { status: TaskStatus::Error, .. }))
        .await;
    assert!(events.iter().any(|e| matches!(e, DownloadEvent::Error { kind: ErrorKind::Probe, .. })));

    wait_for_status(&registry, first, TaskStatus::Done).await;
    assert_eq!(std::fs::read(&first_dest).unwrap(), data);
    assert!(!out.path().join("second.bin").exists());
}

#[actix_rt::test]
async fn test_pause_during_probe_starts_chunks_paused() {
    let server = MockServer::start().await;
    let data = sample_data(8 * 1024);
    Mock::given(method("HEAD"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(data.clone())
                .insert_header("accept-ranges", "bytes")
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(RangeResponder { data: data.clone(), fail_from: None })
        .mount(&server)
        .await;

    let staging = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let destination = out.path().join("deferred.bin");
    let (registry, mut rx) = start_registry(test_config(staging.path()));
    let task_id = registry
        .send(AddTask { url: server.uri(), destination: destination.clone(), thread_count: Some(2) })
        .await
        .unwrap()
        .unwrap();
    registry.send(PauseTaskById { task_id }).await.unwrap().unwrap();

    let events = collect_until(&mut rx, task_id, |e| matches!(e, DownloadEvent::Status { status: TaskStatus::Paused, .. }))
        .await;
    assert!(events.iter().any(|e| matches!(e, DownloadEvent::Status { status: TaskStatus::Probing, .. })));
    assert!(!events.iter().any(|e| matches!(e, DownloadEvent::Status { status: TaskStatus::Active, .. })));

    tokio::time::sleep(Duration::from_millis(300)).await;
    let paused = registry.send(GetTask { task_id }).await.unwrap().unwrap();
    assert_eq!(paused.status, TaskStatus::Paused);
    assert_eq!(paused.chunks.len(), 2);
    assert_eq!(paused.downloaded_size, 0);
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.iter().filter(|r| r.method.as_str() == "GET").count(), 0);

    registry.send(ResumeTaskById { task_id }).await.unwrap().unwrap();
    collect_until(&mut rx, task_id, is_completed).await;
    assert_eq!(std::fs::read(&destination).unwrap(), data);
}
