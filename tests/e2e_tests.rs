// Licensed under the MIT License
// Copyright (c) 2025 Hal <hal.long@outlook.com>

//! End-to-end engine tests against an in-process HTTP double.
//!
//! The double serves a deterministic body and honours (or deliberately
//! ignores) ranged requests, which lets these tests cover the full strategy
//! matrix: single streams, parallel chunks, resume, downgrade, cancellation
//! and redirect handling.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::path;
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use swiftget::{
    checksum, sidecar_path, ChunkPlan, Destination, DownloadEngine, DownloadError,
    DownloadHook, DownloadOptions, DownloadRequest, DownloadStats, ResourceInfo, ResumeRecord,
    Strategy,
};

/// Deterministic pseudo-random payload
fn test_body(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i as u64 * 31 + 7) % 251) as u8).collect()
}

/// Serves one file, optionally honouring Range requests
#[derive(Clone)]
struct RangedFile {
    body: Vec<u8>,
    etag: Option<&'static str>,
    accept_ranges: bool,
    honour_range: bool,
}

impl RangedFile {
    fn new(body: Vec<u8>) -> Self {
        Self {
            body,
            etag: Some("\"v1\""),
            accept_ranges: true,
            honour_range: true,
        }
    }

    fn without_ranges(body: Vec<u8>) -> Self {
        Self {
            body,
            etag: None,
            accept_ranges: false,
            honour_range: false,
        }
    }

    /// Advertises range support but always answers with the full body, the
    /// misconfigured-gateway case
    fn lying_about_ranges(body: Vec<u8>) -> Self {
        Self {
            body,
            etag: Some("\"v1\""),
            accept_ranges: true,
            honour_range: false,
        }
    }
}

impl Respond for RangedFile {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let range = request
            .headers
            .get("range")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let mut template = match range {
            Some(value) if self.honour_range && !self.body.is_empty() => {
                let interval = value.trim_start_matches("bytes=");
                let (start, end) = interval.split_once('-').unwrap_or((interval, ""));
                let start: u64 = start.parse().unwrap_or(0);
                if start >= self.body.len() as u64 {
                    ResponseTemplate::new(416)
                } else {
                    let end: u64 = if end.is_empty() {
                        self.body.len() as u64 - 1
                    } else {
                        end.parse::<u64>()
                            .unwrap_or(0)
                            .min(self.body.len() as u64 - 1)
                    };
                    ResponseTemplate::new(206)
                        .insert_header(
                            "Content-Range",
                            format!("bytes {start}-{end}/{}", self.body.len()).as_str(),
                        )
                        .set_body_bytes(self.body[start as usize..=end as usize].to_vec())
                }
            }
            _ => ResponseTemplate::new(200).set_body_bytes(self.body.clone()),
        };
        if self.accept_ranges {
            template = template.insert_header("Accept-Ranges", "bytes");
        }
        if let Some(etag) = self.etag {
            template = template.insert_header("ETag", etag);
        }
        template
    }
}

async fn serve(file: RangedFile) -> (MockServer, String) {
    let server = MockServer::start().await;
    Mock::given(path("/file.bin"))
        .respond_with(file)
        .mount(&server)
        .await;
    let url = format!("{}/file.bin", server.uri());
    (server, url)
}

fn probe_like_info(server_url: &str, total: i64, etag: Option<&str>) -> ResourceInfo {
    ResourceInfo {
        final_url: url::Url::parse(server_url).unwrap(),
        total_size: total,
        content_type: None,
        etag: etag.map(str::to_string),
        last_modified: None,
        accepts_ranges: true,
        suggested_filename: None,
        redirect_chain: Vec::new(),
        status: 200,
    }
}

#[tokio::test]
async fn small_file_downloads_as_single_stream() {
    let body = test_body(2048);
    let (server, url) = serve(RangedFile::without_ranges(body.clone())).await;

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("small.bin");
    let engine = DownloadEngine::new();
    let stats = engine
        .download(&url, DownloadOptions::to_path(&dest))
        .await
        .unwrap();

    assert!(stats.success);
    assert!(!stats.resumed);
    assert_eq!(stats.bytes_downloaded, 2048);
    assert_eq!(stats.total_bytes, 2048);
    assert_eq!(stats.strategy, Strategy::Single);
    assert_eq!(std::fs::read(&dest).unwrap(), body);
    assert!(!sidecar_path(&dest).exists());

    // One probe, one body fetch, and the body fetch carried no Range.
    let requests = server.received_requests().await.unwrap();
    let gets: Vec<_> = requests.iter().filter(|r| r.method.as_str() == "GET").collect();
    assert_eq!(gets.len(), 1);
    assert!(gets[0].headers.get("range").is_none());
}

#[tokio::test]
async fn parallel_download_is_byte_identical() {
    let body = test_body(10 * 1024 * 1024);
    let reference = checksum::sha256_hex(&body);
    let (server, url) = serve(RangedFile::new(body)).await;

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("large.bin");
    let engine = DownloadEngine::new();
    let stats = engine
        .download(
            &url,
            DownloadOptions::to_path(&dest).with_concurrency(4),
        )
        .await
        .unwrap();

    assert!(stats.success);
    assert_eq!(stats.strategy, Strategy::Parallel);
    assert_eq!(stats.bytes_downloaded, 10 * 1024 * 1024);
    assert_eq!(checksum::file_sha256(&dest).await.unwrap(), reference);
    assert!(!sidecar_path(&dest).exists());

    let requests = server.received_requests().await.unwrap();
    let ranged: Vec<_> = requests
        .iter()
        .filter(|r| r.method.as_str() == "GET" && r.headers.get("range").is_some())
        .collect();
    assert_eq!(ranged.len(), 4);
}

#[tokio::test]
async fn concurrency_sweep_stays_byte_identical() {
    let body = test_body(3 * 1024 * 1024 + 17);
    let reference = checksum::sha256_hex(&body);
    let (_server, url) = serve(RangedFile::new(body)).await;
    let engine = DownloadEngine::new();

    for concurrency in [1usize, 2, 4, 8, 16] {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join(format!("sweep-{concurrency}.bin"));
        let stats = engine
            .download(
                &url,
                DownloadOptions::to_path(&dest).with_concurrency(concurrency),
            )
            .await
            .unwrap();
        assert!(stats.success, "concurrency {concurrency} failed");
        assert_eq!(
            checksum::file_sha256(&dest).await.unwrap(),
            reference,
            "bytes differ at concurrency {concurrency}"
        );
    }
}

#[tokio::test]
async fn resume_fetches_only_the_remainder() {
    let total: usize = 10 * 1024 * 1024;
    let body = test_body(total);
    let reference = checksum::sha256_hex(&body);
    let (server, url) = serve(RangedFile::new(body.clone())).await;

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("resumed.bin");

    // Simulate a killed transfer: chunk 0 complete, chunk 1 half done.
    let plan = ChunkPlan::plan(total as i64, true, 4, 0, false);
    assert_eq!(plan.chunks.len(), 4);
    let chunk_len = 2_621_440usize;
    let partial = 1_048_576usize;
    let counters = vec![chunk_len as u64, partial as u64, 0, 0];
    let mut on_disk = vec![0u8; total];
    on_disk[..chunk_len].copy_from_slice(&body[..chunk_len]);
    on_disk[chunk_len..chunk_len + partial]
        .copy_from_slice(&body[chunk_len..chunk_len + partial]);
    std::fs::write(&dest, &on_disk).unwrap();

    let info = probe_like_info(&url, total as i64, Some("\"v1\""));
    ResumeRecord::new(&url, &info, &plan, &counters)
        .store(&dest)
        .await
        .unwrap();

    let engine = DownloadEngine::new();
    let stats = engine
        .download(
            &url,
            DownloadOptions::to_path(&dest).with_concurrency(4),
        )
        .await
        .unwrap();

    assert!(stats.success);
    assert!(stats.resumed);
    let already_done = (chunk_len + partial) as u64;
    assert_eq!(stats.bytes_downloaded, total as u64 - already_done);
    assert_eq!(checksum::file_sha256(&dest).await.unwrap(), reference);
    assert!(!sidecar_path(&dest).exists());

    // The half-done chunk resumed mid-interval instead of starting over.
    let requests = server.received_requests().await.unwrap();
    let ranges: Vec<String> = requests
        .iter()
        .filter_map(|r| r.headers.get("range"))
        .map(|v| v.to_str().unwrap().to_string())
        .collect();
    assert!(
        ranges.contains(&format!("bytes={}-{}", chunk_len + partial, 2 * chunk_len - 1)),
        "expected a mid-chunk resume range, got {ranges:?}"
    );
}

#[tokio::test]
async fn etag_change_discards_resume_state() {
    let total: usize = 4 * 1024 * 1024;
    let body = test_body(total);
    let reference = checksum::sha256_hex(&body);
    let (_server, url) = serve(RangedFile::new(body.clone())).await;

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("stale.bin");

    // A sidecar recorded against the previous entity.
    let plan = ChunkPlan::plan(total as i64, true, 4, 0, false);
    let counters = vec![plan.chunks[0].size().unwrap(), 0, 0, 0];
    std::fs::write(&dest, vec![0xAAu8; total]).unwrap();
    let stale_info = probe_like_info(&url, total as i64, Some("\"v0\""));
    ResumeRecord::new(&url, &stale_info, &plan, &counters)
        .store(&dest)
        .await
        .unwrap();

    let engine = DownloadEngine::new();
    let stats = engine
        .download(
            &url,
            DownloadOptions::to_path(&dest).with_concurrency(4),
        )
        .await
        .unwrap();

    assert!(stats.success);
    assert!(!stats.resumed, "a stale record must not be adopted");
    assert_eq!(stats.bytes_downloaded, total as u64);
    assert_eq!(checksum::file_sha256(&dest).await.unwrap(), reference);
}

#[tokio::test]
async fn range_refusal_downgrades_to_single_once() {
    let body = test_body(4 * 1024 * 1024);
    let reference = checksum::sha256_hex(&body);
    let (_server, url) = serve(RangedFile::lying_about_ranges(body)).await;

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("downgraded.bin");
    let engine = DownloadEngine::new();
    let stats = engine
        .download(
            &url,
            DownloadOptions::to_path(&dest).with_concurrency(4),
        )
        .await
        .unwrap();

    assert!(stats.success);
    assert_eq!(stats.strategy, Strategy::Single);
    assert_eq!(checksum::file_sha256(&dest).await.unwrap(), reference);
}

#[tokio::test]
async fn cancellation_preserves_a_loadable_sidecar() {
    let total: usize = 1024 * 1024;
    let body = test_body(total);
    let (_server, url) = serve(RangedFile::new(body)).await;

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("cancelled.bin");

    let token = CancellationToken::new();
    let trigger = token.clone();
    let options = DownloadOptions::to_path(&dest)
        .with_max_rate(256 * 1024)
        .with_cancel_token(token)
        .with_progress(Arc::new(move |progress| {
            if progress.percentage >= 30.0 {
                trigger.cancel();
            }
        }));

    let engine = DownloadEngine::new();
    let started = std::time::Instant::now();
    let failure = engine.download(&url, options).await.unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(failure.error, DownloadError::Cancelled));
    assert!(!failure.stats.success);
    assert!(elapsed < Duration::from_secs(3), "cancel took {elapsed:?}");

    let record = ResumeRecord::load(&dest)
        .await
        .expect("sidecar must survive cancellation");
    assert!(record.completed_bytes() >= (total as f64 * 0.3) as u64 / 2);
}

#[tokio::test]
async fn rate_ceiling_slows_the_transfer() {
    let total: usize = 512 * 1024;
    let body = test_body(total);
    let (_server, url) = serve(RangedFile::new(body.clone())).await;

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("paced.bin");
    let engine = DownloadEngine::new();
    let stats = engine
        .download(
            &url,
            DownloadOptions::to_path(&dest).with_max_rate(256 * 1024),
        )
        .await
        .unwrap();

    assert!(stats.success);
    // 512 KiB at 256 KiB/s with a one-second burst still needs the bucket
    // to refill for the second half.
    assert!(
        stats.elapsed >= Duration::from_millis(700),
        "transfer finished too fast: {:?}",
        stats.elapsed
    );
    assert_eq!(std::fs::read(&dest).unwrap(), body);
}

#[tokio::test]
async fn redirects_are_followed_and_counted() {
    let body = test_body(2048);
    let server = MockServer::start().await;
    Mock::given(path("/old"))
        .respond_with(
            ResponseTemplate::new(302).insert_header("Location", "/file.bin"),
        )
        .mount(&server)
        .await;
    Mock::given(path("/file.bin"))
        .respond_with(RangedFile::without_ranges(body.clone()))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("moved.bin");
    let engine = DownloadEngine::new();
    let stats = engine
        .download(
            &format!("{}/old", server.uri()),
            DownloadOptions::to_path(&dest),
        )
        .await
        .unwrap();

    assert!(stats.success);
    assert_eq!(stats.redirects, 1);
    assert_eq!(std::fs::read(&dest).unwrap(), body);
}

#[tokio::test]
async fn redirect_loops_fail_as_network_errors() {
    let server = MockServer::start().await;
    Mock::given(path("/loop"))
        .respond_with(ResponseTemplate::new(302).insert_header("Location", "/loop"))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("loop.bin");
    let engine = DownloadEngine::new();
    let failure = engine
        .download(
            &format!("{}/loop", server.uri()),
            DownloadOptions::to_path(&dest),
        )
        .await
        .unwrap_err();

    assert!(matches!(failure.error, DownloadError::Network { .. }));
    assert_eq!(failure.stats.bytes_downloaded, 0);
}

#[tokio::test]
async fn missing_resource_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(path("/gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let engine = DownloadEngine::new();
    let failure = engine
        .download(
            &format!("{}/gone", server.uri()),
            DownloadOptions::to_path(dir.path().join("gone.bin")),
        )
        .await
        .unwrap_err();
    assert!(matches!(failure.error, DownloadError::NotFound { .. }));
}

#[tokio::test]
async fn auth_challenge_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(path("/secret"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let engine = DownloadEngine::new();
    let failure = engine
        .download(
            &format!("{}/secret", server.uri()),
            DownloadOptions::to_path(dir.path().join("secret.bin")),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        failure.error,
        DownloadError::AuthenticationFailed { status: 401, .. }
    ));
}

#[tokio::test]
async fn zero_length_resource_writes_an_empty_file() {
    let (_server, url) = serve(RangedFile::new(Vec::new())).await;

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("empty.bin");
    let engine = DownloadEngine::new();
    let stats = engine
        .download(&url, DownloadOptions::to_path(&dest))
        .await
        .unwrap();

    assert!(stats.success);
    assert_eq!(stats.bytes_downloaded, 0);
    assert_eq!(std::fs::metadata(&dest).unwrap().len(), 0);
    assert!(!sidecar_path(&dest).exists());
}

#[tokio::test]
async fn existing_destination_is_protected() {
    let body = test_body(2048);
    let (_server, url) = serve(RangedFile::without_ranges(body.clone())).await;

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("precious.bin");
    std::fs::write(&dest, b"do not clobber").unwrap();

    let engine = DownloadEngine::new();
    let failure = engine
        .download(
            &url,
            DownloadOptions::to_path(&dest).with_resume(false),
        )
        .await
        .unwrap_err();
    assert!(matches!(failure.error, DownloadError::FileExists { .. }));
    assert_eq!(std::fs::read(&dest).unwrap(), b"do not clobber");

    let stats = engine
        .download(
            &url,
            DownloadOptions::to_path(&dest).with_resume(false).with_overwrite(true),
        )
        .await
        .unwrap();
    assert!(stats.success);
    assert_eq!(std::fs::read(&dest).unwrap(), body);
}

#[tokio::test]
async fn memory_destination_collects_all_bytes() {
    let body = test_body(300_000);
    let (_server, url) = serve(RangedFile::new(body.clone())).await;

    let engine = DownloadEngine::new();
    let (bytes, stats) = engine.download_to_memory(&url).await.unwrap();
    assert!(stats.success);
    assert_eq!(bytes, body);
}

#[tokio::test]
async fn checksum_verification_pass_and_fail() {
    let body = test_body(64 * 1024);
    let digest = checksum::sha256_hex(&body);
    let (_server, url) = serve(RangedFile::new(body)).await;
    let engine = DownloadEngine::new();

    let dir = tempfile::tempdir().unwrap();
    let good = engine
        .download(
            &url,
            DownloadOptions::to_path(dir.path().join("ok.bin"))
                .with_expected_sha256(digest),
        )
        .await
        .unwrap();
    assert!(good.success);

    let failure = engine
        .download(
            &url,
            DownloadOptions::to_path(dir.path().join("bad.bin"))
                .with_expected_sha256("0".repeat(64)),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        failure.error,
        DownloadError::ChecksumMismatch { .. }
    ));
}

#[tokio::test]
async fn expected_size_precondition_is_enforced() {
    let body = test_body(2048);
    let (_server, url) = serve(RangedFile::new(body)).await;

    let dir = tempfile::tempdir().unwrap();
    let engine = DownloadEngine::new();
    let failure = engine
        .download(
            &url,
            DownloadOptions::to_path(dir.path().join("sized.bin")).with_expected_size(9999),
        )
        .await
        .unwrap_err();
    assert!(matches!(failure.error, DownloadError::InvalidOption { .. }));
}

struct HeaderHook;

#[async_trait]
impl DownloadHook for HeaderHook {
    async fn pre_download(&self, request: &mut DownloadRequest) -> swiftget::Result<()> {
        request
            .headers
            .insert("X-Job-Token".to_string(), "hooked".to_string());
        Ok(())
    }
}

#[tokio::test]
async fn pre_hook_headers_reach_the_wire() {
    let body = test_body(2 * 1024 * 1024 + 1);
    let (server, url) = serve(RangedFile::new(body)).await;

    let dir = tempfile::tempdir().unwrap();
    let engine = DownloadEngine::new();
    let stats = engine
        .download(
            &url,
            DownloadOptions::to_path(dir.path().join("hooked.bin"))
                .with_concurrency(2)
                .with_hook(Arc::new(HeaderHook)),
        )
        .await
        .unwrap();
    assert!(stats.success);

    let requests = server.received_requests().await.unwrap();
    let hooked = requests
        .iter()
        .filter(|r| r.headers.get("x-job-token").is_some())
        .count();
    assert!(hooked >= 2, "worker requests must carry hook headers");
}

struct VetoHook;

#[async_trait]
impl DownloadHook for VetoHook {
    async fn pre_download(&self, _request: &mut DownloadRequest) -> swiftget::Result<()> {
        Err(DownloadError::invalid_option("vetoed by policy"))
    }
}

#[tokio::test]
async fn pre_hook_error_aborts_before_dispatch() {
    let body = test_body(2 * 1024 * 1024);
    let (server, url) = serve(RangedFile::new(body)).await;

    let dir = tempfile::tempdir().unwrap();
    let engine = DownloadEngine::new();
    let failure = engine
        .download(
            &url,
            DownloadOptions::to_path(dir.path().join("vetoed.bin"))
                .with_hook(Arc::new(VetoHook)),
        )
        .await
        .unwrap_err();

    assert!(matches!(failure.error, DownloadError::InvalidOption { .. }));
    assert_eq!(failure.stats.bytes_downloaded, 0);

    let requests = server.received_requests().await.unwrap();
    assert!(
        requests.iter().all(|r| r.method.as_str() != "GET"
            || r.headers.get("range").is_none()),
        "no chunk request may run after a veto"
    );
}

#[derive(Default)]
struct RecordingHook {
    called: AtomicBool,
    saw: Mutex<Option<(bool, u64)>>,
}

#[async_trait]
impl DownloadHook for RecordingHook {
    async fn post_download(
        &self,
        stats: &DownloadStats,
        error: Option<&DownloadError>,
    ) -> swiftget::Result<()> {
        self.called.store(true, Ordering::SeqCst);
        *self.saw.lock().unwrap() = Some((error.is_none(), stats.bytes_downloaded));
        Ok(())
    }
}

#[tokio::test]
async fn post_hook_observes_the_outcome() {
    let body = test_body(2048);
    let (_server, url) = serve(RangedFile::without_ranges(body)).await;

    let hook = Arc::new(RecordingHook::default());
    let dir = tempfile::tempdir().unwrap();
    let engine = DownloadEngine::new();
    engine
        .download(
            &url,
            DownloadOptions::to_path(dir.path().join("observed.bin"))
                .with_hook(hook.clone()),
        )
        .await
        .unwrap();

    assert!(hook.called.load(Ordering::SeqCst));
    let saw = hook.saw.lock().unwrap().unwrap();
    assert_eq!(saw, (true, 2048));
}

#[tokio::test]
async fn already_complete_destination_short_circuits() {
    let body = test_body(2048);
    let (server, url) = serve(RangedFile::new(body.clone())).await;

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("done.bin");
    std::fs::write(&dest, &body).unwrap();

    let engine = DownloadEngine::new();
    let stats = engine
        .download(&url, DownloadOptions::to_path(&dest))
        .await
        .unwrap();

    assert!(stats.success);
    assert_eq!(stats.bytes_downloaded, 0);
    assert_eq!(std::fs::read(&dest).unwrap(), body);

    // Only the probe hit the wire.
    let requests = server.received_requests().await.unwrap();
    assert!(requests.iter().all(|r| r.method.as_str() != "GET"));
}

#[tokio::test]
async fn custom_sink_destination_receives_positioned_writes() {
    let body = test_body(2 * 1024 * 1024 + 5);
    let (_server, url) = serve(RangedFile::new(body.clone())).await;

    let sink = Arc::new(swiftget::MemorySink::new());
    let engine = DownloadEngine::new();
    let stats = engine
        .download(
            &url,
            DownloadOptions::new(Destination::Custom(sink.clone())).with_concurrency(3),
        )
        .await
        .unwrap();

    assert!(stats.success);
    assert_eq!(sink.snapshot(), body);
}
