//! End-to-end uploads against a scripted NNTP server on localhost

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use ul_nzb::config::Config;
use ul_nzb::error::{ErrorClass, UlNzbError, UploadError};
use ul_nzb::nzb::NzbListing;
use ul_nzb::upload::{UploadMode, UploadObserver, UploadSummary, Uploader};

#[derive(Default)]
struct ServerState {
    /// Accepted articles, un-stuffed, with LF line endings
    articles: Mutex<Vec<Vec<u8>>>,
    /// The next POSTs answered with this code instead of 240
    reject_code: u16,
    reject_remaining: AtomicU32,
    next_id: AtomicU32,
    /// Message-ids asked for with STAT
    stats: Mutex<Vec<String>>,
    quits: AtomicU32,
}

impl ServerState {
    fn rejecting(code: u16, times: u32) -> Self {
        Self {
            reject_code: code,
            reject_remaining: AtomicU32::new(times),
            ..Self::default()
        }
    }

    fn articles(&self) -> Vec<Vec<u8>> {
        self.articles.lock().unwrap().clone()
    }
}

async fn spawn_server(state: Arc<ServerState>) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(serve(socket, Arc::clone(&state)));
        }
    });
    port
}

async fn serve(socket: TcpStream, state: Arc<ServerState>) {
    let (read_half, mut writer) = socket.into_split();
    let mut reader = BufReader::new(read_half);
    writer.write_all(b"200 mock server ready\r\n").await.unwrap();

    let mut line = Vec::new();
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).await.unwrap_or(0) == 0 {
            return;
        }
        let command = String::from_utf8_lossy(&line).trim_end().to_string();

        let reply = if command == "MODE READER" {
            "200 posting allowed".to_string()
        } else if command == "POST" {
            writer.write_all(b"340 send article\r\n").await.unwrap();
            let article = read_article(&mut reader).await;

            let rejected = state
                .reject_remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if rejected {
                format!("{} posting failed", state.reject_code)
            } else {
                state.articles.lock().unwrap().push(article);
                let id = state.next_id.fetch_add(1, Ordering::SeqCst);
                format!("240 <part{}@mock.test> article received", id)
            }
        } else if let Some(id) = command.strip_prefix("STAT ") {
            state.stats.lock().unwrap().push(id.to_string());
            format!("223 0 {}", id)
        } else if command == "QUIT" {
            state.quits.fetch_add(1, Ordering::SeqCst);
            let _ = writer.write_all(b"205 bye\r\n").await;
            return;
        } else {
            "500 unknown command".to_string()
        };

        writer
            .write_all(format!("{}\r\n", reply).as_bytes())
            .await
            .unwrap();
    }
}

async fn read_article<R: tokio::io::AsyncBufRead + Unpin>(reader: &mut R) -> Vec<u8> {
    let mut article = Vec::new();
    let mut line = Vec::new();
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).await.unwrap() == 0 {
            break;
        }
        if line == b".\r\n" {
            break;
        }
        let content = line.strip_suffix(b"\r\n").unwrap_or(&line);
        let content = content.strip_prefix(b".").filter(|_| content.starts_with(b"..")).unwrap_or(content);
        article.extend_from_slice(content);
        article.push(b'\n');
    }
    article
}

fn header(article: &[u8], name: &str) -> Option<String> {
    let text = String::from_utf8_lossy(article);
    let prefix = format!("{}: ", name);
    text.lines()
        .take_while(|line| !line.is_empty())
        .find_map(|line| line.strip_prefix(&prefix).map(str::to_string))
}

fn body_lines(article: &[u8]) -> Vec<Vec<u8>> {
    let split = article
        .windows(2)
        .position(|w| w == b"\n\n")
        .expect("blank line after headers");
    article[split + 2..]
        .split(|&b| b == b'\n')
        .map(<[u8]>::to_vec)
        .collect()
}

fn config(port: u16, nzb_dir: &Path) -> Config {
    let mut config = Config::default();
    config.usenet.server = "127.0.0.1".to_string();
    config.usenet.port = port;
    config.usenet.ssl = false;
    config.usenet.connections = 2;
    config.usenet.timeout = 5;
    config.usenet.reconnect_delay = 0;
    config.posting.from = "Poster <poster@example.org>".to_string();
    config.posting.groups = vec!["alt.binaries.test".to_string()];
    config.posting.article_size = 128;
    config.nzb.output_dir = Some(nzb_dir.to_path_buf());
    config
}

/// Keeps the summary handed to the observer, which failed runs still produce
#[derive(Default)]
struct SummaryRecorder {
    summary: Mutex<Option<UploadSummary>>,
}

impl UploadObserver for SummaryRecorder {
    fn run_finished(&self, summary: &UploadSummary) {
        *self.summary.lock().unwrap() = Some(summary.clone());
    }
}

fn patterned(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 256) as u8).collect()
}

#[tokio::test]
async fn test_single_file_is_split_posted_and_indexed() {
    let state = Arc::new(ServerState::default());
    let port = spawn_server(Arc::clone(&state)).await;

    let work = tempfile::tempdir().unwrap();
    let nzb_dir = tempfile::tempdir().unwrap();
    let file = work.path().join("a.bin");
    std::fs::write(&file, patterned(300)).unwrap();

    let uploader = Uploader::new(config(port, nzb_dir.path())).unwrap();
    let summary = uploader
        .upload(UploadMode::Files(vec![file.clone()]))
        .await
        .unwrap();

    assert_eq!(summary.files, 1);
    assert_eq!(summary.articles_posted, 3);
    assert_eq!(summary.articles_failed, 0);
    assert_eq!(summary.bytes, 300);

    let articles = state.articles();
    assert_eq!(articles.len(), 3);
    let mut subjects: Vec<String> = articles
        .iter()
        .map(|article| header(article, "Subject").unwrap())
        .collect();
    subjects.sort();
    assert_eq!(
        subjects,
        vec![
            "\"a.bin\" yEnc (1/3)",
            "\"a.bin\" yEnc (2/3)",
            "\"a.bin\" yEnc (3/3)",
        ]
    );

    let second = articles
        .iter()
        .find(|article| header(article, "Subject").unwrap().ends_with("(2/3)"))
        .unwrap();
    assert_eq!(header(second, "Newsgroups").as_deref(), Some("alt.binaries.test"));
    let lines = body_lines(second);
    assert!(lines[0].starts_with(b"=ybegin part=2 total=3 line=128 size=300"));
    assert_eq!(lines[1], b"=ypart begin=129 end=256");

    // Every worker says goodbye
    assert!(state.quits.load(Ordering::SeqCst) >= 1);

    let nzb_path = nzb_dir.path().join("a.bin.nzb");
    assert_eq!(summary.nzb, vec![nzb_path.clone()]);
    let listing = NzbListing::from_file(&nzb_path).unwrap();
    assert_eq!(listing.files.len(), 1);
    assert_eq!(listing.files[0].name, "a.bin");
    assert_eq!(listing.total_segments(), 3);
    assert_eq!(listing.total_size(), 300);
    assert!(listing.files[0].is_complete());
}

#[tokio::test]
async fn test_directory_upload_writes_one_nzb_in_name_order() {
    let state = Arc::new(ServerState::default());
    let port = spawn_server(Arc::clone(&state)).await;

    let work = tempfile::tempdir().unwrap();
    let dir = work.path().join("holiday");
    std::fs::create_dir(&dir).unwrap();
    std::fs::write(dir.join("b.bin"), patterned(200)).unwrap();
    std::fs::write(dir.join("a.bin"), patterned(100)).unwrap();
    std::fs::write(dir.join(".hidden"), b"skip me").unwrap();
    std::fs::write(dir.join("empty.bin"), b"").unwrap();

    let nzb_dir = tempfile::tempdir().unwrap();
    let uploader = Uploader::new(config(port, nzb_dir.path())).unwrap();
    let summary = uploader
        .upload(UploadMode::Directory(dir.clone()))
        .await
        .unwrap();

    assert_eq!(summary.files, 2);
    assert_eq!(summary.articles_posted, 3);

    let subjects: Vec<String> = state
        .articles()
        .iter()
        .map(|article| header(article, "Subject").unwrap())
        .collect();
    assert!(subjects.contains(&"holiday [1/2] - \"a.bin\" yEnc (1/1)".to_string()));
    assert!(subjects.contains(&"holiday [2/2] - \"b.bin\" yEnc (2/2)".to_string()));

    let nzb_path = nzb_dir.path().join("holiday.nzb");
    assert_eq!(summary.nzb, vec![nzb_path.clone()]);
    let listing = NzbListing::from_file(&nzb_path).unwrap();
    assert_eq!(listing.name.as_deref(), Some("holiday"));
    let names: Vec<&str> = listing.files.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["a.bin", "b.bin"]);
    assert_eq!(listing.files[1].segments, 2);
}

#[tokio::test]
async fn test_transient_rejection_is_retried() {
    let state = Arc::new(ServerState::rejecting(441, 2));
    let port = spawn_server(Arc::clone(&state)).await;

    let work = tempfile::tempdir().unwrap();
    let nzb_dir = tempfile::tempdir().unwrap();
    let file = work.path().join("a.bin");
    std::fs::write(&file, patterned(300)).unwrap();

    let mut config = config(port, nzb_dir.path());
    config.nzb.enabled = false;
    let uploader = Uploader::new(config).unwrap();
    let summary = uploader.upload(UploadMode::Files(vec![file])).await.unwrap();

    assert_eq!(summary.retries, 2);
    assert_eq!(summary.articles_posted, 3);
    assert!(summary.nzb.is_empty());
    assert_eq!(state.articles().len(), 3);
    assert!(!nzb_dir.path().join("a.bin.nzb").exists());
}

#[tokio::test]
async fn test_fatal_rejection_aborts_the_run() {
    let state = Arc::new(ServerState::rejecting(502, u32::MAX));
    let port = spawn_server(Arc::clone(&state)).await;

    let work = tempfile::tempdir().unwrap();
    let nzb_dir = tempfile::tempdir().unwrap();
    let file = work.path().join("a.bin");
    std::fs::write(&file, patterned(1000)).unwrap();

    let uploader = Uploader::new(config(port, nzb_dir.path())).unwrap();
    let error = uploader
        .upload(UploadMode::Files(vec![file]))
        .await
        .unwrap_err();

    assert_eq!(error.class(), ErrorClass::PostingFatal);
    assert!(state.articles().is_empty());
    assert!(!nzb_dir.path().join("a.bin.nzb").exists());
}

#[tokio::test]
async fn test_auth_reply_to_post_is_retried() {
    let state = Arc::new(ServerState::rejecting(481, 1));
    let port = spawn_server(Arc::clone(&state)).await;

    let work = tempfile::tempdir().unwrap();
    let nzb_dir = tempfile::tempdir().unwrap();
    let file = work.path().join("a.bin");
    std::fs::write(&file, patterned(100)).unwrap();

    let uploader = Uploader::new(config(port, nzb_dir.path())).unwrap();
    let summary = uploader.upload(UploadMode::Files(vec![file])).await.unwrap();

    assert_eq!(summary.retries, 1);
    assert_eq!(summary.articles_posted, 1);
    assert_eq!(state.articles().len(), 1);
    assert!(nzb_dir.path().join("a.bin.nzb").exists());
}

#[tokio::test]
async fn test_header_check_stats_every_article() {
    let state = Arc::new(ServerState::default());
    let port = spawn_server(Arc::clone(&state)).await;

    let work = tempfile::tempdir().unwrap();
    let nzb_dir = tempfile::tempdir().unwrap();
    let file = work.path().join("a.bin");
    std::fs::write(&file, patterned(300)).unwrap();

    let mut config = config(port, nzb_dir.path());
    config.posting.header_check = true;
    let uploader = Uploader::new(config).unwrap();
    let summary = uploader.upload(UploadMode::Files(vec![file])).await.unwrap();
    assert_eq!(summary.articles_posted, 3);

    let mut checked = state.stats.lock().unwrap().clone();
    checked.sort();
    assert_eq!(
        checked,
        vec!["<part0@mock.test>", "<part1@mock.test>", "<part2@mock.test>"]
    );

    let xml = std::fs::read_to_string(nzb_dir.path().join("a.bin.nzb")).unwrap();
    for id in ["part0@mock.test", "part1@mock.test", "part2@mock.test"] {
        assert!(xml.contains(id), "{} missing from NZB", id);
    }
}

#[tokio::test]
async fn test_exhausted_retries_leave_the_run_incomplete() {
    // One connection, so the first article takes both rejections
    let state = Arc::new(ServerState::rejecting(441, 2));
    let port = spawn_server(Arc::clone(&state)).await;

    let work = tempfile::tempdir().unwrap();
    let nzb_dir = tempfile::tempdir().unwrap();
    let file = work.path().join("a.bin");
    std::fs::write(&file, patterned(300)).unwrap();

    let mut config = config(port, nzb_dir.path());
    config.usenet.connections = 1;
    config.usenet.retry_attempts = 2;
    let recorder = Arc::new(SummaryRecorder::default());
    let uploader = Uploader::new(config)
        .unwrap()
        .with_observer(Arc::clone(&recorder) as Arc<dyn UploadObserver>);

    let error = uploader
        .upload(UploadMode::Files(vec![file]))
        .await
        .unwrap_err();
    assert!(matches!(
        error,
        UlNzbError::Upload(UploadError::Incomplete { remaining: 1 })
    ));

    let summary = recorder.summary.lock().unwrap().clone().unwrap();
    assert_eq!(summary.articles_failed, 1);
    assert_eq!(summary.articles_posted, 2);
    assert_eq!(summary.retries, 1);
    assert!(summary.nzb.is_empty());
    assert!(!nzb_dir.path().join("a.bin.nzb").exists());
}

#[tokio::test]
async fn test_cancelled_run_quits_every_session() {
    let state = Arc::new(ServerState::rejecting(441, u32::MAX));
    let port = spawn_server(Arc::clone(&state)).await;

    let work = tempfile::tempdir().unwrap();
    let nzb_dir = tempfile::tempdir().unwrap();
    let file = work.path().join("a.bin");
    std::fs::write(&file, patterned(1000)).unwrap();

    let mut config = config(port, nzb_dir.path());
    config.usenet.reconnect_delay = 1;
    let uploader = Uploader::new(config).unwrap();

    let cancel = uploader.cancellation_token();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        cancel.cancel();
    });

    let error = uploader
        .upload(UploadMode::Files(vec![file]))
        .await
        .unwrap_err();
    assert!(error.is_cancelled());
    assert_eq!(state.quits.load(Ordering::SeqCst), 2);
    assert!(state.articles().is_empty());
}

#[tokio::test]
async fn test_cancel_during_header_check_keeps_posted_article() {
    let state = Arc::new(ServerState::default());
    let port = spawn_server(Arc::clone(&state)).await;

    let work = tempfile::tempdir().unwrap();
    let nzb_dir = tempfile::tempdir().unwrap();
    let file = work.path().join("a.bin");
    std::fs::write(&file, patterned(100)).unwrap();

    let mut config = config(port, nzb_dir.path());
    config.usenet.connections = 1;
    config.posting.header_check = true;
    let recorder = Arc::new(SummaryRecorder::default());
    let uploader = Uploader::new(config)
        .unwrap()
        .with_observer(Arc::clone(&recorder) as Arc<dyn UploadObserver>);

    // STAT waits a second, cancel well inside that window
    let cancel = uploader.cancellation_token();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        cancel.cancel();
    });

    let error = uploader
        .upload(UploadMode::Files(vec![file]))
        .await
        .unwrap_err();
    assert!(error.is_cancelled());
    assert!(state.stats.lock().unwrap().is_empty());

    let summary = recorder.summary.lock().unwrap().clone().unwrap();
    assert_eq!(summary.articles_posted, 1);
    let listing = NzbListing::from_file(nzb_dir.path().join("a.bin.nzb")).unwrap();
    assert_eq!(listing.total_segments(), 1);
    assert_eq!(state.quits.load(Ordering::SeqCst), 1);
}
