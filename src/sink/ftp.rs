//! FTP sink session.
//!
//! One long-lived connection, serialized behind a single mutex: the remote
//! endpoint does not accept control-channel commands while a transfer is in
//! progress on the same connection, so `send`, `status`, and the periodic
//! keep-alive noop never run concurrently.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use suppaftp::AsyncFtpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::FtpConfig;
use crate::shutdown::ShutdownSignal;
use crate::sink::{Sink, SinkError};
use crate::transform::Artifact;

const SENTINEL_FILENAME: &str = ".bztest";
const INITIAL_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Establishes fresh connections to the endpoint. Split from the session
/// so reconnect behavior is exercisable against a scripted endpoint.
#[async_trait]
pub trait FtpDialer: Send + Sync + 'static {
    type Conn: FtpConnection;

    async fn dial(&self) -> Result<Self::Conn, SinkError>;
}

/// The verbs the session needs from one established connection.
#[async_trait]
pub trait FtpConnection: Send + 'static {
    async fn login(&mut self, username: &str, password: &str) -> Result<(), SinkError>;

    async fn cwd(&mut self, path: &str) -> Result<(), SinkError>;

    async fn put(&mut self, filename: &str, data: &[u8]) -> Result<(), SinkError>;

    async fn delete(&mut self, filename: &str) -> Result<(), SinkError>;

    async fn noop(&mut self) -> Result<(), SinkError>;

    async fn quit(&mut self) -> Result<(), SinkError>;
}

/// Dials the configured host with a bounded connect timeout.
pub struct SuppaftpDialer {
    host: String,
    timeout: Duration,
}

impl SuppaftpDialer {
    pub fn new(host: impl Into<String>, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            timeout,
        }
    }
}

#[async_trait]
impl FtpDialer for SuppaftpDialer {
    type Conn = AsyncFtpStream;

    async fn dial(&self) -> Result<AsyncFtpStream, SinkError> {
        info!(addr = %self.host, "Connecting ftp client");
        match tokio::time::timeout(self.timeout, AsyncFtpStream::connect(self.host.as_str())).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(SinkError::Connect(e.to_string())),
            Err(_) => Err(SinkError::ConnectTimeout(self.timeout.as_millis())),
        }
    }
}

#[async_trait]
impl FtpConnection for AsyncFtpStream {
    async fn login(&mut self, username: &str, password: &str) -> Result<(), SinkError> {
        AsyncFtpStream::login(self, username, password)
            .await
            .map_err(|e| SinkError::Login(e.to_string()))
    }

    async fn cwd(&mut self, path: &str) -> Result<(), SinkError> {
        AsyncFtpStream::cwd(self, path)
            .await
            .map_err(|e| SinkError::Transfer(e.to_string()))
    }

    async fn put(&mut self, filename: &str, data: &[u8]) -> Result<(), SinkError> {
        let mut reader = futures::io::Cursor::new(data);
        AsyncFtpStream::put_file(self, filename, &mut reader)
            .await
            .map(|_| ())
            .map_err(|e| SinkError::Transfer(e.to_string()))
    }

    async fn delete(&mut self, filename: &str) -> Result<(), SinkError> {
        AsyncFtpStream::rm(self, filename)
            .await
            .map_err(|e| SinkError::Transfer(e.to_string()))
    }

    async fn noop(&mut self) -> Result<(), SinkError> {
        AsyncFtpStream::noop(self)
            .await
            .map_err(|e| SinkError::Transfer(e.to_string()))
    }

    async fn quit(&mut self) -> Result<(), SinkError> {
        AsyncFtpStream::quit(self)
            .await
            .map_err(|e| SinkError::Transfer(e.to_string()))
    }
}

/// The FTP sink session.
pub struct FtpSink<D: FtpDialer> {
    dialer: D,
    cfg: FtpConfig,
    conn: Mutex<D::Conn>,
}

impl<D: FtpDialer> FtpSink<D> {
    /// Connect, authenticate, and prove the remote path is writable.
    pub async fn connect(dialer: D, cfg: FtpConfig) -> Result<Arc<Self>, SinkError> {
        let mut conn = dialer.dial().await?;

        if let Err(e) = conn.login(&cfg.username, &cfg.password).await {
            error!(ftp_username = %cfg.username, error = %e, "Login error");
            let _ = conn.quit().await;
            return Err(e);
        }

        if let Err(e) = check_path(&mut conn, &cfg.path).await {
            let _ = conn.quit().await;
            return Err(e);
        }

        Ok(Arc::new(Self {
            dialer,
            cfg,
            conn: Mutex::new(conn),
        }))
    }

    /// Start the periodic keep-alive if an interval is configured.
    ///
    /// Noop failures are logged and never fatal. The task stops on
    /// shutdown.
    pub fn spawn_keepalive(self: &Arc<Self>, shutdown: &ShutdownSignal) -> Option<JoinHandle<()>> {
        let Some(interval) = self.cfg.keepalive_interval else {
            info!("No ftp keepalive configured");
            return None;
        };

        info!(interval_secs = interval.as_secs(), "Starting periodic ftp keepalive");

        let sink = Arc::clone(self);
        let mut shutdown_rx = shutdown.subscribe();

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; the session was just checked.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = ticker.tick() => {
                        let mut conn = sink.conn.lock().await;
                        match conn.noop().await {
                            Ok(()) => debug!("Keepalive noop success"),
                            Err(e) => error!(error = %e, "Keepalive noop error"),
                        }
                    }
                }
            }
        }))
    }

    /// Tear the session down and bring up a fresh authenticated one.
    async fn reconnect(&self, conn: &mut D::Conn) -> Result<(), SinkError> {
        if let Err(e) = conn.quit().await {
            warn!(error = %e, "Reconnect disconnect error");
        }

        let mut fresh = self
            .dialer
            .dial()
            .await
            .map_err(|e| SinkError::Reconnect(e.to_string()))?;
        fresh
            .login(&self.cfg.username, &self.cfg.password)
            .await
            .map_err(|e| SinkError::Reconnect(e.to_string()))?;

        *conn = fresh;
        Ok(())
    }
}

/// Prove the remote directory is writable by storing and removing a
/// sentinel object. A failure to remove the sentinel is logged only.
async fn check_path<C: FtpConnection>(conn: &mut C, path: &str) -> Result<(), SinkError> {
    if let Err(e) = conn.cwd(path).await {
        error!(path = %path, error = %e, "Change directory error");
        return Err(e);
    }
    if let Err(e) = conn.put(SENTINEL_FILENAME, b"testing").await {
        error!(path = %path, error = %e, "Create test file error");
        return Err(e);
    }
    if let Err(e) = conn.delete(SENTINEL_FILENAME).await {
        error!(path = %path, error = %e, "Remove test file error");
    }
    Ok(())
}

#[async_trait]
impl<D: FtpDialer> Sink for FtpSink<D> {
    async fn send(&self, artifact: &Artifact) -> Result<(), SinkError> {
        let mut conn = self.conn.lock().await;

        let max_attempts = self.cfg.send_retries + 1;
        let mut delay = INITIAL_RETRY_DELAY;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match conn.put(artifact.filename(), artifact.data()).await {
                Ok(()) => {
                    info!(host = %self.cfg.host, filename = %artifact.filename(), "Ftp write success");
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        filename = %artifact.filename(),
                        attempt = attempt,
                        error = %e,
                        "Ftp write error"
                    );

                    if e.is_broken_pipe() {
                        self.reconnect(&mut conn).await?;
                    }

                    if attempt >= max_attempts {
                        error!(filename = %artifact.filename(), "Ftp write error, retries exceeded");
                        return Err(e);
                    }

                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        }
    }

    async fn status(&self) -> Result<(), SinkError> {
        let mut conn = self.conn.lock().await;
        conn.noop().await.map_err(|e| {
            error!(error = %e, "Ftp noop error");
            e
        })
    }

    async fn close(&self) -> Result<(), SinkError> {
        info!("Disconnecting ftp client");
        let mut conn = self.conn.lock().await;
        conn.quit().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use tokio::sync::Notify;

    #[derive(Default)]
    struct Gate {
        started: Notify,
        release: Notify,
    }

    /// Shared scripting state handed to every connection the dialer makes.
    #[derive(Default)]
    struct Script {
        log: StdMutex<Vec<String>>,
        put_outcomes: StdMutex<VecDeque<Result<(), SinkError>>>,
        delete_fails: StdMutex<bool>,
        put_gate: Option<Arc<Gate>>,
    }

    impl Script {
        fn record(&self, entry: impl Into<String>) {
            self.log.lock().unwrap().push(entry.into());
        }

        fn log(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }

        fn push_put(&self, outcome: Result<(), SinkError>) {
            self.put_outcomes.lock().unwrap().push_back(outcome);
        }
    }

    struct MockConn {
        script: Arc<Script>,
    }

    #[async_trait]
    impl FtpConnection for MockConn {
        async fn login(&mut self, username: &str, _password: &str) -> Result<(), SinkError> {
            self.script.record(format!("login {username}"));
            Ok(())
        }

        async fn cwd(&mut self, path: &str) -> Result<(), SinkError> {
            self.script.record(format!("cwd {path}"));
            Ok(())
        }

        async fn put(&mut self, filename: &str, _data: &[u8]) -> Result<(), SinkError> {
            self.script.record(format!("put {filename}"));
            if let Some(gate) = &self.script.put_gate {
                gate.started.notify_one();
                gate.release.notified().await;
            }
            self.script
                .put_outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(()))
        }

        async fn delete(&mut self, filename: &str) -> Result<(), SinkError> {
            self.script.record(format!("delete {filename}"));
            if *self.script.delete_fails.lock().unwrap() {
                return Err(SinkError::Transfer("550 not allowed".to_string()));
            }
            Ok(())
        }

        async fn noop(&mut self) -> Result<(), SinkError> {
            self.script.record("noop".to_string());
            Ok(())
        }

        async fn quit(&mut self) -> Result<(), SinkError> {
            self.script.record("quit".to_string());
            Ok(())
        }
    }

    struct MockDialer {
        script: Arc<Script>,
        dials: Arc<AtomicUsize>,
        fail_dials_from: Option<usize>,
    }

    impl MockDialer {
        fn new(script: Arc<Script>) -> Self {
            Self {
                script,
                dials: Arc::new(AtomicUsize::new(0)),
                fail_dials_from: None,
            }
        }
    }

    #[async_trait]
    impl FtpDialer for MockDialer {
        type Conn = MockConn;

        async fn dial(&self) -> Result<MockConn, SinkError> {
            let n = self.dials.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(from) = self.fail_dials_from {
                if n >= from {
                    return Err(SinkError::Connect("connection refused".to_string()));
                }
            }
            self.script.record("dial".to_string());
            Ok(MockConn {
                script: Arc::clone(&self.script),
            })
        }
    }

    fn cfg(send_retries: u32) -> FtpConfig {
        FtpConfig {
            host: "ftp.example.com:21".to_string(),
            path: "/inbound".to_string(),
            username: "courier".to_string(),
            password: "secret".to_string(),
            connect_timeout: Duration::from_secs(5),
            keepalive_interval: None,
            send_retries,
        }
    }

    fn artifact() -> Artifact {
        Artifact::new("benzinga_1_0_rss2.xml".to_string(), b"<rss/>".to_vec())
    }

    #[tokio::test]
    async fn test_connect_logs_in_and_checks_path() {
        let script = Arc::new(Script::default());
        let dialer = MockDialer::new(Arc::clone(&script));

        FtpSink::connect(dialer, cfg(0)).await.unwrap();

        assert_eq!(
            script.log(),
            vec![
                "dial",
                "login courier",
                "cwd /inbound",
                "put .bztest",
                "delete .bztest"
            ]
        );
    }

    #[tokio::test]
    async fn test_sentinel_delete_failure_is_not_fatal() {
        let script = Arc::new(Script::default());
        *script.delete_fails.lock().unwrap() = true;
        let dialer = MockDialer::new(Arc::clone(&script));

        assert!(FtpSink::connect(dialer, cfg(0)).await.is_ok());
    }

    #[tokio::test]
    async fn test_send_writes_artifact() {
        let script = Arc::new(Script::default());
        let dialer = MockDialer::new(Arc::clone(&script));
        let sink = FtpSink::connect(dialer, cfg(0)).await.unwrap();

        sink.send(&artifact()).await.unwrap();
        assert!(script.log().contains(&"put benzinga_1_0_rss2.xml".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_broken_pipe_triggers_reconnect_then_succeeds() {
        let script = Arc::new(Script::default());
        script.push_put(Ok(())); // sentinel
        script.push_put(Err(SinkError::Transfer("write: broken pipe".to_string())));
        script.push_put(Ok(()));

        let dialer = MockDialer::new(Arc::clone(&script));
        let dials = Arc::clone(&dialer.dials);
        let sink = FtpSink::connect(dialer, cfg(2)).await.unwrap();

        sink.send(&artifact()).await.unwrap();

        // One reconnect: the initial dial plus one more.
        assert_eq!(dials.load(Ordering::SeqCst), 2);

        let log = script.log();
        let first_put = log.iter().position(|e| e == "put benzinga_1_0_rss2.xml").unwrap();
        assert_eq!(&log[first_put + 1..first_put + 4], ["quit", "dial", "login courier"]);
        assert_eq!(log[first_put + 4], "put benzinga_1_0_rss2.xml");
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted_propagates_error() {
        let script = Arc::new(Script::default());
        script.push_put(Ok(())); // sentinel
        for _ in 0..3 {
            script.push_put(Err(SinkError::Transfer("426 transfer aborted".to_string())));
        }

        let dialer = MockDialer::new(Arc::clone(&script));
        let sink = FtpSink::connect(dialer, cfg(2)).await.unwrap();

        let err = sink.send(&artifact()).await.unwrap_err();
        assert!(matches!(err, SinkError::Transfer(_)));

        let puts = script
            .log()
            .iter()
            .filter(|e| *e == "put benzinga_1_0_rss2.xml")
            .count();
        assert_eq!(puts, 3);
    }

    #[tokio::test]
    async fn test_reconnect_failure_is_fatal() {
        let script = Arc::new(Script::default());
        script.push_put(Ok(())); // sentinel
        script.push_put(Err(SinkError::Transfer("write: broken pipe".to_string())));

        let mut dialer = MockDialer::new(Arc::clone(&script));
        dialer.fail_dials_from = Some(2);
        let sink = FtpSink::connect(dialer, cfg(3)).await.unwrap();

        let err = sink.send(&artifact()).await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_send_and_status_are_serialized() {
        let gate = Arc::new(Gate::default());
        let script = Arc::new(Script {
            put_gate: Some(Arc::clone(&gate)),
            ..Script::default()
        });
        // Sentinel put must pass through the gate too.
        let release_sentinel = Arc::clone(&gate);
        let connect_script = Arc::clone(&script);
        let connect = tokio::spawn(async move {
            FtpSink::connect(MockDialer::new(connect_script), cfg(0)).await
        });
        release_sentinel.started.notified().await;
        release_sentinel.release.notify_one();
        let sink = connect.await.unwrap().unwrap();

        let send_sink = Arc::clone(&sink);
        let send = tokio::spawn(async move { send_sink.send(&artifact()).await });

        // The transfer is in flight and holds the session.
        gate.started.notified().await;

        let status_sink = Arc::clone(&sink);
        let status = tokio::spawn(async move { status_sink.status().await });
        tokio::task::yield_now().await;

        gate.release.notify_one();
        send.await.unwrap().unwrap();
        status.await.unwrap().unwrap();

        let log = script.log();
        let put = log.iter().rposition(|e| e == "put benzinga_1_0_rss2.xml").unwrap();
        let noop = log.iter().rposition(|e| e == "noop").unwrap();
        assert!(put < noop, "status noop ran before the transfer finished: {log:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalive_issues_noops_until_shutdown() {
        let script = Arc::new(Script::default());
        let dialer = MockDialer::new(Arc::clone(&script));

        let mut config = cfg(0);
        config.keepalive_interval = Some(Duration::from_secs(30));

        let sink = FtpSink::connect(dialer, config).await.unwrap();
        let shutdown = ShutdownSignal::new();
        let handle = sink.spawn_keepalive(&shutdown).unwrap();

        tokio::time::sleep(Duration::from_secs(95)).await;
        shutdown.trigger();
        handle.await.unwrap();

        let noops = script.log().iter().filter(|e| *e == "noop").count();
        assert_eq!(noops, 3);
    }

    #[tokio::test]
    async fn test_keepalive_disabled_without_interval() {
        let script = Arc::new(Script::default());
        let sink = FtpSink::connect(MockDialer::new(script), cfg(0)).await.unwrap();
        assert!(sink.spawn_keepalive(&ShutdownSignal::new()).is_none());
    }
}
