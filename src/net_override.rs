//! Supervision of the local network overlay process.
//!
//! The overlay is a child process that redirects cluster traffic on the workstation. It is
//! launched, relaunched if it dies, and considered up once its API answers. If that does
//! not happen within a fixed horizon, the launch fails and the child is killed.

use std::{
    error::Error as StdError,
    ffi::OsString,
    future::Future,
    io,
    path::PathBuf,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use tokio::{
    process::{Child, Command},
    time::{sleep, timeout_at, Instant},
};

pub type CheckError = Box<dyn StdError + Send + Sync>;

/// Tells whether the overlay is serving.
pub trait Readiness {
    fn check(&self) -> impl Future<Output = Result<(), CheckError>> + Send;
}

/// Fetches the overlay's routing tables through its proxied API host.
#[derive(Debug, Clone, Default)]
pub struct TableCheck {
    client: reqwest::Client,
}

impl TableCheck {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// The host name changes every second so that no resolver answers from cache.
    fn url() -> String {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        format!("http://teleproxy{now}.cachebust.telepresence.io/api/tables")
    }
}

impl Readiness for TableCheck {
    async fn check(&self) -> Result<(), CheckError> {
        let response = self.client.get(Self::url()).send().await?;
        response.error_for_status()?.bytes().await?;
        Ok(())
    }
}

/// How to start the overlay and how long to wait for it.
#[derive(Debug, Clone)]
pub struct OverlayCommand {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl OverlayCommand {
    /// `<exe> teleproxy intercept <dns> <fallback>`
    pub fn teleproxy(exe: impl Into<PathBuf>, dns: &str, fallback: &str) -> Self {
        Self {
            program: exe.into(),
            args: ["teleproxy", "intercept", dns, fallback]
                .into_iter()
                .map(OsString::from)
                .collect(),
            timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(500),
        }
    }

    fn spawn(&self) -> io::Result<Child> {
        Command::new(&self.program)
            .args(&self.args)
            .kill_on_drop(true)
            .spawn()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NetOverrideError {
    #[error("failed to launch {}: {source}", .program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("network overlay not ready after {timeout:?}: {source}")]
    NotReady {
        timeout: Duration,
        #[source]
        source: CheckError,
    },
}

/// A running, ready overlay. Dropping it kills the process.
#[derive(Debug)]
pub struct NetOverride {
    child: Child,
    launches: usize,
}

impl NetOverride {
    /// Starts the overlay and waits until `readiness` passes.
    pub async fn launch(
        command: &OverlayCommand,
        readiness: &impl Readiness,
    ) -> Result<Self, NetOverrideError> {
        let deadline = Instant::now() + command.timeout;
        let spawn = || {
            command.spawn().map_err(|source| NetOverrideError::Spawn {
                program: command.program.clone(),
                source,
            })
        };

        let mut child = spawn()?;
        let mut launches = 1;
        loop {
            match child.try_wait() {
                Ok(None) => {}
                Ok(Some(status)) => {
                    log::warn!("Network overlay exited with {status}, relaunching");
                    child = spawn()?;
                    launches += 1;
                }
                Err(err) => log::warn!("Unable to poll network overlay: {err}"),
            }

            // a single check must not outlive the horizon either
            let source = match timeout_at(deadline, readiness.check()).await {
                Ok(Ok(())) => {
                    log::info!("Network overlay is ready");
                    return Ok(Self { child, launches });
                }
                Ok(Err(err)) => err,
                Err(elapsed) => return Err(give_up(child, command, Box::new(elapsed)).await),
            };
            log::debug!("Network overlay not ready yet: {source}");

            if Instant::now() + command.poll_interval > deadline {
                return Err(give_up(child, command, source).await);
            }
            sleep(command.poll_interval).await;
        }
    }

    /// How many times the process had to be started before it became ready.
    pub fn launches(&self) -> usize {
        self.launches
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    pub async fn stop(mut self) -> io::Result<()> {
        self.child.kill().await
    }
}

async fn give_up(
    mut child: Child,
    command: &OverlayCommand,
    source: CheckError,
) -> NetOverrideError {
    if let Err(err) = child.kill().await {
        log::warn!("Unable to kill network overlay: {err}");
    }
    NetOverrideError::NotReady {
        timeout: command.timeout,
        source,
    }
}
