//! Child-process helpers shared across the workspace.
//!
//! - [`tokio_command`] builds a command that never flashes a console window
//!   on Windows.
//! - [`stop_gracefully`] asks a long-running child (ffmpeg-style, reading
//!   `q` on stdin) to finish its current output before falling back to a kill.

use std::ffi::OsStr;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Apply the Windows `CREATE_NO_WINDOW` flag to child processes.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self);
}

#[cfg(feature = "tokio")]
impl NoWindowExt for tokio::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.as_std_mut().creation_flags(CREATE_NO_WINDOW);
        }
    }
}

/// Create a `tokio::process::Command` with `CREATE_NO_WINDOW` applied on Windows.
#[cfg(feature = "tokio")]
pub fn tokio_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    cmd.no_window();
    cmd
}

/// How a child process ended after [`stop_gracefully`].
#[cfg(feature = "tokio")]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The process had already exited or honoured the quit request.
    Exited(Option<i32>),
    /// The grace period elapsed and the process was killed.
    Killed,
}

/// Stop a child process, giving it `grace` to exit on its own first.
///
/// If the child's stdin is piped, `q\n` is written to it (ffmpeg's interactive
/// quit key) and stdin is closed. The child is then awaited for at most
/// `grace`; after that it is killed and reaped.
#[cfg(feature = "tokio")]
pub async fn stop_gracefully(
    child: &mut tokio::process::Child,
    grace: std::time::Duration,
) -> std::io::Result<StopOutcome> {
    use tokio::io::AsyncWriteExt;

    if let Some(status) = child.try_wait()? {
        return Ok(StopOutcome::Exited(status.code()));
    }

    if let Some(mut stdin) = child.stdin.take() {
        // A closed pipe only means the child is already on its way out.
        let _ = stdin.write_all(b"q\n").await;
        let _ = stdin.flush().await;
        drop(stdin);
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => Ok(StopOutcome::Exited(status?.code())),
        Err(_) => {
            child.kill().await?;
            Ok(StopOutcome::Killed)
        }
    }
}
