//! Real OS process supervision for locally-spawned game-server processes (`SPEC_FULL.md` §4.2):
//! `tokio::process::Command`, a tracked `Child` handle, `SIGTERM` before an escalating `kill()`.

use std::time::Duration;

use control_plane_common::{now_unix, ServerStatus, ServerUid};
use tokio::process::{Child, Command};
use tracing::{info, warn};

pub struct ManagedServer {
    pub uid: ServerUid,
    pub port: u16,
    pub owner_id: Option<u64>,
    pub private: bool,
    pub status: ServerStatus,
    pub player_count: u32,
    pub last_update: u64,
    pub empty_since: Option<u64>,
    child: Child,
}

impl ManagedServer {
    /// Launches the configured game binary with `--server --port P --master URL --uid UID`,
    /// plus `--private --owner OID` when this is a private server.
    pub fn spawn(
        binary_path: &str,
        uid: ServerUid,
        port: u16,
        master_url: &str,
        owner_id: Option<u64>,
        private: bool,
    ) -> std::io::Result<Self> {
        let mut command = Command::new(binary_path);
        command
            .arg("--server")
            .arg("--port")
            .arg(port.to_string())
            .arg("--master")
            .arg(master_url)
            .arg("--uid")
            .arg(uid.as_str());

        if private {
            command.arg("--private");
            if let Some(owner) = owner_id {
                command.arg("--owner").arg(owner.to_string());
            }
        }

        let child = command.kill_on_drop(true).spawn()?;
        info!(%uid, port, pid = ?child.id(), "spawned game-server process");

        Ok(Self {
            uid,
            port,
            owner_id,
            private,
            status: ServerStatus::Starting,
            player_count: 0,
            last_update: now_unix(),
            empty_since: None,
            child,
        })
    }

    pub fn mark_running(&mut self) {
        self.status = ServerStatus::Running;
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// `graceful=true`: `SIGTERM`, wait up to `grace` for exit, else force-kill.
    /// `graceful=false`: force-kill immediately.
    pub async fn stop(mut self, graceful: bool, grace: Duration) {
        self.status = ServerStatus::Stopping;

        if graceful {
            if let Some(pid) = self.pid() {
                // SAFETY: `pid` came from this process's own tracked child handle.
                unsafe {
                    libc::kill(pid as i32, libc::SIGTERM);
                }
            }

            let deadline = tokio::time::Instant::now() + grace;
            loop {
                match self.child.try_wait() {
                    Ok(Some(_)) => {
                        info!(uid = %self.uid, "server exited after SIGTERM");
                        return;
                    }
                    Ok(None) => {}
                    Err(err) => {
                        warn!(uid = %self.uid, error = %err, "error polling child exit status");
                        break;
                    }
                }
                if tokio::time::Instant::now() >= deadline {
                    warn!(uid = %self.uid, "graceful stop timed out, force-killing");
                    break;
                }
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
        }

        if let Err(err) = self.child.kill().await {
            warn!(uid = %self.uid, error = %err, "force-kill failed (process may have already exited)");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spawning_an_invalid_binary_path_fails_cleanly() {
        let result = ManagedServer::spawn(
            "/nonexistent/binary/path",
            ServerUid::from("test-9000".to_string()),
            9000,
            "http://127.0.0.1:8080",
            None,
            false,
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn stop_force_kills_a_running_sleep_process() {
        let managed = ManagedServer::spawn(
            "/bin/sleep",
            ServerUid::from("test-9001".to_string()),
            9001,
            "http://127.0.0.1:8080",
            None,
            false,
        );
        let Ok(mut managed) = managed else {
            return;
        };
        managed.mark_running();
        managed.stop(false, Duration::from_secs(1)).await;
    }
}
