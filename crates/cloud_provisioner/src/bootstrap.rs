//! Renders the cloud-init bootstrap script embedded in every `create_host` request
//! (`SPEC_FULL.md` §4.1). The script must be idempotent under retry: the IaaS may replay
//! user-data on reboot, so every step here is a no-op on a machine that already ran it.

/// Builds the bootstrap script for `host_id`. `control_plane_url` is where the new host's
/// Worker Agent will register and where it downloads the game-server binary, authenticated
/// with `shared_access_key`.
pub fn render(host_id: &str, control_plane_url: &str, shared_access_key: &str) -> String {
    format!(
        r#"#!/usr/bin/env bash
set -euo pipefail

HOST_ID="{host_id}"
CONTROL_PLANE_URL="{control_plane_url}"
ACCESS_KEY="{shared_access_key}"
BIN_DIR="/opt/worker_agent"
BINARY_PATH="$BIN_DIR/game_server"

mkdir -p "$BIN_DIR"

if [ ! -x "$BINARY_PATH" ]; then
  curl -sSf -X POST "$CONTROL_PLANE_URL/download_binary" \
    -H "Content-Type: application/json" \
    -d "{{\"access_key\":\"$ACCESS_KEY\"}}" \
    -o "$BINARY_PATH"
  chmod +x "$BINARY_PATH"
fi

if ! pgrep -f "worker_agent --host-id $HOST_ID" > /dev/null; then
  nohup "$BIN_DIR/worker_agent" \
    --host-id "$HOST_ID" \
    --control-plane-url "$CONTROL_PLANE_URL" \
    --binary-path "$BINARY_PATH" \
    > /var/log/worker_agent.log 2>&1 &
fi
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_embeds_the_host_id_and_url() {
        let script = render("host-7", "https://cp.example.com", "secret-key");
        assert!(script.contains("HOST_ID=\"host-7\""));
        assert!(script.contains("https://cp.example.com"));
        assert!(script.contains("secret-key"));
    }

    #[test]
    fn download_step_is_guarded_by_an_existence_check() {
        let script = render("host-1", "https://cp", "k");
        assert!(script.contains("if [ ! -x \"$BINARY_PATH\" ]"));
    }
}
