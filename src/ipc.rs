//! IPC surface.
//!
//! A name-resolved endpoint publishing the daemon's request/response and
//! event contract. The transport is a Unix domain socket carrying
//! newline-delimited JSON: requests carry an `id`, a `method`, and
//! positional `params`; responses echo the `id`; published events are
//! pushed to every connected client as they occur.

use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;

use crate::daemon::DaemonHandle;
use crate::event::{event_callback, EventLog, SequencedEvent};

/// Buffered events per connection before a slow subscriber starts lagging.
const EVENT_BUFFER: usize = 64;

#[derive(Debug, Deserialize)]
struct IpcRequest {
    id: u64,
    method: String,
    #[serde(default)]
    params: Vec<Value>,
}

#[derive(Debug, Serialize)]
struct IpcResponse {
    id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Socket server publishing the daemon surface.
pub struct IpcServer {
    path: PathBuf,
    handle: DaemonHandle,
    events: broadcast::Sender<SequencedEvent>,
}

impl IpcServer {
    /// Creates the server and bridges the event log into its broadcast
    /// channel. Call [`run`](IpcServer::run) to start accepting.
    pub fn new(path: impl Into<PathBuf>, handle: DaemonHandle, events: &EventLog) -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_BUFFER);
        let bridge = tx.clone();
        events.subscribe(event_callback(move |entry| {
            let _ = bridge.send(entry.clone());
        }));
        Self {
            path: path.into(),
            handle,
            events: tx,
        }
    }

    /// Binds the socket (replacing a stale one) and serves connections
    /// until the daemon goes away.
    pub async fn run(self) -> io::Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        let listener = UnixListener::bind(&self.path)?;
        tracing::info!(path = %self.path.display(), "IPC service published");

        loop {
            let (stream, _addr) = listener.accept().await?;
            let handle = self.handle.clone();
            let events = self.events.subscribe();
            tokio::spawn(async move {
                if let Err(err) = serve_connection(stream, handle, events).await {
                    tracing::debug!(?err, "IPC connection closed");
                }
            });
        }
    }
}

async fn serve_connection(
    stream: UnixStream,
    handle: DaemonHandle,
    mut events: broadcast::Receiver<SequencedEvent>,
) -> io::Result<()> {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if line.trim().is_empty() {
                    continue;
                }
                let response = process_line(&line, &handle).await;
                let mut payload = serde_json::to_vec(&response).unwrap_or_default();
                payload.push(b'\n');
                write.write_all(&payload).await?;
            }
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        let mut payload = serde_json::to_vec(&event).unwrap_or_default();
                        payload.push(b'\n');
                        write.write_all(&payload).await?;
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "IPC subscriber lagged, events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
    Ok(())
}

async fn process_line(line: &str, handle: &DaemonHandle) -> IpcResponse {
    let request: IpcRequest = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(err) => {
            return IpcResponse {
                id: 0,
                result: None,
                error: Some(format!("malformed request: {err}")),
            };
        }
    };

    match dispatch(&request, handle).await {
        Ok(result) => IpcResponse {
            id: request.id,
            result: Some(result),
            error: None,
        },
        Err(error) => IpcResponse {
            id: request.id,
            result: None,
            error: Some(error),
        },
    }
}

fn string_param(request: &IpcRequest, index: usize) -> Result<String, String> {
    request
        .params
        .get(index)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| format!("{}: missing string parameter {index}", request.method))
}

async fn dispatch(request: &IpcRequest, handle: &DaemonHandle) -> Result<Value, String> {
    match request.method.as_str() {
        "get_audio_devices" => Ok(json!(handle.get_audio_devices().await)),
        "is_running" => Ok(json!(handle.is_running().await)),
        "start_with_device" => {
            let device = string_param(request, 0)?;
            Ok(json!(handle.start_with_device(&device).await))
        }
        "get_available_profiles" => Ok(json!(handle.get_available_profiles().await)),
        "load_profile" => {
            let name = string_param(request, 0)?;
            Ok(json!(handle.load_profile(&name).await))
        }
        "switch_input" => {
            let source = string_param(request, 0)?;
            let target = string_param(request, 1)?;
            Ok(json!(handle.switch_input(&source, &target).await))
        }
        "enumerate_input_sources" => Ok(json!(handle.enumerate_input_sources().await)),
        other => Err(format!("unknown method: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use tempfile::tempdir;

    use crate::config::DaemonConfig;
    use crate::controller::RoutingController;
    use crate::daemon::RoutingDaemon;
    use crate::devices::{AudioDeviceInfo, DeviceProvider};
    use crate::launcher::MockLauncher;
    use crate::profile::ProfileStore;
    use crate::server::MockServer;

    struct NoDevices;
    impl DeviceProvider for NoDevices {
        fn scan(&self) -> Vec<AudioDeviceInfo> {
            Vec::new()
        }
    }

    async fn request(stream: &mut UnixStream, body: &str) -> Value {
        stream.write_all(body.as_bytes()).await.unwrap();
        stream.write_all(b"\n").await.unwrap();
        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        serde_json::from_str(&line).unwrap()
    }

    #[tokio::test]
    async fn test_request_response_round_trip() {
        let dir = tempdir().unwrap();
        let socket = dir.path().join("airpatch.sock");

        let server = Arc::new(MockServer::new());
        server.add_client("rivendell_0", &["playout_0L", "record_0L"]);
        server.add_client("system", &["capture_1"]);

        let store = ProfileStore::open(dir.path().join("jack-profiles.xml"));
        let launcher = Arc::new(MockLauncher::new());
        let controller =
            RoutingController::new(server, launcher.clone(), store, DaemonConfig::default());
        let events = controller.events();
        let daemon = RoutingDaemon::new(controller, Arc::new(NoDevices), launcher);
        let handle = daemon.handle();
        tokio::spawn(daemon.run());

        let ipc = IpcServer::new(&socket, handle.clone(), &events);
        tokio::spawn(ipc.run());

        // Wait for the socket to appear.
        for _ in 0..50 {
            if socket.exists() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        let mut stream = UnixStream::connect(&socket).await.unwrap();

        let response = request(&mut stream, r#"{"id":1,"method":"is_running"}"#).await;
        assert_eq!(response["id"], 1);
        assert_eq!(response["result"], true);

        let response =
            request(&mut stream, r#"{"id":2,"method":"get_available_profiles"}"#).await;
        assert!(response["result"]
            .as_array()
            .unwrap()
            .iter()
            .any(|v| v == "live-broadcast"));

        let response = request(
            &mut stream,
            r#"{"id":3,"method":"load_profile","params":["no-such-profile"]}"#,
        )
        .await;
        assert_eq!(response["result"], false);

        let response = request(&mut stream, r#"{"id":4,"method":"bogus"}"#).await;
        assert!(response["error"]
            .as_str()
            .unwrap()
            .contains("unknown method"));

        handle.shutdown().await;
    }
}
