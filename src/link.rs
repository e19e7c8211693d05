//! Mirrors the telemetry table to a remote server over TCP.
//!
//! ## Message format
//!
//! One JSON object per line, in both directions:
//!
//! ```text
//! {"key":"targetAngle","value":-4.25}
//! {"key":"request","value":true}
//! ```
//!
//! On connect the whole table is sent, then every local write as it happens.
//! Lines from the server are applied to the table as remote writes. The
//! pipeline never waits on this link; when the server is away the table keeps
//! working locally and the link retries.

use crate::config::TelemetryConfig;
use crate::error::{Result, VisionError};
use crate::telemetry::{Origin, TableEvent, TableValue, TelemetryStore};
use crossbeam::channel::Receiver;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const FLUSH_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireEntry {
    pub key: String,
    pub value: TableValue,
}

impl WireEntry {
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| VisionError::Telemetry(e.to_string()))
    }

    pub fn decode(line: &str) -> Result<Self> {
        serde_json::from_str(line).map_err(|e| VisionError::Telemetry(format!("bad line {:?}: {}", line, e)))
    }
}

enum Session {
    Disconnected,
    Shutdown,
}

pub struct TelemetryLink {
    store: Arc<dyn TelemetryStore>,
    addr: String,
    reconnect_interval: Duration,
}

impl TelemetryLink {
    pub fn new(store: Arc<dyn TelemetryStore>, config: &TelemetryConfig) -> Self {
        Self {
            store,
            addr: config.server.clone(),
            reconnect_interval: Duration::from_millis(config.reconnect_interval_ms),
        }
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    /// Connects, serves, and reconnects until `shutdown` turns true.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let outgoing = self
            .store
            .subscribe(Box::new(|event: &TableEvent| event.origin == Origin::Local), false);

        loop {
            if *shutdown.borrow() {
                break;
            }

            match TcpStream::connect(&self.addr).await {
                Ok(stream) => {
                    info!("Telemetry link connected to {}", self.addr);
                    match self.serve(stream, &outgoing, &mut shutdown).await {
                        Ok(Session::Shutdown) => break,
                        Ok(Session::Disconnected) => warn!("Telemetry server {} closed the connection", self.addr),
                        Err(e) => warn!("Telemetry link to {} failed: {}", self.addr, e),
                    }
                }
                Err(e) => {
                    debug!("Can't connect to telemetry server {}: {}", self.addr, e);
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.reconnect_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!("Telemetry link exit");
    }

    async fn serve(
        &self,
        stream: TcpStream,
        outgoing: &Receiver<TableEvent>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Session> {
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        // The snapshot below supersedes anything queued while disconnected
        outgoing.try_iter().for_each(drop);
        for (key, value) in self.store.entries() {
            send(&mut writer, WireEntry { key, value }).await?;
        }

        let mut flush = tokio::time::interval(FLUSH_INTERVAL);
        loop {
            tokio::select! {
                line = lines.next_line() => match line? {
                    Some(line) => self.apply_remote(&line),
                    None => return Ok(Session::Disconnected),
                },
                _ = flush.tick() => {
                    for event in outgoing.try_iter() {
                        send(&mut writer, WireEntry { key: event.key, value: event.value }).await?;
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return Ok(Session::Shutdown);
                    }
                }
            }
        }
    }

    fn apply_remote(&self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        match WireEntry::decode(line) {
            Ok(entry) => {
                debug!("Remote set {} = {:?}", entry.key, entry.value);
                self.store.put_batch(&[(entry.key.as_str(), entry.value)], Origin::Remote);
            }
            Err(e) => warn!("Ignoring telemetry line: {}", e),
        }
    }
}

async fn send(writer: &mut OwnedWriteHalf, entry: WireEntry) -> Result<()> {
    let mut line = entry.encode()?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_format() {
        let entry = WireEntry {
            key: "targetAngle".to_string(),
            value: TableValue::Number(-4.25),
        };
        assert_eq!(entry.encode().unwrap(), r#"{"key":"targetAngle","value":-4.25}"#);

        let request = WireEntry::decode(r#"{"key":"request","value":true}"#).unwrap();
        assert_eq!(request.value, TableValue::Boolean(true));

        let whole = WireEntry::decode(r#"{"key":"targetDistance","value":1200}"#).unwrap();
        assert_eq!(whole.value, TableValue::Number(1200.0));

        assert!(WireEntry::decode("request=true").is_err());
    }
}
