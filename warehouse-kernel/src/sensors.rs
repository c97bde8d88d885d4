/**
 * SENSOR BRIDGE - Distance sensors (ESP32) reporting over raw TCP
 *
 * ROLE : Accept newline-delimited JSON readings {sensor, distance_cm, alert},
 * keep the latest one per sensor for GET /sensors. Bad or over-long lines are
 * logged and skipped.
 */

use crate::models::{SensorReading, SensorsMap};
use futures::StreamExt;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio::net::TcpListener;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;

/// Longest accepted line; a reading is a few dozen bytes
pub const MAX_LINE_BYTES: usize = 4096;

#[derive(Clone, Default)]
pub struct SensorHub {
    readings: Arc<Mutex<SensorsMap>>,
}

impl SensorHub {
    pub fn record(&self, reading: SensorReading) {
        if reading.alert {
            tracing::warn!(sensor = %reading.sensor, distance_cm = reading.distance_cm, "sensor alert");
        }
        self.readings.lock().insert(reading.sensor.clone(), reading);
    }

    /// Latest reading per sensor, ordered by sensor name
    pub fn latest(&self) -> Vec<SensorReading> {
        let mut list: Vec<SensorReading> = self.readings.lock().values().cloned().collect();
        list.sort_by(|a, b| a.sensor.cmp(&b.sensor));
        list
    }

    /// Consume one sensor connection line by line until EOF or cancellation.
    pub async fn consume<R>(&self, reader: R, peer: &str, cancel: &CancellationToken)
    where
        R: AsyncRead + Unpin,
    {
        let mut lines = FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_LINE_BYTES));
        // the framed reader yields one None right after a decode error, then resumes
        let mut resuming = false;
        loop {
            let line = tokio::select! {
                _ = cancel.cancelled() => break,
                line = lines.next() => line,
            };
            match line {
                Some(Ok(line)) => {
                    resuming = false;
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<SensorReading>(line) {
                        Ok(reading) => self.record(reading),
                        Err(e) => tracing::warn!(peer, error = %e, line, "invalid sensor JSON"),
                    }
                }
                Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                    tracing::warn!(peer, max = MAX_LINE_BYTES, "over-long sensor line dropped");
                    resuming = true;
                }
                Some(Err(LinesCodecError::Io(e))) => {
                    tracing::warn!(peer, error = %e, "sensor read failed");
                    break;
                }
                None if resuming => resuming = false,
                None => break,
            }
        }
    }
}

pub async fn bind_sensor_listener(addr: &str) -> std::io::Result<TcpListener> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "sensor listener bound");
    Ok(listener)
}

/// Accept loop; one task per sensor connection.
pub async fn serve_sensors(listener: TcpListener, hub: SensorHub, cancel: CancellationToken) {
    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        let (stream, peer): (_, SocketAddr) = match accepted {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!(error = %e, "sensor accept failed");
                continue;
            }
        };
        tracing::info!(%peer, "sensor connected");
        let hub = hub.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            hub.consume(stream, &peer.to_string(), &cancel).await;
            tracing::info!(%peer, "sensor disconnected");
        });
    }
}
