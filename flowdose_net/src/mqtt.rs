//! Upstream MQTT link.
//!
//! A background thread drives the broker connection: incoming messages on
//! the command topic are forwarded to the engine's command queue, and a
//! broker error is retried with a fixed backoff so a flapping link never
//! affects the sampling cadence. Outbound publishes go through the
//! non-blocking client queue; a full queue is a failed (logged, not
//! retried) publish — the next telemetry cycle re-attempts.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::Sender;
use flowdose_config::MqttCfg;
use flowdose_core::telemetry::TelemetrySink;
use rumqttc::{Client, Event, Incoming, MqttOptions, QoS};

/// Outstanding-request capacity of the client→eventloop queue.
const REQUEST_QUEUE: usize = 16;

pub struct MqttLink {
    client: Client,
    publish_topic: String,
    shutdown: Arc<AtomicBool>,
    conn_handle: Option<JoinHandle<()>>,
}

impl MqttLink {
    /// Start the connection thread. Command-topic payloads are forwarded to
    /// `commands` as UTF-8 text (lossy).
    pub fn spawn(cfg: &MqttCfg, commands: Sender<String>) -> Self {
        let mut options = MqttOptions::new(&cfg.client_id, &cfg.host, cfg.port);
        options.set_keep_alive(Duration::from_secs(cfg.keep_alive_s.max(5)));
        let (client, mut connection) = Client::new(options, REQUEST_QUEUE);

        let backoff = Duration::from_millis(cfg.reconnect_backoff_ms);
        let command_topic = cfg.command_topic.clone();
        let shutdown = Arc::new(AtomicBool::new(false));

        let conn_handle = {
            let client = client.clone();
            let shutdown = Arc::clone(&shutdown);
            std::thread::Builder::new()
                .name("mqtt-link".into())
                .spawn(move || {
                    for event in connection.iter() {
                        if shutdown.load(Ordering::Relaxed) {
                            break;
                        }
                        match event {
                            Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                                tracing::info!("mqtt connected");
                                // Subscriptions do not survive a reconnect.
                                if let Err(e) =
                                    client.try_subscribe(&command_topic, QoS::AtMostOnce)
                                {
                                    tracing::warn!(error = %e, "mqtt subscribe failed");
                                }
                            }
                            Ok(Event::Incoming(Incoming::Publish(publish))) => {
                                let text =
                                    String::from_utf8_lossy(&publish.payload).to_string();
                                if commands.send(text).is_err() {
                                    break;
                                }
                            }
                            Ok(_) => {}
                            Err(e) => {
                                tracing::warn!(error = %e, "mqtt connection error; retrying");
                                std::thread::sleep(backoff);
                            }
                        }
                    }
                    tracing::debug!("mqtt link exiting");
                })
                .ok()
        };

        Self {
            client,
            publish_topic: cfg.publish_topic.clone(),
            shutdown,
            conn_handle,
        }
    }
}

impl TelemetrySink for MqttLink {
    fn name(&self) -> &'static str {
        "mqtt"
    }

    fn publish(&mut self, payload: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.client
            .try_publish(
                &self.publish_topic,
                QoS::AtMostOnce,
                false,
                payload.as_bytes().to_vec(),
            )
            .map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)
    }
}

impl Drop for MqttLink {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        let _ = self.client.try_disconnect();
        if let Some(handle) = self.conn_handle.take() {
            let _ = handle.join();
        }
    }
}
