//! HTTP webhook sink.
//!
//! Alerts are queued on a bounded channel and posted by a background worker,
//! so a slow or unreachable endpoint never stalls the pipeline. A full queue
//! drops the alert. Each alert gets at most `retries` extra attempts.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::{Alert, AlertHandler};
use crate::error::AlertError;

const BACKOFF_BASE: Duration = Duration::from_millis(250);
const BACKOFF_MAX: Duration = Duration::from_secs(4);

#[derive(Serialize)]
struct WebhookBody<'a> {
    event: &'static str,
    track_id: u64,
    confidence: f32,
    score: f32,
    bbox: &'a [f32; 4],
    timestamp: u64,
}

#[derive(Debug, Default)]
pub struct WebhookCounters {
    pub delivered: AtomicU64,
    pub dropped: AtomicU64,
    in_flight: AtomicUsize,
}

pub struct WebhookAlertHandler {
    url: String,
    sender: Option<SyncSender<Vec<u8>>>,
    worker: Option<JoinHandle<()>>,
    counters: Arc<WebhookCounters>,
    flush_timeout: Duration,
}

impl WebhookAlertHandler {
    pub fn new(
        url: &str,
        timeout: Duration,
        retries: u32,
        queue_size: usize,
    ) -> Result<Self, AlertError> {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        let (sender, receiver) = sync_channel(queue_size.max(1));
        let counters = Arc::new(WebhookCounters::default());
        let worker = {
            let url = url.to_string();
            let counters = Arc::clone(&counters);
            thread::Builder::new()
                .name("webhook-alerts".to_string())
                .spawn(move || worker_loop(agent, url, retries, receiver, counters))?
        };
        Ok(Self {
            url: url.to_string(),
            sender: Some(sender),
            worker: Some(worker),
            counters,
            flush_timeout: (timeout + BACKOFF_MAX) * (retries + 1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn counters(&self) -> &WebhookCounters {
        &self.counters
    }
}

impl AlertHandler for WebhookAlertHandler {
    fn name(&self) -> &'static str {
        "webhook"
    }

    fn send_alert(&mut self, alert: &Alert) -> Result<bool, AlertError> {
        let body = serde_json::to_vec(&WebhookBody {
            event: "drone_detected",
            track_id: alert.track_id,
            confidence: alert.confidence,
            score: alert.score,
            bbox: &alert.bbox,
            timestamp: alert.timestamp,
        })?;
        let Some(sender) = self.sender.as_ref() else {
            return Err(AlertError::Delivery {
                sink: "webhook".to_string(),
                reason: "worker stopped".to_string(),
            });
        };
        self.counters.in_flight.fetch_add(1, Ordering::SeqCst);
        match sender.try_send(body) {
            Ok(()) => Ok(true),
            Err(err) => {
                self.counters.in_flight.fetch_sub(1, Ordering::SeqCst);
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                match err {
                    TrySendError::Full(_) => Err(AlertError::QueueFull(alert.track_id)),
                    TrySendError::Disconnected(_) => Err(AlertError::Delivery {
                        sink: "webhook".to_string(),
                        reason: "worker stopped".to_string(),
                    }),
                }
            }
        }
    }

    /// Wait for queued alerts to be delivered or dropped.
    fn flush(&mut self) -> Result<(), AlertError> {
        let deadline = Instant::now() + self.flush_timeout;
        while self.counters.in_flight.load(Ordering::SeqCst) > 0 {
            if Instant::now() >= deadline {
                return Err(AlertError::Delivery {
                    sink: "webhook".to_string(),
                    reason: "flush timed out".to_string(),
                });
            }
            thread::sleep(Duration::from_millis(10));
        }
        Ok(())
    }
}

impl Drop for WebhookAlertHandler {
    fn drop(&mut self) {
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("webhook worker panicked");
            }
        }
    }
}

fn worker_loop(
    agent: ureq::Agent,
    url: String,
    retries: u32,
    receiver: Receiver<Vec<u8>>,
    counters: Arc<WebhookCounters>,
) {
    for body in receiver {
        if deliver(&agent, &url, &body, retries) {
            counters.delivered.fetch_add(1, Ordering::Relaxed);
        } else {
            counters.dropped.fetch_add(1, Ordering::Relaxed);
        }
        counters.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
    log::debug!("webhook worker for {url} stopped");
}

fn deliver(agent: &ureq::Agent, url: &str, body: &[u8], retries: u32) -> bool {
    let attempts = retries + 1;
    for attempt in 0..attempts {
        match agent
            .post(url)
            .set("Content-Type", "application/json")
            .send_bytes(body)
        {
            Ok(_) => return true,
            Err(ureq::Error::Status(code, _)) if code < 500 && code != 429 => {
                log::warn!("webhook {url} rejected alert: HTTP {code}");
                return false;
            }
            Err(e) => log::warn!("webhook attempt {}/{attempts} failed: {e}", attempt + 1),
        }
        if attempt + 1 < attempts {
            thread::sleep(backoff(attempt));
        }
    }
    log::error!("webhook alert dropped after {attempts} attempts");
    false
}

fn backoff(attempt: u32) -> Duration {
    BACKOFF_BASE
        .saturating_mul(1u32 << attempt.min(5))
        .min(BACKOFF_MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::sync::mpsc;

    /// Answers each request with the next status in `statuses` and forwards
    /// the request body.
    fn serve(statuses: Vec<u16>) -> (String, mpsc::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let url = format!("http://{}/alerts", listener.local_addr().expect("addr"));
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            for status in statuses {
                let Ok((stream, _)) = listener.accept() else {
                    return;
                };
                let mut reader = BufReader::new(stream);
                let mut content_length = 0usize;
                loop {
                    let mut line = String::new();
                    if reader.read_line(&mut line).unwrap_or(0) == 0 || line == "\r\n" {
                        break;
                    }
                    let lower = line.to_ascii_lowercase();
                    if let Some(value) = lower.strip_prefix("content-length:") {
                        content_length = value.trim().parse().unwrap_or(0);
                    }
                }
                let mut body = vec![0u8; content_length];
                let _ = reader.read_exact(&mut body);
                let _ = tx.send(String::from_utf8_lossy(&body).into_owned());
                let mut stream = reader.into_inner();
                let _ = write!(
                    stream,
                    "HTTP/1.1 {status} X\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                );
            }
        });
        (url, rx)
    }

    fn alert(track_id: u64) -> Alert {
        Alert {
            track_id,
            confidence: 0.9,
            score: 0.75,
            bbox: [1.0, 2.0, 3.0, 4.0],
            class_id: 0,
            timestamp: 99,
            frame_sequence: 3,
        }
    }

    #[test]
    fn posts_json_body() {
        let (url, bodies) = serve(vec![200]);
        let mut handler = WebhookAlertHandler::new(&url, Duration::from_secs(2), 0, 4).expect("handler");
        assert!(handler.send_alert(&alert(12)).expect("send"));
        handler.flush().expect("flush");
        let body: serde_json::Value =
            serde_json::from_str(&bodies.recv_timeout(Duration::from_secs(2)).expect("body"))
                .expect("json");
        assert_eq!(body["track_id"], 12);
        assert_eq!(body["timestamp"], 99);
        assert_eq!(body["bbox"][3], 4.0);
        assert_eq!(handler.counters().delivered.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn retries_server_errors() {
        let (url, bodies) = serve(vec![503, 200]);
        let mut handler = WebhookAlertHandler::new(&url, Duration::from_secs(2), 2, 4).expect("handler");
        handler.send_alert(&alert(1)).expect("send");
        handler.flush().expect("flush");
        assert_eq!(bodies.try_iter().count(), 2);
        assert_eq!(handler.counters().delivered.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn client_errors_are_not_retried() {
        let (url, bodies) = serve(vec![400, 200]);
        let mut handler = WebhookAlertHandler::new(&url, Duration::from_secs(2), 3, 4).expect("handler");
        handler.send_alert(&alert(1)).expect("send");
        handler.flush().expect("flush");
        assert_eq!(bodies.try_iter().count(), 1);
        assert_eq!(handler.counters().dropped.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn full_queue_drops_instead_of_blocking() {
        // Accepts connections into the backlog but never answers.
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let url = format!("http://{}/", listener.local_addr().expect("addr"));
        let mut handler =
            WebhookAlertHandler::new(&url, Duration::from_millis(500), 0, 1).expect("handler");
        let started = Instant::now();
        let results: Vec<_> = (1..=3).map(|id| handler.send_alert(&alert(id))).collect();
        assert!(started.elapsed() < Duration::from_millis(250));
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(AlertError::QueueFull(_)))));
        drop(handler);
        drop(listener);
    }

    #[test]
    fn backoff_is_capped() {
        assert_eq!(backoff(0), Duration::from_millis(250));
        assert_eq!(backoff(2), Duration::from_secs(1));
        assert_eq!(backoff(10), BACKOFF_MAX);
    }
}
