//! `rosbridge_server` WebSocket client.
//!
//! [`RosbridgeClient`] is the transport between the ROS 2 graph and the
//! internal [`EventBus`]:
//!
//! * **Inbound** – subscribes to the target-position, fruit-width and
//!   distance-to-fruit topics and republishes every sample on
//!   [`Topic::Perception`] as a [`PerceptionMessage`].
//! * **Outbound** – advertises a marker topic and a status topic, and
//!   forwards [`Topic::Markers`] / [`Topic::Status`] events to them as
//!   `std_msgs/msg/String` JSON payloads.
//!
//! The protocol is plain rosbridge v2 JSON (`op: subscribe | advertise |
//! publish`).

use futures_util::{SinkExt, StreamExt};
use harvest_types::{Event, EventPayload, HarvestError, PerceptionMessage, Point3, Pose, Quaternion};
use serde_json::{Value, json};
use tokio::sync::broadcast::error::RecvError;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::{EventBus, Topic};

const POSE_TYPE: &str = "geometry_msgs/msg/Pose";
const FLOAT32_TYPE: &str = "std_msgs/msg/Float32";
const STRING_TYPE: &str = "std_msgs/msg/String";

/// Topic names used on the ROS side of the bridge.
#[derive(Debug, Clone, PartialEq)]
pub struct RosbridgeTopics {
    pub target_position: String,
    pub fruit_width: String,
    pub distance_to_fruit: String,
    pub markers: String,
    pub status: String,
    /// Subscription queue depth requested from rosbridge.
    pub queue_length: u32,
}

impl Default for RosbridgeTopics {
    fn default() -> Self {
        Self {
            target_position: "/target_position".to_string(),
            fruit_width: "/fruit_width".to_string(),
            distance_to_fruit: "/distance_to_fruit".to_string(),
            markers: "/harvest/markers".to_string(),
            status: "/harvest/status".to_string(),
            queue_length: 10,
        }
    }
}

/// WebSocket client that bridges a `rosbridge_server` and the [`EventBus`].
pub struct RosbridgeClient {
    url: String,
    topics: RosbridgeTopics,
    bus: EventBus,
}

impl RosbridgeClient {
    /// Create a client for the server at `url` (e.g. `ws://localhost:9090`)
    /// using the default topic names.
    pub fn new(url: impl Into<String>, bus: EventBus) -> Self {
        Self {
            url: url.into(),
            topics: RosbridgeTopics::default(),
            bus,
        }
    }

    /// The subscribe and advertise operations sent right after connecting.
    pub fn handshake_frames(&self) -> Vec<Value> {
        let t = &self.topics;
        vec![
            subscribe_op(&t.target_position, POSE_TYPE, t.queue_length),
            subscribe_op(&t.fruit_width, FLOAT32_TYPE, t.queue_length),
            subscribe_op(&t.distance_to_fruit, FLOAT32_TYPE, t.queue_length),
            json!({ "op": "advertise", "topic": t.markers, "type": STRING_TYPE }),
            json!({ "op": "advertise", "topic": t.status, "type": STRING_TYPE }),
        ]
    }

    /// Parse one inbound rosbridge frame.
    ///
    /// Returns `Ok(None)` for frames that are not publications on one of the
    /// perception topics (status replies, other topics).  Message contents are
    /// not range-checked: NaN and zero values pass through unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::Parsing`] when the frame is not JSON or a
    /// perception publication is missing its payload fields.
    pub fn parse_frame(&self, text: &str) -> Result<Option<PerceptionMessage>, HarvestError> {
        let frame: Value = serde_json::from_str(text)
            .map_err(|e| HarvestError::Parsing(format!("rosbridge frame is not JSON: {e}")))?;

        if frame.get("op").and_then(Value::as_str) != Some("publish") {
            return Ok(None);
        }
        let topic = frame.get("topic").and_then(Value::as_str).unwrap_or("");
        let msg = frame.get("msg").unwrap_or(&Value::Null);

        let t = &self.topics;
        if topic == t.target_position {
            parse_pose(msg).map(|pose| Some(PerceptionMessage::TargetPose(pose)))
        } else if topic == t.fruit_width {
            parse_float32(topic, msg).map(|w| Some(PerceptionMessage::FruitWidth(w)))
        } else if topic == t.distance_to_fruit {
            parse_float32(topic, msg).map(|d| Some(PerceptionMessage::DistanceToFruit(d)))
        } else {
            Ok(None)
        }
    }

    /// Parse `text` and, when it carries perception data, publish it on
    /// [`Topic::Perception`].
    ///
    /// Returns the number of receivers handed the event, or `0` for ignored
    /// frames.
    pub fn ingest_frame(&self, text: &str) -> Result<usize, HarvestError> {
        let Some(message) = self.parse_frame(text)? else {
            return Ok(0);
        };
        let source = format!(
            "harvest-middleware::rosbridge/{}",
            match message {
                PerceptionMessage::TargetPose(_) => "target_position",
                PerceptionMessage::FruitWidth(_) => "fruit_width",
                PerceptionMessage::DistanceToFruit(_) => "distance_to_fruit",
            }
        );
        self.bus.publish_to(
            Topic::Perception,
            Event::new(source, EventPayload::Perception(message)),
        )
    }

    /// Build the rosbridge publish frame for an outbound bus event.
    ///
    /// Markers go to the marker topic; phase changes and faults go to the
    /// status topic.  Perception events are never echoed back.
    pub fn outbound_frame(&self, event: &Event) -> Option<Value> {
        let topic = match &event.payload {
            EventPayload::Marker(_) => &self.topics.markers,
            EventPayload::PhaseChanged { .. } | EventPayload::Fault { .. } => &self.topics.status,
            EventPayload::Perception(_) => return None,
        };
        let data = serde_json::to_string(&event.payload).ok()?;
        Some(json!({ "op": "publish", "topic": topic, "msg": { "data": data } }))
    }

    /// Connect, perform the handshake and pump frames until `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::Transport`] when the connection cannot be
    /// established or is closed by the server.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), HarvestError> {
        let (ws_stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| HarvestError::Transport(format!("connect to {}: {e}", self.url)))?;
        info!(url = %self.url, "connected to rosbridge");

        let (mut ws_tx, mut ws_rx) = ws_stream.split();
        for frame in self.handshake_frames() {
            ws_tx
                .send(Message::Text(frame.to_string().into()))
                .await
                .map_err(|e| HarvestError::Transport(format!("handshake: {e}")))?;
        }

        let mut markers = self.bus.subscribe_to(Topic::Markers);
        let mut status = self.bus.subscribe_to(Topic::Status);

        loop {
            let outbound = tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    info!("rosbridge client shutting down");
                    return Ok(());
                }
                msg = ws_rx.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            match self.ingest_frame(text.as_str()) {
                                Ok(_) => {}
                                Err(HarvestError::Channel(e)) => debug!(error = %e, "perception sample dropped"),
                                Err(e) => warn!(error = %e, "ignoring malformed rosbridge frame"),
                            }
                            None
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            return Err(HarvestError::Transport(
                                "rosbridge closed the connection".to_string(),
                            ));
                        }
                        Some(Err(e)) => return Err(HarvestError::Transport(e.to_string())),
                        Some(Ok(_)) => None,
                    }
                }
                event = markers.recv() => self.outbound_text(event),
                event = status.recv() => self.outbound_text(event),
            };

            if let Some(text) = outbound {
                ws_tx
                    .send(Message::Text(text.into()))
                    .await
                    .map_err(|e| HarvestError::Transport(format!("send: {e}")))?;
            }
        }
    }

    fn outbound_text(&self, received: Result<Event, RecvError>) -> Option<String> {
        match received {
            Ok(event) => self.outbound_frame(&event).map(|frame| frame.to_string()),
            Err(RecvError::Lagged(n)) => {
                warn!(lagged_by = n, "rosbridge forwarder lagged; markers dropped");
                None
            }
            // The client owns a bus handle, so the channel cannot close
            // while it runs.
            Err(RecvError::Closed) => None,
        }
    }
}

fn subscribe_op(topic: &str, msg_type: &str, queue_length: u32) -> Value {
    json!({
        "op": "subscribe",
        "topic": topic,
        "type": msg_type,
        "queue_length": queue_length,
    })
}

fn parse_pose(msg: &Value) -> Result<Pose, HarvestError> {
    let position = msg
        .get("position")
        .ok_or_else(|| HarvestError::Parsing("pose message has no position".to_string()))?;
    let coord = |v: &Value, key: &str| -> Result<f64, HarvestError> {
        v.get(key)
            .and_then(Value::as_f64)
            .ok_or_else(|| HarvestError::Parsing(format!("pose field '{key}' missing or not a number")))
    };
    let point = Point3::new(
        coord(position, "x")?,
        coord(position, "y")?,
        coord(position, "z")?,
    );
    let orientation = match msg.get("orientation") {
        Some(o) => Quaternion::new(
            o.get("x").and_then(Value::as_f64).unwrap_or(0.0),
            o.get("y").and_then(Value::as_f64).unwrap_or(0.0),
            o.get("z").and_then(Value::as_f64).unwrap_or(0.0),
            o.get("w").and_then(Value::as_f64).unwrap_or(1.0),
        ),
        None => Quaternion::identity(),
    };
    Ok(Pose::new(point, orientation))
}

fn parse_float32(topic: &str, msg: &Value) -> Result<f32, HarvestError> {
    msg.get("data")
        .and_then(Value::as_f64)
        .map(|v| v as f32)
        .ok_or_else(|| HarvestError::Parsing(format!("{topic}: Float32 message has no numeric 'data'")))
}
