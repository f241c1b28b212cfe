//! Pure routing of MQTT events
//!
//! Turns raw rumqttc events into [`EventRoute`] decisions. Nothing in here
//! performs I/O; the client's transport worker acts on the routes.

use crate::transport::InboundMessage;
use rumqttc::v5::mqttbytes::v5::{
    ConnectReturnCode, DisconnectReasonCode, Packet, SubscribeReasonCode,
};
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::Event;

/// Pure message routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Route MQTT event to appropriate handler (pure routing decision)
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(connack) => EventRoute::ConnectionAcknowledged {
                    session_present: connack.session_present,
                    code: connack.code,
                },
                Packet::Publish(publish) => EventRoute::MessageReceived(InboundMessage {
                    topic: String::from_utf8_lossy(&publish.topic).to_string(),
                    payload: publish.payload.clone(),
                }),
                Packet::Disconnect(disconnect) => EventRoute::Disconnected {
                    reason: disconnect.reason_code,
                },
                Packet::SubAck(suback) => EventRoute::SubscriptionConfirmed {
                    packet_id: suback.pkid,
                    reason_codes: suback.return_codes.clone(),
                },
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    /// Anything but a normal disconnection is unexpected and logged as an error
    pub fn is_unexpected_disconnect(reason: DisconnectReasonCode) -> bool {
        reason != DisconnectReasonCode::NormalDisconnection
    }

    /// Validate subscription success from SubAck, returning the granted QoS levels
    pub fn validate_subscription_success(
        reason_codes: &[SubscribeReasonCode],
    ) -> Result<Vec<QoS>, String> {
        let mut granted = Vec::with_capacity(reason_codes.len());
        for code in reason_codes {
            match code {
                SubscribeReasonCode::Success(qos) => granted.push(*qos),
                failure => {
                    return Err(format!(
                        "Subscription failed with reason codes: {reason_codes:?} (first failure: {failure:?})"
                    ))
                }
            }
        }
        Ok(granted)
    }

    /// Human readable ConnAck outcome
    pub fn describe_connack(code: ConnectReturnCode) -> String {
        match code {
            ConnectReturnCode::Success => "Connection Accepted.".to_string(),
            other => format!("Connection Refused: {other:?}"),
        }
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone)]
pub enum EventRoute {
    /// Connection acknowledged - (re)subscribe now
    ConnectionAcknowledged {
        session_present: bool,
        code: ConnectReturnCode,
    },
    /// Message received on a subscribed topic
    MessageReceived(InboundMessage),
    /// Broker sent DISCONNECT
    Disconnected { reason: DisconnectReasonCode },
    /// Subscription confirmed with reason codes
    SubscriptionConfirmed {
        packet_id: u16,
        reason_codes: Vec<SubscribeReasonCode>,
    },
    /// Infrastructure event (PingResp, PubAck, etc.)
    InfrastructureEvent(String),
    /// Outgoing event (handled automatically)
    OutgoingEvent,
}
