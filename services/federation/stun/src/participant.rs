//! Stateless binding dispatcher.
//!
//! Each inbound message is classified by its class and handled on its own;
//! nothing is retained between messages. Requests are answered through an
//! injected [`StunSender`]. Everything else is surfaced to a
//! [`StunObserver`] for the ICE layer to act on.

use crate::attribute::Attribute;
use crate::header::{Class, Method};
use crate::message::Message;
use crate::StunError;
use std::net::SocketAddr;
use tracing::{debug, warn};

/// Reason for a 400 caused by an unsupported method
pub const REASON_UNKNOWN_METHOD: &str = "Bad Request: Unknown method";
/// Reason for a 400 caused by a missing FINGERPRINT
pub const REASON_FINGERPRINT_REQUIRED: &str = "Bad Request: FINGERPRINT must be present";
/// Reason for a 400 caused by a missing USERNAME
pub const REASON_USERNAME_REQUIRED: &str = "Bad Request: USERNAME must be present";
/// Reason for a 400 caused by a missing MESSAGE-INTEGRITY
pub const REASON_INTEGRITY_REQUIRED: &str = "Bad Request: MESSAGE_INTEGRITY must be present";
/// Reason for a 400 caused by a USERNAME without a colon
pub const REASON_MALFORMED_USERNAME: &str = "Bad Request: USERNAME must be colon-separated";
/// Reason for a 401
pub const REASON_UNAUTHORIZED: &str = "Unauthorized";
/// Reason for a 420
pub const REASON_UNKNOWN_ATTRIBUTE: &str = "Unknown Attribute";

/// Capability used to emit messages
pub trait StunSender {
    /// Send `message` to `destination`
    fn send(&self, destination: SocketAddr, message: Message) -> Result<(), StunError>;
}

/// Receives inbound messages that are not requests.
///
/// Every method defaults to doing nothing.
pub trait StunObserver {
    /// An indication arrived
    fn indication(&self, _remote: SocketAddr, _message: &Message) {}

    /// A success response arrived (connectivity check result)
    fn success_response(&self, _remote: SocketAddr, _message: &Message) {}

    /// An error response arrived
    fn error_response(&self, _remote: SocketAddr, _message: &Message) {}
}

/// Observer that ignores everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullObserver;

impl StunObserver for NullObserver {}

/// Inbound message by class
#[derive(Debug, Clone, Copy)]
pub enum Inbound<'a> {
    /// Request expecting a response
    Request(&'a Message),
    /// Indication
    Indication(&'a Message),
    /// Success response
    SuccessResponse(&'a Message),
    /// Error response
    ErrorResponse(&'a Message),
}

/// Classify a message by its class field
pub fn classify(message: &Message) -> Inbound<'_> {
    match message.class() {
        Class::Request => Inbound::Request(message),
        Class::Indication => Inbound::Indication(message),
        Class::SuccessResponse => Inbound::SuccessResponse(message),
        Class::ErrorResponse => Inbound::ErrorResponse(message),
    }
}

/// Short-term credential of the local agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Local username fragment, the part before ':' in inbound USERNAME
    pub username: String,
    /// Key for MESSAGE-INTEGRITY in both directions
    pub password: String,
}

/// Participant configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParticipantConfig {
    /// Require and produce MESSAGE-INTEGRITY when set
    pub credentials: Option<Credentials>,
}

/// What the participant did with an inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// A binding success response was sent
    Answered,
    /// An error response with this code was sent
    Rejected(u16),
    /// Handed to the observer
    Observed(Class),
}

/// Binding request responder
pub struct Participant<S, O = NullObserver> {
    config: ParticipantConfig,
    sender: S,
    observer: O,
}

impl<S: StunSender> Participant<S, NullObserver> {
    /// Participant without an observer
    pub fn new(config: ParticipantConfig, sender: S) -> Self {
        Self::with_observer(config, sender, NullObserver)
    }
}

impl<S: StunSender, O: StunObserver> Participant<S, O> {
    /// Participant reporting non-request traffic to `observer`
    pub fn with_observer(config: ParticipantConfig, sender: S, observer: O) -> Self {
        Self {
            config,
            sender,
            observer,
        }
    }

    /// Current configuration
    pub fn config(&self) -> &ParticipantConfig {
        &self.config
    }

    /// The injected sender
    pub fn sender(&self) -> &S {
        &self.sender
    }

    /// The injected observer
    pub fn observer(&self) -> &O {
        &self.observer
    }

    /// Handle one decoded message received from `remote`.
    ///
    /// Only a failing sender produces an error.
    pub fn receive(&self, remote: SocketAddr, message: &Message) -> Result<Disposition, StunError> {
        match classify(message) {
            Inbound::Request(request) => self.request(remote, request),
            Inbound::Indication(indication) => {
                self.observer.indication(remote, indication);
                Ok(Disposition::Observed(Class::Indication))
            }
            Inbound::SuccessResponse(response) => {
                self.observer.success_response(remote, response);
                Ok(Disposition::Observed(Class::SuccessResponse))
            }
            Inbound::ErrorResponse(response) => {
                self.observer.error_response(remote, response);
                Ok(Disposition::Observed(Class::ErrorResponse))
            }
        }
    }

    fn request(&self, remote: SocketAddr, request: &Message) -> Result<Disposition, StunError> {
        // Credentials are checked before any other request content.
        if let Some(credentials) = &self.config.credentials {
            if let Err((code, reason)) = authenticate(credentials, request) {
                warn!(
                    "Rejecting request {} from {}: {}",
                    request.transaction_id(),
                    remote,
                    reason
                );
                return self.reject(remote, request, code, reason, None);
            }
        }

        let unknown = request.unknown_comprehension_required_attributes();
        if !unknown.is_empty() {
            debug!(
                "Request {} from {} carries unknown attributes {:04x?}",
                request.transaction_id(),
                remote,
                unknown
            );
            return self.reject(
                remote,
                request,
                420,
                REASON_UNKNOWN_ATTRIBUTE,
                Some(Attribute::UnknownAttributes(unknown)),
            );
        }

        if !request.has_fingerprint() {
            return self.reject(remote, request, 400, REASON_FINGERPRINT_REQUIRED, None);
        }

        match request.method() {
            Method::Binding => self.answer(remote, request),
            Method::Unknown(method) => {
                debug!("Unknown method 0x{:03x} from {}", method, remote);
                self.reject(remote, request, 400, REASON_UNKNOWN_METHOD, None)
            }
        }
    }

    fn answer(&self, remote: SocketAddr, request: &Message) -> Result<Disposition, StunError> {
        let mut response = Message::response_to(request, Class::SuccessResponse);
        response.append_attribute(Attribute::MappedAddress(remote));
        response.append_attribute(Attribute::XorMappedAddress(remote));
        self.seal(&mut response);

        debug!(
            "Binding success for {} to {}",
            request.transaction_id(),
            remote
        );
        self.sender.send(remote, response)?;
        Ok(Disposition::Answered)
    }

    fn reject(
        &self,
        remote: SocketAddr,
        request: &Message,
        code: u16,
        reason: &str,
        extra: Option<Attribute>,
    ) -> Result<Disposition, StunError> {
        let mut response = Message::response_to(request, Class::ErrorResponse);
        response.append_attribute(Attribute::error_code(code, reason));
        if let Some(attribute) = extra {
            response.append_attribute(attribute);
        }
        self.seal(&mut response);

        self.sender.send(remote, response)?;
        Ok(Disposition::Rejected(code))
    }

    /// Append MESSAGE-INTEGRITY (when credentialed) and FINGERPRINT
    fn seal(&self, response: &mut Message) {
        if let Some(credentials) = &self.config.credentials {
            response.set_password(credentials.password.clone());
            response.append_attribute(Attribute::message_integrity());
        }
        response.append_attribute(Attribute::fingerprint());
    }
}

/// Check USERNAME and MESSAGE-INTEGRITY of a request
fn authenticate(credentials: &Credentials, request: &Message) -> Result<(), (u16, &'static str)> {
    let Some(username) = request.get_username() else {
        return Err((400, REASON_USERNAME_REQUIRED));
    };
    if !request.has_message_integrity() {
        return Err((400, REASON_INTEGRITY_REQUIRED));
    }

    let Some((local, _remote)) = username.split_once(':') else {
        return Err((400, REASON_MALFORMED_USERNAME));
    };

    if local != credentials.username || !request.verify_message_integrity(&credentials.password) {
        return Err((401, REASON_UNAUTHORIZED));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{StunHeader, TransactionId};
    use crate::integrity;
    use bytes::BytesMut;
    use std::cell::RefCell;

    #[derive(Default)]
    struct RecordingSender {
        sent: RefCell<Vec<(SocketAddr, Message)>>,
    }

    impl StunSender for RecordingSender {
        fn send(&self, destination: SocketAddr, message: Message) -> Result<(), StunError> {
            self.sent.borrow_mut().push((destination, message));
            Ok(())
        }
    }

    struct FailingSender;

    impl StunSender for FailingSender {
        fn send(&self, _destination: SocketAddr, _message: Message) -> Result<(), StunError> {
            Err(StunError::Send("socket closed".to_string()))
        }
    }

    #[derive(Default)]
    struct RecordingObserver {
        seen: RefCell<Vec<Class>>,
    }

    impl StunObserver for RecordingObserver {
        fn indication(&self, _remote: SocketAddr, message: &Message) {
            self.seen.borrow_mut().push(message.class());
        }

        fn success_response(&self, _remote: SocketAddr, message: &Message) {
            self.seen.borrow_mut().push(message.class());
        }

        fn error_response(&self, _remote: SocketAddr, message: &Message) {
            self.seen.borrow_mut().push(message.class());
        }
    }

    fn remote() -> SocketAddr {
        "192.0.2.10:54321".parse().unwrap()
    }

    /// Serialize and decode again, as if received off the wire
    fn over_the_wire(mut message: Message) -> Message {
        Message::deserialize(message.serialize().unwrap()).unwrap()
    }

    fn binding(attributes: Vec<Attribute>) -> Message {
        let mut message = Message::new(Class::Request, Method::Binding, TransactionId([9; 12]));
        for attribute in attributes {
            message.append_attribute(attribute);
        }
        message
    }

    fn only_sent(sender: &RecordingSender) -> (SocketAddr, Message) {
        let sent = sender.sent.borrow();
        assert_eq!(sent.len(), 1);
        sent[0].clone()
    }

    #[test]
    fn test_binding_request_answered() {
        let participant = Participant::new(ParticipantConfig::default(), RecordingSender::default());
        let request = over_the_wire(binding(vec![Attribute::fingerprint()]));

        let disposition = participant.receive(remote(), &request).unwrap();
        assert_eq!(disposition, Disposition::Answered);

        let (destination, response) = only_sent(participant.sender());
        assert_eq!(destination, remote());
        assert_eq!(response.class(), Class::SuccessResponse);
        assert_eq!(response.transaction_id(), request.transaction_id());
        assert_eq!(response.get_mapped_address(), Some(remote()));
        assert!(response.has_fingerprint());
        assert!(!response.has_message_integrity());

        let decoded = over_the_wire(response);
        assert_eq!(decoded.get_mapped_address(), Some(remote()));
    }

    #[test]
    fn test_missing_fingerprint_rejected() {
        let participant = Participant::new(ParticipantConfig::default(), RecordingSender::default());
        let request = over_the_wire(binding(vec![Attribute::Priority(1)]));

        assert_eq!(
            participant.receive(remote(), &request).unwrap(),
            Disposition::Rejected(400)
        );
        let (_, response) = only_sent(participant.sender());
        assert_eq!(response.class(), Class::ErrorResponse);
        assert_eq!(response.get_error_code(), Some(400));
        assert_eq!(response.get_error_reason(), Some(REASON_FINGERPRINT_REQUIRED));
        assert!(response.has_fingerprint());
    }

    #[test]
    fn test_unknown_method_rejected() {
        let participant = Participant::new(ParticipantConfig::default(), RecordingSender::default());
        let mut request = Message::new(Class::Request, Method::Unknown(0x003), TransactionId([1; 12]));
        request.append_attribute(Attribute::fingerprint());
        let request = over_the_wire(request);

        assert_eq!(
            participant.receive(remote(), &request).unwrap(),
            Disposition::Rejected(400)
        );
        let (_, response) = only_sent(participant.sender());
        assert_eq!(response.method(), Method::Unknown(0x003));
        assert_eq!(response.get_error_reason(), Some(REASON_UNKNOWN_METHOD));
        assert_eq!(response.transaction_id(), &TransactionId([1; 12]));
    }

    #[test]
    fn test_unknown_required_attribute_rejected() {
        let participant = Participant::new(ParticipantConfig::default(), RecordingSender::default());
        let request = binding(vec![
            Attribute::Unknown {
                attribute_type: 0x0033,
                length: 4,
            },
            Attribute::Unknown {
                attribute_type: 0x8033,
                length: 4,
            },
            Attribute::fingerprint(),
        ]);

        assert_eq!(
            participant.receive(remote(), &request).unwrap(),
            Disposition::Rejected(420)
        );
        let (_, response) = only_sent(participant.sender());
        assert_eq!(response.get_error_code(), Some(420));
        assert_eq!(response.get_unknown_attributes(), Some(&[0x0033u16][..]));

        // error responses survive the wire
        let decoded = over_the_wire(response);
        assert_eq!(decoded.get_error_code(), Some(420));
    }

    fn credentialed() -> Participant<RecordingSender> {
        Participant::new(
            ParticipantConfig {
                credentials: Some(Credentials {
                    username: "local".to_string(),
                    password: "secret".to_string(),
                }),
            },
            RecordingSender::default(),
        )
    }

    fn signed(username: &str, password: &str) -> Message {
        let mut request = binding(vec![
            Attribute::Username(username.to_string()),
            Attribute::Priority(0x7E00_00FF),
            Attribute::message_integrity(),
            Attribute::fingerprint(),
        ]);
        request.set_password(password);
        over_the_wire(request)
    }

    #[test]
    fn test_credentialed_request_answered_with_integrity() {
        let participant = credentialed();
        let request = signed("local:peer", "secret");

        assert_eq!(
            participant.receive(remote(), &request).unwrap(),
            Disposition::Answered
        );
        let (_, response) = only_sent(participant.sender());
        assert!(response.has_message_integrity());

        let decoded = over_the_wire(response);
        assert!(decoded.verify_message_integrity("secret"));
    }

    /// Signed request carrying an unrecognised comprehension-required attribute
    fn signed_with_unknown(password: &str) -> Message {
        let transaction_id = TransactionId([4; 12]);
        let mut raw = BytesMut::new();
        StunHeader {
            class: Class::Request,
            method: Method::Binding,
            length: 0,
            transaction_id,
        }
        .encode(&mut raw);
        Attribute::Username("local:peer".to_string())
            .encode(&mut raw, &transaction_id)
            .unwrap();
        raw.extend_from_slice(&[0x00, 0x33, 0x00, 0x04, 1, 2, 3, 4]);

        // 16 bytes of USERNAME, 8 unknown, 24 MESSAGE-INTEGRITY, 8 FINGERPRINT
        let mut covered = raw.clone();
        covered[2..4].copy_from_slice(&48u16.to_be_bytes());
        Attribute::MessageIntegrity(integrity::hmac_sha1(password, &covered))
            .encode(&mut raw, &transaction_id)
            .unwrap();
        raw[2..4].copy_from_slice(&56u16.to_be_bytes());
        let fingerprint = integrity::fingerprint(&raw);
        Attribute::Fingerprint(fingerprint)
            .encode(&mut raw, &transaction_id)
            .unwrap();

        Message::deserialize(raw.freeze()).unwrap()
    }

    #[test]
    fn test_credential_failures() {
        let cases = [
            (signed("local:peer", "wrong"), 401, REASON_UNAUTHORIZED),
            (signed("other:peer", "secret"), 401, REASON_UNAUTHORIZED),
            (signed("local", "secret"), 400, REASON_MALFORMED_USERNAME),
            (
                over_the_wire(binding(vec![Attribute::fingerprint()])),
                400,
                REASON_USERNAME_REQUIRED,
            ),
            (
                over_the_wire(binding(vec![
                    Attribute::Username("local:peer".to_string()),
                    Attribute::fingerprint(),
                ])),
                400,
                REASON_INTEGRITY_REQUIRED,
            ),
        ];

        for (request, code, reason) in cases {
            let participant = credentialed();
            assert_eq!(
                participant.receive(remote(), &request).unwrap(),
                Disposition::Rejected(code)
            );
            let (_, response) = only_sent(participant.sender());
            assert_eq!(response.get_error_code(), Some(code));
            assert_eq!(response.get_error_reason(), Some(reason));

            let decoded = over_the_wire(response);
            assert!(decoded.verify_message_integrity("secret"));
            assert!(decoded.has_fingerprint());
        }
    }

    #[test]
    fn test_credentials_checked_before_unknown_attributes() {
        // unsigned request with an unknown attribute gets 400, not 420
        let participant = credentialed();
        let request = binding(vec![
            Attribute::Unknown {
                attribute_type: 0x0033,
                length: 4,
            },
            Attribute::fingerprint(),
        ]);
        assert_eq!(
            participant.receive(remote(), &request).unwrap(),
            Disposition::Rejected(400)
        );
        let (_, response) = only_sent(participant.sender());
        assert_eq!(response.get_error_reason(), Some(REASON_USERNAME_REQUIRED));
        assert!(!response.has_unknown_attributes());
        assert!(response.has_message_integrity());

        // once authenticated, the unknown attribute is reported
        let participant = credentialed();
        let request = signed_with_unknown("secret");
        assert!(request.verify_message_integrity("secret"));
        assert_eq!(
            participant.receive(remote(), &request).unwrap(),
            Disposition::Rejected(420)
        );
        let (_, response) = only_sent(participant.sender());
        assert_eq!(response.get_unknown_attributes(), Some(&[0x0033u16][..]));
        assert!(over_the_wire(response).verify_message_integrity("secret"));

        // with a wrong key it never gets that far
        let participant = credentialed();
        assert_eq!(
            participant
                .receive(remote(), &signed_with_unknown("wrong"))
                .unwrap(),
            Disposition::Rejected(401)
        );
    }

    #[test]
    fn test_non_requests_reach_observer() {
        let participant = Participant::with_observer(
            ParticipantConfig::default(),
            RecordingSender::default(),
            RecordingObserver::default(),
        );

        for class in [Class::Indication, Class::SuccessResponse, Class::ErrorResponse] {
            let message = Message::new(class, Method::Binding, TransactionId([2; 12]));
            assert_eq!(
                participant.receive(remote(), &message).unwrap(),
                Disposition::Observed(class)
            );
        }

        assert!(participant.sender().sent.borrow().is_empty());
        assert_eq!(
            *participant.observer().seen.borrow(),
            vec![Class::Indication, Class::SuccessResponse, Class::ErrorResponse]
        );
    }

    #[test]
    fn test_sender_failure_propagates() {
        let participant = Participant::new(ParticipantConfig::default(), FailingSender);
        let request = binding(vec![Attribute::fingerprint()]);
        assert!(matches!(
            participant.receive(remote(), &request),
            Err(StunError::Send(_))
        ));
    }
}
