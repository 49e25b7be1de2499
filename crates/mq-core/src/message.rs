//! Message schema for the queue substrate's wire format.
//!
//! A `Message` is the unit exchanged between connected peers: a Statement
//! (fire-and-forget), a Request (expects exactly one correlated Response),
//! or a Response (correlated by id back to its Request).

use uuid::Uuid;

/// Message type discriminator, stored as a single byte on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MsgType {
    Request = 0,
    Response = 1,
    Statement = 2,
}

impl MsgType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Request),
            1 => Some(Self::Response),
            2 => Some(Self::Statement),
            _ => None,
        }
    }
}

/// Status discriminator, stored as a single byte on the wire.
///
/// `OK` is the default status used by ordinary Statements/Requests;
/// the rest are reserved for the handshake response and keepalive traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    Ok = 0,
    Ping = 1,
    Pong = 2,
    Error = 3,
    Forbidden = 4,
    Invalid = 5,
    DupConn = 6,
}

impl Status {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Ok),
            1 => Some(Self::Ping),
            2 => Some(Self::Pong),
            3 => Some(Self::Error),
            4 => Some(Self::Forbidden),
            5 => Some(Self::Invalid),
            6 => Some(Self::DupConn),
            _ => None,
        }
    }
}

/// A single framed message: 26-byte header plus an optional body.
///
/// `body` ownership rules: once a `Message` is handed to a `Receiver` or a
/// request callback, the body is the recipient's to keep. It is never
/// returned to the byte-slice pool on that path.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: Uuid,
    pub t: MsgType,
    pub s: Status,
    pub body: Vec<u8>,
}

impl Message {
    pub fn statement(body: Vec<u8>) -> Self {
        Self {
            id: Uuid::new_v4(),
            t: MsgType::Statement,
            s: Status::Ok,
            body,
        }
    }

    pub fn request(body: Vec<u8>) -> Self {
        Self {
            id: Uuid::new_v4(),
            t: MsgType::Request,
            s: Status::Ok,
            body,
        }
    }

    /// A response correlated to `request_id`, as sent back by a `Receiver`.
    pub fn response_to(request_id: Uuid, body: Vec<u8>) -> Self {
        Self {
            id: request_id,
            t: MsgType::Response,
            s: Status::Ok,
            body,
        }
    }

    pub fn with_status(mut self, s: Status) -> Self {
        self.s = s;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn msg_type_roundtrip() {
        for t in [MsgType::Request, MsgType::Response, MsgType::Statement] {
            assert_eq!(MsgType::from_u8(t as u8), Some(t));
        }
        assert_eq!(MsgType::from_u8(9), None);
    }

    #[test]
    fn status_roundtrip() {
        for s in [
            Status::Ok,
            Status::Ping,
            Status::Pong,
            Status::Error,
            Status::Forbidden,
            Status::Invalid,
            Status::DupConn,
        ] {
            assert_eq!(Status::from_u8(s as u8), Some(s));
        }
        assert_eq!(Status::from_u8(200), None);
    }

    #[test]
    fn statement_has_ok_status_and_fresh_id() {
        let a = Message::statement(b"hi".to_vec());
        let b = Message::statement(b"hi".to_vec());
        assert_eq!(a.s, Status::Ok);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn response_reuses_request_id() {
        let req = Message::request(b"ping".to_vec());
        let resp = Message::response_to(req.id, b"pong".to_vec());
        assert_eq!(req.id, resp.id);
        assert_eq!(resp.t, MsgType::Response);
    }
}
