use crate::error::Error;
use crate::frame::OpCode;

/// A complete data message, as delivered by the split reader and the
/// event-based server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Text(String),
    Binary(Vec<u8>),
}

impl Message {
    /// Builds a message from a drained payload. Text payloads must be
    /// valid UTF-8.
    pub(crate) fn from_parts(opcode: OpCode, payload: Vec<u8>) -> Result<Self, Error> {
        match opcode {
            OpCode::Text => Ok(Message::Text(String::from_utf8(payload)?)),
            OpCode::Binary => Ok(Message::Binary(payload)),
            _ => Err(Error::InvalidMessageType),
        }
    }

    pub fn opcode(&self) -> OpCode {
        match self {
            Message::Text(_) => OpCode::Text,
            Message::Binary(_) => OpCode::Binary,
        }
    }

    pub fn into_payload(self) -> Vec<u8> {
        match self {
            Message::Text(text) => text.into_bytes(),
            Message::Binary(data) => data,
        }
    }

    pub fn as_binary(&self) -> Vec<u8> {
        match self {
            Message::Text(text) => text.as_bytes().to_vec(),
            Message::Binary(data) => data.clone(),
        }
    }

    pub fn as_text(&self) -> Result<String, Error> {
        match self {
            Message::Text(text) => Ok(text.clone()),
            Message::Binary(data) => Ok(String::from_utf8(data.clone())?),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_parts() {
        let message = Message::from_parts(OpCode::Text, b"hi".to_vec()).unwrap();
        assert_eq!(message, Message::Text("hi".to_string()));

        let message = Message::from_parts(OpCode::Binary, vec![0xff]).unwrap();
        assert_eq!(message, Message::Binary(vec![0xff]));

        assert!(Message::from_parts(OpCode::Ping, Vec::new()).is_err());
        assert!(Message::from_parts(OpCode::Text, vec![0xff, 0xfe]).is_err());
    }

    #[test]
    fn test_payload_accessors() {
        let message = Message::Text("héllo".to_string());
        assert_eq!(message.opcode(), OpCode::Text);
        assert_eq!(message.as_text().unwrap(), "héllo");
        assert_eq!(message.as_binary(), "héllo".as_bytes());
        assert_eq!(message.into_payload(), "héllo".as_bytes());
    }
}
