// Notification codec: payload packaging and the two gateway wire layouts
//
// SIMPLE (command 0):
//   [0][0][token len:1][token][0][payload len:1][payload]
//
// FRAME (command 2):
//   [2][body len:4 BE][item]...
//   item = [id:1][len:2 BE][value]
//   ids: 1 token, 2 payload, 3 identifier, 4 expiry (u32 BE), 5 priority (u8)
//
// SIMPLE lengths are single bytes and are truncated to their low 8 bits.

use super::{Message, NotificationError};
use serde_json::{Map, Value};

pub const SIMPLE_COMMAND: u8 = 0;
pub const FRAME_COMMAND: u8 = 2;

/// Command byte plus the 4-byte body length
pub const FRAME_HEADER_LEN: usize = 5;

/// Item id plus the 2-byte value length
pub const ITEM_HEADER_LEN: usize = 3;

/// Item identifiers of the FRAME layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ItemId {
    Token = 1,
    Payload = 2,
    Identifier = 3,
    Expiry = 4,
    Priority = 5,
}

impl ItemId {
    pub fn from_u8(value: u8) -> Result<Self, NotificationError> {
        match value {
            1 => Ok(ItemId::Token),
            2 => Ok(ItemId::Payload),
            3 => Ok(ItemId::Identifier),
            4 => Ok(ItemId::Expiry),
            5 => Ok(ItemId::Priority),
            other => Err(NotificationError::UnknownItem(other)),
        }
    }

    pub fn as_u8(&self) -> u8 {
        *self as u8
    }
}

/// Strip whitespace, angle brackets and pipes from a pasted device token
pub fn normalize_token(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '<' | '>' | '|'))
        .collect()
}

/// Normalize then hex-decode a device token
pub fn decode_token(raw: &str) -> Result<Vec<u8>, NotificationError> {
    let normalized = normalize_token(raw);
    let token = hex::decode(&normalized)
        .map_err(|e| NotificationError::InvalidToken(format!("{}: {}", normalized, e)))?;

    if token.len() > u16::MAX as usize {
        return Err(NotificationError::InvalidToken(format!(
            "{} bytes does not fit a frame item",
            token.len()
        )));
    }

    Ok(token)
}

/// Convert message options into the JSON document sent to the gateway.
///
/// `sound: true` becomes `"default"`, a false or null sound is dropped, and
/// the keys of a `custom` object are merged into the root. Everything else
/// lands under `aps`.
pub fn package_message(message: &Message) -> Result<String, NotificationError> {
    if !message.is_valid() {
        return Err(NotificationError::InvalidPayload(format!(
            "message {} is missing the alert, badge, sound and content-available keys",
            message
        )));
    }

    let mut opts = message.as_map().clone();
    let mut aps = Map::new();

    match opts.remove("sound") {
        None | Some(Value::Null) | Some(Value::Bool(false)) => {}
        Some(Value::Bool(true)) => {
            aps.insert("sound".to_string(), Value::from("default"));
        }
        Some(Value::String(sound)) => {
            aps.insert("sound".to_string(), Value::String(sound));
        }
        Some(other) => {
            aps.insert("sound".to_string(), Value::String(other.to_string()));
        }
    }

    let mut root = Map::new();
    root.insert("aps".to_string(), Value::Object(aps));

    match opts.remove("custom") {
        None | Some(Value::Null) => {}
        Some(Value::Object(custom)) => root.extend(custom),
        Some(other) => {
            return Err(NotificationError::InvalidPayload(format!(
                "custom data must be a JSON object, got {}",
                other
            )));
        }
    }

    match root.get_mut("aps") {
        Some(Value::Object(aps)) => aps.extend(opts),
        _ => {
            return Err(NotificationError::InvalidPayload(
                "custom data replaced aps with a non-object".to_string(),
            ));
        }
    }

    serde_json::to_string(&Value::Object(root)).map_err(|e| NotificationError::Json(e.to_string()))
}

/// Encode the command 0 layout
pub fn encode_simple(token: &[u8], payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(5 + token.len() + payload.len());

    buf.push(SIMPLE_COMMAND);
    buf.push(0);
    buf.push(token.len() as u8);
    buf.extend_from_slice(token);
    buf.push(0);
    buf.push(payload.len() as u8);
    buf.extend_from_slice(payload);

    buf
}

/// Encode the command 2 layout, items always in id order
pub fn encode_frame(
    token: &[u8],
    payload: &[u8],
    identifier: [u8; 4],
    expiry: u32,
    priority: u8,
) -> Vec<u8> {
    let body_len = 5 * ITEM_HEADER_LEN + token.len() + payload.len() + 4 + 4 + 1;
    let mut body = Vec::with_capacity(body_len);

    push_item(&mut body, ItemId::Token, token);
    push_item(&mut body, ItemId::Payload, payload);
    push_item(&mut body, ItemId::Identifier, &identifier);
    push_item(&mut body, ItemId::Expiry, &expiry.to_be_bytes());
    push_item(&mut body, ItemId::Priority, &[priority]);

    let mut packet = Vec::with_capacity(FRAME_HEADER_LEN + body.len());
    packet.push(FRAME_COMMAND);
    packet.extend_from_slice(&(body.len() as u32).to_be_bytes());
    packet.extend_from_slice(&body);

    packet
}

fn push_item(buf: &mut Vec<u8>, id: ItemId, value: &[u8]) {
    buf.push(id.as_u8());
    buf.extend_from_slice(&(value.len() as u16).to_be_bytes());
    buf.extend_from_slice(value);
}

/// Fields recovered from an encoded packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedNotification {
    pub command: u8,
    pub token: Vec<u8>,
    pub payload: Vec<u8>,
    /// Present for FRAME packets only
    pub identifier: Option<[u8; 4]>,
    pub expiry: Option<u32>,
    pub priority: Option<u8>,
}

impl DecodedNotification {
    /// Parse the payload back into JSON
    pub fn payload_json(&self) -> Result<Value, NotificationError> {
        serde_json::from_slice(&self.payload).map_err(|e| NotificationError::Json(e.to_string()))
    }
}

/// Decode a command 2 packet. Items may appear in any order.
pub fn decode_frame(data: &[u8]) -> Result<DecodedNotification, NotificationError> {
    if data.len() < FRAME_HEADER_LEN {
        return Err(NotificationError::BufferTooShort {
            need: FRAME_HEADER_LEN,
            got: data.len(),
        });
    }
    if data[0] != FRAME_COMMAND {
        return Err(NotificationError::UnexpectedCommand(data[0]));
    }

    let body_len = u32::from_be_bytes([data[1], data[2], data[3], data[4]]) as usize;
    let expected_total = FRAME_HEADER_LEN + body_len;
    if data.len() != expected_total {
        return Err(NotificationError::BufferTooShort {
            need: expected_total,
            got: data.len(),
        });
    }

    let mut decoded = DecodedNotification {
        command: FRAME_COMMAND,
        token: Vec::new(),
        payload: Vec::new(),
        identifier: None,
        expiry: None,
        priority: None,
    };
    let mut seen_token = false;
    let mut seen_payload = false;

    let mut rest = &data[FRAME_HEADER_LEN..];
    while !rest.is_empty() {
        if rest.len() < ITEM_HEADER_LEN {
            return Err(NotificationError::BufferTooShort {
                need: ITEM_HEADER_LEN,
                got: rest.len(),
            });
        }
        let id = ItemId::from_u8(rest[0])?;
        let len = u16::from_be_bytes([rest[1], rest[2]]) as usize;
        let end = ITEM_HEADER_LEN + len;
        if rest.len() < end {
            return Err(NotificationError::BufferTooShort {
                need: end,
                got: rest.len(),
            });
        }
        let value = &rest[ITEM_HEADER_LEN..end];

        match id {
            ItemId::Token => {
                decoded.token = value.to_vec();
                seen_token = true;
            }
            ItemId::Payload => {
                decoded.payload = value.to_vec();
                seen_payload = true;
            }
            ItemId::Identifier => {
                decoded.identifier = Some(fixed_item(id, value)?);
            }
            ItemId::Expiry => {
                decoded.expiry = Some(u32::from_be_bytes(fixed_item(id, value)?));
            }
            ItemId::Priority => {
                let [priority] = fixed_item::<1>(id, value)?;
                decoded.priority = Some(priority);
            }
        }

        rest = &rest[end..];
    }

    if !seen_token {
        return Err(NotificationError::MissingItem(ItemId::Token.as_u8()));
    }
    if !seen_payload {
        return Err(NotificationError::MissingItem(ItemId::Payload.as_u8()));
    }

    Ok(decoded)
}

fn fixed_item<const N: usize>(id: ItemId, value: &[u8]) -> Result<[u8; N], NotificationError> {
    <[u8; N]>::try_from(value).map_err(|_| NotificationError::InvalidItemLength {
        item: id.as_u8(),
        len: value.len(),
    })
}

/// Decode a command 0 packet
pub fn decode_simple(data: &[u8]) -> Result<DecodedNotification, NotificationError> {
    if data.len() < 3 {
        return Err(NotificationError::BufferTooShort {
            need: 3,
            got: data.len(),
        });
    }
    if data[0] != SIMPLE_COMMAND {
        return Err(NotificationError::UnexpectedCommand(data[0]));
    }

    let token_len = data[2] as usize;
    let token_end = 3 + token_len;
    let header_end = token_end + 2;
    if data.len() < header_end {
        return Err(NotificationError::BufferTooShort {
            need: header_end,
            got: data.len(),
        });
    }

    let payload_len = data[token_end + 1] as usize;
    let expected_total = header_end + payload_len;
    if data.len() != expected_total {
        return Err(NotificationError::BufferTooShort {
            need: expected_total,
            got: data.len(),
        });
    }

    Ok(DecodedNotification {
        command: SIMPLE_COMMAND,
        token: data[3..token_end].to_vec(),
        payload: data[header_end..].to_vec(),
        identifier: None,
        expiry: None,
        priority: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn message(value: Value) -> Message {
        Message::try_from(value).unwrap()
    }

    #[test]
    fn test_item_id_conversion() {
        assert_eq!(ItemId::Token.as_u8(), 1);
        assert_eq!(ItemId::Priority.as_u8(), 5);
        assert_eq!(ItemId::from_u8(3).unwrap(), ItemId::Identifier);
        assert!(matches!(
            ItemId::from_u8(9),
            Err(NotificationError::UnknownItem(9))
        ));
    }

    #[test]
    fn test_normalize_token() {
        assert_eq!(normalize_token("<abcd 1234>"), "abcd1234");
        assert_eq!(normalize_token(" ab|cd\t12\n34 "), "abcd1234");
    }

    #[test]
    fn test_decode_token() {
        assert_eq!(decode_token("<ABCD 1234>").unwrap(), vec![0xab, 0xcd, 0x12, 0x34]);
        assert!(matches!(
            decode_token("abc"),
            Err(NotificationError::InvalidToken(_))
        ));
        assert!(matches!(
            decode_token("zz"),
            Err(NotificationError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_package_sound_variants() {
        let packaged = package_message(&message(json!({"sound": true}))).unwrap();
        assert_eq!(packaged, r#"{"aps":{"sound":"default"}}"#);

        let packaged = package_message(&message(json!({"sound": "chime.aiff"}))).unwrap();
        assert_eq!(packaged, r#"{"aps":{"sound":"chime.aiff"}}"#);

        let packaged = package_message(&message(json!({"badge": 1, "sound": false}))).unwrap();
        assert_eq!(packaged, r#"{"aps":{"badge":1}}"#);

        let packaged = package_message(&message(json!({"sound": 3}))).unwrap();
        assert_eq!(packaged, r#"{"aps":{"sound":"3"}}"#);
    }

    #[test]
    fn test_package_custom_merged_into_root() {
        let packaged =
            package_message(&message(json!({"alert": "Stuff", "custom": {"code": 23}}))).unwrap();
        let value: Value = serde_json::from_str(&packaged).unwrap();
        assert_eq!(value, json!({"aps": {"alert": "Stuff"}, "code": 23}));
    }

    #[test]
    fn test_package_extras_under_aps() {
        let packaged = package_message(&message(
            json!({"alert": "Hi", "content-available": 1, "category": "NEWS"}),
        ))
        .unwrap();
        let value: Value = serde_json::from_str(&packaged).unwrap();
        assert_eq!(
            value,
            json!({"aps": {"alert": "Hi", "content-available": 1, "category": "NEWS"}})
        );
    }

    #[test]
    fn test_package_rejects_non_object_custom() {
        let result = package_message(&message(json!({"alert": "Hi", "custom": [1, 2]})));
        assert!(matches!(result, Err(NotificationError::InvalidPayload(_))));
    }

    #[test]
    fn test_package_rejects_missing_keys() {
        let result = package_message(&message(json!({"custom": {"code": 1}})));
        assert!(matches!(result, Err(NotificationError::InvalidPayload(_))));
    }

    #[test]
    fn test_simple_layout() {
        let bytes = encode_simple(&[0xab, 0xcd], b"{}");
        assert_eq!(bytes, vec![0, 0, 2, 0xab, 0xcd, 0, 2, b'{', b'}']);

        let decoded = decode_simple(&bytes).unwrap();
        assert_eq!(decoded.token, vec![0xab, 0xcd]);
        assert_eq!(decoded.payload, b"{}".to_vec());
        assert_eq!(decoded.identifier, None);
    }

    #[test]
    fn test_simple_length_byte_truncates() {
        let token = vec![0x11; 300];
        let bytes = encode_simple(&token, b"{}");
        assert_eq!(bytes[2], (300 % 256) as u8);
    }

    #[test]
    fn test_frame_layout_bytes() {
        let bytes = encode_frame(&[0xab, 0xcd, 0x12, 0x34], b"{}", [1, 2, 3, 4], 0x0102_0304, 10);
        let expected: Vec<u8> = vec![
            2, 0, 0, 0, 30, // command, body length
            1, 0, 4, 0xab, 0xcd, 0x12, 0x34, // token
            2, 0, 2, b'{', b'}', // payload
            3, 0, 4, 1, 2, 3, 4, // identifier
            4, 0, 4, 1, 2, 3, 4, // expiry
            5, 0, 1, 10, // priority
        ];
        assert_eq!(bytes, expected);
    }

    #[test]
    fn test_decode_frame_any_item_order() {
        let mut data = vec![2, 0, 0, 0, 0];
        data.extend_from_slice(&[5, 0, 1, 7]);
        data.extend_from_slice(&[2, 0, 2, b'{', b'}']);
        data.extend_from_slice(&[1, 0, 1, 0xff]);
        let body_len = (data.len() - FRAME_HEADER_LEN) as u32;
        data[1..5].copy_from_slice(&body_len.to_be_bytes());

        let decoded = decode_frame(&data).unwrap();
        assert_eq!(decoded.token, vec![0xff]);
        assert_eq!(decoded.priority, Some(7));
        assert_eq!(decoded.identifier, None);
    }

    #[test]
    fn test_decode_frame_errors() {
        assert!(matches!(
            decode_frame(&[2, 0]),
            Err(NotificationError::BufferTooShort { need: 5, got: 2 })
        ));
        assert!(matches!(
            decode_frame(&[0, 0, 0, 0, 0]),
            Err(NotificationError::UnexpectedCommand(0))
        ));
        assert!(matches!(
            decode_frame(&[2, 0, 0, 0, 4, 9, 0, 1, 0]),
            Err(NotificationError::UnknownItem(9))
        ));
        assert!(matches!(
            decode_frame(&[2, 0, 0, 0, 4, 5, 0, 1, 0]),
            Err(NotificationError::MissingItem(1))
        ));
        assert!(matches!(
            decode_frame(&[2, 0, 0, 0, 5, 5, 0, 2, 0, 0]),
            Err(NotificationError::InvalidItemLength { item: 5, len: 2 })
        ));
    }

    #[test]
    fn test_decode_simple_truncated() {
        let bytes = encode_simple(&[1, 2, 3], b"{\"a\":1}");
        assert!(decode_simple(&bytes[..bytes.len() - 1]).is_err());
    }

    proptest! {
        #[test]
        fn prop_frame_decode_recovers_fields(
            token in proptest::collection::vec(any::<u8>(), 1..64),
            alert in "[a-zA-Z0-9 ]{0,100}",
            badge in proptest::option::of(0u32..1000),
            identifier in any::<[u8; 4]>(),
            expiry in any::<u32>(),
            priority in any::<u8>(),
        ) {
            let mut msg = Message::alert(alert.clone());
            if let Some(badge) = badge {
                msg.insert("badge", badge);
            }
            let payload = package_message(&msg).unwrap();
            let bytes = encode_frame(&token, payload.as_bytes(), identifier, expiry, priority);

            let decoded = decode_frame(&bytes).unwrap();
            prop_assert_eq!(&decoded.token, &token);
            prop_assert_eq!(decoded.identifier, Some(identifier));
            prop_assert_eq!(decoded.expiry, Some(expiry));
            prop_assert_eq!(decoded.priority, Some(priority));

            let mut expected = json!({"aps": {"alert": alert}});
            if let Some(badge) = badge {
                expected["aps"]["badge"] = json!(badge);
            }
            prop_assert_eq!(decoded.payload_json().unwrap(), expected);
        }
    }
}
