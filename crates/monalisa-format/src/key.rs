use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Key types a MonaLisa license can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyType {
    /// Content decryption key.
    Content,
    /// Signing key.
    Signing,
    /// One-time token key.
    Ott,
    /// Operator session key.
    OperatorSession,
}

impl KeyType {
    /// Upper-case wire name of the key type.
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyType::Content => "CONTENT",
            KeyType::Signing => "SIGNING",
            KeyType::Ott => "OTT",
            KeyType::OperatorSession => "OPERATOR_SESSION",
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CONTENT" => Ok(KeyType::Content),
            "SIGNING" => Ok(KeyType::Signing),
            "OTT" => Ok(KeyType::Ott),
            "OPERATOR_SESSION" => Ok(KeyType::OperatorSession),
            other => Err(format!("unknown key type: {}", other)),
        }
    }
}

/// A key recovered from a license.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Key {
    /// 16-byte key identifier.
    pub kid: Uuid,
    /// Raw key bytes.
    pub key: Vec<u8>,
    /// Key type.
    pub key_type: KeyType,
    /// Optional permission list.
    pub permissions: Option<Vec<String>>,
}

impl Key {
    /// Create a key without permissions.
    pub fn new(kid: Uuid, key: impl Into<Vec<u8>>, key_type: KeyType) -> Self {
        Self {
            kid,
            key: key.into(),
            key_type,
            permissions: None,
        }
    }

    /// Lower-case hex of the key identifier bytes.
    pub fn kid_hex(&self) -> String {
        hex::encode(self.kid.as_bytes())
    }

    /// Lower-case hex of the key bytes.
    pub fn key_hex(&self) -> String {
        hex::encode(&self.key)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}:{}", self.key_type, self.kid_hex(), self.key_hex())
    }
}

/// Upper-case hex rendering of arbitrary bytes.
pub fn bytes_to_hex(data: &[u8]) -> String {
    hex::encode_upper(data)
}

/// Parse a hex string into bytes.
pub fn hex_to_bytes(value: &str) -> Result<Vec<u8>, hex::FromHexError> {
    hex::decode(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_type_names_round_trip() {
        for key_type in [
            KeyType::Content,
            KeyType::Signing,
            KeyType::Ott,
            KeyType::OperatorSession,
        ] {
            assert_eq!(key_type.as_str().parse::<KeyType>(), Ok(key_type));
        }
        assert_eq!("content".parse::<KeyType>(), Ok(KeyType::Content));
        assert!("FULL".parse::<KeyType>().is_err());
    }

    #[test]
    fn display_renders_type_and_hex() {
        let key = Key::new(Uuid::nil(), vec![0xab, 0x01], KeyType::Content);
        assert_eq!(
            key.to_string(),
            "[CONTENT] 00000000000000000000000000000000:ab01"
        );
    }

    #[test]
    fn hex_helpers() {
        assert_eq!(bytes_to_hex(&[0xde, 0xad]), "DEAD");
        assert_eq!(hex_to_bytes("dead").unwrap(), vec![0xde, 0xad]);
        assert!(hex_to_bytes("xyz").is_err());
    }
}
