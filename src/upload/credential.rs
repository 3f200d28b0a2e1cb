//! Upload credential

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

use crate::signer::Signature;

/// `base64("<address>:<signature hex>")`, sent as Basic to the gateway and
/// as Bearer to the pinner.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialToken(String);

impl CredentialToken {
    pub fn new(address: &str, signature: &Signature) -> Self {
        Self(BASE64.encode(format!("{}:{}", address, signature.to_hex())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn basic(&self) -> String {
        format!("Basic {}", self.0)
    }

    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl std::fmt::Debug for CredentialToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CredentialToken(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_format() {
        let sig = Signature::from_bytes(vec![0xab, 0xcd]);
        let token = CredentialToken::new("5Addr", &sig);

        let decoded = BASE64.decode(token.as_str()).unwrap();
        assert_eq!(decoded, b"5Addr:0xabcd");
        assert_eq!(token.basic(), format!("Basic {}", token.as_str()));
        assert_eq!(token.bearer(), format!("Bearer {}", token.as_str()));
        assert_eq!(format!("{:?}", token), "CredentialToken(..)");
    }
}
