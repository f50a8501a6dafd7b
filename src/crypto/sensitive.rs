/// Wrapper for signing-key material that is zeroized on drop.
use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

/// A secret string (e.g. a hex private key). `Debug` never prints it.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SensitiveString(String);

impl SensitiveString {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SensitiveString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SensitiveString(<redacted>)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_is_redacted() {
        let key = SensitiveString::new("deadbeef");
        let printed = format!("{key:?}");
        assert!(!printed.contains("deadbeef"));
        assert_eq!(key.expose(), "deadbeef");
        assert!(!key.is_empty());
    }
}
