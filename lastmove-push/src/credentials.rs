//! VAPID application server identity.

use std::fmt;

pub const PUBLIC_KEY_ENV: &str = "VAPID_PUBLIC_KEY";
pub const PRIVATE_KEY_ENV: &str = "VAPID_PRIVATE_KEY";

#[derive(Clone, Default, PartialEq, Eq)]
pub struct VapidCredentials {
    pub subject: String,
    pub public_key: String,
    pub private_key: String,
}

impl VapidCredentials {
    pub fn new(
        subject: impl Into<String>,
        public_key: impl Into<String>,
        private_key: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            public_key: public_key.into(),
            private_key: private_key.into(),
        }
    }

    /// Names of the parts that are empty.
    pub fn missing(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.subject.trim().is_empty() {
            missing.push("vapid_subject");
        }
        if self.public_key.trim().is_empty() {
            missing.push("vapid_public_key");
        }
        if self.private_key.trim().is_empty() {
            missing.push("vapid_private_key");
        }
        missing
    }

    pub fn is_complete(&self) -> bool {
        self.missing().is_empty()
    }
}

impl fmt::Debug for VapidCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VapidCredentials")
            .field("subject", &self.subject)
            .field("public_key", &self.public_key)
            .field("private_key", &"<redacted>")
            .finish()
    }
}
