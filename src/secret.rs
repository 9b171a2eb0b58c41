use rand::Rng;

pub const SECRET_LENGTH: usize = 16;

const SECRET_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Opaque token pairing the broadcaster's extension with the companion tool.
/// Uniform over the alphanumeric alphabet; operator convenience only, not a
/// cryptographic credential.
pub fn generate_secret() -> String {
    let mut rng = rand::rng();
    (0..SECRET_LENGTH)
        .map(|_| SECRET_ALPHABET[rng.random_range(0..SECRET_ALPHABET.len())] as char)
        .collect()
}

/// Editor-side key lifecycle: absent -> generated/fetched -> displayed ->
/// confirmed -> saved. The displayed copy is what the broadcaster sees in the
/// input field and may diverge from the internal value if they edit it; a
/// save is only allowed while the two match.
#[derive(Debug, Clone, Default)]
pub struct SecretKeyState {
    value: Option<String>,
    displayed: Option<String>,
}

impl SecretKeyState {
    /// Installs a key fetched from the backend and mirrors it to the display.
    pub fn adopt(&mut self, secret: String) {
        self.displayed = Some(secret.clone());
        self.value = Some(secret);
    }

    /// Generates a fresh key and mirrors it to the display.
    pub fn regenerate(&mut self) -> &str {
        let secret = generate_secret();
        self.displayed = Some(secret.clone());
        self.value = Some(secret);
        self.value.as_deref().unwrap_or_default()
    }

    /// Records an edit of the visible input field.
    pub fn set_displayed(&mut self, text: impl Into<String>) {
        self.displayed = Some(text.into());
    }

    pub fn displayed(&self) -> Option<&str> {
        self.displayed.as_deref()
    }

    /// The key cleared for transmission: present only while the displayed
    /// copy still matches the internal value. A mismatch means the save must
    /// be rejected before any network call.
    pub fn confirmed(&self) -> Option<&str> {
        match (self.value.as_deref(), self.displayed.as_deref()) {
            (Some(value), Some(displayed)) if value == displayed => Some(value),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{generate_secret, SecretKeyState, SECRET_LENGTH};

    #[test]
    fn generated_secrets_are_fixed_length_alphanumeric() {
        for _ in 0..32 {
            let secret = generate_secret();
            assert_eq!(secret.len(), SECRET_LENGTH);
            assert!(secret.chars().all(|ch| ch.is_ascii_alphanumeric()));
        }
    }

    #[test]
    fn adopted_key_is_immediately_confirmed() {
        let mut state = SecretKeyState::default();
        assert!(state.confirmed().is_none());
        state.adopt("k3yFromBackend00".to_owned());
        assert_eq!(state.confirmed(), Some("k3yFromBackend00"));
        assert_eq!(state.displayed(), Some("k3yFromBackend00"));
    }

    #[test]
    fn editing_the_displayed_copy_blocks_confirmation() {
        let mut state = SecretKeyState::default();
        state.regenerate();
        assert!(state.confirmed().is_some());

        state.set_displayed("tampered");
        assert!(state.confirmed().is_none());
    }

    #[test]
    fn regenerate_replaces_both_copies() {
        let mut state = SecretKeyState::default();
        state.set_displayed("stale");
        let fresh = state.regenerate().to_owned();
        assert_eq!(state.displayed(), Some(fresh.as_str()));
        assert_eq!(state.confirmed(), Some(fresh.as_str()));
    }
}
