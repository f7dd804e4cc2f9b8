use rand::{distributions::Alphanumeric, rngs::OsRng, Rng};

const TOKEN_LEN: usize = 32;

/// Opaque single-use token for email verification and password reset links.
/// Drawn from the OS CSPRNG; unguessable from prior tokens or the clock.
pub fn generate_token() -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LEN)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_shape() {
        let token = generate_token();
        assert_eq!(token.len(), TOKEN_LEN);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn tokens_differ() {
        assert_ne!(generate_token(), generate_token());
    }
}
