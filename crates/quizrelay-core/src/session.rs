use uuid::Uuid;

/// Fixed prefix on every server-minted session token. Lets both sides
/// format-check a token without a registry lookup.
pub const SESSION_PREFIX: &str = "sess-";

/// Prefix plus a hyphenated UUID.
const SESSION_ID_LEN: usize = SESSION_PREFIX.len() + 36;

/// Mint a fresh opaque session token. Host and player tokens share the
/// scheme; the role is recorded on the connection, not in the token.
pub fn mint_session_id() -> String {
    format!("{SESSION_PREFIX}{}", Uuid::new_v4())
}

/// Accept only strings matching the mint format. Anything else is
/// treated as absent by the handlers.
pub fn is_valid_session_id(id: &str) -> bool {
    id.len() == SESSION_ID_LEN
        && id.starts_with(SESSION_PREFIX)
        && id[SESSION_PREFIX.len()..]
            .bytes()
            .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f' | b'-'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minted_ids_validate() {
        for _ in 0..50 {
            let id = mint_session_id();
            assert!(is_valid_session_id(&id), "Invalid session id: {id}");
        }
    }

    #[test]
    fn minted_ids_are_unique() {
        let a = mint_session_id();
        let b = mint_session_id();
        assert_ne!(a, b);
    }

    #[test]
    fn rejects_malformed_ids() {
        assert!(!is_valid_session_id(""));
        assert!(!is_valid_session_id("sess-"));
        assert!(!is_valid_session_id("sess-short"));
        assert!(!is_valid_session_id("token-123e4567-e89b-12d3-a456-426614174000"));
        // uppercase hex is not what the mint produces
        assert!(!is_valid_session_id("sess-123E4567-E89B-12D3-A456-426614174000"));
        // correct length, illegal characters
        assert!(!is_valid_session_id("sess-123e4567-e89b-12d3-a456-42661417400!"));
    }
}
