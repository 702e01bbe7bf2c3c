use rand::Rng;

/// Hard cap on participants per room.
pub const MAX_PLAYERS_PER_ROOM: usize = 240;

/// Room codes are 4 characters drawn from `[A-Z0-9]`.
pub const ROOM_CODE_LEN: usize = 4;

const ROOM_CODE_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Generate a random room code. Uniqueness against live rooms is the
/// registry's job; callers retry on collision.
pub fn generate_room_code() -> String {
    let mut rng = rand::rng();
    (0..ROOM_CODE_LEN)
        .map(|_| ROOM_CODE_CHARSET[rng.random_range(0..ROOM_CODE_CHARSET.len())] as char)
        .collect()
}

/// Validates that a room code is 4 uppercase alphanumeric characters.
pub fn is_valid_room_code(code: &str) -> bool {
    code.len() == ROOM_CODE_LEN
        && code
            .bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
}
