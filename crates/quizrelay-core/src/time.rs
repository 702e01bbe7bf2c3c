/// Current wall-clock time as integer milliseconds since the Unix epoch.
/// All timestamps on the wire use this format.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
