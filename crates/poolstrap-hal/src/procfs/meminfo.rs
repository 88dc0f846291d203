//! Parsing helpers for `/proc/meminfo`.

/// Extracts the most relevant memory-available value from `/proc/meminfo`.
///
/// Returns the value in KiB.
pub fn parse_mem_available_kb(content: &str) -> Option<u64> {
    // Preferred on modern kernels.
    for line in content.lines() {
        if let Some(value) = line.strip_prefix("MemAvailable:") {
            return value
                .split_whitespace()
                .next()
                .and_then(|num| num.parse().ok());
        }
    }
    // Fallback for minimal / older formats.
    parse_mem_total_kb(content)
}

/// Total physical memory in KiB; the ARC cap is derived from this.
pub fn parse_mem_total_kb(content: &str) -> Option<u64> {
    for line in content.lines() {
        if let Some(value) = line.strip_prefix("MemTotal:") {
            return value
                .split_whitespace()
                .next()
                .and_then(|num| num.parse().ok());
        }
    }
    None
}
