use std::path::Path;

const MEMINFO_PATH: &str = "/proc/meminfo";

/// Count words as whitespace-separated tokens that contain at least one
/// alphanumeric character. Stray punctuation and bullets are not words.
pub fn count_words(text: &str) -> u32 {
    let count = text
        .split_whitespace()
        .filter(|token| token.chars().any(char::is_alphanumeric))
        .count();
    u32::try_from(count).unwrap_or(u32::MAX)
}

/// Currently available system memory in megabytes, if the platform exposes it.
pub fn available_memory_mb() -> Option<u64> {
    read_meminfo(Path::new(MEMINFO_PATH))
}

fn read_meminfo(path: &Path) -> Option<u64> {
    let contents = std::fs::read_to_string(path).ok()?;
    parse_meminfo(&contents)
}

/// Parse `MemAvailable` (falling back to `MemFree`) from `/proc/meminfo`.
fn parse_meminfo(contents: &str) -> Option<u64> {
    let field = |name: &str| {
        contents.lines().find_map(|line| {
            let rest = line.strip_prefix(name)?.strip_prefix(':')?;
            let kb: u64 = rest.split_whitespace().next()?.parse().ok()?;
            Some(kb / 1024)
        })
    };
    field("MemAvailable").or_else(|| field("MemFree"))
}
