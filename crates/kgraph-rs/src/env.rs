use std::env;
use std::sync::OnceLock;

pub(crate) const DISABLE_COMM_STREAM: &str = "KGRAPH_DISABLE_COMM_STREAM";
pub(crate) const PASS_STATS: &str = "KGRAPH_PASS_STATS";
pub(crate) const COLLECTIVE_OP: &str = "KGRAPH_COLLECTIVE_OP";

static KGRAPH_DISABLE_COMM_STREAM: OnceLock<Option<String>> = OnceLock::new();
static KGRAPH_PASS_STATS: OnceLock<Option<String>> = OnceLock::new();
static KGRAPH_COLLECTIVE_OP: OnceLock<Option<String>> = OnceLock::new();

pub(crate) fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}

fn cached(name: &str, cache: &OnceLock<Option<String>>) -> Option<String> {
    cache
        .get_or_init(|| match env::var(name) {
            Ok(value) if !value.trim().is_empty() => Some(value.trim().to_string()),
            _ => None,
        })
        .clone()
}

/// Reads a `KGRAPH_*` variable, caching the first read for the process lifetime.
pub(crate) fn lookup(name: &str) -> Option<String> {
    match name {
        DISABLE_COMM_STREAM => cached(name, &KGRAPH_DISABLE_COMM_STREAM),
        PASS_STATS => cached(name, &KGRAPH_PASS_STATS),
        COLLECTIVE_OP => cached(name, &KGRAPH_COLLECTIVE_OP),
        _ => None,
    }
}
