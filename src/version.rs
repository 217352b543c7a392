use std::cmp::Ordering;
use std::fmt;

/// Dotted numeric version such as `2.21.4.18`.
///
/// Components are compared numerically; missing trailing components count
/// as zero, so `2.21` equals `2.21.0`.
#[derive(Debug, Clone)]
pub struct DottedVersion {
    parts: Vec<u64>,
}

impl DottedVersion {
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim().trim_start_matches('v');
        if s.is_empty() {
            return None;
        }
        let parts = s
            .split('.')
            .map(|part| part.parse::<u64>().ok())
            .collect::<Option<Vec<_>>>()?;
        Some(Self { parts })
    }

    pub fn is_newer_than(&self, other: &DottedVersion) -> bool {
        self > other
    }

    fn component(&self, idx: usize) -> u64 {
        self.parts.get(idx).copied().unwrap_or(0)
    }
}

impl fmt::Display for DottedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = self
            .parts
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(".");
        f.write_str(&text)
    }
}

impl PartialEq for DottedVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for DottedVersion {}

impl PartialOrd for DottedVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DottedVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.parts.len().max(other.parts.len());
        (0..len)
            .map(|idx| self.component(idx).cmp(&other.component(idx)))
            .find(|ord| *ord != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    }
}

/// True when `latest` should be offered over what is installed.
/// An absent or unparsable installed version always warrants the update.
pub fn is_update_available(installed: Option<&str>, latest: &str) -> bool {
    let Some(latest) = DottedVersion::parse(latest) else {
        return false;
    };
    match installed.and_then(DottedVersion::parse) {
        Some(installed) => latest.is_newer_than(&installed),
        None => true,
    }
}
