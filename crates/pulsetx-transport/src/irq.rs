//! Interrupt counting from `/proc/interrupts`.

use std::fs;
use std::path::PathBuf;

const PROC_INTERRUPTS: &str = "/proc/interrupts";

/// Sum the per-CPU counts of every IRQ line whose description contains `name`.
///
/// Returns `None` when the header is missing or no line matches.
pub fn count_interrupts(text: &str, name: &str) -> Option<u64> {
    let mut lines = text.lines();
    let cpus = lines.next()?.split_whitespace().count();
    if cpus == 0 {
        return None;
    }

    let mut total = None;
    for line in lines {
        let Some((_, rest)) = line.split_once(':') else {
            continue;
        };
        let mut fields = rest.split_whitespace();
        let counts: Vec<u64> = fields
            .by_ref()
            .take(cpus)
            .map_while(|f| f.parse().ok())
            .collect();
        let description: Vec<&str> = fields.collect();
        if description.iter().any(|d| d.contains(name)) {
            *total.get_or_insert(0) += counts.iter().sum::<u64>();
        }
    }
    total
}

/// Reads interrupt totals for one device name
#[derive(Debug, Clone)]
pub struct IrqCounter {
    name: String,
    path: PathBuf,
}

impl IrqCounter {
    /// Counter over the system `/proc/interrupts`
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_path(name, PROC_INTERRUPTS)
    }

    /// Counter over an arbitrary file in `/proc/interrupts` format
    pub fn with_path(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }

    /// Current total, or `None` if the file is unreadable or nothing matches
    pub fn read(&self) -> Option<u64> {
        let text = fs::read_to_string(&self.path).ok()?;
        count_interrupts(&text, &self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
           CPU0       CPU1       CPU2       CPU3
  0:         20          0          0          0   IO-APIC   2-edge      timer
 24:     100200          7          0         13   PCI-MSI 524288-edge      enp1s0-TxRx-0
 25:         50       6000          0          0   PCI-MSI 524289-edge      enp1s0-TxRx-1
 26:          1          0          0          0   PCI-MSI 524290-edge      enp1s0
NMI:          0          0          0          0   Non-maskable interrupts
";

    #[test]
    fn test_count_matching_lines() {
        assert_eq!(count_interrupts(SAMPLE, "enp1s0-TxRx-0"), Some(100_220));
        assert_eq!(
            count_interrupts(SAMPLE, "enp1s0"),
            Some(100_220 + 6050 + 1)
        );
        assert_eq!(count_interrupts(SAMPLE, "timer"), Some(20));
    }

    #[test]
    fn test_no_match() {
        assert_eq!(count_interrupts(SAMPLE, "eth9"), None);
        assert_eq!(count_interrupts("", "eth0"), None);
    }

    #[test]
    fn test_unreadable_file() {
        let counter = IrqCounter::with_path("eth0", "/nonexistent/interrupts");
        assert_eq!(counter.read(), None);
    }
}
