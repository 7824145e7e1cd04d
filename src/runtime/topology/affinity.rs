//! CPU list parsing for worker placement.
//!
//! Syntax: comma separated `begin[-end[:stride]]` items, e.g.
//! `"0-7:2,16,20-21"` → 0, 2, 4, 6, 16, 20, 21.

use crate::util::config::ConfigError;

/// Parse a CPU list into the ordered CPUs it names.
pub fn parse_cpu_list(list: &str) -> Result<Vec<usize>, ConfigError> {
    let invalid = |reason: &str| ConfigError::Affinity {
        list: list.to_string(),
        reason: reason.to_string(),
    };

    let mut cpus = Vec::new();
    for item in list.split(',').map(str::trim) {
        if item.is_empty() {
            return Err(invalid("empty item"));
        }
        let (range, stride) = match item.split_once(':') {
            Some((range, stride)) => {
                let stride = stride
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| invalid("stride is not a number"))?;
                if stride == 0 {
                    return Err(invalid("stride must be positive"));
                }
                (range, stride)
            },
            None => (item, 1),
        };
        let (begin, end) = match range.split_once('-') {
            Some((begin, end)) => (begin.trim(), end.trim()),
            None => (range.trim(), range.trim()),
        };
        let begin = begin
            .parse::<usize>()
            .map_err(|_| invalid("cpu is not a number"))?;
        let end = end
            .parse::<usize>()
            .map_err(|_| invalid("cpu is not a number"))?;
        if end < begin {
            return Err(invalid("range end precedes its beginning"));
        }
        cpus.extend((begin..=end).step_by(stride));
    }
    Ok(cpus)
}
