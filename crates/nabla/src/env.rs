use std::env;
use std::sync::OnceLock;

use crate::device::DeviceType;

static NABLA_EAGER: OnceLock<bool> = OnceLock::new();
static NABLA_DISABLE_COMPILE: OnceLock<bool> = OnceLock::new();

fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}

fn flag(cell: &'static OnceLock<bool>, name: &str) -> bool {
    *cell.get_or_init(|| match env::var(name) {
        Ok(value) if !value.trim().is_empty() => parse_bool(&value),
        _ => false,
    })
}

/// Evaluate every array as soon as it is built.
pub(crate) fn eager_enabled() -> bool {
    flag(&NABLA_EAGER, "NABLA_EAGER")
}

pub(crate) fn compile_disabled() -> bool {
    flag(&NABLA_DISABLE_COMPILE, "NABLA_DISABLE_COMPILE")
}

pub(crate) fn initial_device_type() -> DeviceType {
    match env::var("NABLA_DEFAULT_DEVICE") {
        Ok(value) if value.trim().eq_ignore_ascii_case("gpu") => DeviceType::Gpu,
        _ => DeviceType::Cpu,
    }
}

#[cfg(test)]
mod tests {
    use super::parse_bool;

    #[test]
    fn parses_common_truthy_spellings() {
        assert!(parse_bool(" YES "));
        assert!(parse_bool("1"));
        assert!(!parse_bool("0"));
        assert!(!parse_bool("off"));
    }
}
