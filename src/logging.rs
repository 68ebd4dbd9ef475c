//! Diagnostic logging to stderr.
//!
//! Level priority: `RUST_LOG` > `--verbose` > config `[debug] enabled` >
//! `warn`. Answers go to stdout, so logs never interleave with them in a pipe.

use tracing_subscriber::EnvFilter;

const DEFAULT_LEVEL: &str = "warn";

/// Where the active filter came from
#[derive(Debug, Clone, PartialEq, Eq)]
enum FilterSource {
    Env,
    Directive(&'static str),
}

fn select_filter(rust_log_set: bool, verbose: bool, config_debug: bool) -> FilterSource {
    if rust_log_set {
        FilterSource::Env
    } else if verbose || config_debug {
        FilterSource::Directive("ohman=debug")
    } else {
        FilterSource::Directive(DEFAULT_LEVEL)
    }
}

/// Initialise the tracing subscriber. Safe to call more than once; later
/// calls are ignored.
pub fn init(verbose: bool, config_debug: bool) {
    let rust_log_set = std::env::var_os("RUST_LOG").is_some_and(|v| !v.is_empty());
    let filter = match select_filter(rust_log_set, verbose, config_debug) {
        FilterSource::Env => EnvFilter::from_default_env(),
        FilterSource::Directive(directive) => EnvFilter::new(directive),
    };

    let initialised = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .try_init()
        .is_ok();

    if initialised {
        tracing::debug!(version = env!("CARGO_PKG_VERSION"), "logging initialised");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rust_log_wins() {
        assert_eq!(select_filter(true, true, true), FilterSource::Env);
    }

    #[test]
    fn test_verbose_or_config_enables_debug() {
        assert_eq!(
            select_filter(false, true, false),
            FilterSource::Directive("ohman=debug")
        );
        assert_eq!(
            select_filter(false, false, true),
            FilterSource::Directive("ohman=debug")
        );
    }

    #[test]
    fn test_default_level() {
        assert_eq!(
            select_filter(false, false, false),
            FilterSource::Directive("warn")
        );
    }
}
