//! Worker environment descriptor.

use statekeep_core::WorkerEnvironment;

/// Describes the calling thread's execution environment.
///
/// `name` starts empty; the handler fills it in as stores are initialized.
#[must_use]
pub fn detect() -> WorkerEnvironment {
    WorkerEnvironment {
        name: String::new(),
        thread: std::thread::current().name().map(str::to_string),
        os: std::env::consts::OS.to_string(),
        arch: std::env::consts::ARCH.to_string(),
        family: std::env::consts::FAMILY.to_string(),
        language: std::env::var("LANG").ok().filter(|lang| !lang.is_empty()),
        hardware_concurrency: available_parallelism(),
    }
}

/// Number of hardware threads, 1 when it cannot be determined.
#[must_use]
pub fn available_parallelism() -> usize {
    std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_named_thread() {
        let env = std::thread::Builder::new()
            .name("env-probe".to_string())
            .spawn(detect)
            .unwrap()
            .join()
            .unwrap();
        assert_eq!(env.thread.as_deref(), Some("env-probe"));
        assert!(env.name.is_empty());
        assert_eq!(env.os, std::env::consts::OS);
        assert!(env.hardware_concurrency >= 1);
    }
}
