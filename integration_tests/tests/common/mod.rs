use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, Once, OnceLock};

static INIT: Once = Once::new();

pub fn ensure_test_config() {
    INIT.call_once(|| {
        let config_path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("tests")
            .join("fixtures")
            .join("test_peakwatch_config.json");

        debug_assert!(
            config_path.exists(),
            "missing test milestone config at {}",
            config_path.display()
        );

        std::env::set_var("PEAKWATCH_CONFIG_PATH", &config_path);
    });
}

/// Tests that point `PEAKWATCH_DATA_PATH` at their own file must not
/// interleave; the variable is process-global.
pub fn env_lock() -> MutexGuard<'static, ()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub fn fresh_data_path(name: &str) -> PathBuf {
    let mut path = std::env::temp_dir();
    path.push(format!(
        "peakwatch_integration_{}_{}.json",
        std::process::id(),
        name
    ));
    let _ = std::fs::remove_file(&path);
    std::env::set_var("PEAKWATCH_DATA_PATH", &path);
    path
}
