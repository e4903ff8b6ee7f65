// src/utils/log.rs

//! Run log formatting helpers.
//!
//! Thin wrappers over the `log` facade so that every command prints headers,
//! steps and summaries the same way.

/// Log a separator line
pub fn separator() {
    log::info!("{}", "─".repeat(60));
}

/// Log a header
pub fn header(title: &str) {
    let border = "═".repeat(60);
    log::info!("{border}");
    log::info!("  {title}");
    log::info!("{border}");
}

/// Log a step in a process
pub fn step(step_num: usize, total: usize, message: &str) {
    log::info!("[STEP {step_num}/{total}] {message}");
}

/// Log a sub-item (indented)
pub fn sub_item(message: &str) {
    log::info!("    {message}");
}

/// Log a summary section
pub fn summary(title: &str, items: &[(&str, String)]) {
    log::info!("[SUMMARY] {title}");
    for (key, value) in items {
        log::info!("    {key}: {value}");
    }
}

/// Log a success message
pub fn success(message: &str) {
    log::info!("[OK] {message}");
}

/// Log a warning
pub fn warn(message: &str) {
    log::warn!("[WARN] {message}");
}
