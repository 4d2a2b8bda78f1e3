//! Console output helpers.

/// Print an informational line.
pub fn info(message: &str) {
    println!("{message}");
}

/// Print a success line.
pub fn success(message: &str) {
    println!("✓ {message}");
}

/// Print an error line to stderr.
pub fn error(message: &str) {
    eprintln!("error: {message}");
}

/// Print a section header.
pub fn section(title: &str) {
    println!("\n{title}");
    println!("{}", "=".repeat(title.len()));
}

/// Print a blank line.
pub fn newline() {
    println!();
}
