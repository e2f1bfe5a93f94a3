//! Version command

/// Print the binary's version
pub fn run() {
    println!("netassert {}", env!("CARGO_PKG_VERSION"));
}
