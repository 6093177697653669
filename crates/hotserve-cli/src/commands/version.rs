use miette::Result;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Human-readable version line.
#[must_use]
pub fn version_string() -> String {
    format!("hotserve {VERSION}")
}

pub fn run() -> Result<()> {
    println!("{}", version_string());
    Ok(())
}
